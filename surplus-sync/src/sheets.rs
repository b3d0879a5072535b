//! Spreadsheet source backed by the Google Sheets values API.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use shared::SheetRecord;
use thiserror::Error;
use tracing::{debug, error};

pub const SHEETS_API_URL: &str = "https://sheets.googleapis.com";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("not authorized to read {0}; check the access token and sharing settings")]
    Unauthorized(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("sheets api returned {status} for {collection}")]
    Status { collection: String, status: StatusCode },
    #[error("invalid sheets api url {0}")]
    InvalidUrl(String),
    #[error("request to sheets api failed")]
    Http(#[from] reqwest::Error),
}

/// A named tab of one spreadsheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub name: String,
    pub spreadsheet_id: String,
    pub range: String,
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{}\" ({}!{})", self.name, self.spreadsheet_id, self.range)
    }
}

#[async_trait]
pub trait RecordSource: Sync {
    async fn fetch_records(&self, collection: &Collection) -> Result<Vec<SheetRecord>, SourceError>;
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Clone)]
pub struct SheetsClient {
    http_client: reqwest::Client,
    api_url: Url,
    access_token: String,
}

impl SheetsClient {
    pub fn new(api_url: &str, access_token: impl Into<String>) -> Result<Self, SourceError> {
        let api_url = Url::parse(api_url).map_err(|_| SourceError::InvalidUrl(api_url.to_string()))?;
        if api_url.cannot_be_a_base() {
            return Err(SourceError::InvalidUrl(api_url.to_string()));
        }
        Ok(Self {
            http_client: reqwest::Client::new(),
            api_url,
            access_token: access_token.into(),
        })
    }

    fn values_url(&self, collection: &Collection) -> Result<Url, SourceError> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| SourceError::InvalidUrl(self.api_url.to_string()))?
            .pop_if_empty()
            .extend([
                "v4",
                "spreadsheets",
                collection.spreadsheet_id.as_str(),
                "values",
                collection.range.as_str(),
            ]);
        Ok(url)
    }
}

#[async_trait]
impl RecordSource for SheetsClient {
    async fn fetch_records(&self, collection: &Collection) -> Result<Vec<SheetRecord>, SourceError> {
        let url = self.values_url(collection)?;
        debug!("Fetching {} from {}", collection, url);

        let response = self
            .http_client
            .get(url)
            .bearer_auth(&self.access_token)
            .query(&[
                ("valueRenderOption", "UNFORMATTED_VALUE"),
                ("majorDimension", "ROWS"),
            ])
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(SourceError::Unauthorized(collection.to_string()));
            }
            StatusCode::NOT_FOUND => return Err(SourceError::NotFound(collection.to_string())),
            status => {
                match response.text().await {
                    Ok(body) => error!(status = %status, %body, "Failed to fetch {}", collection),
                    Err(e) => error!(status = %status, "Failed to fetch {} (body unreadable: {})", collection, e),
                }
                return Err(SourceError::Status {
                    collection: collection.to_string(),
                    status,
                });
            }
        }

        let range: ValueRange = response.json().await?;
        Ok(rows_to_records(range.values))
    }
}

/// Turns a header row plus data rows into records. Short rows are padded with
/// empty strings and rows with no content are skipped.
pub fn rows_to_records(rows: Vec<Vec<Value>>) -> Vec<SheetRecord> {
    let mut rows = rows.into_iter();
    let Some(header) = rows.next() else {
        return Vec::new();
    };
    let labels: Vec<String> = header.iter().map(shared::cell_text).collect();

    rows.filter(|row| row.iter().any(|cell| !shared::cell_text(cell).is_empty()))
        .map(|row| {
            let cells = row
                .into_iter()
                .chain(std::iter::repeat_with(|| Value::String(String::new())));
            labels
                .iter()
                .zip(cells)
                .filter(|(label, _)| !label.is_empty())
                .map(|(label, value)| (label.clone(), value))
                .collect()
        })
        .collect()
}
