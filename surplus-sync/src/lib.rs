pub mod api;
pub mod geocode;
pub mod models;
pub mod schema;
pub mod sheets;
pub mod store;
pub mod sync;
pub mod webhook;
