diesel::table! {
    food_items (id) {
        id -> Int4,
        restaurant_name -> Text,
        location -> Text,
        food_type -> Text,
        cuisine -> Nullable<Text>,
        original_price -> Nullable<Numeric>,
        reduced_price -> Nullable<Numeric>,
        number_of_bags -> Int4,
        comments -> Text,
        latitude -> Nullable<Float8>,
        longitude -> Nullable<Float8>,
    }
}

diesel::table! {
    customer_reservations (id) {
        id -> Int4,
        first_name -> Text,
        last_name -> Text,
        email -> Text,
        phone_number -> Text,
        rest_name -> Text,
        processed -> Bool,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    food_items,
    customer_reservations,
);
