diesel::table! {
    users (id) {
        id -> Int4,
        username -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    tables (id) {
        id -> Int4,
        name -> Varchar,
        status -> Varchar,
    }
}

diesel::table! {
    categories (id) {
        id -> Int4,
        name -> Varchar,
    }
}

diesel::table! {
    dishes (id) {
        id -> Int4,
        name -> Varchar,
        price -> Numeric,
        image -> Nullable<Varchar>,
        category_id -> Int4,
    }
}

diesel::table! {
    orders (id) {
        id -> Int4,
        table_id -> Int4,
        user_id -> Int4,
        created_at -> Timestamptz,
        subtotal -> Numeric,
        tax_amount -> Numeric,
        total -> Numeric,
        status -> Varchar,
    }
}

diesel::table! {
    order_items (id) {
        id -> Int4,
        order_id -> Int4,
        dish_id -> Int4,
        quantity -> Int4,
        price -> Numeric,
        notes -> Nullable<Text>,
        status -> Varchar,
    }
}

diesel::joinable!(dishes -> categories (category_id));
diesel::joinable!(orders -> tables (table_id));
diesel::joinable!(orders -> users (user_id));
diesel::joinable!(order_items -> orders (order_id));
diesel::joinable!(order_items -> dishes (dish_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    tables,
    categories,
    dishes,
    orders,
    order_items,
);
