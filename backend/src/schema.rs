// keep in sync with `db::SCHEMA_DDL`

diesel::table! {
    measurements (id) {
        id -> BigInt,
        device_id -> Text,
        value -> Integer,
        ts_server -> Text,
        ts_client -> Nullable<Text>,
    }
}
