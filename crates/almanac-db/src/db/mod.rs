pub mod connection;
pub mod enums;
pub mod migrate;
pub mod schema;
pub mod store;
