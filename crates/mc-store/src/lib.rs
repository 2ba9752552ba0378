pub mod activities;
pub mod agents;
pub mod database;
pub mod error;
pub mod row_helpers;
pub mod sample;
pub mod schema;
pub mod tasks;

pub use database::Database;
pub use error::StoreError;
