//! Database module for the MySQL program database
//!
//! Connection pooling and the `Store` implementation the dispatcher runs
//! statements through.

pub mod connection;
pub mod mysql_store;

pub use connection::{init_pool, DbPool};
pub use mysql_store::MySqlStore;
