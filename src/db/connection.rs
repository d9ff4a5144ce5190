//! Database connection management using sqlx

use crate::config::StoreConfig;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};

pub type DbPool = MySqlPool;

/// Initialize the database connection pool
pub async fn init_pool(config: &StoreConfig) -> Result<MySqlPool, sqlx::Error> {
    let pool = MySqlPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.timeout)
        .connect(&config.database_url)
        .await?;

    // Test the connection
    sqlx::query("SELECT 1").execute(&pool).await?;

    Ok(pool)
}
