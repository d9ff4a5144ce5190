//! MySQL-backed [`Store`].

use crate::config::StoreConfig;
use crate::db::connection::{init_pool, DbPool};
use crate::error::{ReliefError, Result};
use crate::execution::{CellValue, Row, RowSet, Store};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use sqlx::mysql::MySqlRow;
use sqlx::{Column, Row as _, TypeInfo};
use tracing::{debug, error};

pub struct MySqlStore {
    pool: DbPool,
}

impl MySqlStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let pool = init_pool(config).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl Store for MySqlStore {
    async fn execute_read(&self, sql: &str) -> Result<RowSet> {
        debug!(sql, "Executing read");
        let rows = sqlx::query(sql).fetch_all(&self.pool).await.map_err(|e| {
            error!("SQL query failed: {}", e);
            ReliefError::Execution(format!("SQL query failed: {}", e))
        })?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute_write(&self, sql: &str) -> Result<u64> {
        debug!(sql, "Executing write");
        // Each statement runs on a pooled connection in autocommit mode.
        let outcome = sqlx::query(sql).execute(&self.pool).await.map_err(|e| {
            error!("SQL operation failed: {}", e);
            ReliefError::Execution(format!("SQL operation failed: {}", e))
        })?;
        Ok(outcome.rows_affected())
    }
}

fn decode_row(row: &MySqlRow) -> Result<Row> {
    let mut decoded = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let type_name = column.type_info().name().to_uppercase();
        let value = decode_cell(row, index, &type_name)
            .or_else(|_| decode_fallback(row, index))
            .map_err(|e| {
                ReliefError::Execution(format!(
                    "Cannot decode column '{}' ({}): {}",
                    column.name(),
                    type_name,
                    e
                ))
            })?;
        decoded.push(column.name(), value);
    }
    Ok(decoded)
}

fn opt<T>(value: Option<T>, wrap: impl FnOnce(T) -> CellValue) -> CellValue {
    value.map(wrap).unwrap_or(CellValue::Null)
}

fn decode_cell(row: &MySqlRow, index: usize, type_name: &str) -> std::result::Result<CellValue, sqlx::Error> {
    let value = match type_name {
        "NULL" => CellValue::Null,
        "BOOLEAN" => opt(row.try_get::<Option<bool>, _>(index)?, CellValue::Bool),
        t if t.ends_with("UNSIGNED") => opt(row.try_get::<Option<u64>, _>(index)?, CellValue::UInt),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            opt(row.try_get::<Option<i64>, _>(index)?, CellValue::Int)
        }
        "FLOAT" => opt(
            row.try_get::<Option<f32>, _>(index)?.map(f64::from),
            CellValue::Float,
        ),
        "DOUBLE" => opt(row.try_get::<Option<f64>, _>(index)?, CellValue::Float),
        "DECIMAL" => opt(row.try_get::<Option<Decimal>, _>(index)?, CellValue::Decimal),
        "DATE" => opt(row.try_get::<Option<NaiveDate>, _>(index)?, CellValue::Date),
        "DATETIME" | "TIMESTAMP" => opt(
            row.try_get::<Option<NaiveDateTime>, _>(index)?,
            CellValue::DateTime,
        ),
        "TIME" => opt(row.try_get::<Option<NaiveTime>, _>(index)?, CellValue::Time),
        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" | "BIT" => {
            opt(row.try_get::<Option<Vec<u8>>, _>(index)?, bytes_to_cell)
        }
        _ => opt(row.try_get::<Option<String>, _>(index)?, CellValue::Text),
    };
    Ok(value)
}

fn decode_fallback(row: &MySqlRow, index: usize) -> std::result::Result<CellValue, sqlx::Error> {
    match row.try_get_unchecked::<Option<String>, _>(index) {
        Ok(text) => Ok(opt(text, CellValue::Text)),
        Err(_) => Ok(opt(row.try_get_unchecked::<Option<Vec<u8>>, _>(index)?, bytes_to_cell)),
    }
}

fn bytes_to_cell(bytes: Vec<u8>) -> CellValue {
    match String::from_utf8(bytes) {
        Ok(text) => CellValue::Text(text),
        Err(e) => CellValue::Bytes(e.into_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_columns_prefer_text_when_valid_utf8() {
        assert_eq!(bytes_to_cell("苹果".as_bytes().to_vec()), CellValue::Text("苹果".to_string()));
        assert_eq!(bytes_to_cell(vec![0xff, 0x00]), CellValue::Bytes(vec![0xff, 0x00]));
    }

    #[test]
    fn test_null_wrapping() {
        assert_eq!(opt::<i64>(None, CellValue::Int), CellValue::Null);
        assert_eq!(opt(Some(7i64), CellValue::Int), CellValue::Int(7));
    }
}
