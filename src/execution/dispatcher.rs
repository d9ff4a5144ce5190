//! SQL Dispatcher
//!
//! Runs one approved statement against the store: reads return the full row
//! set, writes return the affected-row count. No retries, no implicit LIMIT.

use crate::error::{ReliefError, Result};
use crate::execution::result::{ExecutionResult, RowSet};
use crate::security::{GeneratedStatement, OperationKind};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Persistent store the dispatcher executes against.
#[async_trait]
pub trait Store: Send + Sync {
    /// Run a read and return every row it produces.
    async fn execute_read(&self, sql: &str) -> Result<RowSet>;

    /// Run a single auto-committed write and return the affected-row count.
    async fn execute_write(&self, sql: &str) -> Result<u64>;
}

pub struct SqlDispatcher {
    store: Arc<dyn Store>,
    timeout: Duration,
}

impl SqlDispatcher {
    pub fn new(store: Arc<dyn Store>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn dispatch(&self, statement: &GeneratedStatement) -> Result<ExecutionResult> {
        let started = Instant::now();
        let sql = statement.sql_text();

        let result = match statement.operation_kind() {
            OperationKind::Select => {
                let rows = self.bounded(self.store.execute_read(sql), None).await?;
                ExecutionResult::Rows { rows }
            }
            kind @ (OperationKind::Insert | OperationKind::Update | OperationKind::Delete) => {
                let rows_affected = self.bounded(self.store.execute_write(sql), Some(kind)).await?;
                ExecutionResult::Affected { kind, rows_affected }
            }
            OperationKind::Other => {
                return Err(ReliefError::Execution(
                    "Refusing to execute a statement of unsupported kind".to_string(),
                ));
            }
        };

        info!(
            kind = %statement.operation_kind(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "{}",
            result.summary()
        );
        Ok(result)
    }

    /// `write` is set for mutations: a write that outlives the deadline may
    /// still commit, and the error says so.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T>>,
        write: Option<OperationKind>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(ReliefError::Execution(message))) => Err(ReliefError::Execution(message)),
            Ok(Err(other)) => Err(ReliefError::Execution(other.to_string())),
            Err(_) => match write {
                Some(kind) => Err(ReliefError::WriteTimeout {
                    kind: kind.as_str(),
                    seconds: self.timeout.as_secs(),
                }),
                None => Err(ReliefError::Timeout {
                    operation: "SQL execution",
                    seconds: self.timeout.as_secs(),
                }),
            },
        }
    }
}
