use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReliefError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("The question is empty")]
    EmptyQuestion,

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("SQL generation failed: {0}")]
    Generation(String),

    /// Carries the gate's full reason text.
    #[error("{0}")]
    PermissionDenied(String),

    #[error("Statement references a table outside the program schema: {0}")]
    UnknownTable(String),

    #[error("Statement could not be checked against the program schema: {0}")]
    UnverifiableStatement(String),

    #[error("Expected exactly one statement, found {0}")]
    MultipleStatements(usize),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Report generation failed: {0}")]
    Report(String),

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: &'static str, seconds: u64 },

    #[error("SQL {kind} timed out after {seconds}s; the server may still have committed it")]
    WriteTimeout { kind: &'static str, seconds: u64 },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ReliefError {
    /// Errors a caller is expected to see during normal operation.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ReliefError::PermissionDenied(_)
                | ReliefError::UnknownTable(_)
                | ReliefError::UnverifiableStatement(_)
                | ReliefError::MultipleStatements(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ReliefError>;
