//! Natural-language questions over the poverty-alleviation program database,
//! answered with role-checked SQL and a role-voiced report.

pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod generator;
pub mod llm;
pub mod orchestrator;
pub mod report;
pub mod schema;
pub mod security;

pub use config::AppConfig;
pub use error::{ReliefError, Result};
pub use orchestrator::{Orchestrator, QueryOutcome, QueryRequest};
pub use report::Report;
pub use schema::SchemaDescriptor;
pub use security::RoleId;
