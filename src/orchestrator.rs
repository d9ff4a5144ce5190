//! Orchestrator
//!
//! One request, start to finish: generate → gate → guards → dispatch →
//! report. Every failure becomes a user-facing outcome; nothing is retried.

use crate::config::AppConfig;
use crate::error::ReliefError;
use crate::execution::{ExecutionResult, SqlDispatcher, Store};
use crate::generator::{audit_foreign_keys, SqlGenerator};
use crate::llm::LanguageModel;
use crate::report::{Report, ReportSynthesizer};
use crate::schema::SchemaDescriptor;
use crate::security::{check_statement, GeneratedStatement, QueryGuards, RoleId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    pub role: RoleId,
    /// Label shown to the user; defaults to the role's display name.
    pub role_display: Option<String>,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>, role: RoleId) -> Self {
        Self { question: question.into(), role, role_display: None }
    }

    pub fn with_role_display(mut self, label: impl Into<String>) -> Self {
        self.role_display = Some(label.into());
        self
    }

    fn role_label(&self) -> String {
        self.role_display
            .clone()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| self.role.display_name().to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub request_id: Uuid,
    pub sql_text: Option<String>,
    pub result: Option<ExecutionResult>,
    pub report: Report,
    /// Set whenever the request did not complete normally.
    pub error: Option<String>,
    /// Foreign-key ids returned without their names.
    pub warnings: Vec<String>,
}

impl QueryOutcome {
    fn failed(request_id: Uuid, sql_text: Option<String>, cause: &ReliefError, report: String) -> Self {
        if cause.is_rejection() {
            warn!("Request rejected: {}", cause);
        } else {
            error!("Request failed: {}", cause);
        }
        Self {
            request_id,
            sql_text,
            result: None,
            report: Report::error(report),
            error: Some(cause.to_string()),
            warnings: Vec::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

pub struct Orchestrator {
    schema: Arc<SchemaDescriptor>,
    generator: SqlGenerator,
    guards: QueryGuards,
    dispatcher: SqlDispatcher,
    reporter: ReportSynthesizer,
}

impl Orchestrator {
    pub fn new(
        schema: Arc<SchemaDescriptor>,
        config: &AppConfig,
        model: Arc<dyn LanguageModel>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            generator: SqlGenerator::new(model.clone(), schema.clone(), config.llm.timeout),
            guards: QueryGuards::new(config.gate.enforce_table_allowlist),
            dispatcher: SqlDispatcher::new(store, config.store.timeout),
            reporter: ReportSynthesizer::new(model, config.llm.timeout),
            schema,
        }
    }

    pub async fn handle(&self, request: QueryRequest) -> QueryOutcome {
        let request_id = Uuid::new_v4();
        let span = info_span!("query", %request_id, role = %request.role);
        self.run(request_id, request).instrument(span).await
    }

    async fn run(&self, request_id: Uuid, request: QueryRequest) -> QueryOutcome {
        let role_label = request.role_label();

        let sql = match self.generator.generate(&request.question).await {
            Ok(sql) => sql,
            Err(e) => {
                let message = e.to_string();
                return QueryOutcome::failed(request_id, None, &e, message);
            }
        };

        let statement = GeneratedStatement::from_sql(sql.clone());
        info!(
            kind = %statement.operation_kind(),
            target = statement.target_table().unwrap_or("-"),
            "Generated statement"
        );

        let decision = check_statement(&request.role, &statement);
        if !decision.allowed {
            let error = ReliefError::PermissionDenied(decision.reason.clone());
            let message = format!("Sorry, your role ({}) lacks permission. {}", role_label, decision.reason);
            return QueryOutcome::failed(request_id, Some(sql), &error, message);
        }

        let references = match self.guards.validate(&self.schema, &sql) {
            Ok(references) => references,
            Err(e) => {
                let message = format!("Sorry, this request cannot be run. {}", e);
                return QueryOutcome::failed(request_id, Some(sql), &e, message);
            }
        };

        let warnings: Vec<String> = audit_foreign_keys(&sql, &references, &self.schema)
            .iter()
            .map(|w| {
                warn!("Generated SQL leaves a foreign key unresolved: {}", w);
                w.to_string()
            })
            .collect();

        let result = match self.dispatcher.dispatch(&statement).await {
            Ok(result) => result,
            Err(e) => {
                let message = format!("The query could not be executed. {}", e);
                let mut outcome = QueryOutcome::failed(request_id, Some(sql), &e, message);
                outcome.warnings = warnings;
                return outcome;
            }
        };

        let report = self
            .reporter
            .synthesize(&request.question, &sql, &result, &request.role, &role_label)
            .await;
        let error = report.is_error_narrative.then(|| report.body.clone());

        info!("Request complete");
        QueryOutcome {
            request_id,
            sql_text: Some(sql),
            result: Some(result),
            report,
            error,
            warnings,
        }
    }
}
