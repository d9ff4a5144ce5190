//! Report Synthesizer
//!
//! Writes get a fixed sentence built from the affected-row count. Reads are
//! serialized to JSON and narrated by the second model call, in the voice of
//! the caller's role.

use crate::error::{ReliefError, Result};
use crate::execution::{ExecutionResult, RowSet};
use crate::llm::{complete_with_timeout, ChatMessage, LanguageModel};
use crate::security::{OperationKind, RoleId};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Narrative handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub body: String,
    pub is_error_narrative: bool,
}

impl Report {
    pub fn narrative(body: impl Into<String>) -> Self {
        Self { body: body.into(), is_error_narrative: false }
    }

    pub fn error(body: impl Into<String>) -> Self {
        Self { body: body.into(), is_error_narrative: true }
    }
}

/// Fixed framing for one kind of reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersonaProfile {
    pub identity: &'static str,
    pub audience: &'static str,
    pub focus: &'static str,
    pub tone: &'static str,
    /// Said when the read returned nothing and the model could not help.
    pub empty_result_fallback: &'static str,
}

const HOUSEHOLD_ASSISTANT: PersonaProfile = PersonaProfile {
    identity: "a caring poverty-alleviation assistant",
    audience: "a registered poor household (a farming family)",
    focus: "how much income they have, whether payments have arrived, how well their own products are selling, and any new subsidy policies",
    tone: "warm, plain-spoken and encouraging; turn numbers into concrete benefits the family can understand",
    empty_result_fallback: "There are no new records for your household yet. Please keep an eye on updates and contact your village officer if you expected something here.",
};

const BUSINESS_CONSULTANT: PersonaProfile = PersonaProfile {
    identity: "a professional business consultant",
    audience: "the manager of a partner enterprise",
    focus: "purchase volume, supply chain stability, agricultural output, return on investment and regional distribution",
    tone: "professional, concise and objective",
    empty_result_fallback: "No purchase records currently match these conditions. Consider widening the search or checking the time period.",
};

const DATA_AUDITOR: PersonaProfile = PersonaProfile {
    identity: "a rigorous data auditor",
    audience: "a field investigator of the poverty-alleviation program",
    focus: "data accuracy, outliers, irregularities and whether funds were actually delivered",
    tone: "objective, serious and attentive to detail",
    empty_result_fallback: "No records match these conditions. Verify the filter values on site before concluding that the data is missing.",
};

const SYSTEM_ANALYST: PersonaProfile = PersonaProfile {
    identity: "a system-wide analyst",
    audience: "the system administrator",
    focus: "overall system operation, total data volume and macro trends",
    tone: "big-picture and well summarized",
    empty_result_fallback: "The query ran successfully but no records match it. The corresponding tables may not have been populated yet for these conditions.",
};

const DATA_ANALYST: PersonaProfile = PersonaProfile {
    identity: "a data analyst",
    audience: "a user of the program data",
    focus: "what the data says about the question",
    tone: "calm and objective",
    empty_result_fallback: "The query returned no matching records.",
};

impl PersonaProfile {
    pub fn for_role(role: &RoleId) -> &'static PersonaProfile {
        match role {
            RoleId::PoorHousehold => &HOUSEHOLD_ASSISTANT,
            RoleId::Enterprise => &BUSINESS_CONSULTANT,
            RoleId::Investigator => &DATA_AUDITOR,
            RoleId::Admin => &SYSTEM_ANALYST,
            RoleId::Unknown(_) => &DATA_ANALYST,
        }
    }

    fn directive(&self) -> String {
        format!(
            "- Your identity: {}.\n- Your reader: {}.\n- Focus on: {}.\n- Tone: {}.",
            self.identity, self.audience, self.focus, self.tone
        )
    }
}

/// Deterministic sentence for a completed write.
pub fn write_report(kind: OperationKind, rows_affected: u64) -> Report {
    if rows_affected > 0 {
        Report::narrative(format!(
            "You ran a data modification ({}). It completed successfully and affected {} record(s).",
            kind, rows_affected
        ))
    } else {
        Report::narrative(format!(
            "You ran a data modification ({}). It completed, but no rows matched the statement's conditions, so nothing was changed.",
            kind
        ))
    }
}

/// Pretty JSON with dates and decimals already rendered as strings.
pub fn serialize_rows(rows: &RowSet) -> Result<String> {
    Ok(serde_json::to_string_pretty(rows)?)
}

pub struct ReportSynthesizer {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl ReportSynthesizer {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    /// Produce the report for one executed statement. Never returns an
    /// empty body.
    pub async fn synthesize(
        &self,
        question: &str,
        sql_text: &str,
        result: &ExecutionResult,
        role: &RoleId,
        role_display: &str,
    ) -> Report {
        let rows = match result {
            ExecutionResult::Affected { kind, rows_affected } => {
                return write_report(*kind, *rows_affected);
            }
            ExecutionResult::Rows { rows } => rows,
        };

        let persona = PersonaProfile::for_role(role);
        match self.narrate(question, sql_text, rows, persona, role_display).await {
            Ok(body) if !body.trim().is_empty() => Report::narrative(body.trim()),
            Ok(_) => {
                warn!("Report model returned no text, using fallback");
                Report::narrative(fallback_body(rows, persona))
            }
            Err(e) => {
                warn!("Report generation failed: {}", e);
                if rows.is_empty() {
                    Report::narrative(persona.empty_result_fallback)
                } else {
                    Report::error(ReliefError::Report(e.to_string()).to_string())
                }
            }
        }
    }

    async fn narrate(
        &self,
        question: &str,
        sql_text: &str,
        rows: &RowSet,
        persona: &PersonaProfile,
        role_display: &str,
    ) -> Result<String> {
        let result_json = serialize_rows(rows)?;
        let prompt = report_prompt(question, sql_text, &result_json, persona, role_display);
        debug!(prompt = %prompt, "Report prompt");

        let messages = vec![
            ChatMessage::system(prompt),
            ChatMessage::user("Please write this tailored analysis report."),
        ];
        info!(rows = rows.len(), "Synthesizing report");
        complete_with_timeout(self.model.as_ref(), &messages, self.timeout).await
    }
}

fn fallback_body(rows: &RowSet, persona: &PersonaProfile) -> String {
    if rows.is_empty() {
        persona.empty_result_fallback.to_string()
    } else {
        format!("The query returned {} record(s).", rows.len())
    }
}

fn report_prompt(
    question: &str,
    sql_text: &str,
    result_json: &str,
    persona: &PersonaProfile,
    role_display: &str,
) -> String {
    format!(
        r#"You are an assistant that writes reports from database query results. Write an analysis report tailored to the user's role.

## User
Current role: {role_display}

## Role guidance
{directive}

## Original request
{question}

## Executed SQL
{sql_text}

## Database result (JSON)
{result_json}

## Report requirements (mandatory)
1. Never repeat identifiers: do not write machine text such as "EnterpriseID=1". Use the names present in the result instead. If the result only has ids, describe them from context.
2. Analyze, do not just list: interpret the data against the focus above.
3. If the result is empty (the JSON is []), you MUST explain the missing data in this role's voice and with its focus, for example: "{fallback}"
4. Length: about 200 words.
5. Reply in the same language as the original request.
"#,
        role_display = role_display,
        directive = persona.directive(),
        question = question,
        sql_text = sql_text,
        result_json = result_json,
        fallback = persona.empty_result_fallback,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::Row;
    use crate::llm::TokenStream;
    use async_trait::async_trait;
    use futures::stream::{self, StreamExt};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedModel {
        reply: Option<&'static str>,
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(reply: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self { reply, calls: AtomicUsize::new(0), prompts: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn stream(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(messages[0].content.clone());
            match self.reply {
                Some(text) => Ok(stream::iter(vec![Ok(text.to_string())]).boxed()),
                None => Err(ReliefError::Llm("service unavailable".to_string())),
            }
        }
    }

    fn synthesizer(model: Arc<ScriptedModel>) -> ReportSynthesizer {
        ReportSynthesizer::new(model, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_write_branch_reports_count_without_model() {
        let model = ScriptedModel::new(Some("unused"));
        let report = synthesizer(model.clone())
            .synthesize(
                "mark orders shipped",
                "UPDATE Orders SET OrderStatus = 1",
                &ExecutionResult::Affected { kind: OperationKind::Update, rows_affected: 3 },
                &RoleId::Admin,
                "Administrator",
            )
            .await;

        assert!(report.body.contains("affected 3 record(s)"));
        assert!(report.body.contains("UPDATE"));
        assert!(!report.is_error_narrative);
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_zero_rows_has_distinct_message() {
        let none = write_report(OperationKind::Delete, 0);
        let some = write_report(OperationKind::Delete, 1);
        assert!(none.body.contains("no rows matched"));
        assert_ne!(none.body, some.body);
    }

    #[test]
    fn test_persona_per_role() {
        assert_eq!(PersonaProfile::for_role(&RoleId::PoorHousehold).identity, HOUSEHOLD_ASSISTANT.identity);
        assert_eq!(PersonaProfile::for_role(&RoleId::Enterprise), &BUSINESS_CONSULTANT);
        assert_eq!(PersonaProfile::for_role(&RoleId::Investigator), &DATA_AUDITOR);
        assert_eq!(PersonaProfile::for_role(&RoleId::Admin), &SYSTEM_ANALYST);
        assert_eq!(PersonaProfile::for_role(&RoleId::from_id("visitor")), &DATA_ANALYST);
    }

    #[tokio::test]
    async fn test_read_branch_prompt_carries_context() {
        let model = ScriptedModel::new(Some("  Two villages are covered.  "));
        let rows = vec![
            Row::new().with("VillageName", "大河村"),
            Row::new().with("VillageName", "小河村"),
        ];
        let report = synthesizer(model.clone())
            .synthesize(
                "which villages are covered",
                "SELECT VillageName FROM Villages",
                &ExecutionResult::Rows { rows },
                &RoleId::Investigator,
                "Investigator",
            )
            .await;

        assert_eq!(report, Report::narrative("Two villages are covered."));
        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Current role: Investigator"));
        assert!(prompts[0].contains(DATA_AUDITOR.identity));
        assert!(prompts[0].contains("which villages are covered"));
        assert!(prompts[0].contains("\"VillageName\": \"大河村\""));
    }

    #[tokio::test]
    async fn test_empty_rows_survive_model_failure() {
        let model = ScriptedModel::new(None);
        let report = synthesizer(model.clone())
            .synthesize(
                "my income this month",
                "SELECT IncomeStatus FROM PoorHouseholds WHERE HouseholdID = 9",
                &ExecutionResult::Rows { rows: vec![] },
                &RoleId::PoorHousehold,
                "Poor Household",
            )
            .await;

        assert_eq!(report.body, HOUSEHOLD_ASSISTANT.empty_result_fallback);
        assert!(!report.is_error_narrative);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_model_failure_with_rows_is_error_narrative() {
        let model = ScriptedModel::new(None);
        let report = synthesizer(model)
            .synthesize(
                "list enterprises",
                "SELECT EnterpriseName FROM Enterprises",
                &ExecutionResult::Rows { rows: vec![Row::new().with("EnterpriseName", "绿源公司")] },
                &RoleId::Enterprise,
                "Enterprise",
            )
            .await;

        assert!(report.is_error_narrative);
        assert!(report.body.starts_with("Report generation failed:"));
        assert!(report.body.contains("service unavailable"));
    }

    #[tokio::test]
    async fn test_blank_model_output_falls_back() {
        let model = ScriptedModel::new(Some("   "));
        let report = synthesizer(model)
            .synthesize(
                "orders",
                "SELECT OrderID FROM Orders",
                &ExecutionResult::Rows { rows: vec![] },
                &RoleId::from_id("guest"),
                "Guest",
            )
            .await;
        assert_eq!(report.body, DATA_ANALYST.empty_result_fallback);
    }
}
