//! SQL Generator
//!
//! First model call: question + schema → one MySQL statement. The prompt
//! carries the naming, join and fuzzy-search conventions; the output is
//! cleaned of markdown and audited for bare foreign-key ids.

use crate::error::{ReliefError, Result};
use crate::llm::{complete_with_timeout, ChatMessage, LanguageModel};
use crate::schema::SchemaDescriptor;
use crate::security::TableReferences;
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

lazy_static! {
    static ref OPENING_FENCE: Regex = Regex::new(r"(?i)^```[ \t]*(?:sql|mysql)?[ \t]*\r?\n?").unwrap();
    static ref LANGUAGE_TAG_LINE: Regex = Regex::new(r"(?i)^(?:sql|mysql)[ \t]*\r?\n").unwrap();
}

/// A foreign-key id column used without joining the table that names it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ForeignKeyWarning {
    pub column: String,
    pub referenced_table: String,
    pub display_column: String,
}

impl std::fmt::Display for ForeignKeyWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} is used without joining {} (expected {} in the projection)",
            self.column, self.referenced_table, self.display_column
        )
    }
}

pub struct SqlGenerator {
    model: Arc<dyn LanguageModel>,
    schema: Arc<SchemaDescriptor>,
    timeout: Duration,
}

impl SqlGenerator {
    pub fn new(model: Arc<dyn LanguageModel>, schema: Arc<SchemaDescriptor>, timeout: Duration) -> Self {
        Self { model, schema, timeout }
    }

    /// Build the system prompt. Depends only on the schema.
    pub fn system_prompt(&self) -> String {
        let tables = self.schema.table_names().iter().join(", ");
        let foreign_keys = self
            .schema
            .foreign_key_columns()
            .iter()
            .map(|(owner, column, fk)| {
                format!("{}.{} -> {}.{}", owner, column, fk.table, fk.display_column)
            })
            .unique()
            .join("; ");

        format!(
            r#"You are a professional SQL translator. Turn the user's question into ONE SQL statement that runs on MySQL.

## Database structure (SQL DDL)
{schema}
## Core rules (mandatory)
1. Always resolve names (critical): when the query involves a foreign key id (such as EnterpriseID, CategoryID, VillageID), you MUST JOIN the referenced table and SELECT its name column (such as EnterpriseName, CategoryName, VillageName). Never return only the id.
   Foreign keys and the names they resolve to: {foreign_keys}.
2. Table names: only these tables may be used: {tables}.
3. Output format: return the bare SQL statement only. No markdown fences, no explanation, exactly one statement.
4. Fine-grained search strategy (fuzzy search):
   Users often ask about concrete products or work (e.g. '苹果' apples, '核桃' walnuts, '养牛' raising cattle), while ProjectCategories only stores coarse categories (e.g. planting, livestock).
   When the user asks about a concrete thing, you MUST use LIKE '%keyword%' on these detail columns instead of matching CategoryName exactly:
   - Work of poor households: search BOTH PoorHouseholds.IndustryType and PoorHouseholds.Scale.
     * Example: "households growing apples" -> WHERE (ph.IndustryType LIKE '%苹果%' OR ph.Scale LIKE '%苹果%')
   - Duties of project officers: search ResponsiblePersons.WorkScope.
     * Example: "who manages the orchards" -> WHERE rp.WorkScope LIKE '%果园%'
   - Enterprise purchase details: search Enterprises.PurchaseContent.
"#,
            schema = self.schema.render(),
            foreign_keys = foreign_keys,
            tables = tables,
        )
    }

    /// Generate a single SQL statement for `question`.
    pub async fn generate(&self, question: &str) -> Result<String> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ReliefError::EmptyQuestion);
        }

        let messages = vec![
            ChatMessage::system(self.system_prompt()),
            ChatMessage::user(question),
        ];

        info!(model = self.model.name(), "Generating SQL");
        let raw = complete_with_timeout(self.model.as_ref(), &messages, self.timeout)
            .await
            .map_err(|e| ReliefError::Generation(e.to_string()))?;
        debug!(raw = %raw, "Model output");

        let sql = strip_code_fences(&raw);
        if sql.is_empty() {
            return Err(ReliefError::Generation("model returned no SQL".to_string()));
        }
        Ok(sql)
    }
}

/// Remove markdown code fences and a leading language tag. Anything after
/// the closing fence is dropped.
pub fn strip_code_fences(raw: &str) -> String {
    let mut text = raw.trim();

    if text.starts_with("```") {
        text = OPENING_FENCE.find(text).map(|m| &text[m.end()..]).unwrap_or(text);
        if let Some(end) = text.find("```") {
            text = &text[..end];
        }
        text = text.trim();
    }

    if let Some(m) = LANGUAGE_TAG_LINE.find(text) {
        text = &text[m.end()..];
    }

    text.trim().to_string()
}

/// Flag known foreign-key id columns mentioned in `sql` whose referenced
/// table is missing from `references`.
pub fn audit_foreign_keys(
    sql: &str,
    references: &TableReferences,
    schema: &SchemaDescriptor,
) -> Vec<ForeignKeyWarning> {
    let identifiers = identifiers(sql);
    let touches = |name: &str| references.tables.iter().any(|t| t.eq_ignore_ascii_case(name));

    schema
        .foreign_key_columns()
        .into_iter()
        .filter(|(_, column, fk)| {
            identifiers.contains(&column.to_ascii_lowercase()) && !touches(&fk.table)
        })
        .map(|(_, column, fk)| ForeignKeyWarning {
            column: column.to_string(),
            referenced_table: fk.table.clone(),
            display_column: fk.display_column.clone(),
        })
        .unique()
        .collect()
}

/// Lowercased identifier-like words of `sql`.
fn identifiers(sql: &str) -> HashSet<String> {
    sql.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::TokenStream;
    use async_trait::async_trait;
    use futures::stream::{self, StreamExt};
    use std::sync::Mutex;

    struct CannedModel {
        reply: std::result::Result<Vec<&'static str>, &'static str>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl CannedModel {
        fn replying(fragments: Vec<&'static str>) -> Self {
            Self { reply: Ok(fragments), seen: Mutex::new(Vec::new()) }
        }

        fn failing(message: &'static str) -> Self {
            Self { reply: Err(message), seen: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl LanguageModel for CannedModel {
        fn name(&self) -> &str {
            "canned"
        }

        async fn stream(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
            self.seen.lock().unwrap().push(messages.to_vec());
            match &self.reply {
                Ok(fragments) => {
                    let items: Vec<Result<String>> = fragments.iter().map(|f| Ok(f.to_string())).collect();
                    Ok(stream::iter(items).boxed())
                }
                Err(message) => Err(ReliefError::Llm(message.to_string())),
            }
        }
    }

    fn generator(model: Arc<CannedModel>) -> SqlGenerator {
        SqlGenerator::new(
            model,
            Arc::new(SchemaDescriptor::poverty_alleviation()),
            Duration::from_secs(1),
        )
    }

    fn audit(schema: &SchemaDescriptor, sql: &str) -> Vec<ForeignKeyWarning> {
        audit_foreign_keys(sql, &crate::security::referenced_tables(sql), schema)
    }

    #[test]
    fn test_strip_code_fences_drops_trailing_prose() {
        assert_eq!(
            strip_code_fences("```sql\nSELECT VillageName FROM Villages\n```\nThis lists every village."),
            "SELECT VillageName FROM Villages"
        );
        assert_eq!(strip_code_fences("```sql\nSELECT 1"), "SELECT 1");
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```sql\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_code_fences("```SQL\nSELECT 1;\n```\n"), "SELECT 1;");
        assert_eq!(strip_code_fences("```\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_code_fences("```sql SELECT 1```"), "SELECT 1");
        assert_eq!(strip_code_fences("sql\nSELECT 1"), "SELECT 1");
        assert_eq!(strip_code_fences("  SELECT VillageName FROM Villages  "), "SELECT VillageName FROM Villages");
        assert_eq!(strip_code_fences("```sql\n```"), "");
    }

    #[test]
    fn test_fk_audit_flags_missing_join() {
        let schema = SchemaDescriptor::poverty_alleviation();
        let warnings = audit(&schema, "SELECT HouseholdName, VillageID FROM PoorHouseholds");
        assert_eq!(
            warnings,
            vec![ForeignKeyWarning {
                column: "VillageID".to_string(),
                referenced_table: "Villages".to_string(),
                display_column: "VillageName".to_string(),
            }]
        );
    }

    #[test]
    fn test_fk_audit_accepts_joined_statement() {
        let schema = SchemaDescriptor::poverty_alleviation();
        let warnings = audit(
            &schema,
            "SELECT ph.HouseholdName, v.VillageName FROM PoorHouseholds ph \
             JOIN Villages v ON ph.VillageID = v.VillageID",
        );
        assert!(warnings.is_empty());
        assert!(audit(&schema, "SELECT VillageName FROM Villages").is_empty());
        assert!(audit(&schema, "SELECT OldVillageID FROM PoorHouseholds").is_empty());
    }

    #[test]
    fn test_fk_audit_reports_shared_columns_once() {
        let schema = SchemaDescriptor::poverty_alleviation();
        let warnings = audit(&schema, "SELECT ProjectName, CategoryID FROM PovertyAlleviationProjects");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].referenced_table, "ProjectCategories");
    }

    #[test]
    fn test_prompt_carries_policy() {
        let gen = generator(Arc::new(CannedModel::replying(vec![])));
        let prompt = gen.system_prompt();
        assert!(prompt.contains("CREATE TABLE Orders ("));
        assert!(prompt.contains(
            "ProjectCategories, Villages, Enterprises, PoorHouseholds, ResponsiblePersons, PovertyAlleviationProjects, Orders"
        ));
        assert!(prompt.contains("PoorHouseholds.VillageID -> Villages.VillageName"));
        assert!(prompt.contains("LIKE '%keyword%'"));
        assert!(prompt.contains("ResponsiblePersons.WorkScope"));
        assert!(prompt.contains("Enterprises.PurchaseContent"));
        assert_eq!(prompt, gen.system_prompt());
    }

    #[tokio::test]
    async fn test_generate_cleans_streamed_output() {
        let model = Arc::new(CannedModel::replying(vec!["```sql\nSELECT Village", "Name FROM Villages\n```"]));
        let gen = generator(model.clone());

        let sql = gen.generate("  list all villages ").await.unwrap();
        assert_eq!(sql, "SELECT VillageName FROM Villages");

        let seen = model.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0][0].role, crate::llm::ChatRole::System);
        assert_eq!(seen[0][1], ChatMessage::user("list all villages"));
    }

    #[tokio::test]
    async fn test_model_failure_is_a_generation_error() {
        let gen = generator(Arc::new(CannedModel::failing("connection refused")));
        let err = gen.generate("how many orders").await.unwrap_err();
        assert!(matches!(err, ReliefError::Generation(ref m) if m.contains("connection refused")));
    }

    #[tokio::test]
    async fn test_empty_output_is_a_generation_error() {
        let gen = generator(Arc::new(CannedModel::replying(vec!["```", "```"])));
        assert!(matches!(gen.generate("anything").await, Err(ReliefError::Generation(_))));
    }

    #[tokio::test]
    async fn test_empty_question_skips_the_model() {
        let model = Arc::new(CannedModel::replying(vec!["SELECT 1"]));
        let gen = generator(model.clone());
        assert!(matches!(gen.generate("   ").await, Err(ReliefError::EmptyQuestion)));
        assert!(model.seen.lock().unwrap().is_empty());
    }
}
