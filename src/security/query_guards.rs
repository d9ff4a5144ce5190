//! Query Guards
//!
//! Structural checks run after the permission gate and before dispatch: one
//! statement per call, and (optionally) only tables the schema knows about.

use crate::error::{ReliefError, Result};
use crate::schema::SchemaDescriptor;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use sqlparser::ast::visit_relations;
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use std::ops::ControlFlow;
use tracing::warn;

lazy_static! {
    static ref RELATION_PATTERN: Regex =
        Regex::new(r"(?i)\b(?:FROM|JOIN|INTO|UPDATE)\s+`?([A-Za-z_][A-Za-z0-9_]*)`?").unwrap();
    static ref FROM_LIST_PATTERN: Regex = Regex::new(
        r"(?i)\bFROM\s+([^;()]*?)(?:\b(?:WHERE|GROUP|ORDER|LIMIT|HAVING|UNION|JOIN|LEFT|RIGHT|INNER|CROSS|NATURAL|STRAIGHT_JOIN|LOCK|FOR|SET)\b|[;()]|$)"
    )
    .unwrap();
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Relations a statement reads or writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableReferences {
    pub statement_count: usize,
    pub tables: Vec<String>,
    /// False when the SQL parser rejected the text and the keyword heuristic
    /// was used instead.
    pub parsed: bool,
}

/// Collect relation names using the MySQL dialect parser, falling back to a
/// keyword heuristic if the text does not parse.
pub fn referenced_tables(sql: &str) -> TableReferences {
    match Parser::parse_sql(&MySqlDialect {}, sql) {
        Ok(statements) => {
            let mut tables = Vec::new();
            for statement in &statements {
                let _ = visit_relations(statement, |relation| {
                    if let Some(ident) = relation.0.last() {
                        push_unique(&mut tables, &ident.value);
                    }
                    ControlFlow::<()>::Continue(())
                });
            }
            TableReferences {
                statement_count: statements.len(),
                tables,
                parsed: true,
            }
        }
        Err(e) => {
            warn!("SQL parsing failed: {}, using heuristic fallback", e);
            referenced_tables_heuristic(sql)
        }
    }
}

fn referenced_tables_heuristic(sql: &str) -> TableReferences {
    let text = blank_string_literals(sql);
    let mut tables = Vec::new();
    for captures in RELATION_PATTERN.captures_iter(&text) {
        push_unique(&mut tables, &captures[1]);
    }
    // Comma joins: `FROM a x, b y`
    for captures in FROM_LIST_PATTERN.captures_iter(&text) {
        for item in captures[1].split(',') {
            let name = item
                .split_whitespace()
                .next()
                .unwrap_or("")
                .rsplit('.')
                .next()
                .unwrap_or("")
                .trim_matches('`');
            if IDENTIFIER.is_match(name) {
                push_unique(&mut tables, name);
            }
        }
    }
    TableReferences {
        statement_count: count_statements(sql),
        tables,
        parsed: false,
    }
}

fn push_unique(tables: &mut Vec<String>, name: &str) {
    if !tables.iter().any(|t| t.eq_ignore_ascii_case(name)) {
        tables.push(name.to_string());
    }
}

/// Replace the contents of `'...'` and `"..."` literals with spaces so
/// keyword scans only see SQL text. Backtick identifiers are kept.
fn blank_string_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut quote: Option<char> = None;
    for ch in sql.chars() {
        match quote {
            Some(q) if ch == q => {
                quote = None;
                out.push(ch);
            }
            Some(_) => out.push(' '),
            None => {
                if ch == '\'' || ch == '"' {
                    quote = Some(ch);
                }
                out.push(ch);
            }
        }
    }
    out
}

/// Count `;`-separated statements, ignoring separators inside quotes.
fn count_statements(sql: &str) -> usize {
    let mut count = 0;
    let mut current_has_text = false;
    let mut quote: Option<char> = None;

    for ch in sql.chars() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None => match ch {
                '\'' | '"' | '`' => {
                    quote = Some(ch);
                    current_has_text = true;
                }
                ';' => {
                    if current_has_text {
                        count += 1;
                    }
                    current_has_text = false;
                }
                c if !c.is_whitespace() => current_has_text = true,
                _ => {}
            },
        }
    }
    if current_has_text {
        count += 1;
    }
    count
}

/// Query guards configuration
#[derive(Debug, Clone)]
pub struct QueryGuards {
    pub enforce_table_allowlist: bool,
}

impl Default for QueryGuards {
    fn default() -> Self {
        Self {
            enforce_table_allowlist: true,
        }
    }
}

impl QueryGuards {
    pub fn new(enforce_table_allowlist: bool) -> Self {
        Self { enforce_table_allowlist }
    }

    /// Validate a statement that already passed the permission gate.
    pub fn validate(&self, schema: &SchemaDescriptor, sql: &str) -> Result<TableReferences> {
        let references = referenced_tables(sql);

        if references.statement_count > 1 {
            return Err(ReliefError::MultipleStatements(references.statement_count));
        }

        if self.enforce_table_allowlist {
            // The keyword heuristic cannot see every relation, so it never
            // approves a statement on its own.
            if !references.parsed {
                return Err(ReliefError::UnverifiableStatement(format!(
                    "the SQL parser rejected the statement (tables seen: {})",
                    if references.tables.is_empty() {
                        "none".to_string()
                    } else {
                        references.tables.join(", ")
                    }
                )));
            }
            let unknown: Vec<&str> = references
                .tables
                .iter()
                .filter(|t| !schema.contains_table(t))
                .map(String::as_str)
                .collect();
            if !unknown.is_empty() {
                return Err(ReliefError::UnknownTable(unknown.join(", ")));
            }
        }

        Ok(references)
    }
}
