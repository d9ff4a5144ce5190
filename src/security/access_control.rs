//! Access Control
//!
//! Statement classification and the role-vs-operation permission check.
//! Everything here is pure: no I/O, no state.

use crate::security::policy::{OperationKind, PolicyTable, RoleId};
use serde::{Deserialize, Serialize};

/// Classify by leading keyword. Matching is case-insensitive; the caller's
/// text is never modified.
pub fn classify(sql: &str) -> OperationKind {
    let upper = sql.trim().to_uppercase();
    if upper.starts_with("SELECT") {
        OperationKind::Select
    } else if upper.starts_with("INSERT INTO") {
        OperationKind::Insert
    } else if upper.starts_with("UPDATE") {
        OperationKind::Update
    } else if upper.starts_with("DELETE FROM") {
        OperationKind::Delete
    } else {
        OperationKind::Other
    }
}

/// Best-effort name of the table a statement targets, uppercased.
///
/// Not consulted for authorization; permissions are per operation kind only.
pub fn extract_target_table(sql: &str) -> Option<String> {
    let normalized = sql.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();

    let candidate = (if let Some((_, rest)) = normalized.split_once(" FROM ") {
        rest.split_whitespace().next()
    } else if normalized.starts_with("UPDATE ") {
        normalized.split_whitespace().nth(1)
    } else if normalized.starts_with("INSERT INTO") {
        normalized
            .split_once(" INTO ")
            .and_then(|(_, rest)| rest.split_whitespace().next())
    } else {
        None
    })?;

    let name = candidate
        .replace(['`', ';'], "")
        .split([',', '('])
        .next()
        .unwrap_or("")
        .trim()
        .to_string();

    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// A generated statement with its classification fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedStatement {
    sql_text: String,
    operation_kind: OperationKind,
    target_table: Option<String>,
}

impl GeneratedStatement {
    pub fn from_sql(sql: impl Into<String>) -> Self {
        let sql_text = sql.into();
        Self {
            operation_kind: classify(&sql_text),
            target_table: extract_target_table(&sql_text),
            sql_text,
        }
    }

    pub fn sql_text(&self) -> &str {
        &self.sql_text
    }

    pub fn operation_kind(&self) -> OperationKind {
        self.operation_kind
    }

    pub fn target_table(&self) -> Option<&str> {
        self.target_table.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDecision {
    pub allowed: bool,
    pub reason: String,
}

impl PermissionDecision {
    fn allow() -> Self {
        Self { allowed: true, reason: "OK".to_string() }
    }

    fn deny(reason: String) -> Self {
        Self { allowed: false, reason }
    }
}

/// Decide whether `role` may run `sql`.
pub fn check_permission(role: &RoleId, sql: &str) -> PermissionDecision {
    decide(role, classify(sql), sql)
}

/// Same as [`check_permission`] for an already classified statement.
pub fn check_statement(role: &RoleId, statement: &GeneratedStatement) -> PermissionDecision {
    decide(role, statement.operation_kind(), statement.sql_text())
}

fn decide(role: &RoleId, kind: OperationKind, sql: &str) -> PermissionDecision {
    if kind == OperationKind::Other {
        let keyword = sql.split_whitespace().next().unwrap_or("").to_uppercase();
        let shown = if keyword.is_empty() { "(empty)".to_string() } else { keyword };
        return PermissionDecision::deny(format!(
            "Permission denied: statements of kind '{}' are not supported (leading keyword {}).",
            kind, shown
        ));
    }

    if PolicyTable::allows(role, kind) {
        return PermissionDecision::allow();
    }

    if kind == OperationKind::Select || PolicyTable::allowed_operations(role).is_empty() {
        PermissionDecision::deny(format!(
            "Permission denied: your role ('{}') has no query rights.",
            role
        ))
    } else {
        PermissionDecision::deny(format!(
            "Permission denied: your role ('{}') may only run queries (SELECT), not modifications ({}).",
            role, kind
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const READERS: [RoleId; 3] = [RoleId::PoorHousehold, RoleId::Enterprise, RoleId::Investigator];

    fn sample(kind: OperationKind) -> &'static str {
        match kind {
            OperationKind::Select => "SELECT * FROM Villages",
            OperationKind::Insert => "INSERT INTO Villages (VillageName, VillageType) VALUES ('大河村', '村')",
            OperationKind::Update => "UPDATE PoorHouseholds SET IncomeStatus=5000",
            OperationKind::Delete => "DELETE FROM Orders WHERE OrderID = 3",
            OperationKind::Other => "SHOW TABLES",
        }
    }

    #[test]
    fn test_classification_ignores_case_and_padding() {
        assert_eq!(classify("select * from X"), OperationKind::Select);
        assert_eq!(classify("  SeLeCt 1"), OperationKind::Select);
        assert_eq!(classify("update X set y=1"), OperationKind::Update);
        assert_eq!(classify("delete from X"), OperationKind::Delete);
        assert_eq!(classify("insert into X values (1)"), OperationKind::Insert);
        assert_eq!(classify("show tables"), OperationKind::Other);
        assert_eq!(classify("DELETE X"), OperationKind::Other);
        assert_eq!(classify("INSERT X VALUES (1)"), OperationKind::Other);
        assert_eq!(classify(""), OperationKind::Other);
    }

    #[test]
    fn test_readers_cannot_mutate() {
        for role in READERS.iter() {
            for kind in [OperationKind::Insert, OperationKind::Update, OperationKind::Delete] {
                let decision = check_permission(role, sample(kind));
                assert!(!decision.allowed, "{} should not run {}", role, kind);
                assert!(decision.reason.contains("may only run queries"));
                assert!(decision.reason.contains(kind.as_str()));
            }
        }
    }

    #[test]
    fn test_every_known_role_may_select() {
        for role in RoleId::KNOWN.iter() {
            let decision = check_permission(role, sample(OperationKind::Select));
            assert!(decision.allowed);
            assert_eq!(decision.reason, "OK");
        }
    }

    #[test]
    fn test_admin_may_do_everything_supported() {
        for kind in [
            OperationKind::Select,
            OperationKind::Insert,
            OperationKind::Update,
            OperationKind::Delete,
        ] {
            assert!(check_permission(&RoleId::Admin, sample(kind)).allowed);
        }
    }

    #[test]
    fn test_unknown_role_is_always_rejected() {
        let role = RoleId::from_id("guest");
        for kind in [
            OperationKind::Select,
            OperationKind::Insert,
            OperationKind::Update,
            OperationKind::Delete,
            OperationKind::Other,
        ] {
            assert!(!check_permission(&role, sample(kind)).allowed);
        }
        for kind in [OperationKind::Select, OperationKind::Update] {
            let decision = check_permission(&role, sample(kind));
            assert!(decision.reason.contains("no query rights"));
            assert!(decision.reason.contains("guest"));
        }
    }

    #[test]
    fn test_other_is_rejected_for_every_role() {
        for role in RoleId::KNOWN.iter() {
            let decision = check_permission(role, "show tables");
            assert!(!decision.allowed);
            assert!(decision.reason.contains("OTHER"));
            assert!(decision.reason.contains("SHOW"));
        }
    }

    #[test]
    fn test_decision_is_repeatable() {
        let sql = "UPDATE Enterprises SET PurchaseProgress = 50";
        for role in RoleId::KNOWN.iter() {
            assert_eq!(check_permission(role, sql), check_permission(role, sql));
        }
    }

    #[test]
    fn test_target_table_extraction() {
        assert_eq!(
            extract_target_table("SELECT ph.HouseholdName FROM `PoorHouseholds` ph JOIN Villages v ON 1=1").as_deref(),
            Some("POORHOUSEHOLDS")
        );
        assert_eq!(
            extract_target_table("select *\nfrom Orders;").as_deref(),
            Some("ORDERS")
        );
        assert_eq!(extract_target_table("SELECT * FROM Villages,Orders").as_deref(), Some("VILLAGES"));
        assert_eq!(
            extract_target_table("UPDATE `Enterprises` SET Principal = 'x'").as_deref(),
            Some("ENTERPRISES")
        );
        assert_eq!(
            extract_target_table("INSERT INTO Villages(VillageName) VALUES ('a')").as_deref(),
            Some("VILLAGES")
        );
        assert_eq!(extract_target_table("SELECT 1"), None);
        assert_eq!(extract_target_table("SHOW TABLES"), None);
    }

    #[test]
    fn test_statement_keeps_original_text() {
        let statement = GeneratedStatement::from_sql("select VillageName from Villages");
        assert_eq!(statement.sql_text(), "select VillageName from Villages");
        assert_eq!(statement.operation_kind(), OperationKind::Select);
        assert_eq!(statement.target_table(), Some("VILLAGES"));
        assert_eq!(
            check_statement(&RoleId::Enterprise, &statement),
            check_permission(&RoleId::Enterprise, statement.sql_text())
        );
    }
}
