//! Security Policy Definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse statement category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationKind {
    Select,
    Insert,
    Update,
    Delete,
    Other,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Select => "SELECT",
            OperationKind::Insert => "INSERT",
            OperationKind::Update => "UPDATE",
            OperationKind::Delete => "DELETE",
            OperationKind::Other => "OTHER",
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self,
            OperationKind::Insert | OperationKind::Update | OperationKind::Delete
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller identity for access control. Serialized as its wire id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RoleId {
    PoorHousehold,
    Enterprise,
    Investigator,
    Admin,
    /// Anything else; kept verbatim for messages.
    Unknown(String),
}

impl RoleId {
    pub const KNOWN: [RoleId; 4] = [
        RoleId::PoorHousehold,
        RoleId::Enterprise,
        RoleId::Investigator,
        RoleId::Admin,
    ];

    pub fn from_id(id: &str) -> Self {
        match id.trim().to_lowercase().as_str() {
            "poor_household" => RoleId::PoorHousehold,
            "enterprise" => RoleId::Enterprise,
            "investigator" => RoleId::Investigator,
            "admin" => RoleId::Admin,
            _ => RoleId::Unknown(id.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RoleId::PoorHousehold => "poor_household",
            RoleId::Enterprise => "enterprise",
            RoleId::Investigator => "investigator",
            RoleId::Admin => "admin",
            RoleId::Unknown(id) => id,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            RoleId::PoorHousehold => "Poor Household",
            RoleId::Enterprise => "Enterprise",
            RoleId::Investigator => "Investigator",
            RoleId::Admin => "Administrator",
            RoleId::Unknown(_) => "Unknown Role",
        }
    }
}

impl From<String> for RoleId {
    fn from(id: String) -> Self {
        RoleId::from_id(&id)
    }
}

impl From<RoleId> for String {
    fn from(role: RoleId) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const READ_ONLY: &[OperationKind] = &[OperationKind::Select];
const FULL_ACCESS: &[OperationKind] = &[
    OperationKind::Select,
    OperationKind::Insert,
    OperationKind::Update,
    OperationKind::Delete,
];

/// Role → allowed operation kinds. Applies to every table alike.
pub struct PolicyTable;

impl PolicyTable {
    pub fn allowed_operations(role: &RoleId) -> &'static [OperationKind] {
        match role {
            RoleId::PoorHousehold | RoleId::Enterprise | RoleId::Investigator => READ_ONLY,
            RoleId::Admin => FULL_ACCESS,
            RoleId::Unknown(_) => &[],
        }
    }

    pub fn allows(role: &RoleId, kind: OperationKind) -> bool {
        Self::allowed_operations(role).contains(&kind)
    }
}
