//! Schema Descriptor
//!
//! Static description of the seven program tables. Built once at startup and
//! shared read-only; it is the grounding context for SQL generation and the
//! source of truth for the table allow-list.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Foreign key target: the referenced table and the column that holds its
/// human-readable name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
    pub display_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub sql_type: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub references: Option<ForeignKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub comment: String,
    pub primary_key: String,
    /// Column users know rows by (e.g. `VillageName`).
    #[serde(default)]
    pub name_column: Option<String>,
    pub columns: Vec<ColumnDefinition>,
}

impl TableDefinition {
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    tables: Vec<TableDefinition>,
}

fn col(name: &str, sql_type: &str, comment: Option<&str>) -> ColumnDefinition {
    ColumnDefinition {
        name: name.to_string(),
        sql_type: sql_type.to_string(),
        comment: comment.map(str::to_string),
        references: None,
    }
}

fn fk(name: &str, comment: &str, table: &str, display_column: &str) -> ColumnDefinition {
    ColumnDefinition {
        name: name.to_string(),
        sql_type: "INT NOT NULL".to_string(),
        comment: Some(comment.to_string()),
        references: Some(ForeignKey {
            table: table.to_string(),
            column: name.to_string(),
            display_column: display_column.to_string(),
        }),
    }
}

fn table(
    name: &str,
    comment: &str,
    primary_key: &str,
    name_column: Option<&str>,
    columns: Vec<ColumnDefinition>,
) -> TableDefinition {
    TableDefinition {
        name: name.to_string(),
        comment: comment.to_string(),
        primary_key: primary_key.to_string(),
        name_column: name_column.map(str::to_string),
        columns,
    }
}

impl SchemaDescriptor {
    pub fn new(tables: Vec<TableDefinition>) -> Self {
        Self { tables }
    }

    /// The poverty-alleviation program database.
    pub fn poverty_alleviation() -> Self {
        Self::new(vec![
            table(
                "ProjectCategories",
                "Poverty-alleviation project categories",
                "CategoryID",
                Some("CategoryName"),
                vec![
                    col("CategoryID", "INT AUTO_INCREMENT PRIMARY KEY", None),
                    col(
                        "CategoryName",
                        "VARCHAR(50) NOT NULL UNIQUE",
                        Some("coarse category such as handicraft, fruit, livestock (手工、水果、养殖)"),
                    ),
                    col("Description", "TEXT", None),
                    col("CreatedAt", "TIMESTAMP DEFAULT CURRENT_TIMESTAMP", None),
                ],
            ),
            table(
                "Villages",
                "Villages and towns",
                "VillageID",
                Some("VillageName"),
                vec![
                    col("VillageID", "INT AUTO_INCREMENT PRIMARY KEY", None),
                    col("VillageName", "VARCHAR(100) NOT NULL", None),
                    col(
                        "VillageType",
                        "ENUM('镇', '乡', '村') NOT NULL",
                        Some("administrative level: town, township, village"),
                    ),
                ],
            ),
            table(
                "Enterprises",
                "Enterprises supporting the program",
                "EnterpriseID",
                Some("EnterpriseName"),
                vec![
                    col("EnterpriseID", "INT PRIMARY KEY", Some("enterprise number")),
                    col("EnterpriseName", "VARCHAR(200) NOT NULL", Some("enterprise name")),
                    col("Principal", "VARCHAR(50) NOT NULL", Some("person in charge")),
                    col("ContactPhone", "VARCHAR(20)", Some("contact phone")),
                    col("PurchaseContent", "TEXT", Some("what the enterprise purchases")),
                    col("TotalPurchaseAmount", "DECIMAL(12,2)", Some("total purchase amount")),
                    col(
                        "PurchaseProgress",
                        "DECIMAL(5,2) DEFAULT 0.00",
                        Some("purchase progress (%)"),
                    ),
                ],
            ),
            table(
                "PoorHouseholds",
                "Poor households enrolled in the program",
                "HouseholdID",
                Some("HouseholdName"),
                vec![
                    col("HouseholdID", "INT AUTO_INCREMENT PRIMARY KEY", None),
                    col("HouseholdName", "VARCHAR(50) NOT NULL", Some("head of household")),
                    col("ContactPhone", "VARCHAR(20)", None),
                    fk("VillageID", "village the household belongs to", "Villages", "VillageName"),
                    col("IndustryType", "VARCHAR(50)", Some("industry the household works in")),
                    col("Scale", "VARCHAR(100)", Some("concrete scale or work, e.g. 5 mu of apples, 10 cattle")),
                    col("IncomeStatus", "DECIMAL(10,2)", Some("annual income")),
                ],
            ),
            table(
                "ResponsiblePersons",
                "Project officers",
                "PersonID",
                Some("PersonName"),
                vec![
                    col("PersonID", "INT AUTO_INCREMENT PRIMARY KEY", None),
                    col("PersonName", "VARCHAR(50) NOT NULL", None),
                    col("ContactPhone", "VARCHAR(20)", None),
                    fk("CategoryID", "category the officer is responsible for", "ProjectCategories", "CategoryName"),
                    col("WorkScope", "TEXT", Some("scope of work")),
                ],
            ),
            table(
                "PovertyAlleviationProjects",
                "Poverty-alleviation projects",
                "ProjectID",
                Some("ProjectName"),
                vec![
                    col("ProjectID", "INT AUTO_INCREMENT PRIMARY KEY", None),
                    col("ProjectName", "CHAR(20) NOT NULL", None),
                    fk("CategoryID", "project category", "ProjectCategories", "CategoryName"),
                    col("SupportFunds", "DECIMAL(12,2) NOT NULL DEFAULT 0.00", Some("support funds")),
                    col(
                        "ProjectStatus",
                        "ENUM('筹备中', '进行中', '已完成') NOT NULL",
                        Some("preparing, in progress, completed"),
                    ),
                ],
            ),
            table(
                "Orders",
                "Purchase orders between enterprises and households",
                "OrderID",
                None,
                vec![
                    col("OrderID", "INT AUTO_INCREMENT PRIMARY KEY", None),
                    fk("CategoryID", "product category", "ProjectCategories", "CategoryName"),
                    fk("EnterpriseID", "purchasing enterprise", "Enterprises", "EnterpriseName"),
                    fk("HouseholdID", "supplying household", "PoorHouseholds", "HouseholdName"),
                    col("Quantity", "DECIMAL(10,2) NOT NULL", None),
                    col("UnitPrice", "DECIMAL(10,2) NOT NULL", None),
                    col(
                        "TotalAmount",
                        "DECIMAL(12,2) AS (Quantity * UnitPrice) STORED",
                        Some("generated column, never written directly"),
                    ),
                    col("OrderStatus", "INT DEFAULT 1", Some("1 = active, 0 = cancelled")),
                    col("OrderDate", "DATE NOT NULL", None),
                ],
            ),
        ])
    }

    pub fn tables(&self) -> &[TableDefinition] {
        &self.tables
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Case-insensitive lookup; surrounding backticks are ignored.
    pub fn table(&self, name: &str) -> Option<&TableDefinition> {
        let name = name.trim().trim_matches('`');
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn contains_table(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    /// Every foreign key column as `(owning table, column, target)`.
    pub fn foreign_key_columns(&self) -> Vec<(&str, &str, &ForeignKey)> {
        self.tables
            .iter()
            .flat_map(|t| {
                t.columns.iter().filter_map(move |c| {
                    c.references
                        .as_ref()
                        .map(|fk| (t.name.as_str(), c.name.as_str(), fk))
                })
            })
            .collect()
    }

    /// DDL-like text used as prompt grounding. Output depends only on the
    /// table definitions.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for table in &self.tables {
            let _ = writeln!(out, "-- {}", table.comment);
            let _ = writeln!(out, "CREATE TABLE {} (", table.name);
            let mut lines: Vec<String> = table
                .columns
                .iter()
                .map(|c| {
                    let mut line = format!("    {} {}", c.name, c.sql_type);
                    if let Some(comment) = &c.comment {
                        line.push_str(&format!(" COMMENT '{}'", comment));
                    }
                    line
                })
                .collect();
            for c in &table.columns {
                if let Some(fk) = &c.references {
                    lines.push(format!(
                        "    FOREIGN KEY ({}) REFERENCES {}({})",
                        c.name, fk.table, fk.column
                    ));
                }
            }
            let _ = writeln!(out, "{}", lines.join(",\n"));
            let _ = writeln!(out, ") COMMENT='{}';", table.comment);
            out.push('\n');
        }
        out
    }
}
