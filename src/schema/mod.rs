// Schema model: tables, columns, indexes, and the mutable schema container.
//
// `DatabaseSchema` is the registration surface (catalog-style, guarded by a
// `parking_lot::RwLock`); `SchemaRegistry` (see `registry`) snapshots it into
// immutable ID-based lookup tables used by the binder and planners.

pub mod registry;

pub use registry::{suggest_from_candidates, ColumnResolution, SchemaRegistry};

use crate::error::PlannerError;
use crate::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Unique identifier for tables. Id 0 is reserved/invalid; real tables start
/// at 1, CTE-backed virtual tables at [`CTE_TABLE_ID_BASE`].
pub type TableId = usize;

/// Unique identifier for columns within a table (1-based for schema tables,
/// 0-based positional for CTE virtual tables).
pub type ColumnId = usize;

/// First table id handed out to CTE-backed virtual tables. Keeps the CTE
/// namespace disjoint from schema table ids.
pub const CTE_TABLE_ID_BASE: TableId = 10_000;

/// Supported column types (PostgreSQL subset)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Integer,
    BigInt,
    Varchar,
    Text,
    Boolean,
    Timestamp,
    Date,
    Decimal,
    Json,
    Uuid,
}

impl ColumnType {
    pub fn is_numeric(self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::BigInt | ColumnType::Decimal)
    }

    pub fn is_string(self) -> bool {
        matches!(self, ColumnType::Varchar | ColumnType::Text)
    }

    pub fn is_date(self) -> bool {
        matches!(self, ColumnType::Date | ColumnType::Timestamp)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Varchar => "VARCHAR",
            ColumnType::Text => "TEXT",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Date => "DATE",
            ColumnType::Decimal => "DECIMAL",
            ColumnType::Json => "JSON",
            ColumnType::Uuid => "UUID",
        }
    }

    pub fn parse(type_str: &str) -> Option<ColumnType> {
        match type_str.to_ascii_uppercase().as_str() {
            "INTEGER" | "INT" => Some(ColumnType::Integer),
            "BIGINT" => Some(ColumnType::BigInt),
            "VARCHAR" => Some(ColumnType::Varchar),
            "TEXT" => Some(ColumnType::Text),
            "BOOLEAN" | "BOOL" => Some(ColumnType::Boolean),
            "TIMESTAMP" => Some(ColumnType::Timestamp),
            "DATE" => Some(ColumnType::Date),
            "DECIMAL" | "NUMERIC" => Some(ColumnType::Decimal),
            "JSON" => Some(ColumnType::Json),
            "UUID" => Some(ColumnType::Uuid),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub column_type: ColumnType,
    pub max_length: Option<usize>,
    pub nullable: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub default_value: Option<String>,
    pub references_table: Option<String>,
    pub references_column: Option<String>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            max_length: None,
            nullable: true,
            primary_key: false,
            unique: false,
            default_value: None,
            references_table: None,
            references_column: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn max_length(mut self, len: usize) -> Self {
        self.max_length = Some(len);
        self
    }

    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.references_table = Some(table.into());
        self.references_column = Some(column.into());
        self
    }
}

/// Index definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub access_method: String,
}

impl IndexDefinition {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            unique: false,
            access_method: "BTREE".to_string(),
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Table definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    pub indexes: Vec<IndexDefinition>,
    pub comment: Option<String>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDefinition>) -> Self {
        Self {
            name: name.into(),
            columns,
            indexes: Vec::new(),
            comment: None,
        }
    }

    pub fn with_index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// Mutable schema container. Tables keep registration order so the registry
/// hands out stable, dense table ids.
#[derive(Clone)]
pub struct DatabaseSchema {
    name: String,
    tables: Arc<RwLock<Vec<TableDefinition>>>,
}

impl DatabaseSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a table. Index columns must exist in the table.
    pub fn add_table(&self, table: TableDefinition) -> Result<()> {
        let mut tables = self.tables.write();

        if tables.iter().any(|t| t.name == table.name) {
            return Err(PlannerError::Schema(format!(
                "Table {} already exists",
                table.name
            )));
        }

        for index in &table.indexes {
            for column in &index.columns {
                if table.column(column).is_none() {
                    return Err(PlannerError::Schema(format!(
                        "Index {} references unknown column {} on table {}",
                        index.name, column, table.name
                    )));
                }
            }
        }

        tables.push(table);
        Ok(())
    }

    pub fn add_index(&self, table_name: &str, index: IndexDefinition) -> Result<()> {
        let mut tables = self.tables.write();
        let table = tables
            .iter_mut()
            .find(|t| t.name == table_name)
            .ok_or_else(|| PlannerError::Schema(format!("Table {} not found", table_name)))?;

        for column in &index.columns {
            if !table.columns.iter().any(|c| &c.name == column) {
                return Err(PlannerError::Schema(format!(
                    "Index {} references unknown column {} on table {}",
                    index.name, column, table_name
                )));
            }
        }

        table.indexes.push(index);
        Ok(())
    }

    pub fn add_foreign_key(
        &self,
        table_name: &str,
        column_name: &str,
        ref_table: &str,
        ref_column: &str,
    ) -> Result<()> {
        let mut tables = self.tables.write();

        let referenced_ok = tables
            .iter()
            .find(|t| t.name == ref_table)
            .map(|t| t.column(ref_column).is_some())
            .unwrap_or(false);
        if !referenced_ok {
            return Err(PlannerError::Schema(format!(
                "Foreign key target {}.{} does not exist",
                ref_table, ref_column
            )));
        }

        let table = tables
            .iter_mut()
            .find(|t| t.name == table_name)
            .ok_or_else(|| PlannerError::Schema(format!("Table {} not found", table_name)))?;
        let column = table
            .columns
            .iter_mut()
            .find(|c| c.name == column_name)
            .ok_or_else(|| {
                PlannerError::Schema(format!("Column {}.{} not found", table_name, column_name))
            })?;

        column.references_table = Some(ref_table.to_string());
        column.references_column = Some(ref_column.to_string());
        Ok(())
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.read().iter().map(|t| t.name.clone()).collect()
    }

    pub fn get_table(&self, name: &str) -> Option<TableDefinition> {
        self.tables.read().iter().find(|t| t.name == name).cloned()
    }

    /// Registration-order snapshot of all tables.
    pub fn tables(&self) -> Vec<TableDefinition> {
        self.tables.read().clone()
    }
}
