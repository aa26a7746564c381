//! Schema snapshots produced by storage introspection.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Schema information for a whole database.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseSchema {
    /// Tables keyed by name.
    pub tables: BTreeMap<String, TableSchema>,
}

impl DatabaseSchema {
    /// Create a new empty database schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table to the schema.
    pub fn add_table(&mut self, table: TableSchema) {
        self.tables.insert(table.name.clone(), table);
    }

    /// Get a table by name.
    pub fn get_table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Iterate over all tables in name order.
    pub fn iter(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }
}

/// Schema information for a single table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,

    /// Columns in declaration order.
    pub columns: Vec<ColumnSchema>,

    /// Primary key columns in key order.
    #[serde(default)]
    pub primary_key: Vec<String>,

    /// Single-column foreign keys declared on this table.
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableSchema {
    /// Create a new table schema.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Builder-style column addition.
    pub fn column(mut self, name: &str, data_type: &str) -> Self {
        self.columns.push(ColumnSchema {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: true,
            default: None,
        });
        self
    }

    /// Builder-style primary key.
    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Builder-style foreign key with the default constraint name.
    pub fn foreign_key(mut self, column: &str, foreign_table: &str, foreign_column: &str) -> Self {
        let fk = ForeignKey::new(&self.name, column, foreign_table, foreign_column);
        self.foreign_keys.push(fk);
        self
    }

    /// Get a column by name.
    pub fn get_column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Whether the table declares a column with this name.
    pub fn has_column(&self, name: &str) -> bool {
        self.get_column(name).is_some()
    }

    /// Whether `column` is part of the primary key.
    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_key.iter().any(|c| c == column)
    }
}

/// Schema information for a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Column name.
    pub name: String,

    /// Declared type (may be empty in SQLite).
    pub data_type: String,

    /// Whether the column accepts NULL.
    pub nullable: bool,

    /// Default value expression, if any.
    #[serde(default)]
    pub default: Option<String>,
}

/// A single-column foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Constraint name (declared, or `<table>_<column>_fkey`).
    pub constraint_name: String,

    /// Referencing column on the owning table.
    pub column: String,

    /// Referenced table.
    pub foreign_table: String,

    /// Referenced column.
    pub foreign_column: String,
}

impl ForeignKey {
    /// Foreign key carrying the conventional constraint name.
    pub fn new(table: &str, column: &str, foreign_table: &str, foreign_column: &str) -> Self {
        Self {
            constraint_name: default_constraint_name(table, column),
            column: column.to_string(),
            foreign_table: foreign_table.to_string(),
            foreign_column: foreign_column.to_string(),
        }
    }

    /// Replace the constraint name.
    pub fn named(mut self, constraint_name: impl Into<String>) -> Self {
        self.constraint_name = constraint_name.into();
        self
    }
}

/// The name given to an unnamed foreign key constraint.
pub fn default_constraint_name(table: &str, column: &str) -> String {
    format!("{}_{}_fkey", table, column)
}
