//! The storage seam.
//!
//! The engine never talks to a database directly. Reads, counts and writes
//! go through a [`DataAdapter`]; schema snapshots come from a
//! [`SchemaSource`]. Both are `anyhow`-based: storage failures are opaque
//! to the engine and surface as 500s.

use async_trait::async_trait;
use strata_core::{BuiltQuery, DatabaseSchema};

/// One result row, keyed by output column name.
pub type JsonRow = serde_json::Map<String, serde_json::Value>;

/// The statements of one write, executed in a single transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct WritePlan {
    pub table: String,
    /// Executed in order. Every statement returns the rows it touched.
    pub statements: Vec<BuiltQuery>,
    /// Check query run against the touched rowids before commit. Its single
    /// parameter is the JSON array of rowids; it returns one
    /// `violations` count.
    pub check: Option<String>,
    /// Roll back when more rows than this are touched.
    pub max_affected: Option<u64>,
}

impl WritePlan {
    pub fn new(table: impl Into<String>, statements: Vec<BuiltQuery>) -> Self {
        Self {
            table: table.into(),
            statements,
            check: None,
            max_affected: None,
        }
    }

    pub fn with_check(mut self, check: Option<String>) -> Self {
        self.check = check;
        self
    }

    pub fn with_max_affected(mut self, max: u64) -> Self {
        self.max_affected = Some(max);
        self
    }
}

/// How a write transaction ended.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Committed {
        /// Rows returned by the statements, with the rowid column removed.
        rows: Vec<JsonRow>,
        /// Rowids of the touched rows, in statement order.
        rowids: Vec<i64>,
        affected: u64,
    },
    /// The post-image failed the check; rolled back.
    CheckFailed { violations: u64 },
    /// The guardrail was exceeded; rolled back.
    LimitExceeded { affected: u64 },
}

/// Executes built statements against a store.
#[async_trait]
pub trait DataAdapter: Send + Sync {
    /// Run a read and return its rows.
    async fn fetch_rows(&self, query: &BuiltQuery) -> anyhow::Result<Vec<JsonRow>>;

    /// Run a `SELECT COUNT(*)` and return the count.
    async fn fetch_count(&self, query: &BuiltQuery) -> anyhow::Result<u64>;

    /// Run a write inside one transaction.
    async fn execute_write(&self, plan: &WritePlan) -> anyhow::Result<WriteOutcome>;
}

/// Produces schema snapshots.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn load_schema(&self) -> anyhow::Result<DatabaseSchema>;
}

/// A fixed schema, for tests and embedded use.
#[derive(Debug, Clone, Default)]
pub struct StaticSchema {
    schema: DatabaseSchema,
}

impl StaticSchema {
    pub fn new(schema: DatabaseSchema) -> Self {
        Self { schema }
    }
}

#[async_trait]
impl SchemaSource for StaticSchema {
    async fn load_schema(&self) -> anyhow::Result<DatabaseSchema> {
        Ok(self.schema.clone())
    }
}
