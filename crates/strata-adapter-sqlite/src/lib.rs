//! # strata-adapter-sqlite
//!
//! SQLite implementation of the runtime's storage seams.
//!
//! - [`SqliteAdapter`] runs built statements ([`DataAdapter`]) and produces
//!   schema snapshots ([`SchemaSource`]) by introspecting `sqlite_master`.
//! - [`SqlitePolicyStore`] reads the policy catalog table.
//!
//! Writes run in one transaction per request. The post-image check and the
//! affected-rows guardrail are evaluated inside that transaction, so a
//! refused write leaves nothing behind.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Arguments, Column, Row, TypeInfo, ValueRef};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use strata_core::{BuiltQuery, DatabaseConfig, DatabaseSchema, SqlValue};
use strata_query::builder::ROWID_COLUMN;
use strata_runtime::{DataAdapter, JsonRow, SchemaSource, WriteOutcome, WritePlan};

pub mod introspect;
pub mod policy_store;

pub use introspect::introspect_schema;
pub use policy_store::SqlitePolicyStore;

/// Pause before retrying a statement that hit a locked database.
const RETRY_DELAY: Duration = Duration::from_millis(50);

fn args_add<'q, T>(args: &mut SqliteArguments<'q>, v: T) -> anyhow::Result<()>
where
    T: 'q + sqlx::Encode<'q, Sqlite> + sqlx::Type<Sqlite>,
{
    args.add(v).map_err(|e| anyhow::anyhow!(e))
}

fn bind_params(params: &[SqlValue]) -> anyhow::Result<SqliteArguments<'_>> {
    let mut args = SqliteArguments::default();
    for param in params {
        match param {
            SqlValue::Null => args_add(&mut args, Option::<i64>::None)?,
            SqlValue::Integer(i) => args_add(&mut args, *i)?,
            SqlValue::Real(f) => args_add(&mut args, *f)?,
            SqlValue::Text(s) => args_add(&mut args, s.as_str())?,
        }
    }
    Ok(args)
}

pub struct SqliteAdapter {
    pool: SqlitePool,
    hidden_tables: Vec<String>,
}

impl SqliteAdapter {
    /// Open a pool for `config`.
    ///
    /// Foreign keys are enforced and `LIKE` is case-sensitive on every
    /// connection. In-memory databases live in a single pinned connection.
    pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(config.create_if_missing)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .foreign_keys(true);

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA case_sensitive_like = ON")
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            });
        if config.is_in_memory() {
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options.connect_with(options).await?;
        tracing::info!(
            url = %config.url,
            in_memory = config.is_in_memory(),
            "Connected to SQLite"
        );
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            hidden_tables: Vec::new(),
        }
    }

    /// Tables left out of schema snapshots (e.g. the policy catalog).
    pub fn with_hidden_tables(mut self, tables: Vec<String>) -> Self {
        self.hidden_tables = tables;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_rows_once(&self, query: &BuiltQuery) -> anyhow::Result<Vec<JsonRow>> {
        let args = bind_params(&query.params)?;
        let rows = sqlx::query_with(&query.sql, args)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_json).collect()
    }

    async fn fetch_count_once(&self, query: &BuiltQuery) -> anyhow::Result<u64> {
        let args = bind_params(&query.params)?;
        let row = sqlx::query_with(&query.sql, args)
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get(0)?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn execute_write_once(&self, plan: &WritePlan) -> anyhow::Result<WriteOutcome> {
        let mut tx = self.pool.begin().await?;

        let mut rows = Vec::new();
        let mut rowids = Vec::new();
        for statement in &plan.statements {
            let args = bind_params(&statement.params)?;
            let returned = sqlx::query_with(&statement.sql, args)
                .fetch_all(&mut *tx)
                .await?;
            for record in &returned {
                let mut row = row_to_json(record)?;
                if let Some(id) = row.shift_remove(ROWID_COLUMN).and_then(|v| v.as_i64()) {
                    rowids.push(id);
                }
                rows.push(row);
            }
        }

        let affected = rows.len() as u64;
        if let Some(max) = plan.max_affected
            && affected > max
        {
            tx.rollback().await?;
            tracing::warn!(
                table = %plan.table,
                affected,
                max,
                "Write exceeds the affected-rows guardrail, rolled back"
            );
            return Ok(WriteOutcome::LimitExceeded { affected });
        }

        if let Some(check) = &plan.check
            && !rowids.is_empty()
        {
            let ids = serde_json::to_string(&rowids)?;
            let violations: i64 = sqlx::query(check)
                .bind(ids)
                .fetch_one(&mut *tx)
                .await?
                .try_get("violations")?;
            if violations > 0 {
                tx.rollback().await?;
                tracing::debug!(
                    table = %plan.table,
                    violations,
                    "Written rows fail the check policy, rolled back"
                );
                return Ok(WriteOutcome::CheckFailed {
                    violations: violations as u64,
                });
            }
        }

        tx.commit().await?;
        Ok(WriteOutcome::Committed {
            rows,
            rowids,
            affected,
        })
    }
}

#[async_trait]
impl DataAdapter for SqliteAdapter {
    async fn fetch_rows(&self, query: &BuiltQuery) -> anyhow::Result<Vec<JsonRow>> {
        retry_once("fetch_rows", || self.fetch_rows_once(query)).await
    }

    async fn fetch_count(&self, query: &BuiltQuery) -> anyhow::Result<u64> {
        retry_once("fetch_count", || self.fetch_count_once(query)).await
    }

    async fn execute_write(&self, plan: &WritePlan) -> anyhow::Result<WriteOutcome> {
        retry_once("execute_write", || self.execute_write_once(plan)).await
    }
}

#[async_trait]
impl SchemaSource for SqliteAdapter {
    async fn load_schema(&self) -> anyhow::Result<DatabaseSchema> {
        introspect_schema(&self.pool, &self.hidden_tables).await
    }
}

/// Run `op`, retrying once when SQLite reports a busy or locked database.
async fn retry_once<T, F, Fut>(operation: &str, op: F) -> anyhow::Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    match op().await {
        Err(e) if is_transient(&e) => {
            tracing::warn!(operation, error = %e, "SQLite database is locked, retrying once");
            tokio::time::sleep(RETRY_DELAY).await;
            op().await
        }
        other => other,
    }
}

/// `SQLITE_BUSY` (5) and `SQLITE_LOCKED` (6), including extended codes.
fn is_transient(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<sqlx::Error>() {
        Some(sqlx::Error::Database(db)) => db
            .code()
            .and_then(|code| code.parse::<i64>().ok())
            .is_some_and(|code| matches!(code % 256, 5 | 6)),
        _ => false,
    }
}

/// Convert a row to JSON by the storage class of each value.
fn row_to_json(row: &SqliteRow) -> anyhow::Result<JsonRow> {
    let mut out = JsonRow::new();
    for (index, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), column_to_json(row, index)?);
    }
    Ok(out)
}

fn column_to_json(row: &SqliteRow, index: usize) -> anyhow::Result<Value> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let storage = raw.type_info().name().to_string();

    let value = match storage.as_str() {
        "INTEGER" | "BOOLEAN" => Value::from(row.try_get::<i64, _>(index)?),
        "REAL" => {
            let f: f64 = row.try_get(index)?;
            serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        }
        "BLOB" => {
            let bytes: Vec<u8> = row.try_get(index)?;
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        }
        _ => Value::String(row.try_get::<String, _>(index)?),
    };
    Ok(value)
}
