//! The policy catalog table.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use strata_core::{PolicyCommand, RlsPolicy, quote_ident_always};
use strata_rls::{PolicyStore, RlsError};

/// Reads policies from a catalog table in the served database.
///
/// The catalog is managed by administrators; requests only read it.
#[derive(Debug, Clone)]
pub struct SqlitePolicyStore {
    pool: SqlitePool,
    table: String,
}

impl SqlitePolicyStore {
    pub fn new(pool: SqlitePool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    /// Create the catalog table when it does not exist.
    pub async fn ensure_catalog(&self) -> anyhow::Result<()> {
        let sql = format!(
            r#"CREATE TABLE IF NOT EXISTS {} (
                table_name TEXT NOT NULL,
                policy_name TEXT NOT NULL,
                command TEXT NOT NULL DEFAULT 'ALL'
                    CHECK (command IN ('SELECT', 'INSERT', 'UPDATE', 'DELETE', 'ALL')),
                using_expr TEXT,
                check_expr TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                PRIMARY KEY (table_name, policy_name)
            )"#,
            quote_ident_always(&self.table)
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        tracing::debug!(table = %self.table, "Policy catalog ready");
        Ok(())
    }

    /// Insert or replace a policy, keyed by `(table_name, policy_name)`.
    pub async fn upsert(&self, policy: &RlsPolicy) -> anyhow::Result<()> {
        let sql = format!(
            "INSERT OR REPLACE INTO {} (table_name, policy_name, command, using_expr, check_expr, enabled) VALUES (?, ?, ?, ?, ?, ?)",
            quote_ident_always(&self.table)
        );
        sqlx::query(&sql)
            .bind(&policy.table_name)
            .bind(&policy.policy_name)
            .bind(policy.command.as_str())
            .bind(policy.using_expr.as_deref())
            .bind(policy.check_expr.as_deref())
            .bind(policy.enabled)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PolicyStore for SqlitePolicyStore {
    async fn policies_for_table(&self, table: &str) -> Result<Vec<RlsPolicy>, RlsError> {
        let fetch_error = |reason: String| RlsError::PolicyFetch {
            table: table.to_string(),
            reason,
        };

        let sql = format!(
            "SELECT policy_name, command, using_expr, check_expr, enabled FROM {} WHERE table_name = ? ORDER BY policy_name",
            quote_ident_always(&self.table)
        );
        let rows = sqlx::query(&sql)
            .bind(table)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        let policies = rows
            .iter()
            .map(|row| policy_from_row(table, row))
            .collect::<Result<Vec<_>, _>>()
            .map_err(fetch_error)?;

        tracing::debug!(table, policies = policies.len(), "Loaded policies");
        Ok(policies)
    }
}

fn policy_from_row(table: &str, row: &SqliteRow) -> Result<RlsPolicy, String> {
    let read = |e: sqlx::Error| e.to_string();
    let command: String = row.try_get("command").map_err(read)?;
    Ok(RlsPolicy {
        table_name: table.to_string(),
        policy_name: row.try_get("policy_name").map_err(read)?,
        command: command.parse::<PolicyCommand>()?,
        using_expr: row.try_get("using_expr").map_err(read)?,
        check_expr: row.try_get("check_expr").map_err(read)?,
        enabled: row.try_get("enabled").map_err(read)?,
    })
}
