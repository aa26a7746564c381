use std::path::Path;
use std::sync::Arc;

use strata_adapter_sqlite::{SqliteAdapter, SqlitePolicyStore};
use strata_core::StrataConfig;
use strata_rls::PolicyEngine;
use strata_runtime::{QueryEngine, RelationshipResolver};

/// Shared application state.
pub struct AppState {
    pub config: StrataConfig,
    pub engine: QueryEngine,
    pub adapter: Arc<SqliteAdapter>,
}

impl AppState {
    /// Connect to the database, make sure the policy catalog exists and
    /// wire the engine.
    pub async fn init(config: StrataConfig) -> anyhow::Result<Self> {
        let mut config = config;
        config.database.url = sqlite_url(&config.database.url);
        ensure_parent_dir(&config.database.url)?;

        let adapter = Arc::new(
            SqliteAdapter::connect(&config.database)
                .await?
                .with_hidden_tables(vec![config.rls.policy_table.clone()]),
        );

        let store = SqlitePolicyStore::new(adapter.pool().clone(), &config.rls.policy_table);
        store.ensure_catalog().await?;

        let resolver = Arc::new(RelationshipResolver::new(adapter.clone()));
        let policies = PolicyEngine::new(Arc::new(store))
            .with_validation(config.rls.validate_expressions);
        let engine = QueryEngine::new(
            adapter.clone(),
            resolver,
            policies,
            config.guardrails.clone(),
        );

        tracing::info!(
            policy_table = %config.rls.policy_table,
            max_affected_rows = config.guardrails.max_affected_rows,
            "Engine ready"
        );
        Ok(Self {
            config,
            engine,
            adapter,
        })
    }
}

/// Accept bare file paths as well as sqlx URLs.
fn sqlite_url(url: &str) -> String {
    if url.starts_with("sqlite:") {
        url.to_string()
    } else if Path::new(url).is_absolute() {
        format!("sqlite:{}", url)
    } else {
        format!("sqlite://{}", url)
    }
}

fn ensure_parent_dir(url: &str) -> anyhow::Result<()> {
    if url.contains(":memory:") || url.contains("mode=memory") {
        return Ok(());
    }
    let path = url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    let path = path.split('?').next().unwrap_or(path);
    if let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}
