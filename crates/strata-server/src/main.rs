use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use strata_core::StrataConfig;
use strata_server::{AppState, app};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "strata", version, about = "PostgREST-style API over SQLite with row-level security")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, env = "STRATA_CONFIG", default_value = "strata.yaml")]
    config: PathBuf,

    /// Override the bind address from the configuration.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        StrataConfig::from_file(&cli.config)?
    } else {
        StrataConfig::default()
    };
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if !cli.config.exists() {
        tracing::warn!(path = %cli.config.display(), "Configuration file not found, using defaults");
    }

    let bind = config.server.bind.clone();
    let state = Arc::new(AppState::init(config).await?);

    tracing::info!("strata listening on {}", bind);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutting down");
}
