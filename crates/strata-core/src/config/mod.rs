//! Configuration types for Strata.
//!
//! Configuration is loaded from a single YAML file (`strata.yaml`). Every
//! section is optional and falls back to its defaults, so an empty file is a
//! valid configuration pointing at `sqlite://strata.db`.
//!
//! ```yaml
//! database:
//!   url: sqlite://data/app.db
//!   max_connections: 8
//! server:
//!   bind: 0.0.0.0:3000
//!   trusted_auth_headers: true
//! query:
//!   max_select_depth: 6
//!   max_rows: 1000
//! ```

pub mod database;
pub mod query;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub use database::DatabaseConfig;
pub use query::{GuardrailsConfig, QueryConfig};

/// Complete Strata configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrataConfig {
    /// Storage connection.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// HTTP binding.
    #[serde(default)]
    pub server: ServerConfig,

    /// Request parsing limits.
    #[serde(default)]
    pub query: QueryConfig,

    /// Row-level security settings.
    #[serde(default)]
    pub rls: RlsConfig,

    /// Write guardrails.
    #[serde(default)]
    pub guardrails: GuardrailsConfig,

    /// Logging.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address, e.g. "0.0.0.0:3000".
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Read caller identity from `x-strata-*` headers set by a trusted
    /// gateway. When disabled every request runs as the anonymous role.
    #[serde(default)]
    pub trusted_auth_headers: bool,

    /// Role allowed to call maintenance endpoints such as schema cache
    /// invalidation. Only reachable through trusted identity headers.
    #[serde(default = "default_admin_role")]
    pub admin_role: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            trusted_auth_headers: false,
            admin_role: default_admin_role(),
        }
    }
}

/// Row-level security settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RlsConfig {
    /// Table holding the policy catalog.
    #[serde(default = "default_policy_table")]
    pub policy_table: String,

    /// Reject stored expressions that do not parse as SQL expressions.
    #[serde(default = "default_true")]
    pub validate_expressions: bool,
}

impl Default for RlsConfig {
    fn default() -> Self {
        Self {
            policy_table: default_policy_table(),
            validate_expressions: true,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_admin_role() -> String {
    "service_role".to_string()
}

fn default_policy_table() -> String {
    "strata_policies".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StrataConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML content and validate it.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.query.max_select_depth == 0 {
            return Err(ConfigError::Config(
                "query.max_select_depth must be at least 1".to_string(),
            ));
        }
        if self.query.max_filter_depth == 0 {
            return Err(ConfigError::Config(
                "query.max_filter_depth must be at least 1".to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Config(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        if self.rls.policy_table.trim().is_empty() {
            return Err(ConfigError::Config("rls.policy_table must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = StrataConfig::from_yaml("").unwrap();
        assert_eq!(config.database.url, "sqlite://strata.db");
        assert_eq!(config.server.bind, "0.0.0.0:3000");
        assert_eq!(config.query.max_select_depth, 8);
        assert_eq!(config.rls.policy_table, "strata_policies");
        assert!(!config.server.trusted_auth_headers);
        assert_eq!(config.server.admin_role, "service_role");
    }

    #[test]
    fn test_partial_config() {
        let yaml = r#"
database:
  url: "sqlite::memory:"
query:
  max_rows: 50
server:
  trusted_auth_headers: true
"#;
        let config = StrataConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.query.max_rows, Some(50));
        assert!(config.server.trusted_auth_headers);
    }

    #[test]
    fn test_invalid_depth_rejected() {
        let yaml = "query:\n  max_select_depth: 0\n";
        assert!(matches!(
            StrataConfig::from_yaml(yaml),
            Err(ConfigError::Config(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "observability:\n  log_filter: debug").unwrap();

        let config = StrataConfig::from_file(file.path()).unwrap();
        assert_eq!(config.observability.log_filter, "debug");
    }
}
