//! Storage connection configuration.

use serde::{Deserialize, Serialize};

/// SQLite connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL, e.g. `sqlite://data/app.db` or `sqlite::memory:`.
    #[serde(default = "default_url")]
    pub url: String,

    /// Pool size. In-memory databases are forced to a single connection.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a statement waits on a locked database before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Create the database file when it does not exist.
    #[serde(default = "default_create_if_missing")]
    pub create_if_missing: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
            create_if_missing: default_create_if_missing(),
        }
    }
}

impl DatabaseConfig {
    /// Settings for a private in-memory database (tests, demos).
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            ..Self::default()
        }
    }

    /// Whether the URL names an in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

fn default_url() -> String {
    "sqlite://strata.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_create_if_missing() -> bool {
    true
}
