//! Request limits and write guardrails.

use serde::{Deserialize, Serialize};

/// Limits applied while parsing and executing read requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Maximum nesting of embedded relations in `select=`.
    #[serde(default = "default_max_select_depth")]
    pub max_select_depth: usize,

    /// Maximum nesting of `and(...)`/`or(...)` groups.
    #[serde(default = "default_max_filter_depth")]
    pub max_filter_depth: usize,

    /// Hard cap on rows returned by one read, regardless of `limit`.
    #[serde(default)]
    pub max_rows: Option<u64>,

    /// Limit applied when the request names none.
    #[serde(default)]
    pub default_limit: Option<u64>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_select_depth: default_max_select_depth(),
            max_filter_depth: default_max_filter_depth(),
            max_rows: None,
            default_limit: None,
        }
    }
}

/// Write guardrails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailsConfig {
    /// Maximum rows an UPDATE or DELETE may touch before it is rolled back.
    #[serde(default = "default_max_affected")]
    pub max_affected_rows: u64,
}

impl Default for GuardrailsConfig {
    fn default() -> Self {
        Self {
            max_affected_rows: default_max_affected(),
        }
    }
}

fn default_max_select_depth() -> usize {
    8
}

fn default_max_filter_depth() -> usize {
    8
}

fn default_max_affected() -> u64 {
    1000
}
