//! Row-level security policy records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The statement kind a policy applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyCommand {
    Select,
    Insert,
    Update,
    Delete,
    All,
}

impl PolicyCommand {
    /// Canonical upper-case name as stored in the policy catalog.
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyCommand::Select => "SELECT",
            PolicyCommand::Insert => "INSERT",
            PolicyCommand::Update => "UPDATE",
            PolicyCommand::Delete => "DELETE",
            PolicyCommand::All => "ALL",
        }
    }

    /// Whether a policy declared for `self` applies to `requested`.
    pub fn applies_to(&self, requested: PolicyCommand) -> bool {
        *self == PolicyCommand::All || *self == requested
    }
}

impl fmt::Display for PolicyCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SELECT" => Ok(PolicyCommand::Select),
            "INSERT" => Ok(PolicyCommand::Insert),
            "UPDATE" => Ok(PolicyCommand::Update),
            "DELETE" => Ok(PolicyCommand::Delete),
            "ALL" | "*" => Ok(PolicyCommand::All),
            other => Err(format!("unknown policy command '{}'", other)),
        }
    }
}

/// A stored row-level security policy.
///
/// `(table_name, policy_name)` identifies a policy uniquely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RlsPolicy {
    pub table_name: String,
    pub policy_name: String,
    pub command: PolicyCommand,

    /// Row visibility expression for SELECT, UPDATE and DELETE.
    #[serde(default)]
    pub using_expr: Option<String>,

    /// Row validation expression for INSERT and UPDATE post-images.
    #[serde(default)]
    pub check_expr: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl RlsPolicy {
    /// A policy with only a USING expression.
    pub fn using(
        table_name: impl Into<String>,
        policy_name: impl Into<String>,
        command: PolicyCommand,
        expr: impl Into<String>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            policy_name: policy_name.into(),
            command,
            using_expr: Some(expr.into()),
            check_expr: None,
            enabled: true,
        }
    }

    /// Set the CHECK expression.
    pub fn with_check(mut self, expr: impl Into<String>) -> Self {
        self.check_expr = Some(expr.into());
        self
    }

    /// Mark the policy disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

fn default_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parsing() {
        assert_eq!("select".parse::<PolicyCommand>(), Ok(PolicyCommand::Select));
        assert_eq!(" ALL ".parse::<PolicyCommand>(), Ok(PolicyCommand::All));
        assert!("TRUNCATE".parse::<PolicyCommand>().is_err());
    }

    #[test]
    fn test_applies_to() {
        assert!(PolicyCommand::All.applies_to(PolicyCommand::Delete));
        assert!(PolicyCommand::Update.applies_to(PolicyCommand::Update));
        assert!(!PolicyCommand::Insert.applies_to(PolicyCommand::Select));
    }
}
