//! Caller identity consumed by policy substitution.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The validated identity and claims of the current caller.
///
/// Produced by an upstream authentication layer after token validation.
/// Strata never verifies credentials itself; it only reads these values when
/// substituting `auth.*` placeholders into policy expressions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthContext {
    /// Value of `auth.uid()`.
    #[serde(default)]
    pub user_id: String,

    /// Value of `auth.role()`.
    #[serde(default)]
    pub role: String,

    /// Value of `auth.email()`.
    #[serde(default)]
    pub email: String,

    /// Values of `auth.jwt()->>'key'`.
    #[serde(default)]
    pub claims: BTreeMap<String, serde_json::Value>,
}

impl AuthContext {
    /// Context for unauthenticated callers.
    pub fn anonymous() -> Self {
        Self {
            role: "anon".to_string(),
            ..Default::default()
        }
    }

    /// Context for an authenticated user.
    pub fn user(user_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: role.into(),
            ..Default::default()
        }
    }

    /// Set the email claim.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    /// Add a custom claim.
    pub fn with_claim(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.claims.insert(key.into(), value);
        self
    }

    /// Stringified claim value, `None` when the claim is absent or null.
    ///
    /// Objects and arrays are rendered as compact JSON.
    pub fn claim_text(&self, key: &str) -> Option<String> {
        match self.claims.get(key)? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            other => Some(other.to_string()),
        }
    }

    /// The full claim set as `auth.jwt()` sees it.
    ///
    /// Standard claims (`sub`, `role`, `email`) are filled from the identity
    /// fields unless the caller supplied them explicitly.
    pub fn jwt_payload(&self) -> serde_json::Value {
        let mut claims: serde_json::Map<String, serde_json::Value> = self
            .claims
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !self.user_id.is_empty() {
            claims
                .entry("sub")
                .or_insert_with(|| self.user_id.clone().into());
        }
        claims
            .entry("role")
            .or_insert_with(|| self.role.clone().into());
        if !self.email.is_empty() {
            claims
                .entry("email")
                .or_insert_with(|| self.email.clone().into());
        }
        serde_json::Value::Object(claims)
    }
}
