//! # strata-rls
//!
//! Row-Level Security (RLS) for Strata, enforced by query rewriting.
//!
//! This crate provides functionality to:
//! - Read policies through the [`PolicyStore`] seam
//! - Substitute `auth.*` placeholders with the caller's identity
//! - Validate substituted expressions before they reach generated SQL
//! - Combine every applicable policy into one predicate per command
//!
//! ## How It Works
//!
//! **Stored policy (`todos`, command `ALL`):**
//! ```sql
//! user_id = auth.uid()
//! ```
//!
//! **Effective condition for caller `a1`:**
//! ```sql
//! (user_id = 'a1')
//! ```
//!
//! ## Command Semantics
//!
//! | Command  | Expression used |
//! |----------|-----------------|
//! | `SELECT` | `using_expr` |
//! | `INSERT` | `check_expr` |
//! | `UPDATE` | `using_expr` for the target rows, `check_expr` (or `using_expr`) for the new rows |
//! | `DELETE` | `using_expr` |
//!
//! Policies compose conjunctively. A table without applicable policies is
//! unrestricted and yields the empty condition.

pub mod engine;
pub mod error;
pub mod parser;
pub mod placeholder;
pub mod store;

pub use engine::{PolicyConditions, PolicyEngine};
pub use error::RlsError;
pub use parser::ExpressionValidator;
pub use placeholder::{quote_literal, substitute};
pub use store::{InMemoryPolicyStore, PolicyStore};
