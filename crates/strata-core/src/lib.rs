//! # strata-core
//!
//! Types shared by every Strata crate:
//!
//! - [`AuthContext`]: the validated identity of the caller
//! - [`TableSchema`] / [`DatabaseSchema`]: read-only schema snapshots
//! - [`Relationship`]: classified foreign-key paths between tables
//! - [`RlsPolicy`]: stored row-level security policies
//! - [`sql`]: identifier quoting and bound parameter values
//! - [`config`]: the YAML configuration model

pub mod auth;
pub mod config;
pub mod policy;
pub mod relationship;
pub mod schema;
pub mod sql;

pub use auth::AuthContext;
pub use config::{
    ConfigError, DatabaseConfig, GuardrailsConfig, ObservabilityConfig, QueryConfig, RlsConfig,
    ServerConfig, StrataConfig,
};
pub use policy::{PolicyCommand, RlsPolicy};
pub use relationship::{Junction, Relationship, RelationshipKind};
pub use schema::{ColumnSchema, DatabaseSchema, ForeignKey, TableSchema};
pub use sql::{BuiltQuery, SqlValue, quote_ident, quote_ident_always};
