//! # strata-runtime
//!
//! Relationship resolution and request execution.
//!
//! The runtime sits between the parsed request and the store:
//!
//! 1. [`RelationshipResolver`] maps every relation reference to a
//!    [`Relationship`](strata_core::Relationship), caching per-table sets.
//! 2. [`QueryEngine`] attaches RLS conditions from the
//!    [`PolicyEngine`](strata_rls::PolicyEngine), compiles plans with the
//!    [`SqlBuilder`](strata_query::SqlBuilder) and runs them through a
//!    [`DataAdapter`].
//!
//! Storage is reached only through the [`DataAdapter`] and [`SchemaSource`]
//! traits.

pub mod adapter;
pub mod error;
pub mod executor;
pub mod resolver;

pub use adapter::{DataAdapter, JsonRow, SchemaSource, StaticSchema, WriteOutcome, WritePlan};
pub use error::{EngineError, ResolveError};
pub use executor::{QueryEngine, ReadOutput, WriteResult};
pub use resolver::{RelationshipCache, RelationshipResolver, TableRelationships, is_junction};
