//! # strata-query
//!
//! Request parsing and SQL generation for the PostgREST-style query API.
//!
//! - [`select`]: the recursive `select=` grammar
//! - [`filter`]: simple and logical filters
//! - [`order`], [`pagination`], [`prefer`]: ordering, windows and modifiers
//! - [`request`]: assembly of a [`ParsedRequest`]
//! - [`builder`]: compilation of resolved plans into parameterized SQL
//!
//! Parsing is purely syntactic. Relation names are resolved, and RLS
//! conditions computed, by the runtime before plans reach the builder.

pub mod builder;
pub mod error;
pub mod filter;
pub mod order;
pub mod pagination;
pub mod prefer;
pub mod request;
pub mod select;

pub use builder::{
    ConflictAction, DeletePlan, EmbedPlan, InsertPlan, OrderTerm, Predicate, ReadPlan,
    ScopedRelation, SqlBuilder, UpdatePlan,
};
pub use error::QueryError;
pub use filter::{FilterLeaf, FilterNode, FilterOperator, FilterValue, LogicalOp};
pub use order::{Direction, NullsOrder, OrderSpec};
pub use pagination::Pagination;
pub use prefer::{CountMode, Modifiers, OutputFormat, Resolution, ReturnPreference};
pub use request::{ParsedRequest, RequestHeaders};
pub use select::{ColumnSelect, RelationSelect, SelectItem};
