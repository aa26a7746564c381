//! Classified relationships between tables.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How two tables relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationshipKind {
    /// The local table holds the foreign key: each local row has at most one
    /// related row.
    ManyToOne,
    /// The foreign table holds the foreign key: each local row has any number
    /// of related rows.
    OneToMany,
    /// Linked through a junction table.
    ManyToMany,
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RelationshipKind::ManyToOne => "many-to-one",
            RelationshipKind::OneToMany => "one-to-many",
            RelationshipKind::ManyToMany => "many-to-many",
        })
    }
}

/// A junction table linking two tables in a many-to-many relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Junction {
    pub table: String,
    /// Junction column referencing the local table.
    pub local_column: String,
    /// Junction column referencing the foreign table.
    pub foreign_column: String,
    pub local_constraint: String,
    pub foreign_constraint: String,
}

/// A resolved path from `local_table` to `foreign_table`.
///
/// Column roles by kind:
///
/// | kind | `local_column` | `foreign_column` |
/// |------|----------------|------------------|
/// | many-to-one | FK column on the local table | referenced column |
/// | one-to-many | referenced column on the local table | FK column on the foreign table |
/// | many-to-many | local column referenced by the junction | foreign column referenced by the junction |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub kind: RelationshipKind,
    pub local_table: String,
    pub local_column: String,
    pub foreign_table: String,
    pub foreign_column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub junction: Option<Junction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint_name: Option<String>,
}

impl Relationship {
    /// Whether the embedding of this relationship is a single object.
    pub fn is_to_one(&self) -> bool {
        self.kind == RelationshipKind::ManyToOne
    }

    /// The column holding the foreign key for direct relationships.
    pub fn fk_column(&self) -> Option<&str> {
        match self.kind {
            RelationshipKind::ManyToOne => Some(&self.local_column),
            RelationshipKind::OneToMany => Some(&self.foreign_column),
            RelationshipKind::ManyToMany => None,
        }
    }

    /// Whether this relationship touches `table` on either side or through
    /// its junction.
    pub fn references(&self, table: &str) -> bool {
        self.local_table == table
            || self.foreign_table == table
            || self.junction.as_ref().is_some_and(|j| j.table == table)
    }
}
