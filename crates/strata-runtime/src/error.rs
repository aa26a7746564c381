//! Error types for the runtime crate.

use strata_query::QueryError;
use strata_rls::RlsError;
use thiserror::Error;

/// Errors raised while resolving relation references.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The table does not exist in the schema.
    #[error("table not found: {0}")]
    UnknownTable(String),

    /// No foreign key path leads from `table` to `relation`.
    #[error("could not find a relationship between '{table}' and '{relation}'")]
    UnknownRelation { table: String, relation: String },

    /// More than one path matches and no hint selects exactly one.
    #[error("more than one relationship was found for '{table}' and '{relation}'")]
    Ambiguous {
        table: String,
        relation: String,
        /// Hints that each select exactly one path.
        hints: Vec<String>,
    },

    /// The schema could not be loaded.
    #[error("failed to load schema: {0}")]
    Schema(#[source] anyhow::Error),
}

/// Errors surfaced by the query engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed request.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Relation resolution failed.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Policy loading, validation or substitution failed.
    #[error(transparent)]
    Policy(#[from] RlsError),

    /// The column does not exist on the table.
    #[error("column '{column}' does not exist on '{table}'")]
    UnknownColumn { table: String, column: String },

    /// A written row does not satisfy the table's check policy.
    #[error("new row violates row-level security policy for table '{table}'")]
    RlsViolation { table: String },

    /// A write touched more rows than the guardrail allows.
    #[error("write would affect {affected} rows, more than the maximum of {max}")]
    TooManyRows { affected: u64, max: u64 },

    /// A singular response was requested but the result is not one row.
    #[error("the result contains {rows} rows, expected exactly one")]
    NotSingular { rows: usize },

    /// Statement execution failed.
    #[error("execution failed: {0}")]
    Exec(#[source] anyhow::Error),
}

impl EngineError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::Query(err) => match err {
                QueryError::InvalidRange(_) => 416,
                QueryError::NotAcceptable(_) => 406,
                _ => 400,
            },
            EngineError::Resolve(err) => match err {
                ResolveError::UnknownTable(_) => 404,
                ResolveError::UnknownRelation { .. } | ResolveError::Ambiguous { .. } => 400,
                ResolveError::Schema(_) => 500,
            },
            EngineError::Policy(_) => 500,
            EngineError::UnknownColumn { .. } => 400,
            EngineError::RlsViolation { .. } => 403,
            EngineError::TooManyRows { .. } => 400,
            EngineError::NotSingular { .. } => 406,
            EngineError::Exec(_) => 500,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Query(err) => match err {
                QueryError::InvalidRange(_) => "PGRST103",
                QueryError::NotAcceptable(_) => "PGRST107",
                QueryError::InvalidBody(_) => "PGRST102",
                _ => "PGRST100",
            },
            EngineError::Resolve(err) => match err {
                ResolveError::UnknownTable(_) => "PGRST205",
                ResolveError::UnknownRelation { .. } => "PGRST200",
                ResolveError::Ambiguous { .. } => "PGRST201",
                ResolveError::Schema(_) => "PGRST502",
            },
            EngineError::Policy(_) => "PGRST501",
            EngineError::UnknownColumn { .. } => "PGRST204",
            EngineError::RlsViolation { .. } => "42501",
            EngineError::TooManyRows { .. } => "PGRST124",
            EngineError::NotSingular { .. } => "PGRST116",
            EngineError::Exec(_) => "PGRST500",
        }
    }

    /// Message safe to return to the caller. Server-side failures never
    /// echo SQL, policy text or storage errors.
    pub fn public_message(&self) -> String {
        if self.status_code() >= 500 {
            "internal server error".to_string()
        } else {
            self.to_string()
        }
    }

    /// Extra detail for the response body.
    pub fn details(&self) -> Option<String> {
        match self {
            EngineError::Resolve(ResolveError::Ambiguous { hints, .. }) => Some(format!(
                "candidate relationships are disambiguated by: {}",
                hints.join(", ")
            )),
            EngineError::NotSingular { rows } => Some(format!("results contain {} rows", rows)),
            _ => None,
        }
    }

    /// Suggested fix for the response body.
    pub fn hint(&self) -> Option<String> {
        match self {
            EngineError::Resolve(ResolveError::Ambiguous { relation, hints, .. })
                if !hints.is_empty() =>
            {
                let options: Vec<String> = hints
                    .iter()
                    .map(|hint| format!("{}!{}", relation, hint))
                    .collect();
                Some(format!(
                    "try changing '{}' to one of: {}",
                    relation,
                    options.join(", ")
                ))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_are_generic() {
        let err = EngineError::Exec(anyhow::anyhow!("no such column: secret_col in SELECT ..."));
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.public_message(), "internal server error");

        let err = EngineError::Policy(RlsError::PolicyFetch {
            table: "todos".into(),
            reason: "disk I/O error".into(),
        });
        assert_eq!(err.status_code(), 500);
        assert!(!err.public_message().contains("todos"));
    }

    #[test]
    fn test_ambiguous_lists_hints() {
        let err = EngineError::from(ResolveError::Ambiguous {
            table: "messages".into(),
            relation: "users".into(),
            hints: vec!["sender_id".into(), "receiver_id".into()],
        });
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.code(), "PGRST201");
        let details = err.details().unwrap();
        assert!(details.contains("sender_id"));
        assert!(details.contains("receiver_id"));
        assert_eq!(
            err.hint().unwrap(),
            "try changing 'users' to one of: users!sender_id, users!receiver_id"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            EngineError::from(ResolveError::UnknownTable("x".into())).status_code(),
            404
        );
        assert_eq!(
            EngineError::RlsViolation { table: "t".into() }.status_code(),
            403
        );
        assert_eq!(EngineError::NotSingular { rows: 2 }.status_code(), 406);
        assert_eq!(
            EngineError::from(QueryError::InvalidRange("9-1".into())).status_code(),
            416
        );
    }
}
