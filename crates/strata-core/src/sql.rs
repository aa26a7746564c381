//! Identifier quoting and bound parameter values.
//!
//! Identifiers and values never share a code path: identifiers go through
//! [`quote_ident`] / [`quote_ident_always`], values are carried as
//! [`SqlValue`] parameters next to the SQL text and bound by the adapter.

use serde::{Deserialize, Serialize};

/// Words that must be quoted when used as identifiers.
const RESERVED_WORDS: &[&str] = &[
    "abort", "action", "add", "after", "all", "alter", "always", "analyze", "and", "as", "asc",
    "attach", "autoincrement", "before", "begin", "between", "by", "cascade", "case", "cast",
    "check", "collate", "column", "commit", "conflict", "constraint", "create", "cross",
    "current", "current_date", "current_time", "current_timestamp", "current_user", "database",
    "default", "deferrable", "deferred", "delete", "desc", "detach", "distinct", "do", "drop",
    "each", "else", "end", "escape", "except", "exclude", "exclusive", "exists", "explain",
    "fail", "filter", "first", "following", "for", "foreign", "from", "full", "generated",
    "glob", "group", "groups", "having", "if", "ignore", "immediate", "in", "index", "indexed",
    "initially", "inner", "insert", "instead", "intersect", "into", "is", "isnull", "join",
    "key", "last", "left", "like", "limit", "match", "materialized", "natural", "no", "not",
    "nothing", "notnull", "null", "nulls", "of", "offset", "on", "or", "order", "others",
    "outer", "over", "partition", "plan", "pragma", "preceding", "primary", "query", "raise",
    "range", "recursive", "references", "regexp", "reindex", "release", "rename", "replace",
    "restrict", "returning", "right", "rollback", "row", "rows", "savepoint", "select", "set",
    "table", "temp", "temporary", "then", "ties", "to", "transaction", "trigger", "true",
    "false", "unbounded", "union", "unique", "update", "user", "using", "vacuum", "values",
    "view", "virtual", "when", "where", "window", "with", "without",
];

/// Whether `word` is on the reserved-word list (case-insensitive).
pub fn is_reserved_word(word: &str) -> bool {
    RESERVED_WORDS.iter().any(|w| w.eq_ignore_ascii_case(word))
}

fn needs_quoting(name: &str) -> bool {
    name.is_empty()
        || name.starts_with(|c: char| c.is_ascii_digit())
        || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        || is_reserved_word(name)
}

/// Quote `name` only when required.
///
/// Safe identifiers (`[A-Za-z0-9_]`, not starting with a digit, not
/// reserved) are returned unchanged, anything else is wrapped in double
/// quotes with embedded quotes doubled.
pub fn quote_ident(name: &str) -> String {
    if needs_quoting(name) {
        quote_ident_always(name)
    } else {
        name.to_string()
    }
}

/// Unconditionally wrap `name` in double quotes, doubling embedded quotes.
pub fn quote_ident_always(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A value bound as a statement parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    /// Convert a JSON value for binding.
    ///
    /// Booleans become 0/1, objects and arrays are stored as JSON text.
    pub fn from_json(value: &serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Integer(i),
                None => SqlValue::Real(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

/// SQL text with its positional (`?`) parameters, in order of appearance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl BuiltQuery {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}
