//! Horizontal filtering.
//!
//! Simple filters arrive as query parameters, `column=op.value` or
//! `relation.column=op.value`, where `op` may be prefixed with `not.`.
//! Logical groups arrive as `or=(...)`, `and=(...)`, `not.or=(...)` and
//! `not.and=(...)`; their members use the dotted form `column.op.value` and
//! may nest `and(...)` / `or(...)` groups.

use crate::error::QueryError;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    Ilike,
    In,
    Is,
}

impl FilterOperator {
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "eq" => FilterOperator::Eq,
            "neq" => FilterOperator::Neq,
            "gt" => FilterOperator::Gt,
            "gte" => FilterOperator::Gte,
            "lt" => FilterOperator::Lt,
            "lte" => FilterOperator::Lte,
            "like" => FilterOperator::Like,
            "ilike" => FilterOperator::Ilike,
            "in" => FilterOperator::In,
            "is" => FilterOperator::Is,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "eq",
            FilterOperator::Neq => "neq",
            FilterOperator::Gt => "gt",
            FilterOperator::Gte => "gte",
            FilterOperator::Lt => "lt",
            FilterOperator::Lte => "lte",
            FilterOperator::Like => "like",
            FilterOperator::Ilike => "ilike",
            FilterOperator::In => "in",
            FilterOperator::Is => "is",
        }
    }
}

/// The right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Scalar(String),
    List(Vec<String>),
    Null,
    True,
    False,
}

/// A single comparison, optionally reached through relations.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterLeaf {
    /// Relations traversed before `column`, outermost first.
    pub relation_path: Vec<String>,
    pub column: String,
    pub operator: FilterOperator,
    pub negated: bool,
    pub value: FilterValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

impl LogicalOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            LogicalOp::And => "AND",
            LogicalOp::Or => "OR",
        }
    }
}

/// Filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    Leaf(FilterLeaf),
    Group {
        op: LogicalOp,
        negated: bool,
        children: Vec<FilterNode>,
    },
}

impl FilterNode {
    /// Visit every leaf in the tree.
    pub fn leaves(&self) -> Vec<&FilterLeaf> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a FilterLeaf>) {
        match self {
            FilterNode::Leaf(leaf) => out.push(leaf),
            FilterNode::Group { children, .. } => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
        }
    }
}

/// Whether a query parameter names a logical group.
pub fn is_logical_key(key: &str) -> bool {
    matches!(key, "or" | "and" | "not.or" | "not.and")
}

/// Parse `key=value` where `key` is `column` or `rel.column`.
pub fn parse_filter_param(key: &str, value: &str) -> Result<FilterNode, QueryError> {
    let mut path: Vec<String> = key.split('.').map(str::to_string).collect();
    if path.iter().any(|segment| segment.trim().is_empty()) {
        return Err(QueryError::parse("filter", key, "empty column name"));
    }
    let column = path.pop().unwrap_or_default();

    let (negated, operator, raw) = split_operator(value)
        .ok_or_else(|| QueryError::parse("filter", format!("{}={}", key, value), "unknown operator"))?;
    let value = parse_value(operator, raw, false)
        .map_err(|reason| QueryError::parse("filter", format!("{}={}", key, value), reason))?;

    Ok(FilterNode::Leaf(FilterLeaf {
        relation_path: path,
        column,
        operator,
        negated,
        value,
    }))
}

/// Parse a logical group parameter such as `or=(a.eq.1,b.gt.2)`.
pub fn parse_logical_param(
    key: &str,
    value: &str,
    max_depth: usize,
) -> Result<FilterNode, QueryError> {
    let (negated, op) = match key {
        "or" => (false, LogicalOp::Or),
        "and" => (false, LogicalOp::And),
        "not.or" => (true, LogicalOp::Or),
        "not.and" => (true, LogicalOp::And),
        other => return Err(QueryError::parse("logic tree", other, "unknown logical operator")),
    };
    let body = value
        .trim()
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| QueryError::parse("logic tree", value, "expected '(...)'"))?;

    parse_group(op, negated, body, 1, max_depth)
}

fn parse_group(
    op: LogicalOp,
    negated: bool,
    body: &str,
    depth: usize,
    max_depth: usize,
) -> Result<FilterNode, QueryError> {
    if depth > max_depth {
        return Err(QueryError::DepthExceeded {
            context: "logic tree",
            max: max_depth,
        });
    }

    let mut children = Vec::new();
    for member in split_top_level(body)? {
        let member = member.trim();
        if member.is_empty() {
            return Err(QueryError::parse("logic tree", body, "empty condition"));
        }
        children.push(parse_member(member, depth, max_depth)?);
    }
    if children.is_empty() {
        return Err(QueryError::parse("logic tree", body, "empty group"));
    }

    Ok(FilterNode::Group {
        op,
        negated,
        children,
    })
}

fn parse_member(member: &str, depth: usize, max_depth: usize) -> Result<FilterNode, QueryError> {
    let (negated, rest) = match member.strip_prefix("not.") {
        Some(rest) if rest.starts_with("and(") || rest.starts_with("or(") => (true, rest),
        _ => (false, member),
    };
    for (prefix, op) in [("and(", LogicalOp::And), ("or(", LogicalOp::Or)] {
        if let Some(inner) = rest.strip_prefix(prefix) {
            let inner = inner
                .strip_suffix(')')
                .ok_or_else(|| QueryError::parse("logic tree", member, "expected ')'"))?;
            return parse_group(op, negated, inner, depth + 1, max_depth);
        }
    }

    let segments: Vec<&str> = member.split('.').collect();
    let op_index = (1..segments.len())
        .find(|&i| {
            FilterOperator::from_token(segments[i]).is_some()
                || (segments[i] == "not"
                    && segments
                        .get(i + 1)
                        .is_some_and(|s| FilterOperator::from_token(s).is_some()))
        })
        .ok_or_else(|| QueryError::parse("logic tree", member, "missing operator"))?;

    let mut path: Vec<String> = segments[..op_index].iter().map(|s| s.to_string()).collect();
    if path.iter().any(|segment| segment.trim().is_empty()) {
        return Err(QueryError::parse("logic tree", member, "empty column name"));
    }
    let column = path.pop().unwrap_or_default();

    let op_and_value = segments[op_index..].join(".");
    let (negated, operator, raw) = split_operator(&op_and_value)
        .ok_or_else(|| QueryError::parse("logic tree", member, "unknown operator"))?;
    let value = parse_value(operator, raw, true)
        .map_err(|reason| QueryError::parse("logic tree", member, reason))?;

    Ok(FilterNode::Leaf(FilterLeaf {
        relation_path: path,
        column,
        operator,
        negated,
        value,
    }))
}

/// Split `[not.]op.value` into its parts.
fn split_operator(input: &str) -> Option<(bool, FilterOperator, &str)> {
    let (token, rest) = input.split_once('.').unwrap_or((input, ""));
    if token == "not" {
        let (token, rest) = rest.split_once('.').unwrap_or((rest, ""));
        return FilterOperator::from_token(token).map(|op| (true, op, rest));
    }
    FilterOperator::from_token(token).map(|op| (false, op, rest))
}

fn parse_value(op: FilterOperator, raw: &str, in_group: bool) -> Result<FilterValue, String> {
    match op {
        FilterOperator::In => {
            let inner = raw
                .trim()
                .strip_prefix('(')
                .and_then(|rest| rest.strip_suffix(')'))
                .ok_or_else(|| "in requires a parenthesized list".to_string())?;
            if inner.trim().is_empty() {
                return Ok(FilterValue::List(Vec::new()));
            }
            let items = split_top_level(inner).map_err(|e| e.to_string())?;
            Ok(FilterValue::List(
                items.iter().map(|item| unquote(item.trim())).collect(),
            ))
        }
        FilterOperator::Is => match raw.to_ascii_lowercase().as_str() {
            "null" => Ok(FilterValue::Null),
            "true" => Ok(FilterValue::True),
            "false" => Ok(FilterValue::False),
            other => Err(format!("is expects null, true or false, got '{}'", other)),
        },
        FilterOperator::Like | FilterOperator::Ilike => {
            let value = if in_group { unquote(raw) } else { raw.to_string() };
            Ok(FilterValue::Scalar(value.replace('*', "%")))
        }
        _ => Ok(FilterValue::Scalar(if in_group {
            unquote(raw)
        } else {
            raw.to_string()
        })),
    }
}

/// Split on commas that are not nested in parentheses or double quotes.
pub fn split_top_level(input: &str) -> Result<Vec<String>, QueryError> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth: usize = 0;
    let mut in_quotes = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' if in_quotes => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '(' if !in_quotes => {
                depth += 1;
                current.push(c);
            }
            ')' if !in_quotes => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| QueryError::parse("logic tree", input, "unbalanced ')'"))?;
                current.push(c);
            }
            ',' if !in_quotes && depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }

    if in_quotes {
        return Err(QueryError::parse("logic tree", input, "unterminated quote"));
    }
    if depth != 0 {
        return Err(QueryError::parse("logic tree", input, "unbalanced '('"));
    }
    parts.push(current);
    Ok(parts)
}

/// Strip surrounding double quotes and resolve backslash escapes.
fn unquote(value: &str) -> String {
    let Some(inner) = value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    else {
        return value.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}
