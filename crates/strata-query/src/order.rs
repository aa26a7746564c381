//! The `order=` grammar: `col[.asc|.desc][.nullsfirst|.nullslast]`, with
//! `relation(col)` in place of `col` for ordering by a related column.

use crate::error::QueryError;
use crate::filter::split_top_level;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullsOrder {
    First,
    Last,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpec {
    /// Relation the column belongs to, for `relation(col)`.
    pub relation: Option<String>,
    pub column: String,
    pub direction: Option<Direction>,
    pub nulls: Option<NullsOrder>,
}

impl OrderSpec {
    pub fn column(column: impl Into<String>) -> Self {
        Self {
            relation: None,
            column: column.into(),
            direction: None,
            nulls: None,
        }
    }

    pub fn desc(mut self) -> Self {
        self.direction = Some(Direction::Desc);
        self
    }

    /// SQL suffix such as ` DESC NULLS LAST`.
    pub fn sql_suffix(&self) -> String {
        let mut out = String::new();
        match self.direction {
            Some(Direction::Asc) => out.push_str(" ASC"),
            Some(Direction::Desc) => out.push_str(" DESC"),
            None => {}
        }
        match self.nulls {
            Some(NullsOrder::First) => out.push_str(" NULLS FIRST"),
            Some(NullsOrder::Last) => out.push_str(" NULLS LAST"),
            None => {}
        }
        out
    }
}

/// Parse an `order=` value.
pub fn parse_order(input: &str) -> Result<Vec<OrderSpec>, QueryError> {
    let mut specs = Vec::new();
    for term in split_top_level(input)? {
        let term = term.trim();
        if term.is_empty() {
            return Err(QueryError::parse("order", input, "empty ordering term"));
        }
        specs.push(parse_term(term)?);
    }
    Ok(specs)
}

fn parse_term(term: &str) -> Result<OrderSpec, QueryError> {
    let (target, modifiers) = match term.find('(') {
        Some(open) => {
            let close = term[open..]
                .find(')')
                .map(|i| open + i)
                .ok_or_else(|| QueryError::parse("order", term, "expected ')'"))?;
            let rest = &term[close + 1..];
            let modifiers = match rest.strip_prefix('.') {
                Some(m) => m,
                None if rest.is_empty() => "",
                None => return Err(QueryError::parse("order", term, "unexpected text after ')'")),
            };
            (&term[..=close], modifiers)
        }
        None => term.split_once('.').unwrap_or((term, "")),
    };

    let mut spec = match target.split_once('(') {
        Some((relation, column)) => {
            let column = column.trim_end_matches(')');
            if relation.is_empty() || column.is_empty() || column.contains(['(', ',']) {
                return Err(QueryError::parse("order", term, "expected relation(column)"));
            }
            OrderSpec {
                relation: Some(relation.to_string()),
                ..OrderSpec::column(column)
            }
        }
        None if target.is_empty() => {
            return Err(QueryError::parse("order", term, "missing column"));
        }
        None => OrderSpec::column(target),
    };

    if !modifiers.is_empty() {
        for modifier in modifiers.split('.') {
            match modifier {
                "asc" if spec.direction.is_none() => spec.direction = Some(Direction::Asc),
                "desc" if spec.direction.is_none() => spec.direction = Some(Direction::Desc),
                "nullsfirst" if spec.nulls.is_none() => spec.nulls = Some(NullsOrder::First),
                "nullslast" if spec.nulls.is_none() => spec.nulls = Some(NullsOrder::Last),
                other => {
                    return Err(QueryError::parse(
                        "order",
                        term,
                        format!("unexpected modifier '{}'", other),
                    ));
                }
            }
        }
    }

    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_plain_columns() {
        let specs = parse_order("name,age.desc,score.asc.nullslast").unwrap();
        assert_eq!(specs[0], OrderSpec::column("name"));
        assert_eq!(specs[1], OrderSpec::column("age").desc());
        assert_eq!(specs[2].direction, Some(Direction::Asc));
        assert_eq!(specs[2].nulls, Some(NullsOrder::Last));
        assert_eq!(specs[2].sql_suffix(), " ASC NULLS LAST");
    }

    #[test]
    fn test_relation_column() {
        let specs = parse_order("country(name).desc,id").unwrap();
        assert_eq!(specs[0].relation.as_deref(), Some("country"));
        assert_eq!(specs[0].column, "name");
        assert_eq!(specs[0].direction, Some(Direction::Desc));
        assert_eq!(specs[1], OrderSpec::column("id"));
    }

    #[test]
    fn test_invalid_terms() {
        for bad in ["", "a.sideways", "a.desc.asc", "country(name", "(name)", "rel(a,b)", "rel(a)x"] {
            assert!(parse_order(bad).is_err(), "{bad} should fail");
        }
    }
}
