//! Assembly of a [`ParsedRequest`] from query parameters and headers.

use strata_core::QueryConfig;

use crate::error::QueryError;
use crate::filter::{FilterNode, is_logical_key, parse_filter_param, parse_logical_param};
use crate::order::{OrderSpec, parse_order};
use crate::pagination::{MAX_ROW_INDEX, Pagination, parse_range_header};
use crate::prefer::{Modifiers, parse_accept, split_columns};
use crate::select::{SelectItem, parse_select};

/// Query parameters with a fixed meaning; every other key is a filter.
const RESERVED_PARAMS: &[&str] = &["select", "order", "limit", "offset", "on_conflict"];

/// Request headers that influence parsing.
#[derive(Debug, Clone, Default)]
pub struct RequestHeaders {
    pub range: Option<String>,
    /// Every `Prefer` header value, in arrival order.
    pub prefer: Vec<String>,
    pub accept: Option<String>,
}

/// A fully parsed declarative request against one table.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRequest {
    pub table: String,
    pub select: Vec<SelectItem>,
    /// Implicitly ANDed.
    pub filters: Vec<FilterNode>,
    pub order: Vec<OrderSpec>,
    pub pagination: Pagination,
    pub modifiers: Modifiers,
}

impl ParsedRequest {
    /// Parse a raw (URL-encoded) query string.
    pub fn parse(
        table: &str,
        query: &str,
        headers: &RequestHeaders,
        limits: &QueryConfig,
    ) -> Result<Self, QueryError> {
        let pairs = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect::<Vec<(String, String)>>();
        Self::from_pairs(table, pairs, headers, limits)
    }

    /// Parse already-decoded query pairs. Repeated filter keys are kept.
    pub fn from_pairs(
        table: &str,
        pairs: Vec<(String, String)>,
        headers: &RequestHeaders,
        limits: &QueryConfig,
    ) -> Result<Self, QueryError> {
        let mut select = vec![SelectItem::Star];
        let mut filters = Vec::new();
        let mut order = Vec::new();
        let mut limit = None;
        let mut offset = None;
        let mut modifiers = Modifiers::default();

        for (key, value) in &pairs {
            match key.as_str() {
                "select" => select = parse_select(value, limits.max_select_depth)?,
                "order" => order = parse_order(value)?,
                "limit" => limit = Some(parse_count_param("limit", value)?),
                "offset" => offset = Some(parse_count_param("offset", value)?),
                "on_conflict" => modifiers.on_conflict = split_columns(value),
                key if is_logical_key(key) => {
                    filters.push(parse_logical_param(key, value, limits.max_filter_depth)?)
                }
                key => filters.push(parse_filter_param(key, value)?),
            }
        }

        let range = headers
            .range
            .as_deref()
            .map(parse_range_header)
            .transpose()?;
        let pagination = Pagination::resolve(limit, offset, range)
            .bounded(limits.default_limit, limits.max_rows);

        for prefer in &headers.prefer {
            modifiers.apply_prefer(prefer);
        }
        if let Some(accept) = headers.accept.as_deref() {
            modifiers.format = parse_accept(accept)?;
        }

        Ok(Self {
            table: table.to_string(),
            select,
            filters,
            order,
            pagination,
            modifiers,
        })
    }

    /// A request selecting `*` with no filters.
    pub fn for_table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            select: vec![SelectItem::Star],
            filters: Vec::new(),
            order: Vec::new(),
            pagination: Pagination::default(),
            modifiers: Modifiers::default(),
        }
    }
}

/// Whether `key` has a fixed meaning rather than being a filter.
pub fn is_reserved_param(key: &str) -> bool {
    RESERVED_PARAMS.contains(&key) || is_logical_key(key)
}

fn parse_count_param(name: &str, value: &str) -> Result<u64, QueryError> {
    let n: u64 = value.trim().parse().map_err(|_| QueryError::InvalidParameter {
        name: name.to_string(),
        reason: format!("expected a non-negative integer, got '{}'", value),
    })?;
    if n > MAX_ROW_INDEX {
        return Err(QueryError::InvalidParameter {
            name: name.to_string(),
            reason: format!("must not exceed {}", MAX_ROW_INDEX),
        });
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterOperator, FilterValue};
    use crate::prefer::{CountMode, OutputFormat};
    use pretty_assertions::assert_eq;

    fn limits() -> QueryConfig {
        QueryConfig::default()
    }

    #[test]
    fn test_parse_full_query_string() {
        let headers = RequestHeaders {
            range: None,
            prefer: vec!["count=exact".to_string()],
            accept: Some("text/csv".to_string()),
        };
        let req = ParsedRequest::parse(
            "cities",
            "select=name,country(name)&population=gt.1000&or=(name.like.A*,name.like.B*)&order=name.desc&limit=10&offset=5",
            &headers,
            &limits(),
        )
        .unwrap();

        assert_eq!(req.table, "cities");
        assert_eq!(req.select.len(), 2);
        assert_eq!(req.filters.len(), 2);
        assert_eq!(req.order[0].column, "name");
        assert_eq!(req.pagination, Pagination { offset: 5, limit: Some(10) });
        assert_eq!(req.modifiers.count, CountMode::Exact);
        assert_eq!(req.modifiers.format, OutputFormat::Csv);
    }

    #[test]
    fn test_repeated_filters_kept() {
        let req = ParsedRequest::parse(
            "people",
            "age=gte.18&age=lt.65",
            &RequestHeaders::default(),
            &limits(),
        )
        .unwrap();
        assert_eq!(req.filters.len(), 2);
    }

    #[test]
    fn test_url_decoding() {
        let req = ParsedRequest::parse(
            "people",
            "name=eq.Jos%C3%A9%20Smith",
            &RequestHeaders::default(),
            &limits(),
        )
        .unwrap();
        let FilterNode::Leaf(leaf) = &req.filters[0] else {
            panic!("expected leaf");
        };
        assert_eq!(leaf.operator, FilterOperator::Eq);
        assert_eq!(leaf.value, FilterValue::Scalar("José Smith".into()));
    }

    #[test]
    fn test_range_header_and_limits() {
        let headers = RequestHeaders {
            range: Some("0-49".to_string()),
            ..Default::default()
        };
        let config = QueryConfig {
            max_rows: Some(20),
            ..QueryConfig::default()
        };
        let req = ParsedRequest::parse("t", "", &headers, &config).unwrap();
        assert_eq!(req.pagination, Pagination { offset: 0, limit: Some(20) });
    }

    #[test]
    fn test_invalid_limit() {
        let err =
            ParsedRequest::parse("t", "limit=-1", &RequestHeaders::default(), &limits()).unwrap_err();
        assert!(matches!(err, QueryError::InvalidParameter { .. }));
    }

    #[test]
    fn test_limit_and_offset_beyond_sqlite_bounds() {
        let headers = RequestHeaders::default();
        for query in ["limit=18446744073709551615", "offset=9223372036854775808"] {
            let err = ParsedRequest::parse("t", query, &headers, &limits()).unwrap_err();
            assert!(matches!(err, QueryError::InvalidParameter { .. }), "{}", query);
        }

        let req =
            ParsedRequest::parse("t", "offset=9223372036854775807", &headers, &limits()).unwrap();
        assert_eq!(req.pagination.offset, 9223372036854775807);

        let headers = RequestHeaders {
            range: Some("0-18446744073709551615".to_string()),
            ..Default::default()
        };
        let err = ParsedRequest::parse("t", "", &headers, &limits()).unwrap_err();
        assert!(matches!(err, QueryError::InvalidRange(_)));
    }

    #[test]
    fn test_reserved_params() {
        assert!(is_reserved_param("select"));
        assert!(is_reserved_param("not.or"));
        assert!(!is_reserved_param("name"));
    }
}
