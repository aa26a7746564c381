//! Limit/offset pagination, `Range` request headers and `Content-Range`
//! response headers.

use crate::error::QueryError;

/// Largest row index or count SQLite accepts in `LIMIT`/`OFFSET`.
pub const MAX_ROW_INDEX: u64 = i64::MAX as u64;

/// The requested window of rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    pub offset: u64,
    pub limit: Option<u64>,
}

impl Pagination {
    /// Combine explicit parameters with an optional `Range` header.
    /// Parameters take precedence over the header.
    pub fn resolve(
        limit: Option<u64>,
        offset: Option<u64>,
        range: Option<(u64, Option<u64>)>,
    ) -> Self {
        let (range_offset, range_limit) = match range {
            Some((start, Some(end))) => (
                start,
                Some(end.saturating_sub(start).saturating_add(1).min(MAX_ROW_INDEX)),
            ),
            Some((start, None)) => (start, None),
            None => (0, None),
        };
        Self {
            offset: offset.unwrap_or(range_offset),
            limit: limit.or(range_limit),
        }
    }

    /// Clamp the limit to `max_rows` and apply `default_limit` when unset.
    pub fn bounded(mut self, default_limit: Option<u64>, max_rows: Option<u64>) -> Self {
        if self.limit.is_none() {
            self.limit = default_limit;
        }
        if let Some(max) = max_rows {
            self.limit = Some(self.limit.map_or(max, |l| l.min(max)));
        }
        self
    }

    /// Whether a response with `returned` rows covers only part of the
    /// result set.
    ///
    /// With a known `total` this is exact. Without one, a full window under
    /// an explicit limit is taken to mean more rows may follow.
    pub fn is_partial(&self, returned: u64, total: Option<u64>) -> bool {
        match total {
            Some(total) => self.offset > 0 || self.offset + returned < total,
            None => self.offset > 0 || self.limit.is_some_and(|l| l > 0 && returned >= l),
        }
    }

    /// `Content-Range` value for a response with `returned` rows.
    pub fn content_range(&self, returned: u64, total: Option<u64>) -> String {
        let total = total.map_or_else(|| "*".to_string(), |t| t.to_string());
        if returned == 0 {
            format!("*/{}", total)
        } else {
            format!("{}-{}/{}", self.offset, self.offset + returned - 1, total)
        }
    }
}

/// Parse a `Range` header value: `0-24`, `10-`, or `items=0-24`.
pub fn parse_range_header(value: &str) -> Result<(u64, Option<u64>), QueryError> {
    let spec = value.trim();
    let spec = spec.strip_prefix("items=").unwrap_or(spec);
    let (start, end) = spec
        .split_once('-')
        .ok_or_else(|| QueryError::InvalidRange(value.to_string()))?;

    let index = |text: &str| {
        text.parse::<u64>()
            .ok()
            .filter(|n| *n <= MAX_ROW_INDEX)
            .ok_or_else(|| QueryError::InvalidRange(value.to_string()))
    };

    let start = index(start.trim())?;
    let end = match end.trim() {
        "" => None,
        end => {
            let end = index(end)?;
            if end < start {
                return Err(QueryError::InvalidRange(value.to_string()));
            }
            Some(end)
        }
    };
    Ok((start, end))
}
