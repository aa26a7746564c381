//! Response modifiers carried by the `Prefer` and `Accept` headers.

use crate::error::QueryError;

/// `Prefer: count=...`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CountMode {
    #[default]
    None,
    Exact,
    Planned,
    Estimated,
}

/// `Prefer: resolution=...` for upserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    MergeDuplicates,
    IgnoreDuplicates,
}

/// `Prefer: return=...` for writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReturnPreference {
    #[default]
    Minimal,
    Representation,
}

/// Response body format chosen from `Accept`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
    /// `application/vnd.pgrst.object+json`: exactly one row, unwrapped.
    SingleObject,
}

impl OutputFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Json => "application/json; charset=utf-8",
            OutputFormat::Csv => "text/csv; charset=utf-8",
            OutputFormat::SingleObject => "application/vnd.pgrst.object+json; charset=utf-8",
        }
    }
}

/// Switches carried alongside the parsed query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Modifiers {
    pub count: CountMode,
    pub format: OutputFormat,
    pub explain: bool,
    pub resolution: Option<Resolution>,
    pub on_conflict: Vec<String>,
    pub returning: ReturnPreference,
}

impl Modifiers {
    /// Apply one `Prefer` header value. Unknown preferences are ignored.
    pub fn apply_prefer(&mut self, header: &str) {
        for token in header.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (key, value) = token.split_once('=').unwrap_or((token, ""));
            match (key.trim(), value.trim()) {
                ("count", "exact") => self.count = CountMode::Exact,
                ("count", "planned") => self.count = CountMode::Planned,
                ("count", "estimated") => self.count = CountMode::Estimated,
                ("count", "none") => self.count = CountMode::None,
                ("resolution", "merge-duplicates") => {
                    self.resolution = Some(Resolution::MergeDuplicates)
                }
                ("resolution", "ignore-duplicates") => {
                    self.resolution = Some(Resolution::IgnoreDuplicates)
                }
                ("return", "representation") => self.returning = ReturnPreference::Representation,
                ("return", "minimal") => self.returning = ReturnPreference::Minimal,
                ("on-conflict", cols) => self.on_conflict = split_columns(cols),
                ("explain", "") | ("explain", "true") => self.explain = true,
                (other, _) => tracing::debug!(preference = other, "Ignoring unknown preference"),
            }
        }
    }

    /// Whether the total row count must be computed.
    pub fn wants_count(&self) -> bool {
        self.count != CountMode::None
    }
}

/// Comma-separated column list, as in `on_conflict=a,b`.
pub fn split_columns(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// Choose the output format from an `Accept` header.
///
/// Media ranges are tried in order of their `q` weight; `*/*` and
/// `application/*` fall back to JSON.
pub fn parse_accept(header: &str) -> Result<OutputFormat, QueryError> {
    let mut ranges: Vec<(f32, usize, &str)> = header
        .split(',')
        .enumerate()
        .filter_map(|(i, part)| {
            let mut pieces = part.split(';');
            let media = pieces.next()?.trim();
            if media.is_empty() {
                return None;
            }
            let q = pieces
                .filter_map(|p| p.trim().strip_prefix("q="))
                .find_map(|q| q.parse::<f32>().ok())
                .unwrap_or(1.0);
            Some((q, i, media))
        })
        .collect();
    ranges.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

    for (q, _, media) in ranges {
        if q <= 0.0 {
            continue;
        }
        let format = match media.to_ascii_lowercase().as_str() {
            "application/json" | "application/*" | "*/*" => OutputFormat::Json,
            "text/csv" => OutputFormat::Csv,
            "application/vnd.pgrst.object+json" | "application/vnd.pgrst.object" => {
                OutputFormat::SingleObject
            }
            _ => continue,
        };
        return Ok(format);
    }

    if header.trim().is_empty() {
        return Ok(OutputFormat::Json);
    }
    Err(QueryError::NotAcceptable(header.to_string()))
}
