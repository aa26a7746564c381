//! Response rendering for the negotiated output format.

use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::Response;
use serde_json::Value;
use strata_query::{OutputFormat, ParsedRequest};
use strata_runtime::{EngineError, JsonRow, ReadOutput, WriteResult};

use crate::error::ApiError;

/// Render a read: 206 when the window covers only part of the result.
pub fn read_response(req: &ParsedRequest, output: ReadOutput) -> Result<Response, ApiError> {
    let (rows, total) = match output {
        ReadOutput::Explain(plan) => {
            return build(StatusCode::OK, OutputFormat::Json, None, json_body(plan)?);
        }
        ReadOutput::Rows { rows, total } => (rows, total),
    };

    let returned = rows.len() as u64;
    let status = if req.pagination.is_partial(returned, total) {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    let range = req.pagination.content_range(returned, total);
    let body = render(req.modifiers.format, rows)?;
    build(status, req.modifiers.format, Some(range), body)
}

/// Render a write: 201 for inserts, 200 with a representation, else 204.
pub fn write_response(
    req: &ParsedRequest,
    result: WriteResult,
    created: bool,
) -> Result<Response, ApiError> {
    let format = req.modifiers.format;
    match result.rows {
        Some(rows) => {
            let status = if created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            let range = write_range(result.affected);
            build(status, format, Some(range), render(format, rows)?)
        }
        None if created => build(
            StatusCode::CREATED,
            format,
            Some(write_range(result.affected)),
            String::new(),
        ),
        None => build(
            StatusCode::NO_CONTENT,
            format,
            Some(write_range(result.affected)),
            String::new(),
        ),
    }
}

/// `Content-Range` of a write: `*/<affected>`.
fn write_range(affected: u64) -> String {
    format!("*/{}", affected)
}

fn build(
    status: StatusCode,
    format: OutputFormat,
    range: Option<String>,
    body: String,
) -> Result<Response, ApiError> {
    let mut response = Response::builder().status(status);
    if status != StatusCode::NO_CONTENT {
        response = response.header(header::CONTENT_TYPE, format.content_type());
    }
    if let Some(range) = range {
        response = response.header(header::CONTENT_RANGE, range);
    }
    response
        .body(Body::from(body))
        .map_err(|e| ApiError::Encode(e.into()))
}

/// Serialize rows in `format`.
pub fn render(format: OutputFormat, rows: Vec<JsonRow>) -> Result<String, ApiError> {
    match format {
        OutputFormat::Json => json_body(rows),
        OutputFormat::Csv => to_csv(&rows).map_err(ApiError::Encode),
        OutputFormat::SingleObject => {
            if rows.len() != 1 {
                return Err(EngineError::NotSingular { rows: rows.len() }.into());
            }
            let row = rows.into_iter().next().unwrap_or_default();
            serde_json::to_string(&row).map_err(|e| ApiError::Encode(e.into()))
        }
    }
}

fn json_body(rows: Vec<JsonRow>) -> Result<String, ApiError> {
    serde_json::to_string(&rows).map_err(|e| ApiError::Encode(e.into()))
}

/// Flat CSV of the top-level rows. The header comes from the first row;
/// embedded objects and arrays are written as JSON text in their cell.
pub fn to_csv(rows: &[JsonRow]) -> anyhow::Result<String> {
    let Some(first) = rows.first() else {
        return Ok(String::new());
    };
    let columns: Vec<&String> = first.keys().collect();

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(columns.iter().map(|c| c.as_str()))?;
    for row in rows {
        writer.write_record(columns.iter().map(|c| cell(row.get(c.as_str()))))?;
    }
    let bytes = writer.into_inner().map_err(|e| anyhow::anyhow!(e.to_string()))?;
    Ok(String::from_utf8(bytes)?)
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
