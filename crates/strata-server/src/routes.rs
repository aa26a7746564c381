//! Request handlers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, RawQuery, State};
use axum::http::{HeaderMap, header};
use axum::response::Response;
use serde_json::{Value, json};
use strata_query::{ParsedRequest, QueryError, RequestHeaders};

use crate::auth::auth_context;
use crate::error::ApiError;
use crate::response::{read_response, write_response};
use crate::state::AppState;

pub async fn healthz() -> Json<Value> {
    Json(json!({ "ok": true, "service": "strata" }))
}

/// `GET /{table}`
pub async fn read_rows(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ctx = auth_context(&headers, state.config.server.trusted_auth_headers)?;
    let req = parse_request(&state, &table, query, &headers)?;
    let output = state.engine.read(&req, &ctx).await?;
    read_response(&req, output)
}

/// `POST /{table}`: insert or upsert.
pub async fn insert_rows(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let ctx = auth_context(&headers, state.config.server.trusted_auth_headers)?;
    let req = parse_request(&state, &table, query, &headers)?;
    let body = parse_body(&body)?;
    let result = state.engine.insert(&req, &body, &ctx).await?;
    tracing::info!(table = %table, affected = result.affected, "Inserted rows");
    write_response(&req, result, true)
}

/// `PATCH /{table}`
pub async fn update_rows(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let ctx = auth_context(&headers, state.config.server.trusted_auth_headers)?;
    let req = parse_request(&state, &table, query, &headers)?;
    let body = parse_body(&body)?;
    let result = state.engine.update(&req, &body, &ctx).await?;
    tracing::info!(table = %table, affected = result.affected, "Updated rows");
    write_response(&req, result, false)
}

/// `DELETE /{table}`
pub async fn delete_rows(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ctx = auth_context(&headers, state.config.server.trusted_auth_headers)?;
    let req = parse_request(&state, &table, query, &headers)?;
    let result = state.engine.delete(&req, &ctx).await?;
    tracing::info!(table = %table, affected = result.affected, "Deleted rows");
    write_response(&req, result, false)
}

/// `POST /_strata/schema/invalidate[?table=t]`: drop cached schema and
/// relationships after a migration. Restricted to the configured admin role.
pub async fn invalidate_schema(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let ctx = auth_context(&headers, state.config.server.trusted_auth_headers)?;
    if ctx.role != state.config.server.admin_role {
        return Err(ApiError::Forbidden(ctx.role));
    }

    let resolver = state.engine.resolver();
    let body = match params.get("table") {
        Some(table) => {
            resolver.invalidate(table).await;
            json!({ "invalidated": table })
        }
        None => {
            resolver.invalidate_all().await;
            json!({ "invalidated": "*" })
        }
    };
    Ok(Json(body))
}

fn parse_request(
    state: &AppState,
    table: &str,
    query: Option<String>,
    headers: &HeaderMap,
) -> Result<ParsedRequest, ApiError> {
    let request_headers = RequestHeaders {
        range: header_value(headers, header::RANGE.as_str()),
        prefer: headers
            .get_all("prefer")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect(),
        accept: header_value(headers, header::ACCEPT.as_str()),
    };
    Ok(ParsedRequest::parse(
        table,
        query.as_deref().unwrap_or_default(),
        &request_headers,
        &state.config.query,
    )?)
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn parse_body(body: &[u8]) -> Result<Value, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(QueryError::InvalidBody("empty request body".to_string()).into());
    }
    serde_json::from_slice(body)
        .map_err(|e| QueryError::InvalidBody(e.to_string()).into())
}
