//! Caller identity.
//!
//! Credentials are verified upstream. A trusted gateway forwards the
//! verified identity in `x-strata-*` headers; without them, or when the
//! server does not trust them, the request runs as the anonymous role.

use axum::http::HeaderMap;
use strata_core::AuthContext;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-strata-user-id";
pub const ROLE_HEADER: &str = "x-strata-role";
pub const EMAIL_HEADER: &str = "x-strata-email";
/// A JSON object of extra claims.
pub const CLAIMS_HEADER: &str = "x-strata-claims";

const DEFAULT_USER_ROLE: &str = "authenticated";

/// Build the caller's [`AuthContext`] from request headers.
pub fn auth_context(headers: &HeaderMap, trusted: bool) -> Result<AuthContext, ApiError> {
    if !trusted {
        return Ok(AuthContext::anonymous());
    }
    let Some(user_id) = header_text(headers, USER_ID_HEADER)? else {
        return Ok(AuthContext::anonymous());
    };

    let role = header_text(headers, ROLE_HEADER)?.unwrap_or_else(|| DEFAULT_USER_ROLE.to_string());
    let mut ctx = AuthContext::user(user_id, role);
    if let Some(email) = header_text(headers, EMAIL_HEADER)? {
        ctx = ctx.with_email(email);
    }
    if let Some(raw) = header_text(headers, CLAIMS_HEADER)? {
        let claims: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&raw)
            .map_err(|e| ApiError::InvalidIdentity {
                header: CLAIMS_HEADER,
                reason: e.to_string(),
            })?;
        for (key, value) in claims {
            ctx = ctx.with_claim(key, value);
        }
    }
    Ok(ctx)
}

fn header_text(headers: &HeaderMap, name: &'static str) -> Result<Option<String>, ApiError> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    let text = value.to_str().map_err(|e| ApiError::InvalidIdentity {
        header: name,
        reason: e.to_string(),
    })?;
    let text = text.trim();
    Ok((!text.is_empty()).then(|| text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_untrusted_headers_are_ignored() {
        let ctx = auth_context(&headers(&[(USER_ID_HEADER, "u1")]), false).unwrap();
        assert_eq!(ctx, AuthContext::anonymous());
    }

    #[test]
    fn test_missing_user_is_anonymous() {
        let ctx = auth_context(&headers(&[(ROLE_HEADER, "admin")]), true).unwrap();
        assert_eq!(ctx, AuthContext::anonymous());
    }

    #[test]
    fn test_full_identity() {
        let ctx = auth_context(
            &headers(&[
                (USER_ID_HEADER, "u1"),
                (EMAIL_HEADER, "a@example.com"),
                (CLAIMS_HEADER, r#"{"org_id": "o7"}"#),
            ]),
            true,
        )
        .unwrap();
        assert_eq!(ctx.user_id, "u1");
        assert_eq!(ctx.role, "authenticated");
        assert_eq!(ctx.email, "a@example.com");
        assert_eq!(ctx.claims.get("org_id"), Some(&json!("o7")));
    }

    #[test]
    fn test_malformed_claims_rejected() {
        let err = auth_context(
            &headers(&[(USER_ID_HEADER, "u1"), (CLAIMS_HEADER, "[1, 2]")]),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::InvalidIdentity { header: CLAIMS_HEADER, .. }));
    }
}
