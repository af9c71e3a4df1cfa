//! Request authority resolution.
//!
//! Order: `Authorization` header, then the `auth` query parameter (refused
//! on attachment routes), with HTTP Basic handled inside the header parser.
//! A `callerid` header supplies the trailing authority when the header form
//! did not.

use axum::http::HeaderMap;

use trove_access::{parse_authorization, AuthPayload};

pub fn resolve(headers: &HeaderMap, query: &serde_json::Map<String, serde_json::Value>) -> Option<AuthPayload> {
    let mut payload = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_authorization)
        .or_else(|| {
            query
                .get("auth")
                .and_then(|v| v.as_str())
                .map(AuthPayload::token_only)
        })?;
    if payload.caller_id.is_none() {
        payload.caller_id = headers
            .get("callerid")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
    }
    Some(payload)
}

/// Strip transport-only parameters before params reach validation.
pub fn strip_transport_params(query: &mut serde_json::Map<String, serde_json::Value>) {
    query.remove("auth");
    query.remove("readToken");
}
