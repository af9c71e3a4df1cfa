//! Transport compatibility layers.
//!
//! - URL-encoded bodies with `_auth` / `_method` / `_json` are rewritten to
//!   the equivalent typed request.
//! - The host header's first DNS label, when it matches the username
//!   pattern, substitutes for the username path prefix.
//! - Query strings parse into a JSON map, with repeated keys collected
//!   into arrays.

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderValue, Method, Uri};
use axum::middleware::Next;
use axum::response::Response;
use serde_json::{Map, Value};

/// Parse a raw query string into a params map; repeated keys accumulate
/// into arrays so `streams=a&streams=b` arrives as `["a", "b"]`.
pub fn query_params(query: Option<&str>) -> Map<String, Value> {
    let mut out = Map::new();
    let Some(query) = query else {
        return out;
    };
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        let key = key.into_owned();
        let value = Value::String(value.into_owned());
        match out.get_mut(&key) {
            None => {
                out.insert(key, value);
            }
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                out.insert(key, Value::Array(vec![first, value]));
            }
        }
    }
    out
}

/// Rewrite `application/x-www-form-urlencoded` bodies carrying `_json`,
/// `_method` and `_auth` into the typed request they stand for.
pub async fn urlencoded_compat(req: Request, next: Next) -> Response {
    let is_form = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false);
    if !is_form {
        return next.run(req).await;
    }

    let (mut parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, 1024 * 1024).await {
        Ok(bytes) => bytes,
        Err(_) => return next.run(Request::from_parts(parts, Body::empty())).await,
    };

    let mut json_body: Option<String> = None;
    for (key, value) in form_urlencoded::parse(&bytes) {
        match key.as_ref() {
            "_json" => json_body = Some(value.into_owned()),
            "_method" => {
                if let Ok(method) = value.as_ref().to_ascii_uppercase().parse::<Method>() {
                    parts.method = method;
                }
            }
            "_auth" => {
                if let Ok(header_value) = HeaderValue::from_str(value.as_ref()) {
                    parts.headers.insert(header::AUTHORIZATION, header_value);
                }
            }
            _ => {}
        }
    }

    let body = match json_body {
        Some(json) => {
            parts
                .headers
                .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
            parts.headers.remove(header::CONTENT_LENGTH);
            Body::from(json)
        }
        None => Body::from(bytes),
    };
    next.run(Request::from_parts(parts, body)).await
}

const RESOURCE_ROOTS: &[&str] = &[
    "events",
    "streams",
    "accesses",
    "account",
    "profile",
    "followed-slices",
    "auth",
    "access-info",
    "service",
];

/// When the first host label looks like a username and the path starts at
/// a resource root, prefix the path with that username.
pub async fn host_username_compat(req: Request, next: Next) -> Response {
    let first_segment = req
        .uri()
        .path()
        .trim_start_matches('/')
        .split('/')
        .next()
        .unwrap_or("")
        .to_string();
    if !RESOURCE_ROOTS.contains(&first_segment.as_str()) {
        return next.run(req).await;
    }
    let Some(label) = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .and_then(|host| host.split([':', '.']).next())
        .map(str::to_string)
    else {
        return next.run(req).await;
    };
    if !trove_model::user::is_valid_username(&label) {
        return next.run(req).await;
    }

    let (mut parts, body) = req.into_parts();
    let path_and_query = match parts.uri.query() {
        Some(query) => format!("/{label}{}?{query}", parts.uri.path()),
        None => format!("/{label}{}", parts.uri.path()),
    };
    if let Ok(uri) = Uri::builder().path_and_query(path_and_query).build() {
        parts.uri = uri;
    }
    next.run(Request::from_parts(parts, body)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn repeated_query_keys_become_arrays() {
        let params = query_params(Some("streams=a&streams=b&limit=5"));
        assert_eq!(params["streams"], json!(["a", "b"]));
        assert_eq!(params["limit"], json!("5"));
    }

    #[test]
    fn empty_query_is_empty_map() {
        assert!(query_params(None).is_empty());
        assert!(query_params(Some("")).is_empty());
    }
}
