//! The common response envelope: `{…result, meta}` or `{error, meta}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use trove_core::{ApiError, Meta, TroveConfig};

pub fn meta_for(config: &TroveConfig) -> Value {
    json!(Meta::new(trove_core::API_VERSION, &config.service.serial))
}

/// Render a method result as the success envelope.
pub fn success(config: &TroveConfig, result: Value, status: StatusCode) -> Response {
    let mut map = match result {
        Value::Object(map) => map,
        other => {
            let mut map = serde_json::Map::new();
            map.insert("result".into(), other);
            map
        }
    };
    map.insert("meta".into(), meta_for(config));
    (status, Json(Value::Object(map))).into_response()
}

/// Render a failure envelope; internal details never leave the process.
pub fn failure(config: &TroveConfig, err: &ApiError) -> Response {
    let status = err.id.http_status();
    let body = json!({
        "error": err.public().to_value(),
        "meta": meta_for(config),
    });
    (status, Json(body)).into_response()
}

/// Render a call outcome with the given success status.
pub fn render(
    config: &TroveConfig,
    outcome: Result<Value, ApiError>,
    success_status: StatusCode,
) -> Response {
    match outcome {
        Ok(result) => success(config, result, success_status),
        Err(err) => failure(config, &err),
    }
}
