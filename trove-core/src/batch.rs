//! The batch executor.
//!
//! `callBatch` runs N sub-calls sequentially on one authenticated context.
//! A failing sub-call lands as `{error}` at its index and the batch carries
//! on; streamed sub-results are materialized before joining the combined
//! envelope, and `meta` only ever appears on the outer envelope.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::dispatch::Registry;
use crate::error::ApiError;

/// One sub-call of a batch request.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchCall {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Parse the params of a `callBatch` request.
pub fn parse_calls(params: Value) -> Result<Vec<BatchCall>, ApiError> {
    serde_json::from_value(params).map_err(|e| {
        ApiError::invalid_request_structure(format!("Malformed batch call array: {e}"))
    })
}

/// Execute sub-calls in order on the shared context.
pub async fn execute<C: Send + 'static>(
    registry: &Registry<C>,
    ctx: &mut C,
    calls: Vec<BatchCall>,
) -> Vec<Value> {
    let mut results = Vec::with_capacity(calls.len());
    for call in calls {
        match registry.call(&call.method, ctx, call.params).await {
            Ok(result) => results.push(result),
            Err(err) => results.push(json!({ "error": err.public().to_value() })),
        }
    }
    results
}
