//! `callBatch`: N sub-calls on one authenticated context.

use serde_json::Value;

use trove_core::dispatch::{step, Chain, Registry};
use trove_core::{ApiError, ResultBuilder};

use crate::context::ApiContext;
use crate::steps::{authenticate, AuthRequirement};

pub fn register(registry: &mut Registry<ApiContext>) {
    registry.register(
        "callBatch",
        Chain::new()
            .then(authenticate("callBatch", AuthRequirement::Authenticated))
            .then(step(|c, p, r| Box::pin(call_batch(c, p, r)))),
    );
}

async fn call_batch(
    ctx: &mut ApiContext,
    params: &mut Value,
    result: &mut ResultBuilder,
) -> Result<(), ApiError> {
    let registry = ctx
        .registry
        .clone()
        .ok_or_else(|| ApiError::unexpected("batch executor not wired"))?;
    let calls = trove_core::batch::parse_calls(params.take())?;
    if calls.iter().any(|call| call.method == "callBatch") {
        return Err(ApiError::invalid_operation("Batch calls cannot nest"));
    }
    let results = trove_core::batch::execute(registry.as_ref(), ctx, calls).await;
    result.set("results", Value::Array(results));
    Ok(())
}
