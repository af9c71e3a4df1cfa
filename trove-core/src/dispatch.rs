//! The method dispatcher.
//!
//! A method is an ordered list of steps sharing a mutable context, params
//! object and result builder. The driver runs steps sequentially and
//! short-circuits on the first error. The transport adapters (HTTP,
//! WebSocket, batch) all call through here, so a method behaves identically
//! regardless of how it arrived.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::error::ApiError;
use crate::result::ResultBuilder;

/// One pipeline step. Steps are independently testable; side effects go
/// through collaborators captured at registration time.
#[async_trait]
pub trait Step<C: Send + 'static>: Send + Sync {
    async fn run(
        &self,
        ctx: &mut C,
        params: &mut Value,
        result: &mut ResultBuilder,
    ) -> Result<(), ApiError>;
}

/// Adapter turning an async closure into a [`Step`].
pub struct FnStep<F>(F);

#[async_trait]
impl<C, F> Step<C> for FnStep<F>
where
    C: Send + 'static,
    F: for<'a> Fn(
            &'a mut C,
            &'a mut Value,
            &'a mut ResultBuilder,
        ) -> BoxFuture<'a, Result<(), ApiError>>
        + Send
        + Sync,
{
    async fn run(
        &self,
        ctx: &mut C,
        params: &mut Value,
        result: &mut ResultBuilder,
    ) -> Result<(), ApiError> {
        (self.0)(ctx, params, result).await
    }
}

/// Wrap an async closure as a step.
///
/// ```ignore
/// chain.then(step(|ctx, params, result| Box::pin(async move {
///     result.set("ok", serde_json::json!(true));
///     Ok(())
/// })));
/// ```
pub fn step<C, F>(f: F) -> Arc<dyn Step<C>>
where
    C: Send + 'static,
    F: for<'a> Fn(
            &'a mut C,
            &'a mut Value,
            &'a mut ResultBuilder,
        ) -> BoxFuture<'a, Result<(), ApiError>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnStep(f))
}

/// An ordered list of steps registered under one method id.
pub struct Chain<C> {
    steps: Vec<Arc<dyn Step<C>>>,
}

impl<C: Send + 'static> Chain<C> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn then(mut self, step: Arc<dyn Step<C>>) -> Self {
        self.steps.push(step);
        self
    }

    pub async fn run(
        &self,
        ctx: &mut C,
        params: &mut Value,
        result: &mut ResultBuilder,
    ) -> Result<(), ApiError> {
        for step in &self.steps {
            step.run(ctx, params, result).await?;
        }
        Ok(())
    }
}

impl<C: Send + 'static> Default for Chain<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// The method registry: method id → chain, plus the per-call limits every
/// chain runs under.
pub struct Registry<C> {
    methods: HashMap<String, Chain<C>>,
    array_limit: usize,
    time_budget: Duration,
}

impl<C: Send + 'static> Registry<C> {
    pub fn new(array_limit: usize, time_budget: Duration) -> Self {
        Self {
            methods: HashMap::new(),
            array_limit,
            time_budget,
        }
    }

    pub fn register(&mut self, method_id: &str, chain: Chain<C>) {
        self.methods.insert(method_id.to_string(), chain);
    }

    pub fn has(&self, method_id: &str) -> bool {
        self.methods.contains_key(method_id)
    }

    pub fn method_ids(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Run one call to completion, returning the serialized result object.
    pub async fn call(
        &self,
        method_id: &str,
        ctx: &mut C,
        mut params: Value,
    ) -> Result<Value, ApiError> {
        let chain = self
            .methods
            .get(method_id)
            .ok_or_else(|| ApiError::unknown_resource("method", method_id))?;
        if !params.is_object() && !params.is_array() {
            params = Value::Object(serde_json::Map::new());
        }
        let mut result = ResultBuilder::new(self.array_limit);
        match tokio::time::timeout(self.time_budget, chain.run(ctx, &mut params, &mut result))
            .await
        {
            Ok(Ok(())) => Ok(result.into_value()),
            Ok(Err(err)) => Err(err),
            // Wall-clock budget exceeded: resource-limit category.
            Err(_) => {
                tracing::warn!(method_id, "method exceeded its time budget");
                Err(ApiError::new(
                    crate::error::ErrorId::TooManyResults,
                    format!("Method {method_id} exceeded its time budget; narrow the query"),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Ctx {
        trace: Vec<&'static str>,
    }

    fn registry() -> Registry<Ctx> {
        Registry::new(100, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn steps_run_in_order() {
        let mut reg = registry();
        reg.register(
            "test.run",
            Chain::new()
                .then(step(|ctx: &mut Ctx, _p, _r| {
                    Box::pin(async move {
                        ctx.trace.push("first");
                        Ok(())
                    })
                }))
                .then(step(|ctx: &mut Ctx, _p, result| {
                    Box::pin(async move {
                        ctx.trace.push("second");
                        result.set("ok", json!(true));
                        Ok(())
                    })
                })),
        );
        let mut ctx = Ctx { trace: Vec::new() };
        let out = reg.call("test.run", &mut ctx, json!({})).await.unwrap();
        assert_eq!(ctx.trace, vec!["first", "second"]);
        assert_eq!(out, json!({"ok": true}));
    }

    #[tokio::test]
    async fn first_error_short_circuits() {
        let mut reg = registry();
        reg.register(
            "test.fail",
            Chain::new()
                .then(step(|_c: &mut Ctx, _p, _r| {
                    Box::pin(async move { Err(ApiError::forbidden("no")) })
                }))
                .then(step(|ctx: &mut Ctx, _p, _r| {
                    Box::pin(async move {
                        ctx.trace.push("unreachable");
                        Ok(())
                    })
                })),
        );
        let mut ctx = Ctx { trace: Vec::new() };
        let err = reg.call("test.fail", &mut ctx, json!({})).await.unwrap_err();
        assert_eq!(err.id, crate::error::ErrorId::Forbidden);
        assert!(ctx.trace.is_empty());
    }

    #[tokio::test]
    async fn unknown_method_is_reported() {
        let reg = registry();
        let mut ctx = Ctx { trace: Vec::new() };
        let err = reg.call("no.such", &mut ctx, json!({})).await.unwrap_err();
        assert_eq!(err.id, crate::error::ErrorId::UnknownResource);
    }

    #[tokio::test]
    async fn time_budget_is_enforced() {
        let mut reg = Registry::new(100, Duration::from_millis(20));
        reg.register(
            "test.slow",
            Chain::new().then(step(|_c: &mut Ctx, _p, _r| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                })
            })),
        );
        let mut ctx = Ctx { trace: Vec::new() };
        let err = reg.call("test.slow", &mut ctx, json!({})).await.unwrap_err();
        assert_eq!(err.id, crate::error::ErrorId::TooManyResults);
    }

    #[tokio::test]
    async fn steps_can_rewrite_params() {
        let mut reg = registry();
        reg.register(
            "test.rewrite",
            Chain::new()
                .then(step(|_c: &mut Ctx, params, _r| {
                    Box::pin(async move {
                        params["limit"] = json!(20);
                        Ok(())
                    })
                }))
                .then(step(|_c: &mut Ctx, params, result| {
                    Box::pin(async move {
                        result.set("limit", params["limit"].clone());
                        Ok(())
                    })
                })),
        );
        let mut ctx = Ctx { trace: Vec::new() };
        let out = reg.call("test.rewrite", &mut ctx, json!({})).await.unwrap();
        assert_eq!(out["limit"], json!(20));
    }
}
