//! The steps shared by every method chain: user resolution, the
//! authorization pre-check and notification emission.

use std::sync::Arc;

use serde_json::Value;

use trove_access::AccessLogic;
use trove_core::dispatch::{step, Step};
use trove_core::{ApiError, ResultBuilder};
use trove_notify::ChangedKind;
use trove_storage::prelude::*;

use crate::context::ApiContext;
use crate::helpers;

/// What a method demands from the caller before its own steps run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRequirement {
    /// Target user must exist; no token needed (login, password reset).
    None,
    /// A valid access token of any type.
    Authenticated,
    /// A valid `personal` access.
    Personal,
}

async fn resolve_user(ctx: &mut ApiContext) -> Result<(), ApiError> {
    if ctx.user.is_none() {
        let user = ctx.services.resolve_user(&ctx.username).await?;
        ctx.user = Some(user);
    }
    Ok(())
}

async fn resolve_access(ctx: &mut ApiContext, method_id: &str) -> Result<(), ApiError> {
    if ctx.access.is_some() {
        // Batch sub-calls share the already-authenticated context.
        return Ok(());
    }
    let auth = ctx
        .auth
        .clone()
        .ok_or_else(|| ApiError::invalid_access_token("Missing access token"))?;
    let user_id = ctx.user()?.id.clone();
    let services = ctx.services.clone();

    let access = match services.cache.get_access_by_token(&user_id, &auth.token) {
        Some(access) => access,
        None => {
            let access = services
                .storage
                .accesses
                .get_by_token(&user_id, &auth.token)
                .await
                .map_err(helpers::store_error)?
                .ok_or_else(|| ApiError::invalid_access_token("Unknown access token"))?;
            services.cache.set_access(&user_id, &access);
            services.cache_sync.track(&user_id);
            access
        }
    };
    if access.is_expired(trove_model::time::now()) {
        return Err(ApiError::invalid_access_token("Access has expired"));
    }
    if let Some(custom) = &services.custom_auth {
        use trove_access::CustomAuthError;
        custom
            .check(&access, auth.caller_id.as_deref())
            .await
            .map_err(|e| match e {
                CustomAuthError::Rejected(reason) => ApiError::invalid_access_token(reason),
                CustomAuthError::Failed(reason) => ApiError::unexpected(reason),
            })?;
    }
    // Deferred usage recording; flushed in batches.
    services.usage.record(&user_id, &access.id, method_id);
    ctx.access = Some(AccessLogic::new(access));
    Ok(())
}

/// The authorization pre-check, step 1 of every chain.
pub fn authenticate(
    method_id: &'static str,
    requirement: AuthRequirement,
) -> Arc<dyn Step<ApiContext>> {
    step(move |ctx: &mut ApiContext, _params: &mut Value, _result: &mut ResultBuilder| {
        Box::pin(async move {
            resolve_user(ctx).await?;
            if requirement == AuthRequirement::None {
                return Ok(());
            }
            resolve_access(ctx, method_id).await?;
            if requirement == AuthRequirement::Personal && !ctx.access()?.is_personal() {
                return Err(ApiError::forbidden(
                    "This operation requires a personal access",
                ));
            }
            Ok(())
        })
    })
}

/// Notification emission, the last step of mutating chains. Only reached
/// after the mutation was confirmed by storage.
pub fn emit(kind: ChangedKind) -> Arc<dyn Step<ApiContext>> {
    step(move |ctx: &mut ApiContext, _params: &mut Value, _result: &mut ResultBuilder| {
        Box::pin(async move {
            helpers::notify(ctx, kind).await;
            Ok(())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use serde_json::json;

    #[tokio::test]
    async fn missing_token_is_rejected() {
        let harness = testing::Harness::new().await;
        let mut ctx = harness.context("alice", None);
        let err = harness
            .registry
            .call("events.get", &mut ctx, json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.id, trove_core::ErrorId::InvalidAccessToken);
    }

    #[tokio::test]
    async fn unknown_user_is_a_404() {
        let harness = testing::Harness::new().await;
        let mut ctx = harness.context("nobody", Some("whatever"));
        let err = harness
            .registry
            .call("events.get", &mut ctx, json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.id, trove_core::ErrorId::UnknownResource);
    }

    #[tokio::test]
    async fn expired_access_is_rejected() {
        let harness = testing::Harness::new().await;
        let mut expiring = harness.app_access("alice", vec![]).await;
        expiring.expires = Some(trove_model::time::now() - 10.0);
        let user = harness.user_id("alice").await;
        harness
            .services
            .storage
            .accesses
            .update(&user, expiring.clone())
            .await
            .unwrap();
        let mut ctx = harness.context("alice", Some(&expiring.token));
        let err = harness
            .registry
            .call("events.get", &mut ctx, json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.id, trove_core::ErrorId::InvalidAccessToken);
    }

    #[tokio::test]
    async fn usage_is_recorded_once_per_call() {
        let harness = testing::Harness::new().await;
        let access = harness.app_access("alice", vec![]).await;
        let mut ctx = harness.context("alice", Some(&access.token));
        let _ = harness
            .registry
            .call("events.get", &mut ctx, json!({}))
            .await;
        harness
            .services
            .usage
            .flush(&harness.services.storage)
            .await;
        let user = harness.user_id("alice").await;
        let stored = harness
            .services
            .storage
            .accesses
            .get(&user, &access.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.calls.get("events.get"), Some(&1));
        assert!(stored.last_used.is_some());
    }
}
