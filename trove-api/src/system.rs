//! The admin surface: user provisioning and per-user stats.
//!
//! These methods authenticate with the configured admin key instead of an
//! access token; a wrong key reads as "no such endpoint" (404).

use garde::Validate;
use serde::Deserialize;
use serde_json::{json, Value};

use trove_core::dispatch::{step, Chain, Registry};
use trove_core::{ApiError, ResultBuilder};
use trove_model::{user as user_rules, StorageUsed, User};
use trove_storage::prelude::*;

use crate::context::ApiContext;
use crate::helpers::{self, parse};

pub fn register(registry: &mut Registry<ApiContext>) {
    registry.register(
        "system.createUser",
        Chain::new()
            .then(step(|c, p, r| Box::pin(check_admin_key(c, p, r, false))))
            .then(step(|c, p, r| Box::pin(create_user(c, p, r)))),
    );
    registry.register(
        "system.getUserInfo",
        Chain::new()
            .then(step(|c, p, r| Box::pin(check_admin_key(c, p, r, false))))
            .then(step(|c, p, r| Box::pin(user_info(c, p, r)))),
    );
    registry.register(
        "system.clearMfa",
        Chain::new()
            .then(step(|c, p, r| Box::pin(check_admin_key(c, p, r, true))))
            .then(step(|c, p, r| Box::pin(clear_mfa(c, p, r)))),
    );
}

/// Admin key check. `as_unauthorized` picks the 401 flavor (MFA route);
/// otherwise a wrong key is indistinguishable from a missing endpoint.
async fn check_admin_key(
    ctx: &mut ApiContext,
    _params: &mut Value,
    _result: &mut ResultBuilder,
    as_unauthorized: bool,
) -> Result<(), ApiError> {
    let configured = &ctx.services.config.auth.admin_key;
    let presented = ctx.auth.as_ref().map(|a| a.token.as_str());
    if !configured.is_empty() && presented == Some(configured.as_str()) {
        return Ok(());
    }
    if as_unauthorized {
        Err(ApiError::invalid_access_token("Invalid admin key"))
    } else {
        Err(ApiError::new(
            trove_core::ErrorId::UnknownResource,
            "Unknown resource",
        ))
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct CreateUserParams {
    #[garde(custom(valid_username))]
    username: String,
    #[garde(length(min = 6))]
    password: String,
    #[garde(custom(valid_email))]
    email: String,
    #[garde(inner(custom(valid_language)))]
    #[serde(default)]
    language: Option<String>,
}

fn valid_username(value: &str, _ctx: &()) -> garde::Result {
    if user_rules::is_valid_username(value) {
        Ok(())
    } else {
        Err(garde::Error::new(
            "username must be 5-23 lowercase alphanumerics or dashes",
        ))
    }
}

fn valid_email(value: &str, _ctx: &()) -> garde::Result {
    if user_rules::is_valid_email(value) {
        Ok(())
    } else {
        Err(garde::Error::new("invalid email address"))
    }
}

fn valid_language(value: &str, _ctx: &()) -> garde::Result {
    if user_rules::is_valid_language(value) {
        Ok(())
    } else {
        Err(garde::Error::new("language must be 1-5 characters"))
    }
}

async fn create_user(
    ctx: &mut ApiContext,
    params: &mut Value,
    result: &mut ResultBuilder,
) -> Result<(), ApiError> {
    let p: CreateUserParams = helpers::parse_validated(params)?;
    let now = trove_model::time::now();
    let user = User {
        id: trove_model::id::generate(),
        username: p.username.clone(),
        email: p.email.clone(),
        language: p.language.unwrap_or_else(|| "en".to_string()),
        storage_used: StorageUsed::default(),
        created: now,
        modified: now,
    };
    ctx.services
        .storage
        .users
        .create(user.clone())
        .await
        .map_err(helpers::store_error)?;
    ctx.services
        .storage
        .passwords
        .set(&user.id, &p.password)
        .await
        .map_err(helpers::store_error)?;
    ctx.services.storage.mailer.send_welcome(&user).await;
    result.set("user", json!({ "id": user.id, "username": user.username }));
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct UserInfoParams {
    username: String,
}

async fn user_info(
    ctx: &mut ApiContext,
    params: &mut Value,
    result: &mut ResultBuilder,
) -> Result<(), ApiError> {
    let p: UserInfoParams = parse(params)?;
    let user = ctx
        .services
        .storage
        .users
        .get_by_username(&p.username)
        .await
        .map_err(helpers::store_error)?
        .ok_or_else(|| ApiError::unknown_resource("user", &p.username))?;
    let events = ctx
        .services
        .storage
        .events
        .count(&user.id)
        .await
        .map_err(helpers::store_error)?;
    let accesses = ctx
        .services
        .storage
        .accesses
        .all(&user.id)
        .await
        .map_err(helpers::store_error)?;
    result.set(
        "userInfo",
        json!({
            "username": user.username,
            "storageUsed": user.storage_used,
            "eventsCount": events,
            "accessesCount": accesses.len(),
            "lastAccess": accesses
                .iter()
                .filter_map(|a| a.last_used)
                .fold(None::<f64>, |acc, t| Some(acc.map_or(t, |m| m.max(t)))),
        }),
    );
    Ok(())
}

async fn clear_mfa(
    ctx: &mut ApiContext,
    params: &mut Value,
    _result: &mut ResultBuilder,
) -> Result<(), ApiError> {
    let p: UserInfoParams = parse(params)?;
    // MFA state lives with the (external) identity provider; clearing is a
    // validated no-op against this storage.
    ctx.services
        .storage
        .users
        .get_by_username(&p.username)
        .await
        .map_err(helpers::store_error)?
        .ok_or_else(|| ApiError::unknown_resource("user", &p.username))?;
    Ok(())
}
