//! Account operations and personal sessions.

use garde::Validate;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

use trove_core::dispatch::{step, Chain, Registry};
use trove_core::{ApiError, ResultBuilder};
use trove_model::{user as user_rules, Access, AccessType, Deletion};
use trove_notify::ChangedKind;
use trove_storage::prelude::*;

use crate::context::ApiContext;
use crate::helpers::{self, parse};
use crate::steps::{authenticate, emit, AuthRequirement};

const MIN_PASSWORD_LENGTH: usize = 6;

pub fn register(registry: &mut Registry<ApiContext>) {
    registry.register(
        "auth.login",
        Chain::new()
            .then(authenticate("auth.login", AuthRequirement::None))
            .then(step(|c, p, r| Box::pin(login(c, p, r))))
            .then(emit(ChangedKind::Accesses)),
    );
    registry.register(
        "auth.logout",
        Chain::new()
            .then(authenticate("auth.logout", AuthRequirement::Personal))
            .then(step(|c, p, r| Box::pin(logout(c, p, r))))
            .then(emit(ChangedKind::Accesses)),
    );
    registry.register(
        "account.get",
        Chain::new()
            .then(authenticate("account.get", AuthRequirement::Personal))
            .then(step(|c, p, r| Box::pin(get(c, p, r)))),
    );
    registry.register(
        "account.update",
        Chain::new()
            .then(authenticate("account.update", AuthRequirement::Personal))
            .then(step(|c, p, r| Box::pin(update(c, p, r))))
            .then(emit(ChangedKind::Account)),
    );
    registry.register(
        "account.changePassword",
        Chain::new()
            .then(authenticate("account.changePassword", AuthRequirement::Personal))
            .then(step(|c, p, r| Box::pin(change_password(c, p, r)))),
    );
    registry.register(
        "account.requestPasswordReset",
        Chain::new()
            .then(authenticate("account.requestPasswordReset", AuthRequirement::None))
            .then(step(|c, p, r| Box::pin(request_password_reset(c, p, r)))),
    );
    registry.register(
        "account.resetPassword",
        Chain::new()
            .then(authenticate("account.resetPassword", AuthRequirement::None))
            .then(step(|c, p, r| Box::pin(reset_password(c, p, r)))),
    );
}

/// App requests (login, password reset) must present a non-empty app id
/// from a trusted origin.
fn check_trusted_app(ctx: &ApiContext, app_id: &str) -> Result<(), ApiError> {
    if app_id.trim().is_empty() {
        return Err(ApiError::invalid_credentials());
    }
    let trusted = &ctx.services.config.auth.trusted_origins;
    if trusted.iter().any(|o| o == "*") {
        return Ok(());
    }
    match &ctx.origin {
        Some(origin) if trusted.iter().any(|o| o == origin) => Ok(()),
        _ => Err(ApiError::invalid_credentials()),
    }
}

fn check_password_complexity(password: &str) -> Result<(), ApiError> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::invalid_operation(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

// ── auth.login / auth.logout ─────────────────────────────────────────────

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct LoginParams {
    #[garde(custom(valid_username))]
    username: String,
    #[garde(length(min = 1))]
    password: String,
    #[garde(length(min = 1))]
    app_id: String,
}

fn valid_username(value: &str, _ctx: &()) -> garde::Result {
    if user_rules::is_valid_username(value) {
        Ok(())
    } else {
        Err(garde::Error::new("invalid username"))
    }
}

async fn login(
    ctx: &mut ApiContext,
    params: &mut Value,
    result: &mut ResultBuilder,
) -> Result<(), ApiError> {
    let p: LoginParams = helpers::parse_validated(params)?;
    check_trusted_app(ctx, &p.app_id)?;
    let user = ctx.user()?.clone();
    if p.username != user.username {
        return Err(ApiError::invalid_operation(
            "The username does not match the request path",
        ));
    }
    let verified = ctx
        .services
        .storage
        .passwords
        .verify(&user.id, &p.password)
        .await
        .map_err(helpers::store_error)?;
    if !verified {
        return Err(ApiError::invalid_credentials());
    }

    let now = trove_model::time::now();
    let max_age = ctx.services.config.auth.session_max_age;
    let existing = ctx
        .services
        .storage
        .accesses
        .all(&user.id)
        .await
        .map_err(helpers::store_error)?
        .into_iter()
        .find(|a| {
            a.access_type == AccessType::Personal && a.name == p.app_id && !a.is_expired(now)
        });

    let access = match existing {
        Some(mut session) => {
            // Sliding session expiry.
            session.expires = Some(now + max_age);
            session.modified = now;
            session.modified_by = session.id.clone();
            session.seal();
            ctx.services
                .storage
                .accesses
                .update(&user.id, session.clone())
                .await
                .map_err(helpers::store_error)?;
            helpers::evict_access(ctx, &session.id, &session.token).await;
            session
        }
        None => {
            let id = trove_model::id::generate();
            let mut session = Access {
                id: id.clone(),
                token: uuid::Uuid::new_v4().simple().to_string(),
                access_type: AccessType::Personal,
                name: p.app_id.clone(),
                device_name: None,
                permissions: Vec::new(),
                last_used: None,
                calls: HashMap::new(),
                expire_after: Some(max_age),
                expires: Some(now + max_age),
                client_data: None,
                created: now,
                created_by: "system".into(),
                modified: now,
                modified_by: "system".into(),
                integrity: None,
            };
            session.seal();
            ctx.services
                .storage
                .accesses
                .insert(&user.id, session.clone())
                .await
                .map_err(helpers::store_error)?;
            session
        }
    };

    result.set("token", json!(access.token));
    result.set("preferredLanguage", json!(user.language));
    Ok(())
}

async fn logout(
    ctx: &mut ApiContext,
    _params: &mut Value,
    _result: &mut ResultBuilder,
) -> Result<(), ApiError> {
    let caller = ctx.access()?.access.clone();
    let user_id = ctx.user()?.id.clone();
    let tombstone = Deletion::new(caller.id.as_str(), trove_model::time::now());
    ctx.services
        .storage
        .accesses
        .delete(&user_id, &caller.id, tombstone)
        .await
        .map_err(helpers::store_error)?;
    helpers::evict_access(ctx, &caller.id, &caller.token).await;
    Ok(())
}

// ── account.* ────────────────────────────────────────────────────────────

async fn get(
    ctx: &mut ApiContext,
    _params: &mut Value,
    result: &mut ResultBuilder,
) -> Result<(), ApiError> {
    result.set("account", ctx.user()?.account_value());
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase", default)]
struct AccountUpdateFields {
    email: Option<String>,
    language: Option<String>,
}

async fn update(
    ctx: &mut ApiContext,
    params: &mut Value,
    result: &mut ResultBuilder,
) -> Result<(), ApiError> {
    let update_map = helpers::update_map(params)?;
    let guarded = helpers::guard_update_fields(
        update_map,
        trove_model::fields::ACCOUNT_ALTERABLE,
        ctx.services.config.update_mode,
    )?;
    let fields: AccountUpdateFields = parse(&Value::Object(guarded))?;

    let mut user = ctx.user()?.clone();
    if let Some(email) = fields.email {
        if !user_rules::is_valid_email(&email) {
            return Err(ApiError::invalid_parameters("Invalid email address"));
        }
        user.email = email;
    }
    if let Some(language) = fields.language {
        if !user_rules::is_valid_language(&language) {
            return Err(ApiError::invalid_parameters("Invalid language tag"));
        }
        user.language = language;
    }
    user.modified = trove_model::time::now();
    ctx.services
        .storage
        .users
        .update(user.clone())
        .await
        .map_err(helpers::store_error)?;
    ctx.user = Some(user.clone());
    result.set("account", user.account_value());
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct ChangePasswordParams {
    old_password: String,
    new_password: String,
}

async fn change_password(
    ctx: &mut ApiContext,
    params: &mut Value,
    _result: &mut ResultBuilder,
) -> Result<(), ApiError> {
    let p: ChangePasswordParams = parse(params)?;
    let user_id = ctx.user()?.id.clone();
    let verified = ctx
        .services
        .storage
        .passwords
        .verify(&user_id, &p.old_password)
        .await
        .map_err(helpers::store_error)?;
    if !verified {
        return Err(ApiError::invalid_credentials());
    }
    check_password_complexity(&p.new_password)?;
    ctx.services
        .storage
        .passwords
        .set(&user_id, &p.new_password)
        .await
        .map_err(helpers::store_error)?;
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct RequestResetParams {
    app_id: String,
}

async fn request_password_reset(
    ctx: &mut ApiContext,
    params: &mut Value,
    _result: &mut ResultBuilder,
) -> Result<(), ApiError> {
    let p: RequestResetParams = parse(params)?;
    check_trusted_app(ctx, &p.app_id)?;
    let user = ctx.user()?.clone();
    let token = ctx
        .services
        .storage
        .passwords
        .create_reset_token(&user.id, ctx.services.config.auth.password_reset_max_age)
        .await
        .map_err(helpers::store_error)?;
    ctx.services.storage.mailer.send_password_reset(&user, &token).await;
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct ResetPasswordParams {
    app_id: String,
    reset_token: String,
    new_password: String,
}

async fn reset_password(
    ctx: &mut ApiContext,
    params: &mut Value,
    _result: &mut ResultBuilder,
) -> Result<(), ApiError> {
    let p: ResetPasswordParams = parse(params)?;
    check_trusted_app(ctx, &p.app_id)?;
    check_password_complexity(&p.new_password)?;
    let user_id = ctx.user()?.id.clone();
    let consumed = ctx
        .services
        .storage
        .passwords
        .consume_reset_token(&user_id, &p.reset_token)
        .await
        .map_err(helpers::store_error)?;
    if !consumed {
        // Unknown, expired, already used, or issued for another user.
        return Err(ApiError::invalid_access_token("Invalid reset token"));
    }
    ctx.services
        .storage
        .passwords
        .set(&user_id, &p.new_password)
        .await
        .map_err(helpers::store_error)?;
    Ok(())
}
