//! Access CRUD and introspection.

use garde::Validate;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

use trove_core::dispatch::{step, Chain, Registry};
use trove_core::{ApiError, ResultBuilder};
use trove_model::{Access, AccessType, Deletion, Permission, StreamTree};
use trove_notify::ChangedKind;
use trove_storage::prelude::*;

use crate::context::ApiContext;
use crate::helpers::{self, parse, parse_validated};
use crate::steps::{authenticate, emit, AuthRequirement};

pub fn register(registry: &mut Registry<ApiContext>) {
    registry.register(
        "accesses.get",
        Chain::new()
            .then(authenticate("accesses.get", AuthRequirement::Authenticated))
            .then(step(|c, p, r| Box::pin(get(c, p, r)))),
    );
    registry.register(
        "accesses.create",
        Chain::new()
            .then(authenticate("accesses.create", AuthRequirement::Authenticated))
            .then(step(|c, p, r| Box::pin(create(c, p, r))))
            .then(emit(ChangedKind::Accesses)),
    );
    registry.register(
        "accesses.update",
        Chain::new()
            .then(authenticate("accesses.update", AuthRequirement::Authenticated))
            .then(step(|c, p, r| Box::pin(update(c, p, r))))
            .then(emit(ChangedKind::Accesses)),
    );
    registry.register(
        "accesses.delete",
        Chain::new()
            .then(authenticate("accesses.delete", AuthRequirement::Authenticated))
            .then(step(|c, p, r| Box::pin(delete(c, p, r))))
            .then(emit(ChangedKind::Accesses)),
    );
    registry.register(
        "getAccessInfo",
        Chain::new()
            .then(authenticate("getAccessInfo", AuthRequirement::Authenticated))
            .then(step(|c, p, r| Box::pin(access_info(c, p, r)))),
    );
}

// ── accesses.get ─────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase", default)]
struct GetParams {
    include_deletions: Option<bool>,
    include_expired: Option<bool>,
}

async fn get(
    ctx: &mut ApiContext,
    params: &mut Value,
    result: &mut ResultBuilder,
) -> Result<(), ApiError> {
    let p: GetParams = parse(params)?;
    let user_id = ctx.user()?.id.clone();
    let caller = ctx.access()?.clone();
    let now = trove_model::time::now();

    let mut accesses = ctx
        .services
        .storage
        .accesses
        .all(&user_id)
        .await
        .map_err(helpers::store_error)?;
    if !caller.is_personal() {
        // Non-personal callers only see the shared accesses they created.
        let own_id = caller.access.id.clone();
        accesses.retain(|a| a.access_type == AccessType::Shared && a.created_by == own_id);
    }
    if !p.include_expired.unwrap_or(false) {
        accesses.retain(|a| !a.is_expired(now));
    }
    accesses.sort_by(|a, b| a.name.cmp(&b.name));
    let rendered: Vec<Value> = accesses.iter().map(Access::api_value).collect();
    result.set("accesses", Value::Array(rendered));

    if p.include_deletions.unwrap_or(false) {
        let deletions = ctx
            .services
            .storage
            .accesses
            .deletions(&user_id, None)
            .await
            .map_err(helpers::store_error)?;
        result.set("accessDeletions", json!(deletions));
    }
    Ok(())
}

// ── accesses.create ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct CreateParams {
    #[garde(skip)]
    #[serde(default)]
    id: Option<String>,
    #[garde(skip)]
    #[serde(default)]
    token: Option<String>,
    #[garde(length(min = 1))]
    name: String,
    #[garde(skip)]
    #[serde(default, rename = "type")]
    access_type: Option<AccessType>,
    #[garde(skip)]
    #[serde(default)]
    device_name: Option<String>,
    #[garde(skip)]
    #[serde(default)]
    permissions: Option<Vec<Permission>>,
    #[garde(skip)]
    #[serde(default)]
    expire_after: Option<f64>,
    #[garde(skip)]
    #[serde(default)]
    client_data: Option<Value>,
}

/// A non-personal creator may only delegate levels it holds itself.
fn check_delegation(
    ctx: &ApiContext,
    tree: &StreamTree,
    permissions: &[Permission],
) -> Result<(), ApiError> {
    let caller = ctx.access()?;
    if caller.is_personal() {
        return Ok(());
    }
    for entry in permissions {
        let covered = match entry {
            Permission::Stream { stream_id, level } => caller.can(tree, stream_id, *level),
            Permission::Tag { tag, level } => {
                let tag_stream = format!("{}{tag}", trove_model::TAG_PREFIX);
                caller.can(tree, &tag_stream, *level)
            }
            Permission::Feature { .. } => true,
        };
        if !covered {
            return Err(ApiError::forbidden(
                "Cannot delegate permissions the access does not hold",
            ));
        }
    }
    Ok(())
}

async fn create(
    ctx: &mut ApiContext,
    params: &mut Value,
    result: &mut ResultBuilder,
) -> Result<(), ApiError> {
    let p: CreateParams = parse_validated(params)?;
    if p.id.is_some() {
        return Err(ApiError::invalid_parameters(
            "id must not be supplied on access creation",
        ));
    }
    let access_type = p.access_type.unwrap_or(AccessType::Shared);
    if access_type == AccessType::Personal {
        return Err(ApiError::invalid_operation(
            "Personal accesses cannot be created explicitly; use auth.login",
        ));
    }
    let permissions = p.permissions.unwrap_or_default();
    let user_id = ctx.user()?.id.clone();
    let tree = ctx.services.load_tree(&user_id).await?;
    check_delegation(ctx, &tree, &permissions)?;

    let now = trove_model::time::now();
    let actor = ctx.actor();
    let mut access = Access {
        id: trove_model::id::generate(),
        token: p
            .token
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string()),
        access_type,
        name: p.name,
        device_name: p.device_name,
        permissions,
        last_used: None,
        calls: HashMap::new(),
        expire_after: p.expire_after,
        expires: p.expire_after.map(|after| now + after),
        client_data: p.client_data,
        created: now,
        created_by: actor.clone(),
        modified: now,
        modified_by: actor,
        integrity: None,
    };
    access.seal();
    ctx.services
        .storage
        .accesses
        .insert(&user_id, access.clone())
        .await
        .map_err(helpers::store_error)?;
    result.set("access", access.api_value());
    Ok(())
}

// ── accesses.update ──────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase", default)]
struct UpdateFields {
    name: Option<String>,
    device_name: Option<String>,
    permissions: Option<Vec<Permission>>,
    expire_after: Option<f64>,
    client_data: Option<Value>,
}

async fn load_access(ctx: &ApiContext, id: &str) -> Result<Access, ApiError> {
    let user_id = ctx.user()?.id.clone();
    ctx.services
        .storage
        .accesses
        .get(&user_id, id)
        .await
        .map_err(helpers::store_error)?
        .ok_or_else(|| ApiError::unknown_resource("access", id))
}

/// Personal can act on anything; app/shared only on what they created.
fn check_ownership(ctx: &ApiContext, target: &Access) -> Result<(), ApiError> {
    let caller = ctx.access()?;
    if caller.is_personal() || target.created_by == caller.access.id {
        return Ok(());
    }
    Err(ApiError::forbidden(
        "The access does not cover this resource",
    ))
}

async fn update(
    ctx: &mut ApiContext,
    params: &mut Value,
    result: &mut ResultBuilder,
) -> Result<(), ApiError> {
    let id = params
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ApiError::invalid_parameters("Missing access id"))?;
    let update_map = helpers::update_map(params)?;
    let guarded = helpers::guard_update_fields(
        update_map,
        trove_model::fields::ACCESS_ALTERABLE,
        ctx.services.config.update_mode,
    )?;
    let fields: UpdateFields = parse(&Value::Object(guarded))?;

    let mut access = load_access(ctx, &id).await?;
    check_ownership(ctx, &access)?;
    if access.access_type == AccessType::Personal && !ctx.access()?.is_personal() {
        return Err(ApiError::forbidden("Cannot touch a personal access"));
    }

    let old_token = access.token.clone();
    if let Some(name) = fields.name {
        access.name = name;
    }
    if fields.device_name.is_some() {
        access.device_name = fields.device_name;
    }
    if let Some(permissions) = fields.permissions {
        let user_id = ctx.user()?.id.clone();
        let tree = ctx.services.load_tree(&user_id).await?;
        check_delegation(ctx, &tree, &permissions)?;
        access.permissions = permissions;
    }
    if let Some(after) = fields.expire_after {
        access.expire_after = Some(after);
        access.expires = Some(access.created + after);
    }
    if fields.client_data.is_some() {
        access.client_data = fields.client_data;
    }
    access.modified = trove_model::time::now();
    access.modified_by = ctx.actor();
    access.seal();

    let user_id = ctx.user()?.id.clone();
    ctx.services
        .storage
        .accesses
        .update(&user_id, access.clone())
        .await
        .map_err(helpers::store_error)?;
    helpers::evict_access(ctx, &access.id, &old_token).await;
    result.set("access", access.api_value());
    Ok(())
}

// ── accesses.delete ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct DeleteParams {
    id: String,
}

async fn delete(
    ctx: &mut ApiContext,
    params: &mut Value,
    result: &mut ResultBuilder,
) -> Result<(), ApiError> {
    let p: DeleteParams = parse(params)?;
    let access = load_access(ctx, &p.id).await?;
    let caller = ctx.access()?.clone();
    if access.id == caller.access.id && caller.is_feature_forbidden("selfRevoke") {
        return Err(ApiError::forbidden("Self-revocation is forbidden"));
    }
    if access.id != caller.access.id {
        check_ownership(ctx, &access)?;
        if access.access_type == AccessType::Personal && !caller.is_personal() {
            return Err(ApiError::forbidden("Cannot touch a personal access"));
        }
    }

    let user_id = ctx.user()?.id.clone();
    let tombstone = Deletion::new(p.id.as_str(), trove_model::time::now());
    ctx.services
        .storage
        .accesses
        .delete(&user_id, &p.id, tombstone.clone())
        .await
        .map_err(helpers::store_error)?;
    // Revocation must propagate so every process evicts its cached copy.
    helpers::evict_access(ctx, &access.id, &access.token).await;
    result.set("accessDeletion", json!(tombstone));
    Ok(())
}

// ── getAccessInfo ────────────────────────────────────────────────────────

async fn access_info(
    ctx: &mut ApiContext,
    _params: &mut Value,
    result: &mut ResultBuilder,
) -> Result<(), ApiError> {
    let caller = ctx.access()?.access.clone();
    let username = ctx.user()?.username.clone();
    if let Value::Object(map) = caller.api_value() {
        for (key, value) in map {
            result.set(&key, value);
        }
    }
    result.set("user", json!({ "username": username }));
    Ok(())
}
