//! Followed slices: personal-only CRUD.

use garde::Validate;
use serde::Deserialize;
use serde_json::{json, Value};

use trove_core::dispatch::{step, Chain, Registry};
use trove_core::{ApiError, ResultBuilder};
use trove_model::FollowedSlice;
use trove_notify::ChangedKind;
use trove_storage::prelude::*;

use crate::context::ApiContext;
use crate::helpers::{self, parse, parse_validated};
use crate::steps::{authenticate, emit, AuthRequirement};

pub fn register(registry: &mut Registry<ApiContext>) {
    registry.register(
        "followedSlices.get",
        Chain::new()
            .then(authenticate("followedSlices.get", AuthRequirement::Personal))
            .then(step(|c, p, r| Box::pin(get(c, p, r)))),
    );
    registry.register(
        "followedSlices.create",
        Chain::new()
            .then(authenticate("followedSlices.create", AuthRequirement::Personal))
            .then(step(|c, p, r| Box::pin(create(c, p, r))))
            .then(emit(ChangedKind::FollowedSlices)),
    );
    registry.register(
        "followedSlices.update",
        Chain::new()
            .then(authenticate("followedSlices.update", AuthRequirement::Personal))
            .then(step(|c, p, r| Box::pin(update(c, p, r))))
            .then(emit(ChangedKind::FollowedSlices)),
    );
    registry.register(
        "followedSlices.delete",
        Chain::new()
            .then(authenticate("followedSlices.delete", AuthRequirement::Personal))
            .then(step(|c, p, r| Box::pin(delete(c, p, r))))
            .then(emit(ChangedKind::FollowedSlices)),
    );
}

async fn get(
    ctx: &mut ApiContext,
    _params: &mut Value,
    result: &mut ResultBuilder,
) -> Result<(), ApiError> {
    let user_id = ctx.user()?.id.clone();
    let mut slices = ctx
        .services
        .storage
        .followed_slices
        .all(&user_id)
        .await
        .map_err(helpers::store_error)?;
    slices.sort_by(|a, b| a.name.cmp(&b.name));
    result.set("followedSlices", json!(slices));
    Ok(())
}

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct CreateParams {
    #[garde(length(min = 1))]
    name: String,
    #[garde(length(min = 1))]
    url: String,
    #[garde(length(min = 1))]
    access_token: String,
}

async fn create(
    ctx: &mut ApiContext,
    params: &mut Value,
    result: &mut ResultBuilder,
) -> Result<(), ApiError> {
    let p: CreateParams = parse_validated(params)?;
    let user_id = ctx.user()?.id.clone();
    let slice = FollowedSlice {
        id: trove_model::id::generate(),
        name: p.name,
        url: p.url,
        access_token: p.access_token,
    };
    ctx.services
        .storage
        .followed_slices
        .insert(&user_id, slice.clone())
        .await
        .map_err(helpers::store_error)?;
    result.set("followedSlice", json!(slice));
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase", default)]
struct UpdateFields {
    name: Option<String>,
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
        .ok_or_else(|| ApiError::invalid_parameters("Missing followed slice id"))?;
    let update_map = helpers::update_map(params)?;
    let guarded = helpers::guard_update_fields(
        update_map,
        trove_model::fields::FOLLOWED_SLICE_ALTERABLE,
        ctx.services.config.update_mode,
    )?;
    let fields: UpdateFields = parse(&Value::Object(guarded))?;

    let user_id = ctx.user()?.id.clone();
    let mut slice = ctx
        .services
        .storage
        .followed_slices
        .get(&user_id, &id)
        .await
        .map_err(helpers::store_error)?
        .ok_or_else(|| ApiError::unknown_resource("followed slice", &id))?;
    if let Some(name) = fields.name {
        if name.is_empty() {
            return Err(ApiError::invalid_parameters("name must not be empty"));
        }
        slice.name = name;
    }
    ctx.services
        .storage
        .followed_slices
        .update(&user_id, slice.clone())
        .await
        .map_err(helpers::store_error)?;
    result.set("followedSlice", json!(slice));
    Ok(())
}

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
    let user_id = ctx.user()?.id.clone();
    ctx.services
        .storage
        .followed_slices
        .get(&user_id, &p.id)
        .await
        .map_err(helpers::store_error)?
        .ok_or_else(|| ApiError::unknown_resource("followed slice", &p.id))?;
    ctx.services
        .storage
        .followed_slices
        .delete(&user_id, &p.id)
        .await
        .map_err(helpers::store_error)?;
    result.set(
        "followedSliceDeletion",
        json!({ "id": p.id, "deleted": trove_model::time::now() }),
    );
    Ok(())
}
