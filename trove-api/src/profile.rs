//! Profile buckets: key-value documents with additive-merge updates.

use serde_json::{Map, Value};

use trove_core::dispatch::{step, Chain, Registry};
use trove_core::{ApiError, ResultBuilder};
use trove_model::profile;
use trove_storage::prelude::*;

use crate::context::ApiContext;
use crate::helpers;
use crate::steps::{authenticate, AuthRequirement};

pub fn register(registry: &mut Registry<ApiContext>) {
    registry.register(
        "profile.getPublic",
        Chain::new()
            .then(authenticate("profile.getPublic", AuthRequirement::Authenticated))
            .then(step(|c, p, r| Box::pin(get_bucket(c, p, r, Bucket::Public)))),
    );
    registry.register(
        "profile.get",
        Chain::new()
            .then(authenticate("profile.get", AuthRequirement::Personal))
            .then(step(|c, p, r| Box::pin(get_bucket(c, p, r, Bucket::Private)))),
    );
    registry.register(
        "profile.getApp",
        Chain::new()
            .then(authenticate("profile.getApp", AuthRequirement::Authenticated))
            .then(step(|c, p, r| Box::pin(get_bucket(c, p, r, Bucket::App)))),
    );
    registry.register(
        "profile.updatePublic",
        Chain::new()
            .then(authenticate("profile.updatePublic", AuthRequirement::Personal))
            .then(step(|c, p, r| Box::pin(update_bucket(c, p, r, Bucket::Public)))),
    );
    registry.register(
        "profile.update",
        Chain::new()
            .then(authenticate("profile.update", AuthRequirement::Personal))
            .then(step(|c, p, r| Box::pin(update_bucket(c, p, r, Bucket::Private)))),
    );
    registry.register(
        "profile.updateApp",
        Chain::new()
            .then(authenticate("profile.updateApp", AuthRequirement::Authenticated))
            .then(step(|c, p, r| Box::pin(update_bucket(c, p, r, Bucket::App)))),
    );
}

#[derive(Clone, Copy)]
enum Bucket {
    Public,
    Private,
    App,
}

/// Resolve the storage bucket key, enforcing the scope rules: the app
/// bucket is keyed per access and reserved to app accesses.
fn bucket_key(ctx: &ApiContext, bucket: Bucket) -> Result<String, ApiError> {
    match bucket {
        Bucket::Public => Ok(profile::ProfileScope::Public.as_str().to_string()),
        Bucket::Private => Ok(profile::ProfileScope::Private.as_str().to_string()),
        Bucket::App => {
            let access = ctx.access()?;
            if !access.is_app() {
                return Err(ApiError::invalid_operation(
                    "The app profile is only available to app accesses",
                ));
            }
            Ok(format!("app:{}", access.access.id))
        }
    }
}

async fn get_bucket(
    ctx: &mut ApiContext,
    _params: &mut Value,
    result: &mut ResultBuilder,
    bucket: Bucket,
) -> Result<(), ApiError> {
    let key = bucket_key(ctx, bucket)?;
    let user_id = ctx.user()?.id.clone();
    let map = ctx
        .services
        .storage
        .profiles
        .get(&user_id, &key)
        .await
        .map_err(helpers::store_error)?;
    result.set("profile", Value::Object(map));
    Ok(())
}

async fn update_bucket(
    ctx: &mut ApiContext,
    params: &mut Value,
    result: &mut ResultBuilder,
    bucket: Bucket,
) -> Result<(), ApiError> {
    let update: Map<String, Value> = helpers::update_map(params)?;
    let key = bucket_key(ctx, bucket)?;
    let user_id = ctx.user()?.id.clone();
    let mut existing = ctx
        .services
        .storage
        .profiles
        .get(&user_id, &key)
        .await
        .map_err(helpers::store_error)?;
    profile::merge(&mut existing, update);
    ctx.services
        .storage
        .profiles
        .set(&user_id, &key, existing.clone())
        .await
        .map_err(helpers::store_error)?;
    result.set("profile", Value::Object(existing));
    Ok(())
}
