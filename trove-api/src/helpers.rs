//! Shared step helpers: parameter parsing, protected-field guarding,
//! storage error bridging and notification emission.

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use trove_core::{ApiError, ErrorId, UpdateMode};
use trove_notify::{cache_topic, change_topic, Bus as _, BusMessage, ChangedKind};
use trove_storage::StoreError;

use crate::context::ApiContext;

/// Bridge a storage failure into the API taxonomy. Uniqueness violations
/// keep their offending keys; everything else is an unexpected error whose
/// cause only reaches the logs.
pub fn store_error(err: StoreError) -> ApiError {
    match err {
        StoreError::AlreadyExists { kind, keys } => ApiError::item_already_exists(kind, keys),
        StoreError::NotFound => ApiError::new(ErrorId::UnknownResource, "Item not found"),
        StoreError::Backend(message) => {
            tracing::error!("{}", trove_core::scrub::scrub(&message));
            ApiError::unexpected(message)
        }
    }
}

/// Deserialize params into a typed struct; unknown top-level fields are
/// rejected by the struct's `deny_unknown_fields`.
pub fn parse<T: DeserializeOwned>(params: &Value) -> Result<T, ApiError> {
    serde_json::from_value(params.clone()).map_err(|e| {
        ApiError::invalid_parameters("Invalid parameters format")
            .with_data(json!({ "detail": e.to_string() }))
    })
}

/// Deserialize and run declarative validation.
pub fn parse_validated<T>(params: &Value) -> Result<T, ApiError>
where
    T: DeserializeOwned + garde::Validate,
    <T as garde::Validate>::Context: Default,
{
    let value: T = parse(params)?;
    value.validate().map_err(|report| {
        let errors: Vec<Value> = report
            .iter()
            .map(|(path, error)| {
                let field = path.to_string();
                json!({
                    "field": if field.is_empty() { "value".to_string() } else { field },
                    "message": error.message(),
                })
            })
            .collect();
        ApiError::invalid_parameters("Invalid parameters format")
            .with_data(json!({ "errors": errors }))
    })?;
    Ok(value)
}

/// The `update` member of an update call's params, as a raw map.
pub fn update_map(params: &Value) -> Result<Map<String, Value>, ApiError> {
    params
        .get("update")
        .and_then(Value::as_object)
        .cloned()
        .ok_or_else(|| ApiError::invalid_parameters("Missing update object"))
}

/// Enforce the alterable-fields whitelist. Strict mode rejects, lenient
/// mode strips with a warning; the result shape is unchanged either way.
pub fn guard_update_fields(
    mut update: Map<String, Value>,
    alterable: &[&str],
    mode: UpdateMode,
) -> Result<Map<String, Value>, ApiError> {
    let forbidden = trove_model::fields::partition_update(&update, alterable);
    if forbidden.is_empty() {
        return Ok(update);
    }
    match mode {
        UpdateMode::Strict => Err(ApiError::forbidden(format!(
            "Forbidden update of field(s): {}",
            forbidden.join(", ")
        ))
        .with_data(json!({ "fields": forbidden }))),
        UpdateMode::Lenient => {
            tracing::warn!(fields = ?forbidden, "stripping protected fields from update");
            for field in &forbidden {
                update.remove(field);
            }
            Ok(update)
        }
    }
}

/// Emit a data-change notification plus the matching coherence message.
/// Runs after the mutation is confirmed by storage.
pub async fn notify(ctx: &ApiContext, kind: ChangedKind) {
    let bus = &ctx.services.bus;
    bus.publish(
        &change_topic(&ctx.username),
        BusMessage::Change {
            tag: kind.tag().to_string(),
        },
    )
    .await;
    if let Ok(user) = ctx.user() {
        match kind {
            ChangedKind::Streams => {
                ctx.services.cache.unset_streams(&user.id);
                bus.publish(
                    &cache_topic(&user.id),
                    BusMessage::UnsetUserData {
                        user_id: user.id.clone(),
                    },
                )
                .await;
            }
            ChangedKind::Events | ChangedKind::FollowedSlices | ChangedKind::Account => {}
            // Access coherence carries per-access payloads; emitted at the
            // call sites that know the access involved.
            ChangedKind::Accesses => {}
        }
    }
}

/// Evict one access everywhere.
pub async fn evict_access(ctx: &ApiContext, access_id: &str, token: &str) {
    if let Ok(user) = ctx.user() {
        ctx.services.cache.unset_access(&user.id, access_id, token);
        ctx.services
            .bus
            .publish(
                &cache_topic(&user.id),
                BusMessage::UnsetAccessLogic {
                    user_id: user.id.clone(),
                    access_id: access_id.to_string(),
                    access_token: token.to_string(),
                },
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields, rename_all = "camelCase")]
    struct Sample {
        name: String,
        #[serde(default)]
        limit: Option<u64>,
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = parse::<Sample>(&json!({"name": "x", "nope": 1})).unwrap_err();
        assert_eq!(err.id, ErrorId::InvalidParametersFormat);
        let ok: Sample = parse(&json!({"name": "x", "limit": 3})).unwrap();
        assert_eq!(ok.limit, Some(3));
    }

    #[test]
    fn strict_mode_rejects_protected_fields() {
        let update = json!({"name": "ok", "token": "nope"})
            .as_object()
            .cloned()
            .unwrap_or_default();
        let err =
            guard_update_fields(update, &["name"], UpdateMode::Strict).unwrap_err();
        assert_eq!(err.id, ErrorId::Forbidden);
    }

    #[test]
    fn lenient_mode_strips_protected_fields() {
        let update = json!({"name": "ok", "token": "nope"})
            .as_object()
            .cloned()
            .unwrap_or_default();
        let guarded = guard_update_fields(update, &["name"], UpdateMode::Lenient).unwrap();
        assert!(guarded.contains_key("name"));
        assert!(!guarded.contains_key("token"));
    }

    #[test]
    fn store_errors_map_to_the_taxonomy() {
        let err = store_error(StoreError::already_exists("stream", json!({"name": "X"})));
        assert_eq!(err.id, ErrorId::ItemAlreadyExists);
        let err = store_error(StoreError::Backend("disk on fire".into()));
        assert_eq!(err.id, ErrorId::UnexpectedError);
    }
}
