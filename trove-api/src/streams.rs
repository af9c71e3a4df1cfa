//! The stream tree engine: tree reads, create, update (including moves)
//! and the two-phase delete with event merge semantics.

use std::collections::HashSet;

use futures_util::StreamExt;
use garde::Validate;
use serde::Deserialize;
use serde_json::{json, Value};

use trove_core::dispatch::{step, Chain, Registry};
use trove_core::{ApiError, ResultBuilder};
use trove_model::{Deletion, Stream, StreamTree};
use trove_notify::ChangedKind;
use trove_storage::{EventQuery, StateFilter, StreamSets};
use trove_storage::prelude::*;

use crate::context::ApiContext;
use crate::helpers::{self, parse, parse_validated};
use crate::steps::{authenticate, emit, AuthRequirement};

pub fn register(registry: &mut Registry<ApiContext>) {
    registry.register(
        "streams.get",
        Chain::new()
            .then(authenticate("streams.get", AuthRequirement::Authenticated))
            .then(step(|c, p, r| Box::pin(get(c, p, r)))),
    );
    registry.register(
        "streams.create",
        Chain::new()
            .then(authenticate("streams.create", AuthRequirement::Authenticated))
            .then(step(|c, p, r| Box::pin(create(c, p, r))))
            .then(emit(ChangedKind::Streams)),
    );
    registry.register(
        "streams.update",
        Chain::new()
            .then(authenticate("streams.update", AuthRequirement::Authenticated))
            .then(step(|c, p, r| Box::pin(update(c, p, r))))
            .then(emit(ChangedKind::Streams)),
    );
    registry.register(
        "streams.delete",
        Chain::new()
            .then(authenticate("streams.delete", AuthRequirement::Authenticated))
            .then(step(|c, p, r| Box::pin(delete(c, p, r))))
            .then(emit(ChangedKind::Streams)),
    );
}

// ── streams.get ──────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase", default)]
struct GetParams {
    parent_id: Option<String>,
    state: Option<String>,
    include_deletions_since: Option<f64>,
}

async fn get(
    ctx: &mut ApiContext,
    params: &mut Value,
    result: &mut ResultBuilder,
) -> Result<(), ApiError> {
    let p: GetParams = parse(params)?;
    let state = match p.state.as_deref() {
        Some(s) => StateFilter::parse(s)
            .ok_or_else(|| ApiError::invalid_parameters("state must be default, trashed or all"))?,
        None => StateFilter::Default,
    };
    let user_id = ctx.user()?.id.clone();
    let tree = ctx.services.load_tree(&user_id).await?;
    let access = ctx.access()?.clone();

    if let Some(parent_id) = &p.parent_id {
        if !tree.contains(parent_id) {
            return Err(ApiError::unknown_resource("stream", parent_id));
        }
    }
    let keep = |stream: &Stream| state.keeps(stream.trashed) && access.can_read(&tree, &stream.id);
    let streams = tree.assemble(p.parent_id.as_deref(), &keep);
    result.set("streams", json!(streams));

    if let Some(since) = p.include_deletions_since {
        let deletions = ctx
            .services
            .storage
            .streams
            .deletions(&user_id, Some(since))
            .await
            .map_err(helpers::store_error)?;
        result.set("streamDeletions", json!(deletions));
    }
    Ok(())
}

// ── streams.create ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct CreateParams {
    #[garde(skip)]
    #[serde(default)]
    id: Option<String>,
    #[garde(length(min = 1))]
    name: String,
    #[garde(skip)]
    #[serde(default)]
    parent_id: Option<String>,
    #[garde(skip)]
    #[serde(default)]
    client_data: Option<Value>,
    #[garde(skip)]
    #[serde(default)]
    single_activity: Option<bool>,
}

async fn create(
    ctx: &mut ApiContext,
    params: &mut Value,
    result: &mut ResultBuilder,
) -> Result<(), ApiError> {
    let p: CreateParams = parse_validated(params)?;
    if p.single_activity.is_some() {
        return Err(ApiError::invalid_operation("singleActivity is reserved"));
    }
    let user_id = ctx.user()?.id.clone();
    let tree = ctx.services.load_tree(&user_id).await?;
    let access = ctx.access()?.clone();

    match &p.parent_id {
        Some(parent_id) => {
            let parent = tree
                .get(parent_id)
                .ok_or_else(|| {
                    ApiError::unknown_referenced_resource(
                        "Unknown parent stream",
                        json!({ "parentId": parent_id }),
                    )
                })?;
            if parent.trashed {
                return Err(ApiError::invalid_operation("The parent stream is trashed"));
            }
            if !access.can_manage(&tree, parent_id) && !access.has_create_only(&tree, parent_id) {
                return Err(ApiError::forbidden(
                    "The access cannot create streams under this parent",
                ));
            }
        }
        None => {
            if !access.can_create_root_stream() {
                return Err(ApiError::forbidden(
                    "The access cannot create root streams",
                ));
            }
        }
    }

    if tree.has_sibling_named(p.parent_id.as_deref(), &p.name, None) {
        return Err(ApiError::item_already_exists(
            "stream",
            json!({ "name": p.name, "parentId": p.parent_id }),
        ));
    }

    let id = match p.id {
        Some(id) => {
            if !trove_model::id::is_cuid_like(&id) && !trove_model::id::is_acceptable_stream_id(&id)
            {
                return Err(ApiError::invalid_parameters(format!(
                    "Invalid stream id \"{id}\""
                )));
            }
            if tree.contains(&id) {
                return Err(ApiError::item_already_exists("stream", json!({ "id": id })));
            }
            id
        }
        None => trove_model::id::generate(),
    };

    let now = trove_model::time::now();
    let actor = ctx.actor();
    let mut stream = Stream {
        id,
        name: p.name,
        parent_id: p.parent_id,
        children: Vec::new(),
        trashed: false,
        client_data: p.client_data,
        single_activity: None,
        created: now,
        created_by: actor.clone(),
        modified: now,
        modified_by: actor,
        integrity: None,
    };
    stream.seal();
    ctx.services
        .storage
        .streams
        .insert(&user_id, stream.clone())
        .await
        .map_err(helpers::store_error)?;
    result.set("stream", json!(stream));
    Ok(())
}

// ── streams.update ───────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase", default)]
struct UpdateFields {
    name: Option<String>,
    trashed: Option<bool>,
    client_data: Option<Value>,
}

async fn load_stream(tree: &StreamTree, id: &str) -> Result<Stream, ApiError> {
    tree.get(id)
        .cloned()
        .ok_or_else(|| ApiError::unknown_resource("stream", id))
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
        .ok_or_else(|| ApiError::invalid_parameters("Missing stream id"))?;
    let update_map = helpers::update_map(params)?;
    if update_map.contains_key("singleActivity") {
        return Err(ApiError::invalid_operation("singleActivity is reserved"));
    }
    let mut guarded = helpers::guard_update_fields(
        update_map,
        trove_model::fields::STREAM_ALTERABLE,
        ctx.services.config.update_mode,
    )?;
    // `parentId: null` (move to root) and an absent parentId must stay
    // distinguishable, so the raw map is consulted before deserializing.
    let parent_update: Option<Option<String>> = match guarded.remove("parentId") {
        None => None,
        Some(Value::Null) => Some(None),
        Some(Value::String(s)) => Some(Some(s)),
        Some(_) => {
            return Err(ApiError::invalid_parameters(
                "parentId must be a string or null",
            ))
        }
    };
    let fields: UpdateFields = parse(&Value::Object(guarded))?;

    if trove_model::is_synthetic_stream_id(&id) {
        return Err(ApiError::invalid_operation("Synthetic streams are read-only"));
    }

    let user_id = ctx.user()?.id.clone();
    let tree = ctx.services.load_tree(&user_id).await?;
    let access = ctx.access()?.clone();
    let mut stream = load_stream(&tree, &id).await?;

    if !access.can_manage(&tree, &id) {
        return Err(ApiError::forbidden("The access cannot manage this stream"));
    }

    let mut new_parent = stream.parent_id.clone();
    if let Some(requested_parent) = parent_update {
        new_parent = requested_parent;
        if new_parent != stream.parent_id {
            // A move requires manage on both the old and the new parent.
            if let Some(old_parent) = &stream.parent_id {
                if !access.can_manage(&tree, old_parent) {
                    return Err(ApiError::forbidden(
                        "The access cannot manage the current parent",
                    ));
                }
            }
            if let Some(parent_id) = &new_parent {
                let parent = tree.get(parent_id).ok_or_else(|| {
                    ApiError::unknown_referenced_resource(
                        "Unknown parent stream",
                        json!({ "parentId": parent_id }),
                    )
                })?;
                if parent.trashed {
                    return Err(ApiError::invalid_operation("The parent stream is trashed"));
                }
                if tree.is_in_subtree(parent_id, &id) {
                    return Err(ApiError::invalid_operation(
                        "Cannot move a stream under its own subtree",
                    ));
                }
                if !access.can_manage(&tree, parent_id) {
                    return Err(ApiError::forbidden(
                        "The access cannot manage the target parent",
                    ));
                }
            } else if !access.can_create_root_stream() {
                return Err(ApiError::forbidden("The access cannot manage root streams"));
            }
        }
    }

    let new_name = fields.name.clone().unwrap_or_else(|| stream.name.clone());
    if new_name.is_empty() {
        return Err(ApiError::invalid_parameters("name must not be empty"));
    }
    if tree.has_sibling_named(new_parent.as_deref(), &new_name, Some(&id)) {
        return Err(ApiError::item_already_exists(
            "stream",
            json!({ "name": new_name, "parentId": new_parent }),
        ));
    }

    stream.name = new_name;
    stream.parent_id = new_parent;
    if let Some(trashed) = fields.trashed {
        stream.trashed = trashed;
    }
    if fields.client_data.is_some() {
        stream.client_data = fields.client_data;
    }
    stream.modified = trove_model::time::now();
    stream.modified_by = ctx.actor();
    stream.seal();
    ctx.services
        .storage
        .streams
        .update(&user_id, stream.clone())
        .await
        .map_err(helpers::store_error)?;
    result.set("stream", json!(stream));
    Ok(())
}

// ── streams.delete ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct DeleteParams {
    id: String,
    #[serde(default)]
    merge_events_with_parent: Option<bool>,
}

async fn delete(
    ctx: &mut ApiContext,
    params: &mut Value,
    result: &mut ResultBuilder,
) -> Result<(), ApiError> {
    let p: DeleteParams = parse(params)?;
    if trove_model::is_synthetic_stream_id(&p.id) {
        return Err(ApiError::invalid_operation("Synthetic streams are read-only"));
    }
    let user_id = ctx.user()?.id.clone();
    let tree = ctx.services.load_tree(&user_id).await?;
    let access = ctx.access()?.clone();
    let stream = load_stream(&tree, &p.id).await?;

    if !access.can_manage(&tree, &p.id) {
        return Err(ApiError::forbidden("The access cannot manage this stream"));
    }

    if !stream.trashed {
        // First call: trash the whole subtree.
        let now = trove_model::time::now();
        let actor = ctx.actor();
        let mut updated_root = stream.clone();
        for sub_id in tree.descendants(&p.id) {
            let Some(sub) = tree.get(&sub_id) else { continue };
            let mut sub = sub.clone();
            sub.trashed = true;
            sub.modified = now;
            sub.modified_by = actor.clone();
            sub.seal();
            if sub.id == p.id {
                updated_root = sub.clone();
            }
            ctx.services
                .storage
                .streams
                .update(&user_id, sub)
                .await
                .map_err(helpers::store_error)?;
        }
        result.set("stream", json!(updated_root));
        return Ok(());
    }

    // Second call: permanent deletion.
    let subtree: HashSet<String> = tree.descendants(&p.id).into_iter().collect();
    let merge = p.merge_events_with_parent.unwrap_or(false);
    if merge && stream.parent_id.is_none() {
        return Err(ApiError::invalid_operation(
            "Cannot merge events into the parent of a root stream",
        ));
    }

    let query = EventQuery {
        streams: Some(StreamSets {
            any: subtree.clone(),
            ..Default::default()
        }),
        state: StateFilter::All,
        limit: None,
        ..Default::default()
    };
    let mut affected = Vec::new();
    {
        let mut source = ctx.services.storage.events.query(&user_id, &query);
        while let Some(item) = source.next().await {
            affected.push(item.map_err(helpers::store_error)?);
        }
    }

    let now = trove_model::time::now();
    let actor = ctx.actor();
    let mut updated_events: u64 = 0;
    for mut event in affected {
        let remaining: Vec<String> = event
            .stream_ids
            .iter()
            .filter(|sid| !subtree.contains(*sid))
            .cloned()
            .collect();
        if merge {
            let parent = stream.parent_id.clone().unwrap_or_default();
            let mut new_ids = remaining;
            if !new_ids.contains(&parent) {
                new_ids.push(parent);
            }
            event.stream_ids = new_ids;
            event.modified = now;
            event.modified_by = actor.clone();
            event.seal();
            ctx.services
                .storage
                .events
                .update(&user_id, event)
                .await
                .map_err(helpers::store_error)?;
            updated_events += 1;
        } else if remaining.is_empty() {
            // Wholly contained: the event becomes a deletion.
            let attached: i64 = event.attachments.iter().map(|a| a.size as i64).sum();
            ctx.services
                .storage
                .attachments
                .delete_event(&user_id, &event.id)
                .await
                .map_err(helpers::store_error)?;
            if attached > 0 {
                let mut user = ctx.user()?.clone();
                user.storage_used.attached_files =
                    (user.storage_used.attached_files - attached).max(0);
                ctx.services
                    .storage
                    .users
                    .update(user.clone())
                    .await
                    .map_err(helpers::store_error)?;
                ctx.user = Some(user);
            }
            ctx.services
                .storage
                .events
                .delete(&user_id, &event.id, Deletion::new(event.id.as_str(), now))
                .await
                .map_err(helpers::store_error)?;
        } else {
            event.stream_ids = remaining;
            event.modified = now;
            event.modified_by = actor.clone();
            event.seal();
            ctx.services
                .storage
                .events
                .update(&user_id, event)
                .await
                .map_err(helpers::store_error)?;
            updated_events += 1;
        }
    }

    for sub_id in &subtree {
        ctx.services
            .storage
            .streams
            .delete(&user_id, sub_id, Deletion::new(sub_id.clone(), now))
            .await
            .map_err(helpers::store_error)?;
    }

    result.set("streamDeletion", json!(Deletion::new(p.id.as_str(), now)));
    result.set("updatedEvents", json!(updated_events));
    helpers::notify(ctx, ChangedKind::Events).await;
    Ok(())
}
