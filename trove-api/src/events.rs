//! The event engine: CRUD, multi-stream membership, tag migration,
//! attachments, history, deletions and storage accounting.

use std::collections::HashSet;

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use trove_core::dispatch::{step, Chain, Registry};
use trove_core::{ApiError, ResultBuilder};
use trove_model::{event as event_rules, Attachment, Deletion, Event, PermissionLevel, StreamTree};
use trove_notify::ChangedKind;
use trove_storage::{EventQuery, StateFilter, StreamSets};
use trove_storage::prelude::*;

use crate::context::ApiContext;
use crate::helpers::{self, parse};
use crate::steps::{authenticate, emit, AuthRequirement};
use crate::types;

pub const DEFAULT_LIMIT: usize = 20;

pub fn register(registry: &mut Registry<ApiContext>) {
    registry.register(
        "events.get",
        Chain::new()
            .then(authenticate("events.get", AuthRequirement::Authenticated))
            .then(step(|c, p, r| Box::pin(get(c, p, r)))),
    );
    registry.register(
        "events.getOne",
        Chain::new()
            .then(authenticate("events.getOne", AuthRequirement::Authenticated))
            .then(step(|c, p, r| Box::pin(get_one(c, p, r)))),
    );
    registry.register(
        "events.create",
        Chain::new()
            .then(authenticate("events.create", AuthRequirement::Authenticated))
            .then(step(|c, p, r| Box::pin(create(c, p, r))))
            .then(emit(ChangedKind::Events)),
    );
    registry.register(
        "events.update",
        Chain::new()
            .then(authenticate("events.update", AuthRequirement::Authenticated))
            .then(step(|c, p, r| Box::pin(update(c, p, r))))
            .then(emit(ChangedKind::Events)),
    );
    registry.register(
        "events.delete",
        Chain::new()
            .then(authenticate("events.delete", AuthRequirement::Authenticated))
            .then(step(|c, p, r| Box::pin(delete(c, p, r))))
            .then(emit(ChangedKind::Events)),
    );
    registry.register(
        "events.addAttachments",
        Chain::new()
            .then(authenticate("events.addAttachments", AuthRequirement::Authenticated))
            .then(step(|c, p, r| Box::pin(add_attachments(c, p, r))))
            .then(emit(ChangedKind::Events)),
    );
    registry.register(
        "events.deleteAttachment",
        Chain::new()
            .then(authenticate("events.deleteAttachment", AuthRequirement::Authenticated))
            .then(step(|c, p, r| Box::pin(delete_attachment(c, p, r))))
            .then(emit(ChangedKind::Events)),
    );
}

// ── events.get ───────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase", default)]
struct GetParams {
    streams: Option<Value>,
    tags: Option<Vec<String>>,
    types: Option<Vec<String>>,
    from_time: Option<f64>,
    to_time: Option<f64>,
    sort_ascending: Option<bool>,
    skip: Option<u64>,
    limit: Option<u64>,
    state: Option<String>,
    modified_since: Option<f64>,
    include_deletions: Option<bool>,
    running: Option<bool>,
}

/// Expand a streams parameter (flat list or `{any, all, not}`) into
/// concrete id sets, subtree-expanding real streams and passing synthetic
/// ids through.
fn expand_streams(
    value: &Value,
    tree: &StreamTree,
) -> Result<StreamSets, ApiError> {
    fn ids_of(value: &Value) -> Result<Vec<String>, ApiError> {
        match value {
            Value::Array(items) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| ApiError::invalid_parameters("Stream ids must be strings"))
                })
                .collect(),
            Value::String(s) => Ok(vec![s.clone()]),
            _ => Err(ApiError::invalid_parameters(
                "streams must be an array or an {any, all, not} object",
            )),
        }
    }

    let (any, all, not) = match value {
        Value::Object(map) => {
            let known = ["any", "all", "not"];
            if let Some(unknown) = map.keys().find(|k| !known.contains(&k.as_str())) {
                return Err(ApiError::invalid_parameters(format!(
                    "Unknown stream query member \"{unknown}\""
                )));
            }
            (
                map.get("any").map(ids_of).transpose()?.unwrap_or_default(),
                map.get("all").map(ids_of).transpose()?.unwrap_or_default(),
                map.get("not").map(ids_of).transpose()?.unwrap_or_default(),
            )
        }
        other => (ids_of(other)?, Vec::new(), Vec::new()),
    };

    let mut sets = StreamSets::default();
    let mut missing: Vec<String> = Vec::new();
    let mut expand_into = |ids: Vec<String>, target: &mut HashSet<String>| {
        for id in ids {
            if trove_model::is_synthetic_stream_id(&id) {
                target.insert(id);
            } else if tree.contains(&id) {
                target.extend(tree.descendants(&id));
            } else {
                missing.push(id);
            }
        }
    };
    expand_into(any.clone(), &mut sets.any);
    expand_into(not, &mut sets.not);
    // `all` entries stay exact: the event must belong to each listed stream.
    for id in all {
        if !trove_model::is_synthetic_stream_id(&id) && !tree.contains(&id) {
            missing.push(id.clone());
        }
        sets.all.push(id);
    }
    if !missing.is_empty() {
        return Err(ApiError::unknown_referenced_resource(
            "Unknown referenced stream(s)",
            json!({ "streamIds": missing }),
        ));
    }
    Ok(sets)
}

async fn get(
    ctx: &mut ApiContext,
    params: &mut Value,
    result: &mut ResultBuilder,
) -> Result<(), ApiError> {
    if params.get("withDeletions").is_some() {
        // Common mistyped alias; reject it explicitly.
        return Err(ApiError::invalid_parameters(
            "Unknown parameter \"withDeletions\"; did you mean \"includeDeletions\"?",
        ));
    }
    let p: GetParams = parse(params)?;
    let user_id = ctx.user()?.id.clone();
    let tree = ctx.services.load_tree(&user_id).await?;
    let access = ctx.access()?.clone();

    let mut sets = match &p.streams {
        Some(value) => Some(expand_streams(value, &tree)?),
        None => None,
    };

    // Access scoping: a restricted access only ever sees its readable
    // subtrees; asking for anything else is a straight denial.
    if let Some(roots) = access.readable_roots() {
        let mut allowed: HashSet<String> = HashSet::new();
        for root in roots {
            if tree.contains(&root) {
                allowed.extend(tree.descendants(&root));
            } else {
                allowed.insert(root);
            }
        }
        match &mut sets {
            Some(sets) => {
                if sets.any.is_empty() {
                    sets.any = allowed;
                } else {
                    if sets.any.iter().any(|id| !allowed.contains(id)) {
                        return Err(ApiError::forbidden(
                            "The access does not cover the requested streams",
                        ));
                    }
                    sets.any.retain(|id| allowed.contains(id));
                }
            }
            None => {
                sets = Some(StreamSets {
                    any: allowed,
                    ..Default::default()
                })
            }
        }
    }

    let state = match p.state.as_deref() {
        Some(s) => StateFilter::parse(s)
            .ok_or_else(|| ApiError::invalid_parameters("state must be default, trashed or all"))?,
        None => StateFilter::Default,
    };

    let query = EventQuery {
        streams: sets,
        tag_streams: p
            .tags
            .iter()
            .flatten()
            .map(|t| format!("{}{}", trove_model::TAG_PREFIX, t.trim()))
            .collect(),
        types: p.types.clone().unwrap_or_default(),
        from_time: p.from_time,
        to_time: p.to_time,
        state,
        modified_since: p.modified_since,
        running: p.running.unwrap_or(false),
        sort_ascending: p.sort_ascending.unwrap_or(false),
        skip: p.skip.unwrap_or(0) as usize,
        limit: Some(p.limit.map(|l| l as usize).unwrap_or(DEFAULT_LIMIT)),
    };

    let services = ctx.services.clone();
    let secret = services.config.auth.secret.clone();
    let access_for_tokens = access.access.clone();
    let source = services
        .storage
        .events
        .query(&user_id, &query)
        .map(move |item| {
            item.map(|event| {
                event.api_value(&|a: &Attachment| {
                    trove_access::read_token::derive(
                        &a.id,
                        &access_for_tokens.id,
                        &access_for_tokens.token,
                        &secret,
                    )
                })
            })
            .map_err(helpers::store_error)
        })
        .boxed();
    result.add_stream("events", source).await?;

    if p.include_deletions.unwrap_or(false) || p.modified_since.is_some() {
        let deletions = services
            .storage
            .events
            .deletions(&user_id, p.modified_since)
            .await
            .map_err(helpers::store_error)?;
        result.set("eventDeletions", json!(deletions));
    }
    Ok(())
}

// ── events.getOne ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct GetOneParams {
    id: String,
    #[serde(default)]
    include_history: Option<bool>,
}

async fn load_event(ctx: &ApiContext, id: &str) -> Result<Event, ApiError> {
    let user_id = ctx.user()?.id.clone();
    ctx.services
        .storage
        .events
        .get(&user_id, id)
        .await
        .map_err(helpers::store_error)?
        .ok_or_else(|| ApiError::unknown_resource("event", id))
}

fn render(ctx: &ApiContext, event: &Event) -> Value {
    event.api_value(&|a: &Attachment| ctx.read_token_for(&a.id))
}

async fn get_one(
    ctx: &mut ApiContext,
    params: &mut Value,
    result: &mut ResultBuilder,
) -> Result<(), ApiError> {
    let p: GetOneParams = parse(params)?;
    let event = load_event(ctx, &p.id).await?;
    let user_id = ctx.user()?.id.clone();
    let tree = ctx.services.load_tree(&user_id).await?;
    if !ctx
        .access()?
        .can_on_any(&tree, &event.stream_ids, PermissionLevel::Read)
    {
        return Err(ApiError::forbidden("The access does not cover this event"));
    }
    if p.include_history.unwrap_or(false) {
        let history = ctx
            .services
            .storage
            .events
            .history(&user_id, &event.id)
            .await
            .map_err(helpers::store_error)?;
        let rendered: Vec<Value> = history.iter().map(|e| render(ctx, e)).collect();
        result.set("history", Value::Array(rendered));
    }
    result.set("event", render(ctx, &event));
    Ok(())
}

// ── events.create ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct CreateParams {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    stream_id: Option<String>,
    #[serde(default)]
    stream_ids: Option<Vec<String>>,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    time: Option<f64>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    client_data: Option<Value>,
}

/// Check that every non-synthetic id refers to an existing, non-trashed
/// stream.
fn check_streams_exist(tree: &StreamTree, stream_ids: &[String]) -> Result<(), ApiError> {
    let mut missing = Vec::new();
    for id in stream_ids {
        if trove_model::is_synthetic_stream_id(id) {
            continue;
        }
        match tree.get(id) {
            None => missing.push(id.clone()),
            Some(stream) if stream.trashed => {
                return Err(ApiError::invalid_operation(format!(
                    "Stream \"{id}\" is trashed"
                )))
            }
            Some(_) => {}
        }
    }
    if !missing.is_empty() {
        return Err(ApiError::unknown_referenced_resource(
            "Unknown referenced stream(s)",
            json!({ "streamIds": missing }),
        ));
    }
    Ok(())
}

/// The real (non-synthetic) ids of a stream set.
fn real_ids(stream_ids: &[String]) -> Vec<String> {
    stream_ids
        .iter()
        .filter(|id| !trove_model::is_synthetic_stream_id(id))
        .cloned()
        .collect()
}

async fn create(
    ctx: &mut ApiContext,
    params: &mut Value,
    result: &mut ResultBuilder,
) -> Result<(), ApiError> {
    let p: CreateParams = parse(params)?;
    if p.stream_id.is_some() && p.stream_ids.is_some() {
        return Err(ApiError::invalid_operation(
            "Provide either streamId or streamIds, not both",
        ));
    }
    let mut stream_ids = match (&p.stream_id, &p.stream_ids) {
        (Some(single), None) => vec![single.clone()],
        (None, Some(many)) => event_rules::normalize_stream_ids(many.clone()),
        (None, None) => {
            return Err(ApiError::invalid_parameters("streamIds is required"));
        }
        (Some(_), Some(_)) => unreachable!(),
    };
    if stream_ids.is_empty() {
        return Err(ApiError::invalid_parameters("streamIds must not be empty"));
    }
    if !event_rules::is_valid_event_type(&p.event_type) {
        return Err(ApiError::invalid_parameters(format!(
            "Invalid event type \"{}\"",
            p.event_type
        )));
    }
    if p.event_type.starts_with("series:") {
        return Err(ApiError::invalid_operation(
            "Series events are not accepted by this API",
        ));
    }
    types::validate_content(&p.event_type, p.content.as_ref())?;
    if let Some(tags) = &p.tags {
        event_rules::migrate_tags(&mut stream_ids, tags);
    }

    let user_id = ctx.user()?.id.clone();
    let tree = ctx.services.load_tree(&user_id).await?;
    check_streams_exist(&tree, &stream_ids)?;
    // Creation requires create-or-higher on every stream listed.
    if !ctx
        .access()?
        .can_on_all(&tree, &real_ids(&stream_ids), PermissionLevel::CreateOnly)
    {
        return Err(ApiError::forbidden(
            "The access does not cover all target streams",
        ));
    }

    let id = match p.id {
        Some(id) => {
            if !trove_model::id::is_cuid_like(&id) {
                return Err(ApiError::invalid_parameters(format!(
                    "Invalid event id \"{id}\""
                )));
            }
            if ctx
                .services
                .storage
                .events
                .id_known(&user_id, &id)
                .await
                .map_err(helpers::store_error)?
            {
                return Err(ApiError::item_already_exists("event", json!({ "id": id })));
            }
            id
        }
        None => trove_model::id::generate(),
    };

    let now = trove_model::time::now();
    let actor = ctx.actor();
    let mut event = Event {
        id,
        stream_ids,
        event_type: p.event_type,
        time: p.time.unwrap_or(now),
        duration: p.duration,
        content: p.content,
        description: p.description,
        client_data: p.client_data,
        trashed: false,
        attachments: Vec::new(),
        created: now,
        created_by: actor.clone(),
        modified: now,
        modified_by: actor,
        head_id: None,
        integrity: None,
    };
    event.seal();
    ctx.services
        .storage
        .events
        .insert(&user_id, event.clone())
        .await
        .map_err(helpers::store_error)?;

    if !ctx.uploads.is_empty() {
        attach_uploads(ctx, &user_id, &mut event).await?;
    }
    result.set("event", render(ctx, &event));
    Ok(())
}

// ── events.update ────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase", default)]
struct UpdateFields {
    stream_id: Option<String>,
    stream_ids: Option<Vec<String>>,
    #[serde(rename = "type")]
    event_type: Option<String>,
    time: Option<f64>,
    duration: Option<f64>,
    content: Option<Value>,
    tags: Option<Vec<String>>,
    description: Option<String>,
    client_data: Option<Value>,
    trashed: Option<bool>,
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
        .ok_or_else(|| ApiError::invalid_parameters("Missing event id"))?;
    let update_map = helpers::update_map(params)?;
    let guarded = helpers::guard_update_fields(
        update_map,
        trove_model::fields::EVENT_ALTERABLE,
        ctx.services.config.update_mode,
    )?;
    let fields: UpdateFields = parse(&Value::Object(guarded))?;
    if fields.stream_id.is_some() && fields.stream_ids.is_some() {
        return Err(ApiError::invalid_operation(
            "Provide either streamId or streamIds, not both",
        ));
    }

    let mut event = load_event(ctx, &id).await?;
    let user_id = ctx.user()?.id.clone();
    let tree = ctx.services.load_tree(&user_id).await?;
    let access = ctx.access()?.clone();

    if !access.can_on_any(&tree, &event.stream_ids, PermissionLevel::Contribute) {
        return Err(ApiError::forbidden("The access does not cover this event"));
    }

    // Resolve the new stream-id set.
    let mut new_ids = match (&fields.stream_id, &fields.stream_ids) {
        (Some(single), None) => vec![single.clone()],
        (None, Some(many)) => event_rules::normalize_stream_ids(many.clone()),
        (None, None) => event.stream_ids.clone(),
        (Some(_), Some(_)) => unreachable!(),
    };
    if let Some(tags) = &fields.tags {
        new_ids.retain(|id| !id.starts_with(trove_model::TAG_PREFIX));
        event_rules::migrate_tags(&mut new_ids, tags);
    }
    new_ids = event_rules::normalize_stream_ids(new_ids);
    if new_ids.is_empty() {
        return Err(ApiError::invalid_parameters("streamIds must not be empty"));
    }

    if new_ids != event.stream_ids {
        let old: HashSet<&String> = event.stream_ids.iter().collect();
        let new: HashSet<&String> = new_ids.iter().collect();
        let affected: Vec<String> = old
            .symmetric_difference(&new)
            .filter(|id| !trove_model::is_synthetic_stream_id(id))
            .map(|id| (*id).clone())
            .collect();
        // Adding or removing a stream requires contribute on that stream;
        // unchanged memberships are not re-checked.
        if !access.can_on_all(&tree, &affected, PermissionLevel::Contribute) {
            return Err(ApiError::forbidden(
                "The access does not cover all affected streams",
            ));
        }
        check_streams_exist(&tree, &new_ids)?;
    }

    if let Some(new_type) = &fields.event_type {
        if !event_rules::is_valid_event_type(new_type) {
            return Err(ApiError::invalid_parameters(format!(
                "Invalid event type \"{new_type}\""
            )));
        }
        if new_type.starts_with("series:") != event.is_series() {
            return Err(ApiError::invalid_operation(
                "Cannot switch an event between series and non-series types",
            ));
        }
    }

    // Keep the superseded version for the history chain.
    let mut version = event.clone();
    version.head_id = Some(event.id.clone());
    version.id = trove_model::id::generate();
    ctx.services
        .storage
        .events
        .insert_version(&user_id, version)
        .await
        .map_err(helpers::store_error)?;

    event.stream_ids = new_ids;
    if let Some(t) = fields.event_type {
        event.event_type = t;
    }
    if let Some(t) = fields.time {
        event.time = t;
    }
    if fields.duration.is_some() {
        event.duration = fields.duration;
    }
    if fields.content.is_some() {
        event.content = fields.content;
    }
    if fields.description.is_some() {
        event.description = fields.description;
    }
    if fields.client_data.is_some() {
        event.client_data = fields.client_data;
    }
    if let Some(trashed) = fields.trashed {
        event.trashed = trashed;
    }
    types::validate_content(&event.event_type, event.content.as_ref())?;

    event.modified = trove_model::time::now();
    event.modified_by = ctx.actor();
    event.seal();
    ctx.services
        .storage
        .events
        .update(&user_id, event.clone())
        .await
        .map_err(helpers::store_error)?;
    result.set("event", render(ctx, &event));
    Ok(())
}

// ── events.delete ────────────────────────────────────────────────────────

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
    let mut event = load_event(ctx, &p.id).await?;
    let user_id = ctx.user()?.id.clone();
    let tree = ctx.services.load_tree(&user_id).await?;
    if !ctx
        .access()?
        .can_on_any(&tree, &event.stream_ids, PermissionLevel::Contribute)
    {
        return Err(ApiError::forbidden("The access does not cover this event"));
    }

    if !event.trashed {
        event.trashed = true;
        event.modified = trove_model::time::now();
        event.modified_by = ctx.actor();
        event.seal();
        ctx.services
            .storage
            .events
            .update(&user_id, event.clone())
            .await
            .map_err(helpers::store_error)?;
        result.set("event", render(ctx, &event));
        return Ok(());
    }

    // Second call: permanent deletion with attachment accounting.
    let attached: i64 = event.attachments.iter().map(|a| a.size as i64).sum();
    ctx.services
        .storage
        .attachments
        .delete_event(&user_id, &event.id)
        .await
        .map_err(helpers::store_error)?;
    if attached > 0 {
        let mut user = ctx.user()?.clone();
        user.storage_used.attached_files = (user.storage_used.attached_files - attached).max(0);
        ctx.services
            .storage
            .users
            .update(user.clone())
            .await
            .map_err(helpers::store_error)?;
        ctx.user = Some(user);
    }
    let tombstone = Deletion::new(event.id.as_str(), trove_model::time::now());
    ctx.services
        .storage
        .events
        .delete(&user_id, &event.id, tombstone.clone())
        .await
        .map_err(helpers::store_error)?;
    result.set("eventDeletion", json!(tombstone));
    Ok(())
}

// ── attachments ──────────────────────────────────────────────────────────

async fn attach_uploads(
    ctx: &mut ApiContext,
    user_id: &str,
    event: &mut Event,
) -> Result<(), ApiError> {
    let uploads = std::mem::take(&mut ctx.uploads);
    let mut added: i64 = 0;
    for upload in uploads {
        let attachment_id = trove_model::id::generate();
        let integrity = trove_model::integrity::compute_bytes(&upload.data);
        let size = ctx
            .services
            .storage
            .attachments
            .save(user_id, &event.id, &attachment_id, upload.data.clone())
            .await
            .map_err(helpers::store_error)?;
        added += size as i64;
        event.attachments.push(Attachment {
            id: attachment_id,
            file_name: upload.file_name,
            content_type: upload.content_type,
            size,
            integrity: Some(integrity),
        });
    }
    event.modified = trove_model::time::now();
    event.modified_by = ctx.actor();
    event.seal();
    ctx.services
        .storage
        .events
        .update(user_id, event.clone())
        .await
        .map_err(helpers::store_error)?;
    if added > 0 {
        let mut user = ctx.user()?.clone();
        user.storage_used.attached_files += added;
        ctx.services
            .storage
            .users
            .update(user.clone())
            .await
            .map_err(helpers::store_error)?;
        ctx.user = Some(user);
    }
    Ok(())
}

async fn add_attachments(
    ctx: &mut ApiContext,
    params: &mut Value,
    result: &mut ResultBuilder,
) -> Result<(), ApiError> {
    let p: DeleteParams = parse(params)?;
    if ctx.uploads.is_empty() {
        return Err(ApiError::invalid_request_structure(
            "No file parts in the request",
        ));
    }
    let mut event = load_event(ctx, &p.id).await?;
    let user_id = ctx.user()?.id.clone();
    let tree = ctx.services.load_tree(&user_id).await?;
    if !ctx
        .access()?
        .can_on_any(&tree, &event.stream_ids, PermissionLevel::Contribute)
    {
        return Err(ApiError::forbidden("The access does not cover this event"));
    }
    attach_uploads(ctx, &user_id, &mut event).await?;
    result.set("event", render(ctx, &event));
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct DeleteAttachmentParams {
    id: String,
    file_id: String,
}

async fn delete_attachment(
    ctx: &mut ApiContext,
    params: &mut Value,
    result: &mut ResultBuilder,
) -> Result<(), ApiError> {
    let p: DeleteAttachmentParams = parse(params)?;
    let mut event = load_event(ctx, &p.id).await?;
    let user_id = ctx.user()?.id.clone();
    let tree = ctx.services.load_tree(&user_id).await?;
    if !ctx
        .access()?
        .can_on_any(&tree, &event.stream_ids, PermissionLevel::Contribute)
    {
        return Err(ApiError::forbidden("The access does not cover this event"));
    }
    let index = event
        .attachments
        .iter()
        .position(|a| a.id == p.file_id)
        .ok_or_else(|| ApiError::unknown_resource("attachment", &p.file_id))?;
    let removed = event.attachments.remove(index);
    ctx.services
        .storage
        .attachments
        .delete(&user_id, &event.id, &removed.id)
        .await
        .map_err(helpers::store_error)?;
    let mut user = ctx.user()?.clone();
    user.storage_used.attached_files =
        (user.storage_used.attached_files - removed.size as i64).max(0);
    ctx.services
        .storage
        .users
        .update(user.clone())
        .await
        .map_err(helpers::store_error)?;
    ctx.user = Some(user);

    event.modified = trove_model::time::now();
    event.modified_by = ctx.actor();
    event.seal();
    ctx.services
        .storage
        .events
        .update(&user_id, event.clone())
        .await
        .map_err(helpers::store_error)?;
    result.set("event", render(ctx, &event));
    Ok(())
}

// ── attachment download (transport helper) ───────────────────────────────

/// How a download request authenticates.
pub enum DownloadAuth {
    Access(trove_access::AuthPayload),
    ReadToken(String),
}

/// Resolve and authorize an attachment download. Returns the attachment
/// descriptor and the file bytes.
pub async fn read_attachment(
    services: &crate::context::Services,
    username: &str,
    event_id: &str,
    file_id: &str,
    auth: DownloadAuth,
) -> Result<(Attachment, bytes::Bytes), ApiError> {
    let user = services.resolve_user(username).await?;
    let event = services
        .storage
        .events
        .get(&user.id, event_id)
        .await
        .map_err(helpers::store_error)?
        .ok_or_else(|| ApiError::unknown_resource("event", event_id))?;
    let attachment = event
        .attachments
        .iter()
        .find(|a| a.id == file_id)
        .cloned()
        .ok_or_else(|| ApiError::unknown_resource("attachment", file_id))?;

    match auth {
        DownloadAuth::Access(payload) => {
            let access = services
                .storage
                .accesses
                .get_by_token(&user.id, &payload.token)
                .await
                .map_err(helpers::store_error)?
                .ok_or_else(|| ApiError::invalid_access_token("Unknown access token"))?;
            if access.is_expired(trove_model::time::now()) {
                return Err(ApiError::invalid_access_token("Access has expired"));
            }
            let logic = AccessLogicCheck::new(services, &user.id, access).await?;
            if !logic.can_read_any(&event.stream_ids) {
                return Err(ApiError::forbidden("The access does not cover this event"));
            }
        }
        DownloadAuth::ReadToken(token) => {
            let access_id = trove_access::read_token::access_id_of(&token)
                .ok_or_else(|| ApiError::invalid_access_token("Malformed read token"))?;
            let access = services
                .storage
                .accesses
                .get(&user.id, access_id)
                .await
                .map_err(helpers::store_error)?
                .ok_or_else(|| ApiError::invalid_access_token("Invalid read token"))?;
            if !trove_access::read_token::matches(
                &token,
                &attachment.id,
                &access.id,
                &access.token,
                &services.config.auth.secret,
            ) {
                return Err(ApiError::invalid_access_token("Invalid read token"));
            }
        }
    }

    let data = services
        .storage
        .attachments
        .read(&user.id, event_id, file_id)
        .await
        .map_err(helpers::store_error)?
        .ok_or_else(|| ApiError::unknown_resource("attachment", file_id))?;
    Ok((attachment, data))
}

/// Small adapter bundling an access with the user's tree for one check.
struct AccessLogicCheck {
    logic: trove_access::AccessLogic,
    tree: StreamTree,
}

impl AccessLogicCheck {
    async fn new(
        services: &crate::context::Services,
        user_id: &str,
        access: trove_model::Access,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            logic: trove_access::AccessLogic::new(access),
            tree: services.load_tree(user_id).await?,
        })
    }

    fn can_read_any(&self, stream_ids: &[String]) -> bool {
        self.logic
            .can_on_any(&self.tree, stream_ids, PermissionLevel::Read)
    }
}
