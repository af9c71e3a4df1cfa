//! The HTTP route table and handlers.
//!
//! Every handler converts the request into `(methodId, params, auth)` and
//! hands it to the shared dispatcher; the route table is the only place
//! where paths and method ids meet.

use axum::extract::{FromRequest, Multipart, Path, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Map, Value};

use trove_core::ApiError;

use crate::attachments;
use crate::auth;
use crate::compat;
use crate::envelope;
use crate::multipart;
use crate::state::AppState;
use crate::ws;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_info))
        .route("/system/create-user", post(system_create_user))
        .route("/system/user-info/{username}", get(system_user_info))
        .route("/system/users/{username}/mfa", delete(system_clear_mfa))
        .route("/event/start", post(gone))
        .route("/event/stop", post(gone))
        .route("/{username}", post(call_batch))
        .route("/{username}/auth/login", post(auth_login))
        .route("/{username}/auth/logout", post(auth_logout))
        .route("/{username}/access-info", get(access_info))
        .route("/{username}/service/info", get(service_info))
        .route(
            "/{username}/account",
            get(account_get).put(account_update),
        )
        .route("/{username}/account/change-password", post(change_password))
        .route(
            "/{username}/account/request-password-reset",
            post(request_password_reset),
        )
        .route("/{username}/account/reset-password", post(reset_password))
        .route("/{username}/events", get(events_get).post(events_create))
        .route(
            "/{username}/events/{id}",
            get(events_get_one)
                .put(events_update)
                .delete(events_delete)
                .post(events_attach),
        )
        .route(
            "/{username}/events/{id}/{file_id}",
            get(attachment_download).delete(attachment_delete),
        )
        .route(
            "/{username}/events/{id}/{file_id}/{pretty_name}",
            get(attachment_download_named),
        )
        .route("/{username}/streams", get(streams_get).post(streams_create))
        .route(
            "/{username}/streams/{id}",
            axum::routing::put(streams_update).delete(streams_delete),
        )
        .route("/{username}/accesses", get(accesses_get).post(accesses_create))
        .route(
            "/{username}/accesses/{id}",
            axum::routing::put(accesses_update).delete(accesses_delete),
        )
        .route(
            "/{username}/followed-slices",
            get(followed_slices_get).post(followed_slices_create),
        )
        .route(
            "/{username}/followed-slices/{id}",
            axum::routing::put(followed_slices_update).delete(followed_slices_delete),
        )
        .route(
            "/{username}/profile/{scope}",
            get(profile_get).put(profile_update),
        )
        .route("/{username}/socket", get(ws::upgrade))
        .layer(axum::extract::DefaultBodyLimit::max(
            state.services.config.limits.attachment_max_bytes + 1024 * 1024,
        ))
        .layer(axum::middleware::from_fn(compat::urlencoded_compat))
        .layer(axum::middleware::from_fn(compat::host_username_compat))
        .layer(axum::middleware::map_response(set_api_version))
        .layer(crate::cors_layer())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn set_api_version(mut response: Response) -> Response {
    response.headers_mut().insert(
        "api-version",
        HeaderValue::from_static(trove_core::API_VERSION),
    );
    response
}

// ── plumbing ─────────────────────────────────────────────────────────────

fn parse_body(headers: &HeaderMap, bytes: &[u8]) -> Result<Map<String, Value>, ApiError> {
    if bytes.is_empty() {
        return Ok(Map::new());
    }
    if let Some(content_type) = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok())
    {
        if !content_type.starts_with("application/json") {
            return Err(ApiError::unsupported_content_type(content_type));
        }
    }
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ApiError::invalid_request_structure(
            "The request body must be a JSON object",
        )),
        Err(e) => Err(ApiError::invalid_request_structure(format!(
            "Unparsable JSON body: {e}"
        ))),
    }
}

/// Run one method: query params (coerced) merged with body params.
async fn run(
    state: &AppState,
    username: &str,
    method_id: &str,
    headers: &HeaderMap,
    uri: &Uri,
    body: Map<String, Value>,
    success_status: StatusCode,
) -> Response {
    let mut params = compat::query_params(uri.query());
    let auth = auth::resolve(headers, &params);
    auth::strip_transport_params(&mut params);
    trove_api::coercion_for(method_id).apply(&mut params);
    for (key, value) in body {
        params.insert(key, value);
    }

    let origin = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let mut ctx = state.context(username).with_auth(auth).with_origin(origin);
    let outcome = state
        .registry
        .call(method_id, &mut ctx, Value::Object(params))
        .await;
    envelope::render(&state.services.config, outcome, success_status)
}

async fn collect_bytes(req: Request) -> Result<(HeaderMap, bytes::Bytes), ApiError> {
    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, 10 * 1024 * 1024)
        .await
        .map_err(|e| ApiError::invalid_request_structure(format!("Unreadable body: {e}")))?;
    Ok((parts.headers, bytes))
}

macro_rules! try_render {
    ($state:expr, $expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(err) => return envelope::failure(&$state.services.config, &err),
        }
    };
}

// ── info & deprecated ────────────────────────────────────────────────────

async fn root_info(State(state): State<AppState>) -> Response {
    let config = &state.services.config;
    envelope::success(
        config,
        json!({
            "name": config.service.name,
            "apiVersion": trove_core::API_VERSION,
            "serial": config.service.serial,
        }),
        StatusCode::OK,
    )
}

async fn service_info(State(state): State<AppState>) -> Response {
    Json(state.services.config.service.info.clone()).into_response()
}

async fn gone(State(state): State<AppState>) -> Response {
    envelope::failure(
        &state.services.config,
        &ApiError::gone("This endpoint has been removed; use /events instead"),
    )
}

// ── system ───────────────────────────────────────────────────────────────

async fn system_create_user(State(state): State<AppState>, req: Request) -> Response {
    let uri = req.uri().clone();
    let (headers, bytes) = try_render!(state, collect_bytes(req).await);
    let body = try_render!(state, parse_body(&headers, &bytes));
    run(
        &state,
        "",
        "system.createUser",
        &headers,
        &uri,
        body,
        StatusCode::CREATED,
    )
    .await
}

async fn system_user_info(
    State(state): State<AppState>,
    Path(username): Path<String>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let mut body = Map::new();
    body.insert("username".into(), json!(username));
    run(
        &state,
        "",
        "system.getUserInfo",
        &headers,
        &uri,
        body,
        StatusCode::OK,
    )
    .await
}

async fn system_clear_mfa(
    State(state): State<AppState>,
    Path(username): Path<String>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let mut body = Map::new();
    body.insert("username".into(), json!(username));
    let mut params = compat::query_params(uri.query());
    let auth = auth::resolve(&headers, &params);
    auth::strip_transport_params(&mut params);
    let mut ctx = state.context("").with_auth(auth);
    match state
        .registry
        .call("system.clearMfa", &mut ctx, Value::Object(body))
        .await
    {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => envelope::failure(&state.services.config, &err),
    }
}

// ── batch ────────────────────────────────────────────────────────────────

async fn call_batch(
    State(state): State<AppState>,
    Path(username): Path<String>,
    req: Request,
) -> Response {
    let uri = req.uri().clone();
    let (headers, bytes) = try_render!(state, collect_bytes(req).await);
    let calls: Value = try_render!(
        state,
        serde_json::from_slice(&bytes).map_err(|e| ApiError::invalid_request_structure(
            format!("Unparsable batch body: {e}")
        ))
    );
    let query = compat::query_params(uri.query());
    let auth = auth::resolve(&headers, &query);
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let mut ctx = state.context(&username).with_auth(auth).with_origin(origin);
    let outcome = state.registry.call("callBatch", &mut ctx, calls).await;
    envelope::render(&state.services.config, outcome, StatusCode::OK)
}

// ── auth & account ───────────────────────────────────────────────────────

async fn auth_login(
    State(state): State<AppState>,
    Path(username): Path<String>,
    req: Request,
) -> Response {
    let uri = req.uri().clone();
    let (headers, bytes) = try_render!(state, collect_bytes(req).await);
    let body = try_render!(state, parse_body(&headers, &bytes));
    run(&state, &username, "auth.login", &headers, &uri, body, StatusCode::OK).await
}

async fn auth_logout(
    State(state): State<AppState>,
    Path(username): Path<String>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    run(&state, &username, "auth.logout", &headers, &uri, Map::new(), StatusCode::OK).await
}

async fn access_info(
    State(state): State<AppState>,
    Path(username): Path<String>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    run(&state, &username, "getAccessInfo", &headers, &uri, Map::new(), StatusCode::OK).await
}

async fn account_get(
    State(state): State<AppState>,
    Path(username): Path<String>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    run(&state, &username, "account.get", &headers, &uri, Map::new(), StatusCode::OK).await
}

async fn account_update(
    State(state): State<AppState>,
    Path(username): Path<String>,
    req: Request,
) -> Response {
    update_call(state, username, "account.update", None, req).await
}

async fn change_password(
    State(state): State<AppState>,
    Path(username): Path<String>,
    req: Request,
) -> Response {
    let uri = req.uri().clone();
    let (headers, bytes) = try_render!(state, collect_bytes(req).await);
    let body = try_render!(state, parse_body(&headers, &bytes));
    run(
        &state,
        &username,
        "account.changePassword",
        &headers,
        &uri,
        body,
        StatusCode::OK,
    )
    .await
}

async fn request_password_reset(
    State(state): State<AppState>,
    Path(username): Path<String>,
    req: Request,
) -> Response {
    let uri = req.uri().clone();
    let (headers, bytes) = try_render!(state, collect_bytes(req).await);
    let body = try_render!(state, parse_body(&headers, &bytes));
    run(
        &state,
        &username,
        "account.requestPasswordReset",
        &headers,
        &uri,
        body,
        StatusCode::OK,
    )
    .await
}

async fn reset_password(
    State(state): State<AppState>,
    Path(username): Path<String>,
    req: Request,
) -> Response {
    let uri = req.uri().clone();
    let (headers, bytes) = try_render!(state, collect_bytes(req).await);
    let body = try_render!(state, parse_body(&headers, &bytes));
    run(
        &state,
        &username,
        "account.resetPassword",
        &headers,
        &uri,
        body,
        StatusCode::OK,
    )
    .await
}

// ── events ───────────────────────────────────────────────────────────────

async fn events_get(
    State(state): State<AppState>,
    Path(username): Path<String>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    run(&state, &username, "events.get", &headers, &uri, Map::new(), StatusCode::OK).await
}

async fn events_get_one(
    State(state): State<AppState>,
    Path((username, id)): Path<(String, String)>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let mut body = Map::new();
    body.insert("id".into(), json!(id));
    run(&state, &username, "events.getOne", &headers, &uri, body, StatusCode::OK).await
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("multipart/form-data"))
        .unwrap_or(false)
}

async fn events_create(
    State(state): State<AppState>,
    Path(username): Path<String>,
    req: Request,
) -> Response {
    let uri = req.uri().clone();
    let headers = req.headers().clone();
    if is_multipart(&headers) {
        let multipart = match Multipart::from_request(req, &()).await {
            Ok(m) => m,
            Err(rejection) => {
                let err = ApiError::invalid_request_structure(rejection.body_text());
                return envelope::failure(&state.services.config, &err);
            }
        };
        let collected = try_render!(state, multipart::collect(multipart).await);
        let (event, uploads) = try_render!(state, multipart::require_event(collected));
        try_render!(
            state,
            multipart::check_upload_sizes(&uploads, state.services.config.limits.attachment_max_bytes)
        );
        let body = match event {
            Value::Object(map) => map,
            _ => {
                let err = ApiError::invalid_request_structure(
                    "The \"event\" part must be a JSON object",
                );
                return envelope::failure(&state.services.config, &err);
            }
        };
        let params = Value::Object(body);
        let query = compat::query_params(uri.query());
        let auth = auth::resolve(&headers, &query);
        let mut ctx = state.context(&username).with_auth(auth).with_uploads(uploads);
        let outcome = state.registry.call("events.create", &mut ctx, params).await;
        return envelope::render(&state.services.config, outcome, StatusCode::CREATED);
    }
    let (headers, bytes) = try_render!(state, collect_bytes(req).await);
    let body = try_render!(state, parse_body(&headers, &bytes));
    run(
        &state,
        &username,
        "events.create",
        &headers,
        &uri,
        body,
        StatusCode::CREATED,
    )
    .await
}

async fn events_attach(
    State(state): State<AppState>,
    Path((username, id)): Path<(String, String)>,
    req: Request,
) -> Response {
    let uri = req.uri().clone();
    let headers = req.headers().clone();
    if !is_multipart(&headers) {
        let err = ApiError::invalid_request_structure(
            "Attaching files requires multipart/form-data content",
        );
        return envelope::failure(&state.services.config, &err);
    }
    let multipart = match Multipart::from_request(req, &()).await {
        Ok(m) => m,
        Err(rejection) => {
            let err = ApiError::invalid_request_structure(rejection.body_text());
            return envelope::failure(&state.services.config, &err);
        }
    };
    let collected = try_render!(state, multipart::collect(multipart).await);
    if collected.event.is_some() {
        let err = ApiError::invalid_request_structure(
            "Unexpected \"event\" part when attaching to an existing event",
        );
        return envelope::failure(&state.services.config, &err);
    }
    try_render!(
        state,
        multipart::check_upload_sizes(
            &collected.uploads,
            state.services.config.limits.attachment_max_bytes
        )
    );
    let query = compat::query_params(uri.query());
    let auth = auth::resolve(&headers, &query);
    let mut ctx = state
        .context(&username)
        .with_auth(auth)
        .with_uploads(collected.uploads);
    let outcome = state
        .registry
        .call("events.addAttachments", &mut ctx, json!({ "id": id }))
        .await;
    envelope::render(&state.services.config, outcome, StatusCode::OK)
}

/// Wrap a PUT body as `{id?, update}` params.
async fn update_call(
    state: AppState,
    username: String,
    method_id: &str,
    id: Option<String>,
    req: Request,
) -> Response {
    let uri = req.uri().clone();
    let (headers, bytes) = try_render!(state, collect_bytes(req).await);
    let update = try_render!(state, parse_body(&headers, &bytes));
    let mut body = Map::new();
    if let Some(id) = id {
        body.insert("id".into(), json!(id));
    }
    body.insert("update".into(), Value::Object(update));
    run(&state, &username, method_id, &headers, &uri, body, StatusCode::OK).await
}

async fn events_update(
    State(state): State<AppState>,
    Path((username, id)): Path<(String, String)>,
    req: Request,
) -> Response {
    update_call(state, username, "events.update", Some(id), req).await
}

async fn events_delete(
    State(state): State<AppState>,
    Path((username, id)): Path<(String, String)>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let mut body = Map::new();
    body.insert("id".into(), json!(id));
    run(&state, &username, "events.delete", &headers, &uri, body, StatusCode::OK).await
}

async fn attachment_download(
    State(state): State<AppState>,
    Path((username, id, file_id)): Path<(String, String, String)>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let query = compat::query_params(uri.query());
    attachments::download(&state.services, &username, &id, &file_id, &headers, &query).await
}

async fn attachment_download_named(
    State(state): State<AppState>,
    Path((username, id, file_id, _pretty_name)): Path<(String, String, String, String)>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    // The trailing file name is cosmetic and ignored.
    let query = compat::query_params(uri.query());
    attachments::download(&state.services, &username, &id, &file_id, &headers, &query).await
}

async fn attachment_delete(
    State(state): State<AppState>,
    Path((username, id, file_id)): Path<(String, String, String)>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let mut body = Map::new();
    body.insert("id".into(), json!(id));
    body.insert("fileId".into(), json!(file_id));
    run(
        &state,
        &username,
        "events.deleteAttachment",
        &headers,
        &uri,
        body,
        StatusCode::OK,
    )
    .await
}

// ── streams ──────────────────────────────────────────────────────────────

async fn streams_get(
    State(state): State<AppState>,
    Path(username): Path<String>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    run(&state, &username, "streams.get", &headers, &uri, Map::new(), StatusCode::OK).await
}

async fn streams_create(
    State(state): State<AppState>,
    Path(username): Path<String>,
    req: Request,
) -> Response {
    let uri = req.uri().clone();
    let (headers, bytes) = try_render!(state, collect_bytes(req).await);
    let body = try_render!(state, parse_body(&headers, &bytes));
    run(
        &state,
        &username,
        "streams.create",
        &headers,
        &uri,
        body,
        StatusCode::CREATED,
    )
    .await
}

async fn streams_update(
    State(state): State<AppState>,
    Path((username, id)): Path<(String, String)>,
    req: Request,
) -> Response {
    update_call(state, username, "streams.update", Some(id), req).await
}

async fn streams_delete(
    State(state): State<AppState>,
    Path((username, id)): Path<(String, String)>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let mut body = Map::new();
    body.insert("id".into(), json!(id));
    run(&state, &username, "streams.delete", &headers, &uri, body, StatusCode::OK).await
}

// ── accesses ─────────────────────────────────────────────────────────────

async fn accesses_get(
    State(state): State<AppState>,
    Path(username): Path<String>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    run(&state, &username, "accesses.get", &headers, &uri, Map::new(), StatusCode::OK).await
}

async fn accesses_create(
    State(state): State<AppState>,
    Path(username): Path<String>,
    req: Request,
) -> Response {
    let uri = req.uri().clone();
    let (headers, bytes) = try_render!(state, collect_bytes(req).await);
    let body = try_render!(state, parse_body(&headers, &bytes));
    run(
        &state,
        &username,
        "accesses.create",
        &headers,
        &uri,
        body,
        StatusCode::CREATED,
    )
    .await
}

async fn accesses_update(
    State(state): State<AppState>,
    Path((username, id)): Path<(String, String)>,
    req: Request,
) -> Response {
    update_call(state, username, "accesses.update", Some(id), req).await
}

async fn accesses_delete(
    State(state): State<AppState>,
    Path((username, id)): Path<(String, String)>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let mut body = Map::new();
    body.insert("id".into(), json!(id));
    run(&state, &username, "accesses.delete", &headers, &uri, body, StatusCode::OK).await
}

// ── followed slices ──────────────────────────────────────────────────────

async fn followed_slices_get(
    State(state): State<AppState>,
    Path(username): Path<String>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    run(&state, &username, "followedSlices.get", &headers, &uri, Map::new(), StatusCode::OK).await
}

async fn followed_slices_create(
    State(state): State<AppState>,
    Path(username): Path<String>,
    req: Request,
) -> Response {
    let uri = req.uri().clone();
    let (headers, bytes) = try_render!(state, collect_bytes(req).await);
    let body = try_render!(state, parse_body(&headers, &bytes));
    run(
        &state,
        &username,
        "followedSlices.create",
        &headers,
        &uri,
        body,
        StatusCode::CREATED,
    )
    .await
}

async fn followed_slices_update(
    State(state): State<AppState>,
    Path((username, id)): Path<(String, String)>,
    req: Request,
) -> Response {
    update_call(state, username, "followedSlices.update", Some(id), req).await
}

async fn followed_slices_delete(
    State(state): State<AppState>,
    Path((username, id)): Path<(String, String)>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let mut body = Map::new();
    body.insert("id".into(), json!(id));
    run(
        &state,
        &username,
        "followedSlices.delete",
        &headers,
        &uri,
        body,
        StatusCode::OK,
    )
    .await
}

// ── profile ──────────────────────────────────────────────────────────────

fn profile_method(scope: &str, update: bool) -> Option<&'static str> {
    match (scope, update) {
        ("public", false) => Some("profile.getPublic"),
        ("private", false) => Some("profile.get"),
        ("app", false) => Some("profile.getApp"),
        ("public", true) => Some("profile.updatePublic"),
        ("private", true) => Some("profile.update"),
        ("app", true) => Some("profile.updateApp"),
        _ => None,
    }
}

async fn profile_get(
    State(state): State<AppState>,
    Path((username, scope)): Path<(String, String)>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let Some(method_id) = profile_method(&scope, false) else {
        return envelope::failure(
            &state.services.config,
            &ApiError::unknown_resource("profile", &scope),
        );
    };
    run(&state, &username, method_id, &headers, &uri, Map::new(), StatusCode::OK).await
}

async fn profile_update(
    State(state): State<AppState>,
    Path((username, scope)): Path<(String, String)>,
    req: Request,
) -> Response {
    let Some(method_id) = profile_method(&scope, true) else {
        return envelope::failure(
            &state.services.config,
            &ApiError::unknown_resource("profile", &scope),
        );
    };
    update_call(state, username, method_id, None, req).await
}
