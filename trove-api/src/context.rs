//! Per-request context and the shared service bundle.

use std::sync::Arc;

use bytes::Bytes;

use trove_access::{AccessLogic, AuthPayload, CustomAuthStep};
use trove_cache::{CacheRegistry, CacheSync};
use trove_core::{ApiError, Registry, TroveConfig};
use trove_model::{StreamTree, User};
use trove_notify::Bus;
use trove_storage::Storage;
use trove_storage::prelude::*;

use crate::usage::UsageRecorder;

/// Process-wide collaborators, threaded explicitly (no globals). Cloning is
/// cheap; everything inside is shared.
#[derive(Clone)]
pub struct Services {
    pub storage: Storage,
    pub cache: Arc<CacheRegistry>,
    pub cache_sync: Arc<CacheSync>,
    pub bus: Arc<dyn Bus>,
    pub config: Arc<TroveConfig>,
    pub usage: Arc<UsageRecorder>,
    pub custom_auth: Option<Arc<dyn CustomAuthStep>>,
}

impl Services {
    /// Resolve a username to its user record, through the cache.
    pub async fn resolve_user(&self, username: &str) -> Result<User, ApiError> {
        if let Some(user_id) = self.cache.get_user_id(username) {
            if let Some(user) = self
                .storage
                .users
                .get_by_id(&user_id)
                .await
                .map_err(crate::helpers::store_error)?
            {
                return Ok(user);
            }
        }
        let user = self
            .storage
            .users
            .get_by_username(username)
            .await
            .map_err(crate::helpers::store_error)?
            .ok_or_else(|| ApiError::unknown_resource("user", username))?;
        self.cache.set_user_id(username, &user.id);
        self.cache_sync.track(&user.id);
        Ok(user)
    }

    /// The user's stream tree, through the cache.
    pub async fn load_tree(&self, user_id: &str) -> Result<StreamTree, ApiError> {
        if let Some(streams) = self.cache.get_streams(user_id) {
            return Ok(StreamTree::build(streams));
        }
        let streams = self
            .storage
            .streams
            .all(user_id)
            .await
            .map_err(crate::helpers::store_error)?;
        self.cache.set_streams(user_id, streams.clone());
        self.cache_sync.track(user_id);
        Ok(StreamTree::build(streams))
    }
}

/// A file received alongside a multipart call, handed to the attach steps.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

/// The mutable context one method call runs in. Transports build it, steps
/// refine it (resolved user, resolved access), batch reuses it across
/// sub-calls.
pub struct ApiContext {
    pub services: Services,
    /// Target username from the path or WebSocket namespace.
    pub username: String,
    /// Raw authority as presented by the transport.
    pub auth: Option<AuthPayload>,
    /// Request `Origin` (trusted-origin checks on auth methods).
    pub origin: Option<String>,
    /// Resolved by the first step of every chain.
    pub user: Option<User>,
    /// Resolved by the authorization pre-check.
    pub access: Option<AccessLogic>,
    /// Files carried by a multipart request.
    pub uploads: Vec<Upload>,
    /// Handle back into the registry, for `callBatch`.
    pub registry: Option<Arc<Registry<ApiContext>>>,
}

impl ApiContext {
    pub fn new(services: Services, username: impl Into<String>) -> Self {
        Self {
            services,
            username: username.into(),
            auth: None,
            origin: None,
            user: None,
            access: None,
            uploads: Vec::new(),
            registry: None,
        }
    }

    pub fn with_auth(mut self, auth: Option<AuthPayload>) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_origin(mut self, origin: Option<String>) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_registry(mut self, registry: Arc<Registry<ApiContext>>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_uploads(mut self, uploads: Vec<Upload>) -> Self {
        self.uploads = uploads;
        self
    }

    /// The resolved user, after the resolve step ran.
    pub fn user(&self) -> Result<&User, ApiError> {
        self.user
            .as_ref()
            .ok_or_else(|| ApiError::unexpected("user not resolved"))
    }

    /// The resolved access, after the authorization pre-check ran.
    pub fn access(&self) -> Result<&AccessLogic, ApiError> {
        self.access
            .as_ref()
            .ok_or_else(|| ApiError::invalid_access_token("Missing access token"))
    }

    /// Who to record as `createdBy`/`modifiedBy`.
    pub fn actor(&self) -> String {
        self.access
            .as_ref()
            .map(|a| a.access.id.clone())
            .unwrap_or_else(|| "system".to_string())
    }

    /// Derive an attachment read token for the current access.
    pub fn read_token_for(&self, attachment_id: &str) -> Option<String> {
        let access = self.access.as_ref()?;
        trove_access::read_token::derive(
            attachment_id,
            &access.access.id,
            &access.access.token,
            &self.services.config.auth.secret,
        )
    }
}
