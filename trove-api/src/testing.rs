//! Test harness: a fully wired in-memory server core.
//!
//! Used by this crate's tests and by the transport adapters' integration
//! tests.

use std::collections::HashMap;
use std::sync::Arc;

use trove_access::AuthPayload;
use trove_cache::{CacheRegistry, CacheSync};
use trove_core::{Registry, TroveConfig};
use trove_model::{Access, AccessType, Permission, PermissionLevel, StorageUsed, User};
use trove_notify::{Bus, LocalBus};
use trove_storage::prelude::*;

use crate::context::{ApiContext, Services};
use crate::usage::UsageRecorder;

pub const TEST_PASSWORD: &str = "secret-pass";
pub const TEST_ADMIN_KEY: &str = "test-admin-key";

pub struct Harness {
    pub services: Services,
    pub registry: Arc<Registry<ApiContext>>,
}

impl Harness {
    /// A fresh in-memory core with one user, `alice`.
    pub async fn new() -> Self {
        let mut config = TroveConfig::default();
        config.auth.admin_key = TEST_ADMIN_KEY.to_string();
        Self::with_config(config).await
    }

    pub async fn with_config(config: TroveConfig) -> Self {
        let storage = trove_storage::memory::storage();
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        Self::with_parts(config, storage, bus).await
    }

    /// Build on shared storage/bus, for multi-process coherence tests.
    pub async fn with_parts(
        config: TroveConfig,
        storage: trove_storage::Storage,
        bus: Arc<dyn Bus>,
    ) -> Self {
        let harness = Self::with_parts_existing(config, storage, bus).await;
        harness.create_user("alice", "alice@example.com").await;
        harness
    }

    /// Like [`with_parts`] but without seeding `alice`, for sibling
    /// "processes" sharing storage where she already exists.
    ///
    /// [`with_parts`]: Harness::with_parts
    pub async fn with_parts_existing(
        config: TroveConfig,
        storage: trove_storage::Storage,
        bus: Arc<dyn Bus>,
    ) -> Self {
        let cache = Arc::new(CacheRegistry::new(config.caches.enabled));
        let cache_sync = CacheSync::new(cache.clone(), bus.clone());
        let services = Services {
            storage,
            cache,
            cache_sync,
            bus,
            config: Arc::new(config),
            usage: Arc::new(UsageRecorder::new()),
            custom_auth: None,
        };
        let registry = Arc::new(crate::build_registry(&services.config));
        Self { services, registry }
    }

    pub async fn create_user(&self, username: &str, email: &str) -> User {
        let now = trove_model::time::now();
        let user = User {
            id: trove_model::id::generate(),
            username: username.to_string(),
            email: email.to_string(),
            language: "en".into(),
            storage_used: StorageUsed::default(),
            created: now,
            modified: now,
        };
        self.services
            .storage
            .users
            .create(user.clone())
            .await
            .expect("create test user");
        self.services
            .storage
            .passwords
            .set(&user.id, TEST_PASSWORD)
            .await
            .expect("set test password");
        user
    }

    pub async fn user_id(&self, username: &str) -> String {
        self.services
            .storage
            .users
            .get_by_username(username)
            .await
            .expect("lookup")
            .expect("user exists")
            .id
    }

    fn base_access(name: &str, access_type: AccessType) -> Access {
        let now = trove_model::time::now();
        Access {
            id: trove_model::id::generate(),
            token: uuid::Uuid::new_v4().simple().to_string(),
            access_type,
            name: name.to_string(),
            device_name: None,
            permissions: Vec::new(),
            last_used: None,
            calls: HashMap::new(),
            expire_after: None,
            expires: None,
            client_data: None,
            created: now,
            created_by: "test".into(),
            modified: now,
            modified_by: "test".into(),
            integrity: None,
        }
    }

    pub async fn personal_access(&self, username: &str) -> Access {
        let mut access = Self::base_access("test-personal", AccessType::Personal);
        access.seal();
        let user_id = self.user_id(username).await;
        self.services
            .storage
            .accesses
            .insert(&user_id, access.clone())
            .await
            .expect("insert access");
        access
    }

    pub async fn app_access(&self, username: &str, permissions: Vec<Permission>) -> Access {
        let mut access = Self::base_access("test-app", AccessType::App);
        access.permissions = permissions;
        access.seal();
        let user_id = self.user_id(username).await;
        self.services
            .storage
            .accesses
            .insert(&user_id, access.clone())
            .await
            .expect("insert access");
        access
    }

    /// Shorthand for a single-stream permission entry.
    pub fn perm(stream_id: &str, level: PermissionLevel) -> Permission {
        Permission::Stream {
            stream_id: stream_id.to_string(),
            level,
        }
    }

    pub fn context(&self, username: &str, token: Option<&str>) -> ApiContext {
        ApiContext::new(self.services.clone(), username)
            .with_auth(token.map(AuthPayload::token_only))
            .with_origin(Some("https://app.test".to_string()))
            .with_registry(self.registry.clone())
    }

    /// Run one method as `username` authenticated with `token`.
    pub async fn call(
        &self,
        username: &str,
        token: &str,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, trove_core::ApiError> {
        let mut ctx = self.context(username, Some(token));
        self.registry.call(method, &mut ctx, params).await
    }

    /// Create a stream directly through the method surface.
    pub async fn create_stream(
        &self,
        token: &str,
        id: &str,
        name: &str,
        parent: Option<&str>,
    ) -> serde_json::Value {
        self.call(
            "alice",
            token,
            "streams.create",
            serde_json::json!({ "id": id, "name": name, "parentId": parent }),
        )
        .await
        .expect("create stream")
    }
}
