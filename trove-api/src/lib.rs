//! # trove-api — the method surface
//!
//! Registers every method chain into a [`Registry`] keyed by method id.
//! Each chain follows the canonical ordering: authorization pre-check,
//! parameter validation, protected-field guard, resource steps, then
//! notification emission for mutating methods. The chains are shared by
//! the HTTP, WebSocket and batch transports.

pub mod accesses;
pub mod account;
pub mod batch;
pub mod context;
pub mod events;
pub mod followed_slices;
pub mod helpers;
pub mod profile;
pub mod steps;
pub mod streams;
pub mod system;
pub mod testing;
pub mod types;
pub mod usage;

pub use context::{ApiContext, Services, Upload};
pub use events::{read_attachment, DownloadAuth};
pub use usage::UsageRecorder;

use std::time::Duration;

use trove_core::{Registry, TroveConfig};
use trove_model::fields::Coercion;

/// Build the full method registry.
pub fn build_registry(config: &TroveConfig) -> Registry<ApiContext> {
    let mut registry = Registry::new(
        config.limits.array_limit,
        Duration::from_secs(config.limits.method_timeout_secs),
    );
    events::register(&mut registry);
    streams::register(&mut registry);
    accesses::register(&mut registry);
    account::register(&mut registry);
    profile::register(&mut registry);
    followed_slices::register(&mut registry);
    system::register(&mut registry);
    batch::register(&mut registry);
    registry
}

/// Query-string coercion rules per method, applied by the HTTP adapter
/// before validation.
pub fn coercion_for(method_id: &str) -> Coercion {
    match method_id {
        "events.get" => Coercion {
            booleans: &["sortAscending", "includeDeletions", "running"],
            numbers: &["fromTime", "toTime", "skip", "limit", "modifiedSince"],
            arrays: &["streams", "tags", "types"],
        },
        "events.getOne" => Coercion {
            booleans: &["includeHistory"],
            numbers: &[],
            arrays: &[],
        },
        "streams.get" => Coercion {
            booleans: &[],
            numbers: &["includeDeletionsSince"],
            arrays: &[],
        },
        "streams.delete" => Coercion {
            booleans: &["mergeEventsWithParent"],
            numbers: &[],
            arrays: &[],
        },
        "accesses.get" => Coercion {
            booleans: &["includeDeletions", "includeExpired"],
            numbers: &[],
            arrays: &[],
        },
        _ => Coercion::default(),
    }
}

#[cfg(test)]
mod registry_tests {
    use super::*;

    #[test]
    fn every_documented_method_is_registered() {
        let registry = build_registry(&TroveConfig::default());
        for method in [
            "events.get",
            "events.getOne",
            "events.create",
            "events.update",
            "events.delete",
            "events.addAttachments",
            "events.deleteAttachment",
            "streams.get",
            "streams.create",
            "streams.update",
            "streams.delete",
            "accesses.get",
            "accesses.create",
            "accesses.update",
            "accesses.delete",
            "getAccessInfo",
            "auth.login",
            "auth.logout",
            "account.get",
            "account.update",
            "account.changePassword",
            "account.requestPasswordReset",
            "account.resetPassword",
            "profile.get",
            "profile.getPublic",
            "profile.getApp",
            "profile.update",
            "profile.updatePublic",
            "profile.updateApp",
            "followedSlices.get",
            "followedSlices.create",
            "followedSlices.update",
            "followedSlices.delete",
            "system.createUser",
            "system.getUserInfo",
            "system.clearMfa",
            "callBatch",
        ] {
            assert!(registry.has(method), "missing method {method}");
        }
    }
}
