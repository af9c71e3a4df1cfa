//! Method-level integration tests against the in-memory core.

use serde_json::json;

use trove_api::testing::Harness;
use trove_core::ErrorId;
use trove_model::PermissionLevel;
use trove_storage::prelude::*;

#[tokio::test]
async fn multi_stream_authorization() {
    let harness = Harness::new().await;
    let personal = harness.personal_access("alice").await;
    harness.create_stream(&personal.token, "a", "A", None).await;
    harness.create_stream(&personal.token, "b", "B", None).await;

    // Contribute on A only: creating into both streams is denied.
    let partial = harness
        .app_access("alice", vec![Harness::perm("a", PermissionLevel::Contribute)])
        .await;
    let err = harness
        .call(
            "alice",
            &partial.token,
            "events.create",
            json!({"streamIds": ["a", "b"], "type": "count/generic", "content": 1}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.id, ErrorId::Forbidden);

    // Contribute on both: permitted, set order preserved.
    let full = harness
        .app_access(
            "alice",
            vec![
                Harness::perm("a", PermissionLevel::Contribute),
                Harness::perm("b", PermissionLevel::Contribute),
            ],
        )
        .await;
    let out = harness
        .call(
            "alice",
            &full.token,
            "events.create",
            json!({"streamIds": ["a", "b"], "type": "count/generic", "content": 1}),
        )
        .await
        .unwrap();
    assert_eq!(out["event"]["streamIds"], json!(["a", "b"]));
    assert_eq!(out["event"]["streamId"], "a");
}

#[tokio::test]
async fn tag_migration_on_create() {
    let harness = Harness::new().await;
    let personal = harness.personal_access("alice").await;
    harness.create_stream(&personal.token, "a", "A", None).await;

    let out = harness
        .call(
            "alice",
            &personal.token,
            "events.create",
            json!({"streamId": "a", "type": "test/test", "tags": [" hop ", "", "   "]}),
        )
        .await
        .unwrap();
    assert_eq!(out["event"]["streamIds"], json!(["a", ":_tag:hop"]));
    assert_eq!(out["event"]["tags"], json!(["hop"]));
    // The exposed alias still points at the first entry.
    assert_eq!(out["event"]["streamId"], "a");
}

#[tokio::test]
async fn event_integrity_is_verifiable() {
    let harness = Harness::new().await;
    let personal = harness.personal_access("alice").await;
    harness.create_stream(&personal.token, "a", "A", None).await;
    let out = harness
        .call(
            "alice",
            &personal.token,
            "events.create",
            json!({"streamId": "a", "type": "note/txt", "content": "hello"}),
        )
        .await
        .unwrap();
    let mut event = out["event"].clone();
    // Response-assembly aliases are not part of the hashed record.
    event.as_object_mut().unwrap().remove("streamId");
    event.as_object_mut().unwrap().remove("tags");
    assert!(trove_model::integrity::verify(&event));
}

#[tokio::test]
async fn trash_then_permanent_delete() {
    let harness = Harness::new().await;
    let personal = harness.personal_access("alice").await;
    harness.create_stream(&personal.token, "a", "A", None).await;
    let created = harness
        .call(
            "alice",
            &personal.token,
            "events.create",
            json!({"streamId": "a", "type": "note/txt", "content": "x"}),
        )
        .await
        .unwrap();
    let id = created["event"]["id"].as_str().unwrap().to_string();

    let first = harness
        .call("alice", &personal.token, "events.delete", json!({"id": id}))
        .await
        .unwrap();
    assert_eq!(first["event"]["trashed"], json!(true));

    let second = harness
        .call("alice", &personal.token, "events.delete", json!({"id": id}))
        .await
        .unwrap();
    assert_eq!(second["eventDeletion"]["id"], json!(id));
    assert!(second["eventDeletion"]["deleted"].as_f64().is_some());

    let err = harness
        .call("alice", &personal.token, "events.getOne", json!({"id": id}))
        .await
        .unwrap_err();
    assert_eq!(err.id, ErrorId::UnknownResource);

    let listed = harness
        .call(
            "alice",
            &personal.token,
            "events.get",
            json!({"includeDeletions": true, "modifiedSince": 0}),
        )
        .await
        .unwrap();
    let deletions = listed["eventDeletions"].as_array().unwrap();
    assert!(deletions.iter().any(|d| d["id"] == json!(id)));
}

#[tokio::test]
async fn get_defaults_limit_and_sort() {
    let harness = Harness::new().await;
    let personal = harness.personal_access("alice").await;
    harness.create_stream(&personal.token, "a", "A", None).await;
    for i in 0..25 {
        harness
            .call(
                "alice",
                &personal.token,
                "events.create",
                json!({"streamId": "a", "type": "count/generic", "content": i, "time": i as f64}),
            )
            .await
            .unwrap();
    }
    let out = harness
        .call("alice", &personal.token, "events.get", json!({}))
        .await
        .unwrap();
    let events = out["events"].as_array().unwrap();
    assert_eq!(events.len(), 20);
    let times: Vec<f64> = events.iter().map(|e| e["time"].as_f64().unwrap()).collect();
    assert!(times.windows(2).all(|w| w[0] >= w[1]), "descending by time");
}

#[tokio::test]
async fn with_deletions_alias_is_rejected() {
    let harness = Harness::new().await;
    let personal = harness.personal_access("alice").await;
    let err = harness
        .call(
            "alice",
            &personal.token,
            "events.get",
            json!({"withDeletions": true}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.id, ErrorId::InvalidParametersFormat);
}

#[tokio::test]
async fn both_stream_id_forms_is_invalid() {
    let harness = Harness::new().await;
    let personal = harness.personal_access("alice").await;
    harness.create_stream(&personal.token, "a", "A", None).await;
    let err = harness
        .call(
            "alice",
            &personal.token,
            "events.create",
            json!({"streamId": "a", "streamIds": ["a"], "type": "note/txt", "content": "x"}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.id, ErrorId::InvalidOperation);
}

#[tokio::test]
async fn unknown_stream_is_reported_with_ids() {
    let harness = Harness::new().await;
    let personal = harness.personal_access("alice").await;
    let err = harness
        .call(
            "alice",
            &personal.token,
            "events.create",
            json!({"streamId": "ghost", "type": "note/txt", "content": "x"}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.id, ErrorId::UnknownReferencedResource);
    assert_eq!(err.data.as_ref().unwrap()["streamIds"], json!(["ghost"]));
}

#[tokio::test]
async fn series_events_are_not_accepted() {
    let harness = Harness::new().await;
    let personal = harness.personal_access("alice").await;
    harness.create_stream(&personal.token, "a", "A", None).await;
    let err = harness
        .call(
            "alice",
            &personal.token,
            "events.create",
            json!({"streamId": "a", "type": "series:count/generic"}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.id, ErrorId::InvalidOperation);
}

#[tokio::test]
async fn update_keeps_history_and_recomputes_integrity() {
    let harness = Harness::new().await;
    let personal = harness.personal_access("alice").await;
    harness.create_stream(&personal.token, "a", "A", None).await;
    let created = harness
        .call(
            "alice",
            &personal.token,
            "events.create",
            json!({"streamId": "a", "type": "count/generic", "content": 1}),
        )
        .await
        .unwrap();
    let id = created["event"]["id"].as_str().unwrap().to_string();
    let original_integrity = created["event"]["integrity"].clone();

    let updated = harness
        .call(
            "alice",
            &personal.token,
            "events.update",
            json!({"id": id, "update": {"content": 2}}),
        )
        .await
        .unwrap();
    assert_eq!(updated["event"]["content"], json!(2));
    assert_ne!(updated["event"]["integrity"], original_integrity);

    let with_history = harness
        .call(
            "alice",
            &personal.token,
            "events.getOne",
            json!({"id": id, "includeHistory": true}),
        )
        .await
        .unwrap();
    let history = with_history["history"].as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["content"], json!(1));
    assert_eq!(history[0]["headId"], json!(id));
}

#[tokio::test]
async fn protected_fields_strict_vs_lenient() {
    // Strict: rejected.
    let harness = Harness::new().await;
    let personal = harness.personal_access("alice").await;
    harness.create_stream(&personal.token, "a", "A", None).await;
    let created = harness
        .call(
            "alice",
            &personal.token,
            "events.create",
            json!({"streamId": "a", "type": "note/txt", "content": "x"}),
        )
        .await
        .unwrap();
    let id = created["event"]["id"].as_str().unwrap().to_string();
    let err = harness
        .call(
            "alice",
            &personal.token,
            "events.update",
            json!({"id": id, "update": {"attachments": []}}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.id, ErrorId::Forbidden);

    // Lenient: stripped, result shape unchanged.
    let mut config = trove_core::TroveConfig::default();
    config.update_mode = trove_core::UpdateMode::Lenient;
    let lenient = Harness::with_config(config).await;
    let personal = lenient.personal_access("alice").await;
    lenient.create_stream(&personal.token, "a", "A", None).await;
    let created = lenient
        .call(
            "alice",
            &personal.token,
            "events.create",
            json!({"streamId": "a", "type": "note/txt", "content": "x"}),
        )
        .await
        .unwrap();
    let id = created["event"]["id"].as_str().unwrap().to_string();
    let updated = lenient
        .call(
            "alice",
            &personal.token,
            "events.update",
            json!({"id": id, "update": {"attachments": [], "content": "y"}}),
        )
        .await
        .unwrap();
    assert_eq!(updated["event"]["content"], json!("y"));
    assert!(updated["event"].get("attachments").is_none());
}

#[tokio::test]
async fn stream_two_phase_delete_without_merge() {
    let harness = Harness::new().await;
    let personal = harness.personal_access("alice").await;
    harness.create_stream(&personal.token, "root", "Root", None).await;
    harness
        .create_stream(&personal.token, "child", "Child", Some("root"))
        .await;
    harness.create_stream(&personal.token, "other", "Other", None).await;

    // One event wholly inside the subtree, one shared with the outside.
    let inside = harness
        .call(
            "alice",
            &personal.token,
            "events.create",
            json!({"streamId": "child", "type": "note/txt", "content": "in"}),
        )
        .await
        .unwrap();
    let shared = harness
        .call(
            "alice",
            &personal.token,
            "events.create",
            json!({"streamIds": ["child", "other"], "type": "note/txt", "content": "shared"}),
        )
        .await
        .unwrap();

    let first = harness
        .call("alice", &personal.token, "streams.delete", json!({"id": "root"}))
        .await
        .unwrap();
    assert_eq!(first["stream"]["trashed"], json!(true));

    let second = harness
        .call(
            "alice",
            &personal.token,
            "streams.delete",
            json!({"id": "root", "mergeEventsWithParent": false}),
        )
        .await
        .unwrap();
    assert_eq!(second["streamDeletion"]["id"], json!("root"));
    assert_eq!(second["updatedEvents"], json!(1));

    // Wholly-contained event became a deletion.
    let inside_id = inside["event"]["id"].as_str().unwrap();
    let err = harness
        .call(
            "alice",
            &personal.token,
            "events.getOne",
            json!({"id": inside_id}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.id, ErrorId::UnknownResource);

    // The shared event survived with the subtree ids stripped.
    let shared_id = shared["event"]["id"].as_str().unwrap();
    let out = harness
        .call(
            "alice",
            &personal.token,
            "events.getOne",
            json!({"id": shared_id}),
        )
        .await
        .unwrap();
    assert_eq!(out["event"]["streamIds"], json!(["other"]));
}

#[tokio::test]
async fn stream_delete_merges_events_into_parent() {
    let harness = Harness::new().await;
    let personal = harness.personal_access("alice").await;
    harness.create_stream(&personal.token, "root", "Root", None).await;
    harness
        .create_stream(&personal.token, "child", "Child", Some("root"))
        .await;
    let event = harness
        .call(
            "alice",
            &personal.token,
            "events.create",
            json!({"streamId": "child", "type": "note/txt", "content": "x"}),
        )
        .await
        .unwrap();

    harness
        .call("alice", &personal.token, "streams.delete", json!({"id": "child"}))
        .await
        .unwrap();
    let second = harness
        .call(
            "alice",
            &personal.token,
            "streams.delete",
            json!({"id": "child", "mergeEventsWithParent": true}),
        )
        .await
        .unwrap();
    assert_eq!(second["updatedEvents"], json!(1));

    let id = event["event"]["id"].as_str().unwrap();
    let out = harness
        .call("alice", &personal.token, "events.getOne", json!({"id": id}))
        .await
        .unwrap();
    assert_eq!(out["event"]["streamIds"], json!(["root"]));
}

#[tokio::test]
async fn sibling_name_collisions_are_conflicts() {
    let harness = Harness::new().await;
    let personal = harness.personal_access("alice").await;
    harness.create_stream(&personal.token, "a", "Diary", None).await;
    let err = harness
        .call(
            "alice",
            &personal.token,
            "streams.create",
            json!({"name": "Diary"}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.id, ErrorId::ItemAlreadyExists);
}

#[tokio::test]
async fn single_activity_is_reserved() {
    let harness = Harness::new().await;
    let personal = harness.personal_access("alice").await;
    let err = harness
        .call(
            "alice",
            &personal.token,
            "streams.create",
            json!({"name": "X", "singleActivity": true}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.id, ErrorId::InvalidOperation);
}

#[tokio::test]
async fn moving_a_stream_requires_manage_on_both_parents() {
    let harness = Harness::new().await;
    let personal = harness.personal_access("alice").await;
    harness.create_stream(&personal.token, "p1", "P1", None).await;
    harness.create_stream(&personal.token, "p2", "P2", None).await;
    harness
        .create_stream(&personal.token, "child", "Child", Some("p1"))
        .await;

    // Manage on the subtree and old parent, but not on the target parent.
    let limited = harness
        .app_access("alice", vec![Harness::perm("p1", PermissionLevel::Manage)])
        .await;
    let err = harness
        .call(
            "alice",
            &limited.token,
            "streams.update",
            json!({"id": "child", "update": {"parentId": "p2"}}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.id, ErrorId::Forbidden);

    let moved = harness
        .call(
            "alice",
            &personal.token,
            "streams.update",
            json!({"id": "child", "update": {"parentId": "p2"}}),
        )
        .await
        .unwrap();
    assert_eq!(moved["stream"]["parentId"], json!("p2"));
}

#[tokio::test]
async fn batch_partial_success() {
    let harness = Harness::new().await;
    let personal = harness.personal_access("alice").await;
    let out = harness
        .call(
            "alice",
            &personal.token,
            "callBatch",
            json!([
                {"method": "streams.create", "params": {"id": "s", "name": "S"}},
                {"method": "events.create", "params": {"streamId": "s", "type": "note/txt", "content": "x"}},
                {"method": "events.create", "params": {"streamId": "x-unknown", "type": "note/txt", "content": "x"}},
            ]),
        )
        .await
        .unwrap();
    let results = out["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["stream"]["id"], json!("s"));
    assert!(results[1]["event"].is_object());
    assert_eq!(results[2]["error"]["id"], json!("UnknownReferencedResource"));
    assert!(results.iter().all(|r| r.get("meta").is_none()));
}

#[tokio::test]
async fn create_only_permission_semantics() {
    let harness = Harness::new().await;
    let personal = harness.personal_access("alice").await;
    harness.create_stream(&personal.token, "inbox", "Inbox", None).await;
    let dropbox = harness
        .app_access("alice", vec![Harness::perm("inbox", PermissionLevel::CreateOnly)])
        .await;

    // May create...
    let out = harness
        .call(
            "alice",
            &dropbox.token,
            "events.create",
            json!({"streamId": "inbox", "type": "note/txt", "content": "drop"}),
        )
        .await
        .unwrap();
    let id = out["event"]["id"].as_str().unwrap().to_string();

    // ...but neither read nor mutate existing items.
    let err = harness
        .call("alice", &dropbox.token, "events.getOne", json!({"id": id}))
        .await
        .unwrap_err();
    assert_eq!(err.id, ErrorId::Forbidden);
    let err = harness
        .call(
            "alice",
            &dropbox.token,
            "events.update",
            json!({"id": id, "update": {"content": "hijack"}}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.id, ErrorId::Forbidden);
}

#[tokio::test]
async fn access_read_api_hides_usage_counters() {
    let harness = Harness::new().await;
    let personal = harness.personal_access("alice").await;
    // Use the access once so counters exist.
    harness
        .call("alice", &personal.token, "events.get", json!({}))
        .await
        .unwrap();
    harness.services.usage.flush(&harness.services.storage).await;

    let out = harness
        .call("alice", &personal.token, "accesses.get", json!({}))
        .await
        .unwrap();
    for access in out["accesses"].as_array().unwrap() {
        assert!(access.get("lastUsed").is_none());
        assert!(access.get("calls").is_none());
    }
}

#[tokio::test]
async fn access_creation_enforces_delegation() {
    let harness = Harness::new().await;
    let personal = harness.personal_access("alice").await;
    harness.create_stream(&personal.token, "a", "A", None).await;
    harness.create_stream(&personal.token, "b", "B", None).await;
    let limited = harness
        .app_access("alice", vec![Harness::perm("a", PermissionLevel::Contribute)])
        .await;

    // Delegating beyond its own scope is denied.
    let err = harness
        .call(
            "alice",
            &limited.token,
            "accesses.create",
            json!({"name": "wide", "permissions": [{"streamId": "b", "level": "read"}]}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.id, ErrorId::Forbidden);

    // Delegating a subset works, and expireAfter derives expires.
    let out = harness
        .call(
            "alice",
            &limited.token,
            "accesses.create",
            json!({
                "name": "narrow",
                "permissions": [{"streamId": "a", "level": "read"}],
                "expireAfter": 3600.0,
            }),
        )
        .await
        .unwrap();
    let access = &out["access"];
    assert_eq!(access["type"], json!("shared"));
    let created = access["created"].as_f64().unwrap();
    let expires = access["expires"].as_f64().unwrap();
    assert!((expires - created - 3600.0).abs() < 1.0);
}

#[tokio::test]
async fn deleted_access_fails_authentication_after_coherence() {
    let harness = Harness::new().await;
    let personal = harness.personal_access("alice").await;
    let app = harness.app_access("alice", vec![]).await;

    // Warm the cache with the app access.
    harness
        .call("alice", &app.token, "getAccessInfo", json!({}))
        .await
        .unwrap();

    harness
        .call(
            "alice",
            &personal.token,
            "accesses.delete",
            json!({"id": app.id}),
        )
        .await
        .unwrap();
    // Give the coherence listener a beat.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let err = harness
        .call("alice", &app.token, "events.get", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.id, ErrorId::InvalidAccessToken);
}

#[tokio::test]
async fn login_issues_and_logout_revokes_a_session() {
    let harness = Harness::new().await;
    let out = {
        let mut ctx = harness.context("alice", None);
        harness
            .registry
            .call(
                "auth.login",
                &mut ctx,
                json!({
                    "username": "alice",
                    "password": trove_api::testing::TEST_PASSWORD,
                    "appId": "test-app",
                }),
            )
            .await
            .unwrap()
    };
    let token = out["token"].as_str().unwrap().to_string();
    assert_eq!(out["preferredLanguage"], json!("en"));

    // The session token authenticates as personal.
    let account = harness
        .call("alice", &token, "account.get", json!({}))
        .await
        .unwrap();
    assert_eq!(account["account"]["username"], json!("alice"));

    harness
        .call("alice", &token, "auth.logout", json!({}))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let err = harness
        .call("alice", &token, "account.get", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.id, ErrorId::InvalidAccessToken);
}

#[tokio::test]
async fn bad_login_is_invalid_credentials() {
    let harness = Harness::new().await;
    let mut ctx = harness.context("alice", None);
    let err = harness
        .registry
        .call(
            "auth.login",
            &mut ctx,
            json!({"username": "alice", "password": "wrong-pass", "appId": "test-app"}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.id, ErrorId::InvalidCredentials);
}

#[tokio::test]
async fn password_reset_tokens_are_single_use() {
    let harness = Harness::new().await;
    let user_id = harness.user_id("alice").await;
    let token = harness
        .services
        .storage
        .passwords
        .create_reset_token(&user_id, 3600.0)
        .await
        .unwrap();

    let mut ctx = harness.context("alice", None);
    harness
        .registry
        .call(
            "account.resetPassword",
            &mut ctx,
            json!({"appId": "app", "resetToken": token, "newPassword": "fresh-pass"}),
        )
        .await
        .unwrap();

    // Reuse fails.
    let mut ctx = harness.context("alice", None);
    let err = harness
        .registry
        .call(
            "account.resetPassword",
            &mut ctx,
            json!({"appId": "app", "resetToken": token, "newPassword": "other-pass"}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.id, ErrorId::InvalidAccessToken);
}

#[tokio::test]
async fn profile_buckets_respect_scopes() {
    let harness = Harness::new().await;
    let personal = harness.personal_access("alice").await;
    let app = harness.app_access("alice", vec![]).await;

    // Personal cannot use the app bucket.
    let err = harness
        .call("alice", &personal.token, "profile.getApp", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.id, ErrorId::InvalidOperation);

    // App writes its own bucket; null deletes keys.
    harness
        .call(
            "alice",
            &app.token,
            "profile.updateApp",
            json!({"update": {"setting": "on", "stale": 1}}),
        )
        .await
        .unwrap();
    let updated = harness
        .call(
            "alice",
            &app.token,
            "profile.updateApp",
            json!({"update": {"stale": null}}),
        )
        .await
        .unwrap();
    assert_eq!(updated["profile"], json!({"setting": "on"}));

    // Private bucket is personal-only.
    let err = harness
        .call("alice", &app.token, "profile.get", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.id, ErrorId::Forbidden);
}

#[tokio::test]
async fn followed_slices_are_personal_only_with_unique_names() {
    let harness = Harness::new().await;
    let personal = harness.personal_access("alice").await;
    let app = harness.app_access("alice", vec![]).await;

    let err = harness
        .call("alice", &app.token, "followedSlices.get", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.id, ErrorId::Forbidden);

    harness
        .call(
            "alice",
            &personal.token,
            "followedSlices.create",
            json!({"name": "Bob", "url": "https://x/bob", "accessToken": "tok"}),
        )
        .await
        .unwrap();
    let err = harness
        .call(
            "alice",
            &personal.token,
            "followedSlices.create",
            json!({"name": "Bob", "url": "https://x/else", "accessToken": "tok2"}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.id, ErrorId::ItemAlreadyExists);
}

#[tokio::test]
async fn system_create_user_round_trip() {
    let harness = Harness::new().await;
    let mut ctx = harness.context("alice", Some(trove_api::testing::TEST_ADMIN_KEY));
    let out = harness
        .registry
        .call(
            "system.createUser",
            &mut ctx,
            json!({"username": "bobby", "password": "hunter22", "email": "b@x.co"}),
        )
        .await
        .unwrap();
    assert_eq!(out["user"]["username"], json!("bobby"));

    // Duplicate username conflicts.
    let mut ctx = harness.context("alice", Some(trove_api::testing::TEST_ADMIN_KEY));
    let err = harness
        .registry
        .call(
            "system.createUser",
            &mut ctx,
            json!({"username": "bobby", "password": "hunter22", "email": "c@x.co"}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.id, ErrorId::ItemAlreadyExists);

    // Wrong admin key reads as unknown resource.
    let mut ctx = harness.context("alice", Some("wrong-key"));
    let err = harness
        .registry
        .call(
            "system.getUserInfo",
            &mut ctx,
            json!({"username": "bobby"}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.id, ErrorId::UnknownResource);
}

#[tokio::test]
async fn attachment_lifecycle_updates_storage_accounting() {
    let harness = Harness::new().await;
    let personal = harness.personal_access("alice").await;
    harness.create_stream(&personal.token, "a", "A", None).await;
    let created = harness
        .call(
            "alice",
            &personal.token,
            "events.create",
            json!({"streamId": "a", "type": "picture/attached"}),
        )
        .await
        .unwrap();
    let id = created["event"]["id"].as_str().unwrap().to_string();

    let mut ctx = harness.context("alice", Some(&personal.token));
    ctx.uploads.push(trove_api::Upload {
        file_name: "photo.jpg".into(),
        content_type: "image/jpeg".into(),
        data: bytes::Bytes::from_static(b"fake-jpeg-bytes"),
    });
    let out = harness
        .registry
        .call("events.addAttachments", &mut ctx, json!({"id": id}))
        .await
        .unwrap();
    let attachment = &out["event"]["attachments"][0];
    assert_eq!(attachment["size"], json!(15));
    assert!(attachment["readToken"].as_str().is_some());

    let user = harness
        .services
        .storage
        .users
        .get_by_username("alice")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.storage_used.attached_files, 15);

    // Trash, then permanently delete: the accounting returns to zero.
    harness
        .call("alice", &personal.token, "events.delete", json!({"id": id}))
        .await
        .unwrap();
    harness
        .call("alice", &personal.token, "events.delete", json!({"id": id}))
        .await
        .unwrap();
    let user = harness
        .services
        .storage
        .users
        .get_by_username("alice")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.storage_used.attached_files, 0);
}

#[tokio::test]
async fn attachment_read_token_grants_download() {
    let harness = Harness::new().await;
    let personal = harness.personal_access("alice").await;
    harness.create_stream(&personal.token, "a", "A", None).await;
    let created = harness
        .call(
            "alice",
            &personal.token,
            "events.create",
            json!({"streamId": "a", "type": "picture/attached"}),
        )
        .await
        .unwrap();
    let id = created["event"]["id"].as_str().unwrap().to_string();

    let mut ctx = harness.context("alice", Some(&personal.token));
    ctx.uploads.push(trove_api::Upload {
        file_name: "photo.jpg".into(),
        content_type: "image/jpeg".into(),
        data: bytes::Bytes::from_static(b"bytes!"),
    });
    let out = harness
        .registry
        .call("events.addAttachments", &mut ctx, json!({"id": id}))
        .await
        .unwrap();
    let file_id = out["event"]["attachments"][0]["id"].as_str().unwrap();
    let read_token = out["event"]["attachments"][0]["readToken"]
        .as_str()
        .unwrap()
        .to_string();

    let (attachment, data) = trove_api::read_attachment(
        &harness.services,
        "alice",
        &id,
        file_id,
        trove_api::DownloadAuth::ReadToken(read_token.clone()),
    )
    .await
    .unwrap();
    assert_eq!(attachment.file_name, "photo.jpg");
    assert_eq!(&data[..], b"bytes!");

    // Tampering with the last character fails authentication.
    let mut tampered = read_token;
    let last = tampered.pop().unwrap();
    tampered.push(if last == 'A' { 'B' } else { 'A' });
    let err = trove_api::read_attachment(
        &harness.services,
        "alice",
        &id,
        file_id,
        trove_api::DownloadAuth::ReadToken(tampered),
    )
    .await
    .unwrap_err();
    assert_eq!(err.id, ErrorId::InvalidAccessToken);
}
