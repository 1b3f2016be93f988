//! End-to-end echo suppression over the loopback transport.
//!
//! Writes go through the registry or the adapter; push events are fired
//! with `MemoryService::emit`, exactly as a server would after a write.

mod common;

use common::harness;
use proptest::prelude::*;
use serde_json::json;
use syncwire::{EventKind, Params, RecordCache, RecordIdentity, SyncError, TypeName};
use syncwire_config::SyncConfig;

fn post(id: &str) -> RecordIdentity {
    RecordIdentity::new("post", id)
}

// ============================================================================
// Locked writes
// ============================================================================

#[tokio::test]
async fn create_echo_is_applied_once() {
    let h = harness(SyncConfig::default());
    let post_type = TypeName::from("post");

    let created = h
        .adapter
        .create_record(&post_type, json!({"title": "x"}))
        .await
        .unwrap();
    assert_eq!(created.identity, post("1"));
    assert_eq!(h.cache.upsert_count(), 1);

    let reached = h
        .posts_server()
        .emit(EventKind::Created, json!({"_id": "1", "title": "x"}))
        .unwrap();
    assert_eq!(reached, 1);

    assert_eq!(h.cache.count(&post_type), 1);
    assert_eq!(h.cache.upsert_count(), 1, "echo must not merge a second time");
    assert_eq!(h.posts().pending_echoes(EventKind::Created, &post("1")), 0);
}

#[tokio::test]
async fn created_event_after_consumed_echo_is_merged() {
    let h = harness(SyncConfig::default());
    let posts = h.posts();
    posts.create(json!({"title": "x"}), Params::new()).await.unwrap();

    let server = h.posts_server();
    server.emit(EventKind::Created, json!({"_id": "1", "title": "x"})).unwrap();
    assert_eq!(h.cache.upsert_count(), 0);

    server.emit(EventKind::Created, json!({"_id": "1", "title": "y"})).unwrap();
    assert_eq!(h.cache.upsert_count(), 1);
    assert_eq!(h.cache.peek(&post("1")).unwrap().attributes["title"], json!("y"));
}

#[tokio::test]
async fn overlapping_removes_owe_two_echoes() {
    let h = harness(SyncConfig::default());
    let posts = h.posts();
    let server = h.posts_server();
    server.reply_next(json!({"_id": "5"}));
    server.reply_next(json!({"_id": "5"}));
    h.cache
        .upsert(h.cache.normalize(&"post".into(), json!({"_id": "5"})).unwrap());

    let (first, second) = tokio::join!(
        posts.remove("5", Params::new()),
        posts.remove("5", Params::new())
    );
    first.unwrap();
    second.unwrap();
    assert_eq!(posts.pending_echoes(EventKind::Removed, &post("5")), 2);

    server.emit(EventKind::Removed, json!({"_id": "5"})).unwrap();
    server.emit(EventKind::Removed, json!({"_id": "5"})).unwrap();
    assert_eq!(posts.pending_echoes(EventKind::Removed, &post("5")), 0);
    assert!(h.cache.peek(&post("5")).is_some(), "echoes leave the cache alone");

    server.emit(EventKind::Removed, json!({"_id": "5"})).unwrap();
    assert!(h.cache.peek(&post("5")).is_none());
    assert_eq!(h.cache.eviction_count(), 1);
}

#[tokio::test]
async fn failed_write_arms_nothing() {
    let h = harness(SyncConfig::default());
    let posts = h.posts();
    h.posts_server()
        .fail_next(syncwire::TransportError::named("Forbidden", "nope"));

    let err = posts.create(json!({"_id": "1"}), Params::new()).await.unwrap_err();
    assert_eq!(err.kind(), Some(syncwire::ErrorKind::Forbidden));
    assert!(posts.is_settled());

    h.posts_server()
        .emit(EventKind::Created, json!({"_id": "1"}))
        .unwrap();
    assert_eq!(h.cache.upsert_count(), 1);
}

// ============================================================================
// Non-locking methods
// ============================================================================

#[tokio::test]
async fn patched_event_is_never_suppressed() {
    let h = harness(SyncConfig::default());
    let posts = h.posts();
    let server = h.posts_server();
    server.insert(json!({"_id": "1", "title": "a"}));
    h.cache
        .upsert(h.cache.normalize(&"post".into(), json!({"_id": "1", "title": "a"})).unwrap());

    posts.patch("1", json!({"title": "b"}), Params::new()).await.unwrap();
    assert!(posts.is_settled());

    server.emit(EventKind::Patched, json!({"_id": "1", "title": "b"})).unwrap();
    assert_eq!(h.cache.upsert_count(), 2);
    assert_eq!(h.cache.peek(&post("1")).unwrap().attributes["title"], json!("b"));
}

#[tokio::test]
async fn updated_event_lands_by_default() {
    let h = harness(SyncConfig::default());
    let post_type = TypeName::from("post");
    h.posts_server().insert(json!({"_id": "1", "title": "a"}));

    h.adapter
        .update_record(&post_type, &"1".into(), json!({"title": "b"}))
        .await
        .unwrap();
    h.posts_server()
        .emit(EventKind::Updated, json!({"_id": "1", "title": "b"}))
        .unwrap();
    assert_eq!(h.cache.upsert_count(), 2);
}

#[tokio::test]
async fn locking_update_is_configurable() {
    let mut config = SyncConfig::default();
    config.echo.locked_methods.push(syncwire::Method::Update);
    let h = harness(config);
    h.posts_server().insert(json!({"_id": "1", "title": "a"}));

    h.adapter
        .update_record(&"post".into(), &"1".into(), json!({"title": "b"}))
        .await
        .unwrap();
    h.posts_server()
        .emit(EventKind::Updated, json!({"_id": "1", "title": "b"}))
        .unwrap();
    assert_eq!(h.cache.upsert_count(), 1);
}

#[tokio::test]
async fn patched_event_for_uncached_record_is_skipped() {
    let h = harness(SyncConfig::default());
    h.posts();

    h.posts_server()
        .emit(EventKind::Patched, json!({"_id": "404", "title": "p"}))
        .unwrap();
    assert_eq!(h.cache.upsert_count(), 0);
    assert!(h.cache.peek(&post("404")).is_none());
}

// ============================================================================
// Guard queries and protocol violations
// ============================================================================

#[tokio::test]
async fn peeking_never_changes_outcomes() {
    let h = harness(SyncConfig::default());
    let posts = h.posts();
    posts.create(json!({"title": "x"}), Params::new()).await.unwrap();
    let echo = json!({"_id": "1"});

    for _ in 0..5 {
        assert!(posts.should_discard(EventKind::Created, &echo, false).unwrap());
    }
    assert!(posts.should_discard(EventKind::Created, &echo, true).unwrap());
    assert!(!posts.should_discard(EventKind::Created, &echo, false).unwrap());
}

#[test]
fn event_without_identity_is_fatal() {
    let h = harness(SyncConfig::default());
    h.posts();

    for kind in EventKind::ALL {
        let err = h
            .posts_server()
            .emit(kind, json!({"id": "1", "title": "wrong key"}))
            .unwrap_err();
        assert!(matches!(err, SyncError::MissingIdentity { ref field, .. } if field == "_id"));
    }
    assert_eq!(h.cache.upsert_count(), 0);
    assert_eq!(h.cache.eviction_count(), 0);
}

#[test]
fn unmapped_service_events_are_dropped() {
    let h = harness(SyncConfig::default());
    let metrics = h.registry.get_or_create("metrics").unwrap();
    assert!(metrics.is_unmapped());

    h.transport
        .handle("metrics")
        .emit(EventKind::Created, json!({"cpu": 0.5}))
        .unwrap();
    assert_eq!(h.cache.upsert_count(), 0);
}

proptest! {
    /// Without local writes, every pushed created/updated event is merged
    /// exactly once.
    #[test]
    fn unsolicited_events_all_land(ids in prop::collection::vec(0u8..6, 1..30)) {
        let h = harness(SyncConfig::default());
        h.posts();
        let server = h.posts_server();

        for (n, id) in ids.iter().enumerate() {
            let kind = if n % 2 == 0 { EventKind::Created } else { EventKind::Updated };
            server.emit(kind, json!({"_id": id.to_string(), "n": n})).unwrap();
        }

        prop_assert_eq!(h.cache.upsert_count(), ids.len());
        let distinct: std::collections::HashSet<_> = ids.iter().collect();
        prop_assert_eq!(h.cache.count(&"post".into()), distinct.len());
    }
}
