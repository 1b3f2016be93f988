//! Registration, rebinding and teardown against the loopback transport.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::harness;
use serde_json::{Value, json};
use syncwire::{EventKind, Params, ServiceName, SyncError, TypeHint, TypeName};
use syncwire_config::SyncConfig;

// ============================================================================
// Registration
// ============================================================================

#[test]
fn registration_attaches_one_listener_per_event_kind() {
    let h = harness(SyncConfig::default());
    h.posts();

    let server = h.posts_server();
    for kind in EventKind::ALL {
        assert_eq!(server.listener_count(kind), 1, "{kind}");
    }
}

#[test]
fn repeated_registration_is_idempotent() {
    let h = harness(SyncConfig::default());
    let first = h.registry.register("posts", "post").unwrap();
    let second = h.registry.register("posts", TypeHint::Guess).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(h.registry.len(), 1);
    assert_eq!(h.posts_server().listener_count(EventKind::Created), 1);
}

#[test]
fn rebinding_is_rejected_both_ways() {
    let h = harness(SyncConfig::default());
    h.registry.register("posts", "post").unwrap();

    let err = h.registry.register("posts", "comment").unwrap_err();
    assert!(matches!(err, SyncError::TypeNameMismatch { .. }));

    let err = h.registry.register("articles", "post").unwrap_err();
    assert!(matches!(err, SyncError::ServiceNameMismatch { .. }));
    assert!(h.registry.for_service_name(&"articles".into()).is_none());
}

#[test]
fn unmapped_service_can_be_bound_later() {
    let h = harness(SyncConfig::default());
    let feed = h.registry.register("feed", TypeHint::Unmapped).unwrap();
    assert!(feed.is_unmapped());

    h.registry.register("feed", "post").unwrap();
    assert_eq!(feed.type_name(), Some(TypeName::from("post")));
    assert_eq!(
        h.registry.service_name_for_type(&"post".into()).unwrap(),
        ServiceName::from("feed")
    );
}

#[test]
fn irregular_names_come_from_config() {
    let mut config = SyncConfig::default();
    config
        .naming
        .irregular
        .insert("user".to_string(), "members".to_string());
    let h = harness(config);

    assert_eq!(
        h.registry.service_name_for_type(&"user".into()).unwrap(),
        ServiceName::from("members")
    );
    assert_eq!(
        h.registry.type_for_service("members").unwrap(),
        Some(TypeName::from("user"))
    );
}

// ============================================================================
// Custom listeners
// ============================================================================

#[test]
fn custom_listener_sees_events_alongside_dispatch() {
    let h = harness(SyncConfig::default());
    let posts = h.posts();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let listener = posts.on(
        EventKind::Created,
        Arc::new(move |_: Value| -> syncwire::Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );

    let reached = h
        .posts_server()
        .emit(EventKind::Created, json!({"_id": "1"}))
        .unwrap();
    assert_eq!(reached, 2);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(h.cache.upsert_count(), 1);

    posts.off(EventKind::Created, listener);
    h.posts_server()
        .emit(EventKind::Created, json!({"_id": "2"}))
        .unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test]
async fn unregister_detaches_and_freezes() {
    let h = harness(SyncConfig::default());
    let posts = h.posts();
    posts.create(json!({"title": "x"}), Params::new()).await.unwrap();
    posts.on(EventKind::Removed, Arc::new(|_: Value| -> syncwire::Result<()> { Ok(()) }));
    assert!(!posts.is_settled());

    assert!(h.registry.unregister(&"posts".into()));
    assert!(!h.registry.unregister(&"posts".into()));

    let server = h.posts_server();
    for kind in EventKind::ALL {
        assert_eq!(server.listener_count(kind), 0, "{kind}");
    }
    assert!(posts.is_frozen());
    assert!(posts.is_settled());
    assert!(h.registry.for_type_name(&"post".into()).is_none());

    let reached = server.emit(EventKind::Created, json!({"_id": "9"})).unwrap();
    assert_eq!(reached, 0);
    assert_eq!(h.cache.upsert_count(), 0);

    let err = posts.get("1", Params::new()).await.unwrap_err();
    assert!(matches!(err, SyncError::Unregistered(ref name) if name.as_str() == "posts"));
}

#[test]
fn frozen_registration_drops_events_it_still_receives() {
    let h = harness(SyncConfig::default());
    let posts = h.posts();
    let handler = h.registry.dispatcher().clone();
    h.registry.unregister(&"posts".into());

    let outcome = handler
        .handle_named_event(&posts, "created", json!({"_id": "1"}))
        .unwrap();
    assert_eq!(outcome, syncwire::DispatchOutcome::Dropped);
    assert_eq!(h.cache.upsert_count(), 0);
}

#[test]
fn unregister_all_clears_every_registration() {
    let h = harness(SyncConfig::default());
    h.posts();
    h.registry.get_or_create("comments").unwrap();
    assert_eq!(h.registry.len(), 2);

    h.registry.unregister_all();
    assert!(h.registry.is_empty());
    assert_eq!(h.posts_server().listener_count(EventKind::Created), 0);
    assert_eq!(h.comments_server().listener_count(EventKind::Patched), 0);

    let again = h.posts();
    assert!(!again.is_frozen());
    assert_eq!(h.posts_server().listener_count(EventKind::Created), 1);
}

#[test]
fn unknown_event_names_are_rejected() {
    let h = harness(SyncConfig::default());
    let posts = h.posts();

    let err = h
        .registry
        .dispatcher()
        .handle_named_event(&posts, "deleted", json!({"_id": "1"}))
        .unwrap_err();
    assert!(matches!(err, SyncError::UnknownEventKind(_)));
}
