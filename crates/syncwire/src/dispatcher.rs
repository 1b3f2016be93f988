//! Applies push notifications to the record cache.
//!
//! Every event first passes the owning registration's echo guard. An event
//! the guard recognizes as the echo of a local write is dropped; anything
//! else is a genuine change and is merged into, or evicted from, the cache.

use std::sync::Arc;

use serde_json::Value;
use syncwire_types::EventKind;
use tracing::{debug, error};

use crate::cache::RecordCache;
use crate::error::Result;
use crate::registry::ServiceRegistration;

/// What a dispatched event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The service is unmapped or unregistered.
    Dropped,
    /// The event was the expected echo of a local write.
    Discarded,
    /// The payload was merged into the cache.
    Merged,
    /// A patch for a record that is not cached; nothing was created.
    Skipped,
    /// A removal evicted the cached record.
    Evicted,
    /// A removal for a record that was not cached.
    Absent,
}

impl DispatchOutcome {
    /// Returns true if the cache was mutated.
    pub fn changed_cache(self) -> bool {
        matches!(self, DispatchOutcome::Merged | DispatchOutcome::Evicted)
    }
}

/// Push-event handler shared by every registration of a registry.
pub struct EventDispatcher {
    cache: Arc<dyn RecordCache>,
}

impl EventDispatcher {
    /// Applies accepted events to `cache`.
    pub fn new(cache: Arc<dyn RecordCache>) -> Self {
        Self { cache }
    }

    /// Handles one event whose kind arrived as a string.
    ///
    /// An unknown kind is a fatal protocol violation.
    pub fn handle_named_event(
        &self,
        registration: &ServiceRegistration,
        kind: &str,
        message: Value,
    ) -> Result<DispatchOutcome> {
        let kind: EventKind = kind.parse().inspect_err(|e| {
            error!(service = %registration.service_name(), error = %e, "rejected push event");
        })?;
        self.handle_service_event(registration, kind, message)
    }

    /// Handles one `kind` event pushed by `registration`'s service.
    ///
    /// Fatal violations are logged and returned; no cache mutation happens
    /// before the identity is extracted.
    pub fn handle_service_event(
        &self,
        registration: &ServiceRegistration,
        kind: EventKind,
        message: Value,
    ) -> Result<DispatchOutcome> {
        self.apply(registration, kind, message).inspect_err(|e| {
            if e.is_fatal() {
                error!(service = %registration.service_name(), kind = %kind, error = %e, "rejected push event");
            }
        })
    }

    fn apply(
        &self,
        registration: &ServiceRegistration,
        kind: EventKind,
        message: Value,
    ) -> Result<DispatchOutcome> {
        let service = registration.service_name();
        if registration.is_frozen() {
            return Ok(DispatchOutcome::Dropped);
        }
        let Some(type_name) = registration.type_name() else {
            debug!(service = %service, kind = %kind, "dropping event of unmapped service");
            return Ok(DispatchOutcome::Dropped);
        };

        let identity = registration
            .primary_keys()
            .identity_of(&type_name, &message)?;

        if registration.discard_echo(kind, &identity, true) {
            debug!(service = %service, kind = %kind, record = %identity, "discarded echo");
            return Ok(DispatchOutcome::Discarded);
        }

        let outcome = match kind {
            EventKind::Created | EventKind::Updated => {
                self.cache.upsert(self.cache.normalize(&type_name, message)?);
                DispatchOutcome::Merged
            }
            EventKind::Patched => {
                if self.cache.peek(&identity).is_none() {
                    DispatchOutcome::Skipped
                } else {
                    self.cache.upsert(self.cache.normalize(&type_name, message)?);
                    DispatchOutcome::Merged
                }
            }
            EventKind::Removed => {
                if self.cache.evict(&identity) {
                    DispatchOutcome::Evicted
                } else {
                    DispatchOutcome::Absent
                }
            }
        };
        debug!(service = %service, kind = %kind, record = %identity, ?outcome, "applied event");
        Ok(outcome)
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::error::SyncError;
    use crate::memory_transport::MemoryTransport;
    use crate::registry::{ServiceRegistry, TypeHint};
    use proptest::prelude::*;
    use serde_json::json;
    use syncwire_config::SyncConfig;
    use syncwire_types::{RecordIdentity, TypeName};

    fn setup() -> (Arc<MemoryCache>, ServiceRegistry, Arc<ServiceRegistration>) {
        let cache = Arc::new(MemoryCache::new().with_type("post", "_id"));
        let registry = ServiceRegistry::new(
            Arc::new(MemoryTransport::new()),
            cache.clone(),
            &SyncConfig::default(),
        );
        let posts = registry.register("posts", "post").unwrap();
        (cache, registry, posts)
    }

    fn identity(id: &str) -> RecordIdentity {
        RecordIdentity::new("post", id)
    }

    #[test]
    fn created_and_updated_merge() {
        let (cache, registry, posts) = setup();
        let dispatcher = registry.dispatcher();

        let outcome = dispatcher
            .handle_service_event(&posts, EventKind::Created, json!({"_id": "1", "title": "a"}))
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Merged);
        dispatcher
            .handle_service_event(&posts, EventKind::Updated, json!({"_id": "1", "title": "b"}))
            .unwrap();

        assert_eq!(cache.count(&"post".into()), 1);
        assert_eq!(cache.peek(&identity("1")).unwrap().attributes["title"], json!("b"));
    }

    #[test]
    fn patched_for_absent_record_is_skipped() {
        let (cache, registry, posts) = setup();
        let outcome = registry
            .dispatcher()
            .handle_service_event(&posts, EventKind::Patched, json!({"_id": "9", "title": "p"}))
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Skipped);
        assert_eq!(cache.upsert_count(), 0);
        assert!(cache.peek(&identity("9")).is_none());
    }

    #[test]
    fn patched_for_cached_record_merges() {
        let (cache, registry, posts) = setup();
        let dispatcher = registry.dispatcher();
        dispatcher
            .handle_service_event(&posts, EventKind::Created, json!({"_id": "1", "title": "a", "body": "b"}))
            .unwrap();
        let outcome = dispatcher
            .handle_service_event(&posts, EventKind::Patched, json!({"_id": "1", "title": "p"}))
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Merged);
        let stored = cache.peek(&identity("1")).unwrap();
        assert_eq!(stored.attributes["title"], json!("p"));
        assert_eq!(stored.attributes["body"], json!("b"));
    }

    #[test]
    fn removed_evicts_when_cached() {
        let (cache, registry, posts) = setup();
        let dispatcher = registry.dispatcher();
        dispatcher
            .handle_service_event(&posts, EventKind::Created, json!({"_id": "1"}))
            .unwrap();

        let removed = dispatcher
            .handle_service_event(&posts, EventKind::Removed, json!({"_id": "1"}))
            .unwrap();
        assert_eq!(removed, DispatchOutcome::Evicted);
        let again = dispatcher
            .handle_service_event(&posts, EventKind::Removed, json!({"_id": "1"}))
            .unwrap();
        assert_eq!(again, DispatchOutcome::Absent);
        assert_eq!(cache.eviction_count(), 1);
    }

    #[test]
    fn missing_identity_is_fatal_and_mutates_nothing() {
        let (cache, registry, posts) = setup();
        for kind in EventKind::ALL {
            let err = registry
                .dispatcher()
                .handle_service_event(&posts, kind, json!({"title": "no id"}))
                .unwrap_err();
            assert!(matches!(err, SyncError::MissingIdentity { .. }));
            assert!(err.is_fatal());
        }
        assert_eq!(cache.upsert_count(), 0);
        assert_eq!(cache.eviction_count(), 0);
    }

    #[test]
    fn unknown_kind_is_fatal() {
        let (_cache, registry, posts) = setup();
        let err = registry
            .dispatcher()
            .handle_named_event(&posts, "moved", json!({"_id": "1"}))
            .unwrap_err();
        assert!(matches!(err, SyncError::UnknownEventKind(_)));

        let outcome = registry
            .dispatcher()
            .handle_named_event(&posts, "created", json!({"_id": "1"}))
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Merged);
    }

    #[test]
    fn unmapped_service_drops_without_identity_check() {
        let (cache, registry, _posts) = setup();
        let metrics = registry.register("metrics", TypeHint::Unmapped).unwrap();
        let outcome = registry
            .dispatcher()
            .handle_service_event(&metrics, EventKind::Created, json!({"no": "id"}))
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Dropped);
        assert_eq!(cache.upsert_count(), 0);
    }

    #[test]
    fn changed_cache_flags() {
        assert!(DispatchOutcome::Merged.changed_cache());
        assert!(DispatchOutcome::Evicted.changed_cache());
        assert!(!DispatchOutcome::Discarded.changed_cache());
        assert!(!DispatchOutcome::Skipped.changed_cache());
    }

    fn event_strategy() -> impl Strategy<Value = (EventKind, u8)> {
        (
            prop::sample::select(EventKind::ALL.to_vec()),
            0u8..4,
        )
    }

    proptest! {
        /// Without armed writes, every event reaches the cache: created and
        /// updated always merge, patched merges iff cached, removed evicts iff
        /// cached.
        #[test]
        fn unarmed_events_are_never_discarded(events in prop::collection::vec(event_strategy(), 0..40)) {
            let (cache, registry, posts) = setup();
            let post = TypeName::from("post");
            let mut present = std::collections::HashSet::new();

            for (kind, id) in events {
                let id = id.to_string();
                let cached = present.contains(&id);
                let outcome = registry
                    .dispatcher()
                    .handle_service_event(&posts, kind, json!({"_id": id.clone(), "k": kind.as_str()}))
                    .unwrap();

                let expected = match kind {
                    EventKind::Created | EventKind::Updated => {
                        present.insert(id.clone());
                        DispatchOutcome::Merged
                    }
                    EventKind::Patched if cached => DispatchOutcome::Merged,
                    EventKind::Patched => DispatchOutcome::Skipped,
                    EventKind::Removed if cached => {
                        present.remove(&id);
                        DispatchOutcome::Evicted
                    }
                    EventKind::Removed => DispatchOutcome::Absent,
                };
                prop_assert_eq!(outcome, expected);
                prop_assert_eq!(cache.count(&post), present.len());
            }
        }
    }
}
