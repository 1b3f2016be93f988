//! The identity-mapped record cache boundary.
//!
//! The engine never owns the cache; it only calls into it through
//! [`RecordCache`]. [`MemoryCache`] is an in-process implementation holding
//! one authoritative copy per (type, id).

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use serde_json::{Map, Value};
use syncwire_types::{RecordId, RecordIdentity, TypeName};

use crate::error::{Result, SyncError};

/// Primary key field used for types the cache has no schema for.
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// A record in the cache's normalized form.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub identity: RecordIdentity,
    pub attributes: Map<String, Value>,
}

/// Operations the engine needs from the cache.
///
/// Implementations must tolerate calls from push-notification context, i.e.
/// outside of any write-originated call stack.
pub trait RecordCache: Send + Sync {
    /// Name of the primary key field for `type_name`.
    fn primary_key_field(&self, type_name: &TypeName) -> String;

    /// Returns true if `type_name` exists locally and is configured to be kept
    /// in sync by this engine.
    fn syncs_type(&self, type_name: &TypeName) -> bool;

    /// Converts a raw wire payload into a normalized record.
    fn normalize(&self, type_name: &TypeName, payload: Value) -> Result<NormalizedRecord>;

    /// Inserts the record, or merges its attributes into the cached copy.
    fn upsert(&self, record: NormalizedRecord);

    fn peek(&self, identity: &RecordIdentity) -> Option<NormalizedRecord>;

    /// Evicts the record. Returns false if it was not cached.
    fn evict(&self, identity: &RecordIdentity) -> bool;
}

#[derive(Debug, Clone)]
struct TypeSchema {
    primary_key: String,
    synced: bool,
}

/// In-process identity map.
#[derive(Debug, Default)]
pub struct MemoryCache {
    schemas: Mutex<HashMap<TypeName, TypeSchema>>,
    records: Mutex<HashMap<RecordIdentity, Map<String, Value>>>,
    upserts: AtomicUsize,
    evictions: AtomicUsize,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a synced record type with its primary key field.
    #[must_use]
    pub fn with_type(self, type_name: impl Into<TypeName>, primary_key: impl Into<String>) -> Self {
        self.define_type(type_name.into(), primary_key.into(), true);
        self
    }

    /// Declares a local type that is not kept in sync by the engine.
    #[must_use]
    pub fn with_unsynced_type(self, type_name: impl Into<TypeName>) -> Self {
        self.define_type(type_name.into(), DEFAULT_PRIMARY_KEY.to_string(), false);
        self
    }

    fn define_type(&self, type_name: TypeName, primary_key: String, synced: bool) {
        self.schemas
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                type_name,
                TypeSchema {
                    primary_key,
                    synced,
                },
            );
    }

    /// Number of cached records of `type_name`.
    pub fn count(&self, type_name: &TypeName) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|identity| &identity.type_name == type_name)
            .count()
    }

    /// Number of upserts applied since creation.
    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    /// Number of successful evictions since creation.
    pub fn eviction_count(&self) -> usize {
        self.evictions.load(Ordering::SeqCst)
    }
}

impl RecordCache for MemoryCache {
    fn primary_key_field(&self, type_name: &TypeName) -> String {
        self.schemas
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(type_name)
            .map_or_else(|| DEFAULT_PRIMARY_KEY.to_string(), |s| s.primary_key.clone())
    }

    fn syncs_type(&self, type_name: &TypeName) -> bool {
        self.schemas
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(type_name)
            .is_some_and(|s| s.synced)
    }

    fn normalize(&self, type_name: &TypeName, payload: Value) -> Result<NormalizedRecord> {
        let field = self.primary_key_field(type_name);
        let Value::Object(attributes) = payload else {
            return Err(SyncError::malformed(type_name, "record payload is not an object"));
        };
        let id = attributes
            .get(&field)
            .and_then(RecordId::from_value)
            .ok_or_else(|| SyncError::MissingIdentity {
                type_name: type_name.clone(),
                field,
            })?;

        Ok(NormalizedRecord {
            identity: RecordIdentity {
                type_name: type_name.clone(),
                id,
            },
            attributes,
        })
    }

    fn upsert(&self, record: NormalizedRecord) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        match records.entry(record.identity) {
            Entry::Occupied(mut existing) => existing.get_mut().extend(record.attributes),
            Entry::Vacant(slot) => {
                slot.insert(record.attributes);
            }
        }
        self.upserts.fetch_add(1, Ordering::SeqCst);
    }

    fn peek(&self, identity: &RecordIdentity) -> Option<NormalizedRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .map(|attributes| NormalizedRecord {
                identity: identity.clone(),
                attributes: attributes.clone(),
            })
    }

    fn evict(&self, identity: &RecordIdentity) -> bool {
        let removed = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identity)
            .is_some();
        if removed {
            self.evictions.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }
}
