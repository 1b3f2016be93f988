//! Record identity extraction with a per-type primary-key cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use syncwire_types::{RecordId, RecordIdentity, TypeName};

use crate::cache::RecordCache;
use crate::error::{Result, SyncError};

/// Resolves primary key fields through the cache once per type, then serves
/// them from memory.
pub struct PrimaryKeys {
    cache: Arc<dyn RecordCache>,
    resolved: Mutex<HashMap<TypeName, String>>,
}

impl PrimaryKeys {
    pub fn new(cache: Arc<dyn RecordCache>) -> Self {
        Self {
            cache,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// Primary key field of `type_name`.
    pub fn field_for(&self, type_name: &TypeName) -> String {
        let mut resolved = self.resolved.lock().unwrap_or_else(PoisonError::into_inner);
        resolved
            .entry(type_name.clone())
            .or_insert_with(|| self.cache.primary_key_field(type_name))
            .clone()
    }

    /// Extracts the identity of a record payload.
    ///
    /// A payload without an id is a protocol violation: an identity is never
    /// synthesized.
    pub fn identity_of(&self, type_name: &TypeName, payload: &Value) -> Result<RecordIdentity> {
        let field = self.field_for(type_name);
        match RecordId::from_payload(payload, &field) {
            Some(id) => Ok(RecordIdentity {
                type_name: type_name.clone(),
                id,
            }),
            None => Err(SyncError::MissingIdentity {
                type_name: type_name.clone(),
                field,
            }),
        }
    }
}

impl std::fmt::Debug for PrimaryKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimaryKeys")
            .field("resolved", &self.resolved)
            .finish_non_exhaustive()
    }
}
