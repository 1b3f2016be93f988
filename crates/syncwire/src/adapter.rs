//! Store-facing adapter API.
//!
//! Each operation resolves the registration serving a record type, goes
//! through its locked call path and loads the response into the cache. That
//! eager load is what makes the push echo of the same write redundant.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use syncwire_config::SyncConfig;
use syncwire_types::{Params, RecordId, RecordIdentity, TypeName};
use tracing::{debug, instrument};

use crate::cache::{NormalizedRecord, RecordCache};
use crate::error::{Result, SyncError};
use crate::link::LinkResolver;
use crate::registry::{ServiceRegistration, ServiceRegistry};

/// Pagination figures of a collection response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    pub skip: u64,
    pub limit: u64,
    pub total: u64,
}

/// A loaded collection with optional pagination.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionDocument {
    pub records: Vec<NormalizedRecord>,
    pub meta: Option<PageMeta>,
}

impl CollectionDocument {
    /// Number of loaded records, not the server-side total.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Splits a collection payload into its records and pagination.
///
/// Accepts a bare array, or an object with a `data` array and pagination
/// fields either at the top level or under `meta`.
fn unwrap_envelope(type_name: &TypeName, payload: Value) -> Result<(Vec<Value>, Option<PageMeta>)> {
    let mut envelope = match payload {
        Value::Array(records) => return Ok((records, None)),
        Value::Object(envelope) => envelope,
        _ => return Err(SyncError::malformed(type_name, "collection payload is neither an array nor an object")),
    };
    let Some(Value::Array(records)) = envelope.remove("data") else {
        return Err(SyncError::malformed(type_name, "collection envelope has no data array"));
    };

    let source = match envelope.get("meta") {
        Some(Value::Object(meta)) => meta.clone(),
        _ => envelope,
    };
    let field = |name: &str| source.get(name).and_then(Value::as_u64);
    let meta = if ["skip", "limit", "total"].iter().any(|f| source.contains_key(*f)) {
        let count = records.len() as u64;
        Some(PageMeta {
            skip: field("skip").unwrap_or(0),
            limit: field("limit").unwrap_or(count),
            total: field("total").unwrap_or(count),
        })
    } else {
        None
    };
    Ok((records, meta))
}

/// Adapter between a record store and the registry's services.
#[derive(Clone)]
pub struct Adapter {
    registry: Arc<ServiceRegistry>,
    cache: Arc<dyn RecordCache>,
    links: LinkResolver,
    update_uses_patch: bool,
}

impl Adapter {
    pub fn new(registry: Arc<ServiceRegistry>, config: &SyncConfig) -> Self {
        Self {
            cache: Arc::clone(registry.cache()),
            links: LinkResolver::new(Arc::clone(&registry)),
            registry,
            update_uses_patch: config.adapter.update_uses_patch,
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn links(&self) -> &LinkResolver {
        &self.links
    }

    fn service(&self, type_name: &TypeName) -> Result<Arc<ServiceRegistration>> {
        self.registry.service_for_type(type_name)
    }

    #[instrument(skip_all, fields(type_name = %type_name, id = %id))]
    pub async fn find_record(&self, type_name: &TypeName, id: &RecordId) -> Result<NormalizedRecord> {
        let payload = self.service(type_name)?.get(id.clone(), Params::new()).await?;
        self.load_record(type_name, payload)
    }

    #[instrument(skip_all, fields(type_name = %type_name))]
    pub async fn create_record(&self, type_name: &TypeName, data: Value) -> Result<NormalizedRecord> {
        let payload = self.service(type_name)?.create(data, Params::new()).await?;
        self.load_record(type_name, payload)
    }

    /// Saves `data` over the record with `update`, or `patch` when configured.
    #[instrument(skip_all, fields(type_name = %type_name, id = %id))]
    pub async fn update_record(
        &self,
        type_name: &TypeName,
        id: &RecordId,
        data: Value,
    ) -> Result<NormalizedRecord> {
        let service = self.service(type_name)?;
        let payload = if self.update_uses_patch {
            service.patch(id.clone(), data, Params::new()).await?
        } else {
            service.update(id.clone(), data, Params::new()).await?
        };
        self.load_record(type_name, payload)
    }

    /// Removes the record remotely, then evicts it locally.
    #[instrument(skip_all, fields(type_name = %type_name, id = %id))]
    pub async fn delete_record(&self, type_name: &TypeName, id: &RecordId) -> Result<()> {
        self.service(type_name)?.remove(id.clone(), Params::new()).await?;
        let identity = RecordIdentity {
            type_name: type_name.clone(),
            id: id.clone(),
        };
        let evicted = self.cache.evict(&identity);
        debug!(record = %identity, evicted, "deleted record");
        Ok(())
    }

    /// Loads every record of `type_name` the service returns, with its
    /// pagination if the service pages.
    pub async fn find_all(&self, type_name: &TypeName) -> Result<CollectionDocument> {
        self.query(type_name, Params::new()).await
    }

    #[instrument(skip_all, fields(type_name = %type_name))]
    pub async fn query(&self, type_name: &TypeName, params: Params) -> Result<CollectionDocument> {
        let payload = self.service(type_name)?.find(params).await?;
        self.load_collection(type_name, payload)
    }

    /// Queries for a single record. More than one match is a contract
    /// violation.
    pub async fn query_record(&self, type_name: &TypeName, params: Params) -> Result<Option<NormalizedRecord>> {
        let payload = self.service(type_name)?.find(params).await?;
        self.load_singular(type_name, payload)
    }

    /// Fetches several records with one `$in` query on the primary key.
    pub async fn find_many(&self, type_name: &TypeName, ids: &[RecordId]) -> Result<CollectionDocument> {
        let service = self.service(type_name)?;
        let field = service.primary_keys().field_for(type_name);
        let mut params = Params::new();
        params.insert(field, json!({ "$in": ids }));
        let payload = service.find(params).await?;
        self.load_collection(type_name, payload)
    }

    /// Follows a singular relationship link.
    pub async fn find_belongs_to(&self, type_name: &TypeName, link: &str) -> Result<Option<NormalizedRecord>> {
        let call = self
            .links
            .resolve(link, Some(type_name))?
            .ok_or_else(|| SyncError::malformed(type_name, format!("unresolvable link '{link}'")))?;
        let payload = call.invoke().await?;
        if call.is_singular() {
            self.load_record(type_name, payload).map(Some)
        } else {
            self.load_singular(type_name, payload)
        }
    }

    /// Follows a collection relationship link.
    pub async fn find_has_many(&self, type_name: &TypeName, link: &str) -> Result<CollectionDocument> {
        let call = self
            .links
            .resolve(link, Some(type_name))?
            .ok_or_else(|| SyncError::malformed(type_name, format!("unresolvable link '{link}'")))?;
        let payload = call.invoke().await?;
        if call.is_singular() {
            let record = self.load_record(type_name, payload)?;
            return Ok(CollectionDocument {
                records: vec![record],
                meta: None,
            });
        }
        self.load_collection(type_name, payload)
    }

    fn load_record(&self, type_name: &TypeName, payload: Value) -> Result<NormalizedRecord> {
        let record = self.cache.normalize(type_name, payload)?;
        let identity = record.identity.clone();
        self.cache.upsert(record.clone());
        Ok(self.cache.peek(&identity).unwrap_or(record))
    }

    fn load_collection(&self, type_name: &TypeName, payload: Value) -> Result<CollectionDocument> {
        let (records, meta) = unwrap_envelope(type_name, payload)?;
        let records = records
            .into_iter()
            .map(|payload| self.load_record(type_name, payload))
            .collect::<Result<Vec<_>>>()?;
        Ok(CollectionDocument { records, meta })
    }

    fn load_singular(&self, type_name: &TypeName, payload: Value) -> Result<Option<NormalizedRecord>> {
        let mut records = match payload {
            Value::Null => return Ok(None),
            Value::Object(fields) if !matches!(fields.get("data"), Some(Value::Array(_))) => {
                return self.load_record(type_name, Value::Object(fields)).map(Some);
            }
            other => unwrap_envelope(type_name, other)?.0,
        };
        match records.len() {
            0 => Ok(None),
            1 => self.load_record(type_name, records.remove(0)).map(Some),
            count => Err(SyncError::UnexpectedCardinality {
                type_name: type_name.clone(),
                count,
            }),
        }
    }
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("registry", &self.registry)
            .field("update_uses_patch", &self.update_uses_patch)
            .finish_non_exhaustive()
    }
}
