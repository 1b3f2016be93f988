//! Typed wrapper over one remote service handle.

use std::sync::Arc;

use serde_json::Value;
use syncwire_types::{Params, RecordId, ServiceName};
use tracing::{debug, instrument};

use crate::error::{Result, SyncError};
use crate::sequencer::CallSequencer;
use crate::transport::{CallRequest, RemoteService};

/// Issues the six remote methods of one service through the registry's
/// sequencer.
///
/// Fulfills with the raw server payload. Failures are classified into
/// [`SyncError::Remote`] or passed through as [`SyncError::Transport`].
#[derive(Clone)]
pub struct ServiceProxy {
    name: ServiceName,
    remote: Arc<dyn RemoteService>,
    sequencer: Arc<CallSequencer>,
}

impl ServiceProxy {
    pub fn new(name: ServiceName, remote: Arc<dyn RemoteService>, sequencer: Arc<CallSequencer>) -> Self {
        Self {
            name,
            remote,
            sequencer,
        }
    }

    pub fn name(&self) -> &ServiceName {
        &self.name
    }

    /// The underlying push-channel handle.
    pub fn remote(&self) -> &Arc<dyn RemoteService> {
        &self.remote
    }

    /// Lists records matching `params`. The payload is a bare array or a
    /// paginated envelope, depending on the service.
    pub async fn find(&self, params: Params) -> Result<Value> {
        self.call(CallRequest::Find { params }).await
    }

    /// Fetches one record by id.
    pub async fn get(&self, id: impl Into<RecordId>, params: Params) -> Result<Value> {
        self.call(CallRequest::Get {
            id: id.into(),
            params,
        })
        .await
    }

    /// Creates one record, or several when `data` is an array.
    pub async fn create(&self, data: Value, params: Params) -> Result<Value> {
        self.call(CallRequest::Create { data, params }).await
    }

    /// Replaces the record `id` with `data`.
    pub async fn update(&self, id: impl Into<RecordId>, data: Value, params: Params) -> Result<Value> {
        self.call(CallRequest::Update {
            id: id.into(),
            data,
            params,
        })
        .await
    }

    /// Merges `data` into the record `id`.
    pub async fn patch(&self, id: impl Into<RecordId>, data: Value, params: Params) -> Result<Value> {
        self.call(CallRequest::Patch {
            id: id.into(),
            data,
            params,
        })
        .await
    }

    /// Removes the record `id`; the payload is the removed record.
    pub async fn remove(&self, id: impl Into<RecordId>, params: Params) -> Result<Value> {
        self.call(CallRequest::Remove {
            id: id.into(),
            params,
        })
        .await
    }

    /// Performs `request` through the sequencer.
    #[instrument(skip_all, fields(service = %self.name, method = %request.method()))]
    pub async fn call(&self, request: CallRequest) -> Result<Value> {
        let method = request.method();
        let remote = Arc::clone(&self.remote);
        let outcome = self
            .sequencer
            .enqueue(&self.name, method, async move { remote.call(request).await })
            .await;

        outcome.map_err(|e| {
            debug!(error = %e, name = ?e.name, "remote call failed");
            SyncError::from_transport(e)
        })
    }
}

impl std::fmt::Debug for ServiceProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProxy")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
