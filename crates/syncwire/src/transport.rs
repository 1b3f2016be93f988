//! The RPC transport boundary.
//!
//! A [`Transport`] hands out one [`RemoteService`] handle per service name.
//! Each handle answers the six remote methods and lets listeners subscribe to
//! its push channel. Reconnects, backoff and wire encoding live behind this
//! trait.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use syncwire_types::{EventKind, Method, Params, RecordId, ServiceName};

use crate::error::Result;
use crate::remote_error::TransportError;

/// Handler invoked with the raw payload of each push event.
///
/// A fatal dispatch error is returned to the emitter rather than swallowed.
pub type EventHandler = Arc<dyn Fn(Value) -> Result<()> + Send + Sync>;

/// Handle returned by [`RemoteService::on`], needed to detach the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Allocates a process-unique listener id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// One remote method invocation with its normalized arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum CallRequest {
    Find {
        params: Params,
    },
    Get {
        id: RecordId,
        params: Params,
    },
    Create {
        data: Value,
        params: Params,
    },
    Update {
        id: RecordId,
        data: Value,
        params: Params,
    },
    Patch {
        id: RecordId,
        data: Value,
        params: Params,
    },
    Remove {
        id: RecordId,
        params: Params,
    },
}

impl CallRequest {
    pub fn method(&self) -> Method {
        match self {
            CallRequest::Find { .. } => Method::Find,
            CallRequest::Get { .. } => Method::Get,
            CallRequest::Create { .. } => Method::Create,
            CallRequest::Update { .. } => Method::Update,
            CallRequest::Patch { .. } => Method::Patch,
            CallRequest::Remove { .. } => Method::Remove,
        }
    }

    /// The record id the call addresses, if any.
    pub fn id(&self) -> Option<&RecordId> {
        match self {
            CallRequest::Get { id, .. }
            | CallRequest::Update { id, .. }
            | CallRequest::Patch { id, .. }
            | CallRequest::Remove { id, .. } => Some(id),
            CallRequest::Find { .. } | CallRequest::Create { .. } => None,
        }
    }

    pub fn params(&self) -> &Params {
        match self {
            CallRequest::Find { params }
            | CallRequest::Get { params, .. }
            | CallRequest::Create { params, .. }
            | CallRequest::Update { params, .. }
            | CallRequest::Patch { params, .. }
            | CallRequest::Remove { params, .. } => params,
        }
    }
}

/// A remote service handle.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Performs one remote call, yielding the raw server payload.
    async fn call(&self, request: CallRequest) -> Result<Value, TransportError>;

    /// Subscribes `handler` to push events of `kind`.
    fn on(&self, kind: EventKind, handler: EventHandler) -> ListenerId;

    /// Detaches a listener. Unknown ids are ignored.
    fn off(&self, kind: EventKind, listener: ListenerId);
}

/// Hands out remote service handles by name.
pub trait Transport: Send + Sync {
    fn service(&self, name: &ServiceName) -> Arc<dyn RemoteService>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn listener_ids_are_unique() {
        let a = ListenerId::next();
        let b = ListenerId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn request_accessors() {
        let request = CallRequest::Patch {
            id: RecordId::from("4"),
            data: json!({"title": "t"}),
            params: Params::new(),
        };
        assert_eq!(request.method(), Method::Patch);
        assert_eq!(request.id(), Some(&RecordId::from("4")));
        assert!(request.params().is_empty());

        let create = CallRequest::Create {
            data: json!({}),
            params: Params::new(),
        };
        assert_eq!(create.id(), None);
    }
}
