//! # syncwire: echo-suppressing sync bridge
//!
//! This crate keeps an identity-mapped record cache consistent with a
//! real-time RPC service that pushes `created`, `updated`, `patched` and
//! `removed` notifications. A local write is applied from its own response;
//! when the server later pushes the same change, the echo is recognized and
//! dropped instead of being applied a second time.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌─────────────────┐   ┌──────────────┐   ┌───────────┐
//! │  Adapter  │ → │ ServiceRegistry │ → │ ServiceProxy │ → │ Transport │
//! └───────────┘   │  (EchoGuard per │   │ (+ Sequencer)│   └─────┬─────┘
//!                 │   registration) │   └──────────────┘         │ push
//!                 └────────┬────────┘                            │
//!                          │            ┌─────────────────┐      │
//!                          └──────────▶ │ EventDispatcher │ ◀────┘
//!                                       └────────┬────────┘
//!                                                ▼
//!                                          RecordCache
//! ```
//!
//! A successful `create` or `remove` arms the registration's [`EchoGuard`]
//! before the result reaches the caller. The dispatcher consults the guard
//! for every pushed event and only applies events that are not owed echoes.
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use syncwire::{Adapter, MemoryCache, MemoryTransport, ServiceRegistry};
//! use syncwire_config::SyncConfig;
//!
//! let config = SyncConfig::load()?;
//! let cache = Arc::new(MemoryCache::new().with_type("post", "_id"));
//! let registry = Arc::new(ServiceRegistry::new(
//!     Arc::new(MemoryTransport::new()),
//!     cache,
//!     &config,
//! ));
//! let adapter = Adapter::new(registry, &config);
//! let post = adapter.create_record(&"post".into(), json!({"title": "x"})).await?;
//! ```

#![allow(clippy::cast_precision_loss)] // Statistics averages use f64

pub mod adapter;
pub mod cache;
pub mod dispatcher;
pub mod echo_guard;
mod error;
pub mod identity;
pub mod inflect;
pub mod link;
pub mod memory_transport;
pub mod proxy;
pub mod query_string;
pub mod registry;
pub mod remote_error;
pub mod sequencer;
pub mod stats;
pub mod transport;

pub use adapter::{Adapter, CollectionDocument, PageMeta};
pub use cache::{MemoryCache, NormalizedRecord, RecordCache};
pub use dispatcher::{DispatchOutcome, EventDispatcher};
pub use echo_guard::EchoGuard;
pub use error::{Result, SyncError};
pub use identity::PrimaryKeys;
pub use inflect::Inflector;
pub use link::{LinkResolver, RelationshipCall};
pub use memory_transport::{CallPhase, MemoryService, MemoryTransport, TraceEntry};
pub use proxy::ServiceProxy;
pub use registry::{ServiceRegistration, ServiceRegistry, TypeHint};
pub use remote_error::{ErrorDetail, ErrorKind, RemoteError, TransportError};
pub use sequencer::CallSequencer;
pub use stats::{
    ActivityKind, ActivityMonitor, Aggregate, CallStatistic, LastActivity, ServiceStats, StatsLog,
    StatsReport,
};
pub use transport::{CallRequest, EventHandler, ListenerId, RemoteService, Transport};

pub use syncwire_types::{
    EventKind, Method, Params, RecordId, RecordIdentity, ServiceName, TypeName,
};
