//! Shared fixtures for the syncwire integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use syncwire::{Adapter, MemoryCache, MemoryService, MemoryTransport, ServiceRegistration, ServiceRegistry};
use syncwire_config::SyncConfig;
use syncwire_types::TypeName;

/// A registry wired to a loopback transport and an in-memory cache.
///
/// `post` records live in the `posts` service and are keyed by `_id`;
/// `comment` records live in `comments` and are keyed by `id`.
pub struct Harness {
    pub transport: Arc<MemoryTransport>,
    pub cache: Arc<MemoryCache>,
    pub registry: Arc<ServiceRegistry>,
    pub adapter: Adapter,
}

pub fn harness(config: SyncConfig) -> Harness {
    let transport = Arc::new(
        MemoryTransport::from_config(&config.socket).with_primary_key("posts", "_id"),
    );
    let cache = Arc::new(
        MemoryCache::new()
            .with_type("post", "_id")
            .with_type("comment", "id")
            .with_type("user", "id"),
    );
    let registry = Arc::new(ServiceRegistry::new(transport.clone(), cache.clone(), &config));
    let adapter = Adapter::new(Arc::clone(&registry), &config);
    Harness {
        transport,
        cache,
        registry,
        adapter,
    }
}

impl Harness {
    /// Server side of `posts`.
    pub fn posts_server(&self) -> Arc<MemoryService> {
        self.transport.handle("posts")
    }

    /// Server side of `comments`.
    pub fn comments_server(&self) -> Arc<MemoryService> {
        self.transport.handle("comments")
    }

    /// Client-side registration of `posts`, registered on first use.
    pub fn posts(&self) -> Arc<ServiceRegistration> {
        self.registry
            .service_for_type(&TypeName::from("post"))
            .expect("post registers cleanly")
    }
}
