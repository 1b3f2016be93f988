//! Service registrations and the type-name / service-name mapping.
//!
//! The registry owns one [`ServiceRegistration`] per remote service. A
//! registration bundles the service's proxy, its echo guard and the push
//! listeners attached on its behalf. Registrations are created lazily on
//! first reference, by service name or by record type.
//!
//! # Naming convention
//!
//! A record type `post` maps to the service `posts`. When a service is
//! registered without a type, the registry singularizes its name and binds
//! the result only if the cache syncs a type of that name; otherwise the
//! service is unmapped and its push events are never applied.
//!
//! # Locking
//!
//! Lock order is registry state, then registration state. Push handlers only
//! take registration locks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde_json::Value;
use syncwire_config::{EchoConfig, SyncConfig};
use syncwire_types::{EventKind, Method, Params, RecordId, RecordIdentity, ServiceName, TypeName};
use tracing::{debug, warn};

use crate::cache::RecordCache;
use crate::dispatcher::EventDispatcher;
use crate::echo_guard::EchoGuard;
use crate::error::{Result, SyncError};
use crate::identity::PrimaryKeys;
use crate::inflect::Inflector;
use crate::proxy::ServiceProxy;
use crate::sequencer::CallSequencer;
use crate::stats::{ActivityKind, ActivityMonitor, LastActivity, StatsReport};
use crate::transport::{CallRequest, EventHandler, ListenerId, RemoteService, Transport};

/// How a registration should pick its record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeHint {
    /// Singularize the service name and bind it if the cache syncs that type.
    Guess,
    /// Never bind a type; push events are received but dropped.
    Unmapped,
    Named(TypeName),
}

impl From<TypeName> for TypeHint {
    fn from(type_name: TypeName) -> Self {
        TypeHint::Named(type_name)
    }
}

impl From<&str> for TypeHint {
    fn from(type_name: &str) -> Self {
        TypeHint::Named(type_name.into())
    }
}

// ============================================================================
// Registration
// ============================================================================

/// One registered remote service.
pub struct ServiceRegistration {
    service: ServiceName,
    type_name: Mutex<Option<TypeName>>,
    proxy: ServiceProxy,
    keys: Arc<PrimaryKeys>,
    locks: EchoConfig,
    guard: Mutex<EchoGuard>,
    listeners: Mutex<Vec<(EventKind, ListenerId)>>,
    activity: Arc<ActivityMonitor>,
    frozen: AtomicBool,
}

impl ServiceRegistration {
    /// Remote service this registration talks to.
    pub fn service_name(&self) -> &ServiceName {
        &self.service
    }

    /// Bound record type, `None` for an unmapped service.
    pub fn type_name(&self) -> Option<TypeName> {
        self.type_name
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns true when push events of this service are never applied.
    pub fn is_unmapped(&self) -> bool {
        self.type_name().is_none()
    }

    /// The unlocked proxy. Calls made through it never arm echo suppression.
    pub fn proxy(&self) -> &ServiceProxy {
        &self.proxy
    }

    /// Returns true once the service was unregistered.
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    /// [`ServiceProxy::find`] through this registration.
    pub async fn find(&self, params: Params) -> Result<Value> {
        self.call(CallRequest::Find { params }).await
    }

    /// [`ServiceProxy::get`] through this registration.
    pub async fn get(&self, id: impl Into<RecordId>, params: Params) -> Result<Value> {
        self.call(CallRequest::Get {
            id: id.into(),
            params,
        })
        .await
    }

    /// [`ServiceProxy::create`] through the locked call path. Arms echo
    /// suppression when `create` is a locked method.
    pub async fn create(&self, data: Value, params: Params) -> Result<Value> {
        self.call(CallRequest::Create { data, params }).await
    }

    /// [`ServiceProxy::update`] through the locked call path. Arms echo
    /// suppression when `update` is a locked method.
    pub async fn update(&self, id: impl Into<RecordId>, data: Value, params: Params) -> Result<Value> {
        self.call(CallRequest::Update {
            id: id.into(),
            data,
            params,
        })
        .await
    }

    /// [`ServiceProxy::patch`] through the locked call path. Arms echo
    /// suppression when `patch` is a locked method.
    pub async fn patch(&self, id: impl Into<RecordId>, data: Value, params: Params) -> Result<Value> {
        self.call(CallRequest::Patch {
            id: id.into(),
            data,
            params,
        })
        .await
    }

    /// [`ServiceProxy::remove`] through the locked call path. Arms echo
    /// suppression when `remove` is a locked method.
    pub async fn remove(&self, id: impl Into<RecordId>, params: Params) -> Result<Value> {
        self.call(CallRequest::Remove {
            id: id.into(),
            params,
        })
        .await
    }

    /// Performs a remote call; on success of a locked method, arms echo
    /// suppression before the payload is handed back.
    ///
    /// Failures leave the guard untouched. Either way the connection's last
    /// response or error time is refreshed.
    pub async fn call(&self, request: CallRequest) -> Result<Value> {
        if self.is_frozen() {
            return Err(SyncError::Unregistered(self.service.clone()));
        }
        let method = request.method();
        let requested_id = request.id().cloned();

        match self.proxy.call(request).await {
            Ok(payload) => {
                self.activity.touch(ActivityKind::Response);
                self.arm(method, &payload, requested_id.as_ref());
                Ok(payload)
            }
            Err(err) => {
                self.activity.touch(ActivityKind::Error);
                Err(err)
            }
        }
    }

    fn arm(&self, method: Method, payload: &Value, requested_id: Option<&RecordId>) {
        if !self.locks.locks(method) || self.is_frozen() {
            return;
        }
        let (Some(kind), Some(type_name)) = (method.echo_kind(), self.type_name()) else {
            return;
        };

        let records = match payload {
            Value::Array(records) => records.iter().collect(),
            single => vec![single],
        };
        let mut guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        for record in records {
            let identity = match self.keys.identity_of(&type_name, record) {
                Ok(identity) => identity,
                Err(_) => match (method, requested_id) {
                    (Method::Remove, Some(id)) => RecordIdentity {
                        type_name: type_name.clone(),
                        id: id.clone(),
                    },
                    _ => {
                        warn!(service = %self.service, method = %method, "response carries no identity, echo not expected");
                        continue;
                    }
                },
            };
            let pending = guard.record_expected_echo(kind, &identity);
            debug!(service = %self.service, kind = %kind, record = %identity, pending, "expecting echo");
        }
    }

    /// Checks whether an incoming `kind` message is an expected echo,
    /// consuming one pending echo when `consume` is set.
    ///
    /// Unmapped services never discard. A message without an identity is a
    /// fatal protocol violation.
    pub fn should_discard(&self, kind: EventKind, message: &Value, consume: bool) -> Result<bool> {
        let Some(type_name) = self.type_name() else {
            return Ok(false);
        };
        let identity = self.keys.identity_of(&type_name, message)?;
        Ok(self.discard_echo(kind, &identity, consume))
    }

    pub(crate) fn discard_echo(&self, kind: EventKind, identity: &RecordIdentity, consume: bool) -> bool {
        self.guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .should_discard(kind, identity, consume)
    }

    pub(crate) fn primary_keys(&self) -> &PrimaryKeys {
        &self.keys
    }

    /// Echoes still owed for (kind, identity).
    pub fn pending_echoes(&self, kind: EventKind, identity: &RecordIdentity) -> u32 {
        self.guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending(kind, identity)
    }

    /// Returns true when no echo is owed for any record.
    pub fn is_settled(&self) -> bool {
        self.guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_idle()
    }

    /// Subscribes a custom listener to this service's push channel.
    ///
    /// The listener is detached when the service is unregistered.
    pub fn on(&self, kind: EventKind, handler: EventHandler) -> ListenerId {
        let id = self.proxy.remote().on(kind, handler);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((kind, id));
        id
    }

    /// Detaches a listener added with [`ServiceRegistration::on`].
    pub fn off(&self, kind: EventKind, listener: ListenerId) {
        self.proxy.remote().off(kind, listener);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|&(k, id)| k != kind || id != listener);
    }

    /// Freezes the registration and detaches every listener.
    fn detach(&self) {
        self.frozen.store(true, Ordering::SeqCst);
        let listeners =
            std::mem::take(&mut *self.listeners.lock().unwrap_or_else(PoisonError::into_inner));
        for (kind, id) in &listeners {
            self.proxy.remote().off(*kind, *id);
        }
        self.guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        debug!(service = %self.service, listeners = listeners.len(), "service unregistered");
    }
}

impl std::fmt::Debug for ServiceRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistration")
            .field("service", &self.service)
            .field("type_name", &self.type_name())
            .field("frozen", &self.is_frozen())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug, Default)]
struct RegistryState {
    by_service: HashMap<ServiceName, Arc<ServiceRegistration>>,
    by_type: HashMap<TypeName, ServiceName>,
}

/// Owner of every service registration.
pub struct ServiceRegistry {
    transport: Arc<dyn Transport>,
    cache: Arc<dyn RecordCache>,
    keys: Arc<PrimaryKeys>,
    sequencer: Arc<CallSequencer>,
    dispatcher: Arc<EventDispatcher>,
    inflector: Inflector,
    locks: EchoConfig,
    activity: Arc<ActivityMonitor>,
    state: Mutex<RegistryState>,
}

impl ServiceRegistry {
    /// Creates an empty registry; services register lazily on first use.
    pub fn new(transport: Arc<dyn Transport>, cache: Arc<dyn RecordCache>, config: &SyncConfig) -> Self {
        let keys = Arc::new(PrimaryKeys::new(Arc::clone(&cache)));
        let dispatcher = Arc::new(EventDispatcher::new(Arc::clone(&cache)));
        Self {
            transport,
            cache,
            keys,
            sequencer: Arc::new(CallSequencer::from_config(config)),
            dispatcher,
            inflector: Inflector::from_config(&config.naming),
            locks: config.echo.clone(),
            activity: Arc::new(ActivityMonitor::default()),
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn cache(&self) -> &Arc<dyn RecordCache> {
        &self.cache
    }

    /// Queue every registered proxy submits its calls to.
    pub fn sequencer(&self) -> &Arc<CallSequencer> {
        &self.sequencer
    }

    /// Handler behind the listeners attached at registration.
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn inflector(&self) -> &Inflector {
        &self.inflector
    }

    /// When a response, an error or a push event was last seen, across
    /// every service.
    pub fn last_activity(&self) -> LastActivity {
        self.activity.snapshot()
    }

    /// Aggregated call statistics of every service.
    pub fn report(&self) -> StatsReport {
        self.sequencer.report()
    }

    /// Registers `service` using the transport's handle for it.
    pub fn register(
        &self,
        service: impl Into<ServiceName>,
        hint: impl Into<TypeHint>,
    ) -> Result<Arc<ServiceRegistration>> {
        let service = service.into();
        let remote = self.transport.service(&service);
        self.register_with(service, hint.into(), remote)
    }

    /// Registers `service` over an explicit remote handle.
    ///
    /// Idempotent: an existing registration is returned, after checking
    /// type consistency and upgrading an unmapped registration when a type
    /// is supplied. `remote` is ignored for existing registrations.
    pub fn register_with(
        &self,
        service: ServiceName,
        hint: TypeHint,
        remote: Arc<dyn RemoteService>,
    ) -> Result<Arc<ServiceRegistration>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let explicit = matches!(hint, TypeHint::Named(_));
        let requested = self.resolve_hint(&state, &service, hint);

        if let Some(existing) = state.by_service.get(&service).cloned() {
            let current = existing.type_name();
            match (current, requested) {
                (Some(current), Some(requested)) if explicit && current != requested => {
                    return Err(SyncError::TypeNameMismatch {
                        service,
                        existing: current,
                        requested,
                    });
                }
                (None, Some(requested)) => {
                    Self::check_type_free(&state, &requested, &service)?;
                    *existing
                        .type_name
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner) = Some(requested.clone());
                    debug!(service = %service, type_name = %requested, "bound type to unmapped service");
                    state.by_type.insert(requested, service);
                }
                _ => {}
            }
            return Ok(existing);
        }

        if let Some(requested) = &requested {
            Self::check_type_free(&state, requested, &service)?;
        }

        let registration = Arc::new(ServiceRegistration {
            service: service.clone(),
            type_name: Mutex::new(requested.clone()),
            proxy: ServiceProxy::new(service.clone(), remote, Arc::clone(&self.sequencer)),
            keys: Arc::clone(&self.keys),
            locks: self.locks.clone(),
            guard: Mutex::new(EchoGuard::new()),
            listeners: Mutex::new(Vec::new()),
            activity: Arc::clone(&self.activity),
            frozen: AtomicBool::new(false),
        });
        for kind in EventKind::ALL {
            registration.on(kind, self.dispatch_handler(&registration, kind));
        }
        debug!(service = %service, type_name = ?requested, "service registered");

        if let Some(type_name) = requested {
            state.by_type.insert(type_name, service.clone());
        }
        state.by_service.insert(service, Arc::clone(&registration));
        Ok(registration)
    }

    fn dispatch_handler(&self, registration: &Arc<ServiceRegistration>, kind: EventKind) -> EventHandler {
        let registration: Weak<ServiceRegistration> = Arc::downgrade(registration);
        let dispatcher = Arc::clone(&self.dispatcher);
        Arc::new(move |message: Value| -> Result<()> {
            let Some(registration) = registration.upgrade() else {
                return Ok(());
            };
            registration.activity.touch(ActivityKind::Event);
            dispatcher
                .handle_service_event(&registration, kind, message)
                .map(|_| ())
        })
    }

    fn resolve_hint(&self, state: &RegistryState, service: &ServiceName, hint: TypeHint) -> Option<TypeName> {
        match hint {
            TypeHint::Named(type_name) => Some(type_name),
            TypeHint::Unmapped => None,
            TypeHint::Guess => {
                let guessed = TypeName::new(self.inflector.singularize(service.as_str()));
                if !self.cache.syncs_type(&guessed) {
                    return None;
                }
                match state.by_type.get(&guessed) {
                    Some(owner) if owner != service => {
                        warn!(service = %service, type_name = %guessed, owner = %owner,
                            "guessed type already bound to another service, leaving unmapped");
                        None
                    }
                    _ => Some(guessed),
                }
            }
        }
    }

    fn check_type_free(state: &RegistryState, type_name: &TypeName, service: &ServiceName) -> Result<()> {
        match state.by_type.get(type_name) {
            Some(owner) if owner != service => Err(SyncError::ServiceNameMismatch {
                type_name: type_name.clone(),
                existing: owner.clone(),
                requested: service.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Registration of `service`, registering it with a guessed type if unseen.
    pub fn get_or_create(&self, service: impl Into<ServiceName>) -> Result<Arc<ServiceRegistration>> {
        let service = service.into();
        if let Some(existing) = self.for_service_name(&service) {
            return Ok(existing);
        }
        self.register(service, TypeHint::Guess)
    }

    /// Existing registration of `service`, without registering it.
    pub fn for_service_name(&self, service: &ServiceName) -> Option<Arc<ServiceRegistration>> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_service
            .get(service)
            .cloned()
    }

    /// Existing registration bound to `type_name`, without registering it.
    pub fn for_type_name(&self, type_name: &TypeName) -> Option<Arc<ServiceRegistration>> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .by_type
            .get(type_name)
            .and_then(|service| state.by_service.get(service))
            .cloned()
    }

    /// Registration serving `type_name`, registering the pluralized service
    /// name if the type is unseen.
    pub fn service_for_type(&self, type_name: &TypeName) -> Result<Arc<ServiceRegistration>> {
        if let Some(existing) = self.for_type_name(type_name) {
            return Ok(existing);
        }
        let service = ServiceName::new(self.inflector.pluralize(type_name.as_str()));
        self.register(service, TypeHint::Named(type_name.clone()))
    }

    /// Like [`ServiceRegistry::service_for_type`], returning only the name.
    pub fn service_name_for_type(&self, type_name: &TypeName) -> Result<ServiceName> {
        Ok(self.service_for_type(type_name)?.service_name().clone())
    }

    /// Record type bound to `service`, registering it if unseen.
    pub fn type_for_service(&self, service: impl Into<ServiceName>) -> Result<Option<TypeName>> {
        Ok(self.get_or_create(service)?.type_name())
    }

    /// Removes `service`, detaching its listeners. Returns false if unknown.
    pub fn unregister(&self, service: &ServiceName) -> bool {
        let removed = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let removed = state.by_service.remove(service);
            state.by_type.retain(|_, owner| owner != service);
            removed
        };
        match removed {
            Some(registration) => {
                registration.detach();
                true
            }
            None => false,
        }
    }

    /// Tears down every registration.
    pub fn unregister_all(&self) {
        let drained: Vec<_> = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.by_type.clear();
            state.by_service.drain().map(|(_, r)| r).collect()
        };
        for registration in drained {
            registration.detach();
        }
    }

    /// Snapshot of the live registrations, in no particular order.
    pub fn registrations(&self) -> Vec<Arc<ServiceRegistration>> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_service
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_service
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
