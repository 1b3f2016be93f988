//! Loopback transport backed by in-process record tables.
//!
//! [`MemoryTransport`] plays the server side of the RPC boundary: each
//! [`MemoryService`] stores records by primary key, answers the six remote
//! methods and fans pushed events out to subscribed listeners. Writes never
//! emit events on their own; callers push echoes explicitly with
//! [`MemoryService::emit`] so the relative order of response and echo is
//! under their control.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use syncwire_config::SocketConfig;
use syncwire_types::{EventKind, Method, Params, RecordId, ServiceName};
use tracing::debug;

use crate::error::Result;
use crate::remote_error::TransportError;
use crate::transport::{CallRequest, EventHandler, ListenerId, RemoteService, Transport};

/// Phase of a traced call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Started,
    Finished,
}

/// One entry of the shared call trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub service: ServiceName,
    pub method: Method,
    pub id: Option<RecordId>,
    pub phase: CallPhase,
}

type Trace = Arc<Mutex<Vec<TraceEntry>>>;

/// In-process transport handing out [`MemoryService`]s by name.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    socket: SocketConfig,
    services: Mutex<HashMap<ServiceName, Arc<MemoryService>>>,
    primary_keys: Mutex<HashMap<ServiceName, String>>,
    trace: Trace,
}

impl MemoryTransport {
    /// Transport with the default socket settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport configured from the `[socket]` section.
    ///
    /// `timeout_ms` bounds every call: a call held longer fails with a
    /// `Timeout` error. `options` are kept as given.
    pub fn from_config(socket: &SocketConfig) -> Self {
        Self {
            socket: socket.clone(),
            ..Self::default()
        }
    }

    /// Server address this transport was configured with.
    pub fn url(&self) -> &str {
        &self.socket.url
    }

    /// Per-call timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.socket.timeout_ms)
    }

    /// Socket options, exactly as configured.
    pub fn options(&self) -> &Map<String, Value> {
        &self.socket.options
    }

    /// Uses `field` as the primary key of `service` instead of `id`.
    ///
    /// Must be called before the service is first handed out.
    #[must_use]
    pub fn with_primary_key(self, service: impl Into<ServiceName>, field: impl Into<String>) -> Self {
        self.primary_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(service.into(), field.into());
        self
    }

    /// Concrete handle of `name`, created on first access.
    pub fn handle(&self, name: impl Into<ServiceName>) -> Arc<MemoryService> {
        let name = name.into();
        let mut services = self.services.lock().unwrap_or_else(PoisonError::into_inner);
        services
            .entry(name.clone())
            .or_insert_with(|| {
                let primary_key = self
                    .primary_keys
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&name)
                    .cloned()
                    .unwrap_or_else(|| "id".to_string());
                Arc::new(MemoryService::new(
                    name,
                    primary_key,
                    self.timeout(),
                    Arc::clone(&self.trace),
                ))
            })
            .clone()
    }

    /// Snapshot of every call start and finish, across all services.
    pub fn trace(&self) -> Vec<TraceEntry> {
        self.trace.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Transport for MemoryTransport {
    fn service(&self, name: &ServiceName) -> Arc<dyn RemoteService> {
        self.handle(name.clone())
    }
}

#[derive(Debug, Default)]
struct Table {
    records: Vec<Value>,
    next_id: u64,
}

/// Server side of one service.
pub struct MemoryService {
    name: ServiceName,
    primary_key: String,
    timeout: Duration,
    page_size: Mutex<Option<usize>>,
    table: Mutex<Table>,
    scripted: Mutex<VecDeque<Result<Value, TransportError>>>,
    delays: Mutex<VecDeque<Duration>>,
    listeners: Mutex<HashMap<EventKind, Vec<(ListenerId, EventHandler)>>>,
    calls: AtomicU64,
    trace: Trace,
}

impl MemoryService {
    fn new(name: ServiceName, primary_key: String, timeout: Duration, trace: Trace) -> Self {
        Self {
            name,
            primary_key,
            timeout,
            page_size: Mutex::new(None),
            table: Mutex::new(Table {
                records: Vec::new(),
                next_id: 1,
            }),
            scripted: Mutex::new(VecDeque::new()),
            delays: Mutex::new(VecDeque::new()),
            listeners: Mutex::new(HashMap::new()),
            calls: AtomicU64::new(0),
            trace,
        }
    }

    pub fn name(&self) -> &ServiceName {
        &self.name
    }

    /// Field used as record id by the built-in table.
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Paginates every `find` response with a default page size.
    ///
    /// Without a page size, `find` answers with a bare array unless the
    /// query carries `$limit`.
    pub fn paginate(&self, page_size: usize) {
        *self.page_size.lock().unwrap_or_else(PoisonError::into_inner) = Some(page_size);
    }

    /// Stores a record server-side without going through a call.
    pub fn insert(&self, record: Value) {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .push(record);
    }

    /// Snapshot of the stored records.
    pub fn records(&self) -> Vec<Value> {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .clone()
    }

    /// Fails the next call with `error`.
    pub fn fail_next(&self, error: TransportError) {
        self.script(Err(error));
    }

    /// Answers the next call with `payload`, bypassing the table.
    pub fn reply_next(&self, payload: Value) {
        self.script(Ok(payload));
    }

    fn script(&self, outcome: Result<Value, TransportError>) {
        self.scripted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(outcome);
    }

    /// Holds the next call for `delay` before answering.
    pub fn delay_next(&self, delay: Duration) {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(delay);
    }

    /// Number of calls received so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Listeners currently attached for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Pushes an event to every listener of `kind`, in subscription order.
    ///
    /// Every listener runs even if an earlier one fails; the first failure is
    /// returned. On success, returns the number of listeners reached.
    pub fn emit(&self, kind: EventKind, payload: Value) -> Result<usize> {
        let handlers: Vec<EventHandler> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        debug!(service = %self.name, kind = %kind, listeners = handlers.len(), "emitting event");

        let mut first_error = None;
        for handler in &handlers {
            if let Err(e) = handler(payload.clone()) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(handlers.len()),
        }
    }

    fn record_phase(&self, request: &CallRequest, phase: CallPhase) {
        self.trace
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(TraceEntry {
                service: self.name.clone(),
                method: request.method(),
                id: request.id().cloned(),
                phase,
            });
    }

    fn apply(&self, request: CallRequest) -> Result<Value, TransportError> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        match request {
            CallRequest::Find { params } => Ok(self.find(&table.records, &params)),
            CallRequest::Get { id, .. } => {
                let index = self.position(&table.records, &id)?;
                Ok(table.records[index].clone())
            }
            CallRequest::Create { data, .. } => {
                let Value::Object(mut record) = data else {
                    return Err(TransportError::named("BadRequest", "record data must be an object")
                        .with_code(400));
                };
                match record.get(&self.primary_key).and_then(RecordId::from_value) {
                    Some(id) => {
                        if self.position(&table.records, &id).is_ok() {
                            return Err(TransportError::named(
                                "Conflict",
                                format!("record '{id}' already exists"),
                            )
                            .with_code(409));
                        }
                    }
                    None => {
                        let id = table.next_id;
                        table.next_id += 1;
                        record.insert(self.primary_key.clone(), Value::String(id.to_string()));
                    }
                }
                let record = Value::Object(record);
                table.records.push(record.clone());
                Ok(record)
            }
            CallRequest::Update { id, data, .. } => {
                let index = self.position(&table.records, &id)?;
                let Value::Object(mut record) = data else {
                    return Err(TransportError::named("BadRequest", "record data must be an object")
                        .with_code(400));
                };
                let key = table.records[index][&self.primary_key].clone();
                record.insert(self.primary_key.clone(), key);
                table.records[index] = Value::Object(record);
                Ok(table.records[index].clone())
            }
            CallRequest::Patch { id, data, .. } => {
                let index = self.position(&table.records, &id)?;
                let Value::Object(changes) = data else {
                    return Err(TransportError::named("BadRequest", "patch data must be an object")
                        .with_code(400));
                };
                if let Value::Object(record) = &mut table.records[index] {
                    for (field, value) in changes {
                        if field != self.primary_key {
                            record.insert(field, value);
                        }
                    }
                }
                Ok(table.records[index].clone())
            }
            CallRequest::Remove { id, .. } => {
                let index = self.position(&table.records, &id)?;
                Ok(table.records.remove(index))
            }
        }
    }

    fn position(&self, records: &[Value], id: &RecordId) -> Result<usize, TransportError> {
        records
            .iter()
            .position(|r| RecordId::from_payload(r, &self.primary_key).as_ref() == Some(id))
            .ok_or_else(|| {
                TransportError::named("NotFound", format!("No record found for id '{id}'"))
                    .with_code(404)
            })
    }

    fn find(&self, records: &[Value], params: &Params) -> Value {
        let matching: Vec<&Value> = records.iter().filter(|r| matches_query(r, params)).collect();
        let total = matching.len();
        let skip = params.get("$skip").and_then(as_count).unwrap_or(0);
        let limit = params
            .get("$limit")
            .and_then(as_count)
            .or(*self.page_size.lock().unwrap_or_else(PoisonError::into_inner));

        let page = matching.into_iter().skip(skip);
        match limit {
            Some(limit) => json!({
                "total": total,
                "limit": limit,
                "skip": skip,
                "data": page.take(limit).cloned().collect::<Vec<_>>(),
            }),
            None => Value::Array(page.cloned().collect()),
        }
    }
}

impl std::fmt::Debug for MemoryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryService")
            .field("name", &self.name)
            .field("primary_key", &self.primary_key)
            .field("calls", &self.calls)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RemoteService for MemoryService {
    async fn call(&self, request: CallRequest) -> Result<Value, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.record_phase(&request, CallPhase::Started);

        let delay = self
            .delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(delay) = delay {
            if delay > self.timeout {
                tokio::time::sleep(self.timeout).await;
                self.record_phase(&request, CallPhase::Finished);
                return Err(TransportError::named(
                    "Timeout",
                    format!(
                        "Timeout of {}ms exceeded calling {} on {}",
                        self.timeout.as_millis(),
                        request.method(),
                        self.name
                    ),
                )
                .with_code(408));
            }
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let traced = request.clone();
        let outcome = match scripted {
            Some(outcome) => outcome,
            None => self.apply(request),
        };
        self.record_phase(&traced, CallPhase::Finished);
        outcome
    }

    fn on(&self, kind: EventKind, handler: EventHandler) -> ListenerId {
        let id = ListenerId::next();
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push((id, handler));
        id
    }

    fn off(&self, kind: EventKind, listener: ListenerId) {
        if let Some(list) = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&kind)
        {
            list.retain(|(id, _)| *id != listener);
        }
    }
}

/// Equality filters plus `{"$in": [...]}` on top-level fields.
/// Keys starting with `$` are query controls, not filters.
fn matches_query(record: &Value, params: &Params) -> bool {
    params
        .iter()
        .filter(|(key, _)| !key.starts_with('$'))
        .all(|(key, expected)| {
            let actual = record.get(key).unwrap_or(&Value::Null);
            match expected {
                Value::Object(ops) => match ops.get("$in") {
                    Some(Value::Array(options)) => options.iter().any(|o| loosely_equal(actual, o)),
                    _ => actual == expected,
                },
                _ => loosely_equal(actual, expected),
            }
        })
}

/// Query strings carry every scalar as text, so `"1"` matches `1`.
fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (scalar_text(actual), scalar_text(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn as_count(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
