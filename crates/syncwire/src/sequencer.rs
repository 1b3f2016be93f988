//! Optional FIFO serialization of outbound calls, with call statistics.
//!
//! When enabled, each submitted call waits for the previous one to settle
//! before it starts. The slot in the chain is taken when the call is
//! submitted, not when its future is first polled, so execution order is
//! submission order. A failed or dropped call releases its successor just
//! like a successful one.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{LazyLock, Mutex, PoisonError};

use chrono::Utc;
use regex::Regex;
use syncwire_config::SyncConfig;
use syncwire_types::{Method, ServiceName};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::remote_error::TransportError;
use crate::stats::{CallStatistic, StatsLog, StatsReport};

static TIMEOUT_MESSAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Timeout of \d+ms ").expect("timeout pattern is valid"));

/// Returns true if a failure message reads like a transport timeout.
pub fn is_timeout_message(message: &str) -> bool {
    TIMEOUT_MESSAGE.is_match(message)
}

/// Decrements the pending counter when a submitted call settles or is dropped.
struct PendingGuard<'a>(&'a AtomicUsize);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Per-registry call sequencer.
#[derive(Debug)]
pub struct CallSequencer {
    enabled: bool,
    tail: Mutex<Option<oneshot::Receiver<()>>>,
    pending: AtomicUsize,
    stats: StatsLog,
}

impl CallSequencer {
    /// `enabled` turns on FIFO ordering; `collect_statistics` keeps a
    /// [`CallStatistic`] per call.
    pub fn new(enabled: bool, collect_statistics: bool) -> Self {
        Self {
            enabled,
            tail: Mutex::new(None),
            pending: AtomicUsize::new(0),
            stats: StatsLog::new(collect_statistics),
        }
    }

    /// Reads the queue and statistics switches.
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.queue.queue_method_calls,
            config.statistics.collect_statistics,
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Submitted calls that have not settled yet.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    pub fn stats(&self) -> &StatsLog {
        &self.stats
    }

    /// Aggregates every recorded call. Empty unless statistics are collected.
    pub fn report(&self) -> StatsReport {
        self.stats.report()
    }

    /// Submits `call` and returns a future settling with its outcome.
    ///
    /// With sequencing disabled the call starts as soon as the returned
    /// future is polled. Either way one [`CallStatistic`] is recorded per
    /// execution.
    pub fn enqueue<'a, T, F>(
        &'a self,
        service: &ServiceName,
        method: Method,
        call: F,
    ) -> impl Future<Output = Result<T, TransportError>> + Send + use<'a, T, F>
    where
        F: Future<Output = Result<T, TransportError>> + Send + 'a,
        T: Send + 'a,
    {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let pending = PendingGuard(&self.pending);
        let slot = self.enabled.then(|| {
            let (done, next) = oneshot::channel();
            let previous = self
                .tail
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .replace(next);
            (previous, done)
        });
        let service = service.clone();

        async move {
            let _pending = pending;
            let (previous, done) = match slot {
                Some((previous, done)) => (previous, Some(done)),
                None => (None, None),
            };
            if let Some(previous) = previous {
                // Err means the predecessor was dropped unsettled; proceed.
                let _ = previous.await;
            }

            trace!(service = %service, method = %method, "call started");
            let started_at = Utc::now();
            let outcome = call.await;
            let finished_at = Utc::now();

            let stat = CallStatistic {
                service,
                method,
                started_at,
                finished_at,
                succeeded: outcome.is_ok(),
                is_timeout: outcome
                    .as_ref()
                    .err()
                    .is_some_and(|e| is_timeout_message(&e.message)),
            };
            debug!(
                service = %stat.service,
                method = %stat.method,
                elapsed_ms = stat.duration_ms(),
                succeeded = stat.succeeded,
                is_timeout = stat.is_timeout,
                "call settled"
            );
            self.stats.record(stat);

            if let Some(done) = done {
                let _ = done.send(());
            }
            outcome
        }
    }
}
