//! Call statistics: an append-only log and its aggregate report, plus the
//! last-activity timestamps of the connection.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use syncwire_types::{Method, ServiceName};

/// Outcome and timing of one remote call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallStatistic {
    pub service: ServiceName,
    pub method: Method,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub succeeded: bool,
    pub is_timeout: bool,
}

impl CallStatistic {
    /// Wall-clock duration in milliseconds. Clock steps backwards clamp to 0.
    pub fn duration_ms(&self) -> u64 {
        let elapsed = (self.finished_at - self.started_at).num_milliseconds();
        u64::try_from(elapsed).unwrap_or(0)
    }
}

/// Aggregated figures over a set of calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Aggregate {
    pub count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub timeouts: u64,
    pub time_total_ms: u64,
    pub time_average_ms: f64,
}

impl Aggregate {
    fn add(&mut self, stat: &CallStatistic) {
        self.count += 1;
        if stat.succeeded {
            self.success_count += 1;
        } else {
            self.error_count += 1;
        }
        if stat.is_timeout {
            self.timeouts += 1;
        }
        self.time_total_ms += stat.duration_ms();
        self.time_average_ms = self.time_total_ms as f64 / self.count as f64;
    }
}

/// Figures for one service, overall and per method.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServiceStats {
    pub total: Aggregate,
    pub methods: BTreeMap<Method, Aggregate>,
}

/// Report over every recorded call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsReport {
    pub overall: Aggregate,
    pub services: BTreeMap<ServiceName, ServiceStats>,
}

impl StatsReport {
    pub fn from_calls<'a>(calls: impl IntoIterator<Item = &'a CallStatistic>) -> Self {
        let mut report = StatsReport::default();
        for stat in calls {
            report.overall.add(stat);
            let service = report.services.entry(stat.service.clone()).or_default();
            service.total.add(stat);
            service.methods.entry(stat.method).or_default().add(stat);
        }
        report
    }
}

/// Append-only statistics log. Disabled logs drop every entry.
#[derive(Debug, Default)]
pub struct StatsLog {
    enabled: bool,
    calls: Mutex<Vec<CallStatistic>>,
}

impl StatsLog {
    /// Creates an empty log; a disabled one never stores anything.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Appends `stat` when the log is enabled.
    pub fn record(&self, stat: CallStatistic) {
        if self.enabled {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(stat);
        }
    }

    pub fn snapshot(&self) -> Vec<CallStatistic> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn report(&self) -> StatsReport {
        StatsReport::from_calls(self.calls.lock().unwrap_or_else(PoisonError::into_inner).iter())
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

// ============================================================================
// Last activity
// ============================================================================

/// What a liveness timestamp was taken for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    /// A remote call returned a payload.
    Response,
    /// A remote call failed.
    Error,
    /// A push event reached a registered service.
    Event,
}

/// Latest time each kind of activity was seen. `beat` is the latest of all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LastActivity {
    pub response: Option<DateTime<Utc>>,
    pub error: Option<DateTime<Utc>>,
    pub event: Option<DateTime<Utc>>,
    pub beat: Option<DateTime<Utc>>,
}

impl LastActivity {
    pub fn get(&self, kind: ActivityKind) -> Option<DateTime<Utc>> {
        match kind {
            ActivityKind::Response => self.response,
            ActivityKind::Error => self.error,
            ActivityKind::Event => self.event,
        }
    }

    fn touch_at(&mut self, kind: ActivityKind, at: DateTime<Utc>) {
        let slot = match kind {
            ActivityKind::Response => &mut self.response,
            ActivityKind::Error => &mut self.error,
            ActivityKind::Event => &mut self.event,
        };
        *slot = Some(at);
        self.beat = Some(at);
    }
}

/// Shared recorder of [`LastActivity`], touched by every registration.
#[derive(Debug, Default)]
pub struct ActivityMonitor {
    last: Mutex<LastActivity>,
}

impl ActivityMonitor {
    pub fn touch(&self, kind: ActivityKind) {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .touch_at(kind, Utc::now());
    }

    pub fn snapshot(&self) -> LastActivity {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
