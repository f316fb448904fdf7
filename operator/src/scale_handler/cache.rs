use std::{
    collections::HashMap,
    sync::atomic::{AtomicU32, Ordering},
    sync::Arc,
};

use chrono::NaiveDateTime;

use crate::scaler::{MetricSpec, Scaler};

/// One live scaler together with its identity and bookkeeping.
#[derive(Debug)]
pub struct ScalerEntry {
    pub trigger_type: String,
    pub fingerprint: String,
    pub specs: Vec<MetricSpec>,
    pub scaler: Box<dyn Scaler>,
    /// Consecutive poll failures. Written by the owning poll loop,
    /// read by the metric server when deciding whether the fallback
    /// replica count is in force.
    pub consecutive_failures: AtomicU32,
}

impl ScalerEntry {
    /// Metric name polled on ticks. Constructors always emit at least
    /// one spec; the fallback only guards an impossible state.
    pub fn primary_metric(&self) -> &str {
        self.specs.first().map(|s| s.name.as_str()).unwrap_or("")
    }

    pub fn failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn record_failure(&self) -> u32 {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }
}

/// The ordered scalers of one scaling target. Rebuilt as a whole when
/// triggers change; never mutated in place, never shared across targets.
#[derive(Debug)]
pub struct ScalerCache {
    pub entries: Vec<Arc<ScalerEntry>>,
}

impl ScalerCache {
    pub fn fingerprints(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| entry.fingerprint.to_owned())
            .collect()
    }

    /// (metric name, scaler index) pairs for the metric name registry.
    pub fn routes(&self) -> Vec<(String, usize)> {
        self.entries
            .iter()
            .enumerate()
            .flat_map(|(index, entry)| {
                entry
                    .specs
                    .iter()
                    .map(move |spec| (spec.name.to_owned(), index))
            })
            .collect()
    }

    pub fn metric_specs(&self) -> Vec<MetricSpec> {
        self.entries
            .iter()
            .flat_map(|entry| entry.specs.iter().cloned())
            .collect()
    }

    /// Close every scaler, swallowing and logging errors. Scalers guard
    /// against double close themselves; this is the only call site.
    pub async fn close_all(&self) {
        for entry in &self.entries {
            if let Err(e) = entry.scaler.close().await {
                tracing::warn!("Error closing {} scaler: {:#}", entry.trigger_type, e);
            }
        }
    }
}

/// Poll bookkeeping for one target. Owned and mutated exclusively by the
/// target's poll loop; everything others need lives in the cache.
pub struct ActivityState {
    pub last_poll: Option<NaiveDateTime>,
    pub active: bool,
    /// Last time any trigger reported activity. Initialized to loop start
    /// so a fresh target earns its cooldown before scaling to zero.
    pub last_active_time: NaiveDateTime,
    /// Last successful sample per metric name.
    pub last_samples: HashMap<String, f64>,
    pub fallback_active: bool,
}

impl ActivityState {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            last_poll: None,
            active: false,
            last_active_time: start,
            last_samples: HashMap::new(),
            fallback_active: false,
        }
    }
}
