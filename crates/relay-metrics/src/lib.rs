//! Metric primitives for the relay backend.
//!
//! [`Counter`] and [`Gauge`] are lock-free and serialize as plain numbers, so
//! the bundles below can be dumped straight to JSON by the debug endpoints.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Monotonic event count.
///
/// Relaxed ordering throughout: readers only ever want an approximate total.
pub struct Counter(AtomicU64);

impl Counter {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Counter {
    fn clone(&self) -> Self {
        Self(AtomicU64::new(self.value()))
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Counter({})", self.value())
    }
}

impl Serialize for Counter {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.value())
    }
}

impl<'de> Deserialize<'de> for Counter {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u64::deserialize(deserializer).map(|v| Self(AtomicU64::new(v)))
    }
}

/// Last-written floating point value (durations, sizes, percentages).
///
/// Stored as the bit pattern of an `f64` inside an [`AtomicU64`].
pub struct Gauge(AtomicU64);

impl Gauge {
    pub const fn new() -> Self {
        // 0u64 is the bit pattern of 0.0f64
        Self(AtomicU64::new(0))
    }

    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn value(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

impl Default for Gauge {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Gauge {
    fn clone(&self) -> Self {
        let g = Self::new();
        g.set(self.value());
        g
    }
}

impl fmt::Debug for Gauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gauge({})", self.value())
    }
}

impl Serialize for Gauge {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.value())
    }
}

impl<'de> Deserialize<'de> for Gauge {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let g = Self::new();
        g.set(f64::deserialize(deserializer)?);
        Ok(g)
    }
}

// ── Bundles ──────────────────────────────────────────────────────────

/// Counters maintained by the relay manager while folding in updates.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RelayManagerMetrics {
    pub updates_processed: Counter,
    pub samples_processed: Counter,
    /// Samples stored as unreachable (sentinel RTT or over a threshold).
    pub samples_unroutable: Counter,
    /// Pair histories reset because the pair was new or had gone stale.
    pub histories_poisoned: Counter,
}

/// Counters for the ingestion front door and the analytics fan-out.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct IngestMetrics {
    pub updates_accepted: Counter,
    pub unknown_relay: Counter,
    pub stale_update: Counter,
    pub malformed_samples: Counter,
    /// Samples dropped because their destination is not in the roster.
    pub unknown_destinations: Counter,
    pub analytics_sent: Counter,
    pub analytics_dropped: Counter,
    pub analytics_failed: Counter,
}

/// Per-tick figures of the computation driver.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct DriverMetrics {
    pub ticks_started: Counter,
    pub ticks_published: Counter,
    pub ticks_failed: Counter,
    pub publish_failures: Counter,
    pub load_failures: Counter,
    /// Ticks where optimizing took longer than the tick interval.
    pub over_budget: Counter,
    pub cost_matrix_ms: Gauge,
    pub optimize_ms: Gauge,
    pub tick_ms: Gauge,
    pub cost_matrix_bytes: Gauge,
    pub route_matrix_bytes: Gauge,
    pub num_relays: Gauge,
}
