//! Ingestion front door and the analytics fan-out.
//!
//! [`RelayUpdateHandler::handle`] validates a decoded relay update against the
//! current roster and folds it into the [`RelayManager`] synchronously. What
//! flows downstream from there (analytics) goes through a bounded
//! [`AnalyticsQueue`]: a slow sink makes the queue drop events, never blocks
//! the caller.

use std::net::SocketAddr;
use std::sync::Arc;

use relay_metrics::IngestMetrics;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::{IngestError, StoreError};
use crate::relay_manager::{RelayManager, RelayReport, RelaySample};
use crate::roster::Roster;
use crate::types::{RelayId, UNREACHABLE};

/// A relay update as decoded by the gateway.
///
/// The sample arrays are parallel; `num_samples` bounds the valid prefix of
/// each of them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayUpdate {
    pub current_time: u64,
    pub relay_address: Option<SocketAddr>,
    pub session_count: u32,
    pub version: String,
    pub flags: u64,
    pub num_samples: usize,
    pub sample_relay_ids: Vec<RelayId>,
    pub sample_rtt: Vec<u8>,
    pub sample_jitter: Vec<u8>,
    /// Fraction of 65535.
    pub sample_packet_loss: Vec<u16>,
    pub counters: Vec<u64>,
}

/// Packet loss as carried on the wire to percent.
pub fn packet_loss_percent(raw: u16) -> f32 {
    raw as f32 / u16::MAX as f32 * 100.0
}

impl RelayUpdate {
    fn samples(&self) -> Result<Vec<RelaySample>, IngestError> {
        let available = self
            .sample_relay_ids
            .len()
            .min(self.sample_rtt.len())
            .min(self.sample_jitter.len())
            .min(self.sample_packet_loss.len());
        if self.num_samples > available {
            return Err(IngestError::MalformedSamples {
                num_samples: self.num_samples,
                available,
            });
        }
        Ok((0..self.num_samples)
            .map(|i| {
                RelaySample::new(
                    self.sample_relay_ids[i],
                    self.sample_rtt[i],
                    self.sample_jitter[i],
                    packet_loss_percent(self.sample_packet_loss[i]),
                )
            })
            .collect())
    }
}

// ── Analytics ─────────────────────────────────────────────────────────

/// Summary of one accepted update, for the analytics pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub timestamp: u64,
    pub relay_id: RelayId,
    pub relay_name: String,
    pub session_count: u32,
    pub version: String,
    pub num_samples: usize,
    /// Samples whose RTT was not the sentinel.
    pub num_reachable: usize,
}

/// Where analytics events end up (a warehouse inserter in production).
#[async_trait::async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn send(&self, event: AnalyticsEvent) -> Result<(), StoreError>;
}

/// Sink that writes each event as a JSON debug log line.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait::async_trait]
impl AnalyticsSink for LogSink {
    async fn send(&self, event: AnalyticsEvent) -> Result<(), StoreError> {
        let json =
            serde_json::to_string(&event).map_err(|e| StoreError::Rejected(e.to_string()))?;
        tracing::debug!("analytics: {json}");
        Ok(())
    }
}

/// Bounded queue drained by a fixed pool of worker tasks.
pub struct AnalyticsQueue {
    tx: mpsc::Sender<AnalyticsEvent>,
    workers: Vec<JoinHandle<()>>,
    metrics: Arc<IngestMetrics>,
}

impl AnalyticsQueue {
    /// Start `workers` tasks on the current tokio runtime.
    pub fn spawn(
        capacity: usize,
        workers: usize,
        sink: Arc<dyn AnalyticsSink>,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let workers = (0..workers.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let sink = sink.clone();
                let metrics = metrics.clone();
                tokio::spawn(async move {
                    loop {
                        // Lock only for the receive so the other workers can
                        // pick up the next event while this one is sending.
                        let next = rx.lock().await.recv().await;
                        let Some(event) = next else { break };
                        match sink.send(event).await {
                            Ok(()) => metrics.analytics_sent.inc(),
                            Err(e) => {
                                metrics.analytics_failed.inc();
                                tracing::warn!("analytics: worker {worker} failed to send event: {e}");
                            }
                        }
                    }
                })
            })
            .collect();
        Self { tx, workers, metrics }
    }

    /// Enqueue without waiting. Returns false when the event was dropped.
    pub fn push(&self, event: AnalyticsEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.metrics.analytics_dropped.inc();
                tracing::warn!(
                    "analytics: queue full, dropping event for relay {}",
                    event.relay_name
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.metrics.analytics_dropped.inc();
                false
            }
        }
    }

    /// Stop accepting events and wait for the workers to drain the queue.
    pub async fn close(self) {
        drop(self.tx);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

// ── Handler ───────────────────────────────────────────────────────────

pub struct RelayUpdateHandler {
    roster: watch::Receiver<Arc<Roster>>,
    manager: Arc<RelayManager>,
    analytics: Option<Arc<AnalyticsQueue>>,
    metrics: Arc<IngestMetrics>,
    staleness_secs: u64,
}

impl RelayUpdateHandler {
    pub fn new(
        roster: watch::Receiver<Arc<Roster>>,
        manager: Arc<RelayManager>,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        let staleness_secs = manager.config().staleness_secs;
        Self {
            roster,
            manager,
            analytics: None,
            metrics,
            staleness_secs,
        }
    }

    pub fn analytics(mut self, queue: Arc<AnalyticsQueue>) -> Self {
        self.analytics = Some(queue);
        self
    }

    pub fn metrics(&self) -> &IngestMetrics {
        &self.metrics
    }

    /// Validate and apply one update received at `now`.
    ///
    /// Rejected updates are counted and logged; the caller has nothing to
    /// retry, the relay's next update supersedes this one.
    pub fn handle(&self, update: &RelayUpdate, now: u64) -> Result<(), IngestError> {
        let result = self.apply(update, now);
        if let Err(e) = &result {
            match e {
                IngestError::UnknownRelay { .. } => self.metrics.unknown_relay.inc(),
                IngestError::StaleUpdate { .. } => self.metrics.stale_update.inc(),
                IngestError::MalformedSamples { .. } => self.metrics.malformed_samples.inc(),
            }
            tracing::debug!("ingest: discarding relay update: {e}");
        }
        result
    }

    fn apply(&self, update: &RelayUpdate, now: u64) -> Result<(), IngestError> {
        let age_secs = now.saturating_sub(update.current_time);
        if age_secs > self.staleness_secs {
            return Err(IngestError::StaleUpdate { age_secs });
        }

        let roster = self.roster.borrow().clone();
        let relay = update
            .relay_address
            .as_ref()
            .and_then(|addr| roster.by_address(addr))
            .ok_or_else(|| IngestError::UnknownRelay {
                address: update
                    .relay_address
                    .map_or_else(|| "<none>".to_string(), |a| a.to_string()),
            })?;

        let mut samples = update.samples()?;
        let reported = samples.len();
        samples.retain(|s| roster.index_of(s.relay_id).is_some());
        let unknown = reported - samples.len();
        if unknown > 0 {
            self.metrics.unknown_destinations.add(unknown as u64);
            tracing::debug!(
                "ingest: dropping {unknown} samples from {} for relays not in the roster",
                relay.name
            );
        }

        self.manager.process_relay_update(
            now,
            RelayReport {
                relay_id: relay.id,
                name: &relay.name,
                address: relay.address,
                session_count: update.session_count,
                version: &update.version,
                flags: update.flags,
                samples: &samples,
                counters: &update.counters,
            },
        );
        self.metrics.updates_accepted.inc();

        if let Some(queue) = &self.analytics {
            queue.push(AnalyticsEvent {
                timestamp: now,
                relay_id: relay.id,
                relay_name: relay.name.clone(),
                session_count: update.session_count,
                version: update.version.clone(),
                num_samples: samples.len(),
                num_reachable: samples.iter().filter(|s| s.rtt != UNREACHABLE).count(),
            });
        }
        Ok(())
    }
}
