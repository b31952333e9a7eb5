//! Relay telemetry aggregator.
//!
//! Folds the stream of relay ping reports into per-relay liveness and a
//! bounded per-pair history, and hands out point-in-time views of it: the
//! triangular cost array for the optimizer, a CSV liveness export, per-pair
//! history, raw counters and a full debug snapshot.
//!
//! Two-level locking: the outer map is only write-locked to add a relay seen
//! for the first time; each relay's state sits behind its own mutex, held for
//! the whole of one update so readers never see half of it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use relay_metrics::RelayManagerMetrics;
use serde::{Deserialize, Serialize};

use crate::error::FormatError;
use crate::types::{
    tri_index, tri_length, Cost, RelayId, RelayStatus, MAX_COST, NUM_RELAY_COUNTERS,
    RELAY_FLAG_SHUTTING_DOWN, UNREACHABLE,
};

/// Header row of [`RelayManager::get_relays_csv`].
pub const RELAYS_CSV_HEADER: &str = "name,address,id,status,sessions,version";

// ── Configuration ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RelayManagerConfig {
    /// A relay or pair silent for this long is inactive.
    pub staleness_secs: u64,
    /// Samples kept per pair.
    pub history_size: usize,
    /// Samples with more jitter than this (ms) are stored as unreachable.
    pub max_jitter: f32,
    /// Samples with more packet loss than this (percent) are stored as unreachable.
    pub max_packet_loss: f32,
}

impl Default for RelayManagerConfig {
    fn default() -> Self {
        Self {
            staleness_secs: 10,
            history_size: 300,
            max_jitter: 100.0,
            max_packet_loss: 1.0,
        }
    }
}

// ── Samples and records ───────────────────────────────────────────────

/// One ping observation from the reporting relay towards `relay_id`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelaySample {
    pub relay_id: RelayId,
    pub rtt: Cost,
    pub jitter: Cost,
    /// Percent, 0..=100.
    pub packet_loss: f32,
}

impl RelaySample {
    pub fn new(relay_id: RelayId, rtt: Cost, jitter: Cost, packet_loss: f32) -> Self {
        Self {
            relay_id,
            rtt,
            jitter,
            packet_loss,
        }
    }

    /// Quantize raw measurements. Anything at or beyond 255ms saturates to
    /// [`UNREACHABLE`].
    pub fn from_raw(relay_id: RelayId, rtt_ms: f32, jitter_ms: f32, loss_percent: f32) -> Self {
        let packet_loss = if loss_percent.is_finite() {
            loss_percent.clamp(0.0, 100.0)
        } else {
            100.0
        };
        Self::new(relay_id, quantize(rtt_ms), quantize(jitter_ms), packet_loss)
    }
}

/// Round a millisecond measurement up to a [`Cost`], saturating at the sentinel.
pub fn quantize(ms: f32) -> Cost {
    if !ms.is_finite() || ms >= UNREACHABLE as f32 {
        return UNREACHABLE;
    }
    if ms <= 0.0 {
        return 0;
    }
    // ms < 255 here, so the ceiling is at most 255 and fits.
    ms.ceil() as Cost
}

/// What the manager knows about a relay from its own reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayRecord {
    pub id: RelayId,
    pub name: String,
    pub address: SocketAddr,
    pub last_seen: u64,
    pub session_count: u32,
    pub version: String,
    pub flags: u64,
}

impl RelayRecord {
    pub fn is_shutting_down(&self) -> bool {
        self.flags & RELAY_FLAG_SHUTTING_DOWN != 0
    }
}

/// Pair history in chronological order, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayHistory {
    pub rtt: Vec<Cost>,
    pub jitter: Vec<Cost>,
    pub packet_loss: Vec<f32>,
}

/// Smoothed view of one direction of a pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairEstimate {
    pub rtt: Cost,
    pub jitter: f32,
    pub packet_loss: f32,
}

impl PairEstimate {
    const UNREACHABLE: Self = Self {
        rtt: UNREACHABLE,
        jitter: 0.0,
        packet_loss: 0.0,
    };
}

// ── Pair history ring ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PairHistory {
    rtt: Vec<Cost>,
    jitter: Vec<Cost>,
    packet_loss: Vec<f32>,
    next: usize,
    last_update: u64,
}

impl PairHistory {
    /// Full-size history of unreachable samples: the pair has to earn a
    /// complete window of good samples before it routes.
    fn poisoned(size: usize, now: u64) -> Self {
        let size = size.max(1);
        Self {
            rtt: vec![UNREACHABLE; size],
            jitter: vec![0; size],
            packet_loss: vec![0.0; size],
            next: 0,
            last_update: now,
        }
    }

    fn push(&mut self, rtt: Cost, jitter: Cost, packet_loss: f32, now: u64) {
        self.rtt[self.next] = rtt;
        self.jitter[self.next] = jitter;
        self.packet_loss[self.next] = packet_loss;
        self.next = (self.next + 1) % self.rtt.len();
        self.last_update = now;
    }

    fn estimate(&self) -> PairEstimate {
        if self.rtt.contains(&UNREACHABLE) {
            return PairEstimate::UNREACHABLE;
        }
        let len = self.rtt.len() as u32;
        let rtt_sum: u32 = self.rtt.iter().map(|&v| v as u32).sum();
        let jitter_sum: u32 = self.jitter.iter().map(|&v| v as u32).sum();
        let loss_sum: f32 = self.packet_loss.iter().sum();
        let rtt = rtt_sum.div_ceil(len).min(MAX_COST as u32) as Cost;
        PairEstimate {
            rtt,
            jitter: jitter_sum as f32 / len as f32,
            packet_loss: loss_sum / len as f32,
        }
    }

    fn chronological(&self) -> RelayHistory {
        let order = (self.next..self.rtt.len()).chain(0..self.next);
        let mut out = RelayHistory::default();
        for i in order {
            out.rtt.push(self.rtt[i]);
            out.jitter.push(self.jitter[i]);
            out.packet_loss.push(self.packet_loss[i]);
        }
        out
    }
}

struct SourceEntry {
    record: RelayRecord,
    counters: [u64; NUM_RELAY_COUNTERS],
    pairs: HashMap<RelayId, PairHistory>,
}

// ── Debug snapshot ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelaySnapshot {
    pub record: RelayRecord,
    pub counters: Vec<u64>,
    pub pairs: BTreeMap<RelayId, RelayHistory>,
}

/// Deep copy of the manager state for the debug dump endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayManagerSnapshot {
    pub relays: BTreeMap<RelayId, RelaySnapshot>,
}

impl RelayManagerSnapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>, FormatError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, FormatError> {
        Ok(rmp_serde::from_slice(data)?)
    }
}

// ── RelayManager ──────────────────────────────────────────────────────

/// An update as it reaches [`RelayManager::process_relay_update`].
#[derive(Debug, Clone)]
pub struct RelayReport<'a> {
    pub relay_id: RelayId,
    pub name: &'a str,
    pub address: SocketAddr,
    pub session_count: u32,
    pub version: &'a str,
    pub flags: u64,
    pub samples: &'a [RelaySample],
    pub counters: &'a [u64],
}

pub struct RelayManager {
    config: RelayManagerConfig,
    sources: RwLock<HashMap<RelayId, Arc<Mutex<SourceEntry>>>>,
    metrics: RelayManagerMetrics,
}

fn lock(entry: &Mutex<SourceEntry>) -> MutexGuard<'_, SourceEntry> {
    entry.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RelayManager {
    pub fn new(config: RelayManagerConfig) -> Self {
        Self {
            config,
            sources: RwLock::new(HashMap::new()),
            metrics: RelayManagerMetrics::default(),
        }
    }

    pub fn config(&self) -> &RelayManagerConfig {
        &self.config
    }

    pub fn metrics(&self) -> &RelayManagerMetrics {
        &self.metrics
    }

    fn entry(&self, id: RelayId) -> Option<Arc<Mutex<SourceEntry>>> {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    fn entries(&self) -> Vec<Arc<Mutex<SourceEntry>>> {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Fold one relay report into the model.
    pub fn process_relay_update(&self, now: u64, report: RelayReport<'_>) {
        let entry = match self.entry(report.relay_id) {
            Some(e) => e,
            None => {
                let mut sources = self.sources.write().unwrap_or_else(PoisonError::into_inner);
                sources
                    .entry(report.relay_id)
                    .or_insert_with(|| {
                        tracing::debug!(
                            "relay manager: first report from {} ({:016x})",
                            report.name,
                            report.relay_id
                        );
                        Arc::new(Mutex::new(SourceEntry {
                            record: RelayRecord {
                                id: report.relay_id,
                                name: report.name.to_string(),
                                address: report.address,
                                last_seen: now,
                                session_count: 0,
                                version: String::new(),
                                flags: 0,
                            },
                            counters: [0; NUM_RELAY_COUNTERS],
                            pairs: HashMap::new(),
                        }))
                    })
                    .clone()
            }
        };

        let mut source = lock(&entry);
        source.record.name = report.name.to_string();
        source.record.address = report.address;
        source.record.last_seen = now;
        source.record.session_count = report.session_count;
        source.record.version = report.version.to_string();
        source.record.flags = report.flags;

        source.counters = [0; NUM_RELAY_COUNTERS];
        for (slot, value) in source.counters.iter_mut().zip(report.counters) {
            *slot = *value;
        }

        for sample in report.samples {
            if sample.relay_id == report.relay_id {
                continue;
            }
            let routable = sample.rtt != UNREACHABLE
                && sample.jitter as f32 <= self.config.max_jitter
                && sample.packet_loss <= self.config.max_packet_loss;
            let rtt = if routable {
                sample.rtt.min(MAX_COST)
            } else {
                self.metrics.samples_unroutable.inc();
                UNREACHABLE
            };

            let size = self.config.history_size.max(1);
            let fresh = source.pairs.get(&sample.relay_id).is_some_and(|h| {
                h.rtt.len() == size
                    && now.saturating_sub(h.last_update) <= self.config.staleness_secs
            });
            if !fresh {
                source
                    .pairs
                    .insert(sample.relay_id, PairHistory::poisoned(size, now));
                self.metrics.histories_poisoned.inc();
            }
            if let Some(history) = source.pairs.get_mut(&sample.relay_id) {
                history.push(rtt, sample.jitter, sample.packet_loss, now);
            }
        }

        self.metrics.updates_processed.inc();
        self.metrics.samples_processed.add(report.samples.len() as u64);
    }

    pub fn get_relay(&self, id: RelayId) -> Option<RelayRecord> {
        self.entry(id).map(|e| lock(&e).record.clone())
    }

    fn is_active(&self, record: &RelayRecord, now: u64) -> bool {
        now.saturating_sub(record.last_seen) < self.config.staleness_secs
            && !record.is_shutting_down()
    }

    pub fn relay_status(&self, now: u64, id: RelayId) -> RelayStatus {
        match self.get_relay(id) {
            Some(r) if now.saturating_sub(r.last_seen) >= self.config.staleness_secs => {
                RelayStatus::Offline
            }
            Some(r) if r.is_shutting_down() => RelayStatus::ShuttingDown,
            Some(_) => RelayStatus::Online,
            None => RelayStatus::Offline,
        }
    }

    /// Relays that reported within the staleness window and are not draining,
    /// ordered by name.
    pub fn get_active_relays(&self, now: u64) -> Vec<RelayRecord> {
        let mut active: Vec<RelayRecord> = self
            .entries()
            .iter()
            .map(|e| lock(e).record.clone())
            .filter(|r| self.is_active(r, now))
            .collect();
        active.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        active
    }

    pub fn get_active_relay_map(&self, now: u64) -> HashSet<RelayId> {
        self.entries()
            .iter()
            .map(|e| lock(e).record.clone())
            .filter(|r| self.is_active(r, now))
            .map(|r| r.id)
            .collect()
    }

    /// Triangular cost array over `relay_ids` (in that index order).
    ///
    /// A pair costs [`UNREACHABLE`] when either relay is inactive, either
    /// direction has no fresh full history, or the worse direction's jitter or
    /// packet loss exceeds the given thresholds. Otherwise it costs the worse
    /// direction's smoothed RTT.
    pub fn get_costs(
        &self,
        now: u64,
        relay_ids: &[RelayId],
        max_jitter: f32,
        max_packet_loss: f32,
    ) -> Vec<Cost> {
        let n = relay_ids.len();
        let wanted: HashSet<RelayId> = relay_ids.iter().copied().collect();

        // One lock per source relay: each row of estimates is internally consistent.
        let views: Vec<Option<HashMap<RelayId, PairEstimate>>> = relay_ids
            .iter()
            .map(|id| {
                let entry = self.entry(*id)?;
                let source = lock(&entry);
                if !self.is_active(&source.record, now) {
                    return None;
                }
                let estimates = source
                    .pairs
                    .iter()
                    .filter(|(dest, _)| wanted.contains(dest))
                    .map(|(dest, h)| {
                        let est = if now.saturating_sub(h.last_update) > self.config.staleness_secs {
                            PairEstimate::UNREACHABLE
                        } else {
                            h.estimate()
                        };
                        (*dest, est)
                    })
                    .collect();
                Some(estimates)
            })
            .collect();

        let mut costs = vec![UNREACHABLE; tri_length(n)];
        for i in 1..n {
            let Some(from_i) = &views[i] else { continue };
            for j in 0..i {
                let Some(from_j) = &views[j] else { continue };
                let (Some(ij), Some(ji)) = (from_i.get(&relay_ids[j]), from_j.get(&relay_ids[i]))
                else {
                    continue;
                };
                if ij.rtt == UNREACHABLE || ji.rtt == UNREACHABLE {
                    continue;
                }
                let jitter = ij.jitter.max(ji.jitter);
                let packet_loss = ij.packet_loss.max(ji.packet_loss);
                if jitter > max_jitter || packet_loss > max_packet_loss {
                    continue;
                }
                costs[tri_index(i, j)] = ij.rtt.max(ji.rtt);
            }
        }
        costs
    }

    /// One CSV line per given relay: name, address, hex id, status, sessions, version.
    pub fn get_relays_csv(
        &self,
        now: u64,
        ids: &[RelayId],
        names: &[String],
        addresses: &[SocketAddr],
    ) -> Vec<u8> {
        let mut out = String::from(RELAYS_CSV_HEADER);
        out.push('\n');
        for ((id, name), address) in ids.iter().zip(names).zip(addresses) {
            let status = self.relay_status(now, *id);
            let (sessions, version) = match self.get_relay(*id) {
                Some(r) if status != RelayStatus::Offline => (r.session_count, r.version),
                _ => (0, String::new()),
            };
            let _ = writeln!(
                out,
                "{name},{address},{id:016x},{status},{sessions},{version}"
            );
        }
        out.into_bytes()
    }

    /// History of the `src -> dest` direction, oldest first. Empty when unknown.
    pub fn get_history(&self, src: RelayId, dest: RelayId) -> RelayHistory {
        self.entry(src)
            .and_then(|e| lock(&e).pairs.get(&dest).map(PairHistory::chronological))
            .unwrap_or_default()
    }

    /// Raw counters from the relay's latest report. Zeros when unknown.
    pub fn get_relay_counters(&self, id: RelayId) -> [u64; NUM_RELAY_COUNTERS] {
        self.entry(id)
            .map(|e| lock(&e).counters)
            .unwrap_or([0; NUM_RELAY_COUNTERS])
    }

    /// Deep, serializable copy of everything the manager holds.
    pub fn copy(&self) -> RelayManagerSnapshot {
        let relays = self
            .entries()
            .iter()
            .map(|e| {
                let source = lock(e);
                let pairs = source
                    .pairs
                    .iter()
                    .map(|(dest, h)| (*dest, h.chronological()))
                    .collect();
                (
                    source.record.id,
                    RelaySnapshot {
                        record: source.record.clone(),
                        counters: source.counters.to_vec(),
                        pairs,
                    },
                )
            })
            .collect();
        RelayManagerSnapshot { relays }
    }
}

impl Default for RelayManager {
    fn default() -> Self {
        Self::new(RelayManagerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::relay_id;

    const HISTORY: usize = 4;

    fn manager() -> RelayManager {
        RelayManager::new(RelayManagerConfig {
            history_size: HISTORY,
            ..Default::default()
        })
    }

    fn addr(i: u8) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, i], 40000))
    }

    fn id(i: u8) -> RelayId {
        relay_id(&addr(i))
    }

    fn report(mgr: &RelayManager, now: u64, from: u8, samples: &[RelaySample], flags: u64) {
        let name = format!("relay{from}");
        mgr.process_relay_update(
            now,
            RelayReport {
                relay_id: id(from),
                name: &name,
                address: addr(from),
                session_count: 10 + from as u32,
                version: "1.2.3",
                flags,
                samples,
                counters: &[1, 2, 3],
            },
        );
    }

    /// Both relays ping each other `times` times, once per second.
    fn ping_pair(mgr: &RelayManager, start: u64, a: u8, b: u8, rtt: Cost, times: usize) -> u64 {
        let mut now = start;
        for _ in 0..times {
            report(mgr, now, a, &[RelaySample::new(id(b), rtt, 0, 0.0)], 0);
            report(mgr, now, b, &[RelaySample::new(id(a), rtt, 0, 0.0)], 0);
            now += 1;
        }
        now - 1
    }

    #[test]
    fn quantize_saturates() {
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(10.2), 11);
        assert_eq!(quantize(254.0), 254);
        assert_eq!(quantize(255.0), UNREACHABLE);
        assert_eq!(quantize(10_000.0), UNREACHABLE);
        assert_eq!(quantize(f32::NAN), UNREACHABLE);
        assert_eq!(quantize(-3.0), 0);
    }

    #[test]
    fn new_pair_is_unroutable_until_history_fills() {
        let mgr = manager();
        let ids = [id(1), id(2)];

        let now = ping_pair(&mgr, 100, 1, 2, 30, HISTORY - 1);
        assert_eq!(mgr.get_costs(now, &ids, 100.0, 1.0), vec![UNREACHABLE]);

        let now = ping_pair(&mgr, now + 1, 1, 2, 30, 1);
        assert_eq!(mgr.get_costs(now, &ids, 100.0, 1.0), vec![30]);
    }

    #[test]
    fn cost_is_worse_direction() {
        let mgr = manager();
        let mut now = 100;
        for _ in 0..HISTORY {
            report(&mgr, now, 1, &[RelaySample::new(id(2), 20, 0, 0.0)], 0);
            report(&mgr, now, 2, &[RelaySample::new(id(1), 40, 0, 0.0)], 0);
            now += 1;
        }
        assert_eq!(mgr.get_costs(now - 1, &[id(1), id(2)], 100.0, 1.0), vec![40]);
    }

    #[test]
    fn one_direction_only_is_unreachable() {
        let mgr = manager();
        for t in 0..HISTORY as u64 {
            report(&mgr, 100 + t, 1, &[RelaySample::new(id(2), 20, 0, 0.0)], 0);
            report(&mgr, 100 + t, 2, &[], 0);
        }
        let costs = mgr.get_costs(100 + HISTORY as u64, &[id(1), id(2)], 100.0, 1.0);
        assert_eq!(costs, vec![UNREACHABLE]);
    }

    #[test]
    fn bad_sample_poisons_the_window() {
        let mgr = manager();
        let now = ping_pair(&mgr, 100, 1, 2, 30, HISTORY);
        assert_eq!(mgr.get_costs(now, &[id(1), id(2)], 100.0, 1.0), vec![30]);

        // Packet loss over the ingestion threshold
        report(&mgr, now + 1, 1, &[RelaySample::new(id(2), 30, 0, 50.0)], 0);
        report(&mgr, now + 1, 2, &[RelaySample::new(id(1), 30, 0, 0.0)], 0);
        assert_eq!(
            mgr.get_costs(now + 1, &[id(1), id(2)], 100.0, 1.0),
            vec![UNREACHABLE]
        );
        assert_eq!(mgr.metrics().samples_unroutable.value(), 1);
    }

    #[test]
    fn cost_thresholds_apply_to_smoothed_values() {
        let mgr = RelayManager::new(RelayManagerConfig {
            history_size: HISTORY,
            max_jitter: 200.0,
            ..Default::default()
        });
        let mut now = 100;
        for _ in 0..HISTORY {
            report(&mgr, now, 1, &[RelaySample::new(id(2), 30, 50, 0.0)], 0);
            report(&mgr, now, 2, &[RelaySample::new(id(1), 30, 10, 0.0)], 0);
            now += 1;
        }
        let ids = [id(1), id(2)];
        assert_eq!(mgr.get_costs(now - 1, &ids, 100.0, 1.0), vec![30]);
        assert_eq!(mgr.get_costs(now - 1, &ids, 20.0, 1.0), vec![UNREACHABLE]);
    }

    #[test]
    fn stale_relay_drops_out() {
        let mgr = manager();
        let now = ping_pair(&mgr, 100, 1, 2, 30, HISTORY);
        assert_eq!(mgr.get_active_relays(now).len(), 2);

        // Relay 2 goes silent; relay 1 keeps reporting.
        let later = now + mgr.config().staleness_secs;
        report(&mgr, later, 1, &[], 0);

        let active = mgr.get_active_relays(later);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, id(1));
        assert!(!mgr.get_active_relay_map(later).contains(&id(2)));
        assert_eq!(mgr.get_costs(later, &[id(1), id(2)], 100.0, 1.0), vec![UNREACHABLE]);
        assert_eq!(mgr.relay_status(later, id(2)), RelayStatus::Offline);
    }

    #[test]
    fn shutting_down_relay_is_inactive() {
        let mgr = manager();
        let now = ping_pair(&mgr, 100, 1, 2, 30, HISTORY);
        report(&mgr, now, 2, &[RelaySample::new(id(1), 30, 0, 0.0)], RELAY_FLAG_SHUTTING_DOWN);

        assert_eq!(mgr.relay_status(now, id(2)), RelayStatus::ShuttingDown);
        assert_eq!(mgr.get_active_relays(now).len(), 1);
        assert_eq!(mgr.get_costs(now, &[id(1), id(2)], 100.0, 1.0), vec![UNREACHABLE]);
    }

    #[test]
    fn relays_csv_format() {
        let mgr = manager();
        report(&mgr, 100, 1, &[], 0);
        report(&mgr, 100, 2, &[], RELAY_FLAG_SHUTTING_DOWN);

        let ids = [id(1), id(2), id(3)];
        let names = vec!["relay1".to_string(), "relay2".into(), "relay3".into()];
        let addrs = [addr(1), addr(2), addr(3)];
        let csv = String::from_utf8(mgr.get_relays_csv(101, &ids, &names, &addrs)).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines[0], RELAYS_CSV_HEADER);
        assert_eq!(
            lines[1],
            format!("relay1,10.0.0.1:40000,{:016x},online,11,1.2.3", id(1))
        );
        assert_eq!(
            lines[2],
            format!("relay2,10.0.0.2:40000,{:016x},shutting down,12,1.2.3", id(2))
        );
        assert_eq!(lines[3], format!("relay3,10.0.0.3:40000,{:016x},offline,0,", id(3)));
    }

    #[test]
    fn history_is_chronological_and_bounded() {
        let mgr = manager();
        for (t, rtt) in [11u8, 12, 13, 14, 15, 16].iter().enumerate() {
            report(&mgr, 100 + t as u64, 1, &[RelaySample::new(id(2), *rtt, 1, 0.0)], 0);
        }
        let h = mgr.get_history(id(1), id(2));
        assert_eq!(h.rtt, vec![13, 14, 15, 16]);
        assert_eq!(h.jitter.len(), HISTORY);
        assert_eq!(h.packet_loss.len(), HISTORY);
        assert!(mgr.get_history(id(2), id(1)).rtt.is_empty());
    }

    #[test]
    fn counters_are_last_writer_wins() {
        let mgr = manager();
        report(&mgr, 100, 1, &[], 0);
        let counters = mgr.get_relay_counters(id(1));
        assert_eq!(&counters[..4], &[1, 2, 3, 0]);
        assert_eq!(mgr.get_relay_counters(id(9)), [0; NUM_RELAY_COUNTERS]);
    }

    #[test]
    fn snapshot_round_trips_through_msgpack() {
        let mgr = manager();
        ping_pair(&mgr, 100, 1, 2, 30, 2);
        let snap = mgr.copy();
        assert_eq!(snap.relays.len(), 2);
        assert_eq!(snap.relays[&id(1)].pairs[&id(2)].rtt.len(), HISTORY);

        let bytes = snap.to_bytes().unwrap();
        assert_eq!(RelayManagerSnapshot::from_bytes(&bytes).unwrap(), snap);
    }

    #[test]
    fn concurrent_updates_do_not_lose_reports() {
        let mgr = Arc::new(manager());
        let handles: Vec<_> = (1..=8u8)
            .map(|i| {
                let mgr = mgr.clone();
                std::thread::spawn(move || {
                    for t in 0..50 {
                        report(&mgr, 100 + t, i, &[RelaySample::new(id(i % 8 + 1), 20, 0, 0.0)], 0);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(mgr.metrics().updates_processed.value(), 400);
        assert_eq!(mgr.get_active_relays(149).len(), 8);
    }
}
