//! Computation driver: the periodic build, optimize, publish, re-read loop.
//!
//! Each tick snapshots the roster and relay manager into a cost matrix,
//! optimizes it into a route matrix, and publishes both as one bundle through
//! the shared store (leader only). Every replica then reads the bundle back
//! and serves those bytes, not its own: all replicas serve the leader's
//! matrices. Any failure abandons the tick and leaves the previous
//! matrices in place.

pub mod server;
pub mod store;

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use relay_metrics::DriverMetrics;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::{BackendConfig, MIN_TICK_INTERVAL};
use crate::cost_matrix::CostMatrix;
use crate::error::DriverError;
use crate::optimizer::Optimizer;
use crate::relay_manager::RelayManager;
use crate::roster::Roster;
use crate::route_matrix::RouteMatrix;
use crate::types::now_secs;

pub use server::{MatrixServer, ServedMatrices};
pub use store::{LeaderElection, LeaderFlag, MatrixBundle, MatrixStore, MemoryStore, MATRIX_BUNDLE_KEY};

/// Where the current tick is. Returns to `Idle` when a tick is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickState {
    Idle,
    BuildingCostMatrix,
    Optimizing,
    Publishing,
    Served,
}

/// Commands sent to a running driver.
enum DriverCommand {
    /// Run a tick now, outside the interval.
    TickNow {
        reply: oneshot::Sender<Result<(), DriverError>>,
    },
    Shutdown,
}

pub struct ComputationDriver {
    config: BackendConfig,
    roster: watch::Receiver<Arc<Roster>>,
    manager: Arc<RelayManager>,
    store: Arc<dyn MatrixStore>,
    leader: Arc<dyn LeaderElection>,
    server: Arc<MatrixServer>,
    metrics: Arc<DriverMetrics>,
    state: watch::Sender<TickState>,
}

impl ComputationDriver {
    pub fn new(
        config: BackendConfig,
        roster: watch::Receiver<Arc<Roster>>,
        manager: Arc<RelayManager>,
        store: Arc<dyn MatrixStore>,
        leader: Arc<dyn LeaderElection>,
    ) -> Self {
        let (state, _) = watch::channel(TickState::Idle);
        Self {
            config,
            roster,
            manager,
            store,
            leader,
            server: Arc::new(MatrixServer::new()),
            metrics: Arc::new(DriverMetrics::default()),
            state,
        }
    }

    pub fn server(&self) -> Arc<MatrixServer> {
        self.server.clone()
    }

    pub fn metrics(&self) -> Arc<DriverMetrics> {
        self.metrics.clone()
    }

    pub fn state(&self) -> watch::Receiver<TickState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: TickState) {
        self.state.send_replace(state);
    }

    /// Run one complete tick at unix time `now`.
    pub async fn tick(&self, now: u64) -> Result<(), DriverError> {
        let started = Instant::now();
        self.metrics.ticks_started.inc();

        let result = self.run_tick(now).await;
        match &result {
            Ok(()) => {
                self.metrics.ticks_published.inc();
                self.set_state(TickState::Served);
            }
            Err(e) => {
                self.metrics.ticks_failed.inc();
                tracing::warn!("driver: tick abandoned, still serving previous matrices: {e}");
                self.set_state(TickState::Idle);
            }
        }
        self.metrics.tick_ms.set(ms(started.elapsed()));
        result
    }

    async fn run_tick(&self, now: u64) -> Result<(), DriverError> {
        // ── 1. Cost matrix ──────────────────────────────────────────
        self.set_state(TickState::BuildingCostMatrix);
        let roster = self.roster.borrow().clone();
        let started = Instant::now();
        let cost_matrix = CostMatrix::build(
            &roster,
            &self.manager,
            now,
            self.config.max_jitter,
            self.config.max_packet_loss,
        );
        let cost_bytes = cost_matrix.to_bytes()?;
        self.metrics.cost_matrix_ms.set(ms(started.elapsed()));
        self.metrics.cost_matrix_bytes.set(cost_bytes.len() as f64);
        self.metrics.num_relays.set(roster.len() as f64);

        // ── 2. Optimize ─────────────────────────────────────────────
        self.set_state(TickState::Optimizing);
        let optimizer = Optimizer {
            rtt_tolerance: self.config.rtt_tolerance,
            num_segments: self.config.num_segments,
        };
        let started = Instant::now();
        let mut route_matrix = tokio::task::spawn_blocking(move || optimizer.optimize(&cost_matrix))
            .await
            .map_err(|e| DriverError::Join(e.to_string()))?;
        let optimize_time = started.elapsed();
        self.metrics.optimize_ms.set(ms(optimize_time));
        if optimize_time > self.config.tick_interval {
            self.metrics.over_budget.inc();
            tracing::warn!(
                "driver: optimize took {}ms for {} relays, longer than the {}ms tick interval",
                optimize_time.as_millis(),
                roster.len(),
                self.config.tick_interval.as_millis()
            );
        }

        route_matrix.created_at = now;
        route_matrix.roster_bytes = roster.to_bytes()?;
        route_matrix.cost_matrix_size = cost_bytes.len() as u32;
        route_matrix.optimize_time_ms = optimize_time.as_millis() as u32;
        let route_bytes = route_matrix.to_bytes()?;
        self.metrics.route_matrix_bytes.set(route_bytes.len() as f64);

        // ── 3. Publish, then re-read what the leader published ──────
        self.set_state(TickState::Publishing);
        if self.leader.is_leader() {
            let bundle = MatrixBundle {
                cost_matrix: cost_bytes,
                route_matrix: route_bytes,
            };
            if let Err(e) = self.store.store(MATRIX_BUNDLE_KEY, bundle.to_bytes()).await {
                self.metrics.publish_failures.inc();
                return Err(e.into());
            }
        }

        let published = match self.store.load(MATRIX_BUNDLE_KEY).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                return Err(DriverError::MissingSnapshot {
                    key: MATRIX_BUNDLE_KEY.to_string(),
                })
            }
            Err(e) => {
                self.metrics.load_failures.inc();
                return Err(e.into());
            }
        };
        let bundle = MatrixBundle::from_bytes(&published)?;
        // Decode both before serving: a corrupt publication is never served.
        CostMatrix::from_bytes(&bundle.cost_matrix)?;
        let served_route = RouteMatrix::from_bytes(&bundle.route_matrix)?;

        tracing::info!(
            "driver: serving matrices created at {} ({} relays, {} + {} bytes, optimize {}ms)",
            served_route.created_at,
            served_route.num_relays(),
            bundle.cost_matrix.len(),
            bundle.route_matrix.len(),
            optimize_time.as_millis()
        );
        self.server.publish(ServedMatrices {
            cost_matrix_bytes: Bytes::from(bundle.cost_matrix),
            route_matrix_bytes: Bytes::from(bundle.route_matrix),
            route_matrix: served_route,
        });
        Ok(())
    }

    /// Start the tick loop on the current tokio runtime.
    pub fn spawn(self) -> DriverHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let state = self.state();
        let server = self.server();
        let metrics = self.metrics();
        let task = tokio::spawn(self.run(cmd_rx));
        DriverHandle {
            cmd_tx,
            state,
            server,
            metrics,
            task,
        }
    }

    async fn run(self, mut cmd_rx: mpsc::Receiver<DriverCommand>) {
        // `tick_interval` is a public field and may have been zeroed directly.
        let period = self.config.tick_interval.max(MIN_TICK_INTERVAL);
        let mut ticker = tokio::time::interval(period);
        // An overrunning tick delays the next one instead of bursting.
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Skip the immediate first tick
        ticker.tick().await;

        tracing::info!(
            "driver: started, tick every {}ms",
            period.as_millis()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = self.tick(now_secs()).await;
                }
                cmd = cmd_rx.recv() => match cmd {
                    Some(DriverCommand::TickNow { reply }) => {
                        let _ = reply.send(self.tick(now_secs()).await);
                    }
                    Some(DriverCommand::Shutdown) | None => break,
                },
            }
        }
        tracing::info!("driver: stopped");
    }
}

/// Handle to a running [`ComputationDriver`].
pub struct DriverHandle {
    cmd_tx: mpsc::Sender<DriverCommand>,
    state: watch::Receiver<TickState>,
    server: Arc<MatrixServer>,
    metrics: Arc<DriverMetrics>,
    task: JoinHandle<()>,
}

impl DriverHandle {
    pub fn server(&self) -> Arc<MatrixServer> {
        self.server.clone()
    }

    pub fn metrics(&self) -> Arc<DriverMetrics> {
        self.metrics.clone()
    }

    pub fn state(&self) -> watch::Receiver<TickState> {
        self.state.clone()
    }

    /// Run a tick immediately and wait for its outcome.
    pub async fn tick_now(&self) -> Result<(), DriverError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(DriverCommand::TickNow { reply })
            .await
            .map_err(|_| DriverError::Stopped)?;
        rx.await
            .map_err(|_| DriverError::Stopped)?
    }

    /// Stop ticking. A tick already running completes first.
    pub async fn shutdown(self) {
        let _ = self.cmd_tx.send(DriverCommand::Shutdown).await;
        let _ = self.task.await;
    }
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
