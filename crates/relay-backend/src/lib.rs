//! Relay mesh control plane.
//!
//! Aggregates relay ping telemetry into an all-pairs cost matrix, optimizes it
//! into ranked multi-hop routes, and publishes both matrices each tick so that
//! every replica serves the same bytes.
//!
//! Wire formats: little-endian versioned binary for the matrices, MessagePack
//! for the roster blob and debug dumps.

mod encoding;

pub mod config;
pub mod cost_matrix;
pub mod driver;
pub mod error;
pub mod ingest;
pub mod optimizer;
pub mod relay_manager;
pub mod roster;
pub mod route_matrix;
pub mod types;

pub use config::{BackendConfig, MIN_TICK_INTERVAL};
pub use cost_matrix::{CostMatrix, RelayTable, COST_MATRIX_VERSION};
pub use driver::{
    ComputationDriver, DriverHandle, LeaderElection, LeaderFlag, MatrixBundle, MatrixServer,
    MatrixStore, MemoryStore, ServedMatrices, TickState, MATRIX_BUNDLE_KEY,
};
pub use error::{ConfigError, DriverError, FormatError, IngestError, RosterError, StoreError};
pub use ingest::{
    AnalyticsEvent, AnalyticsQueue, AnalyticsSink, LogSink, RelayUpdate, RelayUpdateHandler,
};
pub use optimizer::{default_segments, Optimizer};
pub use relay_manager::{
    RelayHistory, RelayManager, RelayManagerConfig, RelayManagerSnapshot, RelayRecord,
    RelayReport, RelaySample,
};
pub use roster::{Roster, RosterRelay};
pub use route_matrix::{Analysis, RouteCandidate, RouteEntry, RouteMatrix, ROUTE_MATRIX_VERSION};
pub use types::{
    relay_id, tri_index, tri_length, Cost, RelayId, RelayStatus, MAX_COST, MAX_ROUTES_PER_ENTRY,
    MAX_ROUTE_RELAYS, UNREACHABLE,
};
