//! Replica consistency: every driver serves what the leader published, never
//! its own locally computed matrices.

use std::sync::Arc;
use std::time::Duration;

use relay_backend::{
    BackendConfig, ComputationDriver, CostMatrix, DriverError, LeaderElection, LeaderFlag,
    MatrixBundle, MatrixStore, MemoryStore, Optimizer, RelayManager, RelayReport, RelaySample,
    Roster, RosterRelay, RouteMatrix, TickState, MATRIX_BUNDLE_KEY,
};
use tokio::sync::watch;

const NOW: u64 = 1_700_000_000;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn roster() -> Arc<Roster> {
    let relays = ["ams", "fra", "lhr", "par"]
        .iter()
        .enumerate()
        .map(|(i, name)| {
            RosterRelay::new(*name, format!("192.0.2.{}:40000", i + 1).parse().unwrap())
                .destination(true)
                .price(i as u8)
        })
        .collect();
    Arc::new(Roster::new(relays).unwrap())
}

/// Manager in which every pair measures `rtt`, except `slow` pairs at 90.
fn manager(config: &BackendConfig, roster: &Roster, rtt: u8, slow: &[(usize, usize)]) -> Arc<RelayManager> {
    let mgr = RelayManager::new(config.relay_manager());
    let relays = roster.relays();
    for (i, r) in relays.iter().enumerate() {
        let samples: Vec<RelaySample> = relays
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(j, o)| {
                let slow = slow.contains(&(i, j)) || slow.contains(&(j, i));
                RelaySample::new(o.id, if slow { 90 } else { rtt }, 0, 0.0)
            })
            .collect();
        mgr.process_relay_update(
            NOW,
            RelayReport {
                relay_id: r.id,
                name: &r.name,
                address: r.address,
                session_count: 10,
                version: "1.0.0",
                flags: 0,
                samples: &samples,
                counters: &[],
            },
        );
    }
    Arc::new(mgr)
}

fn config() -> BackendConfig {
    BackendConfig::new()
        .history_size(1)
        .tick_interval(Duration::from_millis(50))
}

fn driver(
    manager: Arc<RelayManager>,
    store: Arc<dyn MatrixStore>,
    leader: Arc<dyn LeaderElection>,
) -> ComputationDriver {
    let (_tx, rx) = watch::channel(roster());
    ComputationDriver::new(config(), rx, manager, store, leader)
}

#[tokio::test]
async fn follower_serves_the_published_snapshot_not_its_own() {
    let roster = roster();
    let cfg = config();

    // A snapshot computed elsewhere, from different measurements.
    let foreign = CostMatrix::build(&roster, &manager(&cfg, &roster, 35, &[]), NOW, 100.0, 1.0);
    let mut foreign_routes = Optimizer::new(1).optimize(&foreign);
    foreign_routes.created_at = NOW - 3;
    let s1 = MatrixBundle {
        cost_matrix: foreign.to_bytes().unwrap(),
        route_matrix: foreign_routes.to_bytes().unwrap(),
    };
    let store = Arc::new(MemoryStore::new());
    store.store(MATRIX_BUNDLE_KEY, s1.to_bytes()).await.unwrap();

    let follower = driver(
        manager(&cfg, &roster, 12, &[(0, 2)]),
        store.clone(),
        Arc::new(LeaderFlag::new(false)),
    );
    follower.tick(NOW).await.unwrap();

    let served = follower.server().current().unwrap();
    assert_eq!(served.cost_matrix_bytes.as_ref(), s1.cost_matrix.as_slice());
    assert_eq!(served.route_matrix_bytes.as_ref(), s1.route_matrix.as_slice());
    assert_eq!(follower.server().age(NOW), Some(3));
    // The follower never writes.
    assert_eq!(store.load(MATRIX_BUNDLE_KEY).await.unwrap(), Some(s1.to_bytes()));
}

#[tokio::test]
async fn all_replicas_serve_identical_bytes() {
    init_tracing();
    let roster = roster();
    let cfg = config();
    let store: Arc<dyn MatrixStore> = Arc::new(MemoryStore::new());

    let leader_flag = Arc::new(LeaderFlag::new(true));
    let leader = driver(manager(&cfg, &roster, 20, &[(0, 3)]), store.clone(), leader_flag.clone());
    let follower = driver(
        manager(&cfg, &roster, 25, &[]),
        store.clone(),
        Arc::new(|| false),
    );

    leader.tick(NOW).await.unwrap();
    follower.tick(NOW).await.unwrap();

    let a = leader.server().current().unwrap();
    let b = follower.server().current().unwrap();
    assert_eq!(a.cost_matrix_bytes, b.cost_matrix_bytes);
    assert_eq!(a.route_matrix_bytes, b.route_matrix_bytes);

    // The leader's slow pair got routed around, and the follower serves that.
    let rm = RouteMatrix::from_bytes(&b.route_matrix_bytes).unwrap();
    let entry = rm.entry(0, 3).unwrap();
    assert_eq!(entry.direct_cost, 90);
    assert_eq!(entry.routes[0].cost, 40);
    assert_eq!(rm.created_at, NOW);
    assert_eq!(Roster::from_bytes(&rm.roster_bytes).unwrap().names(), roster.names());

    // Leadership moves: the old leader now re-reads whatever is stored.
    leader_flag.set(false);
    leader.tick(NOW + 1).await.unwrap();
    assert_eq!(leader.server().route_matrix_bytes(), Some(b.route_matrix_bytes.clone()));
}

#[tokio::test]
async fn spawned_loop_ticks_and_stops() {
    init_tracing();
    let roster = roster();
    let cfg = config();
    let d = driver(
        manager(&cfg, &roster, 20, &[]),
        Arc::new(MemoryStore::new()),
        Arc::new(LeaderFlag::new(true)),
    );
    let handle = d.spawn();
    let mut state = handle.state();

    // The interval loop publishes on its own within a few periods.
    tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| *s == TickState::Served))
        .await
        .expect("no tick within 5s")
        .unwrap();
    assert!(handle.server().current().is_some());
    assert!(handle.metrics().ticks_published.value() >= 1);
    handle.shutdown().await;
}

#[tokio::test]
async fn follower_with_empty_store_serves_nothing() {
    let roster = roster();
    let cfg = config();
    let d = driver(
        manager(&cfg, &roster, 20, &[]),
        Arc::new(MemoryStore::new()),
        Arc::new(LeaderFlag::new(false)),
    );
    let err = d.tick(NOW).await.unwrap_err();
    assert!(matches!(err, DriverError::MissingSnapshot { .. }));
    assert!(d.server().current().is_none());
    assert_eq!(d.metrics().ticks_failed.value(), 1);
}
