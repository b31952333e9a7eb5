//! Property tests for the triangular layout, the matrix codecs and the
//! optimizer's output invariants.

use std::collections::HashSet;
use std::net::SocketAddr;

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use relay_backend::{
    tri_index, tri_length, Cost, CostMatrix, Optimizer, RelayTable, RouteMatrix,
    MAX_ROUTES_PER_ENTRY, MAX_ROUTE_RELAYS, UNREACHABLE,
};

fn table(dest: &[bool], datacenters: &[u64]) -> RelayTable {
    let mut t = RelayTable::default();
    for (i, &is_dest) in dest.iter().enumerate() {
        t.ids.push(0x1000 + i as u64);
        t.names.push(format!("relay-{i:02}"));
        t.addresses
            .push(SocketAddr::from(([10, 1, (i / 250) as u8, (i % 250) as u8], 40000)));
        t.latitudes.push(i as f32);
        t.longitudes.push(-(i as f32));
        t.datacenter_ids
            .push(datacenters.get(i).copied().unwrap_or(0));
        t.dest_relays.push(is_dest);
        t.prices.push((i % 7) as u8);
    }
    t
}

/// Mostly reachable costs with a sprinkling of the sentinel.
fn cost() -> impl Strategy<Value = Cost> {
    prop_oneof![4 => 1u8..150, 1 => Just(UNREACHABLE)]
}

fn cost_matrix() -> impl Strategy<Value = CostMatrix> {
    (2usize..12).prop_flat_map(|n| {
        (
            prop::collection::vec(cost(), tri_length(n)),
            prop::collection::vec(any::<bool>(), n),
            prop::collection::vec(prop_oneof![3 => Just(0u64), 1 => 1u64..4], n),
        )
            .prop_map(|(costs, dest, dcs)| CostMatrix::new(table(&dest, &dcs), costs).unwrap())
    })
}

fn random_matrix(seed: u64, n: usize) -> CostMatrix {
    let mut rng = StdRng::seed_from_u64(seed);
    let costs = (0..tri_length(n))
        .map(|_| {
            if rng.random_bool(0.1) {
                UNREACHABLE
            } else {
                rng.random_range(5..200)
            }
        })
        .collect();
    let dest: Vec<bool> = (0..n).map(|_| rng.random_bool(0.7)).collect();
    CostMatrix::new(table(&dest, &[]), costs).unwrap()
}

#[test]
fn tri_index_is_a_bijection() {
    for n in 0..64 {
        let mut seen = HashSet::new();
        for i in 0..n {
            for j in 0..i {
                assert_eq!(tri_index(i, j), tri_index(j, i));
                assert!(tri_index(i, j) < tri_length(n));
                assert!(seen.insert(tri_index(i, j)));
            }
        }
        assert_eq!(seen.len(), tri_length(n));
    }
}

#[test]
fn segmenting_never_changes_the_bytes() {
    for seed in 0..4 {
        let cm = random_matrix(seed, 40);
        let one = Optimizer::new(1).segments(1).optimize(&cm).to_bytes().unwrap();
        let many = Optimizer::new(1).segments(8).optimize(&cm).to_bytes().unwrap();
        let every_row = Optimizer::new(1).segments(40).optimize(&cm).to_bytes().unwrap();
        assert_eq!(one, many, "seed {seed}");
        assert_eq!(one, every_row, "seed {seed}");
    }
}

proptest! {
    #[test]
    fn cost_matrix_round_trips(cm in cost_matrix()) {
        let decoded = CostMatrix::from_bytes(&cm.to_bytes().unwrap()).unwrap();
        prop_assert_eq!(decoded, cm);
    }

    #[test]
    fn route_matrix_round_trips(cm in cost_matrix(), created_at in any::<u64>()) {
        let mut rm = Optimizer::new(1).optimize(&cm);
        rm.created_at = created_at;
        rm.roster_bytes = vec![0x90];
        let decoded = RouteMatrix::from_bytes(&rm.to_bytes().unwrap()).unwrap();
        prop_assert_eq!(decoded, rm);
    }

    #[test]
    fn every_route_is_an_improvement(cm in cost_matrix(), tolerance in 0u32..10) {
        let rm = Optimizer::new(tolerance).optimize(&cm);
        let n = cm.num_relays();
        for i in 1..n {
            for j in 0..i {
                let entry = rm.entry(i, j).unwrap();
                prop_assert_eq!(entry.direct_cost, cm.cost(i, j));
                prop_assert!(entry.routes.len() <= MAX_ROUTES_PER_ENTRY);
                if !cm.relays.dest_relays[i] && !cm.relays.dest_relays[j] {
                    prop_assert!(entry.routes.is_empty());
                }
                for pair in entry.routes.windows(2) {
                    prop_assert!(pair[0].cost <= pair[1].cost);
                }
                for route in &entry.routes {
                    let path: Vec<usize> = route.relays.iter().map(|&r| r as usize).collect();
                    prop_assert!(path.len() >= 3 && path.len() <= MAX_ROUTE_RELAYS);
                    prop_assert_eq!(path[0], j);
                    prop_assert_eq!(path[path.len() - 1], i);
                    let distinct: HashSet<usize> = path.iter().copied().collect();
                    prop_assert_eq!(distinct.len(), path.len());

                    let mut sum = 0u32;
                    for hop in path.windows(2) {
                        let c = cm.cost(hop[0], hop[1]);
                        prop_assert_ne!(c, UNREACHABLE);
                        sum += c as u32;
                    }
                    prop_assert_eq!(sum, route.cost);
                    if entry.direct_cost != UNREACHABLE {
                        prop_assert!(route.cost + tolerance <= entry.direct_cost as u32);
                    }

                    let dcs: Vec<u64> = path
                        .iter()
                        .map(|&r| cm.relays.datacenter_ids[r])
                        .filter(|&dc| dc != 0)
                        .collect();
                    let unique: HashSet<u64> = dcs.iter().copied().collect();
                    prop_assert_eq!(unique.len(), dcs.len());
                }
            }
        }
    }

    #[test]
    fn optimizer_is_deterministic_across_segments(cm in cost_matrix(), segments in 2usize..16) {
        let a = Optimizer::new(1).segments(1).optimize(&cm);
        let b = Optimizer::new(1).segments(segments).optimize(&cm);
        prop_assert_eq!(a.to_bytes().unwrap(), b.to_bytes().unwrap());
    }
}
