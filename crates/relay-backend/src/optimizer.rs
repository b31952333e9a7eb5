//! Route optimizer: cost matrix in, route matrix out.
//!
//! Pure function of its input. The work is split into contiguous row
//! segments; each segment owns a disjoint slice of the output triangle, so
//! workers never synchronize beyond the final join. Segmenting only changes
//! the schedule, never the result.
//!
//! Search, per pair `(i, j)` with `j < i`:
//!
//! 1. `indirect(i, j)`: every single relay `k` such that `i-k-j` is fully
//!    reachable and beats the direct cost by the tolerance (or any such `k`
//!    when the direct path is unreachable), cheapest first.
//! 2. For each `y` in `indirect(i, j)`, try `i-y-j`, then widen with the best
//!    intermediate of `(i, y)` and of `(j, y)`: `i-x-y-j`, `i-y-z-j`,
//!    `i-x-y-z-j`.
//!
//! Candidates keep at most [`MAX_ROUTE_RELAYS`] relays, no repeats, at most
//! one relay per known datacenter, and only the cheapest of each relay set.

use std::ops::Range;

use rayon::prelude::*;

use crate::cost_matrix::CostMatrix;
use crate::route_matrix::{RouteCandidate, RouteEntry, RouteMatrix};
use crate::types::{tri_index, tri_length, tri_row_start, Cost, MAX_ROUTES_PER_ENTRY, MAX_ROUTE_RELAYS, UNREACHABLE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Hop {
    relay: u32,
    cost: u32,
}

/// Segment count used when none is configured: one row per segment when
/// there are enough CPUs, otherwise rows in blocks of five.
pub fn default_segments(num_relays: usize) -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    if cpus >= num_relays {
        num_relays.max(1)
    } else {
        (num_relays / 5).max(1)
    }
}

/// Row ranges `[s*n/S, (s+1)*n/S)` for each of the `S` segments.
pub fn segment_rows(num_relays: usize, num_segments: usize) -> Vec<Range<usize>> {
    let segments = num_segments.max(1);
    (0..segments)
        .map(|s| s * num_relays / segments..(s + 1) * num_relays / segments)
        .collect()
}

/// Fill every slot of a triangular array, one parallel task per segment.
fn fill_segmented<T, F>(out: &mut [T], segments: &[Range<usize>], fill: F)
where
    T: Send,
    F: Fn(usize, usize) -> T + Sync,
{
    let mut chunks = Vec::with_capacity(segments.len());
    let mut rest = out;
    for rows in segments {
        let len = tri_row_start(rows.end) - tri_row_start(rows.start);
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(len);
        chunks.push((rows.clone(), head));
        rest = tail;
    }

    chunks.into_par_iter().for_each(|(rows, slots)| {
        let base = tri_row_start(rows.start);
        for i in rows {
            for j in 0..i {
                slots[tri_index(i, j) - base] = fill(i, j);
            }
        }
    });
}

#[derive(Debug, Clone)]
pub struct Optimizer {
    /// A candidate must beat the direct cost by at least this much (ms).
    pub rtt_tolerance: u32,
    /// `None` picks [`default_segments`] for the matrix size.
    pub num_segments: Option<usize>,
}

impl Optimizer {
    pub fn new(rtt_tolerance: u32) -> Self {
        Self {
            rtt_tolerance,
            num_segments: None,
        }
    }

    pub fn segments(mut self, num_segments: usize) -> Self {
        self.num_segments = Some(num_segments.max(1));
        self
    }

    fn qualifies(&self, cost: u32, direct: Cost) -> bool {
        direct == UNREACHABLE || cost + self.rtt_tolerance <= direct as u32
    }

    /// Compute routes for every pair.
    ///
    /// The result carries the cost matrix's relay table; `created_at`, the
    /// roster blob and the timing fields are left for the caller to stamp.
    pub fn optimize(&self, cost_matrix: &CostMatrix) -> RouteMatrix {
        let n = cost_matrix.num_relays();
        let segments = segment_rows(
            n,
            self.num_segments.unwrap_or_else(|| default_segments(n)),
        );

        let mut indirect: Vec<Vec<Hop>> = vec![Vec::new(); tri_length(n)];
        fill_segmented(&mut indirect, &segments, |i, j| {
            self.intermediates(cost_matrix, i, j)
        });

        let mut entries = vec![RouteEntry::default(); tri_length(n)];
        fill_segmented(&mut entries, &segments, |i, j| {
            self.route_entry(cost_matrix, &indirect, i, j)
        });

        RouteMatrix {
            relays: cost_matrix.relays.clone(),
            entries,
            ..Default::default()
        }
    }

    fn intermediates(&self, cm: &CostMatrix, i: usize, j: usize) -> Vec<Hop> {
        let direct = cm.cost(i, j);
        let mut hops: Vec<Hop> = (0..cm.num_relays())
            .filter(|&k| k != i && k != j)
            .filter_map(|k| {
                let (ik, kj) = (cm.cost(i, k), cm.cost(k, j));
                if ik == UNREACHABLE || kj == UNREACHABLE {
                    return None;
                }
                let cost = ik as u32 + kj as u32;
                self.qualifies(cost, direct).then_some(Hop {
                    relay: k as u32,
                    cost,
                })
            })
            .collect();
        hops.sort_by_key(|h| (h.cost, h.relay));
        hops
    }

    fn route_entry(&self, cm: &CostMatrix, indirect: &[Vec<Hop>], i: usize, j: usize) -> RouteEntry {
        let direct_cost = cm.cost(i, j);
        let dest = &cm.relays.dest_relays;
        if !dest[i] && !dest[j] {
            return RouteEntry {
                direct_cost,
                routes: Vec::new(),
            };
        }

        let best_except = |a: usize, b: usize, avoid: usize| {
            indirect[tri_index(a, b)]
                .iter()
                .map(|h| h.relay as usize)
                .find(|&r| r != avoid)
        };

        let mut set = RouteSet::new(self, cm, direct_cost);
        for hop in &indirect[tri_index(i, j)] {
            let y = hop.relay as usize;
            let x = best_except(i, y, j);
            let z = best_except(j, y, i);

            set.add(&[i, y, j]);
            if let Some(x) = x {
                set.add(&[i, x, y, j]);
            }
            if let Some(z) = z {
                set.add(&[i, y, z, j]);
            }
            if let (Some(x), Some(z)) = (x, z) {
                set.add(&[i, x, y, z, j]);
            }
        }

        RouteEntry {
            direct_cost,
            routes: set.routes,
        }
    }
}

/// Ranked, bounded candidate list for one pair.
struct RouteSet<'a> {
    optimizer: &'a Optimizer,
    cm: &'a CostMatrix,
    direct: Cost,
    routes: Vec<RouteCandidate>,
}

impl<'a> RouteSet<'a> {
    fn new(optimizer: &'a Optimizer, cm: &'a CostMatrix, direct: Cost) -> Self {
        Self {
            optimizer,
            cm,
            direct,
            routes: Vec::with_capacity(MAX_ROUTES_PER_ENTRY),
        }
    }

    /// `path` runs from the higher relay index to the lower one.
    fn add(&mut self, path: &[usize]) {
        if path.len() > MAX_ROUTE_RELAYS {
            return;
        }
        let dcs = &self.cm.relays.datacenter_ids;
        for (a, &ra) in path.iter().enumerate() {
            for &rb in &path[a + 1..] {
                if ra == rb || (dcs[ra] != 0 && dcs[ra] == dcs[rb]) {
                    return;
                }
            }
        }

        let mut cost = 0u32;
        for hop in path.windows(2) {
            let c = self.cm.cost(hop[0], hop[1]);
            if c == UNREACHABLE {
                return;
            }
            cost += c as u32;
        }
        if !self.optimizer.qualifies(cost, self.direct) {
            return;
        }

        let price = path.iter().map(|&r| self.cm.relays.prices[r] as u32).sum();
        let relays: Vec<u32> = path.iter().rev().map(|&r| r as u32).collect();
        let candidate = RouteCandidate {
            relays,
            cost,
            price,
        };

        let key = relay_set(&candidate.relays);
        if let Some(pos) = self
            .routes
            .iter()
            .position(|r| relay_set(&r.relays) == key)
        {
            if rank(&candidate) < rank(&self.routes[pos]) {
                self.routes.remove(pos);
            } else {
                return;
            }
        }

        let at = self
            .routes
            .partition_point(|r| rank(r) <= rank(&candidate));
        if at < MAX_ROUTES_PER_ENTRY {
            self.routes.insert(at, candidate);
            self.routes.truncate(MAX_ROUTES_PER_ENTRY);
        }
    }
}

fn rank(route: &RouteCandidate) -> (u32, &[u32]) {
    (route.cost, &route.relays)
}

fn relay_set(relays: &[u32]) -> Vec<u32> {
    let mut set = relays.to_vec();
    set.sort_unstable();
    set
}
