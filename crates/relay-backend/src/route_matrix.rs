//! Optimizer output: ranked alternate routes for every relay pair.
//!
//! Wire layout (little-endian), after the shared relay table:
//!
//! ```text
//! u32 version | relay table | u64 created_at | u32 len | roster blob
//! | u32 cost_matrix_size | u32 optimize_time_ms | u32 num_entries | entries
//! entry:     u8 direct_cost | u8 num_routes | num_routes x candidate
//! candidate: u8 num_relays | num_relays x u32 relay index | u32 cost | u32 price
//! ```

use std::io;

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::cost_matrix::RelayTable;
use crate::encoding::{put_len, Reader};
use crate::error::FormatError;
use crate::types::{tri_index, tri_length, Cost, MAX_ROUTES_PER_ENTRY, MAX_ROUTE_RELAYS, UNREACHABLE};

pub const ROUTE_MATRIX_VERSION: u32 = 1;

/// Number of 5ms improvement buckets before the open-ended "50ms+" one.
const IMPROVEMENT_BUCKETS: usize = 10;

/// One alternate path. `relays` runs from the lower relay index to the higher.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RouteCandidate {
    pub relays: Vec<u32>,
    pub cost: u32,
    pub price: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub direct_cost: Cost,
    /// Ascending by cost.
    pub routes: Vec<RouteCandidate>,
}

impl Default for RouteEntry {
    fn default() -> Self {
        Self {
            direct_cost: UNREACHABLE,
            routes: Vec::new(),
        }
    }
}

impl RouteEntry {
    pub fn num_routes(&self) -> usize {
        self.routes.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteMatrix {
    pub relays: RelayTable,
    /// Unix seconds.
    pub created_at: u64,
    pub roster_bytes: Vec<u8>,
    pub cost_matrix_size: u32,
    pub optimize_time_ms: u32,
    /// Triangular, indexed by [`tri_index`].
    pub entries: Vec<RouteEntry>,
}

impl RouteMatrix {
    pub fn num_relays(&self) -> usize {
        self.relays.len()
    }

    pub fn entry(&self, a: usize, b: usize) -> Option<&RouteEntry> {
        if a == b {
            return None;
        }
        self.entries.get(tri_index(a, b))
    }

    /// Relay indices of `candidate` walked from `from` towards `to`.
    pub fn oriented_path(from: usize, to: usize, candidate: &RouteCandidate) -> Vec<usize> {
        let mut path: Vec<usize> = candidate.relays.iter().map(|&r| r as usize).collect();
        if from > to {
            path.reverse();
        }
        path
    }

    pub fn validate(&self) -> Result<(), FormatError> {
        self.relays.validate()?;
        let n = self.relays.len();
        if self.entries.len() != tri_length(n) {
            return Err(FormatError::Invalid {
                field: "route entries",
                reason: format!("{} entries for {n} relays", self.entries.len()),
            });
        }
        for entry in &self.entries {
            if entry.routes.len() > MAX_ROUTES_PER_ENTRY {
                return Err(FormatError::Invalid {
                    field: "num routes",
                    reason: format!("{} > {MAX_ROUTES_PER_ENTRY}", entry.routes.len()),
                });
            }
            for route in &entry.routes {
                if route.relays.len() > MAX_ROUTE_RELAYS {
                    return Err(FormatError::Invalid {
                        field: "route relays",
                        reason: format!("{} > {MAX_ROUTE_RELAYS}", route.relays.len()),
                    });
                }
                if let Some(bad) = route.relays.iter().find(|&&r| r as usize >= n) {
                    return Err(FormatError::Invalid {
                        field: "route relays",
                        reason: format!("relay index {bad} out of {n}"),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, FormatError> {
        self.validate()?;
        let mut buf = BytesMut::with_capacity(
            64 + self.roster_bytes.len() + self.relays.len() * 48 + self.entries.len() * 2,
        );
        buf.put_u32_le(ROUTE_MATRIX_VERSION);
        self.relays.encode(&mut buf);
        buf.put_u64_le(self.created_at);
        put_len(&mut buf, self.roster_bytes.len());
        buf.put_slice(&self.roster_bytes);
        buf.put_u32_le(self.cost_matrix_size);
        buf.put_u32_le(self.optimize_time_ms);
        put_len(&mut buf, self.entries.len());
        for entry in &self.entries {
            buf.put_u8(entry.direct_cost);
            buf.put_u8(entry.routes.len() as u8);
            for route in &entry.routes {
                buf.put_u8(route.relays.len() as u8);
                for relay in &route.relays {
                    buf.put_u32_le(*relay);
                }
                buf.put_u32_le(route.cost);
                buf.put_u32_le(route.price);
            }
        }
        Ok(buf.to_vec())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, FormatError> {
        let mut r = Reader::new(data);
        let version = r.u32("version")?;
        if version != ROUTE_MATRIX_VERSION {
            return Err(FormatError::UnknownVersion {
                kind: "route matrix",
                version,
            });
        }
        let relays = RelayTable::decode(&mut r)?;
        let created_at = r.u64("created at")?;
        let roster_len = r.count(1, "roster")?;
        let roster_bytes = r.bytes(roster_len, "roster")?;
        let cost_matrix_size = r.u32("cost matrix size")?;
        let optimize_time_ms = r.u32("optimize time")?;

        let num_entries = r.count(2, "route entries")?;
        let mut entries = Vec::with_capacity(num_entries);
        for _ in 0..num_entries {
            let direct_cost = r.u8("direct cost")?;
            let num_routes = r.u8("num routes")? as usize;
            if num_routes > MAX_ROUTES_PER_ENTRY {
                return Err(FormatError::Invalid {
                    field: "num routes",
                    reason: format!("{num_routes} > {MAX_ROUTES_PER_ENTRY}"),
                });
            }
            let mut routes = Vec::with_capacity(num_routes);
            for _ in 0..num_routes {
                let num_relays = r.u8("route relays")? as usize;
                if num_relays > MAX_ROUTE_RELAYS {
                    return Err(FormatError::Invalid {
                        field: "route relays",
                        reason: format!("{num_relays} > {MAX_ROUTE_RELAYS}"),
                    });
                }
                let mut path = Vec::with_capacity(num_relays);
                for _ in 0..num_relays {
                    path.push(r.u32("route relays")?);
                }
                routes.push(RouteCandidate {
                    relays: path,
                    cost: r.u32("route cost")?,
                    price: r.u32("route price")?,
                });
            }
            entries.push(RouteEntry {
                direct_cost,
                routes,
            });
        }
        r.finish("route matrix")?;

        let m = Self {
            relays,
            created_at,
            roster_bytes,
            cost_matrix_size,
            optimize_time_ms,
            entries,
        };
        m.validate()?;
        Ok(m)
    }

    /// Pairs counted by the analysis: at least one endpoint terminates routes.
    ///
    /// Tolerates a table or entry array shorter than the relay count; pairs
    /// without an entry are skipped.
    fn analyzed_pairs(&self) -> impl Iterator<Item = (usize, usize, &RouteEntry)> + '_ {
        let n = self.relays.len();
        let dest = move |i: usize| self.relays.dest_relays.get(i).copied().unwrap_or(false);
        (1..n)
            .flat_map(move |i| (0..i).map(move |j| (i, j)))
            .filter(move |&(i, j)| dest(i) || dest(j))
            .filter_map(move |(i, j)| self.entries.get(tri_index(i, j)).map(|e| (i, j, e)))
    }

    fn name(&self, index: usize) -> String {
        self.relays
            .names
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("#{index}"))
    }

    pub fn analyze(&self) -> Analysis {
        let mut a = Analysis {
            num_relays: self.relays.len(),
            num_dest_relays: self.relays.dest_relays.iter().filter(|d| **d).count(),
            cost_matrix_size: self.cost_matrix_size,
            optimize_time_ms: self.optimize_time_ms,
            ..Default::default()
        };

        let mut no_route = 0usize;
        let mut one_route = 0usize;
        let mut no_direct = 0usize;
        let mut route_relays = 0usize;

        for (_, _, entry) in self.analyzed_pairs() {
            a.num_pairs += 1;
            let routes = entry.routes.len();
            a.total_routes += routes;
            a.max_routes_per_pair = a.max_routes_per_pair.max(routes);
            for route in &entry.routes {
                route_relays += route.relays.len();
                a.max_route_length = a.max_route_length.max(route.relays.len());
            }
            match routes {
                0 => no_route += 1,
                1 => one_route += 1,
                _ => {}
            }

            if entry.direct_cost == UNREACHABLE {
                no_direct += 1;
                continue;
            }
            let improvement = entry
                .routes
                .first()
                .map(|best| (entry.direct_cost as u32).saturating_sub(best.cost))
                .unwrap_or(0);
            if improvement == 0 {
                a.no_improvement += 1;
            } else {
                let bucket = ((improvement as usize - 1) / 5).min(IMPROVEMENT_BUCKETS);
                a.improvement_buckets[bucket] += 1;
            }
        }

        if a.num_pairs > 0 {
            let pairs = a.num_pairs as f64;
            a.average_num_routes = a.total_routes as f64 / pairs;
            a.no_route_percent = no_route as f64 * 100.0 / pairs;
            a.one_route_percent = one_route as f64 * 100.0 / pairs;
            a.no_direct_route_percent = no_direct as f64 * 100.0 / pairs;
        }
        if a.total_routes > 0 {
            a.average_route_length = route_relays as f64 / a.total_routes as f64;
        }
        a
    }

    pub fn write_analysis_to<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        self.analyze().write_to(w)
    }

    /// Every pair that has at least one candidate, with its routes.
    pub fn write_routes_to<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        for (i, j, entry) in self.analyzed_pairs() {
            if entry.routes.is_empty() {
                continue;
            }
            self.write_pair_routes(w, j, i)?;
        }
        Ok(())
    }

    /// Routes between two relay indices, hops printed from `from` to `to`.
    pub fn write_pair_routes<W: io::Write>(&self, w: &mut W, from: usize, to: usize) -> io::Result<()> {
        let Some(entry) = self.entry(from, to) else {
            return writeln!(w, "no entry for {from} -> {to}");
        };
        let direct = if entry.direct_cost == UNREACHABLE {
            "none".to_string()
        } else {
            format!("{}ms", entry.direct_cost)
        };
        writeln!(
            w,
            "{} -> {}: direct {direct}, {} routes",
            self.name(from),
            self.name(to),
            entry.routes.len()
        )?;
        for route in &entry.routes {
            let hops: Vec<String> = Self::oriented_path(from, to, route)
                .into_iter()
                .map(|r| self.name(r))
                .collect();
            writeln!(w, "    {}ms (price {}): {}", route.cost, route.price, hops.join(" - "))?;
        }
        Ok(())
    }
}

// ── Analysis ─────────────────────────────────────────────────────────

/// Aggregate route statistics, over pairs with at least one destination relay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub num_relays: usize,
    pub num_dest_relays: usize,
    pub num_pairs: usize,
    /// Pairs with a direct route that no candidate beats.
    pub no_improvement: usize,
    /// Pairs whose best candidate beats the direct cost by (0,5], (5,10], ...
    /// (45,50] and more than 50 ms.
    pub improvement_buckets: [usize; IMPROVEMENT_BUCKETS + 1],
    pub total_routes: usize,
    pub average_num_routes: f64,
    pub average_route_length: f64,
    pub max_routes_per_pair: usize,
    pub max_route_length: usize,
    pub no_route_percent: f64,
    pub one_route_percent: f64,
    pub no_direct_route_percent: f64,
    pub cost_matrix_size: u32,
    pub optimize_time_ms: u32,
}

impl Analysis {
    fn percent(&self, count: usize) -> f64 {
        if self.num_pairs == 0 {
            return 0.0;
        }
        count as f64 * 100.0 / self.num_pairs as f64
    }

    pub fn write_to<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "RTT Improvement:")?;
        writeln!(
            w,
            "    None: {} ({:.2}%)",
            self.no_improvement,
            self.percent(self.no_improvement)
        )?;
        for (i, count) in self.improvement_buckets.iter().enumerate() {
            let label = if i == IMPROVEMENT_BUCKETS {
                format!("{}ms+", i * 5)
            } else {
                format!("{}-{}ms", i * 5, (i + 1) * 5)
            };
            writeln!(w, "    {label}: {count} ({:.2}%)", self.percent(*count))?;
        }
        writeln!(w)?;
        writeln!(w, "Route Summary:")?;
        writeln!(
            w,
            "    {} relay pairs ({} relays, {} destinations)",
            self.num_pairs, self.num_relays, self.num_dest_relays
        )?;
        writeln!(w, "    {} total routes", self.total_routes)?;
        writeln!(
            w,
            "    {:.2} routes per relay pair on average ({} max)",
            self.average_num_routes, self.max_routes_per_pair
        )?;
        writeln!(
            w,
            "    {:.2} relays per route on average ({} max)",
            self.average_route_length, self.max_route_length
        )?;
        writeln!(w, "    {:.2}% of relay pairs have no route", self.no_route_percent)?;
        writeln!(w, "    {:.2}% of relay pairs have only one route", self.one_route_percent)?;
        writeln!(
            w,
            "    {:.2}% of relay pairs have no direct route",
            self.no_direct_route_percent
        )?;
        writeln!(
            w,
            "    cost matrix {} bytes, optimized in {}ms",
            self.cost_matrix_size, self.optimize_time_ms
        )
    }
}
