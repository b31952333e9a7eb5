//! All-pairs cost snapshot handed to the optimizer.
//!
//! Immutable once built: a new matrix is produced every tick from the roster
//! and the relay manager, then encoded into the versioned wire format.
//!
//! Wire layout (little-endian):
//!
//! ```text
//! u32 version | relay table | u32 len | len x u8 costs
//! relay table: u32 n | n x u64 id | n x (u8 len, utf8) name | n x address
//!              | n x f32 lat | n x f32 long | n x u64 datacenter
//!              | n x u8 dest | n x u8 price
//! address:     u8 family (4|6) | 4 or 16 octets | u16 port
//! ```

use std::net::SocketAddr;

use bytes::{BufMut, BytesMut};

use crate::encoding::{put_address, put_len, put_string, Reader};
use crate::error::FormatError;
use crate::relay_manager::RelayManager;
use crate::roster::Roster;
use crate::types::{tri_index, tri_length, Cost, RelayId, MAX_RELAY_NAME_LEN, UNREACHABLE};

pub const COST_MATRIX_VERSION: u32 = 1;

/// Index-correlated relay metadata shared by cost and route matrices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayTable {
    pub ids: Vec<RelayId>,
    pub names: Vec<String>,
    pub addresses: Vec<SocketAddr>,
    pub latitudes: Vec<f32>,
    pub longitudes: Vec<f32>,
    pub datacenter_ids: Vec<u64>,
    pub dest_relays: Vec<bool>,
    pub prices: Vec<u8>,
}

impl RelayTable {
    pub fn from_roster(roster: &Roster) -> Self {
        let mut table = Self::default();
        for r in roster.relays() {
            table.ids.push(r.id);
            table.names.push(r.name.clone());
            table.addresses.push(r.address);
            table.latitudes.push(r.latitude);
            table.longitudes.push(r.longitude);
            table.datacenter_ids.push(r.datacenter_id);
            table.dest_relays.push(r.is_destination);
            table.prices.push(r.price);
        }
        table
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn index_of(&self, id: RelayId) -> Option<usize> {
        self.ids.iter().position(|r| *r == id)
    }

    pub fn index_by_name(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|r| r == name)
    }

    /// All arrays must share one length or indices stop meaning the same relay.
    pub fn validate(&self) -> Result<(), FormatError> {
        let n = self.ids.len();
        let lens = [
            ("relay names", self.names.len()),
            ("relay addresses", self.addresses.len()),
            ("relay latitudes", self.latitudes.len()),
            ("relay longitudes", self.longitudes.len()),
            ("relay datacenters", self.datacenter_ids.len()),
            ("dest relays", self.dest_relays.len()),
            ("relay prices", self.prices.len()),
        ];
        for (field, len) in lens {
            if len != n {
                return Err(FormatError::Invalid {
                    field,
                    reason: format!("{len} entries for {n} relays"),
                });
            }
        }
        if let Some(name) = self.names.iter().find(|n| n.len() > MAX_RELAY_NAME_LEN) {
            return Err(FormatError::Invalid {
                field: "relay names",
                reason: format!("{name:?} is longer than {MAX_RELAY_NAME_LEN} bytes"),
            });
        }
        Ok(())
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        put_len(buf, self.len());
        for id in &self.ids {
            buf.put_u64_le(*id);
        }
        for name in &self.names {
            put_string(buf, name);
        }
        for addr in &self.addresses {
            put_address(buf, addr);
        }
        for v in &self.latitudes {
            buf.put_f32_le(*v);
        }
        for v in &self.longitudes {
            buf.put_f32_le(*v);
        }
        for v in &self.datacenter_ids {
            buf.put_u64_le(*v);
        }
        for v in &self.dest_relays {
            buf.put_u8(*v as u8);
        }
        buf.put_slice(&self.prices);
    }

    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self, FormatError> {
        // Smallest possible relay: id + empty name + v4 address + rest.
        let n = r.count(8 + 1 + 7 + 4 + 4 + 8 + 1 + 1, "relay count")?;
        let mut t = Self::default();
        for _ in 0..n {
            t.ids.push(r.u64("relay ids")?);
        }
        for _ in 0..n {
            t.names.push(r.string("relay names")?);
        }
        for _ in 0..n {
            t.addresses.push(r.address("relay addresses")?);
        }
        for _ in 0..n {
            t.latitudes.push(r.f32("relay latitudes")?);
        }
        for _ in 0..n {
            t.longitudes.push(r.f32("relay longitudes")?);
        }
        for _ in 0..n {
            t.datacenter_ids.push(r.u64("relay datacenters")?);
        }
        for _ in 0..n {
            t.dest_relays.push(r.bool("dest relays")?);
        }
        t.prices = r.bytes(n, "relay prices")?;
        Ok(t)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostMatrix {
    pub relays: RelayTable,
    /// Triangular, indexed by [`tri_index`].
    pub costs: Vec<Cost>,
}

impl CostMatrix {
    /// Pair a relay table with its triangular cost array.
    pub fn new(relays: RelayTable, costs: Vec<Cost>) -> Result<Self, FormatError> {
        let m = Self { relays, costs };
        m.validate()?;
        Ok(m)
    }

    /// Snapshot the manager's costs for every relay in the roster.
    pub fn build(
        roster: &Roster,
        manager: &RelayManager,
        now: u64,
        max_jitter: f32,
        max_packet_loss: f32,
    ) -> Self {
        let relays = RelayTable::from_roster(roster);
        let costs = manager.get_costs(now, &relays.ids, max_jitter, max_packet_loss);
        Self { relays, costs }
    }

    pub fn num_relays(&self) -> usize {
        self.relays.len()
    }

    /// Cost between two relay indices; [`UNREACHABLE`] on the diagonal.
    pub fn cost(&self, a: usize, b: usize) -> Cost {
        if a == b {
            return UNREACHABLE;
        }
        self.costs[tri_index(a, b)]
    }

    pub fn validate(&self) -> Result<(), FormatError> {
        self.relays.validate()?;
        let expected = tri_length(self.relays.len());
        if self.costs.len() != expected {
            return Err(FormatError::Invalid {
                field: "costs",
                reason: format!("{} entries, expected {expected}", self.costs.len()),
            });
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, FormatError> {
        self.validate()?;
        let n = self.relays.len();
        let mut buf = BytesMut::with_capacity(16 + n * 48 + self.costs.len());
        buf.put_u32_le(COST_MATRIX_VERSION);
        self.relays.encode(&mut buf);
        put_len(&mut buf, self.costs.len());
        buf.put_slice(&self.costs);
        Ok(buf.to_vec())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, FormatError> {
        let mut r = Reader::new(data);
        let version = r.u32("version")?;
        if version != COST_MATRIX_VERSION {
            return Err(FormatError::UnknownVersion {
                kind: "cost matrix",
                version,
            });
        }
        let relays = RelayTable::decode(&mut r)?;
        let len = r.count(1, "costs")?;
        let costs = r.bytes(len, "costs")?;
        r.finish("cost matrix")?;
        Self::new(relays, costs)
    }
}
