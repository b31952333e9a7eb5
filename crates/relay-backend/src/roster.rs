//! The relay roster: which relays exist and their static metadata.
//!
//! The roster fixes the relay index order for one tick. Every array of the
//! cost and route matrices is indexed by position in [`Roster::relays`].

use std::collections::HashMap;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::error::{FormatError, RosterError};
use crate::types::{relay_id, RelayId, MAX_RELAY_NAME_LEN};

/// Static, operator-managed description of one relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterRelay {
    pub id: RelayId,
    pub name: String,
    pub address: SocketAddr,
    pub latitude: f32,
    pub longitude: f32,
    /// Zero means "unknown datacenter".
    pub datacenter_id: u64,
    /// Relay may terminate routes (sits next to game servers).
    pub is_destination: bool,
    pub price: u8,
    pub max_sessions: u32,
}

impl RosterRelay {
    /// Describe a relay; the id is derived from `address`.
    pub fn new(name: impl Into<String>, address: SocketAddr) -> Self {
        Self {
            id: relay_id(&address),
            name: name.into(),
            address,
            latitude: 0.0,
            longitude: 0.0,
            datacenter_id: 0,
            is_destination: false,
            price: 0,
            max_sessions: 0,
        }
    }

    pub fn location(mut self, latitude: f32, longitude: f32) -> Self {
        self.latitude = latitude;
        self.longitude = longitude;
        self
    }

    pub fn datacenter(mut self, datacenter_id: u64) -> Self {
        self.datacenter_id = datacenter_id;
        self
    }

    pub fn destination(mut self, is_destination: bool) -> Self {
        self.is_destination = is_destination;
        self
    }

    pub fn price(mut self, price: u8) -> Self {
        self.price = price;
        self
    }

    pub fn max_sessions(mut self, max_sessions: u32) -> Self {
        self.max_sessions = max_sessions;
        self
    }
}

/// Validated, index-ordered relay list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Roster {
    relays: Vec<RosterRelay>,
    #[serde(skip)]
    by_id: HashMap<RelayId, usize>,
}

impl Roster {
    /// Validate and order a relay list.
    ///
    /// Entries sharing an address collapse to the first one. Two different
    /// addresses hashing to the same id is a misconfiguration and fails.
    /// Relays are ordered by name, then id.
    pub fn new(relays: Vec<RosterRelay>) -> Result<Self, RosterError> {
        let mut seen: HashMap<RelayId, SocketAddr> = HashMap::new();
        let mut kept = Vec::with_capacity(relays.len());

        for mut relay in relays {
            if relay.name.len() > MAX_RELAY_NAME_LEN {
                return Err(RosterError::InvalidName {
                    name: relay.name,
                    reason: format!("longer than {MAX_RELAY_NAME_LEN} bytes"),
                });
            }
            relay.id = relay_id(&relay.address);
            match seen.get(&relay.id) {
                Some(addr) if *addr == relay.address => continue,
                Some(addr) => {
                    return Err(RosterError::IdCollision {
                        id: relay.id,
                        first: addr.to_string(),
                        second: relay.address.to_string(),
                    })
                }
                None => {
                    seen.insert(relay.id, relay.address);
                    kept.push(relay);
                }
            }
        }

        kept.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(Self::indexed(kept))
    }

    fn indexed(relays: Vec<RosterRelay>) -> Self {
        let by_id = relays.iter().enumerate().map(|(i, r)| (r.id, i)).collect();
        Self { relays, by_id }
    }

    pub fn relays(&self) -> &[RosterRelay] {
        &self.relays
    }

    pub fn len(&self) -> usize {
        self.relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }

    pub fn index_of(&self, id: RelayId) -> Option<usize> {
        self.by_id.get(&id).copied()
    }

    pub fn get(&self, id: RelayId) -> Option<&RosterRelay> {
        self.index_of(id).map(|i| &self.relays[i])
    }

    /// Find a relay by its address (ingestion identifies relays this way).
    pub fn by_address(&self, address: &SocketAddr) -> Option<&RosterRelay> {
        self.get(relay_id(address))
            .filter(|r| r.address == *address)
    }

    pub fn ids(&self) -> Vec<RelayId> {
        self.relays.iter().map(|r| r.id).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.relays.iter().map(|r| r.name.clone()).collect()
    }

    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.relays.iter().map(|r| r.address).collect()
    }

    /// Self-describing blob embedded in route matrices.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FormatError> {
        Ok(rmp_serde::to_vec_named(&self.relays)?)
    }

    /// Decode a blob from [`to_bytes`](Self::to_bytes). The stored order is kept.
    pub fn from_bytes(data: &[u8]) -> Result<Self, FormatError> {
        let relays: Vec<RosterRelay> = rmp_serde::from_slice(data)?;
        Ok(Self::indexed(relays))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn roster_sorts_by_name() {
        let roster = Roster::new(vec![
            RosterRelay::new("sea", addr("10.0.0.3:40000")),
            RosterRelay::new("ams", addr("10.0.0.1:40000")),
            RosterRelay::new("lax", addr("10.0.0.2:40000")),
        ])
        .unwrap();
        assert_eq!(roster.names(), vec!["ams", "lax", "sea"]);
        assert_eq!(roster.index_of(relay_id(&addr("10.0.0.3:40000"))), Some(2));
    }

    #[test]
    fn duplicate_address_collapses() {
        let roster = Roster::new(vec![
            RosterRelay::new("ams", addr("10.0.0.1:40000")),
            RosterRelay::new("ams-dup", addr("10.0.0.1:40000")),
        ])
        .unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.relays()[0].name, "ams");
    }

    #[test]
    fn long_name_rejected() {
        let err = Roster::new(vec![RosterRelay::new(
            "x".repeat(64),
            addr("10.0.0.1:40000"),
        )])
        .unwrap_err();
        assert!(matches!(err, RosterError::InvalidName { .. }));
    }

    #[test]
    fn lookup_by_address() {
        let a = addr("10.0.0.1:40000");
        let roster = Roster::new(vec![RosterRelay::new("ams", a).destination(true)]).unwrap();
        assert!(roster.by_address(&a).unwrap().is_destination);
        assert!(roster.by_address(&addr("10.0.0.9:40000")).is_none());
    }

    #[test]
    fn blob_round_trip() {
        let roster = Roster::new(vec![
            RosterRelay::new("ams", addr("10.0.0.1:40000"))
                .location(52.37, 4.89)
                .datacenter(7)
                .price(3),
            RosterRelay::new("fra", addr("[2001:db8::2]:40000")).destination(true),
        ])
        .unwrap();
        let blob = roster.to_bytes().unwrap();
        let back = Roster::from_bytes(&blob).unwrap();
        assert_eq!(back.relays(), roster.relays());
        assert_eq!(back.index_of(roster.relays()[1].id), Some(1));
    }
}
