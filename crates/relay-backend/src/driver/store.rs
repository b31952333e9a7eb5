use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use bytes::{BufMut, BytesMut};

use crate::encoding::{put_len, Reader};
use crate::error::{FormatError, StoreError};

/// Key under which the leader publishes the matrix bundle.
pub const MATRIX_BUNDLE_KEY: &str = "relay_backend/matrices";

/// Shared store every replica publishes to and reads back from.
///
/// In production: a Redis-like key/value service shared by all replicas.
/// In tests: [`MemoryStore`].
#[async_trait::async_trait]
pub trait MatrixStore: Send + Sync {
    async fn store(&self, key: &str, data: Vec<u8>) -> Result<(), StoreError>;

    /// `Ok(None)` when nothing was ever published under `key`.
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
}

/// External leader election, consumed as a plain boolean.
pub trait LeaderElection: Send + Sync {
    fn is_leader(&self) -> bool;
}

impl<F> LeaderElection for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_leader(&self) -> bool {
        self()
    }
}

/// Leadership flag flipped by whoever runs the election.
#[derive(Debug, Default)]
pub struct LeaderFlag(AtomicBool);

impl LeaderFlag {
    pub fn new(is_leader: bool) -> Self {
        Self(AtomicBool::new(is_leader))
    }

    pub fn set(&self, is_leader: bool) {
        self.0.store(is_leader, Ordering::Relaxed);
    }
}

impl LeaderElection for LeaderFlag {
    fn is_leader(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// In-process store. Shared by cloning an `Arc` of it between drivers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl MatrixStore for MemoryStore {
    async fn store(&self, key: &str, data: Vec<u8>) -> Result<(), StoreError> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), data);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }
}

// ── Bundle ──────────────────────────────────────────────────────────

/// Cost and route matrix bytes of one tick, published under a single key so
/// readers never pair matrices from different ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixBundle {
    pub cost_matrix: Vec<u8>,
    pub route_matrix: Vec<u8>,
}

impl MatrixBundle {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(8 + self.cost_matrix.len() + self.route_matrix.len());
        put_len(&mut buf, self.cost_matrix.len());
        buf.put_slice(&self.cost_matrix);
        put_len(&mut buf, self.route_matrix.len());
        buf.put_slice(&self.route_matrix);
        buf.to_vec()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, FormatError> {
        let mut r = Reader::new(data);
        let len = r.count(1, "bundle cost matrix")?;
        let cost_matrix = r.bytes(len, "bundle cost matrix")?;
        let len = r.count(1, "bundle route matrix")?;
        let route_matrix = r.bytes(len, "bundle route matrix")?;
        r.finish("bundle")?;
        Ok(Self {
            cost_matrix,
            route_matrix,
        })
    }
}

// ── Test doubles ────────────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.load("k").await.unwrap(), None);
        store.store("k", vec![1, 2, 3]).await.unwrap();
        assert_eq!(store.load("k").await.unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn leader_flag_and_closure() {
        let flag = LeaderFlag::new(false);
        assert!(!flag.is_leader());
        flag.set(true);
        assert!(flag.is_leader());

        let always = || true;
        assert!(always.is_leader());
    }

    #[test]
    fn bundle_round_trip_and_truncation() {
        let bundle = MatrixBundle {
            cost_matrix: vec![1, 2, 3],
            route_matrix: vec![9; 40],
        };
        let bytes = bundle.to_bytes();
        assert_eq!(MatrixBundle::from_bytes(&bytes).unwrap(), bundle);
        assert!(matches!(
            MatrixBundle::from_bytes(&bytes[..bytes.len() - 1]),
            Err(FormatError::Truncated { .. })
        ));
    }
}
