use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable 64-bit relay identity derived from the relay's address.
pub type RelayId = u64;

/// Quantized cost (RTT-like, milliseconds). [`UNREACHABLE`] means no usable path.
pub type Cost = u8;

/// Sentinel cost: the pair has no usable measurement.
pub const UNREACHABLE: Cost = 255;

/// Largest cost a real measurement can be quantized to.
pub const MAX_COST: Cost = UNREACHABLE - 1;

/// Maximum relays in one route candidate, endpoints included.
pub const MAX_ROUTE_RELAYS: usize = 5;

/// Maximum candidates kept per relay pair.
pub const MAX_ROUTES_PER_ENTRY: usize = 16;

/// Number of raw counters a relay reports with each update.
pub const NUM_RELAY_COUNTERS: usize = 16;

/// Relay is draining and must not carry new routes.
pub const RELAY_FLAG_SHUTTING_DOWN: u64 = 1;

/// Longest relay name accepted, in bytes.
pub const MAX_RELAY_NAME_LEN: usize = 63;

/// Hash a relay address into its [`RelayId`].
///
/// First 8 bytes (big-endian) of SHA-256 over the textual address, so every
/// replica derives the same id for the same `ip:port`.
pub fn relay_id(address: &SocketAddr) -> RelayId {
    let digest = Sha256::digest(address.to_string().as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

/// Number of slots in a triangular array over `n` items.
pub fn tri_length(n: usize) -> usize {
    n * n.saturating_sub(1) / 2
}

/// Slot of the unordered pair `(a, b)` in a triangular array.
///
/// Row `i` holds pairs `(i, 0..i)`, so rows are contiguous and in index order.
/// `a` and `b` must differ.
pub fn tri_index(a: usize, b: usize) -> usize {
    debug_assert_ne!(a, b, "tri_index on the diagonal");
    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    tri_row_start(hi) + lo
}

/// First slot of row `i` (pairs `(i, j)` with `j < i`).
pub fn tri_row_start(i: usize) -> usize {
    tri_length(i)
}

/// Liveness of a relay as reported in exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayStatus {
    Offline,
    Online,
    ShuttingDown,
}

impl RelayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayStatus::Offline => "offline",
            RelayStatus::Online => "online",
            RelayStatus::ShuttingDown => "shutting down",
        }
    }
}

impl std::fmt::Display for RelayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current unix time in seconds.
pub(crate) fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
