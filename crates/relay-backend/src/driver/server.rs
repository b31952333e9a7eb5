use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;

use crate::route_matrix::RouteMatrix;

/// Matrices currently served to readers. Replaced whole, never mutated.
#[derive(Debug)]
pub struct ServedMatrices {
    pub cost_matrix_bytes: Bytes,
    pub route_matrix_bytes: Bytes,
    /// Decoded from `route_matrix_bytes`, for handlers that print or analyze.
    pub route_matrix: RouteMatrix,
}

impl ServedMatrices {
    pub fn created_at(&self) -> u64 {
        self.route_matrix.created_at
    }
}

/// Read side of the driver: the last successfully published matrices.
///
/// Readers get an `Arc` snapshot and never block the publisher for longer than
/// a pointer swap.
#[derive(Debug, Default)]
pub struct MatrixServer {
    current: RwLock<Option<Arc<ServedMatrices>>>,
}

impl MatrixServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, served: ServedMatrices) {
        let served = Arc::new(served);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(served);
    }

    pub fn current(&self) -> Option<Arc<ServedMatrices>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn cost_matrix_bytes(&self) -> Option<Bytes> {
        self.current().map(|m| m.cost_matrix_bytes.clone())
    }

    pub fn route_matrix_bytes(&self) -> Option<Bytes> {
        self.current().map(|m| m.route_matrix_bytes.clone())
    }

    pub fn created_at(&self) -> Option<u64> {
        self.current().map(|m| m.created_at())
    }

    /// Seconds since the served matrix was computed.
    pub fn age(&self, now: u64) -> Option<u64> {
        self.created_at().map(|t| now.saturating_sub(t))
    }
}
