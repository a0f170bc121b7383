//! Session registry — the set of currently connected client endpoints.
//!
//! Presence bookkeeping only. Transfers never consult it; the count feeds
//! the connection logs.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashSet;

#[derive(Clone, Default)]
pub struct SessionRegistry {
    endpoints: Arc<DashSet<SocketAddr>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent. Returns true when the endpoint was not already present.
    pub fn add(&self, endpoint: SocketAddr) -> bool {
        self.endpoints.insert(endpoint)
    }

    /// Returns true when the endpoint was present.
    pub fn remove(&self, endpoint: &SocketAddr) -> bool {
        self.endpoints.remove(endpoint).is_some()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
