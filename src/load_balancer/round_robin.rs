//! Round-robin endpoint selection for one service.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::endpoint::Endpoint;
use crate::transport::port::PeerId;

/// Endpoints of one route plus a rotation cursor.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
    endpoints: Vec<Arc<Endpoint>>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next selectable endpoint in rotation order.
    ///
    /// The cursor advances by one on every call, even when only one
    /// endpoint is selectable.
    pub fn next(&self) -> Option<Arc<Endpoint>> {
        if self.endpoints.is_empty() {
            return None;
        }

        let start = self.counter.fetch_add(1, Ordering::Relaxed);
        let len = self.endpoints.len();

        for i in 0..len {
            let endpoint = &self.endpoints[(start + i) % len];
            if endpoint.is_selectable() {
                return Some(endpoint.clone());
            }
        }
        None
    }

    /// First selectable endpoint, scanning from the cursor, that `accept`
    /// admits. `accept` runs at most once per endpoint.
    pub fn find_accepting<F>(&self, mut accept: F) -> Option<Arc<Endpoint>>
    where
        F: FnMut(&Endpoint) -> bool,
    {
        let len = self.endpoints.len();
        if len == 0 {
            return None;
        }

        let start = self.counter.load(Ordering::Relaxed);
        for i in 0..len {
            let index = (start + i) % len;
            let endpoint = &self.endpoints[index];
            if endpoint.is_selectable() && accept(endpoint) {
                self.counter.store(index + 1, Ordering::Relaxed);
                return Some(endpoint.clone());
            }
        }
        None
    }

    pub fn has_selectable(&self) -> bool {
        self.endpoints.iter().any(|e| e.is_selectable())
    }

    /// Add an endpoint. Returns false if it is already present.
    pub fn add(&mut self, endpoint: Arc<Endpoint>) -> bool {
        if self.contains(endpoint.id()) {
            return false;
        }
        self.endpoints.push(endpoint);
        true
    }

    /// Remove an endpoint by identity; absent endpoints are a no-op.
    pub fn remove(&mut self, peer: PeerId) -> Option<Arc<Endpoint>> {
        let position = self.endpoints.iter().position(|e| e.id() == peer)?;
        let removed = self.endpoints.remove(position);

        let len = self.endpoints.len();
        let counter = self.counter.get_mut();
        *counter = if len == 0 { 0 } else { *counter % len };
        Some(removed)
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.endpoints.iter().any(|e| e.id() == peer)
    }

    pub fn get(&self, peer: PeerId) -> Option<&Arc<Endpoint>> {
        self.endpoints.iter().find(|e| e.id() == peer)
    }

    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
