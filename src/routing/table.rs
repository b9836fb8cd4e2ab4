//! Service name → endpoints.
//!
//! # Responsibilities
//! - Normalize service names
//! - Own one `RoundRobin` per service; delete routes that become empty
//! - Remove a peer from every route at once for removal cascades
//! - Hand out snapshots so broadcasts never iterate live state

use std::collections::HashMap;
use std::sync::Arc;

use crate::load_balancer::endpoint::Endpoint;
use crate::load_balancer::round_robin::RoundRobin;
use crate::transport::message::PeerState;
use crate::transport::port::PeerId;

/// Canonical form of a service name: trimmed, lowercase, with the
/// configured domain suffix.
pub fn normalize(domain: Option<&str>, service: &str) -> String {
    let mut name = service.trim().to_ascii_lowercase();
    if let Some(domain) = domain {
        let domain = domain.to_ascii_lowercase();
        if !name.ends_with(&domain) {
            name.push_str(&domain);
        }
    }
    name
}

/// All routes known to one node.
#[derive(Debug, Default)]
pub struct RouteTable {
    domain: Option<String>,
    routes: HashMap<String, RoundRobin>,
}

impl RouteTable {
    pub fn new(domain: Option<String>) -> Self {
        Self {
            domain,
            routes: HashMap::new(),
        }
    }

    pub fn normalize(&self, service: &str) -> String {
        normalize(self.domain.as_deref(), service)
    }

    /// Add `endpoint` under `service`. Returns whether anything changed.
    pub fn add_endpoint(&mut self, service: &str, endpoint: Arc<Endpoint>) -> bool {
        let service = self.normalize(service);
        self.routes.entry(service).or_default().add(endpoint)
    }

    /// Remove one peer from one route.
    pub fn remove_endpoint(&mut self, service: &str, peer: PeerId) -> Option<Arc<Endpoint>> {
        let service = self.normalize(service);
        let route = self.routes.get_mut(&service)?;
        let removed = route.remove(peer);
        if route.is_empty() {
            self.routes.remove(&service);
        }
        removed
    }

    /// Remove a peer from every route. Returns the routes it was removed from.
    pub fn remove_endpoints_for_peer(&mut self, peer: PeerId) -> Vec<(String, Arc<Endpoint>)> {
        let mut removed = Vec::new();
        for (service, route) in self.routes.iter_mut() {
            if let Some(endpoint) = route.remove(peer) {
                removed.push((service.clone(), endpoint));
            }
        }
        self.routes.retain(|_, route| !route.is_empty());
        removed
    }

    /// Patch the state of a known endpoint. Unknown pairs are ignored.
    pub fn update_endpoint(&self, service: &str, peer: PeerId, state: &PeerState) -> bool {
        let service = self.normalize(service);
        match self.routes.get(&service).and_then(|route| route.get(peer)) {
            Some(endpoint) => {
                endpoint.apply_descriptor(state);
                true
            }
            None => false,
        }
    }

    pub fn route(&self, service: &str) -> Option<&RoundRobin> {
        self.routes.get(&self.normalize(service))
    }

    pub fn contains(&self, service: &str, peer: PeerId) -> bool {
        self.route(service).is_some_and(|route| route.contains(peer))
    }

    /// Services a peer is routed under.
    pub fn services_of(&self, peer: PeerId) -> Vec<String> {
        let mut services: Vec<String> = self
            .routes
            .iter()
            .filter(|(_, route)| route.contains(peer))
            .map(|(service, _)| service.clone())
            .collect();
        services.sort();
        services
    }

    pub fn services(&self) -> Vec<String> {
        let mut services: Vec<String> = self.routes.keys().cloned().collect();
        services.sort();
        services
    }

    /// Copy of every route for iteration outside the table.
    pub fn snapshot(&self) -> Vec<(String, Vec<Arc<Endpoint>>)> {
        let mut snapshot: Vec<_> = self
            .routes
            .iter()
            .map(|(service, route)| (service.clone(), route.endpoints().to_vec()))
            .collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
