//! What the coordinator has told whom.
//!
//! `links` holds every unit pair joined by a direct port. `knowledge`
//! records, per unit, which (service, peer) routes it has been sent.
//! Removal and update broadcasts go to exactly the units that know.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::transport::port::PeerId;

#[derive(Debug, Default)]
pub struct MeshBook {
    links: HashSet<(PeerId, PeerId)>,
    knowledge: HashMap<PeerId, HashSet<(String, PeerId)>>,
}

fn pair(a: PeerId, b: PeerId) -> (PeerId, PeerId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl MeshBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_linked(&self, a: PeerId, b: PeerId) -> bool {
        self.links.contains(&pair(a, b))
    }

    /// Record a link. Returns false if it already existed.
    pub fn link(&mut self, a: PeerId, b: PeerId) -> bool {
        self.links.insert(pair(a, b))
    }

    pub fn knows(&self, holder: PeerId, service: &str, peer: PeerId) -> bool {
        self.knowledge
            .get(&holder)
            .is_some_and(|known| known.contains(&(service.to_string(), peer)))
    }

    /// Record that `holder` was told about `peer` under `service`.
    pub fn learn(&mut self, holder: PeerId, service: &str, peer: PeerId) -> bool {
        self.knowledge
            .entry(holder)
            .or_default()
            .insert((service.to_string(), peer))
    }

    /// Units that know `peer` under `service`, forgetting that knowledge.
    pub fn forget_route(&mut self, service: &str, peer: PeerId) -> Vec<PeerId> {
        let key = (service.to_string(), peer);
        let mut holders: Vec<PeerId> = self
            .knowledge
            .iter_mut()
            .filter_map(|(holder, known)| known.remove(&key).then_some(*holder))
            .collect();
        holders.sort();
        holders
    }

    /// Every (holder, service) pair under which `peer` is known.
    pub fn known_by(&self, peer: PeerId) -> Vec<(PeerId, String)> {
        let mut entries: Vec<(PeerId, String)> = self
            .knowledge
            .iter()
            .flat_map(|(holder, known)| {
                known
                    .iter()
                    .filter(move |(_, p)| *p == peer)
                    .map(move |(service, _)| (*holder, service.clone()))
            })
            .collect();
        entries.sort();
        entries
    }

    /// Drop everything about `peer`: what it knows, who knows it and its
    /// links. Returns the units that knew it.
    pub fn forget_peer(&mut self, peer: PeerId) -> Vec<PeerId> {
        self.knowledge.remove(&peer);
        let holders: BTreeSet<PeerId> = self
            .knowledge
            .iter_mut()
            .filter_map(|(holder, known)| {
                let before = known.len();
                known.retain(|(_, p)| *p != peer);
                (known.len() != before).then_some(*holder)
            })
            .collect();
        self.links.retain(|(a, b)| *a != peer && *b != peer);
        holders.into_iter().collect()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_links_are_unordered() {
        let mut book = MeshBook::new();
        let a = PeerId::next();
        let b = PeerId::next();
        assert!(book.link(b, a));
        assert!(!book.link(a, b));
        assert!(book.is_linked(a, b));
    }

    #[test]
    fn test_forget_route_returns_holders() {
        let mut book = MeshBook::new();
        let (a, b, c) = (PeerId::next(), PeerId::next(), PeerId::next());
        book.learn(a, "x", c);
        book.learn(b, "x", c);
        book.learn(b, "y", c);

        assert_eq!(book.forget_route("x", c), vec![a, b]);
        assert!(!book.knows(a, "x", c));
        assert!(book.knows(b, "y", c));
        assert_eq!(book.known_by(c), vec![(b, "y".to_string())]);
    }

    #[test]
    fn test_forget_peer_clears_links_and_knowledge() {
        let mut book = MeshBook::new();
        let (a, b) = (PeerId::next(), PeerId::next());
        book.link(a, b);
        book.learn(a, "x", b);
        book.learn(b, "y", a);

        assert_eq!(book.forget_peer(b), vec![a]);
        assert!(!book.is_linked(a, b));
        assert!(book.known_by(b).is_empty());
        assert!(book.known_by(a).is_empty());
        assert_eq!(book.link_count(), 0);
    }
}
