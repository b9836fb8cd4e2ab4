//! Ordered, reliable, bidirectional in-process channels.
//!
//! # Responsibilities
//! - Allocate stable peer identities for execution units
//! - Create the coordinator/unit port pair and mesh link pairs
//! - Hand out the receive half exactly once
//!
//! # Design Decisions
//! - Identity is assigned when the pair is created and carried by the port,
//!   never read back from transport state
//! - Clones share the same receive half so one unit can be routed under
//!   several services
//! - Dropping every sender of one side is the "closed" signal for the other

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::transport::message::Message;

/// Global counter for unit identities. Zero is reserved for the coordinator.
static PEER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Stable identity of an execution unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

impl PeerId {
    /// Identity of the coordinating node.
    pub const COORDINATOR: PeerId = PeerId(0);

    /// Allocate a new unique unit identity.
    pub fn next() -> Self {
        Self(PEER_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if *self == PeerId::COORDINATOR {
            write!(f, "coordinator")
        } else {
            write!(f, "unit-{}", self.0)
        }
    }
}

/// One end of a channel pair.
#[derive(Debug, Clone)]
pub struct Port {
    local: PeerId,
    peer: PeerId,
    tx: mpsc::UnboundedSender<Message>,
    rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<Message>>>>,
}

impl Port {
    fn pair(a: PeerId, b: PeerId) -> (Port, Port) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let a_side = Port {
            local: a,
            peer: b,
            tx: a_tx,
            rx: Arc::new(Mutex::new(Some(a_rx))),
        };
        let b_side = Port {
            local: b,
            peer: a,
            tx: b_tx,
            rx: Arc::new(Mutex::new(Some(b_rx))),
        };
        (a_side, b_side)
    }

    /// Identity of the node holding this end.
    pub fn local(&self) -> PeerId {
        self.local
    }

    /// Identity of the node on the other end.
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Post a message. Never blocks; fails only if the other side is gone.
    pub fn send(&self, message: Message) -> Result<(), Message> {
        self.tx.send(message).map_err(|e| e.0)
    }

    /// Whether the other side dropped its receive half.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<Message> {
        self.tx.clone()
    }

    /// Take the receive half. Returns `None` once it was taken by any clone.
    pub(crate) fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<Message>> {
        self.rx.lock().expect("port receiver mutex poisoned").take()
    }
}

/// Create the port pair for a new execution unit.
///
/// The first port stays with the coordinator (`peer()` is the unit), the
/// second goes to the unit (`local()` is the unit).
pub fn unit() -> (Port, Port) {
    Port::pair(PeerId::COORDINATOR, PeerId::next())
}

/// Create a direct mesh link between two units.
pub(crate) fn link(a: PeerId, b: PeerId) -> (Port, Port) {
    Port::pair(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_unique() {
        let id1 = PeerId::next();
        let id2 = PeerId::next();
        assert_ne!(id1, id2);
        assert_ne!(id1, PeerId::COORDINATOR);
    }

    #[test]
    fn unit_ports_are_mirrored() {
        let (coordinator_side, unit_side) = unit();
        assert_eq!(coordinator_side.local(), PeerId::COORDINATOR);
        assert_eq!(coordinator_side.peer(), unit_side.local());
        assert_eq!(unit_side.peer(), PeerId::COORDINATOR);
    }

    #[tokio::test]
    async fn receiver_taken_once_across_clones() {
        let (a, b) = link(PeerId::next(), PeerId::next());
        let b2 = b.clone();
        let mut rx = b.take_receiver().unwrap();
        assert!(b2.take_receiver().is_none());

        a.send(Message::Close).unwrap();
        assert!(matches!(rx.recv().await, Some(Message::Close)));

        drop(a);
        assert!(rx.recv().await.is_none());
    }
}
