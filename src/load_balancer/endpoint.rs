//! Endpoint abstraction.
//!
//! # Responsibilities
//! - Represent one channel-connected peer serving some services
//! - Track wiring, readiness and pause state for selection
//! - Own the peer's in-flight requests and pending acknowledgments
//! - Carry the advertised network address and admission metadata

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, watch};
use url::Url;

use crate::error::MeshError;
use crate::mesh::acks::AckTable;
use crate::rpc::correlator::Correlator;
use crate::transport::message::{Message, PeerDescriptor, PeerState};
use crate::transport::port::{PeerId, Port};

/// A peer reachable over one port.
#[derive(Debug)]
pub struct Endpoint {
    id: PeerId,
    sender: mpsc::UnboundedSender<Message>,

    /// Completed the initial WIRE handshake.
    wired: AtomicBool,
    /// A server is attached on the peer.
    ready: AtomicBool,
    /// Suspended by the coordinator (or, on a unit, as told by the coordinator).
    paused: AtomicBool,
    /// Suspended by the peer itself.
    self_paused: AtomicBool,
    closed: AtomicBool,

    address: RwLock<Option<Url>>,
    meta: RwLock<Option<Value>>,

    correlator: Arc<Correlator>,
    acks: AckTable,
    stop: watch::Sender<bool>,
}

impl Endpoint {
    /// Create the endpoint for the peer on the other side of `port`.
    pub fn from_port(port: &Port) -> Arc<Self> {
        let id = port.peer();
        let (stop, _) = watch::channel(false);
        Arc::new(Self {
            id,
            sender: port.sender(),
            wired: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            self_paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            address: RwLock::new(None),
            meta: RwLock::new(None),
            correlator: Arc::new(Correlator::new(id)),
            acks: AckTable::new(),
            stop,
        })
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Post a message to the peer. Fails if the peer is gone.
    pub fn send(&self, message: Message) -> Result<(), Message> {
        self.sender.send(message).map_err(|e| e.0)
    }

    // --- Selection state ---

    /// Eligible for application requests.
    pub fn is_selectable(&self) -> bool {
        self.wired.load(Ordering::SeqCst)
            && self.ready.load(Ordering::SeqCst)
            && !self.is_paused()
            && !self.closed.load(Ordering::SeqCst)
    }

    pub fn is_wired(&self) -> bool {
        self.wired.load(Ordering::SeqCst)
    }

    pub fn set_wired(&self, wired: bool) {
        self.wired.store(wired, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Paused by anyone. Overrides readiness.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst) || self.self_paused.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn set_self_paused(&self, paused: bool) {
        self.self_paused.store(paused, Ordering::SeqCst);
    }

    pub fn address(&self) -> Option<Url> {
        self.address.read().expect("endpoint address lock poisoned").clone()
    }

    pub fn set_address(&self, address: Option<Url>) {
        *self.address.write().expect("endpoint address lock poisoned") = address;
    }

    pub fn set_meta(&self, meta: Option<Value>) {
        *self.meta.write().expect("endpoint meta lock poisoned") = meta;
    }

    /// Run `f` against the admission metadata without cloning it.
    pub fn with_meta<R>(&self, f: impl FnOnce(Option<&Value>) -> R) -> R {
        let meta = self.meta.read().expect("endpoint meta lock poisoned");
        f(meta.as_ref())
    }

    /// Apply what the peer announced about itself.
    pub fn apply_announcement(&self, state: &PeerState) {
        self.set_ready(state.ready);
        self.set_self_paused(state.paused);
        self.set_address(state.address.clone());
    }

    /// Apply a descriptor relayed by the coordinator.
    pub fn apply_descriptor(&self, state: &PeerState) {
        self.set_ready(state.ready);
        self.set_paused(state.paused);
        self.set_address(state.address.clone());
    }

    /// Current state as advertised to the rest of the mesh.
    pub fn state(&self) -> PeerState {
        PeerState {
            ready: self.is_ready(),
            paused: self.is_paused(),
            address: self.address(),
        }
    }

    pub fn descriptor(&self) -> PeerDescriptor {
        PeerDescriptor {
            id: self.id,
            state: self.state(),
        }
    }

    // --- Bookkeeping ---

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    pub fn acks(&self) -> &AckTable {
        &self.acks
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Fail everything still waiting on this peer. Idempotent.
    pub fn mark_closed(&self) -> usize {
        if self.closed.swap(true, Ordering::SeqCst) {
            return 0;
        }
        self.acks.close();
        self.correlator.fail_all(MeshError::EndpointGone { peer: self.id })
    }

    /// Ask the receive loop for this endpoint to stop.
    pub fn shutdown(&self) {
        self.stop.send_replace(true);
    }

    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::request::RequestId;
    use crate::transport::port;

    fn endpoint() -> Arc<Endpoint> {
        let (coordinator_side, _unit_side) = port::unit();
        Endpoint::from_port(&coordinator_side)
    }

    #[test]
    fn test_selectable_requires_wired_and_ready() {
        let ep = endpoint();
        assert!(!ep.is_selectable());

        ep.set_ready(true);
        assert!(!ep.is_selectable(), "unwired endpoints are never selected");

        ep.set_wired(true);
        assert!(ep.is_selectable());
    }

    #[test]
    fn test_pause_overrides_ready() {
        let ep = endpoint();
        ep.set_wired(true);
        ep.set_ready(true);

        ep.set_paused(true);
        assert!(!ep.is_selectable());
        assert!(ep.state().paused);

        ep.set_paused(false);
        ep.set_self_paused(true);
        assert!(!ep.is_selectable());

        ep.set_self_paused(false);
        assert!(ep.is_selectable());
    }

    #[tokio::test]
    async fn test_mark_closed_fails_inflight_once() {
        let ep = endpoint();
        let rx = ep.correlator().register(RequestId::new(), None, "api");

        assert_eq!(ep.mark_closed(), 1);
        assert_eq!(ep.mark_closed(), 0);
        assert_eq!(
            rx.await.unwrap().unwrap_err(),
            MeshError::EndpointGone { peer: ep.id() }
        );
        assert!(!ep.is_selectable());
    }
}
