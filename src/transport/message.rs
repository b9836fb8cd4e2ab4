//! Messages exchanged over a port.
//!
//! Every protocol step is one variant; receive loops match exhaustively.

use url::Url;

use crate::error::MeshError;
use crate::rpc::request::{MeshRequest, MeshResponse, RequestId};
use crate::transport::port::{PeerId, Port};

/// Readiness and address advertised for a peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerState {
    /// A server is attached.
    pub ready: bool,
    /// Suspended by itself or by the coordinator. Overrides `ready`.
    pub paused: bool,
    /// External network address that supersedes in-process routing.
    pub address: Option<Url>,
}

/// Description of a peer sent to the nodes that should route to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerDescriptor {
    pub id: PeerId,
    pub state: PeerState,
}

/// Protocol messages.
#[derive(Debug)]
pub enum Message {
    /// From the coordinator: readiness query (`None`).
    /// From a unit: unsolicited readiness/address announcement (`Some`).
    Wire { state: Option<PeerState> },
    /// Answer to `Wire`: carries the state for a query, nothing for an announcement.
    WireAck { state: Option<PeerState> },
    /// Routed call. A streamed body travels inside the request.
    Request { id: RequestId, request: MeshRequest },
    /// Answer to `Request`, sent back over the port the request came in on.
    Response {
        id: RequestId,
        result: Result<MeshResponse, MeshError>,
    },
    /// Learn a peer for a service. `port` is set the first time two units are linked.
    RouteAdd {
        service: String,
        peer: PeerDescriptor,
        port: Option<Port>,
    },
    RouteAdded { peer: PeerId },
    /// Readiness/address change of an already known peer.
    RouteUpdate { service: String, peer: PeerDescriptor },
    RouteUpdated { peer: PeerId },
    /// Forget a peer for one service, or for all of them.
    RouteRemove { peer: PeerId, service: Option<String> },
    RouteRemoved { peer: PeerId },
    /// Shutdown request and its acknowledgment.
    Close,
}

impl Message {
    /// Short name used in logs and handshake errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Wire { .. } => "wire",
            Message::WireAck { .. } => "wire_ack",
            Message::Request { .. } => "request",
            Message::Response { .. } => "response",
            Message::RouteAdd { .. } => "route_add",
            Message::RouteAdded { .. } => "route_added",
            Message::RouteUpdate { .. } => "route_update",
            Message::RouteUpdated { .. } => "route_updated",
            Message::RouteRemove { .. } => "route_remove",
            Message::RouteRemoved { .. } => "route_removed",
            Message::Close => "close",
        }
    }
}

/// The acknowledgment a pending handshake waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKey {
    Wire,
    RouteAdded(PeerId),
    RouteUpdated(PeerId),
    RouteRemoved(PeerId),
    Close,
}

impl AckKey {
    /// Match an incoming message against this key.
    pub fn matches(&self, message: &Message) -> bool {
        match (self, message) {
            (AckKey::Wire, Message::WireAck { .. }) => true,
            (AckKey::RouteAdded(a), Message::RouteAdded { peer }) => a == peer,
            (AckKey::RouteUpdated(a), Message::RouteUpdated { peer }) => a == peer,
            (AckKey::RouteRemoved(a), Message::RouteRemoved { peer }) => a == peer,
            (AckKey::Close, Message::Close) => true,
            _ => false,
        }
    }

    /// Handshake step name for errors and metrics.
    pub fn step(&self) -> &'static str {
        match self {
            AckKey::Wire => "wire",
            AckKey::RouteAdded(_) => "route_add",
            AckKey::RouteUpdated(_) => "route_update",
            AckKey::RouteRemoved(_) => "route_remove",
            AckKey::Close => "close",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_key_matches_only_its_peer() {
        let a = PeerId::next();
        let b = PeerId::next();
        let key = AckKey::RouteRemoved(a);
        assert!(key.matches(&Message::RouteRemoved { peer: a }));
        assert!(!key.matches(&Message::RouteRemoved { peer: b }));
        assert!(!key.matches(&Message::RouteAdded { peer: a }));
        assert!(AckKey::Close.matches(&Message::Close));
    }
}
