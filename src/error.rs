//! Error types shared by every subsystem.
//!
//! # Design Decisions
//! - Request-path errors (`NoTargetFound`, `LoadShed`, `RequestTimeout`,
//!   `EndpointGone`) are returned to the specific caller and never retried here
//! - Mesh-path errors (`HandshakeTimeout`) only reach the out-of-band observer
//! - `Clone` so one failure can fan out to every waiter of an endpoint

use std::time::Duration;
use thiserror::Error;

use crate::transport::port::PeerId;
use crate::transport::stream::StreamError;

/// Errors produced by the mesh.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MeshError {
    /// No ready endpoint serves the service.
    #[error("No target found for {service} in unit {unit}")]
    NoTargetFound { service: String, unit: PeerId },

    /// The admission hook rejected every candidate endpoint.
    #[error("Service Unavailable - Load Shedding ({service})")]
    LoadShed { service: String },

    /// No response arrived within the configured deadline.
    #[error("Timeout while waiting for a response from {service} after {after:?}")]
    RequestTimeout { service: String, after: Duration },

    /// The endpoint went away while the request was in flight.
    #[error("Endpoint {peer} exited before sending a response")]
    EndpointGone { peer: PeerId },

    /// A peer did not acknowledge a mesh handshake in time.
    #[error("Timeout waiting for {step} acknowledgment from {peer}")]
    HandshakeTimeout { peer: PeerId, step: &'static str },

    /// A peer did not acknowledge CLOSE in time.
    #[error("Timeout waiting for close acknowledgment from {peer}")]
    CloseTimeout { peer: PeerId },

    /// Route mutation attempted after close.
    #[error("The dispatcher has been closed")]
    Closed,

    /// The peer is not attached to this node.
    #[error("Unknown peer {0}")]
    UnknownPeer(PeerId),

    /// The remote adapter failed to produce a response.
    #[error("Remote error: {0}")]
    Remote(String),

    /// The receiving unit has no server attached.
    #[error("No responding server found for {service} in unit {unit}")]
    NoServer { service: String, unit: PeerId },

    /// Body transfer failed.
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Dispatch over an advertised network address failed.
    #[error("Network dispatch to {address} failed: {reason}")]
    Forward { address: String, reason: String },

    /// An advertised address could not be parsed.
    #[error("Invalid address {0}")]
    InvalidAddress(String),
}

impl MeshError {
    /// Stable error code for callers that branch on the failure kind.
    pub fn code(&self) -> &'static str {
        match self {
            MeshError::NoTargetFound { .. } => "NO_TARGET",
            MeshError::LoadShed { .. } => "LOAD_SHEDDING",
            MeshError::RequestTimeout { .. } => "REQUEST_TIMEOUT",
            MeshError::EndpointGone { .. } => "ENDPOINT_GONE",
            MeshError::HandshakeTimeout { .. } => "MESH_HANDSHAKE_TIMEOUT",
            MeshError::CloseTimeout { .. } => "CLOSE_TIMEOUT",
            MeshError::Closed => "CLOSED",
            MeshError::UnknownPeer(_) => "UNKNOWN_PEER",
            MeshError::Remote(_) => "REMOTE",
            MeshError::NoServer { .. } => "NO_SERVER",
            MeshError::Stream(_) => "STREAM",
            MeshError::Forward { .. } => "FORWARD",
            MeshError::InvalidAddress(_) => "INVALID_ADDRESS",
        }
    }

    /// HTTP status a caller would surface for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            MeshError::LoadShed { .. } | MeshError::NoTargetFound { .. } => 503,
            MeshError::RequestTimeout { .. } => 504,
            _ => 502,
        }
    }

    pub fn is_load_shed(&self) -> bool {
        matches!(self, MeshError::LoadShed { .. })
    }
}
