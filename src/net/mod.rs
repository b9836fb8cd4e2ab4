//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Outgoing dispatch to an endpoint with an advertised address:
//!     → forwarder.rs (HTTP client, streamed bodies both ways)
//!
//! Incoming REQUEST on a unit:
//!     → inflight.rs (guard per served request)
//!     → close() waits for the count to reach zero
//! ```
//!
//! # Design Decisions
//! - One pooled HTTP client per node
//! - Served requests are tracked with RAII guards so every exit path counts

pub mod forwarder;
pub mod inflight;

pub use forwarder::Forwarder;
pub use inflight::{InflightGuard, InflightTracker};
