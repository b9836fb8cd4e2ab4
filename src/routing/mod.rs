//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! addRoute / ROUTE_ADD
//!     → table.rs normalize(service)
//!     → RoundRobin per service (endpoint identity unique per route)
//!
//! Peer gone:
//!     → table.rs remove_endpoints_for_peer
//!     → removed (service, endpoint) pairs drive the removal cascade
//! ```
//!
//! # Design Decisions
//! - One table per node; nodes never share route state
//! - Routes with zero endpoints are deleted
//! - Broadcasts iterate a snapshot, never the live table

pub mod table;

pub use table::{normalize, RouteTable};
