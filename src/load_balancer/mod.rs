//! Endpoint selection subsystem.
//!
//! # Data Flow
//! ```text
//! dispatch(service)
//!     → routing table lookup → RoundRobin for the service
//!     → No admission hook: round_robin.rs next() (skip unwired/unready/paused)
//!     → Admission hook: round_robin.rs find_accepting() (first endpoint the hook admits)
//!     → endpoint.rs (port, correlator, address)
//! ```
//!
//! # Design Decisions
//! - Selection never blocks and never queues
//! - Paused endpoints stay in the route and keep receiving mesh traffic
//! - Endpoint state is atomic so selection reads it without extra locks

pub mod endpoint;
pub mod round_robin;

pub use endpoint::Endpoint;
pub use round_robin::RoundRobin;
