//! Mesh subsystem.
//!
//! # Data Flow
//! ```text
//! add_route(service, ports)
//!     → coordinator.rs: attach endpoint, WIRE handshake
//!     → cross-wiring: open unit↔unit links, ROUTE_ADD both sides
//!     → wire.rs (in each unit): learn route, ROUTE_ADDED
//!
//! Unit dispatch:
//!     wire.rs → node.rs (select) → link port → peer wire.rs → RESPONSE
//!
//! Unit exit / remove_route:
//!     reader.rs (port closed) → coordinator.rs → ROUTE_REMOVE to every
//!     unit that knows it (book.rs) → await ROUTE_REMOVED (acks.rs)
//! ```
//!
//! # Design Decisions
//! - Every handshake wait is bounded; only close() turns a timeout into an error
//! - A unit going away while being waited on resolves the wait as "gone"
//! - Units talk to each other directly; the coordinator only wires them

pub mod acks;
pub mod book;
pub mod coordinator;
pub mod node;
pub mod reader;
pub mod wire;

pub use coordinator::{Coordinator, ErrorObserver};
pub use wire::{Dispatcher, Wire};
