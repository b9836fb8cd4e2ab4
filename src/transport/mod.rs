//! In-process message transport.
//!
//! # Data Flow
//! ```text
//! Coordinator ──Port──▶ Unit        (one pair per execution unit)
//! Unit        ──Port──▶ Unit        (one pair per linked unit pair)
//! Body::Stream ──pipe──▶ StreamReader (one pair per streamed body)
//! ```
//!
//! # Responsibilities
//! - Ordered, reliable delivery between two nodes
//! - Carry protocol messages and streamed bodies
//! - Surface channel closure to the receive loop

pub mod body;
pub mod message;
pub mod port;
pub mod stream;

pub use body::Body;
pub use message::{Message, PeerDescriptor, PeerState};
pub use port::{unit, PeerId, Port};
pub use stream::{pipe, StreamError, StreamReader, StreamWriter};
