//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Coordinator handshake:
//!     → timeouts.rs (bounded wait for the acknowledgment)
//!     → On WIRE timeout: backoff.rs (optional retry with jittered delay)
//!     → Out of retries: report to error observers, endpoint stays usable
//! ```
//!
//! # Design Decisions
//! - Every wait on a peer has a deadline
//! - Request-path errors are never retried here; that is the caller's call
//! - WIRE retries are off unless configured

pub mod backoff;
pub mod timeouts;
