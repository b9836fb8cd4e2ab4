//! Request/response layer.
//!
//! # Data Flow
//! ```text
//! dispatch(service, MeshRequest)
//!     → RequestId::new()
//!     → correlator.rs (register, optional timeout)
//!     → REQUEST over the endpoint port
//!     → remote handler.rs (Handler or Address)
//!     → RESPONSE → correlator.rs (resolve) → caller
//! ```
//!
//! # Design Decisions
//! - One correlator per endpoint so a closing endpoint fails only its own work
//! - Admission hooks are synchronous; a rejection never queues

pub mod admission;
pub mod correlator;
pub mod handler;
pub mod request;

pub use admission::{AdmissionContext, AdmissionHook, LinkFilter};
pub use correlator::Correlator;
pub use handler::{BoxError, Handler, Server};
pub use request::{MeshRequest, MeshResponse, RequestId};
