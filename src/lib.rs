//! In-process service mesh for execution units.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod load_balancer;
pub mod mesh;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod rpc;
pub mod transport;

pub use config::schema::MeshConfig;
pub use error::MeshError;
pub use lifecycle::Shutdown;
pub use mesh::{Coordinator, Dispatcher, Wire};
pub use rpc::{BoxError, MeshRequest, MeshResponse, Server};
pub use transport::{Body, PeerId, Port};
