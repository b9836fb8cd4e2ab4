//! Synchronous admission hooks used for load shedding.

use axum::http::{HeaderMap, Method};
use serde_json::Value;
use std::sync::Arc;

use crate::transport::port::PeerId;

/// What an admission hook sees for one candidate endpoint.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionContext<'a> {
    pub service: &'a str,
    pub method: &'a Method,
    pub path: &'a str,
    pub headers: &'a HeaderMap,
    /// The candidate endpoint.
    pub peer: PeerId,
    /// Metadata given to `add_route` for this endpoint, if any.
    pub meta: Option<&'a Value>,
}

/// Per-candidate accept/reject check. Must be cheap and never block.
pub type AdmissionHook = Arc<dyn Fn(&AdmissionContext<'_>) -> bool + Send + Sync>;

/// Vetoes a mesh link between two services.
pub type LinkFilter = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;
