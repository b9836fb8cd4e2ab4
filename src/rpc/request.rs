//! Request and response descriptors routed through the mesh.

use axum::http::header::{HeaderName, HeaderValue, CONNECTION, HOST, TRANSFER_ENCODING};
use axum::http::{HeaderMap, Method, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::transport::body::Body;
use crate::transport::stream::StreamError;

/// Global counter for request IDs.
/// Relaxed ordering is enough since only uniqueness matters.
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Correlation id of a routed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    /// Generate a new unique request ID.
    pub fn new() -> Self {
        Self(REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// A routed call.
#[derive(Debug)]
pub struct MeshRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Body,
}

impl MeshRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: Body::Empty,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: impl Into<Body>) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Prepare the request for crossing the mesh: drop hop-by-hop headers,
    /// set `host` to the target service and inline small streamed bodies.
    pub(crate) async fn into_transferable(
        mut self,
        service: &str,
        max_inline: usize,
    ) -> Result<Self, StreamError> {
        self.headers.remove(CONNECTION);
        self.headers.remove(TRANSFER_ENCODING);
        if let Ok(host) = HeaderValue::from_str(service) {
            self.headers.insert(HOST, host);
        }
        self.body = self.body.inline_if_small(max_inline).await?;
        Ok(self)
    }
}

/// The answer to a routed call.
#[derive(Debug)]
pub struct MeshResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

impl MeshResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Body::Empty,
        }
    }

    pub fn ok(body: impl Into<Body>) -> Self {
        Self::new(StatusCode::OK).with_body(body)
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub(crate) async fn into_transferable(mut self, max_inline: usize) -> Result<Self, StreamError> {
        self.headers.remove(CONNECTION);
        self.headers.remove(TRANSFER_ENCODING);
        self.body = self.body.inline_if_small(max_inline).await?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[tokio::test]
    async fn test_transferable_request_scrubs_hop_headers() {
        let request = MeshRequest::post("/jobs", "payload")
            .with_header(CONNECTION, HeaderValue::from_static("keep-alive"))
            .with_header(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));

        let request = request.into_transferable("jobs.local", 1024).await.unwrap();
        assert!(request.headers.get(CONNECTION).is_none());
        assert!(request.headers.get(TRANSFER_ENCODING).is_none());
        assert_eq!(request.headers.get(HOST).unwrap(), "jobs.local");
    }
}
