//! Dispatch over an advertised network address.
//!
//! When an endpoint advertises a real address, callers skip the mesh port
//! and send the request straight to that address over HTTP.

use axum::http::header::CONTENT_LENGTH;
use axum::http::{Request, Uri};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use url::Url;

use crate::error::MeshError;
use crate::rpc::request::{MeshRequest, MeshResponse};
use crate::transport::body::Body;

/// HTTP client shared by every dispatch of one node.
#[derive(Clone)]
pub struct Forwarder {
    client: Client<HttpConnector, axum::body::Body>,
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder").finish_non_exhaustive()
    }
}

impl Forwarder {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client }
    }

    /// Send `request` to `address`. The response body streams back.
    pub async fn forward(
        &self,
        address: &Url,
        service: &str,
        request: MeshRequest,
    ) -> Result<MeshResponse, MeshError> {
        let uri = target_uri(address, &request.path)?;
        let MeshRequest {
            method,
            headers,
            body,
            ..
        } = request;

        let body = match body {
            Body::Empty => axum::body::Body::empty(),
            Body::Full(bytes) => axum::body::Body::from(bytes),
            Body::Stream(reader) => axum::body::Body::from_stream(reader.into_stream()),
        };

        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(target) = builder.headers_mut() {
            target.extend(headers);
        }
        let request = builder.body(body).map_err(|e| forward_error(address, e))?;

        tracing::debug!(service = %service, address = %address, "Dispatching over network address");
        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| forward_error(address, e))?;

        let (parts, incoming) = response.into_parts();
        let length = parts
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let body = Body::from_stream(axum::body::Body::new(incoming).into_data_stream(), length);

        Ok(MeshResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}

impl Default for Forwarder {
    fn default() -> Self {
        Self::new()
    }
}

fn forward_error(address: &Url, error: impl std::fmt::Display) -> MeshError {
    MeshError::Forward {
        address: address.to_string(),
        reason: error.to_string(),
    }
}

/// Join the request path (and query) onto the advertised address.
fn target_uri(address: &Url, path: &str) -> Result<Uri, MeshError> {
    if !matches!(address.scheme(), "http") {
        return Err(MeshError::InvalidAddress(address.to_string()));
    }
    let target = address
        .join(path)
        .map_err(|_| MeshError::InvalidAddress(format!("{}{}", address, path)))?;
    target
        .as_str()
        .parse()
        .map_err(|_| MeshError::InvalidAddress(target.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_uri_joins_path_and_query() {
        let address: Url = "http://127.0.0.1:3000".parse().unwrap();
        let uri = target_uri(&address, "/users?id=7").unwrap();
        assert_eq!(uri.to_string(), "http://127.0.0.1:3000/users?id=7");
    }

    #[test]
    fn test_non_http_address_rejected() {
        let address: Url = "ftp://127.0.0.1:3000".parse().unwrap();
        assert!(matches!(
            target_uri(&address, "/"),
            Err(MeshError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_address_is_forward_error() {
        let forwarder = Forwarder::new();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let address: Url = format!("http://{}", addr).parse().unwrap();
        let err = forwarder
            .forward(&address, "api", MeshRequest::get("/"))
            .await
            .unwrap_err();
        assert!(matches!(err, MeshError::Forward { .. }));
    }
}
