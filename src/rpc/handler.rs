//! The server attached to an execution unit.
//!
//! A unit is served by an in-process handler, by a real network server at
//! an advertised address, or by nothing at all.

use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use url::Url;

use crate::rpc::request::{MeshRequest, MeshResponse};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Turns a routed request into a response.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, request: MeshRequest) -> BoxFuture<'static, Result<MeshResponse, BoxError>>;
}

impl<F, Fut> Handler for F
where
    F: Fn(MeshRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<MeshResponse, BoxError>> + Send + 'static,
{
    fn call(&self, request: MeshRequest) -> BoxFuture<'static, Result<MeshResponse, BoxError>> {
        Box::pin((self)(request))
    }
}

/// What answers requests routed to a unit.
#[derive(Clone, Default)]
pub enum Server {
    /// Nothing attached; the unit is wired but never ready.
    #[default]
    None,
    Handler(Arc<dyn Handler>),
    /// Requests bypass the mesh and go straight to this address.
    Address(Url),
}

impl Server {
    pub fn handler<H: Handler>(handler: H) -> Self {
        Server::Handler(Arc::new(handler))
    }

    pub fn is_ready(&self) -> bool {
        !matches!(self, Server::None)
    }

    pub fn address(&self) -> Option<&Url> {
        match self {
            Server::Address(url) => Some(url),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Server::None => write!(f, "Server::None"),
            Server::Handler(_) => write!(f, "Server::Handler(..)"),
            Server::Address(url) => write!(f, "Server::Address({})", url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closure_is_a_handler() {
        let server = Server::handler(|req: MeshRequest| async move {
            Ok::<_, BoxError>(MeshResponse::ok(req.path))
        });
        assert!(server.is_ready());

        let Server::Handler(handler) = server else {
            panic!("expected handler");
        };
        let response = handler.call(MeshRequest::get("/echo")).await.unwrap();
        assert_eq!(response.body.collect().await.unwrap(), "/echo");
    }

    #[test]
    fn test_address_server() {
        let url: Url = "http://127.0.0.1:9000".parse().unwrap();
        let server = Server::Address(url.clone());
        assert_eq!(server.address(), Some(&url));
        assert!(!Server::None.is_ready());
    }
}
