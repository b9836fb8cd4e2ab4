//! The node inside an execution unit.
//!
//! A `Wire` owns the unit side of the coordinator port. It answers the
//! coordinator's handshakes, keeps the unit's route table in step with the
//! mesh, serves requests routed to the unit and dispatches the unit's own
//! outgoing requests directly to peer units over mesh links.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tokio::sync::OnceCell;

use crate::config::schema::MeshConfig;
use crate::error::MeshError;
use crate::load_balancer::endpoint::Endpoint;
use crate::mesh::acks::request_ack;
use crate::mesh::node::NodeCore;
use crate::mesh::reader::PeerHandler;
use crate::net::inflight::InflightTracker;
use crate::resilience::timeouts::with_deadline;
use crate::rpc::admission::AdmissionContext;
use crate::rpc::handler::Server;
use crate::rpc::request::{MeshRequest, MeshResponse, RequestId};
use crate::transport::message::{AckKey, Message, PeerDescriptor, PeerState};
use crate::transport::port::{PeerId, Port};

struct WireInner {
    core: NodeCore,
    /// Endpoint for the coordinator.
    parent: Arc<Endpoint>,
    server: RwLock<Server>,
    accepting: AtomicBool,
    serving: InflightTracker,
    closed: OnceCell<()>,
}

/// Mesh node of one execution unit. Cheap to clone.
#[derive(Clone)]
pub struct Wire {
    inner: Arc<WireInner>,
}

/// Outgoing dispatch handle that does not keep the unit's node alive.
///
/// Handed to the server factory in [`Wire::build`] so a handler can call
/// other services of the mesh.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Weak<WireInner>,
}

impl Dispatcher {
    pub async fn dispatch(&self, service: &str, request: MeshRequest) -> Result<MeshResponse, MeshError> {
        let inner = self.inner.upgrade().ok_or(MeshError::Closed)?;
        inner.core.dispatch(service, request).await
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl std::fmt::Debug for Wire {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wire")
            .field("id", &self.inner.core.id)
            .field("server", &self.inner.server)
            .finish_non_exhaustive()
    }
}

impl Wire {
    /// Attach a node to the unit side of a coordinator port.
    ///
    /// Must run inside a tokio runtime; the receive loop is spawned on it.
    pub fn new(port: Port, server: Server, config: MeshConfig) -> Self {
        Self::build(port, config, |_| server)
    }

    /// Like [`Wire::new`], with the server created from a dispatcher bound
    /// to this node.
    pub fn build<F>(port: Port, config: MeshConfig, make_server: F) -> Self
    where
        F: FnOnce(Dispatcher) -> Server,
    {
        let parent = Endpoint::from_port(&port);
        // The coordinator port is wired by construction.
        parent.set_wired(true);
        parent.set_ready(true);

        let inner = Arc::new_cyclic(|weak: &Weak<WireInner>| {
            let server = make_server(Dispatcher { inner: weak.clone() });
            WireInner {
                core: NodeCore::new(port.local(), Arc::new(config)),
                parent: parent.clone(),
                server: RwLock::new(server),
                accepting: AtomicBool::new(true),
                serving: InflightTracker::new(),
                closed: OnceCell::new(),
            }
        });
        inner.core.adopt(&inner, &port, parent);
        tracing::debug!(unit = %inner.core.id, "Wire attached");

        Self { inner }
    }

    pub fn id(&self) -> PeerId {
        self.inner.core.id
    }

    /// Route a request from this unit.
    pub async fn dispatch(&self, service: &str, request: MeshRequest) -> Result<MeshResponse, MeshError> {
        self.inner.core.dispatch(service, request).await
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Readiness and address this unit advertises.
    pub fn state(&self) -> PeerState {
        self.inner.state()
    }

    /// Swap the server and announce the new readiness and address.
    pub async fn replace_server(&self, server: Server) -> Result<(), MeshError> {
        tracing::info!(unit = %self.id(), server = ?server, "Replacing server");
        *self.inner.server.write().expect("server lock poisoned") = server;
        self.inner.announce().await
    }

    /// Stop (or resume) receiving application requests from the mesh.
    pub async fn set_accepting(&self, accepting: bool) -> Result<(), MeshError> {
        self.inner.accepting.store(accepting, Ordering::SeqCst);
        tracing::info!(unit = %self.id(), accepting, "Unit flow control changed");
        self.inner.announce().await
    }

    /// Install a synchronous admission hook for this unit's own dispatch.
    pub fn set_admission<F>(&self, hook: F)
    where
        F: Fn(&AdmissionContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.inner.core.set_admission(Some(Arc::new(hook)));
    }

    /// Service → peer ids this unit can route to.
    pub fn routes(&self) -> Vec<(String, Vec<PeerId>)> {
        self.inner.core.routes()
    }

    /// Requests this unit is currently serving.
    pub fn inflight_incoming(&self) -> u64 {
        self.inner.serving.active_count()
    }

    /// Leave the mesh gracefully: unroute, drain served requests, notify
    /// the coordinator and drop mesh links.
    pub async fn close(&self) {
        self.inner.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.initialized()
    }
}

impl WireInner {
    fn state(&self) -> PeerState {
        let server = self.server.read().expect("server lock poisoned");
        PeerState {
            ready: server.is_ready(),
            paused: !self.accepting.load(Ordering::SeqCst),
            address: server.address().cloned(),
        }
    }

    async fn announce(&self) -> Result<(), MeshError> {
        let message = Message::Wire {
            state: Some(self.state()),
        };
        request_ack(&self.parent, message, AckKey::Wire, self.core.config.timeouts.mesh())
            .await
            .map(|_| ())
    }

    async fn close(&self) {
        self.closed.get_or_init(|| self.leave_mesh()).await;
        // Every CLOSE from the coordinator gets its own answer.
        let _ = self.parent.send(Message::Close);
    }

    async fn leave_mesh(&self) {
        let id = self.core.id;
        tracing::info!(unit = %id, "Unit closing");

        let leave = Message::RouteRemove {
            peer: id,
            service: None,
        };
        let timeout = self.core.config.timeouts.mesh();
        if let Err(err) = request_ack(&self.parent, leave, AckKey::RouteRemoved(id), timeout).await {
            tracing::warn!(unit = %id, error = %err, "Coordinator did not confirm removal");
        }

        self.serving.wait_idle().await;

        for endpoint in self.core.attached_endpoints() {
            if Arc::ptr_eq(&endpoint, &self.parent) {
                continue;
            }
            endpoint.shutdown();
            self.core.detach(&endpoint);
            self.core.table().remove_endpoints_for_peer(endpoint.id());
        }
        tracing::info!(unit = %id, "Unit closed");
    }

    // --- Incoming requests ---

    fn serve(self: &Arc<Self>, endpoint: &Arc<Endpoint>, id: RequestId, request: MeshRequest) {
        let guard = self.serving.track(id);
        let server = self.server.read().expect("server lock poisoned").clone();
        let this = self.clone();
        let endpoint = endpoint.clone();

        tokio::spawn(async move {
            let service = request
                .headers
                .get(axum::http::header::HOST)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            tracing::debug!(unit = %this.core.id, from = %endpoint.id(), service = %service, request_id = %id, "Serving request");

            let result = match server {
                Server::None => Err(MeshError::NoServer {
                    service,
                    unit: this.core.id,
                }),
                Server::Handler(handler) => match handler.call(request).await {
                    Ok(response) => response
                        .into_transferable(this.core.config.streaming.max_inline_body)
                        .await
                        .map_err(MeshError::from),
                    Err(err) => Err(MeshError::Remote(err.to_string())),
                },
                Server::Address(address) => this.core.forwarder.forward(&address, &service, request).await,
            };

            if endpoint.send(Message::Response { id, result }).is_err() {
                tracing::debug!(request_id = %id, "Caller gone before response");
            }
            drop(guard);
        });
    }

    // --- Route maintenance ---

    fn route_add(self: &Arc<Self>, service: String, peer: PeerDescriptor, port: Option<Port>) {
        let endpoint = match port {
            Some(port) => {
                let endpoint = Endpoint::from_port(&port);
                self.core.adopt(self, &port, endpoint.clone());
                Some(endpoint)
            }
            None => self.core.attached(peer.id),
        };

        match endpoint {
            Some(endpoint) => {
                endpoint.apply_descriptor(&peer.state);
                endpoint.set_wired(true);
                if self.core.table().add_endpoint(&service, endpoint) {
                    tracing::debug!(unit = %self.core.id, service = %service, peer = %peer.id, "Learned route");
                }
            }
            None => {
                tracing::warn!(unit = %self.core.id, peer = %peer.id, "Route to a peer without a link ignored");
            }
        }
        let _ = self.parent.send(Message::RouteAdded { peer: peer.id });
    }

    fn route_update(&self, service: String, peer: PeerDescriptor) {
        if !self.core.table().update_endpoint(&service, peer.id, &peer.state) {
            if let Some(endpoint) = self.core.attached(peer.id) {
                endpoint.apply_descriptor(&peer.state);
            }
        }
        tracing::debug!(
            unit = %self.core.id,
            service = %service,
            peer = %peer.id,
            ready = peer.state.ready,
            paused = peer.state.paused,
            "Route updated"
        );
        let _ = self.parent.send(Message::RouteUpdated { peer: peer.id });
    }

    async fn route_remove(self: Arc<Self>, peer: PeerId, service: Option<String>) {
        match service {
            Some(service) => {
                self.core.table().remove_endpoint(&service, peer);
                tracing::debug!(unit = %self.core.id, service = %service, peer = %peer, "Forgot route");
            }
            None => {
                self.core.table().remove_endpoints_for_peer(peer);
                if let Some(link) = self.core.attached(peer) {
                    let correlator = link.correlator().clone();
                    if with_deadline(self.core.config.timeouts.mesh(), correlator.drain())
                        .await
                        .is_err()
                    {
                        tracing::warn!(unit = %self.core.id, peer = %peer, pending = correlator.len(), "Dropping link with requests in flight");
                    }
                    self.core.detach(&link);
                    link.shutdown();
                }
                tracing::debug!(unit = %self.core.id, peer = %peer, "Forgot peer");
            }
        }
        let _ = self.parent.send(Message::RouteRemoved { peer });
    }
}

impl PeerHandler for WireInner {
    fn on_message(self: &Arc<Self>, endpoint: &Arc<Endpoint>, message: Message) {
        let from_parent = Arc::ptr_eq(endpoint, &self.parent);

        match message {
            Message::Request { id, request } => self.serve(endpoint, id, request),
            Message::Response { id, result } => self.core.resolve_response(endpoint, id, result),
            Message::Wire { state: None } if from_parent => {
                let _ = endpoint.send(Message::WireAck {
                    state: Some(self.state()),
                });
            }
            Message::RouteAdd { service, peer, port } if from_parent => {
                self.route_add(service, peer, port);
            }
            Message::RouteUpdate { service, peer } if from_parent => {
                self.route_update(service, peer);
            }
            Message::RouteRemove { peer, service } if from_parent => {
                tokio::spawn(self.clone().route_remove(peer, service));
            }
            Message::Close if from_parent => {
                let this = self.clone();
                tokio::spawn(async move { this.close().await });
            }
            Message::RouteRemoved { peer } if from_parent && peer == self.core.id => {
                tracing::debug!(unit = %self.core.id, "Unit unrouted by coordinator");
            }
            other => {
                tracing::debug!(
                    unit = %self.core.id,
                    from = %endpoint.id(),
                    message = other.kind(),
                    "Unexpected message ignored"
                );
            }
        }
    }

    fn on_closed(self: &Arc<Self>, endpoint: &Arc<Endpoint>) {
        if Arc::ptr_eq(endpoint, &self.parent) {
            tracing::warn!(unit = %self.core.id, "Coordinator port closed");
            return;
        }
        if self.core.detach(endpoint) {
            let removed = self.core.table().remove_endpoints_for_peer(endpoint.id());
            tracing::debug!(unit = %self.core.id, peer = %endpoint.id(), routes = removed.len(), "Mesh link closed");
        }
    }
}
