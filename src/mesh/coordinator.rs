//! The coordinating node.
//!
//! Owns one port per execution unit, keeps every unit's route table in
//! sync, and implements flow control and graceful close.
//!
//! # Endpoint states
//! ```text
//! unwired ──WIRE──▶ wiring ──WIRE_ACK──▶ wired(ready | not ready) ──▶ removed
//!                      │                      ▲
//!                      └──timeout─────────────┘ (optimistically ready)
//! paused: orthogonal flag on any wired endpoint
//! ```
//!
//! # Lock order
//! Route table, then coordinator state, then attached endpoints. None is
//! held across an await. Mesh messages that depend on the book are sent
//! while the state lock is held.

use futures_util::future::join_all;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::config::schema::MeshConfig;
use crate::error::MeshError;
use crate::load_balancer::endpoint::Endpoint;
use crate::mesh::acks::{request_ack, send_for_ack, wait_ack, PendingAck};
use crate::mesh::book::MeshBook;
use crate::mesh::node::NodeCore;
use crate::mesh::reader::PeerHandler;
use crate::observability::metrics;
use crate::resilience::backoff::wiring_retry_delay;
use crate::resilience::timeouts::with_deadline;
use crate::rpc::admission::{AdmissionContext, LinkFilter};
use crate::rpc::request::{MeshRequest, MeshResponse};
use crate::transport::message::{AckKey, Message, PeerState};
use crate::transport::port::{self, PeerId, Port};

/// Receives non-fatal mesh failures.
pub type ErrorObserver = Arc<dyn Fn(&MeshError) + Send + Sync>;

type Ack = (Arc<Endpoint>, PendingAck);

#[derive(Debug, Default)]
struct CoordinatorState {
    book: MeshBook,
    closed: bool,
}

struct Inner {
    core: NodeCore,
    state: Mutex<CoordinatorState>,
    link_filter: RwLock<Option<LinkFilter>>,
    observers: RwLock<Vec<ErrorObserver>>,
}

/// Handle to the coordinating node. Cheap to clone.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("core", &self.inner.core)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    pub fn new(config: MeshConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                core: NodeCore::new(PeerId::COORDINATOR, Arc::new(config)),
                state: Mutex::new(CoordinatorState::default()),
                link_filter: RwLock::new(None),
                observers: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &MeshConfig {
        &self.inner.core.config
    }

    /// Install a synchronous admission hook used by `dispatch`.
    pub fn set_admission<F>(&self, hook: F)
    where
        F: Fn(&AdmissionContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.inner.core.set_admission(Some(Arc::new(hook)));
    }

    pub fn clear_admission(&self) {
        self.inner.core.set_admission(None);
    }

    /// Veto mesh links between pairs of services.
    pub fn set_link_filter<F>(&self, filter: F)
    where
        F: Fn(&str, &str) -> bool + Send + Sync + 'static,
    {
        *self.inner.link_filter.write().expect("link filter lock poisoned") = Some(Arc::new(filter));
    }

    /// Register an observer for non-fatal mesh failures.
    pub fn on_error<F>(&self, observer: F)
    where
        F: Fn(&MeshError) + Send + Sync + 'static,
    {
        self.inner
            .observers
            .write()
            .expect("observers lock poisoned")
            .push(Arc::new(observer));
    }

    /// Route `service` to the units behind `ports`.
    ///
    /// Completes once every endpoint is wired into the mesh or its
    /// handshake timed out; timeouts only reach `on_error` observers.
    pub async fn add_route<I>(&self, service: &str, ports: I, meta: Option<Value>) -> Result<(), MeshError>
    where
        I: IntoIterator<Item = Port>,
    {
        if self.inner.is_closed() {
            return Err(MeshError::Closed);
        }
        let service = self.inner.core.normalize(service);

        let adds = ports.into_iter().filter_map(|port| {
            if port.local() != PeerId::COORDINATOR {
                tracing::warn!(peer = %port.peer(), "Ignoring unit-side port passed to add_route");
                return None;
            }
            Some(self.inner.clone().add_endpoint(service.clone(), port, meta.clone()))
        });
        join_all(adds).await;
        Ok(())
    }

    /// Stop routing `service` to `peers`. Rejected after `close` unless `force`.
    pub async fn remove_route<I>(&self, service: &str, peers: I, force: bool) -> Result<(), MeshError>
    where
        I: IntoIterator<Item = PeerId>,
    {
        if self.inner.is_closed() && !force {
            return Err(MeshError::Closed);
        }
        let service = self.inner.core.normalize(service);

        let removals = peers
            .into_iter()
            .map(|peer| self.inner.clone().remove_endpoint(service.clone(), peer));
        join_all(removals).await;
        Ok(())
    }

    /// Route a request from the coordinator itself.
    pub async fn dispatch(&self, service: &str, request: MeshRequest) -> Result<MeshResponse, MeshError> {
        self.inner.core.dispatch(service, request).await
    }

    /// Suspend application traffic to a unit without unwiring it.
    pub async fn pause_endpoint(&self, peer: PeerId) -> Result<(), MeshError> {
        self.inner.set_paused(peer, true).await
    }

    pub async fn resume_endpoint(&self, peer: PeerId) -> Result<(), MeshError> {
        self.inner.set_paused(peer, false).await
    }

    /// Reject new route mutations and ask every routed unit to close.
    ///
    /// Units that disappear during the wait count as closed. Fails with
    /// the first `CloseTimeout` once every unit has answered or timed out.
    pub async fn close(&self) -> Result<(), MeshError> {
        self.inner.state().closed = true;

        let mut seen = HashSet::new();
        let endpoints: Vec<Arc<Endpoint>> = self
            .inner
            .core
            .table()
            .snapshot()
            .into_iter()
            .flat_map(|(_, endpoints)| endpoints)
            .filter(|endpoint| seen.insert(endpoint.id()))
            .collect();

        tracing::info!(units = endpoints.len(), "Closing mesh");
        let timeout = self.inner.core.config.timeouts.close();
        let closes = endpoints.iter().map(|endpoint| async move {
            request_ack(endpoint, Message::Close, AckKey::Close, timeout)
                .await
                .map(|_| ())
                .map_err(|_| MeshError::CloseTimeout { peer: endpoint.id() })
        });

        let mut first_error = None;
        for result in join_all(closes).await {
            if let Err(err) = result {
                tracing::warn!(error = %err, "Unit did not acknowledge close");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => {
                tracing::info!("Mesh closed");
                Ok(())
            }
        }
    }

    /// Accept route mutations again. Existing routes are untouched.
    pub fn restart(&self) {
        self.inner.state().closed = false;
        tracing::info!("Mesh restarted");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Service → peer ids currently routed.
    pub fn routes(&self) -> Vec<(String, Vec<PeerId>)> {
        self.inner.core.routes()
    }

    /// Wiring state and advertised state of an attached unit.
    pub fn endpoint_state(&self, peer: PeerId) -> Option<(bool, PeerState)> {
        self.inner
            .core
            .attached(peer)
            .map(|endpoint| (endpoint.is_wired(), endpoint.state()))
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new(MeshConfig::default())
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().expect("coordinator state mutex poisoned")
    }

    fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn report(&self, error: MeshError) {
        tracing::warn!(error = %error, code = error.code(), "Non-fatal mesh failure");
        let observers = self.observers.read().expect("observers lock poisoned").clone();
        for observer in observers {
            observer(&error);
        }
    }

    fn record_routes(&self) {
        metrics::record_routes(self.core.table().len());
    }

    /// Send now, wait later. Targets already gone are skipped.
    fn send_ack(acks: &mut Vec<Ack>, target: &Arc<Endpoint>, message: Message, key: AckKey) {
        if let Some(pending) = send_for_ack(target, message, key) {
            acks.push((target.clone(), pending));
        }
    }

    async fn await_acks(&self, acks: Vec<Ack>) {
        if acks.is_empty() {
            return;
        }
        let timeout = self.core.config.timeouts.mesh();
        let waits = acks
            .into_iter()
            .map(|(target, pending)| async move { wait_ack(&target, pending, timeout).await });
        for result in join_all(waits).await {
            if let Err(err) = result {
                self.report(err);
            }
        }
    }

    // --- Add ---

    async fn add_endpoint(self: Arc<Self>, service: String, port: Port, meta: Option<Value>) {
        let endpoint = match self.core.attach(&self, &port) {
            Ok(endpoint) => endpoint,
            Err(err) => {
                tracing::warn!(service = %service, peer = %port.peer(), "Port of an exited unit not routed");
                self.report(err);
                return;
            }
        };
        if meta.is_some() {
            endpoint.set_meta(meta);
        }

        if self.core.table().add_endpoint(&service, endpoint.clone()) {
            tracing::info!(service = %service, peer = %endpoint.id(), "Endpoint added to route");
            self.record_routes();
        }

        if !endpoint.is_wired() && !self.wire_endpoint(&endpoint).await {
            return;
        }
        self.cross_wire(&endpoint, &service, false).await;
    }

    /// WIRE handshake. False when cross-wiring should be skipped.
    async fn wire_endpoint(&self, endpoint: &Arc<Endpoint>) -> bool {
        let peer = endpoint.id();
        let timeout = self.core.config.timeouts.mesh();
        let mut attempt = 0;

        loop {
            match request_ack(endpoint, Message::Wire { state: None }, AckKey::Wire, timeout).await {
                Ok(Some(Message::WireAck { state })) => {
                    if let Some(state) = state {
                        endpoint.apply_announcement(&state);
                    }
                    endpoint.set_wired(true);
                    tracing::debug!(peer = %peer, ready = endpoint.is_ready(), "Endpoint wired");
                    return true;
                }
                Ok(_) => {
                    tracing::debug!(peer = %peer, "Endpoint gone before wiring completed");
                    return false;
                }
                Err(err) => {
                    attempt += 1;
                    if let Some(delay) = wiring_retry_delay(attempt, &self.core.config.wiring) {
                        tracing::warn!(peer = %peer, attempt, delay = ?delay, "WIRE handshake timed out, retrying");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    // Convergence is best effort: keep the endpoint usable.
                    endpoint.set_ready(true);
                    endpoint.set_wired(true);
                    self.report(err);
                    return false;
                }
            }
        }
    }

    /// Make `endpoint` (serving `service`) and every wired endpoint of the
    /// other services know each other. In update mode, peers that already
    /// know `endpoint` get its current state.
    async fn cross_wire(&self, endpoint: &Arc<Endpoint>, service: &str, update: bool) {
        if !endpoint.is_wired() || endpoint.is_closed() {
            return;
        }
        let me = endpoint.id();
        let filter = self.link_filter.read().expect("link filter lock poisoned").clone();
        let mut acks: Vec<Ack> = Vec::new();
        {
            // Held until every message is sent: a removal orders after these sends.
            let table = self.core.table();
            // Removed while a handshake was outstanding.
            if !table.contains(service, me) {
                tracing::debug!(service = %service, peer = %me, "Endpoint no longer routed, not cross-wiring");
                return;
            }
            let snapshot = table.snapshot();
            let mut state = self.state();
            for (other_service, others) in &snapshot {
                if other_service == service {
                    continue;
                }
                if let Some(filter) = &filter {
                    if !filter(service, other_service.as_str()) {
                        tracing::debug!(service = %service, other = %other_service, "Link vetoed by filter");
                        continue;
                    }
                }

                for other in others {
                    let them = other.id();
                    if them == me || !other.is_wired() || other.is_closed() {
                        continue;
                    }

                    let (mut mine, mut theirs) = (None, None);
                    if state.book.link(me, them) {
                        let (a, b) = port::link(me, them);
                        tracing::debug!(a = %me, b = %them, "Opening mesh link");
                        mine = Some(a);
                        theirs = Some(b);
                    }

                    if state.book.learn(me, other_service, them) {
                        Self::send_ack(
                            &mut acks,
                            endpoint,
                            Message::RouteAdd {
                                service: other_service.clone(),
                                peer: other.descriptor(),
                                port: mine,
                            },
                            AckKey::RouteAdded(them),
                        );
                    }

                    if state.book.learn(them, service, me) {
                        Self::send_ack(
                            &mut acks,
                            other,
                            Message::RouteAdd {
                                service: service.to_string(),
                                peer: endpoint.descriptor(),
                                port: theirs,
                            },
                            AckKey::RouteAdded(me),
                        );
                    } else if update {
                        Self::send_ack(
                            &mut acks,
                            other,
                            Message::RouteUpdate {
                                service: service.to_string(),
                                peer: endpoint.descriptor(),
                            },
                            AckKey::RouteUpdated(me),
                        );
                    }
                }
            }
        }

        self.await_acks(acks).await;
    }

    // --- Updates ---

    async fn on_announcement(self: Arc<Self>, endpoint: Arc<Endpoint>, announced: PeerState) {
        endpoint.apply_announcement(&announced);
        tracing::debug!(
            peer = %endpoint.id(),
            ready = announced.ready,
            paused = announced.paused,
            address = ?announced.address.as_ref().map(|a| a.as_str()),
            "Unit announced state"
        );

        if endpoint.is_wired() {
            let services = self.core.table().services_of(endpoint.id());
            for service in services {
                self.cross_wire(&endpoint, &service, true).await;
            }
        }
        let _ = endpoint.send(Message::WireAck { state: None });
    }

    async fn set_paused(&self, peer: PeerId, paused: bool) -> Result<(), MeshError> {
        let endpoint = self.core.attached(peer).ok_or(MeshError::UnknownPeer(peer))?;
        endpoint.set_paused(paused);
        tracing::info!(peer = %peer, paused, "Endpoint flow control changed");

        let mut acks = Vec::new();
        {
            let state = self.state();
            for (holder, service) in state.book.known_by(peer) {
                if let Some(target) = self.core.attached(holder) {
                    let update = Message::RouteUpdate {
                        service,
                        peer: endpoint.descriptor(),
                    };
                    Self::send_ack(&mut acks, &target, update, AckKey::RouteUpdated(peer));
                }
            }
        }
        self.await_acks(acks).await;
        Ok(())
    }

    // --- Removal ---

    async fn remove_endpoint(self: Arc<Self>, service: String, peer: PeerId) {
        let (removed, still_routed) = {
            let mut table = self.core.table();
            let removed = table.remove_endpoint(&service, peer);
            (removed, !table.services_of(peer).is_empty())
        };
        let Some(endpoint) = removed else {
            tracing::debug!(service = %service, peer = %peer, "Peer not routed under service");
            return;
        };
        tracing::info!(service = %service, peer = %peer, "Endpoint removed from route");
        self.record_routes();

        if still_routed {
            self.broadcast_removal(peer, Some(service.as_str())).await;
        } else {
            self.broadcast_removal(peer, None).await;
            let _ = endpoint.send(Message::RouteRemoved { peer });
        }
    }

    /// Tell every unit that knows `peer` (under `service`, or at all) to
    /// forget it, and wait for them.
    async fn broadcast_removal(&self, peer: PeerId, service: Option<&str>) {
        let mut acks = Vec::new();
        {
            let mut state = self.state();
            let holders = match service {
                Some(service) => state.book.forget_route(service, peer),
                None => state.book.forget_peer(peer),
            };
            for target in holders.into_iter().filter_map(|holder| self.core.attached(holder)) {
                let remove = Message::RouteRemove {
                    peer,
                    service: service.map(str::to_string),
                };
                Self::send_ack(&mut acks, &target, remove, AckKey::RouteRemoved(peer));
            }
        }
        self.await_acks(acks).await;
    }

    /// A unit asked to leave the mesh (graceful close). Allowed after close.
    async fn on_unit_leaving(self: Arc<Self>, endpoint: Arc<Endpoint>) {
        let peer = endpoint.id();
        let removed = self.core.table().remove_endpoints_for_peer(peer);
        tracing::info!(peer = %peer, routes = removed.len(), "Unit leaving the mesh");
        self.record_routes();

        self.broadcast_removal(peer, None).await;

        // Requests already sent to the unit still get their answers.
        if with_deadline(self.core.config.timeouts.mesh(), endpoint.correlator().drain())
            .await
            .is_err()
        {
            tracing::warn!(peer = %peer, pending = endpoint.correlator().len(), "Requests still in flight to leaving unit");
        }
        let _ = endpoint.send(Message::RouteRemoved { peer });
    }
}

impl PeerHandler for Inner {
    fn on_message(self: &Arc<Self>, endpoint: &Arc<Endpoint>, message: Message) {
        match message {
            Message::Response { id, result } => self.core.resolve_response(endpoint, id, result),
            Message::Wire { state: Some(state) } => {
                tokio::spawn(self.clone().on_announcement(endpoint.clone(), state));
            }
            Message::Wire { state: None } => {
                let _ = endpoint.send(Message::WireAck { state: None });
            }
            Message::RouteRemove { peer, .. } if peer == endpoint.id() => {
                tokio::spawn(self.clone().on_unit_leaving(endpoint.clone()));
            }
            Message::Request { id, request } => {
                let service = request
                    .headers
                    .get(axum::http::header::HOST)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let _ = endpoint.send(Message::Response {
                    id,
                    result: Err(MeshError::NoServer {
                        service,
                        unit: self.core.id,
                    }),
                });
            }
            Message::Close => {
                tracing::debug!(peer = %endpoint.id(), "Unit closed");
            }
            other => {
                tracing::debug!(peer = %endpoint.id(), message = other.kind(), "Unexpected message ignored");
            }
        }
    }

    fn on_closed(self: &Arc<Self>, endpoint: &Arc<Endpoint>) {
        let peer = endpoint.id();
        if !self.core.detach(endpoint) {
            return;
        }
        let removed = self.core.table().remove_endpoints_for_peer(peer);
        if !removed.is_empty() {
            tracing::info!(peer = %peer, routes = removed.len(), "Unit exited, removed from routes");
            self.record_routes();
        }
        let this = self.clone();
        tokio::spawn(async move { this.broadcast_removal(peer, None).await });
    }
}
