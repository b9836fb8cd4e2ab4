//! State and outgoing dispatch shared by the coordinator and every wire.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use crate::config::schema::MeshConfig;
use crate::error::MeshError;
use crate::load_balancer::endpoint::Endpoint;
use crate::mesh::reader::{spawn_reader, PeerHandler};
use crate::net::forwarder::Forwarder;
use crate::observability::metrics::{self, InflightGauge};
use crate::routing::table::RouteTable;
use crate::rpc::admission::{AdmissionContext, AdmissionHook};
use crate::rpc::request::{MeshRequest, MeshResponse, RequestId};
use crate::transport::message::Message;
use crate::transport::port::{PeerId, Port};

pub(crate) struct NodeCore {
    pub id: PeerId,
    pub config: Arc<MeshConfig>,
    pub table: Mutex<RouteTable>,
    /// Every endpoint with a running receive loop, routed or not.
    attached: Mutex<HashMap<PeerId, Arc<Endpoint>>>,
    admission: RwLock<Option<AdmissionHook>>,
    pub forwarder: Forwarder,
}

impl std::fmt::Debug for NodeCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCore")
            .field("id", &self.id)
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl NodeCore {
    pub fn new(id: PeerId, config: Arc<MeshConfig>) -> Self {
        Self {
            id,
            table: Mutex::new(RouteTable::new(config.domain.clone())),
            config,
            attached: Mutex::new(HashMap::new()),
            admission: RwLock::new(None),
            forwarder: Forwarder::new(),
        }
    }

    pub fn table(&self) -> std::sync::MutexGuard<'_, RouteTable> {
        self.table.lock().expect("route table mutex poisoned")
    }

    pub fn normalize(&self, service: &str) -> String {
        crate::routing::table::normalize(self.config.domain.as_deref(), service)
    }

    pub fn set_admission(&self, hook: Option<AdmissionHook>) {
        *self.admission.write().expect("admission lock poisoned") = hook;
    }

    // --- Attached endpoints ---

    /// Endpoint for the peer behind `port`, starting its receive loop the
    /// first time the peer is seen.
    ///
    /// Fails with `EndpointGone` when the port's receive half was already
    /// consumed by an endpoint that has since closed.
    pub fn attach<H: PeerHandler>(&self, handler: &Arc<H>, port: &Port) -> Result<Arc<Endpoint>, MeshError> {
        let peer = port.peer();
        let endpoint = {
            let mut attached = self.attached.lock().expect("attached mutex poisoned");
            if let Some(existing) = attached.get(&peer) {
                if !existing.is_closed() {
                    return Ok(existing.clone());
                }
            }
            let endpoint = Endpoint::from_port(port);
            attached.insert(peer, endpoint.clone());
            endpoint
        };
        if !self.start_reader(handler, port, &endpoint) {
            self.detach(&endpoint);
            endpoint.mark_closed();
            return Err(MeshError::EndpointGone { peer });
        }
        Ok(endpoint)
    }

    /// Attach `endpoint` for a fresh port, replacing and stopping any
    /// previous endpoint of the same peer.
    pub fn adopt<H: PeerHandler>(&self, handler: &Arc<H>, port: &Port, endpoint: Arc<Endpoint>) {
        let previous = self
            .attached
            .lock()
            .expect("attached mutex poisoned")
            .insert(port.peer(), endpoint.clone());
        if let Some(previous) = previous {
            if !Arc::ptr_eq(&previous, &endpoint) {
                tracing::debug!(node = %self.id, peer = %previous.id(), "Replacing endpoint");
                previous.shutdown();
            }
        }
        if !self.start_reader(handler, port, &endpoint) {
            self.detach(&endpoint);
            endpoint.mark_closed();
        }
    }

    /// Spawn the receive loop. False when the port's receiver was already taken.
    fn start_reader<H: PeerHandler>(&self, handler: &Arc<H>, port: &Port, endpoint: &Arc<Endpoint>) -> bool {
        match port.take_receiver() {
            Some(rx) => {
                tracing::debug!(node = %self.id, peer = %endpoint.id(), "Attached endpoint");
                spawn_reader(
                    handler.clone(),
                    endpoint.clone(),
                    rx,
                    self.config.queue.max_per_turn,
                );
                true
            }
            None => {
                tracing::warn!(node = %self.id, peer = %endpoint.id(), "Port receiver already taken");
                false
            }
        }
    }

    pub fn attached(&self, peer: PeerId) -> Option<Arc<Endpoint>> {
        self.attached
            .lock()
            .expect("attached mutex poisoned")
            .get(&peer)
            .cloned()
    }

    /// Forget an attached endpoint. Returns false if it was already
    /// forgotten or replaced by a newer one.
    pub fn detach(&self, endpoint: &Arc<Endpoint>) -> bool {
        let mut attached = self.attached.lock().expect("attached mutex poisoned");
        if attached
            .get(&endpoint.id())
            .is_some_and(|current| Arc::ptr_eq(current, endpoint))
        {
            attached.remove(&endpoint.id());
            true
        } else {
            false
        }
    }

    pub fn attached_endpoints(&self) -> Vec<Arc<Endpoint>> {
        let mut endpoints: Vec<_> = self
            .attached
            .lock()
            .expect("attached mutex poisoned")
            .values()
            .cloned()
            .collect();
        endpoints.sort_by_key(|e| e.id());
        endpoints
    }

    /// Service → peer ids, for introspection.
    pub fn routes(&self) -> Vec<(String, Vec<PeerId>)> {
        self.table()
            .snapshot()
            .into_iter()
            .map(|(service, endpoints)| (service, endpoints.iter().map(|e| e.id()).collect()))
            .collect()
    }

    // --- Outgoing ---

    /// Route a request to one endpoint of `service` and wait for its answer.
    pub async fn dispatch(&self, service: &str, request: MeshRequest) -> Result<MeshResponse, MeshError> {
        let service = self.normalize(service);
        let started = Instant::now();

        let result = self.dispatch_inner(&service, request).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) if e.is_load_shed() => "load_shed",
            Err(MeshError::NoTargetFound { .. }) => "no_target",
            Err(MeshError::RequestTimeout { .. }) => "timeout",
            Err(_) => "error",
        };
        metrics::record_request(&service, outcome, started.elapsed());
        result
    }

    async fn dispatch_inner(&self, service: &str, request: MeshRequest) -> Result<MeshResponse, MeshError> {
        let endpoint = self.select(service, &request)?;
        let peer = endpoint.id();

        if let Some(address) = endpoint.address() {
            return self.forwarder.forward(&address, service, request).await;
        }

        let request = request
            .into_transferable(service, self.config.streaming.max_inline_body)
            .await?;

        let id = RequestId::new();
        let correlator = endpoint.correlator().clone();
        let response = correlator.register(id, self.config.timeouts.request(), service);
        let _gauge = InflightGauge::start();

        tracing::debug!(node = %self.id, peer = %peer, service = %service, request_id = %id, "Dispatching request");
        if endpoint.send(Message::Request { id, request }).is_err() || endpoint.is_closed() {
            correlator.resolve(id, Err(MeshError::EndpointGone { peer }));
        }

        match response.await {
            Ok(result) => result,
            Err(_) => Err(MeshError::EndpointGone { peer }),
        }
    }

    fn select(&self, service: &str, request: &MeshRequest) -> Result<Arc<Endpoint>, MeshError> {
        let no_target = || MeshError::NoTargetFound {
            service: service.to_string(),
            unit: self.id,
        };

        let hook = self.admission.read().expect("admission lock poisoned").clone();
        let table = self.table();
        let route = table.route(service).ok_or_else(no_target)?;

        let Some(hook) = hook else {
            return route.next().ok_or_else(no_target);
        };

        if !route.has_selectable() {
            return Err(no_target());
        }
        route
            .find_accepting(|endpoint| {
                endpoint.with_meta(|meta| {
                    hook(&AdmissionContext {
                        service,
                        method: &request.method,
                        path: &request.path,
                        headers: &request.headers,
                        peer: endpoint.id(),
                        meta,
                    })
                })
            })
            .ok_or_else(|| {
                metrics::record_load_shed(service);
                tracing::debug!(node = %self.id, service = %service, "Every endpoint rejected the request");
                MeshError::LoadShed {
                    service: service.to_string(),
                }
            })
    }

    /// Deliver a RESPONSE to whoever is waiting on it.
    pub fn resolve_response(
        &self,
        endpoint: &Endpoint,
        id: RequestId,
        result: Result<MeshResponse, MeshError>,
    ) {
        if !endpoint.correlator().resolve(id, result) {
            tracing::debug!(node = %self.id, peer = %endpoint.id(), request_id = %id, "Response for unknown request ignored");
        }
    }
}
