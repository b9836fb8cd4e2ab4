//! Per-endpoint in-flight request bookkeeping.
//!
//! Every pending entry resolves exactly once: by its response, by its
//! timeout, or by a forced failure when the endpoint goes away. Whichever
//! path removes the entry first wins; the others find nothing and no-op.

use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::AbortHandle;

use crate::error::MeshError;
use crate::rpc::request::{MeshResponse, RequestId};
use crate::transport::port::PeerId;

pub type ResponseResult = Result<MeshResponse, MeshError>;

#[derive(Debug)]
struct Pending {
    tx: oneshot::Sender<ResponseResult>,
    timer: Option<AbortHandle>,
}

/// In-flight requests sent to one endpoint.
#[derive(Debug)]
pub struct Correlator {
    peer: PeerId,
    pending: DashMap<RequestId, Pending>,
    drained: Notify,
}

impl Correlator {
    pub fn new(peer: PeerId) -> Self {
        Self {
            peer,
            pending: DashMap::new(),
            drained: Notify::new(),
        }
    }

    /// Store a pending resolution. With a timeout, a timer resolves the
    /// entry with `RequestTimeout` unless a response gets there first.
    pub fn register(
        self: &Arc<Self>,
        id: RequestId,
        timeout: Option<Duration>,
        service: &str,
    ) -> oneshot::Receiver<ResponseResult> {
        let (tx, rx) = oneshot::channel();

        let timer = timeout.map(|after| {
            let correlator: Weak<Self> = Arc::downgrade(self);
            let service = service.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                if let Some(correlator) = correlator.upgrade() {
                    if correlator.resolve(id, Err(MeshError::RequestTimeout { service, after })) {
                        tracing::debug!(request_id = %id, "Request timed out");
                    }
                }
            })
            .abort_handle()
        });

        self.pending.insert(id, Pending { tx, timer });
        rx
    }

    /// Resolve and remove a pending entry. Returns false for unknown ids.
    pub fn resolve(&self, id: RequestId, result: ResponseResult) -> bool {
        let Some((_, pending)) = self.pending.remove(&id) else {
            return false;
        };
        if let Some(timer) = pending.timer {
            timer.abort();
        }
        // The caller may have given up on the receiver already.
        let _ = pending.tx.send(result);
        self.notify_if_empty();
        true
    }

    /// Fail every pending entry with `error`.
    pub fn fail_all(&self, error: MeshError) -> usize {
        let ids: Vec<RequestId> = self.pending.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter(|id| self.resolve(*id, Err(error.clone())))
            .count()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Complete once no request is in flight.
    pub async fn drain(&self) {
        loop {
            let notified = self.drained.notified();
            if self.pending.is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn notify_if_empty(&self) {
        if self.pending.is_empty() {
            self.drained.notify_waiters();
        }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }
}
