//! Incoming in-flight request tracking.
//!
//! # Responsibilities
//! - Count requests a unit is serving for other nodes
//! - Let `close()` wait until every accepted request has answered

use std::sync::Arc;
use tokio::sync::watch;

use crate::rpc::request::RequestId;

/// Tracks requests being served for graceful drain.
///
/// The count lives in a watch channel so waiters wake on every change.
#[derive(Debug, Clone)]
pub struct InflightTracker {
    count: Arc<watch::Sender<u64>>,
}

impl InflightTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            count: Arc::new(tx),
        }
    }

    /// Record a new request. Returns a guard that decrements on drop.
    pub fn track(&self, id: RequestId) -> InflightGuard {
        self.count.send_modify(|count| *count += 1);
        InflightGuard {
            count: Arc::clone(&self.count),
            id,
        }
    }

    pub fn active_count(&self) -> u64 {
        *self.count.borrow()
    }

    /// Wait until no request is being served.
    pub async fn wait_idle(&self) {
        let mut rx = self.count.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

impl Default for InflightTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks one served request. Decrements the count when dropped.
#[derive(Debug)]
pub struct InflightGuard {
    count: Arc<watch::Sender<u64>>,
    id: RequestId,
}

impl InflightGuard {
    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.count.send_modify(|count| *count -= 1);
        tracing::trace!(request_id = %self.id, "Incoming request finished");
    }
}
