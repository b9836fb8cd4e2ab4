//! Pending acknowledgment sets.
//!
//! A handshake registers a waiter keyed by the acknowledgment it expects,
//! then sends its message. The endpoint's receive loop offers every
//! incoming message to the table first; the oldest matching waiter wins.
//! When the endpoint goes away all waiters resolve as "gone".

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::error::MeshError;
use crate::load_balancer::endpoint::Endpoint;
use crate::observability::metrics;
use crate::resilience::timeouts::with_deadline;
use crate::transport::message::{AckKey, Message};

#[derive(Debug)]
struct Waiter {
    seq: u64,
    key: AckKey,
    tx: oneshot::Sender<Message>,
}

#[derive(Debug, Default)]
struct Waiters {
    list: Vec<Waiter>,
    closed: bool,
}

/// Outstanding acknowledgments expected from one endpoint.
#[derive(Debug, Default)]
pub struct AckTable {
    seq: AtomicU64,
    waiters: Mutex<Waiters>,
}

impl AckTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter. `None` if the endpoint is already gone.
    pub fn register(&self, key: AckKey) -> Option<(u64, oneshot::Receiver<Message>)> {
        let mut waiters = self.waiters.lock().expect("ack table mutex poisoned");
        if waiters.closed {
            return None;
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        waiters.list.push(Waiter { seq, key, tx });
        Some((seq, rx))
    }

    /// Hand `message` to the oldest matching waiter, or give it back.
    pub fn complete(&self, message: Message) -> Result<(), Message> {
        let waiter = {
            let mut waiters = self.waiters.lock().expect("ack table mutex poisoned");
            let Some(pos) = waiters.list.iter().position(|w| w.key.matches(&message)) else {
                return Err(message);
            };
            waiters.list.remove(pos)
        };
        // A waiter whose deadline just fired has dropped its receiver.
        let _ = waiter.tx.send(message);
        Ok(())
    }

    pub fn cancel(&self, seq: u64) {
        let mut waiters = self.waiters.lock().expect("ack table mutex poisoned");
        waiters.list.retain(|w| w.seq != seq);
    }

    /// Resolve every current and future waiter as "gone".
    pub fn close(&self) {
        let mut waiters = self.waiters.lock().expect("ack table mutex poisoned");
        waiters.closed = true;
        waiters.list.clear();
    }

    pub fn pending(&self) -> usize {
        self.waiters.lock().expect("ack table mutex poisoned").list.len()
    }
}

/// An acknowledgment registered before its message was sent.
#[derive(Debug)]
pub struct PendingAck {
    seq: u64,
    key: AckKey,
    rx: oneshot::Receiver<Message>,
}

/// Register the waiter for `key` and send `message`, without waiting.
///
/// `None` when the endpoint is already gone. Callers that must order
/// sends against other state changes call this under their lock and
/// `wait_ack` after releasing it.
pub fn send_for_ack(endpoint: &Endpoint, message: Message, key: AckKey) -> Option<PendingAck> {
    let peer = endpoint.id();
    let Some((seq, rx)) = endpoint.acks().register(key) else {
        tracing::debug!(peer = %peer, step = key.step(), "Endpoint already gone, skipping handshake");
        return None;
    };

    tracing::debug!(peer = %peer, message = message.kind(), "Sending handshake message");
    if endpoint.send(message).is_err() {
        endpoint.acks().cancel(seq);
        return None;
    }
    Some(PendingAck { seq, key, rx })
}

/// Wait for a registered acknowledgment.
///
/// Returns `Ok(None)` when the endpoint goes away before answering.
pub async fn wait_ack(
    endpoint: &Endpoint,
    pending: PendingAck,
    timeout: Duration,
) -> Result<Option<Message>, MeshError> {
    let PendingAck { seq, key, rx } = pending;
    match with_deadline(timeout, rx).await {
        Ok(Ok(ack)) => Ok(Some(ack)),
        Ok(Err(_)) => Ok(None),
        Err(_) => {
            endpoint.acks().cancel(seq);
            metrics::record_handshake_failure(key.step());
            Err(MeshError::HandshakeTimeout {
                peer: endpoint.id(),
                step: key.step(),
            })
        }
    }
}

/// Send `message` to `endpoint` and wait for the acknowledgment `key`.
///
/// Returns `Ok(None)` when the endpoint goes away before answering.
pub async fn request_ack(
    endpoint: &Endpoint,
    message: Message,
    key: AckKey,
    timeout: Duration,
) -> Result<Option<Message>, MeshError> {
    match send_for_ack(endpoint, message, key) {
        Some(pending) => wait_ack(endpoint, pending, timeout).await,
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::port::{self, PeerId};

    #[tokio::test]
    async fn test_ack_resolves_oldest_matching_waiter() {
        let table = AckTable::new();
        let peer = PeerId::next();
        let (_, first) = table.register(AckKey::RouteRemoved(peer)).unwrap();
        let (_, second) = table.register(AckKey::RouteRemoved(peer)).unwrap();

        assert!(table.complete(Message::RouteRemoved { peer }).is_ok());
        assert!(matches!(first.await, Ok(Message::RouteRemoved { .. })));
        assert_eq!(table.pending(), 1);
        drop(second);
    }

    #[test]
    fn test_unmatched_message_is_returned() {
        let table = AckTable::new();
        table.register(AckKey::Wire).unwrap();
        let back = table.complete(Message::Close).unwrap_err();
        assert!(matches!(back, Message::Close));
    }

    #[tokio::test]
    async fn test_close_resolves_waiters_as_gone() {
        let table = AckTable::new();
        let (_, rx) = table.register(AckKey::Close).unwrap();
        table.close();
        assert!(rx.await.is_err());
        assert!(table.register(AckKey::Close).is_none());
    }

    #[tokio::test]
    async fn test_request_ack_times_out() {
        let (coordinator_side, _unit_side) = port::unit();
        let endpoint = Endpoint::from_port(&coordinator_side);

        let err = request_ack(
            &endpoint,
            Message::Wire { state: None },
            AckKey::Wire,
            Duration::from_millis(20),
        )
        .await
        .unwrap_err();

        assert_eq!(
            err,
            MeshError::HandshakeTimeout {
                peer: coordinator_side.peer(),
                step: "wire"
            }
        );
        assert_eq!(endpoint.acks().pending(), 0);
    }

    #[tokio::test]
    async fn test_ack_sent_before_wait_is_not_lost() {
        let (coordinator_side, unit_side) = port::unit();
        let mut rx = unit_side.take_receiver().unwrap();
        let endpoint = Endpoint::from_port(&coordinator_side);

        let pending = send_for_ack(&endpoint, Message::Close, AckKey::Close).unwrap();
        assert!(matches!(rx.recv().await, Some(Message::Close)));

        // The answer arrives before anyone waits on it.
        endpoint.acks().complete(Message::Close).unwrap();
        let ack = wait_ack(&endpoint, pending, Duration::from_millis(50)).await.unwrap();
        assert!(matches!(ack, Some(Message::Close)));
    }

    #[tokio::test]
    async fn test_request_ack_to_dropped_peer_is_gone() {
        let (coordinator_side, unit_side) = port::unit();
        drop(unit_side);
        let endpoint = Endpoint::from_port(&coordinator_side);

        let result = request_ack(&endpoint, Message::Close, AckKey::Close, Duration::from_secs(5)).await;
        assert!(matches!(result, Ok(None)));
    }
}
