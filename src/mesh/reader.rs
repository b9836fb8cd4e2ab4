//! Per-endpoint receive loop.
//!
//! Messages from one port are handled strictly in arrival order. After
//! `max_per_turn` requests drained without waiting, the loop yields so a
//! burst of requests cannot starve the rest of the runtime.

use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::load_balancer::endpoint::Endpoint;
use crate::transport::message::Message;

/// Node-specific message handling.
pub(crate) trait PeerHandler: Send + Sync + 'static {
    /// Handle one message that was not an awaited acknowledgment.
    /// Must not block; anything that waits is spawned.
    fn on_message(self: &Arc<Self>, endpoint: &Arc<Endpoint>, message: Message);

    /// The port closed or the endpoint was shut down.
    fn on_closed(self: &Arc<Self>, endpoint: &Arc<Endpoint>);
}

/// Counts requests handled in the current scheduling turn.
#[derive(Debug)]
pub(crate) struct TurnBudget {
    max: usize,
    used: usize,
}

impl TurnBudget {
    pub fn new(max: usize) -> Self {
        Self {
            max: max.max(1),
            used: 0,
        }
    }

    /// Count one request. True when the turn is used up and the loop should yield.
    pub fn consume(&mut self) -> bool {
        self.used += 1;
        if self.used >= self.max {
            self.used = 0;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.used = 0;
    }
}

pub(crate) fn spawn_reader<H: PeerHandler>(
    handler: Arc<H>,
    endpoint: Arc<Endpoint>,
    mut rx: mpsc::UnboundedReceiver<Message>,
    max_per_turn: usize,
) {
    tokio::spawn(async move {
        let mut stop = endpoint.stop_signal();
        let mut budget = TurnBudget::new(max_per_turn);
        let peer = endpoint.id();

        loop {
            if *stop.borrow() {
                break;
            }

            let message = match rx.try_recv() {
                Ok(message) => message,
                Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {
                    budget.reset();
                    tokio::select! {
                        message = rx.recv() => match message {
                            Some(message) => message,
                            None => break,
                        },
                        _ = stop.changed() => continue,
                    }
                }
            };

            if matches!(message, Message::Request { .. }) && budget.consume() {
                tokio::task::yield_now().await;
            }

            tracing::trace!(peer = %peer, message = message.kind(), "Received message");
            match endpoint.acks().complete(message) {
                Ok(()) => {}
                Err(message) => handler.on_message(&endpoint, message),
            }
        }

        tracing::debug!(peer = %peer, "Port closed");
        endpoint.mark_closed();
        handler.on_closed(&endpoint);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_budget_yields_every_n() {
        let mut budget = TurnBudget::new(3);
        let yields: Vec<bool> = (0..7).map(|_| budget.consume()).collect();
        assert_eq!(yields, vec![false, false, true, false, false, true, false]);

        budget.reset();
        assert!(!budget.consume());
    }

    #[test]
    fn test_zero_budget_is_clamped() {
        let mut budget = TurnBudget::new(0);
        assert!(budget.consume());
    }
}
