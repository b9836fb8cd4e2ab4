//! Deadlines for mesh handshakes.
//!
//! Every wait on a peer acknowledgment goes through `with_deadline`, so a
//! peer that never answers can stall a handshake for at most `timeout`.

use std::future::Future;
use std::time::Duration;

/// The wrapped future did not complete in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlineElapsed(pub Duration);

impl std::fmt::Display for DeadlineElapsed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "deadline of {:?} elapsed", self.0)
    }
}

impl std::error::Error for DeadlineElapsed {}

/// Run `future` with an upper bound on its duration.
pub async fn with_deadline<F>(timeout: Duration, future: F) -> Result<F::Output, DeadlineElapsed>
where
    F: Future,
{
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| DeadlineElapsed(timeout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_elapses() {
        let result = with_deadline(Duration::from_millis(10), std::future::pending::<()>()).await;
        assert_eq!(result, Err(DeadlineElapsed(Duration::from_millis(10))));
    }

    #[tokio::test]
    async fn test_completes_within_deadline() {
        let result = with_deadline(Duration::from_secs(1), async { 7 }).await;
        assert_eq!(result, Ok(7));
    }
}
