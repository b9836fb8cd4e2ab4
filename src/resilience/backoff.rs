//! Exponential backoff with jitter for handshake retries.

use rand::Rng;
use std::time::Duration;

use crate::config::schema::WiringConfig;

/// Calculate exponential backoff delay with jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    // Jitter of up to 10% spreads out units wired in the same burst
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

/// Delay before WIRE retry number `attempt` (1-based), or `None` once the
/// configured retries are used up.
pub fn wiring_retry_delay(attempt: u32, config: &WiringConfig) -> Option<Duration> {
    if attempt == 0 || attempt > config.retries {
        return None;
    }
    Some(calculate_backoff(attempt, config.base_delay_ms, config.max_delay_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let b1 = calculate_backoff(1, 100, 2000);
        assert!(b1.as_millis() >= 100);

        let b2 = calculate_backoff(2, 100, 2000);
        assert!(b2.as_millis() >= 200);

        let max = calculate_backoff(10, 100, 1000);
        assert!(max.as_millis() >= 1000 && max.as_millis() < 1100);
    }

    #[test]
    fn test_no_retry_by_default() {
        let config = WiringConfig::default();
        assert_eq!(wiring_retry_delay(1, &config), None);
    }

    #[test]
    fn test_retries_stop_after_budget() {
        let config = WiringConfig {
            retries: 2,
            base_delay_ms: 50,
            max_delay_ms: 500,
        };
        assert!(wiring_retry_delay(1, &config).is_some());
        assert!(wiring_retry_delay(2, &config).unwrap() >= Duration::from_millis(100));
        assert_eq!(wiring_retry_delay(3, &config), None);
    }
}
