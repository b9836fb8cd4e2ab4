//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.
//! Every field has a default, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for a mesh node.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct MeshConfig {
    /// Canonical suffix appended to service names (e.g. ".local").
    pub domain: Option<String>,

    /// Request and handshake deadlines.
    pub timeouts: TimeoutConfig,

    /// Body transfer settings.
    pub streaming: StreamingConfig,

    /// Incoming work queue settings.
    pub queue: QueueConfig,

    /// WIRE handshake retry policy.
    pub wiring: WiringConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per-request deadline in milliseconds. Absent means no deadline.
    pub request_ms: Option<u64>,

    /// Deadline for every coordinator handshake acknowledgment.
    pub mesh_ms: u64,

    /// Per-peer deadline for the close acknowledgment.
    pub close_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_ms: None,
            mesh_ms: 5_000,
            close_ms: 10_000,
        }
    }
}

impl TimeoutConfig {
    pub fn request(&self) -> Option<Duration> {
        self.request_ms.map(Duration::from_millis)
    }

    pub fn mesh(&self) -> Duration {
        Duration::from_millis(self.mesh_ms)
    }

    pub fn close(&self) -> Duration {
        Duration::from_millis(self.close_ms)
    }
}

/// Streaming configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Bodies announced smaller than this travel inline.
    pub max_inline_body: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            max_inline_body: 32 * 1024,
        }
    }
}

/// Incoming queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Requests handled in one scheduling turn before yielding.
    pub max_per_turn: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_per_turn: 8 }
    }
}

/// WIRE handshake retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WiringConfig {
    /// Retries after a WIRE timeout. Zero reports the first timeout.
    pub retries: u32,

    /// Base delay for exponential backoff (ms).
    pub base_delay_ms: u64,

    /// Maximum backoff delay (ms).
    pub max_delay_ms: u64,
}

impl Default for WiringConfig {
    fn default() -> Self {
        Self {
            retries: 0,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Record mesh metrics.
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
        }
    }
}
