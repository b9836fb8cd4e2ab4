//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events with peer/service fields (logging.rs installs the subscriber)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Out of band:
//!     → non-fatal mesh failures reach Coordinator::on_error observers
//! ```
//!
//! # Design Decisions
//! - Every protocol step logs at debug, non-fatal mesh failures at warn
//! - Metrics are cheap and silent without an installed recorder

pub mod logging;
pub mod metrics;
