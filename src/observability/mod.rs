//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events, stderr)
//!     → metrics.rs (apply outcomes, rollbacks, snapshot and profile gauges)
//!
//! Consumers:
//!     → journald or a log shipper (json format)
//!     → Prometheus scrape of the daemon, when enabled
//! ```
//!
//! # Design Decisions
//! - Logs go to stderr so CLI output on stdout stays machine-readable
//! - Metrics are recorded unconditionally; only the daemon installs a
//!   recorder

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::init_metrics;
