#![forbid(unsafe_code)]
#![warn(
    unused,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Telemetry primitives shared across the cairn workspace.
//!
//! Logging setup, the Prometheus registry, and the process-wide span live here
//! so every crate reports through the same channels.

pub mod context;
pub mod error;
pub mod init;
pub mod metrics;

pub use context::GlobalContextGuard;
pub use error::{Result, TelemetryError};
pub use init::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, build_sha, init_logging};
pub use metrics::{Metrics, MetricsSnapshot};
