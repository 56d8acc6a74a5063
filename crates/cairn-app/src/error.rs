//! # Design
//!
//! - Centralize application-level errors for bootstrap and shutdown.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use std::io;

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be loaded.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: cairn_config::ConfigError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: cairn_telemetry::TelemetryError,
    },
    /// The durable store could not be prepared.
    #[error("entity store operation failed")]
    Data {
        /// Operation identifier.
        operation: &'static str,
        /// Source data error.
        source: cairn_data::DataError,
    },
    /// IO operations failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Source IO error.
        source: io::Error,
    },
    /// A background task panicked.
    #[error("background task failed")]
    Task {
        /// Task name.
        task: &'static str,
        /// Source join error.
        source: tokio::task::JoinError,
    },
}

impl AppError {
    pub(crate) const fn config(operation: &'static str, source: cairn_config::ConfigError) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: cairn_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn data(operation: &'static str, source: cairn_data::DataError) -> Self {
        Self::Data { operation, source }
    }

    pub(crate) const fn io(operation: &'static str, source: io::Error) -> Self {
        Self::Io { operation, source }
    }
}
