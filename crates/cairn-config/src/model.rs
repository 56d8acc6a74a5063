//! Typed configuration sections.
//!
//! # Design
//! - Pure data carriers; parsing and lookups live in `loader.rs`.
//! - Every section has a `Default` matching the documented fallbacks.

use std::time::Duration;

use cairn_core::DuplicatePolicy;
use cairn_telemetry::{DEFAULT_LOG_LEVEL, LogFormat};
use serde::Serialize;

use crate::defaults;

/// Complete configuration for a cairn process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceConfig {
    /// Durable store selection.
    pub database: DatabaseConfig,
    /// Notification bus sizing.
    pub bus: BusConfig,
    /// Edit-context lifetime policy.
    pub edit_context: EditContextConfig,
    /// Repository policies.
    pub repository: RepositoryConfig,
    /// Logging setup.
    pub telemetry: TelemetryConfig,
}

/// Durable store selection; no URL means the in-memory store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseConfig {
    /// Postgres connection string.
    #[serde(skip_serializing)]
    pub url: Option<String>,
    /// Upper bound on pooled connections.
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: defaults::DATABASE_MAX_CONNECTIONS,
        }
    }
}

/// Notification bus sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BusConfig {
    /// Notifications buffered per subscriber before it starts lagging.
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: defaults::BUS_CAPACITY,
        }
    }
}

/// Edit-context lifetime policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EditContextConfig {
    /// Lifetime of a context after its latest set call.
    pub ttl: Duration,
    /// Interval between expiry sweeps.
    pub sweep_interval: Duration,
}

impl Default for EditContextConfig {
    fn default() -> Self {
        Self {
            ttl: defaults::EDIT_CONTEXT_TTL,
            sweep_interval: defaults::EDIT_CONTEXT_SWEEP_INTERVAL,
        }
    }
}

/// Repository policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RepositoryConfig {
    /// Behaviour when a create collides with an existing identity.
    pub duplicate_policy: DuplicatePolicy,
    /// Page size used when a listing does not request one.
    pub default_page_size: usize,
    /// Largest page a listing may request.
    pub max_page_size: usize,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            duplicate_policy: DuplicatePolicy::default(),
            default_page_size: defaults::DEFAULT_PAGE_SIZE,
            max_page_size: defaults::MAX_PAGE_SIZE,
        }
    }
}

/// Logging setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetryConfig {
    /// Filter directive handed to the subscriber.
    pub log_level: String,
    /// Output format.
    #[serde(serialize_with = "serialize_format")]
    pub log_format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_format: LogFormat::infer(),
        }
    }
}

fn serialize_format<S: serde::Serializer>(
    format: &LogFormat,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(format.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_defaults_bound_listings() {
        let repository = RepositoryConfig::default();
        assert_eq!(repository.default_page_size, 50);
        assert_eq!(repository.max_page_size, 500);
    }

    #[test]
    fn serialised_config_omits_database_url() {
        let mut config = ServiceConfig::default();
        config.database.url = Some("postgres://secret@localhost/cairn".into());
        let value = serde_json::to_value(&config).expect("serialise");
        assert!(value["database"].get("url").is_none());
        assert_eq!(value["bus"]["capacity"], 1_024);
        assert_eq!(value["repository"]["duplicate_policy"], "return_existing");
    }
}
