//! Environment-backed loading of [`ServiceConfig`].

use cairn_core::DuplicatePolicy;
use cairn_telemetry::LogFormat;

use crate::defaults;
use crate::error::{ConfigError, ConfigResult};
use crate::model::ServiceConfig;
use crate::validate::{non_empty, parse_keyword, parse_positive, parse_seconds};

/// Environment variable names understood by the loader.
pub mod env_keys {
    /// Postgres connection string; unset selects the in-memory store.
    pub const DATABASE_URL: &str = "CAIRN_DATABASE_URL";
    /// Pool size for the Postgres store.
    pub const DATABASE_MAX_CONNECTIONS: &str = "CAIRN_DATABASE_MAX_CONNECTIONS";
    /// Per-subscriber notification buffer.
    pub const BUS_CAPACITY: &str = "CAIRN_BUS_CAPACITY";
    /// Edit-context lifetime in seconds.
    pub const EDIT_CONTEXT_TTL_SECS: &str = "CAIRN_EDIT_CONTEXT_TTL_SECS";
    /// Interval between expiry sweeps in seconds.
    pub const EDIT_CONTEXT_SWEEP_SECS: &str = "CAIRN_EDIT_CONTEXT_SWEEP_SECS";
    /// `return_existing` or `reject`.
    pub const DUPLICATE_POLICY: &str = "CAIRN_DUPLICATE_POLICY";
    /// Page size used when a listing does not request one.
    pub const DEFAULT_PAGE_SIZE: &str = "CAIRN_DEFAULT_PAGE_SIZE";
    /// Largest page size a listing may request.
    pub const MAX_PAGE_SIZE: &str = "CAIRN_MAX_PAGE_SIZE";
    /// Tracing filter directive.
    pub const LOG_LEVEL: &str = "CAIRN_LOG_LEVEL";
    /// `json` or `pretty`.
    pub const LOG_FORMAT: &str = "CAIRN_LOG_FORMAT";
}

impl ServiceConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] for the first malformed variable.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// Unset and empty variables fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] for the first malformed variable.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        config.database.url = get(env_keys::DATABASE_URL).map(|url| url.trim().to_string());
        if let Some(raw) = get(env_keys::DATABASE_MAX_CONNECTIONS) {
            config.database.max_connections = parse_positive("database", "max_connections", &raw)?;
        }
        if let Some(raw) = get(env_keys::BUS_CAPACITY) {
            config.bus.capacity = parse_positive("bus", "capacity", &raw)?;
        }
        if let Some(raw) = get(env_keys::EDIT_CONTEXT_TTL_SECS) {
            config.edit_context.ttl = parse_seconds("edit_context", "ttl", &raw)?;
        }
        if let Some(raw) = get(env_keys::EDIT_CONTEXT_SWEEP_SECS) {
            config.edit_context.sweep_interval =
                parse_seconds("edit_context", "sweep_interval", &raw)?;
        }
        if let Some(raw) = get(env_keys::DUPLICATE_POLICY) {
            config.repository.duplicate_policy = parse_keyword::<DuplicatePolicy>(
                "repository",
                "duplicate_policy",
                &raw,
                "unknown_policy",
            )?;
        }
        if let Some(raw) = get(env_keys::DEFAULT_PAGE_SIZE) {
            config.repository.default_page_size =
                parse_positive("repository", "default_page_size", &raw)?;
        }
        if let Some(raw) = get(env_keys::MAX_PAGE_SIZE) {
            config.repository.max_page_size = parse_positive("repository", "max_page_size", &raw)?;
        }
        if let Some(raw) = lookup(env_keys::LOG_LEVEL) {
            config.telemetry.log_level = non_empty("telemetry", "log_level", &raw)?;
        }
        if let Some(raw) = get(env_keys::LOG_FORMAT) {
            config.telemetry.log_format =
                parse_keyword::<LogFormat>("telemetry", "log_format", &raw, "unknown_format")?;
        }

        config.validate()?;
        tracing::debug!(
            durable_store = if config.database.url.is_some() { "postgres" } else { "memory" },
            bus_capacity = config.bus.capacity,
            edit_context_ttl_secs = config.edit_context.ttl.as_secs(),
            duplicate_policy = config.repository.duplicate_policy.as_str(),
            "service configuration loaded"
        );
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when the bus capacity exceeds its
    /// ceiling or the default page size exceeds the maximum.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.bus.capacity > defaults::MAX_BUS_CAPACITY {
            return Err(ConfigError::invalid(
                "bus",
                "capacity",
                self.bus.capacity.to_string(),
                "above_maximum",
            ));
        }
        if self.repository.default_page_size > self.repository.max_page_size {
            return Err(ConfigError::invalid(
                "repository",
                "max_page_size",
                self.repository.max_page_size.to_string(),
                "below_default_page_size",
            ));
        }
        Ok(())
    }
}
