//! Error types for configuration loading.

use thiserror::Error;

/// Primary error type for configuration operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Field contained an invalid value.
    #[error("invalid configuration field")]
    InvalidField {
        /// Section that failed validation.
        section: &'static str,
        /// Field that failed validation.
        field: &'static str,
        /// Offending value when available.
        value: Option<String>,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
}

impl ConfigError {
    pub(crate) fn invalid(
        section: &'static str,
        field: &'static str,
        value: impl Into<String>,
        reason: &'static str,
    ) -> Self {
        Self::InvalidField {
            section,
            field,
            value: Some(value.into()),
            reason,
        }
    }
}

/// Convenience result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_field_message_is_constant() {
        let err = ConfigError::invalid("bus", "capacity", "0", "must_be_positive");
        assert_eq!(err.to_string(), "invalid configuration field");
        assert!(matches!(
            err,
            ConfigError::InvalidField { section: "bus", reason: "must_be_positive", .. }
        ));
    }
}
