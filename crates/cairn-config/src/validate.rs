//! Parsing helpers for raw environment values.

use std::str::FromStr;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};

/// Parse a strictly positive integer.
pub(crate) fn parse_positive<T>(section: &'static str, field: &'static str, raw: &str) -> ConfigResult<T>
where
    T: FromStr + PartialOrd + Default,
{
    let value = raw
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::invalid(section, field, raw, "not_an_integer"))?;
    if value <= T::default() {
        return Err(ConfigError::invalid(section, field, raw, "must_be_positive"));
    }
    Ok(value)
}

/// Parse a whole number of seconds greater than zero.
pub(crate) fn parse_seconds(
    section: &'static str,
    field: &'static str,
    raw: &str,
) -> ConfigResult<Duration> {
    parse_positive::<u64>(section, field, raw).map(Duration::from_secs)
}

/// Parse a value through its `FromStr` implementation, reporting `reason` on failure.
pub(crate) fn parse_keyword<T: FromStr>(
    section: &'static str,
    field: &'static str,
    raw: &str,
    reason: &'static str,
) -> ConfigResult<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| ConfigError::invalid(section, field, raw, reason))
}

/// Reject blank strings.
pub(crate) fn non_empty(section: &'static str, field: &'static str, raw: &str) -> ConfigResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::InvalidField {
            section,
            field,
            value: None,
            reason: "must_not_be_empty",
        });
    }
    Ok(trimmed.to_string())
}
