//! Error types for the data access layer.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

use cairn_core::StoreError;

/// Result alias for data layer operations.
pub type Result<T> = std::result::Result<T, DataError>;

/// Errors raised by the Postgres adapter before they cross the store boundary.
#[derive(Debug)]
pub enum DataError {
    /// Migration execution failed.
    MigrationFailed {
        /// Underlying migration error.
        source: sqlx::migrate::MigrateError,
    },
    /// A database operation failed.
    QueryFailed {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying SQL error.
        source: sqlx::Error,
    },
    /// A stored row could not be mapped back onto an entity record.
    InvalidRow {
        /// Column holding the unexpected value.
        column: &'static str,
        /// Value found in the column.
        value: String,
    },
}

impl DataError {
    /// Attach an operation name to a raw SQL error.
    #[must_use]
    pub const fn query(operation: &'static str, source: sqlx::Error) -> Self {
        Self::QueryFailed { operation, source }
    }

    const fn operation(&self) -> &'static str {
        match self {
            Self::MigrationFailed { .. } => "migrate",
            Self::QueryFailed { operation, .. } => *operation,
            Self::InvalidRow { .. } => "decode_entity",
        }
    }
}

impl Display for DataError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::MigrationFailed { .. } => formatter.write_str("migration failed"),
            Self::QueryFailed { .. } => formatter.write_str("database operation failed"),
            Self::InvalidRow { .. } => formatter.write_str("stored entity row is invalid"),
        }
    }
}

impl Error for DataError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::MigrationFailed { source } => Some(source),
            Self::QueryFailed { source, .. } => Some(source),
            Self::InvalidRow { .. } => None,
        }
    }
}

impl From<DataError> for StoreError {
    fn from(error: DataError) -> Self {
        Self::backend(error.operation(), error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_error_display_and_source() {
        let migration = DataError::MigrationFailed {
            source: sqlx::migrate::MigrateError::VersionMissing(1),
        };
        assert_eq!(migration.to_string(), "migration failed");
        assert!(migration.source().is_some());

        let query = DataError::query("load_by_id", sqlx::Error::RowNotFound);
        assert_eq!(query.to_string(), "database operation failed");
        assert!(query.source().is_some());

        let row = DataError::InvalidRow {
            column: "entity_type",
            value: "campaign".into(),
        };
        assert_eq!(row.to_string(), "stored entity row is invalid");
        assert!(row.source().is_none());
    }

    #[test]
    fn store_error_keeps_operation() {
        let store: StoreError =
            DataError::query("delete_element_by_id", sqlx::Error::RowNotFound).into();
        match store {
            StoreError::Backend { operation, source } => {
                assert_eq!(operation, "delete_element_by_id");
                assert_eq!(source.to_string(), "database operation failed");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
