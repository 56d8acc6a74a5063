//! Error types for store boundaries.

use std::error::Error;

use thiserror::Error;

use crate::model::{EntityId, EntityType, StandardId};

/// Errors surfaced uniformly by every durable and ephemeral store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Identifier did not resolve for the requested entity type.
    #[error("entity not found")]
    NotFound {
        /// Entity type that was queried.
        entity_type: EntityType,
        /// Identifier that did not resolve.
        id: EntityId,
    },
    /// Another entity already owns the standard identifier.
    #[error("entity identity already in use")]
    Conflict {
        /// Entity type of the colliding record.
        entity_type: EntityType,
        /// Standard identifier that collided.
        standard_id: StandardId,
        /// Identifier of the record holding the standard identifier.
        existing_id: EntityId,
    },
    /// A pagination cursor could not be decoded.
    #[error("invalid pagination cursor")]
    InvalidCursor {
        /// Raw cursor supplied by the caller.
        cursor: String,
    },
    /// The backing store failed.
    #[error("store operation failed")]
    Backend {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl StoreError {
    /// Wrap a backend failure with the operation that raised it.
    pub fn backend(operation: &'static str, source: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self::Backend {
            operation,
            source: source.into(),
        }
    }

    /// Whether the error reports a missing identifier.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Convenience alias for store results.
pub type StoreResult<T> = Result<T, StoreError>;
