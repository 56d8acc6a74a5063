//! Errors surfaced by domain operations.

use cairn_core::{EntityId, EntityType, StandardId, StoreError};
use cairn_events::TopicRegistryError;
use thiserror::Error;

use crate::pipeline::ValidationFailure;

/// Failures returned to callers of the repository, coordinator, and typed services.
///
/// Notification delivery problems are deliberately absent: they are reported
/// through logs and metrics once the store mutation has committed.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Identifier did not resolve for the requested entity type.
    #[error("entity not found")]
    NotFound {
        /// Entity type that was queried.
        entity_type: EntityType,
        /// Identifier that did not resolve.
        id: EntityId,
    },
    /// The normalized identity is already held by another entity.
    #[error("entity identity already in use")]
    Conflict {
        /// Entity type of the colliding record.
        entity_type: EntityType,
        /// Standard identifier that collided.
        standard_id: StandardId,
        /// Identifier of the record holding the identity.
        existing_id: EntityId,
    },
    /// The entity type has no topic pair; fatal and never retried.
    #[error("entity type is not registered for notifications")]
    Configuration {
        /// Registry lookup failure.
        #[source]
        source: TopicRegistryError,
    },
    /// Attributes failed the type's pipeline; nothing was persisted.
    #[error("invalid entity attributes")]
    Validation {
        /// Entity type being validated.
        entity_type: EntityType,
        /// Attribute that failed.
        field: String,
        /// Machine-readable reason.
        reason: &'static str,
    },
    /// The backing store failed.
    #[error("store operation failed")]
    Store {
        /// Underlying store error.
        #[source]
        source: StoreError,
    },
}

impl DomainError {
    pub(crate) fn validation(entity_type: EntityType, failure: ValidationFailure) -> Self {
        Self::Validation {
            entity_type,
            field: failure.field,
            reason: failure.reason,
        }
    }

    /// Whether the error reports a missing identifier.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<StoreError> for DomainError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { entity_type, id } => Self::NotFound { entity_type, id },
            StoreError::Conflict {
                entity_type,
                standard_id,
                existing_id,
            } => Self::Conflict {
                entity_type,
                standard_id,
                existing_id,
            },
            source @ (StoreError::InvalidCursor { .. } | StoreError::Backend { .. }) => {
                Self::Store { source }
            }
        }
    }
}

impl From<TopicRegistryError> for DomainError {
    fn from(source: TopicRegistryError) -> Self {
        Self::Configuration { source }
    }
}

/// Convenience alias for domain results.
pub type DomainResult<T> = Result<T, DomainError>;
