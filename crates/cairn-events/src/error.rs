//! Notification bus error and warning primitives.

use std::fmt::{self, Display, Formatter};

use cairn_core::EntityType;

use crate::payloads::LifecycleAction;
use crate::topics::Topic;

/// Publish failure reported after the store mutation already committed.
///
/// This is a warning, not an error: callers log and count it but never fail
/// or roll back the operation that triggered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationDeliveryWarning {
    /// The bus was closed before the notification could be dispatched.
    BusClosed {
        /// Topic the notification targeted.
        topic: Topic,
        /// Lifecycle action being announced.
        action: LifecycleAction,
    },
}

impl NotificationDeliveryWarning {
    /// Topic the undelivered notification targeted.
    #[must_use]
    pub const fn topic(&self) -> &Topic {
        match self {
            Self::BusClosed { topic, .. } => topic,
        }
    }

    /// Machine-friendly reason used as a metrics label.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::BusClosed { .. } => "bus_closed",
        }
    }
}

impl Display for NotificationDeliveryWarning {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("notification delivery failed")
    }
}

impl std::error::Error for NotificationDeliveryWarning {}

/// Condition observed by a subscriber while draining its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The subscriber fell behind and the oldest notifications were dropped.
    Lagged {
        /// Number of notifications skipped.
        skipped: u64,
    },
}

impl Display for SubscriptionError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("subscriber lagged behind the notification bus")
    }
}

impl std::error::Error for SubscriptionError {}

/// Topic registry misconfiguration. Fatal; never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicRegistryError {
    /// The entity type has no registered topic pair.
    Unregistered {
        /// Type that failed to resolve.
        entity_type: EntityType,
    },
    /// The entity type was registered more than once.
    DuplicateRegistration {
        /// Type registered twice.
        entity_type: EntityType,
    },
    /// A topic name was claimed by more than one pair.
    TopicReused {
        /// Shared topic.
        topic: Topic,
    },
}

impl Display for TopicRegistryError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unregistered { .. } => formatter.write_str("entity type has no registered topics"),
            Self::DuplicateRegistration { .. } => {
                formatter.write_str("entity type registered more than once")
            }
            Self::TopicReused { .. } => formatter.write_str("topic registered for more than one type"),
        }
    }
}

impl std::error::Error for TopicRegistryError {}
