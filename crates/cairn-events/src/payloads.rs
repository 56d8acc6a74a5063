//! Notification payload types carried by the bus.

use cairn_core::{Actor, EntityId, EntitySnapshot, EntityType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::topics::{Topic, TopicKind};

/// Identifier assigned to each published notification, in publish order.
pub type NotificationId = u64;

/// Default capacity of each subscriber's queue.
pub const DEFAULT_BUS_CAPACITY: usize = 1_024;

/// Largest per-subscriber queue a bus allocates.
pub const MAX_BUS_CAPACITY: usize = 65_536;

/// What happened to the entity carried by a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    /// The entity was created.
    Created,
    /// Durable attributes changed.
    Edited,
    /// Only the edit context changed; the payload is re-published for editor presence.
    ContextChanged,
    /// The entity was deleted; the payload is its last known state.
    Deleted,
}

impl LifecycleAction {
    /// Machine-friendly discriminator for logs and metrics.
    #[must_use]
    pub const fn kind(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Edited => "edited",
            Self::ContextChanged => "context_changed",
            Self::Deleted => "deleted",
        }
    }

    /// Topic of the pair this action is published on.
    #[must_use]
    pub const fn topic_kind(self) -> TopicKind {
        match self {
            Self::Created => TopicKind::Created,
            Self::Edited | Self::ContextChanged | Self::Deleted => TopicKind::Edited,
        }
    }
}

/// Immutable snapshot delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Sequential identifier assigned by the bus.
    pub id: NotificationId,
    /// Time the bus accepted the notification.
    pub timestamp: DateTime<Utc>,
    /// Topic the notification was published on.
    pub topic: Topic,
    /// Lifecycle action being announced.
    pub action: LifecycleAction,
    /// Actor whose operation produced the notification.
    pub actor: Actor,
    /// Entity state after the operation, with its edit annotation.
    pub payload: EntitySnapshot,
}

impl Notification {
    /// Identifier of the entity carried in the payload.
    #[must_use]
    pub const fn entity_id(&self) -> EntityId {
        self.payload.entity.id
    }

    /// Type of the entity carried in the payload.
    #[must_use]
    pub const fn entity_type(&self) -> EntityType {
        self.payload.entity.entity_type
    }
}

/// Receipt returned by a successful publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Identifier assigned to the notification.
    pub id: NotificationId,
    /// Subscribers connected at publish time.
    pub receivers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_map_onto_topic_pair() {
        assert_eq!(LifecycleAction::Created.topic_kind(), TopicKind::Created);
        for action in [
            LifecycleAction::Edited,
            LifecycleAction::ContextChanged,
            LifecycleAction::Deleted,
        ] {
            assert_eq!(action.topic_kind(), TopicKind::Edited);
        }
        assert_eq!(LifecycleAction::ContextChanged.kind(), "context_changed");
    }
}
