//! Bridge between committed mutations and the notification bus.

use cairn_core::{Actor, EntityId, EntitySnapshot, EntityType};
use cairn_events::{
    Delivery, LifecycleAction, NotificationBus, NotificationDeliveryWarning, TopicPair,
};
use cairn_telemetry::Metrics;
use tracing::{debug, warn};

use crate::error::DomainResult;
use crate::locks::{EntityGuard, EntityLocks};

/// Publishes entity snapshots and records the outcome in logs and metrics.
#[derive(Clone)]
pub struct Publisher {
    bus: NotificationBus,
    metrics: Metrics,
    locks: EntityLocks,
}

impl Publisher {
    /// Build a publisher over a shared bus and metrics registry.
    #[must_use]
    pub fn new(bus: NotificationBus, metrics: Metrics) -> Self {
        Self {
            bus,
            metrics,
            locks: EntityLocks::new(),
        }
    }

    /// Underlying bus, for subscribing.
    #[must_use]
    pub const fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    /// Shared metrics registry.
    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Serialise announcements about `id` across every clone of this publisher.
    ///
    /// Hold the guard across the ephemeral read and the publish built from it
    /// so the last notification for an entity matches its stored edit context.
    pub(crate) async fn lock_entity(&self, id: EntityId) -> EntityGuard {
        self.locks.lock(id).await
    }

    /// Resolve the topic pair for `entity_type`.
    ///
    /// Called before any mutation so an unregistered type fails without
    /// touching the store.
    ///
    /// # Errors
    ///
    /// Returns [`crate::DomainError::Configuration`] when the type has no pair.
    pub fn topics(&self, entity_type: EntityType) -> DomainResult<TopicPair> {
        Ok(self.bus.registry().resolve(entity_type)?.clone())
    }

    /// Publish `snapshot` on the topic matching `action`.
    ///
    /// A failed delivery is logged and counted here; callers treat it as
    /// informational because the store mutation has already committed.
    ///
    /// # Errors
    ///
    /// Returns the [`NotificationDeliveryWarning`] raised by the bus.
    pub fn publish(
        &self,
        topics: &TopicPair,
        action: LifecycleAction,
        snapshot: EntitySnapshot,
        actor: &Actor,
    ) -> Result<Delivery, NotificationDeliveryWarning> {
        let topic = topics.get(action.topic_kind());
        let entity_id = snapshot.entity.id;
        match self.bus.publish(topic, action, snapshot, actor) {
            Ok(delivery) => {
                self.metrics.inc_notification_published(topic.as_str());
                self.metrics.set_bus_subscribers(delivery.receivers);
                debug!(
                    topic = %topic,
                    action = action.kind(),
                    entity_id = %entity_id,
                    notification_id = delivery.id,
                    receivers = delivery.receivers,
                    "notification published"
                );
                Ok(delivery)
            }
            Err(warning) => {
                self.metrics
                    .inc_delivery_warning(warning.topic().as_str(), warning.reason());
                warn!(
                    topic = %warning.topic(),
                    action = action.kind(),
                    entity_id = %entity_id,
                    reason = warning.reason(),
                    error = %warning,
                    "notification not delivered after committed mutation"
                );
                Err(warning)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::EntityRecord;
    use cairn_events::{TopicFilter, TopicRegistry};
    use chrono::Utc;
    use std::sync::Arc;
    use uuid::Uuid;

    fn snapshot() -> EntitySnapshot {
        let now = Utc::now();
        EntitySnapshot::bare(EntityRecord {
            id: Uuid::new_v4(),
            standard_id: cairn_core::StandardId::new("label--test"),
            entity_type: EntityType::Label,
            attributes: cairn_core::Attributes::new(),
            created_by: Actor::new("alice"),
            updated_by: Actor::new("alice"),
            created_at: now,
            updated_at: now,
        })
    }

    fn publisher(registry: TopicRegistry) -> Publisher {
        let bus = NotificationBus::with_capacity(Arc::new(registry), 8);
        Publisher::new(bus, Metrics::new().expect("metrics"))
    }

    #[test]
    fn actions_route_to_their_topic() {
        let publisher = publisher(TopicRegistry::standard());
        let topics = publisher.topics(EntityType::Label).expect("label topics");
        let mut subscription = publisher.bus().subscribe(TopicFilter::All);

        publisher
            .publish(&topics, LifecycleAction::Created, snapshot(), &Actor::new("alice"))
            .expect("created delivered");
        publisher
            .publish(&topics, LifecycleAction::Deleted, snapshot(), &Actor::new("alice"))
            .expect("deleted delivered");

        let created = subscription.try_next().and_then(Result::ok).expect("created");
        assert_eq!(created.topic.as_str(), "label.created");
        let deleted = subscription.try_next().and_then(Result::ok).expect("deleted");
        assert_eq!(deleted.topic.as_str(), "label.edited");
        assert_eq!(publisher.metrics().snapshot().notifications_published_total, 2);
    }

    #[test]
    fn closed_bus_warnings_are_counted() {
        let publisher = publisher(TopicRegistry::standard());
        let topics = publisher.topics(EntityType::Label).expect("label topics");
        publisher.bus().close();

        let warning = publisher
            .publish(&topics, LifecycleAction::Edited, snapshot(), &Actor::system())
            .expect_err("closed bus");
        assert_eq!(warning.reason(), "bus_closed");
        let metrics = publisher.metrics().snapshot();
        assert_eq!(metrics.notification_delivery_warnings_total, 1);
        assert_eq!(metrics.notifications_published_total, 0);
    }

    #[test]
    fn unregistered_types_fail_topic_resolution() {
        let registry = TopicRegistry::builder()
            .register_default(EntityType::Label)
            .build()
            .expect("registry");
        let publisher = publisher(registry);
        assert!(matches!(
            publisher.topics(EntityType::KillChainPhase),
            Err(crate::DomainError::Configuration { .. })
        ));
    }
}
