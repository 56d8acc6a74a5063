//! Notification bus routing.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cairn_core::{Actor, EntitySnapshot, EntityType};
use chrono::Utc;
use tokio::sync::broadcast::{self, Receiver, Sender};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};

use crate::error::{NotificationDeliveryWarning, SubscriptionError, TopicRegistryError};
use crate::payloads::{
    DEFAULT_BUS_CAPACITY, Delivery, LifecycleAction, MAX_BUS_CAPACITY, Notification,
    NotificationId,
};
use crate::topics::{Topic, TopicFilter, TopicRegistry};

/// Shared notification bus built on top of `tokio::broadcast`.
///
/// Identifier assignment and the broadcast send happen under one lock, so every
/// subscriber observes notifications in the order they were published.
#[derive(Clone)]
pub struct NotificationBus {
    registry: Arc<TopicRegistry>,
    state: Arc<Mutex<BusState>>,
    capacity: usize,
}

struct BusState {
    next_id: NotificationId,
    sender: Option<Sender<Notification>>,
}

impl NotificationBus {
    /// Construct a bus with the default per-subscriber capacity.
    #[must_use]
    pub fn new(registry: Arc<TopicRegistry>) -> Self {
        Self::with_capacity(registry, DEFAULT_BUS_CAPACITY)
    }

    /// Construct a bus whose subscribers buffer at most `capacity` notifications.
    ///
    /// `capacity` is clamped to `1..=MAX_BUS_CAPACITY`; the queue is allocated up front.
    #[must_use]
    pub fn with_capacity(registry: Arc<TopicRegistry>, capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_BUS_CAPACITY);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            registry,
            state: Arc::new(Mutex::new(BusState {
                next_id: 1,
                sender: Some(sender),
            })),
            capacity,
        }
    }

    /// Registry used to resolve entity types to topics.
    #[must_use]
    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    /// Per-subscriber buffer size.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Publish a snapshot to every subscriber currently connected.
    ///
    /// Never blocks on subscribers. Zero subscribers is a successful delivery.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationDeliveryWarning::BusClosed`] once [`Self::close`] ran.
    pub fn publish(
        &self,
        topic: &Topic,
        action: LifecycleAction,
        payload: EntitySnapshot,
        actor: &Actor,
    ) -> Result<Delivery, NotificationDeliveryWarning> {
        let mut state = self.lock_state();
        let Some(sender) = state.sender.as_ref() else {
            return Err(NotificationDeliveryWarning::BusClosed {
                topic: topic.clone(),
                action,
            });
        };
        let id = state.next_id;
        let notification = Notification {
            id,
            timestamp: Utc::now(),
            topic: topic.clone(),
            action,
            actor: actor.clone(),
            payload,
        };
        let receivers = sender.send(notification).unwrap_or(0);
        state.next_id = id.saturating_add(1);
        drop(state);
        Ok(Delivery { id, receivers })
    }

    /// Subscribe to notifications published from now on.
    #[must_use]
    pub fn subscribe(&self, filter: TopicFilter) -> Subscription {
        let receiver = self.lock_state().sender.as_ref().map_or_else(
            || {
                let (sender, receiver) = broadcast::channel(1);
                drop(sender);
                receiver
            },
            Sender::subscribe,
        );
        Subscription { receiver, filter }
    }

    /// Subscribe to both topics of an entity type.
    ///
    /// # Errors
    ///
    /// Returns [`TopicRegistryError::Unregistered`] for types without topics.
    pub fn subscribe_entity_type(
        &self,
        entity_type: EntityType,
    ) -> Result<Subscription, TopicRegistryError> {
        let pair = self.registry.resolve(entity_type)?;
        Ok(self.subscribe(TopicFilter::pair(pair)))
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock_state()
            .sender
            .as_ref()
            .map_or(0, Sender::receiver_count)
    }

    /// Identifier of the most recent notification, if any were published.
    #[must_use]
    pub fn last_notification_id(&self) -> Option<NotificationId> {
        let next = self.lock_state().next_id;
        (next > 1).then(|| next - 1)
    }

    /// Stop accepting notifications; open subscriptions end once drained.
    pub fn close(&self) {
        let _ = self.lock_state().sender.take();
    }

    /// Whether [`Self::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock_state().sender.is_none()
    }

    fn lock_state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Filtered view over the bus for one subscriber.
pub struct Subscription {
    receiver: Receiver<Notification>,
    filter: TopicFilter,
}

impl Subscription {
    /// Wait for the next matching notification; `None` once the bus is closed and drained.
    pub async fn next(&mut self) -> Option<Result<Notification, SubscriptionError>> {
        loop {
            match self.receiver.recv().await {
                Ok(notification) if self.filter.matches(&notification.topic) => {
                    return Some(Ok(notification));
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    return Some(Err(SubscriptionError::Lagged { skipped }));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching notification already queued, without waiting.
    pub fn try_next(&mut self) -> Option<Result<Notification, SubscriptionError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(notification) if self.filter.matches(&notification.topic) => {
                    return Some(Ok(notification));
                }
                Ok(_) => {}
                Err(TryRecvError::Lagged(skipped)) => {
                    return Some(Err(SubscriptionError::Lagged { skipped }));
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Topics this subscription receives.
    #[must_use]
    pub const fn filter(&self) -> &TopicFilter {
        &self.filter
    }

    /// Adapt the subscription into a `Stream`.
    pub fn into_stream(self) -> impl Stream<Item = Result<Notification, SubscriptionError>> {
        let filter = self.filter;
        BroadcastStream::new(self.receiver).filter_map(move |item| match item {
            Ok(notification) if filter.matches(&notification.topic) => Some(Ok(notification)),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                Some(Err(SubscriptionError::Lagged { skipped }))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topics::{TopicKind, TopicPair};
    use cairn_core::{EntityRecord, StandardId};
    use serde_json::{Map, json};
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::task;
    use tokio::time::timeout;
    use uuid::Uuid;

    const RECV_TIMEOUT: Duration = Duration::from_secs(1);

    fn snapshot(id: u128, value: &str) -> EntitySnapshot {
        let mut attributes = Map::new();
        attributes.insert("value".into(), json!(value));
        let now = Utc::now();
        EntitySnapshot::bare(EntityRecord {
            id: Uuid::from_u128(id),
            standard_id: StandardId::new(format!("label--{id}")),
            entity_type: EntityType::Label,
            attributes,
            created_by: Actor::new("alice"),
            updated_by: Actor::new("alice"),
            created_at: now,
            updated_at: now,
        })
    }

    fn bus(capacity: usize) -> NotificationBus {
        NotificationBus::with_capacity(Arc::new(TopicRegistry::standard()), capacity)
    }

    fn label_topic(kind: TopicKind) -> Topic {
        TopicPair::for_entity_type(EntityType::Label).get(kind).clone()
    }

    #[test]
    fn capacity_is_bounded() {
        assert_eq!(bus(0).capacity(), 1);
        assert_eq!(bus(usize::MAX).capacity(), MAX_BUS_CAPACITY);
    }

    #[tokio::test]
    async fn subscribers_receive_in_publish_order() {
        let bus = bus(16);
        let mut first = bus.subscribe(TopicFilter::All);
        let mut second = bus
            .subscribe_entity_type(EntityType::Label)
            .expect("label topics");
        let actor = Actor::new("alice");

        let created = bus
            .publish(
                &label_topic(TopicKind::Created),
                LifecycleAction::Created,
                snapshot(1, "a"),
                &actor,
            )
            .expect("publish");
        let edited = bus
            .publish(
                &label_topic(TopicKind::Edited),
                LifecycleAction::Edited,
                snapshot(1, "b"),
                &actor,
            )
            .expect("publish");
        assert_eq!(created.receivers, 2);
        assert!(edited.id > created.id);

        for subscription in [&mut first, &mut second] {
            let one = timeout(RECV_TIMEOUT, subscription.next())
                .await
                .expect("recv timed out")
                .expect("open")
                .expect("not lagged");
            let two = timeout(RECV_TIMEOUT, subscription.next())
                .await
                .expect("recv timed out")
                .expect("open")
                .expect("not lagged");
            assert_eq!(one.id, created.id);
            assert_eq!(one.action, LifecycleAction::Created);
            assert_eq!(two.id, edited.id);
            assert_eq!(two.payload.entity.str_attribute("value"), Some("b"));
        }
    }

    #[tokio::test]
    async fn late_subscribers_get_no_replay() {
        let bus = bus(16);
        let delivery = bus
            .publish(
                &label_topic(TopicKind::Created),
                LifecycleAction::Created,
                snapshot(1, "a"),
                &Actor::new("alice"),
            )
            .expect("publish");
        assert_eq!(delivery.receivers, 0);
        assert_eq!(bus.last_notification_id(), Some(delivery.id));

        let mut late = bus.subscribe(TopicFilter::All);
        assert!(late.try_next().is_none());
    }

    #[tokio::test]
    async fn filters_skip_other_topics() {
        let bus = bus(16);
        let mut edits = bus.subscribe(TopicFilter::only(label_topic(TopicKind::Edited)));
        let actor = Actor::new("alice");
        let _ = bus.publish(
            &label_topic(TopicKind::Created),
            LifecycleAction::Created,
            snapshot(1, "a"),
            &actor,
        );
        let edited = bus
            .publish(
                &label_topic(TopicKind::Edited),
                LifecycleAction::Edited,
                snapshot(1, "b"),
                &actor,
            )
            .expect("publish");

        let received = edits.try_next().expect("queued").expect("not lagged");
        assert_eq!(received.id, edited.id);
        assert!(edits.try_next().is_none());
    }

    #[tokio::test]
    async fn slow_subscribers_observe_lag_without_blocking_publishers() {
        let bus = bus(2);
        let mut slow = bus.subscribe(TopicFilter::All);
        let actor = Actor::new("alice");
        for index in 0..5 {
            bus.publish(
                &label_topic(TopicKind::Edited),
                LifecycleAction::Edited,
                snapshot(1, &index.to_string()),
                &actor,
            )
            .expect("publish");
        }

        assert_eq!(
            slow.try_next(),
            Some(Err(SubscriptionError::Lagged { skipped: 3 }))
        );
        let next = slow.try_next().expect("queued").expect("not lagged");
        assert_eq!(next.payload.entity.str_attribute("value"), Some("3"));
    }

    #[tokio::test]
    async fn closed_bus_warns_and_ends_subscriptions() {
        let bus = bus(4);
        let mut open = bus.subscribe(TopicFilter::All);
        bus.close();
        assert!(bus.is_closed());

        let warning = bus
            .publish(
                &label_topic(TopicKind::Edited),
                LifecycleAction::Edited,
                snapshot(1, "a"),
                &Actor::new("alice"),
            )
            .expect_err("closed bus must warn");
        assert_eq!(warning.reason(), "bus_closed");

        assert!(timeout(RECV_TIMEOUT, open.next()).await.expect("ends").is_none());
        let mut late = bus.subscribe(TopicFilter::All);
        assert!(timeout(RECV_TIMEOUT, late.next()).await.expect("ends").is_none());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_publishers_keep_ids_unique() {
        let bus = bus(512);
        let stream = bus.subscribe(TopicFilter::All).into_stream();

        let publisher = {
            let bus = bus.clone();
            task::spawn(async move {
                for index in 0..200_u128 {
                    let _ = bus.publish(
                        &label_topic(TopicKind::Edited),
                        LifecycleAction::Edited,
                        snapshot(index, "v"),
                        &Actor::new("loader"),
                    );
                }
            })
        };

        let consumer = task::spawn(async move {
            tokio::pin!(stream);
            let mut ids = HashSet::new();
            let mut last = 0;
            while ids.len() < 200 {
                if let Some(Ok(notification)) = stream.next().await {
                    assert!(notification.id > last);
                    last = notification.id;
                    ids.insert(notification.id);
                }
            }
            ids
        });

        publisher.await.expect("publisher task panicked");
        let ids = timeout(Duration::from_secs(5), consumer)
            .await
            .expect("consumer timed out")
            .expect("consumer task panicked");
        assert_eq!(ids.len(), 200);
    }
}
