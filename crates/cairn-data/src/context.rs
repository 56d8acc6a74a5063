//! Ephemeral edit-context storage with time-bounded entries.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use cairn_core::{Actor, EditContext, EditContextStore, EditInput, EntityId, StoreResult};
use chrono::Utc;

/// Edit contexts held in process memory, one per entity.
///
/// Expired entries read as absent immediately and are physically removed by
/// [`EditContextStore::purge_expired`].
#[derive(Default)]
pub struct MemoryEditContextStore {
    contexts: Mutex<HashMap<EntityId, EditContext>>,
}

impl MemoryEditContextStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries currently held, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no entries are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EntityId, EditContext>> {
        self.contexts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl EditContextStore for MemoryEditContextStore {
    async fn set_edit_context(
        &self,
        actor: &Actor,
        id: EntityId,
        input: EditInput,
        ttl: Duration,
    ) -> StoreResult<EditContext> {
        let context = EditContext::new(id, actor.clone(), input, Utc::now(), ttl);
        let previous = self.lock().insert(id, context.clone());
        if let Some(previous) = previous.filter(|previous| previous.actor != *actor) {
            tracing::debug!(
                entity_id = %id,
                previous = %previous.actor,
                actor = %actor,
                "edit context taken over by another actor"
            );
        }
        Ok(context)
    }

    async fn del_edit_context(
        &self,
        _actor: &Actor,
        id: EntityId,
    ) -> StoreResult<Option<EditContext>> {
        let now = Utc::now();
        Ok(self
            .lock()
            .remove(&id)
            .filter(|context| !context.is_expired_at(now)))
    }

    async fn fetch_edit_context(&self, id: EntityId) -> StoreResult<Option<EditContext>> {
        let now = Utc::now();
        Ok(self
            .lock()
            .get(&id)
            .filter(|context| !context.is_expired_at(now))
            .cloned())
    }

    async fn purge_expired(&self) -> StoreResult<usize> {
        let now = Utc::now();
        let mut contexts = self.lock();
        let before = contexts.len();
        contexts.retain(|_, context| !context.is_expired_at(now));
        Ok(before - contexts.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uuid::Uuid;

    const TTL: Duration = Duration::from_secs(600);

    #[tokio::test]
    async fn set_then_delete_returns_to_unset() {
        let store = MemoryEditContextStore::new();
        let id = Uuid::new_v4();
        let alice = Actor::new("alice");

        let context = store
            .set_edit_context(&alice, id, EditInput::focus("color"), TTL)
            .await
            .expect("set");
        assert_eq!(context.actor, alice);
        assert_eq!(
            store.fetch_edit_context(id).await.expect("fetch"),
            Some(context.clone())
        );

        let removed = store.del_edit_context(&alice, id).await.expect("delete");
        assert_eq!(removed, Some(context));
        assert!(store.fetch_edit_context(id).await.expect("fetch").is_none());
        assert!(store.del_edit_context(&alice, id).await.expect("delete").is_none());
    }

    #[tokio::test]
    async fn last_writer_wins() {
        let store = MemoryEditContextStore::new();
        let id = Uuid::new_v4();
        store
            .set_edit_context(&Actor::new("alice"), id, EditInput::focus("value"), TTL)
            .await
            .expect("set");
        store
            .set_edit_context(&Actor::new("bob"), id, EditInput::focus("color"), TTL)
            .await
            .expect("set");

        let current = store.fetch_edit_context(id).await.expect("fetch").expect("held");
        assert_eq!(current.actor, Actor::new("bob"));
        assert_eq!(current.input.focus_on.as_deref(), Some("color"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn expired_contexts_read_as_absent_until_purged() {
        let store = MemoryEditContextStore::new();
        let stale = Uuid::new_v4();
        let live = Uuid::new_v4();
        let alice = Actor::new("alice");
        store
            .set_edit_context(&alice, stale, EditInput::default(), Duration::ZERO)
            .await
            .expect("set");
        store
            .set_edit_context(&alice, live, EditInput::default(), TTL)
            .await
            .expect("set");

        assert!(store.fetch_edit_context(stale).await.expect("fetch").is_none());
        assert_eq!(store.len(), 2);
        assert_eq!(store.purge_expired().await.expect("purge"), 1);
        assert_eq!(store.len(), 1);
        assert!(store.fetch_edit_context(live).await.expect("fetch").is_some());
    }

    #[tokio::test]
    async fn refreshing_extends_the_deadline() {
        let store = MemoryEditContextStore::new();
        let id = Uuid::new_v4();
        let alice = Actor::new("alice");
        let first = store
            .set_edit_context(&alice, id, EditInput::default(), Duration::from_secs(1))
            .await
            .expect("set");
        let refreshed = store
            .set_edit_context(&alice, id, EditInput::default(), TTL)
            .await
            .expect("set");
        assert!(refreshed.expires_at > first.expires_at);
    }

    #[tokio::test]
    async fn concurrent_setters_leave_one_holder() {
        let store = Arc::new(MemoryEditContextStore::new());
        let id = Uuid::new_v4();
        let mut handles = Vec::new();
        for name in ["alice", "bob", "carol", "dave"] {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .set_edit_context(&Actor::new(name), id, EditInput::default(), TTL)
                    .await
            }));
        }
        for handle in handles {
            handle.await.expect("task").expect("set");
        }

        let holder = store.fetch_edit_context(id).await.expect("fetch").expect("held");
        assert!(["alice", "bob", "carol", "dave"].contains(&holder.actor.id()));
        assert_eq!(store.len(), 1);
    }
}
