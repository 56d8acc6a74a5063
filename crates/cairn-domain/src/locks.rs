//! Per-entity serialisation of announcements.
//!
//! Only the ephemeral read and the publish that follows it run under an entity
//! lock; durable store calls never do. Entries are dropped once no caller holds
//! or waits on them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use cairn_core::EntityId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slots = Arc<Mutex<HashMap<EntityId, Arc<AsyncMutex<()>>>>>;

/// Keyed async locks, one per entity currently being announced.
#[derive(Clone, Default)]
pub(crate) struct EntityLocks {
    slots: Slots,
}

impl EntityLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`.
    pub(crate) async fn lock(&self, id: EntityId) -> EntityGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(id).or_default())
        };
        let guard = slot.lock_owned().await;
        EntityGuard {
            id,
            slots: Arc::clone(&self.slots),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Exclusive access to one entity; released on drop.
pub(crate) struct EntityGuard {
    id: EntityId,
    slots: Slots,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for EntityGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // The map holds the last reference once nobody holds or awaits the slot.
        if slots
            .get(&self.id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn guards_serialise_one_entity_and_release_their_slot() {
        let locks = EntityLocks::new();
        let id = EntityId::new_v4();

        let first = locks.lock(id).await;
        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(id).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(first);
        contender.await.expect("contender joins");
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn distinct_entities_do_not_contend() {
        let locks = EntityLocks::new();
        let _first = locks.lock(EntityId::new_v4()).await;
        let _second = locks.lock(EntityId::new_v4()).await;
        assert_eq!(locks.tracked(), 2);
    }
}
