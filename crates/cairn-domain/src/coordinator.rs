//! Edit-context coordination.
//!
//! An edit context is advisory: holding one never blocks mutations by other
//! actors. Concurrent setters on the same entity resolve last-writer-wins.
//! Every transition re-publishes the durable entity on its edited-topic so
//! subscribers can refresh who-is-editing state.
//!
//! The context written by a caller is not necessarily the one it announces:
//! each announcement re-reads the stored context under the entity's publisher
//! lock, so the last notification about an entity always carries its current
//! editor even when setters overlap.

use std::sync::Arc;
use std::time::Duration;

use cairn_core::{
    Actor, EditContext, EditContextStore, EditInput, EntityId, EntityRecord, EntitySnapshot,
    EntityStore, EntityType,
};
use cairn_events::{LifecycleAction, TopicPair};
use tracing::{debug, info, instrument, warn};

use crate::error::DomainResult;
use crate::publisher::Publisher;

/// Default lifetime of an edit context without a refresh.
pub const DEFAULT_EDIT_CONTEXT_TTL: Duration = Duration::from_secs(600);

/// Sets and clears edit contexts, re-publishing entity state after each change.
#[derive(Clone)]
pub struct EditContextCoordinator {
    store: Arc<dyn EntityStore>,
    contexts: Arc<dyn EditContextStore>,
    publisher: Publisher,
    ttl: Duration,
}

impl EditContextCoordinator {
    /// Assemble a coordinator; contexts expire `ttl` after their latest set.
    #[must_use]
    pub fn new(
        store: Arc<dyn EntityStore>,
        contexts: Arc<dyn EditContextStore>,
        publisher: Publisher,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            contexts,
            publisher,
            ttl,
        }
    }

    /// Lifetime applied to each set.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record that `actor` is editing the entity and re-publish it annotated.
    ///
    /// Setting again refreshes the deadline; a different actor replaces the
    /// previous holder.
    ///
    /// # Errors
    ///
    /// - [`crate::DomainError::Configuration`] when the type has no topics.
    /// - [`crate::DomainError::NotFound`] when the entity does not exist; the
    ///   context written for it is removed again and nothing is published.
    #[instrument(
        name = "edit_context.set",
        skip(self, input),
        fields(entity_type = %entity_type, actor = %actor)
    )]
    pub async fn set_edit_context(
        &self,
        actor: &Actor,
        entity_type: EntityType,
        id: EntityId,
        input: EditInput,
    ) -> DomainResult<EntitySnapshot> {
        let topics = self.publisher.topics(entity_type)?;
        let written = self
            .contexts
            .set_edit_context(actor, id, input, self.ttl)
            .await?;
        // A delete racing this set either removed the entity before the load
        // below, or clears the context itself afterwards.
        let entity = match self.store.load_by_id(id, entity_type).await {
            Ok(entity) => entity,
            Err(err) => {
                if err.is_not_found() {
                    self.discard_orphan(actor, id).await;
                }
                return Err(err.into());
            }
        };
        self.publisher.metrics().inc_edit_context_set();
        debug!(expires_at = %written.expires_at, "edit context set");

        let _announcing = self.publisher.lock_entity(id).await;
        let current = self.current_context(id, Some(written)).await;
        if current.is_none() {
            // Cleared, expired, or deleted since the write; whoever removed it
            // announced the resulting state.
            debug!("edit context gone before announcement");
            return Ok(EntitySnapshot::bare(entity));
        }
        Ok(self.announce(&topics, entity, current, actor))
    }

    /// Drop the edit context and re-publish the entity without an annotation.
    ///
    /// # Errors
    ///
    /// - [`crate::DomainError::Configuration`] when the type has no topics.
    /// - [`crate::DomainError::NotFound`] when the entity no longer exists.
    #[instrument(
        name = "edit_context.clear",
        skip(self),
        fields(entity_type = %entity_type, actor = %actor)
    )]
    pub async fn clear_edit_context(
        &self,
        actor: &Actor,
        entity_type: EntityType,
        id: EntityId,
    ) -> DomainResult<EntitySnapshot> {
        let topics = self.publisher.topics(entity_type)?;
        let previous = self.contexts.del_edit_context(actor, id).await?;
        let entity = self.store.load_by_id(id, entity_type).await?;
        debug!(had_context = previous.is_some(), "edit context cleared");

        let _announcing = self.publisher.lock_entity(id).await;
        // Another actor may have set a context since the delete above.
        let current = self.current_context(id, None).await;
        Ok(self.announce(&topics, entity, current, actor))
    }

    async fn current_context(
        &self,
        id: EntityId,
        fallback: Option<EditContext>,
    ) -> Option<EditContext> {
        match self.contexts.fetch_edit_context(id).await {
            Ok(context) => context,
            Err(err) => {
                warn!(
                    entity_id = %id,
                    error = %err,
                    "edit context unreadable before announcement"
                );
                fallback
            }
        }
    }

    async fn discard_orphan(&self, actor: &Actor, id: EntityId) {
        if let Err(err) = self.contexts.del_edit_context(actor, id).await {
            self.publisher.metrics().inc_edit_context_cleanup_failure();
            warn!(
                entity_id = %id,
                error = %err,
                "failed to drop edit context of missing entity"
            );
        }
    }

    fn announce(
        &self,
        topics: &TopicPair,
        entity: EntityRecord,
        edit_context: Option<EditContext>,
        actor: &Actor,
    ) -> EntitySnapshot {
        let snapshot = EntitySnapshot {
            entity,
            edit_context,
        };
        let _ = self.publisher.publish(
            topics,
            LifecycleAction::ContextChanged,
            snapshot.clone(),
            actor,
        );
        snapshot
    }

    /// Current entity state with its live edit context, without publishing.
    ///
    /// # Errors
    ///
    /// Returns [`crate::DomainError::NotFound`] when the entity does not exist.
    pub async fn snapshot(
        &self,
        entity_type: EntityType,
        id: EntityId,
    ) -> DomainResult<EntitySnapshot> {
        let entity = self.store.load_by_id(id, entity_type).await?;
        let edit_context = self.contexts.fetch_edit_context(id).await?;
        Ok(EntitySnapshot {
            entity,
            edit_context,
        })
    }

    /// Remove expired contexts and report how many were dropped.
    ///
    /// # Errors
    ///
    /// Returns [`crate::DomainError::Store`] when the ephemeral store fails.
    pub async fn sweep_expired(&self) -> DomainResult<usize> {
        let purged = self.contexts.purge_expired().await?;
        if purged > 0 {
            self.publisher.metrics().add_edit_contexts_expired(purged);
            info!(purged, "expired edit contexts removed");
        }
        Ok(purged)
    }
}
