//! Store boundaries implemented by persistence adapters.
//!
//! The durable store and the ephemeral edit-context store are independent
//! resources; callers never hold a lock across calls to both.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::model::{
    Actor, CreateOutcome, EditContext, EditInput, EntityId, EntityPatch, EntityRecord, EntityType,
    ListArgs, NewEntity, Page, StandardId,
};

/// Durable entity storage. Every method reports missing identifiers as
/// [`crate::StoreError::NotFound`].
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Point lookup by identifier.
    async fn load_by_id(&self, id: EntityId, entity_type: EntityType)
    -> StoreResult<EntityRecord>;

    /// Lookup by standard identifier; `None` when no record owns it.
    async fn load_by_standard_id(
        &self,
        standard_id: &StandardId,
        entity_type: EntityType,
    ) -> StoreResult<Option<EntityRecord>>;

    /// Paginated listing; `indexed_attributes` are the fields matched by `args.search`.
    async fn list_entities(
        &self,
        types: &[EntityType],
        indexed_attributes: &[&str],
        args: &ListArgs,
    ) -> StoreResult<Page<EntityRecord>>;

    /// Insert a record unless its standard identifier is already taken, in which
    /// case the existing record is returned untouched.
    async fn create_entity(&self, actor: &Actor, entity: NewEntity) -> StoreResult<CreateOutcome>;

    /// Apply a partial update and return the post-mutation record.
    ///
    /// Fails with [`crate::StoreError::Conflict`] when the patch moves the record
    /// onto a standard identifier held by another record.
    async fn update_attribute(
        &self,
        actor: &Actor,
        id: EntityId,
        entity_type: EntityType,
        patch: EntityPatch,
    ) -> StoreResult<EntityRecord>;

    /// Remove a record and return its last state.
    async fn delete_element_by_id(
        &self,
        actor: &Actor,
        id: EntityId,
        entity_type: EntityType,
    ) -> StoreResult<EntityRecord>;
}

/// Fast ephemeral storage for edit contexts, keyed by entity identifier.
#[async_trait]
pub trait EditContextStore: Send + Sync {
    /// Record that `actor` is editing `id`, replacing any previous holder.
    async fn set_edit_context(
        &self,
        actor: &Actor,
        id: EntityId,
        input: EditInput,
        ttl: Duration,
    ) -> StoreResult<EditContext>;

    /// Drop the context for `id`, returning it when one was live.
    async fn del_edit_context(&self, actor: &Actor, id: EntityId)
    -> StoreResult<Option<EditContext>>;

    /// Current live context for `id`; expired contexts read as absent.
    async fn fetch_edit_context(&self, id: EntityId) -> StoreResult<Option<EditContext>>;

    /// Remove every expired context and report how many were dropped.
    async fn purge_expired(&self) -> StoreResult<usize>;
}
