//! Generic entity repository parameterised by [`EntityType`].
//!
//! # Design
//! - Topics are resolved before any store call so misconfigured types never
//!   persist anything.
//! - Attribute pipelines run on the full attribute map; updates are diffed back
//!   into a minimal [`EntityPatch`] afterwards.
//! - Publishing happens after the store commits and its outcome never changes
//!   the operation result.

use std::sync::Arc;

use cairn_core::{
    Actor, Attributes, CreateOutcome, DuplicatePolicy, EditContext, EditContextStore, EntityId,
    EntityPatch, EntityRecord, EntitySnapshot, EntityStore, EntityType, ListArgs, NewEntity, Page,
    StandardId,
};
use cairn_events::{LifecycleAction, TopicPair};
use tracing::{debug, info, instrument, warn};

use crate::error::{DomainError, DomainResult};
use crate::normalize::standard_id;
use crate::pipeline::AttributePipeline;
use crate::publisher::Publisher;

/// Default number of items returned by a listing.
const DEFAULT_PAGE_SIZE: usize = 50;
/// Upper bound applied to requested page sizes.
const MAX_PAGE_SIZE: usize = 500;
/// Attempts made to clear the edit context of a deleted entity.
const CONTEXT_CLEANUP_ATTEMPTS: u32 = 2;

/// Repository policies sourced from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepositorySettings {
    /// Behaviour when a create collides with an existing identity.
    pub duplicate_policy: DuplicatePolicy,
    /// Page size used when a listing does not ask for one.
    pub default_page_size: usize,
    /// Largest page a listing may return.
    pub max_page_size: usize,
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            duplicate_policy: DuplicatePolicy::default(),
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
        }
    }
}

impl RepositorySettings {
    /// Effective page size for a request.
    #[must_use]
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1))
    }
}

/// CRUD and listing over every registered entity type.
#[derive(Clone)]
pub struct EntityRepository {
    store: Arc<dyn EntityStore>,
    contexts: Arc<dyn EditContextStore>,
    publisher: Publisher,
    settings: RepositorySettings,
}

impl EntityRepository {
    /// Assemble a repository over the given stores.
    #[must_use]
    pub fn new(
        store: Arc<dyn EntityStore>,
        contexts: Arc<dyn EditContextStore>,
        publisher: Publisher,
        settings: RepositorySettings,
    ) -> Self {
        Self {
            store,
            contexts,
            publisher,
            settings,
        }
    }

    /// Active settings.
    #[must_use]
    pub const fn settings(&self) -> &RepositorySettings {
        &self.settings
    }

    /// Point lookup.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::NotFound`] when `id` does not resolve for the type.
    #[instrument(
        name = "entity_repository.find_by_id",
        skip(self),
        fields(entity_type = %entity_type)
    )]
    pub async fn find_by_id(
        &self,
        entity_type: EntityType,
        id: EntityId,
    ) -> DomainResult<EntityRecord> {
        Ok(self.store.load_by_id(id, entity_type).await?)
    }

    /// One page of entities; `first` is clamped to the configured maximum.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Store`] for undecodable cursors or backend failures.
    #[instrument(
        name = "entity_repository.find_all",
        skip(self, args),
        fields(entity_type = %entity_type)
    )]
    pub async fn find_all(
        &self,
        entity_type: EntityType,
        args: &ListArgs,
    ) -> DomainResult<Page<EntityRecord>> {
        let mut args = args.clone();
        args.first = Some(self.settings.page_size(args.first));
        let page = self
            .store
            .list_entities(&[entity_type], entity_type.indexed_attributes(), &args)
            .await?;
        debug!(
            items = page.items.len(),
            global_count = page.page_info.global_count,
            "listed entities"
        );
        Ok(page)
    }

    /// Lazy page-by-page iteration starting at `args`.
    #[must_use]
    pub fn pages(&self, entity_type: EntityType, args: ListArgs) -> EntityPager<'_> {
        EntityPager {
            repository: self,
            entity_type,
            args,
            exhausted: false,
        }
    }

    /// Validate, normalise, and persist a new entity, deduplicated by identity.
    ///
    /// Only a genuine insert is announced on the created-topic.
    ///
    /// # Errors
    ///
    /// - [`DomainError::Configuration`] when the type has no topics.
    /// - [`DomainError::Validation`] when the attributes fail the pipeline.
    /// - [`DomainError::Conflict`] when the identity exists and the policy is
    ///   [`DuplicatePolicy::Reject`].
    #[instrument(
        name = "entity_repository.create",
        skip(self, attributes),
        fields(entity_type = %entity_type, actor = %actor)
    )]
    pub async fn create(
        &self,
        actor: &Actor,
        entity_type: EntityType,
        mut attributes: Attributes,
    ) -> DomainResult<EntityRecord> {
        let topics = self.publisher.topics(entity_type)?;
        AttributePipeline::for_type(entity_type)
            .apply(&mut attributes)
            .map_err(|failure| DomainError::validation(entity_type, failure))?;
        let standard_id = standard_id(entity_type, &attributes)
            .map_err(|failure| DomainError::validation(entity_type, failure))?;

        let outcome = self
            .store
            .create_entity(
                actor,
                NewEntity {
                    entity_type,
                    standard_id,
                    attributes,
                },
            )
            .await?;

        match outcome {
            CreateOutcome::Created(record) => {
                self.publisher
                    .metrics()
                    .inc_entity_mutation(entity_type.as_str(), "created");
                info!(entity_id = %record.id, standard_id = %record.standard_id, "entity created");
                self.announce(
                    &topics,
                    LifecycleAction::Created,
                    EntitySnapshot::bare(record.clone()),
                    actor,
                );
                Ok(record)
            }
            CreateOutcome::Existing(record) => match self.settings.duplicate_policy {
                DuplicatePolicy::ReturnExisting => {
                    debug!(
                        entity_id = %record.id,
                        standard_id = %record.standard_id,
                        "identity already present; returning existing entity"
                    );
                    Ok(record)
                }
                DuplicatePolicy::Reject => Err(DomainError::Conflict {
                    entity_type,
                    standard_id: record.standard_id,
                    existing_id: record.id,
                }),
            },
        }
    }

    /// Apply a partial update and announce the post-mutation state.
    ///
    /// The merged attributes re-run the type's pipeline, and the standard
    /// identifier is re-derived when identity fields change.
    ///
    /// # Errors
    ///
    /// - [`DomainError::NotFound`] when `id` does not resolve; nothing is created.
    /// - [`DomainError::Validation`] when the merged attributes fail the pipeline.
    /// - [`DomainError::Conflict`] when the new identity belongs to another entity.
    #[instrument(
        name = "entity_repository.update_attribute",
        skip(self, patch),
        fields(entity_type = %entity_type, actor = %actor)
    )]
    pub async fn update_attribute(
        &self,
        actor: &Actor,
        entity_type: EntityType,
        id: EntityId,
        patch: EntityPatch,
    ) -> DomainResult<EntityRecord> {
        let topics = self.publisher.topics(entity_type)?;
        let current = self.store.load_by_id(id, entity_type).await?;

        let mut merged = current.attributes.clone();
        patch.apply_to(&mut merged);
        AttributePipeline::for_type(entity_type)
            .apply(&mut merged)
            .map_err(|failure| DomainError::validation(entity_type, failure))?;
        let standard_id = standard_id(entity_type, &merged)
            .map_err(|failure| DomainError::validation(entity_type, failure))?;

        let effective = diff(&current, merged, standard_id);
        let updated = self
            .store
            .update_attribute(actor, id, entity_type, effective)
            .await?;

        self.publisher
            .metrics()
            .inc_entity_mutation(entity_type.as_str(), "edited");
        info!(entity_id = %updated.id, "entity updated");
        let _announcing = self.publisher.lock_entity(id).await;
        let edit_context = self.live_context(id).await;
        self.announce(
            &topics,
            LifecycleAction::Edited,
            EntitySnapshot {
                entity: updated.clone(),
                edit_context,
            },
            actor,
        );
        Ok(updated)
    }

    /// Remove an entity and any edit context bound to it.
    ///
    /// The last known state is announced on the edited-topic as
    /// [`LifecycleAction::Deleted`].
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::NotFound`] when `id` does not resolve.
    #[instrument(
        name = "entity_repository.delete",
        skip(self),
        fields(entity_type = %entity_type, actor = %actor)
    )]
    pub async fn delete(
        &self,
        actor: &Actor,
        entity_type: EntityType,
        id: EntityId,
    ) -> DomainResult<EntityRecord> {
        let topics = self.publisher.topics(entity_type)?;
        let removed = self
            .store
            .delete_element_by_id(actor, id, entity_type)
            .await?;

        self.publisher
            .metrics()
            .inc_entity_mutation(entity_type.as_str(), "deleted");
        info!(entity_id = %removed.id, "entity deleted");
        let _announcing = self.publisher.lock_entity(id).await;
        self.announce(
            &topics,
            LifecycleAction::Deleted,
            EntitySnapshot::bare(removed.clone()),
            actor,
        );
        self.drop_context_of_deleted(actor, id).await;
        Ok(removed)
    }

    /// Clear the edit context of a deleted entity, retrying once.
    ///
    /// A context that survives both attempts stays readable until it expires;
    /// it is counted so operators can see the leftover.
    async fn drop_context_of_deleted(&self, actor: &Actor, id: EntityId) {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.contexts.del_edit_context(actor, id).await {
                Ok(_) => return,
                Err(err) if attempts < CONTEXT_CLEANUP_ATTEMPTS => {
                    debug!(entity_id = %id, error = %err, "retrying edit context cleanup");
                }
                Err(err) => {
                    self.publisher.metrics().inc_edit_context_cleanup_failure();
                    warn!(
                        entity_id = %id,
                        error = %err,
                        attempts,
                        "failed to clear edit context of deleted entity"
                    );
                    return;
                }
            }
        }
    }

    async fn live_context(&self, id: EntityId) -> Option<EditContext> {
        match self.contexts.fetch_edit_context(id).await {
            Ok(context) => context,
            Err(err) => {
                warn!(
                    entity_id = %id,
                    error = %err,
                    "edit context unavailable; publishing without it"
                );
                None
            }
        }
    }

    fn announce(
        &self,
        topics: &TopicPair,
        action: LifecycleAction,
        snapshot: EntitySnapshot,
        actor: &Actor,
    ) {
        // Failures are already logged and counted by the publisher.
        let _ = self.publisher.publish(topics, action, snapshot, actor);
    }
}

/// Minimal patch turning `current` into `merged`.
fn diff(current: &EntityRecord, merged: Attributes, standard_id: StandardId) -> EntityPatch {
    let unset = current
        .attributes
        .keys()
        .filter(|key| !merged.contains_key(*key))
        .cloned()
        .collect();
    let set = merged
        .into_iter()
        .filter(|(key, value)| current.attributes.get(key) != Some(value))
        .collect();
    EntityPatch {
        standard_id: (standard_id != current.standard_id).then_some(standard_id),
        set,
        unset,
    }
}

/// Lazily fetches successive pages of a listing.
pub struct EntityPager<'a> {
    repository: &'a EntityRepository,
    entity_type: EntityType,
    args: ListArgs,
    exhausted: bool,
}

impl EntityPager<'_> {
    /// Fetch the next page; `None` once the listing is exhausted.
    ///
    /// # Errors
    ///
    /// Propagates listing failures; the pager stays positioned on the failed page.
    pub async fn next_page(&mut self) -> DomainResult<Option<Page<EntityRecord>>> {
        if self.exhausted {
            return Ok(None);
        }
        let page = self.repository.find_all(self.entity_type, &self.args).await?;
        match page.page_info.end_cursor.clone() {
            Some(cursor) if page.page_info.has_next_page => self.args.after = Some(cursor),
            _ => self.exhausted = true,
        }
        Ok(Some(page))
    }

    /// Drain every remaining page into one vector.
    ///
    /// # Errors
    ///
    /// Propagates the first listing failure.
    pub async fn collect_all(mut self) -> DomainResult<Vec<EntityRecord>> {
        let mut items = Vec::new();
        while let Some(page) = self.next_page().await? {
            items.extend(page.items);
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn record(attributes: Attributes) -> EntityRecord {
        let now = Utc::now();
        EntityRecord {
            id: Uuid::new_v4(),
            standard_id: StandardId::new("label--a"),
            entity_type: EntityType::Label,
            attributes,
            created_by: Actor::new("alice"),
            updated_by: Actor::new("alice"),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn page_size_is_clamped() {
        let settings = RepositorySettings {
            duplicate_policy: DuplicatePolicy::Reject,
            default_page_size: 10,
            max_page_size: 20,
        };
        assert_eq!(settings.page_size(None), 10);
        assert_eq!(settings.page_size(Some(0)), 1);
        assert_eq!(settings.page_size(Some(15)), 15);
        assert_eq!(settings.page_size(Some(1_000)), 20);
    }

    #[test]
    fn diff_keeps_only_changes() {
        let mut current = Attributes::new();
        current.insert("value".into(), json!("apt"));
        current.insert("color".into(), json!("#000000"));
        current.insert("legacy".into(), json!(true));
        let current = record(current);

        let mut merged = Attributes::new();
        merged.insert("value".into(), json!("apt"));
        merged.insert("color".into(), json!("#ffffff"));

        let patch = diff(&current, merged, StandardId::new("label--a"));
        assert_eq!(patch.standard_id, None);
        assert_eq!(patch.set.len(), 1);
        assert_eq!(patch.set.get("color"), Some(&json!("#ffffff")));
        assert_eq!(patch.unset, vec!["legacy".to_string()]);

        let renamed = diff(&current, current.attributes.clone(), StandardId::new("label--b"));
        assert!(renamed.is_empty());
        assert_eq!(renamed.standard_id, Some(StandardId::new("label--b")));
    }
}
