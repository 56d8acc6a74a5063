//! Typed views over entity records and the generic service behind them.

use std::marker::PhantomData;

use cairn_core::{
    Actor, Attributes, EditContext, EditInput, EntityId, EntityPatch, EntityRecord,
    EntitySnapshot, EntityType, ListArgs, Page,
};
use serde_json::Value;

use crate::coordinator::EditContextCoordinator;
use crate::error::{DomainError, DomainResult};
use crate::pipeline::ValidationFailure;
use crate::repository::EntityRepository;

/// Strongly typed projection of one [`EntityType`].
pub trait EntityView: Sized {
    /// Type tag the view reads.
    const ENTITY_TYPE: EntityType;

    /// Project a stored record.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] when a required attribute is missing
    /// or has the wrong shape.
    fn from_record(record: &EntityRecord) -> DomainResult<Self>;
}

/// Typed entity together with its live edit context.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotated<T> {
    /// Typed entity.
    pub entity: T,
    /// Actor currently editing the entity, if any.
    pub edit_context: Option<EditContext>,
}

impl<T: EntityView> Annotated<T> {
    /// Project a published snapshot.
    ///
    /// # Errors
    ///
    /// Propagates [`EntityView::from_record`] failures.
    pub fn from_snapshot(snapshot: &EntitySnapshot) -> DomainResult<Self> {
        Ok(Self {
            entity: T::from_record(&snapshot.entity)?,
            edit_context: snapshot.edit_context.clone(),
        })
    }
}

/// String attribute required by a view.
pub(crate) fn required_text(record: &EntityRecord, field: &'static str) -> DomainResult<String> {
    record
        .str_attribute(field)
        .map(str::to_string)
        .ok_or_else(|| {
            DomainError::validation(
                record.entity_type,
                ValidationFailure::new(field, "missing_attribute"),
            )
        })
}

/// Entity operations shared by every typed service.
pub(crate) struct TypedEntities<T> {
    repository: EntityRepository,
    coordinator: EditContextCoordinator,
    view: PhantomData<fn() -> T>,
}

impl<T> Clone for TypedEntities<T> {
    fn clone(&self) -> Self {
        Self {
            repository: self.repository.clone(),
            coordinator: self.coordinator.clone(),
            view: PhantomData,
        }
    }
}

impl<T: EntityView> TypedEntities<T> {
    pub(crate) const fn new(
        repository: EntityRepository,
        coordinator: EditContextCoordinator,
    ) -> Self {
        Self {
            repository,
            coordinator,
            view: PhantomData,
        }
    }

    pub(crate) async fn find_by_id(&self, id: EntityId) -> DomainResult<T> {
        let record = self.repository.find_by_id(T::ENTITY_TYPE, id).await?;
        T::from_record(&record)
    }

    pub(crate) async fn find_all(&self, args: &ListArgs) -> DomainResult<Page<T>> {
        self.repository
            .find_all(T::ENTITY_TYPE, args)
            .await?
            .try_map(|record| T::from_record(&record))
    }

    pub(crate) async fn create(&self, actor: &Actor, attributes: Attributes) -> DomainResult<T> {
        let record = self
            .repository
            .create(actor, T::ENTITY_TYPE, attributes)
            .await?;
        T::from_record(&record)
    }

    /// `Value::Null` removes the attribute.
    pub(crate) async fn edit_field(
        &self,
        actor: &Actor,
        id: EntityId,
        key: &str,
        value: Value,
    ) -> DomainResult<T> {
        let mut patch = EntityPatch::default();
        if value.is_null() {
            patch.unset.push(key.to_string());
        } else {
            patch.set.insert(key.to_string(), value);
        }
        let record = self
            .repository
            .update_attribute(actor, T::ENTITY_TYPE, id, patch)
            .await?;
        T::from_record(&record)
    }

    pub(crate) async fn delete(&self, actor: &Actor, id: EntityId) -> DomainResult<EntityId> {
        let removed = self.repository.delete(actor, T::ENTITY_TYPE, id).await?;
        Ok(removed.id)
    }

    pub(crate) async fn edit_context(
        &self,
        actor: &Actor,
        id: EntityId,
        input: EditInput,
    ) -> DomainResult<Annotated<T>> {
        let snapshot = self
            .coordinator
            .set_edit_context(actor, T::ENTITY_TYPE, id, input)
            .await?;
        Annotated::from_snapshot(&snapshot)
    }

    pub(crate) async fn clean_context(&self, actor: &Actor, id: EntityId) -> DomainResult<T> {
        let snapshot = self
            .coordinator
            .clear_edit_context(actor, T::ENTITY_TYPE, id)
            .await?;
        T::from_record(&snapshot.entity)
    }
}
