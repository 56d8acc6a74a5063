//! Label management.
//!
//! Labels are free-form tags identified by their normalized `value`. A colour
//! is derived from the value when the caller does not supply one.

use cairn_core::{
    Actor, Attributes, EditInput, EntityId, EntityRecord, EntityType, ListArgs, Page, StandardId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::coordinator::EditContextCoordinator;
use crate::error::DomainResult;
use crate::repository::EntityRepository;
use crate::typed::{Annotated, EntityView, TypedEntities, required_text};

/// Typed label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    /// Entity identifier.
    pub id: EntityId,
    /// Identifier derived from the normalized value.
    pub standard_id: StandardId,
    /// Normalized, lower-case value.
    pub value: String,
    /// Display colour as `#rrggbb`.
    pub color: String,
    /// Actor that created the label.
    pub created_by: Actor,
    /// Actor responsible for the latest change.
    pub updated_by: Actor,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the latest change.
    pub updated_at: DateTime<Utc>,
}

impl EntityView for Label {
    const ENTITY_TYPE: EntityType = EntityType::Label;

    fn from_record(record: &EntityRecord) -> DomainResult<Self> {
        Ok(Self {
            id: record.id,
            standard_id: record.standard_id.clone(),
            value: required_text(record, "value")?,
            color: required_text(record, "color")?,
            created_by: record.created_by.clone(),
            updated_by: record.updated_by.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

/// Input for [`LabelService::add_label`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLabel {
    /// Raw value; normalized before storage.
    pub value: String,
    /// Explicit colour; derived from the value when absent.
    #[serde(default)]
    pub color: Option<String>,
}

impl AddLabel {
    /// Label input without an explicit colour.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            color: None,
        }
    }

    /// Use an explicit colour.
    #[must_use]
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    fn into_attributes(self) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.insert("value".into(), Value::String(self.value));
        if let Some(color) = self.color {
            attributes.insert("color".into(), Value::String(color));
        }
        attributes
    }
}

/// Label operations.
#[derive(Clone)]
pub struct LabelService {
    entities: TypedEntities<Label>,
}

impl LabelService {
    /// Build the service over shared repository and coordinator handles.
    #[must_use]
    pub const fn new(repository: EntityRepository, coordinator: EditContextCoordinator) -> Self {
        Self {
            entities: TypedEntities::new(repository, coordinator),
        }
    }

    /// Label by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`crate::DomainError::NotFound`] when no label has `id`.
    pub async fn find_by_id(&self, id: EntityId) -> DomainResult<Label> {
        self.entities.find_by_id(id).await
    }

    /// One page of labels; search matches the value.
    ///
    /// # Errors
    ///
    /// Returns [`crate::DomainError::Store`] for bad cursors or backend failures.
    pub async fn find_all(&self, args: &ListArgs) -> DomainResult<Page<Label>> {
        self.entities.find_all(args).await
    }

    /// Create a label, or return the one already holding the normalized value.
    ///
    /// # Errors
    ///
    /// - [`crate::DomainError::Validation`] for blank values or malformed colours.
    /// - [`crate::DomainError::Conflict`] when duplicates are rejected.
    pub async fn add_label(&self, actor: &Actor, input: AddLabel) -> DomainResult<Label> {
        self.entities.create(actor, input.into_attributes()).await
    }

    /// Set one attribute; `Value::Null` removes it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::DomainError::NotFound`] when no label has `id`, or
    /// [`crate::DomainError::Conflict`] when the new value belongs to another label.
    pub async fn label_edit_field(
        &self,
        actor: &Actor,
        id: EntityId,
        key: &str,
        value: Value,
    ) -> DomainResult<Label> {
        self.entities.edit_field(actor, id, key, value).await
    }

    /// Delete a label and its edit context; returns the removed identifier.
    ///
    /// # Errors
    ///
    /// Returns [`crate::DomainError::NotFound`] when no label has `id`.
    pub async fn label_delete(&self, actor: &Actor, id: EntityId) -> DomainResult<EntityId> {
        self.entities.delete(actor, id).await
    }

    /// Mark the label as being edited by `actor`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::DomainError::NotFound`] when no label has `id`.
    pub async fn label_edit_context(
        &self,
        actor: &Actor,
        id: EntityId,
        input: EditInput,
    ) -> DomainResult<Annotated<Label>> {
        self.entities.edit_context(actor, id, input).await
    }

    /// Clear the edit context of the label.
    ///
    /// # Errors
    ///
    /// Returns [`crate::DomainError::NotFound`] when no label has `id`.
    pub async fn label_clean_context(&self, actor: &Actor, id: EntityId) -> DomainResult<Label> {
        self.entities.clean_context(actor, id).await
    }
}
