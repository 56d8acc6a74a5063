//! Kill chain phases: one step of a named kill chain, ordered by `x_order`.

use cairn_core::{
    Actor, Attributes, EditInput, EntityId, EntityRecord, EntityType, ListArgs, Page, StandardId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::coordinator::EditContextCoordinator;
use crate::error::{DomainError, DomainResult};
use crate::pipeline::ValidationFailure;
use crate::repository::EntityRepository;
use crate::typed::{Annotated, EntityView, TypedEntities, required_text};

/// Typed kill chain phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillChainPhase {
    /// Entity identifier.
    pub id: EntityId,
    /// Identifier derived from the chain and phase names.
    pub standard_id: StandardId,
    /// Name of the kill chain, e.g. `mitre-attack`.
    pub kill_chain_name: String,
    /// Phase within the chain.
    pub phase_name: String,
    /// Position of the phase within its chain.
    pub x_order: i64,
    /// Actor that created the phase.
    pub created_by: Actor,
    /// Actor responsible for the latest change.
    pub updated_by: Actor,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the latest change.
    pub updated_at: DateTime<Utc>,
}

impl EntityView for KillChainPhase {
    const ENTITY_TYPE: EntityType = EntityType::KillChainPhase;

    fn from_record(record: &EntityRecord) -> DomainResult<Self> {
        let x_order = record
            .attribute("x_order")
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                DomainError::validation(
                    record.entity_type,
                    ValidationFailure::new("x_order", "missing_attribute"),
                )
            })?;
        Ok(Self {
            id: record.id,
            standard_id: record.standard_id.clone(),
            kill_chain_name: required_text(record, "kill_chain_name")?,
            phase_name: required_text(record, "phase_name")?,
            x_order,
            created_by: record.created_by.clone(),
            updated_by: record.updated_by.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

/// Input for [`KillChainPhaseService::add_kill_chain_phase`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddKillChainPhase {
    /// Kill chain name.
    pub kill_chain_name: String,
    /// Phase name.
    pub phase_name: String,
    /// Position within the chain; zero when absent.
    #[serde(default)]
    pub x_order: Option<i64>,
}

impl AddKillChainPhase {
    fn into_attributes(self) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.insert("kill_chain_name".into(), Value::String(self.kill_chain_name));
        attributes.insert("phase_name".into(), Value::String(self.phase_name));
        if let Some(order) = self.x_order {
            attributes.insert("x_order".into(), Value::from(order));
        }
        attributes
    }
}

/// Kill chain phase operations.
#[derive(Clone)]
pub struct KillChainPhaseService {
    entities: TypedEntities<KillChainPhase>,
}

impl KillChainPhaseService {
    /// Build the service over shared repository and coordinator handles.
    #[must_use]
    pub const fn new(repository: EntityRepository, coordinator: EditContextCoordinator) -> Self {
        Self {
            entities: TypedEntities::new(repository, coordinator),
        }
    }

    /// Phase by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::NotFound`] when no phase has `id`.
    pub async fn find_by_id(&self, id: EntityId) -> DomainResult<KillChainPhase> {
        self.entities.find_by_id(id).await
    }

    /// One page of phases; search matches chain and phase names.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Store`] for bad cursors or backend failures.
    pub async fn find_all(&self, args: &ListArgs) -> DomainResult<Page<KillChainPhase>> {
        self.entities.find_all(args).await
    }

    /// Create a phase, or return the one with the same chain and phase names.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] for blank names.
    pub async fn add_kill_chain_phase(
        &self,
        actor: &Actor,
        input: AddKillChainPhase,
    ) -> DomainResult<KillChainPhase> {
        self.entities.create(actor, input.into_attributes()).await
    }

    /// Set one attribute; `Value::Null` removes it.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::NotFound`] when no phase has `id`.
    pub async fn kill_chain_phase_edit_field(
        &self,
        actor: &Actor,
        id: EntityId,
        key: &str,
        value: Value,
    ) -> DomainResult<KillChainPhase> {
        self.entities.edit_field(actor, id, key, value).await
    }

    /// Delete a phase and its edit context; returns the removed identifier.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::NotFound`] when no phase has `id`.
    pub async fn kill_chain_phase_delete(
        &self,
        actor: &Actor,
        id: EntityId,
    ) -> DomainResult<EntityId> {
        self.entities.delete(actor, id).await
    }

    /// Mark the phase as being edited by `actor`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::NotFound`] when no phase has `id`.
    pub async fn kill_chain_phase_edit_context(
        &self,
        actor: &Actor,
        id: EntityId,
        input: EditInput,
    ) -> DomainResult<Annotated<KillChainPhase>> {
        self.entities.edit_context(actor, id, input).await
    }

    /// Clear the edit context of the phase.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::NotFound`] when no phase has `id`.
    pub async fn kill_chain_phase_clean_context(
        &self,
        actor: &Actor,
        id: EntityId,
    ) -> DomainResult<KillChainPhase> {
        self.entities.clean_context(actor, id).await
    }
}
