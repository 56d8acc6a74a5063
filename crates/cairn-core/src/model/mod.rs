//! Entity records, edit contexts, and the identifiers that tie them together.
//!
//! # Design
//! - `EntityType` is a closed set; per-type metadata (slug, identity fields,
//!   searchable attributes) lives next to the variants so adding a type is a
//!   single edit.
//! - Records carry untyped attribute maps; typed views are built by the domain layer.

mod listing;

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub use listing::{Cursor, Filter, ListArgs, OrderMode, Page, PageInfo, attribute_text};

/// Globally unique entity identifier.
pub type EntityId = Uuid;

/// Attribute map stored with each entity.
pub type Attributes = Map<String, Value>;

/// Closed set of entity types managed through the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityType {
    /// Free-form tag attached to other objects.
    Label,
    /// Phase of a named kill chain.
    KillChainPhase,
}

impl EntityType {
    /// Every variant, in declaration order.
    pub const ALL: [Self; 2] = [Self::Label, Self::KillChainPhase];

    /// Stable slug used in standard identifiers, storage rows, and topics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Label => "label",
            Self::KillChainPhase => "kill-chain-phase",
        }
    }

    /// Attributes whose normalized values define the entity's identity.
    #[must_use]
    pub const fn identity_fields(self) -> &'static [&'static str] {
        match self {
            Self::Label => &["value"],
            Self::KillChainPhase => &["kill_chain_name", "phase_name"],
        }
    }

    /// Attributes matched by free-text search when listing.
    #[must_use]
    pub const fn indexed_attributes(self) -> &'static [&'static str] {
        match self {
            Self::Label => &["value"],
            Self::KillChainPhase => &["kill_chain_name", "phase_name"],
        }
    }
}

impl Display for EntityType {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = UnknownEntityType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| UnknownEntityType {
                value: value.to_string(),
            })
    }
}

/// Raised when a stored or supplied slug matches no entity type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown entity type")]
pub struct UnknownEntityType {
    /// Slug that failed to parse.
    pub value: String,
}

/// Deterministic secondary identifier derived from an entity's normalized identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StandardId(String);

impl StandardId {
    /// Wrap an already derived identifier.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for StandardId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Opaque identity of the user or system acting on an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Actor(String);

impl Actor {
    /// Build an actor from an opaque identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Actor used for housekeeping performed by the platform itself.
    #[must_use]
    pub fn system() -> Self {
        Self::new("system")
    }

    /// Opaque identifier supplied by the caller.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl Display for Actor {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Durable entity as persisted by an [`crate::EntityStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Globally unique identifier.
    pub id: EntityId,
    /// Identifier derived from the normalized identity attributes.
    pub standard_id: StandardId,
    /// Type tag.
    pub entity_type: EntityType,
    /// Type-specific attributes.
    pub attributes: Attributes,
    /// Actor that created the entity.
    pub created_by: Actor,
    /// Actor responsible for the latest mutation.
    pub updated_by: Actor,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the latest mutation.
    pub updated_at: DateTime<Utc>,
}

impl EntityRecord {
    /// Raw attribute value, if present.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Attribute value when it is stored as a string.
    #[must_use]
    pub fn str_attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }
}

/// Fully prepared entity handed to [`crate::EntityStore::create_entity`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntity {
    /// Type tag.
    pub entity_type: EntityType,
    /// Identifier derived from the normalized identity attributes.
    pub standard_id: StandardId,
    /// Normalized attributes.
    pub attributes: Attributes,
}

/// Partial update applied by [`crate::EntityStore::update_attribute`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityPatch {
    /// Standard identifier after the update; unchanged identities repeat the current value.
    pub standard_id: Option<StandardId>,
    /// Attributes to insert or replace.
    pub set: Attributes,
    /// Attributes to remove.
    pub unset: Vec<String>,
}

impl EntityPatch {
    /// Whether the patch carries no attribute changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }

    /// Apply the patch to an attribute map in place.
    pub fn apply_to(&self, attributes: &mut Attributes) {
        for (key, value) in &self.set {
            attributes.insert(key.clone(), value.clone());
        }
        for key in &self.unset {
            attributes.remove(key);
        }
    }
}

/// Result of a create call against a store that deduplicates by standard identifier.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// A new record was inserted.
    Created(EntityRecord),
    /// A record with the same standard identifier already existed; nothing was written.
    Existing(EntityRecord),
}

impl CreateOutcome {
    /// Whether the call inserted a new record.
    #[must_use]
    pub const fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    /// Borrow the resulting record.
    #[must_use]
    pub const fn record(&self) -> &EntityRecord {
        match self {
            Self::Created(record) | Self::Existing(record) => record,
        }
    }

    /// Take ownership of the resulting record.
    #[must_use]
    pub fn into_record(self) -> EntityRecord {
        match self {
            Self::Created(record) | Self::Existing(record) => record,
        }
    }
}

/// What to do when a create collides with an existing normalized identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Return the existing entity without mutating or notifying.
    #[default]
    ReturnExisting,
    /// Fail the create with a conflict error.
    Reject,
}

impl DuplicatePolicy {
    /// Render the policy as its configuration string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReturnExisting => "return_existing",
            Self::Reject => "reject",
        }
    }
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "return_existing" => Ok(Self::ReturnExisting),
            "reject" => Ok(Self::Reject),
            other => Err(other.to_string()),
        }
    }
}

/// Partial input an actor is staging while editing an entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditInput {
    /// Field currently focused in the editor, if any.
    pub focus_on: Option<String>,
    /// Uncommitted attribute values.
    #[serde(default)]
    pub staged: Attributes,
}

impl EditInput {
    /// Input focusing a single field with nothing staged.
    #[must_use]
    pub fn focus(field: impl Into<String>) -> Self {
        Self {
            focus_on: Some(field.into()),
            staged: Attributes::new(),
        }
    }
}

/// Ephemeral "actor is editing entity" annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditContext {
    /// Entity being edited.
    pub entity_id: EntityId,
    /// Actor holding the context.
    pub actor: Actor,
    /// Staged editor input.
    pub input: EditInput,
    /// Time of the latest set call.
    pub updated_at: DateTime<Utc>,
    /// Deadline after which the context reads as absent.
    pub expires_at: DateTime<Utc>,
}

impl EditContext {
    /// Build a context that expires `ttl` after `now`.
    #[must_use]
    pub fn new(
        entity_id: EntityId,
        actor: Actor,
        input: EditInput,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            entity_id,
            actor,
            input,
            updated_at: now,
            expires_at,
        }
    }

    /// Whether the context has lapsed at the given instant.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Entity state as published to subscribers, annotated with who is editing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// Durable entity state.
    pub entity: EntityRecord,
    /// Active edit context, when one is held.
    pub edit_context: Option<EditContext>,
}

impl EntitySnapshot {
    /// Snapshot without an edit annotation.
    #[must_use]
    pub const fn bare(entity: EntityRecord) -> Self {
        Self {
            entity,
            edit_context: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entity_type_slugs_round_trip() {
        for kind in EntityType::ALL {
            assert_eq!(kind.as_str().parse::<EntityType>(), Ok(kind));
        }
        assert!("campaign".parse::<EntityType>().is_err());
        assert_eq!(
            serde_json::to_value(EntityType::KillChainPhase).ok(),
            Some(json!("kill-chain-phase"))
        );
    }

    #[test]
    fn patch_sets_then_unsets() {
        let mut attributes = Attributes::new();
        attributes.insert("value".into(), json!("old"));
        attributes.insert("color".into(), json!("#000000"));

        let mut set = Attributes::new();
        set.insert("value".into(), json!("new"));
        let patch = EntityPatch {
            standard_id: None,
            set,
            unset: vec!["color".into()],
        };
        patch.apply_to(&mut attributes);

        assert_eq!(attributes.get("value"), Some(&json!("new")));
        assert!(!attributes.contains_key("color"));
        assert!(!patch.is_empty());
    }

    #[test]
    fn edit_context_expiry_is_inclusive() {
        let now = Utc::now();
        let context = EditContext::new(
            Uuid::nil(),
            Actor::new("alice"),
            EditInput::focus("color"),
            now,
            Duration::from_secs(10),
        );
        assert!(!context.is_expired_at(now));
        assert!(context.is_expired_at(now + chrono::Duration::seconds(10)));
    }

    #[test]
    fn duplicate_policy_parses_configuration_strings() {
        assert_eq!(
            "return_existing".parse::<DuplicatePolicy>(),
            Ok(DuplicatePolicy::ReturnExisting)
        );
        assert_eq!("reject".parse::<DuplicatePolicy>(), Ok(DuplicatePolicy::Reject));
        assert_eq!("merge".parse::<DuplicatePolicy>(), Err("merge".to_string()));
        assert_eq!(DuplicatePolicy::default().as_str(), "return_existing");
    }
}
