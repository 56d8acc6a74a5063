//! Topic identifiers and the per-type topic registry.
//!
//! # Design
//! - The registry is built once at startup and shared immutably (`Arc`).
//! - Every registered type owns exactly one (created, edited) pair and no topic
//!   name may be shared between types.
//! - Resolving an unregistered type is a configuration error, never a fallback.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};

use cairn_core::EntityType;
use serde::{Deserialize, Serialize};

use crate::error::TopicRegistryError;

/// Named notification channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(Cow<'static, str>);

impl Topic {
    /// Topic backed by a static name.
    #[must_use]
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Topic backed by an owned name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// Borrow the topic name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Topic {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Lifecycle phase a topic carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicKind {
    /// Entity creation.
    Created,
    /// Any change after creation, including edit-context updates and deletion.
    Edited,
}

/// The (created, edited) topics owned by one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicPair {
    /// Topic for newly created entities.
    pub created: Topic,
    /// Topic for updates, edit-context changes, and deletions.
    pub edited: Topic,
}

impl TopicPair {
    /// Pair named `<slug>.created` / `<slug>.edited`.
    #[must_use]
    pub fn for_entity_type(entity_type: EntityType) -> Self {
        let slug = entity_type.as_str();
        Self {
            created: Topic::new(format!("{slug}.created")),
            edited: Topic::new(format!("{slug}.edited")),
        }
    }

    /// Topic for the requested lifecycle phase.
    #[must_use]
    pub const fn get(&self, kind: TopicKind) -> &Topic {
        match kind {
            TopicKind::Created => &self.created,
            TopicKind::Edited => &self.edited,
        }
    }
}

/// Immutable mapping from entity type to its topic pair.
#[derive(Debug, Clone)]
pub struct TopicRegistry {
    pairs: BTreeMap<EntityType, TopicPair>,
}

impl TopicRegistry {
    /// Start an empty registry builder.
    #[must_use]
    pub fn builder() -> TopicRegistryBuilder {
        TopicRegistryBuilder::default()
    }

    /// Registry with the default pair for every entity type.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            pairs: EntityType::ALL
                .into_iter()
                .map(|kind| (kind, TopicPair::for_entity_type(kind)))
                .collect(),
        }
    }

    /// Topic pair registered for `entity_type`.
    ///
    /// # Errors
    ///
    /// Returns [`TopicRegistryError::Unregistered`] when the type has no pair.
    pub fn resolve(&self, entity_type: EntityType) -> Result<&TopicPair, TopicRegistryError> {
        self.pairs
            .get(&entity_type)
            .ok_or(TopicRegistryError::Unregistered { entity_type })
    }

    /// Single topic for a type and lifecycle phase.
    ///
    /// # Errors
    ///
    /// Returns [`TopicRegistryError::Unregistered`] when the type has no pair.
    pub fn topic(
        &self,
        entity_type: EntityType,
        kind: TopicKind,
    ) -> Result<&Topic, TopicRegistryError> {
        self.resolve(entity_type).map(|pair| pair.get(kind))
    }

    /// Registered entity types in stable order.
    pub fn entity_types(&self) -> impl Iterator<Item = EntityType> + '_ {
        self.pairs.keys().copied()
    }
}

/// Builder enforcing the one-pair-per-type invariant.
#[derive(Debug, Default)]
pub struct TopicRegistryBuilder {
    pairs: BTreeMap<EntityType, TopicPair>,
    duplicates: Vec<EntityType>,
}

impl TopicRegistryBuilder {
    /// Register a pair for an entity type.
    #[must_use]
    pub fn register(mut self, entity_type: EntityType, pair: TopicPair) -> Self {
        if self.pairs.insert(entity_type, pair).is_some() {
            self.duplicates.push(entity_type);
        }
        self
    }

    /// Register the default `<slug>.created` / `<slug>.edited` pair.
    #[must_use]
    pub fn register_default(self, entity_type: EntityType) -> Self {
        self.register(entity_type, TopicPair::for_entity_type(entity_type))
    }

    /// Freeze the registry.
    ///
    /// # Errors
    ///
    /// Fails when a type was registered twice or a topic name is shared.
    pub fn build(self) -> Result<TopicRegistry, TopicRegistryError> {
        if let Some(entity_type) = self.duplicates.first() {
            return Err(TopicRegistryError::DuplicateRegistration {
                entity_type: *entity_type,
            });
        }
        let mut seen = BTreeSet::new();
        for pair in self.pairs.values() {
            for topic in [&pair.created, &pair.edited] {
                if !seen.insert(topic.clone()) {
                    return Err(TopicRegistryError::TopicReused {
                        topic: topic.clone(),
                    });
                }
            }
        }
        Ok(TopicRegistry { pairs: self.pairs })
    }
}

/// Which topics a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TopicFilter {
    /// Every topic.
    #[default]
    All,
    /// Only the listed topics.
    Topics(BTreeSet<Topic>),
}

impl TopicFilter {
    /// Filter accepting both topics of a pair.
    #[must_use]
    pub fn pair(pair: &TopicPair) -> Self {
        Self::Topics([pair.created.clone(), pair.edited.clone()].into())
    }

    /// Filter accepting a single topic.
    #[must_use]
    pub fn only(topic: Topic) -> Self {
        Self::Topics([topic].into())
    }

    /// Whether notifications on `topic` pass the filter.
    #[must_use]
    pub fn matches(&self, topic: &Topic) -> bool {
        match self {
            Self::All => true,
            Self::Topics(topics) => topics.contains(topic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_covers_every_type() {
        let registry = TopicRegistry::standard();
        for kind in EntityType::ALL {
            assert!(registry.resolve(kind).is_ok());
        }
        let label = registry.resolve(EntityType::Label).expect("label pair");
        assert_eq!(label.created.as_str(), "label.created");
        assert_eq!(label.edited.as_str(), "label.edited");
        assert_eq!(
            registry
                .topic(EntityType::KillChainPhase, TopicKind::Edited)
                .map(Topic::as_str),
            Ok("kill-chain-phase.edited")
        );
    }

    #[test]
    fn unregistered_type_is_a_configuration_error() {
        let registry = TopicRegistry::builder()
            .register_default(EntityType::KillChainPhase)
            .build()
            .expect("registry");
        assert_eq!(
            registry.resolve(EntityType::Label),
            Err(TopicRegistryError::Unregistered {
                entity_type: EntityType::Label
            })
        );
        assert_eq!(
            registry.entity_types().collect::<Vec<_>>(),
            vec![EntityType::KillChainPhase]
        );
    }

    #[test]
    fn builder_rejects_duplicates_and_shared_topics() {
        let twice = TopicRegistry::builder()
            .register_default(EntityType::Label)
            .register_default(EntityType::Label)
            .build();
        assert!(matches!(
            twice,
            Err(TopicRegistryError::DuplicateRegistration { .. })
        ));

        let shared = TopicRegistry::builder()
            .register_default(EntityType::Label)
            .register(
                EntityType::KillChainPhase,
                TopicPair {
                    created: Topic::from_static("label.created"),
                    edited: Topic::from_static("phase.edited"),
                },
            )
            .build();
        assert!(matches!(shared, Err(TopicRegistryError::TopicReused { .. })));
    }

    #[test]
    fn filter_matches_selected_topics() {
        let pair = TopicPair::for_entity_type(EntityType::Label);
        let filter = TopicFilter::pair(&pair);
        assert!(filter.matches(&pair.created));
        assert!(!filter.matches(&Topic::from_static("kill-chain-phase.created")));
        assert!(TopicFilter::All.matches(&Topic::from_static("anything")));
        assert!(TopicFilter::only(pair.edited.clone()).matches(&pair.edited));
    }
}
