//! Wiring of repository, coordinator, and typed services over shared handles.

use std::sync::Arc;
use std::time::Duration;

use cairn_core::{DuplicatePolicy, EditContextStore, EntityStore};
use cairn_events::NotificationBus;
use cairn_telemetry::Metrics;

use crate::coordinator::{DEFAULT_EDIT_CONTEXT_TTL, EditContextCoordinator};
use crate::kill_chain_phase::KillChainPhaseService;
use crate::label::LabelService;
use crate::publisher::Publisher;
use crate::repository::{EntityRepository, RepositorySettings};

/// Policies the domain layer takes from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainSettings {
    /// Behaviour when a create collides with an existing identity.
    pub duplicate_policy: DuplicatePolicy,
    /// Lifetime of an edit context without a refresh.
    pub edit_context_ttl: Duration,
    /// Page size used when a listing does not ask for one.
    pub default_page_size: usize,
    /// Largest page a listing may return.
    pub max_page_size: usize,
}

impl Default for DomainSettings {
    fn default() -> Self {
        let repository = RepositorySettings::default();
        Self {
            duplicate_policy: repository.duplicate_policy,
            edit_context_ttl: DEFAULT_EDIT_CONTEXT_TTL,
            default_page_size: repository.default_page_size,
            max_page_size: repository.max_page_size,
        }
    }
}

/// Every domain service, sharing one store pair, bus, and metrics registry.
#[derive(Clone)]
pub struct DomainServices {
    repository: EntityRepository,
    coordinator: EditContextCoordinator,
    labels: LabelService,
    kill_chain_phases: KillChainPhaseService,
}

impl DomainServices {
    /// Wire the services.
    #[must_use]
    pub fn new(
        store: Arc<dyn EntityStore>,
        contexts: Arc<dyn EditContextStore>,
        bus: NotificationBus,
        metrics: Metrics,
        settings: DomainSettings,
    ) -> Self {
        let publisher = Publisher::new(bus, metrics);
        let repository = EntityRepository::new(
            Arc::clone(&store),
            Arc::clone(&contexts),
            publisher.clone(),
            RepositorySettings {
                duplicate_policy: settings.duplicate_policy,
                default_page_size: settings.default_page_size,
                max_page_size: settings.max_page_size,
            },
        );
        let coordinator =
            EditContextCoordinator::new(store, contexts, publisher, settings.edit_context_ttl);
        Self {
            labels: LabelService::new(repository.clone(), coordinator.clone()),
            kill_chain_phases: KillChainPhaseService::new(repository.clone(), coordinator.clone()),
            repository,
            coordinator,
        }
    }

    /// Untyped repository.
    #[must_use]
    pub const fn repository(&self) -> &EntityRepository {
        &self.repository
    }

    /// Edit-context coordinator.
    #[must_use]
    pub const fn coordinator(&self) -> &EditContextCoordinator {
        &self.coordinator
    }

    /// Label operations.
    #[must_use]
    pub const fn labels(&self) -> &LabelService {
        &self.labels
    }

    /// Kill chain phase operations.
    #[must_use]
    pub const fn kill_chain_phases(&self) -> &KillChainPhaseService {
        &self.kill_chain_phases
    }
}
