use std::sync::Arc;
use std::time::Duration;

use cairn_config::ServiceConfig;
use cairn_core::{EditContextStore, EntityStore};
use cairn_data::{MemoryEditContextStore, MemoryEntityStore, PgEntityStore};
use cairn_domain::{DomainServices, DomainSettings, EditContextCoordinator};
use cairn_events::{NotificationBus, Subscription, TopicFilter, TopicRegistry};
use cairn_telemetry::{GlobalContextGuard, LoggingConfig, Metrics, build_sha, init_logging};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};

/// Dependencies required to start the application.
pub(crate) struct BootstrapDependencies {
    config: ServiceConfig,
    store: Arc<dyn EntityStore>,
    store_kind: &'static str,
    contexts: Arc<dyn EditContextStore>,
    metrics: Metrics,
}

impl BootstrapDependencies {
    /// Build the stores selected by configuration.
    pub(crate) async fn from_config(config: ServiceConfig) -> AppResult<Self> {
        let (store, store_kind): (Arc<dyn EntityStore>, &'static str) =
            if let Some(url) = config.database.url.as_deref() {
                let store = PgEntityStore::connect(url, config.database.max_connections)
                    .await
                    .map_err(|err| AppError::data("pg_entity_store.connect", err))?;
                (Arc::new(store), "postgres")
            } else {
                warn!("no database configured; entities are kept in memory");
                (Arc::new(MemoryEntityStore::new()), "memory")
            };
        let metrics =
            Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
        Ok(Self {
            config,
            store,
            store_kind,
            contexts: Arc::new(MemoryEditContextStore::new()),
            metrics,
        })
    }
}

/// Running services plus the background tasks that support them.
pub struct Application {
    services: DomainServices,
    bus: NotificationBus,
    metrics: Metrics,
    sweeper: JoinHandle<()>,
    audit: JoinHandle<u64>,
    _context: GlobalContextGuard,
}

impl Application {
    pub(crate) fn start(dependencies: BootstrapDependencies) -> Self {
        let BootstrapDependencies {
            config,
            store,
            store_kind,
            contexts,
            metrics,
        } = dependencies;
        let context = GlobalContextGuard::new(store_kind);

        let bus = NotificationBus::with_capacity(
            Arc::new(TopicRegistry::standard()),
            config.bus.capacity,
        );
        let services = DomainServices::new(
            store,
            contexts,
            bus.clone(),
            metrics.clone(),
            DomainSettings {
                duplicate_policy: config.repository.duplicate_policy,
                edit_context_ttl: config.edit_context.ttl,
                default_page_size: config.repository.default_page_size,
                max_page_size: config.repository.max_page_size,
            },
        );

        let audit = spawn_notification_audit(bus.subscribe(TopicFilter::All), metrics.clone());
        metrics.set_bus_subscribers(bus.subscriber_count());
        let sweeper = spawn_context_sweeper(
            services.coordinator().clone(),
            config.edit_context.sweep_interval,
        );

        info!(
            store = store_kind,
            bus_capacity = bus.capacity(),
            edit_context_ttl_secs = config.edit_context.ttl.as_secs(),
            "cairn services ready"
        );
        Self {
            services,
            bus,
            metrics,
            sweeper,
            audit,
            _context: context,
        }
    }

    /// Domain services.
    #[must_use]
    pub const fn services(&self) -> &DomainServices {
        &self.services
    }

    /// Notification bus shared by every service.
    #[must_use]
    pub const fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    /// Metrics registry shared by every service.
    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Close the bus, stop background tasks, and report how many
    /// notifications the audit subscriber observed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Task`] when a background task panicked.
    pub async fn shutdown(self) -> AppResult<u64> {
        self.bus.close();

        self.sweeper.abort();
        if let Err(err) = self.sweeper.await
            && err.is_panic()
        {
            return Err(AppError::Task {
                task: "edit_context_sweeper",
                source: err,
            });
        }

        let audited = self.audit.await.map_err(|source| AppError::Task {
            task: "notification_audit",
            source,
        })?;
        info!(audited, "cairn shutdown complete");
        Ok(audited)
    }
}

/// Entry point for the cairn boot sequence.
///
/// # Errors
///
/// Returns an error if configuration, logging, or store construction fails.
pub async fn run_app() -> AppResult<()> {
    let config =
        ServiceConfig::from_env().map_err(|err| AppError::config("service_config.from_env", err))?;
    init_logging(&LoggingConfig {
        level: &config.telemetry.log_level,
        format: config.telemetry.log_format,
        build_sha: build_sha(),
    })
    .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    info!("cairn bootstrap starting");

    let dependencies = BootstrapDependencies::from_config(config).await?;
    let application = Application::start(dependencies);

    tokio::signal::ctrl_c()
        .await
        .map_err(|err| AppError::io("signal.ctrl_c", err))?;
    info!("shutdown signal received");
    application.shutdown().await.map(|_| ())
}

fn spawn_context_sweeper(coordinator: EditContextCoordinator, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(err) = coordinator.sweep_expired().await {
                warn!(error = %err, "edit context sweep failed");
            }
        }
    })
}

fn spawn_notification_audit(subscription: Subscription, metrics: Metrics) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut observed = 0_u64;
        let mut stream = Box::pin(subscription.into_stream());
        while let Some(item) = stream.next().await {
            match item {
                Ok(notification) => {
                    observed += 1;
                    debug!(
                        notification_id = notification.id,
                        topic = %notification.topic,
                        action = notification.action.kind(),
                        entity_id = %notification.entity_id(),
                        actor = %notification.actor,
                        "notification observed"
                    );
                }
                Err(err) => {
                    warn!(error = %err, "notification audit fell behind the bus");
                }
            }
        }
        metrics.set_bus_subscribers(0);
        observed
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::{Actor, EditInput};
    use cairn_domain::AddLabel;
    use std::error::Error;

    type TestResult = Result<(), Box<dyn Error>>;

    async fn memory_application(config: ServiceConfig) -> AppResult<Application> {
        let dependencies = BootstrapDependencies::from_config(config).await?;
        Ok(Application::start(dependencies))
    }

    #[tokio::test]
    async fn memory_bootstrap_serves_and_audits_notifications() -> TestResult {
        let application = memory_application(ServiceConfig::default()).await?;
        assert_eq!(application.bus().subscriber_count(), 1);

        let labels = application.services().labels();
        let alice = Actor::new("alice");
        let label = labels
            .add_label(&alice, AddLabel::new("Ransomware"))
            .await?;
        labels
            .label_edit_context(&alice, label.id, EditInput::focus("color"))
            .await?;
        assert_eq!(
            application.metrics().snapshot().notifications_published_total,
            2
        );

        let audited = application.shutdown().await?;
        assert_eq!(audited, 2);
        Ok(())
    }

    #[tokio::test]
    async fn sweeper_purges_expired_contexts() -> TestResult {
        let mut config = ServiceConfig::default();
        config.edit_context.ttl = Duration::ZERO;
        config.edit_context.sweep_interval = Duration::from_millis(10);
        let application = memory_application(config).await?;

        let labels = application.services().labels();
        let alice = Actor::new("alice");
        let label = labels
            .add_label(&alice, AddLabel::new("stale"))
            .await?;
        labels
            .label_edit_context(&alice, label.id, EditInput::default())
            .await?;

        for _ in 0..100 {
            if application.metrics().snapshot().edit_contexts_expired_total == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            application.metrics().snapshot().edit_contexts_expired_total,
            1
        );
        application.shutdown().await?;
        Ok(())
    }
}
