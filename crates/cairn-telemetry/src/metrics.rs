//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters the entity lifecycle pipeline reports on.

use std::sync::Arc;

use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    notifications_published_total: IntCounterVec,
    notification_delivery_warnings_total: IntCounterVec,
    entity_mutations_total: IntCounterVec,
    edit_contexts_set_total: IntCounter,
    edit_contexts_expired_total: IntCounter,
    edit_context_cleanup_failures_total: IntCounter,
    bus_subscribers: IntGauge,
    totals: Totals,
}

/// Unregistered label-free tallies backing [`MetricsSnapshot`].
struct Totals {
    published: IntCounter,
    warnings: IntCounter,
    mutations: IntCounter,
}

/// Snapshot of the unlabelled collectors for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Notifications accepted by the bus across all topics.
    pub notifications_published_total: u64,
    /// Publish attempts that ended in a delivery warning.
    pub notification_delivery_warnings_total: u64,
    /// Committed create, update, and delete operations.
    pub entity_mutations_total: u64,
    /// Edit contexts set or refreshed.
    pub edit_contexts_set_total: u64,
    /// Edit contexts removed by the expiry sweeper.
    pub edit_contexts_expired_total: u64,
    /// Edit contexts left behind because clearing them failed.
    pub edit_context_cleanup_failures_total: u64,
    /// Subscribers attached to the bus at the last observation.
    pub bus_subscribers: i64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let notifications_published_total = counter_vec(
            "notifications_published_total",
            "Notifications published on the bus by topic",
            &["topic"],
        )?;
        let notification_delivery_warnings_total = counter_vec(
            "notification_delivery_warnings_total",
            "Notifications that could not be delivered after a committed mutation",
            &["topic", "reason"],
        )?;
        let entity_mutations_total = counter_vec(
            "entity_mutations_total",
            "Committed entity mutations by type and action",
            &["entity_type", "action"],
        )?;
        let edit_contexts_set_total = IntCounter::with_opts(Opts::new(
            "edit_contexts_set_total",
            "Edit contexts set or refreshed",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "edit_contexts_set_total",
            source,
        })?;
        let edit_contexts_expired_total = IntCounter::with_opts(Opts::new(
            "edit_contexts_expired_total",
            "Edit contexts removed after their deadline passed",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "edit_contexts_expired_total",
            source,
        })?;
        let edit_context_cleanup_failures_total = IntCounter::with_opts(Opts::new(
            "edit_context_cleanup_failures_total",
            "Edit contexts of deleted entities that could not be cleared",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "edit_context_cleanup_failures_total",
            source,
        })?;
        let bus_subscribers = IntGauge::with_opts(Opts::new(
            "bus_subscribers",
            "Subscribers attached to the notification bus",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "bus_subscribers",
            source,
        })?;

        register(&registry, "notifications_published_total", &notifications_published_total)?;
        register(
            &registry,
            "notification_delivery_warnings_total",
            &notification_delivery_warnings_total,
        )?;
        register(&registry, "entity_mutations_total", &entity_mutations_total)?;
        register(&registry, "edit_contexts_set_total", &edit_contexts_set_total)?;
        register(&registry, "edit_contexts_expired_total", &edit_contexts_expired_total)?;
        register(
            &registry,
            "edit_context_cleanup_failures_total",
            &edit_context_cleanup_failures_total,
        )?;
        register(&registry, "bus_subscribers", &bus_subscribers)?;

        let totals = Totals {
            published: tally("notifications_published")?,
            warnings: tally("notification_delivery_warnings")?,
            mutations: tally("entity_mutations")?,
        };

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                notifications_published_total,
                notification_delivery_warnings_total,
                entity_mutations_total,
                edit_contexts_set_total,
                edit_contexts_expired_total,
                edit_context_cleanup_failures_total,
                bus_subscribers,
                totals,
            }),
        })
    }

    /// Count a notification accepted by the bus.
    pub fn inc_notification_published(&self, topic: &str) {
        self.inner
            .notifications_published_total
            .with_label_values(&[topic])
            .inc();
        self.inner.totals.published.inc();
    }

    /// Count a notification that could not be delivered.
    pub fn inc_delivery_warning(&self, topic: &str, reason: &str) {
        self.inner
            .notification_delivery_warnings_total
            .with_label_values(&[topic, reason])
            .inc();
        self.inner.totals.warnings.inc();
    }

    /// Count a committed entity mutation.
    pub fn inc_entity_mutation(&self, entity_type: &str, action: &str) {
        self.inner
            .entity_mutations_total
            .with_label_values(&[entity_type, action])
            .inc();
        self.inner.totals.mutations.inc();
    }

    /// Count an edit context set or refreshed.
    pub fn inc_edit_context_set(&self) {
        self.inner.edit_contexts_set_total.inc();
    }

    /// Count edit contexts dropped by the expiry sweeper.
    pub fn add_edit_contexts_expired(&self, count: usize) {
        self.inner
            .edit_contexts_expired_total
            .inc_by(u64::try_from(count).unwrap_or(u64::MAX));
    }

    /// Count an edit context that outlived its deleted entity.
    pub fn inc_edit_context_cleanup_failure(&self) {
        self.inner.edit_context_cleanup_failures_total.inc();
    }

    /// Record the number of bus subscribers.
    pub fn set_bus_subscribers(&self, count: usize) {
        self.inner
            .bus_subscribers
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot; labelled counters are summed across labels.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            notifications_published_total: self.inner.totals.published.get(),
            notification_delivery_warnings_total: self.inner.totals.warnings.get(),
            entity_mutations_total: self.inner.totals.mutations.get(),
            edit_contexts_set_total: self.inner.edit_contexts_set_total.get(),
            edit_contexts_expired_total: self.inner.edit_contexts_expired_total.get(),
            edit_context_cleanup_failures_total: self
                .inner
                .edit_context_cleanup_failures_total
                .get(),
            bus_subscribers: self.inner.bus_subscribers.get(),
        }
    }
}

fn counter_vec(name: &'static str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::MetricsCollector { name, source })
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> Result<()>
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}

fn tally(name: &'static str) -> Result<IntCounter> {
    IntCounter::new(name, name).map_err(|source| TelemetryError::MetricsCollector { name, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_snapshot_reflects_updates() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_notification_published("label.created");
        metrics.inc_notification_published("label.edited");
        metrics.inc_delivery_warning("label.edited", "bus_closed");
        metrics.inc_entity_mutation("label", "created");
        metrics.inc_edit_context_set();
        metrics.add_edit_contexts_expired(3);
        metrics.inc_edit_context_cleanup_failure();
        metrics.set_bus_subscribers(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.notifications_published_total, 2);
        assert_eq!(snapshot.notification_delivery_warnings_total, 1);
        assert_eq!(snapshot.entity_mutations_total, 1);
        assert_eq!(snapshot.edit_contexts_set_total, 1);
        assert_eq!(snapshot.edit_contexts_expired_total, 3);
        assert_eq!(snapshot.edit_context_cleanup_failures_total, 1);
        assert_eq!(snapshot.bus_subscribers, 2);

        let rendered = metrics.render()?;
        assert!(rendered.contains("notifications_published_total{topic=\"label.created\"} 1"));
        assert!(rendered.contains("notification_delivery_warnings_total"));
        assert!(rendered.contains("entity_mutations_total"));
        assert!(rendered.contains("edit_context_cleanup_failures_total 1"));
        Ok(())
    }

    #[test]
    fn snapshot_serialises_flat_counters() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_edit_context_set();
        let value = serde_json::to_value(metrics.snapshot()).expect("serialise snapshot");
        assert_eq!(value["edit_contexts_set_total"], 1);
        assert_eq!(value["notifications_published_total"], 0);
        Ok(())
    }
}
