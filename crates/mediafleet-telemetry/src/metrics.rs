//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters and gauges the coordinators and sync loop report.

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
    messages_published_total: IntCounterVec,
    messages_consumed_total: IntCounterVec,
    publish_retries_total: IntCounter,
    saga_transitions_total: IntCounterVec,
    saga_replies_discarded_total: IntCounterVec,
    download_failures_total: IntCounter,
    catalog_items: IntGauge,
    watched_nodes: IntGauge,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Items currently held by the catalog.
    pub catalog_items: i64,
    /// Nodes currently under a connectivity watch.
    pub watched_nodes: i64,
    /// Publishes retried because the channel was not open.
    pub bus_publish_retries_total: u64,
    /// Fan-out downloads that failed.
    pub download_failures_total: u64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let messages_published_total = counter_vec(
            "bus_messages_published_total",
            "Messages published by topic",
            &["topic"],
        )?;
        let messages_consumed_total = counter_vec(
            "bus_messages_consumed_total",
            "Messages dispatched to handlers by topic",
            &["topic"],
        )?;
        let publish_retries_total = IntCounter::with_opts(Opts::new(
            "bus_publish_retries_total",
            "Publishes retried because the channel was not open",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "bus_publish_retries_total",
            source,
        })?;
        let saga_transitions_total = counter_vec(
            "saga_transitions_total",
            "Saga status transitions by saga kind and target status",
            &["saga", "status"],
        )?;
        let saga_replies_discarded_total = counter_vec(
            "saga_replies_discarded_total",
            "Node replies discarded without mutating the saga",
            &["saga"],
        )?;
        let download_failures_total = IntCounter::with_opts(Opts::new(
            "download_failures_total",
            "Fan-out downloads that failed",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "download_failures_total",
            source,
        })?;
        let catalog_items = gauge("catalog_items", "Items held by the catalog")?;
        let watched_nodes = gauge("watched_nodes", "Nodes under a connectivity watch")?;

        register(&registry, "bus_messages_published_total", &messages_published_total)?;
        register(&registry, "bus_messages_consumed_total", &messages_consumed_total)?;
        register(&registry, "bus_publish_retries_total", &publish_retries_total)?;
        register(&registry, "saga_transitions_total", &saga_transitions_total)?;
        register(
            &registry,
            "saga_replies_discarded_total",
            &saga_replies_discarded_total,
        )?;
        register(&registry, "download_failures_total", &download_failures_total)?;
        register(&registry, "catalog_items", &catalog_items)?;
        register(&registry, "watched_nodes", &watched_nodes)?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                messages_published_total,
                messages_consumed_total,
                publish_retries_total,
                saga_transitions_total,
                saga_replies_discarded_total,
                download_failures_total,
                catalog_items,
                watched_nodes,
            }),
        })
    }

    /// Increment the published message counter for a topic.
    pub fn inc_message_published(&self, topic: &str) {
        self.inner
            .messages_published_total
            .with_label_values(&[topic])
            .inc();
    }

    /// Increment the consumed message counter for a topic.
    pub fn inc_message_consumed(&self, topic: &str) {
        self.inner
            .messages_consumed_total
            .with_label_values(&[topic])
            .inc();
    }

    /// Increment the publish retry counter.
    pub fn inc_publish_retry(&self) {
        self.inner.publish_retries_total.inc();
    }

    /// Record a saga moving to `status`.
    pub fn inc_saga_transition(&self, saga: &str, status: &str) {
        self.inner
            .saga_transitions_total
            .with_label_values(&[saga, status])
            .inc();
    }

    /// Record a node reply that was discarded.
    pub fn inc_reply_discarded(&self, saga: &str) {
        self.inner
            .saga_replies_discarded_total
            .with_label_values(&[saga])
            .inc();
    }

    /// Increment the failed download counter.
    pub fn inc_download_failure(&self) {
        self.inner.download_failures_total.inc();
    }

    /// Set the catalog size gauge.
    pub fn set_catalog_items(&self, count: usize) {
        self.inner.catalog_items.set(saturating_i64(count));
    }

    /// Set the watched node gauge.
    pub fn set_watched_nodes(&self, count: usize) {
        self.inner.watched_nodes.set(saturating_i64(count));
    }

    /// Current value of the saga transition counter for a label pair.
    #[must_use]
    pub fn saga_transitions(&self, saga: &str, status: &str) -> u64 {
        self.inner
            .saga_transitions_total
            .with_label_values(&[saga, status])
            .get()
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

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            catalog_items: self.inner.catalog_items.get(),
            watched_nodes: self.inner.watched_nodes.get(),
            bus_publish_retries_total: self.inner.publish_retries_total.get(),
            download_failures_total: self.inner.download_failures_total.get(),
        }
    }
}

fn counter_vec(name: &'static str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::MetricsCollector { name, source })
}

fn gauge(name: &'static str, help: &str) -> Result<IntGauge> {
    IntGauge::with_opts(Opts::new(name, help))
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

fn saturating_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
