use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use anyhow::{Context, Result};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

// ---------------------------------------------------------------------------
// Label types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub kind: ErrorKind,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum ErrorKind {
    MissingValue,
    MalformedMapping,
    Oracle,
}

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Counters describing one reaper run.
pub struct Metrics {
    pub mappings_seen: Counter,
    pub mappings_evicted: Counter,
    pub mapping_errors: Family<ErrorLabels, Counter>,
    pub keys_deleted: Counter,
    pub delete_failures: Counter,
    pub oracle_checks: Counter,
    pub run_duration_seconds: Gauge<f64, AtomicU64>,
    pub dry_run: Gauge,
    pub interrupted: Gauge,
}

impl Metrics {
    /// Create a new [`Metrics`] instance and register every metric with the
    /// supplied `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let mappings_seen = Counter::default();
        registry.register(
            "pages_reaper_mappings_seen",
            "Custom-domain mappings examined",
            mappings_seen.clone(),
        );

        let mappings_evicted = Counter::default();
        registry.register(
            "pages_reaper_mappings_evicted",
            "Stale custom-domain mappings evicted",
            mappings_evicted.clone(),
        );

        let mapping_errors = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "pages_reaper_mapping_errors",
            "Mappings skipped or retained because of an error, by kind",
            mapping_errors.clone(),
        );

        let keys_deleted = Counter::default();
        registry.register(
            "pages_reaper_keys_deleted",
            "Cache keys removed",
            keys_deleted.clone(),
        );

        let delete_failures = Counter::default();
        registry.register(
            "pages_reaper_delete_failures",
            "Individual key deletions that failed",
            delete_failures.clone(),
        );

        let oracle_checks = Counter::default();
        registry.register(
            "pages_reaper_oracle_checks",
            "Repository existence checks sent to Forgejo",
            oracle_checks.clone(),
        );

        let run_duration_seconds = Gauge::<f64, AtomicU64>::default();
        registry.register(
            "pages_reaper_run_duration_seconds",
            "Wall-clock duration of the last run",
            run_duration_seconds.clone(),
        );

        let dry_run: Gauge = Gauge::default();
        registry.register(
            "pages_reaper_dry_run",
            "1 if the last run made no changes by request",
            dry_run.clone(),
        );

        let interrupted: Gauge = Gauge::default();
        registry.register(
            "pages_reaper_interrupted",
            "1 if the last run was interrupted before the scan finished",
            interrupted.clone(),
        );

        Self {
            mappings_seen,
            mappings_evicted,
            mapping_errors,
            keys_deleted,
            delete_failures,
            oracle_checks,
            run_duration_seconds,
            dry_run,
            interrupted,
        }
    }

    pub fn record_error(&self, kind: ErrorKind) {
        self.mapping_errors.get_or_create(&ErrorLabels { kind }).inc();
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        Self {
            registry: Arc::new(registry),
            metrics: Arc::new(metrics),
        }
    }

    /// Render every metric in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String> {
        let mut buf = String::new();
        encode(&mut buf, &self.registry).context("failed to encode metrics")?;
        Ok(buf)
    }

    /// Write the metrics for a node-exporter textfile collector.
    ///
    /// The file is written next to its destination and renamed into place
    /// so the collector never reads a partial file.
    pub async fn write_textfile(&self, path: &Path) -> Result<()> {
        let body = self.encode()?;
        let tmp = path.with_extension("prom.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("failed to write metrics file: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("failed to move metrics file into place: {}", path.display()))?;
        tracing::debug!(path = %path.display(), "metrics written");
        Ok(())
    }
}
