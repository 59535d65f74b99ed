//! Reconciliation of custom-domain mappings against Forgejo.
//!
//! The reaper walks every `custom_domain:*` forward entry with a cursor
//! scan, asks the forge whether the mapped repository still publishes a
//! `.pages` file, and deletes the mapping's whole key set when the forge
//! definitively says it does not.
//!
//! Anything ambiguous keeps the mapping: a missing or malformed forward
//! value is skipped, and a failed existence check counts as "present".  All
//! of these are counted as errors but never abort the scan.  Only a failed
//! `SCAN` or `GET` round-trip is fatal.
//!
//! Work is strictly sequential so at most one request is in flight against
//! the forge at any time.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ReaperConfig;
use crate::forge::{Existence, ExistenceOracle};
use crate::keys::{self, FORWARD_PATTERN};
use crate::metrics::{ErrorKind, MetricsRegistry};
use crate::store::KeyValueStore;
use crate::summary::RunSummary;

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Connections the reaper works through, built once per run.
#[derive(Clone)]
pub struct ReapContext {
    pub store: Arc<dyn KeyValueStore>,
    pub oracle: Arc<dyn ExistenceOracle>,
    pub metrics: MetricsRegistry,
}

// ---------------------------------------------------------------------------
// Per-mapping results
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("no value stored for forward key")]
    MissingValue,
    #[error("invalid mapping format {value:?}")]
    MalformedMapping { value: String },
    #[error("existence check for {owner}/{repository} failed: {reason}")]
    Oracle {
        owner: String,
        repository: String,
        reason: String,
    },
}

impl MappingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingValue => ErrorKind::MissingValue,
            Self::MalformedMapping { .. } => ErrorKind::MalformedMapping,
            Self::Oracle { .. } => ErrorKind::Oracle,
        }
    }
}

/// What happened to one discovered mapping.
#[derive(Debug)]
pub enum Outcome {
    /// The repository still has a `.pages` file.
    Retained,
    /// The existence check failed, so the mapping was kept.
    RetainedOnError(MappingError),
    /// The mapping was stale.  `deleted` counts keys the store confirmed
    /// removing and stays 0 in dry-run mode.
    Evicted { deleted: usize },
    /// The forward entry could not be interpreted.
    Skipped(MappingError),
}

// ---------------------------------------------------------------------------
// Reaper
// ---------------------------------------------------------------------------

pub struct Reaper {
    ctx: ReapContext,
    config: ReaperConfig,
    cancel: CancellationToken,
}

impl Reaper {
    pub fn new(ctx: ReapContext, config: ReaperConfig, cancel: CancellationToken) -> Self {
        Self {
            ctx,
            config,
            cancel,
        }
    }

    /// Scan the whole forward keyspace once.
    ///
    /// Returns the accumulated summary, with `interrupted` set if the
    /// cancellation token fired before the cursor wrapped around.
    pub async fn run(&self) -> Result<RunSummary> {
        let started = Instant::now();
        let metrics = &self.ctx.metrics.metrics;
        let mut summary = RunSummary::new(self.config.dry_run);
        // SCAN may return a key more than once; a repeat of a mapping we
        // already evicted would otherwise read back as a missing value.
        let mut evicted_keys: HashSet<String> = HashSet::new();
        let mut cursor = 0u64;

        if self.config.dry_run {
            info!("dry run: no changes will be made");
        }

        'scan: loop {
            let Some(page) = self
                .cancellable(
                    self.ctx
                        .store
                        .scan(cursor, FORWARD_PATTERN, self.config.scan_count),
                )
                .await
            else {
                summary.interrupted = true;
                break;
            };
            let page = page.with_context(|| format!("SCAN at cursor {cursor} failed"))?;

            for key in page.keys {
                if self.cancel.is_cancelled() {
                    summary.interrupted = true;
                    break 'scan;
                }
                if evicted_keys.contains(&key) {
                    debug!(%key, "already evicted during this run");
                    continue;
                }
                let Some(domain) = keys::domain_from_key(&key) else {
                    warn!(%key, "scan returned a key outside the forward keyspace");
                    continue;
                };

                // A mapping interrupted mid-check is left unseen.
                let Some(outcome) = self.reconcile(&key, domain).await? else {
                    summary.interrupted = true;
                    break 'scan;
                };
                summary.total_seen += 1;
                metrics.mappings_seen.inc();

                match &outcome {
                    Outcome::Evicted { .. } => {
                        metrics.mappings_evicted.inc();
                        evicted_keys.insert(key.clone());
                    }
                    Outcome::Skipped(err) | Outcome::RetainedOnError(err) => {
                        metrics.record_error(err.kind());
                    }
                    Outcome::Retained => {}
                }
                summary.record(&outcome);
            }

            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }

        summary.duration = started.elapsed();
        metrics
            .run_duration_seconds
            .set(summary.duration.as_secs_f64());
        metrics.dry_run.set(i64::from(summary.dry_run));
        metrics.interrupted.set(i64::from(summary.interrupted));

        if summary.interrupted {
            warn!(
                seen = summary.total_seen,
                evicted = summary.evicted,
                errors = summary.errors,
                "scan interrupted"
            );
        } else {
            info!(
                seen = summary.total_seen,
                evicted = summary.evicted,
                errors = summary.errors,
                keys_deleted = summary.keys_deleted,
                "scan complete"
            );
        }
        Ok(summary)
    }

    /// Check one forward entry and evict it if stale.
    ///
    /// Returns `Ok(None)` if cancellation interrupted a store or forge call.
    #[instrument(skip_all, fields(%domain))]
    async fn reconcile(&self, key: &str, domain: &str) -> Result<Option<Outcome>> {
        let Some(value) = self.cancellable(self.ctx.store.get(key)).await else {
            return Ok(None);
        };
        let value = value.with_context(|| format!("failed to read mapping for {domain}"))?;

        let value = match value {
            Some(v) if !v.is_empty() => v,
            _ => {
                warn!("no value found, skipping");
                return Ok(Some(Outcome::Skipped(MappingError::MissingValue)));
            }
        };

        let Some((owner, repository)) = keys::parse_mapping(&value) else {
            warn!(%value, "invalid mapping format, skipping");
            return Ok(Some(Outcome::Skipped(MappingError::MalformedMapping {
                value: value.clone(),
            })));
        };

        self.ctx.metrics.metrics.oracle_checks.inc();
        let Some(existence) = self
            .cancellable(self.ctx.oracle.exists(owner, repository))
            .await
        else {
            return Ok(None);
        };

        let outcome = match existence {
            Ok(Existence::Present) => {
                info!(%owner, %repository, "repository still has .pages file");
                Outcome::Retained
            }
            Ok(Existence::Absent) => {
                info!(%owner, %repository, "repository no longer has .pages file");
                self.evict(domain, owner, repository).await
            }
            Err(e) => {
                warn!(
                    %owner,
                    %repository,
                    error = %format!("{e:#}"),
                    "existence check failed, keeping mapping"
                );
                Outcome::RetainedOnError(MappingError::Oracle {
                    owner: owner.to_string(),
                    repository: repository.to_string(),
                    reason: format!("{e:#}"),
                })
            }
        };
        Ok(Some(outcome))
    }

    /// Delete every key of a stale mapping, one at a time.
    ///
    /// A failed delete is logged and the rest still go ahead.  Deletes are
    /// not raced against cancellation: once eviction starts it finishes,
    /// since a half-evicted mapping loses its forward key and would never be
    /// rediscovered.
    async fn evict(&self, domain: &str, owner: &str, repository: &str) -> Outcome {
        let keys: Vec<String> =
            keys::keys_for_root(&self.config.router_root, domain, owner, repository).into();

        if self.config.dry_run {
            info!(count = keys.len(), "[dry run] would delete keys");
            for key in &keys {
                info!(%key, "[dry run] would delete");
            }
            return Outcome::Evicted { deleted: 0 };
        }

        let metrics = &self.ctx.metrics.metrics;
        let mut deleted = 0;
        for key in &keys {
            match self.ctx.store.delete(key).await {
                Ok(removed) if removed > 0 => {
                    deleted += 1;
                    metrics.keys_deleted.inc();
                    info!(%key, "deleted");
                }
                Ok(_) => debug!(%key, "already absent"),
                Err(e) => {
                    metrics.delete_failures.inc();
                    warn!(%key, error = %format!("{e:#}"), "failed to delete");
                }
            }
        }

        info!(deleted, total = keys.len(), "mapping evicted");
        Outcome::Evicted { deleted }
    }

    /// Race `fut` against the cancellation token.
    async fn cancellable<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            out = fut => Some(out),
        }
    }
}
