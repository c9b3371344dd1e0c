//! Metrica reconciler: converges a Metric's background collection and status.
//!
//! A pass reads the cached object, upserts its collection, derives a Ready/Failed
//! status on an owned copy and commits that status only when it changed. Passes
//! are stateless given the key, so overlapping passes for one key are safe.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use metrica_core::{
    split_key, Collector, EventSink, Metric, MetricReader, Reconcile, Severity, StatusWriter,
};
use metrics::{counter, histogram};
use tracing::{debug, error, warn};

pub mod error;
pub mod status;

pub use error::Error;
pub use status::StatusCommitter;

use error::{
    COLLECTION_FAILED_MESSAGE, EVENT_INTERNAL_ERROR, EVENT_UPDATED, EVENT_UPDATE_FAILED,
    REASON_COLLECTION_FAILED,
};

/// Reconciler for Metric resources. Collaborators are injected; the reconciler
/// itself holds no per-key state.
pub struct Reconciler {
    reader: Arc<dyn MetricReader>,
    collector: Arc<dyn Collector>,
    committer: StatusCommitter,
    recorder: Arc<dyn EventSink>,
}

impl Reconciler {
    pub fn new(
        reader: Arc<dyn MetricReader>,
        writer: Arc<dyn StatusWriter>,
        collector: Arc<dyn Collector>,
        recorder: Arc<dyn EventSink>,
    ) -> Self {
        let committer = StatusCommitter::new(Arc::clone(&reader), writer);
        Self { reader, collector, committer, recorder }
    }

    /// Compares the actual state with the desired one and converges the two.
    pub async fn reconcile(&self, key: &str) -> Result<(), Error> {
        let t0 = Instant::now();
        counter!("metric_reconcile_total", 1u64);
        let res = self.reconcile_key(key).await;
        histogram!("metric_reconcile_ms", t0.elapsed().as_secs_f64() * 1000.0);
        if let Err(e) = &res {
            counter!("metric_reconcile_errors_total", 1u64, "kind" => e.kind());
        }
        res
    }

    async fn reconcile_key(&self, key: &str) -> Result<(), Error> {
        let (namespace, name) = match split_key(key) {
            Ok(parts) => parts,
            Err(e) => {
                // Retrying cannot fix the key itself.
                error!(key = %key, error = %e, "invalid resource key");
                return Ok(());
            }
        };

        let original = match self.reader.get(&namespace, &name).await {
            Ok(m) => m,
            Err(e) if e.is_not_found() => {
                debug!(key = %key, "metric gone; deleting collection");
                return self.collector.delete(&namespace, &name).await.map_err(Error::Delete);
            }
            Err(source) => return Err(Error::Fetch { key: key.to_string(), source }),
        };

        // The cached object is shared; work on a copy.
        let mut metric = Metric::clone(&original);
        metric.set_defaults();
        let generation = metric.metadata.generation;
        let status = metric.status_mut();
        status.observed_generation = generation;
        status.initialize_conditions();

        let collected = self.reconcile_collection(&mut metric).await;
        match &collected {
            Ok(()) => metric.status_mut().mark_ready(),
            Err(e) => {
                error!(key = %key, error = %e, "error reconciling metric collection");
                self.recorder
                    .publish(&metric, Severity::Warning, EVENT_INTERNAL_ERROR, e.to_string())
                    .await;
            }
        }

        if original.status != metric.status {
            if let Err(e) = self.committer.commit(&metric).await {
                warn!(key = %key, error = %e, "failed to update metric status");
                self.recorder
                    .publish(
                        &metric,
                        Severity::Warning,
                        EVENT_UPDATE_FAILED,
                        format!("Failed to update metric status: {e}"),
                    )
                    .await;
                return Err(Error::StatusUpdate(e));
            }
            self.recorder
                .publish(
                    &metric,
                    Severity::Normal,
                    EVENT_UPDATED,
                    format!("Successfully updated metric status {key}"),
                )
                .await;
        }
        // Status may be committed while collection still failed; the caller retries.
        collected
    }

    async fn reconcile_collection(&self, metric: &mut Metric) -> Result<(), Error> {
        if let Err(e) = self.collector.create_or_update(metric).await {
            // Without a collection nothing gets scraped at all.
            metric.status_mut().mark_failed(REASON_COLLECTION_FAILED, COLLECTION_FAILED_MESSAGE);
            return Err(Error::Collection(e));
        }
        Ok(())
    }
}

#[async_trait]
impl Reconcile for Reconciler {
    type Error = Error;

    async fn reconcile(&self, key: &str) -> Result<(), Error> {
        Reconciler::reconcile(self, key).await
    }
}
