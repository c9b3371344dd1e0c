//! Status commits: re-read, compare, then write only the status subresource.

use std::sync::Arc;

use kube::ResourceExt;
use metrica_core::{Metric, MetricReader, StatusWriter, StoreError};
use metrics::counter;
use tracing::debug;

/// Writes a desired status on top of the freshest copy of the object.
///
/// The re-read narrows the window for clobbering a concurrent change but is not a
/// compare-and-swap. The written object carries the re-read `resourceVersion`, so a
/// versioned backend rejects a stale write and the next pass corrects it.
#[derive(Clone)]
pub struct StatusCommitter {
    reader: Arc<dyn MetricReader>,
    writer: Arc<dyn StatusWriter>,
}

impl StatusCommitter {
    pub fn new(reader: Arc<dyn MetricReader>, writer: Arc<dyn StatusWriter>) -> Self {
        Self { reader, writer }
    }

    pub async fn commit(&self, desired: &Metric) -> Result<(), StoreError> {
        let namespace = desired.namespace().unwrap_or_default();
        let name = desired.name_any();
        // Deleted while we were reconciling: report it, the caller decides.
        let existing = self.reader.get(&namespace, &name).await?;
        if existing.status == desired.status {
            debug!(ns = %namespace, name = %name, "status already current");
            counter!("metric_status_commit_noop_total", 1u64);
            return Ok(());
        }
        let mut fresh = Metric::clone(&existing);
        fresh.status = desired.status.clone();
        self.writer.update_status(&fresh).await?;
        counter!("metric_status_commit_total", 1u64);
        Ok(())
    }
}
