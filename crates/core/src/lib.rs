//! Metrica core: the Metric resource, queue keys, and the seams the reconciler
//! talks through (reader, status writer, collector, event sink).

#![forbid(unsafe_code)]

use std::sync::Arc;

use async_trait::async_trait;

pub mod key;
pub mod resource;

pub use key::{split_key, KeyError, ResourceKey};
pub use resource::{
    Condition, ConditionStatus, Metric, MetricSpec, MetricStatus, CONDITION_READY,
};

pub mod prelude {
    pub use super::{
        Collector, CollectorError, EventSink, Metric, MetricReader, MetricSpec, MetricStatus,
        Reconcile, ResourceKey, Severity, StatusWriter, StoreError,
    };
}

/// Errors from the object store (watch cache reads and status writes).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("metric \"{namespace}/{name}\" not found")]
    NotFound { namespace: String, name: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    pub fn not_found(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound { namespace: namespace.into(), name: name.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("invalid scrape target for {key}: {reason}")]
    InvalidTarget { key: ResourceKey, reason: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Normal,
    Warning,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Normal => "Normal",
            Severity::Warning => "Warning",
        }
    }
}

/// Read side of the object store. Returned objects are shared with the cache and
/// must not be mutated; clone before changing anything.
#[async_trait]
pub trait MetricReader: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Arc<Metric>, StoreError>;
}

/// Status subresource write; never touches spec.
#[async_trait]
pub trait StatusWriter: Send + Sync {
    async fn update_status(&self, metric: &Metric) -> Result<Metric, StoreError>;
}

/// Owner of background collection, keyed by resource identity. Both operations
/// are idempotent and deleting an absent key succeeds.
#[async_trait]
pub trait Collector: Send + Sync {
    async fn create_or_update(&self, metric: &Metric) -> Result<(), CollectorError>;
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), CollectorError>;
}

/// Audit/event sink. Delivery failures stay inside the sink.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, metric: &Metric, severity: Severity, reason: &str, message: String);
}

/// One reconciliation pass for a queue key.
#[async_trait]
pub trait Reconcile: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn reconcile(&self, key: &str) -> Result<(), Self::Error>;
}
