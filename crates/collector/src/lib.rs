//! Metrica collector: one background scrape task per Metric, owned by a registry.
//!
//! The registry is the only owner of collection state. Create/update/delete for a
//! key are serialized by the registry lock, and all of them are idempotent.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use async_trait::async_trait;
use chrono::Utc;
use metrica_core::{Collector, CollectorError, Metric, MetricSpec, ResourceKey};
use metrics::{counter, gauge};
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Latest value produced by a scrape.
#[derive(Debug, Clone, PartialEq)]
pub struct Stat {
    pub value: f64,
    /// Seconds since epoch.
    pub observed_at: i64,
}

/// Produces one sample for a Metric. Implementations live outside this crate.
#[async_trait]
pub trait Scraper: Send + Sync {
    async fn scrape(&self, key: &ResourceKey, spec: &MetricSpec) -> anyhow::Result<f64>;
}

/// Stops a collection task. Dropping it stops the task too.
#[derive(Debug)]
struct CancelHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl CancelHandle {
    fn cancel(mut self) {
        if let Some(tx) = self.tx.take() { let _ = tx.send(()); }
    }
}

struct Collection {
    spec: Arc<ArcSwap<MetricSpec>>,
    latest: Arc<ArcSwapOption<Stat>>,
    cancel: CancelHandle,
}

/// In-process [`Collector`]: keeps a scrape task per resource key.
pub struct CollectionRegistry {
    scraper: Arc<dyn Scraper>,
    interval: Duration,
    collections: Mutex<FxHashMap<ResourceKey, Collection>>,
}

impl CollectionRegistry {
    pub fn new(scraper: Arc<dyn Scraper>, interval: Duration) -> Self {
        Self { scraper, interval: interval.max(MIN_INTERVAL), collections: Mutex::new(FxHashMap::default()) }
    }

    pub fn len(&self) -> usize { self.lock().len() }
    pub fn is_empty(&self) -> bool { self.lock().is_empty() }
    pub fn contains(&self, key: &ResourceKey) -> bool { self.lock().contains_key(key) }

    /// Spec the collection for `key` currently scrapes with.
    pub fn spec(&self, key: &ResourceKey) -> Option<Arc<MetricSpec>> {
        self.lock().get(key).map(|c| c.spec.load_full())
    }

    /// Most recent successful sample for `key`.
    pub fn latest(&self, key: &ResourceKey) -> Option<Arc<Stat>> {
        self.lock().get(key).and_then(|c| c.latest.load_full())
    }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<ResourceKey, Collection>> {
        self.collections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn(&self, key: ResourceKey, spec: MetricSpec) -> Collection {
        let spec = Arc::new(ArcSwap::from_pointee(spec));
        let latest = Arc::new(ArcSwapOption::empty());
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        tokio::spawn(run_collection(
            key,
            Arc::clone(&spec),
            Arc::clone(&latest),
            Arc::clone(&self.scraper),
            self.interval,
            cancel_rx,
        ));
        Collection { spec, latest, cancel: CancelHandle { tx: Some(cancel_tx) } }
    }
}

#[async_trait]
impl Collector for CollectionRegistry {
    async fn create_or_update(&self, metric: &Metric) -> Result<(), CollectorError> {
        let key = ResourceKey::for_metric(metric);
        if metric.spec.scrape_target.trim().is_empty() {
            return Err(CollectorError::InvalidTarget { key, reason: "scrapeTarget is empty".to_string() });
        }
        let mut map = self.lock();
        match map.get(&key) {
            Some(existing) => {
                if *existing.spec.load_full() != metric.spec {
                    existing.spec.store(Arc::new(metric.spec.clone()));
                    debug!(key = %key, target = %metric.spec.scrape_target, "collection updated");
                    counter!("collector_updated_total", 1u64);
                }
            }
            None => {
                let collection = self.spawn(key.clone(), metric.spec.clone());
                info!(key = %key, target = %metric.spec.scrape_target, "collection created");
                map.insert(key, collection);
                counter!("collector_created_total", 1u64);
            }
        }
        gauge!("collector_collections", map.len() as f64);
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), CollectorError> {
        let key = ResourceKey::new(namespace, name);
        let mut map = self.lock();
        if let Some(collection) = map.remove(&key) {
            collection.cancel.cancel();
            info!(key = %key, "collection deleted");
            counter!("collector_deleted_total", 1u64);
        }
        gauge!("collector_collections", map.len() as f64);
        Ok(())
    }
}

async fn run_collection(
    key: ResourceKey,
    spec: Arc<ArcSwap<MetricSpec>>,
    latest: Arc<ArcSwapOption<Stat>>,
    scraper: Arc<dyn Scraper>,
    interval: Duration,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            _ = &mut cancel_rx => break,
            _ = ticker.tick() => {
                let current = spec.load_full();
                match scraper.scrape(&key, &current).await {
                    Ok(value) => {
                        latest.store(Some(Arc::new(Stat { value, observed_at: Utc::now().timestamp() })));
                        counter!("collector_scrapes_total", 1u64);
                    }
                    Err(e) => {
                        debug!(key = %key, error = %e, "scrape failed");
                        counter!("collector_scrape_errors_total", 1u64);
                    }
                }
            }
        }
    }
    debug!(key = %key, "collection stopped");
}
