//! Drives a [`Reconcile`] implementation from a kube-runtime `Controller`.
//!
//! The controller owns dedupe, one-pass-per-object and requeue scheduling. This
//! module adds per-key exponential retry on failure and cleanup for objects that
//! are gone from the cache by the time their pass runs.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use kube::{
    api::{Api, DynamicObject},
    runtime::{
        controller::{self, Action, Controller},
        reflector::ObjectRef,
        watcher,
    },
};
use metrica_core::{Metric, Reconcile, ResourceKey};
use metrics::counter;
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::queue_key;

/// Per-key exponential retry delay: `base * 2^failures`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self { base: Duration::from_millis(5), max: Duration::from_secs(1000) }
    }
}

impl Backoff {
    pub fn delay(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.min(31));
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Consecutive failure counts per key.
#[derive(Debug, Default)]
pub struct RetryTracker {
    backoff: Backoff,
    failures: Mutex<FxHashMap<String, u32>>,
}

impl RetryTracker {
    pub fn new(backoff: Backoff) -> Self {
        Self { backoff, failures: Mutex::default() }
    }

    /// Records a failure for `key` and returns how long to wait before retrying.
    pub fn retry_delay(&self, key: &str) -> Duration {
        let mut failures = self.lock();
        let n = failures.entry(key.to_string()).or_insert(0);
        let delay = self.backoff.delay(*n);
        *n = n.saturating_add(1);
        delay
    }

    pub fn forget(&self, key: &str) {
        self.lock().remove(key);
    }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<String, u32>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared state handed to every controller pass.
pub struct Context<R> {
    reconciler: Arc<R>,
    retries: RetryTracker,
    resync: Option<Duration>,
}

impl<R> Context<R> {
    /// A zero `resync` disables periodic passes; objects then wait for a change.
    pub fn new(reconciler: Arc<R>, backoff: Backoff, resync: Duration) -> Self {
        let resync = (!resync.is_zero()).then_some(resync);
        Self { reconciler, retries: RetryTracker::new(backoff), resync }
    }
}

pub async fn reconcile_metric<R: Reconcile>(metric: Arc<Metric>, ctx: Arc<Context<R>>) -> Result<Action, R::Error> {
    let key = queue_key(&metric);
    ctx.reconciler.reconcile(&key).await?;
    ctx.retries.forget(&key);
    Ok(match ctx.resync {
        Some(period) => Action::requeue(period),
        None => Action::await_change(),
    })
}

pub fn error_policy<R: Reconcile>(metric: Arc<Metric>, err: &R::Error, ctx: Arc<Context<R>>) -> Action {
    let key = queue_key(&metric);
    let delay = ctx.retries.retry_delay(&key);
    warn!(key = %key, error = %err, retry_ms = delay.as_millis() as u64, "reconcile failed; requeueing");
    counter!("metric_reconcile_retries_total", 1u64);
    Action::requeue(delay)
}

/// Queue key of an object the controller no longer finds in its cache.
pub fn gone_key(obj: &ObjectRef<DynamicObject>) -> String {
    ResourceKey::new(obj.namespace.clone().unwrap_or_default(), obj.name.clone()).to_string()
}

/// Runs `controller` until SIGINT/SIGTERM. `concurrency` of zero means unbounded.
pub async fn run_controller<R>(controller: Controller<Metric>, api: Api<Metric>, ctx: Arc<Context<R>>, concurrency: u16)
where
    R: Reconcile + 'static,
{
    let reconciler = Arc::clone(&ctx.reconciler);
    info!(concurrency, resync = ?ctx.resync, "metric controller started");
    controller
        .with_config(controller::Config::default().concurrency(concurrency))
        // The primary watch only triggers on applied objects. A second watch on the
        // same kind also triggers on deletions, which then miss the cache below.
        .watches(api, watcher::Config::default(), |m: Metric| Some(ObjectRef::from_obj(&m)))
        .shutdown_on_signal()
        .run(reconcile_metric::<R>, error_policy::<R>, ctx)
        .for_each(|res| {
            let reconciler = Arc::clone(&reconciler);
            async move {
                match res {
                    Ok((obj, _)) => debug!(ns = ?obj.namespace, name = %obj.name, "reconciled"),
                    Err(controller::Error::ObjectNotFound(obj)) => {
                        let key = gone_key(&obj);
                        debug!(key = %key, "metric no longer cached; cleaning up");
                        if let Err(e) = reconciler.reconcile(&key).await {
                            warn!(key = %key, error = %e, "cleanup of deleted metric failed");
                            counter!("metric_cleanup_errors_total", 1u64);
                        }
                    }
                    // Already logged and requeued by error_policy.
                    Err(controller::Error::ReconcilerFailed(..)) => {}
                    Err(e) => {
                        warn!(error = %e, "metric controller error");
                        counter!("metric_watch_errors_total", 1u64);
                    }
                }
            }
        })
        .await;
    info!("metric controller stopped");
}
