#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use metrica_core::prelude::*;
use metrica_reconciler::Reconciler;

pub fn metric(ns: &str, name: &str, target: &str) -> Metric {
    let mut m = Metric::new(
        name,
        MetricSpec { scrape_target: target.to_string(), stable_window_seconds: None, panic_window_seconds: None },
    );
    m.metadata.namespace = Some(ns.to_string());
    m
}

/// Watch cache and status subresource over one shared map, so writes are visible
/// to later reads the way a real informer would eventually see them.
#[derive(Default)]
pub struct FakeCluster {
    objects: Mutex<HashMap<(String, String), Arc<Metric>>>,
    reads: AtomicUsize,
    yield_reads: AtomicBool,
    read_error: Mutex<Option<String>>,
    write_error: Mutex<Option<String>>,
    vanish_after: Mutex<Option<usize>>,
    writes: Mutex<Vec<Metric>>,
}

impl FakeCluster {
    pub fn insert(&self, m: Metric) {
        let key = (m.metadata.namespace.clone().unwrap_or_default(), m.metadata.name.clone().unwrap_or_default());
        self.objects.lock().unwrap().insert(key, Arc::new(m));
    }

    pub fn cached(&self, ns: &str, name: &str) -> Option<Arc<Metric>> {
        self.objects.lock().unwrap().get(&(ns.to_string(), name.to_string())).cloned()
    }

    pub fn fail_reads(&self, msg: &str) { *self.read_error.lock().unwrap() = Some(msg.to_string()); }
    pub fn fail_writes(&self, msg: &str) { *self.write_error.lock().unwrap() = Some(msg.to_string()); }
    pub fn heal_writes(&self) { *self.write_error.lock().unwrap() = None; }

    /// Every read yields to the scheduler first, so joined passes interleave.
    pub fn yield_on_reads(&self) { self.yield_reads.store(true, Ordering::SeqCst); }

    /// Objects disappear once this many reads have been served.
    pub fn vanish_after_reads(&self, n: usize) { *self.vanish_after.lock().unwrap() = Some(n); }

    pub fn reads(&self) -> usize { self.reads.load(Ordering::SeqCst) }
    pub fn writes(&self) -> Vec<Metric> { self.writes.lock().unwrap().clone() }
}

#[async_trait]
impl MetricReader for FakeCluster {
    async fn get(&self, namespace: &str, name: &str) -> Result<Arc<Metric>, StoreError> {
        if self.yield_reads.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        let served = self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = *self.vanish_after.lock().unwrap() {
            if served >= limit {
                self.objects.lock().unwrap().clear();
            }
        }
        if let Some(msg) = self.read_error.lock().unwrap().clone() {
            return Err(StoreError::from(anyhow::anyhow!(msg)));
        }
        self.cached(namespace, name).ok_or_else(|| StoreError::not_found(namespace, name))
    }
}

#[async_trait]
impl StatusWriter for FakeCluster {
    async fn update_status(&self, metric: &Metric) -> Result<Metric, StoreError> {
        self.writes.lock().unwrap().push(metric.clone());
        if let Some(msg) = self.write_error.lock().unwrap().clone() {
            return Err(StoreError::from(anyhow::anyhow!(msg)));
        }
        let ns = metric.metadata.namespace.clone().unwrap_or_default();
        let name = metric.metadata.name.clone().unwrap_or_default();
        if self.cached(&ns, &name).is_none() {
            return Err(StoreError::not_found(ns, name));
        }
        self.insert(metric.clone());
        Ok(metric.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectorCall {
    Upsert(String, String),
    Delete(String, String),
}

#[derive(Default)]
pub struct FakeCollector {
    calls: Mutex<Vec<CollectorCall>>,
    upsert_error: Mutex<Option<String>>,
    delete_error: Mutex<Option<String>>,
}

impl FakeCollector {
    pub fn fail_upserts(&self, msg: &str) { *self.upsert_error.lock().unwrap() = Some(msg.to_string()); }
    pub fn heal_upserts(&self) { *self.upsert_error.lock().unwrap() = None; }
    pub fn fail_deletes(&self, msg: &str) { *self.delete_error.lock().unwrap() = Some(msg.to_string()); }
    pub fn calls(&self) -> Vec<CollectorCall> { self.calls.lock().unwrap().clone() }
}

#[async_trait]
impl Collector for FakeCollector {
    async fn create_or_update(&self, metric: &Metric) -> Result<(), CollectorError> {
        self.calls.lock().unwrap().push(CollectorCall::Upsert(
            metric.metadata.namespace.clone().unwrap_or_default(),
            metric.metadata.name.clone().unwrap_or_default(),
        ));
        match self.upsert_error.lock().unwrap().clone() {
            Some(msg) => Err(CollectorError::from(anyhow::anyhow!(msg))),
            None => Ok(()),
        }
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), CollectorError> {
        self.calls.lock().unwrap().push(CollectorCall::Delete(namespace.to_string(), name.to_string()));
        match self.delete_error.lock().unwrap().clone() {
            Some(msg) => Err(CollectorError::from(anyhow::anyhow!(msg))),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub severity: Severity,
    pub reason: String,
    pub message: String,
}

#[derive(Default)]
pub struct FakeRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl FakeRecorder {
    pub fn events(&self) -> Vec<RecordedEvent> { self.events.lock().unwrap().clone() }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }
}

#[async_trait]
impl EventSink for FakeRecorder {
    async fn publish(&self, _metric: &Metric, severity: Severity, reason: &str, message: String) {
        self.events.lock().unwrap().push(RecordedEvent { severity, reason: reason.to_string(), message });
    }
}

pub struct Harness {
    pub cluster: Arc<FakeCluster>,
    pub collector: Arc<FakeCollector>,
    pub recorder: Arc<FakeRecorder>,
    pub reconciler: Reconciler,
}

pub fn harness() -> Harness {
    let cluster = Arc::new(FakeCluster::default());
    let collector = Arc::new(FakeCollector::default());
    let recorder = Arc::new(FakeRecorder::default());
    let reconciler = Reconciler::new(
        cluster.clone(),
        cluster.clone(),
        collector.clone(),
        recorder.clone(),
    );
    Harness { cluster, collector, recorder, reconciler }
}
