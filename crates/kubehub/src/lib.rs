//! Metrica kubehub: kube-rs adapters for the reconciler seams and controller wiring.

#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Endpoints;
use kube::{
    api::{Api, PostParams},
    runtime::{
        events::{Event as KubeEvent, EventType, Recorder, Reporter},
        reflector::{ObjectRef, Store},
    },
    Client, Resource, ResourceExt,
};
use metrica_collector::Scraper;
use metrica_core::{
    EventSink, Metric, MetricReader, MetricSpec, ResourceKey, Severity, StatusWriter, StoreError,
};
use metrics::counter;
use tracing::warn;

pub mod controller;

pub use controller::{run_controller, Backoff, Context};

pub async fn get_kube_client() -> Result<Client> {
    Client::try_default().await.context("building kube client from default config")
}

pub fn queue_key(metric: &Metric) -> String {
    ResourceKey::for_metric(metric).to_string()
}

fn map_kube_err(err: kube::Error, namespace: &str, name: &str) -> StoreError {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::not_found(namespace, name),
        other => StoreError::Other(anyhow::Error::new(other)),
    }
}

/// Reads Metrics out of a reflector store (the watch cache).
#[derive(Clone)]
pub struct StoreReader {
    store: Store<Metric>,
}

impl StoreReader {
    pub fn new(store: Store<Metric>) -> Self { Self { store } }
}

#[async_trait]
impl MetricReader for StoreReader {
    async fn get(&self, namespace: &str, name: &str) -> Result<Arc<Metric>, StoreError> {
        self.store
            .get(&ObjectRef::new(name).within(namespace))
            .ok_or_else(|| StoreError::not_found(namespace, name))
    }
}

/// Writes the status subresource through the API server.
#[derive(Clone)]
pub struct KubeStatusWriter {
    client: Client,
}

impl KubeStatusWriter {
    pub fn new(client: Client) -> Self { Self { client } }
}

#[async_trait]
impl StatusWriter for KubeStatusWriter {
    async fn update_status(&self, metric: &Metric) -> Result<Metric, StoreError> {
        let namespace = metric.namespace().unwrap_or_default();
        let name = metric.name_any();
        let api: Api<Metric> = Api::namespaced(self.client.clone(), &namespace);
        let body = serde_json::to_vec(metric).context("serializing metric for status update")?;
        // Carries the resourceVersion of the re-read copy; a stale write gets 409.
        api.replace_status(&name, &PostParams::default(), body)
            .await
            .map_err(|e| map_kube_err(e, &namespace, &name))
    }
}

/// Publishes Kubernetes Events against the Metric. Failures are logged only.
#[derive(Clone)]
pub struct KubeEventSink {
    client: Client,
    reporter: Reporter,
}

impl KubeEventSink {
    pub fn new(client: Client, reporter: Reporter) -> Self { Self { client, reporter } }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn publish(&self, metric: &Metric, severity: Severity, reason: &str, message: String) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), metric.object_ref(&()));
        let type_ = match severity {
            Severity::Normal => EventType::Normal,
            Severity::Warning => EventType::Warning,
        };
        let ev = KubeEvent {
            type_,
            reason: reason.to_string(),
            note: Some(message),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(e) = recorder.publish(ev).await {
            warn!(key = %queue_key(metric), reason, error = %e, "failed to publish event");
            counter!("metric_event_publish_errors_total", 1u64);
        }
    }
}

/// Scrapes the number of ready addresses behind the target service's Endpoints.
#[derive(Clone)]
pub struct EndpointsScraper {
    client: Client,
}

impl EndpointsScraper {
    pub fn new(client: Client) -> Self { Self { client } }
}

pub fn ready_addresses(ep: &Endpoints) -> usize {
    ep.subsets
        .iter()
        .flatten()
        .map(|s| s.addresses.as_ref().map_or(0, Vec::len))
        .sum()
}

#[async_trait]
impl Scraper for EndpointsScraper {
    async fn scrape(&self, key: &ResourceKey, spec: &MetricSpec) -> Result<f64> {
        let api: Api<Endpoints> = Api::namespaced(self.client.clone(), &key.namespace);
        let ep = api
            .get_opt(&spec.scrape_target)
            .await?
            .ok_or_else(|| anyhow!("endpoints {}/{} not found", key.namespace, spec.scrape_target))?;
        Ok(ready_addresses(&ep) as f64)
    }
}
