//! The `Metric` custom resource and its status conditions.

use chrono::{SecondsFormat, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type summarizing whether collection for a Metric is running.
pub const CONDITION_READY: &str = "Ready";

pub const DEFAULT_STABLE_WINDOW_SECS: u64 = 60;
pub const DEFAULT_PANIC_WINDOW_SECS: u64 = 6;

/// Declares a scrape target whose statistics should be collected in the background.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[kube(
    group = "autoscaling.metrica.dev",
    version = "v1alpha1",
    kind = "Metric",
    plural = "metrics",
    namespaced,
    status = "MetricStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Target", "type":"string", "jsonPath":".spec.scrapeTarget"}"#,
    printcolumn = r#"{"name":"Ready", "type":"boolean", "jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MetricSpec {
    /// Name of the service whose endpoints are scraped.
    pub scrape_target: String,
    /// Averaging window for the stable statistic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stable_window_seconds: Option<u64>,
    /// Averaging window for the panic statistic; never longer than the stable window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panic_window_seconds: Option<u64>,
}

impl MetricSpec {
    pub fn set_defaults(&mut self) {
        let stable = *self.stable_window_seconds.get_or_insert(DEFAULT_STABLE_WINDOW_SECS);
        let panic = self.panic_window_seconds.get_or_insert(DEFAULT_PANIC_WINDOW_SECS.min(stable));
        if *panic > stable {
            *panic = stable;
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// RFC3339 timestamp of the last status flip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl Condition {
    fn new(type_: &str, status: ConditionStatus, reason: Option<&str>, message: Option<&str>) -> Self {
        Self {
            type_: type_.to_string(),
            status,
            reason: reason.map(str::to_string),
            message: message.map(str::to_string),
            last_transition_time: None,
        }
    }

    /// Equal in everything but the transition timestamp.
    fn same_state(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MetricStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// Mirrors the Ready condition being True.
    #[serde(default)]
    pub ready: bool,
}

impl MetricStatus {
    pub fn get_condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    pub fn is_ready(&self) -> bool {
        self.get_condition(CONDITION_READY)
            .map(|c| c.status == ConditionStatus::True)
            .unwrap_or(false)
    }

    /// Puts the Ready condition into Unknown unless a previous pass already decided it.
    pub fn initialize_conditions(&mut self) {
        if self.get_condition(CONDITION_READY).is_none() {
            self.set_condition(Condition::new(CONDITION_READY, ConditionStatus::Unknown, None, None));
        }
    }

    pub fn mark_ready(&mut self) {
        self.set_condition(Condition::new(CONDITION_READY, ConditionStatus::True, None, None));
    }

    pub fn mark_failed(&mut self, reason: &str, message: &str) {
        self.set_condition(Condition::new(
            CONDITION_READY,
            ConditionStatus::False,
            Some(reason),
            Some(message),
        ));
    }

    /// Replaces the condition of the same type. An entry whose state is unchanged keeps
    /// its original transition time so that repeated passes produce equal statuses.
    pub fn set_condition(&mut self, mut cond: Condition) {
        match self.conditions.iter_mut().find(|c| c.type_ == cond.type_) {
            Some(existing) if existing.same_state(&cond) => {}
            Some(existing) => {
                cond.last_transition_time = Some(now_rfc3339());
                *existing = cond;
            }
            None => {
                cond.last_transition_time = Some(now_rfc3339());
                self.conditions.push(cond);
                self.conditions.sort_by(|a, b| a.type_.cmp(&b.type_));
            }
        }
        self.ready = self.is_ready();
    }
}

impl Metric {
    /// Fills unset spec fields. Only ever called on an owned working copy.
    pub fn set_defaults(&mut self) {
        self.spec.set_defaults();
    }

    pub fn status_mut(&mut self) -> &mut MetricStatus {
        self.status.get_or_insert_with(MetricStatus::default)
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
