//! `ChaosExperiment` custom resource: the declarative fault-injection intent plus the
//! status fields the reconciler mutates.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::action::Action;
use super::duration::ChaosDuration;
use super::window::TimeWindow;

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[kube(
    group = "chaos.gushchin.dev",
    version = "v1alpha1",
    kind = "ChaosExperiment",
    plural = "chaosexperiments",
    shortname = "chaosexp",
    namespaced,
    status = "ChaosExperimentStatus",
    derive = "PartialEq"
)]
#[kube(printcolumn = r#"{"jsonPath": ".status.phase", "name": "Phase", "type": "string"}"#)]
#[kube(printcolumn = r#"{"jsonPath": ".spec.action", "name": "Action", "type": "string"}"#)]
#[kube(printcolumn = r#"{"jsonPath": ".status.lastRunTime", "name": "LastRun", "type": "date"}"#)]
#[serde(rename_all = "camelCase")]
pub struct ChaosExperimentSpec {
    #[serde(flatten)]
    pub action: Action,

    pub target_namespace: String,

    #[serde(default)]
    pub selector: BTreeMap<String, String>,

    #[serde(default = "default_count")]
    pub count: u32,

    pub experiment_duration: Option<ChaosDuration>,

    /// 5-field cron expression. Absent means "run continuously".
    pub schedule: Option<String>,

    #[serde(default)]
    pub time_windows: Vec<TimeWindow>,

    #[serde(default)]
    pub paused: bool,

    #[serde(default)]
    pub dry_run: bool,

    #[serde(default = "default_max_percentage")]
    pub max_percentage: u8,

    #[serde(default)]
    pub allow_production: bool,

    #[serde(default)]
    pub retry: RetryPolicySpec,
}

fn default_count() -> u32 {
    1
}

fn default_max_percentage() -> u8 {
    100
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicySpec {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub backoff: BackoffKind,
    #[serde(default = "default_retry_delay")]
    pub retry_delay: ChaosDuration,
}

impl Default for RetryPolicySpec {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff: BackoffKind::default(),
            retry_delay: default_retry_delay(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> ChaosDuration {
    ChaosDuration::from_std(std::time::Duration::from_secs(30))
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Exponential,
    Fixed,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChaosExperimentStatus {
    #[serde(default)]
    pub phase: Phase,

    pub last_run_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_scheduled_time: Option<DateTime<Utc>>,
    pub next_scheduled_time: Option<DateTime<Utc>>,
    pub next_retry_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub message: Option<String>,

    #[serde(default)]
    pub affected_pods: Vec<String>,

    #[serde(default)]
    pub cordoned_nodes: Vec<String>,

    #[serde(default)]
    pub ephemeral_refs: Vec<String>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Phase {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Pending => "Pending",
            Phase::Running => "Running",
            Phase::Completed => "Completed",
            Phase::Failed => "Failed",
            Phase::Paused => "Paused",
        };
        write!(f, "{s}")
    }
}

impl ChaosExperimentStatus {
    pub const CONDITION_BLOCKED_BY_TIME_WINDOW: &'static str = "BlockedByTimeWindow";

    /// Insert-or-update a condition by `type_`, following the standard
    /// last-transition-only-on-status-change convention.
    pub fn set_condition(&mut self, type_: &str, status: bool, reason: &str, message: String, now: DateTime<Utc>) {
        let status_str = if status { "True" } else { "False" }.to_string();
        if let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == type_) {
            if existing.status != status_str {
                existing.last_transition_time = k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(now);
            }
            existing.status = status_str;
            existing.reason = Some(reason.to_string());
            existing.message = Some(message);
        } else {
            self.conditions.push(Condition {
                type_: type_.to_string(),
                status: status_str,
                reason: Some(reason.to_string()),
                message: Some(message),
                last_transition_time: k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(now),
                observed_generation: None,
            });
        }
    }

    pub fn clear_condition(&mut self, type_: &str) {
        self.conditions.retain(|c| c.type_ != type_);
    }
}

impl ChaosExperimentSpec {
    /// `count / |matches| × 100 ≤ maxPercentage`.
    pub fn percentage_cap_allows(&self, count: u32, eligible_matches: u32) -> bool {
        if eligible_matches == 0 {
            return count == 0;
        }
        let pct = count as f64 / eligible_matches as f64 * 100.0;
        pct <= self.max_percentage as f64 + 1e-9
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_cap_boundary_100_allows_full_match() {
        let mut spec = minimal_spec();
        spec.max_percentage = 100;
        assert!(spec.percentage_cap_allows(100, 100));
    }

    #[test]
    fn percentage_cap_boundary_99_rejects_full_match() {
        let mut spec = minimal_spec();
        spec.max_percentage = 99;
        assert!(!spec.percentage_cap_allows(100, 100));
    }

    fn minimal_spec() -> ChaosExperimentSpec {
        ChaosExperimentSpec {
            action: Action::PodKill,
            target_namespace: "demo".into(),
            selector: BTreeMap::new(),
            count: 1,
            experiment_duration: None,
            schedule: None,
            time_windows: vec![],
            paused: false,
            dry_run: false,
            max_percentage: 100,
            allow_production: false,
            retry: RetryPolicySpec::default(),
        }
    }
}
