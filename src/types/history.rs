//! `ChaosExperimentHistory` — immutable per-execution audit record.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::experiment::ChaosExperimentSpec;

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[kube(
    group = "chaos.gushchin.dev",
    version = "v1alpha1",
    kind = "ChaosExperimentHistory",
    plural = "chaosexperimenthistories",
    shortname = "chaoshist",
    namespaced,
    derive = "PartialEq"
)]
#[kube(printcolumn = r#"{"jsonPath": ".execution.status", "name": "Status", "type": "string"}"#)]
#[serde(rename_all = "camelCase")]
pub struct ChaosExperimentHistorySpec {
    pub experiment_ref: ExperimentRef,
    pub experiment_spec: ChaosExperimentSpec,
    pub execution: Execution,
    #[serde(default)]
    pub affected_resources: Vec<AffectedResource>,
    pub audit: Audit,
    pub error: Option<ExecutionError>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentRef {
    pub name: String,
    pub namespace: String,
    pub uid: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub status: ExecutionStatus,
    pub message: String,
    pub phase: super::experiment::Phase,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failure,
    Partial,
}

impl ExecutionStatus {
    pub fn as_label(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failure => "failure",
            ExecutionStatus::Partial => "partial",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AffectedResource {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub action_verb: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Audit {
    pub initiated_by: String,
    pub scheduled_execution: bool,
    pub dry_run: bool,
    pub retry_count: u32,
    pub creation_timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionError {
    pub message: String,
    pub last_error: String,
    pub failure_reason: FailureReason,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum FailureReason {
    PermissionDenied,
    ExecutionError,
    ValidationError,
    Timeout,
    ResourceNotFound,
    Unknown,
}

impl FailureReason {
    pub fn as_label(&self) -> &'static str {
        match self {
            FailureReason::PermissionDenied => "permission_denied",
            FailureReason::ExecutionError => "execution_error",
            FailureReason::ValidationError => "validation_error",
            FailureReason::Timeout => "timeout",
            FailureReason::ResourceNotFound => "resource_not_found",
            FailureReason::Unknown => "unknown",
        }
    }
}

impl ChaosExperimentHistorySpec {
    /// Labels applied at creation time for indexing.
    pub fn labels(&self) -> std::collections::BTreeMap<String, String> {
        let mut labels = std::collections::BTreeMap::new();
        labels.insert("experiment".to_string(), self.experiment_ref.name.clone());
        labels.insert("action".to_string(), self.experiment_spec.action.kind_name().to_string());
        labels.insert("target-namespace".to_string(), self.experiment_spec.target_namespace.clone());
        labels.insert("status".to_string(), self.execution.status.as_label().to_string());
        labels
    }

    /// `<experiment>-<YYYYMMDD-HHMMSS>-<short-uid>` record name.
    pub fn record_name(experiment_name: &str, now: DateTime<Utc>, uid: &uuid::Uuid) -> String {
        let short_uid = uid.simple().to_string();
        let short_uid = &short_uid[..8.min(short_uid.len())];
        format!("{experiment_name}-{}-{short_uid}", now.format("%Y%m%d-%H%M%S"))
    }
}
