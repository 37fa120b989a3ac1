//! History subsystem: immutable per-execution audit records with dual
//! retention (count + TTL). Record creation samples by `historySamplingRate`; cleanup
//! runs in two independent passes, each its own background task, that must never
//! block the reconcile.

pub mod cleanup;

use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::PostParams;
use kube::ResourceExt;
use rand::Rng;
use uuid::Uuid;

use crate::reconciler::context::Dependencies;
use crate::types::{
    Audit, ChaosExperiment, ChaosExperimentHistory, ChaosExperimentHistorySpec, Execution, ExecutionError,
};

/// Everything the reconciler already knows about a completed execution, handed to the
/// history subsystem to fold into a record.
pub struct ExecutionRecord {
    pub execution: Execution,
    pub affected_resources: Vec<crate::types::AffectedResource>,
    pub audit: Audit,
    pub error: Option<ExecutionError>,
}

/// Write one history record for `experiment`'s most recent execution, honoring the
/// configured sampling rate, then kick off retention-limit cleanup fire-and-forget so
/// it never blocks the reconcile.
pub async fn record_execution(deps: &Arc<Dependencies>, experiment: &ChaosExperiment, record: ExecutionRecord) -> Result<(), crate::Error> {
    if !deps.config.history_enabled {
        return Ok(());
    }
    if !sampled(deps.config.history_sampling_rate) {
        return Ok(());
    }

    let uid = experiment.uid().unwrap_or_default();
    let name = experiment.name_any();
    let namespace = experiment.namespace().unwrap_or_default();
    let now = record.execution.end_time;

    let spec = ChaosExperimentHistorySpec {
        experiment_ref: crate::types::ExperimentRef { name: name.clone(), namespace, uid },
        experiment_spec: experiment.spec.clone(),
        execution: record.execution,
        affected_resources: record.affected_resources,
        audit: record.audit,
        error: record.error,
    };

    let record_uuid = Uuid::new_v4();
    let record_name = ChaosExperimentHistorySpec::record_name(&name, now, &record_uuid);
    let labels = spec.labels();
    let status_label = labels.get("status").cloned().unwrap_or_default();

    let history = ChaosExperimentHistory {
        metadata: ObjectMeta {
            name: Some(record_name),
            labels: Some(labels),
            ..Default::default()
        },
        spec,
    };

    let api = deps.history();
    api.create(&PostParams::default(), &history).await.map_err(crate::Error::KubeError)?;
    deps.metrics.history_records_total.with_label_values(&[experiment.spec.action.kind_name(), &status_label]).inc();

    let deps = deps.clone();
    let experiment_name = name;
    tokio::spawn(async move {
        if let Err(e) = cleanup::cleanup_retention_limit(&deps, &experiment_name).await {
            tracing::warn!(error = %e, experiment = %experiment_name, "retention-limit cleanup failed");
        }
    });

    Ok(())
}

fn sampled(rate: f64) -> bool {
    if rate >= 1.0 {
        return true;
    }
    if rate <= 0.0 {
        return false;
    }
    rand::thread_rng().gen_bool(rate)
}
