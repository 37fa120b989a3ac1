//! `pod-delay`: exec `tc qdisc` to add a fixed network
//! delay in the first container of each target pod.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use crate::actions::{exec_collect, first_container_name, fold_batch, pod_ref, ActionOutcome, TargetResult};
use crate::reconciler::context::Dependencies;
use crate::types::{ChaosDuration, FailureReason};

const ACTION: &str = "pod-delay";

pub async fn execute(
    deps: &Arc<Dependencies>,
    namespace: &str,
    targets: Vec<Pod>,
    duration: ChaosDuration,
) -> Result<ActionOutcome, crate::Error> {
    let pods = deps.pods(namespace);
    let millis = duration.as_std().as_millis();
    let mut results = Vec::with_capacity(targets.len());

    for pod in &targets {
        let name = pod.name_any();
        let Some(container) = first_container_name(pod) else {
            results.push(TargetResult::Failed { name, message: "pod has no containers".to_string(), kind: FailureReason::ValidationError });
            continue;
        };

        // Clear a stale qdisc first; a missing qdisc errors harmlessly, so ignore it.
        let _ = exec_collect(&pods, &name, &container, vec!["tc", "qdisc", "del", "dev", "eth0", "root"]).await;

        let delay_arg = format!("{millis}ms");
        match exec_collect(
            &pods,
            &name,
            &container,
            vec!["tc", "qdisc", "add", "dev", "eth0", "root", "netem", "delay", &delay_arg],
        )
        .await
        {
            Ok(_) => {
                deps.events_for(pod).await.chaos_action("Delayed", &name).await;
                results.push(TargetResult::Succeeded {
                    name: name.clone(),
                    affected: pod_ref(namespace, &name, &format!("added {delay_arg} delay")),
                });
            }
            Err(e) => {
                let kind = e.classify();
                deps.metrics.record_error(ACTION, namespace, kind.as_label());
                deps.events_for(pod).await.action_failed(&crate::actions::pascal_case_action(ACTION), &name, &e.to_string()).await;
                results.push(TargetResult::Failed { name, message: e.to_string(), kind });
            }
        }
    }

    let mut outcome = fold_batch("added delay to", results);
    if matches!(outcome.status, crate::types::ExecutionStatus::Success) {
        outcome.message = format!("Successfully added {millis}ms delay to {} pod(s)", outcome.affected_names.len());
    }
    Ok(outcome)
}
