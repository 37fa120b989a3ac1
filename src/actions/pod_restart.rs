//! `pod-restart`: graceful `kill -15 1 || kill -TERM 1` in the first
//! container of each target pod, optionally paced by `restartInterval`.
//!
//! Open question: a main process that ignores SIGTERM has no fallback here —
//! matches the source behavior verbatim rather than guessing at one.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use crate::actions::{exec_collect, first_container_name, fold_batch, pod_ref, ActionOutcome, TargetResult};
use crate::reconciler::context::Dependencies;
use crate::types::{ChaosDuration, FailureReason};

const ACTION: &str = "pod-restart";

pub async fn execute(
    deps: &Arc<Dependencies>,
    namespace: &str,
    targets: Vec<Pod>,
    restart_interval: Option<ChaosDuration>,
) -> Result<ActionOutcome, crate::Error> {
    let pods = deps.pods(namespace);
    let mut results = Vec::with_capacity(targets.len());

    for (idx, pod) in targets.iter().enumerate() {
        if idx > 0 {
            if let Some(interval) = restart_interval {
                tokio::time::sleep(interval.as_std()).await;
            }
        }

        let name = pod.name_any();
        let Some(container) = first_container_name(pod) else {
            results.push(TargetResult::Failed { name, message: "pod has no containers".to_string(), kind: FailureReason::ValidationError });
            continue;
        };

        match exec_collect(&pods, &name, &container, vec!["sh", "-c", "kill -15 1 || kill -TERM 1"]).await {
            Ok(_) => {
                deps.events_for(pod).await.chaos_action("Restarted", &name).await;
                results.push(TargetResult::Succeeded {
                    name: name.clone(),
                    affected: pod_ref(namespace, &name, "sent SIGTERM to pid 1"),
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

    Ok(fold_batch("restarted", results))
}
