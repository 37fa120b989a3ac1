//! `pod-kill`: delete eligible pods outright. "Already gone" is success.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::api::DeleteParams;
use kube::ResourceExt;

use crate::actions::{fold_batch, pod_ref, ActionOutcome, TargetResult};
use crate::reconciler::context::Dependencies;

const ACTION: &str = "pod-kill";

pub async fn execute(deps: &Arc<Dependencies>, namespace: &str, targets: Vec<Pod>) -> Result<ActionOutcome, crate::Error> {
    let pods = deps.pods(namespace);
    let mut results = Vec::with_capacity(targets.len());

    for pod in &targets {
        let name = pod.name_any();
        match pods.delete(&name, &DeleteParams::default()).await {
            Ok(_) => {
                deps.events_for(pod).await.chaos_action("Killed", &name).await;
                results.push(TargetResult::Succeeded {
                    name: name.clone(),
                    affected: pod_ref(namespace, &name, "deleted"),
                });
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                // Already gone: a 404 on delete is treated as success for pod-kill.
                results.push(TargetResult::Succeeded {
                    name: name.clone(),
                    affected: pod_ref(namespace, &name, "already-deleted"),
                });
            }
            Err(e) => {
                let message = e.to_string();
                let kind = crate::Error::KubeError(e).classify();
                deps.metrics.record_error(ACTION, namespace, kind.as_label());
                deps.events_for(pod).await.action_failed(&crate::actions::pascal_case_action(ACTION), &name, &message).await;
                results.push(TargetResult::Failed { name, message, kind });
            }
        }
    }

    Ok(fold_batch("delete", results))
}
