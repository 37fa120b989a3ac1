//! `node-drain`: targets nodes rather than pods. Cordons each target node, then evicts
//! its non-daemonset, non-static, non-terminating pods with a 30-second grace period.

use std::sync::Arc;

use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{EvictParams, ListParams, Patch, PatchParams};
use kube::{Api, ResourceExt};
use serde_json::json;

use crate::actions::{fold_batch, node_ref, ActionOutcome, TargetResult};
use crate::reconciler::context::Dependencies;
use crate::types::FailureReason;

const ACTION: &str = "node-drain";
const GRACE_PERIOD_SECONDS: i64 = 30;
const STATIC_POD_ANNOTATION: &str = "kubernetes.io/config.source";

fn is_daemonset_owned(pod: &Pod) -> bool {
    pod.owner_references().iter().any(|r| r.kind == "DaemonSet")
}

fn is_static(pod: &Pod) -> bool {
    pod.owner_references().iter().any(|r| r.kind == "Node") || pod.annotations().contains_key(STATIC_POD_ANNOTATION)
}

fn is_terminating(pod: &Pod) -> bool {
    pod.meta().deletion_timestamp.is_some()
}

fn is_terminal_phase(pod: &Pod) -> bool {
    matches!(pod.status.as_ref().and_then(|s| s.phase.as_deref()), Some("Succeeded") | Some("Failed"))
}

fn is_drainable(pod: &Pod) -> bool {
    !is_daemonset_owned(pod) && !is_static(pod) && !is_terminating(pod) && !is_terminal_phase(pod)
}

async fn cordon(nodes: &Api<Node>, node: &Node) -> Result<bool, crate::Error> {
    let already_unschedulable = node.spec.as_ref().and_then(|s| s.unschedulable).unwrap_or(false);
    if already_unschedulable {
        return Ok(false);
    }

    let name = node.name_any();
    let patch = json!({ "spec": { "unschedulable": true } });
    nodes
        .patch(&name, &PatchParams::default(), &Patch::Merge(patch))
        .await
        .map_err(crate::Error::KubeError)?;
    Ok(true)
}

/// Auto-uncordon on experiment completion: only called for nodes this
/// experiment itself cordoned, never pre-existing cordons. `kube::Error::Api` 404 is
/// treated as already-gone, matching the rest of this crate's "already gone is success"
/// convention.
pub async fn uncordon(deps: &Arc<Dependencies>, node_name: &str) -> Result<(), crate::Error> {
    let nodes = deps.nodes();
    let patch = json!({ "spec": { "unschedulable": false } });
    match nodes.patch(node_name, &PatchParams::default(), &Patch::Merge(patch)).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(crate::Error::KubeError(e)),
    }
}

async fn drain_pods(deps: &Arc<Dependencies>, node_name: &str) -> Result<(usize, Vec<String>), crate::Error> {
    let all_pods = deps.pods_all();
    let lp = ListParams::default().fields(&format!("spec.nodeName={node_name}"));
    let list = all_pods.list(&lp).await.map_err(crate::Error::KubeError)?;

    let mut evicted = 0;
    let mut failures = Vec::new();

    for pod in list.items.into_iter().filter(|p| is_drainable(p)) {
        let name = pod.name_any();
        let namespace = pod.namespace().unwrap_or_default();
        let pods_ns = deps.pods(&namespace);
        let ep = EvictParams {
            delete_options: Some(kube::api::DeleteParams { grace_period_seconds: Some(GRACE_PERIOD_SECONDS), ..Default::default() }),
            ..Default::default()
        };
        match pods_ns.evict(&name, &ep).await {
            Ok(_) => evicted += 1,
            Err(kube::Error::Api(e)) if e.code == 404 => evicted += 1,
            Err(e) => failures.push(format!("{namespace}/{name}: {e}")),
        }
    }

    Ok((evicted, failures))
}

pub async fn execute(deps: &Arc<Dependencies>, targets: Vec<Node>) -> Result<ActionOutcome, crate::Error> {
    let nodes = deps.nodes();
    let mut results = Vec::with_capacity(targets.len());
    let mut cordoned_nodes = Vec::new();

    for node in &targets {
        let name = node.name_any();

        let newly_cordoned = match cordon(&nodes, node).await {
            Ok(newly) => newly,
            Err(e) => {
                let kind = e.classify();
                deps.metrics.record_error(ACTION, "", kind.as_label());
                deps.events_for(node).await.action_failed(&crate::actions::pascal_case_action(ACTION), &name, &e.to_string()).await;
                results.push(TargetResult::Failed { name: name.clone(), message: e.to_string(), kind });
                continue;
            }
        };
        if newly_cordoned {
            cordoned_nodes.push(name.clone());
        }

        match drain_pods(deps, &name).await {
            Ok((evicted, failures)) if failures.is_empty() => {
                deps.events_for(node).await.chaos_action("Drained", &name).await;
                results.push(TargetResult::Succeeded {
                    name: name.clone(),
                    affected: node_ref(&name, &format!("cordoned and evicted {evicted} pod(s)")),
                });
            }
            Ok((evicted, failures)) => {
                let message = format!("evicted {evicted} pod(s), but failed on: {}", failures.join("; "));
                deps.events_for(node).await.action_failed(&crate::actions::pascal_case_action(ACTION), &name, &message).await;
                results.push(TargetResult::Failed { name: name.clone(), message, kind: FailureReason::ExecutionError });
            }
            Err(e) => {
                let kind = e.classify();
                deps.metrics.record_error(ACTION, "", kind.as_label());
                deps.events_for(node).await.action_failed(&crate::actions::pascal_case_action(ACTION), &name, &e.to_string()).await;
                results.push(TargetResult::Failed { name, message: e.to_string(), kind });
            }
        }
    }

    let mut outcome = fold_batch("drained", results);
    outcome.cordoned_nodes = cordoned_nodes;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

    fn pod_with_owner(kind: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                owner_references: Some(vec![OwnerReference { kind: kind.to_string(), ..Default::default() }]),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn drops_daemonset_owned_pods() {
        assert!(!is_drainable(&pod_with_owner("DaemonSet")));
    }

    #[test]
    fn drops_static_pods_by_owner() {
        assert!(!is_drainable(&pod_with_owner("Node")));
    }

    #[test]
    fn drops_static_pods_by_annotation() {
        let mut pod = Pod::default();
        pod.metadata.annotations = Some([(STATIC_POD_ANNOTATION.to_string(), "file".to_string())].into());
        assert!(!is_drainable(&pod));
    }

    #[test]
    fn drops_terminal_phase_pods() {
        let mut pod = Pod::default();
        pod.status = Some(PodStatus { phase: Some("Succeeded".to_string()), ..Default::default() });
        assert!(!is_drainable(&pod));
    }

    #[test]
    fn keeps_regular_running_pods() {
        let mut pod = Pod::default();
        pod.status = Some(PodStatus { phase: Some("Running".to_string()), ..Default::default() });
        assert!(is_drainable(&pod));
    }
}
