//! Fault-injection dispatch. The `Action` enum's own payload tells each
//! handler everything it needs — the reconciler just destructures and calls; the old
//! "duration required for action X" runtime checks this replaces live on only in
//! `admission` for raw/foreign input.

pub mod ephemeral;
pub mod node_drain;
pub mod pod_cpu_stress;
pub mod pod_delay;
pub mod pod_disk_fill;
pub mod pod_failure;
pub mod pod_kill;
pub mod pod_memory_stress;
pub mod pod_network_loss;
pub mod pod_network_partition;
pub mod pod_restart;

use std::sync::Arc;

use futures::TryStreamExt;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::AttachParams;
use kube::Api;

use crate::reconciler::context::Dependencies;
use crate::types::{Action, AffectedResource, ExecutionStatus, FailureReason};

/// What an action handler leaves behind for the reconciler to fold into status, metrics,
/// events, and the history record.
pub struct ActionOutcome {
    pub status: ExecutionStatus,
    pub message: String,
    pub affected: Vec<AffectedResource>,
    pub affected_names: Vec<String>,
    /// New `ns/pod:container` refs to append to `status.ephemeralRefs`.
    pub ephemeral_refs: Vec<String>,
    /// Nodes newly cordoned by this execution (node-drain only).
    pub cordoned_nodes: Vec<String>,
    /// Worst-priority failure kind across the batch, `None` when every target
    /// succeeded. Drives `handleExperimentFailure`'s retry policy — a batch
    /// with any `PermissionDenied` target gets the fast-fail retry cap even if other
    /// targets failed for a different reason.
    pub failure_reason: Option<FailureReason>,
}

/// Per-target errors don't fail the batch unless *zero* targets succeeded. Callers build
/// one of these per target then fold with `fold_batch`.
pub enum TargetResult {
    Succeeded { name: String, affected: AffectedResource },
    Failed { name: String, message: String, kind: FailureReason },
}

/// Priority used to pick the single `failure_reason` surfaced for a batch: permission
/// errors get a dedicated fast-fail retry policy, so they take precedence over a
/// merely-generic execution error in the same batch.
fn reason_priority(reason: FailureReason) -> u8 {
    match reason {
        FailureReason::PermissionDenied => 0,
        FailureReason::ValidationError => 1,
        FailureReason::Timeout => 2,
        FailureReason::ExecutionError => 3,
        FailureReason::ResourceNotFound => 4,
        FailureReason::Unknown => 5,
    }
}

pub fn fold_batch(verb: &str, results: Vec<TargetResult>) -> ActionOutcome {
    let mut affected = Vec::new();
    let mut affected_names = Vec::new();
    let mut failures = Vec::new();
    let mut worst_reason: Option<FailureReason> = None;

    for r in results {
        match r {
            TargetResult::Succeeded { name, affected: a } => {
                affected_names.push(name);
                affected.push(a);
            }
            TargetResult::Failed { name, message, kind } => {
                failures.push(format!("{name}: {message}"));
                worst_reason = Some(match worst_reason {
                    Some(existing) if reason_priority(existing) <= reason_priority(kind) => existing,
                    _ => kind,
                });
            }
        }
    }

    let status = if affected.is_empty() && !failures.is_empty() {
        ExecutionStatus::Failure
    } else if !failures.is_empty() {
        ExecutionStatus::Partial
    } else {
        ExecutionStatus::Success
    };

    let message = match status {
        ExecutionStatus::Success => format!("Successfully {verb} {} resource(s): [{}]", affected_names.len(), affected_names.join(", ")),
        ExecutionStatus::Partial => format!(
            "{verb} {} of {} targeted resource(s); failures: {}",
            affected_names.len(),
            affected_names.len() + failures.len(),
            failures.join("; ")
        ),
        ExecutionStatus::Failure => format!("failed to {verb} any resources: {}", failures.join("; ")),
    };

    ActionOutcome {
        status,
        message,
        affected,
        affected_names,
        ephemeral_refs: Vec::new(),
        cordoned_nodes: Vec::new(),
        failure_reason: if matches!(status, ExecutionStatus::Success) { None } else { worst_reason },
    }
}

/// `pod-network-loss` -> `PodNetworkLoss`, for the `<Action>Failed` event reason
/// (`events::EventEmitter::action_failed`) from a handler's kebab-case `ACTION` constant.
pub fn pascal_case_action(kebab: &str) -> String {
    kebab.split('-').map(|part| {
        let mut chars = part.chars();
        match chars.next() {
            Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
            None => String::new(),
        }
    }).collect()
}

pub fn first_container_name(pod: &Pod) -> Option<String> {
    pod.spec.as_ref()?.containers.first().map(|c| c.name.clone())
}

/// Exec a command in a pod container and collect its combined stdout. `ResourceNotFound`
/// style "already gone" handling is the caller's responsibility — this just
/// performs the call.
pub async fn exec_collect(pods: &Api<Pod>, pod_name: &str, container: &str, command: Vec<&str>) -> Result<String, crate::Error> {
    let ap = AttachParams::default().container(container).stdout(true).stderr(true);
    let mut attached = pods
        .exec(pod_name, command, &ap)
        .await
        .map_err(|e| crate::Error::ExecError(e.to_string()))?;

    let mut out = String::new();
    if let Some(stdout) = attached.stdout() {
        let mut lines = tokio_util::io::ReaderStream::new(stdout);
        while let Ok(Some(chunk)) = lines.try_next().await {
            out.push_str(&String::from_utf8_lossy(&chunk));
        }
    }
    attached
        .join()
        .await
        .map_err(|e| crate::Error::ExecError(format!("exec in {pod_name}/{container} did not complete cleanly: {e}")))?;
    Ok(out)
}

pub fn pod_ref(ns: &str, name: &str, verb: &str) -> AffectedResource {
    AffectedResource {
        kind: "Pod".to_string(),
        name: name.to_string(),
        namespace: ns.to_string(),
        action_verb: verb.to_string(),
    }
}

pub fn node_ref(name: &str, verb: &str) -> AffectedResource {
    AffectedResource {
        kind: "Node".to_string(),
        name: name.to_string(),
        namespace: String::new(),
        action_verb: verb.to_string(),
    }
}

/// Dispatch on the `Action` payload. `eligible_pods`/`eligible_nodes` have
/// already passed the safety gate (`crate::safety`) and ordering (`count` already
/// applied) by the time they reach here.
pub async fn dispatch(
    deps: &Arc<Dependencies>,
    namespace: &str,
    action: &Action,
    eligible_pods: Vec<Pod>,
    eligible_nodes: Vec<Node>,
) -> Result<ActionOutcome, crate::Error> {
    match action {
        Action::PodKill => pod_kill::execute(deps, namespace, eligible_pods).await,
        Action::PodDelay { duration } => pod_delay::execute(deps, namespace, eligible_pods, *duration).await,
        Action::PodCpuStress { duration, cpu_load, cpu_workers } => {
            pod_cpu_stress::execute(deps, namespace, eligible_pods, *duration, *cpu_load, *cpu_workers).await
        }
        Action::PodMemoryStress { duration, memory_size, memory_workers } => {
            pod_memory_stress::execute(deps, namespace, eligible_pods, *duration, *memory_size, *memory_workers).await
        }
        Action::PodFailure => pod_failure::execute(deps, namespace, eligible_pods).await,
        Action::PodRestart { restart_interval } => pod_restart::execute(deps, namespace, eligible_pods, *restart_interval).await,
        Action::PodNetworkLoss { duration, loss_percentage, loss_correlation } => {
            pod_network_loss::execute(deps, namespace, eligible_pods, *duration, *loss_percentage, *loss_correlation).await
        }
        Action::PodDiskFill { duration, fill_percentage, target_path, volume_name } => {
            pod_disk_fill::execute(deps, namespace, eligible_pods, *duration, *fill_percentage, target_path.clone(), volume_name.clone()).await
        }
        Action::PodNetworkPartition { duration, direction, target_ips, target_cidrs, target_ports, target_protocols } => {
            pod_network_partition::execute(
                deps,
                namespace,
                eligible_pods,
                *duration,
                *direction,
                target_ips.clone(),
                target_cidrs.clone(),
                target_ports.clone(),
                target_protocols.clone(),
            )
            .await
        }
        Action::NodeDrain => node_drain::execute(deps, eligible_nodes).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pascal_case_action_renders_event_reason_prefix() {
        assert_eq!(pascal_case_action("pod-kill"), "PodKill");
        assert_eq!(pascal_case_action("pod-network-partition"), "PodNetworkPartition");
        assert_eq!(pascal_case_action("node-drain"), "NodeDrain");
    }

    #[test]
    fn fold_batch_is_failure_only_when_nothing_succeeded() {
        let results = vec![
            TargetResult::Failed { name: "a".into(), message: "boom".into(), kind: FailureReason::ExecutionError },
            TargetResult::Failed { name: "b".into(), message: "boom".into(), kind: FailureReason::PermissionDenied },
        ];
        let outcome = fold_batch("delete", results);
        assert!(matches!(outcome.status, ExecutionStatus::Failure));
        assert_eq!(outcome.failure_reason, Some(FailureReason::PermissionDenied));
    }

    #[test]
    fn fold_batch_is_partial_when_some_succeeded() {
        let results = vec![
            TargetResult::Succeeded { name: "a".into(), affected: pod_ref("demo", "a", "deleted") },
            TargetResult::Failed { name: "b".into(), message: "boom".into(), kind: FailureReason::Timeout },
        ];
        let outcome = fold_batch("delete", results);
        assert!(matches!(outcome.status, ExecutionStatus::Partial));
    }
}
