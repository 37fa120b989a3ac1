//! `pod-network-loss`: inject a `NET_ADMIN` ephemeral container running
//! `tc qdisc add dev eth0 root netem loss <P>% [<C>%]`, sleeping for `duration`, then
//! tearing the qdisc back down.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use crate::actions::ephemeral::{inject_with_guard, EphemeralSpec, InjectOutcome};
use crate::actions::{fold_batch, pod_ref, ActionOutcome, TargetResult};
use crate::reconciler::context::Dependencies;
use crate::types::ChaosDuration;

const ACTION: &str = "pod-network-loss";
const ACTION_PREFIX: &str = "chaos-network-loss";
const NET_TOOLS_IMAGE: &str = "gaiadocker/iproute2:latest";

pub async fn execute(
    deps: &Arc<Dependencies>,
    namespace: &str,
    targets: Vec<Pod>,
    duration: ChaosDuration,
    loss_percentage: u8,
    loss_correlation: Option<u8>,
) -> Result<ActionOutcome, crate::Error> {
    let pods = deps.pods(namespace);
    let timeout_secs = duration.as_seconds_u64();
    let mut results = Vec::with_capacity(targets.len());
    let mut ephemeral_refs = Vec::new();

    let netem_args = match loss_correlation {
        Some(c) => format!("loss {loss_percentage}% {c}%"),
        None => format!("loss {loss_percentage}%"),
    };
    let script = format!(
        "tc qdisc add dev eth0 root netem {netem_args} && sleep {timeout_secs} && tc qdisc del dev eth0 root"
    );

    for pod in &targets {
        let name = pod.name_any();
        let command = vec!["sh".to_string(), "-c".to_string(), script.clone()];

        let outcome = inject_with_guard(&pods, namespace, pod, ACTION_PREFIX, |container_name| EphemeralSpec {
            name: container_name,
            image: NET_TOOLS_IMAGE.to_string(),
            command: command.clone(),
            net_admin: true,
        })
        .await;

        match outcome {
            Ok(InjectOutcome::Injected { container_name, reference }) => {
                ephemeral_refs.push(reference);
                deps.events_for(pod).await.chaos_action("NetworkLossInjected", &name).await;
                results.push(TargetResult::Succeeded {
                    name: name.clone(),
                    affected: pod_ref(namespace, &name, &format!("injected {container_name}")),
                });
            }
            Ok(InjectOutcome::Skipped) => {
                tracing::debug!(pod = %name, "network-loss already running; skipping");
            }
            Err(e) => {
                let kind = e.classify();
                deps.metrics.record_error(ACTION, namespace, kind.as_label());
                deps.events_for(pod).await.action_failed(&crate::actions::pascal_case_action(ACTION), &name, &e.to_string()).await;
                results.push(TargetResult::Failed { name, message: e.to_string(), kind });
            }
        }
    }

    let mut outcome = fold_batch("injected network loss into", results);
    outcome.ephemeral_refs = ephemeral_refs;
    Ok(outcome)
}
