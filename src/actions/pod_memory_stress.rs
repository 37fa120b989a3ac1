//! `pod-memory-stress`: inject an ephemeral container running
//! `--vm <workers> --vm-bytes <size> --timeout <seconds>`.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use crate::actions::ephemeral::{inject_with_guard, EphemeralSpec, InjectOutcome};
use crate::actions::{fold_batch, pod_ref, ActionOutcome, TargetResult};
use crate::reconciler::context::Dependencies;
use crate::types::{ChaosDuration, MemorySize};

const ACTION: &str = "pod-memory-stress";
const ACTION_PREFIX: &str = "chaos-memory-stress";
const STRESS_IMAGE: &str = "polinux/stress-ng:latest";

pub async fn execute(
    deps: &Arc<Dependencies>,
    namespace: &str,
    targets: Vec<Pod>,
    duration: ChaosDuration,
    memory_size: MemorySize,
    memory_workers: u8,
) -> Result<ActionOutcome, crate::Error> {
    let pods = deps.pods(namespace);
    let timeout_secs = duration.as_seconds_u64();
    let mut results = Vec::with_capacity(targets.len());
    let mut ephemeral_refs = Vec::new();

    for pod in &targets {
        let name = pod.name_any();
        let command = vec![
            "stress-ng".to_string(),
            "--vm".to_string(),
            memory_workers.to_string(),
            "--vm-bytes".to_string(),
            memory_size.as_stress_ng_token(),
            "--timeout".to_string(),
            format!("{timeout_secs}s"),
        ];

        let outcome = inject_with_guard(&pods, namespace, pod, ACTION_PREFIX, |container_name| EphemeralSpec {
            name: container_name,
            image: STRESS_IMAGE.to_string(),
            command: command.clone(),
            net_admin: false,
        })
        .await;

        match outcome {
            Ok(InjectOutcome::Injected { container_name, reference }) => {
                ephemeral_refs.push(reference);
                deps.events_for(pod).await.chaos_action("MemoryStressed", &name).await;
                results.push(TargetResult::Succeeded {
                    name: name.clone(),
                    affected: pod_ref(namespace, &name, &format!("injected {container_name}")),
                });
            }
            Ok(InjectOutcome::Skipped) => {
                tracing::debug!(pod = %name, "memory-stress already running; skipping");
            }
            Err(e) => {
                let kind = e.classify();
                deps.metrics.record_error(ACTION, namespace, kind.as_label());
                deps.events_for(pod).await.action_failed(&crate::actions::pascal_case_action(ACTION), &name, &e.to_string()).await;
                results.push(TargetResult::Failed { name, message: e.to_string(), kind });
            }
        }
    }

    let mut outcome = fold_batch("injected memory stress into", results);
    outcome.ephemeral_refs = ephemeral_refs;
    Ok(outcome)
}
