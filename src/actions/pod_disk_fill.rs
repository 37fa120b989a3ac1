//! `pod-disk-fill`: inject an ephemeral container that computes bytes
//! needed to reach `fillPercentage` of the target path's filesystem, allocates a filler
//! file (`fallocate` if available, else `dd`), sleeps, then removes it.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use crate::actions::ephemeral::{inject_with_guard, EphemeralSpec, InjectOutcome};
use crate::actions::{fold_batch, pod_ref, ActionOutcome, TargetResult};
use crate::reconciler::context::Dependencies;
use crate::types::ChaosDuration;

const ACTION: &str = "pod-disk-fill";
const ACTION_PREFIX: &str = "chaos-disk-fill";
const TOOLS_IMAGE: &str = "busybox:latest";
const DEFAULT_TARGET_PATH: &str = "/tmp";

/// Resolve `volumeName` to the mount path it's bound to in the pod's first container,
/// falling back to `targetPath`/default when no volume name is given.
fn resolve_target_path(pod: &Pod, target_path: &Option<String>, volume_name: &Option<String>) -> String {
    if let Some(volume) = volume_name {
        if let Some(spec) = &pod.spec {
            if let Some(container) = spec.containers.first() {
                if let Some(mounts) = &container.volume_mounts {
                    if let Some(m) = mounts.iter().find(|m| &m.name == volume) {
                        return m.mount_path.clone();
                    }
                }
            }
        }
    }
    target_path.clone().unwrap_or_else(|| DEFAULT_TARGET_PATH.to_string())
}

fn fill_script(path: &str, fill_percentage: u8, timeout_secs: u64) -> String {
    format!(
        "FILE={path}/.chaos-disk-fill; \
         USED=$(df -P {path} | tail -1 | awk '{{print $3}}'); \
         SIZE=$(df -P {path} | tail -1 | awk '{{print $2}}'); \
         TARGET=$(( SIZE * {fill_percentage} / 100 )); \
         NEED=$(( (TARGET - USED) * 1024 )); \
         if [ \"$NEED\" -gt 0 ]; then \
           if command -v fallocate >/dev/null 2>&1; then fallocate -l \"$NEED\" \"$FILE\"; \
           else dd if=/dev/zero of=\"$FILE\" bs=1M count=$(( (NEED + 1048575) / 1048576 )); fi; \
         fi; \
         sleep {timeout_secs}; \
         rm -f \"$FILE\""
    )
}

pub async fn execute(
    deps: &Arc<Dependencies>,
    namespace: &str,
    targets: Vec<Pod>,
    duration: ChaosDuration,
    fill_percentage: u8,
    target_path: Option<String>,
    volume_name: Option<String>,
) -> Result<ActionOutcome, crate::Error> {
    let pods = deps.pods(namespace);
    let timeout_secs = duration.as_seconds_u64();
    let mut results = Vec::with_capacity(targets.len());
    let mut ephemeral_refs = Vec::new();

    for pod in &targets {
        let name = pod.name_any();
        let path = resolve_target_path(pod, &target_path, &volume_name);
        let script = fill_script(&path, fill_percentage, timeout_secs);
        let command = vec!["sh".to_string(), "-c".to_string(), script];

        let outcome = inject_with_guard(&pods, namespace, pod, ACTION_PREFIX, |container_name| EphemeralSpec {
            name: container_name,
            image: TOOLS_IMAGE.to_string(),
            command: command.clone(),
            net_admin: false,
        })
        .await;

        match outcome {
            Ok(InjectOutcome::Injected { container_name, reference }) => {
                ephemeral_refs.push(reference);
                deps.events_for(pod).await.chaos_action("DiskFilled", &name).await;
                results.push(TargetResult::Succeeded {
                    name: name.clone(),
                    affected: pod_ref(namespace, &name, &format!("injected {container_name} targeting {path}")),
                });
            }
            Ok(InjectOutcome::Skipped) => {
                tracing::debug!(pod = %name, "disk-fill already running; skipping");
            }
            Err(e) => {
                let kind = e.classify();
                deps.metrics.record_error(ACTION, namespace, kind.as_label());
                deps.events_for(pod).await.action_failed(&crate::actions::pascal_case_action(ACTION), &name, &e.to_string()).await;
                results.push(TargetResult::Failed { name, message: e.to_string(), kind });
            }
        }
    }

    let mut outcome = fold_batch("filled disk on", results);
    outcome.ephemeral_refs = ephemeral_refs;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, PodSpec, VolumeMount};

    #[test]
    fn resolves_volume_name_to_mount_path() {
        let pod = Pod {
            spec: Some(PodSpec {
                containers: vec![Container {
                    volume_mounts: Some(vec![VolumeMount {
                        name: "data".to_string(),
                        mount_path: "/var/lib/data".to_string(),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        };
        let path = resolve_target_path(&pod, &None, &Some("data".to_string()));
        assert_eq!(path, "/var/lib/data");
    }

    #[test]
    fn falls_back_to_default_target_path() {
        let pod = Pod::default();
        assert_eq!(resolve_target_path(&pod, &None, &None), "/tmp");
    }
}
