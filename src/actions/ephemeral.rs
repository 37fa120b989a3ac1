//! Ephemeral-container lifecycle. Ephemeral containers can't be removed
//! from a pod spec once added, so we never try; instead we track `(ns/pod:container)`
//! refs in `status.ephemeralRefs` and drive their lifecycle by reading container status
//! on later reconciles, never by further exec.

use k8s_openapi::api::core::v1::{Capabilities, ContainerStateTerminated, EphemeralContainer, Pod, SecurityContext};
use kube::api::{Patch, PatchParams};
use kube::Api;
use serde_json::json;

pub enum DuplicateGuard {
    /// No prior container with this action prefix; safe to inject.
    Clear,
    /// A prior container is still `Running`; skip this pod.
    Skip,
    /// A prior container `Terminated`; re-injection is allowed even if it terminated
    /// with a non-zero exit code — a known double-stress risk when the prior run
    /// terminated in error, kept because the alternative (blocking re-injection on any
    /// terminated container) would also block legitimate retries after a clean run.
    ReinjectAfterTermination,
}

/// Scan `pod`'s existing ephemeral containers for one whose name starts with
/// `action_prefix` and report its lifecycle state.
pub fn duplicate_guard(pod: &Pod, action_prefix: &str) -> DuplicateGuard {
    let Some(status) = pod.status.as_ref() else {
        return DuplicateGuard::Clear;
    };
    let Some(ephemeral_statuses) = status.ephemeral_container_statuses.as_ref() else {
        return DuplicateGuard::Clear;
    };

    for cs in ephemeral_statuses {
        if !cs.name.starts_with(action_prefix) {
            continue;
        }
        if let Some(state) = &cs.state {
            if state.running.is_some() {
                return DuplicateGuard::Skip;
            }
            if state.terminated.is_some() {
                return DuplicateGuard::ReinjectAfterTermination;
            }
        }
    }
    DuplicateGuard::Clear
}

pub struct EphemeralSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub net_admin: bool,
}

/// Append an ephemeral container to a pod's spec via the `ephemeralcontainers`
/// subresource. Returns the ref string (`ns/pod:container`) the caller tracks in
/// `status.ephemeralRefs`.
pub async fn inject(pods: &Api<Pod>, namespace: &str, pod_name: &str, spec: EphemeralSpec) -> Result<String, crate::Error> {
    let security_context = spec.net_admin.then(|| SecurityContext {
        capabilities: Some(Capabilities {
            add: Some(vec!["NET_ADMIN".to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    });

    let container = EphemeralContainer {
        name: spec.name.clone(),
        image: Some(spec.image),
        command: Some(spec.command),
        security_context,
        ..Default::default()
    };

    let patch = json!({
        "spec": {
            "ephemeralContainers": [container]
        }
    });

    let pp = PatchParams::default();
    pods.patch_subresource("ephemeralcontainers", pod_name, &pp, &Patch::Strategic(patch))
        .await
        .map_err(crate::Error::KubeError)?;

    Ok(format!("{namespace}/{pod_name}:{}", spec.name))
}

pub fn unix_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

pub enum InjectOutcome {
    Injected { container_name: String, reference: String },
    Skipped,
}

/// Apply the duplicate-injection guard then inject if clear. `spec_builder`
/// receives the freshly-minted container name so each variant can format its own prefix
/// consistently (`chaos-cpu-stress-<unix-ts>`, etc).
pub async fn inject_with_guard(
    pods: &Api<Pod>,
    namespace: &str,
    pod: &Pod,
    action_prefix: &str,
    build: impl FnOnce(String) -> EphemeralSpec,
) -> Result<InjectOutcome, crate::Error> {
    match duplicate_guard(pod, action_prefix) {
        DuplicateGuard::Skip => Ok(InjectOutcome::Skipped),
        DuplicateGuard::Clear | DuplicateGuard::ReinjectAfterTermination => {
            let pod_name = pod.metadata.name.clone().unwrap_or_default();
            let container_name = format!("{action_prefix}-{}", unix_ts());
            let spec = build(container_name.clone());
            let reference = inject(pods, namespace, &pod_name, spec).await?;
            Ok(InjectOutcome::Injected { container_name, reference })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefState {
    Cleaned,
    StillRunning,
}

/// `(namespace, pod, container)` parsed out of a tracked ref ( `"<ns>/<pod>:<container-name>"`).
pub fn parse_ref(reference: &str) -> Option<(&str, &str, &str)> {
    let (ns_pod, container) = reference.split_once(':')?;
    let (ns, pod) = ns_pod.split_once('/')?;
    Some((ns, pod, container))
}

/// Determine whether a tracked ephemeral container is done, given the live pod (or its
/// absence). : pod/container not found ⇒ cleaned; `Terminated` ⇒ cleaned;
/// `Running` ⇒ left in place (it self-terminates via its internal sleep).
pub fn classify_ref_state(pod: Option<&Pod>, container_name: &str) -> (RefState, Option<ContainerStateTerminated>) {
    let Some(pod) = pod else {
        return (RefState::Cleaned, None);
    };
    let Some(status) = pod.status.as_ref() else {
        return (RefState::Cleaned, None);
    };
    let Some(statuses) = status.ephemeral_container_statuses.as_ref() else {
        return (RefState::Cleaned, None);
    };
    let Some(cs) = statuses.iter().find(|cs| cs.name == container_name) else {
        return (RefState::Cleaned, None);
    };
    match cs.state.as_ref().and_then(|s| s.terminated.clone()) {
        Some(terminated) => (RefState::Cleaned, Some(terminated)),
        None => (RefState::StillRunning, None),
    }
}

/// Sweep `refs` against live pod state, returning the subset still `Running` (these
/// remain tracked) — the caller replaces `status.ephemeralRefs` with this subset.
pub async fn sweep(deps: &crate::reconciler::context::Dependencies, refs: &[String]) -> Vec<String> {
    let mut still_running = Vec::new();
    for reference in refs {
        let Some((ns, pod_name, container)) = parse_ref(reference) else {
            continue;
        };
        let pods = deps.pods(ns);
        let pod = pods.get_opt(pod_name).await.ok().flatten();
        let (state, terminated) = classify_ref_state(pod.as_ref(), container);
        match state {
            RefState::Cleaned => {
                if let Some(t) = terminated {
                    tracing::info!(pod = pod_name, container, exit_code = t.exit_code, "ephemeral container cleaned up");
                } else {
                    tracing::debug!(pod = pod_name, container, "ephemeral container's pod is gone; considered cleaned");
                }
            }
            RefState::StillRunning => still_running.push(reference.clone()),
        }
    }
    still_running
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ns_pod_container_ref() {
        assert_eq!(parse_ref("demo/web-0:chaos-cpu-stress-1700000000"), Some(("demo", "web-0", "chaos-cpu-stress-1700000000")));
    }

    #[test]
    fn rejects_malformed_ref() {
        assert_eq!(parse_ref("demo-web-0"), None);
        assert_eq!(parse_ref("demo/web-0"), None);
    }

    #[test]
    fn missing_pod_counts_as_cleaned() {
        let (state, terminated) = classify_ref_state(None, "chaos-cpu-stress-1");
        assert_eq!(state, RefState::Cleaned);
        assert!(terminated.is_none());
    }
}
