//! Admission validator: the only path allowed to reject a `ChaosExperiment`.
//! Split into a pure `validate_structural` (ranges, regexes, selective-partition target
//! syntax, cron syntax — everything the typed `Action` enum doesn't already enforce at
//! deserialization) and a cluster-aware `validate_dynamic` (namespace existence, live
//! selector match count, production guard). The reconciler trusts persisted resources
//! structurally but re-checks the dynamic invariants itself, since the percentage cap
//! against live counts may change between admission and reconcile.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;

use crate::reconciler::context::Dependencies;
use crate::safety;
use crate::types::{Action, ChaosExperimentSpec};

#[derive(Debug, Clone, Default)]
pub struct AdmissionOutcome {
    pub allowed: bool,
    /// Set when `allowed` is false: the rejection reason shown to the user.
    pub reason: Option<String>,
    /// Non-fatal notices for dangerous-but-allowed targets — surfaced to the user,
    /// never cause rejection by themselves.
    pub warnings: Vec<String>,
}

impl AdmissionOutcome {
    fn allow() -> Self {
        AdmissionOutcome { allowed: true, reason: None, warnings: Vec::new() }
    }

    fn deny(reason: impl Into<String>) -> Self {
        AdmissionOutcome { allowed: false, reason: Some(reason.into()), warnings: Vec::new() }
    }

    fn merge(mut self, other: AdmissionOutcome) -> Self {
        self.warnings.extend(other.warnings);
        if !other.allowed {
            self.allowed = false;
            self.reason = match (self.reason.take(), other.reason) {
                (Some(a), Some(b)) => Some(format!("{a}; {b}")),
                (Some(a), None) => Some(a),
                (None, b) => b,
            };
        }
        self
    }
}

/// Loopback and the conventional cluster-internal ranges a selective partition would be
/// dangerous to target: the loopback range, the default cluster service CIDR, and the
/// default cluster DNS IP. Kept as constants rather than config since they're
/// RFC/Kubernetes conventions, not deployment-specific choices.
const LOOPBACK_CIDR: &str = "127.0.0.0/8";
const DEFAULT_SERVICE_CIDR: &str = "10.96.0.0/12";
const DEFAULT_DNS_IP: &str = "10.96.0.10";

/// Pure structural + cross-field checks: value ranges, regexes, and everything the typed
/// `Action` enum doesn't already enforce at deserialization. No cluster access; safe to
/// unit test with fixtures.
pub fn validate_structural(spec: &ChaosExperimentSpec) -> AdmissionOutcome {
    let mut outcome = AdmissionOutcome::allow();

    if spec.count == 0 || spec.count > 100 {
        return AdmissionOutcome::deny(format!("count must be in [1, 100], got {}", spec.count));
    }
    if spec.max_percentage == 0 || spec.max_percentage > 100 {
        return AdmissionOutcome::deny(format!("maxPercentage must be in [1, 100], got {}", spec.max_percentage));
    }

    if let Some(schedule) = &spec.schedule {
        if let Err(e) = crate::reconciler::schedule::validate_cron(schedule) {
            return AdmissionOutcome::deny(e.to_string());
        }
    }

    outcome = outcome.merge(validate_action_ranges(&spec.action));
    outcome
}

fn validate_action_ranges(action: &Action) -> AdmissionOutcome {
    match action {
        Action::PodCpuStress { cpu_load, cpu_workers, .. } => {
            if !(1..=100).contains(cpu_load) {
                return AdmissionOutcome::deny(format!("cpuLoad must be in [1, 100], got {cpu_load}"));
            }
            if !(1..=32).contains(cpu_workers) {
                return AdmissionOutcome::deny(format!("cpuWorkers must be in [1, 32], got {cpu_workers}"));
            }
        }
        Action::PodMemoryStress { memory_workers, .. } => {
            if !(1..=8).contains(memory_workers) {
                return AdmissionOutcome::deny(format!("memoryWorkers must be in [1, 8], got {memory_workers}"));
            }
        }
        Action::PodNetworkLoss { loss_percentage, loss_correlation, .. } => {
            if !(1..=40).contains(loss_percentage) {
                return AdmissionOutcome::deny(format!("lossPercentage must be in [1, 40], got {loss_percentage}"));
            }
            if let Some(c) = loss_correlation {
                if *c > 100 {
                    return AdmissionOutcome::deny(format!("lossCorrelation must be in [0, 100], got {c}"));
                }
            }
        }
        Action::PodDiskFill { fill_percentage, .. } => {
            if !(50..=95).contains(fill_percentage) {
                return AdmissionOutcome::deny(format!("fillPercentage must be in [50, 95], got {fill_percentage}"));
            }
        }
        Action::PodNetworkPartition { target_ips, target_cidrs, target_ports, .. } => {
            let mut warnings = Vec::new();
            for port in target_ports {
                if *port == 0 {
                    return AdmissionOutcome::deny("targetPorts entries must be in [1, 65535], got 0".to_string());
                }
            }
            for ip in target_ips {
                if ip.is_loopback() {
                    warnings.push(format!("targetIP {ip} is a loopback address; partitioning it has no effect outside the pod itself"));
                }
                if ip.to_string() == DEFAULT_DNS_IP {
                    warnings.push(format!("targetIP {ip} looks like the cluster DNS service IP; this may break in-cluster name resolution"));
                }
            }
            for cidr in target_cidrs {
                let rendered = cidr.to_string();
                if rendered == LOOPBACK_CIDR {
                    warnings.push(format!("targetCIDR {rendered} covers the loopback range"));
                }
                if rendered == DEFAULT_SERVICE_CIDR {
                    warnings.push(format!("targetCIDR {rendered} looks like the cluster service CIDR; this may partition all Service traffic"));
                }
            }
            if !warnings.is_empty() {
                return AdmissionOutcome { allowed: true, reason: None, warnings };
            }
        }
        _ => {}
    }
    AdmissionOutcome::allow()
}

/// Cluster-aware checks: target namespace exists, selector matches at least one pod,
/// the percentage cap holds against the *live* match count, and the production guard.
/// Requires a live client, so this can't be unit tested without a fake API server; the
/// pure half above carries the bulk of the test coverage.
pub async fn validate_dynamic(spec: &ChaosExperimentSpec, deps: &Arc<Dependencies>) -> Result<AdmissionOutcome, crate::Error> {
    let namespaces = deps.namespaces();
    let Some(namespace) = namespaces.get_opt(&spec.target_namespace).await.map_err(crate::Error::KubeError)? else {
        return Ok(AdmissionOutcome::deny(format!("target namespace '{}' does not exist", spec.target_namespace)));
    };

    if !safety::production_guard_allows(&namespace, &deps.config, spec) {
        return Ok(AdmissionOutcome::deny(format!(
            "target namespace '{}' is production; set allowProduction=true to proceed",
            spec.target_namespace
        )));
    }

    if spec.action.targets_nodes() {
        // node-drain's selector matches nodes, not pods; the live percentage cap against
        // node counts is re-checked by the reconciler at execution time instead (nodes
        // aren't namespace-scoped and the only selector-match requirement here applies
        // to pods).
        return Ok(AdmissionOutcome::allow());
    }

    let pods: kube::Api<Pod> = deps.pods(&spec.target_namespace);
    let selector = safety::label_selector(&spec.selector);
    let lp = ListParams::default().labels(&selector);
    let matches = pods.list(&lp).await.map_err(crate::Error::KubeError)?;
    let match_count = matches.items.len() as u32;

    if match_count == 0 {
        return Ok(AdmissionOutcome::deny(format!("selector '{selector}' matches no pods in namespace '{}'", spec.target_namespace)));
    }

    if !spec.percentage_cap_allows(spec.count, match_count) {
        return Ok(AdmissionOutcome::deny(format!(
            "count {} against {match_count} live matching pod(s) exceeds maxPercentage {}",
            spec.count, spec.max_percentage
        )));
    }

    Ok(AdmissionOutcome::allow())
}

/// Full admission decision: structural first (cheap, no cluster calls),
/// short-circuiting before the dynamic checks since a structurally invalid spec has
/// nothing meaningful to check live matches against.
pub async fn validate(spec: &ChaosExperimentSpec, deps: &Arc<Dependencies>) -> Result<AdmissionOutcome, crate::Error> {
    let structural = validate_structural(spec);
    if !structural.allowed {
        return Ok(structural);
    }
    let dynamic = validate_dynamic(spec, deps).await?;
    Ok(structural.merge(dynamic))
}

/// Handles one `admission.k8s.io/v1` `AdmissionReview` request body and returns the
/// matching response body, so this binary can be registered as a
/// `ValidatingWebhookConfiguration` target without a second web framework. Kept as a
/// plain `serde_json::Value` in/out function rather than typed `k8s-openapi` admission
/// structs so this module has no dependency on a feature-gated API group; the wire shape
/// is fixed by the Kubernetes API and small enough to round-trip by hand.
pub async fn handle_webhook_request(review: serde_json::Value, deps: &Arc<Dependencies>) -> serde_json::Value {
    let uid = review.pointer("/request/uid").cloned().unwrap_or(serde_json::Value::Null);
    let spec_json = review.pointer("/request/object/spec").cloned();

    let outcome = match spec_json.and_then(|v| serde_json::from_value::<ChaosExperimentSpec>(v).ok()) {
        Some(spec) => validate(&spec, deps).await.unwrap_or_else(|e| AdmissionOutcome::deny(e.to_string())),
        None => AdmissionOutcome::deny("request carried no decodable ChaosExperimentSpec"),
    };

    serde_json::json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "response": {
            "uid": uid,
            "allowed": outcome.allowed,
            "status": { "message": outcome.reason.unwrap_or_default() },
            "warnings": outcome.warnings,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemorySize;
    use std::collections::BTreeMap;

    fn base_spec(action: Action) -> ChaosExperimentSpec {
        ChaosExperimentSpec {
            action,
            target_namespace: "demo".into(),
            selector: BTreeMap::from([("app".to_string(), "nginx".to_string())]),
            count: 1,
            experiment_duration: None,
            schedule: None,
            time_windows: vec![],
            paused: false,
            dry_run: false,
            max_percentage: 100,
            allow_production: false,
            retry: Default::default(),
        }
    }

    #[test]
    fn rejects_count_out_of_range() {
        let mut spec = base_spec(Action::PodKill);
        spec.count = 0;
        assert!(!validate_structural(&spec).allowed);
    }

    #[test]
    fn rejects_invalid_cron() {
        let mut spec = base_spec(Action::PodKill);
        spec.schedule = Some("not a cron".to_string());
        assert!(!validate_structural(&spec).allowed);
    }

    #[test]
    fn accepts_valid_cron() {
        let mut spec = base_spec(Action::PodKill);
        spec.schedule = Some("*/5 * * * *".to_string());
        assert!(validate_structural(&spec).allowed);
    }

    #[test]
    fn rejects_cpu_load_out_of_range() {
        let spec = base_spec(Action::PodCpuStress {
            duration: "30s".parse().unwrap(),
            cpu_load: 150,
            cpu_workers: 2,
        });
        assert!(!validate_structural(&spec).allowed);
    }

    #[test]
    fn rejects_memory_workers_out_of_range() {
        let spec = base_spec(Action::PodMemoryStress {
            duration: "30s".parse().unwrap(),
            memory_size: MemorySize::try_from("512M".to_string()).unwrap(),
            memory_workers: 20,
        });
        assert!(!validate_structural(&spec).allowed);
    }

    #[test]
    fn warns_on_loopback_partition_target_without_rejecting() {
        let spec = base_spec(Action::PodNetworkPartition {
            duration: "10s".parse().unwrap(),
            direction: Default::default(),
            target_ips: vec!["127.0.0.1".parse().unwrap()],
            target_cidrs: vec![],
            target_ports: vec![],
            target_protocols: vec![],
        });
        let outcome = validate_structural(&spec);
        assert!(outcome.allowed);
        assert!(!outcome.warnings.is_empty());
    }
}
