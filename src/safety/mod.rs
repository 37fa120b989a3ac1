//! The safety gate: exclusion, terminating-filter, production guard,
//! percentage cap, and deterministic ordering. Everything here is a pure function over
//! already-fetched candidates — the reconciler is responsible for the list calls, this
//! module only decides who's eligible and who gets picked.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::Config;
use crate::types::ChaosExperimentSpec;

pub const EXCLUDE_LABEL: &str = "chaos.gushchin.dev/exclude";
pub const EXCLUDE_ANNOTATION: &str = "chaos.gushchin.dev/exclude";

/// Render an equality label selector ( `selector`) for list calls.
pub fn label_selector(selector: &std::collections::BTreeMap<String, String>) -> String {
    selector.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateError {
    NamespaceExcluded,
    ProductionApprovalRequired,
    PercentageCapExceeded { requested: u32, eligible: u32, max_percentage: u8 },
}

impl std::fmt::Display for GateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateError::NamespaceExcluded => write!(f, "target namespace is excluded from chaos experiments"),
            GateError::ProductionApprovalRequired => {
                write!(f, "target namespace is production; set allowProduction=true to proceed")
            }
            GateError::PercentageCapExceeded { requested, eligible, max_percentage } => write!(
                f,
                "count {requested} against {eligible} eligible resource(s) exceeds maxPercentage {max_percentage}"
            ),
        }
    }
}

/// Namespace annotation `chaos.gushchin.dev/exclude=true` ⇒ whole namespace excluded.
pub fn namespace_excluded(ns: &Namespace) -> bool {
    ns.annotations().get(EXCLUDE_ANNOTATION).map(|v| v == "true").unwrap_or(false)
}

/// Namespace label `environment=production` (configurable key/value) ⇒ requires
/// `allowProduction=true`.
pub fn is_production_namespace(ns: &Namespace, config: &Config) -> bool {
    ns.labels()
        .get(&config.production_label_key)
        .map(|v| v == config.production_label_value.as_str())
        .unwrap_or(false)
}

pub fn production_guard_allows(ns: &Namespace, config: &Config, spec: &ChaosExperimentSpec) -> bool {
    !is_production_namespace(ns, config) || spec.allow_production
}

/// Pod/node label `chaos.gushchin.dev/exclude=true` ⇒ excluded.
pub fn is_label_excluded<K: ResourceExt>(resource: &K) -> bool {
    resource.labels().get(EXCLUDE_LABEL).map(|v| v == "true").unwrap_or(false)
}

/// Non-null deletion timestamp ⇒ excluded.
pub fn is_terminating<K: ResourceExt>(resource: &K) -> bool {
    resource.meta().deletion_timestamp.is_some()
}

pub struct EligibilityCounts {
    pub excluded_label: usize,
    pub excluded_terminating: usize,
}

/// Apply the per-resource exclusion and terminating filters,
/// returning the survivors plus counts for the exclusion metrics.
pub fn filter_eligible<K: ResourceExt + Clone>(candidates: Vec<K>) -> (Vec<K>, EligibilityCounts) {
    let mut counts = EligibilityCounts {
        excluded_label: 0,
        excluded_terminating: 0,
    };
    let eligible = candidates
        .into_iter()
        .filter(|r| {
            if is_label_excluded(r) {
                counts.excluded_label += 1;
                return false;
            }
            if is_terminating(r) {
                counts.excluded_terminating += 1;
                return false;
            }
            true
        })
        .collect();
    (eligible, counts)
}

/// Deterministic per-reconcile shuffle seed: derived from the
/// experiment's UID plus its resource generation, so the ordering is reproducible for a
/// given reconcile without being predictable across different experiments.
pub fn shuffle_seed(experiment_uid: &str, generation: i64) -> u64 {
    let mut hasher = DefaultHasher::new();
    experiment_uid.hash(&mut hasher);
    generation.hash(&mut hasher);
    hasher.finish()
}

fn deterministic_shuffle<T>(items: &mut [T], seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    items.shuffle(&mut rng);
}

/// Checks the percentage cap against the eligible set, then does a deterministic
/// shuffle and takes the first `count`.
pub fn select_targets<K>(mut eligible: Vec<K>, count: u32, max_percentage: u8, seed: u64) -> Result<Vec<K>, GateError> {
    let eligible_count = eligible.len() as u32;
    if eligible_count == 0 {
        return Ok(Vec::new());
    }

    let pct = count as f64 / eligible_count as f64 * 100.0;
    if pct > max_percentage as f64 + 1e-9 {
        return Err(GateError::PercentageCapExceeded {
            requested: count,
            eligible: eligible_count,
            max_percentage,
        });
    }

    deterministic_shuffle(&mut eligible, seed);
    let take = (count as usize).min(eligible.len());
    eligible.truncate(take);
    Ok(eligible)
}

/// Renders the dry-run status preview message without performing any mutation.
pub fn render_dry_run_message(verb: &str, names: &[String]) -> String {
    format!("DRY RUN: Would {verb} {} resource(s): [{}]", names.len(), names.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Pod;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use std::collections::BTreeMap;

    fn pod(name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn percentage_cap_boundary_100_allows_full_selection() {
        let pods: Vec<Pod> = (0..100).map(|i| pod(&format!("pod-{i}"))).collect();
        assert!(select_targets(pods, 100, 100, 42).is_ok());
    }

    #[test]
    fn percentage_cap_boundary_99_rejects_full_selection() {
        let pods: Vec<Pod> = (0..100).map(|i| pod(&format!("pod-{i}"))).collect();
        let err = select_targets(pods, 100, 99, 42).unwrap_err();
        assert!(matches!(err, GateError::PercentageCapExceeded { .. }));
    }

    #[test]
    fn excludes_labeled_and_terminating_resources() {
        let mut excluded_by_label = pod("excluded");
        excluded_by_label.metadata.labels = Some(BTreeMap::from([(EXCLUDE_LABEL.to_string(), "true".to_string())]));

        let mut terminating = pod("terminating");
        terminating.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));

        let keep = pod("keep");

        let (eligible, counts) = filter_eligible(vec![excluded_by_label, terminating, keep.clone()]);
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].metadata.name, keep.metadata.name);
        assert_eq!(counts.excluded_label, 1);
        assert_eq!(counts.excluded_terminating, 1);
    }

    #[test]
    fn shuffle_seed_is_deterministic_for_same_inputs() {
        assert_eq!(shuffle_seed("uid-1", 3), shuffle_seed("uid-1", 3));
        assert_ne!(shuffle_seed("uid-1", 3), shuffle_seed("uid-2", 3));
    }

    #[test]
    fn dry_run_message_matches_spec_format() {
        let msg = render_dry_run_message("delete", &["a".into(), "b".into()]);
        assert_eq!(msg, "DRY RUN: Would delete 2 resource(s): [a, b]");
    }
}
