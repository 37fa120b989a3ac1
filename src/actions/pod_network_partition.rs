//! `pod-network-partition`: build a uniquely-named `CHAOS_PARTITION_<unix-ts>` chain so
//! chaos rules never touch the pod's existing CNI/service-mesh `iptables` state, then
//! tear down only that chain on cleanup.

use std::net::Ipv4Addr;
use std::sync::Arc;

use ipnet::Ipv4Net;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use crate::actions::ephemeral::{inject_with_guard, EphemeralSpec, InjectOutcome};
use crate::actions::{fold_batch, pod_ref, ActionOutcome, TargetResult};
use crate::reconciler::context::Dependencies;
use crate::types::{ChaosDuration, Direction, Protocol};

const ACTION: &str = "pod-network-partition";
const ACTION_PREFIX: &str = "chaos-network-partition";
const NET_TOOLS_IMAGE: &str = "gaiadocker/iproute2:latest";

/// Build the drop-rule matcher fragments for the configured targets. When both a
/// destination (IP or CIDR) and a port are given, each destination is cross-producted
/// with each port+protocol into a single compound rule, so a destination is never
/// dropped in full just because a port was also specified (and vice versa). Bare ports
/// default to TCP.
fn drop_rules(ips: &[Ipv4Addr], cidrs: &[Ipv4Net], ports: &[u16], protocols: &[Protocol]) -> Vec<String> {
    if ips.is_empty() && cidrs.is_empty() && ports.is_empty() {
        return vec!["-j DROP".to_string()];
    }

    let mut rules = Vec::new();
    let effective_protocols: Vec<Protocol> = if protocols.is_empty() { vec![Protocol::Tcp] } else { protocols.to_vec() };
    let destinations: Vec<String> = ips.iter().map(|ip| ip.to_string()).chain(cidrs.iter().map(|cidr| cidr.to_string())).collect();

    if !destinations.is_empty() && !ports.is_empty() {
        for dest in &destinations {
            for port in ports {
                for proto in &effective_protocols {
                    rules.push(format!("-d {dest} -p {} --dport {port} -j DROP", proto.as_iptables_token()));
                }
            }
        }
    } else if !destinations.is_empty() {
        for dest in &destinations {
            rules.push(format!("-d {dest} -j DROP"));
        }
    } else {
        for port in ports {
            for proto in &effective_protocols {
                rules.push(format!("-p {} --dport {port} -j DROP", proto.as_iptables_token()));
            }
        }
    }
    rules
}

fn build_script(chain: &str, direction: Direction, drop_rule_fragments: &[String], timeout_secs: u64) -> String {
    let mut lines = vec![format!("iptables -N {chain}")];

    let hooks: Vec<&str> = match direction {
        Direction::Ingress => vec!["INPUT"],
        Direction::Egress => vec!["OUTPUT"],
        Direction::Both => vec!["INPUT", "OUTPUT"],
    };
    for hook in &hooks {
        lines.push(format!("iptables -I {hook} 1 -j {chain}"));
    }

    lines.push(format!("iptables -A {chain} -i lo -j ACCEPT"));
    lines.push(format!("iptables -A {chain} -o lo -j ACCEPT"));
    for fragment in drop_rule_fragments {
        lines.push(format!("iptables -A {chain} {fragment}"));
    }

    lines.push(format!("sleep {timeout_secs}"));

    for hook in &hooks {
        lines.push(format!("iptables -D {hook} -j {chain} || true"));
    }
    lines.push(format!("iptables -F {chain} || true"));
    lines.push(format!("iptables -X {chain} || true"));

    lines.join(" && ")
}

#[allow(clippy::too_many_arguments)]
pub async fn execute(
    deps: &Arc<Dependencies>,
    namespace: &str,
    targets: Vec<Pod>,
    duration: ChaosDuration,
    direction: Direction,
    target_ips: Vec<Ipv4Addr>,
    target_cidrs: Vec<Ipv4Net>,
    target_ports: Vec<u16>,
    target_protocols: Vec<Protocol>,
) -> Result<ActionOutcome, crate::Error> {
    let pods = deps.pods(namespace);
    let timeout_secs = duration.as_seconds_u64();
    let fragments = drop_rules(&target_ips, &target_cidrs, &target_ports, &target_protocols);
    let mut results = Vec::with_capacity(targets.len());
    let mut ephemeral_refs = Vec::new();

    for pod in &targets {
        let name = pod.name_any();
        let fragments = fragments.clone();

        let outcome = inject_with_guard(&pods, namespace, pod, ACTION_PREFIX, move |container_name| {
            let chain = format!("CHAOS_PARTITION_{}", crate::actions::ephemeral::unix_ts());
            let script = build_script(&chain, direction, &fragments, timeout_secs);
            EphemeralSpec { name: container_name, image: NET_TOOLS_IMAGE.to_string(), command: vec!["sh".to_string(), "-c".to_string(), script], net_admin: true }
        })
        .await;

        match outcome {
            Ok(InjectOutcome::Injected { container_name, reference }) => {
                ephemeral_refs.push(reference);
                deps.events_for(pod).await.chaos_action("NetworkPartitioned", &name).await;
                results.push(TargetResult::Succeeded {
                    name: name.clone(),
                    affected: pod_ref(namespace, &name, &format!("injected {container_name}")),
                });
            }
            Ok(InjectOutcome::Skipped) => {
                tracing::debug!(pod = %name, "network-partition already running; skipping");
            }
            Err(e) => {
                let kind = e.classify();
                deps.metrics.record_error(ACTION, namespace, kind.as_label());
                deps.events_for(pod).await.action_failed(&crate::actions::pascal_case_action(ACTION), &name, &e.to_string()).await;
                results.push(TargetResult::Failed { name, message: e.to_string(), kind });
            }
        }
    }

    let mut outcome = fold_batch("partitioned network for", results);
    outcome.ephemeral_refs = ephemeral_refs;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_partition_has_single_drop_rule() {
        let rules = drop_rules(&[], &[], &[], &[]);
        assert_eq!(rules, vec!["-j DROP".to_string()]);
    }

    #[test]
    fn selective_partition_combines_cidr_port_and_protocol() {
        let cidr: Ipv4Net = "10.96.0.0/12".parse().unwrap();
        let rules = drop_rules(&[], &[cidr], &[443], &[Protocol::Tcp]);
        assert_eq!(rules.len(), 1);
        assert!(rules[0].contains("10.96.0.0/12") && rules[0].contains("--dport 443") && rules[0].contains("tcp"));
    }

    #[test]
    fn bare_ports_default_to_tcp() {
        let rules = drop_rules(&[], &[], &[80], &[]);
        assert!(rules.iter().all(|r| r.contains("tcp")));
    }

    #[test]
    fn script_only_touches_the_chaos_chain_on_cleanup() {
        let script = build_script("CHAOS_PARTITION_123", Direction::Egress, &["-j DROP".to_string()], 10);
        assert!(script.contains("iptables -N CHAOS_PARTITION_123"));
        assert!(script.contains("iptables -X CHAOS_PARTITION_123 || true"));
        assert!(!script.contains("iptables -F INPUT"));
        assert!(!script.contains("iptables -F OUTPUT"));
    }

    #[test]
    fn loopback_is_always_accepted() {
        let script = build_script("CHAOS_PARTITION_1", Direction::Both, &["-j DROP".to_string()], 5);
        assert!(script.contains("-i lo -j ACCEPT"));
        assert!(script.contains("-o lo -j ACCEPT"));
    }
}
