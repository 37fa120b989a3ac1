//! The fault-kind discriminated union: a typed sum type instead of a bare string plus
//! "duration required for action X" runtime checks scattered through the reconciler.
//! Each variant only carries the fields that action actually uses; the
//! compiler enforces presence, so the reconciler never has to ask "does this action need
//! a duration" — it destructures and moves on. Admission (`src/admission`) still validates
//! incoming raw JSON/YAML against this shape for users who submit malformed manifests.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::duration::ChaosDuration;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Action {
    PodKill,

    PodDelay {
        duration: ChaosDuration,
    },

    PodCpuStress {
        duration: ChaosDuration,
        cpu_load: u8,
        #[serde(default = "default_cpu_workers")]
        cpu_workers: u8,
    },

    PodMemoryStress {
        duration: ChaosDuration,
        memory_size: MemorySize,
        #[serde(default = "default_memory_workers")]
        memory_workers: u8,
    },

    PodFailure,

    PodRestart {
        restart_interval: Option<ChaosDuration>,
    },

    PodNetworkLoss {
        duration: ChaosDuration,
        loss_percentage: u8,
        loss_correlation: Option<u8>,
    },

    PodDiskFill {
        duration: ChaosDuration,
        #[serde(default = "default_fill_percentage")]
        fill_percentage: u8,
        target_path: Option<String>,
        volume_name: Option<String>,
    },

    PodNetworkPartition {
        duration: ChaosDuration,
        #[serde(default)]
        direction: Direction,
        #[serde(default)]
        target_ips: Vec<Ipv4Addr>,
        #[serde(default)]
        target_cidrs: Vec<Ipv4Net>,
        #[serde(default)]
        target_ports: Vec<u16>,
        #[serde(default)]
        target_protocols: Vec<Protocol>,
    },

    NodeDrain,
}

fn default_cpu_workers() -> u8 {
    1
}

fn default_memory_workers() -> u8 {
    1
}

fn default_fill_percentage() -> u8 {
    80
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ingress,
    Egress,
    #[default]
    Both,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
}

impl Protocol {
    pub fn as_iptables_token(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
        }
    }
}

/// `^[0-9]+[MG]$` memory size, e.g. `512M`, `2G`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MemorySize {
    pub value: u64,
    pub unit: MemoryUnit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryUnit {
    Mebibytes,
    Gibibytes,
}

impl JsonSchema for MemorySize {
    fn schema_name() -> String {
        "MemorySize".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        let mut schema = String::json_schema(gen).into_object();
        schema.string().pattern = Some(r"^[0-9]+[MG]$".to_string());
        schemars::schema::Schema::Object(schema)
    }
}

impl MemorySize {
    pub fn as_stress_ng_token(&self) -> String {
        let suffix = match self.unit {
            MemoryUnit::Mebibytes => "M",
            MemoryUnit::Gibibytes => "G",
        };
        format!("{}{}", self.value, suffix)
    }
}

impl TryFrom<String> for MemorySize {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let (digits, unit) = s.split_at(s.len().saturating_sub(1));
        let unit = match unit {
            "M" => MemoryUnit::Mebibytes,
            "G" => MemoryUnit::Gibibytes,
            _ => return Err(format!("memorySize '{s}' must end in M or G")),
        };
        let value: u64 = digits
            .parse()
            .map_err(|_| format!("memorySize '{s}' must be digits followed by M or G"))?;
        Ok(MemorySize { value, unit })
    }
}

impl From<MemorySize> for String {
    fn from(m: MemorySize) -> Self {
        m.as_stress_ng_token()
    }
}

impl Action {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Action::PodKill => "pod-kill",
            Action::PodDelay { .. } => "pod-delay",
            Action::PodCpuStress { .. } => "pod-cpu-stress",
            Action::PodMemoryStress { .. } => "pod-memory-stress",
            Action::PodFailure => "pod-failure",
            Action::PodRestart { .. } => "pod-restart",
            Action::PodNetworkLoss { .. } => "pod-network-loss",
            Action::PodDiskFill { .. } => "pod-disk-fill",
            Action::PodNetworkPartition { .. } => "pod-network-partition",
            Action::NodeDrain => "node-drain",
        }
    }

    /// True for actions that target `Node` resources rather than `Pod` resources.
    pub fn targets_nodes(&self) -> bool {
        matches!(self, Action::NodeDrain)
    }

    /// True for actions that work by injecting a long-lived ephemeral sidecar rather than
    /// a one-shot exec or delete.
    pub fn uses_ephemeral_container(&self) -> bool {
        matches!(
            self,
            Action::PodCpuStress { .. }
                | Action::PodMemoryStress { .. }
                | Action::PodNetworkLoss { .. }
                | Action::PodDiskFill { .. }
                | Action::PodNetworkPartition { .. }
        )
    }

    /// The verb rendered into the dry-run preview message: `"DRY RUN: Would <verb> N
    /// resource(s): [names...]"`.
    pub fn dry_run_verb(&self) -> &'static str {
        match self {
            Action::PodKill => "delete",
            Action::PodDelay { .. } => "delay",
            Action::PodCpuStress { .. } => "stress (CPU)",
            Action::PodMemoryStress { .. } => "stress (memory)",
            Action::PodFailure => "kill",
            Action::PodRestart { .. } => "restart",
            Action::PodNetworkLoss { .. } => "inject network loss into",
            Action::PodDiskFill { .. } => "fill disk on",
            Action::PodNetworkPartition { .. } => "partition network for",
            Action::NodeDrain => "drain",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_size_parses_and_renders() {
        let m: MemorySize = "512M".to_string().try_into().unwrap();
        assert_eq!(m.value, 512);
        assert_eq!(m.as_stress_ng_token(), "512M");

        let g: MemorySize = "2G".to_string().try_into().unwrap();
        assert_eq!(g.as_stress_ng_token(), "2G");
    }

    #[test]
    fn memory_size_rejects_bad_unit() {
        assert!(MemorySize::try_from("512K".to_string()).is_err());
        assert!(MemorySize::try_from("abc".to_string()).is_err());
    }

    #[test]
    fn action_kind_names_match_spec_tokens() {
        assert_eq!(Action::PodKill.kind_name(), "pod-kill");
        assert_eq!(Action::NodeDrain.kind_name(), "node-drain");
    }
}
