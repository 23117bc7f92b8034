//! Type definitions for the Node primitive of the simulated cluster.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

use crate::core::common::{CapacityType, CpuMillis, InstanceType, MemBytes, NodeId, PoolName};

/// Hard taint effects block scheduling; `PreferNoSchedule` is carried through
/// but never enforced.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaintEffect {
    #[default]
    NoSchedule,
    NoExecute,
    PreferNoSchedule,
}

impl TaintEffect {
    pub fn is_hard(&self) -> bool {
        matches!(self, TaintEffect::NoSchedule | TaintEffect::NoExecute)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Taint {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub effect: TaintEffect,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    /// Coincides with `name` for real nodes; synthesized nodes get a
    /// `-virt-<N>` suffix.
    #[serde(default)]
    pub id: NodeId,
    pub name: String,
    pub nodepool: PoolName,
    pub instance_type: InstanceType,
    pub alloc_cpu_m: CpuMillis,
    pub alloc_mem_b: MemBytes,
    #[serde(default = "default_alloc_pods")]
    pub alloc_pods: u32,
    #[serde(default)]
    pub capacity_type: CapacityType,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub taints: Vec<Taint>,
    /// True iff the node was synthesized by the packer rather than observed
    /// in the cluster.
    #[serde(default)]
    pub is_virtual: bool,
    #[serde(default = "default_uptime_hours")]
    pub uptime_hours_24h: f64,
}

fn default_alloc_pods() -> u32 {
    110
}

fn default_uptime_hours() -> f64 {
    24.0
}

impl Node {
    pub fn new(
        name: &str,
        nodepool: &str,
        instance_type: &str,
        alloc_cpu_m: CpuMillis,
        alloc_mem_b: MemBytes,
    ) -> Self {
        Self {
            id: name.to_string(),
            name: name.to_string(),
            nodepool: nodepool.to_string(),
            instance_type: instance_type.to_string(),
            alloc_cpu_m,
            alloc_mem_b,
            alloc_pods: default_alloc_pods(),
            capacity_type: CapacityType::default(),
            labels: Default::default(),
            taints: Default::default(),
            is_virtual: false,
            uptime_hours_24h: default_uptime_hours(),
        }
    }
}
