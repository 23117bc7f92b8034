//! Semantic identifiers and resource units shared by all components.

use serde::{Deserialize, Serialize};

// Identifiers are opaque strings; equality is exact.
// A `PodId` is conventionally "namespace/name".
pub type NodeId = String;
pub type PodId = String;
pub type PoolName = String;
pub type InstanceType = String;
pub type Namespace = String;

pub type CpuMillis = u64;
pub type MemBytes = u64;

/// Node label through which a pod is pinned to a node pool, both by the
/// autoscaler and by the simulator's pending-pod placement.
pub const NODEPOOL_LABEL: &str = "karpenter.sh/nodepool";

pub const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

pub fn bytes_to_gib(v: MemBytes) -> f64 {
    v as f64 / GIB
}

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Resources {
    pub cpu_m: CpuMillis,
    pub mem_b: MemBytes,
}

impl Resources {
    pub fn new(cpu_m: CpuMillis, mem_b: MemBytes) -> Self {
        Self { cpu_m, mem_b }
    }

    pub fn add(&mut self, other: &Resources) {
        self.cpu_m += other.cpu_m;
        self.mem_b += other.mem_b;
    }
}

/// Purchasing model of an instance; mirrors the capacity-type node label.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CapacityType {
    #[default]
    OnDemand,
    Spot,
}

/// Hourly price of an instance type as known to the price cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstancePrice {
    pub instance_type: InstanceType,
    pub usd_per_hour: f64,
    #[serde(default)]
    pub purchasing: CapacityType,
    #[serde(default = "unknown_source")]
    pub source: String,
}

fn unknown_source() -> String {
    "unknown".to_string()
}
