//! Aggregated simulation output consumed by the API layer and the CLI
//! report.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::common::{CpuMillis, MemBytes, PoolName};

/// Resource split of a node across pod groups.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeParts {
    pub gfw_cpu_m: CpuMillis,
    pub ds_cpu_m: CpuMillis,
    pub other_cpu_m: CpuMillis,
    pub gfw_mem_b: MemBytes,
    pub ds_mem_b: MemBytes,
    pub other_mem_b: MemBytes,
}

/// One row of the per-node utilization table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRow {
    pub node: String,
    pub nodepool: PoolName,
    pub instance: String,

    /// Share of GFW pods among the node's pods, percent.
    pub gfw_ratio_pct: f64,

    pub alloc_cpu_m: CpuMillis,
    pub alloc_mem_b: MemBytes,
    pub alloc_pods: u32,

    pub sum_req_cpu_m: CpuMillis,
    pub sum_req_mem_b: MemBytes,
    pub sum_usage_cpu_m: CpuMillis,
    pub sum_usage_mem_b: MemBytes,

    /// Requested RAM over allocatable, percent.
    pub ram_util_pct: f64,
    pub ram_ds_gib: f64,
    pub ram_gfw_gib: f64,

    pub cost_daily_usd: f64,
    pub effective_hours: f64,

    pub parts: NodeParts,

    pub is_virtual: bool,
    /// False when consolidation would have removed the node by now.
    pub is_active: bool,
    pub price_missing: bool,
}

/// Flat pod representation for the per-node drill-down.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PodView {
    pub pod_id: String,
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_name: Option<String>,
    pub is_gfw: bool,
    pub is_daemon: bool,
    pub is_system: bool,
    pub req_cpu_m: CpuMillis,
    pub req_mem_b: MemBytes,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolStat {
    pub cost_usd: f64,
    pub nodes_count: u32,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationSummary {
    pub total_cost_daily_usd: f64,
    pub total_cost_gfw_nodes_usd: f64,
    pub total_cost_keda_nodes_usd: f64,
    /// Actual (observed) per-pool cost and node count.
    pub pool_stats: BTreeMap<PoolName, PoolStat>,
    /// What the fleet would cost after the applied mutations.
    pub projected_pool_stats: BTreeMap<PoolName, PoolStat>,
    pub projected_total_cost_usd: f64,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationResult {
    pub summary: SimulationSummary,
    pub nodes: Vec<NodeRow>,
    pub pods_by_node: BTreeMap<String, Vec<PodView>>,
}
