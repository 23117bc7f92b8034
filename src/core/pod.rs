//! Type definitions for the Pod primitive and its scheduling constraints.
//!
//! Tolerations and affinity arrive from the cluster as nested untyped JSON;
//! they are parsed once on ingest into the sum types below and handled as
//! typed values everywhere else. The unused `podAffinity` subtree is kept as
//! raw JSON so that serialization round-trips.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

use crate::core::common::{CpuMillis, MemBytes, Namespace, NodeId, PodId, NODEPOOL_LABEL};
use crate::core::node::TaintEffect;

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TolerationOperator {
    #[default]
    Equal,
    Exists,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct Toleration {
    /// An absent key is valid only with operator `Exists` and then matches
    /// any taint key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default)]
    pub operator: TolerationOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// An absent effect tolerates any effect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<TaintEffect>,
}

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LabelOperator {
    #[default]
    In,
    NotIn,
    Exists,
    DoesNotExist,
    Gt,
    Lt,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSelectorRequirement {
    pub key: String,
    #[serde(default)]
    pub operator: LabelOperator,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeSelectorTerm {
    #[serde(default)]
    pub match_expressions: Vec<NodeSelectorRequirement>,
    /// Parsed but deliberately not evaluated.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_fields: Vec<NodeSelectorRequirement>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeSelector {
    #[serde(default)]
    pub node_selector_terms: Vec<NodeSelectorTerm>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeAffinity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_during_scheduling_ignored_during_execution: Option<NodeSelector>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodAffinityTerm {
    #[serde(default)]
    pub topology_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<serde_json::Value>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodAntiAffinity {
    #[serde(default)]
    pub required_during_scheduling_ignored_during_execution: Vec<PodAffinityTerm>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Affinity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_affinity: Option<NodeAffinity>,
    /// Preserved verbatim; not enforced in placement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_affinity: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_anti_affinity: Option<PodAntiAffinity>,
}

impl Affinity {
    pub fn is_empty(&self) -> bool {
        self.node_affinity.is_none()
            && self.pod_affinity.is_none()
            && self.pod_anti_affinity.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pod {
    #[serde(default)]
    pub id: PodId,
    pub name: String,
    pub namespace: Namespace,
    /// `None` means the pod is pending placement.
    #[serde(default)]
    pub node: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_name: Option<String>,
    #[serde(default)]
    pub req_cpu_m: CpuMillis,
    #[serde(default)]
    pub req_mem_b: MemBytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_cpu_m: Option<CpuMillis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_mem_b: Option<MemBytes>,
    #[serde(default, alias = "is_daemon")]
    pub is_daemonset: bool,
    #[serde(default)]
    pub is_system: bool,
    /// Workload-class tag controlled by upstream classification; the core
    /// treats it only as a reporting dimension.
    #[serde(default)]
    pub is_gfw: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Affinity::is_empty")]
    pub affinity: Affinity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_cpu_m: Option<CpuMillis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_mem_b: Option<MemBytes>,
    /// Fraction of a 24h window during which the workload had at least one
    /// ready replica. Derived upstream from historical replica counts.
    #[serde(default = "default_active_ratio")]
    pub active_ratio: f64,
}

fn default_active_ratio() -> f64 {
    1.0
}

impl Pod {
    pub fn new(namespace: &str, name: &str, req_cpu_m: CpuMillis, req_mem_b: MemBytes) -> Self {
        Self {
            id: format!("{}/{}", namespace, name),
            name: name.to_string(),
            namespace: namespace.to_string(),
            node: None,
            owner_kind: None,
            owner_name: None,
            req_cpu_m,
            req_mem_b,
            limit_cpu_m: None,
            limit_mem_b: None,
            is_daemonset: false,
            is_system: false,
            is_gfw: false,
            tolerations: Default::default(),
            node_selector: Default::default(),
            affinity: Default::default(),
            usage_cpu_m: None,
            usage_mem_b: None,
            active_ratio: default_active_ratio(),
        }
    }

    /// A workload pod is neither system nor DaemonSet; only such pods keep a
    /// node alive through consolidation.
    pub fn is_workload(&self) -> bool {
        !self.is_system && !self.is_daemonset
    }

    /// Pool the pod is pinned to through the nodepool label, if any.
    pub fn pinned_pool(&self) -> Option<&str> {
        self.node_selector.get(NODEPOOL_LABEL).map(|s| s.as_str())
    }
}
