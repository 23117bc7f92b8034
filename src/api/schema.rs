//! Request and response DTOs of the HTTP surface.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

use crate::core::common::{CpuMillis, MemBytes, NodeId, PodId};
use crate::core::pod::Toleration;
use crate::sim::operations::PodPatch;
use crate::sim::result::SimulationResult;
use crate::store::mutation_log::LogEntry;

/// One mutation of the active snapshot. The wire shape is a tagged object;
/// an unknown `op` fails deserialization and surfaces as a 400.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    ResetToBaseline,
    MovePodsToPool {
        pod_ids: Vec<PodId>,
        target_pool: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        overrides: Option<PodPatch>,
    },
    MovePodToNode {
        pod_ids: Vec<PodId>,
        node_id: NodeId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        overrides: Option<PodPatch>,
    },
    MoveNamespaceToPool {
        namespace: String,
        target_pool: String,
        #[serde(default)]
        include_system: bool,
        #[serde(default)]
        include_daemonsets: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        overrides: Option<PodPatch>,
    },
    MoveOwnerToPool {
        namespace: String,
        owner_kind: String,
        owner_name: String,
        target_pool: String,
        #[serde(default)]
        include_system: bool,
        #[serde(default)]
        include_daemonsets: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        overrides: Option<PodPatch>,
    },
    MoveNodePodsToPool {
        node_name: String,
        target_pool: String,
        #[serde(default)]
        include_system: bool,
        #[serde(default)]
        include_daemonsets: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        overrides: Option<PodPatch>,
    },
    DeletePods {
        pod_ids: Vec<PodId>,
    },
    DeleteNamespace {
        namespace: String,
    },
    DeleteOwner {
        namespace: String,
        owner_kind: String,
        owner_name: String,
    },
}

impl Operation {
    /// Short human-readable form for the mutation log.
    pub fn describe(&self) -> String {
        match self {
            Operation::ResetToBaseline => "reset to baseline".to_string(),
            Operation::MovePodsToPool {
                pod_ids,
                target_pool,
                ..
            } => format!("move {} pod(s) to pool '{}'", pod_ids.len(), target_pool),
            Operation::MovePodToNode {
                pod_ids, node_id, ..
            } => format!("move {} pod(s) to node '{}'", pod_ids.len(), node_id),
            Operation::MoveNamespaceToPool {
                namespace,
                target_pool,
                ..
            } => format!("move namespace '{}' to pool '{}'", namespace, target_pool),
            Operation::MoveOwnerToPool {
                namespace,
                owner_kind,
                owner_name,
                target_pool,
                ..
            } => format!(
                "move {} '{}/{}' to pool '{}'",
                owner_kind, namespace, owner_name, target_pool
            ),
            Operation::MoveNodePodsToPool {
                node_name,
                target_pool,
                ..
            } => format!("evacuate node '{}' to pool '{}'", node_name, target_pool),
            Operation::DeletePods { pod_ids } => format!("delete {} pod(s)", pod_ids.len()),
            Operation::DeleteNamespace { namespace } => {
                format!("delete namespace '{}'", namespace)
            }
            Operation::DeleteOwner {
                namespace,
                owner_kind,
                owner_name,
            } => format!("delete {} '{}/{}'", owner_kind, namespace, owner_name),
        }
    }
}

/// The mutate endpoint accepts either a batch or a bare operation.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MutateRequest {
    Batch { operations: Vec<Operation> },
    Single(Operation),
}

impl MutateRequest {
    pub fn into_operations(self) -> Vec<Operation> {
        match self {
            MutateRequest::Batch { operations } => operations,
            MutateRequest::Single(operation) => vec![operation],
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SimulationResponse {
    #[serde(flatten)]
    pub result: SimulationResult,
    pub logs: Vec<LogEntry>,
}

#[derive(Debug, Deserialize)]
pub struct PlanMoveRequest {
    pub pod_id: PodId,
    pub target_node: NodeId,
}

#[derive(Debug, Serialize)]
pub struct PlanMoveResponse {
    pub pod_id: PodId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_name: Option<String>,
    pub current_req_cpu_m: CpuMillis,
    pub current_req_mem_b: MemBytes,
    pub suggested_tolerations: Vec<Toleration>,
    pub suggested_node_selector: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct CaptureResponse {
    pub id: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ActivateResponse {
    pub status: String,
    pub active: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshPricesResponse {
    pub ok: bool,
    pub region: String,
    pub instance_types: Vec<String>,
    pub hourly_prices: BTreeMap<String, f64>,
}
