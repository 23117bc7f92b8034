//! High-level mutation operations over a snapshot.
//!
//! Every operation leaves the snapshot valid: pool references are
//! re-registered and the consolidation GC pass runs at the end. Operations
//! targeting a missing pod id are silent no-ops; a missing node in a direct
//! placement and an unresolvable pool template are errors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::common::{CpuMillis, MemBytes, NodeId, PodId, NODEPOOL_LABEL};
use crate::core::pod::{Affinity, Toleration};
use crate::core::snapshot::Snapshot;
use crate::pricing::PriceView;
use crate::sim::packer;

#[derive(Debug, Error)]
pub enum OpError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("inconsistent input: {0}")]
    Inconsistent(String),
}

/// Patch applied to pods before a move: whole-field replacement for the
/// collections, point updates for the scalars. Never merges.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct PodPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub req_cpu_m: Option<CpuMillis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub req_mem_b: Option<MemBytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
}

/// The UI occasionally sends pool names glued to other tokens
/// ("ip-10-0-0-1.eu-central-1.compute.internal keda-nightly"); the pool is
/// always the last whitespace-separated token.
pub fn normalize_pool_name(raw: &str) -> Option<String> {
    raw.split_whitespace().last().map(|s| s.to_string())
}

pub fn patch_pods(snapshot: &mut Snapshot, pod_ids: &[PodId], patch: &PodPatch) {
    for pod_id in pod_ids {
        let Some(pod) = snapshot.pods.get_mut(pod_id) else {
            continue;
        };
        if let Some(cpu) = patch.req_cpu_m {
            pod.req_cpu_m = cpu;
        }
        if let Some(mem) = patch.req_mem_b {
            pod.req_mem_b = mem;
        }
        if let Some(tolerations) = &patch.tolerations {
            pod.tolerations = tolerations.clone();
        }
        if let Some(selector) = &patch.node_selector {
            pod.node_selector = selector.clone();
        }
        if let Some(affinity) = &patch.affinity {
            pod.affinity = affinity.clone();
        }
    }
}

/// The baseline move contract: pin the pod to the target pool through the
/// nodepool label and unbind it.
fn mark_pending(snapshot: &mut Snapshot, pod_ids: &[PodId], target_pool: &str) {
    for pod_id in pod_ids {
        let Some(pod) = snapshot.pods.get_mut(pod_id) else {
            continue;
        };
        pod.node = None;
        pod.node_selector
            .insert(NODEPOOL_LABEL.to_string(), target_pool.to_string());
    }
}

fn finish(snapshot: &mut Snapshot) {
    snapshot.ensure_pools_for_nodes();
    snapshot.gc_empty_nodes();
}

fn resolve_pool(target_pool: &str) -> Result<String, OpError> {
    normalize_pool_name(target_pool)
        .ok_or_else(|| OpError::Inconsistent("empty target pool name".to_string()))
}

/// Direct drag-and-drop move: patches, unbinds and immediately packs the
/// pods onto the target pool, synthesizing virtual nodes when needed.
pub fn move_pods_to_pool(
    snapshot: &mut Snapshot,
    pod_ids: &[PodId],
    target_pool: &str,
    overrides: Option<&PodPatch>,
    prices: &PriceView,
) -> Result<(), OpError> {
    let pool = resolve_pool(target_pool)?;
    if let Some(patch) = overrides {
        patch_pods(snapshot, pod_ids, patch);
    }
    mark_pending(snapshot, pod_ids, &pool);
    packer::pack_into_pool(snapshot, pod_ids, &pool, prices)?;
    snapshot.ensure_pool(&pool);
    finish(snapshot);
    Ok(())
}

/// Coarse moves (namespace / owner / node) only re-pin their pods; the
/// simulator's richer pass places the resulting pending pods.
fn move_selected_to_pool(
    snapshot: &mut Snapshot,
    pod_ids: &[PodId],
    target_pool: &str,
    overrides: Option<&PodPatch>,
) -> Result<(), OpError> {
    let pool = resolve_pool(target_pool)?;
    if let Some(patch) = overrides {
        patch_pods(snapshot, pod_ids, patch);
    }
    mark_pending(snapshot, pod_ids, &pool);
    snapshot.ensure_pool(&pool);
    finish(snapshot);
    Ok(())
}

fn pod_matches_flags(
    is_system: bool,
    is_daemonset: bool,
    include_system: bool,
    include_daemonsets: bool,
) -> bool {
    if is_daemonset && !include_daemonsets {
        return false;
    }
    if is_system && !include_system {
        return false;
    }
    true
}

pub fn select_pods_by_namespace(
    snapshot: &Snapshot,
    namespace: &str,
    include_system: bool,
    include_daemonsets: bool,
) -> Vec<PodId> {
    snapshot
        .pods
        .values()
        .filter(|p| p.namespace == namespace)
        .filter(|p| {
            pod_matches_flags(p.is_system, p.is_daemonset, include_system, include_daemonsets)
        })
        .map(|p| p.id.clone())
        .collect()
}

/// Owner selection with the Deployment heuristic: pods are owned by
/// ReplicaSets whose names carry a template-hash suffix, so a caller asking
/// for `Deployment`/`app` matches ReplicaSet owners named `app-<hash>`.
pub fn select_pods_by_owner(
    snapshot: &Snapshot,
    namespace: &str,
    owner_kind: &str,
    owner_name: &str,
    include_system: bool,
    include_daemonsets: bool,
) -> Vec<PodId> {
    let wanted_kind = owner_kind.to_lowercase();
    snapshot
        .pods
        .values()
        .filter(|p| p.namespace == namespace)
        .filter(|p| {
            let (Some(kind), Some(name)) = (p.owner_kind.as_deref(), p.owner_name.as_deref())
            else {
                return false;
            };
            let actual_kind = kind.to_lowercase();
            if actual_kind == wanted_kind {
                return name == owner_name;
            }
            wanted_kind == "deployment"
                && actual_kind == "replicaset"
                && name.starts_with(owner_name)
        })
        .filter(|p| {
            pod_matches_flags(p.is_system, p.is_daemonset, include_system, include_daemonsets)
        })
        .map(|p| p.id.clone())
        .collect()
}

pub fn select_pods_by_node(
    snapshot: &Snapshot,
    node_name: &str,
    include_system: bool,
    include_daemonsets: bool,
) -> Vec<PodId> {
    let Some(node_id) = snapshot
        .nodes
        .values()
        .find(|n| n.name == node_name)
        .map(|n| n.id.clone())
    else {
        return vec![];
    };
    snapshot
        .pods
        .values()
        .filter(|p| p.node.as_deref() == Some(node_id.as_str()))
        .filter(|p| {
            pod_matches_flags(p.is_system, p.is_daemonset, include_system, include_daemonsets)
        })
        .map(|p| p.id.clone())
        .collect()
}

pub fn move_namespace_to_pool(
    snapshot: &mut Snapshot,
    namespace: &str,
    target_pool: &str,
    include_system: bool,
    include_daemonsets: bool,
    overrides: Option<&PodPatch>,
) -> Result<(), OpError> {
    let pod_ids =
        select_pods_by_namespace(snapshot, namespace, include_system, include_daemonsets);
    move_selected_to_pool(snapshot, &pod_ids, target_pool, overrides)
}

pub fn move_owner_to_pool(
    snapshot: &mut Snapshot,
    namespace: &str,
    owner_kind: &str,
    owner_name: &str,
    target_pool: &str,
    include_system: bool,
    include_daemonsets: bool,
    overrides: Option<&PodPatch>,
) -> Result<(), OpError> {
    let pod_ids = select_pods_by_owner(
        snapshot,
        namespace,
        owner_kind,
        owner_name,
        include_system,
        include_daemonsets,
    );
    move_selected_to_pool(snapshot, &pod_ids, target_pool, overrides)
}

pub fn move_node_pods_to_pool(
    snapshot: &mut Snapshot,
    node_name: &str,
    target_pool: &str,
    include_system: bool,
    include_daemonsets: bool,
    overrides: Option<&PodPatch>,
) -> Result<(), OpError> {
    let pod_ids = select_pods_by_node(snapshot, node_name, include_system, include_daemonsets);
    move_selected_to_pool(snapshot, &pod_ids, target_pool, overrides)
}

/// Direct placement onto a specific node, bypassing the packer. The target
/// may overflow; the simulator accounts for the spill. The user wins over
/// every scheduling constraint.
pub fn move_pod_to_node(
    snapshot: &mut Snapshot,
    pod_ids: &[PodId],
    node_id: &NodeId,
    overrides: Option<&PodPatch>,
) -> Result<(), OpError> {
    if !snapshot.nodes.contains_key(node_id) {
        return Err(OpError::Validation(format!("unknown node '{}'", node_id)));
    }
    if let Some(patch) = overrides {
        patch_pods(snapshot, pod_ids, patch);
    }
    for pod_id in pod_ids {
        if let Some(pod) = snapshot.pods.get_mut(pod_id) {
            pod.node = Some(node_id.clone());
        }
    }
    finish(snapshot);
    Ok(())
}

pub fn delete_pods(snapshot: &mut Snapshot, pod_ids: &[PodId]) {
    for pod_id in pod_ids {
        snapshot.pods.remove(pod_id);
    }
    finish(snapshot);
}

pub fn delete_namespace(snapshot: &mut Snapshot, namespace: &str) {
    snapshot.pods.retain(|_, p| p.namespace != namespace);
    finish(snapshot);
}

pub fn delete_owner(
    snapshot: &mut Snapshot,
    namespace: &str,
    owner_kind: &str,
    owner_name: &str,
) {
    let pod_ids = select_pods_by_owner(snapshot, namespace, owner_kind, owner_name, true, true);
    for pod_id in &pod_ids {
        snapshot.pods.remove(pod_id);
    }
    finish(snapshot);
}
