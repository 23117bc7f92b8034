//! The mutable cluster snapshot: nodes, pods, pools, prices and duty-cycle
//! history, owned as keyed maps.
//!
//! `BTreeMap` containers keep iteration deterministic, which in turn makes
//! every simulation artifact a pure function of the snapshot value. What-if
//! branching clones the whole value; a published snapshot is never mutated
//! by readers.

use serde::{Deserialize, Serialize};

use std::collections::{BTreeMap, BTreeSet};

use crate::core::common::{InstancePrice, InstanceType, NodeId, PodId, PoolName};
use crate::core::node::Node;
use crate::core::node_pool::{NodePool, Schedule, DEFAULT_SCHEDULE};
use crate::core::pod::Pod;

/// Observed fleet-hours per `(pool, instance)` over the last day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryUsage {
    pub pool: PoolName,
    pub instance: InstanceType,
    pub instance_hours_24h: f64,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub nodes: BTreeMap<NodeId, Node>,
    pub pods: BTreeMap<PodId, Pod>,
    pub nodepools: BTreeMap<PoolName, NodePool>,
    /// Per-snapshot price overlay; consulted before the shared price cache.
    pub prices: BTreeMap<InstanceType, InstancePrice>,
    pub schedules: BTreeMap<String, Schedule>,
    pub keda_pool_name: Option<PoolName>,
    pub history_usage: Vec<HistoryUsage>,
}

impl Snapshot {
    pub fn pods_on_node(&self, node_id: &str) -> Vec<&Pod> {
        self.pods
            .values()
            .filter(|p| p.node.as_deref() == Some(node_id))
            .collect()
    }

    /// Pool schedule, falling back to the built-in 24x7 default when the
    /// pool or its schedule is unknown.
    pub fn schedule_for_pool(&self, pool: &str) -> Schedule {
        let schedule_name = self
            .nodepools
            .get(pool)
            .map(|p| p.schedule_name.as_str())
            .unwrap_or(DEFAULT_SCHEDULE);
        self.schedules
            .get(schedule_name)
            .cloned()
            .unwrap_or_else(Schedule::default_24x7)
    }

    /// Registers a placeholder pool when `name` is not known yet.
    pub fn ensure_pool(&mut self, name: &str) {
        if !self.nodepools.contains_key(name) {
            self.nodepools
                .insert(name.to_string(), NodePool::inferred(name));
        }
    }

    /// Re-registers placeholder pools for every node, so that node->pool
    /// references always resolve after a mutation.
    pub fn ensure_pools_for_nodes(&mut self) {
        let pools: BTreeSet<PoolName> =
            self.nodes.values().map(|n| n.nodepool.clone()).collect();
        for pool in pools {
            self.ensure_pool(&pool);
        }
    }

    /// Models the autoscaler's consolidation: removes every node whose pods
    /// are all DaemonSets (or that has no pods at all), together with the
    /// DaemonSet pods bound to it. A non-DaemonSet system pod keeps its node
    /// alive. Returns the removed node ids.
    pub fn gc_empty_nodes(&mut self) -> Vec<NodeId> {
        let keep: BTreeSet<&NodeId> = self
            .pods
            .values()
            .filter(|p| !p.is_daemonset)
            .filter_map(|p| p.node.as_ref())
            .collect();

        let removed: Vec<NodeId> = self
            .nodes
            .keys()
            .filter(|id| !keep.contains(id))
            .cloned()
            .collect();
        if removed.is_empty() {
            return removed;
        }

        let removed_set: BTreeSet<&NodeId> = removed.iter().collect();
        self.nodes.retain(|id, _| !removed_set.contains(id));
        self.pods.retain(|_, p| match p.node.as_ref() {
            Some(node) => !removed_set.contains(node),
            None => true,
        });

        removed
    }
}
