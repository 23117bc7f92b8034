//! Operation-level placement: fits moved pods onto existing nodes of a pool
//! or synthesizes virtual nodes from the pool's cheapest real node.
//!
//! The fit check covers CPU and memory only; pod-count caps and DaemonSet
//! overhead are honored by the simulator's richer pass. That keeps this
//! packer exact for the single-pod moves the UI performs.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::core::common::{NodeId, PodId, Resources};
use crate::core::node::Node;
use crate::core::pod::Pod;
use crate::core::snapshot::Snapshot;
use crate::pricing::PriceView;
use crate::sim::constraints::anti_affinity_conflict;
use crate::sim::operations::OpError;

/// Requests of every bound pod except the ones being moved, summed per node.
pub fn initial_usage(
    snapshot: &Snapshot,
    moving: &BTreeSet<PodId>,
) -> BTreeMap<NodeId, Resources> {
    let mut usage: BTreeMap<NodeId, Resources> = BTreeMap::new();
    for node_id in snapshot.nodes.keys() {
        usage.insert(node_id.clone(), Resources::default());
    }
    for (pod_id, pod) in snapshot.pods.iter() {
        let Some(node_id) = pod.node.as_ref() else {
            continue;
        };
        if moving.contains(pod_id) {
            continue;
        }
        usage
            .entry(node_id.clone())
            .or_default()
            .add(&Resources::new(pod.req_cpu_m, pod.req_mem_b));
    }
    usage
}

fn fits(pod: &Pod, node: &Node, usage: &Resources) -> bool {
    usage.cpu_m + pod.req_cpu_m <= node.alloc_cpu_m
        && usage.mem_b + pod.req_mem_b <= node.alloc_mem_b
}

/// The cheapest real node of the pool by the current price table; the source
/// of specs for virtual nodes.
pub fn cheapest_template(snapshot: &Snapshot, pool: &str, prices: &PriceView) -> Option<Node> {
    snapshot
        .nodes
        .values()
        .filter(|n| n.nodepool == pool && !n.is_virtual)
        .min_by(|a, b| {
            let (price_a, _) = prices.lookup(&a.instance_type);
            let (price_b, _) = prices.lookup(&b.instance_type);
            price_a.total_cmp(&price_b).then_with(|| a.id.cmp(&b.id))
        })
        .cloned()
}

fn virtual_node_from(template: &Node, snapshot: &Snapshot, counter: &mut u32) -> Node {
    let name = loop {
        *counter += 1;
        let candidate = format!("{}-virt-{}", template.name, counter);
        if !snapshot.nodes.contains_key(&candidate) {
            break candidate;
        }
    };
    let mut node = template.clone();
    node.id = name.clone();
    node.name = name;
    node.is_virtual = true;
    node.uptime_hours_24h = 0.0;
    node
}

/// Places `pod_ids` (already unbound) onto nodes of `target_pool` in input
/// order. Among fitting candidates the one left tightest is preferred, with
/// memory normalized to KiB so CPU dominates the score. Ids that resolve to
/// no pod are skipped.
pub fn pack_into_pool(
    snapshot: &mut Snapshot,
    pod_ids: &[PodId],
    target_pool: &str,
    prices: &PriceView,
) -> Result<(), OpError> {
    if pod_ids.is_empty() {
        return Ok(());
    }
    let moving: BTreeSet<PodId> = pod_ids.iter().cloned().collect();
    let mut usage = initial_usage(snapshot, &moving);

    let template = cheapest_template(snapshot, target_pool, prices).ok_or_else(|| {
        OpError::Inconsistent(format!(
            "no nodes found in pool '{}', cannot derive a template",
            target_pool
        ))
    })?;
    let mut virtual_counter = 0u32;

    for pod_id in pod_ids {
        let Some(pod) = snapshot.pods.get(pod_id).cloned() else {
            continue;
        };

        let mut best: Option<(NodeId, f64)> = None;
        for (node_id, node) in snapshot.nodes.iter() {
            if node.nodepool != target_pool {
                continue;
            }
            let node_usage = usage.get(node_id).copied().unwrap_or_default();
            if !fits(&pod, node, &node_usage) {
                continue;
            }
            if anti_affinity_conflict(&pod, snapshot.pods_on_node(node_id)).is_some() {
                continue;
            }

            let remaining_cpu = node.alloc_cpu_m - (node_usage.cpu_m + pod.req_cpu_m);
            let remaining_mem = node.alloc_mem_b - (node_usage.mem_b + pod.req_mem_b);
            let score = remaining_cpu as f64 + remaining_mem as f64 / 1024.0;
            if best.as_ref().map_or(true, |(_, s)| score < *s) {
                best = Some((node_id.clone(), score));
            }
        }

        let target = match best {
            Some((node_id, _)) => node_id,
            None => {
                let node = virtual_node_from(&template, snapshot, &mut virtual_counter);
                let node_id = node.id.clone();
                debug!(
                    "pod {} does not fit on any node of pool '{}', synthesized {}",
                    pod_id, target_pool, node_id
                );
                usage.insert(node_id.clone(), Resources::default());
                snapshot.nodes.insert(node_id.clone(), node);
                node_id
            }
        };

        usage
            .entry(target.clone())
            .or_default()
            .add(&Resources::new(pod.req_cpu_m, pod.req_mem_b));
        if let Some(pod) = snapshot.pods.get_mut(pod_id) {
            pod.node = Some(target);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::common::GIB;
    use crate::pricing::PriceTable;

    fn pool_snapshot(nodes: Vec<Node>) -> Snapshot {
        let mut snapshot = Snapshot::default();
        for node in nodes {
            snapshot.nodes.insert(node.id.clone(), node);
        }
        snapshot.ensure_pools_for_nodes();
        snapshot
    }

    fn price_view(snapshot: &Snapshot) -> PriceView {
        PriceView::new(&snapshot.prices, &PriceTable::with_defaults(None))
    }

    fn pending_pod(snapshot: &mut Snapshot, name: &str, cpu_m: u64, mem_b: u64) -> PodId {
        let pod = Pod::new("apps", name, cpu_m, mem_b);
        let id = pod.id.clone();
        snapshot.pods.insert(id.clone(), pod);
        id
    }

    #[test]
    fn test_tightest_fit_prefers_fuller_node() {
        let mut snapshot = pool_snapshot(vec![
            Node::new("big", "b", "r6a.xlarge", 4000, (32.0 * GIB) as u64),
            Node::new("small", "b", "r6a.large", 2000, (16.0 * GIB) as u64),
        ]);
        let pod = pending_pod(&mut snapshot, "web-1", 1000, GIB as u64);

        let prices = price_view(&snapshot);
        pack_into_pool(&mut snapshot, &[pod.clone()], "b", &prices).unwrap();
        assert_eq!(snapshot.pods[&pod].node.as_deref(), Some("small"));
    }

    #[test]
    fn test_synthesis_from_cheapest_template() {
        let mut snapshot = pool_snapshot(vec![
            Node::new("expensive", "b", "r6a.xlarge", 100, GIB as u64),
            Node::new("cheap", "b", "t3a.medium", 100, GIB as u64),
        ]);
        let pod = pending_pod(&mut snapshot, "web-1", 1000, GIB as u64);

        let prices = price_view(&snapshot);
        pack_into_pool(&mut snapshot, &[pod.clone()], "b", &prices).unwrap();

        // Nothing fits, so a node is cloned from the cheapest real one.
        let placed = snapshot.pods[&pod].node.clone().unwrap();
        assert_eq!(placed, "cheap-virt-1");
        let virt = &snapshot.nodes[&placed];
        assert!(virt.is_virtual);
        assert_eq!(virt.instance_type, "t3a.medium");
        assert_eq!(virt.nodepool, "b");
    }

    #[test]
    fn test_no_template_is_an_error() {
        let mut snapshot = pool_snapshot(vec![]);
        let pod = pending_pod(&mut snapshot, "web-1", 1000, GIB as u64);
        let prices = price_view(&snapshot);
        let err = pack_into_pool(&mut snapshot, &[pod], "ghost", &prices).unwrap_err();
        assert!(matches!(err, OpError::Inconsistent(_)));
    }

    #[test]
    fn test_missing_pod_ids_are_skipped() {
        let mut snapshot = pool_snapshot(vec![Node::new(
            "n1",
            "b",
            "r6a.large",
            2000,
            (16.0 * GIB) as u64,
        )]);
        let prices = price_view(&snapshot);
        pack_into_pool(&mut snapshot, &["apps/ghost".to_string()], "b", &prices).unwrap();
        assert_eq!(snapshot.nodes.len(), 1);
    }

    #[test]
    fn test_virtual_names_do_not_collide() {
        let mut snapshot = pool_snapshot(vec![Node::new("n1", "b", "r6a.large", 1000, GIB as u64)]);
        // A leftover virtual node from an earlier pass occupies the first
        // synthetic name.
        let mut stale = Node::new("n1-virt-1", "b", "r6a.large", 1000, GIB as u64);
        stale.is_virtual = true;
        snapshot.nodes.insert(stale.id.clone(), stale);
        let mut blocker = Pod::new("apps", "old", 900, GIB as u64 / 2);
        blocker.node = Some("n1-virt-1".to_string());
        snapshot.pods.insert(blocker.id.clone(), blocker);
        let mut blocker2 = Pod::new("apps", "old2", 900, GIB as u64 / 2);
        blocker2.node = Some("n1".to_string());
        snapshot.pods.insert(blocker2.id.clone(), blocker2);

        let pod = pending_pod(&mut snapshot, "web-1", 900, GIB as u64 / 2);
        let prices = price_view(&snapshot);
        pack_into_pool(&mut snapshot, &[pod.clone()], "b", &prices).unwrap();
        assert_eq!(snapshot.pods[&pod].node.as_deref(), Some("n1-virt-2"));
    }
}
