//! The placement and cost simulator.
//!
//! Produces the full projection for a snapshot: per-node utilization rows,
//! per-pool actual and projected cost, and totals. Pending pods are re-packed
//! the way the autoscaler would pack them: first onto existing nodes of
//! their pinned pool, then onto synthetic nodes sized from the pool's
//! instance-type catalog. The run is synchronous and a pure function of
//! `(snapshot, price view)`.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::core::common::{bytes_to_gib, CpuMillis, MemBytes, NodeId, PoolName};
use crate::core::node::{Node, Taint};
use crate::core::pod::Pod;
use crate::core::snapshot::Snapshot;
use crate::pricing::PriceView;
use crate::sim::constraints::{anti_affinity_conflict, node_selector_admits, taint_tolerated};
use crate::sim::result::{
    NodeParts, NodeRow, PodView, PoolStat, SimulationResult, SimulationSummary,
};

/// Ratios this close to always-on are billed as full-time nodes.
const FULL_TIME_ACTIVE_RATIO: f64 = 0.98;

/// Extra node-hours charged per day to cover autoscaler scale-up lag.
pub const SCALING_LAG_HOURS: f64 = 0.5;

/// Pods named with this prefix are storage mounts that get co-scheduled
/// next to every workload pod of their namespace.
const SIDECAR_POD_PREFIX: &str = "mount-s3";

/// Specs of one `(pool, instance_type)` pair observed in the snapshot, used
/// as the blueprint for synthetic nodes.
#[derive(Debug, Clone)]
struct InstanceSpec {
    pool: PoolName,
    instance: String,
    alloc_cpu_m: CpuMillis,
    alloc_mem_b: MemBytes,
    alloc_pods: u32,
    price: f64,
    price_missing: bool,
    labels: BTreeMap<String, String>,
    taints: Vec<Taint>,
    ds_overhead_cpu_m: CpuMillis,
    ds_overhead_mem_b: MemBytes,
    ds_overhead_pods: u32,
}

/// A node being simulated: a real node hydrated with its pods, or a
/// synthetic one created for pending pods.
struct SimNode {
    name: String,
    pool: PoolName,
    instance: String,
    alloc_cpu_m: CpuMillis,
    alloc_mem_b: MemBytes,
    alloc_pods: u32,
    used_cpu_m: CpuMillis,
    used_mem_b: MemBytes,
    pod_count: u32,
    sum_usage_cpu_m: CpuMillis,
    sum_usage_mem_b: MemBytes,
    is_virtual: bool,
    price: f64,
    price_missing: bool,
    max_active: f64,
    has_workload: bool,
    gfw_pods: u32,
    total_pods: u32,
    parts: NodeParts,
    pods: Vec<Pod>,
    views: Vec<PodView>,
}

impl SimNode {
    fn from_node(node: &Node, prices: &PriceView) -> Self {
        let (price, price_missing) = prices.lookup(&node.instance_type);
        Self {
            name: node.name.clone(),
            pool: node.nodepool.clone(),
            instance: node.instance_type.clone(),
            alloc_cpu_m: node.alloc_cpu_m,
            alloc_mem_b: node.alloc_mem_b,
            alloc_pods: node.alloc_pods,
            used_cpu_m: 0,
            used_mem_b: 0,
            pod_count: 0,
            sum_usage_cpu_m: 0,
            sum_usage_mem_b: 0,
            is_virtual: node.is_virtual,
            price,
            price_missing,
            max_active: 0.0,
            has_workload: false,
            gfw_pods: 0,
            total_pods: 0,
            parts: NodeParts::default(),
            pods: Vec::new(),
            views: Vec::new(),
        }
    }

    fn from_spec(spec: &InstanceSpec, name: String) -> Self {
        let mut node = Self {
            name,
            pool: spec.pool.clone(),
            instance: spec.instance.clone(),
            alloc_cpu_m: spec.alloc_cpu_m,
            alloc_mem_b: spec.alloc_mem_b,
            alloc_pods: spec.alloc_pods,
            used_cpu_m: spec.ds_overhead_cpu_m,
            used_mem_b: spec.ds_overhead_mem_b,
            pod_count: spec.ds_overhead_pods,
            sum_usage_cpu_m: 0,
            sum_usage_mem_b: 0,
            is_virtual: true,
            price: spec.price,
            price_missing: spec.price_missing,
            max_active: 0.0,
            has_workload: false,
            gfw_pods: 0,
            total_pods: 0,
            parts: NodeParts::default(),
            pods: Vec::new(),
            views: Vec::new(),
        };
        // The DaemonSet fleet that would follow the node onto the cluster.
        node.parts.ds_cpu_m += spec.ds_overhead_cpu_m;
        node.parts.ds_mem_b += spec.ds_overhead_mem_b;
        node
    }

    fn fits(&self, cpu_m: CpuMillis, mem_b: MemBytes, pods: u32) -> bool {
        self.used_cpu_m + cpu_m <= self.alloc_cpu_m
            && self.used_mem_b + mem_b <= self.alloc_mem_b
            && self.pod_count + pods <= self.alloc_pods
    }

    fn account_class(&mut self, pod: &Pod) {
        if pod.is_gfw {
            self.parts.gfw_cpu_m += pod.req_cpu_m;
            self.parts.gfw_mem_b += pod.req_mem_b;
            self.gfw_pods += 1;
        } else if pod.is_daemonset {
            self.parts.ds_cpu_m += pod.req_cpu_m;
            self.parts.ds_mem_b += pod.req_mem_b;
        } else {
            self.parts.other_cpu_m += pod.req_cpu_m;
            self.parts.other_mem_b += pod.req_mem_b;
        }
    }

    fn add_pod(&mut self, pod: &Pod) {
        self.used_cpu_m += pod.req_cpu_m;
        self.used_mem_b += pod.req_mem_b;
        self.pod_count += 1;
        self.total_pods += 1;
        self.sum_usage_cpu_m += pod.usage_cpu_m.unwrap_or(0);
        self.sum_usage_mem_b += pod.usage_mem_b.unwrap_or(0);
        self.account_class(pod);
        if pod.is_workload() {
            self.has_workload = true;
            if pod.active_ratio > self.max_active {
                self.max_active = pod.active_ratio;
            }
        }
        self.views.push(PodView {
            pod_id: pod.id.clone(),
            namespace: pod.namespace.clone(),
            name: pod.name.clone(),
            owner_kind: pod.owner_kind.clone(),
            owner_name: pod.owner_name.clone(),
            is_gfw: pod.is_gfw,
            is_daemon: pod.is_daemonset,
            is_system: pod.is_system,
            req_cpu_m: pod.req_cpu_m,
            req_mem_b: pod.req_mem_b,
        });
        self.pods.push(pod.clone());
    }

    /// Books a hypothetical co-scheduled clone without surfacing it as a
    /// pod of its own.
    fn add_sidecar(&mut self, sidecar: &Pod) {
        self.used_cpu_m += sidecar.req_cpu_m;
        self.used_mem_b += sidecar.req_mem_b;
        self.pod_count += 1;
        self.account_class(sidecar);
    }

    /// Mirror of the consolidation GC predicate: a node whose pods are all
    /// DaemonSets would already be gone in the real cluster.
    fn is_consolidated(&self) -> bool {
        self.pods.iter().all(|p| p.is_daemonset)
    }

    fn effective_hours(&self) -> f64 {
        if !self.has_workload {
            return 0.0;
        }
        if self.max_active >= FULL_TIME_ACTIVE_RATIO {
            return 24.0;
        }
        (self.max_active * 24.0 + SCALING_LAG_HOURS).min(24.0)
    }
}

fn daemonset_admits(pod: &Pod, labels: &BTreeMap<String, String>, taints: &[Taint]) -> bool {
    node_selector_admits(&pod.node_selector, labels)
        && taints
            .iter()
            .filter(|t| t.effect.is_hard())
            .all(|t| taint_tolerated(t, &pod.tolerations))
}

/// Distinct `(pool, instance_type)` specs present in the snapshot, with the
/// DaemonSet overhead every new node of that spec would carry.
fn build_catalog(snapshot: &Snapshot, prices: &PriceView) -> BTreeMap<PoolName, Vec<InstanceSpec>> {
    let mut specs: BTreeMap<(PoolName, String), InstanceSpec> = BTreeMap::new();
    for node in snapshot.nodes.values() {
        let key = (node.nodepool.clone(), node.instance_type.clone());
        specs.entry(key).or_insert_with(|| {
            let (price, price_missing) = prices.lookup(&node.instance_type);
            InstanceSpec {
                pool: node.nodepool.clone(),
                instance: node.instance_type.clone(),
                alloc_cpu_m: node.alloc_cpu_m,
                alloc_mem_b: node.alloc_mem_b,
                alloc_pods: node.alloc_pods,
                price,
                price_missing,
                labels: node.labels.clone(),
                taints: node.taints.clone(),
                ds_overhead_cpu_m: 0,
                ds_overhead_mem_b: 0,
                ds_overhead_pods: 0,
            }
        });
    }

    // One representative per DaemonSet template; every node admitted by the
    // template's constraints pays for one replica.
    let mut ds_templates: BTreeMap<(String, String), &Pod> = BTreeMap::new();
    for pod in snapshot.pods.values().filter(|p| p.is_daemonset) {
        let owner = pod
            .owner_name
            .clone()
            .unwrap_or_else(|| pod.name.clone());
        ds_templates
            .entry((pod.namespace.clone(), owner))
            .or_insert(pod);
    }

    for spec in specs.values_mut() {
        for template in ds_templates.values() {
            if daemonset_admits(template, &spec.labels, &spec.taints) {
                spec.ds_overhead_cpu_m += template.req_cpu_m;
                spec.ds_overhead_mem_b += template.req_mem_b;
                spec.ds_overhead_pods += 1;
            }
        }
    }

    let mut catalog: BTreeMap<PoolName, Vec<InstanceSpec>> = BTreeMap::new();
    for ((pool, _), spec) in specs {
        catalog.entry(pool).or_default().push(spec);
    }
    for specs in catalog.values_mut() {
        specs.sort_by(|a, b| a.price.total_cmp(&b.price).then_with(|| a.instance.cmp(&b.instance)));
    }
    catalog
}

/// First pod of the namespace carrying the sidecar prefix, if any.
fn sidecar_for_namespace<'a>(snapshot: &'a Snapshot, namespace: &str) -> Option<&'a Pod> {
    snapshot
        .pods
        .values()
        .find(|p| p.namespace == namespace && p.name.starts_with(SIDECAR_POD_PREFIX))
}

fn synthetic_name(existing: &BTreeMap<NodeId, SimNode>, pool: &str) -> String {
    let mut index = 0u32;
    loop {
        index += 1;
        let candidate = format!("{}-virt-{}", pool, index);
        if !existing.contains_key(&candidate) {
            return candidate;
        }
    }
}

fn is_keda_pool(snapshot: &Snapshot, pool: &str) -> bool {
    if snapshot
        .nodepools
        .get(pool)
        .map(|p| p.is_keda)
        .unwrap_or(false)
    {
        return true;
    }
    pool.to_lowercase().contains("keda")
}

pub fn run_simulation(snapshot: &Snapshot, prices: &PriceView) -> SimulationResult {
    // 1. Hydrate one SimNode per real node with its current pods.
    let mut sim_nodes: BTreeMap<NodeId, SimNode> = snapshot
        .nodes
        .values()
        .map(|node| (node.id.clone(), SimNode::from_node(node, prices)))
        .collect();
    let mut pool_order: BTreeMap<PoolName, Vec<NodeId>> = BTreeMap::new();
    for (id, sim_node) in sim_nodes.iter() {
        pool_order
            .entry(sim_node.pool.clone())
            .or_default()
            .push(id.clone());
    }

    for pod in snapshot.pods.values() {
        let Some(node_id) = pod.node.as_ref() else {
            continue;
        };
        if let Some(sim_node) = sim_nodes.get_mut(node_id) {
            sim_node.add_pod(pod);
        }
    }

    // 2. Instance-type catalog with DaemonSet overhead per spec.
    let catalog = build_catalog(snapshot, prices);

    // 3/4. Place pending pods that are pinned to a pool.
    for pod in snapshot.pods.values() {
        if pod.node.is_some() {
            continue;
        }
        let Some(pool) = pod.pinned_pool().map(|s| s.to_string()) else {
            continue;
        };

        let sidecar = sidecar_for_namespace(snapshot, &pod.namespace).cloned();
        let (need_cpu, need_mem, need_pods) = match &sidecar {
            Some(s) => (pod.req_cpu_m + s.req_cpu_m, pod.req_mem_b + s.req_mem_b, 2),
            None => (pod.req_cpu_m, pod.req_mem_b, 1),
        };

        let target = pool_order.get(&pool).and_then(|order| {
            order
                .iter()
                .find(|node_id| {
                    let sim_node = &sim_nodes[*node_id];
                    sim_node.fits(need_cpu, need_mem, need_pods)
                        && anti_affinity_conflict(pod, sim_node.pods.iter()).is_none()
                })
                .cloned()
        });

        let target = match target {
            Some(node_id) => node_id,
            None => {
                let Some(specs) = catalog.get(&pool).filter(|s| !s.is_empty()) else {
                    debug!(
                        "pod {} pinned to pool '{}' with no known instance specs, left pending",
                        pod.id, pool
                    );
                    continue;
                };
                // Cheapest spec that fits the pod plus its overhead group,
                // else the roomiest one by memory.
                let spec = specs
                    .iter()
                    .find(|spec| {
                        spec.ds_overhead_cpu_m + need_cpu <= spec.alloc_cpu_m
                            && spec.ds_overhead_mem_b + need_mem <= spec.alloc_mem_b
                            && spec.ds_overhead_pods + need_pods <= spec.alloc_pods
                    })
                    .unwrap_or_else(|| {
                        specs
                            .iter()
                            .max_by(|a, b| {
                                a.alloc_mem_b
                                    .cmp(&b.alloc_mem_b)
                                    .then_with(|| b.instance.cmp(&a.instance))
                            })
                            .unwrap()
                    });

                let name = synthetic_name(&sim_nodes, &pool);
                let sim_node = SimNode::from_spec(spec, name.clone());
                sim_nodes.insert(name.clone(), sim_node);
                pool_order.entry(pool.clone()).or_default().push(name.clone());
                name
            }
        };

        let sim_node = sim_nodes.get_mut(&target).unwrap();
        sim_node.add_pod(pod);
        if let Some(sidecar) = &sidecar {
            sim_node.add_sidecar(sidecar);
        }
    }

    // 5. Overflow on manually overloaded real nodes, charged as extra
    // node-equivalents of the pool's cheapest spec.
    let mut overflow: BTreeMap<PoolName, (f64, u32)> = BTreeMap::new();
    {
        let mut excess: BTreeMap<PoolName, (u64, u64, u32)> = BTreeMap::new();
        for sim_node in sim_nodes.values().filter(|n| !n.is_virtual) {
            let cpu = sim_node.used_cpu_m.saturating_sub(sim_node.alloc_cpu_m);
            let mem = sim_node.used_mem_b.saturating_sub(sim_node.alloc_mem_b);
            let pods = sim_node.pod_count.saturating_sub(sim_node.alloc_pods);
            if cpu > 0 || mem > 0 || pods > 0 {
                let entry = excess.entry(sim_node.pool.clone()).or_default();
                entry.0 += cpu;
                entry.1 += mem;
                entry.2 += pods;
            }
        }
        for (pool, (cpu, mem, pods)) in excess {
            let Some(template) = catalog.get(&pool).and_then(|specs| specs.first()) else {
                continue;
            };
            let equivalents = (cpu as f64 / template.alloc_cpu_m as f64)
                .max(mem as f64 / template.alloc_mem_b as f64)
                .max(pods as f64 / template.alloc_pods as f64)
                .ceil() as u32;
            if equivalents > 0 {
                overflow.insert(
                    pool,
                    (equivalents as f64 * template.price * 24.0, equivalents),
                );
            }
        }
    }

    // 6..9. Duty-cycle costs, pool stats, totals, rows.
    let mut rows: Vec<NodeRow> = Vec::new();
    let mut pods_by_node: BTreeMap<String, Vec<PodView>> = BTreeMap::new();
    let mut pool_stats: BTreeMap<PoolName, PoolStat> = BTreeMap::new();
    let mut projected_pool_stats: BTreeMap<PoolName, PoolStat> = BTreeMap::new();
    let mut total_gfw = 0.0;
    let mut total_keda = 0.0;

    // Pools with observed fleet-hours bill from them; the rest fall back to
    // their existing nodes at 24h.
    let covered_pools: BTreeSet<&str> = snapshot
        .history_usage
        .iter()
        .map(|entry| entry.pool.as_str())
        .collect();

    for sim_node in sim_nodes.values() {
        if sim_node.is_consolidated() {
            continue;
        }

        let effective_hours = sim_node.effective_hours();
        let projected_cost = sim_node.price * effective_hours;
        let is_active = effective_hours > 0.0;

        let projected = projected_pool_stats.entry(sim_node.pool.clone()).or_default();
        projected.cost_usd += projected_cost;
        if is_active {
            projected.nodes_count += 1;
        }

        if !sim_node.is_virtual {
            let actual = pool_stats.entry(sim_node.pool.clone()).or_default();
            actual.nodes_count += 1;
            if !covered_pools.contains(sim_node.pool.as_str()) {
                actual.cost_usd += sim_node.price * 24.0;
            }
        }

        if sim_node.gfw_pods > 0 {
            total_gfw += projected_cost;
        }
        if is_keda_pool(snapshot, &sim_node.pool) {
            total_keda += projected_cost;
        }

        let total_pods = sim_node.total_pods;
        rows.push(NodeRow {
            node: sim_node.name.clone(),
            nodepool: sim_node.pool.clone(),
            instance: sim_node.instance.clone(),
            gfw_ratio_pct: if total_pods > 0 {
                sim_node.gfw_pods as f64 / total_pods as f64 * 100.0
            } else {
                0.0
            },
            alloc_cpu_m: sim_node.alloc_cpu_m,
            alloc_mem_b: sim_node.alloc_mem_b,
            alloc_pods: sim_node.alloc_pods,
            sum_req_cpu_m: sim_node.used_cpu_m,
            sum_req_mem_b: sim_node.used_mem_b,
            sum_usage_cpu_m: sim_node.sum_usage_cpu_m,
            sum_usage_mem_b: sim_node.sum_usage_mem_b,
            ram_util_pct: if sim_node.alloc_mem_b > 0 {
                sim_node.used_mem_b as f64 / sim_node.alloc_mem_b as f64 * 100.0
            } else {
                0.0
            },
            ram_ds_gib: bytes_to_gib(sim_node.parts.ds_mem_b),
            ram_gfw_gib: bytes_to_gib(sim_node.parts.gfw_mem_b),
            cost_daily_usd: projected_cost,
            effective_hours,
            parts: sim_node.parts.clone(),
            is_virtual: sim_node.is_virtual,
            is_active,
            price_missing: sim_node.price_missing,
        });
        pods_by_node.insert(sim_node.name.clone(), sim_node.views.clone());
    }

    // 7. Actuals from observed fleet-hours for the pools that have them.
    for entry in &snapshot.history_usage {
        let (price, _) = prices.lookup(&entry.instance);
        pool_stats.entry(entry.pool.clone()).or_default().cost_usd +=
            price * entry.instance_hours_24h;
    }

    for (pool, (cost, equivalents)) in overflow {
        let projected = projected_pool_stats.entry(pool).or_default();
        projected.cost_usd += cost;
        projected.nodes_count += equivalents;
    }

    let total_actual: f64 = pool_stats.values().map(|s| s.cost_usd).sum();
    let total_projected: f64 = projected_pool_stats.values().map(|s| s.cost_usd).sum();

    SimulationResult {
        summary: SimulationSummary {
            total_cost_daily_usd: total_actual,
            total_cost_gfw_nodes_usd: total_gfw,
            total_cost_keda_nodes_usd: total_keda,
            pool_stats,
            projected_pool_stats,
            projected_total_cost_usd: total_projected,
        },
        nodes: rows,
        pods_by_node,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::common::{GIB, NODEPOOL_LABEL};
    use crate::pricing::PriceTable;

    const R6A_LARGE_HOURLY: f64 = 0.1368;

    fn price_view(snapshot: &Snapshot) -> PriceView {
        PriceView::new(&snapshot.prices, &PriceTable::with_defaults(None))
    }

    fn snapshot_with_nodes(names: &[&str]) -> Snapshot {
        let mut snapshot = Snapshot::default();
        for name in names {
            snapshot.nodes.insert(
                name.to_string(),
                Node::new(name, "p", "r6a.large", 2000, (16.0 * GIB) as u64),
            );
        }
        snapshot.ensure_pools_for_nodes();
        snapshot
    }

    fn bound_pod(name: &str, node: &str, cpu_m: u64, mem_b: u64) -> Pod {
        let mut pod = Pod::new("apps", name, cpu_m, mem_b);
        pod.node = Some(node.to_string());
        pod
    }

    #[test]
    fn test_podless_node_is_consolidated_away() {
        let snapshot = snapshot_with_nodes(&["n1"]);
        let result = run_simulation(&snapshot, &price_view(&snapshot));
        assert!(result.nodes.is_empty());
        assert_eq!(result.summary.total_cost_daily_usd, 0.0);
        assert_eq!(result.summary.projected_total_cost_usd, 0.0);
    }

    #[test]
    fn test_tight_fit_row() {
        let mut snapshot = Snapshot::default();
        snapshot
            .nodes
            .insert("n1".to_string(), Node::new("n1", "p", "r6a.large", 1000, GIB as u64));
        snapshot.ensure_pools_for_nodes();
        let pod = bound_pod("web-1", "n1", 900, 900 * 1024 * 1024);
        snapshot.pods.insert(pod.id.clone(), pod);

        let result = run_simulation(&snapshot, &price_view(&snapshot));
        assert_eq!(result.nodes.len(), 1);
        let row = &result.nodes[0];
        assert!((row.ram_util_pct - 87.890625).abs() < 1e-6);
        assert!((row.cost_daily_usd - R6A_LARGE_HOURLY * 24.0).abs() < 1e-9);
        assert!(row.is_active);
        assert!(!row.is_virtual);
        assert!(!row.price_missing);
    }

    #[test]
    fn test_duty_cycle_halved_workload() {
        let mut snapshot = snapshot_with_nodes(&["n1", "n2"]);
        for node in ["n1", "n2"] {
            let mut pod = bound_pod(&format!("web-{}", node), node, 500, GIB as u64);
            pod.active_ratio = 0.5;
            snapshot.pods.insert(pod.id.clone(), pod);
        }

        let result = run_simulation(&snapshot, &price_view(&snapshot));
        for row in &result.nodes {
            assert!((row.effective_hours - 12.5).abs() < 1e-9);
        }
        let pool = &result.summary.projected_pool_stats["p"];
        assert!((pool.cost_usd - 2.0 * R6A_LARGE_HOURLY * 12.5).abs() < 1e-9);
        // Actuals keep billing both nodes at full time.
        assert!(
            (result.summary.pool_stats["p"].cost_usd - 2.0 * R6A_LARGE_HOURLY * 24.0).abs() < 1e-9
        );
    }

    #[test]
    fn test_system_only_node_is_kept_but_free() {
        let mut snapshot = snapshot_with_nodes(&["n1"]);
        let mut sys = bound_pod("karpenter-0", "n1", 100, GIB as u64 / 4);
        sys.is_system = true;
        snapshot.pods.insert(sys.id.clone(), sys);

        let result = run_simulation(&snapshot, &price_view(&snapshot));
        assert_eq!(result.nodes.len(), 1);
        let row = &result.nodes[0];
        assert!(!row.is_active);
        assert_eq!(row.cost_daily_usd, 0.0);
        // It still shows up in actual spend.
        assert!((result.summary.pool_stats["p"].cost_usd - R6A_LARGE_HOURLY * 24.0).abs() < 1e-9);
    }

    #[test]
    fn test_pending_pods_pack_and_synthesize() {
        let mut snapshot = Snapshot::default();
        snapshot
            .nodes
            .insert("b1".to_string(), Node::new("b1", "b", "r6a.large", 2000, (8.0 * GIB) as u64));
        snapshot.ensure_pools_for_nodes();
        let mut ds = bound_pod("vector-b1", "b1", 200, 500 * 1024 * 1024);
        ds.is_daemonset = true;
        ds.namespace = "vector".to_string();
        ds.id = "vector/vector-b1".to_string();
        ds.owner_name = Some("vector".to_string());
        snapshot.pods.insert(ds.id.clone(), ds);

        for idx in 0..3 {
            let mut pod = Pod::new("apps", &format!("job-{}", idx), 800, (3.0 * GIB) as u64);
            pod.node_selector
                .insert(NODEPOOL_LABEL.to_string(), "b".to_string());
            snapshot.pods.insert(pod.id.clone(), pod);
        }

        let result = run_simulation(&snapshot, &price_view(&snapshot));
        assert_eq!(result.nodes.len(), 2);
        let virt: Vec<&NodeRow> = result.nodes.iter().filter(|r| r.is_virtual).collect();
        assert_eq!(virt.len(), 1);
        assert_eq!(virt[0].node, "b-virt-1");
        // The synthetic node pays the DaemonSet overhead of its spec.
        assert_eq!(virt[0].parts.ds_cpu_m, 200);
        assert!(result.nodes.iter().all(|r| r.is_active));
        // b1 took two pending pods next to the DaemonSet; the third, which
        // no longer fit, went to the synthetic node.
        assert_eq!(result.pods_by_node["b1"].len(), 3);
        assert_eq!(result.pods_by_node["b-virt-1"].len(), 1);
    }

    #[test]
    fn test_sidecar_is_coscheduled() {
        let mut snapshot = Snapshot::default();
        snapshot
            .nodes
            .insert("n1".to_string(), Node::new("n1", "p", "r6a.large", 2000, (16.0 * GIB) as u64));
        snapshot.ensure_pools_for_nodes();
        // Keep the node alive independently of the pending pod.
        let anchor = bound_pod("anchor", "n1", 100, GIB as u64);
        snapshot.pods.insert(anchor.id.clone(), anchor);

        let mount = Pod::new("apps", "mount-s3-cache-0", 300, GIB as u64);
        snapshot.pods.insert(mount.id.clone(), mount);

        let mut pod = Pod::new("apps", "trainer-0", 1000, GIB as u64);
        pod.node_selector
            .insert(NODEPOOL_LABEL.to_string(), "p".to_string());
        snapshot.pods.insert(pod.id.clone(), pod);

        let result = run_simulation(&snapshot, &price_view(&snapshot));
        let row = result.nodes.iter().find(|r| r.node == "n1").unwrap();
        // anchor + trainer + invisible sidecar clone of the mount pod.
        assert_eq!(row.sum_req_cpu_m, 100 + 1000 + 300);
        assert_eq!(result.pods_by_node["n1"].len(), 2);
    }

    #[test]
    fn test_overflowed_node_charges_equivalents() {
        let mut snapshot = snapshot_with_nodes(&["n1"]);
        // A user crammed 5000m onto a 2000m node.
        let pod = bound_pod("fat-1", "n1", 5000, GIB as u64);
        snapshot.pods.insert(pod.id.clone(), pod);

        let result = run_simulation(&snapshot, &price_view(&snapshot));
        let projected = &result.summary.projected_pool_stats["p"];
        // ceil(3000/2000) = 2 extra node-equivalents at 24h each.
        assert_eq!(projected.nodes_count, 1 + 2);
        let expected = R6A_LARGE_HOURLY * 24.0 + 2.0 * R6A_LARGE_HOURLY * 24.0;
        assert!((projected.cost_usd - expected).abs() < 1e-9);
    }

    #[test]
    fn test_history_usage_drives_actuals() {
        let mut snapshot = snapshot_with_nodes(&["n1"]);
        let pod = bound_pod("web-1", "n1", 500, GIB as u64);
        snapshot.pods.insert(pod.id.clone(), pod);
        snapshot.history_usage.push(crate::core::snapshot::HistoryUsage {
            pool: "p".to_string(),
            instance: "r6a.large".to_string(),
            instance_hours_24h: 31.5,
        });

        let result = run_simulation(&snapshot, &price_view(&snapshot));
        assert!(
            (result.summary.pool_stats["p"].cost_usd - R6A_LARGE_HOURLY * 31.5).abs() < 1e-9
        );
        assert_eq!(result.summary.pool_stats["p"].nodes_count, 1);
    }

    #[test]
    fn test_history_usage_covers_pools_independently() {
        let mut snapshot = snapshot_with_nodes(&["n1"]);
        snapshot.nodes.insert(
            "q1".to_string(),
            Node::new("q1", "q", "t3a.large", 2000, (8.0 * GIB) as u64),
        );
        snapshot.ensure_pools_for_nodes();
        for (name, node) in [("web-1", "n1"), ("web-2", "q1")] {
            let pod = bound_pod(name, node, 500, GIB as u64);
            snapshot.pods.insert(pod.id.clone(), pod);
        }
        // Only pool q has observed fleet-hours.
        snapshot.history_usage.push(crate::core::snapshot::HistoryUsage {
            pool: "q".to_string(),
            instance: "t3a.large".to_string(),
            instance_hours_24h: 30.0,
        });

        let result = run_simulation(&snapshot, &price_view(&snapshot));
        assert!((result.summary.pool_stats["q"].cost_usd - 0.0864 * 30.0).abs() < 1e-9);
        // Pool p keeps its existing-nodes-at-24h fallback.
        assert!(
            (result.summary.pool_stats["p"].cost_usd - R6A_LARGE_HOURLY * 24.0).abs() < 1e-9
        );
        assert_eq!(result.summary.pool_stats["p"].nodes_count, 1);
    }

    #[test]
    fn test_missing_price_flag_propagates() {
        let mut snapshot = Snapshot::default();
        snapshot.nodes.insert(
            "n1".to_string(),
            Node::new("n1", "p", "exotic.metal", 2000, (16.0 * GIB) as u64),
        );
        snapshot.ensure_pools_for_nodes();
        let pod = bound_pod("web-1", "n1", 500, GIB as u64);
        snapshot.pods.insert(pod.id.clone(), pod);

        let result = run_simulation(&snapshot, &price_view(&snapshot));
        let row = &result.nodes[0];
        assert!(row.price_missing);
        assert_eq!(row.cost_daily_usd, 0.0);
        assert!(row.is_active);
    }

    #[test]
    fn test_totals_match_pool_sums() {
        let mut snapshot = snapshot_with_nodes(&["n1", "n2"]);
        snapshot.nodes.insert(
            "k1".to_string(),
            Node::new("k1", "keda-nightly", "t3a.large", 2000, (8.0 * GIB) as u64),
        );
        snapshot.ensure_pools_for_nodes();
        for (name, node) in [("a", "n1"), ("b", "n2"), ("c", "k1")] {
            let mut pod = bound_pod(name, node, 500, GIB as u64);
            pod.active_ratio = 0.75;
            snapshot.pods.insert(pod.id.clone(), pod);
        }

        let result = run_simulation(&snapshot, &price_view(&snapshot));
        let summary = &result.summary;
        let actual_sum: f64 = summary.pool_stats.values().map(|s| s.cost_usd).sum();
        let projected_sum: f64 = summary
            .projected_pool_stats
            .values()
            .map(|s| s.cost_usd)
            .sum();
        assert!((actual_sum - summary.total_cost_daily_usd).abs() < 1e-6);
        assert!((projected_sum - summary.projected_total_cost_usd).abs() < 1e-6);
        assert!(summary.total_cost_keda_nodes_usd > 0.0);
    }
}
