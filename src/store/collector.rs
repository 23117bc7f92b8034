//! Captures a live snapshot from a cluster through `kubectl`.
//!
//! This is the external boundary of the simulator: everything here is I/O
//! plus conversion from the Kubernetes API shapes into snapshot entities.
//! Capture failures are always recoverable; the caller keeps whatever
//! snapshot it already had.

use std::collections::BTreeMap;
use std::process::Command;

use anyhow::{bail, Context};
use log::{info, warn};
use serde_json::Value;

use crate::core::common::{CapacityType, CpuMillis, MemBytes, PoolName, NODEPOOL_LABEL};
use crate::core::node::{Node, Taint};
use crate::core::node_pool::{NodePool, Schedule, DEFAULT_SCHEDULE, KEDA_SCHEDULE};
use crate::core::pod::Pod;
use crate::core::snapshot::Snapshot;
use crate::store::io::SYSTEM_NAMESPACES;

/// Fallback label some clusters use instead of the autoscaler pool label.
const INSTANCE_GROUP_LABEL: &str = "node.kubernetes.io/instance-group";
const INSTANCE_TYPE_LABEL: &str = "node.kubernetes.io/instance-type";
const CAPACITY_TYPE_LABEL: &str = "karpenter.sh/capacity-type";

pub trait ClusterCollector: Send + Sync {
    fn capture(&self) -> anyhow::Result<Snapshot>;
}

/// Parses a Kubernetes CPU quantity ("100m", "1", "0.5", "250000n") into
/// millicores.
pub fn parse_cpu_quantity(quantity: &str) -> CpuMillis {
    let quantity = quantity.trim();
    if quantity.is_empty() {
        return 0;
    }
    if let Some(millis) = quantity.strip_suffix('m') {
        return millis.parse().unwrap_or(0);
    }
    if let Some(nanos) = quantity.strip_suffix('n') {
        return nanos.parse::<u64>().unwrap_or(0) / 1_000_000;
    }
    quantity
        .parse::<f64>()
        .map(|cores| (cores * 1000.0) as u64)
        .unwrap_or(0)
}

/// Parses a Kubernetes memory quantity ("1Gi", "512Mi", "1000000") into
/// bytes.
pub fn parse_memory_quantity(quantity: &str) -> MemBytes {
    let quantity = quantity.trim();
    if quantity.is_empty() {
        return 0;
    }

    const MULTIPLIERS: &[(&str, u64)] = &[
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("Ti", 1 << 40),
        ("K", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
        ("T", 1_000_000_000_000),
    ];
    for (suffix, multiplier) in MULTIPLIERS {
        if let Some(number) = quantity.strip_suffix(suffix) {
            return number
                .parse::<f64>()
                .map(|v| (v * *multiplier as f64) as u64)
                .unwrap_or(0);
        }
    }
    quantity.parse().unwrap_or(0)
}

pub struct KubectlCollector {
    pub context: Option<String>,
}

impl KubectlCollector {
    pub fn new(context: Option<String>) -> Self {
        Self { context }
    }

    fn run_kubectl(&self, args: &[&str]) -> anyhow::Result<Value> {
        let mut command = Command::new("kubectl");
        command.args(args).args(["-o", "json"]);
        if let Some(context) = &self.context {
            command.args(["--context", context]);
        }

        info!("running kubectl {}", args.join(" "));
        let output = command.output().context("cannot spawn kubectl")?;
        if !output.status.success() {
            bail!(
                "kubectl {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        serde_json::from_slice(&output.stdout).context("kubectl returned malformed JSON")
    }
}

fn str_field<'a>(value: &'a Value, pointer: &str) -> &'a str {
    value.pointer(pointer).and_then(Value::as_str).unwrap_or("")
}

fn labels_of(metadata: &Value) -> BTreeMap<String, String> {
    metadata
        .get("labels")
        .and_then(Value::as_object)
        .map(|labels| {
            labels
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn taints_of(spec: &Value) -> Vec<Taint> {
    spec.get("taints")
        .cloned()
        .map(|taints| serde_json::from_value(taints).unwrap_or_default())
        .unwrap_or_default()
}

fn node_from_item(item: &Value) -> Option<Node> {
    let name = str_field(item, "/metadata/name");
    if name.is_empty() {
        return None;
    }
    let labels = labels_of(&item["metadata"]);
    let pool = labels
        .get(NODEPOOL_LABEL)
        .or_else(|| labels.get(INSTANCE_GROUP_LABEL))
        .cloned()
        .unwrap_or_else(|| "default".to_string());
    let instance_type = labels
        .get(INSTANCE_TYPE_LABEL)
        .cloned()
        .unwrap_or_else(|| "unknown".to_string());

    let allocatable = &item["status"]["allocatable"];
    let mut node = Node::new(
        name,
        &pool,
        &instance_type,
        parse_cpu_quantity(allocatable.get("cpu").and_then(Value::as_str).unwrap_or("")),
        parse_memory_quantity(allocatable.get("memory").and_then(Value::as_str).unwrap_or("")),
    );
    if let Some(pods) = allocatable.get("pods").and_then(Value::as_str) {
        node.alloc_pods = pods.parse().unwrap_or(node.alloc_pods);
    }
    if labels.get(CAPACITY_TYPE_LABEL).map(|s| s.as_str()) == Some("spot") {
        node.capacity_type = CapacityType::Spot;
    }
    node.taints = taints_of(&item["spec"]);
    node.labels = labels;
    Some(node)
}

fn sum_container_requests(pod_spec: &Value) -> (CpuMillis, MemBytes) {
    let mut cpu_m = 0;
    let mut mem_b = 0;
    if let Some(containers) = pod_spec.get("containers").and_then(Value::as_array) {
        for container in containers {
            let requests = &container["resources"]["requests"];
            cpu_m += parse_cpu_quantity(requests.get("cpu").and_then(Value::as_str).unwrap_or(""));
            mem_b +=
                parse_memory_quantity(requests.get("memory").and_then(Value::as_str).unwrap_or(""));
        }
    }
    (cpu_m, mem_b)
}

fn pod_from_item(item: &Value) -> Option<Pod> {
    let name = str_field(item, "/metadata/name");
    let namespace = str_field(item, "/metadata/namespace");
    if name.is_empty() || namespace.is_empty() {
        return None;
    }

    let (req_cpu_m, req_mem_b) = sum_container_requests(&item["spec"]);
    let mut pod = Pod::new(namespace, name, req_cpu_m, req_mem_b);

    let node_name = str_field(item, "/spec/nodeName");
    if !node_name.is_empty() {
        pod.node = Some(node_name.to_string());
    }

    if let Some(owner) = item
        .pointer("/metadata/ownerReferences")
        .and_then(Value::as_array)
        .and_then(|refs| refs.first())
    {
        pod.owner_kind = owner.get("kind").and_then(Value::as_str).map(String::from);
        pod.owner_name = owner.get("name").and_then(Value::as_str).map(String::from);
    }
    pod.is_daemonset = pod.owner_kind.as_deref() == Some("DaemonSet");
    pod.is_system = SYSTEM_NAMESPACES.contains(&namespace);

    if let Some(tolerations) = item.pointer("/spec/tolerations") {
        pod.tolerations = serde_json::from_value(tolerations.clone()).unwrap_or_default();
    }
    if let Some(selector) = item.pointer("/spec/nodeSelector") {
        pod.node_selector = serde_json::from_value(selector.clone()).unwrap_or_default();
    }
    if let Some(affinity) = item.pointer("/spec/affinity") {
        pod.affinity = serde_json::from_value(affinity.clone()).unwrap_or_default();
    }
    Some(pod)
}

fn infer_pools(nodes: &BTreeMap<String, Node>, keda_pool: Option<&str>) -> BTreeMap<PoolName, NodePool> {
    let mut pools = BTreeMap::new();
    for node in nodes.values() {
        if pools.contains_key(&node.nodepool) {
            continue;
        }
        let lowered = node.nodepool.to_lowercase();
        let is_keda = keda_pool == Some(node.nodepool.as_str())
            || lowered.contains("keda")
            || lowered.contains("nightly");
        pools.insert(
            node.nodepool.clone(),
            NodePool {
                name: node.nodepool.clone(),
                labels: Default::default(),
                taints: node.taints.clone(),
                is_keda,
                schedule_name: if is_keda { KEDA_SCHEDULE } else { DEFAULT_SCHEDULE }.to_string(),
                consolidation_policy: Default::default(),
            },
        );
    }
    pools
}

impl ClusterCollector for KubectlCollector {
    fn capture(&self) -> anyhow::Result<Snapshot> {
        let node_items = self.run_kubectl(&["get", "nodes"])?;
        let pod_items = self.run_kubectl(&["get", "pods", "--all-namespaces"])?;

        let mut nodes = BTreeMap::new();
        for item in node_items["items"].as_array().into_iter().flatten() {
            match node_from_item(item) {
                Some(node) => {
                    nodes.insert(node.id.clone(), node);
                }
                None => warn!("skipping node item without a name"),
            }
        }

        let mut pods = BTreeMap::new();
        for item in pod_items["items"].as_array().into_iter().flatten() {
            if let Some(pod) = pod_from_item(item) {
                pods.insert(pod.id.clone(), pod);
            }
        }

        let keda_pool = nodes
            .values()
            .map(|n| n.nodepool.clone())
            .find(|pool| pool.to_lowercase().contains("keda"));
        let nodepools = infer_pools(&nodes, keda_pool.as_deref());

        let mut schedules = BTreeMap::new();
        for schedule in [Schedule::default_24x7(), Schedule::keda_weekdays_12h()] {
            schedules.insert(schedule.name.clone(), schedule);
        }

        info!(
            "captured live snapshot: {} nodes, {} pods, {} pools",
            nodes.len(),
            pods.len(),
            nodepools.len()
        );
        Ok(Snapshot {
            nodes,
            pods,
            nodepools,
            prices: Default::default(),
            schedules,
            keda_pool_name: keda_pool,
            history_usage: Default::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_quantities() {
        assert_eq!(parse_cpu_quantity("100m"), 100);
        assert_eq!(parse_cpu_quantity("1"), 1000);
        assert_eq!(parse_cpu_quantity("0.5"), 500);
        assert_eq!(parse_cpu_quantity("250000000n"), 250);
        assert_eq!(parse_cpu_quantity(""), 0);
        assert_eq!(parse_cpu_quantity("garbage"), 0);
    }

    #[test]
    fn test_parse_memory_quantities() {
        assert_eq!(parse_memory_quantity("1Gi"), 1 << 30);
        assert_eq!(parse_memory_quantity("512Mi"), 512 << 20);
        assert_eq!(parse_memory_quantity("1.5Ki"), 1536);
        assert_eq!(parse_memory_quantity("1000000"), 1_000_000);
        assert_eq!(parse_memory_quantity("2G"), 2_000_000_000);
        assert_eq!(parse_memory_quantity(""), 0);
    }

    #[test]
    fn test_node_from_api_item() {
        let item: Value = serde_json::from_str(
            r#"{
                "metadata": {
                    "name": "ip-10-0-0-1",
                    "labels": {
                        "karpenter.sh/nodepool": "workload-high",
                        "karpenter.sh/capacity-type": "spot",
                        "node.kubernetes.io/instance-type": "r6a.large"
                    }
                },
                "spec": {
                    "taints": [{"key": "spot", "effect": "NoSchedule"}]
                },
                "status": {
                    "allocatable": {"cpu": "1930m", "memory": "15Gi", "pods": "29"}
                }
            }"#,
        )
        .unwrap();
        let node = node_from_item(&item).unwrap();
        assert_eq!(node.nodepool, "workload-high");
        assert_eq!(node.instance_type, "r6a.large");
        assert_eq!(node.alloc_cpu_m, 1930);
        assert_eq!(node.alloc_mem_b, 15 << 30);
        assert_eq!(node.alloc_pods, 29);
        assert_eq!(node.capacity_type, CapacityType::Spot);
        assert_eq!(node.taints.len(), 1);
    }

    #[test]
    fn test_pod_from_api_item() {
        let item: Value = serde_json::from_str(
            r#"{
                "metadata": {
                    "name": "vector-abcde",
                    "namespace": "vector",
                    "ownerReferences": [{"kind": "DaemonSet", "name": "vector"}]
                },
                "spec": {
                    "nodeName": "ip-10-0-0-1",
                    "containers": [
                        {"resources": {"requests": {"cpu": "100m", "memory": "256Mi"}}},
                        {"resources": {"requests": {"cpu": "50m", "memory": "64Mi"}}}
                    ]
                }
            }"#,
        )
        .unwrap();
        let pod = pod_from_item(&item).unwrap();
        assert_eq!(pod.id, "vector/vector-abcde");
        assert_eq!(pod.req_cpu_m, 150);
        assert_eq!(pod.req_mem_b, 320 << 20);
        assert!(pod.is_daemonset);
        assert!(pod.is_system);
        assert_eq!(pod.node.as_deref(), Some("ip-10-0-0-1"));
    }
}
