//! Snapshot persistence in the legacy on-disk schema.
//!
//! The schema is a single JSON document: `baseline.{nodes,pods}` keyed by
//! name, flat `nodepools`, `prices_by_instance`, the optional KEDA pool name
//! and the observed `history_usage`. Older files spell the price map as
//! `prices_default`/`prices_keda` and daemonset pods as `is_daemon`; both
//! spellings are accepted on load.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use log::info;
use serde::{Deserialize, Serialize};

use crate::core::common::{CapacityType, InstancePrice, InstanceType, PoolName};
use crate::core::node::Node;
use crate::core::node_pool::{NodePool, Schedule};
use crate::core::pod::Pod;
use crate::core::snapshot::{HistoryUsage, Snapshot};

/// Namespaces whose pods count as system load regardless of how the file
/// flags them.
pub const SYSTEM_NAMESPACES: &[&str] = &[
    "default",
    "vector",
    "victoria-metrics",
    "oomkill-exporter",
    "kube-system",
    "mount-s3",
];

#[derive(Debug, Default, Serialize, Deserialize)]
struct BaselineSection {
    #[serde(default)]
    nodes: BTreeMap<String, Node>,
    #[serde(default)]
    pods: BTreeMap<String, Pod>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SnapshotFile {
    baseline: BaselineSection,
    #[serde(default)]
    nodepools: BTreeMap<PoolName, NodePool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    prices_by_instance: BTreeMap<InstanceType, f64>,
    #[serde(default, skip_serializing)]
    prices_default: BTreeMap<InstanceType, f64>,
    #[serde(default, skip_serializing)]
    prices_keda: BTreeMap<InstanceType, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    keda_pool: Option<PoolName>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    history_usage: Vec<HistoryUsage>,
}

fn merge_price_sources(file: &SnapshotFile) -> BTreeMap<InstanceType, InstancePrice> {
    let mut result = BTreeMap::new();
    let mut add = |prices: &BTreeMap<InstanceType, f64>, source: &str| {
        for (instance, hourly) in prices {
            result.insert(
                instance.clone(),
                InstancePrice {
                    instance_type: instance.clone(),
                    usd_per_hour: *hourly,
                    purchasing: CapacityType::OnDemand,
                    source: source.to_string(),
                },
            );
        }
    };
    if !file.prices_by_instance.is_empty() {
        add(&file.prices_by_instance, "prices_by_instance");
    } else {
        add(&file.prices_default, "prices_default");
        add(&file.prices_keda, "prices_keda");
    }
    result
}

fn snapshot_from_file(file: SnapshotFile) -> Snapshot {
    let prices = merge_price_sources(&file);

    let mut schedules = BTreeMap::new();
    for schedule in [Schedule::default_24x7(), Schedule::keda_weekdays_12h()] {
        schedules.insert(schedule.name.clone(), schedule);
    }

    let mut nodes = BTreeMap::new();
    for (name, mut node) in file.baseline.nodes {
        if node.id.is_empty() {
            node.id = name.clone();
        }
        if node.name.is_empty() {
            node.name = name;
        }
        nodes.insert(node.id.clone(), node);
    }

    let mut pods = BTreeMap::new();
    for (key, mut pod) in file.baseline.pods {
        if pod.id.is_empty() {
            pod.id = key;
        }
        if SYSTEM_NAMESPACES.contains(&pod.namespace.as_str()) {
            pod.is_system = true;
        }
        pods.insert(pod.id.clone(), pod);
    }

    let mut snapshot = Snapshot {
        nodes,
        pods,
        nodepools: file.nodepools,
        prices,
        schedules,
        keda_pool_name: file.keda_pool,
        history_usage: file.history_usage,
    };

    // Older files carry no nodepools section at all; infer pools from the
    // nodes that reference them.
    snapshot.ensure_pools_for_nodes();
    if let Some(keda_pool) = snapshot.keda_pool_name.clone() {
        snapshot.ensure_pool(&keda_pool);
        if let Some(pool) = snapshot.nodepools.get_mut(&keda_pool) {
            pool.is_keda = true;
        }
    }
    snapshot
}

fn snapshot_to_file(snapshot: &Snapshot) -> SnapshotFile {
    SnapshotFile {
        baseline: BaselineSection {
            nodes: snapshot
                .nodes
                .values()
                .map(|n| (n.name.clone(), n.clone()))
                .collect(),
            pods: snapshot
                .pods
                .values()
                .map(|p| (p.id.clone(), p.clone()))
                .collect(),
        },
        nodepools: snapshot.nodepools.clone(),
        prices_by_instance: snapshot
            .prices
            .iter()
            .map(|(instance, price)| (instance.clone(), price.usd_per_hour))
            .collect(),
        prices_default: Default::default(),
        prices_keda: Default::default(),
        keda_pool: snapshot.keda_pool_name.clone(),
        history_usage: snapshot.history_usage.clone(),
    }
}

pub fn load_snapshot(path: &Path) -> anyhow::Result<Snapshot> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("cannot read snapshot file {}", path.display()))?;
    let file: SnapshotFile = serde_json::from_str(&raw)
        .with_context(|| format!("malformed snapshot file {}", path.display()))?;
    let snapshot = snapshot_from_file(file);
    info!(
        "loaded snapshot from {}: {} nodes, {} pods, {} pools",
        path.display(),
        snapshot.nodes.len(),
        snapshot.pods.len(),
        snapshot.nodepools.len()
    );
    Ok(snapshot)
}

pub fn save_snapshot(snapshot: &Snapshot, path: &Path) -> anyhow::Result<()> {
    let file = snapshot_to_file(snapshot);
    let serialized = serde_json::to_string_pretty(&file)?;
    fs::write(path, serialized)
        .with_context(|| format!("cannot write snapshot file {}", path.display()))?;
    Ok(())
}
