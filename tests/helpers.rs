// Each test binary compiles its own copy and uses a different subset.
#![allow(dead_code)]

use capsim::core::common::{MemBytes, GIB};
use capsim::core::node::Node;
use capsim::core::pod::Pod;
use capsim::core::snapshot::Snapshot;
use capsim::pricing::{PriceTable, PriceView};

pub const R6A_LARGE_HOURLY: f64 = 0.1368;

pub fn gib(v: f64) -> MemBytes {
    (v * GIB) as MemBytes
}

pub fn node(name: &str, pool: &str, instance: &str, cpu_m: u64, mem_gib: f64) -> Node {
    Node::new(name, pool, instance, cpu_m, gib(mem_gib))
}

pub fn bound_pod(namespace: &str, name: &str, node: &str, cpu_m: u64, mem_gib: f64) -> Pod {
    let mut pod = Pod::new(namespace, name, cpu_m, gib(mem_gib));
    pod.node = Some(node.to_string());
    pod
}

pub fn daemonset_pod(namespace: &str, name: &str, node: &str, cpu_m: u64, mem_gib: f64) -> Pod {
    let mut pod = bound_pod(namespace, name, node, cpu_m, mem_gib);
    pod.is_daemonset = true;
    pod.owner_name = Some(name.rsplit_once('-').map(|(p, _)| p).unwrap_or(name).to_string());
    pod.owner_kind = Some("DaemonSet".to_string());
    pod
}

pub fn snapshot_with(nodes: Vec<Node>, pods: Vec<Pod>) -> Snapshot {
    let mut snapshot = Snapshot::default();
    for n in nodes {
        snapshot.nodes.insert(n.id.clone(), n);
    }
    for p in pods {
        snapshot.pods.insert(p.id.clone(), p);
    }
    snapshot.ensure_pools_for_nodes();
    snapshot
}

pub fn price_view(snapshot: &Snapshot) -> PriceView {
    PriceView::new(&snapshot.prices, &PriceTable::with_defaults(None))
}
