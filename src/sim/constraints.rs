//! Stateless evaluation of whether a pod may land on a node.
//!
//! Checks run in a fixed order: node selector, taints/tolerations, required
//! node affinity, then the minimal pod anti-affinity form. Every violated
//! rule contributes one human-readable reason; an empty list means the pod
//! is schedulable on the node. Nothing here throws and nothing mutates.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::common::{NodeId, PodId};
use crate::core::node::{Node, Taint};
use crate::core::pod::{
    LabelOperator, NodeSelectorRequirement, NodeSelectorTerm, Pod, Toleration,
    TolerationOperator,
};
use crate::core::snapshot::Snapshot;

/// Kubernetes derives pod hash suffixes past this length, so two owner names
/// agreeing on this prefix belong to the same logical workload.
pub const OWNER_PREFIX_LEN: usize = 15;

fn check_node_selector(pod: &Pod, node: &Node, reasons: &mut Vec<String>) {
    for (key, expected) in pod.node_selector.iter() {
        match node.labels.get(key) {
            None => reasons.push(format!(
                "nodeSelector: missing label '{}={}' on node",
                key, expected
            )),
            Some(actual) if actual != expected => reasons.push(format!(
                "nodeSelector: node label '{}={}' != expected '{}'",
                key, actual, expected
            )),
            Some(_) => {}
        }
    }
}

pub(crate) fn taint_tolerated(taint: &Taint, tolerations: &[Toleration]) -> bool {
    for tol in tolerations {
        // A set toleration effect must equal the taint's; an empty one
        // tolerates all effects.
        if let Some(effect) = tol.effect {
            if effect != taint.effect {
                continue;
            }
        }

        match tol.key.as_deref() {
            // An empty key is only meaningful with Exists and then matches
            // any taint.
            None => {
                if tol.operator == TolerationOperator::Exists {
                    return true;
                }
                continue;
            }
            Some(key) if key != taint.key => continue,
            Some(_) => {}
        }

        match tol.operator {
            TolerationOperator::Exists => return true,
            TolerationOperator::Equal => {
                if tol.value.as_deref().unwrap_or("") == taint.value.as_deref().unwrap_or("") {
                    return true;
                }
            }
        }
    }
    false
}

fn check_taints(pod: &Pod, node: &Node, reasons: &mut Vec<String>) {
    for taint in node.taints.iter() {
        if !taint.effect.is_hard() {
            continue;
        }
        if !taint_tolerated(taint, &pod.tolerations) {
            reasons.push(format!(
                "taint '{}={}' with effect '{:?}' is not tolerated by pod",
                taint.key,
                taint.value.as_deref().unwrap_or(""),
                taint.effect
            ));
        }
    }
}

fn match_expression(req: &NodeSelectorRequirement, labels: &BTreeMap<String, String>) -> bool {
    let value = labels.get(&req.key);
    match req.operator {
        LabelOperator::In => value.map_or(false, |v| req.values.contains(v)),
        LabelOperator::NotIn => value.map_or(false, |v| !req.values.contains(v)),
        LabelOperator::Exists => value.is_some(),
        LabelOperator::DoesNotExist => value.is_none(),
        LabelOperator::Gt | LabelOperator::Lt => {
            let (Some(actual), Some(bound)) = (
                value.and_then(|v| v.parse::<i64>().ok()),
                req.values.first().and_then(|v| v.parse::<i64>().ok()),
            ) else {
                return false;
            };
            if req.operator == LabelOperator::Gt {
                actual > bound
            } else {
                actual < bound
            }
        }
    }
}

fn match_term(term: &NodeSelectorTerm, labels: &BTreeMap<String, String>) -> bool {
    // matchFields are deliberately ignored.
    term.match_expressions
        .iter()
        .all(|req| match_expression(req, labels))
}

pub(crate) fn node_selector_admits(
    selector: &BTreeMap<String, String>,
    labels: &BTreeMap<String, String>,
) -> bool {
    selector
        .iter()
        .all(|(key, expected)| labels.get(key) == Some(expected))
}

fn check_node_affinity(pod: &Pod, node: &Node, reasons: &mut Vec<String>) {
    let Some(required) = pod
        .affinity
        .node_affinity
        .as_ref()
        .and_then(|a| a.required_during_scheduling_ignored_during_execution.as_ref())
    else {
        return;
    };
    if required.node_selector_terms.is_empty() {
        return;
    }

    // OR across terms, AND across expressions within a term.
    let matched = required
        .node_selector_terms
        .iter()
        .any(|term| match_term(term, &node.labels));
    if !matched {
        reasons.push("nodeAffinity.requiredDuringScheduling is not satisfied by node".to_string());
    }
}

fn owner_prefix(name: &str) -> &str {
    let end = name
        .char_indices()
        .nth(OWNER_PREFIX_LEN)
        .map(|(i, _)| i)
        .unwrap_or(name.len());
    &name[..end]
}

/// Minimal anti-affinity form: a host-scoped required term conflicts iff the
/// node already hosts a pod of the same namespace whose owner name shares
/// the 15-character prefix with the candidate's.
pub fn anti_affinity_conflict<'a>(
    pod: &Pod,
    peers: impl IntoIterator<Item = &'a Pod>,
) -> Option<&'a Pod> {
    let anti = pod.affinity.pod_anti_affinity.as_ref()?;
    let host_scoped = anti
        .required_during_scheduling_ignored_during_execution
        .iter()
        .any(|term| term.topology_key.ends_with("hostname"));
    if !host_scoped {
        return None;
    }

    let own_prefix = owner_prefix(pod.owner_name.as_deref()?);
    peers.into_iter().find(|peer| {
        peer.id != pod.id
            && peer.namespace == pod.namespace
            && peer
                .owner_name
                .as_deref()
                .map_or(false, |name| owner_prefix(name) == own_prefix)
    })
}

fn check_pod_anti_affinity(pod: &Pod, peers: &[&Pod], reasons: &mut Vec<String>) {
    if let Some(peer) = anti_affinity_conflict(pod, peers.iter().copied()) {
        reasons.push(format!(
            "podAntiAffinity: node already hosts '{}' from the same owner group",
            peer.id
        ));
    }
}

/// Full rule evaluation of a pod against a node. `peers` are the pods
/// currently placed on that node.
pub fn placement_reasons(pod: &Pod, node: &Node, peers: &[&Pod]) -> Vec<String> {
    let mut reasons = Vec::new();
    check_node_selector(pod, node, &mut reasons);
    check_taints(pod, node, &mut reasons);
    check_node_affinity(pod, node, &mut reasons);
    check_pod_anti_affinity(pod, peers, &mut reasons);
    reasons
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PodViolation {
    pub pod_id: PodId,
    pub reasons: Vec<String>,
}

/// Violations for every bound pod, keyed by node. Placement is never
/// overridden based on these; the user's assignment wins.
pub fn compute_violations(snapshot: &Snapshot) -> BTreeMap<NodeId, Vec<PodViolation>> {
    let mut result: BTreeMap<NodeId, Vec<PodViolation>> = BTreeMap::new();

    for (node_id, node) in snapshot.nodes.iter() {
        let on_node = snapshot.pods_on_node(node_id);
        for pod in on_node.iter() {
            let reasons = placement_reasons(pod, node, &on_node);
            if !reasons.is_empty() {
                result.entry(node_id.clone()).or_default().push(PodViolation {
                    pod_id: pod.id.clone(),
                    reasons,
                });
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node::TaintEffect;
    use crate::core::pod::{
        Affinity, NodeAffinity, NodeSelector, PodAffinityTerm, PodAntiAffinity,
    };

    fn node_with_labels(labels: &[(&str, &str)]) -> Node {
        let mut node = Node::new("n1", "workload", "r6a.large", 2000, 17179869184);
        node.labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        node
    }

    fn tainted_node(key: &str, value: Option<&str>, effect: TaintEffect) -> Node {
        let mut node = Node::new("n1", "workload", "r6a.large", 2000, 17179869184);
        node.taints.push(Taint {
            key: key.to_string(),
            value: value.map(|v| v.to_string()),
            effect,
        });
        node
    }

    #[test]
    fn test_node_selector_mismatch_and_missing() {
        let node = node_with_labels(&[("zone", "a")]);
        let mut pod = Pod::new("apps", "web-1", 100, 1024);
        pod.node_selector.insert("zone".to_string(), "b".to_string());
        pod.node_selector.insert("tier".to_string(), "gold".to_string());

        let reasons = placement_reasons(&pod, &node, &[]);
        assert_eq!(
            reasons,
            vec![
                "nodeSelector: missing label 'tier=gold' on node".to_string(),
                "nodeSelector: node label 'zone=a' != expected 'b'".to_string(),
            ]
        );
    }

    #[test]
    fn test_untolerated_taint_is_reported() {
        let node = tainted_node("spot", None, TaintEffect::NoSchedule);
        let pod = Pod::new("apps", "web-1", 100, 1024);

        let reasons = placement_reasons(&pod, &node, &[]);
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("taint 'spot="));
        assert!(reasons[0].contains("NoSchedule"));
    }

    #[test]
    fn test_soft_taint_is_ignored() {
        let node = tainted_node("pref", None, TaintEffect::PreferNoSchedule);
        let pod = Pod::new("apps", "web-1", 100, 1024);
        assert!(placement_reasons(&pod, &node, &[]).is_empty());
    }

    #[test]
    fn test_toleration_operators() {
        let node = tainted_node("team", Some("ml"), TaintEffect::NoSchedule);

        // Exists ignores value.
        let mut pod = Pod::new("apps", "web-1", 100, 1024);
        pod.tolerations.push(Toleration {
            key: Some("team".to_string()),
            operator: TolerationOperator::Exists,
            value: None,
            effect: None,
        });
        assert!(placement_reasons(&pod, &node, &[]).is_empty());

        // Equal requires exact value equality.
        pod.tolerations[0].operator = TolerationOperator::Equal;
        pod.tolerations[0].value = Some("web".to_string());
        assert_eq!(placement_reasons(&pod, &node, &[]).len(), 1);
        pod.tolerations[0].value = Some("ml".to_string());
        assert!(placement_reasons(&pod, &node, &[]).is_empty());
    }

    #[test]
    fn test_empty_key_requires_exists() {
        let node = tainted_node("anything", Some("v"), TaintEffect::NoExecute);

        let mut pod = Pod::new("apps", "web-1", 100, 1024);
        pod.tolerations.push(Toleration {
            key: None,
            operator: TolerationOperator::Exists,
            value: None,
            effect: None,
        });
        assert!(placement_reasons(&pod, &node, &[]).is_empty());

        // Empty key with Equal is an invalid toleration and matches nothing.
        pod.tolerations[0].operator = TolerationOperator::Equal;
        assert_eq!(placement_reasons(&pod, &node, &[]).len(), 1);
    }

    #[test]
    fn test_toleration_effect_must_match_when_set() {
        let node = tainted_node("spot", None, TaintEffect::NoExecute);
        let mut pod = Pod::new("apps", "web-1", 100, 1024);
        pod.tolerations.push(Toleration {
            key: Some("spot".to_string()),
            operator: TolerationOperator::Exists,
            value: None,
            effect: Some(TaintEffect::NoSchedule),
        });
        assert_eq!(placement_reasons(&pod, &node, &[]).len(), 1);

        pod.tolerations[0].effect = Some(TaintEffect::NoExecute);
        assert!(placement_reasons(&pod, &node, &[]).is_empty());
    }

    fn affinity_with_expressions(exprs: Vec<NodeSelectorRequirement>) -> Affinity {
        Affinity {
            node_affinity: Some(NodeAffinity {
                required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                    node_selector_terms: vec![NodeSelectorTerm {
                        match_expressions: exprs,
                        match_fields: vec![],
                    }],
                }),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_node_affinity_operators() {
        let node = node_with_labels(&[("zone", "a"), ("cpu-count", "8")]);
        let mut pod = Pod::new("apps", "web-1", 100, 1024);

        let cases = vec![
            (LabelOperator::In, "zone", vec!["a", "b"], true),
            (LabelOperator::In, "zone", vec!["b"], false),
            (LabelOperator::NotIn, "zone", vec!["b"], true),
            (LabelOperator::NotIn, "zone", vec!["a"], false),
            // NotIn on an absent label does not match.
            (LabelOperator::NotIn, "ghost", vec!["a"], false),
            (LabelOperator::Exists, "zone", vec![], true),
            (LabelOperator::DoesNotExist, "ghost", vec![], true),
            (LabelOperator::Gt, "cpu-count", vec!["4"], true),
            (LabelOperator::Gt, "cpu-count", vec!["8"], false),
            (LabelOperator::Lt, "cpu-count", vec!["16"], true),
            // Non-integer comparison is a non-match, not an error.
            (LabelOperator::Gt, "zone", vec!["4"], false),
        ];

        for (operator, key, values, matches) in cases {
            pod.affinity = affinity_with_expressions(vec![NodeSelectorRequirement {
                key: key.to_string(),
                operator,
                values: values.iter().map(|v| v.to_string()).collect(),
            }]);
            let reasons = placement_reasons(&pod, &node, &[]);
            assert_eq!(
                reasons.is_empty(),
                matches,
                "operator {:?} on {}={:?}",
                operator,
                key,
                values
            );
        }
    }

    #[test]
    fn test_node_affinity_or_across_terms() {
        let node = node_with_labels(&[("zone", "a")]);
        let mut pod = Pod::new("apps", "web-1", 100, 1024);
        pod.affinity = Affinity {
            node_affinity: Some(NodeAffinity {
                required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                    node_selector_terms: vec![
                        NodeSelectorTerm {
                            match_expressions: vec![NodeSelectorRequirement {
                                key: "zone".to_string(),
                                operator: LabelOperator::In,
                                values: vec!["b".to_string()],
                            }],
                            match_fields: vec![],
                        },
                        NodeSelectorTerm {
                            match_expressions: vec![NodeSelectorRequirement {
                                key: "zone".to_string(),
                                operator: LabelOperator::In,
                                values: vec!["a".to_string()],
                            }],
                            match_fields: vec![],
                        },
                    ],
                }),
            }),
            ..Default::default()
        };
        assert!(placement_reasons(&pod, &node, &[]).is_empty());
    }

    fn anti_affinity_pod(ns: &str, name: &str, owner: &str) -> Pod {
        let mut pod = Pod::new(ns, name, 100, 1024);
        pod.owner_kind = Some("ReplicaSet".to_string());
        pod.owner_name = Some(owner.to_string());
        pod.affinity = Affinity {
            pod_anti_affinity: Some(PodAntiAffinity {
                required_during_scheduling_ignored_during_execution: vec![PodAffinityTerm {
                    topology_key: "kubernetes.io/hostname".to_string(),
                    label_selector: None,
                }],
            }),
            ..Default::default()
        };
        pod
    }

    #[test]
    fn test_anti_affinity_owner_prefix_conflict() {
        let node = node_with_labels(&[]);
        // Hash suffixes differ but the 15-char prefixes agree.
        let candidate = anti_affinity_pod("apps", "web-1", "billing-engine-x-abc12");
        let peer = anti_affinity_pod("apps", "web-2", "billing-engine-x-def34");

        let reasons = placement_reasons(&candidate, &node, &[&peer]);
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("podAntiAffinity"));
    }

    #[test]
    fn test_anti_affinity_scopes() {
        let node = node_with_labels(&[]);
        let candidate = anti_affinity_pod("apps", "web-1", "billing-engine-x-abc12");

        // Different namespace does not conflict.
        let other_ns = anti_affinity_pod("staging", "web-2", "billing-engine-x-def34");
        assert!(placement_reasons(&candidate, &node, &[&other_ns]).is_empty());

        // Short owner names must match in full.
        let short_a = anti_affinity_pod("apps", "web-1", "api");
        let short_b = anti_affinity_pod("apps", "web-2", "api-gateway");
        assert!(placement_reasons(&short_a, &node, &[&short_b]).is_empty());

        // A pod is never in conflict with itself.
        assert!(placement_reasons(&candidate, &node, &[&candidate]).is_empty());
    }

    #[test]
    fn test_compute_violations_only_reports_bound_pods() {
        let mut snapshot = Snapshot::default();
        let node = tainted_node("spot", None, TaintEffect::NoSchedule);
        snapshot.nodes.insert(node.id.clone(), node);

        let mut bound = Pod::new("apps", "web-1", 100, 1024);
        bound.node = Some("n1".to_string());
        snapshot.pods.insert(bound.id.clone(), bound);

        let pending = Pod::new("apps", "web-2", 100, 1024);
        snapshot.pods.insert(pending.id.clone(), pending);

        let violations = compute_violations(&snapshot);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations["n1"].len(), 1);
        assert_eq!(violations["n1"][0].pod_id, "apps/web-1");
    }
}
