//! Zone state classification for partition detection.
//!
//! Nodes sharing a failure-domain zone are assumed to share fate. When every
//! node in a zone stops reporting at once, the far more likely explanation
//! is a network partition between the controller and the zone, not a
//! simultaneous hardware failure - so the safe reaction is to stop evicting,
//! not to accelerate.

use k8s_openapi::api::core::v1::{Node, NodeCondition};

use crate::status::CONDITION_TRUE;

/// Topology label carrying the node's region.
pub const LABEL_TOPOLOGY_REGION: &str = "topology.kubernetes.io/region";
/// Topology label carrying the node's zone.
pub const LABEL_TOPOLOGY_ZONE: &str = "topology.kubernetes.io/zone";
/// Label marking control-plane nodes, which are excluded from
/// segmentation checks.
pub const LABEL_CONTROL_PLANE: &str = "node-role.kubernetes.io/control-plane";

/// Health classification of a failure-domain zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ZoneState {
    /// At least one node in the zone is reachable.
    #[default]
    Normal,
    /// Reserved for a future threshold-based classification; the classifier
    /// never currently produces it.
    PartialSegmentation,
    /// Every node in the zone looks dead: treated as a controller-to-zone
    /// network partition.
    FullSegmentation,
}

/// Zone key for a node, derived from its topology labels.
///
/// The empty string is a legal zone meaning "unzoned"; nodes without
/// topology labels all land in it and are classified together.
pub fn zone_key(node: &Node) -> String {
    let labels = match &node.metadata.labels {
        Some(labels) => labels,
        None => return String::new(),
    };
    let region = labels.get(LABEL_TOPOLOGY_REGION).map_or("", |s| s.as_str());
    let zone = labels.get(LABEL_TOPOLOGY_ZONE).map_or("", |s| s.as_str());
    if region.is_empty() && zone.is_empty() {
        return String::new();
    }
    // Label values cannot contain '/', so the key is unambiguous.
    format!("{}/{}", region, zone)
}

/// Whether the node is part of the control plane.
pub fn is_control_plane(node: &Node) -> bool {
    node.metadata
        .labels
        .as_ref()
        .is_some_and(|labels| labels.contains_key(LABEL_CONTROL_PLANE))
}

/// Classify a zone from the current Ready conditions of its worker nodes.
///
/// A missing condition (node never reported) counts as not ready. The rule:
/// an empty zone is Normal; a zone where every node is unready is
/// FullSegmentation; anything else is Normal.
pub fn compute_zone_state(ready_conditions: &[Option<NodeCondition>]) -> ZoneState {
    let seen_ready = ready_conditions
        .iter()
        .any(|c| c.as_ref().is_some_and(|c| c.status == CONDITION_TRUE));
    if !seen_ready && !ready_conditions.is_empty() {
        return ZoneState::FullSegmentation;
    }
    ZoneState::Normal
}
