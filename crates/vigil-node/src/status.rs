//! Node status bookkeeping.
//!
//! For every known node the controller keeps the last remote status snapshot
//! together with two locally-taken timestamps: when the remote heartbeat was
//! last seen to change, and when the Ready condition last flipped value.
//! Remote timestamps are never trusted for staleness decisions - only for
//! change detection - which neutralises clock skew between the controller
//! and the node agents.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Node, NodeCondition, NodeStatus};
use tracing::{debug, error, warn};

/// Ready condition kind.
pub const NODE_READY: &str = "Ready";
/// OutOfDisk condition kind.
pub const NODE_OUT_OF_DISK: &str = "OutOfDisk";

/// Condition status: healthy.
pub const CONDITION_TRUE: &str = "True";
/// Condition status: reported unhealthy.
pub const CONDITION_FALSE: &str = "False";
/// Condition status: not reporting.
pub const CONDITION_UNKNOWN: &str = "Unknown";

/// Last observed status of a node plus local observation timestamps.
///
/// Invariant: `ready_transition_timestamp <= probe_timestamp <= now`.
#[derive(Debug, Clone)]
pub struct NodeStatusEntry {
    /// The full last-observed remote status snapshot.
    pub status: NodeStatus,
    /// Local instant when the remote heartbeat was last seen to change.
    pub probe_timestamp: DateTime<Utc>,
    /// Local instant when the Ready condition last flipped value.
    pub ready_transition_timestamp: DateTime<Utc>,
}

/// Find a condition of the given kind in a node status.
pub fn get_node_condition<'a>(
    status: Option<&'a NodeStatus>,
    kind: &str,
) -> Option<&'a NodeCondition> {
    status?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == kind)
}

/// Reconcile the saved status entry for a node against its freshly listed
/// status (pure function).
///
/// The cases, in order:
/// - no saved entry: the controller restarted or the node is new; start the
///   clocks at now,
/// - saved entry has no Ready condition but the node does now: first real
///   report, start the clocks at now,
/// - saved entry has a Ready condition but the node no longer does: someone
///   stripped the condition; log it and start the clocks at now,
/// - heartbeat unchanged: the node may be unresponsive, leave the entry
///   alone so staleness keeps accruing,
/// - heartbeat changed, transition unchanged: the node is alive and steady;
///   advance only the probe timestamp,
/// - heartbeat and transition both changed: the Ready value flipped; advance
///   both timestamps.
pub fn reconcile_saved_status(
    saved: Option<&NodeStatusEntry>,
    node: &Node,
    now: DateTime<Utc>,
) -> NodeStatusEntry {
    let node_name = node.metadata.name.as_deref().unwrap_or_default();
    let node_status = node.status.clone().unwrap_or_default();
    let observed_condition = get_node_condition(node.status.as_ref(), NODE_READY);

    let saved = match saved {
        Some(saved) => saved,
        None => {
            warn!(node = %node_name, "Missing status entry for node, assuming now as a timestamp");
            return NodeStatusEntry {
                status: node_status,
                probe_timestamp: now,
                ready_transition_timestamp: now,
            };
        }
    };
    let saved_condition = get_node_condition(Some(&saved.status), NODE_READY);

    match (saved_condition, observed_condition) {
        (None, Some(_)) => {
            debug!(node = %node_name, "Creating timestamp entry for newly observed node");
            NodeStatusEntry {
                status: node_status,
                probe_timestamp: now,
                ready_transition_timestamp: now,
            }
        }
        (Some(_), None) => {
            error!(node = %node_name, "Ready condition was removed from node status");
            NodeStatusEntry {
                status: node_status,
                probe_timestamp: now,
                ready_transition_timestamp: now,
            }
        }
        (Some(saved_cond), Some(observed_cond))
            if saved_cond.last_heartbeat_time != observed_cond.last_heartbeat_time =>
        {
            let ready_transition_timestamp =
                if saved_cond.last_transition_time != observed_cond.last_transition_time {
                    debug!(
                        node = %node_name,
                        from = %saved_cond.status,
                        to = %observed_cond.status,
                        "Ready condition transitioned"
                    );
                    now
                } else {
                    saved.ready_transition_timestamp
                };
            NodeStatusEntry {
                status: node_status,
                probe_timestamp: now,
                ready_transition_timestamp,
            }
        }
        // Heartbeat unchanged (or still no condition at all): leave the
        // entry as it is so that staleness keeps accruing.
        _ => saved.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn ready_condition(status: &str, heartbeat: DateTime<Utc>, transition: DateTime<Utc>) -> NodeCondition {
        NodeCondition {
            type_: NODE_READY.to_string(),
            status: status.to_string(),
            last_heartbeat_time: Some(Time(heartbeat)),
            last_transition_time: Some(Time(transition)),
            ..Default::default()
        }
    }

    fn node_with_status(conditions: Vec<NodeCondition>) -> Node {
        Node {
            metadata: kube::api::ObjectMeta {
                name: Some("n1".to_string()),
                ..Default::default()
            },
            status: Some(NodeStatus {
                conditions: Some(conditions),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn entry(status: &NodeStatus, probe: DateTime<Utc>, transition: DateTime<Utc>) -> NodeStatusEntry {
        NodeStatusEntry {
            status: status.clone(),
            probe_timestamp: probe,
            ready_transition_timestamp: transition,
        }
    }

    #[test]
    fn absent_entry_starts_clocks_at_now() {
        let now = Utc::now();
        let node = node_with_status(vec![ready_condition(CONDITION_TRUE, now, now)]);

        let result = reconcile_saved_status(None, &node, now);
        assert_eq!(result.probe_timestamp, now);
        assert_eq!(result.ready_transition_timestamp, now);
    }

    #[test]
    fn first_real_report_starts_clocks_at_now() {
        let created = Utc::now() - TimeDelta::minutes(10);
        let now = Utc::now();
        // Saved snapshot has no Ready condition; the node reports one now
        let saved = entry(&NodeStatus::default(), created, created);
        let node = node_with_status(vec![ready_condition(CONDITION_TRUE, now, now)]);

        let result = reconcile_saved_status(Some(&saved), &node, now);
        assert_eq!(result.probe_timestamp, now);
        assert_eq!(result.ready_transition_timestamp, now);
    }

    #[test]
    fn removed_condition_resets_clocks() {
        let earlier = Utc::now() - TimeDelta::minutes(5);
        let now = Utc::now();
        let saved_node = node_with_status(vec![ready_condition(CONDITION_TRUE, earlier, earlier)]);
        let saved = entry(saved_node.status.as_ref().unwrap(), earlier, earlier);
        let node = node_with_status(vec![]);

        let result = reconcile_saved_status(Some(&saved), &node, now);
        assert_eq!(result.probe_timestamp, now);
        assert_eq!(result.ready_transition_timestamp, now);
        assert!(get_node_condition(Some(&result.status), NODE_READY).is_none());
    }

    #[test]
    fn unchanged_heartbeat_leaves_entry_alone() {
        let heartbeat = Utc::now() - TimeDelta::minutes(2);
        let probe = Utc::now() - TimeDelta::minutes(1);
        let now = Utc::now();
        let node = node_with_status(vec![ready_condition(CONDITION_TRUE, heartbeat, heartbeat)]);
        let saved = entry(node.status.as_ref().unwrap(), probe, probe);

        let result = reconcile_saved_status(Some(&saved), &node, now);
        assert_eq!(result.probe_timestamp, probe);
        assert_eq!(result.ready_transition_timestamp, probe);
    }

    #[test]
    fn new_heartbeat_same_transition_advances_probe_only() {
        let old_heartbeat = Utc::now() - TimeDelta::minutes(2);
        let transition = Utc::now() - TimeDelta::minutes(30);
        let old_probe = Utc::now() - TimeDelta::minutes(1);
        let old_ready_transition = Utc::now() - TimeDelta::minutes(29);
        let now = Utc::now();

        let saved_node =
            node_with_status(vec![ready_condition(CONDITION_TRUE, old_heartbeat, transition)]);
        let saved = entry(saved_node.status.as_ref().unwrap(), old_probe, old_ready_transition);
        // Fresh heartbeat, same transition time: node alive and steady
        let node = node_with_status(vec![ready_condition(CONDITION_TRUE, now, transition)]);

        let result = reconcile_saved_status(Some(&saved), &node, now);
        assert_eq!(result.probe_timestamp, now);
        assert_eq!(result.ready_transition_timestamp, old_ready_transition);
    }

    #[test]
    fn flipped_condition_advances_both_timestamps() {
        let old_heartbeat = Utc::now() - TimeDelta::minutes(2);
        let old_transition = Utc::now() - TimeDelta::minutes(30);
        let old_probe = Utc::now() - TimeDelta::minutes(1);
        let now = Utc::now();

        let saved_node = node_with_status(vec![ready_condition(
            CONDITION_TRUE,
            old_heartbeat,
            old_transition,
        )]);
        let saved = entry(saved_node.status.as_ref().unwrap(), old_probe, old_probe);
        // Both heartbeat and transition moved: the Ready value flipped
        let node = node_with_status(vec![ready_condition(CONDITION_FALSE, now, now)]);

        let result = reconcile_saved_status(Some(&saved), &node, now);
        assert_eq!(result.probe_timestamp, now);
        assert_eq!(result.ready_transition_timestamp, now);
        let cond = get_node_condition(Some(&result.status), NODE_READY).unwrap();
        assert_eq!(cond.status, CONDITION_FALSE);
    }

    #[test]
    fn both_missing_conditions_leave_entry_alone() {
        let created = Utc::now() - TimeDelta::minutes(10);
        let now = Utc::now();
        let saved = entry(&NodeStatus::default(), created, created);
        let node = node_with_status(vec![]);

        let result = reconcile_saved_status(Some(&saved), &node, now);
        assert_eq!(result.probe_timestamp, created);
        assert_eq!(result.ready_transition_timestamp, created);
    }

    #[test]
    fn get_node_condition_finds_by_kind() {
        let now = Utc::now();
        let node = node_with_status(vec![
            NodeCondition {
                type_: NODE_OUT_OF_DISK.to_string(),
                status: CONDITION_FALSE.to_string(),
                ..Default::default()
            },
            ready_condition(CONDITION_TRUE, now, now),
        ]);

        let cond = get_node_condition(node.status.as_ref(), NODE_READY).unwrap();
        assert_eq!(cond.type_, NODE_READY);
        assert!(get_node_condition(node.status.as_ref(), "MemoryPressure").is_none());
        assert!(get_node_condition(None, NODE_READY).is_none());
    }
}
