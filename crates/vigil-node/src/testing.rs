//! In-memory test doubles for the cluster API seams.
//!
//! [`FakeCluster`] plays the role of the API server and all three caches at
//! once: graceful pod deletion marks the pod terminating the way the real
//! API server would, force deletion removes it, and every mutating call is
//! recorded so tests can assert on exactly what the controller did.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{Node, NodeCondition, NodeStatus, ObjectReference, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::runtime::events::EventType;

use vigil_common::{Error, EventPublisher, Result};

use crate::api::{ClusterApi, DaemonSetCache, NodeCache, PodCache};
use crate::clock::{Clock, SystemClock};
use crate::cloud::CloudProvider;
use crate::status::NODE_READY;
use crate::zone::{LABEL_TOPOLOGY_REGION, LABEL_TOPOLOGY_ZONE};

const FAKE_DEFAULT_GRACE: i64 = 30;

#[derive(Default)]
struct FakeState {
    nodes: Vec<Node>,
    pods: Vec<Pod>,
    daemon_sets: Vec<DaemonSet>,
    deleted_pods: Vec<String>,
    force_deleted_pods: Vec<String>,
    deleted_nodes: Vec<String>,
    node_status_updates: Vec<Node>,
    pod_status_updates: Vec<Pod>,
    node_status_update_failures: usize,
}

/// In-memory cluster implementing [`ClusterApi`] and the cache traits.
pub struct FakeCluster {
    clock: Arc<dyn Clock>,
    state: Mutex<FakeState>,
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCluster {
    /// Fake cluster stamping deletions with the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Fake cluster sharing a clock with the controller under test.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(FakeState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Insert a node.
    pub fn add_node(&self, node: Node) {
        self.lock().nodes.push(node);
    }

    /// Replace a node wholesale (matched by name).
    pub fn set_node(&self, node: Node) {
        let mut state = self.lock();
        if let Some(existing) = state
            .nodes
            .iter_mut()
            .find(|n| n.metadata.name == node.metadata.name)
        {
            *existing = node;
        } else {
            state.nodes.push(node);
        }
    }

    /// Remove a node from the cluster (as if deleted externally).
    pub fn remove_node(&self, name: &str) {
        self.lock()
            .nodes
            .retain(|n| n.metadata.name.as_deref() != Some(name));
    }

    /// Fetch a node snapshot by name.
    pub fn node(&self, name: &str) -> Option<Node> {
        self.lock()
            .nodes
            .iter()
            .find(|n| n.metadata.name.as_deref() == Some(name))
            .cloned()
    }

    /// Insert a pod.
    pub fn add_pod(&self, pod: Pod) {
        self.lock().pods.push(pod);
    }

    /// Insert a daemon set.
    pub fn add_daemon_set(&self, ds: DaemonSet) {
        self.lock().daemon_sets.push(ds);
    }

    /// Snapshot of the current pods.
    pub fn pods_snapshot(&self) -> Vec<Pod> {
        self.lock().pods.clone()
    }

    /// Names ("namespace/name") of pods deleted gracefully, in order.
    pub fn deleted_pods(&self) -> Vec<String> {
        self.lock().deleted_pods.clone()
    }

    /// Names of pods force-deleted, in order.
    pub fn force_deleted_pods(&self) -> Vec<String> {
        self.lock().force_deleted_pods.clone()
    }

    /// Names of nodes deleted, in order.
    pub fn deleted_nodes(&self) -> Vec<String> {
        self.lock().deleted_nodes.clone()
    }

    /// Every node status update pushed, in order.
    pub fn node_status_updates(&self) -> Vec<Node> {
        self.lock().node_status_updates.clone()
    }

    /// Every pod status update pushed, in order.
    pub fn pod_status_updates(&self) -> Vec<Pod> {
        self.lock().pod_status_updates.clone()
    }

    /// Make the next `n` node status updates fail, to exercise the
    /// monitor's retry-with-refetch path.
    pub fn fail_next_node_status_updates(&self, n: usize) {
        self.lock().node_status_update_failures = n;
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.lock().nodes.clone())
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        self.node(name)
            .ok_or_else(|| Error::internal_with_context("fake", format!("node {} not found", name)))
    }

    async fn update_node_status(&self, node: &Node) -> Result<Node> {
        let mut state = self.lock();
        if state.node_status_update_failures > 0 {
            state.node_status_update_failures -= 1;
            return Err(Error::internal_with_context("fake", "injected status update failure"));
        }
        let existing = state
            .nodes
            .iter_mut()
            .find(|n| n.metadata.name == node.metadata.name)
            .ok_or_else(|| Error::internal_with_context("fake", "node not found"))?;
        existing.status = node.status.clone();
        let updated = existing.clone();
        state.node_status_updates.push(updated.clone());
        Ok(updated)
    }

    async fn delete_node(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        state
            .nodes
            .retain(|n| n.metadata.name.as_deref() != Some(name));
        state.deleted_nodes.push(name.to_string());
        Ok(())
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>> {
        Ok(self
            .lock()
            .pods
            .iter()
            .filter(|p| {
                p.spec.as_ref().and_then(|s| s.node_name.as_deref()) == Some(node_name)
            })
            .cloned()
            .collect())
    }

    async fn delete_pod(&self, pod: &Pod) -> Result<()> {
        let key = pod_key(pod);
        let now = self.clock.now();
        let mut state = self.lock();
        state.deleted_pods.push(key.clone());
        if let Some(stored) = state.pods.iter_mut().find(|p| pod_key(p) == key) {
            let grace = stored
                .spec
                .as_ref()
                .and_then(|s| s.termination_grace_period_seconds)
                .unwrap_or(FAKE_DEFAULT_GRACE);
            if grace <= 0 {
                state.pods.retain(|p| pod_key(p) != key);
            } else {
                // Graceful delete: the pod lingers, marked terminating
                stored.metadata.deletion_timestamp = Some(Time(now));
                stored.metadata.deletion_grace_period_seconds = Some(grace);
            }
        }
        Ok(())
    }

    async fn force_delete_pod(&self, pod: &Pod) -> Result<()> {
        let key = pod_key(pod);
        let mut state = self.lock();
        state.force_deleted_pods.push(key.clone());
        state.pods.retain(|p| pod_key(p) != key);
        Ok(())
    }

    async fn update_pod_status(&self, pod: &Pod) -> Result<Pod> {
        let key = pod_key(pod);
        let mut state = self.lock();
        let existing = state
            .pods
            .iter_mut()
            .find(|p| pod_key(p) == key)
            .ok_or_else(|| Error::internal_with_context("fake", "pod not found"))?;
        existing.status = pod.status.clone();
        let updated = existing.clone();
        state.pod_status_updates.push(updated);
        Ok(pod.clone())
    }
}

impl NodeCache for FakeCluster {
    fn contains(&self, name: &str) -> bool {
        self.node(name).is_some()
    }
}

impl PodCache for FakeCluster {
    fn pods(&self) -> Vec<Pod> {
        self.pods_snapshot()
    }
}

impl DaemonSetCache for FakeCluster {
    fn daemon_sets(&self) -> Vec<DaemonSet> {
        self.lock().daemon_sets.clone()
    }
}

fn pod_key(pod: &Pod) -> String {
    format!(
        "{}/{}",
        pod.metadata.namespace.as_deref().unwrap_or("default"),
        pod.metadata.name.as_deref().unwrap_or_default(),
    )
}

/// Cloud provider double with a fixed per-node answer.
#[derive(Default)]
pub struct FakeCloudProvider {
    missing: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

impl FakeCloudProvider {
    /// Provider that reports every instance as existing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a node's instance as gone.
    pub fn set_instance_missing(&self, node_name: &str) {
        self.missing.lock().unwrap().push(node_name.to_string());
    }

    /// Make lookups for a node fail.
    pub fn set_instance_erroring(&self, node_name: &str) {
        self.errors.lock().unwrap().push(node_name.to_string());
    }
}

#[async_trait]
impl CloudProvider for FakeCloudProvider {
    async fn instance_exists(&self, node_name: &str) -> Result<bool> {
        if self.errors.lock().unwrap().iter().any(|n| n == node_name) {
            return Err(Error::cloud_provider(node_name, "injected lookup failure"));
        }
        Ok(!self.missing.lock().unwrap().iter().any(|n| n == node_name))
    }
}

/// Event publisher that records every published event.
#[derive(Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<(String, String)>>,
}

impl RecordingEventPublisher {
    /// Fresh recorder with no events.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(reason, object name)` pair published, in order.
    pub fn events(&self) -> Vec<(String, String)> {
        self.events.lock().unwrap().clone()
    }

    /// Whether an event with this reason was published for this object.
    pub fn has(&self, reason: &str, object: &str) -> bool {
        self.events
            .lock()
            .unwrap()
            .iter()
            .any(|(r, o)| r == reason && o == object)
    }

    /// How many events with this reason were published.
    pub fn count(&self, reason: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| r == reason)
            .count()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        _type_: EventType,
        reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
        self.events.lock().unwrap().push((
            reason.to_string(),
            resource_ref.name.clone().unwrap_or_default(),
        ));
    }
}

/// A node labeled into `zone`, created and heartbeating at `now`, Ready.
pub fn ready_node(name: &str, zone: &str, now: DateTime<Utc>) -> Node {
    let mut labels = BTreeMap::new();
    if !zone.is_empty() {
        labels.insert(LABEL_TOPOLOGY_REGION.to_string(), "region1".to_string());
        labels.insert(LABEL_TOPOLOGY_ZONE.to_string(), zone.to_string());
    }
    Node {
        metadata: kube::api::ObjectMeta {
            name: Some(name.to_string()),
            labels: (!labels.is_empty()).then_some(labels),
            creation_timestamp: Some(Time(now)),
            ..Default::default()
        },
        status: Some(NodeStatus {
            conditions: Some(vec![ready_condition("True", now, now)]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A Ready condition with the given status and timestamps.
pub fn ready_condition(
    status: &str,
    heartbeat: DateTime<Utc>,
    transition: DateTime<Utc>,
) -> NodeCondition {
    NodeCondition {
        type_: NODE_READY.to_string(),
        status: status.to_string(),
        last_heartbeat_time: Some(Time(heartbeat)),
        last_transition_time: Some(Time(transition)),
        ..Default::default()
    }
}

/// Overwrite a node's Ready condition in place.
pub fn set_ready(node: &mut Node, status: &str, heartbeat: DateTime<Utc>, transition: DateTime<Utc>) {
    let status_obj = node.status.get_or_insert_with(NodeStatus::default);
    let conditions = status_obj.conditions.get_or_insert_with(Vec::new);
    conditions.retain(|c| c.type_ != NODE_READY);
    conditions.push(ready_condition(status, heartbeat, transition));
}

/// A pod bound to `node_name`.
pub fn pod_on_node(name: &str, namespace: &str, node_name: &str) -> Pod {
    Pod {
        metadata: kube::api::ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(k8s_openapi::api::core::v1::PodSpec {
            node_name: Some(node_name.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}
