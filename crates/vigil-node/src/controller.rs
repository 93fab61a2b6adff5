//! The node health controller.
//!
//! One monitor tick does, in order: reconcile the known-node set against the
//! fresh list, update each node's status bookkeeping (marking silent nodes
//! Unknown), decide evictions, report not-ready transitions, and sweep the
//! zone states. Everything the tick and the queue drains share sits behind a
//! single coarse lock - contention is negligible at these periods, and a
//! single lock keeps the tick's three sub-phases ordered without any chance
//! of lock-order bugs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, TimeDelta, Utc};
use futures::FutureExt;
use k8s_openapi::api::core::v1::{Node, NodeCondition, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::runtime::events::EventType;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use vigil_common::events::{actions, node_reference, reasons};
use vigil_common::{EventPublisher, Result};

use crate::api::{ClusterApi, DaemonSetCache, NodeCache, PodCache};
use crate::clock::{chrono_delta, Clock, SystemClock};
use crate::cloud::CloudProvider;
use crate::config::NodeHealthConfig;
use crate::eviction::{
    cleanup_orphaned_pods, delete_pods_on_node, force_delete_node_and_pods,
    handle_terminating_pod, mark_pods_not_ready, terminate_pods_on_node,
};
use crate::queue::{RateLimitedTimedQueue, TokenBucket};
use crate::status::{
    get_node_condition, reconcile_saved_status, NodeStatusEntry, CONDITION_FALSE,
    CONDITION_TRUE, CONDITION_UNKNOWN, NODE_OUT_OF_DISK, NODE_READY,
};
use crate::zone::{compute_zone_state, is_control_plane, zone_key, ZoneState};

/// Burst for the per-zone eviction rate limiters.
const EVICTION_RATE_LIMITER_BURST: u32 = 1;

fn node_name(node: &Node) -> &str {
    node.metadata.name.as_deref().unwrap_or_default()
}

/// Everything guarded by the evictor lock.
#[derive(Default)]
struct EvictorState {
    known_nodes: HashMap<String, Node>,
    node_status_map: HashMap<String, NodeStatusEntry>,
    zone_pod_evictor: HashMap<String, RateLimitedTimedQueue>,
    zone_termination_evictor: HashMap<String, RateLimitedTimedQueue>,
    zone_states: HashMap<String, ZoneState>,
}

impl EvictorState {
    /// Make sure the zone has both eviction queues and a state entry.
    fn ensure_zone(&mut self, zone: &str, qps: f32, now: DateTime<Utc>) {
        self.zone_pod_evictor
            .entry(zone.to_string())
            .or_insert_with(|| {
                RateLimitedTimedQueue::new(TokenBucket::new(qps, EVICTION_RATE_LIMITER_BURST, now))
            });
        self.zone_termination_evictor
            .entry(zone.to_string())
            .or_insert_with(|| {
                RateLimitedTimedQueue::new(TokenBucket::new(qps, EVICTION_RATE_LIMITER_BURST, now))
            });
        self.zone_states.entry(zone.to_string()).or_default();
    }

    /// Queue a node for pod eviction. Returns false when the node is
    /// already queued, when its own zone is fully segmented, or when every
    /// known zone is fully segmented - a partition is never a reason to
    /// evict anything. The two gates close different race windows: the
    /// per-zone gate covers a zone known to be partitioned, the global one
    /// covers a new zone appearing mid-tick before it has a state entry.
    fn evict(&mut self, node: &Node, now: DateTime<Utc>) -> bool {
        let any_zone_healthy = self
            .zone_states
            .values()
            .any(|s| *s != ZoneState::FullSegmentation);
        if !any_zone_healthy {
            return false;
        }
        let zone = zone_key(node);
        if self.zone_states.get(&zone).copied().unwrap_or_default()
            == ZoneState::FullSegmentation
        {
            return false;
        }
        match self.zone_pod_evictor.get_mut(&zone) {
            Some(queue) => queue.add(node_name(node), now),
            None => {
                warn!(node = %node_name(node), zone = %zone, "No eviction queue for zone");
                false
            }
        }
    }

    /// Drop a node from both of its zone's queues. Returns true if it was
    /// queued in either.
    fn cancel_eviction(&mut self, node: &Node) -> bool {
        let zone = zone_key(node);
        let name = node_name(node);
        let was_deleting = self
            .zone_pod_evictor
            .get_mut(&zone)
            .is_some_and(|q| q.remove(name));
        let was_terminating = self
            .zone_termination_evictor
            .get_mut(&zone)
            .is_some_and(|q| q.remove(name));
        was_deleting || was_terminating
    }
}

/// The controller. See the crate docs for the overall picture.
pub struct NodeHealthController {
    api: Arc<dyn ClusterApi>,
    node_cache: Arc<dyn NodeCache>,
    pod_cache: Arc<dyn PodCache>,
    daemon_set_cache: Arc<dyn DaemonSetCache>,
    cloud: Option<Arc<dyn CloudProvider>>,
    recorder: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    config: NodeHealthConfig,
    state: Mutex<EvictorState>,
}

impl NodeHealthController {
    /// Create a controller over the given cluster seams.
    ///
    /// Fails if the configuration is inconsistent.
    pub fn new(
        api: Arc<dyn ClusterApi>,
        node_cache: Arc<dyn NodeCache>,
        pod_cache: Arc<dyn PodCache>,
        daemon_set_cache: Arc<dyn DaemonSetCache>,
        recorder: Arc<dyn EventPublisher>,
        config: NodeHealthConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            api,
            node_cache,
            pod_cache,
            daemon_set_cache,
            cloud: None,
            recorder,
            clock: Arc::new(SystemClock),
            config,
            state: Mutex::new(EvictorState::default()),
        })
    }

    /// Attach a cloud provider; without one the instance-existence check is
    /// skipped.
    pub fn with_cloud_provider(mut self, cloud: Arc<dyn CloudProvider>) -> Self {
        self.cloud = Some(cloud);
        self
    }

    /// Replace the clock (tests drive a fake one).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Controller configuration.
    pub fn config(&self) -> &NodeHealthConfig {
        &self.config
    }

    /// One monitor tick.
    ///
    /// Verifies that node statuses are being posted by the node agents and
    /// marks silent nodes Unknown; queues pod evictions for nodes that have
    /// been bad for longer than the eviction timeout; applies the zone
    /// segmentation safeguards.
    pub async fn monitor_node_status(&self) -> Result<()> {
        let nodes = self.api.list_nodes().await?;
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        // (1) Reconcile the known-node set.
        let added: Vec<Node> = nodes
            .iter()
            .filter(|n| !state.known_nodes.contains_key(node_name(n)))
            .cloned()
            .collect();
        let listed: HashSet<&str> = nodes.iter().map(node_name).collect();
        let deleted: Vec<Node> = state
            .known_nodes
            .values()
            .filter(|n| !listed.contains(node_name(n)))
            .cloned()
            .collect();

        for node in added {
            let name = node_name(&node).to_string();
            info!(node = %name, "Observed a new node");
            self.recorder
                .publish(
                    &node_reference(&name),
                    EventType::Normal,
                    reasons::REGISTERED_NODE,
                    actions::REGISTER,
                    Some(format!("Registered node {} in the node controller", name)),
                )
                .await;
            let zone = zone_key(&node);
            state.ensure_zone(&zone, self.config.eviction_limiter_qps, self.clock.now());
            // Idempotent: a new node has no pending eviction, but a
            // re-registered name might
            state.cancel_eviction(&node);
            state.known_nodes.insert(name, node);
        }

        for node in deleted {
            let name = node_name(&node).to_string();
            info!(node = %name, "Observed a node deletion");
            self.recorder
                .publish(
                    &node_reference(&name),
                    EventType::Normal,
                    reasons::REMOVING_NODE,
                    actions::REGISTER,
                    Some(format!("Removing node {} from the node controller", name)),
                )
                .await;
            state.evict(&node, self.clock.now());
            state.known_nodes.remove(&name);
            state.node_status_map.remove(&name);
        }

        // (2)-(4) Per-node status update, eviction decision, transition
        // reporting.
        let mut zone_to_conditions: HashMap<String, Vec<Option<NodeCondition>>> = HashMap::new();
        'nodes: for listed_node in &nodes {
            let mut node = listed_node.clone();
            let name = node_name(&node).to_string();

            let mut outcome = self.try_update_node_status(state, &mut node).await;
            if outcome.is_err() {
                for _ in 1..self.config.node_status_update_retry {
                    // The API rejects stale-version writes, so every retry
                    // needs a fresh read.
                    match self.api.get_node(&name).await {
                        Ok(fresh) => node = fresh,
                        Err(e) => {
                            warn!(
                                node = %name,
                                error = %e,
                                "Failed to re-fetch node while retrying a status update, assuming it was deleted"
                            );
                            continue 'nodes;
                        }
                    }
                    outcome = self.try_update_node_status(state, &mut node).await;
                    if outcome.is_ok() {
                        break;
                    }
                }
            }
            let Ok((_grace, observed, current)) = outcome else {
                error!(
                    node = %name,
                    "Node status update exceeded the retry count, skipping - no pods will be evicted"
                );
                continue;
            };

            // Control-plane nodes are not part of the cluster for network
            // segmentation checking.
            if !is_control_plane(&node) {
                zone_to_conditions
                    .entry(zone_key(&node))
                    .or_default()
                    .push(current.clone());
            }

            let Some(current) = current else {
                continue;
            };
            let decision_timestamp = self.clock.now();
            let eviction_timeout = chrono_delta(self.config.pod_eviction_timeout);

            if let Some(entry) = state.node_status_map.get(&name).cloned() {
                if observed.status == CONDITION_FALSE
                    && decision_timestamp > entry.ready_transition_timestamp + eviction_timeout
                    && state.evict(&node, decision_timestamp)
                {
                    debug!(
                        node = %name,
                        not_ready_since = %entry.ready_transition_timestamp,
                        "Evicting pods: node not ready past the eviction timeout"
                    );
                }
                if observed.status == CONDITION_UNKNOWN
                    && decision_timestamp > entry.probe_timestamp + eviction_timeout
                    && state.evict(&node, decision_timestamp)
                {
                    debug!(
                        node = %name,
                        silent_since = %entry.probe_timestamp,
                        "Evicting pods: node unreachable past the eviction timeout"
                    );
                }
                if observed.status == CONDITION_TRUE && state.cancel_eviction(&node) {
                    info!(node = %name, "Node is ready again, cancelled pod eviction");
                }
            }

            // Report the not-ready transition and flag the node's pods.
            if current.status != CONDITION_TRUE && observed.status == CONDITION_TRUE {
                info!(node = %name, "Node became not ready");
                self.recorder
                    .publish(
                        &node_reference(&name),
                        EventType::Normal,
                        reasons::NODE_NOT_READY,
                        actions::MONITOR,
                        Some(format!("Node {} status is now NotReady", name)),
                    )
                    .await;
                if let Err(e) = mark_pods_not_ready(self.api.as_ref(), &name).await {
                    warn!(node = %name, error = %e, "Unable to mark all pods not ready on node");
                }
            }

            // If the machine itself is gone there is nothing to wait for.
            if current.status != CONDITION_TRUE {
                if let Some(cloud) = &self.cloud {
                    let exists = match cloud.instance_exists(&name).await {
                        Ok(exists) => exists,
                        Err(e) => {
                            warn!(node = %name, error = %e, "Error determining if node exists in cloud provider");
                            continue;
                        }
                    };
                    if !exists {
                        info!(node = %name, "Deleting node: no longer present in cloud provider");
                        self.recorder
                            .publish(
                                &node_reference(&name),
                                EventType::Normal,
                                reasons::DELETING_NODE,
                                actions::DELETE,
                                Some(format!(
                                    "Deleting node {} because it's not present according to the cloud provider",
                                    name
                                )),
                            )
                            .await;
                        // Detached: node deletion must not stall the tick,
                        // and must not hold the evictor lock. Best-effort -
                        // the next tick re-evaluates.
                        let api = self.api.clone();
                        tokio::spawn(async move {
                            let deletion = std::panic::AssertUnwindSafe(
                                force_delete_node_and_pods(api.as_ref(), &name),
                            )
                            .catch_unwind()
                            .await;
                            match deletion {
                                Ok(Ok(())) => {}
                                Ok(Err(e)) => {
                                    error!(node = %name, error = %e, "Unable to force delete node")
                                }
                                Err(_) => {
                                    error!(node = %name, "Force delete of node crashed")
                                }
                            }
                        });
                        continue;
                    }
                }
            }
        }

        // (5) Zone-state sweep.
        for (zone, conditions) in &zone_to_conditions {
            let new_state = compute_zone_state(conditions);
            let old_state = state.zone_states.get(zone).copied().unwrap_or_default();
            if new_state == old_state {
                continue;
            }
            match new_state {
                ZoneState::FullSegmentation => {
                    info!(zone = %zone, "Entering network segmentation mode in zone")
                }
                ZoneState::Normal => {
                    info!(zone = %zone, "Exited network segmentation mode in zone")
                }
                ZoneState::PartialSegmentation => {}
            }
            for node in &nodes {
                if zone_key(node) != *zone {
                    continue;
                }
                if new_state == ZoneState::FullSegmentation {
                    // Fully segmented: stop the eviction altogether.
                    state.cancel_eviction(node);
                }
                if new_state == ZoneState::Normal && old_state == ZoneState::FullSegmentation {
                    // Exiting segmentation: grant every node a fresh grace
                    // window, otherwise recovery would instantly evict
                    // nodes whose last observation is now ancient.
                    let now = self.clock.now();
                    if let Some(entry) = state.node_status_map.get_mut(node_name(node)) {
                        entry.probe_timestamp = now;
                        entry.ready_transition_timestamp = now;
                    }
                }
            }
            state.zone_states.insert(zone.clone(), new_state);
        }

        Ok(())
    }

    /// Check a node's conditions and bring our bookkeeping - and, when the
    /// node has gone silent past its grace period, the node object itself -
    /// up to date.
    ///
    /// Returns the grace period the node is entitled to, the observed Ready
    /// condition, and the node's current Ready condition (None if the node
    /// has never reported one).
    async fn try_update_node_status(
        &self,
        state: &mut EvictorState,
        node: &mut Node,
    ) -> Result<(TimeDelta, NodeCondition, Option<NodeCondition>)> {
        let name = node_name(node).to_string();
        let creation = node
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| t.0)
            .unwrap_or_else(|| self.clock.now());
        let current = get_node_condition(node.status.as_ref(), NODE_READY).cloned();

        let (observed, grace_period) = match &current {
            None => {
                // The node agent never posted a status. Synthesize an
                // Unknown observation anchored at the creation timestamp so
                // the startup grace is measured from node birth.
                let observed = NodeCondition {
                    type_: NODE_READY.to_string(),
                    status: CONDITION_UNKNOWN.to_string(),
                    last_heartbeat_time: Some(Time(creation)),
                    last_transition_time: Some(Time(creation)),
                    ..Default::default()
                };
                state.node_status_map.insert(
                    name.clone(),
                    NodeStatusEntry {
                        status: node.status.clone().unwrap_or_default(),
                        probe_timestamp: creation,
                        ready_transition_timestamp: creation,
                    },
                );
                (
                    observed,
                    chrono_delta(self.config.node_startup_grace_period),
                )
            }
            Some(condition) => (
                condition.clone(),
                chrono_delta(self.config.node_monitor_grace_period),
            ),
        };

        let entry = reconcile_saved_status(
            state.node_status_map.get(&name),
            node,
            self.clock.now(),
        );
        state.node_status_map.insert(name.clone(), entry.clone());

        if self.clock.now() > entry.probe_timestamp + grace_period {
            // The Ready condition was last probed longer ago than the grace
            // period: overwrite it (and OutOfDisk) to Unknown in the
            // cluster, regardless of its current value.
            self.overwrite_stale_conditions(node, &observed, current.is_none(), creation);

            let current_after = get_node_condition(node.status.as_ref(), NODE_READY);
            if current_after != Some(&observed) {
                if let Err(e) = self.api.update_node_status(node).await {
                    warn!(node = %name, error = %e, "Error updating node status");
                    return Err(e);
                }
                state.node_status_map.insert(
                    name.clone(),
                    NodeStatusEntry {
                        status: node.status.clone().unwrap_or_default(),
                        probe_timestamp: entry.probe_timestamp,
                        ready_transition_timestamp: self.clock.now(),
                    },
                );
            }
        }

        let current_ready = if current.is_some() {
            get_node_condition(node.status.as_ref(), NODE_READY).cloned()
        } else {
            None
        };
        Ok((grace_period, observed, current_ready))
    }

    /// Rewrite the node's Ready and OutOfDisk conditions to Unknown after
    /// its agent went silent.
    fn overwrite_stale_conditions(
        &self,
        node: &mut Node,
        observed: &NodeCondition,
        never_reported: bool,
        creation: DateTime<Utc>,
    ) {
        let name = node_name(node).to_string();
        let now = self.clock.now();
        let status = node.status.get_or_insert_with(Default::default);
        let conditions = status.conditions.get_or_insert_with(Vec::new);

        if never_reported {
            debug!(node = %name, "Node was never updated by its agent");
            conditions.push(NodeCondition {
                type_: NODE_READY.to_string(),
                status: CONDITION_UNKNOWN.to_string(),
                reason: Some("NodeStatusNeverUpdated".to_string()),
                message: Some("Node agent never posted node status.".to_string()),
                last_heartbeat_time: Some(Time(creation)),
                last_transition_time: Some(Time(now)),
            });
        } else if observed.status != CONDITION_UNKNOWN {
            debug!(node = %name, "Node has not been updated within its grace period");
            if let Some(ready) = conditions.iter_mut().find(|c| c.type_ == NODE_READY) {
                ready.status = CONDITION_UNKNOWN.to_string();
                ready.reason = Some("NodeStatusUnknown".to_string());
                ready.message = Some("Node agent stopped posting node status.".to_string());
                // The heartbeat stays at the last time we heard from the
                // agent; only the transition is ours.
                ready.last_heartbeat_time = observed.last_heartbeat_time.clone();
                ready.last_transition_time = Some(Time(now));
            }
        }

        match conditions.iter_mut().find(|c| c.type_ == NODE_OUT_OF_DISK) {
            None => {
                conditions.push(NodeCondition {
                    type_: NODE_OUT_OF_DISK.to_string(),
                    status: CONDITION_UNKNOWN.to_string(),
                    reason: Some("NodeStatusNeverUpdated".to_string()),
                    message: Some("Node agent never posted node status.".to_string()),
                    last_heartbeat_time: Some(Time(creation)),
                    last_transition_time: Some(Time(now)),
                });
            }
            Some(ood) if ood.status != CONDITION_UNKNOWN => {
                ood.status = CONDITION_UNKNOWN.to_string();
                ood.reason = Some("NodeStatusUnknown".to_string());
                ood.message = Some("Node agent stopped posting node status.".to_string());
                ood.last_transition_time = Some(Time(now));
            }
            Some(_) => {}
        }
    }

    /// Queue a node's pods for eviction.
    ///
    /// No-op returning false when every known zone is fully segmented (the
    /// global partition safeguard) or the node is already queued.
    pub async fn evict_pods(&self, node: &Node) -> bool {
        let mut state = self.state.lock().await;
        state.evict(node, self.clock.now())
    }

    /// Remove a node from both eviction queues, typically because it is
    /// available again. Returns true if an eviction was queued.
    pub async fn cancel_pod_eviction(&self, node: &Node) -> bool {
        let mut state = self.state.lock().await;
        let cancelled = state.cancel_eviction(node);
        if cancelled {
            info!(node = %node_name(node), "Cancelling pod eviction");
        }
        cancelled
    }

    /// Drain every zone's delete queue once (the delete worker).
    pub async fn drain_pod_evictions(&self) {
        let daemon_sets = self.daemon_set_cache.daemon_sets();
        let mut guard = self.state.lock().await;
        let EvictorState {
            zone_pod_evictor,
            zone_termination_evictor,
            ..
        } = &mut *guard;

        for (zone, queue) in zone_pod_evictor.iter_mut() {
            let (tx, mut rx) = mpsc::unbounded_channel();
            {
                let api = self.api.clone();
                let recorder = self.recorder.clone();
                let daemon_sets = daemon_sets.clone();
                queue
                    .try_process(&*self.clock, move |entry| {
                        let api = api.clone();
                        let recorder = recorder.clone();
                        let daemon_sets = daemon_sets.clone();
                        let tx = tx.clone();
                        async move {
                            match delete_pods_on_node(
                                api.as_ref(),
                                recorder.as_ref(),
                                &daemon_sets,
                                &entry.node_name,
                            )
                            .await
                            {
                                Ok(remaining) => {
                                    if remaining {
                                        let _ = tx.send(entry.node_name.clone());
                                    }
                                    (true, StdDuration::ZERO)
                                }
                                Err(e) => {
                                    warn!(node = %entry.node_name, error = %e, "Unable to evict node");
                                    (false, StdDuration::ZERO)
                                }
                            }
                        }
                    })
                    .await;
            }
            // Nodes that still had pods move on to the termination watcher.
            while let Ok(name) = rx.try_recv() {
                if let Some(termination_queue) = zone_termination_evictor.get_mut(zone) {
                    termination_queue.add(&name, self.clock.now());
                }
            }
        }
    }

    /// Drain every zone's termination queue once (the termination worker).
    pub async fn drain_pod_terminations(&self) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        for queue in state.zone_termination_evictor.values_mut() {
            let api = self.api.clone();
            let recorder = self.recorder.clone();
            let clock = self.clock.clone();
            let maximum_grace = self.config.maximum_grace_period;
            let eviction_period = self.config.node_eviction_period;
            queue
                .try_process(&*self.clock, move |entry| {
                    let api = api.clone();
                    let recorder = recorder.clone();
                    let clock = clock.clone();
                    async move {
                        match terminate_pods_on_node(
                            api.as_ref(),
                            recorder.as_ref(),
                            &entry.node_name,
                            maximum_grace,
                            clock.now(),
                        )
                        .await
                        {
                            Ok((true, _)) => {
                                info!(node = %entry.node_name, "All pods terminated");
                                recorder
                                    .publish(
                                        &node_reference(&entry.node_name),
                                        EventType::Normal,
                                        reasons::TERMINATED_ALL_PODS,
                                        actions::TERMINATE,
                                        Some(format!(
                                            "Terminated all pods on node {}",
                                            entry.node_name
                                        )),
                                    )
                                    .await;
                                (true, StdDuration::ZERO)
                            }
                            Ok((false, mut remaining)) => {
                                debug!(
                                    node = %entry.node_name,
                                    terminating_since = %entry.added_at,
                                    estimated = ?remaining,
                                    "Pods still terminating on node"
                                );
                                // clamp very short intervals
                                if remaining < eviction_period {
                                    remaining = eviction_period;
                                }
                                (false, remaining)
                            }
                            Err(e) => {
                                warn!(node = %entry.node_name, error = %e, "Unable to terminate pods on node");
                                (false, StdDuration::ZERO)
                            }
                        }
                    }
                })
                .await;
        }
    }

    /// Force-delete cached pods whose node is gone (the orphan sweeper).
    pub async fn sweep_orphaned_pods(&self) {
        let pods = self.pod_cache.pods();
        cleanup_orphaned_pods(self.api.as_ref(), self.node_cache.as_ref(), &pods).await;
    }

    /// Workload-cache add/update handler: force-deletes terminating pods
    /// whose node has been removed (or that were never scheduled).
    pub async fn handle_pod_event(&self, pod: &Pod) {
        handle_terminating_pod(self.api.as_ref(), self.node_cache.as_ref(), pod).await;
    }

    /// Current state of a zone; absent zones are Normal.
    pub async fn zone_state(&self, zone: &str) -> ZoneState {
        let state = self.state.lock().await;
        state.zone_states.get(zone).copied().unwrap_or_default()
    }

    /// Names currently tracked in the known-node set.
    pub async fn known_node_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut names: Vec<String> = state.known_nodes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Status bookkeeping for one node, if tracked.
    pub async fn status_entry(&self, name: &str) -> Option<NodeStatusEntry> {
        let state = self.state.lock().await;
        state.node_status_map.get(name).cloned()
    }

    /// Nodes queued in a zone's delete queue, FIFO.
    pub async fn queued_pod_evictions(&self, zone: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .zone_pod_evictor
            .get(zone)
            .map(|q| q.node_names())
            .unwrap_or_default()
    }

    /// Nodes queued in a zone's termination queue, FIFO.
    pub async fn queued_pod_terminations(&self, zone: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .zone_termination_evictor
            .get(zone)
            .map(|q| q.node_names())
            .unwrap_or_default()
    }
}
