//! Pod eviction primitives.
//!
//! The bodies of the two queue workers (delete, then terminate), plus the
//! orphan policies that clean up pods whose node has vanished. All of them
//! speak to the cluster through the [`ClusterApi`] seam so the controller
//! can be exercised against an in-memory cluster in tests.

use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::runtime::events::EventType;
use tracing::{debug, info, warn};

use vigil_common::events::{actions, node_reference, pod_reference, reasons};
use vigil_common::{Error, EventPublisher, Result};

use crate::api::{ClusterApi, NodeCache};
use crate::clock::chrono_delta;
use crate::status::{CONDITION_FALSE, CONDITION_TRUE};

/// Pod condition kind for readiness.
const POD_READY: &str = "Ready";

/// Annotation marking mirror pods, which are managed by the node agent
/// itself and cannot be evicted through the API.
const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

/// Default termination grace when a pod specifies none.
const DEFAULT_GRACE_SECONDS: i64 = 30;

fn pod_display_name(pod: &Pod) -> String {
    format!(
        "{}/{}",
        pod.metadata.namespace.as_deref().unwrap_or("default"),
        pod.metadata.name.as_deref().unwrap_or_default(),
    )
}

fn pod_bound_to(pod: &Pod, node_name: &str) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.node_name.as_deref())
        .is_some_and(|n| n == node_name)
}

fn pod_is_mirror(pod: &Pod) -> bool {
    pod.metadata
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(MIRROR_POD_ANNOTATION))
}

/// Whether a label selector matches the given labels.
///
/// An empty selector matches nothing, mirroring how daemon-set selectors
/// are interpreted: a daemon set without a selector owns no pods.
fn selector_matches(
    selector: &LabelSelector,
    labels: Option<&std::collections::BTreeMap<String, String>>,
) -> bool {
    let match_labels = selector.match_labels.as_ref();
    let match_expressions = selector.match_expressions.as_ref();
    if match_labels.is_none_or(|m| m.is_empty()) && match_expressions.is_none_or(|m| m.is_empty())
    {
        return false;
    }

    let empty = std::collections::BTreeMap::new();
    let labels = labels.unwrap_or(&empty);

    if let Some(required) = match_labels {
        for (key, value) in required {
            if labels.get(key) != Some(value) {
                return false;
            }
        }
    }
    if let Some(expressions) = match_expressions {
        for expr in expressions {
            let value = labels.get(&expr.key);
            let values = expr.values.as_deref().unwrap_or(&[]);
            let matched = match expr.operator.as_str() {
                "In" => value.is_some_and(|v| values.contains(v)),
                "NotIn" => value.is_none_or(|v| !values.contains(v)),
                "Exists" => value.is_some(),
                "DoesNotExist" => value.is_none(),
                _ => false,
            };
            if !matched {
                return false;
            }
        }
    }
    true
}

/// Whether any cached daemon set in the pod's namespace selects this pod.
fn pod_owned_by_daemon_set(pod: &Pod, daemon_sets: &[DaemonSet]) -> bool {
    daemon_sets.iter().any(|ds| {
        ds.metadata.namespace == pod.metadata.namespace
            && ds
                .spec
                .as_ref()
                .is_some_and(|spec| selector_matches(&spec.selector, pod.metadata.labels.as_ref()))
    })
}

/// Delete every evictable pod on a node (the delete-queue worker body).
///
/// Mirror pods, daemon-set-owned pods, and pods already terminating are
/// skipped. Returns true when any pod was deleted with a non-zero grace
/// period, meaning the node still needs a pass through the termination
/// queue. The first deletion error aborts the pass; the queue retries.
pub async fn delete_pods_on_node(
    api: &dyn ClusterApi,
    recorder: &dyn EventPublisher,
    daemon_sets: &[DaemonSet],
    node_name: &str,
) -> Result<bool> {
    let pods = api.list_pods_on_node(node_name).await?;
    let mut remaining = false;

    if !pods.is_empty() {
        recorder
            .publish(
                &node_reference(node_name),
                EventType::Normal,
                reasons::DELETING_ALL_PODS,
                actions::EVICT,
                Some(format!("Deleting all pods from node {}", node_name)),
            )
            .await;
    }

    for pod in &pods {
        if !pod_bound_to(pod, node_name) {
            continue;
        }
        // Already terminating: the termination queue owns it now
        if pod.metadata.deletion_grace_period_seconds.is_some() {
            continue;
        }
        if pod_is_mirror(pod) || pod_owned_by_daemon_set(pod, daemon_sets) {
            continue;
        }

        debug!(pod = %pod_display_name(pod), node = %node_name, "Starting deletion of pod");
        recorder
            .publish(
                &pod_reference(pod),
                EventType::Normal,
                reasons::MARKING_EVICTION,
                actions::EVICT,
                Some(format!(
                    "Marking for deletion pod {} from node {}",
                    pod_display_name(pod),
                    node_name
                )),
            )
            .await;
        api.delete_pod(pod).await?;

        let grace = pod
            .spec
            .as_ref()
            .and_then(|s| s.termination_grace_period_seconds)
            .unwrap_or(DEFAULT_GRACE_SECONDS);
        if grace > 0 {
            remaining = true;
        }
    }
    Ok(remaining)
}

/// Check the terminating pods on a node and force-delete the overdue ones
/// (the termination-queue worker body).
///
/// A pod is overdue once `deletion_timestamp + min(grace, maximum_grace)`
/// has passed. Returns `(complete, next_attempt)`: complete when no
/// terminating pod remains, otherwise the soonest deadline among the
/// stragglers.
pub async fn terminate_pods_on_node(
    api: &dyn ClusterApi,
    recorder: &dyn EventPublisher,
    node_name: &str,
    maximum_grace: Duration,
    now: DateTime<Utc>,
) -> Result<(bool, Duration)> {
    let pods = api.list_pods_on_node(node_name).await?;
    let mut complete = true;
    let mut next_attempt = Duration::ZERO;

    for pod in &pods {
        if !pod_bound_to(pod, node_name) {
            continue;
        }
        // Only terminating pods are this worker's business
        let Some(deleted_at) = pod.metadata.deletion_timestamp.as_ref() else {
            continue;
        };

        let grace_seconds = pod
            .metadata
            .deletion_grace_period_seconds
            .or_else(|| {
                pod.spec
                    .as_ref()
                    .and_then(|s| s.termination_grace_period_seconds)
            })
            .unwrap_or(DEFAULT_GRACE_SECONDS)
            .max(0) as u64;
        let grace = Duration::from_secs(grace_seconds).min(maximum_grace);
        let deadline = deleted_at.0 + chrono_delta(grace);

        if deadline <= now {
            info!(
                pod = %pod_display_name(pod),
                node = %node_name,
                grace = ?grace,
                "Removing pod after its grace period expired"
            );
            recorder
                .publish(
                    &pod_reference(pod),
                    EventType::Normal,
                    reasons::TERMINATING_EVICTED_POD,
                    actions::TERMINATE,
                    Some(format!(
                        "Pod {} exceeded the grace period for deletion after being evicted from node {} and is being force killed",
                        pod_display_name(pod),
                        node_name
                    )),
                )
                .await;
            if let Err(e) = api.force_delete_pod(pod).await {
                warn!(pod = %pod_display_name(pod), error = %e, "Error completing deletion of pod");
                complete = false;
            }
        } else {
            complete = false;
            let remaining = (deadline - now).to_std().unwrap_or(Duration::ZERO);
            if next_attempt.is_zero() || remaining < next_attempt {
                next_attempt = remaining;
            }
        }
    }
    Ok((complete, next_attempt))
}

/// Force-delete pods whose bound node is absent from the node cache.
///
/// Pods with no node binding are left alone - they are the scheduler's
/// business, not ours.
pub async fn cleanup_orphaned_pods(api: &dyn ClusterApi, nodes: &dyn NodeCache, pods: &[Pod]) {
    for pod in pods {
        let node_name = pod.spec.as_ref().and_then(|s| s.node_name.as_deref());
        let Some(node_name) = node_name.filter(|n| !n.is_empty()) else {
            continue;
        };
        if nodes.contains(node_name) {
            continue;
        }
        info!(pod = %pod_display_name(pod), node = %node_name, "Force deleting orphaned pod");
        if let Err(e) = api.force_delete_pod(pod).await {
            warn!(pod = %pod_display_name(pod), error = %e, "Unable to force delete orphaned pod");
        }
    }
}

/// Handle a pod add/update event from the workload cache.
///
/// Terminating pods whose node is gone - or that were never bound to a
/// node - can never finish gracefully, so they are force-deleted on the
/// spot rather than waiting for the next sweep.
pub async fn handle_terminating_pod(api: &dyn ClusterApi, nodes: &dyn NodeCache, pod: &Pod) {
    if pod.metadata.deletion_timestamp.is_none() {
        return;
    }
    let node_name = pod.spec.as_ref().and_then(|s| s.node_name.as_deref());
    match node_name.filter(|n| !n.is_empty()) {
        Some(node_name) if nodes.contains(node_name) => {}
        _ => {
            if let Err(e) = api.force_delete_pod(pod).await {
                warn!(pod = %pod_display_name(pod), error = %e, "Unable to force delete terminating pod");
            }
        }
    }
}

/// Flip the Ready condition of every pod on a node to False.
///
/// Status-only updates; per-pod failures are collected so one stubborn pod
/// does not hide the rest.
pub async fn mark_pods_not_ready(api: &dyn ClusterApi, node_name: &str) -> Result<()> {
    debug!(node = %node_name, "Updating ready status of pods on node");
    let pods = api.list_pods_on_node(node_name).await?;
    let mut failed = Vec::new();

    for mut pod in pods {
        if !pod_bound_to(&pod, node_name) {
            continue;
        }
        let pod_name = pod_display_name(&pod);
        let Some(conditions) = pod
            .status
            .as_mut()
            .and_then(|s| s.conditions.as_mut())
        else {
            continue;
        };
        if let Some(cond) = conditions.iter_mut().find(|c| c.type_ == POD_READY) {
            if cond.status != CONDITION_TRUE {
                continue;
            }
            cond.status = CONDITION_FALSE.to_string();
            debug!(pod = %pod_name, "Updating ready status of pod to false");
            if let Err(e) = api.update_pod_status(&pod).await {
                warn!(pod = %pod_name, error = %e, "Failed to update pod status");
                failed.push(pod_name);
            }
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(Error::eviction(
            node_name,
            format!("unable to mark pods not ready: {}", failed.join(", ")),
        ))
    }
}

/// Force-delete a node object together with every pod bound to it.
///
/// Used when the cloud provider reports the backing instance gone: there is
/// nothing left to shut down gracefully.
pub async fn force_delete_node_and_pods(api: &dyn ClusterApi, node_name: &str) -> Result<()> {
    let pods = api
        .list_pods_on_node(node_name)
        .await
        .map_err(|e| Error::eviction(node_name, format!("unable to list pods: {}", e)))?;
    for pod in &pods {
        if !pod_bound_to(pod, node_name) {
            continue;
        }
        api.force_delete_pod(pod).await.map_err(|e| {
            Error::eviction(
                node_name,
                format!("unable to delete pod {}: {}", pod_display_name(pod), e),
            )
        })?;
    }
    api.delete_node(node_name)
        .await
        .map_err(|e| Error::eviction(node_name, format!("unable to delete node: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{pod_on_node, FakeCluster};
    use k8s_openapi::api::apps::v1::DaemonSetSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use vigil_common::NoopEventPublisher;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn daemon_set(namespace: &str, match_labels: &[(&str, &str)]) -> DaemonSet {
        DaemonSet {
            metadata: kube::api::ObjectMeta {
                name: Some("ds".to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(DaemonSetSpec {
                selector: LabelSelector {
                    match_labels: Some(labels(match_labels)),
                    ..Default::default()
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn empty_selector_matches_nothing() {
        let selector = LabelSelector::default();
        assert!(!selector_matches(&selector, Some(&labels(&[("a", "b")]))));
    }

    #[test]
    fn match_labels_require_all_pairs() {
        let selector = LabelSelector {
            match_labels: Some(labels(&[("app", "log-agent"), ("tier", "infra")])),
            ..Default::default()
        };
        assert!(selector_matches(
            &selector,
            Some(&labels(&[("app", "log-agent"), ("tier", "infra"), ("x", "y")]))
        ));
        assert!(!selector_matches(
            &selector,
            Some(&labels(&[("app", "log-agent")]))
        ));
        assert!(!selector_matches(&selector, None));
    }

    #[test]
    fn match_expressions_operators() {
        let selector = |op: &str, values: Option<Vec<&str>>| LabelSelector {
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "app".to_string(),
                operator: op.to_string(),
                values: values.map(|v| v.iter().map(|s| s.to_string()).collect()),
            }]),
            ..Default::default()
        };

        let with_app = labels(&[("app", "log-agent")]);
        let without_app = labels(&[("other", "x")]);

        assert!(selector_matches(&selector("In", Some(vec!["log-agent"])), Some(&with_app)));
        assert!(!selector_matches(&selector("In", Some(vec!["web"])), Some(&with_app)));
        assert!(!selector_matches(&selector("In", Some(vec!["log-agent"])), Some(&without_app)));

        assert!(selector_matches(&selector("NotIn", Some(vec!["web"])), Some(&with_app)));
        assert!(selector_matches(&selector("NotIn", Some(vec!["web"])), Some(&without_app)));
        assert!(!selector_matches(&selector("NotIn", Some(vec!["log-agent"])), Some(&with_app)));

        assert!(selector_matches(&selector("Exists", None), Some(&with_app)));
        assert!(!selector_matches(&selector("Exists", None), Some(&without_app)));
        assert!(selector_matches(&selector("DoesNotExist", None), Some(&without_app)));
    }

    #[tokio::test]
    async fn delete_worker_skips_mirror_and_daemon_set_pods() {
        let cluster = Arc::new(FakeCluster::new());
        let mut mirror = pod_on_node("mirror-pod", "default", "n1");
        mirror.metadata.annotations = Some(
            [(MIRROR_POD_ANNOTATION.to_string(), "hash".to_string())]
                .into_iter()
                .collect(),
        );
        let mut ds_pod = pod_on_node("ds-pod", "default", "n1");
        ds_pod.metadata.labels = Some(labels(&[("app", "log-agent")]));
        let plain = pod_on_node("web-0", "default", "n1");
        cluster.add_pod(mirror);
        cluster.add_pod(ds_pod);
        cluster.add_pod(plain);

        let daemon_sets = vec![daemon_set("default", &[("app", "log-agent")])];
        let remaining =
            delete_pods_on_node(&*cluster, &NoopEventPublisher, &daemon_sets, "n1")
                .await
                .unwrap();

        assert!(remaining);
        assert_eq!(cluster.deleted_pods(), vec!["default/web-0"]);
    }

    #[tokio::test]
    async fn delete_worker_reports_no_remaining_for_empty_node() {
        let cluster = Arc::new(FakeCluster::new());
        let remaining =
            delete_pods_on_node(&*cluster, &NoopEventPublisher, &[], "n1")
                .await
                .unwrap();
        assert!(!remaining);
    }

    #[tokio::test]
    async fn orphan_sweep_ignores_bound_and_unbound_pods_correctly() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_node(crate::testing::ready_node("n1", "", Utc::now()));
        cluster.add_pod(pod_on_node("kept", "default", "n1"));
        cluster.add_pod(pod_on_node("orphan", "default", "gone-node"));
        let mut unbound = pod_on_node("unbound", "default", "");
        unbound.spec.as_mut().unwrap().node_name = None;
        cluster.add_pod(unbound);

        let pods = cluster.pods_snapshot();
        cleanup_orphaned_pods(&*cluster, &*cluster, &pods).await;

        assert_eq!(cluster.force_deleted_pods(), vec!["default/orphan"]);
    }

    #[tokio::test]
    async fn terminating_pod_on_missing_node_is_force_deleted() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_node(crate::testing::ready_node("n1", "", Utc::now()));

        let mut doomed = pod_on_node("doomed", "default", "gone-node");
        doomed.metadata.deletion_timestamp =
            Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(Utc::now()));
        handle_terminating_pod(&*cluster, &*cluster, &doomed).await;
        assert_eq!(cluster.force_deleted_pods(), vec!["default/doomed"]);

        // A terminating pod on a live node is left to finish gracefully
        let mut fine = pod_on_node("fine", "default", "n1");
        fine.metadata.deletion_timestamp =
            Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(Utc::now()));
        handle_terminating_pod(&*cluster, &*cluster, &fine).await;
        assert_eq!(cluster.force_deleted_pods(), vec!["default/doomed"]);
    }

    #[tokio::test]
    async fn termination_worker_waits_then_force_deletes() {
        let cluster = Arc::new(FakeCluster::new());
        let now = Utc::now();
        let mut pod = pod_on_node("web-0", "default", "n1");
        pod.metadata.deletion_timestamp =
            Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(now));
        pod.metadata.deletion_grace_period_seconds = Some(20);
        cluster.add_pod(pod);

        // Before the deadline: not complete, estimate points at the deadline
        let (complete, next) = terminate_pods_on_node(
            &*cluster,
            &NoopEventPublisher,
            "n1",
            Duration::from_secs(300),
            now,
        )
        .await
        .unwrap();
        assert!(!complete);
        assert_eq!(next, Duration::from_secs(20));
        assert!(cluster.force_deleted_pods().is_empty());

        // Past the deadline: force-deleted and complete
        let (complete, _) = terminate_pods_on_node(
            &*cluster,
            &NoopEventPublisher,
            "n1",
            Duration::from_secs(300),
            now + chrono::TimeDelta::seconds(21),
        )
        .await
        .unwrap();
        assert!(complete);
        assert_eq!(cluster.force_deleted_pods(), vec!["default/web-0"]);
    }

    #[tokio::test]
    async fn termination_grace_is_capped_by_maximum() {
        let cluster = Arc::new(FakeCluster::new());
        let now = Utc::now();
        let mut pod = pod_on_node("slow", "default", "n1");
        pod.metadata.deletion_timestamp =
            Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(now));
        pod.metadata.deletion_grace_period_seconds = Some(3600);
        cluster.add_pod(pod);

        let (complete, _) = terminate_pods_on_node(
            &*cluster,
            &NoopEventPublisher,
            "n1",
            Duration::from_secs(300),
            now + chrono::TimeDelta::seconds(301),
        )
        .await
        .unwrap();
        assert!(complete);
        assert_eq!(cluster.force_deleted_pods(), vec!["default/slow"]);
    }

    #[tokio::test]
    async fn mark_pods_not_ready_flips_ready_condition() {
        let cluster = Arc::new(FakeCluster::new());
        let mut pod = pod_on_node("web-0", "default", "n1");
        pod.status = Some(k8s_openapi::api::core::v1::PodStatus {
            conditions: Some(vec![k8s_openapi::api::core::v1::PodCondition {
                type_: POD_READY.to_string(),
                status: CONDITION_TRUE.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });
        cluster.add_pod(pod);

        mark_pods_not_ready(&*cluster, "n1").await.unwrap();

        let updated = cluster.pod_status_updates();
        assert_eq!(updated.len(), 1);
        let cond = &updated[0].status.as_ref().unwrap().conditions.as_ref().unwrap()[0];
        assert_eq!(cond.status, CONDITION_FALSE);
    }

    #[tokio::test]
    async fn force_delete_node_removes_pods_then_node() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_node(crate::testing::ready_node("n1", "", Utc::now()));
        cluster.add_pod(pod_on_node("web-0", "default", "n1"));
        cluster.add_pod(pod_on_node("web-1", "default", "n1"));

        force_delete_node_and_pods(&*cluster, "n1").await.unwrap();

        assert_eq!(
            cluster.force_deleted_pods(),
            vec!["default/web-0", "default/web-1"]
        );
        assert_eq!(cluster.deleted_nodes(), vec!["n1"]);
    }
}
