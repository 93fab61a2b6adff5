//! Kubernetes Event recording for the node controller.
//!
//! Provides a trait-based abstraction over `kube::runtime::events::Recorder`
//! so that the controller can emit standard Kubernetes Events visible via
//! `kubectl describe node` and `kubectl get events`.
//!
//! Events are **fire-and-forget**: failures are logged as warnings and never
//! propagate errors. A failed event must never break a monitor tick or a
//! queue drain.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ObjectReference, Pod};
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
///
/// Implementations are expected to be fire-and-forget: `publish()` logs a
/// warning on failure but never returns an error. Most events here are
/// recorded against Node objects that may no longer exist (eviction runs
/// precisely when nodes die), so failures are routine, not exceptional.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Kubernetes Event on the given resource.
    ///
    /// `resource_ref` names the object the event is about, `reason` is the
    /// machine-readable REASON column (e.g. "RegisteredNode"), `action` the
    /// ACTION column (e.g. "Evict"), and `note` an optional human-readable
    /// message.
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name` (the
    /// "reportingComponent" shown on Events).
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// No-op implementation for tests.
///
/// All calls are silently ignored - no Kubernetes API interaction.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
        // intentionally empty
    }
}

/// Build an ObjectReference for a node by name.
///
/// Node events are recorded against the bare name; the UID is left unset
/// because the node object may already be gone when the event is emitted.
pub fn node_reference(name: &str) -> ObjectReference {
    ObjectReference {
        kind: Some("Node".to_string()),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

/// Build an ObjectReference for a pod.
pub fn pod_reference(pod: &Pod) -> ObjectReference {
    ObjectReference {
        kind: Some("Pod".to_string()),
        name: pod.metadata.name.clone(),
        namespace: pod.metadata.namespace.clone(),
        uid: pod.metadata.uid.clone(),
        ..Default::default()
    }
}

/// Well-known event reason strings.
///
/// These appear in `kubectl get events` under the REASON column.
pub mod reasons {
    /// Node appeared in the cluster and is now tracked by the controller
    pub const REGISTERED_NODE: &str = "RegisteredNode";
    /// Node vanished from the cluster and is being dropped from tracking
    pub const REMOVING_NODE: &str = "RemovingNode";
    /// Node's Ready condition left the True state
    pub const NODE_NOT_READY: &str = "NodeNotReady";
    /// Node is being deleted because its cloud instance no longer exists
    pub const DELETING_NODE: &str = "DeletingNode";
    /// Eviction started: all pods on the node are being deleted
    pub const DELETING_ALL_PODS: &str = "DeletingAllPods";
    /// A single pod was marked for deletion during eviction
    pub const MARKING_EVICTION: &str = "MarkingEviction";
    /// A pod exceeded its termination grace and is being force killed
    pub const TERMINATING_EVICTED_POD: &str = "TerminatingEvictedPod";
    /// Every pod on the node finished terminating
    pub const TERMINATED_ALL_PODS: &str = "TerminatedAllPods";
}

/// Well-known event action strings.
///
/// These appear in `kubectl get events` under the ACTION column.
pub mod actions {
    /// Known-node set reconciliation
    pub const REGISTER: &str = "Register";
    /// Periodic node status monitoring
    pub const MONITOR: &str = "Monitor";
    /// Pod eviction (delete queue)
    pub const EVICT: &str = "Evict";
    /// Pod termination (termination queue)
    pub const TERMINATE: &str = "Terminate";
    /// Node object deletion
    pub const DELETE: &str = "Delete";
}
