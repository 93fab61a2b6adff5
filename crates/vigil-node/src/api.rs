//! Cluster API contracts.
//!
//! The controller talks to the cluster through two kinds of seam: an
//! outbound [`ClusterApi`] for reads and writes that must hit the API
//! server, and read-only cache views fed by the external watch machinery.
//! Production implementations sit on `kube`; tests swap in the in-memory
//! doubles from [`crate::testing`].

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::Client;

use vigil_common::{Error, Result};

/// Outbound cluster API operations the controller needs.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List every node in the cluster.
    async fn list_nodes(&self) -> Result<Vec<Node>>;

    /// Fetch one node by name.
    async fn get_node(&self, name: &str) -> Result<Node>;

    /// Push a node's status subresource. Rejected on stale resource
    /// versions, which is what drives the monitor's retry-with-refetch.
    async fn update_node_status(&self, node: &Node) -> Result<Node>;

    /// Delete a node object immediately (grace 0).
    async fn delete_node(&self, name: &str) -> Result<()>;

    /// List the pods bound to a node.
    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>>;

    /// Delete a pod with its own configured grace period.
    async fn delete_pod(&self, pod: &Pod) -> Result<()>;

    /// Delete a pod immediately (grace 0).
    async fn force_delete_pod(&self, pod: &Pod) -> Result<()>;

    /// Push a pod's status subresource.
    async fn update_pod_status(&self, pod: &Pod) -> Result<Pod>;
}

/// Read-only view of the node cache.
pub trait NodeCache: Send + Sync {
    /// Whether a node with this name is present in the cache.
    fn contains(&self, name: &str) -> bool;
}

/// Read-only view of the pod cache.
pub trait PodCache: Send + Sync {
    /// Snapshot of every cached pod.
    fn pods(&self) -> Vec<Pod>;
}

/// Read-only view of the daemon-set cache.
pub trait DaemonSetCache: Send + Sync {
    /// Snapshot of every cached daemon set.
    fn daemon_sets(&self) -> Vec<DaemonSet>;
}

fn pod_namespace(pod: &Pod) -> &str {
    pod.metadata.namespace.as_deref().unwrap_or("default")
}

fn pod_name(pod: &Pod) -> Result<&str> {
    pod.metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::internal_with_context("api", "pod without a name"))
}

/// Production [`ClusterApi`] over a `kube::Client`.
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    /// Wrap a client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let list = self.nodes().list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        Ok(self.nodes().get(name).await?)
    }

    async fn update_node_status(&self, node: &Node) -> Result<Node> {
        let name = node
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::internal_with_context("api", "node without a name"))?;
        let data = serde_json::to_vec(node)
            .map_err(|e| Error::serialization_for_kind("Node", e.to_string()))?;
        Ok(self
            .nodes()
            .replace_status(name, &PostParams::default(), data)
            .await?)
    }

    async fn delete_node(&self, name: &str) -> Result<()> {
        self.nodes()
            .delete(name, &DeleteParams::default().grace_period(0))
            .await?;
        Ok(())
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>> {
        let all_pods: Api<Pod> = Api::all(self.client.clone());
        let params = ListParams::default().fields(&format!("spec.nodeName={}", node_name));
        let list = all_pods.list(&params).await?;
        Ok(list.items)
    }

    async fn delete_pod(&self, pod: &Pod) -> Result<()> {
        self.pods(pod_namespace(pod))
            .delete(pod_name(pod)?, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn force_delete_pod(&self, pod: &Pod) -> Result<()> {
        self.pods(pod_namespace(pod))
            .delete(pod_name(pod)?, &DeleteParams::default().grace_period(0))
            .await?;
        Ok(())
    }

    async fn update_pod_status(&self, pod: &Pod) -> Result<Pod> {
        let data = serde_json::to_vec(pod)
            .map_err(|e| Error::serialization_for_kind("Pod", e.to_string()))?;
        Ok(self
            .pods(pod_namespace(pod))
            .replace_status(pod_name(pod)?, &PostParams::default(), data)
            .await?)
    }
}

/// Node cache over a reflector store.
pub struct StoreNodeCache(pub Store<Node>);

impl NodeCache for StoreNodeCache {
    fn contains(&self, name: &str) -> bool {
        self.0.get(&ObjectRef::new(name)).is_some()
    }
}

/// Pod cache over a reflector store.
pub struct StorePodCache(pub Store<Pod>);

impl PodCache for StorePodCache {
    fn pods(&self) -> Vec<Pod> {
        self.0.state().iter().map(|p| (**p).clone()).collect()
    }
}

/// Daemon-set cache over a reflector store.
pub struct StoreDaemonSetCache(pub Store<DaemonSet>);

impl DaemonSetCache for StoreDaemonSetCache {
    fn daemon_sets(&self) -> Vec<DaemonSet> {
        self.0.state().iter().map(|d| (**d).clone()).collect()
    }
}
