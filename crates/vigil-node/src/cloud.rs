//! Cloud provider contract.

use async_trait::async_trait;

use vigil_common::Result;

/// Answers whether a node's backing instance still exists at the cloud
/// provider.
///
/// The controller uses this to distinguish "node agent stopped reporting"
/// from "the machine is gone": when the instance no longer exists there is
/// nothing to wait for, and the node object and its pods are force-deleted
/// immediately, bypassing the eviction queues.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Whether the instance backing the named node still exists.
    async fn instance_exists(&self, node_name: &str) -> Result<bool>;
}
