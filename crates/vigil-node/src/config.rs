//! Controller configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use vigil_common::{Error, Result};

/// Tunables for the node health controller.
///
/// Defaults mirror what mature clusters run with. The startup grace period
/// is longer than the monitor grace period because a freshly registered node
/// legitimately takes a while to post its first status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct NodeHealthConfig {
    /// Time from the last known-bad observation to the eviction trigger.
    #[serde(with = "humantime_serde")]
    pub pod_eviction_timeout: Duration,
    /// Grace after which a heartbeat-less node is marked Unknown.
    ///
    /// Must be several times the node agent's status-report period (there is
    /// no point checking more often than fresh values can arrive) and below
    /// `pod_eviction_timeout`.
    #[serde(with = "humantime_serde")]
    pub node_monitor_grace_period: Duration,
    /// Like `node_monitor_grace_period`, but applied while the node has
    /// never reported at all.
    #[serde(with = "humantime_serde")]
    pub node_startup_grace_period: Duration,
    /// Period of the status monitor loop.
    #[serde(with = "humantime_serde")]
    pub node_monitor_period: Duration,
    /// Token-bucket refill rate for the per-zone eviction queues.
    pub eviction_limiter_qps: f32,
    /// Upper bound on how long a deleted pod may keep terminating before it
    /// is force-killed.
    #[serde(with = "humantime_serde")]
    pub maximum_grace_period: Duration,
    /// Period of both eviction queue drains.
    #[serde(with = "humantime_serde")]
    pub node_eviction_period: Duration,
    /// Period of the orphaned-pod sweep.
    #[serde(with = "humantime_serde")]
    pub orphan_sweep_period: Duration,
    /// In-tick retry count for node status updates.
    pub node_status_update_retry: usize,
}

impl Default for NodeHealthConfig {
    fn default() -> Self {
        Self {
            pod_eviction_timeout: Duration::from_secs(5 * 60),
            node_monitor_grace_period: Duration::from_secs(40),
            node_startup_grace_period: Duration::from_secs(60),
            node_monitor_period: Duration::from_secs(5),
            eviction_limiter_qps: 0.1,
            maximum_grace_period: Duration::from_secs(5 * 60),
            node_eviction_period: Duration::from_millis(100),
            orphan_sweep_period: Duration::from_secs(30),
            node_status_update_retry: 5,
        }
    }
}

impl NodeHealthConfig {
    /// Check the configuration for internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.node_monitor_grace_period >= self.pod_eviction_timeout {
            // Legal but surprising: a node becomes eligible for eviction
            // the moment it is marked Unknown.
            warn!(
                grace_period = ?self.node_monitor_grace_period,
                eviction_timeout = ?self.pod_eviction_timeout,
                "node-monitor-grace-period is at or above pod-eviction-timeout"
            );
        }
        if self.node_monitor_grace_period <= self.node_monitor_period {
            return Err(Error::validation_for_field(
                "node-monitor-grace-period",
                "must exceed node-monitor-period",
            ));
        }
        if self.eviction_limiter_qps <= 0.0 {
            return Err(Error::validation_for_field(
                "eviction-limiter-qps",
                "must be positive",
            ));
        }
        if self.node_monitor_period.is_zero()
            || self.node_eviction_period.is_zero()
            || self.orphan_sweep_period.is_zero()
        {
            return Err(Error::validation("periods must be non-zero"));
        }
        if self.node_status_update_retry == 0 {
            return Err(Error::validation_for_field(
                "node-status-update-retry",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}
