//! Background task driver.
//!
//! Launches the controller's four periodic loops - status monitor, delete
//! queue drain, termination queue drain, orphaned-pod sweep - each on its
//! own timer, all honoring one cancellation token. There is deliberately no
//! cross-task barrier: the loops only meet at the evictor lock.
//!
//! The fifth piece of the pipeline is not periodic: pod add/update events
//! from the workload cache are delivered by the operator's informer wiring
//! straight into [`NodeHealthController::handle_pod_event`].

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::controller::NodeHealthController;

/// Run the controller's periodic tasks until the token is cancelled.
///
/// Returns once every task has wound down.
pub async fn run(controller: Arc<NodeHealthController>, shutdown: CancellationToken) {
    let monitor = {
        let controller = controller.clone();
        spawn_periodic(
            "node-status-monitor",
            controller.config().node_monitor_period,
            shutdown.clone(),
            move || {
                let controller = controller.clone();
                async move {
                    if let Err(e) = controller.monitor_node_status().await {
                        error!(error = %e, "Error monitoring node status");
                    }
                }
            },
        )
    };

    let delete_drain = {
        let controller = controller.clone();
        spawn_periodic(
            "pod-eviction-drain",
            controller.config().node_eviction_period,
            shutdown.clone(),
            move || {
                let controller = controller.clone();
                async move { controller.drain_pod_evictions().await }
            },
        )
    };

    let termination_drain = {
        let controller = controller.clone();
        spawn_periodic(
            "pod-termination-drain",
            controller.config().node_eviction_period,
            shutdown.clone(),
            move || {
                let controller = controller.clone();
                async move { controller.drain_pod_terminations().await }
            },
        )
    };

    let orphan_sweep = {
        let controller = controller.clone();
        spawn_periodic(
            "orphaned-pod-sweep",
            controller.config().orphan_sweep_period,
            shutdown,
            move || {
                let controller = controller.clone();
                async move { controller.sweep_orphaned_pods().await }
            },
        )
    };

    for handle in [monitor, delete_drain, termination_drain, orphan_sweep] {
        if let Err(e) = handle.await {
            error!(error = %e, "Controller task panicked");
        }
    }
}

/// Spawn a loop that runs `tick` every `period` until cancelled.
fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(task = name, "Stopping periodic task");
                    break;
                }
                _ = interval.tick() => tick().await,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeHealthConfig;
    use crate::testing::FakeCluster;
    use vigil_common::NoopEventPublisher;

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let cluster = Arc::new(FakeCluster::new());
        let controller = Arc::new(
            NodeHealthController::new(
                cluster.clone(),
                cluster.clone(),
                cluster.clone(),
                cluster,
                Arc::new(NoopEventPublisher),
                NodeHealthConfig::default(),
            )
            .unwrap(),
        );

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run(controller, shutdown.clone()));

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("run() should return promptly after cancellation")
            .unwrap();
    }
}
