//! Controller runner - wires the node controller to a live cluster.
//!
//! Starts the three reflectors (nodes, pods, daemon sets) that play the
//! role of the external watch machinery, waits for their initial sync, and
//! then launches the controller's periodic tasks. Pod add/update events are
//! fed straight into the controller's terminating-pod handler.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::Api;
use kube::runtime::reflector;
use kube::runtime::watcher;
use kube::runtime::WatchStreamExt;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vigil_common::{KubeEventPublisher, CONTROLLER_COMPONENT};
use vigil_node::api::{KubeClusterApi, StoreDaemonSetCache, StoreNodeCache, StorePodCache};
use vigil_node::{NodeHealthConfig, NodeHealthController};

type ObjectStream<K> =
    std::pin::Pin<Box<dyn futures::Stream<Item = Result<K, watcher::Error>> + Send>>;

/// Run the controller against the cluster until SIGINT/SIGTERM.
pub async fn run(client: Client, config: NodeHealthConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    // External watch machinery: one reflector per cache.
    let (node_store, node_writer) = reflector::store::<Node>();
    let node_stream: ObjectStream<Node> = reflector::reflector(
        node_writer,
        watcher(Api::<Node>::all(client.clone()), watcher::Config::default()),
    )
    .default_backoff()
    .applied_objects()
    .boxed();

    let (daemon_set_store, daemon_set_writer) = reflector::store::<DaemonSet>();
    let daemon_set_stream: ObjectStream<DaemonSet> = reflector::reflector(
        daemon_set_writer,
        watcher(
            Api::<DaemonSet>::all(client.clone()),
            watcher::Config::default(),
        ),
    )
    .default_backoff()
    .applied_objects()
    .boxed();

    let (pod_store, pod_writer) = reflector::store::<Pod>();
    let mut pod_stream: ObjectStream<Pod> = reflector::reflector(
        pod_writer,
        watcher(Api::<Pod>::all(client.clone()), watcher::Config::default()),
    )
    .default_backoff()
    .applied_objects()
    .boxed();

    tokio::spawn(drive_stream("nodes", node_stream));
    tokio::spawn(drive_stream("daemonsets", daemon_set_stream));

    let controller = Arc::new(NodeHealthController::new(
        Arc::new(KubeClusterApi::new(client.clone())),
        Arc::new(StoreNodeCache(node_store.clone())),
        Arc::new(StorePodCache(pod_store.clone())),
        Arc::new(StoreDaemonSetCache(daemon_set_store.clone())),
        Arc::new(KubeEventPublisher::new(client, CONTROLLER_COMPONENT)),
        config,
    )?);

    // Pod events go through the terminating-pod policy as they arrive.
    {
        let controller = controller.clone();
        tokio::spawn(async move {
            while let Some(event) = pod_stream.next().await {
                match event {
                    Ok(pod) => controller.handle_pod_event(&pod).await,
                    Err(e) => warn!(error = %e, "Pod watch error"),
                }
            }
        });
    }

    info!("Waiting for caches to sync");
    node_store.wait_until_ready().await?;
    pod_store.wait_until_ready().await?;
    daemon_set_store.wait_until_ready().await?;
    info!("Caches synced, starting controller tasks");

    vigil_node::run::run(controller, shutdown).await;
    info!("Controller stopped");
    Ok(())
}

/// Drain a reflector stream, logging watch errors.
async fn drive_stream<K: Send + 'static>(name: &'static str, mut stream: ObjectStream<K>) {
    while let Some(event) = stream.next().await {
        if let Err(e) = event {
            warn!(cache = name, error = %e, "Watch error");
        }
    }
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(sig) => sig,
                    Err(e) => {
                        warn!(error = %e, "Unable to install SIGTERM handler");
                        let _ = ctrl_c.await;
                        shutdown.cancel();
                        return;
                    }
                };
            tokio::select! {
                _ = ctrl_c => info!("Received SIGINT, shutting down"),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("Received interrupt, shutting down");
        }
        shutdown.cancel();
    });
}
