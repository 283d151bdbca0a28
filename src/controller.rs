use crate::config::Config;
use crate::dispatcher::ImageScanDispatcher;
use crate::image_id::ImageFilter;
use crate::informer::{PodInformer, Subscription};
use crate::reconciler::{DeletionReconciler, StoreLivePods};
use crate::registry::DeploymentRegistry;
use crate::state::ControllerContext;
use crate::store::{ClusterImageRecords, ClusterScanRequests};
use crate::tracker::DeploymentTracker;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

pub async fn create_client() -> anyhow::Result<Client> {
    info!("Initializing K8s client");
    let client = Client::try_default().await?;
    let api_server_info = client.apiserver_version().await?;
    info!(
        "Connected to namespace {}, Kubernetes API server with version {}.{}",
        client.default_namespace(),
        api_server_info.major,
        api_server_info.minor
    );
    Ok(client)
}

/// Starts tracking unless the watcher is disabled or no cluster is reachable, in which
/// case nothing is subscribed and the registry stays empty. `connect` is only awaited
/// when the watcher is enabled.
pub async fn maybe_start<F>(
    config: &Config,
    registry: DeploymentRegistry,
    connect: F,
) -> Option<Subscription>
where
    F: Future<Output = anyhow::Result<Client>>,
{
    if !config.watcher.enabled {
        warn!("Pod watcher disabled by configuration, no deployments will be tracked");
        return None;
    }

    match connect.await {
        Ok(kube_client) => Some(start(ControllerContext {
            kube_client,
            config: config.clone(),
            registry,
        })),
        Err(e) => {
            warn!(
                "Kubernetes client unavailable, no deployments will be tracked: {:#}",
                e
            );
            None
        }
    }
}

/// Wires the tracker to the cluster and starts delivering pod events to it.
pub fn start(ctx: ControllerContext) -> Subscription {
    let ControllerContext {
        kube_client,
        config,
        registry,
    } = ctx;

    let pods: Api<Pod> = match &config.watcher.namespace {
        Some(namespace) => Api::namespaced(kube_client.clone(), namespace),
        None => Api::all(kube_client.clone()),
    };
    let store_namespace = config
        .scan_requests
        .namespace
        .clone()
        .unwrap_or_else(|| kube_client.default_namespace().to_string());

    info!(
        "Watching pods in {}, keeping scan requests in namespace {}",
        config
            .watcher
            .namespace
            .as_deref()
            .unwrap_or("all namespaces"),
        store_namespace
    );

    let informer = PodInformer::new(pods, config.watcher.workers);
    let tracker = DeploymentTracker::new(
        registry,
        DeletionReconciler::new(StoreLivePods::new(informer.store(), &config.app_label)),
        ImageScanDispatcher::new(
            ClusterImageRecords::new(Api::namespaced(kube_client.clone(), &store_namespace)),
            ClusterScanRequests::new(Api::namespaced(kube_client, &store_namespace)),
        ),
        ImageFilter::new(config.internal_image_patterns.clone()),
        config.app_label.clone(),
    );

    informer.subscribe(Arc::new(tracker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn config(enabled: bool) -> Config {
        serde_yaml_ng::from_str(&format!(
            "webserver:\n  port: 8080\nwatcher:\n  enabled: {}\n",
            enabled
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_disabled_watcher_never_connects() {
        let registry = DeploymentRegistry::new();
        let connected = AtomicBool::new(false);

        let subscription = maybe_start(&config(false), registry.clone(), async {
            connected.store(true, Ordering::SeqCst);
            Err::<Client, _>(anyhow::anyhow!("no cluster"))
        })
        .await;

        assert!(subscription.is_none());
        assert!(!connected.load(Ordering::SeqCst));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_missing_cluster_leaves_registry_empty() {
        let registry = DeploymentRegistry::new();

        let subscription = maybe_start(&config(true), registry.clone(), async {
            Err::<Client, _>(anyhow::anyhow!("no kubeconfig"))
        })
        .await;

        assert!(subscription.is_none());
        assert!(registry.is_empty());
        assert!(registry.snapshot().is_empty());
    }
}
