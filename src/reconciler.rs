use crate::pod::PodRecord;
use crate::registry::{DeploymentRegistry, NamespacedName};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use kube::runtime::reflector::Store;
use tracing::{debug, info};

/// Read access to the pods currently alive in the cluster.
///
/// Implementations are consulted while the registry lock is held, so they must
/// answer from memory and never block on I/O.
pub trait LivePods: Send + Sync + 'static {
    fn pods_for(&self, deployment: &NamespacedName) -> Vec<PodRecord>;
}

/// Live pods as seen by the informer's reflector cache.
#[derive(Clone)]
pub struct StoreLivePods {
    store: Store<Pod>,
    app_label: String,
}

impl StoreLivePods {
    pub fn new(store: Store<Pod>, app_label: impl Into<String>) -> Self {
        Self {
            store,
            app_label: app_label.into(),
        }
    }
}

impl LivePods for StoreLivePods {
    fn pods_for(&self, deployment: &NamespacedName) -> Vec<PodRecord> {
        self.store
            .state()
            .iter()
            .filter(|pod| {
                pod.namespace().as_deref() == Some(deployment.namespace.as_str())
                    && pod.labels().get(&self.app_label) == Some(&deployment.name)
            })
            .map(|pod| PodRecord::from_pod(pod, &self.app_label))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Pod carries no app label.
    Ignored,
    /// A strictly newer pod of the same deployment is still alive.
    Retained { newer_pod: String },
    Removed,
    /// Nothing was tracked for the deployment.
    NotTracked,
}

/// Decides whether a pod deletion really retires its deployment, or is rolling-update
/// churn (or a stale, late delete) that must not erase newer state.
pub struct DeletionReconciler<L> {
    live: L,
}

impl<L: LivePods> DeletionReconciler<L> {
    pub fn new(live: L) -> Self {
        Self { live }
    }

    /// Name of a live pod of `key`, other than `pod` itself, created strictly after `pod`.
    /// Equal creation times do not count as newer.
    pub fn newer_live_pod(&self, key: &NamespacedName, pod: &PodRecord) -> Option<String> {
        self.live
            .pods_for(key)
            .into_iter()
            .filter(|candidate| !candidate.is_same_pod(pod))
            .find(|candidate| candidate.is_newer_than(pod))
            .map(|candidate| candidate.name)
    }

    pub fn reconcile(&self, registry: &DeploymentRegistry, deleted: &PodRecord) -> DeleteOutcome {
        let Some(key) = deleted.deployment_key() else {
            return DeleteOutcome::Ignored;
        };

        let mut newer_pod = None;
        let removed = registry.remove_if_no_newer_live(&key, || {
            newer_pod = self.newer_live_pod(&key, deleted);
            newer_pod.is_some()
        });

        match (removed, newer_pod) {
            (_, Some(newer_pod)) => {
                debug!(
                    "Keeping deployment {} after deletion of {}, newer pod {} is live",
                    key, deleted.name, newer_pod
                );
                DeleteOutcome::Retained { newer_pod }
            }
            (true, None) => {
                info!("Removed deployment {} after deletion of pod {}", key, deleted.name);
                DeleteOutcome::Removed
            }
            (false, None) => DeleteOutcome::NotTracked,
        }
    }
}
