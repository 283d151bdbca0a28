use crate::dispatcher::ImageScanDispatcher;
use crate::image_id::ImageFilter;
use crate::informer::PodEventHandler;
use crate::pod::PodRecord;
use crate::reconciler::{DeleteOutcome, DeletionReconciler, LivePods};
use crate::registry::DeploymentRegistry;
use crate::store::{ImageRecordStore, ScanRequestStore};
use anyhow::Context;
use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeSet;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackOutcome {
    /// Pod carries no app label.
    Ignored,
    /// Pod runs at least one platform image and is not tracked at all.
    Internal,
    /// Update carried nothing the tracker cares about.
    Unchanged,
    /// A newer pod of the same deployment owns the entry.
    Superseded,
    Tracked { images: usize },
}

/// Keeps the deployment registry in line with pod events and asks for scans of
/// every image it sees.
pub struct DeploymentTracker<L, I, S> {
    registry: DeploymentRegistry,
    reconciler: DeletionReconciler<L>,
    dispatcher: ImageScanDispatcher<I, S>,
    filter: ImageFilter,
    app_label: String,
}

impl<L, I, S> DeploymentTracker<L, I, S>
where
    L: LivePods,
    I: ImageRecordStore,
    S: ScanRequestStore,
{
    pub fn new(
        registry: DeploymentRegistry,
        reconciler: DeletionReconciler<L>,
        dispatcher: ImageScanDispatcher<I, S>,
        filter: ImageFilter,
        app_label: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            reconciler,
            dispatcher,
            filter,
            app_label: app_label.into(),
        }
    }

    /// Replaces the deployment's image set with the pod's images, unconditionally.
    pub async fn pod_added(&self, pod: &PodRecord) -> anyhow::Result<TrackOutcome> {
        self.track(pod, false).await
    }

    /// Re-tracks a pod whose images changed, or that is being resynced, as long as it
    /// is still the most recent pod of its deployment.
    pub async fn pod_updated(
        &self,
        old: &PodRecord,
        new: &PodRecord,
    ) -> anyhow::Result<TrackOutcome> {
        let resync = old.resource_version == new.resource_version;
        if !resync && old.image_ids == new.image_ids {
            return Ok(TrackOutcome::Unchanged);
        }
        self.track(new, true).await
    }

    pub fn pod_deleted(&self, pod: &PodRecord) -> DeleteOutcome {
        self.reconciler.reconcile(&self.registry, pod)
    }

    async fn track(&self, pod: &PodRecord, only_if_newest: bool) -> anyhow::Result<TrackOutcome> {
        let Some(key) = pod.deployment_key() else {
            debug!("Ignoring pod {}/{} without app label", pod.namespace, pod.name);
            return Ok(TrackOutcome::Ignored);
        };

        if let Some(image) = self.filter.find_internal(&pod.image_ids) {
            debug!("Ignoring pod {}/{}, it runs internal image {}", pod.namespace, pod.name, image);
            return Ok(TrackOutcome::Internal);
        }

        let images: BTreeSet<String> = pod.pulled_images().cloned().collect();
        if only_if_newest {
            let written = self.registry.upsert_if_no_newer_live(
                key.clone(),
                images.iter().cloned(),
                || self.reconciler.newer_live_pod(&key, pod).is_some(),
            );
            if !written {
                debug!("Pod {} is superseded within deployment {}", pod.name, key);
                return Ok(TrackOutcome::Superseded);
            }
        } else {
            self.registry.upsert(key.clone(), images.iter().cloned());
        }
        debug!(
            "Deployment {} now runs {:?}, {} deployments tracked",
            key,
            images,
            self.registry.len()
        );

        // store calls are I/O and run after the registry lock has been released
        for image in &images {
            self.dispatcher
                .consider_image(image, &key.name)
                .await
                .with_context(|| format!("Failed to dispatch scan for deployment {}", key))?;
        }

        Ok(TrackOutcome::Tracked {
            images: images.len(),
        })
    }
}

impl<L, I, S> PodEventHandler for DeploymentTracker<L, I, S>
where
    L: LivePods,
    I: ImageRecordStore,
    S: ScanRequestStore,
{
    async fn on_add(&self, pod: Pod) -> anyhow::Result<()> {
        let record = PodRecord::from_pod(&pod, &self.app_label);
        info!("Processing pod {}/{}", record.namespace, record.name);
        self.pod_added(&record).await?;
        Ok(())
    }

    async fn on_update(&self, old: Pod, new: Pod) -> anyhow::Result<()> {
        let old = PodRecord::from_pod(&old, &self.app_label);
        let new = PodRecord::from_pod(&new, &self.app_label);
        let outcome = self.pod_updated(&old, &new).await?;
        debug!("Processed update of pod {}/{}: {:?}", new.namespace, new.name, outcome);
        Ok(())
    }

    async fn on_delete(&self, pod: Pod, final_state_unknown: bool) -> anyhow::Result<()> {
        let record = PodRecord::from_pod(&pod, &self.app_label);
        info!(
            "Processing pod deletion {}/{}{}",
            record.namespace,
            record.name,
            if final_state_unknown { " (final state unknown)" } else { "" }
        );
        self.pod_deleted(&record);
        Ok(())
    }
}
