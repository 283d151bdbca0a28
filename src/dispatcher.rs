use crate::image_id::DigestReference;
use crate::store::{ImageRecordStore, ScanRequestStore};
use anyhow::Context;
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDecision {
    /// Image has no content digest; scanning a mutable tag is pointless.
    Unpinned,
    /// Another task in this process is already deciding for the same image. The
    /// caller does not learn that task's result; if it fails, the image is retried
    /// on the next resync or image change.
    Coalesced,
    AlreadyAnalysed,
    InFlight,
    Requested,
}

/// Requests at most one scan per digest-pinned image.
///
/// Within one process, concurrent calls for the same image are coalesced so that
/// only one of them talks to the stores. Across processes the check for an
/// in-flight request and the creation of a new one are not atomic, and duplicate
/// scan requests remain possible.
pub struct ImageScanDispatcher<I, S> {
    pub(crate) records: I,
    pub(crate) scans: S,
    pending: Mutex<HashSet<String>>,
}

impl<I: ImageRecordStore, S: ScanRequestStore> ImageScanDispatcher<I, S> {
    pub fn new(records: I, scans: S) -> Self {
        Self {
            records,
            scans,
            pending: Mutex::new(HashSet::new()),
        }
    }

    pub async fn consider_image(&self, image: &str, app: &str) -> anyhow::Result<ScanDecision> {
        let reference = match DigestReference::parse(image) {
            Ok(reference) => reference,
            Err(e) => {
                warn!("Image {} has no usable digest ({}), not scanning", image, e);
                return Ok(ScanDecision::Unpinned);
            }
        };
        debug!("Considering {} for app {}", reference, app);

        let Some(_claim) = self.claim(image) else {
            debug!("Image {} is already being considered", image);
            return Ok(ScanDecision::Coalesced);
        };

        let record = self
            .records
            .get_or_create(image)
            .await
            .with_context(|| format!("Failed to load image record for {}", image))?;
        if record.analysis_complete {
            debug!("Image {} has already been analysed", image);
            return Ok(ScanDecision::AlreadyAnalysed);
        }

        if let Some(existing) = self
            .scans
            .find_in_flight(image)
            .await
            .with_context(|| format!("Failed to look up scan requests for {}", image))?
        {
            debug!("Scan request {} for image {} is in progress", existing, image);
            return Ok(ScanDecision::InFlight);
        }

        let name = self.scans.create(image, app).await?;
        info!(
            "Created scan request {} for {} digest {} of app {}",
            name, reference.repository, reference.digest, app
        );
        Ok(ScanDecision::Requested)
    }

    fn claim(&self, image: &str) -> Option<PendingClaim<'_>> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.insert(image.to_string()).then(|| PendingClaim {
            pending: &self.pending,
            image: image.to_string(),
        })
    }
}

/// Marks an image as being considered; released on drop.
struct PendingClaim<'a> {
    pending: &'a Mutex<HashSet<String>>,
    image: String,
}

impl Drop for PendingClaim<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.image);
    }
}
