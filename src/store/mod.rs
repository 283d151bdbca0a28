//! Persisted state the tracker consults before requesting a scan.
//!
//! Both stores live outside the process. Calls are I/O and must never be made
//! while the deployment registry lock is held.

use crate::crd::ImageRecordSpec;
use std::future::Future;

mod cluster;
#[cfg(test)]
pub mod memory;

pub use cluster::{ClusterImageRecords, ClusterScanRequests};

pub trait ImageRecordStore: Send + Sync + 'static {
    /// Returns the record for `image`, creating it when absent. Concurrent callers
    /// for the same image always end up with the same single record.
    fn get_or_create(
        &self,
        image: &str,
    ) -> impl Future<Output = anyhow::Result<ImageRecordSpec>> + Send;
}

pub trait ScanRequestStore: Send + Sync + 'static {
    /// Name of a non-terminal scan request for `image`, if one exists.
    fn find_in_flight(
        &self,
        image: &str,
    ) -> impl Future<Output = anyhow::Result<Option<String>>> + Send;

    /// Creates a scan request for `image`; the store derives a unique name from
    /// `generate_name`. Returns the name it picked.
    fn create(
        &self,
        image: &str,
        generate_name: &str,
    ) -> impl Future<Output = anyhow::Result<String>> + Send;
}
