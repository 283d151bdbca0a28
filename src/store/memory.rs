use super::{ImageRecordStore, ScanRequestStore};
use crate::crd::{ImageRecordSpec, ScanPhase};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
pub struct MemoryImageRecords {
    records: Mutex<BTreeMap<String, ImageRecordSpec>>,
    pub fail: AtomicBool,
}

impl MemoryImageRecords {
    pub fn mark_analysed(&self, image: &str) {
        self.records.lock().unwrap().insert(
            image.to_string(),
            ImageRecordSpec {
                image: image.to_string(),
                analysis_complete: true,
                first_seen: None,
            },
        );
    }

    pub fn contains(&self, image: &str) -> bool {
        self.records.lock().unwrap().contains_key(image)
    }
}

impl ImageRecordStore for MemoryImageRecords {
    async fn get_or_create(&self, image: &str) -> anyhow::Result<ImageRecordSpec> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("image record store unavailable");
        }
        let mut records = self.records.lock().unwrap();
        Ok(records
            .entry(image.to_string())
            .or_insert_with(|| ImageRecordSpec {
                image: image.to_string(),
                analysis_complete: false,
                first_seen: None,
            })
            .clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredScanRequest {
    pub name: String,
    pub image: String,
    pub generate_name: String,
    pub phase: Option<ScanPhase>,
}

#[derive(Default)]
pub struct MemoryScanRequests {
    requests: Mutex<Vec<StoredScanRequest>>,
    counter: AtomicUsize,
}

impl MemoryScanRequests {
    pub fn requests(&self) -> Vec<StoredScanRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, image: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.image == image)
            .count()
    }

    pub fn set_phase(&self, image: &str, phase: ScanPhase) {
        for request in self.requests.lock().unwrap().iter_mut() {
            if request.image == image {
                request.phase = Some(phase);
            }
        }
    }
}

impl ScanRequestStore for MemoryScanRequests {
    async fn find_in_flight(&self, image: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .requests
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.image == image && !r.phase.is_some_and(ScanPhase::is_terminal))
            .map(|r| r.name.clone()))
    }

    async fn create(&self, image: &str, generate_name: &str) -> anyhow::Result<String> {
        let name = format!(
            "{}{}",
            generate_name,
            self.counter.fetch_add(1, Ordering::SeqCst)
        );
        self.requests.lock().unwrap().push(StoredScanRequest {
            name: name.clone(),
            image: image.to_string(),
            generate_name: generate_name.to_string(),
            phase: None,
        });
        Ok(name)
    }
}
