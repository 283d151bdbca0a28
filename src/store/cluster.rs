use super::{ImageRecordStore, ScanRequestStore};
use crate::crd::{ImageRecord, ImageRecordSpec, ScanRequest, ScanRequestSpec};
use anyhow::Context;
use chrono::Utc;
use kube::api::{ListParams, ObjectMeta, PostParams};
use kube::{Api, ResourceExt};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

static IMAGE_RECORD_NAME_PREFIX: &str = "image-";
static FALLBACK_GENERATE_NAME: &str = "scan-";
// apiserver appends 5 random characters to a generateName prefix of at most 58
const MAX_GENERATE_NAME_LENGTH: usize = 58;

/// Image records stored as `ImageRecord` custom resources, one object per identifier.
#[derive(Clone)]
pub struct ClusterImageRecords {
    api: Api<ImageRecord>,
}

impl ClusterImageRecords {
    pub fn new(api: Api<ImageRecord>) -> Self {
        Self { api }
    }
}

impl ImageRecordStore for ClusterImageRecords {
    async fn get_or_create(&self, image: &str) -> anyhow::Result<ImageRecordSpec> {
        let name = image_record_name(image);
        if let Some(existing) = self
            .api
            .get_opt(&name)
            .await
            .with_context(|| format!("Failed to fetch image record {}", name))?
        {
            return Ok(existing.spec);
        }

        let record = ImageRecord {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                ..ObjectMeta::default()
            },
            spec: ImageRecordSpec {
                image: image.to_string(),
                analysis_complete: false,
                first_seen: Some(Utc::now().to_rfc3339()),
            },
        };

        // the object name is derived from the identifier, so the apiserver arbitrates
        // concurrent creators and exactly one of them wins
        match self.api.create(&PostParams::default(), &record).await {
            Ok(created) => {
                info!("Recorded new image {} as {}", image, name);
                Ok(created.spec)
            }
            Err(kube::Error::Api(err)) if err.code == 409 => {
                debug!("Image record {} was created concurrently for {}", name, image);
                let existing = self
                    .api
                    .get(&name)
                    .await
                    .with_context(|| format!("Failed to fetch image record {}", name))?;
                Ok(existing.spec)
            }
            Err(err) => Err(err)
                .with_context(|| format!("Failed to create image record for {}", image)),
        }
    }
}

/// Scan requests stored as `ScanRequest` custom resources.
#[derive(Clone)]
pub struct ClusterScanRequests {
    api: Api<ScanRequest>,
}

impl ClusterScanRequests {
    pub fn new(api: Api<ScanRequest>) -> Self {
        Self { api }
    }
}

impl ScanRequestStore for ClusterScanRequests {
    async fn find_in_flight(&self, image: &str) -> anyhow::Result<Option<String>> {
        // spec.image is not a selectable field, so filter client-side
        let requests = self
            .api
            .list(&ListParams::default())
            .await
            .context("Failed to list scan requests")?;

        Ok(requests
            .items
            .into_iter()
            .find(|request| request.spec.image == image && request.is_in_flight())
            .map(|request| request.name_any()))
    }

    async fn create(&self, image: &str, generate_name: &str) -> anyhow::Result<String> {
        let request = ScanRequest {
            metadata: ObjectMeta {
                generate_name: Some(generate_name_prefix(generate_name)),
                ..ObjectMeta::default()
            },
            spec: ScanRequestSpec {
                image: image.to_string(),
            },
            status: None,
        };

        let created = self
            .api
            .create(&PostParams::default(), &request)
            .await
            .with_context(|| format!("Failed to create scan request for {}", image))?;
        Ok(created.name_any())
    }
}

fn image_record_name(image: &str) -> String {
    format!(
        "{}{}",
        IMAGE_RECORD_NAME_PREFIX,
        hex::encode(Sha256::digest(image.as_bytes()))
    )
}

/// Turns an app label value into a valid `metadata.generateName` prefix.
///
/// Label values may contain `_` and `.` in any order, so everything outside
/// `[a-z0-9]` becomes a single `-`. The result has no leading `-` and, once the
/// apiserver appends its random suffix, is a valid DNS-1123 subdomain.
fn generate_name_prefix(app: &str) -> String {
    let mut prefix = String::new();
    for c in app.chars().map(|c| c.to_ascii_lowercase()) {
        if prefix.len() == MAX_GENERATE_NAME_LENGTH {
            break;
        }
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            prefix.push(c);
        } else if !prefix.is_empty() && !prefix.ends_with('-') {
            prefix.push('-');
        }
    }

    if prefix.is_empty() {
        FALLBACK_GENERATE_NAME.to_string()
    } else {
        prefix
    }
}
