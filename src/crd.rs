use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Work item asking the external analyzer to scan one image.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[kube(
    group = "imagetracker.io",
    version = "v1alpha1",
    kind = "ScanRequest",
    plural = "scanrequests",
    namespaced,
    status = "ScanRequestStatus",
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequestSpec {
    /// Digest-pinned image identifier to analyse
    pub image: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequestStatus {
    pub phase: Option<ScanPhase>,
    pub message: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ScanPhase {
    Pending,
    Running,
    Complete,
    Failed,
}

impl ScanPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, ScanPhase::Complete | ScanPhase::Failed)
    }
}

impl ScanRequest {
    /// A request is in flight until the analyzer reports a terminal phase.
    pub fn is_in_flight(&self) -> bool {
        !self
            .status
            .as_ref()
            .and_then(|status| status.phase)
            .is_some_and(ScanPhase::is_terminal)
    }
}

/// Persistent per-image bookkeeping, created on first sighting and never deleted by the tracker.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[kube(
    group = "imagetracker.io",
    version = "v1alpha1",
    kind = "ImageRecord",
    plural = "imagerecords",
    namespaced,
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Analysed","type":"boolean","jsonPath":".spec.analysisComplete"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecordSpec {
    pub image: String,
    /// Set by the analyzer once a scan of this image has finished
    #[serde(default)]
    pub analysis_complete: bool,
    /// RFC 3339 timestamp of the first sighting
    pub first_seen: Option<String>,
}
