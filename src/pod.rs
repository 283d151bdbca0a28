use crate::registry::NamespacedName;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;

/// The parts of a pod the tracker cares about.
#[derive(Debug, Clone, PartialEq)]
pub struct PodRecord {
    pub namespace: String,
    pub name: String,
    pub uid: Option<String>,
    pub app: Option<String>,
    pub created: Option<Time>,
    pub resource_version: Option<String>,
    /// One entry per container status, in pod order. Empty until the image is pulled.
    pub image_ids: Vec<String>,
}

impl PodRecord {
    pub fn from_pod(pod: &Pod, app_label: &str) -> Self {
        let image_ids = pod
            .status
            .as_ref()
            .and_then(|status| status.container_statuses.as_ref())
            .map(|statuses| statuses.iter().map(|cs| cs.image_id.clone()).collect())
            .unwrap_or_default();

        Self {
            namespace: pod.namespace().unwrap_or_default(),
            name: pod.name_any(),
            uid: pod.uid(),
            app: pod.labels().get(app_label).cloned(),
            created: pod.creation_timestamp(),
            resource_version: pod.resource_version(),
            image_ids,
        }
    }

    /// The deployment this pod belongs to, or `None` when it carries no app label.
    pub fn deployment_key(&self) -> Option<NamespacedName> {
        self.app
            .as_ref()
            .map(|app| NamespacedName::new(self.namespace.clone(), app.clone()))
    }

    /// Whether both records describe the same pod object.
    pub fn is_same_pod(&self, other: &PodRecord) -> bool {
        match (&self.uid, &other.uid) {
            (Some(a), Some(b)) => a == b,
            _ => self.namespace == other.namespace && self.name == other.name,
        }
    }

    /// Strictly later creation time. A pod without a timestamp is never newer,
    /// and any stamped pod is newer than an unstamped one.
    pub fn is_newer_than(&self, other: &PodRecord) -> bool {
        self.created > other.created
    }

    /// Pulled image identifiers, without the empty placeholders of pending containers.
    pub fn pulled_images(&self) -> impl Iterator<Item = &String> {
        self.image_ids.iter().filter(|id| !id.is_empty())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// Builds a pod the way the apiserver would report it.
    pub(crate) fn pod(
        namespace: &str,
        name: &str,
        app: Option<&str>,
        created: &str,
        images: &[&str],
    ) -> Pod {
        let labels = match app {
            Some(app) => json!({ "app": app, "pod-template-hash": "abc" }),
            None => json!({ "pod-template-hash": "abc" }),
        };
        let statuses: Vec<_> = images
            .iter()
            .enumerate()
            .map(|(i, image_id)| {
                json!({
                    "name": format!("c{}", i),
                    "image": "placeholder:latest",
                    "imageID": image_id,
                    "ready": true,
                    "restartCount": 0
                })
            })
            .collect();
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "namespace": namespace,
                "name": name,
                "uid": format!("uid-{}-{}", namespace, name),
                "resourceVersion": "1",
                "creationTimestamp": created,
                "labels": labels
            },
            "status": { "containerStatuses": statuses }
        }))
        .unwrap()
    }

    #[test]
    fn test_from_pod_extracts_fields() {
        let p = pod(
            "default",
            "svc-1",
            Some("svc"),
            "2024-01-01T00:00:01Z",
            &["repo/a@sha256:111", ""],
        );
        let record = PodRecord::from_pod(&p, "app");
        assert_eq!(record.namespace, "default");
        assert_eq!(record.name, "svc-1");
        assert_eq!(record.uid.as_deref(), Some("uid-default-svc-1"));
        assert_eq!(record.app.as_deref(), Some("svc"));
        assert!(record.created.is_some());
        assert_eq!(record.image_ids, vec!["repo/a@sha256:111", ""]);
        assert_eq!(record.pulled_images().count(), 1);
        assert_eq!(
            record.deployment_key(),
            Some(NamespacedName::new("default", "svc"))
        );
    }

    #[test]
    fn test_from_pod_uses_configured_label() {
        let p = pod("default", "svc-1", Some("svc"), "2024-01-01T00:00:01Z", &[]);
        let record = PodRecord::from_pod(&p, "app.kubernetes.io/name");
        assert_eq!(record.app, None);
        assert_eq!(record.deployment_key(), None);
    }

    #[test]
    fn test_pod_without_status_has_no_images() {
        let mut p = pod("default", "svc-1", Some("svc"), "2024-01-01T00:00:01Z", &[]);
        p.status = None;
        assert!(PodRecord::from_pod(&p, "app").image_ids.is_empty());
    }

    #[test]
    fn test_creation_ordering() {
        let older = PodRecord::from_pod(
            &pod("default", "a", Some("svc"), "2024-01-01T00:00:01Z", &[]),
            "app",
        );
        let newer = PodRecord::from_pod(
            &pod("default", "b", Some("svc"), "2024-01-01T00:00:02Z", &[]),
            "app",
        );
        let twin = PodRecord::from_pod(
            &pod("default", "c", Some("svc"), "2024-01-01T00:00:02Z", &[]),
            "app",
        );
        assert!(newer.is_newer_than(&older));
        assert!(!older.is_newer_than(&newer));
        assert!(!twin.is_newer_than(&newer));

        let mut unstamped = older.clone();
        unstamped.created = None;
        assert!(!unstamped.is_newer_than(&older));
        assert!(older.is_newer_than(&unstamped));
    }

    #[test]
    fn test_same_pod_by_uid_or_name() {
        let a = PodRecord::from_pod(
            &pod("default", "a", Some("svc"), "2024-01-01T00:00:01Z", &[]),
            "app",
        );
        let b = PodRecord::from_pod(
            &pod("default", "b", Some("svc"), "2024-01-01T00:00:01Z", &[]),
            "app",
        );
        assert!(a.is_same_pod(&a.clone()));
        assert!(!a.is_same_pod(&b));

        let mut anonymous = a.clone();
        anonymous.uid = None;
        assert!(anonymous.is_same_pod(&a));
    }
}
