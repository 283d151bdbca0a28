use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Identifies a logical deployment: the pods sharing one app label within one namespace.
/// Ordered by namespace, then name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// In-memory map from deployment to the image identifiers currently running under it.
///
/// Cloning is cheap and every clone shares the same state. All mutation goes through
/// a single lock, so a reader sees either the previous image set of a deployment or
/// the complete replacement, never a mix. Conditional operations evaluate their
/// predicate while holding that lock, which makes the decision and the mutation
/// one step. Predicates must therefore stay in-memory and must not block.
#[derive(Debug, Clone, Default)]
pub struct DeploymentRegistry {
    deployments: Arc<Mutex<BTreeMap<NamespacedName, BTreeSet<String>>>>,
}

impl DeploymentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the image set of `key` wholesale.
    pub fn upsert<I>(&self, key: NamespacedName, images: I)
    where
        I: IntoIterator<Item = String>,
    {
        let images: BTreeSet<String> = images.into_iter().collect();
        self.lock().insert(key, images);
    }

    /// Replaces the image set of `key` unless `has_newer_live` reports a more recent pod.
    /// Returns whether the entry was written.
    pub fn upsert_if_no_newer_live<I, F>(
        &self,
        key: NamespacedName,
        images: I,
        has_newer_live: F,
    ) -> bool
    where
        I: IntoIterator<Item = String>,
        F: FnOnce() -> bool,
    {
        let images: BTreeSet<String> = images.into_iter().collect();
        let mut deployments = self.lock();
        if has_newer_live() {
            return false;
        }
        deployments.insert(key, images);
        true
    }

    /// Removes `key` unless `has_newer_live` reports a more recent pod.
    /// Returns whether an entry was removed.
    pub fn remove_if_no_newer_live<F>(&self, key: &NamespacedName, has_newer_live: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        let mut deployments = self.lock();
        if has_newer_live() {
            return false;
        }
        deployments.remove(key).is_some()
    }

    /// Point-in-time copy of every deployment, ordered by key. The copy is detached
    /// from the registry and can be iterated without holding any lock.
    pub fn snapshot(&self) -> BTreeMap<NamespacedName, Vec<String>> {
        self.lock()
            .iter()
            .map(|(key, images)| (key.clone(), images.iter().cloned().collect()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<NamespacedName, BTreeSet<String>>> {
        // every critical section leaves the map consistent, so a poisoned lock is still usable
        self.deployments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn images(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn images_of(registry: &DeploymentRegistry, key: &NamespacedName) -> Option<Vec<String>> {
        registry.snapshot().remove(key)
    }

    #[test]
    fn test_namespaced_name_orders_by_namespace_then_name() {
        let mut keys = vec![
            NamespacedName::new("b", "a"),
            NamespacedName::new("a", "z"),
            NamespacedName::new("a", "b"),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                NamespacedName::new("a", "b"),
                NamespacedName::new("a", "z"),
                NamespacedName::new("b", "a"),
            ]
        );
        assert_eq!(NamespacedName::new("default", "svc").to_string(), "default/svc");
    }

    #[test]
    fn test_upsert_sorts_and_deduplicates() {
        let registry = DeploymentRegistry::new();
        let key = NamespacedName::new("default", "svc");
        registry.upsert(
            key.clone(),
            images(&["repo/b@sha256:2", "repo/a@sha256:1", "repo/b@sha256:2"]),
        );
        assert_eq!(
            images_of(&registry, &key),
            Some(images(&["repo/a@sha256:1", "repo/b@sha256:2"]))
        );
    }

    #[test]
    fn test_upsert_replaces_instead_of_merging() {
        let registry = DeploymentRegistry::new();
        let key = NamespacedName::new("default", "svc");
        registry.upsert(key.clone(), images(&["repo/a@sha256:1"]));
        registry.upsert(key.clone(), images(&["repo/a@sha256:2"]));
        assert_eq!(images_of(&registry, &key), Some(images(&["repo/a@sha256:2"])));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_conditional_upsert_respects_predicate() {
        let registry = DeploymentRegistry::new();
        let key = NamespacedName::new("default", "svc");
        registry.upsert(key.clone(), images(&["repo/a@sha256:2"]));

        assert!(!registry.upsert_if_no_newer_live(
            key.clone(),
            images(&["repo/a@sha256:1"]),
            || true
        ));
        assert_eq!(images_of(&registry, &key), Some(images(&["repo/a@sha256:2"])));

        assert!(registry.upsert_if_no_newer_live(
            key.clone(),
            images(&["repo/a@sha256:3"]),
            || false
        ));
        assert_eq!(images_of(&registry, &key), Some(images(&["repo/a@sha256:3"])));
    }

    #[test]
    fn test_remove_respects_predicate() {
        let registry = DeploymentRegistry::new();
        let key = NamespacedName::new("default", "svc");
        registry.upsert(key.clone(), images(&["repo/a@sha256:1"]));

        assert!(!registry.remove_if_no_newer_live(&key, || true));
        assert!(images_of(&registry, &key).is_some());

        assert!(registry.remove_if_no_newer_live(&key, || false));
        assert!(registry.is_empty());

        assert!(!registry.remove_if_no_newer_live(&key, || false));
    }

    #[test]
    fn test_snapshot_is_ordered_and_detached() {
        let registry = DeploymentRegistry::new();
        registry.upsert(NamespacedName::new("prod", "api"), images(&["repo/api@sha256:1"]));
        registry.upsert(NamespacedName::new("default", "svc"), images(&["repo/svc@sha256:2"]));

        let snapshot = registry.snapshot();
        registry.remove_if_no_newer_live(&NamespacedName::new("prod", "api"), || false);

        let keys: Vec<_> = snapshot.keys().cloned().collect();
        assert_eq!(
            keys,
            vec![
                NamespacedName::new("default", "svc"),
                NamespacedName::new("prod", "api"),
            ]
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_concurrent_upserts_never_interleave() {
        let registry = DeploymentRegistry::new();
        let key = NamespacedName::new("default", "svc");
        let sets = [
            images(&["repo/a@sha256:1", "repo/b@sha256:1"]),
            images(&["repo/a@sha256:2", "repo/b@sha256:2"]),
        ];

        std::thread::scope(|scope| {
            for set in &sets {
                let registry = registry.clone();
                let key = key.clone();
                scope.spawn(move || {
                    for _ in 0..500 {
                        registry.upsert(key.clone(), set.clone());
                    }
                });
            }
            for _ in 0..500 {
                if let Some(current) = images_of(&registry, &key) {
                    assert!(sets.contains(&current));
                }
            }
        });
    }
}
