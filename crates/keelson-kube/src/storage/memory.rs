//! In-memory storage driver
//!
//! Keeps releases in process. Used for previews, for the `memory` driver
//! setting, and by tests that need a store without a cluster.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{StorageDriver, latest_only};
use crate::error::{KubeError, Result};
use crate::release::StoredRelease;

/// namespace -> name -> revision -> release
type Store = HashMap<String, HashMap<String, BTreeMap<u32, StoredRelease>>>;

/// In-memory storage driver
#[derive(Clone, Default)]
pub struct MemoryDriver {
    store: Arc<Mutex<Store>>,
    operations: Arc<Mutex<OperationCounts>>,
}

/// Counts of operations performed, for assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub lists: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl MemoryDriver {
    /// Create a new empty driver
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-populated releases
    pub fn with_releases(releases: Vec<StoredRelease>) -> Self {
        let driver = Self::new();
        {
            let mut store = driver.store();
            for release in releases {
                store
                    .entry(release.namespace.clone())
                    .or_default()
                    .entry(release.name.clone())
                    .or_default()
                    .insert(release.revision, release);
            }
        }
        driver
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.counts().clone()
    }

    /// Count total revisions held
    pub fn release_count(&self) -> usize {
        self.store()
            .values()
            .flat_map(|ns| ns.values())
            .map(|revisions| revisions.len())
            .sum()
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn counts(&self) -> MutexGuard<'_, OperationCounts> {
        self.operations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn not_found(namespace: &str, name: &str) -> KubeError {
    KubeError::ReleaseNotFound {
        name: name.to_string(),
        namespace: namespace.to_string(),
    }
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    async fn get(&self, namespace: &str, name: &str, revision: u32) -> Result<StoredRelease> {
        self.counts().gets += 1;
        self.store()
            .get(namespace)
            .and_then(|ns| ns.get(name))
            .and_then(|revisions| revisions.get(&revision))
            .cloned()
            .ok_or_else(|| not_found(namespace, name))
    }

    async fn get_latest(&self, namespace: &str, name: &str) -> Result<StoredRelease> {
        self.counts().gets += 1;
        self.store()
            .get(namespace)
            .and_then(|ns| ns.get(name))
            .and_then(|revisions| revisions.values().next_back())
            .cloned()
            .ok_or_else(|| not_found(namespace, name))
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<StoredRelease>> {
        self.counts().lists += 1;
        let releases = self
            .store()
            .iter()
            .filter(|(ns, _)| namespace.is_none_or(|n| n == ns.as_str()))
            .flat_map(|(_, names)| names.values())
            .flat_map(|revisions| revisions.values())
            .cloned()
            .collect();
        Ok(latest_only(releases))
    }

    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>> {
        self.counts().lists += 1;
        let releases: Vec<StoredRelease> = self
            .store()
            .get(namespace)
            .and_then(|ns| ns.get(name))
            .map(|revisions| revisions.values().rev().cloned().collect())
            .unwrap_or_default();

        if releases.is_empty() {
            return Err(not_found(namespace, name));
        }
        Ok(releases)
    }

    async fn create(&self, release: &StoredRelease) -> Result<()> {
        self.counts().creates += 1;
        let mut store = self.store();
        let revisions = store
            .entry(release.namespace.clone())
            .or_default()
            .entry(release.name.clone())
            .or_default();

        if revisions.contains_key(&release.revision) {
            return Err(KubeError::ReleaseAlreadyExists {
                name: release.name.clone(),
                namespace: release.namespace.clone(),
            });
        }
        revisions.insert(release.revision, release.clone());
        Ok(())
    }

    async fn update(&self, release: &StoredRelease) -> Result<()> {
        self.counts().updates += 1;
        self.store()
            .entry(release.namespace.clone())
            .or_default()
            .entry(release.name.clone())
            .or_default()
            .insert(release.revision, release.clone());
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str, revision: u32) -> Result<StoredRelease> {
        self.counts().deletes += 1;
        let mut store = self.store();
        let names = store.get_mut(namespace).ok_or_else(|| not_found(namespace, name))?;
        let revisions = names.get_mut(name).ok_or_else(|| not_found(namespace, name))?;
        let release = revisions
            .remove(&revision)
            .ok_or_else(|| not_found(namespace, name))?;
        if revisions.is_empty() {
            names.remove(name);
        }
        Ok(release)
    }

    async fn delete_all(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>> {
        self.counts().deletes += 1;
        let releases: Vec<StoredRelease> = self
            .store()
            .get_mut(namespace)
            .and_then(|ns| ns.remove(name))
            .map(|revisions| revisions.into_values().rev().collect())
            .unwrap_or_default();

        if releases.is_empty() {
            return Err(not_found(namespace, name));
        }
        Ok(releases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::{ChartInfo, ReleaseState};
    use keelson_core::Values;

    fn create_test_release(name: &str, namespace: &str, revision: u32) -> StoredRelease {
        let mut release = StoredRelease::for_install(
            name.to_string(),
            namespace.to_string(),
            ChartInfo {
                name: "web".to_string(),
                version: "1.0.0".to_string(),
                app_version: String::new(),
            },
            Values::new(),
            "apiVersion: v1\nkind: ConfigMap".to_string(),
        );
        release.revision = revision;
        release.state = ReleaseState::Deployed;
        release
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let driver = MemoryDriver::new();

        let release = create_test_release("myapp", "default", 1);
        driver.create(&release).await.unwrap();

        let retrieved = driver.get("default", "myapp", 1).await.unwrap();
        assert_eq!(retrieved.name, "myapp");
        assert_eq!(retrieved.revision, 1);

        let counts = driver.operation_counts();
        assert_eq!(counts.creates, 1);
        assert_eq!(counts.gets, 1);
    }

    #[tokio::test]
    async fn test_create_duplicate_fails() {
        let driver = MemoryDriver::new();

        let release = create_test_release("myapp", "default", 1);
        driver.create(&release).await.unwrap();

        let result = driver.create(&release).await;
        assert!(matches!(result, Err(KubeError::ReleaseAlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_get_not_found() {
        let driver = MemoryDriver::new();

        let result = driver.get_latest("default", "nonexistent").await;
        assert!(matches!(result, Err(KubeError::ReleaseNotFound { .. })));
        assert!(!driver.exists("default", "nonexistent").await.unwrap());
    }

    #[tokio::test]
    async fn test_latest_and_history() {
        let driver = MemoryDriver::new();

        for revision in 1..=3 {
            driver
                .create(&create_test_release("myapp", "default", revision))
                .await
                .unwrap();
        }

        let latest = driver.get_latest("default", "myapp").await.unwrap();
        assert_eq!(latest.revision, 3);

        let history = driver.history("default", "myapp").await.unwrap();
        let revisions: Vec<u32> = history.iter().map(|r| r.revision).collect();
        assert_eq!(revisions, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_list_latest_by_namespace() {
        let driver = MemoryDriver::new();

        driver.create(&create_test_release("app1", "default", 1)).await.unwrap();
        driver.create(&create_test_release("app1", "default", 2)).await.unwrap();
        driver.create(&create_test_release("app2", "default", 1)).await.unwrap();
        driver.create(&create_test_release("app1", "staging", 1)).await.unwrap();

        assert_eq!(driver.list(None).await.unwrap().len(), 3);

        let in_default = driver.list(Some("default")).await.unwrap();
        assert_eq!(in_default.len(), 2);
        let app1 = in_default.iter().find(|r| r.name == "app1").unwrap();
        assert_eq!(app1.revision, 2);
    }

    #[tokio::test]
    async fn test_update() {
        let driver = MemoryDriver::new();

        let mut release = create_test_release("myapp", "default", 1);
        driver.create(&release).await.unwrap();

        release.manifest = "updated manifest".to_string();
        driver.update(&release).await.unwrap();

        let retrieved = driver.get("default", "myapp", 1).await.unwrap();
        assert_eq!(retrieved.manifest, "updated manifest");
    }

    #[tokio::test]
    async fn test_delete_and_delete_all() {
        let driver = MemoryDriver::with_releases(vec![
            create_test_release("myapp", "default", 1),
            create_test_release("myapp", "default", 2),
            create_test_release("other", "default", 1),
        ]);
        assert_eq!(driver.release_count(), 3);

        let deleted = driver.delete("default", "myapp", 1).await.unwrap();
        assert_eq!(deleted.revision, 1);
        assert!(driver.get("default", "myapp", 2).await.is_ok());

        let deleted = driver.delete_all("default", "myapp").await.unwrap();
        assert_eq!(deleted.len(), 1);
        assert!(matches!(
            driver.history("default", "myapp").await,
            Err(KubeError::ReleaseNotFound { .. })
        ));
        assert_eq!(driver.release_count(), 1);
    }
}
