//! Chart cache directories
//!
//! Indexes and downloaded archives for a process share one cache directory.
//! Every resolution holds the directory's lock for its whole duration, so two
//! resolutions against the same directory never interleave while resolutions
//! against different directories proceed in parallel.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

/// Handle to one cache directory
#[derive(Debug, Clone)]
pub struct ChartCache {
    root: PathBuf,
    lock: Arc<AsyncMutex<()>>,
}

impl ChartCache {
    /// A standalone handle. Prefer [`CacheLocks::handle`] so handles share a lock.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Arc::new(AsyncMutex::new(())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Wait for exclusive use of the directory
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// Cached `index.yaml` of a named repository
    pub fn index_path(&self, repo_name: &str) -> PathBuf {
        self.root.join(format!("{repo_name}-index.yaml"))
    }

    /// Where a downloaded archive is kept
    pub fn archive_path(&self, archive_name: &str) -> PathBuf {
        self.root.join(archive_name)
    }

    /// Whether two handles serialize against each other
    pub fn shares_lock_with(&self, other: &ChartCache) -> bool {
        Arc::ptr_eq(&self.lock, &other.lock)
    }
}

/// Registry handing out one shared handle per cache directory
#[derive(Debug, Clone, Default)]
pub struct CacheLocks {
    handles: Arc<Mutex<HashMap<PathBuf, ChartCache>>>,
}

impl CacheLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for `root`
    ///
    /// Spellings of one directory share a handle whether or not it exists yet.
    pub fn handle(&self, root: &Path) -> ChartCache {
        let key = lock_key(root);
        let mut handles = self
            .handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        handles
            .entry(key)
            .or_insert_with(|| ChartCache::new(root))
            .clone()
    }
}

/// Absolute form of `root` with its longest existing ancestor canonicalized
fn lock_key(root: &Path) -> PathBuf {
    let absolute = if root.is_absolute() {
        root.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(root),
            Err(_) => root.to_path_buf(),
        }
    };

    let components: Vec<Component<'_>> = absolute.components().collect();
    for split in (1..=components.len()).rev() {
        let existing: PathBuf = components[..split].iter().collect();
        if let Ok(canonical) = std::fs::canonicalize(&existing) {
            return push_components(canonical, &components[split..]);
        }
    }
    push_components(PathBuf::new(), &components)
}

/// Append components, folding `.` and `..` without touching the filesystem
fn push_components(mut base: PathBuf, components: &[Component<'_>]) -> PathBuf {
    for component in components {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                base.pop();
            }
            other => base.push(other.as_os_str()),
        }
    }
    base
}
