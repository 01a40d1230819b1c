//! Chart resolution for a release spec
//!
//! Resolution holds the cache directory lock from locating the chart until
//! its dependencies are checked, and corrects out-of-date dependencies at
//! most once.

use keelson_core::{Chart, ReleaseSpec};
use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::ChartCache;
use crate::config::EnvSettings;
use crate::dependency::{DependencyUpdater, RepoDependencyUpdater, check_dependencies};
use crate::error::Result;
use crate::locator::{ChartLocator, ChartPathOptions, RepoLocator};

/// A located and loaded chart
#[derive(Debug, Clone)]
pub struct ResolvedChart {
    pub chart: Chart,
    /// Where the chart was loaded from
    pub path: PathBuf,
    pub options: ChartPathOptions,
    /// Whether dependencies were vendored during resolution
    pub dependencies_updated: bool,
}

/// Locates, loads and checks charts against one cache directory
#[derive(Clone)]
pub struct ChartResolver {
    cache: ChartCache,
    locator: Arc<dyn ChartLocator>,
    updater: Arc<dyn DependencyUpdater>,
}

impl ChartResolver {
    pub fn new(
        cache: ChartCache,
        locator: Arc<dyn ChartLocator>,
        updater: Arc<dyn DependencyUpdater>,
    ) -> Self {
        Self {
            cache,
            locator,
            updater,
        }
    }

    /// Resolver using HTTP repositories configured by `settings`
    pub fn with_settings(settings: EnvSettings, cache: ChartCache) -> Self {
        let locator: Arc<dyn ChartLocator> = Arc::new(RepoLocator::new(settings.clone()));
        let updater = Arc::new(RepoDependencyUpdater::new(locator.clone(), settings));
        Self::new(cache, locator, updater)
    }

    pub fn cache(&self) -> &ChartCache {
        &self.cache
    }

    /// Locate and load the chart a spec refers to
    pub async fn resolve(&self, spec: &ReleaseSpec) -> Result<ResolvedChart> {
        let _guard = self.cache.lock().await;

        let (options, name) = ChartPathOptions::from_spec(spec);
        tracing::debug!(
            chart = %name,
            repository = %options.repo_url,
            version = %options.version,
            "resolving chart"
        );

        let path = self.locator.locate(&name, &options, &self.cache).await?;
        let mut chart = Chart::load(&path)?;
        let mut dependencies_updated = false;

        if let Err(err) = check_dependencies(&chart) {
            if !spec.dependency_update || !err.is_dependency_mismatch() {
                return Err(err);
            }

            tracing::debug!(chart = chart.name(), "downloading chart dependencies");
            self.updater.update(&path, &spec.keyring, &self.cache).await?;
            dependencies_updated = true;

            chart = Chart::load(&path)?;
            check_dependencies(&chart)?;
        }

        Ok(ResolvedChart {
            chart,
            path,
            options,
            dependencies_updated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheLocks;
    use crate::error::RepoError;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Locator returning a fixed path, tracking how many calls overlap
    struct FakeLocator {
        path: PathBuf,
        active: AtomicUsize,
        max_active: AtomicUsize,
        calls: AtomicUsize,
    }

    impl FakeLocator {
        fn new(path: PathBuf) -> Self {
            Self {
                path,
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChartLocator for FakeLocator {
        async fn locate(&self, _: &str, _: &ChartPathOptions, _: &ChartCache) -> Result<PathBuf> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(self.path.clone())
        }
    }

    /// Updater that vendors a subchart, or does nothing when `fix` is false
    struct FakeUpdater {
        calls: AtomicUsize,
        fix: bool,
    }

    #[async_trait]
    impl DependencyUpdater for FakeUpdater {
        async fn update(&self, chart_dir: &Path, _: &str, _: &ChartCache) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fix {
                let redis = chart_dir.join("charts/redis");
                std::fs::create_dir_all(&redis)?;
                std::fs::write(redis.join("Chart.yaml"), "name: redis\nversion: 7.1.0\n")?;
            }
            Ok(())
        }
    }

    fn write_chart(dir: &Path, with_dependency: bool) {
        std::fs::create_dir_all(dir).unwrap();
        let mut chart_yaml = "apiVersion: v2\nname: web\nversion: 1.0.0\n".to_string();
        if with_dependency {
            chart_yaml.push_str("dependencies:\n  - name: redis\n    version: ^7.0.0\n    repository: https://charts.example.com\n");
        }
        std::fs::write(dir.join("Chart.yaml"), chart_yaml).unwrap();
    }

    fn spec(dependency_update: bool) -> ReleaseSpec {
        ReleaseSpec {
            chart: "web".to_string(),
            dependency_update,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_resolve_plain_chart() {
        let dir = TempDir::new().unwrap();
        let chart_dir = dir.path().join("web");
        write_chart(&chart_dir, false);

        let updater = Arc::new(FakeUpdater { calls: AtomicUsize::new(0), fix: true });
        let resolver = ChartResolver::new(
            ChartCache::new(dir.path().join("cache")),
            Arc::new(FakeLocator::new(chart_dir.clone())),
            updater.clone(),
        );

        let resolved = resolver.resolve(&spec(true)).await.unwrap();
        assert_eq!(resolved.chart.name(), "web");
        assert_eq!(resolved.path, chart_dir);
        assert!(!resolved.dependencies_updated);
        assert_eq!(updater.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dependency_update_runs_once_and_reloads() {
        let dir = TempDir::new().unwrap();
        let chart_dir = dir.path().join("web");
        write_chart(&chart_dir, true);

        let updater = Arc::new(FakeUpdater { calls: AtomicUsize::new(0), fix: true });
        let resolver = ChartResolver::new(
            ChartCache::new(dir.path().join("cache")),
            Arc::new(FakeLocator::new(chart_dir)),
            updater.clone(),
        );

        let resolved = resolver.resolve(&spec(true)).await.unwrap();
        assert!(resolved.dependencies_updated);
        assert_eq!(resolved.chart.dependency("redis").unwrap().version(), "7.1.0");
        assert_eq!(updater.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dependency_update_does_not_loop() {
        let dir = TempDir::new().unwrap();
        let chart_dir = dir.path().join("web");
        write_chart(&chart_dir, true);

        let updater = Arc::new(FakeUpdater { calls: AtomicUsize::new(0), fix: false });
        let resolver = ChartResolver::new(
            ChartCache::new(dir.path().join("cache")),
            Arc::new(FakeLocator::new(chart_dir)),
            updater.clone(),
        );

        let err = resolver.resolve(&spec(true)).await.unwrap_err();
        assert!(matches!(err, RepoError::DependencyMismatch { .. }));
        assert_eq!(updater.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_dependencies_without_update() {
        let dir = TempDir::new().unwrap();
        let chart_dir = dir.path().join("web");
        write_chart(&chart_dir, true);

        let updater = Arc::new(FakeUpdater { calls: AtomicUsize::new(0), fix: true });
        let resolver = ChartResolver::new(
            ChartCache::new(dir.path().join("cache")),
            Arc::new(FakeLocator::new(chart_dir)),
            updater.clone(),
        );

        let err = resolver.resolve(&spec(false)).await.unwrap_err();
        assert!(err.is_dependency_mismatch());
        assert_eq!(updater.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_cache_directory_serializes() {
        let dir = TempDir::new().unwrap();
        let chart_dir = dir.path().join("web");
        write_chart(&chart_dir, false);
        let cache_dir = dir.path().join("cache");
        std::fs::create_dir_all(&cache_dir).unwrap();

        let locks = CacheLocks::new();
        let locator = Arc::new(FakeLocator::new(chart_dir));
        let updater = Arc::new(FakeUpdater { calls: AtomicUsize::new(0), fix: false });

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let resolver =
                    ChartResolver::new(locks.handle(&cache_dir), locator.clone(), updater.clone());
                tokio::spawn(async move { resolver.resolve(&spec(false)).await.map(|_| ()) })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(locator.calls.load(Ordering::SeqCst), 4);
        assert_eq!(locator.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_different_cache_directories_run_in_parallel() {
        let dir = TempDir::new().unwrap();
        let chart_dir = dir.path().join("web");
        write_chart(&chart_dir, false);

        let locks = CacheLocks::new();
        let locator = Arc::new(FakeLocator::new(chart_dir));
        let updater = Arc::new(FakeUpdater { calls: AtomicUsize::new(0), fix: false });
        let barrier = Arc::new(tokio::sync::Barrier::new(2));

        let tasks: Vec<_> = ["a", "b"]
            .into_iter()
            .map(|name| {
                let cache_dir = dir.path().join(name);
                std::fs::create_dir_all(&cache_dir).unwrap();
                let resolver =
                    ChartResolver::new(locks.handle(&cache_dir), locator.clone(), updater.clone());
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    // Both caches are held at once
                    let _guard = resolver.cache().lock().await;
                    barrier.wait().await;
                })
            })
            .collect();

        tokio::time::timeout(Duration::from_secs(5), async {
            for task in tasks {
                task.await.unwrap();
            }
        })
        .await
        .unwrap();
    }
}
