//! Release backend: the capability that performs release actions
//!
//! `StoreBackend` records releases in a [`StorageDriver`]. It renders the
//! chart's static manifests, checks that every document is a Kubernetes
//! object, and walks each revision through the release state machine.

use async_trait::async_trait;
use keelson_core::{Chart, ChartFile, Values};
use std::sync::Arc;
use thiserror::Error;

use crate::actions::{InstallOptions, UninstallOptions, UpgradeOptions};
use crate::error::{KubeError, Result};
use crate::postrender::PostRenderer;
use crate::release::{ChartInfo, ReleaseState, StoredRelease};
use crate::storage::StorageDriver;

/// A failed mutating action, with the record it left behind if any
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ActionFailure {
    #[source]
    pub error: KubeError,
    pub release: Option<StoredRelease>,
}

impl ActionFailure {
    pub fn new(error: KubeError, release: Option<StoredRelease>) -> Self {
        Self { error, release }
    }
}

impl From<KubeError> for ActionFailure {
    fn from(error: KubeError) -> Self {
        Self {
            error,
            release: None,
        }
    }
}

/// Performs release actions against a release store
#[async_trait]
pub trait ReleaseBackend: Send + Sync {
    async fn install(
        &self,
        chart: &Chart,
        values: &Values,
        opts: &InstallOptions,
    ) -> std::result::Result<StoredRelease, ActionFailure>;

    async fn upgrade(
        &self,
        chart: &Chart,
        values: &Values,
        opts: &UpgradeOptions,
    ) -> std::result::Result<StoredRelease, ActionFailure>;

    /// Latest revision of a release
    async fn get(&self, namespace: &str, name: &str) -> Result<StoredRelease>;

    async fn uninstall(&self, opts: &UninstallOptions) -> Result<StoredRelease>;
}

/// Backend recording releases in a storage driver
#[derive(Clone)]
pub struct StoreBackend {
    driver: Arc<dyn StorageDriver>,
}

impl StoreBackend {
    pub fn new(driver: Arc<dyn StorageDriver>) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &Arc<dyn StorageDriver> {
        &self.driver
    }

    async fn prune_history(&self, namespace: &str, name: &str, max: u32) -> Result<()> {
        if max == 0 {
            return Ok(());
        }
        let history = self.driver.history(namespace, name).await?;
        for stale in history.iter().skip(max as usize) {
            tracing::debug!(release = name, revision = stale.revision, "pruning release history");
            self.driver.delete(namespace, name, stale.revision).await?;
        }
        Ok(())
    }
}

/// Concatenate the chart's manifests, CRDs first, each with a source header
pub fn render_manifest(chart: &Chart, skip_crds: bool) -> String {
    let mut documents = Vec::new();
    collect_documents(chart, chart.name(), skip_crds, &mut documents);
    documents.join("---\n")
}

fn collect_documents(chart: &Chart, prefix: &str, skip_crds: bool, out: &mut Vec<String>) {
    let crds: &[ChartFile] = if skip_crds { &[] } else { &chart.crds };
    for file in crds.iter().chain(chart.templates.iter()) {
        if !is_manifest_file(&file.name) {
            continue;
        }
        let body = String::from_utf8_lossy(&file.data);
        if body.trim().is_empty() {
            continue;
        }
        let mut document = format!("# Source: {}/{}\n{}", prefix, file.name, body);
        if !document.ends_with('\n') {
            document.push('\n');
        }
        out.push(document);
    }

    for dependency in &chart.dependencies {
        let prefix = format!("{}/charts/{}", prefix, dependency.name());
        collect_documents(dependency, &prefix, skip_crds, out);
    }
}

fn is_manifest_file(name: &str) -> bool {
    let file_name = name.rsplit('/').next().unwrap_or(name);
    !file_name.starts_with('_')
        && [".yaml", ".yml", ".json"]
            .iter()
            .any(|ext| file_name.ends_with(ext))
}

/// Check that every document of a manifest is a Kubernetes object
pub fn validate_manifest(manifest: &str) -> Result<()> {
    for (index, document) in split_documents(manifest).enumerate() {
        let value: serde_yaml::Value = serde_yaml::from_str(document)
            .map_err(|e| KubeError::InvalidManifest(format!("document {}: {}", index + 1, e)))?;
        if value.is_null() {
            continue;
        }
        let mapping = value.as_mapping().ok_or_else(|| {
            KubeError::InvalidManifest(format!("document {} is not a mapping", index + 1))
        })?;
        for field in ["apiVersion", "kind"] {
            if !mapping.contains_key(field) {
                return Err(KubeError::InvalidManifest(format!(
                    "document {} is missing {}",
                    index + 1,
                    field
                )));
            }
        }
    }
    Ok(())
}

/// Split a multi-document YAML stream on `---` separator lines
pub fn split_documents(manifest: &str) -> impl Iterator<Item = &str> {
    let mut documents = Vec::new();
    let mut start = 0;
    let mut offset = 0;
    for line in manifest.split_inclusive('\n') {
        if line.trim_end() == "---" || line.starts_with("--- ") {
            documents.push(&manifest[start..offset]);
            start = offset + line.len();
        }
        offset += line.len();
    }
    documents.push(&manifest[start..]);
    documents.into_iter().filter(|d| !d.trim().is_empty())
}

async fn post_render(manifest: String, renderer: Option<&PostRenderer>) -> Result<String> {
    match renderer {
        Some(renderer) => renderer.run(&manifest).await,
        None => Ok(manifest),
    }
}

#[async_trait]
impl ReleaseBackend for StoreBackend {
    async fn install(
        &self,
        chart: &Chart,
        values: &Values,
        opts: &InstallOptions,
    ) -> std::result::Result<StoredRelease, ActionFailure> {
        let previous = match self.driver.get_latest(&opts.namespace, &opts.name).await {
            Ok(existing) if existing.state.holds_name() && !opts.replace => {
                return Err(KubeError::ReleaseAlreadyExists {
                    name: opts.name.clone(),
                    namespace: opts.namespace.clone(),
                }
                .into());
            }
            Ok(existing) => Some(existing),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };

        let manifest = post_render(
            render_manifest(chart, opts.skip_crds),
            opts.post_renderer.as_ref(),
        )
        .await?;

        let mut release = StoredRelease::for_install(
            opts.name.clone(),
            opts.namespace.clone(),
            ChartInfo::from(chart),
            values.clone(),
            manifest,
        );
        release.description = opts.description.clone();
        if let Some(previous) = &previous {
            release.revision = previous.revision + 1;
        }

        if opts.dry_run {
            validate_manifest(&release.manifest)?;
            return Ok(release);
        }

        self.driver.create(&release).await?;

        if let Err(error) = validate_manifest(&release.manifest) {
            release.mark_failed(format!("Release \"{}\" failed: {}", release.name, error));
            self.driver.update(&release).await?;

            if opts.atomic {
                tracing::warn!(release = %release.name, "install failed, purging release");
                self.driver
                    .delete_all(&release.namespace, &release.name)
                    .await?;
                return Err(ActionFailure::new(error, None));
            }
            return Err(ActionFailure::new(error, Some(release)));
        }

        release.mark_deployed();
        self.driver.update(&release).await?;
        tracing::info!(
            release = %release.name,
            namespace = %release.namespace,
            revision = release.revision,
            "release installed"
        );
        Ok(release)
    }

    async fn upgrade(
        &self,
        chart: &Chart,
        values: &Values,
        opts: &UpgradeOptions,
    ) -> std::result::Result<StoredRelease, ActionFailure> {
        let mut previous = self.driver.get_latest(&opts.namespace, &opts.name).await?;
        if matches!(previous.state, ReleaseState::Uninstalled) {
            return Err(KubeError::ReleaseNotFound {
                name: opts.name.clone(),
                namespace: opts.namespace.clone(),
            }
            .into());
        }

        let values = if opts.reuse_values && !opts.reset_values {
            let mut merged = previous.values.clone();
            merged.merge(values);
            merged
        } else {
            values.clone()
        };

        let manifest = post_render(
            render_manifest(chart, opts.skip_crds),
            opts.post_renderer.as_ref(),
        )
        .await?;

        let mut release =
            StoredRelease::for_upgrade(&previous, ChartInfo::from(chart), values, manifest);
        release.description = opts.description.clone();

        if opts.dry_run {
            validate_manifest(&release.manifest)?;
            return Ok(release);
        }

        self.driver.create(&release).await?;

        if let Err(error) = validate_manifest(&release.manifest) {
            release.mark_failed(format!("Upgrade \"{}\" failed: {}", release.name, error));
            self.driver.update(&release).await?;

            if opts.atomic {
                tracing::warn!(
                    release = %release.name,
                    revision = previous.revision,
                    "upgrade failed, restoring previous revision"
                );
                self.driver
                    .delete(&release.namespace, &release.name, release.revision)
                    .await?;
                return Err(ActionFailure::new(error, Some(previous)));
            }
            return Err(ActionFailure::new(error, Some(release)));
        }

        if !matches!(previous.state, ReleaseState::Failed { .. }) {
            previous.mark_superseded();
            self.driver.update(&previous).await?;
        }
        release.mark_deployed();
        self.driver.update(&release).await?;

        if let Some(max) = opts.max_history {
            self.prune_history(&release.namespace, &release.name, max)
                .await?;
        }

        tracing::info!(
            release = %release.name,
            namespace = %release.namespace,
            revision = release.revision,
            "release upgraded"
        );
        Ok(release)
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<StoredRelease> {
        self.driver.get_latest(namespace, name).await
    }

    async fn uninstall(&self, opts: &UninstallOptions) -> Result<StoredRelease> {
        let mut latest = self.driver.get_latest(&opts.namespace, &opts.name).await?;

        if opts.keep_history {
            latest.mark_uninstalled();
            self.driver.update(&latest).await?;
        } else {
            self.driver.delete_all(&opts.namespace, &opts.name).await?;
            latest.mark_uninstalled();
        }

        tracing::info!(release = %opts.name, namespace = %opts.namespace, "release uninstalled");
        Ok(latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDriver;
    use std::collections::BTreeMap;

    const CONFIGMAP: &str = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: web\n";

    fn chart_with(templates: &[(&str, &str)]) -> Chart {
        let mut files = BTreeMap::new();
        files.insert(
            "Chart.yaml".to_string(),
            b"apiVersion: v2\nname: web\nversion: 1.2.0\nappVersion: \"3.1\"\n".to_vec(),
        );
        for (name, body) in templates {
            files.insert(name.to_string(), body.as_bytes().to_vec());
        }
        Chart::from_files(files).unwrap()
    }

    fn valid_chart() -> Chart {
        chart_with(&[("templates/configmap.yaml", CONFIGMAP)])
    }

    fn broken_chart() -> Chart {
        chart_with(&[("templates/broken.yaml", "just: a mapping\n")])
    }

    fn backend() -> (StoreBackend, MemoryDriver) {
        let driver = MemoryDriver::new();
        (StoreBackend::new(Arc::new(driver.clone())), driver)
    }

    #[test]
    fn test_render_manifest_layout() {
        let mut files = BTreeMap::new();
        files.insert(
            "Chart.yaml".to_string(),
            b"name: web\nversion: 1.0.0\n".to_vec(),
        );
        files.insert("templates/_helpers.tpl".to_string(), b"{{- define }}".to_vec());
        files.insert("templates/NOTES.txt".to_string(), b"hello".to_vec());
        files.insert("templates/configmap.yaml".to_string(), CONFIGMAP.as_bytes().to_vec());
        files.insert(
            "crds/widget.yaml".to_string(),
            b"apiVersion: apiextensions.k8s.io/v1\nkind: CustomResourceDefinition\n".to_vec(),
        );
        files.insert("charts/redis/Chart.yaml".to_string(), b"name: redis\nversion: 7.0.0\n".to_vec());
        files.insert(
            "charts/redis/templates/svc.yaml".to_string(),
            b"apiVersion: v1\nkind: Service".to_vec(),
        );
        let chart = Chart::from_files(files).unwrap();

        let manifest = render_manifest(&chart, false);
        let sources: Vec<&str> = manifest
            .lines()
            .filter(|l| l.starts_with("# Source:"))
            .collect();
        assert_eq!(
            sources,
            vec![
                "# Source: web/crds/widget.yaml",
                "# Source: web/templates/configmap.yaml",
                "# Source: web/charts/redis/templates/svc.yaml",
            ]
        );
        assert!(validate_manifest(&manifest).is_ok());

        let without_crds = render_manifest(&chart, true);
        assert!(!without_crds.contains("CustomResourceDefinition"));
    }

    #[test]
    fn test_validate_manifest() {
        assert!(validate_manifest("").is_ok());
        assert!(validate_manifest("---\n# only a comment\n").is_ok());
        assert!(validate_manifest(CONFIGMAP).is_ok());
        assert!(matches!(
            validate_manifest("kind: ConfigMap\n"),
            Err(KubeError::InvalidManifest(_))
        ));
        assert!(validate_manifest("- a\n- b\n").is_err());
        assert!(validate_manifest(&format!("{CONFIGMAP}---\nfoo: [unclosed\n")).is_err());
    }

    #[test]
    fn test_split_documents() {
        let docs: Vec<&str> = split_documents("a: 1\n---\nb: 2\n--- \n\n---\nc: 3").collect();
        assert_eq!(docs, vec!["a: 1\n", "b: 2\n", "c: 3"]);
    }

    #[tokio::test]
    async fn test_install_records_deployed_release() {
        let (backend, driver) = backend();
        let values = Values::from_yaml("replicas: 2").unwrap();
        let mut opts = InstallOptions::new("web", "apps");
        opts.description = "first install".to_string();

        let release = backend.install(&valid_chart(), &values, &opts).await.unwrap();
        assert_eq!(release.revision, 1);
        assert_eq!(release.state, ReleaseState::Deployed);
        assert_eq!(release.chart.app_version, "3.1");
        assert_eq!(release.description, "first install");

        let stored = driver.get_latest("apps", "web").await.unwrap();
        assert_eq!(stored.values, values);
        assert!(stored.manifest.contains("kind: ConfigMap"));
    }

    #[tokio::test]
    async fn test_install_refuses_name_in_use() {
        let (backend, _) = backend();
        let opts = InstallOptions::new("web", "apps");
        backend.install(&valid_chart(), &Values::new(), &opts).await.unwrap();

        let failure = backend
            .install(&valid_chart(), &Values::new(), &opts)
            .await
            .unwrap_err();
        assert!(matches!(failure.error, KubeError::ReleaseAlreadyExists { .. }));
        assert!(failure.release.is_none());

        let mut replace = opts.clone();
        replace.replace = true;
        let release = backend.install(&valid_chart(), &Values::new(), &replace).await.unwrap();
        assert_eq!(release.revision, 2);
    }

    #[tokio::test]
    async fn test_install_dry_run_does_not_write() {
        let (backend, driver) = backend();
        let opts = InstallOptions::new("web", "apps").dry_run();

        let release = backend.install(&valid_chart(), &Values::new(), &opts).await.unwrap();
        assert!(release.state.is_pending());
        assert_eq!(driver.release_count(), 0);
        assert_eq!(driver.operation_counts().creates, 0);
    }

    #[tokio::test]
    async fn test_failed_install_leaves_failed_record() {
        let (backend, driver) = backend();
        let opts = InstallOptions::new("web", "apps");

        let failure = backend
            .install(&broken_chart(), &Values::new(), &opts)
            .await
            .unwrap_err();
        assert!(matches!(failure.error, KubeError::InvalidManifest(_)));
        let release = failure.release.unwrap();
        assert_eq!(release.state.status_name(), "failed");

        let stored = driver.get_latest("apps", "web").await.unwrap();
        assert_eq!(stored.state.status_name(), "failed");

        // A failed release does not hold its name
        let fixed = backend.install(&valid_chart(), &Values::new(), &opts).await.unwrap();
        assert_eq!(fixed.revision, 2);
    }

    #[tokio::test]
    async fn test_atomic_install_purges() {
        let (backend, driver) = backend();
        let mut opts = InstallOptions::new("web", "apps");
        opts.atomic = true;

        let failure = backend
            .install(&broken_chart(), &Values::new(), &opts)
            .await
            .unwrap_err();
        assert!(failure.release.is_none());
        assert!(!driver.exists("apps", "web").await.unwrap());
    }

    #[tokio::test]
    async fn test_upgrade_supersedes_and_reuses_values() {
        let (backend, driver) = backend();
        let first = Values::from_yaml("replicas: 2\nimage: nginx").unwrap();
        backend
            .install(&valid_chart(), &first, &InstallOptions::new("web", "apps"))
            .await
            .unwrap();

        let mut opts = UpgradeOptions::new("web", "apps");
        opts.reuse_values = true;
        let release = backend
            .upgrade(&valid_chart(), &Values::from_yaml("replicas: 5").unwrap(), &opts)
            .await
            .unwrap();

        assert_eq!(release.revision, 2);
        assert_eq!(release.state, ReleaseState::Deployed);
        assert_eq!(
            release.values,
            Values::from_yaml("replicas: 5\nimage: nginx").unwrap()
        );

        let first = driver.get("apps", "web", 1).await.unwrap();
        assert_eq!(first.state, ReleaseState::Superseded);
    }

    #[tokio::test]
    async fn test_upgrade_reset_values_wins() {
        let (backend, _) = backend();
        backend
            .install(
                &valid_chart(),
                &Values::from_yaml("image: nginx").unwrap(),
                &InstallOptions::new("web", "apps"),
            )
            .await
            .unwrap();

        let mut opts = UpgradeOptions::new("web", "apps");
        opts.reuse_values = true;
        opts.reset_values = true;
        let release = backend
            .upgrade(&valid_chart(), &Values::from_yaml("replicas: 5").unwrap(), &opts)
            .await
            .unwrap();
        assert_eq!(release.values, Values::from_yaml("replicas: 5").unwrap());
    }

    #[tokio::test]
    async fn test_upgrade_prunes_history() {
        let (backend, driver) = backend();
        backend
            .install(&valid_chart(), &Values::new(), &InstallOptions::new("web", "apps"))
            .await
            .unwrap();

        let mut opts = UpgradeOptions::new("web", "apps");
        opts.max_history = Some(2);
        for _ in 0..3 {
            backend.upgrade(&valid_chart(), &Values::new(), &opts).await.unwrap();
        }

        let history = driver.history("apps", "web").await.unwrap();
        let revisions: Vec<u32> = history.iter().map(|r| r.revision).collect();
        assert_eq!(revisions, vec![4, 3]);
    }

    #[tokio::test]
    async fn test_failed_upgrade() {
        let (backend, driver) = backend();
        backend
            .install(&valid_chart(), &Values::new(), &InstallOptions::new("web", "apps"))
            .await
            .unwrap();

        let failure = backend
            .upgrade(&broken_chart(), &Values::new(), &UpgradeOptions::new("web", "apps"))
            .await
            .unwrap_err();
        let failed = failure.release.unwrap();
        assert_eq!(failed.revision, 2);
        assert_eq!(failed.state.status_name(), "failed");

        // The previous revision stays deployed
        let first = driver.get("apps", "web", 1).await.unwrap();
        assert_eq!(first.state, ReleaseState::Deployed);
    }

    #[tokio::test]
    async fn test_atomic_upgrade_restores_previous() {
        let (backend, driver) = backend();
        backend
            .install(&valid_chart(), &Values::new(), &InstallOptions::new("web", "apps"))
            .await
            .unwrap();

        let mut opts = UpgradeOptions::new("web", "apps");
        opts.atomic = true;
        let failure = backend
            .upgrade(&broken_chart(), &Values::new(), &opts)
            .await
            .unwrap_err();
        assert_eq!(failure.release.unwrap().revision, 1);

        let latest = driver.get_latest("apps", "web").await.unwrap();
        assert_eq!(latest.revision, 1);
        assert_eq!(latest.state, ReleaseState::Deployed);
    }

    #[tokio::test]
    async fn test_upgrade_missing_release() {
        let (backend, _) = backend();
        let failure = backend
            .upgrade(&valid_chart(), &Values::new(), &UpgradeOptions::new("web", "apps"))
            .await
            .unwrap_err();
        assert!(failure.error.is_not_found());
    }

    #[tokio::test]
    async fn test_uninstall() {
        let (backend, driver) = backend();
        backend
            .install(&valid_chart(), &Values::new(), &InstallOptions::new("web", "apps"))
            .await
            .unwrap();

        let mut opts = UninstallOptions::new("web", "apps");
        opts.keep_history = true;
        let release = backend.uninstall(&opts).await.unwrap();
        assert_eq!(release.state, ReleaseState::Uninstalled);
        assert!(driver.exists("apps", "web").await.unwrap());

        opts.keep_history = false;
        backend.uninstall(&opts).await.unwrap();
        assert!(!driver.exists("apps", "web").await.unwrap());

        let err = backend.uninstall(&opts).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
