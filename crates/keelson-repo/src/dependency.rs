//! Chart dependency checking and vendoring
//!
//! Dependencies declared in `Chart.yaml` must be vendored under `charts/`
//! before a chart can be installed. `check_dependencies` reports what is
//! missing or out of date; a `DependencyUpdater` fetches the declared
//! dependencies and replaces the vendored copies.

use async_trait::async_trait;
use keelson_core::{Chart, ChartDependency};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::ChartCache;
use crate::config::{EnvSettings, RepositoryConfig};
use crate::error::{RepoError, Result};
use crate::locator::{ChartLocator, ChartPathOptions, verify_provenance};
use crate::version::{VersionConstraint, parse_version};

/// Directory holding vendored subcharts
pub const CHARTS_DIR: &str = "charts";

/// Check that every enabled dependency is vendored with a satisfying version
pub fn check_dependencies(chart: &Chart) -> Result<()> {
    let mut missing = Vec::new();
    let mut mismatched = Vec::new();

    for dep in chart.metadata.dependencies.iter().filter(|d| d.enabled) {
        let vendored = chart
            .dependency(&dep.name)
            .or_else(|| chart.dependency(dep.effective_name()));

        let Some(vendored) = vendored else {
            missing.push(dep.name.clone());
            continue;
        };

        if dep.version.trim().is_empty() {
            continue;
        }
        let constraint = VersionConstraint::parse(&dep.version)?;
        let satisfied = parse_version(vendored.version())
            .map(|v| constraint.matches(&v))
            .unwrap_or(false);
        if !satisfied {
            mismatched.push(format!(
                "{} (have {}, want {})",
                dep.name,
                vendored.version(),
                dep.version
            ));
        }
    }

    if missing.is_empty() && mismatched.is_empty() {
        tracing::debug!(chart = chart.name(), "chart dependencies are up to date");
        return Ok(());
    }
    Err(RepoError::DependencyMismatch {
        missing,
        mismatched,
    })
}

/// Fetches declared dependencies into a chart's `charts/` directory
#[async_trait]
pub trait DependencyUpdater: Send + Sync {
    async fn update(&self, chart_dir: &Path, keyring: &str, cache: &ChartCache) -> Result<()>;
}

/// Updater that locates each dependency through a [`ChartLocator`]
pub struct RepoDependencyUpdater {
    locator: Arc<dyn ChartLocator>,
    settings: EnvSettings,
}

impl RepoDependencyUpdater {
    pub fn new(locator: Arc<dyn ChartLocator>, settings: EnvSettings) -> Self {
        Self { locator, settings }
    }

    async fn fetch(
        &self,
        chart_dir: &Path,
        dep: &ChartDependency,
        repositories: &RepositoryConfig,
        keyring: &str,
        cache: &ChartCache,
    ) -> Result<PathBuf> {
        let repository = dep.repository.trim();

        if let Some(local) = repository.strip_prefix("file://") {
            let path = chart_dir.join(local);
            if !path.exists() {
                return Err(RepoError::DependencyUpdateFailed {
                    message: format!("{}: {} does not exist", dep.name, path.display()),
                });
            }
            return Ok(path);
        }

        let mut options = ChartPathOptions {
            version: dep.version.clone(),
            keyring: keyring.to_string(),
            ..Default::default()
        };

        let reference = if let Some(repo_name) = repository
            .strip_prefix('@')
            .or_else(|| repository.strip_prefix("alias:"))
        {
            if repositories.get(repo_name).is_none() {
                return Err(RepoError::RepositoryNotFound {
                    name: repo_name.to_string(),
                });
            }
            format!("{repo_name}/{}", dep.name)
        } else if repository.starts_with("http://") || repository.starts_with("https://") {
            if let Some(configured) = repositories.find_by_url(repository) {
                options.username = configured.username.clone();
                options.password = configured.password.clone();
                options.ca_file = configured.ca_file.clone();
                options.cert_file = configured.cert_file.clone();
                options.key_file = configured.key_file.clone();
                options.insecure_skip_tls_verify = configured.insecure_skip_tls_verify;
            }
            options.repo_url = repository.to_string();
            dep.name.clone()
        } else if repository.is_empty() {
            return Err(RepoError::DependencyUpdateFailed {
                message: format!("{} has no repository to fetch it from", dep.name),
            });
        } else {
            return Err(RepoError::UnsupportedReference {
                reference: repository.to_string(),
                reason: format!("unsupported repository for dependency {}", dep.name),
            });
        };

        let path = self.locator.locate(&reference, &options, cache).await?;

        let provenance = PathBuf::from(format!("{}.prov", path.display()));
        if !keyring.is_empty() && provenance.exists() {
            verify_provenance(&path, keyring)?;
        }
        Ok(path)
    }
}

#[async_trait]
impl DependencyUpdater for RepoDependencyUpdater {
    async fn update(&self, chart_dir: &Path, keyring: &str, cache: &ChartCache) -> Result<()> {
        if !chart_dir.is_dir() {
            return Err(RepoError::DependencyUpdateFailed {
                message: format!(
                    "{} is not a chart directory; only unpacked charts can be updated",
                    chart_dir.display()
                ),
            });
        }

        let chart = Chart::load_dir(chart_dir)?;
        let repositories = self.settings.repositories()?;
        let charts_dir = chart_dir.join(CHARTS_DIR);
        std::fs::create_dir_all(&charts_dir)?;

        for dep in chart.metadata.dependencies.iter().filter(|d| d.enabled) {
            let source = self
                .fetch(chart_dir, dep, &repositories, keyring, cache)
                .await?;
            remove_vendored(&charts_dir, &dep.name)?;
            vendor(&source, &charts_dir)?;
            tracing::debug!(dependency = %dep.name, source = %source.display(), "vendored dependency");
        }

        tracing::info!(chart = chart.name(), "updated chart dependencies");
        Ok(())
    }
}

/// Remove vendored copies of a dependency, unpacked or archived
fn remove_vendored(charts_dir: &Path, name: &str) -> Result<()> {
    for entry in std::fs::read_dir(charts_dir)? {
        let path = entry?.path();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if path.is_dir() {
            let vendored = Chart::load_dir(&path).map(|c| c.name() == name).unwrap_or(false);
            if vendored || file_name == name {
                std::fs::remove_dir_all(&path)?;
            }
        } else if keelson_core::archive::is_archive(&path) {
            let stem = file_name
                .trim_end_matches(".tgz")
                .trim_end_matches(".tar.gz");
            let is_copy = stem
                .strip_prefix(name)
                .and_then(|rest| rest.strip_prefix('-'))
                .is_some_and(|version| parse_version(version).is_ok());
            if is_copy {
                std::fs::remove_file(&path)?;
            }
        }
    }
    Ok(())
}

fn vendor(source: &Path, charts_dir: &Path) -> Result<()> {
    let Some(file_name) = source.file_name() else {
        return Err(RepoError::DependencyUpdateFailed {
            message: format!("invalid dependency path {}", source.display()),
        });
    };

    if source.is_dir() {
        copy_dir(source, &charts_dir.join(file_name))
    } else {
        std::fs::copy(source, charts_dir.join(file_name))?;
        Ok(())
    }
}

fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(from) {
        let entry = entry.map_err(|e| RepoError::DependencyUpdateFailed {
            message: e.to_string(),
        })?;
        let Ok(relative) = entry.path().strip_prefix(from) else {
            continue;
        };
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
