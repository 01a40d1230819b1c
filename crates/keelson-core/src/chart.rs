//! Chart definition and loading
//!
//! A chart is loaded from an unpacked directory or from a `.tgz` archive.
//! Vendored dependencies under `charts/` are loaded recursively.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use walkdir::WalkDir;

use crate::archive;
use crate::error::{CoreError, Result};
use crate::values::Values;

pub const CHART_FILE: &str = "Chart.yaml";
pub const VALUES_FILE: &str = "values.yaml";

/// Chart types that may be installed as a release
const INSTALLABLE_TYPES: &[&str] = &["", "application"];

/// Contents of `Chart.yaml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    #[serde(default)]
    pub api_version: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// `application` (or empty) or `library`
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub chart_type: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kube_version: String,

    #[serde(default)]
    pub deprecated: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<ChartDependency>,
}

/// A dependency declared in `Chart.yaml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartDependency {
    pub name: String,

    /// Version constraint
    #[serde(default)]
    pub version: String,

    /// Repository URL, `file://` path, or `@name` / `alias:name` of a configured repository
    #[serde(default)]
    pub repository: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Static enable/disable flag
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Alias name (overrides dependency name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl ChartDependency {
    /// Get the effective name (alias if set, otherwise name)
    #[inline]
    pub fn effective_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

fn default_true() -> bool {
    true
}

/// A file carried by a chart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartFile {
    /// Path relative to the chart root, `/` separated
    pub name: String,
    pub data: Vec<u8>,
}

/// A loaded chart
#[derive(Debug, Clone)]
pub struct Chart {
    pub metadata: ChartMetadata,
    /// Defaults from `values.yaml`
    pub values: Values,
    pub templates: Vec<ChartFile>,
    pub crds: Vec<ChartFile>,
    /// Vendored subcharts from `charts/`
    pub dependencies: Vec<Chart>,
}

impl Chart {
    /// Load a chart from a directory or an archive
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CoreError::ChartNotFound {
                path: path.display().to_string(),
            });
        }

        if path.is_dir() {
            Self::load_dir(path)
        } else {
            Self::load_archive(path)
        }
    }

    /// Load an unpacked chart directory
    pub fn load_dir(root: &Path) -> Result<Self> {
        let mut files = BTreeMap::new();

        for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|e| CoreError::InvalidChart {
                message: format!("failed to read {}: {e}", root.display()),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join("/");
            files.insert(name, std::fs::read(entry.path())?);
        }

        Self::from_files(files).map_err(|e| with_location(e, root))
    }

    /// Load a `.tgz` chart archive
    pub fn load_archive(path: &Path) -> Result<Self> {
        let files = archive::read_archive(path)?;
        Self::from_files(files).map_err(|e| with_location(e, path))
    }

    /// Build a chart from its files, keyed by path relative to the chart root
    pub fn from_files(files: BTreeMap<String, Vec<u8>>) -> Result<Self> {
        let chart_yaml = files.get(CHART_FILE).ok_or_else(|| CoreError::InvalidChart {
            message: format!("{CHART_FILE} file is missing"),
        })?;
        let metadata: ChartMetadata = serde_yaml::from_slice(chart_yaml)?;

        if metadata.name.is_empty() {
            return Err(CoreError::InvalidChart {
                message: "chart.metadata.name is required".to_string(),
            });
        }
        if metadata.version.is_empty() {
            return Err(CoreError::InvalidChart {
                message: "chart.metadata.version is required".to_string(),
            });
        }

        let values = match files.get(VALUES_FILE) {
            Some(data) => {
                let parsed: Values = serde_yaml::from_slice(data)?;
                if parsed.inner().is_null() {
                    Values::new()
                } else {
                    parsed
                }
            }
            None => Values::new(),
        };

        let mut templates = Vec::new();
        let mut crds = Vec::new();
        let mut subchart_dirs: BTreeMap<String, BTreeMap<String, Vec<u8>>> = BTreeMap::new();
        let mut subchart_archives = Vec::new();

        for (name, data) in &files {
            if name.starts_with("templates/") {
                templates.push(ChartFile {
                    name: name.clone(),
                    data: data.clone(),
                });
            } else if name.starts_with("crds/") {
                crds.push(ChartFile {
                    name: name.clone(),
                    data: data.clone(),
                });
            } else if let Some(rest) = name.strip_prefix("charts/") {
                match rest.split_once('/') {
                    Some((dir, inner)) => {
                        subchart_dirs
                            .entry(dir.to_string())
                            .or_default()
                            .insert(inner.to_string(), data.clone());
                    }
                    None if archive::is_archive(Path::new(rest)) => {
                        subchart_archives.push((rest.to_string(), data));
                    }
                    None => {}
                }
            }
        }

        let mut dependencies = Vec::new();
        for (dir, sub_files) in subchart_dirs {
            let sub = Self::from_files(sub_files).map_err(|e| CoreError::InvalidChart {
                message: format!("error loading charts/{dir}: {e}"),
            })?;
            dependencies.push(sub);
        }
        for (file_name, data) in subchart_archives {
            let sub_files = archive::read_archive_bytes(data)?;
            let sub = Self::from_files(sub_files).map_err(|e| CoreError::InvalidChart {
                message: format!("error loading charts/{file_name}: {e}"),
            })?;
            dependencies.push(sub);
        }

        Ok(Self {
            metadata,
            values,
            templates,
            crds,
            dependencies,
        })
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn version(&self) -> &str {
        &self.metadata.version
    }

    pub fn app_version(&self) -> &str {
        &self.metadata.app_version
    }

    /// Find a vendored subchart by name
    pub fn dependency(&self, name: &str) -> Option<&Chart> {
        self.dependencies.iter().find(|c| c.name() == name)
    }

    /// Reject charts that cannot be installed as a release, such as library charts
    pub fn ensure_installable(&self) -> Result<()> {
        if INSTALLABLE_TYPES.contains(&self.metadata.chart_type.as_str()) {
            return Ok(());
        }
        Err(CoreError::NotInstallable {
            chart_type: self.metadata.chart_type.clone(),
        })
    }
}

fn with_location(error: CoreError, path: &Path) -> CoreError {
    match error {
        CoreError::InvalidChart { message } => CoreError::InvalidChart {
            message: format!("{}: {message}", path.display()),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_chart(dir: &Path, chart_yaml: &str) {
        fs::create_dir_all(dir.join("templates")).unwrap();
        fs::write(dir.join(CHART_FILE), chart_yaml).unwrap();
        fs::write(dir.join(VALUES_FILE), "replicas: 1\n").unwrap();
        fs::write(
            dir.join("templates/service.yaml"),
            "apiVersion: v1\nkind: Service\nmetadata:\n  name: web\n",
        )
        .unwrap();
    }

    #[test]
    fn test_load_dir_with_subchart() {
        let dir = TempDir::new().unwrap();
        write_chart(
            dir.path(),
            "apiVersion: v2\nname: web\nversion: 1.2.0\nappVersion: \"2.0\"\ndependencies:\n  - name: redis\n    version: \"^7.0.0\"\n    repository: https://charts.example.com\n",
        );
        write_chart(
            &dir.path().join("charts/redis"),
            "apiVersion: v2\nname: redis\nversion: 7.1.0\n",
        );

        let chart = Chart::load(dir.path()).unwrap();

        assert_eq!(chart.name(), "web");
        assert_eq!(chart.version(), "1.2.0");
        assert_eq!(chart.app_version(), "2.0");
        assert_eq!(chart.values.get("replicas").unwrap(), 1);
        assert_eq!(chart.templates.len(), 1);
        assert_eq!(chart.templates[0].name, "templates/service.yaml");
        assert_eq!(chart.metadata.dependencies[0].effective_name(), "redis");
        assert_eq!(chart.dependency("redis").unwrap().version(), "7.1.0");
    }

    #[test]
    fn test_load_missing_chart_yaml() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("templates")).unwrap();

        let err = Chart::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("Chart.yaml file is missing"));
    }

    #[test]
    fn test_load_nonexistent_path() {
        let err = Chart::load("/definitely/not/here").unwrap_err();
        assert!(matches!(err, CoreError::ChartNotFound { .. }));
    }

    #[test]
    fn test_requires_version() {
        let mut files = BTreeMap::new();
        files.insert(CHART_FILE.to_string(), b"name: web\n".to_vec());

        let err = Chart::from_files(files).unwrap_err();
        assert!(err.to_string().contains("version is required"));
    }

    #[test]
    fn test_ensure_installable() {
        let mut files = BTreeMap::new();
        files.insert(
            CHART_FILE.to_string(),
            b"name: common\nversion: 1.0.0\ntype: library\n".to_vec(),
        );
        let library = Chart::from_files(files).unwrap();

        let err = library.ensure_installable().unwrap_err();
        assert_eq!(err.to_string(), "library charts are not installable");
        assert!(err.is_configuration());

        let mut files = BTreeMap::new();
        files.insert(
            CHART_FILE.to_string(),
            b"name: web\nversion: 1.0.0\ntype: application\n".to_vec(),
        );
        assert!(Chart::from_files(files).unwrap().ensure_installable().is_ok());
    }
}
