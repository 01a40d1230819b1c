//! Repository index types
//!
//! Helm-compatible `index.yaml` format

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

use crate::error::{RepoError, Result};
use crate::version::VersionConstraint;

/// Repository index (Helm-compatible)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryIndex {
    #[serde(default)]
    pub api_version: String,

    /// When this index was generated
    #[serde(default)]
    pub generated: Option<DateTime<Utc>>,

    /// Chart versions indexed by chart name
    #[serde(default)]
    pub entries: HashMap<String, Vec<ChartVersion>>,
}

impl RepositoryIndex {
    /// Parse index from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| RepoError::InvalidIndex {
            message: e.to_string(),
        })
    }

    /// Parse index from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let yaml = std::str::from_utf8(bytes).map_err(|e| RepoError::InvalidIndex {
            message: format!("Invalid UTF-8: {}", e),
        })?;
        Self::from_yaml(yaml)
    }

    /// Load a cached index file
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Get all versions of a chart
    pub fn get(&self, name: &str) -> Option<&Vec<ChartVersion>> {
        self.entries.get(name)
    }

    /// Find the highest version of a chart satisfying a constraint
    pub fn find_best_match(
        &self,
        name: &str,
        constraint: &VersionConstraint,
        repo: &str,
    ) -> Result<&ChartVersion> {
        let versions = self.entries.get(name).ok_or_else(|| RepoError::ChartNotFound {
            name: name.to_string(),
            hint: format!(" in repository {repo}"),
        })?;

        let best = constraint
            .best_match(versions.iter().map(|e| e.version.as_str()))
            .ok_or_else(|| RepoError::VersionNotFound {
                name: name.to_string(),
                constraint: constraint.to_string(),
                repo: repo.to_string(),
            })?;

        versions
            .iter()
            .find(|e| e.version == best)
            .ok_or_else(|| RepoError::VersionNotFound {
                name: name.to_string(),
                constraint: constraint.to_string(),
                repo: repo.to_string(),
            })
    }
}

/// Chart version entry in the index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartVersion {
    pub name: String,

    pub version: String,

    #[serde(default)]
    pub app_version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// URLs to download the chart archive, absolute or relative to the repository
    #[serde(default)]
    pub urls: Vec<String>,

    /// SHA256 digest of the archive
    #[serde(default)]
    pub digest: Option<String>,

    #[serde(default)]
    pub created: Option<DateTime<Utc>>,

    #[serde(default)]
    pub deprecated: bool,

    /// Chart type (application or library)
    #[serde(default)]
    pub r#type: Option<String>,
}

impl ChartVersion {
    /// Resolve the primary download URL against the repository URL
    pub fn download_url(&self, repo_url: &str) -> Result<Url> {
        let first = self.urls.first().ok_or_else(|| RepoError::InvalidIndex {
            message: format!("{}-{} has no download URLs", self.name, self.version),
        })?;

        if let Ok(absolute) = Url::parse(first) {
            return Ok(absolute);
        }

        let base = format!("{}/", repo_url.trim_end_matches('/'));
        let base = Url::parse(&base).map_err(|e| RepoError::InvalidRepositoryUrl {
            url: repo_url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(base.join(first)?)
    }

    /// Archive file name used in the cache
    pub fn archive_name(&self) -> String {
        format!("{}-{}.tgz", self.name, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> RepositoryIndex {
        let yaml = r#"
apiVersion: v1
generated: "2024-01-01T00:00:00Z"
entries:
  nginx:
    - name: nginx
      version: "15.0.0"
      appVersion: "1.25.0"
      description: NGINX Open Source
      urls:
        - https://example.com/charts/nginx-15.0.0.tgz
      digest: "abc123"
    - name: nginx
      version: "14.0.0"
      appVersion: "1.24.0"
      urls:
        - charts/nginx-14.0.0.tgz
    - name: nginx
      version: "16.0.0-beta.1"
      urls:
        - nginx-16.0.0-beta.1.tgz
"#;
        RepositoryIndex::from_yaml(yaml).unwrap()
    }

    #[test]
    fn test_parse_index() {
        let index = sample_index();
        assert_eq!(index.entries.len(), 1);
        assert_eq!(index.get("nginx").unwrap().len(), 3);
    }

    #[test]
    fn test_best_match_latest_stable() {
        let index = sample_index();
        let best = index
            .find_best_match("nginx", &VersionConstraint::Latest, "stable")
            .unwrap();
        assert_eq!(best.version, "15.0.0");
    }

    #[test]
    fn test_best_match_devel() {
        let index = sample_index();
        let best = index
            .find_best_match("nginx", &VersionConstraint::AnyIncludingPrerelease, "stable")
            .unwrap();
        assert_eq!(best.version, "16.0.0-beta.1");
    }

    #[test]
    fn test_best_match_errors() {
        let index = sample_index();

        let err = index
            .find_best_match("redis", &VersionConstraint::Latest, "stable")
            .unwrap_err();
        assert!(matches!(err, RepoError::ChartNotFound { .. }));

        let constraint = VersionConstraint::parse("^20.0.0").unwrap();
        let err = index.find_best_match("nginx", &constraint, "stable").unwrap_err();
        assert!(matches!(err, RepoError::VersionNotFound { .. }));
    }

    #[test]
    fn test_download_url_relative() {
        let index = sample_index();
        let v14 = &index.get("nginx").unwrap()[1];

        let url = v14.download_url("https://example.com/stable").unwrap();
        assert_eq!(url.as_str(), "https://example.com/stable/charts/nginx-14.0.0.tgz");
        assert_eq!(v14.archive_name(), "nginx-14.0.0.tgz");
    }
}
