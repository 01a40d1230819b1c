//! Repository settings and configuration
//!
//! `EnvSettings` locates the shared configuration and cache directories.
//! Configured repositories live in a Helm-compatible `repositories.yaml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RepoError, Result};

pub const ENV_REPOSITORY_CONFIG: &str = "KEELSON_REPOSITORY_CONFIG";
pub const ENV_REPOSITORY_CACHE: &str = "KEELSON_REPOSITORY_CACHE";
pub const ENV_REGISTRY_CONFIG: &str = "KEELSON_REGISTRY_CONFIG";
pub const ENV_PLUGINS: &str = "KEELSON_PLUGINS";

/// Process-wide locations shared by every chart resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvSettings {
    /// Path to `repositories.yaml`
    pub repository_config: PathBuf,
    /// Directory holding cached indexes and downloaded charts
    pub repository_cache: PathBuf,
    /// Path to the registry credentials file
    pub registry_config: PathBuf,
    /// Directory searched for post-renderer plugins
    pub plugins_directory: PathBuf,
}

impl Default for EnvSettings {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("keelson");
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("keelson");
        let data_dir = dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("keelson");

        Self {
            repository_config: config_dir.join("repositories.yaml"),
            repository_cache: cache_dir.join("repository"),
            registry_config: config_dir.join("registry").join("config.json"),
            plugins_directory: data_dir.join("plugins"),
        }
    }
}

impl EnvSettings {
    /// Defaults overridden by `KEELSON_*` environment variables
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        let var = |name: &str| std::env::var_os(name).filter(|v| !v.is_empty()).map(PathBuf::from);

        if let Some(path) = var(ENV_REPOSITORY_CONFIG) {
            settings.repository_config = path;
        }
        if let Some(path) = var(ENV_REPOSITORY_CACHE) {
            settings.repository_cache = path;
        }
        if let Some(path) = var(ENV_REGISTRY_CONFIG) {
            settings.registry_config = path;
        }
        if let Some(path) = var(ENV_PLUGINS) {
            settings.plugins_directory = path;
        }
        settings
    }

    /// Load `repositories.yaml`, treating a missing file as empty
    pub fn repositories(&self) -> Result<RepositoryConfig> {
        if self.repository_config.exists() {
            RepositoryConfig::load_from(&self.repository_config)
        } else {
            Ok(RepositoryConfig::default())
        }
    }
}

/// Repository configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryConfig {
    #[serde(default)]
    pub api_version: String,

    /// Configured repositories
    #[serde(default)]
    pub repositories: Vec<Repository>,
}

impl RepositoryConfig {
    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| RepoError::InvalidConfig {
            message: format!("{}: {e}", path.display()),
        })?;
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get a repository by name
    pub fn get(&self, name: &str) -> Option<&Repository> {
        self.repositories.iter().find(|r| r.name == name)
    }

    /// Find a repository by URL, ignoring a trailing slash
    pub fn find_by_url(&self, url: &str) -> Option<&Repository> {
        let wanted = url.trim_end_matches('/');
        self.repositories
            .iter()
            .find(|r| r.url.trim_end_matches('/') == wanted)
    }
}

/// Repository definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    /// Unique name for this repository
    pub name: String,

    /// Repository URL
    pub url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ca_file: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cert_file: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key_file: String,

    /// Skip TLS verification (insecure, not recommended)
    #[serde(default, rename = "insecure_skip_tls_verify")]
    pub insecure_skip_tls_verify: bool,
}

impl Repository {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    /// Get the index URL for HTTP repositories
    pub fn index_url(&self) -> String {
        let base = self.url.trim_end_matches('/');
        format!("{}/index.yaml", base)
    }
}

/// Repository type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RepositoryType {
    /// Traditional HTTP repository with index.yaml
    #[default]
    Http,

    /// OCI-compliant registry
    Oci,

    /// Local filesystem
    File,
}

impl RepositoryType {
    /// Auto-detect repository type from URL
    pub fn detect(url: &str) -> Result<Self> {
        if url.starts_with("oci://") {
            Ok(RepositoryType::Oci)
        } else if url.starts_with("file://") || url.starts_with('/') {
            Ok(RepositoryType::File)
        } else if url.starts_with("http://") || url.starts_with("https://") {
            Ok(RepositoryType::Http)
        } else {
            Err(RepoError::InvalidRepositoryUrl {
                url: url.to_string(),
                reason: "URL must start with http://, https://, oci://, file://, or /".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_repository_type_detection() {
        assert_eq!(
            RepositoryType::detect("https://charts.bitnami.com/bitnami").unwrap(),
            RepositoryType::Http
        );
        assert_eq!(
            RepositoryType::detect("oci://ghcr.io/myorg/charts").unwrap(),
            RepositoryType::Oci
        );
        assert_eq!(
            RepositoryType::detect("file:///path/to/repo").unwrap(),
            RepositoryType::File
        );
        assert!(RepositoryType::detect("invalid").is_err());
    }

    #[test]
    fn test_index_url() {
        let repo = Repository::new("bitnami", "https://charts.bitnami.com/bitnami/");
        assert_eq!(
            repo.index_url(),
            "https://charts.bitnami.com/bitnami/index.yaml"
        );
    }

    #[test]
    fn test_helm_repositories_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("repositories.yaml");
        std::fs::write(
            &path,
            r#"apiVersion: ""
generated: "2024-01-01T00:00:00Z"
repositories:
- caFile: ""
  certFile: ""
  insecure_skip_tls_verify: false
  keyFile: ""
  name: bitnami
  pass_credentials_all: false
  password: ""
  url: https://charts.bitnami.com/bitnami
  username: ""
- name: private
  url: https://charts.internal.example/
  username: deploy
  password: s3cr3t
"#,
        )
        .unwrap();

        let config = RepositoryConfig::load_from(&path).unwrap();
        assert_eq!(config.repositories.len(), 2);
        assert_eq!(config.get("private").unwrap().username, "deploy");
        assert_eq!(
            config.find_by_url("https://charts.internal.example").unwrap().name,
            "private"
        );
    }

    #[test]
    fn test_env_settings_repositories_missing_file() {
        let dir = TempDir::new().unwrap();
        let settings = EnvSettings {
            repository_config: dir.path().join("missing.yaml"),
            ..EnvSettings::default()
        };

        assert!(settings.repositories().unwrap().repositories.is_empty());
    }
}
