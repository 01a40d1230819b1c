//! Provider configuration
//!
//! Loaded from a YAML file, then overlaid with `KEELSON_*` environment
//! variables. Repository paths left unset fall back to [`EnvSettings`].

use keelson_kube::{FileDriver, MemoryDriver, SecretsDriver, StorageConfig, StorageDriver};
use keelson_repo::EnvSettings;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{ProviderError, Result};

pub const ENV_NAMESPACE: &str = "KEELSON_NAMESPACE";
pub const ENV_DRIVER: &str = "KEELSON_DRIVER";

/// Namespace releases land in when they name none
pub const DEFAULT_NAMESPACE: &str = "default";

/// Where release records are kept
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Kubernetes Secrets in the release namespace
    #[default]
    #[serde(alias = "secrets")]
    Secret,
    /// Compressed records under a local directory
    File,
    /// Process memory; records vanish on exit
    Memory,
}

impl FromStr for StorageKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "secret" | "secrets" => Ok(Self::Secret),
            "file" => Ok(Self::File),
            "memory" => Ok(Self::Memory),
            other => Err(ProviderError::Config(format!(
                "unknown storage driver '{other}' (expected secret, file or memory)"
            ))),
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Secret => "secret",
            Self::File => "file",
            Self::Memory => "memory",
        })
    }
}

/// Settings shared by every request the provider handles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    /// Namespace for releases that do not name one
    pub namespace: String,

    /// Emit secret markers in returned documents
    pub enable_secrets: bool,

    pub driver: StorageKind,

    /// Record directory for the file driver
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_dir: Option<PathBuf>,

    /// Kubeconfig context for the secret driver
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kube_context: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_config: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_cache: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_config: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugins_directory: Option<PathBuf>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            enable_secrets: true,
            driver: StorageKind::default(),
            storage_dir: None,
            kube_context: None,
            repository_config: None,
            repository_cache: None,
            registry_config: None,
            plugins_directory: None,
        }
    }
}

impl ProviderConfig {
    /// Load a YAML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yaml::from_str(&content)
            .map_err(|e| ProviderError::Config(format!("{}: {e}", path.display())))?;
        if config.namespace.is_empty() {
            config.namespace = DEFAULT_NAMESPACE.to_string();
        }
        tracing::debug!(path = %path.display(), driver = %config.driver, "loaded provider config");
        Ok(config)
    }

    /// Overlay `KEELSON_NAMESPACE` and `KEELSON_DRIVER`
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |name: &str| var(name).filter(|v| !v.trim().is_empty());
        if let Some(namespace) = var(ENV_NAMESPACE) {
            self.namespace = namespace;
        }
        if let Some(driver) = var(ENV_DRIVER) {
            self.driver = driver.parse()?;
        }
        Ok(())
    }

    /// Repository locations, with configured paths taking precedence
    pub fn settings(&self) -> EnvSettings {
        let mut settings = EnvSettings::from_env();
        let overrides = [
            (&self.repository_config, &mut settings.repository_config),
            (&self.repository_cache, &mut settings.repository_cache),
            (&self.registry_config, &mut settings.registry_config),
            (&self.plugins_directory, &mut settings.plugins_directory),
        ];
        for (configured, target) in overrides {
            if let Some(path) = configured {
                *target = path.clone();
            }
        }
        settings
    }

    /// Directory the file driver keeps records in
    pub fn storage_dir(&self) -> PathBuf {
        self.storage_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("keelson")
                .join("releases")
        })
    }

    /// Build the configured release store
    pub async fn storage_driver(&self) -> Result<Arc<dyn StorageDriver>> {
        let config = StorageConfig::default();
        let driver: Arc<dyn StorageDriver> = match self.driver {
            StorageKind::Secret => {
                let client = keelson_kube::default_client(self.kube_context.as_deref()).await?;
                Arc::new(SecretsDriver::with_client(client, config))
            }
            StorageKind::File => Arc::new(FileDriver::new(self.storage_dir(), config)?),
            StorageKind::Memory => Arc::new(MemoryDriver::new()),
        };
        Ok(driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ProviderConfig::default();
        assert_eq!(config.namespace, "default");
        assert!(config.enable_secrets);
        assert_eq!(config.driver, StorageKind::Secret);
    }

    #[test]
    fn test_storage_kind_parse() {
        assert_eq!("secrets".parse::<StorageKind>().unwrap(), StorageKind::Secret);
        assert_eq!("File".parse::<StorageKind>().unwrap(), StorageKind::File);
        assert_eq!("memory".parse::<StorageKind>().unwrap(), StorageKind::Memory);
        assert!(matches!(
            "sql".parse::<StorageKind>(),
            Err(ProviderError::Config(_))
        ));
    }

    #[test]
    fn test_load_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keelson.yaml");
        std::fs::write(
            &path,
            "namespace: apps\nenableSecrets: false\ndriver: file\nstorageDir: /var/lib/keelson\n",
        )
        .unwrap();

        let config = ProviderConfig::load(&path).unwrap();
        assert_eq!(config.namespace, "apps");
        assert!(!config.enable_secrets);
        assert_eq!(config.driver, StorageKind::File);
        assert_eq!(config.storage_dir(), PathBuf::from("/var/lib/keelson"));
    }

    #[test]
    fn test_load_rejects_unknown_driver() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keelson.yaml");
        std::fs::write(&path, "driver: etcd\n").unwrap();

        assert!(matches!(
            ProviderConfig::load(&path),
            Err(ProviderError::Config(_))
        ));
    }

    #[test]
    fn test_env_overlay() {
        let vars: HashMap<&str, &str> = [(ENV_NAMESPACE, "staging"), (ENV_DRIVER, "memory")].into();
        let mut config = ProviderConfig::default();
        config
            .apply_vars(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.namespace, "staging");
        assert_eq!(config.driver, StorageKind::Memory);
    }

    #[test]
    fn test_env_overlay_ignores_empty() {
        let mut config = ProviderConfig::default();
        config.apply_vars(|_| Some(String::new())).unwrap();
        assert_eq!(config, ProviderConfig::default());
    }

    #[test]
    fn test_settings_overrides() {
        let config = ProviderConfig {
            repository_cache: Some(PathBuf::from("/tmp/cache")),
            ..Default::default()
        };
        assert_eq!(config.settings().repository_cache, PathBuf::from("/tmp/cache"));
    }

    #[tokio::test]
    async fn test_file_driver() {
        let dir = TempDir::new().unwrap();
        let config = ProviderConfig {
            driver: StorageKind::File,
            storage_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let driver = config.storage_driver().await.unwrap();
        assert!(driver.list(None).await.unwrap().is_empty());
    }
}
