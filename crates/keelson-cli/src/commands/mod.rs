//! CLI commands
//!
//! Each command drives one or more provider operations against the state
//! file, the way a deployment engine would.

pub mod check;
pub mod destroy;
pub mod diff;
pub mod refresh;
pub mod up;

use clap::Args;
use keelson_core::{Annotations, PropertyMap, ValuePath, spec::RELEASE_RESOURCE_TYPE};
use keelson_provider::{ProviderConfig, ReleaseProvider};
use keelson_repo::CacheLocks;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CliError, Result};

/// Provider settings shared by every command
#[derive(Args, Debug, Clone, Default)]
pub struct ProviderArgs {
    /// Provider configuration file (YAML)
    #[arg(long, global = true, env = "KEELSON_CONFIG")]
    pub config: Option<PathBuf>,

    /// Namespace for releases that do not name one
    #[arg(short, long, global = true, env = "KEELSON_NAMESPACE")]
    pub namespace: Option<String>,

    /// Release store: secret, file or memory
    #[arg(long, global = true, env = "KEELSON_DRIVER")]
    pub driver: Option<String>,

    /// Record directory for the file driver
    #[arg(long, global = true, env = "KEELSON_STORAGE_DIR")]
    pub storage_dir: Option<PathBuf>,

    /// Kubeconfig context for the secret driver
    #[arg(long, global = true)]
    pub kube_context: Option<String>,

    /// Write secret values in the clear instead of as secret markers
    #[arg(long, global = true)]
    pub no_secrets: bool,
}

impl ProviderArgs {
    /// Configuration file, then `KEELSON_*` variables, then flags
    pub fn load_config(&self) -> Result<ProviderConfig> {
        let mut config = match &self.config {
            Some(path) => ProviderConfig::load(path)?,
            None => ProviderConfig::default(),
        };
        config.apply_env()?;

        if let Some(namespace) = self.namespace.as_ref().filter(|ns| !ns.is_empty()) {
            config.namespace = namespace.clone();
        }
        if let Some(driver) = &self.driver {
            config.driver = driver.parse()?;
        }
        if let Some(dir) = &self.storage_dir {
            config.storage_dir = Some(dir.clone());
        }
        if let Some(context) = &self.kube_context {
            config.kube_context = Some(context.clone());
        }
        if self.no_secrets {
            config.enable_secrets = false;
        }
        Ok(config)
    }

    pub async fn provider(&self) -> Result<ReleaseProvider> {
        let config = self.load_config()?;
        tracing::debug!(
            namespace = %config.namespace,
            driver = %config.driver,
            "starting provider"
        );
        Ok(ReleaseProvider::from_config(config, &CacheLocks::new()).await?)
    }
}

/// Release inputs read from a property file
#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    /// Property document (YAML or JSON) with a `releaseSpec`
    #[arg(short = 'f', long = "file")]
    pub file: PathBuf,

    /// Mark an input path secret (e.g. releaseSpec.set[0].value)
    #[arg(long = "secret", value_name = "PATH")]
    pub secrets: Vec<String>,

    /// Resource name; seeds the release name when none is given
    #[arg(long, default_value = "release")]
    pub resource: String,
}

impl InputArgs {
    pub fn urn(&self) -> String {
        resource_urn(&self.resource)
    }

    pub fn load(&self) -> Result<PropertyMap> {
        load_inputs(&self.file, &self.secrets)
    }
}

/// URN of a release resource in the local stack
pub fn resource_urn(resource: &str) -> String {
    format!("urn:keelson:local::keelson::{RELEASE_RESOURCE_TYPE}::{resource}")
}

/// Read a property document and mark the given paths secret
pub fn load_inputs(path: &Path, secrets: &[String]) -> Result<PropertyMap> {
    let content = std::fs::read_to_string(path).map_err(|e| CliError::Io {
        message: format!("{}: {e}", path.display()),
    })?;
    let value: JsonValue = serde_yaml::from_str(&content)
        .map_err(|e| CliError::input(format!("{}: {e}", path.display())))?;
    let mut document = PropertyMap::from_json(value)?;

    let mut annotations = Annotations::default();
    for raw in secrets {
        let secret = ValuePath::parse(raw)?;
        if document.get_path(&secret).is_none() {
            return Err(CliError::validation_with_help(
                format!("--secret {raw}: no such input"),
                "paths start at the document root, e.g. releaseSpec.set[0].value",
            ));
        }
        annotations.secrets.push(secret);
    }
    document.annotate(&annotations);
    Ok(document)
}

pub fn timeout(secs: Option<u64>) -> Option<Duration> {
    secs.map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keelson_core::MarshalOptions;
    use keelson_provider::StorageKind;
    use tempfile::TempDir;

    const INPUTS: &str = "\
releaseSpec:
  chart: ./web
  set:
    - name: auth.password
      value: hunter2
";

    #[test]
    fn test_load_inputs_marks_secrets() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("release.yaml");
        std::fs::write(&path, INPUTS).unwrap();

        let document = load_inputs(&path, &["releaseSpec.set[0].value".to_string()]).unwrap();
        let value = document
            .get_path(&ValuePath::parse("releaseSpec.set[0].value").unwrap())
            .unwrap();
        assert!(value.is_secret());
        assert_eq!(value.as_str(), Some("hunter2"));

        let plain = document.to_json(MarshalOptions::default());
        assert_eq!(plain["releaseSpec"]["chart"], "./web");
    }

    #[test]
    fn test_load_inputs_unknown_secret_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("release.yaml");
        std::fs::write(&path, INPUTS).unwrap();

        let err = load_inputs(&path, &["releaseSpec.set[3].value".to_string()]).unwrap_err();
        assert!(matches!(err, CliError::Validation { .. }));
    }

    #[test]
    fn test_load_inputs_rejects_scalars() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("release.yaml");
        std::fs::write(&path, "- chart\n").unwrap();

        assert!(load_inputs(&path, &[]).is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keelson.yaml");
        std::fs::write(&path, "namespace: apps\ndriver: memory\n").unwrap();

        let args = ProviderArgs {
            config: Some(path),
            driver: Some("file".to_string()),
            storage_dir: Some(dir.path().join("releases")),
            no_secrets: true,
            ..Default::default()
        };
        let config = args.load_config().unwrap();
        assert_eq!(config.driver, StorageKind::File);
        assert_eq!(config.storage_dir(), dir.path().join("releases"));
        assert!(!config.enable_secrets);
    }

    #[test]
    fn test_resource_urn() {
        assert_eq!(
            resource_urn("web"),
            "urn:keelson:local::keelson::keelson:index:Release::web"
        );
    }
}
