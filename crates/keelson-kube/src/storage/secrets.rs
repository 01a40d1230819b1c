//! Kubernetes Secrets storage driver
//!
//! The default store. Each revision is one Secret named after its storage
//! key, holding the compressed record base64 encoded under `release`.

use async_trait::async_trait;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Client;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use std::collections::BTreeMap;

use super::{
    COMPRESSION_LABEL, CompressionMethod, MANAGED_BY_LABEL, MAX_RESOURCE_SIZE, NAME_LABEL,
    StorageConfig, StorageDriver, decode_from_storage, encode_for_storage, latest_only,
    storage_labels,
};
use crate::error::{KubeError, Result};
use crate::release::{StoredRelease, storage_key};

/// Secret type recorded on release Secrets
pub const SECRET_TYPE: &str = "keelson.dev/release.v1";

const RELEASE_KEY: &str = "release";

/// Kubernetes Secrets storage driver
pub struct SecretsDriver {
    client: Client,
    config: StorageConfig,
}

impl SecretsDriver {
    /// Create a driver using the default client configuration
    pub async fn new(config: StorageConfig) -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self { client, config })
    }

    /// Create with an existing client
    pub fn with_client(client: Client, config: StorageConfig) -> Self {
        Self { client, config }
    }

    fn secrets_api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn parse_all(&self, secrets: &[Secret]) -> Vec<StoredRelease> {
        let mut releases: Vec<StoredRelease> = secrets
            .iter()
            .filter_map(|secret| match parse_secret(secret, self.config.compression) {
                Ok(release) => Some(release),
                Err(e) => {
                    tracing::warn!(
                        secret = secret.metadata.name.as_deref().unwrap_or_default(),
                        error = %e,
                        "skipping unreadable release secret"
                    );
                    None
                }
            })
            .collect();
        releases.sort_by(|a, b| b.revision.cmp(&a.revision));
        releases
    }
}

/// Label selector matching every revision keelson manages, optionally of one release
fn selector(name: Option<&str>) -> String {
    let mut selector = format!("{}=keelson", MANAGED_BY_LABEL);
    if let Some(name) = name {
        selector.push_str(&format!(",{}={}", NAME_LABEL, name));
    }
    selector
}

/// Build the Secret recording `release`
pub fn build_secret(release: &StoredRelease, config: &StorageConfig) -> Result<Secret> {
    let encoded = encode_for_storage(release, config)?;
    if encoded.len() > MAX_RESOURCE_SIZE {
        return Err(KubeError::ReleaseTooLarge {
            size: encoded.len(),
            max: MAX_RESOURCE_SIZE,
        });
    }

    let mut labels = storage_labels(release);
    labels.insert(
        COMPRESSION_LABEL.to_string(),
        config.compression.label().to_string(),
    );

    let mut data = BTreeMap::new();
    data.insert(RELEASE_KEY.to_string(), ByteString(encoded.into_bytes()));

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(release.storage_key()),
            namespace: Some(release.namespace.clone()),
            labels: Some(labels),
            ..Default::default()
        },
        type_: Some(SECRET_TYPE.to_string()),
        data: Some(data),
        ..Default::default()
    })
}

/// Decode the release held in a Secret
///
/// The compression label wins over `fallback` so records written with
/// another setting stay readable.
pub fn parse_secret(secret: &Secret, fallback: CompressionMethod) -> Result<StoredRelease> {
    let data = secret
        .data
        .as_ref()
        .and_then(|d| d.get(RELEASE_KEY))
        .ok_or_else(|| KubeError::Storage("Secret missing 'release' data".to_string()))?;

    let encoded = std::str::from_utf8(&data.0)
        .map_err(|e| KubeError::Storage(format!("Invalid UTF-8 in secret: {}", e)))?;

    let compression = secret
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(COMPRESSION_LABEL))
        .and_then(|c| CompressionMethod::from_label(c))
        .unwrap_or(fallback);

    decode_from_storage(encoded, compression)
}

fn not_found(namespace: &str, name: &str) -> KubeError {
    KubeError::ReleaseNotFound {
        name: name.to_string(),
        namespace: namespace.to_string(),
    }
}

#[async_trait]
impl StorageDriver for SecretsDriver {
    async fn get(&self, namespace: &str, name: &str, revision: u32) -> Result<StoredRelease> {
        match self.secrets_api(namespace).get(&storage_key(name, revision)).await {
            Ok(secret) => parse_secret(&secret, self.config.compression),
            Err(kube::Error::Api(e)) if e.code == 404 => Err(not_found(namespace, name)),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<StoredRelease>> {
        let lp = ListParams::default().labels(&selector(None));
        let secrets = match namespace {
            Some(ns) => self.secrets_api(ns).list(&lp).await?,
            None => Api::<Secret>::all(self.client.clone()).list(&lp).await?,
        };
        Ok(latest_only(self.parse_all(&secrets.items)))
    }

    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>> {
        let lp = ListParams::default().labels(&selector(Some(name)));
        let secrets = self.secrets_api(namespace).list(&lp).await?;

        let releases = self.parse_all(&secrets.items);
        if releases.is_empty() {
            return Err(not_found(namespace, name));
        }
        Ok(releases)
    }

    async fn create(&self, release: &StoredRelease) -> Result<()> {
        let secret = build_secret(release, &self.config)?;
        match self
            .secrets_api(&release.namespace)
            .create(&PostParams::default(), &secret)
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 409 => Err(KubeError::ReleaseAlreadyExists {
                name: release.name.clone(),
                namespace: release.namespace.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, release: &StoredRelease) -> Result<()> {
        let secret = build_secret(release, &self.config)?;
        let api = self.secrets_api(&release.namespace);
        let key = release.storage_key();

        match api.replace(&key, &PostParams::default(), &secret).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                api.create(&PostParams::default(), &secret).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, namespace: &str, name: &str, revision: u32) -> Result<StoredRelease> {
        let release = self.get(namespace, name, revision).await?;
        match self
            .secrets_api(namespace)
            .delete(&release.storage_key(), &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(release),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(release),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_all(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>> {
        let releases = self.history(namespace, name).await?;
        let api = self.secrets_api(namespace);

        for release in &releases {
            match api
                .delete(&release.storage_key(), &DeleteParams::default())
                .await
            {
                Ok(_) => {}
                Err(kube::Error::Api(e)) if e.code == 404 => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(releases)
    }
}
