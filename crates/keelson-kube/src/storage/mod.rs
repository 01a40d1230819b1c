//! Storage drivers for persisting release records
//!
//! Keelson supports multiple release stores:
//! - **Secrets** (default): Store releases in Kubernetes Secrets (like Helm)
//! - **File**: Store releases in local files (for development and offline use)
//! - **Memory**: Keep releases in process (for tests and previews)
//!
//! Records are JSON, compressed with gzip or zstd. Secrets additionally carry
//! the compressed bytes base64 encoded.

mod file;
mod memory;
mod secrets;

pub use file::FileDriver;
pub use memory::{MemoryDriver, OperationCounts};
pub use secrets::SecretsDriver;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{KubeError, Result};
use crate::release::StoredRelease;

/// Maximum size for a single Kubernetes Secret (1MB - some overhead)
pub const MAX_RESOURCE_SIZE: usize = 1_000_000;

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const NAME_LABEL: &str = "keelson.dev/release-name";
pub const REVISION_LABEL: &str = "keelson.dev/release-revision";
pub const NAMESPACE_LABEL: &str = "keelson.dev/release-namespace";
pub const STATUS_LABEL: &str = "keelson.dev/release-status";
pub const COMPRESSION_LABEL: &str = "keelson.dev/compression";

/// Storage driver trait for release persistence
///
/// Implementations must be Send + Sync for use across async tasks.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Get a specific revision
    async fn get(&self, namespace: &str, name: &str, revision: u32) -> Result<StoredRelease>;

    /// Get the latest revision of a release
    async fn get_latest(&self, namespace: &str, name: &str) -> Result<StoredRelease> {
        let history = self.history(namespace, name).await?;
        history
            .into_iter()
            .next()
            .ok_or_else(|| KubeError::ReleaseNotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
    }

    /// List the latest revision of every release, optionally filtered by namespace
    async fn list(&self, namespace: Option<&str>) -> Result<Vec<StoredRelease>>;

    /// All revisions of a release, newest first
    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>>;

    /// Record a new revision
    async fn create(&self, release: &StoredRelease) -> Result<()>;

    /// Overwrite an existing revision
    async fn update(&self, release: &StoredRelease) -> Result<()>;

    /// Delete a specific revision
    async fn delete(&self, namespace: &str, name: &str, revision: u32) -> Result<StoredRelease>;

    /// Delete all revisions of a release
    async fn delete_all(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>>;

    /// Check if a release exists
    async fn exists(&self, namespace: &str, name: &str) -> Result<bool> {
        match self.get_latest(namespace, name).await {
            Ok(_) => Ok(true),
            Err(KubeError::ReleaseNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageConfig {
    /// Compression method
    pub compression: CompressionMethod,
}

/// Compression method for release data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMethod {
    /// No compression
    None,

    /// Gzip compression (Helm-compatible)
    Gzip { level: u32 },

    /// Zstd compression (better ratio, faster)
    Zstd { level: i32 },
}

impl Default for CompressionMethod {
    fn default() -> Self {
        Self::Zstd { level: 3 }
    }
}

impl CompressionMethod {
    /// Label value recorded next to compressed data
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip { .. } => "gzip",
            Self::Zstd { .. } => "zstd",
        }
    }

    /// Parse a label value, defaulting levels
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "none" => Some(Self::None),
            "gzip" => Some(Self::Gzip { level: 6 }),
            "zstd" => Some(Self::Zstd { level: 3 }),
            _ => None,
        }
    }
}

/// Compress data using the configured method
#[must_use = "compression result should be used"]
pub fn compress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Gzip { level } => {
            use std::io::Write;
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(level));
            encoder
                .write_all(data)
                .map_err(|e| KubeError::Compression(e.to_string()))?;
            encoder
                .finish()
                .map_err(|e| KubeError::Compression(e.to_string()))
        }
        CompressionMethod::Zstd { level } => zstd::encode_all(std::io::Cursor::new(data), level)
            .map_err(|e| KubeError::Compression(e.to_string())),
    }
}

/// Decompress data
#[must_use = "decompression result should be used"]
pub fn decompress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Gzip { .. } => {
            use std::io::Read;
            let mut decoder = flate2::read::GzDecoder::new(data);
            let mut decompressed = Vec::new();
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|e| KubeError::Compression(e.to_string()))?;
            Ok(decompressed)
        }
        CompressionMethod::Zstd { .. } => zstd::decode_all(std::io::Cursor::new(data))
            .map_err(|e| KubeError::Compression(e.to_string())),
    }
}

/// Serialize a release to JSON bytes
pub fn serialize_release(release: &StoredRelease) -> Result<Vec<u8>> {
    serde_json::to_vec(release).map_err(|e| KubeError::Serialization(e.to_string()))
}

/// Deserialize a release from JSON bytes
pub fn deserialize_release(data: &[u8]) -> Result<StoredRelease> {
    serde_json::from_slice(data).map_err(|e| KubeError::Serialization(e.to_string()))
}

/// Encode data for storage (serialize + compress + base64)
#[must_use = "encoded data should be used for storage"]
pub fn encode_for_storage(release: &StoredRelease, config: &StorageConfig) -> Result<String> {
    let json = serialize_release(release)?;
    let compressed = compress(&json, config.compression)?;
    Ok(base64::Engine::encode(
        &base64::engine::general_purpose::STANDARD,
        &compressed,
    ))
}

/// Decode data from storage (base64 + decompress + deserialize)
pub fn decode_from_storage(data: &str, compression: CompressionMethod) -> Result<StoredRelease> {
    let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, data)
        .map_err(|e| KubeError::Serialization(format!("base64 decode error: {}", e)))?;
    let decompressed = decompress(&decoded, compression)?;
    deserialize_release(&decompressed)
}

/// Labels applied to all storage resources
pub fn storage_labels(release: &StoredRelease) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), "keelson".to_string());
    labels.insert(NAME_LABEL.to_string(), release.name.clone());
    labels.insert(REVISION_LABEL.to_string(), release.revision.to_string());
    labels.insert(NAMESPACE_LABEL.to_string(), release.namespace.clone());
    labels.insert(STATUS_LABEL.to_string(), release.state.status_name().to_string());
    labels
}

/// Keep only the first (newest) revision of each release
fn latest_only(mut releases: Vec<StoredRelease>) -> Vec<StoredRelease> {
    releases.sort_by(|a, b| b.revision.cmp(&a.revision));
    let mut seen = std::collections::HashSet::new();
    releases.retain(|r| seen.insert(format!("{}/{}", r.namespace, r.name)));
    releases
}
