//! Locating charts
//!
//! A chart reference is a local path, a name inside an explicit repository URL,
//! or `repo/name` for a repository configured in `repositories.yaml`.

use async_trait::async_trait;
use keelson_core::ReleaseSpec;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::ChartCache;
use crate::config::{EnvSettings, Repository};
use crate::error::{RepoError, Result};
use crate::http::{ClientOptions, RepoClient, digest_matches};
use crate::index::RepositoryIndex;
use crate::version::{DEVEL_CONSTRAINT, VersionConstraint};

/// Everything the locator needs besides the chart name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChartPathOptions {
    pub ca_file: String,
    pub cert_file: String,
    pub key_file: String,
    pub keyring: String,
    pub repo_url: String,
    pub username: String,
    pub password: String,
    pub verify: bool,
    /// Version constraint, empty for the latest stable version
    pub version: String,
    pub insecure_skip_tls_verify: bool,
}

impl ChartPathOptions {
    /// Options for a release spec, along with the chart name to locate
    pub fn from_spec(spec: &ReleaseSpec) -> (Self, String) {
        let repo = &spec.repository_spec;
        let (repo_url, chart) = resolve_chart_name(&repo.repository, spec.chart.trim());

        let options = Self {
            ca_file: repo.repository_ca_file.clone(),
            cert_file: repo.repository_cert_file.clone(),
            key_file: repo.repository_key_file.clone(),
            keyring: spec.keyring.clone(),
            repo_url,
            username: repo.repository_username.clone(),
            password: repo.repository_password.clone(),
            verify: spec.verify,
            version: chart_version(spec),
            insecure_skip_tls_verify: false,
        };
        (options, chart)
    }

    fn client_options(&self) -> ClientOptions {
        ClientOptions {
            username: self.username.clone(),
            password: self.password.clone(),
            ca_file: self.ca_file.clone(),
            cert_file: self.cert_file.clone(),
            key_file: self.key_file.clone(),
            insecure_skip_tls_verify: self.insecure_skip_tls_verify,
        }
    }
}

/// Split a repository and chart reference into what the locator consumes
///
/// A repository that is an absolute URL is passed through. A bare chart name
/// is otherwise qualified with the repository name.
pub fn resolve_chart_name(repository: &str, chart: &str) -> (String, String) {
    if is_absolute_url(repository) {
        return (repository.to_string(), chart.to_string());
    }
    if !chart.contains('/') && !repository.is_empty() {
        return (String::new(), format!("{repository}/{chart}"));
    }
    (String::new(), chart.to_string())
}

/// Version constraint requested by a spec
pub fn chart_version(spec: &ReleaseSpec) -> String {
    let version = spec.version.trim();
    if !version.is_empty() {
        return version.to_string();
    }
    if spec.devel {
        return DEVEL_CONSTRAINT.to_string();
    }
    String::new()
}

fn is_absolute_url(raw: &str) -> bool {
    match Url::parse(raw) {
        Ok(url) => (!url.cannot_be_a_base() && url.has_host()) || url.scheme() == "file",
        Err(_) => false,
    }
}

/// Locates a chart and returns a path `Chart::load` accepts
#[async_trait]
pub trait ChartLocator: Send + Sync {
    async fn locate(&self, name: &str, options: &ChartPathOptions, cache: &ChartCache)
    -> Result<PathBuf>;
}

/// Locator backed by local paths and HTTP repositories
#[derive(Debug, Clone, Default)]
pub struct RepoLocator {
    settings: EnvSettings,
}

impl RepoLocator {
    pub fn new(settings: EnvSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &EnvSettings {
        &self.settings
    }

    async fn from_repository_url(
        &self,
        name: &str,
        options: &ChartPathOptions,
        cache: &ChartCache,
    ) -> Result<PathBuf> {
        let repo_url = options.repo_url.as_str();
        let client = RepoClient::new(repo_url, &options.client_options())?;
        let index_path = cache.index_path(&url_cache_name(repo_url));
        let index = client.download_index(repo_url, &index_path).await?;
        self.download(&client, &index, repo_url, name, options, cache).await
    }

    async fn from_configured_repository(
        &self,
        repo_name: &str,
        name: &str,
        options: &ChartPathOptions,
        cache: &ChartCache,
    ) -> Result<PathBuf> {
        let config = self.settings.repositories()?;
        let repo = config
            .get(repo_name)
            .ok_or_else(|| RepoError::RepositoryNotFound {
                name: repo_name.to_string(),
            })?;

        let client_options = repository_client_options(repo, options);
        let client = RepoClient::new(&repo.url, &client_options)?;

        let index_path = cache.index_path(&repo.name);
        let index = if index_path.exists() {
            match RepositoryIndex::load(&index_path) {
                Ok(index) => index,
                Err(e) => {
                    tracing::warn!(path = %index_path.display(), error = %e, "stale repository index, refetching");
                    client.download_index(&repo.url, &index_path).await?
                }
            }
        } else {
            client.download_index(&repo.url, &index_path).await?
        };

        self.download(&client, &index, &repo.url, name, options, cache).await
    }

    async fn download(
        &self,
        client: &RepoClient,
        index: &RepositoryIndex,
        repo_url: &str,
        name: &str,
        options: &ChartPathOptions,
        cache: &ChartCache,
    ) -> Result<PathBuf> {
        let constraint = VersionConstraint::parse(&options.version)?;
        let entry = index.find_best_match(name, &constraint, repo_url)?;
        let dest = cache.archive_path(&entry.archive_name());

        let data = client.download_chart(entry, repo_url).await?;
        std::fs::create_dir_all(cache.root())?;
        std::fs::write(&dest, &data)?;
        tracing::debug!(chart = name, version = %entry.version, path = %dest.display(), "downloaded chart");

        if options.verify {
            let prov_url = format!("{}.prov", entry.download_url(repo_url)?);
            let prov = client.get_bytes(&prov_url).await?;
            let prov_path = PathBuf::from(format!("{}.prov", dest.display()));
            std::fs::write(&prov_path, prov)?;
        }

        Ok(dest)
    }
}

#[async_trait]
impl ChartLocator for RepoLocator {
    async fn locate(
        &self,
        name: &str,
        options: &ChartPathOptions,
        cache: &ChartCache,
    ) -> Result<PathBuf> {
        let name = name.trim();
        let local = Path::new(name);

        let path = if local.exists() {
            tracing::debug!(chart = name, "using local chart");
            local.to_path_buf()
        } else if name.starts_with("oci://") || options.repo_url.starts_with("oci://") {
            return Err(RepoError::UnsupportedReference {
                reference: name.to_string(),
                reason: "OCI registries are not supported".to_string(),
            });
        } else if !options.repo_url.is_empty() {
            self.from_repository_url(name, options, cache).await?
        } else if let Some((repo_name, chart)) = name.split_once('/')
            && !repo_name.is_empty()
            && !chart.is_empty()
            && !chart.contains('/')
        {
            self.from_configured_repository(repo_name, chart, options, cache)
                .await?
        } else {
            return Err(RepoError::ChartNotFound {
                name: name.to_string(),
                hint: " (not a local path, and no repository given)".to_string(),
            });
        };

        if options.verify {
            verify_provenance(&path, &options.keyring)?;
        }
        Ok(path)
    }
}

fn repository_client_options(repo: &Repository, options: &ChartPathOptions) -> ClientOptions {
    let pick = |explicit: &str, configured: &str| {
        if explicit.is_empty() {
            configured.to_string()
        } else {
            explicit.to_string()
        }
    };
    ClientOptions {
        username: pick(&options.username, &repo.username),
        password: pick(&options.password, &repo.password),
        ca_file: pick(&options.ca_file, &repo.ca_file),
        cert_file: pick(&options.cert_file, &repo.cert_file),
        key_file: pick(&options.key_file, &repo.key_file),
        insecure_skip_tls_verify: options.insecure_skip_tls_verify || repo.insecure_skip_tls_verify,
    }
}

/// Cache name for an index fetched by URL
fn url_cache_name(repo_url: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = hex::encode(Sha256::digest(repo_url.trim_end_matches('/').as_bytes()));
    format!("url-{}", &digest[..16])
}

/// Check a chart archive against the digest recorded in its `.prov` file
pub fn verify_provenance(archive: &Path, keyring: &str) -> Result<()> {
    let name = archive.display().to_string();
    if !archive.is_file() {
        return Err(RepoError::VerificationFailed {
            name,
            message: "only packaged charts can be verified".to_string(),
        });
    }
    if keyring.is_empty() || !Path::new(keyring).exists() {
        return Err(RepoError::VerificationFailed {
            name,
            message: format!("keyring '{keyring}' not found"),
        });
    }

    let prov_path = PathBuf::from(format!("{name}.prov"));
    let prov = std::fs::read_to_string(&prov_path).map_err(|e| RepoError::VerificationFailed {
        name: name.clone(),
        message: format!("{}: {e}", prov_path.display()),
    })?;

    let file_name = archive
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let expected = prov
        .lines()
        .filter_map(|line| line.trim().split_once(':'))
        .find(|(key, _)| key.trim().trim_matches('"') == file_name)
        .map(|(_, digest)| digest.trim().trim_matches('"').to_string())
        .ok_or_else(|| RepoError::VerificationFailed {
            name: name.clone(),
            message: format!("no digest for {file_name} in provenance file"),
        })?;

    let actual = keelson_core::archive::file_digest(archive)?;
    if !digest_matches(&expected, &actual) {
        return Err(RepoError::IntegrityCheckFailed {
            name,
            expected,
            actual,
        });
    }
    Ok(())
}
