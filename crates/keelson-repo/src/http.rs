//! HTTP transport for chart repositories
//!
//! Basic auth is scoped to the repository origin. Redirects are followed by
//! hand so credentials are never forwarded to another origin.

use base64::Engine;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::error::{RepoError, Result};
use crate::index::{ChartVersion, RepositoryIndex};

const MAX_REDIRECTS: u32 = 10;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Credentials and TLS material for one repository
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub username: String,
    pub password: String,
    /// PEM bundle used to verify the server
    pub ca_file: String,
    /// PEM client certificate
    pub cert_file: String,
    /// PEM client key
    pub key_file: String,
    pub insecure_skip_tls_verify: bool,
}

impl ClientOptions {
    fn auth_header(&self) -> Option<String> {
        if self.username.is_empty() && self.password.is_empty() {
            return None;
        }
        let token = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", self.username, self.password));
        Some(format!("Basic {token}"))
    }
}

/// HTTP client bound to one repository
pub struct RepoClient {
    client: reqwest::Client,
    /// Origin that may receive credentials
    scope: Option<Url>,
    auth: Option<String>,
}

impl RepoClient {
    /// Build a client for `repo_url`, loading any TLS material up front
    pub fn new(repo_url: &str, options: &ClientOptions) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(REQUEST_TIMEOUT);

        if !options.ca_file.is_empty() {
            let pem = read_tls_file(&options.ca_file)?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| RepoError::InvalidTls {
                message: format!("{}: {e}", options.ca_file),
            })?;
            builder = builder.add_root_certificate(cert);
        }

        match (options.cert_file.is_empty(), options.key_file.is_empty()) {
            (false, false) => {
                let mut pem = read_tls_file(&options.cert_file)?;
                pem.push(b'\n');
                pem.extend(read_tls_file(&options.key_file)?);
                let identity = reqwest::Identity::from_pem(&pem).map_err(|e| RepoError::InvalidTls {
                    message: format!("{}: {e}", options.cert_file),
                })?;
                builder = builder.identity(identity);
            }
            (true, true) => {}
            _ => {
                return Err(RepoError::InvalidTls {
                    message: "client certificate and key must be set together".to_string(),
                });
            }
        }

        if options.insecure_skip_tls_verify {
            tracing::warn!(repository = repo_url, "TLS verification disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build().map_err(|e| RepoError::NetworkError {
            message: e.to_string(),
        })?;

        Ok(Self {
            client,
            scope: Url::parse(repo_url).ok(),
            auth: options.auth_header(),
        })
    }

    /// Client without credentials or custom TLS
    pub fn public() -> Result<Self> {
        Self::new("", &ClientOptions::default())
    }

    /// GET a URL, following redirects without leaking credentials
    pub async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let mut current = Url::parse(url).map_err(|e| RepoError::InvalidRepositoryUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let mut redirects = 0;

        loop {
            let mut request = self.client.get(current.clone());
            if let Some(auth) = &self.auth {
                if self.in_scope(&current) {
                    request = request.header(reqwest::header::AUTHORIZATION, auth);
                } else {
                    tracing::warn!(
                        url = %current,
                        "request leaves the repository origin, credentials not forwarded"
                    );
                }
            }

            let response = request.send().await?;
            let status = response.status();

            if status.is_redirection() {
                redirects += 1;
                if redirects > MAX_REDIRECTS {
                    return Err(RepoError::NetworkError {
                        message: format!("Too many redirects (max {MAX_REDIRECTS})"),
                    });
                }
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| RepoError::NetworkError {
                        message: "Redirect without Location header".to_string(),
                    })?;
                current = current.join(location)?;
                continue;
            }

            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(RepoError::AuthRequired {
                    url: current.to_string(),
                });
            }
            if !status.is_success() {
                return Err(RepoError::HttpError {
                    status: status.as_u16(),
                    message: format!("Request to {current} failed"),
                });
            }

            return Ok(response);
        }
    }

    /// Fetch bytes from URL
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.get(url).await?;
        let bytes = response.bytes().await.map_err(|e| RepoError::NetworkError {
            message: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }

    /// Download `index.yaml` from a repository, storing a copy at `dest`
    pub async fn download_index(&self, repo_url: &str, dest: &Path) -> Result<RepositoryIndex> {
        let index_url = format!("{}/index.yaml", repo_url.trim_end_matches('/'));
        let data = match self.get_bytes(&index_url).await {
            Ok(data) => data,
            Err(RepoError::HttpError { status: 404, .. }) => {
                return Err(RepoError::IndexNotFound { url: index_url });
            }
            Err(e) => return Err(e),
        };

        let index = RepositoryIndex::from_bytes(&data)?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, &data)?;
        tracing::debug!(url = %index_url, path = %dest.display(), "cached repository index");
        Ok(index)
    }

    /// Download a chart archive and verify its digest when the index carries one
    pub async fn download_chart(&self, entry: &ChartVersion, repo_url: &str) -> Result<Vec<u8>> {
        let url = entry.download_url(repo_url)?;
        let data = self.get_bytes(url.as_str()).await?;

        if let Some(expected) = entry.digest.as_deref().filter(|d| !d.is_empty()) {
            let actual = compute_digest(&data);
            if !digest_matches(expected, &actual) {
                return Err(RepoError::IntegrityCheckFailed {
                    name: entry.name.clone(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        Ok(data)
    }

    fn in_scope(&self, url: &Url) -> bool {
        self.scope.as_ref().is_some_and(|scope| same_origin(scope, url))
    }
}

fn read_tls_file(path: &str) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| RepoError::InvalidTls {
        message: format!("{path}: {e}"),
    })
}

/// Same scheme, host and port
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host() == b.host()
        && a.port_or_known_default() == b.port_or_known_default()
}

/// Compute SHA256 digest of data
pub fn compute_digest(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Check if two digests match, ignoring case and a `sha256:` prefix
pub fn digest_matches(expected: &str, actual: &str) -> bool {
    let normalize = |d: &str| {
        d.trim()
            .to_lowercase()
            .replace("sha256:", "")
            .replace("sha256-", "")
    };
    normalize(expected) == normalize(actual)
}
