//! Keelson Chart Resolution
//!
//! This crate turns a release spec's chart reference into a loaded chart:
//!
//! - **Repositories**: Helm-compatible `repositories.yaml` and `index.yaml`
//! - **HTTP transport**: TLS material and basic auth scoped to the repository origin
//! - **Cache handles**: One lock per cache directory, shared across resolutions
//! - **Dependencies**: Check vendored subcharts, update them at most once
//!
//! ## Example
//!
//! ```rust,no_run
//! use keelson_repo::{CacheLocks, ChartResolver, EnvSettings};
//! use keelson_core::ReleaseSpec;
//!
//! # async fn example() -> keelson_repo::Result<()> {
//! let settings = EnvSettings::from_env();
//! let cache = CacheLocks::new().handle(&settings.repository_cache);
//! let resolver = ChartResolver::with_settings(settings, cache);
//!
//! let spec = ReleaseSpec {
//!     chart: "bitnami/nginx".to_string(),
//!     ..Default::default()
//! };
//! let resolved = resolver.resolve(&spec).await?;
//! println!("{} {}", resolved.chart.name(), resolved.chart.version());
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Notes
//!
//! - Credentials are never sent after cross-origin redirects
//! - Downloaded archives are checked against the index digest

pub mod cache;
pub mod config;
pub mod dependency;
pub mod error;
pub mod http;
pub mod index;
pub mod locator;
pub mod resolver;
pub mod version;

// Re-exports for convenience
pub use cache::{CacheLocks, ChartCache};
pub use config::{EnvSettings, Repository, RepositoryConfig, RepositoryType};
pub use dependency::{DependencyUpdater, RepoDependencyUpdater, check_dependencies};
pub use error::{RepoError, Result};
pub use http::{ClientOptions, RepoClient};
pub use index::{ChartVersion, RepositoryIndex};
pub use locator::{ChartLocator, ChartPathOptions, RepoLocator, chart_version, resolve_chart_name};
pub use resolver::{ChartResolver, ResolvedChart};
pub use version::VersionConstraint;
