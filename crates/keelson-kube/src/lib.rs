//! Keelson Kube - release actions and the release store
//!
//! This crate provides:
//! - **Release records**: revisions of a release and their lifecycle state
//! - **Storage drivers**: persist records in Kubernetes Secrets, local files or memory
//! - **Action options**: install, upgrade and uninstall flags derived from a release spec
//! - **Release backend**: the capability that performs actions against a store
//! - **Executor**: tagged outcomes that surface partial failures with their record
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use keelson_core::{Chart, Values};
//! use keelson_kube::{ActionOutcome, InstallOptions, MemoryDriver, ReleaseExecutor, StoreBackend};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let chart = Chart::load("./charts/web")?;
//! let backend = StoreBackend::new(Arc::new(MemoryDriver::new()));
//! let executor = ReleaseExecutor::new(Arc::new(backend));
//!
//! let opts = InstallOptions::new("web", "default");
//! match executor.install(&chart, &Values::new(), &opts, None).await {
//!     ActionOutcome::Ok(release) => println!("installed revision {}", release.revision),
//!     ActionOutcome::PartialFailure(release, err) => eprintln!("{}: {err}", release.state),
//!     ActionOutcome::Err(err) => eprintln!("install failed: {err}"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod backend;
pub mod client;
pub mod error;
pub mod executor;
pub mod postrender;
pub mod release;
pub mod storage;

pub use actions::{InstallOptions, UninstallOptions, UpgradeOptions};
pub use backend::{ActionFailure, ReleaseBackend, StoreBackend, render_manifest, split_documents};
pub use client::default_client;
pub use error::{KubeError, Result};
pub use executor::{ActionOutcome, ReleaseExecutor};
pub use postrender::PostRenderer;
pub use release::{ChartInfo, ReleaseState, StoredRelease};
pub use storage::{
    CompressionMethod, FileDriver, MemoryDriver, OperationCounts, SecretsDriver, StorageConfig,
    StorageDriver,
};
