//! Release action executor
//!
//! Wraps a [`ReleaseBackend`] so callers see one of three outcomes. A failed
//! install or upgrade is followed by a lookup of the release: if the store
//! still holds a record, the caller gets it back with the cause so that state
//! can be checkpointed before the error is reported.

use keelson_core::{Chart, Values};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::actions::{InstallOptions, UninstallOptions, UpgradeOptions};
use crate::backend::{ActionFailure, ReleaseBackend};
use crate::error::{KubeError, Result};
use crate::release::StoredRelease;

/// Result of a mutating release action
#[derive(Debug)]
pub enum ActionOutcome {
    /// The action completed
    Ok(StoredRelease),

    /// The action failed but left a release behind
    PartialFailure(StoredRelease, KubeError),

    /// The action failed and no release exists
    Err(KubeError),
}

impl ActionOutcome {
    /// The release the outcome carries, if any
    pub fn release(&self) -> Option<&StoredRelease> {
        match self {
            Self::Ok(release) | Self::PartialFailure(release, _) => Some(release),
            Self::Err(_) => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

/// Executes release actions against a backend
#[derive(Clone)]
pub struct ReleaseExecutor {
    backend: Arc<dyn ReleaseBackend>,
}

impl ReleaseExecutor {
    pub fn new(backend: Arc<dyn ReleaseBackend>) -> Self {
        Self { backend }
    }

    /// Install a release, bounded by `deadline` when given
    pub async fn install(
        &self,
        chart: &Chart,
        values: &Values,
        opts: &InstallOptions,
        deadline: Option<Duration>,
    ) -> ActionOutcome {
        tracing::debug!(release = %opts.name, namespace = %opts.namespace, "installing release");
        let result = bounded(deadline, self.backend.install(chart, values, opts)).await;
        self.settle(result, &opts.namespace, &opts.name).await
    }

    /// Upgrade a release, bounded by `deadline` when given
    pub async fn upgrade(
        &self,
        chart: &Chart,
        values: &Values,
        opts: &UpgradeOptions,
        deadline: Option<Duration>,
    ) -> ActionOutcome {
        tracing::debug!(release = %opts.name, namespace = %opts.namespace, "upgrading release");
        let result = bounded(deadline, self.backend.upgrade(chart, values, opts)).await;
        self.settle(result, &opts.namespace, &opts.name).await
    }

    /// Latest revision of a release
    ///
    /// Every way a store reports a missing release comes back as
    /// [`KubeError::ReleaseNotFound`].
    pub async fn get(&self, namespace: &str, name: &str) -> Result<StoredRelease> {
        self.backend
            .get(namespace, name)
            .await
            .map_err(|e| normalize_not_found(e, namespace, name))
    }

    /// Whether the store holds a release by this name
    pub async fn exists(&self, namespace: &str, name: &str) -> Result<bool> {
        match self.get(namespace, name).await {
            Ok(_) => Ok(true),
            Err(KubeError::ReleaseNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Uninstall a release; one that does not exist is already uninstalled
    pub async fn uninstall(&self, opts: &UninstallOptions) -> Result<()> {
        let deadline = (!opts.timeout.is_zero()).then_some(opts.timeout);
        let result = bounded(deadline, self.backend.uninstall(opts))
            .await
            .and_then(std::convert::identity);

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                tracing::debug!(release = %opts.name, "release already uninstalled");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn settle(
        &self,
        result: Result<std::result::Result<StoredRelease, ActionFailure>>,
        namespace: &str,
        name: &str,
    ) -> ActionOutcome {
        let failure = match result {
            Ok(Ok(release)) => return ActionOutcome::Ok(release),
            Ok(Err(failure)) => failure,
            Err(timeout) => ActionFailure::from(timeout),
        };

        match self.get(namespace, name).await {
            Ok(latest) => {
                let release = failure.release.unwrap_or(latest);
                tracing::warn!(
                    release = name,
                    namespace,
                    status = release.state.status_name(),
                    error = %failure.error,
                    "release action failed but left a release behind"
                );
                ActionOutcome::PartialFailure(release, failure.error)
            }
            Err(KubeError::ReleaseNotFound { .. }) => ActionOutcome::Err(failure.error),
            Err(lookup) => {
                tracing::debug!(error = %lookup, "release lookup after failure failed");
                ActionOutcome::Err(failure.error)
            }
        }
    }
}

/// Run `action`, failing with a timeout error once `deadline` passes
async fn bounded<T>(deadline: Option<Duration>, action: impl Future<Output = T>) -> Result<T> {
    match deadline {
        Some(limit) => tokio::time::timeout(limit, action)
            .await
            .map_err(|_| KubeError::Timeout(format!("{}s", limit.as_secs_f64()))),
        None => Ok(action.await),
    }
}

fn normalize_not_found(error: KubeError, namespace: &str, name: &str) -> KubeError {
    if error.is_not_found() {
        KubeError::ReleaseNotFound {
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    } else {
        error
    }
}
