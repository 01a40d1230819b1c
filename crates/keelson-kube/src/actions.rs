//! Action options for install, upgrade and uninstall operations

use keelson_core::ReleaseSpec;
use std::time::Duration;

use crate::error::Result;
use crate::postrender::PostRenderer;

/// Options for install operation
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Release name
    pub name: String,

    /// Target namespace
    pub namespace: String,

    /// Bound on waiting for the release to settle
    pub timeout: Duration,

    /// Wait for resources to be ready
    pub wait: bool,

    pub wait_for_jobs: bool,

    /// Purge the release if the install fails
    pub atomic: bool,

    /// Create namespace if it doesn't exist
    pub create_namespace: bool,

    /// Re-use the name of a release that still holds it
    pub replace: bool,

    pub skip_crds: bool,

    pub disable_hooks: bool,

    pub disable_openapi_validation: bool,

    pub render_subchart_notes: bool,

    /// Render and validate without writing to the store
    pub dry_run: bool,

    pub description: String,

    pub post_renderer: Option<PostRenderer>,
}

impl InstallOptions {
    /// Create default install options with name and namespace
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Options carrying every install flag of a release spec
    pub fn from_spec(spec: &ReleaseSpec, dry_run: bool) -> Result<Self> {
        Ok(Self {
            name: spec.name.clone(),
            namespace: spec.namespace.clone(),
            timeout: Duration::from_secs(spec.timeout),
            wait: spec.wait,
            wait_for_jobs: spec.wait_for_jobs,
            atomic: spec.atomic,
            create_namespace: spec.create_namespace,
            replace: spec.replace,
            skip_crds: spec.skip_crds,
            disable_hooks: spec.disable_webhooks,
            disable_openapi_validation: spec.disable_openapi_validation,
            render_subchart_notes: spec.render_subchart_notes,
            dry_run,
            description: spec.description.clone(),
            post_renderer: post_renderer(spec)?,
        })
    }

    /// Enable dry-run mode
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

/// Options for upgrade operation
#[derive(Debug, Clone, Default)]
pub struct UpgradeOptions {
    /// Release name
    pub name: String,

    /// Target namespace
    pub namespace: String,

    pub timeout: Duration,

    pub wait: bool,

    pub wait_for_jobs: bool,

    /// Restore the previous revision if the upgrade fails
    pub atomic: bool,

    /// Delete the failed revision's new objects on failure
    pub cleanup_on_fail: bool,

    /// Force resource updates through delete/recreate
    pub force: bool,

    pub recreate_pods: bool,

    /// Reset values to chart defaults
    pub reset_values: bool,

    /// Merge the previous revision's values under the new ones
    pub reuse_values: bool,

    pub skip_crds: bool,

    pub disable_hooks: bool,

    pub disable_openapi_validation: bool,

    pub render_subchart_notes: bool,

    /// Revisions kept after a successful upgrade, unbounded when `None`
    pub max_history: Option<u32>,

    pub dry_run: bool,

    pub description: String,

    pub post_renderer: Option<PostRenderer>,
}

impl UpgradeOptions {
    /// Create default upgrade options with name and namespace
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Options carrying every upgrade flag of a release spec
    pub fn from_spec(spec: &ReleaseSpec, dry_run: bool) -> Result<Self> {
        Ok(Self {
            name: spec.name.clone(),
            namespace: spec.namespace.clone(),
            timeout: Duration::from_secs(spec.timeout),
            wait: spec.wait,
            wait_for_jobs: spec.wait_for_jobs,
            atomic: spec.atomic,
            cleanup_on_fail: spec.cleanup_on_fail,
            force: spec.force_update,
            recreate_pods: spec.recreate_pods,
            reset_values: spec.reset_values,
            reuse_values: spec.reuse_values,
            skip_crds: spec.skip_crds,
            disable_hooks: spec.disable_webhooks,
            disable_openapi_validation: spec.disable_openapi_validation,
            render_subchart_notes: spec.render_subchart_notes,
            max_history: spec.max_history,
            dry_run,
            description: spec.description.clone(),
            post_renderer: post_renderer(spec)?,
        })
    }
}

/// Options for uninstall operation
#[derive(Debug, Clone, Default)]
pub struct UninstallOptions {
    pub name: String,
    pub namespace: String,
    pub timeout: Duration,

    /// Keep the record, marked uninstalled, instead of purging it
    pub keep_history: bool,

    pub disable_hooks: bool,
}

impl UninstallOptions {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn post_renderer(spec: &ReleaseSpec) -> Result<Option<PostRenderer>> {
    if spec.postrender.trim().is_empty() {
        return Ok(None);
    }
    PostRenderer::new(&spec.postrender, Vec::new()).map(Some)
}
