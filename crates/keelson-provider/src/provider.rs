//! Release resource provider
//!
//! Each operation takes property documents from the control loop and returns
//! property documents. A release moves `absent -> present` through Create,
//! stays `present` through Update and Read, and returns to `absent` through
//! Delete. Check and Diff never touch the release store.

use keelson_core::spec::RELEASE_RESOURCE_TYPE;
use keelson_core::{
    Annotations, CoreError, MarshalOptions, PathSegment, PropertyMap, Release, ReleaseSpec,
    SetValueType, ValuePath, Values,
};
use keelson_kube::{
    ActionOutcome, InstallOptions, ReleaseExecutor, ReleaseState, StoreBackend, StoredRelease,
    UninstallOptions, UpgradeOptions,
};
use keelson_repo::{CacheLocks, ChartResolver, ResolvedChart};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::checkpoint::{
    INPUTS_KEY, SensitiveValues, checkpoint_document, parse_checkpoint, set_release_attributes,
};
use crate::config::ProviderConfig;
use crate::error::{ProviderError, Result};
use crate::naming::{autoname, resource_name};

/// Properties whose change replaces the release instead of upgrading it
pub const REPLACE_KEYS: &[&str] = &[
    "releaseSpec.chart",
    "releaseSpec.name",
    "releaseSpec.namespace",
    "releaseSpec.repositorySpec.repository",
];

#[derive(Debug, Clone, Default)]
pub struct CheckRequest {
    pub urn: String,
    /// Inputs of the previous run, absent on first creation
    pub olds: Option<PropertyMap>,
    pub news: PropertyMap,
}

/// A property that failed validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckFailure {
    pub property: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckResponse {
    pub inputs: PropertyMap,
    pub failures: Vec<CheckFailure>,
}

#[derive(Debug, Clone, Default)]
pub struct DiffRequest {
    pub id: String,
    pub urn: String,
    /// Checkpoint of the previous run
    pub olds: PropertyMap,
    /// Checked inputs of this run
    pub news: PropertyMap,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffResponse {
    pub changes: bool,
    pub replaces: Vec<String>,
    pub diffs: Vec<String>,
    pub delete_before_replace: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CreateRequest {
    pub urn: String,
    pub properties: PropertyMap,
    pub timeout: Option<Duration>,
    pub preview: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateResponse {
    /// Release name, empty under preview
    pub id: String,
    pub properties: PropertyMap,
}

#[derive(Debug, Clone, Default)]
pub struct ReadRequest {
    pub id: String,
    pub urn: String,
    pub properties: PropertyMap,
}

/// Refreshed state; an empty `id` means the release no longer exists
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadResponse {
    pub id: String,
    pub properties: PropertyMap,
    pub inputs: PropertyMap,
}

impl ReadResponse {
    pub fn is_gone(&self) -> bool {
        self.id.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    pub id: String,
    pub urn: String,
    /// Checkpoint of the previous run
    pub olds: PropertyMap,
    pub news: PropertyMap,
    pub timeout: Option<Duration>,
    pub preview: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateResponse {
    pub properties: PropertyMap,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteRequest {
    pub id: String,
    pub urn: String,
    pub properties: PropertyMap,
    pub timeout: Option<Duration>,
}

/// Reconciles release resources against the release store
pub struct ReleaseProvider {
    config: ProviderConfig,
    resolver: ChartResolver,
    executor: ReleaseExecutor,
}

impl ReleaseProvider {
    pub fn new(config: ProviderConfig, resolver: ChartResolver, executor: ReleaseExecutor) -> Self {
        Self {
            config,
            resolver,
            executor,
        }
    }

    /// Provider using the configured store and repository settings
    ///
    /// Providers built from the same `locks` share one lock per cache directory.
    pub async fn from_config(config: ProviderConfig, locks: &CacheLocks) -> Result<Self> {
        let settings = config.settings();
        let cache = locks.handle(&settings.repository_cache);
        let resolver = ChartResolver::with_settings(settings, cache);
        let driver = config.storage_driver().await?;
        let executor = ReleaseExecutor::new(Arc::new(StoreBackend::new(driver)));
        Ok(Self::new(config, resolver, executor))
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Validate inputs and fill in the release name and namespace
    pub fn check(&self, req: CheckRequest) -> Result<CheckResponse> {
        ensure_release_urn(&req.urn)?;
        let (mut news, annotations) = req.news.decode::<Release>()?;
        let name_unknown = annotations.is_unknown(&spec_path("name"));
        let namespace_unknown = annotations.is_unknown(&spec_path("namespace"));

        let olds = match req.olds.filter(|olds| !olds.is_empty()) {
            Some(olds) if olds.contains_key(INPUTS_KEY) => Some(parse_checkpoint(&olds)?.inputs),
            Some(olds) => Some(olds.decode::<Release>()?.0),
            None => None,
        };

        let spec = &mut news.release_spec;
        match &olds {
            Some(olds) => {
                if spec.name.is_empty() && !name_unknown {
                    spec.name = olds.release_spec.name.clone();
                }
                if spec.namespace.is_empty() && !namespace_unknown {
                    spec.namespace = olds.release_spec.namespace.clone();
                }
            }
            None => {
                if spec.name.is_empty() && !name_unknown {
                    spec.name = autoname(resource_name(&req.urn));
                    tracing::debug!(release = %spec.name, "assigned release name");
                }
            }
        }
        if spec.namespace.is_empty() && !namespace_unknown {
            spec.namespace = self.config.namespace.clone();
        }

        let failures = check_failures(spec, &annotations);
        news.resource_type = RELEASE_RESOURCE_TYPE.to_string();
        news.status = None;

        let mut inputs = PropertyMap::from_serializable(&news)?;
        inputs.annotate(&annotations);
        Ok(CheckResponse {
            inputs: self.outgoing(inputs)?,
            failures,
        })
    }

    /// Compare the frozen inputs of a checkpoint with new inputs
    pub fn diff(&self, req: DiffRequest) -> Result<DiffResponse> {
        ensure_release_urn(&req.urn)?;
        let olds = parse_checkpoint(&req.olds)?;
        let (news, annotations) = req.news.decode::<Release>()?;

        let old_spec = serde_json::to_value(&olds.inputs.release_spec)?;
        let new_spec = serde_json::to_value(&news.release_spec)?;

        let mut diffs = BTreeSet::new();
        changed_keys(&old_spec, &new_spec, "releaseSpec", &mut diffs);
        diffs.extend(
            annotations
                .unknowns
                .iter()
                .filter_map(diff_key_of_unknown),
        );

        let replaces: Vec<String> = diffs
            .iter()
            .filter(|key| REPLACE_KEYS.contains(&key.as_str()))
            .cloned()
            .collect();
        let same_identity = !diffs.contains("releaseSpec.name")
            && !diffs.contains("releaseSpec.namespace");

        tracing::debug!(id = %req.id, ?diffs, ?replaces, "computed release diff");
        Ok(DiffResponse {
            changes: !diffs.is_empty(),
            delete_before_replace: !replaces.is_empty() && same_identity,
            replaces,
            diffs: diffs.into_iter().collect(),
        })
    }

    /// Install a release
    pub async fn create(&self, req: CreateRequest) -> Result<CreateResponse> {
        ensure_release_urn(&req.urn)?;
        let (inputs, annotations) = req.properties.decode::<Release>()?;
        let mut live = inputs.clone();

        if req.preview && !annotations.unknowns.is_empty() {
            tracing::debug!("inputs are not fully known, skipping install preview");
            let checkpoint = checkpoint_document(&inputs, &live, &annotations)?;
            return Ok(CreateResponse {
                id: String::new(),
                properties: self.outgoing(checkpoint)?,
            });
        }

        let spec = &inputs.release_spec;
        require_name(spec)?;
        let sensitive = SensitiveValues::from_inputs(spec, &annotations);
        let (resolved, values) = self.prepare(spec, &sensitive).await?;
        let opts = InstallOptions::from_spec(spec, req.preview)?;

        let outcome = self
            .executor
            .install(&resolved.chart, &values, &opts, req.timeout)
            .await;
        let record = self.settle(outcome, &inputs, &mut live, &annotations, &sensitive)?;

        if !req.preview {
            tracing::info!(
                release = %record.name,
                namespace = %record.namespace,
                revision = record.revision,
                "created release"
            );
        }
        let checkpoint = checkpoint_document(&inputs, &live, &annotations)?;
        Ok(CreateResponse {
            id: if req.preview { String::new() } else { record.name },
            properties: self.outgoing(checkpoint)?,
        })
    }

    /// Refresh a checkpoint from the release store
    pub async fn read(&self, req: ReadRequest) -> Result<ReadResponse> {
        ensure_release_urn(&req.urn)?;
        let checkpoint = parse_checkpoint(&req.properties)?;
        let (namespace, name) = self.identity(&req.id, &checkpoint.live, &checkpoint.inputs);

        let record = match self.executor.get(&namespace, &name).await {
            Ok(record) if matches!(record.state, ReleaseState::Uninstalled) => None,
            Ok(record) => Some(record),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };
        let Some(record) = record else {
            tracing::debug!(release = %name, namespace = %namespace, "release is gone");
            return Ok(ReadResponse::default());
        };

        let sensitive =
            SensitiveValues::from_inputs(&checkpoint.inputs.release_spec, &checkpoint.annotations);
        let mut live = checkpoint.inputs.clone();
        set_release_attributes(&mut live, &record, &sensitive)?;

        let properties = checkpoint_document(&checkpoint.inputs, &live, &checkpoint.annotations)?;
        Ok(ReadResponse {
            id: record.name,
            properties: self.outgoing(properties)?,
            inputs: self.outgoing(checkpoint.inputs_doc)?,
        })
    }

    /// Upgrade a release in place
    pub async fn update(&self, req: UpdateRequest) -> Result<UpdateResponse> {
        ensure_release_urn(&req.urn)?;
        let olds = parse_checkpoint(&req.olds)?;
        let (mut inputs, annotations) = req.news.decode::<Release>()?;
        if inputs.release_spec.name.is_empty() {
            inputs.release_spec.name = olds.inputs.release_spec.name.clone();
        }
        let mut live = inputs.clone();
        live.status = olds.live.status.clone();

        if req.preview && !annotations.unknowns.is_empty() {
            tracing::debug!("inputs are not fully known, skipping upgrade preview");
            let checkpoint = checkpoint_document(&inputs, &live, &annotations)?;
            return Ok(UpdateResponse {
                properties: self.outgoing(checkpoint)?,
            });
        }

        let spec = &inputs.release_spec;
        require_name(spec)?;
        let sensitive = SensitiveValues::from_inputs(spec, &annotations);
        let (resolved, values) = self.prepare(spec, &sensitive).await?;
        let opts = UpgradeOptions::from_spec(spec, req.preview)?;

        let outcome = self
            .executor
            .upgrade(&resolved.chart, &values, &opts, req.timeout)
            .await;
        let record = self.settle(outcome, &inputs, &mut live, &annotations, &sensitive)?;

        if !req.preview {
            tracing::info!(
                release = %record.name,
                namespace = %record.namespace,
                revision = record.revision,
                "updated release"
            );
        }
        let checkpoint = checkpoint_document(&inputs, &live, &annotations)?;
        Ok(UpdateResponse {
            properties: self.outgoing(checkpoint)?,
        })
    }

    /// Uninstall a release; one that is already gone counts as deleted
    pub async fn delete(&self, req: DeleteRequest) -> Result<()> {
        ensure_release_urn(&req.urn)?;
        let checkpoint = parse_checkpoint(&req.properties)?;
        let (namespace, name) = self.identity(&req.id, &checkpoint.live, &checkpoint.inputs);
        if name.is_empty() {
            tracing::warn!(urn = %req.urn, "checkpoint names no release, nothing to delete");
            return Ok(());
        }

        let mut opts = UninstallOptions::new(name, namespace)
            .with_timeout(req.timeout.unwrap_or_default());
        opts.disable_hooks = checkpoint.inputs.release_spec.disable_webhooks;

        self.executor.uninstall(&opts).await?;
        tracing::info!(release = %opts.name, namespace = %opts.namespace, "deleted release");
        Ok(())
    }

    /// Resolve the chart and compose values for an install or upgrade
    async fn prepare(
        &self,
        spec: &ReleaseSpec,
        sensitive: &SensitiveValues,
    ) -> Result<(ResolvedChart, Values)> {
        let resolved = self.resolver.resolve(spec).await?;
        resolved.chart.ensure_installable()?;

        let values = Values::compose(&spec.values, &spec.set)?;
        if tracing::enabled!(tracing::Level::DEBUG) {
            let redacted = sensitive.cloak(values.inner());
            tracing::debug!(
                release = %spec.name,
                chart = resolved.chart.name(),
                values = %redacted,
                "composed values"
            );
        }
        Ok((resolved, values))
    }

    /// Fill `live` from an action outcome, turning a partial failure into
    /// [`ProviderError::InitFailed`] that carries the checkpoint
    fn settle(
        &self,
        outcome: ActionOutcome,
        inputs: &Release,
        live: &mut Release,
        annotations: &Annotations,
        sensitive: &SensitiveValues,
    ) -> Result<StoredRelease> {
        match outcome {
            ActionOutcome::Ok(record) => {
                set_release_attributes(live, &record, sensitive)?;
                Ok(record)
            }
            ActionOutcome::PartialFailure(record, error) => {
                set_release_attributes(live, &record, sensitive)?;
                let checkpoint = checkpoint_document(inputs, live, annotations)?;
                tracing::warn!(
                    release = %record.name,
                    status = record.state.status_name(),
                    "release was left behind by a failed action"
                );
                Err(ProviderError::InitFailed {
                    id: record.name,
                    properties: self.outgoing(checkpoint)?,
                    reasons: vec![error.to_string()],
                })
            }
            ActionOutcome::Err(error) => Err(error.into()),
        }
    }

    /// Namespace and name a checkpoint refers to, live values first
    fn identity(&self, id: &str, live: &Release, inputs: &Release) -> (String, String) {
        let status = live.status.as_ref();
        let first = |candidates: [&str; 3]| {
            candidates
                .into_iter()
                .find(|c| !c.is_empty())
                .unwrap_or_default()
                .to_string()
        };
        let namespace = first([
            status.map(|s| s.namespace.as_str()).unwrap_or_default(),
            inputs.release_spec.namespace.as_str(),
            self.config.namespace.as_str(),
        ]);
        let name = first([
            status.map(|s| s.name.as_str()).unwrap_or_default(),
            inputs.release_spec.name.as_str(),
            id,
        ]);
        (namespace, name)
    }

    /// Apply the configured marshal options to an outgoing document
    fn outgoing(&self, document: PropertyMap) -> Result<PropertyMap> {
        if self.config.enable_secrets {
            return Ok(document);
        }
        let opts = MarshalOptions {
            keep_secrets: false,
            keep_unknowns: true,
        };
        Ok(PropertyMap::from_json(document.to_json(opts))?)
    }
}

fn ensure_release_urn(urn: &str) -> Result<()> {
    if urn.is_empty() {
        return Ok(());
    }
    let resource_type = urn
        .rsplit("::")
        .nth(1)
        .and_then(|qualified| qualified.rsplit('$').next())
        .unwrap_or_default();
    if resource_type == RELEASE_RESOURCE_TYPE {
        Ok(())
    } else {
        Err(ProviderError::InvalidRequest(format!(
            "unknown resource type in '{urn}', expected {RELEASE_RESOURCE_TYPE}"
        )))
    }
}

fn require_name(spec: &ReleaseSpec) -> Result<()> {
    if spec.name.is_empty() {
        return Err(ProviderError::InvalidRequest(
            "release name is empty".to_string(),
        ));
    }
    Ok(())
}

fn spec_path(key: &str) -> ValuePath {
    ValuePath::from_segments(vec![
        PathSegment::Key("releaseSpec".to_string()),
        PathSegment::Key(key.to_string()),
    ])
}

fn check_failures(spec: &ReleaseSpec, annotations: &Annotations) -> Vec<CheckFailure> {
    let mut failures = Vec::new();
    if spec.chart.trim().is_empty() && !annotations.is_unknown(&spec_path("chart")) {
        failures.push(CheckFailure {
            property: "releaseSpec.chart".to_string(),
            reason: "a chart reference is required".to_string(),
        });
    }
    for (index, entry) in spec.set.iter().enumerate() {
        if let Err(CoreError::UnexpectedSetType { value_type }) =
            SetValueType::parse(&entry.value_type)
        {
            failures.push(CheckFailure {
                property: format!("releaseSpec.set[{index}].type"),
                reason: format!("unexpected type '{value_type}', expected auto or string"),
            });
        }
    }
    failures
}

/// Collect property keys that differ, descending into the repository spec
fn changed_keys(old: &JsonValue, new: &JsonValue, prefix: &str, diffs: &mut BTreeSet<String>) {
    let empty = serde_json::Map::new();
    let old_map = old.as_object().unwrap_or(&empty);
    let new_map = new.as_object().unwrap_or(&empty);

    let keys: BTreeSet<&String> = old_map.keys().chain(new_map.keys()).collect();
    for key in keys {
        let (old_value, new_value) = (old_map.get(key), new_map.get(key));
        if old_value == new_value {
            continue;
        }
        let path = format!("{prefix}.{key}");
        if key == "repositorySpec" {
            let null = JsonValue::Null;
            changed_keys(
                old_value.unwrap_or(&null),
                new_value.unwrap_or(&null),
                &path,
                diffs,
            );
        } else {
            diffs.insert(path);
        }
    }
}

/// Diff key for a property whose new value is not known yet
fn diff_key_of_unknown(path: &ValuePath) -> Option<String> {
    let segments = path.segments();
    if segments.first() != Some(&PathSegment::Key("releaseSpec".to_string())) {
        return None;
    }
    let depth = match segments.get(1) {
        Some(PathSegment::Key(key)) if key == "repositorySpec" => 3,
        Some(_) => 2,
        None => return None,
    };
    let prefix = segments.get(..depth)?;
    Some(ValuePath::from_segments(prefix.to_vec()).to_string())
}
