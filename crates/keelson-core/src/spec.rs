//! Release resource data model
//!
//! `Release` is the document exchanged with the control loop: the desired
//! `releaseSpec` plus the observed `status`. Field names are camelCase on the wire.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

/// Resource type token of a release
pub const RELEASE_RESOURCE_TYPE: &str = "keelson:index:Release";

/// Default action timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// A release resource document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_type: String,

    #[serde(default)]
    pub release_spec: ReleaseSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ReleaseStatus>,
}

/// Desired state of a release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseSpec {
    /// Roll back changes made by a failed install or upgrade
    #[serde(default, skip_serializing_if = "is_false")]
    pub atomic: bool,

    /// Chart reference: a name, `repo/name`, a chart directory or an archive path
    #[serde(default)]
    pub chart: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub cleanup_on_fail: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub create_namespace: bool,

    /// Vendor missing or mismatched dependencies before installing
    #[serde(default, skip_serializing_if = "is_false")]
    pub dependency_update: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Consider pre-release chart versions when no version is given
    #[serde(default, skip_serializing_if = "is_false")]
    pub devel: bool,

    #[serde(default, rename = "disableCRDHooks", skip_serializing_if = "is_false")]
    pub disable_crd_hooks: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub disable_openapi_validation: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub disable_webhooks: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub force_update: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub keyring: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub lint: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_history: Option<u32>,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub namespace: String,

    /// Executable the rendered manifest is piped through
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub postrender: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub recreate_pods: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub render_subchart_notes: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub replace: bool,

    #[serde(default, skip_serializing_if = "RepositorySpec::is_empty")]
    pub repository_spec: RepositorySpec,

    #[serde(default, skip_serializing_if = "is_false")]
    pub reset_values: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub reuse_values: bool,

    #[serde(default, deserialize_with = "nullable_items", skip_serializing_if = "Vec::is_empty")]
    pub set: Vec<SetValue>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub skip_crds: bool,

    /// Action timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Raw YAML values documents, merged in order
    #[serde(default, deserialize_with = "nullable_items", skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub verify: bool,

    #[serde(default)]
    pub version: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub wait: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub wait_for_jobs: bool,
}

impl Default for ReleaseSpec {
    fn default() -> Self {
        Self {
            atomic: false,
            chart: String::new(),
            cleanup_on_fail: false,
            create_namespace: false,
            dependency_update: false,
            description: String::new(),
            devel: false,
            disable_crd_hooks: false,
            disable_openapi_validation: false,
            disable_webhooks: false,
            force_update: false,
            keyring: String::new(),
            lint: false,
            max_history: None,
            name: String::new(),
            namespace: String::new(),
            postrender: String::new(),
            recreate_pods: false,
            render_subchart_notes: false,
            replace: false,
            repository_spec: RepositorySpec::default(),
            reset_values: false,
            reuse_values: false,
            set: Vec::new(),
            skip_crds: false,
            timeout: DEFAULT_TIMEOUT_SECS,
            values: Vec::new(),
            verify: false,
            version: String::new(),
            wait: false,
            wait_for_jobs: false,
        }
    }
}

/// Where and how to fetch a chart
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySpec {
    /// Repository URL, or the name of a configured repository
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repository: String,

    #[serde(default, rename = "repositoryCAFile", skip_serializing_if = "String::is_empty")]
    pub repository_ca_file: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repository_cert_file: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repository_key_file: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repository_password: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repository_username: String,
}

impl RepositorySpec {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// A single `--set` style override
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetValue {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub value: JsonValue,

    /// `auto` (or empty) infers the type, `string` keeps the literal text
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub value_type: String,
}

impl SetValue {
    /// The override's value as the text an override parser expects
    pub fn value_text(&self) -> String {
        match &self.value {
            JsonValue::Null => String::new(),
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Observed state of a release, produced after an install or upgrade
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub chart: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u32>,

    #[serde(default)]
    pub status: String,

    /// Effective values as a JSON document, with sensitive leaves redacted
    #[serde(default)]
    pub values: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Rendered manifest as a JSON document keyed by object identity
    #[serde(default)]
    pub manifest: String,
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Deserialize a list whose items may be null (unknown values stripped from a
/// property document), keeping indexes stable by substituting defaults
fn nullable_items<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let items: Option<Vec<Option<T>>> = Option::deserialize(deserializer)?;
    Ok(items
        .unwrap_or_default()
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect())
}
