//! State checkpoints and redaction
//!
//! A checkpoint is the live release document with the submitted inputs frozen
//! under [`INPUTS_KEY`]. Overrides the caller marked secret never reach the
//! checkpoint in the clear: their leaves in the effective values are cloaked
//! and their text is scrubbed from the manifest.

use keelson_core::{
    Annotations, PathSegment, PropertyMap, PropertyValue, Release, ReleaseSpec, ReleaseStatus,
    ValuePath,
};
use keelson_kube::{StoredRelease, split_documents};
use serde_json::{Map, Value as JsonValue};

use crate::error::Result;

/// Field holding the frozen inputs in a checkpoint
pub const INPUTS_KEY: &str = "__inputs";

/// Replacement text for sensitive values
pub const SENSITIVE_PLACEHOLDER: &str = "(sensitive value)";

/// Overrides marked secret in a submitted document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensitiveValues {
    /// Override paths, as written in `set[].name`
    pub paths: Vec<String>,
    /// Override values as text, scrubbed from the manifest
    pub texts: Vec<String>,
}

impl SensitiveValues {
    /// Collect the `set` entries whose entry or value is marked secret
    pub fn from_inputs(spec: &ReleaseSpec, annotations: &Annotations) -> Self {
        let mut sensitive = Self::default();
        for (index, entry) in spec.set.iter().enumerate() {
            let entry_path = set_entry_path(index);
            let mut value_segments = entry_path.segments().to_vec();
            value_segments.push(PathSegment::Key("value".to_string()));
            let value_path = ValuePath::from_segments(value_segments);

            if !covers(annotations, &entry_path) && !covers(annotations, &value_path) {
                continue;
            }
            if !entry.name.is_empty() {
                sensitive.paths.push(entry.name.clone());
            }
            let text = entry.value_text();
            if !text.is_empty() && !sensitive.texts.contains(&text) {
                sensitive.texts.push(text);
            }
        }
        sensitive
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.texts.is_empty()
    }

    /// Copy of `values` with every sensitive leaf cloaked
    pub fn cloak(&self, values: &JsonValue) -> JsonValue {
        let mut cloaked = values.clone();
        for path in &self.paths {
            cloak_set_value(&mut cloaked, path);
        }
        cloaked
    }
}

/// Names of the `set` entries marked secret in a submitted release document
pub fn sensitive_set_paths(document: &PropertyMap) -> Result<Vec<String>> {
    let (release, annotations) = document.decode::<Release>()?;
    Ok(SensitiveValues::from_inputs(&release.release_spec, &annotations).paths)
}

fn set_entry_path(index: usize) -> ValuePath {
    ValuePath::from_segments(vec![
        PathSegment::Key("releaseSpec".to_string()),
        PathSegment::Key("set".to_string()),
        PathSegment::Index(index),
    ])
}

/// Whether `path` or one of its ancestors is marked secret
fn covers(annotations: &Annotations, path: &ValuePath) -> bool {
    annotations
        .secrets
        .iter()
        .any(|secret| path.segments().starts_with(secret.segments()))
}

/// Replace the leaf at an override path with the placeholder
///
/// Nothing changes when the leaf does not exist or the path crosses a node
/// that cannot hold it.
pub fn cloak_set_value(tree: &mut JsonValue, path: &str) {
    let Ok(path) = ValuePath::parse(path) else {
        return;
    };
    let Some((last, parents)) = path.segments().split_last() else {
        return;
    };

    let mut node = tree;
    for segment in parents {
        let next = match (segment, node) {
            (PathSegment::Key(key), JsonValue::Object(map)) => map.get_mut(key),
            (PathSegment::Index(index), JsonValue::Array(items)) => items.get_mut(*index),
            _ => None,
        };
        match next {
            Some(child) => node = child,
            None => return,
        }
    }

    let leaf = match (last, node) {
        (PathSegment::Key(key), JsonValue::Object(map)) => map.get_mut(key),
        (PathSegment::Index(index), JsonValue::Array(items)) => items.get_mut(*index),
        _ => None,
    };
    if let Some(leaf) = leaf {
        *leaf = JsonValue::String(SENSITIVE_PLACEHOLDER.to_string());
    }
}

/// Shortest sensitive text that is also scrubbed from inside longer strings
const MIN_EMBEDDED_LEN: usize = 8;

/// Replace string leaves holding a sensitive text
///
/// A leaf equal to a sensitive text is replaced whole. Texts of at least
/// [`MIN_EMBEDDED_LEN`] characters are also scrubbed where they appear inside
/// a longer string. Shorter texts such as `1` or `true` would otherwise
/// rewrite unrelated fields like `apiVersion: v1`.
pub fn redact_manifest(manifest: &mut JsonValue, texts: &[String]) {
    match manifest {
        JsonValue::String(s) => {
            for text in texts.iter().filter(|t| !t.is_empty()) {
                if s.as_str() == text.as_str() {
                    *s = SENSITIVE_PLACEHOLDER.to_string();
                    return;
                }
                if text.chars().count() >= MIN_EMBEDDED_LEN && s.contains(text.as_str()) {
                    *s = s.replace(text.as_str(), SENSITIVE_PLACEHOLDER);
                }
            }
        }
        JsonValue::Array(items) => {
            for item in items {
                redact_manifest(item, texts);
            }
        }
        JsonValue::Object(map) => {
            for value in map.values_mut() {
                redact_manifest(value, texts);
            }
        }
        _ => {}
    }
}

/// Convert a multi-document manifest into one object keyed by object identity
///
/// Keys have the form `[namespace/]kind[.group]/version/name` with the kind
/// and group lowercased. Empty documents are skipped.
pub fn manifest_to_json(manifest: &str) -> Result<JsonValue> {
    let mut objects = Map::new();
    for document in split_documents(manifest) {
        let value: JsonValue = serde_yaml::from_str(document)?;
        match value {
            JsonValue::Object(object) => {
                objects.insert(object_key(&object), JsonValue::Object(object));
            }
            JsonValue::Null => {}
            other => {
                tracing::warn!(document = %other, "skipping manifest document that is not a mapping");
            }
        }
    }
    Ok(JsonValue::Object(objects))
}

fn object_key(object: &Map<String, JsonValue>) -> String {
    fn text(value: Option<&JsonValue>) -> &str {
        value.and_then(JsonValue::as_str).unwrap_or_default()
    }

    let metadata = object.get("metadata");
    let namespace = text(metadata.and_then(|m| m.get("namespace")));
    let name = text(metadata.and_then(|m| m.get("name")));
    let kind = text(object.get("kind")).to_lowercase();

    let (group, version) = match text(object.get("apiVersion")).split_once('/') {
        Some((group, version)) => (group.to_lowercase(), version.to_string()),
        None => (String::new(), text(object.get("apiVersion")).to_string()),
    };

    let mut key = String::new();
    if !namespace.is_empty() {
        key.push_str(namespace);
        key.push('/');
    }
    key.push_str(&kind);
    if !group.is_empty() {
        key.push('.');
        key.push_str(&group);
    }
    key.push('/');
    key.push_str(&version);
    key.push('/');
    key.push_str(name);
    key
}

/// Fill a release's status from a stored record, redacting sensitive values
pub fn set_release_attributes(
    release: &mut Release,
    record: &StoredRelease,
    sensitive: &SensitiveValues,
) -> Result<()> {
    let values = sensitive.cloak(record.values.inner());

    let mut manifest = manifest_to_json(&record.manifest)?;
    redact_manifest(&mut manifest, &sensitive.texts);

    release.status = Some(ReleaseStatus {
        app_version: record.chart.app_version.clone(),
        chart: record.chart.name.clone(),
        name: record.name.clone(),
        namespace: record.namespace.clone(),
        revision: Some(record.revision),
        status: record.state.status_name().to_string(),
        values: serde_json::to_string(&values)?,
        version: record.chart.version.clone(),
        manifest: serde_json::to_string(&manifest)?,
    });
    Ok(())
}

/// Build the checkpoint for a live release
///
/// Markers stripped from the submitted inputs are re-attached to both the
/// live document and the frozen copy. Secret release values also mark the
/// status values and manifest.
pub fn checkpoint_document(
    inputs: &Release,
    live: &Release,
    annotations: &Annotations,
) -> Result<PropertyMap> {
    let mut object = PropertyMap::from_serializable(live)?;
    object.annotate(&live_annotations(live, annotations));

    let mut frozen = PropertyMap::from_serializable(inputs)?;
    frozen.annotate(annotations);

    object.insert(INPUTS_KEY, PropertyValue::Object(frozen));
    Ok(object)
}

/// Markers for the live document
///
/// Status values and the rendered manifest are derived from the inputs, so a
/// secret anywhere in `releaseSpec.values` makes both secret.
fn live_annotations(live: &Release, annotations: &Annotations) -> Annotations {
    let mut marked = annotations.clone();
    if live.status.is_none() {
        return marked;
    }

    let values = ValuePath::from_segments(vec![
        PathSegment::Key("releaseSpec".to_string()),
        PathSegment::Key("values".to_string()),
    ]);
    if annotations.has_secret_under(&values) || covers(annotations, &values) {
        for field in ["values", "manifest"] {
            marked.secrets.push(ValuePath::from_segments(vec![
                PathSegment::Key("status".to_string()),
                PathSegment::Key(field.to_string()),
            ]));
        }
    }
    marked
}

/// A checkpoint split into its frozen inputs and live state
#[derive(Debug, Clone)]
pub struct Checkpoint {
    /// Decoded frozen inputs
    pub inputs: Release,
    /// Frozen inputs as submitted, markers included
    pub inputs_doc: PropertyMap,
    /// Markers stripped from the frozen inputs
    pub annotations: Annotations,
    pub live: Release,
}

/// Split a checkpoint document
///
/// Documents written without frozen inputs use the live release spec as the
/// inputs.
pub fn parse_checkpoint(document: &PropertyMap) -> Result<Checkpoint> {
    let mut live_doc = document.clone();
    let frozen = live_doc
        .remove(INPUTS_KEY)
        .and_then(|value| value.as_object().cloned());

    let (live, _) = live_doc.decode::<Release>()?;

    let inputs_doc = match frozen {
        Some(frozen) => frozen,
        None => {
            live_doc.remove("status");
            live_doc
        }
    };
    let (inputs, annotations) = inputs_doc.decode::<Release>()?;

    Ok(Checkpoint {
        inputs,
        inputs_doc,
        annotations,
        live,
    })
}
