//! Property documents exchanged with the control loop
//!
//! A property document is a JSON-compatible mapping whose leaves may be
//! marked secret or left unknown (not yet computed). On the wire, secrets are
//! signature objects and unknowns are a sentinel string.
//!
//! Typed decoding happens in two stages: [`PropertyMap::strip`] records secret
//! and unknown markers by path into [`Annotations`] and yields a plain JSON
//! document; after encoding a result, [`PropertyMap::annotate`] re-attaches
//! the markers at the same paths.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;

use crate::error::{CoreError, Result};
use crate::values::{PathSegment, ValuePath};

/// Key identifying a secret object on the wire
pub const SECRET_SIG_KEY: &str = "4dabf18193072939515e22adb298388d";
/// Value of [`SECRET_SIG_KEY`] in a secret object
pub const SECRET_SIG: &str = "1b47061264138c4ac30d75fd1eb44270";
/// Sentinel string for a value that is not known yet
pub const UNKNOWN_VALUE: &str = "04da6b54-80e4-46f7-96ec-b56ff0331ba9";

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<PropertyValue>),
    Object(PropertyMap),
    Secret(Box<PropertyValue>),
    Computed,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyMap(BTreeMap<String, PropertyValue>);

/// How markers are written when a document is marshalled to JSON
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarshalOptions {
    /// Emit secret signature objects; otherwise secrets are written in the clear
    pub keep_secrets: bool,
    /// Emit the unknown sentinel; otherwise unknown values are dropped
    pub keep_unknowns: bool,
}

impl MarshalOptions {
    pub fn full() -> Self {
        Self {
            keep_secrets: true,
            keep_unknowns: true,
        }
    }
}

/// Secret and unknown markers recorded by path
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Annotations {
    pub secrets: Vec<ValuePath>,
    pub unknowns: Vec<ValuePath>,
}

impl Annotations {
    pub fn is_secret(&self, path: &ValuePath) -> bool {
        self.secrets.contains(path)
    }

    /// Whether any secret path equals `path` or lies underneath it
    pub fn has_secret_under(&self, path: &ValuePath) -> bool {
        self.secrets
            .iter()
            .any(|secret| secret.segments().starts_with(path.segments()))
    }

    pub fn is_unknown(&self, path: &ValuePath) -> bool {
        self.unknowns.contains(path)
    }
}

impl PropertyValue {
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => Self::Number(n),
            JsonValue::String(s) if s == UNKNOWN_VALUE => Self::Computed,
            JsonValue::String(s) => Self::String(s),
            JsonValue::Array(items) => {
                Self::Array(items.into_iter().map(Self::from_json).collect())
            }
            JsonValue::Object(mut map) => {
                if map.get(SECRET_SIG_KEY).and_then(JsonValue::as_str) == Some(SECRET_SIG) {
                    let inner = map.remove("value").unwrap_or(JsonValue::Null);
                    return Self::Secret(Box::new(Self::from_json(inner)));
                }
                Self::Object(PropertyMap::from_json_map(map))
            }
        }
    }

    /// Marshal to JSON. `None` means the value is dropped from its parent object.
    pub fn to_json(&self, opts: MarshalOptions) -> Option<JsonValue> {
        match self {
            Self::Null => Some(JsonValue::Null),
            Self::Bool(b) => Some(JsonValue::Bool(*b)),
            Self::Number(n) => Some(JsonValue::Number(n.clone())),
            Self::String(s) => Some(JsonValue::String(s.clone())),
            Self::Array(items) => Some(JsonValue::Array(
                items
                    .iter()
                    .map(|item| item.to_json(opts).unwrap_or(JsonValue::Null))
                    .collect(),
            )),
            Self::Object(map) => Some(map.to_json(opts)),
            Self::Secret(inner) => {
                let inner = inner.to_json(opts)?;
                if !opts.keep_secrets {
                    return Some(inner);
                }
                let mut wrapped = Map::new();
                wrapped.insert(SECRET_SIG_KEY.to_string(), JsonValue::from(SECRET_SIG));
                wrapped.insert("value".to_string(), inner);
                Some(JsonValue::Object(wrapped))
            }
            Self::Computed => opts
                .keep_unknowns
                .then(|| JsonValue::String(UNKNOWN_VALUE.to_string())),
        }
    }

    pub fn is_secret(&self) -> bool {
        matches!(self, Self::Secret(_))
    }

    /// Unknown, possibly behind a secret marker
    pub fn is_computed(&self) -> bool {
        match self {
            Self::Computed => true,
            Self::Secret(inner) => inner.is_computed(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Secret(inner) => inner.as_str(),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&PropertyMap> {
        match self {
            Self::Object(map) => Some(map),
            Self::Secret(inner) => inner.as_object(),
            _ => None,
        }
    }

    fn child(&self, segment: &PathSegment) -> Option<&PropertyValue> {
        match (segment, self) {
            (_, Self::Secret(inner)) => inner.child(segment),
            (PathSegment::Key(key), Self::Object(map)) => map.get(key),
            (PathSegment::Index(index), Self::Array(items)) => items.get(*index),
            _ => None,
        }
    }
}

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a document from a JSON object; anything else is a decode error
    pub fn from_json(value: JsonValue) -> Result<Self> {
        match value {
            JsonValue::Object(map) => Ok(Self::from_json_map(map)),
            other => Err(CoreError::Decode {
                message: format!("expected an object, found {}", json_kind(&other)),
            }),
        }
    }

    fn from_json_map(map: Map<String, JsonValue>) -> Self {
        Self(
            map.into_iter()
                .map(|(k, v)| (k, PropertyValue::from_json(v)))
                .collect(),
        )
    }

    pub fn to_json(&self, opts: MarshalOptions) -> JsonValue {
        let map = self
            .0
            .iter()
            .filter_map(|(k, v)| v.to_json(opts).map(|json| (k.clone(), json)))
            .collect();
        JsonValue::Object(map)
    }

    /// Encode a plain serializable value; it must serialize to an object
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self> {
        Self::from_json(serde_json::to_value(value)?)
    }

    /// Two-stage decode into a typed value, returning the markers that were stripped
    pub fn decode<T: DeserializeOwned>(&self) -> Result<(T, Annotations)> {
        let (plain, annotations) = self.strip();
        let decoded = serde_json::from_value(plain).map_err(|e| CoreError::Decode {
            message: e.to_string(),
        })?;
        Ok((decoded, annotations))
    }

    /// Remove secret and unknown markers, recording their paths
    ///
    /// Unknown object entries are dropped and unknown array items become null,
    /// so array indexes stay stable.
    pub fn strip(&self) -> (JsonValue, Annotations) {
        let mut annotations = Annotations::default();
        let mut path = Vec::new();
        let plain = strip_map(self, &mut path, &mut annotations);
        (JsonValue::Object(plain), annotations)
    }

    /// Re-attach markers recorded by [`PropertyMap::strip`]
    ///
    /// Unknown paths are written back as unknown values. Secret paths are
    /// marked at the same location; where the output has a scalar in place of
    /// the original structure (for example an object that became a JSON
    /// string), that scalar is marked instead.
    pub fn annotate(&mut self, annotations: &Annotations) {
        for path in &annotations.unknowns {
            self.set_path(path, PropertyValue::Computed);
        }
        for path in &annotations.secrets {
            self.mark_secret(path);
        }
    }

    /// Write a value at `path`, creating intermediate objects as needed
    pub fn set_path(&mut self, path: &ValuePath, value: PropertyValue) {
        let Some((PathSegment::Key(first), rest)) = path.segments().split_first() else {
            return;
        };
        if rest.is_empty() {
            self.0.insert(first.clone(), value);
            return;
        }
        let entry = self
            .0
            .entry(first.clone())
            .or_insert_with(|| PropertyValue::Object(PropertyMap::new()));
        set_value_at(entry, rest, value);
    }

    pub fn get_path(&self, path: &ValuePath) -> Option<&PropertyValue> {
        let (PathSegment::Key(first), rest) = path.segments().split_first()? else {
            return None;
        };
        rest.iter()
            .try_fold(self.0.get(first)?, |node, segment| node.child(segment))
    }

    fn mark_secret(&mut self, path: &ValuePath) {
        let Some((PathSegment::Key(first), rest)) = path.segments().split_first() else {
            return;
        };
        if let Some(node) = self.0.get_mut(first) {
            mark_secret_at(node, rest);
        }
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: PropertyValue) -> Option<PropertyValue> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.0.iter()
    }
}

impl Serialize for PropertyMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json(MarshalOptions::full()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PropertyMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = JsonValue::deserialize(deserializer)?;
        Self::from_json(value).map_err(serde::de::Error::custom)
    }
}

fn strip_map(
    map: &PropertyMap,
    path: &mut Vec<PathSegment>,
    annotations: &mut Annotations,
) -> Map<String, JsonValue> {
    let mut plain = Map::new();
    for (key, value) in map.iter() {
        path.push(PathSegment::Key(key.clone()));
        if let Some(json) = strip_value(value, path, annotations) {
            plain.insert(key.clone(), json);
        }
        path.pop();
    }
    plain
}

fn strip_value(
    value: &PropertyValue,
    path: &mut Vec<PathSegment>,
    annotations: &mut Annotations,
) -> Option<JsonValue> {
    match value {
        PropertyValue::Secret(inner) => {
            annotations.secrets.push(ValuePath::from_segments(path.clone()));
            strip_value(inner, path, annotations)
        }
        PropertyValue::Computed => {
            annotations.unknowns.push(ValuePath::from_segments(path.clone()));
            None
        }
        PropertyValue::Array(items) => {
            let mut plain = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                path.push(PathSegment::Index(index));
                plain.push(strip_value(item, path, annotations).unwrap_or(JsonValue::Null));
                path.pop();
            }
            Some(JsonValue::Array(plain))
        }
        PropertyValue::Object(map) => Some(JsonValue::Object(strip_map(map, path, annotations))),
        scalar => scalar.to_json(MarshalOptions::default()),
    }
}

fn set_value_at(node: &mut PropertyValue, segments: &[PathSegment], value: PropertyValue) {
    let Some((first, rest)) = segments.split_first() else {
        *node = value;
        return;
    };

    if let PropertyValue::Secret(inner) = node {
        set_value_at(inner, segments, value);
        return;
    }

    match first {
        PathSegment::Key(key) => {
            if !matches!(node, PropertyValue::Object(_)) {
                *node = PropertyValue::Object(PropertyMap::new());
            }
            if let PropertyValue::Object(map) = node {
                let child = map
                    .0
                    .entry(key.clone())
                    .or_insert_with(|| PropertyValue::Object(PropertyMap::new()));
                set_value_at(child, rest, value);
            }
        }
        PathSegment::Index(index) => {
            if let PropertyValue::Array(items) = node
                && let Some(child) = items.get_mut(*index)
            {
                set_value_at(child, rest, value);
            }
        }
    }
}

fn mark_secret_at(node: &mut PropertyValue, segments: &[PathSegment]) {
    if node.is_secret() {
        return;
    }

    let Some((first, rest)) = segments.split_first() else {
        wrap_secret(node);
        return;
    };

    match node {
        PropertyValue::Object(map) => {
            if let PathSegment::Key(key) = first
                && let Some(child) = map.0.get_mut(key)
            {
                mark_secret_at(child, rest);
            }
        }
        PropertyValue::Array(items) => {
            if let PathSegment::Index(index) = first
                && let Some(child) = items.get_mut(*index)
            {
                mark_secret_at(child, rest);
            }
        }
        // The structure became a scalar on the way out; protect the whole scalar
        _ => wrap_secret(node),
    }
}

fn wrap_secret(node: &mut PropertyValue) {
    let inner = std::mem::replace(node, PropertyValue::Null);
    *node = PropertyValue::Secret(Box::new(inner));
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn secret(value: JsonValue) -> JsonValue {
        let mut wrapped = Map::new();
        wrapped.insert(SECRET_SIG_KEY.to_string(), json!(SECRET_SIG));
        wrapped.insert("value".to_string(), value);
        JsonValue::Object(wrapped)
    }

    fn path(p: &str) -> ValuePath {
        ValuePath::parse(p).unwrap()
    }

    #[test]
    fn test_wire_markers() {
        let doc = PropertyMap::from_json(json!({
            "password": secret(json!("hunter2")),
            "name": UNKNOWN_VALUE,
            "plain": 1
        }))
        .unwrap();

        assert!(doc.get("password").unwrap().is_secret());
        assert!(doc.get("name").unwrap().is_computed());
        assert_eq!(doc.get("password").unwrap().as_str(), Some("hunter2"));

        let full = doc.to_json(MarshalOptions::full());
        assert_eq!(full["password"], secret(json!("hunter2")));
        assert_eq!(full["name"], UNKNOWN_VALUE);

        let plain = doc.to_json(MarshalOptions::default());
        assert_eq!(plain, json!({"password": "hunter2", "plain": 1}));
    }

    #[test]
    fn test_from_json_rejects_non_object() {
        assert!(PropertyMap::from_json(json!([1, 2])).is_err());
    }

    #[test]
    fn test_strip_records_paths() {
        let doc = PropertyMap::from_json(json!({
            "spec": {
                "name": UNKNOWN_VALUE,
                "set": [
                    {"name": "a", "value": secret(json!("s3cr3t"))},
                    UNKNOWN_VALUE
                ]
            }
        }))
        .unwrap();

        let (plain, annotations) = doc.strip();

        assert_eq!(
            plain,
            json!({"spec": {"set": [{"name": "a", "value": "s3cr3t"}, null]}})
        );
        assert_eq!(annotations.secrets, vec![path("spec.set[0].value")]);
        assert_eq!(
            annotations.unknowns,
            vec![path("spec.name"), path("spec.set[1]")]
        );
        assert!(annotations.has_secret_under(&path("spec.set")));
        assert!(!annotations.has_secret_under(&path("spec.name")));
    }

    #[test]
    fn test_annotate_restores_markers() {
        let input = PropertyMap::from_json(json!({
            "spec": {"name": UNKNOWN_VALUE, "token": secret(json!("t"))}
        }))
        .unwrap();
        let (plain, annotations) = input.strip();

        let mut output = PropertyMap::from_json(plain).unwrap();
        output.annotate(&annotations);

        assert_eq!(output, input);
    }

    #[test]
    fn test_annotate_marks_changed_representation() {
        let annotations = Annotations {
            secrets: vec![path("status.values.db.password")],
            unknowns: Vec::new(),
        };
        let mut output = PropertyMap::from_json(json!({
            "status": {"values": "{\"db\":{\"password\":\"x\"}}", "name": "r1"}
        }))
        .unwrap();

        output.annotate(&annotations);

        let values = output.get_path(&path("status.values")).unwrap();
        assert!(values.is_secret());
        assert!(!output.get_path(&path("status.name")).unwrap().is_secret());
    }

    #[test]
    fn test_annotate_skips_missing_paths() {
        let annotations = Annotations {
            secrets: vec![path("spec.gone")],
            unknowns: Vec::new(),
        };
        let mut output = PropertyMap::from_json(json!({"spec": {"kept": 1}})).unwrap();

        output.annotate(&annotations);

        assert_eq!(output.to_json(MarshalOptions::full()), json!({"spec": {"kept": 1}}));
    }

    #[test]
    fn test_decode_typed() {
        #[derive(Deserialize)]
        struct Spec {
            #[serde(default)]
            name: String,
            token: String,
        }

        let doc = PropertyMap::from_json(json!({
            "name": UNKNOWN_VALUE,
            "token": secret(json!("abc"))
        }))
        .unwrap();

        let (spec, annotations): (Spec, _) = doc.decode().unwrap();
        assert_eq!(spec.name, "");
        assert_eq!(spec.token, "abc");
        assert!(annotations.is_secret(&path("token")));
        assert!(annotations.is_unknown(&path("name")));
    }

    #[test]
    fn test_serde_keeps_markers() {
        let doc = PropertyMap::from_json(json!({"a": secret(json!(1))})).unwrap();
        let text = serde_json::to_string(&doc).unwrap();
        let back: PropertyMap = serde_json::from_str(&text).unwrap();

        assert_eq!(back, doc);
    }
}
