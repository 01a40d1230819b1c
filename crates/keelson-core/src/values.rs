//! Values handling with deep merge support
//!
//! A release's effective values are composed from an ordered list of YAML
//! documents followed by an ordered list of `--set` style overrides.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::path::Path;

use crate::error::{CoreError, Result};
use crate::spec::SetValue;

/// Highest list index an override path may address
pub const MAX_INDEX: usize = 65536;

/// Values container with deep merge capability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(pub JsonValue);

/// How an override value is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetValueType {
    /// Infer booleans, null, integers and `{a,b}` lists; everything else is a string
    Auto,
    /// Keep the literal text
    String,
}

impl SetValueType {
    /// Parse an override type tag. An empty tag means `auto`.
    pub fn parse(tag: &str) -> Result<Self> {
        match tag {
            "" | "auto" => Ok(Self::Auto),
            "string" => Ok(Self::String),
            other => Err(CoreError::UnexpectedSetType {
                value_type: other.to_string(),
            }),
        }
    }
}

/// One step of a value path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A parsed override path such as `ingress.hosts[0].name` or `annotations.a\.b`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValuePath(Vec<PathSegment>);

impl ValuePath {
    pub fn parse(path: &str) -> Result<Self> {
        let invalid = |message: &str| CoreError::InvalidSetPath {
            path: path.to_string(),
            message: message.to_string(),
        };

        let mut segments = Vec::new();
        let mut key = String::new();
        let mut after_index = false;
        let mut chars = path.chars();

        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    let escaped = chars.next().ok_or_else(|| invalid("trailing escape"))?;
                    if after_index {
                        return Err(invalid("expected '.' or '[' after an index"));
                    }
                    key.push(escaped);
                }
                '.' => {
                    if !key.is_empty() {
                        segments.push(PathSegment::Key(std::mem::take(&mut key)));
                    } else if !after_index {
                        return Err(invalid("empty key"));
                    }
                    after_index = false;
                }
                '[' => {
                    if !key.is_empty() {
                        segments.push(PathSegment::Key(std::mem::take(&mut key)));
                    } else if !after_index {
                        return Err(invalid("index without a key"));
                    }

                    let mut digits = String::new();
                    loop {
                        match chars.next() {
                            Some(']') => break,
                            Some(d) if d.is_ascii_digit() => digits.push(d),
                            Some(_) => return Err(invalid("index must be a non-negative integer")),
                            None => return Err(invalid("unterminated index")),
                        }
                    }
                    let index: usize = digits
                        .parse()
                        .map_err(|_| invalid("index must be a non-negative integer"))?;
                    if index > MAX_INDEX {
                        return Err(invalid("index is greater than the maximum supported index"));
                    }
                    segments.push(PathSegment::Index(index));
                    after_index = true;
                }
                other => {
                    if after_index {
                        return Err(invalid("expected '.' or '[' after an index"));
                    }
                    key.push(other);
                }
            }
        }

        if !key.is_empty() {
            segments.push(PathSegment::Key(key));
        } else if !after_index {
            return Err(invalid("empty key"));
        }

        Ok(Self(segments))
    }

    pub fn from_segments(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }
}

impl fmt::Display for ValuePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Key(key) => {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{}", key.replace('.', "\\."))?;
                }
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

impl Values {
    /// Create empty values
    pub fn new() -> Self {
        Self(JsonValue::Object(serde_json::Map::new()))
    }

    /// Load values from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse values from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        Ok(Self(value))
    }

    /// Parse values from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let value: JsonValue = serde_json::from_str(json)?;
        Ok(Self(value))
    }

    /// Compose the effective values of a release
    ///
    /// Documents are merged in order (later documents win on conflicting
    /// leaves at every depth), then each override is applied in order.
    pub fn compose(documents: &[String], overrides: &[SetValue]) -> Result<Self> {
        let mut composed = Values::new();

        for (index, document) in documents.iter().enumerate() {
            if document.trim().is_empty() {
                continue;
            }
            let layer = Values::from_yaml(document).map_err(|e| CoreError::ValuesMerge {
                message: format!("failed to parse values document {index}: {e}"),
            })?;
            match layer.inner() {
                JsonValue::Null => continue,
                JsonValue::Object(_) => composed.merge(&layer),
                _ => {
                    return Err(CoreError::ValuesMerge {
                        message: format!("values document {index} is not a mapping"),
                    });
                }
            }
        }

        for set in overrides {
            let value_type = SetValueType::parse(&set.value_type)?;
            composed.set_override(&set.name, &set.value_text(), value_type)?;
        }

        Ok(composed)
    }

    /// Deep merge another Values into this one
    ///
    /// Rules:
    /// - Scalars: overlay replaces base
    /// - Objects: recursive merge
    /// - Arrays: overlay replaces base (not appended)
    pub fn merge(&mut self, overlay: &Values) {
        deep_merge(&mut self.0, &overlay.0);
    }

    /// Apply a single override, inferring the value's type unless it is forced to a string
    pub fn set_override(&mut self, path: &str, raw: &str, value_type: SetValueType) -> Result<()> {
        let path = ValuePath::parse(path)?;
        let value = match value_type {
            SetValueType::Auto => typed_value(raw),
            SetValueType::String => JsonValue::String(raw.to_string()),
        };
        self.set_path(&path, value);
        Ok(())
    }

    /// Set a value by path (e.g., "image.tag" or "hosts[0]")
    pub fn set(&mut self, path: &str, value: JsonValue) -> Result<()> {
        let path = ValuePath::parse(path)?;
        self.set_path(&path, value);
        Ok(())
    }

    pub fn set_path(&mut self, path: &ValuePath, value: JsonValue) {
        assign(&mut self.0, path.segments(), value);
    }

    /// Get a value by path
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        let path = ValuePath::parse(path).ok()?;
        self.get_path(&path)
    }

    pub fn get_path(&self, path: &ValuePath) -> Option<&JsonValue> {
        path.segments()
            .iter()
            .try_fold(&self.0, |node, segment| match (segment, node) {
                (PathSegment::Key(key), JsonValue::Object(map)) => map.get(key),
                (PathSegment::Index(index), JsonValue::Array(list)) => list.get(*index),
                _ => None,
            })
    }

    /// Get the inner JSON value
    pub fn inner(&self) -> &JsonValue {
        &self.0
    }

    /// Convert to JSON value
    pub fn into_inner(self) -> JsonValue {
        self.0
    }

    /// Check if values are empty
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            JsonValue::Object(map) => map.is_empty(),
            JsonValue::Null => true,
            _ => false,
        }
    }
}

/// Deep merge two JSON values
fn deep_merge(base: &mut JsonValue, overlay: &JsonValue) {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

/// Write `value` at `segments`, replacing any scalar that sits where a container is needed
fn assign(target: &mut JsonValue, segments: &[PathSegment], value: JsonValue) {
    let Some((first, rest)) = segments.split_first() else {
        *target = value;
        return;
    };

    match first {
        PathSegment::Key(key) => {
            if !target.is_object() {
                *target = JsonValue::Object(serde_json::Map::new());
            }
            if let JsonValue::Object(map) = target {
                let entry = map.entry(key.clone()).or_insert(JsonValue::Null);
                assign(entry, rest, value);
            }
        }
        PathSegment::Index(index) => {
            if !target.is_array() {
                *target = JsonValue::Array(Vec::new());
            }
            if let JsonValue::Array(list) = target {
                if list.len() <= *index {
                    list.resize(index + 1, JsonValue::Null);
                }
                assign(&mut list[*index], rest, value);
            }
        }
    }
}

/// Infer the type of an `auto` override
fn typed_value(raw: &str) -> JsonValue {
    if raw.len() >= 2 && raw.starts_with('{') && raw.ends_with('}') {
        let inner = &raw[1..raw.len() - 1];
        if inner.is_empty() {
            return JsonValue::Array(Vec::new());
        }
        return JsonValue::Array(inner.split(',').map(typed_scalar).collect());
    }
    typed_scalar(raw)
}

fn typed_scalar(raw: &str) -> JsonValue {
    if raw.eq_ignore_ascii_case("true") {
        return JsonValue::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return JsonValue::Bool(false);
    }
    if raw.eq_ignore_ascii_case("null") {
        return JsonValue::Null;
    }
    // Leading zeros keep the text, so "007" stays a string
    if !(raw.starts_with('0') && raw.len() > 1)
        && let Ok(number) = raw.parse::<i64>()
    {
        return JsonValue::Number(number.into());
    }
    JsonValue::String(raw.to_string())
}
