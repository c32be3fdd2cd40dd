//! Field path navigation over untyped objects
//!
//! A small interpreter over the JSON tree: every intermediate segment must be
//! a mapping, and the terminal value must have the requested shape. Shape
//! errors are never coerced away; only terminal scalars are stringified.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::object::{value_kind, UntypedObject};
use crate::{Error, Result};

/// Ordered path segments into an untyped object, e.g. `spec.resourceRefs`
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    /// Build a path from its segments
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Path segments
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    fn prefix(&self, len: usize) -> String {
        self.0[..len].join(".")
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl FromStr for FieldPath {
    type Err = Error;

    /// Parse dotted notation. Empty segments are rejected.
    fn from_str(s: &str) -> Result<Self> {
        let segments: Vec<&str> = s.split('.').collect();
        if segments.iter().any(|seg| seg.is_empty()) {
            return Err(Error::config(format!("invalid field path {:?}", s)));
        }
        Ok(Self::new(segments))
    }
}

impl From<&[&str]> for FieldPath {
    fn from(segments: &[&str]) -> Self {
        Self::new(segments.iter().copied())
    }
}

/// Walk `path` and return the terminal value.
///
/// Fails with `FieldNotFound` naming the first missing prefix, or
/// `TypeMismatch` when an intermediate segment is not a mapping.
pub fn nested<'a>(obj: &'a UntypedObject, path: &FieldPath) -> Result<&'a Value> {
    let mut current = obj.as_value();
    for (depth, segment) in path.segments().iter().enumerate() {
        let map = current.as_object().ok_or_else(|| {
            Error::type_mismatch(
                obj.describe(),
                path.prefix(depth),
                "mapping",
                value_kind(current),
            )
        })?;
        current = map
            .get(segment)
            .ok_or_else(|| Error::field_not_found(obj.describe(), path.prefix(depth + 1)))?;
    }
    Ok(current)
}

/// Read the flat string mapping at `path`.
pub fn string_map(obj: &UntypedObject, path: &FieldPath) -> Result<BTreeMap<String, String>> {
    let value = nested(obj, path)?;
    coerce_string_map(obj, path, value)
}

/// Read the sequence of flat string mappings at `path`.
pub fn string_map_sequence(
    obj: &UntypedObject,
    path: &FieldPath,
) -> Result<Vec<BTreeMap<String, String>>> {
    let value = nested(obj, path)?;
    let items = value.as_array().ok_or_else(|| {
        Error::type_mismatch(
            obj.describe(),
            path,
            "sequence of mappings",
            value_kind(value),
        )
    })?;
    items
        .iter()
        .enumerate()
        .map(|(i, item)| coerce_string_map(obj, &format!("{}[{}]", path, i), item))
        .collect()
}

fn coerce_string_map(
    obj: &UntypedObject,
    path: &dyn fmt::Display,
    value: &Value,
) -> Result<BTreeMap<String, String>> {
    let map = value.as_object().ok_or_else(|| {
        Error::type_mismatch(obj.describe(), path, "mapping", value_kind(value))
    })?;
    map.iter()
        .map(|(key, v)| {
            scalar_string(v)
                .map(|s| (key.clone(), s))
                .ok_or_else(|| {
                    Error::type_mismatch(
                        obj.describe(),
                        format!("{}.{}", path, key),
                        "scalar",
                        value_kind(v),
                    )
                })
        })
        .collect()
}

/// Canonical string form of a scalar; `None` for null and containers.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
