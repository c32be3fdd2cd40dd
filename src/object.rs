//! Object coordinates and the untyped object representation
//!
//! Objects read from the store are kept as `serde_json::Value` trees: the
//! engine never knows the schema of a composite or managed resource up front,
//! so everything past the coordinates is navigated by field path.

use std::collections::BTreeMap;
use std::fmt;

use kube::core::GroupVersionKind;
use serde_json::Value;

use crate::{Error, Result};

/// Coordinates of a fetchable object
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    /// Object name
    pub name: String,
    /// Namespace the object lives in
    pub namespace: String,
    /// Full apiVersion, e.g. `x.example.org/v1` or `v1`
    pub api_version: String,
    /// Object kind
    pub kind: String,
}

impl ObjectRef {
    /// Create a reference from its four coordinates
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        api_version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            api_version: api_version.into(),
            kind: kind.into(),
        }
    }

    /// Check that every coordinate is present and the apiVersion parses.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("name", &self.name),
            ("namespace", &self.namespace),
            ("apiVersion", &self.api_version),
            ("kind", &self.kind),
        ] {
            if value.is_empty() {
                return Err(Error::invalid_reference(self, format!("{} is empty", field)));
            }
        }
        self.group_version_kind().map(|_| ())
    }

    /// Resolve the apiVersion into a group/version/kind triple
    pub fn group_version_kind(&self) -> Result<GroupVersionKind> {
        let (group, version) = parse_api_version(&self.api_version)
            .map_err(|msg| Error::invalid_reference(self, msg))?;
        Ok(GroupVersionKind::gvk(&group, &version, &self.kind))
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}/{} ({})",
            self.kind, self.namespace, self.name, self.api_version
        )
    }
}

/// Split an apiVersion into `(group, version)`.
///
/// Core resources carry no group (`v1`). Anything with more than one `/`, or
/// an empty group or version, is rejected.
pub fn parse_api_version(api_version: &str) -> std::result::Result<(String, String), String> {
    if api_version.trim() != api_version || api_version.contains(char::is_whitespace) {
        return Err(format!("apiVersion {:?} contains whitespace", api_version));
    }
    match api_version.split_once('/') {
        None if api_version.is_empty() => Err("apiVersion is empty".to_string()),
        None => Ok((String::new(), api_version.to_string())),
        Some((group, version)) => {
            if group.is_empty() || version.is_empty() || version.contains('/') {
                Err(format!("malformed apiVersion {:?}", api_version))
            } else {
                Ok((group.to_string(), version.to_string()))
            }
        }
    }
}

/// A fetched object with no fixed schema
#[derive(Clone, Debug, PartialEq)]
pub struct UntypedObject(Value);

impl UntypedObject {
    /// Wrap a JSON tree. The root must be a mapping.
    pub fn new(value: Value) -> Result<Self> {
        if value.is_object() {
            Ok(Self(value))
        } else {
            Err(Error::type_mismatch(
                "<fetched object>",
                "<root>",
                "mapping",
                value_kind(&value),
            ))
        }
    }

    /// Borrow the underlying JSON tree
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Consume into the underlying JSON tree
    pub fn into_value(self) -> Value {
        self.0
    }

    fn str_at(&self, pointer: &str) -> Option<&str> {
        self.0.pointer(pointer).and_then(Value::as_str)
    }

    /// `metadata.name`
    pub fn name(&self) -> Option<&str> {
        self.str_at("/metadata/name")
    }

    /// `metadata.namespace`
    pub fn namespace(&self) -> Option<&str> {
        self.str_at("/metadata/namespace")
    }

    /// `apiVersion`
    pub fn api_version(&self) -> Option<&str> {
        self.str_at("/apiVersion")
    }

    /// `kind`
    pub fn kind(&self) -> Option<&str> {
        self.str_at("/kind")
    }

    /// Labels from `metadata.labels`; empty when the object has none.
    ///
    /// Non-string label values are skipped; the API server never produces
    /// them.
    pub fn labels(&self) -> BTreeMap<String, String> {
        self.0
            .pointer("/metadata/labels")
            .and_then(Value::as_object)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Single label lookup
    pub fn label(&self, key: &str) -> Option<&str> {
        self.0
            .pointer("/metadata/labels")
            .and_then(|labels| labels.get(key))
            .and_then(Value::as_str)
    }

    /// Human-readable identity used in error messages, e.g. `Composed default/xr-1`
    pub fn describe(&self) -> String {
        let kind = self.kind().unwrap_or("<unknown kind>");
        let name = self.name().unwrap_or("<unnamed>");
        match self.namespace() {
            Some(ns) if !ns.is_empty() => format!("{} {}/{}", kind, ns, name),
            _ => format!("{} {}", kind, name),
        }
    }

    /// Coordinates read back from the object itself.
    ///
    /// `default_namespace` fills in cluster-scoped or namespace-less objects.
    pub fn object_ref(&self, default_namespace: &str) -> Result<ObjectRef> {
        let missing = |field: &str| Error::field_not_found(self.describe(), field);
        let obj_ref = ObjectRef::new(
            self.name().ok_or_else(|| missing("metadata.name"))?,
            self.namespace().unwrap_or(default_namespace),
            self.api_version().ok_or_else(|| missing("apiVersion"))?,
            self.kind().ok_or_else(|| missing("kind"))?,
        );
        obj_ref.validate()?;
        Ok(obj_ref)
    }
}

impl TryFrom<Value> for UntypedObject {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Self::new(value)
    }
}

/// Name of a JSON value's shape, for mismatch messages
pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}
