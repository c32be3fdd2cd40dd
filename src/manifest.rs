//! Loading objects from YAML manifest files
//!
//! A directory of manifests plus a glob pattern names the objects a feature
//! creates. Files may hold several `---` separated documents; empty documents
//! are skipped.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::object::{ObjectRef, UntypedObject};
use crate::{Error, Result};

/// Files under `dir` matching `pattern`, in lexical order.
///
/// Matching nothing is a `Config` error.
pub fn matching_files(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full = dir.join(pattern);
    let full = full.to_string_lossy();
    let entries = glob::glob(&full)
        .map_err(|e| Error::config(format!("invalid manifest pattern {:?}: {}", full, e)))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| Error::config(format!("failed to read manifest entry: {}", e)))?;
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    if files.is_empty() {
        return Err(Error::config(format!("no manifests match {:?}", full)));
    }
    Ok(files)
}

/// Parse every document of a multi-document YAML string
pub fn parse(yaml: &str, source: &str) -> Result<Vec<UntypedObject>> {
    let mut objects = Vec::new();
    for (index, doc) in serde_yaml::Deserializer::from_str(yaml).enumerate() {
        let value = Value::deserialize(doc).map_err(|e| {
            Error::config(format!("{}: document {} is not valid YAML: {}", source, index + 1, e))
        })?;
        if value.is_null() {
            continue;
        }
        let object = UntypedObject::new(value).map_err(|_| {
            Error::config(format!("{}: document {} is not a mapping", source, index + 1))
        })?;
        objects.push(object);
    }
    Ok(objects)
}

/// Read and parse every manifest under `dir` matching `pattern`
pub fn load(dir: &Path, pattern: &str) -> Result<Vec<UntypedObject>> {
    let mut objects = Vec::new();
    for path in matching_files(dir, pattern)? {
        let yaml = std::fs::read_to_string(&path)
            .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))?;
        let parsed = parse(&yaml, &path.display().to_string())?;
        debug!(file = %path.display(), objects = parsed.len(), "loaded manifest");
        objects.extend(parsed);
    }
    Ok(objects)
}

/// Coordinates of `objects`, filling a missing namespace with `default_namespace`
pub fn refs(objects: &[UntypedObject], default_namespace: &str) -> Result<Vec<ObjectRef>> {
    objects
        .iter()
        .map(|object| object.object_ref(default_namespace))
        .collect()
}
