//! Helpers for nested JSON documents (manifests, custom resource bodies)

use crate::error::{Error, Result};
use serde_json::{Map, Value};

/// Recursively merge `overlay` into `base`; scalars and arrays in `overlay` win.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        deep_merge(existing, value)
                    }
                    _ => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Apply an RFC 7386 JSON merge patch (`null` removes a key)
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// Mutable access to `path`, creating intermediate objects as needed
pub fn ensure_path<'a>(doc: &'a mut Value, path: &[&str]) -> Result<&'a mut Value> {
    let mut current = doc;
    for segment in path {
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        let map = current
            .as_object_mut()
            .ok_or_else(|| Error::Configuration(format!("'{}' is not inside an object", segment)))?;
        current = map.entry(segment.to_string()).or_insert(Value::Null);
    }
    Ok(current)
}

/// Set the value at `path`, creating intermediate objects
pub fn set_path(doc: &mut Value, path: &[&str], value: Value) -> Result<()> {
    *ensure_path(doc, path)? = value;
    Ok(())
}

/// String at a JSON pointer, if present
pub fn str_at<'a>(doc: &'a Value, pointer: &str) -> Option<&'a str> {
    doc.pointer(pointer).and_then(Value::as_str)
}

/// `metadata.name` of an object, or an empty string
pub fn name_of(doc: &Value) -> &str {
    str_at(doc, "/metadata/name").unwrap_or_default()
}

/// `status.phase` of an object, or an empty string
pub fn phase_of(doc: &Value) -> &str {
    str_at(doc, "/status/phase").unwrap_or_default()
}

/// Drop the metadata the API server fills in, so the object can be
/// created again elsewhere
pub fn strip_server_fields(doc: &mut Value) {
    if let Some(meta) = doc.get_mut("metadata").and_then(Value::as_object_mut) {
        for key in ["creationTimestamp", "resourceVersion", "uid", "managedFields"] {
            meta.remove(key);
        }
    }
}

/// Check whether `labels` satisfies a `k=v,k2` style selector
pub fn matches_selector(doc: &Value, selector: &str) -> bool {
    let labels = doc.pointer("/metadata/labels").and_then(Value::as_object);
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels
                .and_then(|l| l.get(key))
                .and_then(Value::as_str)
                .map_or(false, |v| v == value),
            None => labels.map_or(false, |l| l.contains_key(term)),
        })
}
