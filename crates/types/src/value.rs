//! File and Directory literal conventions.
//!
//! Bound values and output values use plain JSON objects with a `class` of `File` or
//! `Directory`. These helpers recognize them and derive the naming fields (`basename`,
//! `nameroot`, `nameext`, `dirname`, `path`) from `location` without touching the
//! filesystem.

use serde_json::{Map, Value};

pub const FILE_CLASS: &str = "File";
pub const DIRECTORY_CLASS: &str = "Directory";

/// Maximum number of bytes loaded into `contents`.
pub const CONTENTS_LIMIT: usize = 64 * 1024;

pub fn class_of(value: &Value) -> Option<&str> {
    value.get("class").and_then(Value::as_str)
}

pub fn is_file(value: &Value) -> bool {
    class_of(value) == Some(FILE_CLASS)
}

pub fn is_directory(value: &Value) -> bool {
    class_of(value) == Some(DIRECTORY_CLASS)
}

/// Strips a `file://` scheme; other locations are returned unchanged.
pub fn location_to_path(location: &str) -> &str {
    location.strip_prefix("file://").unwrap_or(location)
}

/// Filesystem path of a File/Directory literal: `path`, else `location`.
pub fn path_of(value: &Value) -> Option<&str> {
    value
        .get("path")
        .and_then(Value::as_str)
        .or_else(|| value.get("location").and_then(Value::as_str).map(location_to_path))
}

/// Splits `reads.fastq.gz` into (`reads.fastq`, `.gz`).
pub fn split_basename(basename: &str) -> (&str, &str) {
    match basename.rfind('.') {
        Some(index) if index > 0 => (&basename[..index], &basename[index..]),
        _ => (basename, ""),
    }
}

/// Fills the derived naming fields of a File or Directory literal in place.
///
/// Fields the literal already carries are left alone; `location` is derived from `path`
/// when only a path was given. Nested `secondaryFiles` and `listing` entries are
/// normalized too.
pub fn normalize_literal(object: &mut Map<String, Value>) {
    let class = object.get("class").and_then(Value::as_str).map(str::to_string);
    let is_file = class.as_deref() == Some(FILE_CLASS);
    if !is_file && class.as_deref() != Some(DIRECTORY_CLASS) {
        return;
    }

    if !object.contains_key("location")
        && let Some(path) = object.get("path").and_then(Value::as_str).map(str::to_string)
    {
        object.insert("location".into(), Value::String(path));
    }

    let location = object.get("location").and_then(Value::as_str).map(str::to_string);
    if let Some(location) = location {
        let path = location_to_path(&location).trim_end_matches('/').to_string();
        let (dirname, basename) = match path.rfind('/') {
            Some(index) => (path[..index].to_string(), path[index + 1..].to_string()),
            None => (String::new(), path.clone()),
        };
        object.entry("path").or_insert_with(|| Value::String(path.clone()));
        object.entry("basename").or_insert_with(|| Value::String(basename.clone()));
        object.entry("dirname").or_insert_with(|| Value::String(dirname));
        if is_file {
            let (nameroot, nameext) = split_basename(&basename);
            object.entry("nameroot").or_insert_with(|| Value::String(nameroot.to_string()));
            object.entry("nameext").or_insert_with(|| Value::String(nameext.to_string()));
        }
    }

    for nested_key in ["secondaryFiles", "listing"] {
        if let Some(Value::Array(entries)) = object.get_mut(nested_key) {
            for entry in entries {
                if let Value::Object(nested) = entry {
                    normalize_literal(nested);
                }
            }
        }
    }
}

/// Recursively normalizes every File/Directory literal inside `value`.
pub fn normalize_value(value: &mut Value) {
    match value {
        Value::Object(object) => {
            if object.contains_key("class") {
                normalize_literal(object);
            } else {
                for nested in object.values_mut() {
                    normalize_value(nested);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(normalize_value),
        _ => {}
    }
}
