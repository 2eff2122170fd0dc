//! Initial working directory staging.
//!
//! Listing entries are evaluated into [`StagedEntry`] values during resolution and then
//! handed to a [`Stager`]. Resolution never touches the filesystem itself: the default
//! [`LocalStager`] writes through `std::fs`, and [`NoopStager`] keeps dry runs side
//! effect free.

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use weft_types::value::{is_directory, is_file, path_of};
use weft_types::{InitialWorkDirRequirement, WorkDirEntry};

use crate::error::{EngineError, EngineResult};
use crate::expression::{Capabilities, ExpressionContext, ExpressionEvaluator, evaluate_field};

/// Content of one staged entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "source")]
pub enum StagedContent {
    /// Literal text written to a new file.
    Text(String),
    /// Existing file copied in.
    File(PathBuf),
    /// Existing directory copied in recursively.
    Directory(PathBuf),
}

/// One file or directory placed in the working directory before the command runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedEntry {
    /// Path relative to the working directory.
    pub name: String,
    pub content: StagedContent,
    pub writable: bool,
}

/// Materializes staged entries.
pub trait Stager {
    fn stage(&self, work_dir: &Path, entries: &[StagedEntry]) -> EngineResult<()>;
}

/// Writes entries to the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStager;

impl Stager for LocalStager {
    fn stage(&self, work_dir: &Path, entries: &[StagedEntry]) -> EngineResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        fs::create_dir_all(work_dir).map_err(|source| EngineError::io(work_dir, source))?;
        for entry in entries {
            let target = work_dir.join(&entry.name);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|source| EngineError::io(parent, source))?;
            }
            match &entry.content {
                StagedContent::Text(text) => fs::write(&target, text).map_err(|source| EngineError::io(&target, source))?,
                StagedContent::File(source_path) => {
                    fs::copy(source_path, &target).map_err(|source| EngineError::io(source_path, source))?;
                }
                StagedContent::Directory(source_path) => copy_directory(source_path, &target)?,
            }
            debug!(entry = %entry.name, work_dir = %work_dir.display(), "staged work dir entry");
        }
        Ok(())
    }
}

/// Records nothing and writes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStager;

impl Stager for NoopStager {
    fn stage(&self, _work_dir: &Path, _entries: &[StagedEntry]) -> EngineResult<()> {
        Ok(())
    }
}

fn copy_directory(source: &Path, target: &Path) -> EngineResult<()> {
    fs::create_dir_all(target).map_err(|error| EngineError::io(target, error))?;
    let entries = fs::read_dir(source).map_err(|error| EngineError::io(source, error))?;
    for entry in entries {
        let entry = entry.map_err(|error| EngineError::io(source, error))?;
        let path = entry.path();
        let destination = target.join(entry.file_name());
        if path.is_dir() {
            copy_directory(&path, &destination)?;
        } else {
            fs::copy(&path, &destination).map_err(|error| EngineError::io(&path, error))?;
        }
    }
    Ok(())
}

/// Evaluates a listing into staged entries, in declaration order.
pub(crate) fn plan_entries(
    requirement: &InitialWorkDirRequirement,
    evaluator: &dyn ExpressionEvaluator,
    context: &ExpressionContext<'_>,
    capabilities: &Capabilities,
) -> EngineResult<Vec<StagedEntry>> {
    let mut entries = Vec::new();
    for (index, listed) in requirement.listing.iter().enumerate() {
        let location = format!("work dir listing entry {index}");
        match listed {
            WorkDirEntry::Dirent(dirent) => {
                let content = evaluate_field(evaluator, &dirent.entry, context, capabilities).map_err(|source| EngineError::expression(&location, source))?;
                let name = match &dirent.entryname {
                    Some(entryname) => Some(
                        evaluate_field(evaluator, entryname, context, capabilities)
                            .map_err(|source| EngineError::expression(&location, source))?,
                    ),
                    None => None,
                };
                let name = name.as_ref().and_then(Value::as_str).map(str::to_string);
                entries.push(entry_from_content(name, &content, dirent.writable, &location)?);
            }
            WorkDirEntry::Expression(expression) => {
                let value = evaluator
                    .evaluate(expression, context, capabilities)
                    .map_err(|source| EngineError::expression(&location, source))?;
                collect_evaluated(&value, &location, &mut entries)?;
            }
            WorkDirEntry::Literal(value) => collect_evaluated(value, &location, &mut entries)?,
        }
    }
    for entry in &entries {
        check_relative(&entry.name)?;
    }
    Ok(entries)
}

/// Expression results: File/Directory values, dirent maps, lists of either, or null.
fn collect_evaluated(value: &Value, location: &str, entries: &mut Vec<StagedEntry>) -> EngineResult<()> {
    match value {
        Value::Null => Ok(()),
        Value::Array(items) => items.iter().try_for_each(|item| collect_evaluated(item, location, entries)),
        Value::Object(object) if object.contains_key("entry") => {
            let name = object.get("entryname").and_then(Value::as_str).map(str::to_string);
            let writable = object.get("writable").and_then(Value::as_bool).unwrap_or(false);
            let content = object.get("entry").unwrap_or(&Value::Null);
            entries.push(entry_from_content(name, content, writable, location)?);
            Ok(())
        }
        Value::Object(_) if is_file(value) || is_directory(value) => {
            entries.push(entry_from_content(None, value, false, location)?);
            Ok(())
        }
        other => Err(EngineError::InvalidWorkflow {
            root: location.to_string(),
            message: format!("listing expression produced {other}, expected File, Directory or dirent values"),
        }),
    }
}

fn entry_from_content(name: Option<String>, content: &Value, writable: bool, location: &str) -> EngineResult<StagedEntry> {
    if is_file(content) || is_directory(content) {
        let source = path_of(content).ok_or_else(|| EngineError::InvalidWorkflow {
            root: location.to_string(),
            message: "staged File or Directory has no location".to_string(),
        })?;
        let source = PathBuf::from(source);
        let name = match name {
            Some(name) => name,
            None => content
                .get("basename")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| source.file_name().map(|file_name| file_name.to_string_lossy().into_owned()))
                .ok_or_else(|| EngineError::InvalidWorkflow {
                    root: location.to_string(),
                    message: format!("cannot derive an entry name from '{}'", source.display()),
                })?,
        };
        let content = if is_directory(content) { StagedContent::Directory(source) } else { StagedContent::File(source) };
        return Ok(StagedEntry { name, content, writable });
    }

    let name = name.ok_or_else(|| EngineError::InvalidWorkflow {
        root: location.to_string(),
        message: "a literal entry needs an entryname".to_string(),
    })?;
    let text = match content {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    };
    Ok(StagedEntry {
        name,
        content: StagedContent::Text(text),
        writable,
    })
}

fn check_relative(name: &str) -> EngineResult<()> {
    let path = Path::new(name);
    let escapes = path.components().any(|component| matches!(component, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    if name.is_empty() || escapes {
        return Err(EngineError::Unsupported(format!(
            "work dir entry name '{name}' must be a relative path inside the working directory"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::ParameterReferenceEvaluator;
    use serde_json::{Map, json};
    use weft_types::{Dirent, StringOrExpression};

    fn plan(listing: Vec<WorkDirEntry>, inputs: Value) -> EngineResult<Vec<StagedEntry>> {
        let inputs = inputs.as_object().cloned().unwrap_or_default();
        let runtime = Map::new();
        let context = ExpressionContext::new(&inputs, &runtime);
        plan_entries(&InitialWorkDirRequirement { listing }, &ParameterReferenceEvaluator, &context, &Capabilities::default())
    }

    #[test]
    fn dirents_evaluate_name_and_content() {
        let entries = plan(
            vec![WorkDirEntry::Dirent(Dirent {
                entryname: Some(StringOrExpression::parse("$(inputs.name).txt")),
                entry: StringOrExpression::parse("threads=$(inputs.threads)"),
                writable: false,
            })],
            json!({"name": "settings", "threads": 4}),
        )
        .expect("plans");
        assert_eq!(entries[0].name, "settings.txt");
        assert_eq!(entries[0].content, StagedContent::Text("threads=4".into()));
    }

    #[test]
    fn file_expressions_stage_copies_under_their_basename() {
        let entries = plan(
            vec![WorkDirEntry::Expression("$(inputs.reference)".into())],
            json!({"reference": {"class": "File", "location": "/data/ref.fa", "basename": "ref.fa"}}),
        )
        .expect("plans");
        assert_eq!(entries[0].name, "ref.fa");
        assert_eq!(entries[0].content, StagedContent::File(PathBuf::from("/data/ref.fa")));
    }

    #[test]
    fn escaping_entry_names_are_rejected() {
        let result = plan(
            vec![WorkDirEntry::Dirent(Dirent {
                entryname: Some(StringOrExpression::parse("../outside.txt")),
                entry: StringOrExpression::parse("x"),
                writable: false,
            })],
            json!({}),
        );
        assert!(matches!(result, Err(EngineError::Unsupported(_))));
    }

    #[test]
    fn local_stager_writes_and_copies() {
        let source_dir = tempfile::tempdir().expect("temp dir");
        let source_file = source_dir.path().join("input.txt");
        fs::write(&source_file, "payload").expect("write");
        let work_dir = tempfile::tempdir().expect("temp dir");

        let entries = vec![
            StagedEntry {
                name: "nested/config.txt".into(),
                content: StagedContent::Text("a=1".into()),
                writable: false,
            },
            StagedEntry {
                name: "input.txt".into(),
                content: StagedContent::File(source_file),
                writable: false,
            },
        ];
        LocalStager.stage(work_dir.path(), &entries).expect("stages");
        assert_eq!(fs::read_to_string(work_dir.path().join("nested/config.txt")).expect("read"), "a=1");
        assert_eq!(fs::read_to_string(work_dir.path().join("input.txt")).expect("read"), "payload");
    }

    #[test]
    fn noop_stager_touches_nothing() {
        let work_dir = tempfile::tempdir().expect("temp dir");
        let target = work_dir.path().join("never");
        let entries = vec![StagedEntry {
            name: "file.txt".into(),
            content: StagedContent::Text("x".into()),
            writable: false,
        }];
        NoopStager.stage(&target, &entries).expect("stages");
        assert!(!target.exists());
    }
}
