//! # Weft Engine
//!
//! Decodes workflow description documents and resolves them into runnable commands.
//!
//! The engine never launches processes. It takes a parsed document and one parameter
//! binding (the "job") and produces an ordered list of [`Command`] records a runner can
//! execute, then collects declared outputs from the finished output directories.
//!
//! ## Usage
//!
//! ```rust
//! use serde_json::json;
//! use weft_engine::{Resolver, ResolverConfig, parse_document};
//!
//! let document = parse_document(r#"
//! class: CommandLineTool
//! baseCommand: cat
//! inputs:
//!   file:
//!     type: File
//!     inputBinding: {position: 1}
//! outputs: {}
//! "#, Some("cat.cwl"))?;
//!
//! let job = json!({"file": {"class": "File", "location": "a.txt"}});
//! let config = ResolverConfig { stage_work_dir: false, ..ResolverConfig::default() };
//! let resolution = Resolver::new(&config).resolve(&document, job.as_object().expect("object"))?;
//! assert_eq!(resolution.commands[0].argv(), vec!["cat", "a.txt"]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`decode`**: generic tree to document model
//! - **`expression`**: the expression evaluation capability and its built-in evaluator
//! - **`bindings`**: value flattening and argument ordering
//! - **`executor`**: resolution of tools, expression tools and workflows into commands
//! - **`output`**: output collection from finished output directories
//! - **`config`**: resolver configuration and the runtime expression context

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use weft_types::Document;
use weft_types::value::{DIRECTORY_CLASS, FILE_CLASS};

pub mod bindings;
pub mod config;
pub mod decode;
pub mod error;
pub mod executor;
pub mod expression;
pub mod output;

pub use config::{ResolverConfig, RuntimeContext};
pub use decode::decode_document;
pub use error::{DecodeError, EngineError, EngineResult, ExpressionError};
pub use executor::{BindingContext, Command, CommandToken, FileRunLoader, Resolution, Resolver, Resources, RunLoader, Stager};
pub use expression::{Capabilities, ExpressionContext, ExpressionEvaluator, ParameterReferenceEvaluator};
pub use output::{OutputContext, OutputResolver};

/// Parses YAML or JSON document text and decodes it.
///
/// `name` is only used to label errors.
pub fn parse_document(text: &str, name: Option<&str>) -> Result<Document, DecodeError> {
    decode_document(&parse_tree(text, name)?, name)
}

/// Reads and decodes a document file. Relative File and Directory locations in `default`
/// values are taken relative to the document's directory.
pub fn load_document(path: &Path) -> EngineResult<Document> {
    let text = fs::read_to_string(path).map_err(|source| EngineError::io(path, source))?;
    let name = path.display().to_string();
    let mut tree = parse_tree(&text, Some(&name))?;
    rebase_defaults(&mut tree, base_dir_of(path));
    Ok(decode_document(&tree, Some(&name))?)
}

fn parse_tree(text: &str, name: Option<&str>) -> Result<Value, DecodeError> {
    serde_yaml::from_str(text)
        .map_err(|error| DecodeError::new(name.map(str::to_string), anyhow::Error::new(error).context("document is not valid YAML or JSON")))
}

fn base_dir_of(path: &Path) -> &Path {
    path.parent().unwrap_or_else(|| Path::new("."))
}

/// Rebases every `default` subtree, at any depth, so nested run targets and step inputs
/// are covered too.
fn rebase_defaults(value: &mut Value, base_dir: &Path) {
    match value {
        Value::Array(items) => items.iter_mut().for_each(|item| rebase_defaults(item, base_dir)),
        Value::Object(object) => {
            for (key, nested) in object.iter_mut() {
                if key == "default" {
                    rebase_locations(nested, base_dir);
                } else {
                    rebase_defaults(nested, base_dir);
                }
            }
        }
        _ => {}
    }
}

/// Parses job text: a map from input id to value.
pub fn parse_job(text: &str) -> Result<Map<String, Value>> {
    if text.trim().is_empty() {
        return Ok(Map::new());
    }
    let value: Value = serde_yaml::from_str(text).context("job is not valid YAML or JSON")?;
    match value {
        Value::Object(job) => Ok(job),
        Value::Null => Ok(Map::new()),
        other => anyhow::bail!("job must be a map from input id to value, found {other}"),
    }
}

/// Reads a job file. Relative File and Directory locations are taken relative to the
/// job file's directory.
pub fn load_job(path: &Path) -> Result<Map<String, Value>> {
    let text = fs::read_to_string(path).with_context(|| format!("read job {}", path.display()))?;
    let mut job = parse_job(&text).with_context(|| format!("parse job {}", path.display()))?;
    let base_dir = base_dir_of(path);
    for value in job.values_mut() {
        rebase_locations(value, base_dir);
    }
    Ok(job)
}

fn rebase_locations(value: &mut Value, base_dir: &Path) {
    match value {
        Value::Array(items) => items.iter_mut().for_each(|item| rebase_locations(item, base_dir)),
        Value::Object(object) => {
            let literal = object
                .get("class")
                .and_then(Value::as_str)
                .is_some_and(|class| class == FILE_CLASS || class == DIRECTORY_CLASS);
            if literal {
                for key in ["location", "path"] {
                    if let Some(Value::String(location)) = object.get_mut(key)
                        && !location.contains("://")
                        && !Path::new(location.as_str()).is_absolute()
                    {
                        *location = base_dir.join(location.as_str()).display().to_string();
                    }
                }
            }
            object.values_mut().for_each(|nested| rebase_locations(nested, base_dir));
        }
        _ => {}
    }
}
