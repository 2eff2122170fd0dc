//! # Output Resolution
//!
//! Collects output values from a finished command's output directory.
//!
//! For every declared output the resolver globs the binding's patterns (literal or
//! evaluated) under the output directory, describes each match as a File or Directory
//! value with size and `sha1$` checksum, optionally loads contents, attaches secondary
//! files, and applies `outputEval`. A `cwl.output.json` written by the tool replaces all
//! of this and is returned as-is.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use glob::Pattern;
use serde_json::{Map, Value};
use sha1::{Digest, Sha1};
use tracing::{debug, info};
use weft_types::value::{CONTENTS_LIMIT, DIRECTORY_CLASS, FILE_CLASS, is_directory, is_file, normalize_value, path_of, split_basename};
use weft_types::{LiteralShape, OutputParameter, ParameterType, SecondaryFileRule, StringOrExpression, TypeUnion};

use crate::error::{EngineError, EngineResult};
use crate::executor::Command;
use crate::expression::{Capabilities, ExpressionContext, ExpressionEvaluator, ParameterReferenceEvaluator, evaluate_field};

/// File a tool may write to report its outputs directly.
pub const OUTPUT_OBJECT_FILE: &str = "cwl.output.json";

/// Everything output collection needs from one finished command.
#[derive(Debug, Clone)]
pub struct OutputContext<'a> {
    pub outdir: PathBuf,
    /// Captured standard output, when the command redirected it. Relative paths are
    /// taken against `outdir`.
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    pub inputs: &'a Map<String, Value>,
    pub runtime: &'a Map<String, Value>,
    pub capabilities: &'a Capabilities,
}

impl<'a> OutputContext<'a> {
    /// Context for a resolved command whose process has finished in `outdir`.
    pub fn for_command(command: &'a Command, outdir: impl Into<PathBuf>) -> Self {
        let outdir = outdir.into();
        Self {
            stdout: command.stdout.as_ref().map(PathBuf::from),
            stderr: command.stderr.as_ref().map(PathBuf::from),
            outdir,
            inputs: &command.bound_inputs,
            runtime: &command.runtime,
            capabilities: &command.capabilities,
        }
    }
}

/// Collects declared outputs from an output directory.
pub struct OutputResolver<'a> {
    evaluator: &'a dyn ExpressionEvaluator,
}

impl Default for OutputResolver<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> OutputResolver<'a> {
    pub fn new() -> Self {
        Self {
            evaluator: &ParameterReferenceEvaluator,
        }
    }

    pub fn with_evaluator(evaluator: &'a dyn ExpressionEvaluator) -> Self {
        Self { evaluator }
    }

    /// Collects every output of `command` from `outdir`.
    pub fn collect_command(&self, command: &Command, outdir: impl Into<PathBuf>) -> EngineResult<Map<String, Value>> {
        self.collect(&command.outputs, &OutputContext::for_command(command, outdir))
    }

    /// Builds the output object: `cwl.output.json` when present, otherwise each declared
    /// output in declaration order.
    pub fn collect(&self, outputs: &[OutputParameter], context: &OutputContext<'_>) -> EngineResult<Map<String, Value>> {
        let outdir = absolute(&context.outdir)?;
        let object_file = outdir.join(OUTPUT_OBJECT_FILE);
        if object_file.is_file() {
            info!(outdir = %outdir.display(), "reading output object written by the tool");
            return read_output_object(&object_file);
        }

        let mut collected = Map::new();
        for output in outputs {
            let value = self.resolve_output(output, &outdir, context)?;
            collected.insert(output.id.clone(), value);
        }
        info!(outdir = %outdir.display(), outputs = collected.len(), "collected outputs");
        Ok(collected)
    }

    fn resolve_output(&self, output: &OutputParameter, outdir: &Path, context: &OutputContext<'_>) -> EngineResult<Value> {
        let missing = |message: String| EngineError::MissingOutput {
            output: output.id.clone(),
            message,
        };

        for (stream, captured) in [("stdout", &context.stdout), ("stderr", &context.stderr)] {
            if output.param_type.mentions_scalar(stream) {
                let path = captured.as_ref().ok_or_else(|| missing(format!("{stream} was not captured")))?;
                let path = outdir.join(path);
                if !path.is_file() {
                    return Err(missing(format!("captured {stream} '{}' does not exist", path.display())));
                }
                return describe_file(&path, outdir);
            }
        }

        let Some(binding) = &output.output_binding else {
            return if output.is_optional() {
                Ok(Value::Null)
            } else {
                Err(missing("no output binding and no output object".to_string()))
            };
        };

        let expression_context = ExpressionContext::new(context.inputs, context.runtime);
        let mut patterns = Vec::new();
        for glob in &binding.glob {
            let value = evaluate_field(self.evaluator, glob, &expression_context, context.capabilities)
                .map_err(|source| EngineError::expression(format!("glob of output '{}'", output.id), source))?;
            match value {
                Value::String(pattern) => patterns.push(pattern),
                Value::Array(items) => patterns.extend(items.into_iter().filter_map(|item| item.as_str().map(str::to_string))),
                Value::Null => {}
                other => return Err(missing(format!("glob evaluated to {other}, expected a string or a list of strings"))),
            }
        }

        let matches = glob_matches(outdir, &patterns).map_err(missing)?;
        debug!(output = %output.id, patterns = patterns.len(), matches = matches.len(), "globbed output");

        let mut values = Vec::with_capacity(matches.len());
        for path in &matches {
            let mut value = if path.is_dir() { describe_directory(path, outdir)? } else { describe_file(path, outdir)? };
            if binding.load_contents && is_file(&value) {
                let contents = read_contents(path)?;
                if let Value::Object(object) = &mut value {
                    object.insert("contents".into(), Value::String(contents));
                }
            }
            values.push(value);
        }

        let mut value = match &binding.output_eval {
            Some(output_eval) => {
                let files = Value::Array(values);
                let eval_context = expression_context.with_self(&files);
                let mut value = evaluate_field(self.evaluator, &StringOrExpression::parse(output_eval.clone()), &eval_context, context.capabilities)
                    .map_err(|source| EngineError::expression(format!("outputEval of output '{}'", output.id), source))?;
                normalize_value(&mut value);
                value
            }
            None if is_array_type(&output.param_type) => Value::Array(values),
            None => match values.len() {
                0 if output.is_optional() => Value::Null,
                0 => return Err(missing(format!("no file matches {}", patterns.join(", ")))),
                1 => values.remove(0),
                count => {
                    return Err(missing(format!(
                        "{count} files match {} but the output type {} is not an array",
                        patterns.join(", "),
                        output.param_type.display_name()
                    )));
                }
            },
        };

        if !output.secondary_files.is_empty() {
            self.attach_secondary_files(&mut value, &output.secondary_files, &output.id, outdir, context)?;
        }
        Ok(value)
    }

    fn attach_secondary_files(
        &self,
        value: &mut Value,
        rules: &[SecondaryFileRule],
        output_id: &str,
        outdir: &Path,
        context: &OutputContext<'_>,
    ) -> EngineResult<()> {
        if let Value::Array(items) = value {
            return items
                .iter_mut()
                .try_for_each(|item| self.attach_secondary_files(item, rules, output_id, outdir, context));
        }
        if !is_file(value) {
            return Ok(());
        }
        let Some(primary) = path_of(value).map(PathBuf::from) else {
            return Ok(());
        };
        let directory = primary.parent().map(Path::to_path_buf).unwrap_or_else(|| outdir.to_path_buf());
        let basename = primary.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();

        let mut secondary = Vec::new();
        for rule in rules {
            let candidates: Vec<(PathBuf, bool)> = match rule {
                SecondaryFileRule::Pattern { pattern, .. } => {
                    let (pattern, optional_marker) = match pattern.strip_suffix('?') {
                        Some(pattern) => (pattern, true),
                        None => (pattern.as_str(), false),
                    };
                    let required = !optional_marker && rule.required().unwrap_or(true);
                    vec![(directory.join(secondary_name(&basename, pattern)), required)]
                }
                SecondaryFileRule::Expression { expression, .. } => {
                    let expression_context = ExpressionContext::new(context.inputs, context.runtime).with_self(&*value);
                    let evaluated = self
                        .evaluator
                        .evaluate(expression, &expression_context, context.capabilities)
                        .map_err(|source| EngineError::expression(format!("secondaryFiles of output '{output_id}'"), source))?;
                    expression_candidates(&evaluated, &directory, rule.required().unwrap_or(true))
                }
            };

            for (path, required) in candidates {
                if path.exists() {
                    let described = if path.is_dir() { describe_directory(&path, outdir)? } else { describe_file(&path, outdir)? };
                    secondary.push(described);
                } else if required {
                    return Err(EngineError::MissingOutput {
                        output: output_id.to_string(),
                        message: format!("required secondary file '{}' does not exist", path.display()),
                    });
                } else {
                    debug!(output = %output_id, path = %path.display(), "optional secondary file is absent");
                }
            }
        }

        if let Value::Object(object) = value {
            object.insert("secondaryFiles".into(), Value::Array(secondary));
        }
        Ok(())
    }
}

/// Paths named by an evaluated secondary-file expression.
fn expression_candidates(value: &Value, directory: &Path, required: bool) -> Vec<(PathBuf, bool)> {
    match value {
        Value::Null => Vec::new(),
        Value::String(name) => match name.strip_suffix('?') {
            Some(name) => vec![(directory.join(name), false)],
            None => vec![(directory.join(name), required)],
        },
        Value::Array(items) => items.iter().flat_map(|item| expression_candidates(item, directory, required)).collect(),
        Value::Object(_) if is_file(value) || is_directory(value) => {
            path_of(value).map(|path| vec![(directory.join(path), required)]).unwrap_or_default()
        }
        _ => Vec::new(),
    }
}

/// Applies a secondary-file pattern: each leading `^` strips one extension first.
pub fn secondary_name(basename: &str, pattern: &str) -> String {
    let mut base = basename;
    let mut suffix = pattern;
    while let Some(rest) = suffix.strip_prefix('^') {
        base = split_basename(base).0;
        suffix = rest;
    }
    format!("{base}{suffix}")
}

/// Sorted, de-duplicated matches of every pattern under `outdir`.
fn glob_matches(outdir: &Path, patterns: &[String]) -> Result<Vec<PathBuf>, String> {
    // Working directories of scatter instances contain brackets.
    let root = Pattern::escape(&outdir.display().to_string());
    let mut matches = Vec::new();
    for pattern in patterns {
        let full = if Path::new(pattern).is_absolute() { pattern.clone() } else { format!("{root}/{pattern}") };
        let paths = glob::glob(&full).map_err(|error| format!("invalid glob pattern '{pattern}': {error}"))?;
        for path in paths {
            let path = path.map_err(|error| format!("cannot read '{}': {}", error.path().display(), error.error()))?;
            matches.push(path);
        }
    }
    matches.sort();
    matches.dedup();
    Ok(matches)
}

fn is_array_type(param_type: &TypeUnion) -> bool {
    param_type.alternatives().iter().any(|alternative| match alternative {
        ParameterType::Array(_) => true,
        ParameterType::Scalar(name) | ParameterType::Reference(name) => LiteralShape::parse(name).array,
        ParameterType::Record(_) | ParameterType::Enum(_) => false,
    })
}

fn absolute(path: &Path) -> EngineResult<PathBuf> {
    std::path::absolute(path).map_err(|source| EngineError::io(path, source))
}

/// `location` relative to the output directory, `/`-separated.
fn relative_location(path: &Path, outdir: &Path) -> String {
    match path.strip_prefix(outdir) {
        Ok(relative) => relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => path.display().to_string(),
    }
}

fn naming_fields(object: &mut Map<String, Value>, path: &Path, outdir: &Path) {
    let basename = path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();
    object.insert("location".into(), Value::String(relative_location(path, outdir)));
    object.insert("path".into(), Value::String(path.display().to_string()));
    object.insert("basename".into(), Value::String(basename));
    object.insert(
        "dirname".into(),
        Value::String(path.parent().map(|parent| parent.display().to_string()).unwrap_or_default()),
    );
}

/// File value for an existing file: naming fields, size and checksum.
pub fn describe_file(path: &Path, outdir: &Path) -> EngineResult<Value> {
    let metadata = fs::metadata(path).map_err(|source| EngineError::io(path, source))?;
    let mut object = Map::new();
    object.insert("class".into(), Value::String(FILE_CLASS.to_string()));
    naming_fields(&mut object, path, outdir);
    let basename = object.get("basename").and_then(Value::as_str).unwrap_or_default().to_string();
    let (nameroot, nameext) = split_basename(&basename);
    object.insert("nameroot".into(), Value::String(nameroot.to_string()));
    object.insert("nameext".into(), Value::String(nameext.to_string()));
    object.insert("size".into(), Value::from(metadata.len()));
    object.insert("checksum".into(), Value::String(checksum(path)?));
    Ok(Value::Object(object))
}

/// Directory value with a one-level listing, sorted by name.
pub fn describe_directory(path: &Path, outdir: &Path) -> EngineResult<Value> {
    let mut entries: Vec<PathBuf> = fs::read_dir(path)
        .map_err(|source| EngineError::io(path, source))?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<io::Result<_>>()
        .map_err(|source| EngineError::io(path, source))?;
    entries.sort();

    let mut listing = Vec::with_capacity(entries.len());
    for entry in &entries {
        if entry.is_dir() {
            let mut object = Map::new();
            object.insert("class".into(), Value::String(DIRECTORY_CLASS.to_string()));
            naming_fields(&mut object, entry, outdir);
            listing.push(Value::Object(object));
        } else {
            listing.push(describe_file(entry, outdir)?);
        }
    }

    let mut object = Map::new();
    object.insert("class".into(), Value::String(DIRECTORY_CLASS.to_string()));
    naming_fields(&mut object, path, outdir);
    object.insert("listing".into(), Value::Array(listing));
    Ok(Value::Object(object))
}

/// `sha1$<hex>` of the file's bytes.
pub fn checksum(path: &Path) -> EngineResult<String> {
    let mut file = File::open(path).map_err(|source| EngineError::io(path, source))?;
    let mut hasher = Sha1::new();
    io::copy(&mut file, &mut hasher).map_err(|source| EngineError::io(path, source))?;
    Ok(format!("sha1${:x}", hasher.finalize()))
}

/// First [`CONTENTS_LIMIT`] bytes of a file, decoded lossily.
pub(crate) fn read_contents(path: &Path) -> EngineResult<String> {
    let file = File::open(path).map_err(|source| EngineError::io(path, source))?;
    let mut buffer = Vec::new();
    file.take(CONTENTS_LIMIT as u64)
        .read_to_end(&mut buffer)
        .map_err(|source| EngineError::io(path, source))?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

fn read_output_object(path: &Path) -> EngineResult<Map<String, Value>> {
    let text = fs::read_to_string(path).map_err(|source| EngineError::io(path, source))?;
    let value: Value = serde_json::from_str(&text).map_err(|error| EngineError::MissingOutput {
        output: OUTPUT_OBJECT_FILE.to_string(),
        message: format!("not valid JSON: {error}"),
    })?;
    match value {
        Value::Object(object) => Ok(object),
        other => Err(EngineError::MissingOutput {
            output: OUTPUT_OBJECT_FILE.to_string(),
            message: format!("expected an object, found {other}"),
        }),
    }
}
