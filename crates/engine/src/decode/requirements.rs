//! Requirement and hint lists.

use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Map, Value};
use tracing::debug;
use weft_types::{
    Dirent, DockerRequirement, EnvVarRequirement, EnvironmentDef, InitialWorkDirRequirement, InlineJavascriptRequirement, Requirement,
    ResourceAmount, ResourceRequirement, SchemaDefRequirement, SoftwarePackage, SoftwareRequirement, StringOrExpression, WorkDirEntry,
    contains_expression,
};

use super::types::decode_type;
use super::{collection_entries, kind_of, optional_bool, optional_string, string_list};

/// Decodes a list of `{class: ...}` maps or a map keyed by class.
pub(crate) fn decode_requirements(value: Option<&Value>) -> Result<Vec<Requirement>> {
    let entries = collection_entries(value, "class", "class")?;
    let mut requirements = Vec::with_capacity(entries.len());
    for (index, (class, body)) in entries.into_iter().enumerate() {
        let class = class.ok_or_else(|| anyhow!("requirement {index} is missing 'class'"))?;
        let requirement = decode_requirement(&class, &body).with_context(|| format!("while decoding requirement '{class}'"))?;
        requirements.push(requirement);
    }
    Ok(requirements)
}

fn decode_requirement(class: &str, body: &Map<String, Value>) -> Result<Requirement> {
    let requirement = match class {
        "InlineJavascriptRequirement" => Requirement::InlineJavascript(InlineJavascriptRequirement {
            expression_lib: string_list(body.get("expressionLib")).context("while decoding 'expressionLib'")?,
        }),
        "SchemaDefRequirement" => {
            let types = match body.get("types") {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(items)) => items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| decode_type(item).with_context(|| format!("while decoding schema type {index}")))
                    .collect::<Result<_>>()?,
                Some(other) => bail!("'types' must be a list, found {}", kind_of(other)),
            };
            Requirement::SchemaDef(SchemaDefRequirement { types })
        }
        "DockerRequirement" => Requirement::Docker(DockerRequirement {
            docker_pull: optional_string(body, "dockerPull")?,
            docker_load: optional_string(body, "dockerLoad")?,
            docker_file: optional_string(body, "dockerFile")?,
            docker_import: optional_string(body, "dockerImport")?,
            docker_image_id: optional_string(body, "dockerImageId")?,
            docker_output_directory: optional_string(body, "dockerOutputDirectory")?,
        }),
        "SoftwareRequirement" => Requirement::Software(SoftwareRequirement {
            packages: decode_packages(body.get("packages")).context("while decoding 'packages'")?,
        }),
        "InitialWorkDirRequirement" => Requirement::InitialWorkDir(InitialWorkDirRequirement {
            listing: decode_listing(body.get("listing")).context("while decoding 'listing'")?,
        }),
        "EnvVarRequirement" => Requirement::EnvVar(EnvVarRequirement {
            env_def: decode_env_defs(body.get("envDef")).context("while decoding 'envDef'")?,
        }),
        "ShellCommandRequirement" => Requirement::ShellCommand,
        "ResourceRequirement" => Requirement::Resource(ResourceRequirement {
            cores_min: resource_amount(body, "coresMin")?,
            cores_max: resource_amount(body, "coresMax")?,
            ram_min: resource_amount(body, "ramMin")?,
            ram_max: resource_amount(body, "ramMax")?,
            tmpdir_min: resource_amount(body, "tmpdirMin")?,
            tmpdir_max: resource_amount(body, "tmpdirMax")?,
            outdir_min: resource_amount(body, "outdirMin")?,
            outdir_max: resource_amount(body, "outdirMax")?,
        }),
        "ScatterFeatureRequirement" => Requirement::ScatterFeature,
        "MultipleInputFeatureRequirement" => Requirement::MultipleInputFeature,
        "SubworkflowFeatureRequirement" => Requirement::SubworkflowFeature,
        "StepInputExpressionRequirement" => Requirement::StepInputExpression,
        other => {
            debug!(class = other, "keeping unrecognized requirement as an extension");
            let mut fields = body.clone();
            fields.remove("class");
            Requirement::Extension {
                class: other.to_string(),
                fields,
            }
        }
    };
    Ok(requirement)
}

fn decode_packages(value: Option<&Value>) -> Result<Vec<SoftwarePackage>> {
    let entries = collection_entries(value, "package", "version")?;
    entries
        .into_iter()
        .enumerate()
        .map(|(index, (package, body))| {
            let package = package.ok_or_else(|| anyhow!("package {index} is missing 'package'"))?;
            Ok(SoftwarePackage {
                version: string_list(body.get("version")).with_context(|| format!("while decoding versions of '{package}'"))?,
                specs: string_list(body.get("specs")).with_context(|| format!("while decoding specs of '{package}'"))?,
                package,
            })
        })
        .collect()
}

fn decode_listing(value: Option<&Value>) -> Result<Vec<WorkDirEntry>> {
    let items: Vec<&Value> = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items.iter().collect(),
        // A single expression producing the whole listing.
        Some(single @ Value::String(_)) => vec![single],
        Some(other) => bail!("expected a list or an expression, found {}", kind_of(other)),
    };
    let mut listing = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        listing.push(decode_listing_entry(item).with_context(|| format!("while decoding listing entry {index}"))?);
    }
    Ok(listing)
}

fn decode_listing_entry(item: &Value) -> Result<WorkDirEntry> {
    match item {
        Value::String(expression) => Ok(WorkDirEntry::Expression(expression.clone())),
        Value::Object(entry) if entry.contains_key("entry") => {
            let content = match entry.get("entry") {
                Some(Value::String(text)) => StringOrExpression::parse(text.clone()),
                // Non-string entries are staged as their JSON text.
                Some(other) => StringOrExpression::Literal(serde_json::to_string_pretty(other)?),
                None => bail!("dirent is missing 'entry'"),
            };
            Ok(WorkDirEntry::Dirent(Dirent {
                entryname: optional_string(entry, "entryname")?.map(StringOrExpression::parse),
                entry: content,
                writable: optional_bool(entry, "writable")?.unwrap_or(false),
            }))
        }
        Value::Object(entry) if entry.get("class").and_then(Value::as_str).is_some_and(|class| class == "File" || class == "Directory") => {
            Ok(WorkDirEntry::Literal(item.clone()))
        }
        other => bail!("expected an expression, a dirent or a File/Directory literal, found {}", kind_of(other)),
    }
}

/// `envDef` as a list of `{envName, envValue}` or a map from name to value.
fn decode_env_defs(value: Option<&Value>) -> Result<Vec<EnvironmentDef>> {
    let entries = collection_entries(value, "envName", "envValue")?;
    entries
        .into_iter()
        .enumerate()
        .map(|(index, (name, body))| {
            let name = name.ok_or_else(|| anyhow!("environment definition {index} is missing 'envName'"))?;
            let value = optional_string(&body, "envValue")?.ok_or_else(|| anyhow!("environment variable '{name}' is missing 'envValue'"))?;
            Ok(EnvironmentDef {
                name,
                value: StringOrExpression::parse(value),
            })
        })
        .collect()
}

fn resource_amount(body: &Map<String, Value>, key: &str) -> Result<Option<ResourceAmount>> {
    match body.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number
            .as_f64()
            .map(|amount| Some(ResourceAmount::Number(amount)))
            .ok_or_else(|| anyhow!("'{key}' is not a finite number")),
        Some(Value::String(text)) if contains_expression(text) => Ok(Some(ResourceAmount::Expression(text.clone()))),
        Some(Value::String(text)) => text
            .trim()
            .parse::<f64>()
            .map(|amount| Some(ResourceAmount::Number(amount)))
            .map_err(|_| anyhow!("'{key}' must be a number or an expression, found '{text}'")),
        Some(other) => bail!("'{key}' must be a number or an expression, found {}", kind_of(other)),
    }
}
