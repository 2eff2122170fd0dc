//! Requirement and hint variants.
//!
//! Every requirement class is its own variant carrying only its own fields, so a
//! container requirement can never hold environment definitions and vice versa. Classes
//! outside the fixed vocabulary survive decoding as [`Requirement::Extension`].

use serde::Serialize;
use serde_json::{Map, Value};

use crate::binding::StringOrExpression;
use crate::schema::ParameterType;

mod merge;

pub use merge::{RequirementScope, merge_requirements};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "class")]
pub enum Requirement {
    #[serde(rename = "InlineJavascriptRequirement")]
    InlineJavascript(InlineJavascriptRequirement),
    #[serde(rename = "SchemaDefRequirement")]
    SchemaDef(SchemaDefRequirement),
    #[serde(rename = "DockerRequirement")]
    Docker(DockerRequirement),
    #[serde(rename = "SoftwareRequirement")]
    Software(SoftwareRequirement),
    #[serde(rename = "InitialWorkDirRequirement")]
    InitialWorkDir(InitialWorkDirRequirement),
    #[serde(rename = "EnvVarRequirement")]
    EnvVar(EnvVarRequirement),
    #[serde(rename = "ShellCommandRequirement")]
    ShellCommand,
    #[serde(rename = "ResourceRequirement")]
    Resource(ResourceRequirement),
    #[serde(rename = "ScatterFeatureRequirement")]
    ScatterFeature,
    #[serde(rename = "MultipleInputFeatureRequirement")]
    MultipleInputFeature,
    #[serde(rename = "SubworkflowFeatureRequirement")]
    SubworkflowFeature,
    #[serde(rename = "StepInputExpressionRequirement")]
    StepInputExpression,
    /// Unrecognized class with its fields kept opaque.
    #[serde(untagged)]
    Extension { class: String, fields: Map<String, Value> },
}

impl Requirement {
    pub fn class(&self) -> &str {
        match self {
            Self::InlineJavascript(_) => "InlineJavascriptRequirement",
            Self::SchemaDef(_) => "SchemaDefRequirement",
            Self::Docker(_) => "DockerRequirement",
            Self::Software(_) => "SoftwareRequirement",
            Self::InitialWorkDir(_) => "InitialWorkDirRequirement",
            Self::EnvVar(_) => "EnvVarRequirement",
            Self::ShellCommand => "ShellCommandRequirement",
            Self::Resource(_) => "ResourceRequirement",
            Self::ScatterFeature => "ScatterFeatureRequirement",
            Self::MultipleInputFeature => "MultipleInputFeatureRequirement",
            Self::SubworkflowFeature => "SubworkflowFeatureRequirement",
            Self::StepInputExpression => "StepInputExpressionRequirement",
            Self::Extension { class, .. } => class,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct InlineJavascriptRequirement {
    /// Library sources made available to every expression.
    pub expression_lib: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct SchemaDefRequirement {
    /// Named record/enum/array definitions.
    pub types: Vec<ParameterType>,
}

impl SchemaDefRequirement {
    /// Finds a named type; `#Sample`, `Sample` and `file.yml#Sample` all match `Sample`.
    pub fn lookup(&self, reference: &str) -> Option<&ParameterType> {
        let wanted = short_name(reference);
        self.types
            .iter()
            .find(|declared| declared.schema_name().is_some_and(|name| short_name(name) == wanted))
    }
}

fn short_name(name: &str) -> &str {
    let after_hash = name.rsplit('#').next().unwrap_or(name);
    after_hash.rsplit('/').next().unwrap_or(after_hash)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct DockerRequirement {
    pub docker_pull: Option<String>,
    pub docker_load: Option<String>,
    pub docker_file: Option<String>,
    pub docker_import: Option<String>,
    pub docker_image_id: Option<String>,
    pub docker_output_directory: Option<String>,
}

impl DockerRequirement {
    /// Image reference a runner would use, preferring an explicit image id.
    pub fn image(&self) -> Option<&str> {
        self.docker_image_id.as_deref().or(self.docker_pull.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct SoftwareRequirement {
    pub packages: Vec<SoftwarePackage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SoftwarePackage {
    pub package: String,
    pub version: Vec<String>,
    pub specs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct InitialWorkDirRequirement {
    pub listing: Vec<WorkDirEntry>,
}

/// One entry of an initial working directory listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkDirEntry {
    /// Named entry whose content is a literal or an expression.
    Dirent(Dirent),
    /// Expression evaluating to a File, Directory, Dirent or a list of them.
    Expression(String),
    /// File or Directory literal written directly in the listing.
    Literal(Value),
}

impl WorkDirEntry {
    /// Key used when unioning listings across scopes.
    pub fn key(&self) -> String {
        match self {
            Self::Dirent(dirent) => match &dirent.entryname {
                Some(name) => name.as_str().to_string(),
                None => dirent.entry.as_str().to_string(),
            },
            Self::Expression(expression) => expression.clone(),
            Self::Literal(value) => value
                .get("basename")
                .or_else(|| value.get("location"))
                .or_else(|| value.get("path"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dirent {
    pub entryname: Option<StringOrExpression>,
    pub entry: StringOrExpression,
    pub writable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct EnvVarRequirement {
    pub env_def: Vec<EnvironmentDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentDef {
    pub name: String,
    pub value: StringOrExpression,
}

/// Resource minimums/maximums; each may be a number or an expression.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct ResourceRequirement {
    pub cores_min: Option<ResourceAmount>,
    pub cores_max: Option<ResourceAmount>,
    pub ram_min: Option<ResourceAmount>,
    pub ram_max: Option<ResourceAmount>,
    pub tmpdir_min: Option<ResourceAmount>,
    pub tmpdir_max: Option<ResourceAmount>,
    pub outdir_min: Option<ResourceAmount>,
    pub outdir_max: Option<ResourceAmount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResourceAmount {
    Number(f64),
    Expression(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EnumSchema;

    #[test]
    fn schema_lookup_ignores_document_prefixes() {
        let schema = SchemaDefRequirement {
            types: vec![ParameterType::Enum(EnumSchema {
                name: Some("#Strategy".into()),
                symbols: vec!["fast".into(), "slow".into()],
                input_binding: None,
            })],
        };
        assert!(schema.lookup("Strategy").is_some());
        assert!(schema.lookup("#Strategy").is_some());
        assert!(schema.lookup("types.yml#Strategy").is_some());
        assert!(schema.lookup("Other").is_none());
    }

    #[test]
    fn docker_image_prefers_image_id() {
        let docker = DockerRequirement {
            docker_pull: Some("debian:stable".into()),
            docker_image_id: Some("local/tool".into()),
            ..Default::default()
        };
        assert_eq!(docker.image(), Some("local/tool"));
    }

    #[test]
    fn dirent_key_prefers_entryname() {
        let entry = WorkDirEntry::Dirent(Dirent {
            entryname: Some(StringOrExpression::parse("config.txt")),
            entry: StringOrExpression::parse("content"),
            writable: false,
        });
        assert_eq!(entry.key(), "config.txt");
    }
}
