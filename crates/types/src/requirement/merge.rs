//! Requirement inheritance.
//!
//! A child scope (a step, or the document a step runs) inherits from its parent without
//! ever losing a field it declared itself. List-valued fields union by key with the
//! child's entries first.

use serde::Serialize;

use super::{
    DockerRequirement, EnvVarRequirement, InitialWorkDirRequirement, InlineJavascriptRequirement, Requirement, ResourceRequirement,
    SchemaDefRequirement, SoftwareRequirement,
};

/// Merges `parent` into `child`.
///
/// Classes declared by both are merged field by field with the child winning; classes
/// only the parent declares are appended wholesale, after the child's own classes.
pub fn merge_requirements(child: &[Requirement], parent: &[Requirement]) -> Vec<Requirement> {
    let mut merged: Vec<Requirement> = child
        .iter()
        .map(|declared| match parent.iter().find(|inherited| inherited.class() == declared.class()) {
            Some(inherited) => declared.merged_with(inherited),
            None => declared.clone(),
        })
        .collect();

    for inherited in parent {
        if !merged.iter().any(|existing| existing.class() == inherited.class()) {
            merged.push(inherited.clone());
        }
    }

    merged
}

impl Requirement {
    /// Fills the gaps of `self` from `parent`, which must be the same class.
    fn merged_with(&self, parent: &Requirement) -> Requirement {
        match (self, parent) {
            (Self::InlineJavascript(child), Self::InlineJavascript(parent)) => Self::InlineJavascript(InlineJavascriptRequirement {
                expression_lib: union_by_key(&child.expression_lib, &parent.expression_lib, |library| library.clone()),
            }),
            (Self::SchemaDef(child), Self::SchemaDef(parent)) => Self::SchemaDef(SchemaDefRequirement {
                types: union_by_key(&child.types, &parent.types, |declared| declared.schema_name().map(str::to_string)),
            }),
            (Self::Docker(child), Self::Docker(parent)) => Self::Docker(DockerRequirement {
                docker_pull: child.docker_pull.clone().or_else(|| parent.docker_pull.clone()),
                docker_load: child.docker_load.clone().or_else(|| parent.docker_load.clone()),
                docker_file: child.docker_file.clone().or_else(|| parent.docker_file.clone()),
                docker_import: child.docker_import.clone().or_else(|| parent.docker_import.clone()),
                docker_image_id: child.docker_image_id.clone().or_else(|| parent.docker_image_id.clone()),
                docker_output_directory: child
                    .docker_output_directory
                    .clone()
                    .or_else(|| parent.docker_output_directory.clone()),
            }),
            (Self::Software(child), Self::Software(parent)) => Self::Software(SoftwareRequirement {
                packages: union_by_key(&child.packages, &parent.packages, |package| package.package.clone()),
            }),
            (Self::InitialWorkDir(child), Self::InitialWorkDir(parent)) => Self::InitialWorkDir(InitialWorkDirRequirement {
                listing: union_by_key(&child.listing, &parent.listing, |entry| entry.key()),
            }),
            (Self::EnvVar(child), Self::EnvVar(parent)) => Self::EnvVar(EnvVarRequirement {
                env_def: union_by_key(&child.env_def, &parent.env_def, |definition| definition.name.clone()),
            }),
            (Self::Resource(child), Self::Resource(parent)) => Self::Resource(ResourceRequirement {
                cores_min: child.cores_min.clone().or_else(|| parent.cores_min.clone()),
                cores_max: child.cores_max.clone().or_else(|| parent.cores_max.clone()),
                ram_min: child.ram_min.clone().or_else(|| parent.ram_min.clone()),
                ram_max: child.ram_max.clone().or_else(|| parent.ram_max.clone()),
                tmpdir_min: child.tmpdir_min.clone().or_else(|| parent.tmpdir_min.clone()),
                tmpdir_max: child.tmpdir_max.clone().or_else(|| parent.tmpdir_max.clone()),
                outdir_min: child.outdir_min.clone().or_else(|| parent.outdir_min.clone()),
                outdir_max: child.outdir_max.clone().or_else(|| parent.outdir_max.clone()),
            }),
            (
                Self::Extension { class, fields },
                Self::Extension {
                    fields: parent_fields, ..
                },
            ) => {
                let mut merged_fields = fields.clone();
                for (key, value) in parent_fields {
                    if !merged_fields.contains_key(key) {
                        merged_fields.insert(key.clone(), value.clone());
                    }
                }
                Self::Extension {
                    class: class.clone(),
                    fields: merged_fields,
                }
            }
            _ => self.clone(),
        }
    }
}

/// Child entries in order, then parent entries whose key the child does not use.
fn union_by_key<T, K, F>(child: &[T], parent: &[T], key: F) -> Vec<T>
where
    T: Clone,
    K: PartialEq,
    F: Fn(&T) -> K,
{
    let child_keys: Vec<K> = child.iter().map(&key).collect();
    let mut merged = child.to_vec();
    for entry in parent {
        let entry_key = key(entry);
        if !child_keys.contains(&entry_key) {
            merged.push(entry.clone());
        }
    }
    merged
}

/// Requirements and hints effective at one point of the document tree.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct RequirementScope {
    pub requirements: Vec<Requirement>,
    pub hints: Vec<Requirement>,
}

impl RequirementScope {
    pub fn new(requirements: Vec<Requirement>, hints: Vec<Requirement>) -> Self {
        Self { requirements, hints }
    }

    /// Child scope inheriting from `parent`; requirements and hints merge separately.
    pub fn inherit(&self, parent: &RequirementScope) -> RequirementScope {
        RequirementScope {
            requirements: merge_requirements(&self.requirements, &parent.requirements),
            hints: merge_requirements(&self.hints, &parent.hints),
        }
    }

    /// First declaration of `class`, requirements taking precedence over hints.
    pub fn find(&self, class: &str) -> Option<&Requirement> {
        self.requirements
            .iter()
            .chain(self.hints.iter())
            .find(|requirement| requirement.class() == class)
    }

    pub fn inline_javascript(&self) -> Option<&InlineJavascriptRequirement> {
        match self.find("InlineJavascriptRequirement")? {
            Requirement::InlineJavascript(requirement) => Some(requirement),
            _ => None,
        }
    }

    pub fn schema_def(&self) -> Option<&SchemaDefRequirement> {
        match self.find("SchemaDefRequirement")? {
            Requirement::SchemaDef(requirement) => Some(requirement),
            _ => None,
        }
    }

    pub fn docker(&self) -> Option<&DockerRequirement> {
        match self.find("DockerRequirement")? {
            Requirement::Docker(requirement) => Some(requirement),
            _ => None,
        }
    }

    pub fn initial_work_dir(&self) -> Option<&InitialWorkDirRequirement> {
        match self.find("InitialWorkDirRequirement")? {
            Requirement::InitialWorkDir(requirement) => Some(requirement),
            _ => None,
        }
    }

    pub fn env_var(&self) -> Option<&EnvVarRequirement> {
        match self.find("EnvVarRequirement")? {
            Requirement::EnvVar(requirement) => Some(requirement),
            _ => None,
        }
    }

    pub fn resource(&self) -> Option<&ResourceRequirement> {
        match self.find("ResourceRequirement")? {
            Requirement::Resource(requirement) => Some(requirement),
            _ => None,
        }
    }

    pub fn shell_command(&self) -> bool {
        self.find("ShellCommandRequirement").is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::StringOrExpression;
    use crate::requirement::EnvironmentDef;

    fn env(pairs: &[(&str, &str)]) -> Requirement {
        Requirement::EnvVar(EnvVarRequirement {
            env_def: pairs
                .iter()
                .map(|(name, value)| EnvironmentDef {
                    name: name.to_string(),
                    value: StringOrExpression::parse(*value),
                })
                .collect(),
        })
    }

    fn docker(pull: &str) -> Requirement {
        Requirement::Docker(DockerRequirement {
            docker_pull: Some(pull.to_string()),
            ..Default::default()
        })
    }

    #[test]
    fn empty_parent_leaves_child_unchanged() {
        let child = vec![env(&[("A", "1")]), docker("alpine"), Requirement::ShellCommand];
        assert_eq!(merge_requirements(&child, &[]), child);
    }

    #[test]
    fn self_merge_is_a_no_op() {
        let scope = vec![env(&[("A", "1"), ("B", "2")]), docker("alpine")];
        assert_eq!(merge_requirements(&scope, &scope), scope);
    }

    #[test]
    fn env_defs_union_with_child_winning() {
        let child = vec![env(&[("A", "child")])];
        let parent = vec![env(&[("A", "parent"), ("B", "parent")])];
        let merged = merge_requirements(&child, &parent);
        assert_eq!(merged, vec![env(&[("A", "child"), ("B", "parent")])]);
    }

    #[test]
    fn parent_only_class_is_inherited_wholesale() {
        let merged = merge_requirements(&[Requirement::ShellCommand], &[docker("debian")]);
        assert_eq!(merged, vec![Requirement::ShellCommand, docker("debian")]);
    }

    #[test]
    fn child_container_fields_are_never_overridden() {
        let child = vec![docker("child/image")];
        let parent = vec![Requirement::Docker(DockerRequirement {
            docker_pull: Some("parent/image".into()),
            docker_output_directory: Some("/out".into()),
            ..Default::default()
        })];
        let merged = merge_requirements(&child, &parent);
        let Requirement::Docker(docker) = &merged[0] else {
            panic!("expected docker requirement");
        };
        assert_eq!(docker.docker_pull.as_deref(), Some("child/image"));
        assert_eq!(docker.docker_output_directory.as_deref(), Some("/out"));
    }

    #[test]
    fn scope_lookup_prefers_requirements_over_hints() {
        let scope = RequirementScope::new(vec![docker("required")], vec![docker("hinted")]);
        assert_eq!(scope.docker().and_then(DockerRequirement::image), Some("required"));
    }

    #[test]
    fn scope_inherit_merges_hints_separately() {
        let child = RequirementScope::new(Vec::new(), vec![env(&[("A", "1")])]);
        let parent = RequirementScope::new(vec![Requirement::ShellCommand], vec![docker("alpine")]);
        let merged = child.inherit(&parent);
        assert!(merged.shell_command());
        assert_eq!(merged.hints.len(), 2);
    }
}
