//! # Document Decoder
//!
//! Walks a generic parsed tree (ordered maps, lists and scalars) and materializes the
//! typed document model. Helpers work on `anyhow::Result` and attach the path of keys
//! they were decoding through `.context(..)`; [`decode_document`] converts the chain into
//! one [`DecodeError`] at the boundary.
//!
//! Collections accept both the list form (order preserved) and the map form keyed by id,
//! which is normalized to id-lexicographic order. Unknown keys are ignored.

mod params;
mod requirements;
mod steps;
mod types;

use anyhow::{Context, Result, anyhow, bail};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::debug;
use weft_types::{Argument, CommandLineBinding, Document, DocumentClass, DocumentRoot, StringOrExpression, contains_expression};

use crate::error::DecodeError;

pub(crate) use types::decode_binding;

/// Decodes one parsed document into its roots.
///
/// `name` labels the document in the error message when decoding fails.
pub fn decode_document(tree: &Value, name: Option<&str>) -> Result<Document, DecodeError> {
    decode_tree(tree).map_err(|source| DecodeError::new(name.map(str::to_string), source))
}

fn decode_tree(tree: &Value) -> Result<Document> {
    reject_directives(tree, "$")?;
    let object = tree.as_object().ok_or_else(|| anyhow!("document must be a map, found {}", kind_of(tree)))?;

    let cwl_version = optional_string(object, "cwlVersion")?;
    let namespaces = decode_namespaces(object)?;
    let schemas = string_list(object.get("$schemas")).context("while decoding '$schemas'")?;

    let Some(graph) = object.get("$graph") else {
        let scope = IdScope::for_root(optional_string(object, "id")?.as_deref());
        let root = decode_root(object, &scope).context("while decoding the document root")?;
        debug!(class = root.class.as_str(), root_id = %root.display_id(), "decoded document");
        return Ok(Document::single(root));
    };

    let entries = graph.as_array().ok_or_else(|| anyhow!("'$graph' must be a list, found {}", kind_of(graph)))?;
    let mut roots = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let entry_map = entry
            .as_object()
            .ok_or_else(|| anyhow!("'$graph' entry {index} must be a map, found {}", kind_of(entry)))?;
        let raw_id = optional_string(entry_map, "id")?;
        let scope = IdScope::for_root(raw_id.as_deref());
        let mut root = decode_root(entry_map, &scope).with_context(|| format!("while decoding '$graph' entry {index}"))?;
        if root.cwl_version.is_none() {
            root.cwl_version = cwl_version.clone();
        }
        roots.push(root);
    }
    debug!(roots = roots.len(), "decoded multi-definition document");

    Ok(Document {
        cwl_version,
        namespaces,
        schemas,
        roots,
        graph: true,
    })
}

/// Identifier prefixes stripped while decoding one root of a multi-definition document.
#[derive(Debug, Clone, Default)]
pub(crate) struct IdScope {
    prefixes: Vec<String>,
}

impl IdScope {
    fn for_root(raw_id: Option<&str>) -> Self {
        let mut scope = Self::default();
        if let Some(raw_id) = raw_id {
            scope.prefixes.push(strip_hash(raw_id).to_string());
        }
        scope
    }

    /// Scope for identifiers owned by a step: `step/...` becomes relative too.
    pub(crate) fn nested(&self, owner: &str) -> Self {
        let mut prefixes = Vec::with_capacity(self.prefixes.len() + 1);
        for prefix in &self.prefixes {
            prefixes.push(format!("{prefix}/{owner}"));
        }
        prefixes.push(owner.to_string());
        prefixes.extend(self.prefixes.iter().cloned());
        Self { prefixes }
    }

    /// Strips `#`, a document prefix before `#`, and the longest matching owner prefix.
    pub(crate) fn normalize(&self, raw: &str) -> String {
        let id = strip_hash(raw);
        for prefix in &self.prefixes {
            if let Some(rest) = id.strip_prefix(prefix.as_str()).and_then(|rest| rest.strip_prefix('/'))
                && !rest.is_empty()
            {
                return rest.to_string();
            }
        }
        id.to_string()
    }
}

fn strip_hash(raw: &str) -> &str {
    match raw.rsplit_once('#') {
        Some((_, fragment)) => fragment,
        None => raw,
    }
}

pub(crate) fn decode_root(object: &Map<String, Value>, scope: &IdScope) -> Result<DocumentRoot> {
    let class_name = required_string(object, "class")?;
    let class = DocumentClass::parse(&class_name).ok_or_else(|| anyhow!("unknown document class '{class_name}'"))?;
    let mut root = DocumentRoot::new(class);

    root.id = optional_string(object, "id")?.map(|raw| strip_hash(&raw).to_string());
    root.cwl_version = optional_string(object, "cwlVersion")?;
    root.label = optional_string(object, "label")?;
    root.doc = optional_doc(object)?;
    root.namespaces = decode_namespaces(object)?;
    root.schemas = string_list(object.get("$schemas")).context("while decoding '$schemas'")?;
    root.base_command = string_list(object.get("baseCommand")).context("while decoding 'baseCommand'")?;
    root.arguments = decode_arguments(object.get("arguments")).context("while decoding 'arguments'")?;
    root.inputs = params::decode_inputs(object.get("inputs"), scope).context("while decoding 'inputs'")?;
    root.outputs = params::decode_outputs(object.get("outputs"), scope).context("while decoding 'outputs'")?;
    root.requirements = requirements::decode_requirements(object.get("requirements")).context("while decoding 'requirements'")?;
    root.hints = requirements::decode_requirements(object.get("hints")).context("while decoding 'hints'")?;
    root.steps = steps::decode_steps(object.get("steps"), scope).context("while decoding 'steps'")?;
    root.stdin = optional_string(object, "stdin")?.map(StringOrExpression::parse);
    root.stdout = optional_string(object, "stdout")?.map(StringOrExpression::parse);
    root.stderr = optional_string(object, "stderr")?.map(StringOrExpression::parse);
    root.expression = optional_string(object, "expression")?;
    root.success_codes = int_list(object.get("successCodes")).context("while decoding 'successCodes'")?;
    root.temporary_fail_codes = int_list(object.get("temporaryFailCodes")).context("while decoding 'temporaryFailCodes'")?;
    root.permanent_fail_codes = int_list(object.get("permanentFailCodes")).context("while decoding 'permanentFailCodes'")?;

    if class == DocumentClass::Workflow && root.steps.is_empty() && object.contains_key("steps") {
        debug!(root_id = %root.display_id(), "workflow declares an empty step list");
    }
    Ok(root)
}

fn decode_arguments(value: Option<&Value>) -> Result<Vec<Argument>> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let items = value.as_array().ok_or_else(|| anyhow!("expected a list, found {}", kind_of(value)))?;
    items
        .iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::String(text) if contains_expression(text) => Ok(Argument::Binding(CommandLineBinding {
                value_from: Some(StringOrExpression::Expression(text.clone())),
                ..CommandLineBinding::default()
            })),
            Value::String(text) => Ok(Argument::Literal(text.clone())),
            Value::Number(number) => Ok(Argument::Literal(number.to_string())),
            Value::Object(binding) => decode_binding(binding)
                .map(Argument::Binding)
                .with_context(|| format!("while decoding argument {index}")),
            other => bail!("argument {index} must be a string or a binding map, found {}", kind_of(other)),
        })
        .collect()
}

fn decode_namespaces(object: &Map<String, Value>) -> Result<IndexMap<String, String>> {
    let mut namespaces = IndexMap::new();
    let Some(value) = object.get("$namespaces") else {
        return Ok(namespaces);
    };
    let entries = value.as_object().ok_or_else(|| anyhow!("'$namespaces' must be a map, found {}", kind_of(value)))?;
    for (prefix, uri) in entries {
        let uri = uri.as_str().ok_or_else(|| anyhow!("namespace '{prefix}' must map to a string"))?;
        namespaces.insert(prefix.clone(), uri.to_string());
    }
    Ok(namespaces)
}

/// Fails on `$import`/`$include` anywhere in the tree; these directives are not expanded.
fn reject_directives(value: &Value, path: &str) -> Result<()> {
    match value {
        Value::Object(object) => {
            for directive in ["$import", "$include"] {
                if object.contains_key(directive) {
                    bail!("unsupported directive '{directive}' at {path}");
                }
            }
            for (key, nested) in object {
                reject_directives(nested, &format!("{path}.{key}"))?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for (index, nested) in items.iter().enumerate() {
                reject_directives(nested, &format!("{path}[{index}]"))?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Entries of a list-or-map collection as `(id, definition)` pairs.
///
/// In the map form a scalar or list value is the shorthand for `shorthand_key`
/// (`type` for parameters, `source` for step inputs). The map form is sorted by id.
pub(crate) fn collection_entries(value: Option<&Value>, id_key: &str, shorthand_key: &str) -> Result<Vec<(Option<String>, Map<String, Value>)>> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(index, item)| match item {
                Value::Object(object) => Ok((optional_string(object, id_key)?, object.clone())),
                Value::String(id) => Ok((Some(id.clone()), Map::new())),
                other => bail!("entry {index} must be a map, found {}", kind_of(other)),
            })
            .collect(),
        Value::Object(entries) => {
            let mut sorted: Vec<(&String, &Value)> = entries.iter().collect();
            sorted.sort_by(|left, right| left.0.cmp(right.0));
            Ok(sorted
                .into_iter()
                .map(|(id, definition)| {
                    let object = match definition {
                        Value::Object(object) => object.clone(),
                        Value::Null => Map::new(),
                        shorthand => {
                            let mut object = Map::new();
                            object.insert(shorthand_key.to_string(), shorthand.clone());
                            object
                        }
                    };
                    (Some(id.clone()), object)
                })
                .collect())
        }
        other => bail!("expected a list or map, found {}", kind_of(other)),
    }
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a map",
    }
}

pub(crate) fn optional_string(object: &Map<String, Value>, key: &str) -> Result<Option<String>> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(Value::Number(number)) => Ok(Some(number.to_string())),
        Some(other) => bail!("'{key}' must be a string, found {}", kind_of(other)),
    }
}

pub(crate) fn required_string(object: &Map<String, Value>, key: &str) -> Result<String> {
    optional_string(object, key)?.ok_or_else(|| anyhow!("missing required key '{key}'"))
}

/// `doc` may be a string or a list of lines.
pub(crate) fn optional_doc(object: &Map<String, Value>) -> Result<Option<String>> {
    match object.get("doc") {
        Some(Value::Array(_)) => Ok(Some(string_list(object.get("doc"))?.join("\n"))),
        _ => optional_string(object, "doc"),
    }
}

pub(crate) fn optional_bool(object: &Map<String, Value>, key: &str) -> Result<Option<bool>> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(flag)) => Ok(Some(*flag)),
        Some(other) => bail!("'{key}' must be a boolean, found {}", kind_of(other)),
    }
}

/// A single string or a list of strings.
pub(crate) fn string_list(value: Option<&Value>) -> Result<Vec<String>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(text)) => Ok(vec![text.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(text) => Ok(text.clone()),
                Value::Number(number) => Ok(number.to_string()),
                other => bail!("expected a string, found {}", kind_of(other)),
            })
            .collect(),
        Some(other) => bail!("expected a string or a list of strings, found {}", kind_of(other)),
    }
}

fn int_list(value: Option<&Value>) -> Result<Vec<i32>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_i64()
                    .and_then(|code| i32::try_from(code).ok())
                    .ok_or_else(|| anyhow!("expected an exit code, found {item}"))
            })
            .collect(),
        Some(other) => bail!("expected a list of exit codes, found {}", kind_of(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_types::{ParameterType, RunTarget};

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).expect("valid yaml")
    }

    #[test]
    fn decodes_a_minimal_tool() {
        let document = decode_document(
            &yaml(
                r#"
cwlVersion: v1.2
class: CommandLineTool
baseCommand: cat
inputs:
  - id: file
    type: File
    inputBinding: {position: 1}
outputs: []
"#,
            ),
            None,
        )
        .expect("decodes");

        assert!(!document.graph);
        let root = &document.roots[0];
        assert_eq!(root.class, DocumentClass::CommandLineTool);
        assert_eq!(root.base_command, vec!["cat".to_string()]);
        assert_eq!(root.inputs[0].id, "file");
        assert_eq!(root.inputs[0].input_binding.as_ref().map(|binding| binding.position), Some(1));
        assert_eq!(root.cwl_version.as_deref(), Some("v1.2"));
    }

    #[test]
    fn map_form_collections_are_sorted_by_id() {
        let document = decode_document(
            &yaml(
                r#"
class: CommandLineTool
inputs:
  zeta: string
  alpha: int?
  mid:
    type: File
outputs: {}
"#,
            ),
            None,
        )
        .expect("decodes");
        let ids: Vec<&str> = document.roots[0].inputs.iter().map(|input| input.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
        assert_eq!(document.roots[0].inputs[0].param_type.first(), &ParameterType::Scalar("int?".into()));
    }

    #[test]
    fn unknown_class_is_a_decode_error() {
        let error = decode_document(&json!({"class": "Pipeline"}), Some("bad.cwl")).expect_err("fails");
        let message = error.to_string();
        assert!(message.contains("bad.cwl"));
        assert!(message.contains("unknown document class 'Pipeline'"));
    }

    #[test]
    fn wrong_shapes_are_wrapped_with_their_location() {
        let error = decode_document(&json!({"class": "CommandLineTool", "inputs": 5}), None).expect_err("fails");
        assert!(error.to_string().contains("while decoding 'inputs'"));
    }

    #[test]
    fn import_directives_are_rejected() {
        let tree = json!({"class": "CommandLineTool", "requirements": [{"$import": "reqs.yml"}]});
        let error = decode_document(&tree, None).expect_err("fails");
        assert!(error.to_string().contains("unsupported directive '$import'"));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let tree = json!({"class": "ExpressionTool", "expression": "$(inputs)", "x-vendor": {"any": 1}, "intent": ["x"]});
        let document = decode_document(&tree, None).expect("decodes");
        assert_eq!(document.roots[0].expression.as_deref(), Some("$(inputs)"));
    }

    #[test]
    fn arguments_split_into_literals_and_bindings() {
        let tree = json!({
            "class": "CommandLineTool",
            "arguments": ["-v", "$(runtime.outdir)", {"prefix": "-t", "valueFrom": "$(runtime.cores)", "position": 2}]
        });
        let root = &decode_document(&tree, None).expect("decodes").roots[0];
        assert_eq!(root.arguments[0], Argument::Literal("-v".into()));
        assert!(matches!(&root.arguments[1], Argument::Binding(binding) if binding.value_from.as_ref().is_some_and(StringOrExpression::is_expression)));
        assert_eq!(root.arguments[2].binding().map(|binding| binding.position), Some(2));
    }

    #[test]
    fn graph_documents_strip_owner_prefixes() {
        let tree = yaml(
            r##"
cwlVersion: v1.2
$namespaces: {edam: "http://edamontology.org/"}
$graph:
  - id: "#echo"
    class: CommandLineTool
    baseCommand: echo
    inputs:
      - id: "#echo/message"
        type: string
        inputBinding: {position: 1}
    outputs: []
  - id: "#main"
    class: Workflow
    inputs:
      - id: "#main/text"
        type: string
    outputs: []
    steps:
      - id: "#main/say"
        run: "#echo"
        in:
          - id: "#main/say/message"
            source: "#main/text"
        out: []
"##,
        );
        let document = decode_document(&tree, None).expect("decodes");
        assert!(document.graph);
        assert_eq!(document.namespaces.get("edam").map(String::as_str), Some("http://edamontology.org/"));
        let echo = document.root("echo").expect("echo root");
        assert_eq!(echo.inputs[0].id, "message");
        assert_eq!(echo.cwl_version.as_deref(), Some("v1.2"));

        let main = document.main_root().expect("main");
        let step = &main.steps[0];
        assert_eq!(step.id, "say");
        assert_eq!(step.inputs[0].id, "message");
        assert_eq!(step.inputs[0].source, vec!["text".to_string()]);
        assert_eq!(step.run, RunTarget::Reference("#echo".into()));
    }

    #[test]
    fn id_scope_keeps_unprefixed_ids() {
        let scope = IdScope::for_root(Some("#main"));
        assert_eq!(scope.normalize("#main/step1/out"), "step1/out");
        assert_eq!(scope.normalize("plain"), "plain");
        assert_eq!(scope.nested("step1").normalize("#main/step1/in1"), "in1");
        assert_eq!(IdScope::default().normalize("tool.cwl#reads"), "reads");
    }
}
