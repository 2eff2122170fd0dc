//! Workflow steps.

use anyhow::{Context, Result, anyhow, bail};
use serde_json::Value;
use weft_types::{DefaultValue, LinkMerge, RunTarget, ScatterMethod, StepInput, WorkflowStep};

use super::requirements::decode_requirements;
use super::{IdScope, collection_entries, decode_root, kind_of, optional_doc, optional_string, string_list};

pub(crate) fn decode_steps(value: Option<&Value>, scope: &IdScope) -> Result<Vec<WorkflowStep>> {
    let entries = collection_entries(value, "id", "run")?;
    let mut steps = Vec::with_capacity(entries.len());
    for (index, (raw_id, definition)) in entries.into_iter().enumerate() {
        let id = scope.normalize(&raw_id.ok_or_else(|| anyhow!("step {index} is missing 'id'"))?);
        let step_scope = scope.nested(&id);

        let run = match definition.get("run") {
            Some(Value::String(reference)) => RunTarget::Reference(reference.clone()),
            Some(Value::Object(inline)) => RunTarget::Inline(Box::new(
                decode_root(inline, &IdScope::default()).with_context(|| format!("while decoding the run target of step '{id}'"))?,
            )),
            Some(other) => bail!("step '{id}': 'run' must be a reference or a document, found {}", kind_of(other)),
            None => bail!("step '{id}' is missing 'run'"),
        };

        let inputs = decode_step_inputs(definition.get("in"), &step_scope, scope).with_context(|| format!("while decoding 'in' of step '{id}'"))?;
        let outputs = decode_step_outputs(definition.get("out"), &step_scope).with_context(|| format!("while decoding 'out' of step '{id}'"))?;
        let scatter = string_list(definition.get("scatter"))
            .with_context(|| format!("while decoding 'scatter' of step '{id}'"))?
            .iter()
            .map(|name| step_scope.normalize(name))
            .collect();
        let scatter_method = match optional_string(&definition, "scatterMethod")?.as_deref() {
            None => None,
            Some("dotproduct") => Some(ScatterMethod::DotProduct),
            Some("nested_crossproduct") => Some(ScatterMethod::NestedCrossProduct),
            Some("flat_crossproduct") => Some(ScatterMethod::FlatCrossProduct),
            Some(other) => bail!("step '{id}': unknown scatter method '{other}'"),
        };

        steps.push(WorkflowStep {
            inputs,
            outputs,
            run,
            scatter,
            scatter_method,
            requirements: decode_requirements(definition.get("requirements")).with_context(|| format!("while decoding requirements of step '{id}'"))?,
            hints: decode_requirements(definition.get("hints")).with_context(|| format!("while decoding hints of step '{id}'"))?,
            when: optional_string(&definition, "when")?,
            label: optional_string(&definition, "label")?,
            doc: optional_doc(&definition)?,
            id,
        });
    }
    Ok(steps)
}

/// `source` ids are relative to the workflow, input ids relative to the step.
fn decode_step_inputs(value: Option<&Value>, step_scope: &IdScope, workflow_scope: &IdScope) -> Result<Vec<StepInput>> {
    let entries = collection_entries(value, "id", "source")?;
    let mut inputs = Vec::with_capacity(entries.len());
    for (index, (raw_id, definition)) in entries.into_iter().enumerate() {
        let id = step_scope.normalize(&raw_id.ok_or_else(|| anyhow!("step input {index} is missing 'id'"))?);
        let source = string_list(definition.get("source"))
            .with_context(|| format!("while decoding the source of '{id}'"))?
            .iter()
            .map(|source| workflow_scope.normalize(source))
            .collect();
        let link_merge = match optional_string(&definition, "linkMerge")?.as_deref() {
            None => None,
            Some("merge_nested") => Some(LinkMerge::MergeNested),
            Some("merge_flattened") => Some(LinkMerge::MergeFlattened),
            Some(other) => bail!("step input '{id}': unknown link merge method '{other}'"),
        };
        if definition.contains_key("pickValue") {
            bail!("step input '{id}': 'pickValue' is not supported");
        }
        inputs.push(StepInput {
            source,
            link_merge,
            value_from: optional_string(&definition, "valueFrom")?,
            default: definition.get("default").filter(|default| !default.is_null()).cloned().map(DefaultValue::from_value),
            id,
        });
    }
    Ok(inputs)
}

/// `out` entries are plain ids or `{id: ...}` maps.
fn decode_step_outputs(value: Option<&Value>, step_scope: &IdScope) -> Result<Vec<String>> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let items = value.as_array().ok_or_else(|| anyhow!("expected a list, found {}", kind_of(value)))?;
    items
        .iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::String(id) => Ok(step_scope.normalize(id)),
            Value::Object(entry) => optional_string(entry, "id")?
                .map(|id| step_scope.normalize(&id))
                .ok_or_else(|| anyhow!("output {index} is missing 'id'")),
            other => bail!("output {index} must be an id, found {}", kind_of(other)),
        })
        .collect()
}
