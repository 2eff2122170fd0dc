//! Workflow resolution: step ordering, source wiring, scatter and conditional steps.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{debug, info};
use weft_types::value::normalize_value;
use weft_types::{DocumentRoot, LinkMerge, RequirementScope, StepInput, StringOrExpression, WorkflowStep};

use super::scatter::{self, ScatterInstance};
use super::tool::bind_inputs;
use super::types::Command;
use super::{BindingContext, Invocation, RootOutcome, Session, order_steps, source_step};
use crate::error::{EngineError, EngineResult};
use crate::expression::{Capabilities, ExpressionContext, evaluate_field};

/// Values known while walking one workflow's steps.
struct WorkflowState<'w> {
    inputs: &'w Map<String, Value>,
    /// Predicted outputs per step id; `None` values are unknown until execution.
    step_outputs: HashMap<String, IndexMap<String, Option<Value>>>,
    /// Command ids a downstream step waits for, per step id.
    produced: HashMap<String, Vec<String>>,
}

impl WorkflowState<'_> {
    fn lookup(&self, root_id: &str, source: &str) -> EngineResult<Option<Value>> {
        let invalid = |message: String| EngineError::InvalidWorkflow {
            root: root_id.to_string(),
            message,
        };
        match source.split_once('/') {
            Some((step, output)) => {
                let outputs = self
                    .step_outputs
                    .get(step)
                    .ok_or_else(|| invalid(format!("source '{source}' names step '{step}', which has not been resolved")))?;
                outputs
                    .get(output)
                    .cloned()
                    .ok_or_else(|| invalid(format!("step '{step}' has no output '{output}'")))
            }
            None => self
                .inputs
                .get(source)
                .cloned()
                .map(Some)
                .ok_or_else(|| invalid(format!("source '{source}' is not a workflow input"))),
        }
    }
}

pub(crate) fn resolve_workflow(
    session: &Session<'_>,
    root: &DocumentRoot,
    provided: &Map<String, Value>,
    scope: &RequirementScope,
    invocation: &Invocation,
    depth: usize,
) -> EngineResult<RootOutcome> {
    let root_id = root.display_id();
    let bound = bind_inputs(root, provided)?;
    let ordered = order_steps(root_id, &root.steps)?;

    let mut state = WorkflowState {
        inputs: &bound.inputs,
        step_outputs: HashMap::new(),
        produced: HashMap::new(),
    };
    let mut commands = Vec::new();
    for step in ordered {
        commands.extend(resolve_step(session, root, step, scope, invocation, depth, &mut state)?);
    }

    let mut outputs = IndexMap::new();
    for output in &root.outputs {
        let mut values = Vec::with_capacity(output.output_source.len());
        let mut known = true;
        for source in &output.output_source {
            match state.lookup(root_id, source)? {
                Some(value) => values.push(value),
                None => known = false,
            }
        }
        outputs.insert(output.id.clone(), known.then(|| merge_sources(values, None)));
    }

    info!(root_id = %root_id, steps = root.steps.len(), commands = commands.len(), "resolved workflow");
    Ok(RootOutcome { commands, outputs })
}

fn resolve_step(
    session: &Session<'_>,
    root: &DocumentRoot,
    step: &WorkflowStep,
    scope: &RequirementScope,
    invocation: &Invocation,
    depth: usize,
    state: &mut WorkflowState<'_>,
) -> EngineResult<Vec<Command>> {
    let root_id = root.display_id();
    let step_id = invocation.step_id(&step.id);
    let step_scope = step.requirement_scope().inherit(scope);
    let capabilities = Capabilities::from_scope(&step_scope);
    info!(root_id = %root_id, step_id = %step_id, "resolving step");

    let mut depends_on = invocation.depends_on.clone();
    for upstream in step.inputs.iter().flat_map(|input| input.source.iter()).filter_map(|source| source_step(source)) {
        for command_id in state.produced.get(upstream).into_iter().flatten() {
            if !depends_on.contains(command_id) {
                depends_on.push(command_id.clone());
            }
        }
    }

    let mut step_inputs = Map::new();
    for input in &step.inputs {
        let mut value = source_value(root_id, &step_id, input, state)?;
        if value.is_null()
            && let Some(default) = &input.default
        {
            value = default.to_value();
        }
        normalize_value(&mut value);
        step_inputs.insert(input.id.clone(), value);
    }

    let run_root = session.run_target(step)?;
    for output in &step.outputs {
        if run_root.output(output).is_none() {
            return Err(EngineError::InvalidWorkflow {
                root: root_id.to_string(),
                message: format!("step '{}' lists output '{output}', which '{}' does not declare", step.id, run_root.display_id()),
            });
        }
    }

    let (instances, shape) = if step.scatter.is_empty() {
        let single = ScatterInstance {
            suffix: String::new(),
            inputs: step_inputs,
        };
        (vec![single], None)
    } else {
        let (instances, shape) = scatter::expand(&step_id, &step.scatter, step.scatter_method, &step_inputs)?;
        (instances, Some(shape))
    };

    let mut commands = Vec::new();
    let mut instance_outputs: Vec<IndexMap<String, Option<Value>>> = Vec::with_capacity(instances.len());
    for instance in instances {
        let instance_id = format!("{step_id}{}", instance.suffix);
        let context = apply_value_from(session, step, &instance_id, instance.inputs, &capabilities)?;

        if !condition_holds(session, step, &instance_id, &context, &capabilities)? {
            debug!(step_id = %instance_id, "condition is false, skipping step");
            instance_outputs.push(step.outputs.iter().map(|output| (output.clone(), Some(Value::Null))).collect());
            continue;
        }

        let nested = Invocation {
            id: instance_id,
            nested: true,
            depends_on: depends_on.clone(),
        };
        let outcome = session.resolve_root(&run_root, &context.inputs, &step_scope, &nested, depth + 1)?;
        instance_outputs.push(
            step.outputs
                .iter()
                .map(|output| (output.clone(), outcome.outputs.get(output).cloned().flatten()))
                .collect(),
        );
        commands.extend(outcome.commands);
    }

    let mut outputs = IndexMap::new();
    for output in &step.outputs {
        let per_instance: Option<Vec<Value>> = instance_outputs.iter().map(|values| values.get(output).cloned().flatten()).collect();
        let value = match &shape {
            None => per_instance.and_then(|mut values| values.pop()),
            Some(shape) => per_instance.map(|values| scatter::gather(shape, values)),
        };
        outputs.insert(output.clone(), value);
    }
    state.step_outputs.insert(step.id.clone(), outputs);

    let produced = if commands.is_empty() { depends_on } else { commands.iter().map(|command| command.id.clone()).collect() };
    state.produced.insert(step.id.clone(), produced);
    Ok(commands)
}

/// Sources, then link merge. A `step/output` that is only known after execution cannot
/// feed resolution.
fn source_value(root_id: &str, step_id: &str, input: &StepInput, state: &WorkflowState<'_>) -> EngineResult<Value> {
    let mut values = Vec::with_capacity(input.source.len());
    for source in &input.source {
        match state.lookup(root_id, source)? {
            Some(value) => values.push(value),
            None => {
                return Err(EngineError::Unsupported(format!(
                    "step '{step_id}' consumes '{source}', which is only known after execution"
                )));
            }
        }
    }
    Ok(merge_sources(values, input.link_merge))
}

/// A single source passes through unless a merge method is named; several sources
/// merge nested by default.
fn merge_sources(mut values: Vec<Value>, method: Option<LinkMerge>) -> Value {
    match (values.len(), method) {
        (0, _) => Value::Null,
        (1, None) => values.pop().unwrap_or(Value::Null),
        (_, Some(LinkMerge::MergeFlattened)) => Value::Array(
            values
                .into_iter()
                .flat_map(|value| match value {
                    Value::Array(items) => items,
                    other => vec![other],
                })
                .collect(),
        ),
        _ => Value::Array(values),
    }
}

/// Evaluates every `valueFrom` against the instance's values as they were before any
/// `valueFrom` ran.
fn apply_value_from(
    session: &Session<'_>,
    step: &WorkflowStep,
    instance_id: &str,
    inputs: Map<String, Value>,
    capabilities: &Capabilities,
) -> EngineResult<BindingContext> {
    if step.inputs.iter().all(|input| input.value_from.is_none()) {
        return Ok(BindingContext { inputs });
    }

    let runtime = Map::new();
    let mut transformed = inputs.clone();
    for input in &step.inputs {
        let Some(value_from) = &input.value_from else {
            continue;
        };
        let self_value = inputs.get(&input.id).unwrap_or(&Value::Null);
        let context = ExpressionContext::new(&inputs, &runtime).with_self(self_value);
        let mut value = evaluate_field(session.evaluator(), &StringOrExpression::parse(value_from.clone()), &context, capabilities)
            .map_err(|source| EngineError::expression(format!("valueFrom of '{}' in step '{instance_id}'", input.id), source))?;
        normalize_value(&mut value);
        transformed.insert(input.id.clone(), value);
    }
    Ok(BindingContext { inputs: transformed })
}

fn condition_holds(
    session: &Session<'_>,
    step: &WorkflowStep,
    instance_id: &str,
    context: &BindingContext,
    capabilities: &Capabilities,
) -> EngineResult<bool> {
    let Some(when) = &step.when else {
        return Ok(true);
    };
    let runtime = Map::new();
    let expression_context = ExpressionContext::new(&context.inputs, &runtime);
    let value = session
        .evaluator()
        .evaluate(when, &expression_context, capabilities)
        .map_err(|source| EngineError::expression(format!("'when' of step '{instance_id}'"), source))?;
    match value {
        Value::Bool(holds) => Ok(holds),
        other => Err(EngineError::InvalidWorkflow {
            root: instance_id.to_string(),
            message: format!("'when' must evaluate to a boolean, got {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn single_sources_pass_through() {
        assert_eq!(merge_sources(vec![json!("a")], None), json!("a"));
        assert_eq!(merge_sources(Vec::new(), None), Value::Null);
    }

    #[test]
    fn several_sources_merge_nested_by_default() {
        assert_eq!(merge_sources(vec![json!([1]), json!(2)], None), json!([[1], 2]));
        assert_eq!(merge_sources(vec![json!("a")], Some(LinkMerge::MergeNested)), json!(["a"]));
    }

    #[test]
    fn merge_flattened_splices_lists() {
        assert_eq!(merge_sources(vec![json!([1, 2]), json!(3), json!([4])], Some(LinkMerge::MergeFlattened)), json!([1, 2, 3, 4]));
    }

    #[test]
    fn lookup_distinguishes_unknown_from_unpredictable() {
        let inputs = json!({"reads": "r.fq"}).as_object().cloned().expect("object");
        let mut state = WorkflowState {
            inputs: &inputs,
            step_outputs: HashMap::new(),
            produced: HashMap::new(),
        };
        state
            .step_outputs
            .insert("count".into(), IndexMap::from([("lines".to_string(), None), ("log".to_string(), Some(json!("x")))]));

        assert_eq!(state.lookup("main", "reads").expect("input"), Some(json!("r.fq")));
        assert_eq!(state.lookup("main", "count/log").expect("output"), Some(json!("x")));
        assert_eq!(state.lookup("main", "count/lines").expect("output"), None);
        assert!(state.lookup("main", "count/missing").is_err());
        assert!(state.lookup("main", "nope").is_err());
    }
}
