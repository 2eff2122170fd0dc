//! Command-line and expression tool resolution.

use std::path::Path;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{debug, info};
use weft_types::value::{FILE_CLASS, is_file, normalize_value, path_of};
use weft_types::{
    Argument, CommandLineBinding, DocumentRoot, OutputParameter, ParameterType, RequirementScope, ResourceAmount, StringOrExpression,
};

use super::types::{Command, CommandToken, Resources};
use super::{BindingContext, Invocation, RootOutcome, Session};
use crate::bindings::{Flattener, OrderedTokens, SortKey, TypeRef, ValueFromEvaluator, order_and_concat, split_priors};
use crate::config::RuntimeContext;
use crate::error::{EngineError, EngineResult};
use crate::executor::staging::plan_entries;
use crate::expression::{Capabilities, ExpressionContext, ExpressionEvaluator, evaluate_field, format_json_value};
use crate::output::read_contents;

/// Binds provided values to the root's declared inputs.
///
/// A provided `null` counts as absent, so the default applies. Keys the root does not
/// declare are ignored.
pub(crate) fn bind_inputs(root: &DocumentRoot, provided: &Map<String, Value>) -> EngineResult<BindingContext> {
    let mut inputs = Map::new();
    for input in &root.inputs {
        let mut value = provided
            .get(&input.id)
            .filter(|value| !value.is_null())
            .cloned()
            .or_else(|| input.default.as_ref().map(|default| default.to_value()))
            .unwrap_or(Value::Null);

        if value.is_null() && !input.is_optional() {
            return Err(EngineError::MissingInput {
                root: root.display_id().to_string(),
                input: input.id.clone(),
            });
        }

        normalize_value(&mut value);
        if input.wants_contents() {
            load_contents(&mut value)?;
        }
        inputs.insert(input.id.clone(), value);
    }
    Ok(BindingContext { inputs })
}

/// Reads the head of each File into its `contents` field.
pub(crate) fn load_contents(value: &mut Value) -> EngineResult<()> {
    if let Value::Array(items) = value {
        return items.iter_mut().try_for_each(load_contents);
    }
    if !is_file(value) || value.get("contents").is_some() {
        return Ok(());
    }
    let Some(path) = path_of(value).map(str::to_string) else {
        return Ok(());
    };
    let contents = read_contents(Path::new(&path))?;
    if let Value::Object(object) = value {
        object.insert("contents".into(), Value::String(contents));
    }
    Ok(())
}

/// Runtime values for one invocation, adjusted by any resource requirement in effect.
fn runtime_for(
    session: &Session<'_>,
    scope: &RequirementScope,
    bound: &BindingContext,
    invocation: &Invocation,
    capabilities: &Capabilities,
) -> EngineResult<RuntimeContext> {
    let config = session.config();
    let outdir = config.working_directory_for(invocation.command_id(), invocation.nested);
    let mut runtime = RuntimeContext::new(config, outdir, config.tmpdir_for(invocation.command_id()));

    let Some(resource) = scope.resource() else {
        return Ok(runtime);
    };
    let base = runtime.to_map();
    let context = ExpressionContext::new(&bound.inputs, &base);
    let amount = |field: &str, amount: &Option<ResourceAmount>| -> EngineResult<Option<f64>> {
        match amount {
            None => Ok(None),
            Some(ResourceAmount::Number(number)) => Ok(Some(*number)),
            Some(ResourceAmount::Expression(expression)) => {
                let location = format!("{field} of '{}'", invocation.command_id());
                let value = session
                    .evaluator()
                    .evaluate(expression, &context, capabilities)
                    .map_err(|source| EngineError::expression(&location, source))?;
                value.as_f64().map(Some).ok_or_else(|| EngineError::InvalidWorkflow {
                    root: invocation.command_id().to_string(),
                    message: format!("{field} must evaluate to a number, got {value}"),
                })
            }
        }
    };

    if let Some(cores) = amount("coresMin", &resource.cores_min)? {
        runtime.cores = cores.ceil().max(1.0) as u32;
    }
    if let Some(ram) = amount("ramMin", &resource.ram_min)? {
        runtime.ram_mb = ram.ceil().max(0.0) as u64;
    }
    if let Some(outdir) = amount("outdirMin", &resource.outdir_min)? {
        runtime.outdir_size_mb = outdir.ceil().max(0.0) as u64;
    }
    if let Some(tmpdir) = amount("tmpdirMin", &resource.tmpdir_min)? {
        runtime.tmpdir_size_mb = tmpdir.ceil().max(0.0) as u64;
    }
    Ok(runtime)
}

/// `valueFrom` evaluation against one invocation's bound inputs and runtime.
struct BoundValueFrom<'e> {
    evaluator: &'e dyn ExpressionEvaluator,
    inputs: &'e Map<String, Value>,
    runtime: &'e Map<String, Value>,
    capabilities: &'e Capabilities,
    location: &'e str,
}

impl ValueFromEvaluator for BoundValueFrom<'_> {
    fn value_from(&self, binding: &CommandLineBinding, self_value: &Value) -> EngineResult<Value> {
        let Some(field) = &binding.value_from else {
            return Ok(self_value.clone());
        };
        let context = ExpressionContext::new(self.inputs, self.runtime).with_self(self_value);
        evaluate_field(self.evaluator, field, &context, self.capabilities).map_err(|source| EngineError::expression(self.location, source))
    }
}

pub(crate) fn resolve_command_line_tool(
    session: &Session<'_>,
    root: &DocumentRoot,
    provided: &Map<String, Value>,
    scope: &RequirementScope,
    invocation: &Invocation,
) -> EngineResult<RootOutcome> {
    let command_id = invocation.command_id();
    let capabilities = Capabilities::from_scope(scope);
    let bound = bind_inputs(root, provided)?;
    let runtime = runtime_for(session, scope, &bound, invocation, &capabilities)?;
    let runtime_map = runtime.to_map();
    let context = ExpressionContext::new(&bound.inputs, &runtime_map);
    let evaluator = session.evaluator();

    let location = format!("'{command_id}'");
    let value_from = BoundValueFrom {
        evaluator,
        inputs: &bound.inputs,
        runtime: &runtime_map,
        capabilities: &capabilities,
        location: &location,
    };
    let flattener = Flattener::new(root.display_id(), scope.schema_def(), &value_from);

    let mut arguments = Vec::with_capacity(root.arguments.len());
    for (index, argument) in root.arguments.iter().enumerate() {
        let ordered = match argument {
            Argument::Literal(text) => OrderedTokens {
                key: SortKey::new(None, index),
                tokens: vec![CommandToken::quoted(text.clone())],
            },
            Argument::Binding(binding) => OrderedTokens {
                key: SortKey::new(Some(binding), index),
                tokens: flattener.flatten(&Value::Null, None, Some(binding))?,
            },
        };
        arguments.push(ordered);
    }

    let mut inputs = Vec::with_capacity(root.inputs.len());
    for (index, input) in root.inputs.iter().enumerate() {
        let Some(binding) = &input.input_binding else {
            continue;
        };
        let value = bound.inputs.get(&input.id).unwrap_or(&Value::Null);
        inputs.push(OrderedTokens {
            key: SortKey::new(Some(binding), index),
            tokens: flattener.flatten(value, Some(TypeRef::Union(&input.param_type)), Some(binding))?,
        });
    }

    let tokens = assemble(&root.base_command, arguments, inputs);
    if tokens.is_empty() {
        return Err(EngineError::InvalidWorkflow {
            root: root.display_id().to_string(),
            message: "no base command, arguments or bound inputs to build a command from".to_string(),
        });
    }

    let stdin = evaluate_stdio(session, root.stdin.as_ref(), "stdin", &context, &capabilities, command_id)?;
    let stdout = evaluate_stdio(session, root.stdout.as_ref(), "stdout", &context, &capabilities, command_id)?
        .or_else(|| declares_stream(&root.outputs, "stdout").then(|| format!("{command_id}.stdout")));
    let stderr = evaluate_stdio(session, root.stderr.as_ref(), "stderr", &context, &capabilities, command_id)?
        .or_else(|| declares_stream(&root.outputs, "stderr").then(|| format!("{command_id}.stderr")));

    let environment = environment_for(session, scope, &context, &capabilities, command_id)?;

    let work_dir_entries = match scope.initial_work_dir() {
        Some(requirement) => plan_entries(requirement, evaluator, &context, &capabilities)?,
        None => Vec::new(),
    };
    if !work_dir_entries.is_empty() {
        session.stager().stage(&runtime.outdir, &work_dir_entries)?;
    }

    let predicted = predict_outputs(session, root, &runtime.outdir, stdout.as_deref(), stderr.as_deref(), &context, &capabilities)?;

    let command = Command {
        id: command_id.to_string(),
        shell: scope.shell_command(),
        shell_quote: tokens.iter().all(|token| token.quote),
        tokens,
        working_directory: runtime.outdir.clone(),
        stdin,
        stdout,
        stderr,
        environment,
        container_image: scope.docker().and_then(|docker| docker.image()).map(str::to_string),
        resources: Resources {
            cores: runtime.cores,
            ram_mb: runtime.ram_mb,
            outdir_mb: runtime.outdir_size_mb,
            tmpdir_mb: runtime.tmpdir_size_mb,
        },
        success_codes: if root.success_codes.is_empty() { vec![0] } else { root.success_codes.clone() },
        depends_on: invocation.depends_on.clone(),
        work_dir_entries,
        outputs: root.outputs.clone(),
        bound_inputs: bound.inputs.clone(),
        runtime: runtime_map.clone(),
        capabilities,
    };
    info!(root_id = %root.display_id(), command_id = %command.id, tokens = command.tokens.len(), "resolved command");

    Ok(RootOutcome {
        commands: vec![command],
        outputs: predicted,
    })
}

/// Base command, then priors, then arguments, then inputs.
///
/// Without a base command the first non-empty block plays its role, which yields the same
/// token sequence.
fn assemble(base_command: &[String], arguments: Vec<OrderedTokens>, inputs: Vec<OrderedTokens>) -> Vec<CommandToken> {
    let (argument_priors, arguments) = split_priors(arguments);
    let (input_priors, inputs) = split_priors(inputs);

    let mut priors: Vec<OrderedTokens> = argument_priors.into_iter().chain(input_priors).collect();
    priors.sort_by_key(|item| item.key.position());

    let mut tokens: Vec<CommandToken> = base_command.iter().map(|part| CommandToken::quoted(part.clone())).collect();
    tokens.extend(priors.into_iter().flat_map(|item| item.tokens));
    tokens.extend(order_and_concat(arguments));
    tokens.extend(order_and_concat(inputs));
    tokens
}

fn declares_stream(outputs: &[OutputParameter], stream: &str) -> bool {
    outputs.iter().any(|output| output.param_type.mentions_scalar(stream))
}

fn evaluate_stdio(
    session: &Session<'_>,
    field: Option<&StringOrExpression>,
    name: &str,
    context: &ExpressionContext<'_>,
    capabilities: &Capabilities,
    command_id: &str,
) -> EngineResult<Option<String>> {
    let Some(field) = field else {
        return Ok(None);
    };
    let value = evaluate_field(session.evaluator(), field, context, capabilities)
        .map_err(|source| EngineError::expression(format!("{name} of '{command_id}'"), source))?;
    match value {
        Value::Null => Ok(None),
        Value::String(text) if text.is_empty() => Ok(None),
        other => Ok(Some(format_json_value(&other))),
    }
}

/// Passthrough variables first, then declared variables, which win on conflict.
fn environment_for(
    session: &Session<'_>,
    scope: &RequirementScope,
    context: &ExpressionContext<'_>,
    capabilities: &Capabilities,
    command_id: &str,
) -> EngineResult<IndexMap<String, String>> {
    let mut environment = IndexMap::new();
    for name in &session.config().env_passthrough {
        match std::env::var(name) {
            Ok(value) => {
                environment.insert(name.clone(), value);
            }
            Err(_) => debug!(variable = %name, "passthrough variable not set"),
        }
    }
    if let Some(requirement) = scope.env_var() {
        for definition in &requirement.env_def {
            let value = evaluate_field(session.evaluator(), &definition.value, context, capabilities)
                .map_err(|source| EngineError::expression(format!("environment variable '{}' of '{command_id}'", definition.name), source))?;
            environment.insert(definition.name.clone(), format_json_value(&value));
        }
    }
    Ok(environment)
}

/// Outputs whose location is known before the command runs.
fn predict_outputs(
    session: &Session<'_>,
    root: &DocumentRoot,
    work_dir: &Path,
    stdout: Option<&str>,
    stderr: Option<&str>,
    context: &ExpressionContext<'_>,
    capabilities: &Capabilities,
) -> EngineResult<IndexMap<String, Option<Value>>> {
    let mut predicted = IndexMap::new();
    for output in &root.outputs {
        let single = match output.param_type.alternatives() {
            [only] => Some(only),
            _ => None,
        };
        let name = match single {
            Some(ParameterType::Scalar(scalar)) if scalar == "stdout" => stdout.map(str::to_string),
            Some(ParameterType::Scalar(scalar)) if scalar == "stderr" => stderr.map(str::to_string),
            Some(ParameterType::Scalar(scalar)) if scalar == FILE_CLASS => single_literal_glob(session, output, context, capabilities)?,
            _ => None,
        };
        let value = name.map(|name| {
            let mut file = Value::Object(Map::from_iter([
                ("class".to_string(), Value::String(FILE_CLASS.to_string())),
                ("location".to_string(), Value::String(work_dir.join(name).display().to_string())),
            ]));
            normalize_value(&mut file);
            file
        });
        if value.is_none() {
            debug!(root_id = %root.display_id(), output = %output.id, "output is only known after execution");
        }
        predicted.insert(output.id.clone(), value);
    }
    Ok(predicted)
}

/// The glob's file name when it is one pattern without wildcards.
fn single_literal_glob(
    session: &Session<'_>,
    output: &OutputParameter,
    context: &ExpressionContext<'_>,
    capabilities: &Capabilities,
) -> EngineResult<Option<String>> {
    let Some(binding) = &output.output_binding else {
        return Ok(None);
    };
    let [pattern] = binding.glob.as_slice() else {
        return Ok(None);
    };
    let value = evaluate_field(session.evaluator(), pattern, context, capabilities)
        .map_err(|source| EngineError::expression(format!("glob of output '{}'", output.id), source))?;
    Ok(match value {
        Value::String(text) if !text.is_empty() && !text.contains(['*', '?', '[']) => Some(text),
        _ => None,
    })
}

pub(crate) fn resolve_expression_tool(
    session: &Session<'_>,
    root: &DocumentRoot,
    provided: &Map<String, Value>,
    scope: &RequirementScope,
    invocation: &Invocation,
) -> EngineResult<RootOutcome> {
    let capabilities = Capabilities::from_scope(scope);
    let bound = bind_inputs(root, provided)?;
    let runtime = runtime_for(session, scope, &bound, invocation, &capabilities)?.to_map();
    let context = ExpressionContext::new(&bound.inputs, &runtime);

    let expression = root.expression.as_deref().ok_or_else(|| EngineError::InvalidWorkflow {
        root: root.display_id().to_string(),
        message: "expression tool has no expression".to_string(),
    })?;
    let result = session
        .evaluator()
        .evaluate(expression, &context, &capabilities)
        .map_err(|source| EngineError::expression(format!("expression of '{}'", invocation.command_id()), source))?;
    let Value::Object(mut values) = result else {
        return Err(EngineError::InvalidWorkflow {
            root: root.display_id().to_string(),
            message: format!("expression must produce an object, got {result}"),
        });
    };

    let outputs = root
        .outputs
        .iter()
        .map(|output| {
            let mut value = values.remove(&output.id).unwrap_or(Value::Null);
            normalize_value(&mut value);
            (output.id.clone(), Some(value))
        })
        .collect();
    info!(root_id = %root.display_id(), command_id = %invocation.command_id(), "evaluated expression tool");
    Ok(RootOutcome {
        commands: Vec::new(),
        outputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_types::{DefaultValue, DocumentClass, InputParameter, TypeUnion};

    fn input(id: &str, type_name: &str, position: Option<i32>) -> InputParameter {
        InputParameter {
            id: id.into(),
            param_type: TypeUnion::single(ParameterType::from_name(type_name)),
            input_binding: position.map(|position| CommandLineBinding {
                position,
                ..CommandLineBinding::default()
            }),
            default: None,
            secondary_files: Vec::new(),
            format: None,
            label: None,
            doc: None,
            load_contents: false,
            streamable: false,
        }
    }

    fn tokens(texts: &[&str], index: usize, position: Option<i32>) -> OrderedTokens {
        let binding = position.map(|position| CommandLineBinding {
            position,
            ..CommandLineBinding::default()
        });
        OrderedTokens {
            key: SortKey::new(binding.as_ref(), index),
            tokens: texts.iter().map(|text| CommandToken::quoted(*text)).collect(),
        }
    }

    fn texts(tokens: &[CommandToken]) -> Vec<&str> {
        tokens.iter().map(|token| token.text.as_str()).collect()
    }

    #[test]
    fn provided_values_override_defaults() {
        let mut root = DocumentRoot::new(DocumentClass::CommandLineTool);
        let mut threads = input("threads", "int", Some(1));
        threads.default = Some(DefaultValue::from_value(json!(2)));
        root.inputs = vec![threads, input("label", "string?", None)];

        let bound = bind_inputs(&root, json!({"threads": 8, "extra": true}).as_object().expect("object")).expect("binds");
        assert_eq!(bound.inputs["threads"], json!(8));
        assert_eq!(bound.inputs["label"], Value::Null);
        assert!(!bound.inputs.contains_key("extra"));

        let bound = bind_inputs(&root, json!({"threads": null}).as_object().expect("object")).expect("binds");
        assert_eq!(bound.inputs["threads"], json!(2));
    }

    #[test]
    fn missing_required_input_names_root_and_input() {
        let mut root = DocumentRoot::new(DocumentClass::CommandLineTool);
        root.id = Some("sort".into());
        root.inputs = vec![input("reads", "File", Some(1))];
        let error = bind_inputs(&root, &Map::new()).expect_err("fails");
        assert!(matches!(error, EngineError::MissingInput { ref root, ref input } if root == "sort" && input == "reads"));
    }

    #[test]
    fn file_inputs_are_normalized_and_contents_loaded() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("names.txt");
        std::fs::write(&path, "alice\nbob\n").expect("write");

        let mut root = DocumentRoot::new(DocumentClass::CommandLineTool);
        let mut names = input("names", "File", None);
        names.load_contents = true;
        root.inputs = vec![names];

        let provided = json!({"names": {"class": "File", "location": path.display().to_string()}});
        let bound = bind_inputs(&root, provided.as_object().expect("object")).expect("binds");
        assert_eq!(bound.inputs["names"]["basename"], json!("names.txt"));
        assert_eq!(bound.inputs["names"]["contents"], json!("alice\nbob\n"));
    }

    #[test]
    fn assembly_places_priors_after_the_base_command() {
        let arguments = vec![tokens(&["--verbose"], 0, Some(2)), tokens(&["-x"], 1, Some(-1))];
        let inputs = vec![tokens(&["input.txt"], 0, Some(1)), tokens(&["-z"], 1, Some(-2))];
        let assembled = assemble(&["tool".to_string()], arguments, inputs);
        assert_eq!(texts(&assembled), vec!["tool", "-z", "-x", "--verbose", "input.txt"]);
    }

    #[test]
    fn assembly_without_base_command_starts_with_first_block() {
        let arguments = vec![tokens(&["python", "script.py"], 0, None)];
        let inputs = vec![tokens(&["data.csv"], 0, Some(1))];
        assert_eq!(texts(&assemble(&[], arguments, inputs)), vec!["python", "script.py", "data.csv"]);
    }
}
