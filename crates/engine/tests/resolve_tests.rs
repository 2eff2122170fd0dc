use std::fs;

use serde_json::{Map, Value, json};
use weft_engine::{EngineError, FileRunLoader, Resolution, Resolver, ResolverConfig, parse_document};
use weft_types::Document;

fn config() -> ResolverConfig {
    ResolverConfig {
        outdir: "/work".into(),
        stage_work_dir: false,
        ..ResolverConfig::default()
    }
}

fn document(text: &str) -> Document {
    parse_document(text, None).expect("document decodes")
}

fn job(value: Value) -> Map<String, Value> {
    value.as_object().cloned().expect("job is an object")
}

fn resolve(text: &str, values: Value) -> Result<Resolution, EngineError> {
    let config = config();
    Resolver::new(&config).resolve(&document(text), &job(values))
}

fn ids(resolution: &Resolution) -> Vec<&str> {
    resolution.commands.iter().map(|command| command.id.as_str()).collect()
}

#[test]
fn single_tool_binds_its_file_input() {
    let resolution = resolve(include_str!("data/cat.cwl"), json!({"file": {"class": "File", "location": "a.txt"}})).expect("resolves");
    assert_eq!(ids(&resolution), vec!["cat"]);
    let command = &resolution.commands[0];
    assert_eq!(command.argv(), vec!["cat", "a.txt"]);
    assert_eq!(command.working_directory, std::path::PathBuf::from("/work"));
    assert_eq!(command.success_codes, vec![0]);
    assert!(command.depends_on.is_empty());
}

#[test]
fn missing_required_input_is_reported() {
    let error = resolve(include_str!("data/cat.cwl"), json!({})).expect_err("fails");
    match error {
        EngineError::MissingInput { root, input } => {
            assert_eq!(root, "cat");
            assert_eq!(input, "file");
        }
        other => panic!("expected MissingInput, got {other:?}"),
    }
}

#[test]
fn arguments_and_inputs_follow_binding_order() {
    let resolution = resolve(include_str!("data/ordering.cwl"), json!({})).expect("resolves");
    assert_eq!(
        resolution.commands[0].argv(),
        vec![
            "align",
            "--mode",
            "local",
            "--log-level",
            "debug",
            "--fast",
            "--threads",
            "1",
            "/data/ref.fa",
            "--reads",
            "/data/r1.fq,/data/r2.fq",
            "-v",
        ]
    );
}

#[test]
fn resolution_is_deterministic() {
    let text = include_str!("data/ordering.cwl");
    let first = resolve(text, json!({"mode": "global", "verbose": false})).expect("resolves");
    let second = resolve(text, json!({"mode": "global", "verbose": false})).expect("resolves");
    assert_eq!(first, second);
    assert!(!first.commands[0].argv().contains(&"-v"), "false flags are omitted: {:?}", first.commands[0].argv());
}

#[test]
fn pipeline_steps_run_in_dependency_order() {
    let resolution = resolve(include_str!("data/pipeline.cwl"), json!({"message": "hello"})).expect("resolves");
    assert_eq!(ids(&resolution), vec!["step1", "step2"]);

    let step1 = &resolution.commands[0];
    assert_eq!(step1.argv(), vec!["echo", "hello"]);
    assert_eq!(step1.stdout.as_deref(), Some("out.txt"));
    assert_eq!(step1.working_directory, std::path::PathBuf::from("/work/step1"));

    let step2 = &resolution.commands[1];
    assert_eq!(step2.depends_on, vec!["step1".to_string()]);
    assert_eq!(step2.argv(), vec!["wc", "-l", "/work/step1/out.txt"]);
    assert_eq!(resolution.outputs["line_count"]["path"], json!("/work/step2/lines.txt"));
    assert_eq!(resolution.outputs["line_count"]["basename"], json!("lines.txt"));
}

#[test]
fn dotproduct_scatter_yields_one_command_per_element() {
    let resolution = resolve(
        include_str!("data/scatter.cwl"),
        json!({"greetings": ["hi", "hello", "hey"], "names": ["ann", "bob", "cy"]}),
    )
    .expect("resolves");
    assert_eq!(ids(&resolution), vec!["greet[0]", "greet[1]", "greet[2]"]);
    assert_eq!(resolution.commands[1].argv(), vec!["echo", "hello", "bob"]);

    let logs = resolution.outputs["logs"].as_array().expect("gathered list");
    let paths: Vec<&str> = logs.iter().filter_map(|log| log["path"].as_str()).collect();
    assert_eq!(paths, vec!["/work/greet[0]/greeting.log", "/work/greet[1]/greeting.log", "/work/greet[2]/greeting.log"]);
}

#[test]
fn dotproduct_scatter_rejects_mismatched_lengths() {
    let error = resolve(include_str!("data/scatter.cwl"), json!({"greetings": ["hi", "hello", "hey"], "names": ["ann", "bob"]})).expect_err("fails");
    assert!(matches!(error, EngineError::InvalidScatter { ref step, .. } if step == "greet"), "got {error:?}");
}

const CROSS: &str = r#"
class: Workflow
id: grid
requirements:
  ScatterFeatureRequirement: {}
inputs:
  letters: string[]
  digits: int[]
outputs: {}
steps:
  pair:
    run:
      class: CommandLineTool
      baseCommand: printf
      inputs:
        letter: {type: string, inputBinding: {position: 1}}
        digit: {type: int, inputBinding: {position: 2}}
      outputs: {}
    scatter: [letter, digit]
    scatterMethod: METHOD
    in:
      letter: letters
      digit: digits
    out: []
"#;

#[test]
fn nested_crossproduct_numbers_every_dimension() {
    let text = CROSS.replace("METHOD", "nested_crossproduct");
    let resolution = resolve(&text, json!({"letters": ["x", "y"], "digits": [1, 2, 3]})).expect("resolves");
    assert_eq!(ids(&resolution), vec!["pair[0][0]", "pair[0][1]", "pair[0][2]", "pair[1][0]", "pair[1][1]", "pair[1][2]"]);
    assert_eq!(resolution.commands[4].argv(), vec!["printf", "y", "2"]);
}

#[test]
fn flat_crossproduct_numbers_instances_in_sequence() {
    let text = CROSS.replace("METHOD", "flat_crossproduct");
    let resolution = resolve(&text, json!({"letters": ["x", "y"], "digits": [1, 2, 3]})).expect("resolves");
    assert_eq!(ids(&resolution), vec!["pair[0]", "pair[1]", "pair[2]", "pair[3]", "pair[4]", "pair[5]"]);
    assert_eq!(resolution.commands[3].argv(), vec!["printf", "y", "1"]);
}

#[test]
fn graph_documents_resolve_sibling_references() {
    let resolution = resolve(include_str!("data/graph.cwl"), json!({"word": "hey"})).expect("resolves");
    assert_eq!(ids(&resolution), vec!["speak"]);
    assert_eq!(resolution.commands[0].argv(), vec!["echo", "hey"]);
    assert_eq!(resolution.commands[0].stdout.as_deref(), Some("shout.txt"));
    assert_eq!(resolution.outputs["said"]["path"], json!("/work/speak/shout.txt"));
}

#[test]
fn script_expressions_are_unsupported_when_scripting_is_declared() {
    let text = r#"
class: CommandLineTool
requirements:
  InlineJavascriptRequirement: {}
baseCommand: echo
arguments:
  - valueFrom: "${ return 1 + 1; }"
inputs: []
outputs: []
"#;
    let error = resolve(text, json!({})).expect_err("fails");
    assert!(error.is_unsupported(), "got {error:?}");
}

#[test]
fn script_expressions_without_scripting_are_evaluation_errors() {
    let text = r#"
class: CommandLineTool
baseCommand: echo
arguments:
  - valueFrom: "$(inputs.a + 1)"
inputs:
  a: int
outputs: []
"#;
    let error = resolve(text, json!({"a": 1})).expect_err("fails");
    assert!(matches!(error, EngineError::Expression { .. }), "got {error:?}");
}

#[test]
fn consuming_outputs_known_only_after_execution_is_unsupported() {
    let text = r#"
class: Workflow
inputs: []
outputs: []
steps:
  produce:
    run:
      class: CommandLineTool
      baseCommand: touch
      arguments: [a.txt, b.txt]
      inputs: []
      outputs:
        texts:
          type: File[]
          outputBinding: {glob: "*.txt"}
    in: []
    out: [texts]
  consume:
    run:
      class: CommandLineTool
      baseCommand: cat
      inputs:
        texts: {type: "File[]", inputBinding: {position: 1}}
      outputs: []
    in:
      texts: produce/texts
    out: []
"#;
    let error = resolve(text, json!({})).expect_err("fails");
    assert!(error.is_unsupported(), "got {error:?}");
}

#[test]
fn workflow_outputs_depending_on_execution_are_omitted() {
    let text = r#"
class: Workflow
inputs: []
outputs:
  texts:
    type: File[]
    outputSource: produce/texts
steps:
  produce:
    run:
      class: CommandLineTool
      baseCommand: touch
      arguments: [a.txt]
      inputs: []
      outputs:
        texts:
          type: File[]
          outputBinding: {glob: "*.txt"}
    in: []
    out: [texts]
"#;
    let resolution = resolve(text, json!({})).expect("resolves");
    assert_eq!(ids(&resolution), vec!["produce"]);
    assert!(!resolution.outputs.contains_key("texts"));
}

#[test]
fn expression_tool_results_feed_downstream_steps() {
    let text = r#"
class: Workflow
inputs:
  message: string
outputs:
  echoed:
    type: string
    outputSource: pass/message
steps:
  pass:
    run:
      class: ExpressionTool
      inputs:
        message: string
      outputs:
        message: string
      expression: $(inputs)
    in:
      message: message
    out: [message]
  say:
    run:
      class: CommandLineTool
      baseCommand: echo
      inputs:
        text: {type: string, inputBinding: {position: 1}}
      outputs: []
    in:
      text: pass/message
    out: []
"#;
    let resolution = resolve(text, json!({"message": "hi"})).expect("resolves");
    assert_eq!(ids(&resolution), vec!["say"]);
    assert_eq!(resolution.commands[0].argv(), vec!["echo", "hi"]);
    assert!(resolution.commands[0].depends_on.is_empty());
    assert_eq!(resolution.outputs["echoed"], json!("hi"));
}

const CONDITIONAL: &str = r#"
class: Workflow
inputs:
  enabled: boolean
  message: string
outputs:
  log:
    type: File?
    outputSource: speak/log
steps:
  speak:
    run:
      class: CommandLineTool
      baseCommand: echo
      inputs:
        message: {type: string, inputBinding: {position: 1}}
      outputs:
        log: stdout
    when: $(inputs.enabled)
    in:
      enabled: enabled
      message: message
    out: [log]
"#;

#[test]
fn false_conditions_skip_the_step() {
    let resolution = resolve(CONDITIONAL, json!({"enabled": false, "message": "hi"})).expect("resolves");
    assert!(resolution.commands.is_empty());
    assert_eq!(resolution.outputs["log"], Value::Null);
}

#[test]
fn true_conditions_run_the_step() {
    let resolution = resolve(CONDITIONAL, json!({"enabled": true, "message": "hi"})).expect("resolves");
    assert_eq!(ids(&resolution), vec!["speak"]);
    assert_eq!(resolution.commands[0].argv(), vec!["echo", "hi"]);
    assert_eq!(resolution.commands[0].stdout.as_deref(), Some("speak.stdout"));
    assert_eq!(resolution.outputs["log"]["path"], json!("/work/speak/speak.stdout"));
}

#[test]
fn non_boolean_conditions_are_rejected() {
    let error = resolve(CONDITIONAL, json!({"enabled": "yes", "message": "hi"})).expect_err("fails");
    assert!(matches!(error, EngineError::InvalidWorkflow { .. }), "got {error:?}");
}

#[test]
fn stdout_outputs_default_their_file_name() {
    let text = r#"
class: CommandLineTool
id: hello
baseCommand: [echo, hello]
inputs: []
outputs:
  out: stdout
"#;
    let resolution = resolve(text, json!({})).expect("resolves");
    assert_eq!(resolution.commands[0].stdout.as_deref(), Some("hello.stdout"));
    assert_eq!(resolution.outputs["out"]["path"], json!("/work/hello.stdout"));
}

#[test]
fn shell_commands_keep_unquoted_tokens_verbatim() {
    let text = r#"
class: CommandLineTool
requirements:
  ShellCommandRequirement: {}
baseCommand: echo
arguments:
  - {valueFrom: "|", shellQuote: false, position: 2}
  - {valueFrom: "wc -c", shellQuote: false, position: 3}
inputs:
  message: {type: string, inputBinding: {position: 1}}
outputs: []
"#;
    let resolution = resolve(text, json!({"message": "hello world"})).expect("resolves");
    let command = &resolution.commands[0];
    assert!(command.shell);
    assert!(!command.shell_quote);
    assert_eq!(command.shell_line(), "echo 'hello world' | wc -c");
}

#[test]
fn resource_requirements_set_runtime_values() {
    let text = r#"
class: CommandLineTool
requirements:
  ResourceRequirement:
    coresMin: 4
    ramMin: $(inputs.memory)
baseCommand: sort
arguments:
  - prefix: --parallel
    valueFrom: $(runtime.cores)
inputs:
  memory: int
outputs: []
"#;
    let resolution = resolve(text, json!({"memory": 2048})).expect("resolves");
    let command = &resolution.commands[0];
    assert_eq!(command.resources.cores, 4);
    assert_eq!(command.resources.ram_mb, 2048);
    assert_eq!(command.argv(), vec!["sort", "--parallel", "4"]);
}

#[test]
fn step_requirements_are_inherited_and_overridden() {
    let text = r#"
class: Workflow
requirements:
  ResourceRequirement: {coresMin: 2}
  EnvVarRequirement:
    envDef:
      STAGE: outer
inputs: []
outputs: []
steps:
  inherits:
    run:
      class: CommandLineTool
      baseCommand: nproc
      inputs: []
      outputs: []
    in: []
    out: []
  overrides:
    requirements:
      ResourceRequirement: {coresMin: 8}
    run:
      class: CommandLineTool
      requirements:
        EnvVarRequirement:
          envDef:
            STAGE: inner
      baseCommand: nproc
      inputs: []
      outputs: []
    in: []
    out: []
"#;
    let resolution = resolve(text, json!({})).expect("resolves");
    assert_eq!(ids(&resolution), vec!["inherits", "overrides"]);
    assert_eq!(resolution.commands[0].resources.cores, 2);
    assert_eq!(resolution.commands[0].environment.get("STAGE").map(String::as_str), Some("outer"));
    assert_eq!(resolution.commands[1].resources.cores, 8);
    assert_eq!(resolution.commands[1].environment.get("STAGE").map(String::as_str), Some("inner"));
}

#[test]
fn merging_a_scope_with_itself_changes_nothing() {
    let document = document(
        r#"
class: CommandLineTool
requirements:
  ResourceRequirement: {coresMin: 2, ramMin: 512}
  EnvVarRequirement:
    envDef: {A: "1", B: "2"}
hints:
  DockerRequirement: {dockerPull: "alpine:3"}
baseCommand: env
inputs: []
outputs: []
"#,
    );
    let scope = document.roots[0].requirement_scope();
    assert_eq!(scope.inherit(&scope), scope);
}

#[test]
fn work_dir_entries_are_staged_into_the_output_directory() {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = ResolverConfig {
        outdir: dir.path().to_path_buf(),
        ..ResolverConfig::default()
    };
    let text = r#"
class: CommandLineTool
requirements:
  InitialWorkDirRequirement:
    listing:
      - entryname: settings.conf
        entry: "threads=$(inputs.threads)"
baseCommand: [tool, --config, settings.conf]
inputs:
  threads: int
outputs: []
"#;
    let resolution = Resolver::new(&config).resolve(&document(text), &job(json!({"threads": 4}))).expect("resolves");
    assert_eq!(resolution.commands[0].work_dir_entries.len(), 1);
    assert_eq!(resolution.commands[0].work_dir_entries[0].name, "settings.conf");
    let staged = fs::read_to_string(dir.path().join("settings.conf")).expect("staged file");
    assert_eq!(staged, "threads=4");
}

const EXTERNAL: &str = r#"
class: Workflow
inputs:
  file: File
outputs: []
steps:
  show:
    run: cat.cwl
    in:
      file: file
    out: []
"#;

#[test]
fn external_run_references_need_a_loader() {
    let error = resolve(EXTERNAL, json!({"file": {"class": "File", "location": "/data/a.txt"}})).expect_err("fails");
    assert!(error.is_unsupported(), "got {error:?}");
}

#[test]
fn file_loader_resolves_external_run_references() {
    let dir = tempfile::tempdir().expect("temp dir");
    fs::write(dir.path().join("cat.cwl"), include_str!("data/cat.cwl")).expect("write tool");

    let config = config();
    let loader = FileRunLoader::new(dir.path());
    let resolution = Resolver::new(&config)
        .with_loader(&loader)
        .resolve(&document(EXTERNAL), &job(json!({"file": {"class": "File", "location": "/data/a.txt"}})))
        .expect("resolves");
    assert_eq!(ids(&resolution), vec!["show"]);
    assert_eq!(resolution.commands[0].argv(), vec!["cat", "/data/a.txt"]);
}

#[test]
fn step_outputs_must_be_declared_by_the_run_target() {
    let text = r#"
class: Workflow
inputs: []
outputs: []
steps:
  only:
    run:
      class: CommandLineTool
      baseCommand: "true"
      inputs: []
      outputs: []
    in: []
    out: [missing]
"#;
    let error = resolve(text, json!({})).expect_err("fails");
    assert!(matches!(error, EngineError::InvalidWorkflow { .. }), "got {error:?}");
}

#[test]
fn nested_workflows_prefix_their_step_ids() {
    let text = r#"
class: Workflow
inputs:
  message: string
outputs: []
steps:
  outer:
    run:
      class: Workflow
      inputs:
        message: string
      outputs: []
      steps:
        inner:
          run:
            class: CommandLineTool
            baseCommand: echo
            inputs:
              message: {type: string, inputBinding: {position: 1}}
            outputs: []
          in:
            message: message
          out: []
    in:
      message: message
    out: []
"#;
    let resolution = resolve(text, json!({"message": "deep"})).expect("resolves");
    assert_eq!(ids(&resolution), vec!["outer.inner"]);
    assert_eq!(resolution.commands[0].working_directory, std::path::PathBuf::from("/work/outer.inner"));
}

#[test]
fn steps_resolve_in_declaration_order_when_sources_allow() {
    let text = r#"
class: Workflow
inputs:
  message: string
outputs: []
steps:
  - id: first
    run:
      class: CommandLineTool
      baseCommand: echo
      inputs:
        text: {type: string, inputBinding: {position: 1}}
      stdout: first.txt
      outputs:
        out: stdout
    in:
      text: message
    out: [out]
  - id: second
    run:
      class: CommandLineTool
      baseCommand: cat
      inputs:
        file: {type: File, inputBinding: {position: 1}}
      outputs: []
    in:
      file: first/out
    out: []
  - id: third
    run:
      class: CommandLineTool
      baseCommand: echo
      inputs:
        text: {type: string, inputBinding: {position: 1}}
      outputs: []
    in:
      text: message
    out: []
"#;
    let resolution = resolve(text, json!({"message": "hi"})).expect("resolves");
    assert_eq!(ids(&resolution), vec!["first", "second", "third"]);
    assert_eq!(resolution.commands[1].depends_on, vec!["first".to_string()]);
    assert!(resolution.commands[2].depends_on.is_empty());
}
