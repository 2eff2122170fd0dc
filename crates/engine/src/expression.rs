//! # Embedded Expressions
//!
//! Documents embed expressions in strings: `$(...)` parameter references and `${...}`
//! function bodies. Evaluation is a capability supplied to the resolver through the
//! [`ExpressionEvaluator`] trait, so a host with a scripting engine can plug one in.
//!
//! The built-in [`ParameterReferenceEvaluator`] covers the parameter-reference subset
//! without a scripting engine:
//!
//! - `$(inputs.reads.path)`, `$(inputs['reads'])`, `$(inputs.samples[0])`
//! - `$(self.basename)`, `$(runtime.outdir)`
//! - `.length` on lists and strings
//! - literals `null`, `true`, `false`, numbers and quoted strings
//!
//! A string made of exactly one `$(...)` evaluates to the referenced value with its type
//! intact; anything else interpolates each reference into the surrounding text. `\$(` is
//! an escaped, literal `$(`.
//!
//! ```rust
//! use serde_json::{Map, json};
//! use weft_engine::expression::{Capabilities, ExpressionContext, ExpressionEvaluator, ParameterReferenceEvaluator};
//!
//! let mut inputs = Map::new();
//! inputs.insert("threads".into(), json!(4));
//! let runtime = Map::new();
//! let context = ExpressionContext::new(&inputs, &runtime);
//!
//! let evaluator = ParameterReferenceEvaluator;
//! let value = evaluator.evaluate("$(inputs.threads)", &context, &Capabilities::default()).unwrap();
//! assert_eq!(value, json!(4));
//! let text = evaluator.evaluate("-t $(inputs.threads)", &context, &Capabilities::default()).unwrap();
//! assert_eq!(text, json!("-t 4"));
//! ```

use serde::Serialize;
use serde_json::{Map, Value};
use weft_types::{RequirementScope, StringOrExpression};

use crate::error::ExpressionError;

/// Named values an expression can see.
#[derive(Debug, Clone, Copy)]
pub struct ExpressionContext<'a> {
    pub inputs: &'a Map<String, Value>,
    /// Value bound to `self`; `null` outside of value-transforming positions.
    pub self_value: &'a Value,
    pub runtime: &'a Map<String, Value>,
}

impl<'a> ExpressionContext<'a> {
    pub fn new(inputs: &'a Map<String, Value>, runtime: &'a Map<String, Value>) -> Self {
        Self {
            inputs,
            self_value: &Value::Null,
            runtime,
        }
    }

    pub fn with_self(self, self_value: &'a Value) -> Self {
        Self { self_value, ..self }
    }
}

/// Language features enabled for one resolver invocation.
///
/// Built from the effective requirements of the document being resolved and passed down
/// explicitly; nothing about it is global.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// An inline scripting requirement is in effect.
    pub javascript: bool,
    /// Library sources to load before evaluating any expression.
    pub expression_lib: Vec<String>,
}

impl Capabilities {
    pub fn from_scope(scope: &RequirementScope) -> Self {
        match scope.inline_javascript() {
            Some(requirement) => Self {
                javascript: true,
                expression_lib: requirement.expression_lib.clone(),
            },
            None => Self::default(),
        }
    }
}

/// Evaluates strings with embedded expressions.
pub trait ExpressionEvaluator {
    /// Evaluates `text`, which may mix literal text with any number of expressions.
    fn evaluate(&self, text: &str, context: &ExpressionContext<'_>, capabilities: &Capabilities) -> Result<Value, ExpressionError>;
}

/// Evaluates a classified string: literals are unescaped, expressions are evaluated.
pub fn evaluate_field(
    evaluator: &dyn ExpressionEvaluator,
    field: &StringOrExpression,
    context: &ExpressionContext<'_>,
    capabilities: &Capabilities,
) -> Result<Value, ExpressionError> {
    match field {
        StringOrExpression::Literal(text) => Ok(Value::String(unescape_literal(text))),
        StringOrExpression::Expression(text) => evaluator.evaluate(text, context, capabilities),
    }
}

/// Removes the escape from `\$(`, `\${` and `\\`.
pub fn unescape_literal(text: &str) -> String {
    if !text.contains('\\') {
        return text.to_string();
    }
    let mut output = String::with_capacity(text.len());
    let mut characters = text.chars().peekable();
    while let Some(character) = characters.next() {
        if character == '\\'
            && let Some(&next) = characters.peek()
            && (next == '$' || next == '\\')
        {
            output.push(next);
            characters.next();
            continue;
        }
        output.push(character);
    }
    output
}

/// Renders a value for interpolation into surrounding text.
pub fn format_json_value(value: &Value) -> String {
    match value {
        Value::String(string_value) => string_value.clone(),
        Value::Number(number_value) => number_value.to_string(),
        Value::Bool(boolean_value) => boolean_value.to_string(),
        Value::Null => "null".to_string(),
        other_value => other_value.to_string(),
    }
}

/// Parameter-reference evaluator that needs no scripting engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterReferenceEvaluator;

impl ExpressionEvaluator for ParameterReferenceEvaluator {
    fn evaluate(&self, text: &str, context: &ExpressionContext<'_>, capabilities: &Capabilities) -> Result<Value, ExpressionError> {
        let segments = split_segments(text).map_err(|message| ExpressionError::Evaluation {
            expression: text.to_string(),
            message,
        })?;

        // A lone expression, surrounding whitespace aside, keeps the type of its result.
        let significant: Vec<&Segment> = segments
            .iter()
            .filter(|segment| !matches!(segment, Segment::Text(literal) if literal.trim().is_empty()))
            .collect();
        if let [single] = significant.as_slice()
            && !matches!(single, Segment::Text(_))
        {
            return evaluate_segment(single, context, capabilities);
        }

        let mut output_string = String::new();
        for segment in &segments {
            match segment {
                Segment::Text(literal) => output_string.push_str(literal),
                other => output_string.push_str(&format_json_value(&evaluate_segment(other, context, capabilities)?)),
            }
        }
        Ok(Value::String(output_string))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    /// Body of `$(...)`.
    Reference(String),
    /// Body of `${...}`.
    Body(String),
}

/// Splits text into literal runs and expressions, honoring `\` escapes and nested brackets.
fn split_segments(text: &str) -> Result<Vec<Segment>, String> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let characters: Vec<char> = text.chars().collect();
    let mut index = 0;

    while index < characters.len() {
        let character = characters[index];
        if character == '\\' && matches!(characters.get(index + 1), Some('$') | Some('\\')) {
            literal.push(characters[index + 1]);
            index += 2;
            continue;
        }
        if character == '$'
            && let Some(&open) = characters.get(index + 1)
            && (open == '(' || open == '{')
        {
            let close = if open == '(' { ')' } else { '}' };
            let end = find_closing(&characters, index + 1, open, close).ok_or_else(|| format!("unterminated '${open}' starting at offset {index}"))?;
            if !literal.is_empty() {
                segments.push(Segment::Text(std::mem::take(&mut literal)));
            }
            let body: String = characters[index + 2..end].iter().collect();
            segments.push(if open == '(' { Segment::Reference(body) } else { Segment::Body(body) });
            index = end + 1;
            continue;
        }
        literal.push(character);
        index += 1;
    }

    if !literal.is_empty() {
        segments.push(Segment::Text(literal));
    }
    Ok(segments)
}

/// Index of the bracket closing the one at `start`, skipping quoted strings.
fn find_closing(characters: &[char], start: usize, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut index = start;
    while index < characters.len() {
        let character = characters[index];
        match quote {
            Some(active) => {
                if character == '\\' {
                    index += 1;
                } else if character == active {
                    quote = None;
                }
            }
            None => {
                if character == '\'' || character == '"' {
                    quote = Some(character);
                } else if character == open {
                    depth += 1;
                } else if character == close {
                    depth -= 1;
                    if depth == 0 {
                        return Some(index);
                    }
                }
            }
        }
        index += 1;
    }
    None
}

fn evaluate_segment(segment: &Segment, context: &ExpressionContext<'_>, capabilities: &Capabilities) -> Result<Value, ExpressionError> {
    match segment {
        Segment::Text(literal) => Ok(Value::String(literal.clone())),
        Segment::Reference(body) => match parse_reference(body.trim()) {
            Some(reference) => resolve_reference(&reference, context).map_err(|message| ExpressionError::Evaluation {
                expression: format!("$({body})"),
                message,
            }),
            None => Err(needs_script_engine(format!("$({body})"), capabilities)),
        },
        Segment::Body(body) => Err(needs_script_engine(format!("${{{body}}}"), capabilities)),
    }
}

fn needs_script_engine(expression: String, capabilities: &Capabilities) -> ExpressionError {
    if capabilities.javascript {
        ExpressionError::Unsupported { expression }
    } else {
        ExpressionError::Evaluation {
            expression,
            message: "not a parameter reference and no inline scripting requirement is declared".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Reference {
    Literal(Value),
    Path { root: String, segments: Vec<PathSegment> },
}

#[derive(Debug, Clone, PartialEq)]
enum PathSegment {
    Key(String),
    Index(usize),
}

/// Parses `inputs.a['b'][0].length` style references; `None` for anything else.
fn parse_reference(body: &str) -> Option<Reference> {
    match body {
        "null" => return Some(Reference::Literal(Value::Null)),
        "true" => return Some(Reference::Literal(Value::Bool(true))),
        "false" => return Some(Reference::Literal(Value::Bool(false))),
        _ => {}
    }
    if body.starts_with(|character: char| character.is_ascii_digit() || character == '-')
        && let Ok(number) = serde_json::from_str::<serde_json::Number>(body)
    {
        return Some(Reference::Literal(Value::Number(number)));
    }
    if let Some(quoted) = parse_quoted(body)
        && quoted.1.is_empty()
    {
        return Some(Reference::Literal(Value::String(quoted.0)));
    }

    let characters: Vec<char> = body.chars().collect();
    let mut index = 0;
    let root = read_identifier(&characters, &mut index)?;
    if !matches!(root.as_str(), "inputs" | "self" | "runtime") {
        return None;
    }

    let mut segments = Vec::new();
    while index < characters.len() {
        match characters[index] {
            '.' => {
                index += 1;
                segments.push(PathSegment::Key(read_identifier(&characters, &mut index)?));
            }
            '[' => {
                let close = characters[index..].iter().position(|character| *character == ']')? + index;
                let inner: String = characters[index + 1..close].iter().collect();
                let inner = inner.trim();
                if let Ok(position) = inner.parse::<usize>() {
                    segments.push(PathSegment::Index(position));
                } else {
                    let (key, rest) = parse_quoted(inner)?;
                    if !rest.is_empty() {
                        return None;
                    }
                    segments.push(PathSegment::Key(key));
                }
                index = close + 1;
            }
            _ => return None,
        }
    }
    Some(Reference::Path { root, segments })
}

fn read_identifier(characters: &[char], index: &mut usize) -> Option<String> {
    let start = *index;
    while *index < characters.len() && (characters[*index].is_alphanumeric() || characters[*index] == '_') {
        *index += 1;
    }
    if *index == start || characters[start].is_ascii_digit() {
        return None;
    }
    Some(characters[start..*index].iter().collect())
}

/// Parses a leading `'...'` or `"..."`, returning the unquoted text and what follows it.
fn parse_quoted(text: &str) -> Option<(String, &str)> {
    let mut characters = text.char_indices();
    let (_, quote) = characters.next()?;
    if quote != '\'' && quote != '"' {
        return None;
    }
    let mut unquoted = String::new();
    let mut escaped = false;
    for (offset, character) in characters {
        if escaped {
            unquoted.push(character);
            escaped = false;
        } else if character == '\\' {
            escaped = true;
        } else if character == quote {
            return Some((unquoted, &text[offset + character.len_utf8()..]));
        } else {
            unquoted.push(character);
        }
    }
    None
}

/// Walks a parsed reference through the context, following the language's lookup rules.
fn resolve_reference(reference: &Reference, context: &ExpressionContext<'_>) -> Result<Value, String> {
    let (root, segments) = match reference {
        Reference::Literal(value) => return Ok(value.clone()),
        Reference::Path { root, segments } => (root, segments),
    };

    let root_value = match root.as_str() {
        "inputs" => Value::Object(context.inputs.clone()),
        "runtime" => Value::Object(context.runtime.clone()),
        _ => context.self_value.clone(),
    };
    navigate_json_path(&root_value, segments, root)
}

fn navigate_json_path(root_value: &Value, path_segments: &[PathSegment], root_name: &str) -> Result<Value, String> {
    let mut current_value = root_value;
    let mut walked = root_name.to_string();

    for path_segment in path_segments {
        match (current_value, path_segment) {
            (Value::Object(object_map), PathSegment::Key(key)) => {
                current_value = object_map.get(key).unwrap_or(&Value::Null);
            }
            (Value::Array(array_values), PathSegment::Key(key)) if key == "length" => {
                return finish_after_length(array_values.len(), path_segments, path_segment);
            }
            (Value::String(string_value), PathSegment::Key(key)) if key == "length" => {
                return finish_after_length(string_value.chars().count(), path_segments, path_segment);
            }
            (Value::Array(array_values), PathSegment::Index(position)) => {
                current_value = array_values.get(*position).unwrap_or(&Value::Null);
            }
            (Value::Null, segment) => {
                return Err(format!("cannot read {} of null ({walked})", describe(segment)));
            }
            (_, segment) => {
                return Err(format!("cannot read {} of a non-container value ({walked})", describe(segment)));
            }
        }
        walked.push_str(&describe(path_segment));
    }

    Ok(current_value.clone())
}

/// `.length` yields a number; nothing may follow it in this subset.
fn finish_after_length(length: usize, path_segments: &[PathSegment], length_segment: &PathSegment) -> Result<Value, String> {
    let is_last = path_segments.last().is_some_and(|last| std::ptr::eq(last, length_segment));
    if is_last {
        Ok(Value::from(length))
    } else {
        Err("'.length' must be the final segment of a reference".to_string())
    }
}

fn describe(segment: &PathSegment) -> String {
    match segment {
        PathSegment::Key(key) => format!(".{key}"),
        PathSegment::Index(position) => format!("[{position}]"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn evaluate(text: &str, inputs: Value, self_value: Value, capabilities: &Capabilities) -> Result<Value, ExpressionError> {
        let inputs = inputs.as_object().cloned().unwrap_or_default();
        let mut runtime = Map::new();
        runtime.insert("outdir".into(), json!("/work/out"));
        runtime.insert("cores".into(), json!(2));
        let context = ExpressionContext::new(&inputs, &runtime).with_self(&self_value);
        ParameterReferenceEvaluator.evaluate(text, &context, capabilities)
    }

    fn plain(text: &str, inputs: Value) -> Value {
        evaluate(text, inputs, Value::Null, &Capabilities::default()).expect("evaluates")
    }

    #[test]
    fn lone_reference_keeps_its_type() {
        assert_eq!(plain("$(inputs.count)", json!({"count": 3})), json!(3));
        assert_eq!(plain("$(inputs.flags)", json!({"flags": [true, false]})), json!([true, false]));
        assert_eq!(plain("  $(inputs.count)  ", json!({"count": 3})), json!(3));
    }

    #[test]
    fn references_interpolate_into_text() {
        let inputs = json!({"sample": {"class": "File", "basename": "a.bam"}, "n": 2});
        assert_eq!(plain("$(inputs.sample.basename).bai", inputs.clone()), json!("a.bam.bai"));
        assert_eq!(plain("x=$(inputs.n), y=$(inputs.missing)", inputs), json!("x=2, y=null"));
    }

    #[test]
    fn bracket_and_index_segments() {
        let inputs = json!({"samples": [{"id": "s1"}, {"id": "s2"}], "odd key": "v"});
        assert_eq!(plain("$(inputs.samples[1].id)", inputs.clone()), json!("s2"));
        assert_eq!(plain("$(inputs['odd key'])", inputs.clone()), json!("v"));
        assert_eq!(plain("$(inputs[\"samples\"][0]['id'])", inputs), json!("s1"));
    }

    #[test]
    fn length_of_lists_and_strings() {
        let inputs = json!({"items": [1, 2, 3], "name": "abcd"});
        assert_eq!(plain("$(inputs.items.length)", inputs.clone()), json!(3));
        assert_eq!(plain("$(inputs.name.length)", inputs), json!(4));
    }

    #[test]
    fn self_and_runtime_roots() {
        let value = evaluate("$(self.nameroot)", json!({}), json!({"nameroot": "reads"}), &Capabilities::default()).expect("evaluates");
        assert_eq!(value, json!("reads"));
        assert_eq!(plain("$(runtime.outdir)/result.txt", json!({})), json!("/work/out/result.txt"));
        assert_eq!(plain("$(runtime.cores)", json!({})), json!(2));
    }

    #[test]
    fn literals_evaluate_to_themselves() {
        assert_eq!(plain("$(null)", json!({})), Value::Null);
        assert_eq!(plain("$(true)", json!({})), json!(true));
        assert_eq!(plain("$(42)", json!({})), json!(42));
        assert_eq!(plain("$('text')", json!({})), json!("text"));
    }

    #[test]
    fn escaped_references_stay_literal() {
        assert_eq!(plain("cost \\$(inputs.x)", json!({"x": 1})), json!("cost $(inputs.x)"));
        assert_eq!(unescape_literal("a\\$(b)"), "a$(b)");
        assert_eq!(unescape_literal("no escapes"), "no escapes");
    }

    #[test]
    fn reading_through_null_is_an_evaluation_error() {
        let error = evaluate("$(inputs.missing.path)", json!({}), Value::Null, &Capabilities::default()).expect_err("fails");
        assert!(matches!(error, ExpressionError::Evaluation { .. }));
    }

    #[test]
    fn script_bodies_need_the_scripting_requirement() {
        let without = evaluate("${ return 1; }", json!({}), Value::Null, &Capabilities::default()).expect_err("fails");
        assert!(matches!(without, ExpressionError::Evaluation { .. }));

        let scripting = Capabilities {
            javascript: true,
            expression_lib: Vec::new(),
        };
        let with = evaluate("${ return 1; }", json!({}), Value::Null, &scripting).expect_err("fails");
        assert!(matches!(with, ExpressionError::Unsupported { .. }));

        let operator = evaluate("$(inputs.a + 1)", json!({"a": 1}), Value::Null, &scripting).expect_err("fails");
        assert!(matches!(operator, ExpressionError::Unsupported { .. }));
    }

    #[test]
    fn nested_brackets_and_quotes_are_balanced() {
        let segments = split_segments("a $(inputs['x)'].y) b").expect("splits");
        assert_eq!(
            segments,
            vec![
                Segment::Text("a ".into()),
                Segment::Reference("inputs['x)'].y".into()),
                Segment::Text(" b".into())
            ]
        );
        assert!(split_segments("$(inputs.x").is_err());
    }

    #[test]
    fn capabilities_follow_the_effective_scope() {
        use weft_types::{InlineJavascriptRequirement, Requirement};
        let scope = RequirementScope::new(
            vec![Requirement::InlineJavascript(InlineJavascriptRequirement {
                expression_lib: vec!["function f() {}".into()],
            })],
            Vec::new(),
        );
        let capabilities = Capabilities::from_scope(&scope);
        assert!(capabilities.javascript);
        assert_eq!(capabilities.expression_lib.len(), 1);
        assert!(!Capabilities::from_scope(&RequirementScope::default()).javascript);
    }
}
