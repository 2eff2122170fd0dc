//! Types, bindings and secondary-file rules.

use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Map, Value};
use weft_types::{
    ArraySchema, CommandLineBinding, EnumSchema, OutputBinding, ParameterType, RecordField, RecordSchema, SecondaryFileRule, StringOrExpression,
    TypeUnion, contains_expression,
};

use super::{collection_entries, kind_of, optional_bool, optional_doc, optional_string, string_list};

/// Decodes a declared type: a name, an inline definition, or a list of alternatives.
pub(crate) fn decode_type_union(value: &Value) -> Result<TypeUnion> {
    let alternatives = match value {
        Value::Array(items) => {
            let mut alternatives = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                match item {
                    Value::Array(_) => bail!("type alternative {index} may not itself be a list"),
                    other => alternatives.push(decode_type(other).with_context(|| format!("while decoding type alternative {index}"))?),
                }
            }
            alternatives
        }
        other => vec![decode_type(other)?],
    };
    TypeUnion::new(alternatives).ok_or_else(|| anyhow!("a type union needs at least one alternative"))
}

/// Decodes one type alternative.
pub(crate) fn decode_type(value: &Value) -> Result<ParameterType> {
    match value {
        Value::String(name) => Ok(ParameterType::from_name(name.clone())),
        Value::Object(definition) => decode_inline_type(definition),
        other => bail!("a type must be a name or a map, found {}", kind_of(other)),
    }
}

fn decode_inline_type(definition: &Map<String, Value>) -> Result<ParameterType> {
    let type_value = definition.get("type").ok_or_else(|| anyhow!("inline type definition is missing 'type'"))?;
    let Some(kind) = type_value.as_str() else {
        // `{type: [..]}` or `{type: {...}}` wraps another definition.
        return decode_type(type_value);
    };
    let name = optional_string(definition, "name")?;
    let input_binding = decode_optional_binding(definition.get("inputBinding")).context("while decoding 'inputBinding'")?;

    match kind {
        "array" => {
            let items = definition.get("items").ok_or_else(|| anyhow!("array type is missing 'items'"))?;
            Ok(ParameterType::Array(Box::new(ArraySchema {
                name,
                items: decode_type_union(items).context("while decoding 'items'")?,
                input_binding,
            })))
        }
        "record" => Ok(ParameterType::Record(RecordSchema {
            name,
            fields: decode_fields(definition.get("fields")).context("while decoding 'fields'")?,
            input_binding,
        })),
        "enum" => Ok(ParameterType::Enum(EnumSchema {
            name,
            symbols: string_list(definition.get("symbols"))
                .context("while decoding 'symbols'")?
                .into_iter()
                .map(|symbol| short_symbol(&symbol).to_string())
                .collect(),
            input_binding,
        })),
        other => Ok(ParameterType::from_name(other.to_string())),
    }
}

/// `#main/mode/fast` becomes `fast`.
fn short_symbol(symbol: &str) -> &str {
    if symbol.contains('#') {
        symbol.rsplit(['#', '/']).next().unwrap_or(symbol)
    } else {
        symbol
    }
}

fn decode_fields(value: Option<&Value>) -> Result<Vec<RecordField>> {
    let entries = collection_entries(value, "name", "type")?;
    let mut fields = Vec::with_capacity(entries.len());
    for (index, (name, definition)) in entries.into_iter().enumerate() {
        let name = name.ok_or_else(|| anyhow!("record field {index} is missing 'name'"))?;
        let name = short_symbol(&name).to_string();
        let field_type = definition
            .get("type")
            .ok_or_else(|| anyhow!("record field '{name}' is missing 'type'"))
            .and_then(decode_type_union)
            .with_context(|| format!("while decoding field '{name}'"))?;
        fields.push(RecordField {
            input_binding: decode_optional_binding(definition.get("inputBinding")).with_context(|| format!("while decoding field '{name}'"))?,
            output_binding: decode_output_binding(definition.get("outputBinding")).with_context(|| format!("while decoding field '{name}'"))?,
            secondary_files: decode_secondary_files(definition.get("secondaryFiles"))?,
            label: optional_string(&definition, "label")?,
            doc: optional_doc(&definition)?,
            name,
            field_type,
        });
    }
    Ok(fields)
}

pub(crate) fn decode_optional_binding(value: Option<&Value>) -> Result<Option<CommandLineBinding>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(binding)) => decode_binding(binding).map(Some),
        Some(other) => bail!("a binding must be a map, found {}", kind_of(other)),
    }
}

pub(crate) fn decode_binding(binding: &Map<String, Value>) -> Result<CommandLineBinding> {
    let defaults = CommandLineBinding::default();
    let position = match binding.get("position") {
        None | Some(Value::Null) => defaults.position,
        Some(Value::Number(number)) => number
            .as_i64()
            .and_then(|position| i32::try_from(position).ok())
            .ok_or_else(|| anyhow!("'position' must be an integer, found {number}"))?,
        Some(Value::String(text)) if contains_expression(text) => bail!("expression-valued 'position' is not supported: {text}"),
        Some(Value::String(text)) => text
            .trim()
            .parse::<i32>()
            .map_err(|_| anyhow!("'position' must be an integer, found '{text}'"))?,
        Some(other) => bail!("'position' must be an integer, found {}", kind_of(other)),
    };

    let value_from = match binding.get("valueFrom") {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(StringOrExpression::parse(text.clone())),
        Some(other) => Some(StringOrExpression::Literal(other.to_string())),
    };

    Ok(CommandLineBinding {
        position,
        prefix: optional_string(binding, "prefix")?,
        separate: optional_bool(binding, "separate")?.unwrap_or(defaults.separate),
        item_separator: optional_string(binding, "itemSeparator")?,
        shell_quote: optional_bool(binding, "shellQuote")?.unwrap_or(defaults.shell_quote),
        value_from,
        load_contents: optional_bool(binding, "loadContents")?.unwrap_or(false),
    })
}

pub(crate) fn decode_output_binding(value: Option<&Value>) -> Result<Option<OutputBinding>> {
    let binding = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Object(binding)) => binding,
        Some(other) => bail!("'outputBinding' must be a map, found {}", kind_of(other)),
    };
    let glob = string_list(binding.get("glob"))
        .context("while decoding 'glob'")?
        .into_iter()
        .map(StringOrExpression::parse)
        .collect();
    Ok(Some(OutputBinding {
        glob,
        load_contents: optional_bool(binding, "loadContents")?.unwrap_or(false),
        output_eval: optional_string(binding, "outputEval")?,
    }))
}

/// Accepts a single rule or a list; each rule is a pattern string, an expression, or
/// `{pattern, required}`.
pub(crate) fn decode_secondary_files(value: Option<&Value>) -> Result<Vec<SecondaryFileRule>> {
    let items: Vec<&Value> = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single) => vec![single],
    };
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| decode_secondary_file(item).with_context(|| format!("while decoding secondary file rule {index}")))
        .collect()
}

fn decode_secondary_file(item: &Value) -> Result<SecondaryFileRule> {
    match item {
        Value::String(pattern) => Ok(rule_from_pattern(pattern.clone(), None)),
        Value::Object(rule) => {
            let pattern = optional_string(rule, "pattern")?.ok_or_else(|| anyhow!("secondary file rule is missing 'pattern'"))?;
            let required = match rule.get("required") {
                None | Some(Value::Null) => None,
                Some(Value::Bool(flag)) => Some(*flag),
                Some(Value::String(text)) if contains_expression(text) => bail!("expression-valued 'required' is not supported: {text}"),
                Some(other) => bail!("'required' must be a boolean, found {}", kind_of(other)),
            };
            Ok(rule_from_pattern(pattern, required))
        }
        other => bail!("a secondary file rule must be a string or a map, found {}", kind_of(other)),
    }
}

fn rule_from_pattern(pattern: String, required: Option<bool>) -> SecondaryFileRule {
    if contains_expression(&pattern) {
        SecondaryFileRule::Expression {
            expression: pattern,
            required,
        }
    } else {
        SecondaryFileRule::Pattern { pattern, required }
    }
}
