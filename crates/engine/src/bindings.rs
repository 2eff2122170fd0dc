//! # Binding Flattening and Ordering
//!
//! Turns bound values into command-line tokens.
//!
//! Ordering works on sort keys shared by arguments, inputs and record fields:
//! negative positions first, then the block of items without a binding in declaration
//! order, then non-negative positions. Ties keep declaration order.
//!
//! Flattening follows the value's matched type alternative:
//!
//! | value | tokens |
//! |---|---|
//! | `null`, `false`, `[]` | none |
//! | `true` | the prefix alone |
//! | scalar, enum symbol | prefix + rendered value |
//! | File / Directory | prefix + path |
//! | array with `itemSeparator` | prefix + one joined token |
//! | array | prefix once, then each element with the array's own element binding |
//! | record | prefix, then each field ordered by its own binding |

use std::cmp::Ordering;

use serde_json::Value;
use weft_types::value::{is_directory, is_file, path_of};
use weft_types::{CommandLineBinding, EnumSchema, LiteralShape, ParameterType, RecordSchema, SchemaDefRequirement, TypeUnion};

use crate::error::{EngineError, EngineResult};
use crate::executor::CommandToken;
use crate::expression::format_json_value;

/// Position class and declaration index used to order bound items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SortKey {
    group: u8,
    position: i32,
    index: usize,
}

impl SortKey {
    pub fn new(binding: Option<&CommandLineBinding>, index: usize) -> Self {
        match binding {
            Some(binding) if binding.position < 0 => Self {
                group: 0,
                position: binding.position,
                index,
            },
            None => Self { group: 1, position: 0, index },
            Some(binding) => Self {
                group: 2,
                position: binding.position,
                index,
            },
        }
    }

    /// Negative-position items render before the base command's remainder.
    pub fn is_prior(&self) -> bool {
        self.group == 0
    }

    pub fn position(&self) -> Option<i32> {
        (self.group != 1).then_some(self.position)
    }
}

/// Tokens of one argument, input or field together with their sort key.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedTokens {
    pub key: SortKey,
    pub tokens: Vec<CommandToken>,
}

/// Stable sort by key, then concatenation.
pub fn order_and_concat(mut items: Vec<OrderedTokens>) -> Vec<CommandToken> {
    items.sort_by(|left, right| left.key.cmp(&right.key));
    debug_assert!(is_ordered(&items.iter().map(|item| item.key).collect::<Vec<_>>()));
    items.into_iter().flat_map(|item| item.tokens).collect()
}

/// Splits ordered items into the prior block (negative positions) and the rest.
pub fn split_priors(items: Vec<OrderedTokens>) -> (Vec<OrderedTokens>, Vec<OrderedTokens>) {
    items.into_iter().partition(|item| item.key.is_prior())
}

/// Declared type used to interpret a value.
#[derive(Debug, Clone, Copy)]
pub enum TypeRef<'t> {
    Union(&'t TypeUnion),
    Single(&'t ParameterType),
    /// Base name taken from a suffixed literal (`Sample` out of `Sample[]`).
    Name(&'t str),
}

/// Type alternative a value was matched against.
#[derive(Debug, Clone, Copy)]
enum Matched<'t> {
    Array {
        items: Option<TypeRef<'t>>,
        element_binding: Option<&'t CommandLineBinding>,
    },
    Record(&'t RecordSchema),
    Enum(&'t EnumSchema),
    Plain,
}

impl<'t> Matched<'t> {
    /// Shape-only interpretation used when no declared alternative accepts the value.
    fn by_shape(value: &Value) -> Self {
        match value {
            Value::Array(_) => Self::Array {
                items: None,
                element_binding: None,
            },
            _ => Self::Plain,
        }
    }

    fn inline_binding(&self) -> Option<&'t CommandLineBinding> {
        match self {
            Self::Record(record) => record.input_binding.as_ref(),
            Self::Enum(enumeration) => enumeration.input_binding.as_ref(),
            Self::Array { .. } | Self::Plain => None,
        }
    }
}

/// Evaluates a binding's `valueFrom` with `self` bound to the value being flattened.
pub trait ValueFromEvaluator {
    fn value_from(&self, binding: &CommandLineBinding, self_value: &Value) -> EngineResult<Value>;
}

/// Flattens values into tokens for one document root.
pub struct Flattener<'a> {
    root_id: &'a str,
    schema: Option<&'a SchemaDefRequirement>,
    evaluator: &'a dyn ValueFromEvaluator,
}

impl<'a> Flattener<'a> {
    pub fn new(root_id: &'a str, schema: Option<&'a SchemaDefRequirement>, evaluator: &'a dyn ValueFromEvaluator) -> Self {
        Self { root_id, schema, evaluator }
    }

    /// Flattens one bound item: applies `valueFrom`, matches the type, renders tokens.
    ///
    /// Without a binding the value is appended raw: no prefix, no `valueFrom`.
    pub fn flatten(&self, value: &Value, declared: Option<TypeRef<'_>>, binding: Option<&CommandLineBinding>) -> EngineResult<Vec<CommandToken>> {
        if let Some(binding) = binding
            && binding.value_from.is_some()
        {
            // The transformed value is rendered by its own shape.
            let transformed = self.evaluator.value_from(binding, value)?;
            return self.render(&transformed, Matched::by_shape(&transformed), Some(binding));
        }

        let matched = match declared {
            Some(declared) => self.match_type(declared, value)?,
            None => None,
        }
        .unwrap_or_else(|| Matched::by_shape(value));
        let binding = binding.or_else(|| matched.inline_binding());
        self.render(value, matched, binding)
    }

    fn render(&self, value: &Value, matched: Matched<'_>, binding: Option<&CommandLineBinding>) -> EngineResult<Vec<CommandToken>> {
        let quote = binding.is_none_or(|binding| binding.shell_quote);
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Bool(true) if binding.is_some() => Ok(prefix_token(binding, quote).into_iter().collect()),
            Value::Bool(false) if binding.is_some() => Ok(Vec::new()),
            Value::Array(items) => self.render_array(items, matched, binding, quote),
            Value::Object(_) if is_file(value) || is_directory(value) => {
                let path = path_of(value).ok_or_else(|| EngineError::InvalidWorkflow {
                    root: self.root_id.to_string(),
                    message: format!("{} value without a location or path", if is_file(value) { "File" } else { "Directory" }),
                })?;
                Ok(with_prefix(binding, path.to_string(), quote))
            }
            Value::Object(fields) => match matched {
                Matched::Record(record) => self.render_record(fields, record, binding, quote),
                _ => Ok(with_prefix(binding, value.to_string(), quote)),
            },
            scalar => Ok(with_prefix(binding, format_json_value(scalar), quote)),
        }
    }

    fn render_array(&self, items: &[Value], matched: Matched<'_>, binding: Option<&CommandLineBinding>, quote: bool) -> EngineResult<Vec<CommandToken>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let (element_type, element_binding) = match matched {
            Matched::Array { items, element_binding } => (items, element_binding),
            _ => (None, None),
        };

        if let Some(separator) = binding.and_then(|binding| binding.item_separator.as_deref()) {
            let rendered: Vec<String> = items.iter().map(render_scalar).collect();
            return Ok(with_prefix(binding, rendered.join(separator), quote));
        }

        let mut tokens: Vec<CommandToken> = prefix_token(binding, quote).into_iter().collect();
        for item in items {
            tokens.extend(self.flatten(item, element_type, element_binding)?);
        }
        Ok(tokens)
    }

    fn render_record(
        &self,
        fields: &serde_json::Map<String, Value>,
        record: &RecordSchema,
        binding: Option<&CommandLineBinding>,
        quote: bool,
    ) -> EngineResult<Vec<CommandToken>> {
        let mut ordered = Vec::with_capacity(record.fields.len());
        for (index, field) in record.fields.iter().enumerate() {
            let field_value = fields.get(&field.name).unwrap_or(&Value::Null);
            ordered.push(OrderedTokens {
                key: SortKey::new(field.input_binding.as_ref(), index),
                tokens: self.flatten(field_value, Some(TypeRef::Union(&field.field_type)), field.input_binding.as_ref())?,
            });
        }
        let mut tokens: Vec<CommandToken> = prefix_token(binding, quote).into_iter().collect();
        tokens.extend(order_and_concat(ordered));
        Ok(tokens)
    }

    fn match_type<'t>(&self, declared: TypeRef<'t>, value: &Value) -> EngineResult<Option<Matched<'t>>>
    where
        'a: 't,
    {
        match declared {
            TypeRef::Union(union) => {
                for alternative in union.alternatives() {
                    if let Some(matched) = self.match_single(alternative, value)? {
                        return Ok(Some(matched));
                    }
                }
                Ok(None)
            }
            TypeRef::Single(alternative) => self.match_single(alternative, value),
            TypeRef::Name(name) => self.match_name(name, value),
        }
    }

    fn match_single<'t>(&self, alternative: &'t ParameterType, value: &Value) -> EngineResult<Option<Matched<'t>>>
    where
        'a: 't,
    {
        Ok(match alternative {
            ParameterType::Scalar(name) | ParameterType::Reference(name) => return self.match_name(name, value),
            ParameterType::Array(array) if value.is_array() => Some(Matched::Array {
                items: Some(TypeRef::Union(&array.items)),
                element_binding: array.input_binding.as_ref(),
            }),
            ParameterType::Record(record) if value.is_object() && !is_file(value) && !is_directory(value) => Some(Matched::Record(record)),
            ParameterType::Enum(enumeration) => match value.as_str() {
                Some(symbol) if enumeration.symbols.iter().any(|declared| declared == symbol) => Some(Matched::Enum(enumeration)),
                _ => None,
            },
            _ => None,
        })
    }

    fn match_name<'t>(&self, name: &'t str, value: &Value) -> EngineResult<Option<Matched<'t>>>
    where
        'a: 't,
    {
        let shape = LiteralShape::parse(name);
        if value.is_null() {
            let accepts_null = shape.optional || shape.base == "null";
            return Ok(accepts_null.then_some(Matched::Plain));
        }
        if shape.array {
            return Ok(value.is_array().then_some(Matched::Array {
                items: Some(TypeRef::Name(shape.base)),
                element_binding: None,
            }));
        }

        let accepted = match shape.base {
            "null" => false,
            "boolean" => value.is_boolean(),
            "int" | "long" => value.is_i64() || value.is_u64(),
            "float" | "double" => value.is_number(),
            "string" => value.is_string(),
            "File" | "stdout" | "stderr" => is_file(value),
            "Directory" => is_directory(value),
            "Any" => true,
            reference => {
                let resolved = self.lookup(reference)?;
                return self.match_single(resolved, value);
            }
        };
        Ok(accepted.then_some(Matched::Plain))
    }

    fn lookup(&self, reference: &str) -> EngineResult<&'a ParameterType> {
        self.schema.and_then(|schema| schema.lookup(reference)).ok_or_else(|| EngineError::InvalidWorkflow {
            root: self.root_id.to_string(),
            message: format!("type '{reference}' is not declared by any schema definition in scope"),
        })
    }
}

fn prefix_token(binding: Option<&CommandLineBinding>, quote: bool) -> Option<CommandToken> {
    binding
        .and_then(|binding| binding.prefix.as_ref())
        .map(|prefix| CommandToken::new(prefix.clone(), quote))
}

/// Prefix and value as two tokens, or one concatenated token when not separate.
fn with_prefix(binding: Option<&CommandLineBinding>, text: String, quote: bool) -> Vec<CommandToken> {
    match binding.and_then(|binding| binding.prefix.as_ref().map(|prefix| (prefix, binding.separate))) {
        None => vec![CommandToken::new(text, quote)],
        Some((prefix, true)) => vec![CommandToken::new(prefix.clone(), quote), CommandToken::new(text, quote)],
        Some((prefix, false)) => vec![CommandToken::new(format!("{prefix}{text}"), quote)],
    }
}

/// Text of one element joined by an item separator.
fn render_scalar(value: &Value) -> String {
    if (is_file(value) || is_directory(value))
        && let Some(path) = path_of(value)
    {
        return path.to_string();
    }
    format_json_value(value)
}

/// Checks the ordering invariant over a sequence of keys.
pub fn is_ordered(keys: &[SortKey]) -> bool {
    keys.windows(2).all(|pair| pair[0].cmp(&pair[1]) != Ordering::Greater)
}
