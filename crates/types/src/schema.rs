//! Parameter type model.
//!
//! A declared type is an ordered union of alternatives ([`TypeUnion`]). Each alternative
//! is either a scalar name written in the document (including the `T[]` / `T?` suffix
//! forms, kept verbatim), an inline array/record/enum definition, or a reference to a
//! named type declared by a schema-definition requirement.

use serde::Serialize;

use crate::binding::{CommandLineBinding, OutputBinding};
use crate::parameter::SecondaryFileRule;

/// Scalar type names understood natively. Any other name is a forward reference.
pub const PRIMITIVE_TYPES: &[&str] = &[
    "null",
    "boolean",
    "int",
    "long",
    "float",
    "double",
    "string",
    "File",
    "Directory",
    "Any",
    "stdout",
    "stderr",
];

/// One alternative of a parameter's declared type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    /// Scalar name exactly as written, suffixes included (`File`, `string[]`, `int?`).
    Scalar(String),
    Array(Box<ArraySchema>),
    Record(RecordSchema),
    Enum(EnumSchema),
    /// Name of a schema-declared type, suffixes included (`#Sample`, `Sample[]`).
    Reference(String),
}

/// Decomposition of a suffixed type literal such as `File[]?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiteralShape<'a> {
    pub base: &'a str,
    pub array: bool,
    pub optional: bool,
}

impl<'a> LiteralShape<'a> {
    /// Splits `T`, `T[]`, `T?` and `T[]?` into the base name and its modifiers.
    pub fn parse(literal: &'a str) -> Self {
        let (rest, optional) = match literal.strip_suffix('?') {
            Some(rest) => (rest, true),
            None => (literal, false),
        };
        let (base, array) = match rest.strip_suffix("[]") {
            Some(base) => (base, true),
            None => (rest, false),
        };
        Self { base, array, optional }
    }
}

impl ParameterType {
    /// Builds the alternative for a name found in a document, classifying it as a scalar
    /// or a forward reference by its base name.
    pub fn from_name(name: impl Into<String>) -> Self {
        let name = name.into();
        let shape = LiteralShape::parse(&name);
        if PRIMITIVE_TYPES.contains(&shape.base) {
            Self::Scalar(name)
        } else {
            Self::Reference(name)
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Scalar(name) if name == "null")
    }

    /// True for `T?` literals, which admit `null` on their own.
    pub fn is_optional_literal(&self) -> bool {
        match self {
            Self::Scalar(name) | Self::Reference(name) => LiteralShape::parse(name).optional,
            _ => false,
        }
    }

    /// Binding attached to an inline array/record/enum definition.
    pub fn inline_binding(&self) -> Option<&CommandLineBinding> {
        match self {
            Self::Array(array) => array.input_binding.as_ref(),
            Self::Record(record) => record.input_binding.as_ref(),
            Self::Enum(enumeration) => enumeration.input_binding.as_ref(),
            Self::Scalar(_) | Self::Reference(_) => None,
        }
    }

    /// Declared name of an inline definition, when it has one.
    pub fn schema_name(&self) -> Option<&str> {
        match self {
            Self::Array(array) => array.name.as_deref(),
            Self::Record(record) => record.name.as_deref(),
            Self::Enum(enumeration) => enumeration.name.as_deref(),
            Self::Scalar(_) | Self::Reference(_) => None,
        }
    }

    /// Human-readable rendering used in diagnostics.
    pub fn display_name(&self) -> String {
        match self {
            Self::Scalar(name) | Self::Reference(name) => name.clone(),
            Self::Array(array) => format!("array<{}>", array.items.display_name()),
            Self::Record(record) => record.name.clone().unwrap_or_else(|| "record".to_string()),
            Self::Enum(enumeration) => enumeration.name.clone().unwrap_or_else(|| "enum".to_string()),
        }
    }
}

/// Ordered, non-empty list of type alternatives.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TypeUnion(Vec<ParameterType>);

impl TypeUnion {
    /// Returns `None` for an empty list; a declared type always has at least one alternative.
    pub fn new(alternatives: Vec<ParameterType>) -> Option<Self> {
        if alternatives.is_empty() { None } else { Some(Self(alternatives)) }
    }

    pub fn single(alternative: ParameterType) -> Self {
        Self(vec![alternative])
    }

    pub fn alternatives(&self) -> &[ParameterType] {
        &self.0
    }

    pub fn first(&self) -> &ParameterType {
        &self.0[0]
    }

    /// A union admits `null` when it lists `null` or any `T?` alternative.
    pub fn is_optional(&self) -> bool {
        self.0.iter().any(|alternative| alternative.is_null() || alternative.is_optional_literal())
    }

    /// True when any alternative names the given scalar (suffixes ignored).
    pub fn mentions_scalar(&self, scalar: &str) -> bool {
        self.0.iter().any(|alternative| match alternative {
            ParameterType::Scalar(name) => LiteralShape::parse(name).base == scalar,
            _ => false,
        })
    }

    pub fn display_name(&self) -> String {
        let names: Vec<String> = self.0.iter().map(ParameterType::display_name).collect();
        names.join(" | ")
    }
}

/// Inline `{type: array, items: ...}` definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArraySchema {
    pub name: Option<String>,
    pub items: TypeUnion,
    /// Binding applied to each element (per-element prefix, separators).
    pub input_binding: Option<CommandLineBinding>,
}

/// Inline `{type: record, fields: ...}` definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordSchema {
    pub name: Option<String>,
    pub fields: Vec<RecordField>,
    pub input_binding: Option<CommandLineBinding>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordField {
    pub name: String,
    pub field_type: TypeUnion,
    pub input_binding: Option<CommandLineBinding>,
    pub output_binding: Option<OutputBinding>,
    pub secondary_files: Vec<SecondaryFileRule>,
    pub label: Option<String>,
    pub doc: Option<String>,
}

/// Inline `{type: enum, symbols: ...}` definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnumSchema {
    pub name: Option<String>,
    pub symbols: Vec<String>,
    pub input_binding: Option<CommandLineBinding>,
}
