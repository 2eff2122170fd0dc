//! Input and output parameter declarations.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::binding::{CommandLineBinding, OutputBinding};
use crate::schema::TypeUnion;

/// A declared default, tagged with the shape it was written in.
///
/// Defaults are never checked against the parameter's type at decode time; they are
/// flattened exactly like a provided value once resolution binds them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DefaultValue {
    Map(Map<String, Value>),
    List(Vec<Value>),
    Scalar(Value),
}

impl DefaultValue {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Map(map),
            Value::Array(items) => Self::List(items),
            scalar => Self::Scalar(scalar),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Map(map) => Value::Object(map.clone()),
            Self::List(items) => Value::Array(items.clone()),
            Self::Scalar(scalar) => scalar.clone(),
        }
    }

    pub fn shape(&self) -> &'static str {
        match self {
            Self::Map(_) => "map",
            Self::List(_) => "list",
            Self::Scalar(_) => "scalar",
        }
    }
}

/// Rule naming a file that travels alongside a primary File value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondaryFileRule {
    /// Suffix pattern; each leading `^` strips one extension from the primary basename.
    Pattern { pattern: String, required: Option<bool> },
    /// Expression evaluated with `self` bound to the primary File.
    Expression { expression: String, required: Option<bool> },
}

impl SecondaryFileRule {
    pub fn required(&self) -> Option<bool> {
        match self {
            Self::Pattern { required, .. } | Self::Expression { required, .. } => *required,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputParameter {
    pub id: String,
    pub param_type: TypeUnion,
    pub input_binding: Option<CommandLineBinding>,
    pub default: Option<DefaultValue>,
    pub secondary_files: Vec<SecondaryFileRule>,
    pub format: Option<String>,
    pub label: Option<String>,
    pub doc: Option<String>,
    /// Parameter-level `loadContents` (v1.1+), equivalent to the binding flag.
    pub load_contents: bool,
    pub streamable: bool,
}

impl InputParameter {
    /// An input may be left unbound when its type admits `null`.
    pub fn is_optional(&self) -> bool {
        self.param_type.is_optional()
    }

    pub fn wants_contents(&self) -> bool {
        self.load_contents || self.input_binding.as_ref().is_some_and(|binding| binding.load_contents)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputParameter {
    pub id: String,
    pub param_type: TypeUnion,
    pub output_binding: Option<OutputBinding>,
    pub secondary_files: Vec<SecondaryFileRule>,
    pub format: Option<String>,
    pub label: Option<String>,
    pub doc: Option<String>,
    /// Workflow outputs only: the step outputs this parameter is wired from.
    pub output_source: Vec<String>,
    pub streamable: bool,
}

impl OutputParameter {
    pub fn is_optional(&self) -> bool {
        self.param_type.is_optional()
    }
}
