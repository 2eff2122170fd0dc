//! Command-line and output bindings.
//!
//! A binding describes how a value lands on a command line (`inputBinding`) or how an
//! output is collected after execution (`outputBinding`). Strings that may carry embedded
//! expressions are classified once, at decode time, as [`StringOrExpression`].

use serde::Serialize;

/// A string field that is either a plain literal or an embedded expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StringOrExpression {
    /// Text used verbatim.
    Literal(String),
    /// Text containing at least one `$(...)` or `${...}` that must be evaluated.
    Expression(String),
}

impl StringOrExpression {
    /// Classifies raw text by scanning it for unescaped expression markers.
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        if contains_expression(&raw) {
            Self::Expression(raw)
        } else {
            Self::Literal(raw)
        }
    }

    /// Returns the underlying text regardless of classification.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Literal(text) | Self::Expression(text) => text,
        }
    }

    pub fn is_expression(&self) -> bool {
        matches!(self, Self::Expression(_))
    }
}

/// Reports whether `text` contains an unescaped `$(` or `${` marker.
pub fn contains_expression(text: &str) -> bool {
    let bytes = text.as_bytes();
    let mut index = 0;
    while index + 1 < bytes.len() {
        match bytes[index] {
            b'\\' => index += 2,
            b'$' if bytes[index + 1] == b'(' || bytes[index + 1] == b'{' => return true,
            _ => index += 1,
        }
    }
    false
}

/// How a value is rendered onto the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandLineBinding {
    /// Sort key; negative positions render ahead of everything else.
    pub position: i32,
    /// Token emitted before the value (`-o`, `--threads=`).
    pub prefix: Option<String>,
    /// When false the prefix and the value are concatenated into a single token.
    pub separate: bool,
    /// Joins array elements into one token when present.
    pub item_separator: Option<String>,
    /// When false the rendered token must not be escaped when run through a shell.
    pub shell_quote: bool,
    /// Replaces the bound value before rendering.
    pub value_from: Option<StringOrExpression>,
    /// Reads up to 64 KiB of a File value into its `contents` field before rendering.
    pub load_contents: bool,
}

impl Default for CommandLineBinding {
    fn default() -> Self {
        Self {
            position: 0,
            prefix: None,
            separate: true,
            item_separator: None,
            shell_quote: true,
            value_from: None,
            load_contents: false,
        }
    }
}

/// How an output value is collected from a finished execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct OutputBinding {
    /// Glob patterns relative to the output directory; each may be an expression.
    pub glob: Vec<StringOrExpression>,
    pub load_contents: bool,
    /// Expression whose result replaces the matched files.
    pub output_eval: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_parameter_references_and_bodies() {
        assert!(contains_expression("$(inputs.file.path)"));
        assert!(contains_expression("prefix-${ return 1; }"));
        assert!(!contains_expression("plain text"));
        assert!(!contains_expression("costs $5"));
    }

    #[test]
    fn escaped_markers_are_literal() {
        assert!(!contains_expression("\\$(not.an.expression)"));
        assert_eq!(StringOrExpression::parse("\\$(x)"), StringOrExpression::Literal("\\$(x)".into()));
    }

    #[test]
    fn binding_defaults_match_language_defaults() {
        let binding = CommandLineBinding::default();
        assert_eq!(binding.position, 0);
        assert!(binding.separate);
        assert!(binding.shell_quote);
        assert!(binding.prefix.is_none());
    }
}
