//! Error types surfaced by the engine.

use std::path::PathBuf;

use thiserror::Error;

/// Failure to turn a parsed tree into a document model.
///
/// Always wraps its root cause; the `source` chain carries the path of keys that led to
/// the offending value.
#[derive(Debug, Error)]
#[error("failed to decode document{}: {source:#}", .document.as_deref().map(|name| format!(" '{name}'")).unwrap_or_default())]
pub struct DecodeError {
    /// File name or identifier of the document, when known.
    pub document: Option<String>,
    #[source]
    pub source: anyhow::Error,
}

impl DecodeError {
    pub fn new(document: Option<String>, source: anyhow::Error) -> Self {
        Self { document, source }
    }
}

/// Failure reported by an expression evaluator.
#[derive(Debug, Error)]
pub enum ExpressionError {
    #[error("expression '{expression}' could not be evaluated: {message}")]
    Evaluation { expression: String, message: String },

    #[error("expression '{expression}' requires a scripting engine, which this evaluator does not provide")]
    Unsupported { expression: String },
}

/// Errors raised while resolving a document into commands or collecting outputs.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("missing required input '{input}' for '{root}'")]
    MissingInput { root: String, input: String },

    #[error("unsupported construct: {0}")]
    Unsupported(String),

    #[error("expression error in {location}: {source}")]
    Expression {
        location: String,
        #[source]
        source: ExpressionError,
    },

    #[error("invalid scatter on step '{step}': {message}")]
    InvalidScatter { step: String, message: String },

    #[error("invalid workflow '{root}': {message}")]
    InvalidWorkflow { root: String, message: String },

    #[error("missing output '{output}': {message}")]
    MissingOutput { output: String, message: String },

    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub fn expression(location: impl Into<String>, source: ExpressionError) -> Self {
        match source {
            // Keep the unsupported marker catchable as its own variant.
            ExpressionError::Unsupported { expression } => {
                Self::Unsupported(format!("{} uses a script expression: {expression}", location.into()))
            }
            other => Self::Expression {
                location: location.into(),
                source: other,
            },
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn decode_error_names_document_and_cause_chain() {
        let cause = anyhow!("expected a list or map").context("while decoding 'inputs'");
        let error = DecodeError::new(Some("tool.cwl".into()), cause);
        let message = error.to_string();
        assert!(message.contains("'tool.cwl'"));
        assert!(message.contains("while decoding 'inputs'"));
        assert!(message.contains("expected a list or map"));
    }

    #[test]
    fn unsupported_expressions_map_to_the_unsupported_variant() {
        let error = EngineError::expression(
            "argument 0",
            ExpressionError::Unsupported {
                expression: "${ return 1; }".into(),
            },
        );
        assert!(error.is_unsupported());

        let error = EngineError::expression(
            "argument 0",
            ExpressionError::Evaluation {
                expression: "$(inputs.x)".into(),
                message: "no input".into(),
            },
        );
        assert!(!error.is_unsupported());
    }
}
