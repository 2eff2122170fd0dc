//! Document roots.

use indexmap::IndexMap;
use serde::Serialize;

use crate::binding::{CommandLineBinding, StringOrExpression};
use crate::parameter::{InputParameter, OutputParameter};
use crate::requirement::{Requirement, RequirementScope};
use crate::step::WorkflowStep;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DocumentClass {
    CommandLineTool,
    Workflow,
    ExpressionTool,
}

impl DocumentClass {
    pub fn parse(class: &str) -> Option<Self> {
        match class {
            "CommandLineTool" => Some(Self::CommandLineTool),
            "Workflow" => Some(Self::Workflow),
            "ExpressionTool" => Some(Self::ExpressionTool),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CommandLineTool => "CommandLineTool",
            Self::Workflow => "Workflow",
            Self::ExpressionTool => "ExpressionTool",
        }
    }
}

/// Member of a tool's `arguments` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Argument {
    Literal(String),
    Binding(CommandLineBinding),
}

impl Argument {
    pub fn binding(&self) -> Option<&CommandLineBinding> {
        match self {
            Self::Literal(_) => None,
            Self::Binding(binding) => Some(binding),
        }
    }
}

/// Which of the mutually dominant shapes a root takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentShape {
    Steps,
    Expression,
    Command,
    /// A tool with neither base command nor arguments; tokens come from bound inputs only.
    BoundInputsOnly,
}

/// One tool, workflow or expression-tool definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentRoot {
    /// Set for `$graph` entries and documents that declare one.
    pub id: Option<String>,
    pub class: DocumentClass,
    pub cwl_version: Option<String>,
    pub label: Option<String>,
    pub doc: Option<String>,
    pub namespaces: IndexMap<String, String>,
    pub schemas: Vec<String>,
    pub base_command: Vec<String>,
    pub arguments: Vec<Argument>,
    pub inputs: Vec<InputParameter>,
    pub outputs: Vec<OutputParameter>,
    pub requirements: Vec<Requirement>,
    pub hints: Vec<Requirement>,
    pub steps: Vec<WorkflowStep>,
    pub stdin: Option<StringOrExpression>,
    pub stdout: Option<StringOrExpression>,
    pub stderr: Option<StringOrExpression>,
    /// Expression-tool body.
    pub expression: Option<String>,
    pub success_codes: Vec<i32>,
    pub temporary_fail_codes: Vec<i32>,
    pub permanent_fail_codes: Vec<i32>,
}

impl DocumentRoot {
    /// Empty root of the given class, used as a starting point by the decoder and tests.
    pub fn new(class: DocumentClass) -> Self {
        Self {
            id: None,
            class,
            cwl_version: None,
            label: None,
            doc: None,
            namespaces: IndexMap::new(),
            schemas: Vec::new(),
            base_command: Vec::new(),
            arguments: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            requirements: Vec::new(),
            hints: Vec::new(),
            steps: Vec::new(),
            stdin: None,
            stdout: None,
            stderr: None,
            expression: None,
            success_codes: Vec::new(),
            temporary_fail_codes: Vec::new(),
            permanent_fail_codes: Vec::new(),
        }
    }

    pub fn input(&self, id: &str) -> Option<&InputParameter> {
        self.inputs.iter().find(|input| input.id == id)
    }

    pub fn output(&self, id: &str) -> Option<&OutputParameter> {
        self.outputs.iter().find(|output| output.id == id)
    }

    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|step| step.id == id)
    }

    pub fn requirement_scope(&self) -> RequirementScope {
        RequirementScope::new(self.requirements.clone(), self.hints.clone())
    }

    pub fn shape(&self) -> DocumentShape {
        if !self.steps.is_empty() {
            DocumentShape::Steps
        } else if self.expression.as_deref().is_some_and(|body| !body.trim().is_empty()) {
            DocumentShape::Expression
        } else if !self.base_command.is_empty() || !self.arguments.is_empty() {
            DocumentShape::Command
        } else {
            DocumentShape::BoundInputsOnly
        }
    }

    /// Identifier used in diagnostics when the root has none.
    pub fn display_id(&self) -> &str {
        self.id.as_deref().unwrap_or("main")
    }
}

/// Result of decoding one document: a single root, or several sharing one `$graph`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub cwl_version: Option<String>,
    pub namespaces: IndexMap<String, String>,
    pub schemas: Vec<String>,
    pub roots: Vec<DocumentRoot>,
    /// True when the roots came from a multi-definition marker.
    pub graph: bool,
}

impl Document {
    pub fn single(root: DocumentRoot) -> Self {
        Self {
            cwl_version: root.cwl_version.clone(),
            namespaces: root.namespaces.clone(),
            schemas: root.schemas.clone(),
            roots: vec![root],
            graph: false,
        }
    }

    pub fn root(&self, id: &str) -> Option<&DocumentRoot> {
        let wanted = id.trim_start_matches('#');
        self.roots.iter().find(|root| root.id.as_deref() == Some(wanted))
    }

    /// Entry point: the root named `main`, otherwise the first root.
    pub fn main_root(&self) -> Option<&DocumentRoot> {
        self.root("main").or_else(|| self.roots.first())
    }
}
