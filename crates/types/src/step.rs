//! Workflow steps.

use serde::Serialize;

use crate::document::DocumentRoot;
use crate::parameter::DefaultValue;
use crate::requirement::{Requirement, RequirementScope};

/// One node of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowStep {
    pub id: String,
    pub inputs: Vec<StepInput>,
    /// Output ids the step exposes to its siblings.
    pub outputs: Vec<String>,
    pub run: RunTarget,
    /// Step input ids fanned out over their array values.
    pub scatter: Vec<String>,
    pub scatter_method: Option<ScatterMethod>,
    pub requirements: Vec<Requirement>,
    pub hints: Vec<Requirement>,
    /// Conditional execution expression (v1.2).
    pub when: Option<String>,
    pub label: Option<String>,
    pub doc: Option<String>,
}

impl WorkflowStep {
    pub fn input(&self, id: &str) -> Option<&StepInput> {
        self.inputs.iter().find(|input| input.id == id)
    }

    pub fn requirement_scope(&self) -> RequirementScope {
        RequirementScope::new(self.requirements.clone(), self.hints.clone())
    }

    /// Method in effect: an explicit method, or dot-product for a single scatter variable.
    pub fn effective_scatter_method(&self) -> Option<ScatterMethod> {
        match (self.scatter.len(), self.scatter_method) {
            (0, _) => None,
            (_, Some(method)) => Some(method),
            (1, None) => Some(ScatterMethod::DotProduct),
            (_, None) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepInput {
    pub id: String,
    /// Workflow input ids or `step/output` references, in declared order.
    pub source: Vec<String>,
    pub link_merge: Option<LinkMerge>,
    pub value_from: Option<String>,
    pub default: Option<DefaultValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkMerge {
    MergeNested,
    MergeFlattened,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScatterMethod {
    DotProduct,
    NestedCrossProduct,
    FlatCrossProduct,
}

/// What a step runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTarget {
    /// External document reference, resolved by the runner.
    Reference(String),
    /// Document written inline; owned exclusively by this step.
    Inline(Box<DocumentRoot>),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(scatter: &[&str], method: Option<ScatterMethod>) -> WorkflowStep {
        WorkflowStep {
            id: "align".into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            run: RunTarget::Reference("align.cwl".into()),
            scatter: scatter.iter().map(|name| name.to_string()).collect(),
            scatter_method: method,
            requirements: Vec::new(),
            hints: Vec::new(),
            when: None,
            label: None,
            doc: None,
        }
    }

    #[test]
    fn single_scatter_variable_implies_dot_product() {
        assert_eq!(step(&["reads"], None).effective_scatter_method(), Some(ScatterMethod::DotProduct));
    }

    #[test]
    fn multiple_variables_need_an_explicit_method() {
        assert_eq!(step(&["a", "b"], None).effective_scatter_method(), None);
        assert_eq!(
            step(&["a", "b"], Some(ScatterMethod::FlatCrossProduct)).effective_scatter_method(),
            Some(ScatterMethod::FlatCrossProduct)
        );
        assert_eq!(step(&[], None).effective_scatter_method(), None);
    }
}
