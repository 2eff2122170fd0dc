//! # Resolver
//!
//! Turns a decoded [`Document`] and one parameter binding into runnable [`Command`]s.
//!
//! Resolution walks the document tree without executing anything:
//!
//! - a command-line tool binds its inputs, flattens arguments and inputs into ordered
//!   tokens, and yields one [`Command`]
//! - an expression tool is evaluated on the spot and yields values, not commands
//! - a workflow orders its steps by their sources, feeds each step from workflow inputs
//!   and *predicted* upstream outputs, expands scatters, and recurses into each run target
//!
//! The document is only ever borrowed. Every root invocation and every scatter instance
//! binds into its own map, so nothing resolved for one instance leaks into another.

use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{debug, info};
use weft_types::{Document, DocumentClass, DocumentRoot, RequirementScope, RunTarget, WorkflowStep};

use crate::config::ResolverConfig;
use crate::error::{EngineError, EngineResult};
use crate::expression::{ExpressionEvaluator, ParameterReferenceEvaluator};

pub mod scatter;
pub mod staging;
pub mod types;
mod tool;
mod workflow;

pub use staging::{LocalStager, NoopStager, StagedContent, StagedEntry, Stager};
pub use types::{Command, CommandToken, Resolution, Resources};

/// Nesting limit for run targets, guarding against self-referencing documents.
const MAX_DEPTH: usize = 64;

/// Parameter values bound for one root invocation or one scatter instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingContext {
    pub inputs: Map<String, Value>,
}

/// Loads documents named by a step's `run` reference.
pub trait RunLoader {
    fn load(&self, reference: &str) -> EngineResult<DocumentRoot>;
}

/// Loads run references from files relative to a base directory.
///
/// `tool.cwl` loads the file's entry root; `tools.cwl#sort` picks a root out of a
/// multi-definition file.
#[derive(Debug, Clone)]
pub struct FileRunLoader {
    base_dir: PathBuf,
}

impl FileRunLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }
}

impl RunLoader for FileRunLoader {
    fn load(&self, reference: &str) -> EngineResult<DocumentRoot> {
        let (file, fragment) = match reference.split_once('#') {
            Some((file, fragment)) => (file, Some(fragment)),
            None => (reference, None),
        };
        let path = self.base_dir.join(file.strip_prefix("file://").unwrap_or(file));
        let document = crate::load_document(&path)?;
        let root = match fragment {
            Some(id) => document.root(id),
            None => document.main_root(),
        };
        root.cloned().ok_or_else(|| EngineError::InvalidWorkflow {
            root: reference.to_string(),
            message: format!("'{}' has no matching definition", path.display()),
        })
    }
}

/// Resolves documents into commands.
///
/// ```rust
/// use serde_json::json;
/// use weft_engine::{Resolver, ResolverConfig, parse_document};
///
/// let document = parse_document("class: CommandLineTool\nbaseCommand: echo\ninputs:\n  message:\n    type: string\n    inputBinding: {position: 1}\noutputs: {}\n", None).unwrap();
/// let job = json!({"message": "hello"});
/// let config = ResolverConfig { stage_work_dir: false, ..ResolverConfig::default() };
/// let resolution = Resolver::new(&config).resolve(&document, job.as_object().unwrap()).unwrap();
/// assert_eq!(resolution.commands[0].argv(), vec!["echo", "hello"]);
/// ```
pub struct Resolver<'a> {
    config: &'a ResolverConfig,
    evaluator: &'a dyn ExpressionEvaluator,
    loader: Option<&'a dyn RunLoader>,
    stager: &'a dyn Stager,
}

impl<'a> Resolver<'a> {
    /// Resolver with the built-in parameter-reference evaluator, no run loader, and a
    /// stager chosen by `config.stage_work_dir`.
    pub fn new(config: &'a ResolverConfig) -> Self {
        let stager: &'a dyn Stager = if config.stage_work_dir { &LocalStager } else { &NoopStager };
        Self {
            config,
            evaluator: &ParameterReferenceEvaluator,
            loader: None,
            stager,
        }
    }

    pub fn with_evaluator(mut self, evaluator: &'a dyn ExpressionEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_loader(mut self, loader: &'a dyn RunLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn with_stager(mut self, stager: &'a dyn Stager) -> Self {
        self.stager = stager;
        self
    }

    /// Resolves the document's entry root against `job`.
    pub fn resolve(&self, document: &Document, job: &Map<String, Value>) -> EngineResult<Resolution> {
        let root = document.main_root().ok_or_else(|| EngineError::InvalidWorkflow {
            root: "main".to_string(),
            message: "document has no definitions".to_string(),
        })?;
        info!(root_id = %root.display_id(), class = %root.class.as_str(), "resolving document");

        let session = Session { resolver: self, document };
        let invocation = Invocation {
            id: root.display_id().to_string(),
            nested: false,
            depends_on: Vec::new(),
        };
        let outcome = session.resolve_root(root, job, &RequirementScope::default(), &invocation, 0)?;

        let outputs = outcome
            .outputs
            .into_iter()
            .filter_map(|(id, value)| value.map(|value| (id, value)))
            .collect();
        info!(root_id = %root.display_id(), commands = outcome.commands.len(), "resolved document");
        Ok(Resolution {
            commands: outcome.commands,
            outputs,
        })
    }
}

/// Where one root invocation sits in the resolution tree.
#[derive(Debug, Clone)]
pub(crate) struct Invocation {
    /// Command id for a tool; id prefix for a nested workflow's steps.
    pub id: String,
    /// True for anything reached through a workflow step.
    pub nested: bool,
    /// Commands every command of this invocation must wait for.
    pub depends_on: Vec<String>,
}

impl Invocation {
    pub fn command_id(&self) -> &str {
        &self.id
    }

    pub fn step_id(&self, step_id: &str) -> String {
        if self.nested { format!("{}.{step_id}", self.id) } else { step_id.to_string() }
    }
}

/// Commands and predicted outputs of one root invocation.
#[derive(Debug, Clone, Default)]
pub(crate) struct RootOutcome {
    pub commands: Vec<Command>,
    /// `None` marks an output whose value is only known after execution.
    pub outputs: IndexMap<String, Option<Value>>,
}

/// State shared by one `resolve` call: the collaborators and the document being resolved.
pub(crate) struct Session<'s> {
    resolver: &'s Resolver<'s>,
    document: &'s Document,
}

impl<'s> Session<'s> {
    pub fn config(&self) -> &ResolverConfig {
        self.resolver.config
    }

    pub fn evaluator(&self) -> &dyn ExpressionEvaluator {
        self.resolver.evaluator
    }

    pub fn stager(&self) -> &dyn Stager {
        self.resolver.stager
    }

    pub fn resolve_root(
        &self,
        root: &DocumentRoot,
        provided: &Map<String, Value>,
        parent: &RequirementScope,
        invocation: &Invocation,
        depth: usize,
    ) -> EngineResult<RootOutcome> {
        if depth > MAX_DEPTH {
            return Err(EngineError::InvalidWorkflow {
                root: root.display_id().to_string(),
                message: format!("run targets nest deeper than {MAX_DEPTH} levels"),
            });
        }
        let scope = root.requirement_scope().inherit(parent);
        match root.class {
            DocumentClass::CommandLineTool => tool::resolve_command_line_tool(self, root, provided, &scope, invocation),
            DocumentClass::ExpressionTool => tool::resolve_expression_tool(self, root, provided, &scope, invocation),
            DocumentClass::Workflow => workflow::resolve_workflow(self, root, provided, &scope, invocation, depth),
        }
    }

    /// The document a step runs: inline, a sibling in the same multi-definition
    /// document, or loaded through the configured loader.
    pub fn run_target<'t>(&'t self, step: &'t WorkflowStep) -> EngineResult<Cow<'t, DocumentRoot>> {
        match &step.run {
            RunTarget::Inline(root) => Ok(Cow::Borrowed(root.as_ref())),
            RunTarget::Reference(reference) => {
                if let Some(id) = reference.strip_prefix('#')
                    && let Some(sibling) = self.document.root(id)
                {
                    return Ok(Cow::Borrowed(sibling));
                }
                let loader = self.resolver.loader.ok_or_else(|| {
                    EngineError::Unsupported(format!("step '{}' runs external reference '{reference}' but no run loader is configured", step.id))
                })?;
                debug!(step_id = %step.id, reference = %reference, "loading run target");
                loader.load(reference).map(Cow::Owned)
            }
        }
    }
}

/// Upstream step named by a `step/output` source.
pub(crate) fn source_step(source: &str) -> Option<&str> {
    source.split_once('/').map(|(step, _)| step)
}

/// Orders steps so every step follows the steps it sources from. Independent steps keep
/// declaration order.
pub(crate) fn order_steps<'w>(root_id: &str, steps: &'w [WorkflowStep]) -> EngineResult<Vec<&'w WorkflowStep>> {
    let invalid = |message: String| EngineError::InvalidWorkflow {
        root: root_id.to_string(),
        message,
    };

    let mut lookup: IndexMap<&str, &WorkflowStep> = IndexMap::new();
    for step in steps {
        if lookup.insert(step.id.as_str(), step).is_some() {
            return Err(invalid(format!("duplicate step identifier '{}'", step.id)));
        }
    }

    let mut in_degrees: HashMap<&str, usize> = lookup.keys().map(|id| (*id, 0)).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();

    for (step_id, step) in &lookup {
        let mut seen = HashSet::new();
        for dependency in step.inputs.iter().flat_map(|input| input.source.iter()).filter_map(|source| source_step(source)) {
            if !lookup.contains_key(dependency) {
                return Err(invalid(format!("step '{step_id}' sources from unknown step '{dependency}'")));
            }
            if dependency == *step_id {
                return Err(invalid(format!("step '{step_id}' cannot source from itself")));
            }
            if !seen.insert(dependency) {
                continue;
            }
            if let Some(degree) = in_degrees.get_mut(step_id) {
                *degree += 1;
            }
            adjacency.entry(dependency).or_default().push(*step_id);
        }
    }

    // Ready steps are taken lowest declaration index first, so a declaration order that
    // already satisfies the sources is kept as is.
    let mut ready: BTreeSet<usize> = lookup
        .keys()
        .enumerate()
        .filter(|(_, id)| in_degrees.get(*id).copied() == Some(0))
        .map(|(index, _)| index)
        .collect();
    let mut ordered: Vec<&WorkflowStep> = Vec::with_capacity(lookup.len());
    while let Some(index) = ready.pop_first() {
        let Some((step_id, step)) = lookup.get_index(index) else {
            continue;
        };
        ordered.push(*step);
        for child in adjacency.get(step_id).into_iter().flatten() {
            if let Some(degree) = in_degrees.get_mut(child) {
                *degree -= 1;
                if *degree == 0
                    && let Some(child_index) = lookup.get_index_of(child)
                {
                    ready.insert(child_index);
                }
            }
        }
    }

    if ordered.len() != lookup.len() {
        let mut remaining: Vec<&str> = in_degrees.into_iter().filter(|(_, degree)| *degree > 0).map(|(id, _)| id).collect();
        remaining.sort_unstable();
        return Err(invalid(format!("cycle detected in workflow steps involving: {}", remaining.join(", "))));
    }

    Ok(ordered)
}
