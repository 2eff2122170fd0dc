//! Strongly typed document model shared by the decoder, resolver and CLI.
//!
//! The models here are *templates*: they are produced once by the decoder from static
//! document text and are never mutated afterwards. Values supplied at invocation time live
//! in a separate binding context owned by the resolver, so one template can back any number
//! of scatter instances or sibling steps.
//!
//! Layout follows the dependency order of the language itself:
//!
//! - [`schema`]: parameter types (scalar names, arrays, records, enums, references)
//! - [`binding`]: command-line and output bindings
//! - [`parameter`]: input/output parameters, defaults, secondary-file rules
//! - [`requirement`]: requirement/hint variants and scope merging
//! - [`step`]: workflow steps and their run targets
//! - [`document`]: document roots and multi-definition documents
//! - [`value`]: File/Directory literal conventions used by bound values

pub mod binding;
pub mod document;
pub mod parameter;
pub mod requirement;
pub mod schema;
pub mod step;
pub mod value;

pub use binding::{CommandLineBinding, OutputBinding, StringOrExpression, contains_expression};
pub use document::{Argument, Document, DocumentClass, DocumentRoot, DocumentShape};
pub use parameter::{DefaultValue, InputParameter, OutputParameter, SecondaryFileRule};
pub use requirement::{
    Dirent, DockerRequirement, EnvVarRequirement, EnvironmentDef, InitialWorkDirRequirement, InlineJavascriptRequirement, Requirement,
    RequirementScope, ResourceAmount, ResourceRequirement, SchemaDefRequirement, SoftwarePackage, SoftwareRequirement, WorkDirEntry,
    merge_requirements,
};
pub use schema::{ArraySchema, EnumSchema, LiteralShape, ParameterType, RecordField, RecordSchema, TypeUnion};
pub use step::{LinkMerge, RunTarget, ScatterMethod, StepInput, WorkflowStep};
