//! The XSLT transformation runtime.
//!
//! A compiled [`Stylesheet`] is a set of [`Program`]s. The [`Engine`]
//! interprets them against an input tree with an explicit frame stack so
//! that it can stop at any instruction (budget spent, a document or key not
//! available yet) and continue later. The [`Transformation`] driver wraps an
//! engine with the output-method decision, document loading and host
//! callbacks.
//!
//! Expressions and patterns are evaluated by an external [`Evaluator`];
//! enable the `testing` feature for the closure-based
//! [`testing::ScriptedEvaluator`].

pub mod collect;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluator;
mod frame;
pub mod keys;
pub mod messages;
pub mod number;
pub mod program;
pub mod sort;
pub mod stylesheet;
pub mod transformation;
pub mod trees;
pub mod value;
pub mod variables;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::TransformConfig;
pub use engine::{Engine, Progress};
pub use error::{EvalError, TransformError};
pub use evaluator::{Dependency, Eval, EvalContext, Evaluator};
pub use keys::{KeyIndex, KeyState};
pub use messages::{Diagnostic, MessageDisposition, MessageKind};
pub use number::{NumberLevel, NumberSpec};
pub use program::{
    ExprId, Instruction, KeyId, Label, NameId, NamespaceBinding, NamespaceScopeId, NumberId,
    PatternId, Program, ProgramBuilder, ProgramId, ProgramKind, SortId, SortParameter, StringId,
    ValueSource, VariableId,
};
pub use sort::{CaseOrder, SortDataType, SortKey, SortOrder, SortSpec};
pub use stylesheet::{KeyDefinition, Stylesheet, StylesheetBuilder, VariableDecl};
pub use transformation::{
    DocumentLoader, LoadHandle, OutputTarget, Status, Transformation, TransformationHost,
    TransformationState,
};
pub use trees::{DocumentState, NodeRef, TreeId, Trees};
pub use value::Value;
pub use variables::{GlobalState, ParamSet, ScopeId, VariableStore};
