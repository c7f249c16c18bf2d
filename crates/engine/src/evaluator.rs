//! The seam between the interpreter and the expression language.
//!
//! Expressions and patterns are compiled and owned by an [`Evaluator`]; the
//! interpreter refers to them by id. Evaluation may be unable to finish
//! because something it needs is not there yet. It then answers
//! [`Eval::NotYet`] naming the dependency, and the interpreter arranges for
//! it before re-running the same instruction.

use crate::error::EvalError;
use crate::keys::{KeyIndex, KeyState};
use crate::program::{ExprId, PatternId, VariableId};
use crate::stylesheet::Stylesheet;
use crate::trees::{DocumentState, Documents, NodeRef, TreeId, Trees};
use crate::value::Value;
use crate::variables::{GlobalState, ScopeId, VariableStore};
use std::rc::Rc;
use xsltvm_tree::TreeAccess;
use xsltvm_types::DocumentUri;

#[derive(Debug, Clone, PartialEq)]
pub enum Eval<T> {
    Ready(T),
    NotYet(Dependency),
}

/// What a suspended evaluation is waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependency {
    /// A document requested through `document()`; the host loads it.
    Document(DocumentUri),
    /// The index for key `name` over `tree` has not been built.
    Key { name: String, tree: TreeId },
    /// A global variable that has not been computed.
    Variable(VariableId),
    /// Something only the evaluator knows about. The transformation
    /// yields and re-runs the instruction on the next step.
    External,
}

pub trait Evaluator {
    fn evaluate(&mut self, expr: ExprId, context: &EvalContext<'_>) -> Result<Eval<Value>, EvalError>;

    fn matches(&mut self, pattern: PatternId, context: &EvalContext<'_>) -> Result<Eval<bool>, EvalError>;
}

/// Everything an expression can observe while it is evaluated.
pub struct EvalContext<'a> {
    pub node: NodeRef,
    pub position: usize,
    pub size: usize,
    /// The node `current()` returns.
    pub current: NodeRef,
    pub(crate) trees: &'a Trees,
    pub(crate) documents: &'a Documents,
    pub(crate) variables: &'a VariableStore,
    pub(crate) scope: Option<ScopeId>,
    pub(crate) keys: &'a KeyIndex,
    pub(crate) stylesheet: &'a Stylesheet,
}

impl<'a> EvalContext<'a> {
    pub fn trees(&self) -> &'a Trees {
        self.trees
    }

    pub fn tree(&self, id: TreeId) -> Option<&'a dyn TreeAccess> {
        self.trees.try_get(id)
    }

    pub fn string_value(&self, node: NodeRef) -> String {
        self.trees.string_value(node)
    }

    pub fn stylesheet(&self) -> &'a Stylesheet {
        self.stylesheet
    }

    /// The value of a variable visible here. Globals that have not been
    /// computed yet suspend the evaluation.
    pub fn variable(&self, variable: VariableId) -> Result<Eval<Rc<Value>>, EvalError> {
        let decl = self
            .stylesheet
            .variables
            .get(variable.0)
            .ok_or_else(|| EvalError::UnboundVariable(variable.to_string()))?;
        if decl.global {
            return Ok(match self.variables.global(variable) {
                Some(GlobalState::Ready(value)) => Eval::Ready(Rc::clone(value)),
                _ => Eval::NotYet(Dependency::Variable(variable)),
            });
        }
        self.variables
            .lookup(self.scope, variable)
            .map(Eval::Ready)
            .ok_or_else(|| EvalError::UnboundVariable(decl.name.to_string()))
    }

    /// Nodes of the context node's document with `value` for key `name`.
    pub fn key(&self, name: &str, value: &str) -> Result<Eval<Vec<NodeRef>>, EvalError> {
        if self.stylesheet.keys_named(name).next().is_none() {
            return Err(EvalError::UnknownKey(name.to_string()));
        }
        let tree = self.node.tree;
        match self.keys.state(name, tree) {
            Some(KeyState::Ready) => Ok(Eval::Ready(self.keys.lookup(name, tree, value).to_vec())),
            Some(KeyState::Building) => Err(EvalError::CircularKey {
                name: name.to_string(),
            }),
            None => Ok(Eval::NotYet(Dependency::Key {
                name: name.to_string(),
                tree,
            })),
        }
    }

    /// The root of a document loaded through `document()`. A failed load
    /// yields `None`.
    pub fn document(&self, uri: &DocumentUri) -> Eval<Option<NodeRef>> {
        match self.documents.state(uri) {
            Some(DocumentState::Loaded(tree)) => Eval::Ready(Some(self.trees.root(tree))),
            Some(DocumentState::Failed) => Eval::Ready(None),
            Some(DocumentState::Pending) | None => Eval::NotYet(Dependency::Document(uri.clone())),
        }
    }
}
