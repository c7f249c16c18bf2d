//! Interpreter frames: one per running program.

use crate::program::{Program, SortId, VariableId};
use crate::sort::{SortOverrides, SortValue};
use crate::number::PatternRole;
use crate::trees::{NodeRef, TreeId};
use crate::variables::{ParamSet, ScopeId};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use xsltvm_types::QualifiedName;

/// Progress of an instruction that can be suspended part way. Reset
/// whenever the instruction pointer moves.
#[derive(Debug, Default)]
pub(crate) enum Slot {
    #[default]
    Idle,
    /// `MatchPatterns` has ruled out the patterns before `next`.
    Match { next: usize },
    /// `CallProgramOnNode` is waiting for its callee to return.
    Called,
    Builtin { children: Vec<NodeRef>, next: usize },
    Sort(SortProgress),
    Key(KeyWalk),
    Number(HashMap<(NodeRef, PatternRole), bool>),
}

#[derive(Debug, Default)]
pub(crate) struct SortProgress {
    /// One row per node, one value per key already evaluated.
    pub rows: Vec<Vec<SortValue>>,
    pub next: usize,
}

#[derive(Debug)]
pub(crate) struct KeyWalk {
    pub nodes: Vec<NodeRef>,
    pub next: usize,
    /// Whether `nodes[next]` matched, once known.
    pub matched: Option<bool>,
}

/// What popping a frame finishes besides the program itself.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Completion {
    None,
    Key { name: String, tree: TreeId },
    Global(VariableId),
}

pub(crate) struct Frame {
    pub program: Arc<Program>,
    pub ip: usize,
    pub slot: Slot,

    pub string: String,
    pub number: f64,
    pub boolean: bool,
    pub name: QualifiedName,

    pub node: NodeRef,
    pub position: usize,
    pub size: usize,
    pub current: NodeRef,
    pub nodes: Vec<NodeRef>,
    pub node_index: usize,

    pub scope: Option<ScopeId>,
    pub owns_scope: bool,
    /// Parameters passed by the caller, for `TestParamPreset`.
    pub caller_params: Option<Rc<ParamSet>>,
    /// Parameter sets being collected for calls, innermost last.
    pub params: Vec<Rc<ParamSet>>,
    pub fragment: Option<TreeId>,
    pub sort_overrides: HashMap<(SortId, usize), SortOverrides>,
    pub completion: Completion,
}

impl Frame {
    pub fn new(program: Arc<Program>, node: NodeRef, position: usize, size: usize) -> Self {
        Self {
            program,
            ip: 0,
            slot: Slot::Idle,
            string: String::new(),
            number: 0.0,
            boolean: false,
            name: QualifiedName::default(),
            node,
            position,
            size,
            current: node,
            nodes: Vec::new(),
            node_index: 0,
            scope: None,
            owns_scope: false,
            caller_params: None,
            params: Vec::new(),
            fragment: None,
            sort_overrides: HashMap::new(),
            completion: Completion::None,
        }
    }

    pub fn advance(&mut self) {
        self.ip += 1;
        self.slot = Slot::Idle;
    }

    pub fn jump(&mut self, target: usize) {
        self.ip = target;
        self.slot = Slot::Idle;
    }

    pub fn take_string(&mut self) -> String {
        std::mem::take(&mut self.string)
    }
}
