//! The resumable interpreter.
//!
//! [`Engine::execute`] runs instructions until the budget is spent, the
//! program finishes, the output method is detected, or an evaluation needs
//! something that is not available. Every instruction either completes or
//! leaves the frame exactly where it was (plus progress in the frame's
//! slot), so re-running after a suspension never repeats output.

use crate::collect::{FragmentCollector, TextCollector};
use crate::error::{EvalError, TransformError};
use crate::evaluator::{Dependency, Eval, EvalContext, Evaluator};
use crate::frame::{Completion, Frame, KeyWalk, Slot, SortProgress};
use crate::keys::{KeyIndex, KeyState};
use crate::messages::{Diagnostic, MessageKind};
use crate::number::{PatternRole, count_nodes, same_kind};
use crate::program::{
    ExprId, Instruction, PatternId, Program, ProgramBuilder, ProgramId, ProgramKind, ValueSource,
};
use crate::sort::{SortDataType, SortValue, sorted_order};
use crate::stylesheet::Stylesheet;
use crate::trees::{DocumentState, Documents, NodeRef, TreeId, Trees};
use crate::value::Value;
use crate::variables::{GlobalState, ScopeId, VariableStore};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use xsltvm_output::{OutputError, OutputMethod, OutputSink, Sink};
use xsltvm_tree::{NodeType, TreeAccess};
use xsltvm_types::{DocumentUri, QualifiedName, is_valid_ncname};

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Why [`Engine::execute`] returned.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    /// The budget ran out.
    Paused,
    /// Waiting for the host, currently only for a document load.
    Blocked(Dependency),
    /// The recording sink has seen enough output to pick a method.
    OutputDecision(OutputMethod),
    Completed,
}

enum Flow {
    Next,
    Jump(usize),
    Stay,
    Suspend(Dependency),
    Yield,
    Finished,
}

macro_rules! ready {
    ($eval:expr) => {
        match $eval {
            Eval::Ready(value) => value,
            Eval::NotYet(dependency) => return Ok(Flow::Suspend(dependency)),
        }
    };
}

#[derive(Debug, Clone, Copy)]
struct At {
    node: NodeRef,
    position: usize,
    size: usize,
    current: NodeRef,
    scope: Option<ScopeId>,
}

impl At {
    fn node(node: NodeRef, scope: Option<ScopeId>) -> Self {
        Self {
            node,
            position: 1,
            size: 1,
            current: node,
            scope,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeChoice {
    /// A scope with no parent.
    Fresh,
    /// A scope whose lookups fall through to the caller's.
    Chained,
    /// The caller's scope itself.
    Shared,
    /// Globals only.
    Global,
}

#[derive(Debug, Default)]
pub(crate) struct Runtime {
    pub trees: Trees,
    pub documents: Documents,
    pub variables: VariableStore,
    pub keys: KeyIndex,
}

fn context<'a>(runtime: &'a Runtime, stylesheet: &'a Stylesheet, at: At) -> EvalContext<'a> {
    EvalContext {
        node: at.node,
        position: at.position,
        size: at.size,
        current: at.current,
        trees: &runtime.trees,
        documents: &runtime.documents,
        variables: &runtime.variables,
        scope: at.scope,
        keys: &runtime.keys,
        stylesheet,
    }
}

/// Attaches the failing instruction to an evaluator error.
fn located(error: EvalError, ip: usize, program: &Program) -> TransformError {
    match error {
        EvalError::CircularVariable { chain } => TransformError::CircularVariable { chain },
        EvalError::CircularKey { name } => TransformError::CircularKey { name },
        EvalError::ResourceExhausted => TransformError::ResourceExhausted,
        other => TransformError::evaluation(ip, program.to_string(), other.to_string()),
    }
}

/// Rejects nodes and fragments that name a tree this transformation does
/// not have.
fn check_trees(trees: &Trees, value: &Value) -> Result<(), EvalError> {
    match value {
        Value::NodeSet(nodes) => match nodes.iter().find(|node| !trees.contains(node.tree)) {
            Some(node) => Err(EvalError::UnknownTree(node.tree.index())),
            None => Ok(()),
        },
        Value::Fragment(tree) if !trees.contains(*tree) => Err(EvalError::UnknownTree(tree.index())),
        _ => Ok(()),
    }
}

fn warn(messages: &mut Vec<Diagnostic>, text: String) {
    log::warn!("{}", text);
    messages.push(Diagnostic::new(MessageKind::Warning, text));
}

enum LocalOutput {
    Text(TextCollector),
    Fragment(FragmentCollector),
}

/// The root sink plus the stack of local collectors above it.
struct Outputs {
    root: Sink,
    /// Each collector with the attribute state of the level below it.
    locals: Vec<(LocalOutput, bool)>,
    /// True between a start tag and its first content.
    attributes_allowed: bool,
}

impl Outputs {
    fn current(&mut self) -> &mut dyn OutputSink {
        match self.locals.last_mut() {
            Some((LocalOutput::Text(collector), _)) => collector,
            Some((LocalOutput::Fragment(collector), _)) => collector,
            None => &mut self.root,
        }
    }

    fn push(&mut self, local: LocalOutput) -> Result<(), TransformError> {
        self.locals.try_reserve(1)?;
        self.locals.push((local, self.attributes_allowed));
        self.attributes_allowed = false;
        Ok(())
    }

    fn pop(&mut self) -> Option<LocalOutput> {
        let (local, allowed) = self.locals.pop()?;
        self.attributes_allowed = allowed;
        Some(local)
    }

    fn start_element(&mut self, name: &QualifiedName) -> Result<(), OutputError> {
        self.current().start_element(name)?;
        self.attributes_allowed = true;
        Ok(())
    }

    /// Returns `false` when no start tag is open for the attribute.
    fn attribute(&mut self, name: &QualifiedName, value: &str) -> Result<bool, OutputError> {
        if !self.attributes_allowed {
            return Ok(false);
        }
        self.current().add_attribute(name, value)?;
        Ok(true)
    }

    fn text(&mut self, text: &str, disable_output_escaping: bool) -> Result<(), OutputError> {
        if text.is_empty() {
            return Ok(());
        }
        self.current().add_text(text, disable_output_escaping)?;
        self.attributes_allowed = false;
        Ok(())
    }

    fn comment(&mut self, text: &str) -> Result<(), OutputError> {
        self.current().add_comment(text)?;
        self.attributes_allowed = false;
        Ok(())
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), OutputError> {
        self.current().add_processing_instruction(target, data)?;
        self.attributes_allowed = false;
        Ok(())
    }

    fn end_element(&mut self, name: &QualifiedName) -> Result<(), OutputError> {
        self.current().end_element(name)?;
        self.attributes_allowed = false;
        Ok(())
    }
}

/// Deep copy of `node` into the current output.
fn copy_node(
    trees: &Trees,
    node: NodeRef,
    out: &mut Outputs,
    messages: &mut Vec<Diagnostic>,
) -> Result<(), TransformError> {
    let name = || trees.name(node).cloned().unwrap_or_default();
    match trees.node_type(node) {
        NodeType::Root => {
            for child in trees.children(node) {
                copy_node(trees, child, out, messages)?;
            }
        }
        NodeType::Element => {
            let name = name();
            out.start_element(&name)?;
            for attribute in trees.attributes(node) {
                copy_node(trees, attribute, out, messages)?;
            }
            for child in trees.children(node) {
                copy_node(trees, child, out, messages)?;
            }
            out.end_element(&name)?;
        }
        NodeType::Attribute => {
            let name = name();
            if !out.attribute(&name, &trees.string_value(node))? {
                warn(
                    messages,
                    format!("attribute '{}' copied outside of a start tag was dropped", name),
                );
            }
        }
        NodeType::Text => out.text(&trees.string_value(node), false)?,
        NodeType::Comment => out.comment(&trees.string_value(node))?,
        NodeType::ProcessingInstruction => {
            out.processing_instruction(&name().local_name, &trees.string_value(node))?
        }
    }
    Ok(())
}

/// Runs a [`Stylesheet`] against one input tree.
pub struct Engine {
    stylesheet: Arc<Stylesheet>,
    evaluator: Box<dyn Evaluator>,
    runtime: Runtime,
    frames: Vec<Frame>,
    outputs: Outputs,
    /// Names for computed-element and copy ends; `None` for a copied root.
    element_names: Vec<Option<QualifiedName>>,
    key_programs: HashMap<String, Arc<Program>>,
    parameters: Vec<(QualifiedName, Value)>,
    max_depth: usize,
    messages: Vec<Diagnostic>,
    decision_reported: bool,
    completed: bool,
}

impl Engine {
    pub fn new(
        stylesheet: Arc<Stylesheet>,
        evaluator: Box<dyn Evaluator>,
        input: Box<dyn TreeAccess>,
        output: Sink,
        max_depth: usize,
    ) -> Result<Self, TransformError> {
        stylesheet.validate()?;
        let program = Arc::clone(stylesheet.program(stylesheet.root)?);
        let mut runtime = Runtime {
            trees: Trees::new(input),
            ..Runtime::default()
        };
        let root = runtime.trees.root(TreeId::MAIN);
        let mut frame = Frame::new(program, root, 1, 1);
        frame.scope = Some(runtime.variables.push_scope(None)?);
        frame.owns_scope = true;

        Ok(Self {
            stylesheet,
            evaluator,
            runtime,
            frames: vec![frame],
            outputs: Outputs {
                root: output,
                locals: Vec::new(),
                attributes_allowed: false,
            },
            element_names: Vec::new(),
            key_programs: HashMap::new(),
            parameters: Vec::new(),
            max_depth: max_depth.max(1),
            messages: Vec::new(),
            decision_reported: false,
            completed: false,
        })
    }

    /// Runs at most `budget` instructions (at least one).
    pub fn execute(&mut self, budget: usize) -> Result<Progress, TransformError> {
        let mut remaining = budget.max(1);
        loop {
            if let Some(method) = self.take_output_decision() {
                return Ok(Progress::OutputDecision(method));
            }
            if self.completed {
                return Ok(Progress::Completed);
            }
            if remaining == 0 {
                return Ok(Progress::Paused);
            }
            remaining -= 1;
            match self.step(&mut remaining)? {
                Flow::Next => self.top()?.advance(),
                Flow::Jump(target) => self.top()?.jump(target),
                Flow::Stay => {}
                Flow::Yield | Flow::Suspend(Dependency::External) => return Ok(Progress::Paused),
                Flow::Suspend(dependency) => {
                    if let Some(blocked) = self.resolve(dependency)? {
                        return Ok(Progress::Blocked(blocked));
                    }
                }
                Flow::Finished => {
                    log::debug!("Program finished");
                    self.completed = true;
                }
            }
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Supplies a value for a top-level `xsl:param`, matched by expanded name.
    pub fn set_parameter(&mut self, name: QualifiedName, value: Value) {
        match self
            .parameters
            .iter_mut()
            .find(|(n, _)| n.same_expanded_name(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.parameters.push((name, value)),
        }
    }

    pub fn take_messages(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.messages)
    }

    pub fn output(&self) -> &Sink {
        &self.outputs.root
    }

    /// The method the recording sink detected, if output is still recorded.
    pub fn detected_method(&self) -> Option<OutputMethod> {
        self.outputs.root.as_recording()?.detected_method()
    }

    /// Installs `sink` as the root output. Output recorded so far is
    /// replayed into it first.
    pub fn replace_output(&mut self, sink: Sink) -> Result<(), TransformError> {
        let previous = std::mem::replace(&mut self.outputs.root, sink);
        if let Sink::Recording(recording) = previous {
            log::debug!(
                "Replaying {} recorded output calls into {} sink",
                recording.len(),
                self.outputs.root.kind()
            );
            recording.replay_into(&mut self.outputs.root)?;
        }
        Ok(())
    }

    /// Records the outcome of a document load. `None` means it failed and
    /// `document()` sees no nodes.
    pub fn document_loaded(
        &mut self,
        uri: DocumentUri,
        tree: Option<Box<dyn TreeAccess>>,
    ) -> Result<(), TransformError> {
        let state = match tree {
            Some(tree) => DocumentState::Loaded(self.runtime.trees.add(tree)?),
            None => DocumentState::Failed,
        };
        log::debug!("Document '{}' is now {:?}", uri, state);
        self.runtime.documents.set(uri, state);
        Ok(())
    }

    pub fn trees(&self) -> &Trees {
        &self.runtime.trees
    }

    pub fn keys(&self) -> &KeyIndex {
        &self.runtime.keys
    }

    pub fn variables(&self) -> &VariableStore {
        &self.runtime.variables
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    fn take_output_decision(&mut self) -> Option<OutputMethod> {
        if self.decision_reported {
            return None;
        }
        let method = self.detected_method()?;
        self.decision_reported = true;
        log::debug!("Output method detected: {}", method);
        Some(method)
    }

    fn top(&mut self) -> Result<&mut Frame, TransformError> {
        self.frames
            .last_mut()
            .ok_or_else(|| TransformError::program("no active frame"))
    }

    fn top_ref(&self) -> Result<&Frame, TransformError> {
        self.frames
            .last()
            .ok_or_else(|| TransformError::program("no active frame"))
    }

    fn frame_at(&self) -> Result<At, TransformError> {
        let frame = self.top_ref()?;
        Ok(At {
            node: frame.node,
            position: frame.position,
            size: frame.size,
            current: frame.current,
            scope: frame.scope,
        })
    }

    fn evaluate(&mut self, expr: ExprId, at: At) -> Result<Eval<Value>, EvalError> {
        let context = context(&self.runtime, &self.stylesheet, at);
        let result = self.evaluator.evaluate(expr, &context)?;
        if let Eval::Ready(value) = &result {
            check_trees(&self.runtime.trees, value)?;
        }
        Ok(result)
    }

    fn matches(&mut self, pattern: PatternId, at: At) -> Result<Eval<bool>, EvalError> {
        let context = context(&self.runtime, &self.stylesheet, at);
        self.evaluator.matches(pattern, &context)
    }

    fn warn(&mut self, text: String) {
        warn(&mut self.messages, text);
    }

    fn push_frame(
        &mut self,
        program: Arc<Program>,
        node: NodeRef,
        position: usize,
        size: usize,
        scope: ScopeChoice,
        completion: Completion,
        pass_params: bool,
    ) -> Result<(), TransformError> {
        if self.frames.len() >= self.max_depth {
            return Err(TransformError::RecursionLimit {
                depth: self.max_depth,
            });
        }
        self.frames.try_reserve(1)?;
        let caller = self.frames.last();
        let caller_scope = caller.and_then(|c| c.scope);
        let (scope, owns_scope) = match scope {
            ScopeChoice::Fresh => (Some(self.runtime.variables.push_scope(None)?), true),
            ScopeChoice::Chained => (Some(self.runtime.variables.push_scope(caller_scope)?), true),
            ScopeChoice::Shared => (caller_scope, false),
            ScopeChoice::Global => (None, false),
        };

        let kind = program.kind;
        let mut frame = Frame::new(program, node, position, size);
        frame.scope = scope;
        frame.owns_scope = owns_scope;
        frame.completion = completion;
        if let Some(caller) = caller {
            let collected = caller.params.last().filter(|_| pass_params).cloned();
            match kind {
                ProgramKind::Template => {
                    frame.caller_params = collected;
                    if caller.program.kind == ProgramKind::ApplyTemplates {
                        frame.position = caller.position;
                        frame.size = caller.size;
                    }
                }
                ProgramKind::ApplyTemplates => frame.params.extend(collected),
                _ => {}
            }
        }
        log::trace!("Entering {} at depth {}", frame.program, self.frames.len() + 1);
        self.frames.push(frame);
        Ok(())
    }

    /// Pops the top frame. Returns true when it was the last one.
    fn pop_frame(&mut self) -> Result<bool, TransformError> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| TransformError::program("return without a frame"))?;
        if frame.owns_scope
            && let Some(scope) = frame.scope
        {
            self.runtime.variables.pop_scope(scope);
        }
        match frame.completion {
            Completion::None => {}
            Completion::Key { name, tree } => self.runtime.keys.finish(&name, tree),
            Completion::Global(variable) => {
                if self.runtime.variables.is_computing(variable) {
                    self.runtime
                        .variables
                        .set_global(variable, Rc::new(Value::String(String::new())));
                }
            }
        }
        Ok(self.frames.is_empty())
    }

    fn scope_for(kind: ProgramKind, new_scope: bool) -> ScopeChoice {
        match (kind, new_scope) {
            (_, false) => ScopeChoice::Shared,
            (ProgramKind::ForEach, true) => ScopeChoice::Chained,
            (ProgramKind::KeyIndex, true) => ScopeChoice::Global,
            _ => ScopeChoice::Fresh,
        }
    }

    fn variable_chain(&self, variable: crate::program::VariableId) -> String {
        let name_of = |id: crate::program::VariableId| {
            self.stylesheet
                .variables
                .get(id.0)
                .map(|decl| decl.name.to_string())
                .unwrap_or_else(|| id.to_string())
        };
        let mut chain = vec![name_of(variable)];
        for frame in self.frames.iter().rev() {
            if let Completion::Global(outer) = frame.completion {
                chain.push(name_of(outer));
                if outer == variable {
                    break;
                }
            }
        }
        chain.join(" <= ")
    }

    fn key_program(&mut self, name: &str) -> Result<Arc<Program>, TransformError> {
        if let Some(program) = self.key_programs.get(name) {
            return Ok(Arc::clone(program));
        }
        let mut builder = ProgramBuilder::new(ProgramKind::KeyIndex, format!("key '{}'", name));
        for key in self.stylesheet.keys_named(name) {
            builder.push(Instruction::ProcessKey(key));
        }
        builder.push(Instruction::Return);
        let program = Arc::new(builder.build()?);
        self.key_programs
            .insert(name.to_string(), Arc::clone(&program));
        Ok(program)
    }

    /// Arranges for `dependency` to be satisfied. Returns it back when only
    /// the host can.
    fn resolve(&mut self, dependency: Dependency) -> Result<Option<Dependency>, TransformError> {
        match dependency {
            Dependency::Key { name, tree } => {
                match self.runtime.keys.state(&name, tree) {
                    Some(KeyState::Building) => return Err(TransformError::CircularKey { name }),
                    Some(KeyState::Ready) => return Ok(None),
                    None => {}
                }
                let program = self.key_program(&name)?;
                self.runtime.keys.begin(&name, tree);
                log::debug!("Building key '{}' for tree {}", name, tree.index());
                let root = self.runtime.trees.root(tree);
                self.push_frame(
                    program,
                    root,
                    1,
                    1,
                    ScopeChoice::Global,
                    Completion::Key { name, tree },
                    false,
                )?;
                Ok(None)
            }
            Dependency::Variable(variable) => {
                match self.runtime.variables.global(variable) {
                    Some(GlobalState::Ready(_)) => return Ok(None),
                    Some(GlobalState::Computing) => {
                        return Err(TransformError::CircularVariable {
                            chain: self.variable_chain(variable),
                        });
                    }
                    None => {}
                }
                let decl = self.stylesheet.variable(variable)?;
                let program_id = decl.program.ok_or_else(|| {
                    TransformError::program(format!("variable '{}' is not global", decl.name))
                })?;
                log::debug!("Computing global variable '{}'", decl.name);
                let program = Arc::clone(self.stylesheet.program(program_id)?);
                self.runtime.variables.begin_global(variable);
                let root = self.runtime.trees.root(TreeId::MAIN);
                self.push_frame(
                    program,
                    root,
                    1,
                    1,
                    ScopeChoice::Fresh,
                    Completion::Global(variable),
                    false,
                )?;
                Ok(None)
            }
            Dependency::Document(uri) => match self.runtime.documents.state(&uri) {
                Some(DocumentState::Loaded(_) | DocumentState::Failed) => Ok(None),
                _ => {
                    self.runtime
                        .documents
                        .set(uri.clone(), DocumentState::Pending);
                    Ok(Some(Dependency::Document(uri)))
                }
            },
            Dependency::External => Ok(Some(Dependency::External)),
        }
    }

    fn source_value(
        &mut self,
        source: ValueSource,
        ip: usize,
        program: &Program,
    ) -> Result<Eval<Value>, TransformError> {
        match source {
            ValueSource::Expression(expr) => {
                let at = self.frame_at()?;
                self.evaluate(expr, at).map_err(|e| located(e, ip, program))
            }
            ValueSource::String => Ok(Eval::Ready(Value::String(self.top()?.take_string()))),
            ValueSource::Fragment => self
                .top()?
                .fragment
                .take()
                .map(|tree| Eval::Ready(Value::Fragment(tree)))
                .ok_or_else(|| TransformError::program("no collected fragment to bind")),
        }
    }

    fn step(&mut self, budget: &mut usize) -> Result<Flow, TransformError> {
        let (program, ip) = {
            let frame = self.top_ref()?;
            (Arc::clone(&frame.program), frame.ip)
        };
        let instruction = program.instructions.get(ip).ok_or_else(|| {
            TransformError::program(format!("{} ran past its last instruction", program))
        })?;
        log::trace!("{} [{}] {:?}", program, ip, instruction);
        self.dispatch(&program, ip, instruction, budget)
    }

    fn dispatch(
        &mut self,
        program: &Arc<Program>,
        ip: usize,
        instruction: &Instruction,
        budget: &mut usize,
    ) -> Result<Flow, TransformError> {
        let fail = |e: EvalError| located(e, ip, program);
        match instruction {
            Instruction::EvaluateToNumber(expr) => {
                let at = self.frame_at()?;
                let value = ready!(self.evaluate(*expr, at).map_err(fail)?);
                let number = value.number_value(&self.runtime.trees);
                self.top()?.number = number;
            }
            Instruction::EvaluateToBoolean(expr) => {
                let at = self.frame_at()?;
                let value = ready!(self.evaluate(*expr, at).map_err(fail)?);
                self.top()?.boolean = value.boolean_value();
            }
            Instruction::EvaluateToString(expr) => {
                let at = self.frame_at()?;
                let value = ready!(self.evaluate(*expr, at).map_err(fail)?);
                let text = value.string_value(&self.runtime.trees);
                let frame = self.top()?;
                frame.string.try_reserve(text.len())?;
                frame.string.push_str(&text);
            }
            Instruction::EvaluateToNodes(expr) => {
                let at = self.frame_at()?;
                let value = ready!(self.evaluate(*expr, at).map_err(fail)?);
                let nodes = value.nodes(&self.runtime.trees).ok_or_else(|| {
                    TransformError::evaluation(
                        ip,
                        program.to_string(),
                        "expression does not evaluate to a node-set",
                    )
                })?;
                let frame = self.top()?;
                frame.nodes = nodes;
                frame.node_index = 0;
            }
            Instruction::MatchPatterns(patterns) => {
                let at = self.frame_at()?;
                let mut next = match self.top_ref()?.slot {
                    Slot::Match { next } => next,
                    _ => 0,
                };
                let start = next;
                let mut matched = false;
                while let Some(pattern) = patterns.get(next) {
                    if next > start {
                        if *budget == 0 {
                            self.top()?.slot = Slot::Match { next };
                            return Ok(Flow::Yield);
                        }
                        *budget -= 1;
                    }
                    match self.matches(*pattern, at).map_err(fail)? {
                        Eval::Ready(true) => {
                            matched = true;
                            break;
                        }
                        Eval::Ready(false) => next += 1,
                        Eval::NotYet(dependency) => {
                            self.top()?.slot = Slot::Match { next };
                            return Ok(Flow::Suspend(dependency));
                        }
                    }
                }
                self.top()?.boolean = matched;
            }

            Instruction::SetString(id) => {
                let text = program.string(*id)?;
                let frame = self.top()?;
                frame.string.clear();
                frame.string.push_str(text);
            }
            Instruction::AppendString(id) => {
                let text = program.string(*id)?;
                let frame = self.top()?;
                frame.string.try_reserve(text.len())?;
                frame.string.push_str(text);
            }
            Instruction::SetName(id) => {
                let name = program.name(*id)?.clone();
                self.top()?.name = name;
            }
            Instruction::SetQName { on_invalid } => {
                let frame = self.top()?;
                let lexical = frame.take_string();
                match QualifiedName::parse(lexical.trim()) {
                    Some(name) => frame.name = name,
                    None => {
                        self.warn(format!("'{}' is not a valid QName", lexical));
                        return Ok(Flow::Jump(*on_invalid));
                    }
                }
            }
            Instruction::SetUri => {
                let frame = self.top()?;
                let uri = frame.take_string();
                frame.name.set_uri(Some(&uri));
            }
            Instruction::ResolveName { scope, use_default } => {
                let bindings = program.namespace_scope(*scope)?;
                let frame = self.top()?;
                let uri = match frame.name.prefix() {
                    Some("xml") => Some(XML_NAMESPACE.to_string()),
                    Some(prefix) => Some(
                        bindings
                            .iter()
                            .rev()
                            .find(|b| b.prefix.as_deref() == Some(prefix))
                            .map(|b| b.uri.clone())
                            .ok_or_else(|| {
                                TransformError::evaluation(
                                    ip,
                                    program.to_string(),
                                    format!("undeclared namespace prefix '{}'", prefix),
                                )
                            })?,
                    ),
                    None if *use_default => bindings
                        .iter()
                        .rev()
                        .find(|b| b.prefix.is_none())
                        .map(|b| b.uri.clone()),
                    None => None,
                };
                frame.name.set_uri(uri.as_deref());
            }
            Instruction::SetNameFromNode => {
                let node = self.top_ref()?.node;
                let name = self.runtime.trees.name(node).cloned().unwrap_or_default();
                self.top()?.name = name;
            }

            Instruction::StartElement(name) => {
                let name = match name {
                    Some(id) => program.name(*id)?.clone(),
                    None => {
                        let name = self.top_ref()?.name.clone();
                        self.element_names.try_reserve(1)?;
                        self.element_names.push(Some(name.clone()));
                        name
                    }
                };
                self.outputs.start_element(&name)?;
            }
            Instruction::AddNamespace(scope) => {
                for binding in program.namespace_scope(*scope)? {
                    let name = match &binding.prefix {
                        Some(prefix) if prefix == "xml" => continue,
                        Some(prefix) => QualifiedName::with_namespace(
                            Some("xmlns".into()),
                            prefix.clone(),
                            None,
                        ),
                        None => QualifiedName::new("xmlns"),
                    };
                    if !self.outputs.attribute(&name, &binding.uri)? {
                        self.warn(format!(
                            "namespace declaration '{}' outside of a start tag was dropped",
                            name
                        ));
                    }
                }
            }
            Instruction::AddAttribute(name) => {
                let name = match name {
                    Some(id) => program.name(*id)?.clone(),
                    None => self.top_ref()?.name.clone(),
                };
                let value = self.top()?.take_string();
                if name.is_namespace_declaration() {
                    self.warn(format!("attribute '{}' may not be created", name));
                } else if !self.outputs.attribute(&name, &value)? {
                    self.warn(format!(
                        "attribute '{}' was added after element content or outside an element and was dropped",
                        name
                    ));
                }
            }
            Instruction::AddText {
                disable_output_escaping,
            } => {
                let text = self.top()?.take_string();
                self.outputs.text(&text, *disable_output_escaping)?;
            }
            Instruction::AddComment => {
                let text = self.top()?.take_string();
                self.outputs.comment(&text)?;
            }
            Instruction::AddProcessingInstruction => {
                let frame = self.top()?;
                let data = frame.take_string();
                let target = frame.name.clone();
                if target.prefix().is_some()
                    || !is_valid_ncname(&target.local_name)
                    || target.local_name.eq_ignore_ascii_case("xml")
                {
                    self.warn(format!(
                        "'{}' is not a valid processing instruction target",
                        target
                    ));
                } else {
                    self.outputs
                        .processing_instruction(&target.local_name, &data)?;
                }
            }
            Instruction::EndElement(name) => {
                let name = match name {
                    Some(id) => program.name(*id)?.clone(),
                    None => self.element_names.pop().flatten().ok_or_else(|| {
                        TransformError::program("computed element end without a start")
                    })?,
                };
                self.outputs.end_element(&name)?;
            }
            Instruction::CopyOf(expr) => {
                let at = self.frame_at()?;
                let value = ready!(self.evaluate(*expr, at).map_err(fail)?);
                match value.nodes(&self.runtime.trees) {
                    Some(nodes) => {
                        for node in nodes {
                            copy_node(&self.runtime.trees, node, &mut self.outputs, &mut self.messages)?;
                        }
                    }
                    None => {
                        let text = value.string_value(&self.runtime.trees);
                        self.outputs.text(&text, false)?;
                    }
                }
            }
            Instruction::CopyNode { end } => {
                let node = self.top_ref()?.node;
                match self.runtime.trees.node_type(node) {
                    NodeType::Element => {
                        let name = self.runtime.trees.name(node).cloned().unwrap_or_default();
                        self.outputs.start_element(&name)?;
                        self.element_names.try_reserve(1)?;
                        self.element_names.push(Some(name));
                    }
                    NodeType::Root => {
                        self.element_names.try_reserve(1)?;
                        self.element_names.push(None);
                    }
                    _ => {
                        copy_node(&self.runtime.trees, node, &mut self.outputs, &mut self.messages)?;
                        return Ok(Flow::Jump(*end));
                    }
                }
            }
            Instruction::EndCopy => match self.element_names.pop() {
                Some(Some(name)) => self.outputs.end_element(&name)?,
                Some(None) => {}
                None => return Err(TransformError::program("copy end without a copy")),
            },

            Instruction::CallProgramOnNode {
                program: callee,
                new_scope,
                copy_context,
            } => {
                let frame = self.top()?;
                if matches!(frame.slot, Slot::Called) {
                    return Ok(Flow::Next);
                }
                frame.slot = Slot::Called;
                let (node, position, size) = if *copy_context {
                    (frame.node, frame.position, frame.size)
                } else {
                    (frame.node, 1, 1)
                };
                let callee = Arc::clone(self.stylesheet.program(*callee)?);
                let scope = Self::scope_for(callee.kind, *new_scope);
                self.push_frame(callee, node, position, size, scope, Completion::None, true)?;
                return Ok(Flow::Stay);
            }
            Instruction::CallProgramOnNodes {
                program: callee,
                new_scope,
            } => return self.call_on_next_node(*callee, *new_scope),
            Instruction::ApplyTemplates(dispatch) => return self.call_on_next_node(*dispatch, true),
            Instruction::ApplyBuiltinTemplate => {
                let node = self.top_ref()?.node;
                match self.runtime.trees.node_type(node) {
                    NodeType::Text | NodeType::Attribute => {
                        let text = self.runtime.trees.string_value(node);
                        self.outputs.text(&text, false)?;
                    }
                    NodeType::Root | NodeType::Element => {
                        let slot = std::mem::take(&mut self.top()?.slot);
                        let (children, next) = match slot {
                            Slot::Builtin { children, next } => (children, next),
                            _ => (self.runtime.trees.children(node), 0),
                        };
                        if let Some(child) = children.get(next).copied() {
                            let size = children.len();
                            self.top()?.slot = Slot::Builtin {
                                children,
                                next: next + 1,
                            };
                            self.push_frame(
                                Arc::clone(program),
                                child,
                                next + 1,
                                size,
                                ScopeChoice::Fresh,
                                Completion::None,
                                false,
                            )?;
                            return Ok(Flow::Stay);
                        }
                    }
                    NodeType::Comment | NodeType::ProcessingInstruction => {}
                }
            }
            Instruction::Return => {
                if self.pop_frame()? {
                    self.outputs.root.end_output()?;
                    return Ok(Flow::Finished);
                }
                return Ok(Flow::Stay);
            }

            Instruction::Jump(target) => return Ok(Flow::Jump(*target)),
            Instruction::JumpIfTrue(target) => {
                if self.top_ref()?.boolean {
                    return Ok(Flow::Jump(*target));
                }
            }
            Instruction::JumpIfFalse(target) => {
                if !self.top_ref()?.boolean {
                    return Ok(Flow::Jump(*target));
                }
            }

            Instruction::StartCollectText => {
                self.outputs.push(LocalOutput::Text(TextCollector::new()))?;
            }
            Instruction::EndCollectText => match self.outputs.pop() {
                Some(LocalOutput::Text(collector)) => self.top()?.string = collector.into_text(),
                _ => return Err(TransformError::program("text collection end without a start")),
            },
            Instruction::StartCollectFragment => {
                self.outputs
                    .push(LocalOutput::Fragment(FragmentCollector::new()))?;
            }
            Instruction::EndCollectFragment => match self.outputs.pop() {
                Some(LocalOutput::Fragment(collector)) => {
                    let document = collector.finish()?;
                    let tree = self.runtime.trees.add(Box::new(document))?;
                    self.top()?.fragment = Some(tree);
                }
                _ => {
                    return Err(TransformError::program(
                        "fragment collection end without a start",
                    ));
                }
            },

            Instruction::Sort(id) => return self.sort(*id, ip, program, budget),
            Instruction::SetSortParameter {
                sort,
                key,
                parameter,
            } => {
                let frame = self.top()?;
                let value = frame.take_string();
                let outcome = frame
                    .sort_overrides
                    .entry((*sort, *key))
                    .or_default()
                    .apply(*parameter, value.trim());
                if let Err(message) = outcome {
                    self.warn(message);
                }
            }
            Instruction::AddFormattedNumber(id) => {
                let stylesheet = Arc::clone(&self.stylesheet);
                let spec = stylesheet.number(*id)?;
                let frame = self.top()?;
                let format = frame.take_string();
                let format = if format.is_empty() { &spec.format } else { &format };
                let text = spec.format_value(frame.number, format);
                self.outputs.text(&text, false)?;
            }
            Instruction::CountAndAddNumber(id) => return self.count_number(*id, ip, program),

            Instruction::TestParamPreset(variable) => {
                let decl = self.stylesheet.variable(*variable)?;
                let preset = if decl.global {
                    match self
                        .parameters
                        .iter()
                        .find(|(name, _)| name.same_expanded_name(&decl.name))
                    {
                        Some((_, value)) => {
                            self.runtime
                                .variables
                                .set_global(*variable, Rc::new(value.clone()));
                            true
                        }
                        None => false,
                    }
                } else {
                    let frame = self.frames.last().ok_or_else(|| {
                        TransformError::program("no active frame")
                    })?;
                    match frame.caller_params.as_ref().and_then(|p| p.get(&decl.name)) {
                        Some(value) => {
                            let scope = frame.scope.ok_or_else(|| {
                                TransformError::program("parameter outside of a scope")
                            })?;
                            self.runtime.variables.bind(scope, *variable, value)?;
                            true
                        }
                        None => false,
                    }
                };
                self.top()?.boolean = preset;
            }
            Instruction::SetVariable { variable, source } => {
                let value = ready!(self.source_value(*source, ip, program)?);
                let stylesheet = Arc::clone(&self.stylesheet);
                if stylesheet.variable(*variable)?.global {
                    self.runtime.variables.set_global(*variable, Rc::new(value));
                } else {
                    let scope = self.top_ref()?.scope.ok_or_else(|| {
                        TransformError::program("variable outside of a scope")
                    })?;
                    self.runtime.variables.bind(scope, *variable, Rc::new(value))?;
                }
            }
            Instruction::SetWithParam { variable, source } => {
                let value = ready!(self.source_value(*source, ip, program)?);
                let name = self.stylesheet.variable(*variable)?.name.clone();
                let params = self.top()?.params.last_mut().ok_or_else(|| {
                    TransformError::program("with-param outside of parameter collection")
                })?;
                Rc::make_mut(params).bind(name, Rc::new(value))?;
            }
            Instruction::StartCollectParams => {
                let frame = self.top()?;
                frame.params.try_reserve(1)?;
                frame.params.push(Rc::default());
            }
            Instruction::ResetCollectedParams => {
                self.top()?.params.pop();
            }

            Instruction::SendMessage { terminate } => {
                let text = self.top()?.take_string();
                log::info!("Message: {}", text);
                self.messages
                    .push(Diagnostic::new(MessageKind::Message, text.clone()));
                if *terminate {
                    return Err(TransformError::Terminated { message: text });
                }
            }
            Instruction::Error(id) => {
                return Err(TransformError::evaluation(
                    ip,
                    program.to_string(),
                    program.string(*id)?,
                ));
            }
            Instruction::ProcessKey(id) => return self.process_key(*id, ip, program, budget),
        }
        Ok(Flow::Next)
    }

    fn call_on_next_node(&mut self, callee: ProgramId, new_scope: bool) -> Result<Flow, TransformError> {
        let frame = self.top()?;
        let Some(node) = frame.nodes.get(frame.node_index).copied() else {
            frame.nodes.clear();
            frame.node_index = 0;
            return Ok(Flow::Next);
        };
        frame.node_index += 1;
        let (position, size) = (frame.node_index, frame.nodes.len());
        let callee = Arc::clone(self.stylesheet.program(callee)?);
        let scope = Self::scope_for(callee.kind, new_scope);
        self.push_frame(callee, node, position, size, scope, Completion::None, true)?;
        Ok(Flow::Stay)
    }

    fn sort(
        &mut self,
        id: crate::program::SortId,
        ip: usize,
        program: &Program,
        budget: &mut usize,
    ) -> Result<Flow, TransformError> {
        let stylesheet = Arc::clone(&self.stylesheet);
        let spec = stylesheet.sort(id)?;
        let frame = self.top()?;
        let keys: Vec<_> = spec
            .keys
            .iter()
            .enumerate()
            .map(|(index, key)| {
                frame
                    .sort_overrides
                    .get(&(id, index))
                    .cloned()
                    .unwrap_or_default()
                    .resolve(key)
            })
            .collect();
        let scope = frame.scope;
        let nodes = frame.nodes.clone();
        let mut progress = match std::mem::take(&mut frame.slot) {
            Slot::Sort(progress) => progress,
            _ => {
                let mut rows = Vec::new();
                rows.try_reserve(nodes.len())?;
                rows.resize_with(nodes.len(), Vec::new);
                SortProgress { rows, next: 0 }
            }
        };

        let total = nodes.len() * keys.len();
        let start = progress.next;
        while progress.next < total {
            if progress.next > start {
                if *budget == 0 {
                    self.top()?.slot = Slot::Sort(progress);
                    return Ok(Flow::Yield);
                }
                *budget -= 1;
            }
            let (index, key) = (progress.next / keys.len(), progress.next % keys.len());
            let node = nodes[index];
            let at = At {
                node,
                position: index + 1,
                size: nodes.len(),
                current: node,
                scope,
            };
            let value = match self
                .evaluate(spec.keys[key].select, at)
                .map_err(|e| located(e, ip, program))?
            {
                Eval::Ready(value) => value,
                Eval::NotYet(dependency) => {
                    self.top()?.slot = Slot::Sort(progress);
                    return Ok(Flow::Suspend(dependency));
                }
            };
            let value = match keys[key].data_type {
                SortDataType::Text => SortValue::Text(value.string_value(&self.runtime.trees)),
                SortDataType::Number => SortValue::Number(value.number_value(&self.runtime.trees)),
            };
            progress.rows[index].push(value);
            progress.next += 1;
        }

        let order = sorted_order(&progress.rows, &keys);
        let frame = self.top()?;
        frame.nodes = order.into_iter().map(|index| nodes[index]).collect();
        frame.node_index = 0;
        frame.sort_overrides.retain(|(sort, _), _| *sort != id);
        Ok(Flow::Next)
    }

    fn process_key(
        &mut self,
        id: crate::program::KeyId,
        ip: usize,
        program: &Program,
        budget: &mut usize,
    ) -> Result<Flow, TransformError> {
        let stylesheet = Arc::clone(&self.stylesheet);
        let definition = stylesheet.key(id)?;
        let tree = self.top_ref()?.node.tree;
        let slot = std::mem::take(&mut self.top()?.slot);
        let mut walk = match slot {
            Slot::Key(walk) => walk,
            _ => KeyWalk {
                nodes: self.runtime.trees.all_nodes(tree),
                next: 0,
                matched: None,
            },
        };

        let start = walk.next;
        while let Some(node) = walk.nodes.get(walk.next).copied() {
            if walk.next > start {
                if *budget == 0 {
                    self.top()?.slot = Slot::Key(walk);
                    return Ok(Flow::Yield);
                }
                *budget -= 1;
            }
            let at = At::node(node, None);
            let matched = match walk.matched {
                Some(matched) => matched,
                None => {
                    let mut matched = false;
                    for pattern in &definition.match_patterns {
                        match self.matches(*pattern, at).map_err(|e| located(e, ip, program))? {
                            Eval::Ready(true) => {
                                matched = true;
                                break;
                            }
                            Eval::Ready(false) => {}
                            Eval::NotYet(dependency) => {
                                self.top()?.slot = Slot::Key(walk);
                                return Ok(Flow::Suspend(dependency));
                            }
                        }
                    }
                    walk.matched = Some(matched);
                    matched
                }
            };
            if matched {
                let value = match self
                    .evaluate(definition.use_expr, at)
                    .map_err(|e| located(e, ip, program))?
                {
                    Eval::Ready(value) => value,
                    Eval::NotYet(dependency) => {
                        self.top()?.slot = Slot::Key(walk);
                        return Ok(Flow::Suspend(dependency));
                    }
                };
                let trees = &self.runtime.trees;
                match value {
                    Value::NodeSet(values) => {
                        for value in values {
                            self.runtime.keys.add(
                                &definition.name,
                                tree,
                                trees.string_value(value),
                                node,
                            )?;
                        }
                    }
                    other => {
                        self.runtime
                            .keys
                            .add(&definition.name, tree, other.string_value(trees), node)?;
                    }
                }
            }
            walk.next += 1;
            walk.matched = None;
        }
        Ok(Flow::Next)
    }

    fn count_number(
        &mut self,
        id: crate::program::NumberId,
        ip: usize,
        program: &Program,
    ) -> Result<Flow, TransformError> {
        let stylesheet = Arc::clone(&self.stylesheet);
        let spec = stylesheet.number(id)?;
        let frame = self.top()?;
        let node = frame.node;
        let scope = frame.scope;
        let mut memo = match std::mem::take(&mut frame.slot) {
            Slot::Number(memo) => memo,
            _ => HashMap::new(),
        };

        let mut pending = None;
        let numbers = {
            let evaluator = &mut self.evaluator;
            let runtime = &self.runtime;
            let mut test = |candidate: NodeRef, role: PatternRole| -> Result<Option<bool>, TransformError> {
                if let Some(answer) = memo.get(&(candidate, role)) {
                    return Ok(Some(*answer));
                }
                let patterns = match role {
                    PatternRole::Count => spec.count.as_ref(),
                    PatternRole::From => spec.from.as_ref(),
                };
                let answer = match (patterns, role) {
                    (None, PatternRole::Count) => same_kind(&runtime.trees, node, candidate),
                    (None, PatternRole::From) => false,
                    (Some(patterns), _) => {
                        let at = At {
                            node: candidate,
                            position: 1,
                            size: 1,
                            current: node,
                            scope,
                        };
                        let context = context(runtime, &stylesheet, at);
                        let mut any = false;
                        for pattern in patterns {
                            match evaluator
                                .matches(*pattern, &context)
                                .map_err(|e| located(e, ip, program))?
                            {
                                Eval::Ready(true) => {
                                    any = true;
                                    break;
                                }
                                Eval::Ready(false) => {}
                                Eval::NotYet(dependency) => {
                                    pending = Some(dependency);
                                    return Ok(None);
                                }
                            }
                        }
                        any
                    }
                };
                memo.insert((candidate, role), answer);
                Ok(Some(answer))
            };
            count_nodes(&runtime.trees, node, spec.level, &mut test)?
        };

        match numbers {
            Some(numbers) => {
                let format = self.top()?.take_string();
                let format = if format.is_empty() { &spec.format } else { &format };
                let text = spec.format_list(&numbers, format);
                self.outputs.text(&text, false)?;
                Ok(Flow::Next)
            }
            None => {
                self.top()?.slot = Slot::Number(memo);
                Ok(Flow::Suspend(pending.unwrap_or(Dependency::External)))
            }
        }
    }
}
