//! A closure-backed [`Evaluator`] for tests and benchmarks.
//!
//! Each registered expression or pattern is a closure over the
//! [`EvalContext`]; the helpers cover the handful of XPath shapes the
//! interpreter tests need.

use crate::error::EvalError;
use crate::evaluator::{Dependency, Eval, EvalContext, Evaluator};
use crate::program::{ExprId, PatternId, VariableId};
use crate::trees::NodeRef;
use crate::value::Value;
use std::cell::Cell;
use std::rc::Rc;
use xsltvm_tree::NodeType;
use xsltvm_types::DocumentUri;

type ExprFn = Box<dyn FnMut(&EvalContext<'_>) -> Result<Eval<Value>, EvalError>>;
type PatternFn = Box<dyn FnMut(&EvalContext<'_>) -> Result<Eval<bool>, EvalError>>;

#[derive(Default)]
pub struct ScriptedEvaluator {
    expressions: Vec<ExprFn>,
    patterns: Vec<PatternFn>,
    calls: Rc<Cell<usize>>,
}

fn local_name_is(context: &EvalContext<'_>, node: NodeRef, local: &str) -> bool {
    context
        .trees()
        .name(node)
        .is_some_and(|name| name.local_name == local)
}

impl ScriptedEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts every `evaluate` and `matches` call.
    pub fn call_counter(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.calls)
    }

    pub fn expression(
        &mut self,
        f: impl FnMut(&EvalContext<'_>) -> Result<Eval<Value>, EvalError> + 'static,
    ) -> ExprId {
        self.expressions.push(Box::new(f));
        ExprId(self.expressions.len() - 1)
    }

    pub fn pattern(
        &mut self,
        f: impl FnMut(&EvalContext<'_>) -> Result<Eval<bool>, EvalError> + 'static,
    ) -> PatternId {
        self.patterns.push(Box::new(f));
        PatternId(self.patterns.len() - 1)
    }

    pub fn literal(&mut self, value: Value) -> ExprId {
        self.expression(move |_| Ok(Eval::Ready(value.clone())))
    }

    pub fn string(&mut self, text: &str) -> ExprId {
        self.literal(Value::String(text.to_string()))
    }

    /// `.`
    pub fn context_node(&mut self) -> ExprId {
        self.expression(|context| Ok(Eval::Ready(Value::NodeSet(vec![context.node]))))
    }

    /// `node()`
    pub fn children(&mut self) -> ExprId {
        self.expression(|context| {
            Ok(Eval::Ready(Value::NodeSet(context.trees().children(context.node))))
        })
    }

    /// `name`, the element children with a local name.
    pub fn child_elements(&mut self, local: &str) -> ExprId {
        let local = local.to_string();
        self.expression(move |context| {
            let nodes = context
                .trees()
                .children(context.node)
                .into_iter()
                .filter(|child| {
                    context.trees().node_type(*child) == NodeType::Element
                        && local_name_is(context, *child, &local)
                })
                .collect();
            Ok(Eval::Ready(Value::NodeSet(nodes)))
        })
    }

    /// `//name` over the context node's document.
    pub fn descendants(&mut self, local: &str) -> ExprId {
        let local = local.to_string();
        self.expression(move |context| {
            let nodes = context
                .trees()
                .all_nodes(context.node.tree)
                .into_iter()
                .filter(|node| {
                    context.trees().node_type(*node) == NodeType::Element
                        && local_name_is(context, *node, &local)
                })
                .collect();
            Ok(Eval::Ready(Value::NodeSet(nodes)))
        })
    }

    /// `@name`
    pub fn attribute(&mut self, local: &str) -> ExprId {
        let local = local.to_string();
        self.expression(move |context| {
            let nodes = context
                .trees()
                .attributes(context.node)
                .into_iter()
                .filter(|attribute| local_name_is(context, *attribute, &local))
                .collect();
            Ok(Eval::Ready(Value::NodeSet(nodes)))
        })
    }

    /// `string(.)`
    pub fn string_value(&mut self) -> ExprId {
        self.expression(|context| Ok(Eval::Ready(Value::String(context.string_value(context.node)))))
    }

    /// `position()`
    pub fn position(&mut self) -> ExprId {
        self.expression(|context| Ok(Eval::Ready(Value::Number(context.position as f64))))
    }

    /// `last()`
    pub fn last(&mut self) -> ExprId {
        self.expression(|context| Ok(Eval::Ready(Value::Number(context.size as f64))))
    }

    /// `$name`
    pub fn variable(&mut self, variable: VariableId) -> ExprId {
        self.expression(move |context| {
            Ok(match context.variable(variable)? {
                Eval::Ready(value) => Eval::Ready((*value).clone()),
                Eval::NotYet(dependency) => Eval::NotYet(dependency),
            })
        })
    }

    /// `key('name', 'value')`
    pub fn key(&mut self, name: &str, value: &str) -> ExprId {
        let (name, value) = (name.to_string(), value.to_string());
        self.expression(move |context| {
            Ok(match context.key(&name, &value)? {
                Eval::Ready(nodes) => Eval::Ready(Value::NodeSet(nodes)),
                Eval::NotYet(dependency) => Eval::NotYet(dependency),
            })
        })
    }

    /// `document('uri')`
    pub fn document(&mut self, uri: &str) -> ExprId {
        let uri = DocumentUri::from(uri);
        self.expression(move |context| {
            Ok(match context.document(&uri) {
                Eval::Ready(root) => Eval::Ready(Value::NodeSet(root.into_iter().collect())),
                Eval::NotYet(dependency) => Eval::NotYet(dependency),
            })
        })
    }

    /// Reports an external dependency the first `times` calls, then yields
    /// `value`.
    pub fn suspending(&mut self, times: usize, value: Value) -> ExprId {
        let mut remaining = times;
        self.expression(move |_| {
            if remaining > 0 {
                remaining -= 1;
                return Ok(Eval::NotYet(Dependency::External));
            }
            Ok(Eval::Ready(value.clone()))
        })
    }

    /// Fails every evaluation with `message`.
    pub fn failing(&mut self, message: &str) -> ExprId {
        let message = message.to_string();
        self.expression(move |_| Err(EvalError::expression(message.clone())))
    }

    /// Matches elements with a local name.
    pub fn element_pattern(&mut self, local: &str) -> PatternId {
        let local = local.to_string();
        self.pattern(move |context| {
            Ok(Eval::Ready(
                context.trees().node_type(context.node) == NodeType::Element
                    && local_name_is(context, context.node, &local),
            ))
        })
    }

    pub fn root_pattern(&mut self) -> PatternId {
        self.pattern(|context| Ok(Eval::Ready(context.trees().node_type(context.node) == NodeType::Root)))
    }

    pub fn text_pattern(&mut self) -> PatternId {
        self.pattern(|context| Ok(Eval::Ready(context.trees().node_type(context.node) == NodeType::Text)))
    }
}

impl Evaluator for ScriptedEvaluator {
    fn evaluate(&mut self, expr: ExprId, context: &EvalContext<'_>) -> Result<Eval<Value>, EvalError> {
        self.calls.set(self.calls.get() + 1);
        let f = self
            .expressions
            .get_mut(expr.0)
            .ok_or_else(|| EvalError::expression(format!("unknown {}", expr)))?;
        (**f)(context)
    }

    fn matches(&mut self, pattern: PatternId, context: &EvalContext<'_>) -> Result<Eval<bool>, EvalError> {
        self.calls.set(self.calls.get() + 1);
        let f = self
            .patterns
            .get_mut(pattern.0)
            .ok_or_else(|| EvalError::expression(format!("unknown {}", pattern)))?;
        (**f)(context)
    }
}
