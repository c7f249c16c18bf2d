//! Values produced by expressions and held by variables.

use crate::trees::{NodeRef, TreeId, Trees};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Number(f64),
    Boolean(bool),
    /// Nodes in document order, without duplicates.
    NodeSet(Vec<NodeRef>),
    /// A result tree fragment, stored as its own tree.
    Fragment(TreeId),
}

impl Value {
    pub fn string_value(&self, trees: &Trees) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Number(n) => number_to_string(*n),
            Value::Boolean(b) => b.to_string(),
            Value::NodeSet(nodes) => nodes
                .first()
                .map(|node| trees.string_value(*node))
                .unwrap_or_default(),
            Value::Fragment(tree) => trees.string_value(trees.root(*tree)),
        }
    }

    pub fn number_value(&self, trees: &Trees) -> f64 {
        match self {
            Value::Number(n) => *n,
            Value::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            _ => string_to_number(&self.string_value(trees)),
        }
    }

    pub fn boolean_value(&self) -> bool {
        match self {
            Value::String(s) => !s.is_empty(),
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Boolean(b) => *b,
            Value::NodeSet(nodes) => !nodes.is_empty(),
            Value::Fragment(_) => true,
        }
    }

    /// The nodes of a node-set, or the root of a fragment. `None` for
    /// primitive values.
    pub fn nodes(&self, trees: &Trees) -> Option<Vec<NodeRef>> {
        match self {
            Value::NodeSet(nodes) => Some(nodes.clone()),
            Value::Fragment(tree) => Some(vec![trees.root(*tree)]),
            _ => None,
        }
    }
}

/// The XPath string form of a number.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e17 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// The XPath `number()` conversion of a string.
pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim_matches(|c| matches!(c, ' ' | '\t' | '\n' | '\r'));
    let valid = !trimmed.is_empty()
        && trimmed
            .strip_prefix('-')
            .unwrap_or(trimmed)
            .chars()
            .all(|c| c.is_ascii_digit() || c == '.')
        && trimmed.matches('.').count() <= 1
        && trimmed.chars().any(|c| c.is_ascii_digit());
    if valid {
        trimmed.parse().unwrap_or(f64::NAN)
    } else {
        f64::NAN
    }
}
