//! `xsl:number`: counting nodes by level and formatting number lists.

use crate::error::TransformError;
use crate::program::PatternId;
use crate::trees::{NodeRef, Trees};
use crate::value::number_to_string;
use serde::{Deserialize, Serialize};
use xsltvm_tree::NodeType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumberLevel {
    #[default]
    Single,
    Multiple,
    Any,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumberSpec {
    pub level: NumberLevel,
    /// `None` counts nodes of the same type and name as the context node.
    pub count: Option<Vec<PatternId>>,
    pub from: Option<Vec<PatternId>>,
    pub format: String,
    pub grouping_separator: Option<char>,
    pub grouping_size: usize,
}

impl Default for NumberSpec {
    fn default() -> Self {
        Self {
            level: NumberLevel::Single,
            count: None,
            from: None,
            format: "1".into(),
            grouping_separator: None,
            grouping_size: 0,
        }
    }
}

impl NumberSpec {
    fn grouping(&self) -> Option<(char, usize)> {
        match self.grouping_separator {
            Some(separator) if self.grouping_size > 0 => Some((separator, self.grouping_size)),
            _ => None,
        }
    }

    /// Formats the value of `AddFormattedNumber`. Values that cannot be
    /// numbered print as their string value.
    pub fn format_value(&self, value: f64, format: &str) -> String {
        if value.is_nan() || value.is_infinite() || value < 0.5 {
            return number_to_string(value);
        }
        format_number_list(&[(value + 0.5).floor() as u64], format, self.grouping())
    }

    pub fn format_list(&self, numbers: &[u64], format: &str) -> String {
        format_number_list(numbers, format, self.grouping())
    }
}

/// Which of a number's pattern lists a test asks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum PatternRole {
    Count,
    From,
}

/// Computes the number list for `node`. `test` answers pattern questions and
/// returns `Ok(None)` when an answer is not available yet, in which case the
/// whole count returns `Ok(None)` and can be retried.
pub(crate) fn count_nodes(
    trees: &Trees,
    node: NodeRef,
    level: NumberLevel,
    test: &mut dyn FnMut(NodeRef, PatternRole) -> Result<Option<bool>, TransformError>,
) -> Result<Option<Vec<u64>>, TransformError> {
    macro_rules! ask {
        ($node:expr, $role:expr) => {
            match test($node, $role)? {
                Some(answer) => answer,
                None => return Ok(None),
            }
        };
    }

    match level {
        NumberLevel::Single => {
            let mut current = Some(node);
            while let Some(candidate) = current {
                if ask!(candidate, PatternRole::Count) {
                    let mut number = 1;
                    let mut sibling = trees.previous_sibling(candidate);
                    while let Some(previous) = sibling {
                        if ask!(previous, PatternRole::Count) {
                            number += 1;
                        }
                        sibling = trees.previous_sibling(previous);
                    }
                    return Ok(Some(vec![number]));
                }
                if ask!(candidate, PatternRole::From) {
                    break;
                }
                current = trees.parent(candidate);
            }
            Ok(Some(Vec::new()))
        }
        NumberLevel::Multiple => {
            let mut numbers = Vec::new();
            let mut current = Some(node);
            while let Some(candidate) = current {
                if ask!(candidate, PatternRole::From) {
                    break;
                }
                if ask!(candidate, PatternRole::Count) {
                    let mut number = 1;
                    let mut sibling = trees.previous_sibling(candidate);
                    while let Some(previous) = sibling {
                        if ask!(previous, PatternRole::Count) {
                            number += 1;
                        }
                        sibling = trees.previous_sibling(previous);
                    }
                    numbers.try_reserve(1)?;
                    numbers.push(number);
                }
                current = trees.parent(candidate);
            }
            numbers.reverse();
            Ok(Some(numbers))
        }
        NumberLevel::Any => {
            // An attribute comes after its owner element and before the
            // element's children, so the walk back starts at the owner.
            let anchor = match trees.node_type(node) {
                NodeType::Attribute => trees.parent(node).ok_or_else(|| {
                    TransformError::program(format!("attribute {} has no owner element", node))
                })?,
                _ => node,
            };
            let all = trees.all_nodes(node.tree);
            let Some(end) = all.iter().position(|n| *n == anchor) else {
                return Err(TransformError::program(format!(
                    "node {} is not part of its tree",
                    anchor
                )));
            };
            let mut number = 0;
            if anchor != node && ask!(node, PatternRole::Count) {
                number += 1;
            }
            for candidate in all[..=end].iter().rev() {
                if *candidate != node {
                    if trees.node_type(*candidate) == NodeType::Attribute {
                        continue;
                    }
                    if ask!(*candidate, PatternRole::From) {
                        break;
                    }
                }
                if ask!(*candidate, PatternRole::Count) {
                    number += 1;
                }
            }
            Ok(Some(if number == 0 { Vec::new() } else { vec![number] }))
        }
    }
}

/// Whether `candidate` is counted when no count pattern is given.
pub(crate) fn same_kind(trees: &Trees, node: NodeRef, candidate: NodeRef) -> bool {
    let kind = trees.node_type(node);
    if trees.node_type(candidate) != kind {
        return false;
    }
    match (trees.name(node), trees.name(candidate)) {
        (Some(a), Some(b)) => a.same_expanded_name(b),
        (None, None) => true,
        _ => false,
    }
}

/// A format string split into its prefix, format tokens with the
/// separators preceding them, and suffix.
struct FormatTokens<'f> {
    prefix: &'f str,
    tokens: Vec<(&'f str, &'f str)>,
    suffix: &'f str,
}

fn tokenize(format: &str) -> FormatTokens<'_> {
    let mut runs: Vec<(bool, &str)> = Vec::new();
    let mut start = 0;
    let mut alphanumeric = None;
    for (index, c) in format.char_indices() {
        let kind = c.is_alphanumeric();
        match alphanumeric {
            Some(previous) if previous != kind => {
                runs.push((previous, &format[start..index]));
                start = index;
            }
            _ => {}
        }
        alphanumeric = Some(kind);
    }
    if let Some(kind) = alphanumeric {
        runs.push((kind, &format[start..]));
    }

    let mut prefix = "";
    let mut suffix = "";
    if let Some((false, text)) = runs.first().copied() {
        prefix = text;
        runs.remove(0);
    }
    if let Some((false, text)) = runs.last().copied() {
        suffix = text;
        runs.pop();
    }
    let mut tokens = Vec::new();
    let mut separator = "";
    for (kind, text) in runs {
        if kind {
            tokens.push((separator, text));
        } else {
            separator = text;
        }
    }
    FormatTokens {
        prefix,
        tokens,
        suffix,
    }
}

/// Formats `numbers` per an `xsl:number` format string. Extra numbers reuse
/// the last token and separator; a format with no tokens behaves as `"1"`.
pub fn format_number_list(numbers: &[u64], format: &str, grouping: Option<(char, usize)>) -> String {
    if numbers.is_empty() {
        return String::new();
    }
    let parsed = tokenize(format);
    let mut out = String::from(parsed.prefix);
    for (index, number) in numbers.iter().enumerate() {
        let (separator, token) = match parsed.tokens.get(index).or(parsed.tokens.last()) {
            Some(pair) => *pair,
            None => (".", "1"),
        };
        if index > 0 {
            out.push_str(if separator.is_empty() { "." } else { separator });
        }
        out.push_str(&format_token(*number, token, grouping));
    }
    out.push_str(parsed.suffix);
    out
}

fn format_token(number: u64, token: &str, grouping: Option<(char, usize)>) -> String {
    match token {
        "a" => alphabetic(number, b'a'),
        "A" => alphabetic(number, b'A'),
        "i" if number < 4000 => roman(number).to_lowercase(),
        "I" if number < 4000 => roman(number),
        _ => {
            let width = if token.chars().all(|c| c.is_ascii_digit()) && token.ends_with('1') {
                token.len()
            } else {
                1
            };
            group(&format!("{:0width$}", number, width = width), grouping)
        }
    }
}

fn alphabetic(mut number: u64, base: u8) -> String {
    if number == 0 {
        return "0".into();
    }
    let mut letters = Vec::new();
    while number > 0 {
        number -= 1;
        letters.push((base + (number % 26) as u8) as char);
        number /= 26;
    }
    letters.iter().rev().collect()
}

fn roman(mut number: u64) -> String {
    const NUMERALS: [(u64, &str); 13] = [
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];
    if number == 0 {
        return "0".into();
    }
    let mut out = String::new();
    for (value, numeral) in NUMERALS {
        while number >= value {
            out.push_str(numeral);
            number -= value;
        }
    }
    out
}

fn group(digits: &str, grouping: Option<(char, usize)>) -> String {
    let Some((separator, size)) = grouping else {
        return digits.to_string();
    };
    let mut out = String::new();
    for (index, c) in digits.chars().enumerate() {
        let remaining = digits.len() - index;
        if index > 0 && remaining % size == 0 {
            out.push(separator);
        }
        out.push(c);
    }
    out
}
