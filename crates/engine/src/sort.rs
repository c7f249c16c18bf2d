//! Sort key declarations and the stable multi-key comparison used by `Sort`.

use crate::program::{ExprId, SortParameter};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDataType {
    #[default]
    Text,
    Number,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaseOrder {
    UpperFirst,
    LowerFirst,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub select: ExprId,
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default)]
    pub data_type: SortDataType,
    #[serde(default)]
    pub case_order: Option<CaseOrder>,
    #[serde(default)]
    pub lang: Option<String>,
}

impl SortKey {
    pub fn new(select: ExprId) -> Self {
        Self {
            select,
            order: SortOrder::default(),
            data_type: SortDataType::default(),
            case_order: None,
            lang: None,
        }
    }

    pub fn descending(mut self) -> Self {
        self.order = SortOrder::Descending;
        self
    }

    pub fn numeric(mut self) -> Self {
        self.data_type = SortDataType::Number;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub keys: Vec<SortKey>,
}

/// Parameters set at run time by `SetSortParameter`, overriding the
/// declared ones for the next `Sort`.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct SortOverrides {
    pub order: Option<SortOrder>,
    pub data_type: Option<SortDataType>,
    pub case_order: Option<CaseOrder>,
    pub lang: Option<String>,
}

impl SortOverrides {
    /// Applies an attribute value template result. Unknown values are
    /// returned as an error message.
    pub fn apply(&mut self, parameter: SortParameter, value: &str) -> Result<(), String> {
        match parameter {
            SortParameter::Order => {
                self.order = Some(match value {
                    "ascending" => SortOrder::Ascending,
                    "descending" => SortOrder::Descending,
                    other => return Err(format!("invalid sort order '{}'", other)),
                });
            }
            SortParameter::DataType => {
                self.data_type = Some(match value {
                    "text" => SortDataType::Text,
                    "number" => SortDataType::Number,
                    other => return Err(format!("invalid sort data-type '{}'", other)),
                });
            }
            SortParameter::CaseOrder => {
                self.case_order = Some(match value {
                    "upper-first" => CaseOrder::UpperFirst,
                    "lower-first" => CaseOrder::LowerFirst,
                    other => return Err(format!("invalid sort case-order '{}'", other)),
                });
            }
            SortParameter::Lang => self.lang = Some(value.to_string()),
        }
        Ok(())
    }

    pub fn resolve(&self, key: &SortKey) -> ResolvedSortKey {
        ResolvedSortKey {
            order: self.order.unwrap_or(key.order),
            data_type: self.data_type.unwrap_or(key.data_type),
            case_order: self.case_order.or(key.case_order),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ResolvedSortKey {
    pub order: SortOrder,
    pub data_type: SortDataType,
    pub case_order: Option<CaseOrder>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SortValue {
    Text(String),
    Number(f64),
}

/// Case-insensitive comparison; strings equal under folding are ordered by
/// the first character whose case differs.
pub fn compare_text(a: &str, b: &str, case_order: Option<CaseOrder>) -> Ordering {
    let folded = a
        .chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase));
    if folded != Ordering::Equal {
        return folded;
    }
    let Some(case_order) = case_order else {
        return a.cmp(b);
    };
    for (x, y) in a.chars().zip(b.chars()) {
        if x != y {
            let upper = x.is_uppercase();
            return match (case_order, upper) {
                (CaseOrder::UpperFirst, true) | (CaseOrder::LowerFirst, false) => Ordering::Less,
                _ => Ordering::Greater,
            };
        }
    }
    a.len().cmp(&b.len())
}

/// NaN sorts before every number.
pub fn compare_numbers(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

fn compare_values(a: &SortValue, b: &SortValue, key: &ResolvedSortKey) -> Ordering {
    let ordering = match (a, b) {
        (SortValue::Number(x), SortValue::Number(y)) => compare_numbers(*x, *y),
        (SortValue::Text(x), SortValue::Text(y)) => compare_text(x, y, key.case_order),
        (SortValue::Number(_), SortValue::Text(_)) => Ordering::Less,
        (SortValue::Text(_), SortValue::Number(_)) => Ordering::Greater,
    };
    match key.order {
        SortOrder::Ascending => ordering,
        SortOrder::Descending => ordering.reverse(),
    }
}

/// Returns the permutation that sorts `rows` (one value per key for each
/// item). Items that compare equal keep their original order.
pub(crate) fn sorted_order(rows: &[Vec<SortValue>], keys: &[ResolvedSortKey]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..rows.len()).collect();
    order.sort_by(|&a, &b| {
        keys.iter()
            .enumerate()
            .map(|(k, key)| compare_values(&rows[a][k], &rows[b][k], key))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
    order
}
