use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::columns::{ColumnDescriptor, FilterType};
use crate::values::{NA, RecordData, RowValue, parse_number};

/// Value of a column filter as entered by the user or restored from state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl FilterValue {
    /// Empty values deactivate a filter.
    pub fn is_empty(&self) -> bool {
        match self {
            FilterValue::Number(n) => n.is_nan(),
            FilterValue::Text(s) => s.trim().is_empty(),
            FilterValue::List(l) => l.iter().all(|v| v.trim().is_empty()),
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            FilterValue::Number(n) => n.to_string(),
            FilterValue::Text(s) => s.clone(),
            FilterValue::List(l) => l.join(","),
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            FilterValue::Number(n) if !n.is_nan() => Some(*n),
            FilterValue::Text(s) => parse_number(s),
            _ => None,
        }
    }

    fn as_list(&self) -> Vec<String> {
        match self {
            FilterValue::List(l) => l.iter().map(|v| v.trim().to_lowercase()).collect(),
            other => split_list(&other.as_text()),
        }
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Row inclusion tests, one per family of filter types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    Includes,
    BooleanFlag,
    MultiIncludes,
    IncludesAny,
    AtLeast,
    SignificantAt,
    NumericText,
    FuzzyText,
}

impl Predicate {
    pub fn for_filter(filter: FilterType) -> Self {
        match filter {
            FilterType::Select | FilterType::Pie => Predicate::Includes,
            FilterType::BooleanPie => Predicate::BooleanFlag,
            FilterType::MultiSelect => Predicate::MultiIncludes,
            FilterType::CheckboxSelect => Predicate::IncludesAny,
            FilterType::GreaterThan => Predicate::AtLeast,
            FilterType::PValueThreshold => Predicate::SignificantAt,
            FilterType::Numeric => Predicate::NumericText,
            FilterType::FuzzyText => Predicate::FuzzyText,
        }
    }

    pub fn matches(self, value: &RowValue, filter: &FilterValue) -> bool {
        match self {
            Predicate::Includes => includes(value, &filter.as_text()),
            Predicate::BooleanFlag => match parse_flag(&filter.as_text()) {
                Some(flag) => value.is_truthy() == flag,
                None => includes(value, &filter.as_text()),
            },
            Predicate::MultiIncludes => multi_includes(value, &filter.as_list()),
            Predicate::IncludesAny => {
                let text = value.display_text(false).to_lowercase();
                !text.is_empty() && filter.as_list().iter().any(|v| text.contains(v.as_str()))
            }
            Predicate::AtLeast => match (value.as_number(), filter.as_number()) {
                (Some(v), Some(threshold)) => v >= threshold,
                _ => false,
            },
            // smaller p-values are more significant, the threshold is an upper bound
            Predicate::SignificantAt => match (value.as_number(), filter.as_number()) {
                (Some(v), Some(threshold)) => v <= threshold,
                _ => false,
            },
            Predicate::NumericText => {
                let text = value.display_text(false);
                !text.is_empty() && text.contains(filter.as_text().trim())
            }
            Predicate::FuzzyText => fuzzy_match(&value.display_text(false), &filter.as_text()),
        }
    }

    /// Keep the rows (indices into `values`) that pass the filter.
    pub fn filter_rows(self, rows: &[usize], values: &[RowValue], filter: &FilterValue) -> Vec<usize> {
        rows.iter()
            .copied()
            .filter(|&row| {
                values
                    .get(row)
                    .is_some_and(|value| self.matches(value, filter))
            })
            .collect()
    }
}

fn includes(value: &RowValue, filter: &str) -> bool {
    let filter = filter.trim().to_lowercase();
    // "N/A" is how missing values are offered for selection
    let text = value
        .display_text(filter == NA.to_lowercase())
        .to_lowercase();
    !text.is_empty() && text.contains(&filter)
}

fn multi_includes(value: &RowValue, selected: &[String]) -> bool {
    let text = value.display_text(false).to_lowercase();
    if text.contains("//") {
        let overlap = text
            .split(" // ")
            .filter(|member| selected.iter().any(|s| s == member.trim()))
            .count();
        overlap > 1
    } else {
        selected.iter().any(|s| *s == text.trim())
    }
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Case insensitive, in order subsequence match.
fn fuzzy_match(text: &str, pattern: &str) -> bool {
    let text = text.to_lowercase();
    let mut chars = text.chars();
    pattern
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .all(|p| chars.any(|c| c == p))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveFilter {
    pub id: String,
    pub value: FilterValue,
}

/// The filters currently applied to a table, at most one per column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActiveFilters {
    filters: Vec<ActiveFilter>,
}

impl ActiveFilters {
    /// Set or replace the filter of a column. Missing or empty values drop the
    /// filter; returns whether a filter for the column remains active.
    pub fn set(&mut self, id: &str, value: Option<FilterValue>) -> bool {
        match value {
            Some(value) if !value.is_empty() => {
                match self.filters.iter_mut().find(|f| f.id == id) {
                    Some(active) => active.value = value,
                    None => self.filters.push(ActiveFilter {
                        id: id.to_string(),
                        value,
                    }),
                }
                true
            }
            _ => {
                self.remove(id);
                false
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&FilterValue> {
        self.filters.iter().find(|f| f.id == id).map(|f| &f.value)
    }

    pub fn remove(&mut self, id: &str) {
        self.filters.retain(|f| f.id != id);
    }

    /// Drop filters that are empty or target columns that do not exist.
    pub fn retain_valid(&mut self, columns: &[ColumnDescriptor]) {
        self.filters.retain(|f| {
            !f.value.is_empty() && columns.iter().any(|c| c.id == f.id && c.filter.is_some())
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActiveFilter> {
        self.filters.iter()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Apply all filters; a row must pass every one of them.
    pub fn apply(&self, rows: &[usize], data: &RecordData, columns: &[ColumnDescriptor]) -> Vec<usize> {
        let mut rows = rows.to_vec();
        for active in self.filters.iter() {
            let Some(column) = columns.iter().find(|c| c.id == active.id) else {
                warn!("Ignoring filter on unknown column \"{}\"", active.id);
                continue;
            };
            let Some(filter) = column.filter else {
                warn!("Ignoring filter on unfilterable column \"{}\"", active.id);
                continue;
            };
            let Some(field) = data.fields.get(column.field) else {
                continue;
            };
            rows = Predicate::for_filter(filter).filter_rows(&rows, &field.values, &active.value);
            trace!("Filter {} {:?} leaves {} rows", active.id, active.value, rows.len());
        }
        rows
    }
}

/// Free text search over every column that takes part in global filtering.
pub fn global_search(
    rows: &[usize],
    data: &RecordData,
    columns: &[ColumnDescriptor],
    term: &str,
) -> Vec<usize> {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return rows.to_vec();
    }
    let searchable: Vec<&ColumnDescriptor> =
        columns.iter().filter(|c| !c.disable_global_filter).collect();
    rows.iter()
        .copied()
        .filter(|&row| {
            searchable.iter().any(|c| {
                data.value(c.field, row)
                    .display_text(false)
                    .to_lowercase()
                    .contains(&term)
            })
        })
        .collect()
}
