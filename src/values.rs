//! Cell values of a record table and the normalisations the comparators,
//! predicates and renderer rely on.

use serde::Deserialize;

/// Placeholder shown for missing values.
pub const NA: &str = "N/A";

#[derive(Debug, Clone, PartialEq)]
pub enum RowValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Link { url: String, text: String },
}

/// Link cells are delivered as JSON objects inside string columns.
#[derive(Deserialize)]
struct LinkCell {
    url: String,
    value: serde_json::Value,
}

impl RowValue {
    /// Interpret a raw string cell. JSON link objects become `Link`, blank cells `Null`.
    pub fn from_cell(cell: &str) -> RowValue {
        let trimmed = cell.trim();
        if trimmed.is_empty() {
            return RowValue::Null;
        }
        if trimmed.starts_with('{')
            && let Ok(link) = serde_json::from_str::<LinkCell>(trimmed)
        {
            let text = match link.value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            };
            return RowValue::Link {
                url: link.url,
                text,
            };
        }
        RowValue::Text(cell.to_string())
    }

    pub fn is_missing(&self) -> bool {
        match self {
            RowValue::Null => true,
            RowValue::Number(n) => n.is_nan(),
            RowValue::Text(s) => s.trim().is_empty(),
            RowValue::Link { text, .. } => text.trim().is_empty(),
            RowValue::Bool(_) => false,
        }
    }

    /// Text used by the mixed alphanumeric ordering. Only strings, finite
    /// numbers and link payloads produce text, everything else is empty.
    pub fn sort_text(&self) -> String {
        match self {
            RowValue::Number(n) if n.is_finite() => format_number(*n),
            RowValue::Text(s) => s.clone(),
            RowValue::Link { text, .. } => text.clone(),
            _ => String::new(),
        }
    }

    /// Text used for display, filtering and value counts. Missing values
    /// render as the `N/A` placeholder when `show_na` is set.
    pub fn display_text(&self, show_na: bool) -> String {
        match self {
            RowValue::Null => {
                if show_na {
                    NA.to_string()
                } else {
                    String::new()
                }
            }
            RowValue::Bool(b) => b.to_string(),
            RowValue::Number(n) if n.is_nan() => {
                if show_na {
                    NA.to_string()
                } else {
                    String::new()
                }
            }
            RowValue::Number(n) => format_number(*n),
            RowValue::Text(s) => s.clone(),
            RowValue::Link { text, .. } => text.clone(),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            RowValue::Null => false,
            RowValue::Bool(b) => *b,
            RowValue::Number(n) => *n != 0.0 && !n.is_nan(),
            RowValue::Text(s) => !s.is_empty(),
            RowValue::Link { text, .. } => !text.is_empty(),
        }
    }

    /// Numeric reading of the value, if it has one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            RowValue::Number(n) if !n.is_nan() => Some(*n),
            RowValue::Text(s) => parse_number(s),
            RowValue::Link { text, .. } => parse_number(text),
            _ => None,
        }
    }
}

pub fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|n| !n.is_nan())
}

fn format_number(n: f64) -> String {
    if n.is_finite() { format!("{n}") } else { String::new() }
}

/// One column of the row matrix as delivered by the loader.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub values: Vec<RowValue>,
}

/// The row matrix of a record table, stored column-wise.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordData {
    pub fields: Vec<Field>,
    nrows: usize,
}

impl RecordData {
    pub fn new(fields: Vec<Field>) -> Self {
        let nrows = fields.iter().map(|f| f.values.len()).min().unwrap_or(0);
        RecordData { fields, nrows }
    }

    pub fn len(&self) -> usize {
        self.nrows
    }

    pub fn is_empty(&self) -> bool {
        self.nrows == 0
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn value(&self, field: usize, row: usize) -> &RowValue {
        static NULL: RowValue = RowValue::Null;
        self.fields
            .get(field)
            .and_then(|f| f.values.get(row))
            .unwrap_or(&NULL)
    }
}
