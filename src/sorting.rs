use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::columns::{AccessorType, ColumnDescriptor};
use crate::values::{RecordData, RowValue, parse_number};

/// The closed set of orderings a column can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortComparator {
    Alphanumeric,
    BooleanFlag,
    Link,
    ScientificNotation,
}

/// One entry of a (possibly multi column) sort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSort {
    pub id: String,
    #[serde(default)]
    pub descending: bool,
}

impl ColumnSort {
    pub fn ascending(id: impl Into<String>) -> Self {
        ColumnSort {
            id: id.into(),
            descending: false,
        }
    }

    pub fn descending(id: impl Into<String>) -> Self {
        ColumnSort {
            id: id.into(),
            descending: true,
        }
    }
}

impl SortComparator {
    pub fn for_column(accessor: AccessorType, id: &str) -> Self {
        match accessor {
            AccessorType::BooleanFlag => SortComparator::BooleanFlag,
            AccessorType::ScientificNotation => SortComparator::ScientificNotation,
            AccessorType::Link => SortComparator::Link,
            AccessorType::Float | AccessorType::StackedBar => SortComparator::Alphanumeric,
            // legacy link columns are only recognisable by name
            AccessorType::Default if id.ends_with("link") => SortComparator::Link,
            AccessorType::Default => SortComparator::Alphanumeric,
        }
    }

    pub fn compare(self, a: &RowValue, b: &RowValue) -> Ordering {
        match self {
            SortComparator::Alphanumeric => compare_alphanumeric(&a.sort_text(), &b.sort_text()),
            SortComparator::BooleanFlag => a.is_truthy().cmp(&b.is_truthy()),
            SortComparator::Link => compare_link(a, b),
            SortComparator::ScientificNotation => compare_scientific(a, b),
        }
    }
}

fn split_runs(s: &str) -> Vec<&str> {
    let mut runs = Vec::new();
    let mut start = 0;
    let mut digits: Option<bool> = None;
    for (idx, c) in s.char_indices() {
        let is_digit = c.is_ascii_digit();
        if digits.is_some_and(|d| d != is_digit) {
            runs.push(&s[start..idx]);
            start = idx;
        }
        digits = Some(is_digit);
    }
    if start < s.len() {
        runs.push(&s[start..]);
    }
    runs
}

fn is_digit_run(run: &str) -> bool {
    run.bytes().all(|b| b.is_ascii_digit())
}

// Digit runs can be longer than any integer type, compare them by magnitude.
fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Mixed alphanumeric order: "file2" < "file10".
pub fn compare_alphanumeric(a: &str, b: &str) -> Ordering {
    let runs_a = split_runs(a);
    let runs_b = split_runs(b);
    for (ra, rb) in runs_a.iter().zip(runs_b.iter()) {
        let ord = match (is_digit_run(ra), is_digit_run(rb)) {
            (true, true) => compare_digit_runs(ra, rb),
            (false, false) => ra.cmp(rb),
            (false, true) => Ordering::Less,
            (true, false) => Ordering::Greater,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    runs_a.len().cmp(&runs_b.len())
}

fn compare_link(a: &RowValue, b: &RowValue) -> Ordering {
    let url = |v: &RowValue| match v {
        RowValue::Link { url, .. } => url.clone(),
        _ => String::new(),
    };
    compare_alphanumeric(&a.sort_text(), &b.sort_text()).then_with(|| url(a).cmp(&url(b)))
}

enum SciKey {
    Number(f64),
    Text(String),
}

fn scientific_key(value: &RowValue) -> SciKey {
    if value.is_missing() {
        return SciKey::Number(f64::NEG_INFINITY);
    }
    match value {
        RowValue::Number(n) => SciKey::Number(*n),
        RowValue::Bool(b) => SciKey::Number(if *b { 1.0 } else { 0.0 }),
        RowValue::Text(s) | RowValue::Link { text: s, .. } => match parse_number(s) {
            Some(n) => SciKey::Number(n),
            None => SciKey::Text(s.clone()),
        },
        RowValue::Null => SciKey::Number(f64::NEG_INFINITY),
    }
}

// Numbers (including missing as -inf) sort before text that is not numeric.
fn compare_scientific(a: &RowValue, b: &RowValue) -> Ordering {
    match (scientific_key(a), scientific_key(b)) {
        (SciKey::Number(x), SciKey::Number(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (SciKey::Number(_), SciKey::Text(_)) => Ordering::Less,
        (SciKey::Text(_), SciKey::Number(_)) => Ordering::Greater,
        (SciKey::Text(x), SciKey::Text(y)) => x.cmp(&y),
    }
}

/// Stable sort of `rows` (indices into `data`) by the given sort columns in
/// priority order. Unknown column ids are ignored.
pub fn sort_rows(
    rows: &mut [usize],
    data: &RecordData,
    columns: &[ColumnDescriptor],
    sort_by: &[ColumnSort],
) {
    let keys: Vec<(&ColumnDescriptor, bool)> = sort_by
        .iter()
        .filter_map(|s| match columns.iter().find(|c| c.id == s.id) {
            Some(column) => Some((column, s.descending)),
            None => {
                warn!("Ignoring sort on unknown column \"{}\"", s.id);
                None
            }
        })
        .collect();
    if keys.is_empty() {
        return;
    }
    trace!("Sorting {} rows by {:?}", rows.len(), sort_by);

    rows.sort_by(|&ra, &rb| {
        for (column, descending) in keys.iter() {
            let ord = column
                .sort
                .compare(data.value(column.field, ra), data.value(column.field, rb));
            let ord = if *descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::Field;
    use rstest::rstest;

    fn text(s: &str) -> RowValue {
        RowValue::Text(s.to_string())
    }

    #[test]
    fn alphanumeric_orders_embedded_numbers_numerically() {
        let cmp = SortComparator::Alphanumeric;
        assert_eq!(cmp.compare(&text("file2"), &text("file10")), Ordering::Less);
        assert_eq!(cmp.compare(&text("file10"), &text("file2")), Ordering::Greater);
        assert_eq!(cmp.compare(&text("chr1"), &text("chr1")), Ordering::Equal);
    }

    #[rstest]
    #[case("abc", "abc1", Ordering::Less)]
    #[case("a", "1", Ordering::Less)]
    #[case("007", "7", Ordering::Equal)]
    #[case("", "a", Ordering::Less)]
    #[case("99999999999999999999999", "100000000000000000000000", Ordering::Less)]
    fn alphanumeric_edge_cases(#[case] a: &str, #[case] b: &str, #[case] expected: Ordering) {
        assert_eq!(compare_alphanumeric(a, b), expected);
    }

    #[test]
    fn alphanumeric_treats_invalid_numbers_as_empty() {
        let cmp = SortComparator::Alphanumeric;
        assert_eq!(
            cmp.compare(&RowValue::Number(f64::NAN), &RowValue::Null),
            Ordering::Equal
        );
        assert_eq!(
            cmp.compare(&RowValue::Number(f64::INFINITY), &RowValue::Number(3.0)),
            Ordering::Less
        );
        assert_eq!(
            cmp.compare(&RowValue::Number(3.0), &RowValue::Number(12.0)),
            Ordering::Less
        );
    }

    #[test]
    fn scientific_notation_compares_numerically() {
        let cmp = SortComparator::ScientificNotation;
        assert_eq!(cmp.compare(&text("3e-6"), &text("2e-6")), Ordering::Greater);
        assert_eq!(cmp.compare(&text("2e-6"), &text("3e-6")), Ordering::Less);
        assert_eq!(cmp.compare(&text("5.0e-8"), &text("1.2e-5")), Ordering::Less);
        assert_eq!(cmp.compare(&text("3E-6"), &text("2e-6")), Ordering::Greater);
    }

    #[test]
    fn scientific_notation_puts_missing_first() {
        let cmp = SortComparator::ScientificNotation;
        assert_eq!(cmp.compare(&RowValue::Null, &text("1e-300")), Ordering::Less);
        assert_eq!(cmp.compare(&text(""), &RowValue::Null), Ordering::Equal);
        assert_eq!(cmp.compare(&text("n.d."), &text("1e-3")), Ordering::Greater);
    }

    #[test]
    fn boolean_flag_orders_false_first() {
        let cmp = SortComparator::BooleanFlag;
        assert_eq!(
            cmp.compare(&RowValue::Bool(false), &RowValue::Bool(true)),
            Ordering::Less
        );
        assert_eq!(
            cmp.compare(&RowValue::Bool(true), &RowValue::Bool(true)),
            Ordering::Equal
        );
        assert_eq!(cmp.compare(&RowValue::Null, &text("x")), Ordering::Less);
    }

    #[test]
    fn link_compares_payload() {
        let link = |t: &str| RowValue::Link {
            url: format!("/record/{t}"),
            text: t.to_string(),
        };
        let cmp = SortComparator::Link;
        assert_eq!(cmp.compare(&link("rs10"), &link("rs9")), Ordering::Greater);
        assert_eq!(cmp.compare(&link("rs9"), &text("rs9")), Ordering::Greater);
    }

    #[test]
    fn comparators_are_antisymmetric() {
        let values = vec![
            RowValue::Null,
            RowValue::Bool(true),
            RowValue::Bool(false),
            RowValue::Number(f64::NAN),
            RowValue::Number(f64::NEG_INFINITY),
            RowValue::Number(-2.5),
            RowValue::Number(1e-8),
            RowValue::Number(42.0),
            text(""),
            text("3e-6"),
            text("file2"),
            text("file10"),
            text("APOE"),
            text("n.d."),
            RowValue::Link {
                url: "/a".into(),
                text: "rs7412".into(),
            },
        ];
        for cmp in [
            SortComparator::Alphanumeric,
            SortComparator::BooleanFlag,
            SortComparator::Link,
            SortComparator::ScientificNotation,
        ] {
            for a in values.iter() {
                for b in values.iter() {
                    assert_eq!(
                        cmp.compare(a, b),
                        cmp.compare(b, a).reverse(),
                        "{cmp:?} {a:?} {b:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn accessor_lookup() {
        assert_eq!(
            SortComparator::for_column(AccessorType::Default, "variant_link"),
            SortComparator::Link
        );
        assert_eq!(
            SortComparator::for_column(AccessorType::Float, "beta"),
            SortComparator::Alphanumeric
        );
        assert_eq!(
            SortComparator::for_column(AccessorType::ScientificNotation, "pvalue"),
            SortComparator::ScientificNotation
        );
    }

    fn column(id: &str, field: usize, sort: SortComparator) -> ColumnDescriptor {
        ColumnDescriptor {
            sort,
            field,
            ..ColumnDescriptor::plain(id)
        }
    }

    #[test]
    fn sort_is_stable_in_both_directions() {
        let data = RecordData::new(vec![
            Field {
                name: "flag".into(),
                values: vec![
                    RowValue::Bool(true),
                    RowValue::Bool(false),
                    RowValue::Bool(true),
                    RowValue::Bool(false),
                ],
            },
            Field {
                name: "pvalue".into(),
                values: vec![text("1e-3"), text("5e-8"), text("2e-6"), text("1e-3")],
            },
        ]);
        let columns = vec![
            column("flag", 0, SortComparator::BooleanFlag),
            column("pvalue", 1, SortComparator::ScientificNotation),
        ];

        let mut rows = vec![0, 1, 2, 3];
        sort_rows(&mut rows, &data, &columns, &[ColumnSort::ascending("flag")]);
        assert_eq!(rows, vec![1, 3, 0, 2]);

        let mut rows = vec![0, 1, 2, 3];
        sort_rows(&mut rows, &data, &columns, &[ColumnSort::descending("flag")]);
        assert_eq!(rows, vec![0, 2, 1, 3]);

        let mut rows = vec![0, 1, 2, 3];
        sort_rows(
            &mut rows,
            &data,
            &columns,
            &[ColumnSort::descending("flag"), ColumnSort::ascending("pvalue")],
        );
        assert_eq!(rows, vec![2, 0, 1, 3]);
    }

    #[test]
    fn unknown_sort_columns_leave_order_untouched() {
        let data = RecordData::new(vec![Field {
            name: "x".into(),
            values: vec![text("b"), text("a")],
        }]);
        let columns = vec![column("x", 0, SortComparator::Alphanumeric)];
        let mut rows = vec![0, 1];
        sort_rows(&mut rows, &data, &columns, &[ColumnSort::ascending("missing")]);
        assert_eq!(rows, vec![0, 1]);
    }
}
