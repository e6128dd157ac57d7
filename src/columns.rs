use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::TableConfiguration;
use crate::sorting::SortComparator;
use crate::values::{RecordData, RowValue};

/// Metadata of one attribute of a record table, supplied with the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeDescriptor {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "yes")]
    pub is_displayable: bool,
    #[serde(default = "yes")]
    pub is_sortable: bool,
    #[serde(default)]
    pub help: Option<String>,
}

fn yes() -> bool {
    true
}

impl AttributeDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        AttributeDescriptor {
            display_name: name.clone(),
            name,
            is_displayable: true,
            is_sortable: true,
            help: None,
        }
    }

    fn header(&self) -> String {
        if self.display_name.is_empty() {
            self.name.clone()
        } else {
            self.display_name.clone()
        }
    }
}

/// How a column's raw value is interpreted and rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessorType {
    #[default]
    Default,
    BooleanFlag,
    Float,
    ScientificNotation,
    StackedBar,
    Link,
}

/// Which row-inclusion predicate a column's filter uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    Select,
    CheckboxSelect,
    Pie,
    BooleanPie,
    PValueThreshold,
    MultiSelect,
    FuzzyText,
    Numeric,
    GreaterThan,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnknownTag(pub String);

impl fmt::Display for UnknownTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown tag \"{}\"", self.0)
    }
}

impl FromStr for AccessorType {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Default" => Ok(AccessorType::Default),
            "BooleanFlag" => Ok(AccessorType::BooleanFlag),
            "Float" => Ok(AccessorType::Float),
            "ScientificNotation" => Ok(AccessorType::ScientificNotation),
            "StackedBar" => Ok(AccessorType::StackedBar),
            "Link" => Ok(AccessorType::Link),
            other => Err(UnknownTag(other.to_string())),
        }
    }
}

impl FromStr for FilterType {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "select" | "radio_select" | "typeahead_select" | "tissue" => Ok(FilterType::Select),
            "checkbox_select" => Ok(FilterType::CheckboxSelect),
            "pie" => Ok(FilterType::Pie),
            "booleanPie" | "boolean_pie" => Ok(FilterType::BooleanPie),
            "pvalue" => Ok(FilterType::PValueThreshold),
            "multi_select" => Ok(FilterType::MultiSelect),
            "fuzzyText" => Ok(FilterType::FuzzyText),
            "numeric" => Ok(FilterType::Numeric),
            "greater" => Ok(FilterType::GreaterThan),
            other => Err(UnknownTag(other.to_string())),
        }
    }
}

impl FilterType {
    /// Filters whose value is a number entered by the user.
    pub fn is_threshold(self) -> bool {
        matches!(self, FilterType::PValueThreshold | FilterType::GreaterThan)
    }

    pub fn label(self) -> &'static str {
        match self {
            FilterType::Select => "select",
            FilterType::CheckboxSelect => "any of",
            FilterType::Pie => "pie",
            FilterType::BooleanPie => "yes/no",
            FilterType::PValueThreshold => "p ≤",
            FilterType::MultiSelect => "multi select",
            FilterType::FuzzyText => "fuzzy",
            FilterType::Numeric => "numeric",
            FilterType::GreaterThan => "≥",
        }
    }
}

/// A resolved, immutable table column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    pub id: String,
    pub header: String,
    pub help: Option<String>,
    pub accessor: AccessorType,
    pub filter: Option<FilterType>,
    pub sort: SortComparator,
    pub sortable: bool,
    pub visible: bool,
    pub required: bool,
    pub disable_global_filter: bool,
    /// Index of the backing field in the row matrix.
    pub field: usize,
}

impl ColumnDescriptor {
    pub fn render(&self, value: &RowValue) -> String {
        match (self.accessor, value) {
            (AccessorType::BooleanFlag, v) => {
                if v.is_truthy() {
                    "Yes".to_string()
                } else {
                    "".to_string()
                }
            }
            (AccessorType::ScientificNotation, RowValue::Number(n)) if n.is_finite() => {
                format!("{n:.2e}")
            }
            (AccessorType::Float, RowValue::Number(n)) if n.is_finite() => format!("{n:.3}"),
            (_, v) => v.display_text(true),
        }
    }

    #[cfg(test)]
    pub fn plain(id: &str) -> Self {
        ColumnDescriptor {
            id: id.to_string(),
            header: id.to_string(),
            help: None,
            accessor: AccessorType::Default,
            filter: None,
            sort: SortComparator::Alphanumeric,
            sortable: true,
            visible: true,
            required: false,
            disable_global_filter: false,
            field: 0,
        }
    }
}

/// Build the column list of a record table.
///
/// Only attributes that are present in the data and displayable become
/// columns; they keep the order of the attribute list. Empty data yields no
/// columns, which callers report as "no data".
#[instrument(skip_all, fields(attributes = attributes.len(), rows = data.len()))]
pub fn resolve_columns(
    attributes: &[AttributeDescriptor],
    data: &RecordData,
    config: Option<&TableConfiguration>,
) -> Vec<ColumnDescriptor> {
    if data.is_empty() {
        debug!("No rows, no columns");
        return Vec::new();
    }

    let mut columns: Vec<ColumnDescriptor> = Vec::new();
    for attribute in attributes.iter().filter(|a| a.is_displayable) {
        if columns.iter().any(|c| c.id == attribute.name) {
            debug!("Duplicate attribute \"{}\"", attribute.name);
            continue;
        }
        if let Some(field) = data.field_index(&attribute.name) {
            columns.push(build_column(attribute, field, config));
        }
    }

    debug!("Resolved {} columns", columns.len());
    columns
}

fn build_column(
    attribute: &AttributeDescriptor,
    field: usize,
    config: Option<&TableConfiguration>,
) -> ColumnDescriptor {
    let id = attribute.name.clone();
    let accessor = config.map(|c| c.accessor(&id)).unwrap_or_default();
    let mut filter = config.and_then(|c| c.filter(&id));
    if accessor == AccessorType::BooleanFlag && filter == Some(FilterType::Pie) {
        filter = Some(FilterType::BooleanPie);
    }

    ColumnDescriptor {
        header: attribute.header(),
        help: attribute.help.clone(),
        accessor,
        filter,
        sort: SortComparator::for_column(accessor, &id),
        sortable: attribute.is_sortable,
        visible: !config.is_some_and(|c| c.is_hidden(&id)),
        required: config.is_some_and(|c| c.is_required(&id)),
        disable_global_filter: matches!(
            accessor,
            AccessorType::BooleanFlag
                | AccessorType::Float
                | AccessorType::StackedBar
                | AccessorType::ScientificNotation
        ),
        field,
        id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::values::Field;
    use pretty_assertions::assert_eq;

    fn data(names: &[&str]) -> RecordData {
        RecordData::new(
            names
                .iter()
                .map(|n| Field {
                    name: n.to_string(),
                    values: vec![RowValue::Text(format!("{n}-value"))],
                })
                .collect(),
        )
    }

    fn ids(columns: &[ColumnDescriptor]) -> Vec<&str> {
        columns.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn empty_data_has_no_columns() {
        let attributes = vec![AttributeDescriptor::new("pvalue")];
        let empty = RecordData::new(vec![Field {
            name: "pvalue".into(),
            values: Vec::new(),
        }]);
        assert!(resolve_columns(&attributes, &empty, None).is_empty());
        assert!(resolve_columns(&attributes, &RecordData::default(), None).is_empty());
    }

    #[test]
    fn columns_follow_attribute_order_and_skip_hidden_attributes() {
        let mut internal = AttributeDescriptor::new("internal_id");
        internal.is_displayable = false;
        let attributes = vec![
            AttributeDescriptor::new("variant_link"),
            internal,
            AttributeDescriptor::new("pvalue"),
            AttributeDescriptor::new("not_in_data"),
        ];
        let data = data(&["pvalue", "internal_id", "unknown", "variant_link"]);

        let columns = resolve_columns(&attributes, &data, None);
        assert_eq!(ids(&columns), vec!["variant_link", "pvalue"]);
        assert_eq!(columns[0].field, 3);
        assert_eq!(columns[1].field, 0);
        assert_eq!(columns[0].sort, SortComparator::Link);
    }

    #[test]
    fn configuration_drives_accessors_filters_and_visibility() {
        let tables = config::gene_tables();
        let table = &tables["ad_variants_from_gwas"];
        let names = [
            "variant_link",
            "pvalue",
            "adsp_variant_flag",
            "gene_impact",
            "population",
            "covariates",
            "track",
        ];
        let attributes: Vec<AttributeDescriptor> =
            names.iter().map(|n| AttributeDescriptor::new(*n)).collect();
        let columns = resolve_columns(&attributes, &data(&names), Some(table));
        let by_id = |id: &str| columns.iter().find(|c| c.id == id).unwrap();

        assert_eq!(by_id("pvalue").accessor, AccessorType::ScientificNotation);
        assert_eq!(by_id("pvalue").sort, SortComparator::ScientificNotation);
        assert_eq!(by_id("pvalue").filter, Some(FilterType::PValueThreshold));
        assert!(by_id("pvalue").required);
        assert!(by_id("pvalue").disable_global_filter);

        assert_eq!(by_id("adsp_variant_flag").filter, Some(FilterType::BooleanPie));
        assert_eq!(by_id("adsp_variant_flag").sort, SortComparator::BooleanFlag);
        assert_eq!(by_id("gene_impact").filter, Some(FilterType::Pie));
        assert_eq!(by_id("covariates").filter, Some(FilterType::MultiSelect));

        assert!(!by_id("population").visible);
        assert!(by_id("gene_impact").visible);
        assert_eq!(by_id("track").sort, SortComparator::Link);
    }

    #[test]
    fn unknown_tags_are_reported() {
        assert_eq!(
            "Sparkline".parse::<AccessorType>(),
            Err(UnknownTag("Sparkline".to_string()))
        );
        assert_eq!("boolean_pie".parse::<FilterType>(), Ok(FilterType::BooleanPie));
        assert!("between".parse::<FilterType>().is_err());
    }

    #[test]
    fn rendering_by_accessor() {
        let mut column = ColumnDescriptor::plain("pvalue");
        column.accessor = AccessorType::ScientificNotation;
        assert_eq!(column.render(&RowValue::Number(5e-8)), "5.00e-8");
        column.accessor = AccessorType::BooleanFlag;
        assert_eq!(column.render(&RowValue::Bool(true)), "Yes");
        assert_eq!(column.render(&RowValue::Null), "");
        column.accessor = AccessorType::Default;
        assert_eq!(column.render(&RowValue::Null), "N/A");
    }
}
