//! Per record type table configuration.
//!
//! A configuration describes which columns of a record table carry filters,
//! how values are interpreted (accessors), which columns start hidden or can
//! never be hidden, and the initial sort. Configurations are either built in
//! (the gene and dataset record pages) or read from a JSON file with the same
//! shape, and are validated once when they are loaded.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use derive_setters::Setters;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::columns::{AccessorType, FilterType};
use crate::domain::RTVError;
use crate::filters::{ActiveFilters, FilterValue};
use crate::sorting::ColumnSort;

/// Significance cutoff applied to p-value columns until the user changes it.
pub const DEFAULT_PVALUE_FILTER_VALUE: f64 = 5e-8;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterGroup {
    pub label: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub default_open: bool,
}

impl FilterGroup {
    pub fn new(label: &str, columns: &[&str]) -> Self {
        FilterGroup {
            label: label.to_string(),
            columns: names(columns),
            default_open: false,
        }
    }

    pub fn open(mut self) -> Self {
        self.default_open = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Setters)]
pub struct TableConfiguration {
    pub filters: BTreeMap<String, FilterType>,
    pub accessors: BTreeMap<String, AccessorType>,
    pub filter_groups: Vec<FilterGroup>,
    #[setters(strip_option)]
    pub default_filter: Option<String>,
    pub hidden_columns: Vec<String>,
    pub required_columns: Vec<String>,
    pub sorted_by: Vec<ColumnSort>,
    pub default_open: bool,
    pub can_filter: bool,
    pub can_export: bool,
    pub can_toggle_columns: bool,
    pub full_width: bool,
}

impl Default for TableConfiguration {
    fn default() -> Self {
        TableConfiguration {
            filters: BTreeMap::new(),
            accessors: BTreeMap::new(),
            filter_groups: Vec::new(),
            default_filter: None,
            hidden_columns: Vec::new(),
            required_columns: Vec::new(),
            sorted_by: Vec::new(),
            default_open: false,
            can_filter: false,
            can_export: true,
            can_toggle_columns: false,
            full_width: false,
        }
    }
}

impl TableConfiguration {
    pub fn accessor(&self, id: &str) -> AccessorType {
        self.accessors.get(id).copied().unwrap_or_default()
    }

    pub fn filter(&self, id: &str) -> Option<FilterType> {
        self.filters.get(id).copied()
    }

    pub fn is_hidden(&self, id: &str) -> bool {
        self.hidden_columns.iter().any(|c| c == id)
    }

    pub fn is_required(&self, id: &str) -> bool {
        self.required_columns.iter().any(|c| c == id)
    }

    /// Tables that start with hidden columns always allow toggling them.
    pub fn allows_column_toggle(&self) -> bool {
        self.can_toggle_columns || !self.hidden_columns.is_empty()
    }

    /// Filters active when the table is first shown or reset: p-value
    /// columns start at the genome wide significance cutoff.
    pub fn initial_filters(&self) -> ActiveFilters {
        let mut filters = ActiveFilters::default();
        for (id, filter) in self.filters.iter() {
            if *filter == FilterType::PValueThreshold {
                filters.set(id, Some(FilterValue::Number(DEFAULT_PVALUE_FILTER_VALUE)));
            }
        }
        filters
    }

    pub fn validate(&self) -> Result<(), RTVError> {
        if let Some(default_filter) = &self.default_filter
            && !self.filters.contains_key(default_filter)
        {
            return Err(RTVError::invalid_config(format!(
                "default filter \"{default_filter}\" has no filter type"
            )));
        }
        if let Some(column) = self.required_columns.iter().find(|c| self.is_hidden(c)) {
            return Err(RTVError::invalid_config(format!(
                "required column \"{column}\" is hidden by default"
            )));
        }
        let mut seen = BTreeSet::new();
        if let Some(sort) = self.sorted_by.iter().find(|s| !seen.insert(s.id.as_str())) {
            return Err(RTVError::invalid_config(format!(
                "column \"{}\" is sorted twice",
                sort.id
            )));
        }
        for group in self.filter_groups.iter() {
            for column in group.columns.iter().filter(|c| !self.filters.contains_key(*c)) {
                debug!(
                    "Filter group \"{}\" lists \"{column}\" without a filter",
                    group.label
                );
            }
        }
        Ok(())
    }
}

/// JSON shape of a table configuration. Tags are kept as strings so that
/// unknown ones can be skipped instead of rejecting the whole file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTableConfiguration {
    #[serde(default)]
    filters: BTreeMap<String, String>,
    #[serde(default)]
    accessors: BTreeMap<String, String>,
    #[serde(default)]
    filter_groups: Vec<FilterGroup>,
    default_filter: Option<String>,
    #[serde(default)]
    hidden_columns: Vec<String>,
    #[serde(default)]
    required_columns: Vec<String>,
    #[serde(default)]
    sorted_by: Vec<ColumnSort>,
    #[serde(default)]
    default_open: bool,
    #[serde(default)]
    can_filter: bool,
    #[serde(default = "default_can_export")]
    can_export: bool,
    #[serde(default)]
    can_toggle_columns: bool,
    #[serde(default)]
    full_width: bool,
}

fn default_can_export() -> bool {
    true
}

impl RawTableConfiguration {
    fn resolve(self, table: &str) -> TableConfiguration {
        let filters = self
            .filters
            .into_iter()
            .filter_map(|(column, tag)| match tag.parse::<FilterType>() {
                Ok(filter) => Some((column, filter)),
                Err(e) => {
                    warn!("{table}: {e} for filter on \"{column}\", column is not filterable");
                    None
                }
            })
            .collect();
        let accessors = self
            .accessors
            .into_iter()
            .filter_map(|(column, tag)| match tag.parse::<AccessorType>() {
                Ok(accessor) => Some((column, accessor)),
                Err(e) => {
                    warn!("{table}: {e} for accessor of \"{column}\", using Default");
                    None
                }
            })
            .collect();

        TableConfiguration {
            filters,
            accessors,
            filter_groups: self.filter_groups,
            default_filter: self.default_filter,
            hidden_columns: self.hidden_columns,
            required_columns: self.required_columns,
            sorted_by: self.sorted_by,
            default_open: self.default_open,
            can_filter: self.can_filter,
            can_export: self.can_export,
            can_toggle_columns: self.can_toggle_columns,
            full_width: self.full_width,
        }
    }
}

/// Parse a JSON object mapping table names to configurations.
pub fn parse_table_configurations(
    json: &str,
) -> Result<BTreeMap<String, TableConfiguration>, RTVError> {
    let raw: BTreeMap<String, RawTableConfiguration> = serde_json::from_str(json)?;
    let mut tables = BTreeMap::new();
    for (name, config) in raw.into_iter() {
        let config = config.resolve(&name);
        config.validate()?;
        tables.insert(name, config);
    }
    Ok(tables)
}

#[instrument]
pub fn load_table_configurations(
    path: &Path,
) -> Result<BTreeMap<String, TableConfiguration>, RTVError> {
    let json = fs::read_to_string(path)?;
    let tables = parse_table_configurations(&json)?;
    info!("Loaded {} table configurations", tables.len());
    Ok(tables)
}

/// Look up a built in table configuration by record type and table name.
pub fn builtin_table(record_type: &str, table: &str) -> Result<TableConfiguration, RTVError> {
    let tables = match record_type {
        "gene" => gene_tables(),
        "dataset" => dataset_tables(),
        _ => return Err(RTVError::UnknownTable(format!("{record_type}/{table}"))),
    };
    let config = tables
        .get(table)
        .cloned()
        .ok_or_else(|| RTVError::UnknownTable(format!("{record_type}/{table}")))?;
    config.validate()?;
    Ok(config)
}

fn names(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| c.to_string()).collect()
}

fn filters(entries: &[(&str, FilterType)]) -> BTreeMap<String, FilterType> {
    entries.iter().map(|(c, f)| (c.to_string(), *f)).collect()
}

fn accessors(entries: &[(&str, AccessorType)]) -> BTreeMap<String, AccessorType> {
    entries.iter().map(|(c, a)| (c.to_string(), *a)).collect()
}

fn variant_accessors(link_column: &str) -> BTreeMap<String, AccessorType> {
    accessors(&[
        ("adsp_variant_flag", AccessorType::BooleanFlag),
        ("pvalue", AccessorType::ScientificNotation),
        ("variant_link", AccessorType::Link),
        (link_column, AccessorType::Link),
    ])
}

fn gwas_variants(extra_pie: &[&str]) -> TableConfiguration {
    use FilterType::*;
    let mut entries = vec![
        ("pvalue", PValueThreshold),
        ("adsp_variant_flag", Pie),
        ("gene_impact", Pie),
        ("gene_consequence", Pie),
        ("relative_position", Pie),
        ("population", Pie),
        ("biomarker", Select),
        ("tissue", Select),
        ("covariates", MultiSelect),
    ];
    entries.extend(extra_pie.iter().map(|c| (*c, Pie)));

    TableConfiguration::default()
        .filters(filters(&entries))
        .default_filter("pvalue".to_string())
        .can_filter(true)
        .can_toggle_columns(true)
        .sorted_by(vec![ColumnSort::ascending("pvalue")])
        .accessors(variant_accessors("track"))
}

fn catalog_variants() -> TableConfiguration {
    use FilterType::*;
    TableConfiguration::default()
        .filters(filters(&[
            ("pvalue", PValueThreshold),
            ("adsp_variant_flag", Pie),
            ("gene_impact", Pie),
            ("gene_consequence", Pie),
            ("relative_position", Pie),
            ("source", Select),
        ]))
        .filter_groups(vec![
            FilterGroup::new("Statistics", &["pvalue"]).open(),
            FilterGroup::new("Position", &["relative_position"]),
            FilterGroup::new(
                "Annotation",
                &["source", "adsp_variant_flag", "gene_impact", "gene_consequence"],
            ),
        ])
        .hidden_columns(names(&[
            "source",
            "sample",
            "replicate_sample",
            "frequency",
            "gene_impact",
            "gene_consequence",
        ]))
        .required_columns(names(&["variant_link", "pvalue", "trait", "study", "pubmed_id"]))
        .can_filter(true)
        .can_toggle_columns(true)
        .sorted_by(vec![ColumnSort::ascending("pvalue")])
        .accessors(variant_accessors("pubmed_id"))
}

/// Tables of the gene record page.
pub fn gene_tables() -> BTreeMap<String, TableConfiguration> {
    use FilterType::*;
    let mut tables = BTreeMap::new();

    tables.insert(
        "ad_variants_from_gwas".to_string(),
        gwas_variants(&[])
            .filter_groups(vec![
                FilterGroup::new("Statistics", &["pvalue"]).open(),
                FilterGroup::new("Position", &["relative_position"]),
                FilterGroup::new(
                    "Annotation",
                    &["adsp_variant_flag", "gene_impact", "gene_consequence"],
                ),
                FilterGroup::new(
                    "Phenotype",
                    &["population", "biomarker", "genotype", "tissue", "covariates"],
                ),
            ])
            .hidden_columns(names(&[
                "population",
                "diagnosis",
                "neuropathology",
                "covariates",
                "gender",
                "genotype",
                "biomarker",
                "tissue",
            ]))
            .required_columns(names(&["track", "variant_link", "pvalue"]))
            .default_open(true),
    );

    tables.insert(
        "other_variants_from_gwas".to_string(),
        gwas_variants(&["diagnosis", "neuropathology"])
            .filter_groups(vec![
                FilterGroup::new("Statistics", &["pvalue"]).open(),
                FilterGroup::new("Position", &["relative_position"]),
                FilterGroup::new(
                    "Annotation",
                    &["adsp_variant_flag", "gene_impact", "gene_consequence"],
                ),
                FilterGroup::new(
                    "Phenotype",
                    &[
                        "population",
                        "diagnosis",
                        "neuropathology",
                        "biomarker",
                        "genotype",
                        "tissue",
                        "covariates",
                    ],
                ),
            ])
            .hidden_columns(names(&[
                "population",
                "covariates",
                "gender",
                "genotype",
                "biomarker",
                "tissue",
            ]))
            .required_columns(names(&[
                "track",
                "variant_link",
                "pvalue",
                "diagnosis",
                "neuropathology",
            ])),
    );

    tables.insert(
        "ad_variants_from_catalog".to_string(),
        catalog_variants().default_filter("pvalue".to_string()),
    );
    tables.insert("other_variants_from_catalog".to_string(), catalog_variants());

    tables.insert(
        "go_terms".to_string(),
        TableConfiguration::default()
            .filters(filters(&[("go_evidence_code", Select), ("ontology", Select)]))
            .filter_groups(vec![
                FilterGroup::new("Annotation", &["go_evidence_code", "ontology"]).open(),
            ])
            .can_filter(true)
            .accessors(accessors(&[("go_accession", AccessorType::Link)])),
    );

    tables.insert(
        "pathways".to_string(),
        TableConfiguration::default()
            .can_filter(true)
            .accessors(accessors(&[("accession", AccessorType::Link)])),
    );

    tables
}

/// Tables of the dataset record page. All three share one layout.
pub fn dataset_tables() -> BTreeMap<String, TableConfiguration> {
    use FilterType::*;
    let layout = TableConfiguration::default()
        .filters(filters(&[
            ("consortium", Select),
            ("neuropathology", Pie),
            ("population", Pie),
            ("biomarker", Select),
            ("genotype", Select),
        ]))
        .filter_groups(vec![
            FilterGroup::new("Affiliation", &["consortium"]).open(),
            FilterGroup::new(
                "Phenotype",
                &["neuropathology", "population", "biomarker", "genotype"],
            )
            .open(),
        ])
        .required_columns(names(&["track", "name"]))
        .hidden_columns(names(&["description", "covariates", "biomarker", "genotype"]))
        .can_filter(true)
        .can_toggle_columns(true)
        .accessors(accessors(&[("track", AccessorType::Link)]));

    let mut tables = BTreeMap::new();
    tables.insert("gwas".to_string(), layout.clone().default_open(true));
    tables.insert("gene_risk".to_string(), layout.clone());
    tables.insert("rare_variants".to_string(), layout);
    tables
}
