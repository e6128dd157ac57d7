//! Persisted view state of a table: sort order, active filters, hidden
//! columns, page size and the global search term. The state is read once
//! when a table is opened and written (debounced) whenever it changes.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::columns::ColumnDescriptor;
use crate::config::TableConfiguration;
use crate::domain::{DEFAULT_PAGE_SIZE, PAGE_SIZE_CHOICES, RTVError};
use crate::filters::ActiveFilters;
use crate::sorting::ColumnSort;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewState {
    #[serde(default)]
    pub sort_by: Vec<ColumnSort>,
    #[serde(default)]
    pub filters: ActiveFilters,
    #[serde(default)]
    pub global_filter: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub hidden_columns: Vec<String>,
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl ViewState {
    /// State of a table that has never been opened before.
    pub fn initial(
        config: &TableConfiguration,
        columns: &[ColumnDescriptor],
        page_size: usize,
    ) -> Self {
        let mut state = ViewState {
            sort_by: config.sorted_by.clone(),
            filters: config.initial_filters(),
            global_filter: String::new(),
            page_size,
            hidden_columns: columns
                .iter()
                .filter(|c| !c.visible)
                .map(|c| c.id.clone())
                .collect(),
        };
        state.sanitize(columns);
        state
    }

    /// Drop everything that refers to columns the table no longer has.
    pub fn sanitize(&mut self, columns: &[ColumnDescriptor]) {
        let known = |id: &str| columns.iter().find(|c| c.id == id);
        self.sort_by
            .retain(|s| known(&s.id).is_some_and(|c| c.sortable));
        self.filters.retain_valid(columns);
        self.hidden_columns
            .retain(|id| known(id).is_some_and(|c| !c.required));
        if !PAGE_SIZE_CHOICES.contains(&self.page_size) {
            self.page_size = DEFAULT_PAGE_SIZE;
        }
    }
}

pub fn state_key(table_id: &str) -> String {
    format!("tableState:{table_id}")
}

/// Key-value persistence for view states.
pub trait StateStore {
    fn read(&self, key: &str) -> Result<Option<ViewState>, RTVError>;
    fn write(&mut self, key: &str, state: &ViewState) -> Result<(), RTVError>;
}

/// All states in one JSON object on disk, keyed like browser local storage.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        FileStore { path }
    }

    fn read_all(&self) -> Result<serde_json::Map<String, serde_json::Value>, RTVError> {
        if !self.path.exists() {
            return Ok(serde_json::Map::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(serde_json::Map::new());
        }
        Ok(serde_json::from_str(&content)?)
    }
}

impl StateStore for FileStore {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    fn read(&self, key: &str) -> Result<Option<ViewState>, RTVError> {
        match self.read_all()?.remove(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, state), fields(path = %self.path.display()))]
    fn write(&mut self, key: &str, state: &ViewState) -> Result<(), RTVError> {
        let mut all = self.read_all()?;
        all.insert(key.to_string(), serde_json::to_value(state)?);
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&all)?)?;
        debug!("Stored view state {key}");
        Ok(())
    }
}

/// Store that forgets everything when the viewer exits.
#[derive(Default)]
pub struct MemoryStore {
    entries: HashMap<String, ViewState>,
}

impl StateStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<ViewState>, RTVError> {
        Ok(self.entries.get(key).cloned())
    }

    fn write(&mut self, key: &str, state: &ViewState) -> Result<(), RTVError> {
        self.entries.insert(key.to_string(), state.clone());
        Ok(())
    }
}

/// Holds back the latest value until it has been stable for `delay`.
pub struct Debouncer<T> {
    delay: Duration,
    pending: Option<(T, Instant)>,
}

impl<T> Debouncer<T> {
    pub fn new(delay: Duration) -> Self {
        Debouncer {
            delay,
            pending: None,
        }
    }

    /// Replace the pending value and restart the delay.
    pub fn push(&mut self, value: T, now: Instant) {
        self.pending = Some((value, now));
    }

    /// The pending value, once the delay has passed since the last push.
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match &self.pending {
            Some((_, since)) if now.saturating_duration_since(*since) >= self.delay => {
                self.pending.take().map(|(value, _)| value)
            }
            _ => None,
        }
    }

    /// The pending value regardless of the delay.
    pub fn flush(&mut self) -> Option<T> {
        self.pending.take().map(|(value, _)| value)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::FilterType;
    use crate::config::DEFAULT_PVALUE_FILTER_VALUE;
    use crate::filters::FilterValue;
    use pretty_assertions::assert_eq;

    fn columns() -> Vec<ColumnDescriptor> {
        let mut pvalue = ColumnDescriptor::plain("pvalue");
        pvalue.filter = Some(FilterType::PValueThreshold);
        pvalue.required = true;
        let mut population = ColumnDescriptor::plain("population");
        population.visible = false;
        population.filter = Some(FilterType::Pie);
        vec![ColumnDescriptor::plain("variant"), pvalue, population]
    }

    fn config() -> TableConfiguration {
        TableConfiguration::default()
            .filters(
                [
                    ("pvalue".to_string(), FilterType::PValueThreshold),
                    ("population".to_string(), FilterType::Pie),
                ]
                .into_iter()
                .collect(),
            )
            .sorted_by(vec![ColumnSort::ascending("pvalue")])
            .hidden_columns(vec!["population".to_string()])
    }

    #[test]
    fn initial_state_comes_from_configuration() {
        let state = ViewState::initial(&config(), &columns(), 25);
        assert_eq!(state.sort_by, vec![ColumnSort::ascending("pvalue")]);
        assert_eq!(
            state.filters.get("pvalue"),
            Some(&FilterValue::Number(DEFAULT_PVALUE_FILTER_VALUE))
        );
        assert_eq!(state.hidden_columns, vec!["population".to_string()]);
        assert_eq!(state.page_size, 25);
    }

    #[test]
    fn sanitize_drops_stale_entries() {
        let mut state = ViewState {
            sort_by: vec![ColumnSort::ascending("gone"), ColumnSort::descending("variant")],
            filters: ActiveFilters::default(),
            global_filter: String::new(),
            page_size: 7,
            hidden_columns: vec!["pvalue".into(), "gone".into(), "population".into()],
        };
        state.filters.set("gone", Some(FilterValue::Text("x".into())));
        state.filters.set("population", Some(FilterValue::Text("EUR".into())));
        state.sanitize(&columns());

        assert_eq!(state.sort_by, vec![ColumnSort::descending("variant")]);
        assert_eq!(state.hidden_columns, vec!["population".to_string()]);
        assert_eq!(state.filters.len(), 1);
        assert_eq!(state.page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn file_store_keeps_tables_apart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let mut store = FileStore::new(path.clone());
        assert_eq!(store.read(&state_key("gene/go_terms")).unwrap(), None);

        let gwas = ViewState::initial(&config(), &columns(), 10);
        let mut other = gwas.clone();
        other.global_filter = "apoe".into();
        store.write(&state_key("gene/ad_variants_from_gwas"), &gwas).unwrap();
        store.write(&state_key("gene/pathways"), &other).unwrap();

        let reopened = FileStore::new(path.clone());
        assert_eq!(
            reopened.read(&state_key("gene/ad_variants_from_gwas")).unwrap(),
            Some(gwas)
        );
        assert_eq!(
            reopened.read(&state_key("gene/pathways")).unwrap(),
            Some(other)
        );
        let raw = fs::read_to_string(path).unwrap();
        assert!(raw.contains("tableState:gene/pathways"));
    }

    #[test]
    fn corrupt_state_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();
        let store = FileStore::new(path);
        assert!(matches!(
            store.read("tableState:x"),
            Err(RTVError::JsonError(_))
        ));
    }

    #[test]
    fn partial_state_uses_defaults() {
        let state: ViewState = serde_json::from_str(r#"{ "sortBy": [{ "id": "pvalue" }] }"#).unwrap();
        assert_eq!(state.sort_by, vec![ColumnSort::ascending("pvalue")]);
        assert_eq!(state.page_size, DEFAULT_PAGE_SIZE);
        assert!(state.filters.is_empty());
    }

    #[test]
    fn debouncer_waits_for_quiet_period() {
        let start = Instant::now();
        let delay = Duration::from_millis(500);
        let mut debouncer = Debouncer::new(delay);
        assert_eq!(debouncer.poll(start), None);

        debouncer.push("a", start);
        debouncer.push("ab", start + Duration::from_millis(300));
        assert_eq!(debouncer.poll(start + Duration::from_millis(600)), None);
        assert!(debouncer.is_pending());
        assert_eq!(debouncer.poll(start + Duration::from_millis(800)), Some("ab"));
        assert_eq!(debouncer.poll(start + Duration::from_millis(900)), None);

        debouncer.push("abc", start);
        assert_eq!(debouncer.flush(), Some("abc"));
        assert!(!debouncer.is_pending());
    }
}
