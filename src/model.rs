use arboard::Clipboard;
use ratatui::crossterm::event::KeyEvent;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::columns::{AttributeDescriptor, ColumnDescriptor, FilterType, resolve_columns};
use crate::config::TableConfiguration;
use crate::domain::{CMDMode, HELP_TEXT, Message, PAGE_SIZE_CHOICES, RTVConfig, RTVError};
use crate::filters::{FilterValue, global_search};
use crate::inputter::{InputResult, Inputter};
use crate::sorting::{ColumnSort, sort_rows};
use crate::state::{Debouncer, StateStore, ViewState, state_key};
use crate::ui::{
    CMDLINE_HEIGH, COLUMN_WIDTH_MARGIN, FILTERBAR_HEIGHT, SCROLLBAR_WIDTH, TABLE_HEADER_HEIGHT,
};
use crate::values::{NA, RecordData, parse_number};

/// Everything needed to show one record table.
pub struct TableSource {
    pub id: String,
    pub name: String,
    pub data: RecordData,
    pub attributes: Vec<AttributeDescriptor>,
    pub config: TableConfiguration,
}

#[derive(Debug, PartialEq)]
pub enum Status {
    EMPTY,
    READY,
    QUITTING,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Modus {
    TABLE,
    RECORD,
    COUNTS,
    POPUP,
    CMDINPUT,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColumnView {
    pub name: String,
    pub width: usize,
    pub data: Vec<String>,
}

struct TableView {
    rows: Arc<Vec<usize>>, // Filtered and sorted rows, as indices into the record data
    shown_columns: Vec<usize>, // Columns that are not hidden, as indices into Model.columns
    visible_columns: Vec<usize>, // Shown columns that fit on screen, as indices into Model.columns
    visible_width: usize,
    page_index: usize,
    curser_row: usize, // Relative to offset_row
    curser_column: usize, // Relative to offset_column
    offset_row: usize, // Scroll position within the current page
    offset_column: usize, // Into shown_columns
    data: Vec<ColumnView>,
    show_index: bool,
    index: ColumnView,
    heigh: usize,
    width: usize,
}

impl TableView {
    fn empty() -> Self {
        TableView {
            rows: Arc::new(Vec::new()),
            shown_columns: Vec::new(),
            visible_columns: Vec::new(),
            visible_width: 0,
            page_index: 0,
            curser_row: 0,
            curser_column: 0,
            offset_row: 0,
            offset_column: 0,
            data: Vec::new(),
            show_index: false,
            index: ColumnView::default(),
            heigh: 0,
            width: 0,
        }
    }
}

struct RecordView {
    record_idx: usize, // Index into TableView.rows
    header_data: Vec<String>,
    header_width: usize,
    header_view: ColumnView,
    row_data: Vec<String>,
    row_view: ColumnView,
    curser_row: usize,
    curser_offset: usize,
    height: usize,
    width: usize,
}

impl RecordView {
    fn empty() -> Self {
        RecordView {
            record_idx: 0,
            header_data: Vec::new(),
            header_width: 0,
            header_view: ColumnView::default(),
            row_data: Vec::new(),
            row_view: ColumnView::default(),
            curser_row: 0,
            curser_offset: 0,
            height: 0,
            width: 0,
        }
    }
}

/// Distinct values of one column with their counts, the terminal version
/// of the pie and select filter widgets.
struct CountsView {
    column_idx: usize, // Index into Model.columns
    value_data: Vec<String>,
    count_data: Vec<String>,
    value_view: ColumnView,
    count_view: ColumnView,
    curser_row: usize,
    curser_offset: usize,
    height: usize,
    width: usize,
}

impl CountsView {
    fn empty() -> Self {
        CountsView {
            column_idx: 0,
            value_data: Vec::new(),
            count_data: Vec::new(),
            value_view: ColumnView::default(),
            count_view: ColumnView::default(),
            curser_row: 0,
            curser_offset: 0,
            height: 0,
            width: 0,
        }
    }
}

pub struct UIData {
    pub name: String,
    pub table: Vec<ColumnView>,
    pub index: ColumnView,
    pub nrows: usize, // Rows after filtering
    pub total_rows: usize,
    pub page_index: usize,
    pub page_count: usize,
    pub page_size: usize,
    pub selected_row: usize,
    pub selected_column: usize,
    pub abs_selected_row: usize,
    pub show_popup: bool,
    pub popup_title: String,
    pub popup_message: String,
    pub filter_chips: Vec<String>,
    pub empty_message: Option<String>,
    pub layout: UILayout,
    pub last_update: Instant,
    pub cmdinput: InputResult,
    pub cmd_prompt: String,
    pub active_cmdinput: bool,
    pub status_message: String,
    pub last_status_message_update: Instant,
}

impl UIData {
    pub fn empty() -> Self {
        UIData {
            name: String::new(),
            table: Vec::new(),
            index: ColumnView::default(),
            nrows: 0,
            total_rows: 0,
            page_index: 0,
            page_count: 0,
            page_size: 0,
            selected_row: 0,
            selected_column: 0,
            abs_selected_row: 0,
            show_popup: false,
            popup_title: String::new(),
            popup_message: String::new(),
            filter_chips: Vec::new(),
            empty_message: None,
            layout: UILayout::default(),
            last_update: Instant::now(),
            cmdinput: InputResult::default(),
            cmd_prompt: String::new(),
            active_cmdinput: false,
            status_message: String::new(),
            last_status_message_update: Instant::now(),
        }
    }
}

#[derive(Default, Clone, Debug)]
pub struct UILayout {
    pub width: usize,
    pub height: usize,
    pub table_width: usize,
    pub table_height: usize,
    pub index_width: usize,
    pub statusline_width: usize,
}

impl UILayout {
    pub fn from_values(index_width: usize, ui_width: usize, ui_height: usize) -> Self {
        let table_width = ui_width.saturating_sub(SCROLLBAR_WIDTH + index_width);
        let table_height =
            ui_height.saturating_sub(CMDLINE_HEIGH + TABLE_HEADER_HEIGHT + FILTERBAR_HEIGHT);

        let layout = UILayout {
            width: ui_width,
            height: ui_height,
            table_width,
            table_height,
            index_width,
            statusline_width: ui_width,
        };
        trace!("Build UILayout: {:?}", layout);
        layout
    }
}

/// A pending edit started from the command line, kept to restore on cancel.
enum PendingEdit {
    Filter {
        id: String,
        filter: FilterType,
        previous: Option<FilterValue>,
    },
    Search {
        previous: String,
    },
}

pub struct Model {
    config: RTVConfig,
    pub status: Status,
    modus: Modus,
    previous_modus: Modus,
    table_id: String,
    table_name: String,
    data: RecordData,
    table_config: TableConfiguration,
    columns: Vec<ColumnDescriptor>,
    column_widths: Vec<usize>,
    view: ViewState,
    table: TableView,
    record_view: RecordView,
    counts_view: CountsView,
    store: Box<dyn StateStore>,
    pending_state: Debouncer<ViewState>,
    uilayout: UILayout,
    uidata: UIData,
    clipboard: Option<Clipboard>,
    input: Inputter,
    pending_edit: Option<PendingEdit>,
    last_input: InputResult,
    active_cmdinput: bool,
    status_message: String,
    last_status_message_update: Instant,
}

impl Model {
    pub fn init(
        config: &RTVConfig,
        store: Box<dyn StateStore>,
        ui_width: usize,
        ui_height: usize,
    ) -> Self {
        let mut model = Self {
            config: config.clone(),
            status: Status::EMPTY,
            modus: Modus::TABLE,
            previous_modus: Modus::TABLE,
            table_id: String::new(),
            table_name: String::new(),
            data: RecordData::default(),
            table_config: TableConfiguration::default(),
            columns: Vec::new(),
            column_widths: Vec::new(),
            view: ViewState::initial(&TableConfiguration::default(), &[], config.page_size),
            table: TableView::empty(),
            record_view: RecordView::empty(),
            counts_view: CountsView::empty(),
            store,
            pending_state: Debouncer::new(config.state_debounce),
            uilayout: UILayout::from_values(0, ui_width, ui_height),
            uidata: UIData::empty(),
            clipboard: None,
            input: Inputter::default(),
            pending_edit: None,
            last_input: InputResult::default(),
            active_cmdinput: false,
            status_message: "Started rtv!".to_string(),
            last_status_message_update: Instant::now(),
        };
        model.input.set_width(model.uilayout.statusline_width);
        model.update_uidata_for_table();
        model
    }

    /// Resolve the columns of a record table and show it with its persisted
    /// (or initial) view state.
    pub fn open_table(&mut self, source: TableSource) -> Result<(), RTVError> {
        let start_time = Instant::now();
        source.config.validate()?;

        self.columns = resolve_columns(&source.attributes, &source.data, Some(&source.config));
        self.column_widths = self
            .columns
            .iter()
            .map(|c| {
                source.data.fields[c.field]
                    .values
                    .iter()
                    .map(|v| c.render(v).chars().count())
                    .max()
                    .unwrap_or(0)
                    .max(c.header.chars().count() + 4)
            })
            .collect();
        self.table_id = source.id;
        self.table_name = source.name;
        self.data = source.data;
        self.table_config = source.config;

        let key = state_key(&self.table_id);
        self.view = match self.store.read(&key) {
            Ok(Some(mut state)) => {
                info!("Restoring view state {key}");
                state.sanitize(&self.columns);
                state
            }
            Ok(None) => ViewState::initial(&self.table_config, &self.columns, self.config.page_size),
            Err(e) => {
                warn!("Could not read view state {key}: {e}");
                ViewState::initial(&self.table_config, &self.columns, self.config.page_size)
            }
        };

        self.table = TableView::empty();
        self.modus = Modus::TABLE;
        if self.columns.is_empty() {
            self.status = Status::EMPTY;
            self.update_table_data();
            self.set_status_message("No data available");
            return Ok(());
        }

        self.status = Status::READY;
        self.update_shown_columns();
        self.recompute_rows();
        info!(
            "Opened {} with {} columns in {}ms",
            self.table_id,
            self.columns.len(),
            start_time.elapsed().as_millis()
        );
        self.set_status_message(format!(
            "Loaded {} records, {} columns",
            self.data.len(),
            self.columns.len()
        ));
        Ok(())
    }

    pub fn get_uidata(&self) -> &UIData {
        &self.uidata
    }

    pub fn raw_keyevents(&self) -> bool {
        self.active_cmdinput
    }

    pub fn quit(&mut self) {
        if self.pending_state.is_pending() {
            info!("Writing pending view state before quitting");
        }
        self.flush_state();
        self.status = Status::QUITTING;
    }

    // -------------------- View state ---------------------- //

    fn view_changed(&mut self) {
        self.pending_state.push(self.view.clone(), Instant::now());
    }

    fn persist_state(&mut self, state: ViewState) {
        if self.table_id.is_empty() {
            return;
        }
        let key = state_key(&self.table_id);
        match self.store.write(&key, &state) {
            Ok(_) => debug!("Persisted view state {key}"),
            Err(e) => error!("Could not persist view state {key}: {e}"),
        }
    }

    fn persist_pending_state(&mut self, now: Instant) {
        if let Some(state) = self.pending_state.poll(now) {
            self.persist_state(state);
        }
    }

    pub fn flush_state(&mut self) {
        if let Some(state) = self.pending_state.flush() {
            self.persist_state(state);
        }
    }

    // -------------------- Rows and columns ---------------------- //

    fn update_shown_columns(&mut self) {
        self.table.shown_columns = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| !self.view.hidden_columns.contains(&c.id))
            .map(|(idx, _)| idx)
            .collect();
        let last = self.table.shown_columns.len().saturating_sub(1);
        if self.table.offset_column > last {
            self.table.offset_column = last;
            self.table.curser_column = 0;
        }
    }

    /// Run search, filters and sort over all records.
    fn recompute_rows(&mut self) {
        let start_time = Instant::now();
        let all: Vec<usize> = (0..self.data.len()).collect();
        let searched = global_search(&all, &self.data, &self.columns, &self.view.global_filter);
        let mut rows = self.view.filters.apply(&searched, &self.data, &self.columns);
        sort_rows(&mut rows, &self.data, &self.columns, &self.view.sort_by);
        trace!(
            "Recomputed {} of {} rows in {}ms",
            rows.len(),
            self.data.len(),
            start_time.elapsed().as_millis()
        );

        self.table.rows = Arc::new(rows);
        let last_page = self.page_count().saturating_sub(1);
        if self.table.page_index > last_page {
            self.table.page_index = last_page;
        }
        self.table.curser_row = 0;
        self.table.offset_row = 0;
        self.update_table_data();
    }

    fn page_count(&self) -> usize {
        self.table.rows.len().div_ceil(self.view.page_size.max(1))
    }

    fn page_rows(&self) -> &[usize] {
        let size = self.view.page_size.max(1);
        let begin = std::cmp::min(self.table.page_index * size, self.table.rows.len());
        let end = std::cmp::min(begin + size, self.table.rows.len());
        &self.table.rows[begin..end]
    }

    /// Position of the selected row in the filtered rows.
    fn selected_position(&self) -> usize {
        self.table.page_index * self.view.page_size + self.table.offset_row + self.table.curser_row
    }

    fn current_column_idx(&self) -> Option<usize> {
        self.table
            .shown_columns
            .get(self.table.offset_column + self.table.curser_column)
            .copied()
    }

    fn current_column(&self) -> Option<&ColumnDescriptor> {
        self.current_column_idx().and_then(|idx| self.columns.get(idx))
    }

    fn current_record(&self) -> Option<usize> {
        self.table.rows.get(self.selected_position()).copied()
    }

    fn calculate_column_width(&self, column_idx: usize) -> usize {
        let width = self.column_widths.get(column_idx).copied().unwrap_or(0) + COLUMN_WIDTH_MARGIN;
        std::cmp::min(width, self.config.max_column_width)
    }

    fn get_visible_name(name: &str, width: usize) -> String {
        if width < 3 {
            return "".to_string();
        }
        if name.chars().count() > width {
            let mut reduced: String = name.chars().take(width - 3).collect();
            reduced.push_str("...");
            reduced
        } else {
            name.to_string()
        }
    }

    fn header_name(&self, column: &ColumnDescriptor) -> String {
        let position = self.view.sort_by.iter().position(|s| s.id == column.id);
        let mut name = column.header.clone();
        if let Some(pos) = position {
            let arrow = if self.view.sort_by[pos].descending { "▼" } else { "▲" };
            name = if self.view.sort_by.len() > 1 {
                format!("{name} {arrow}{}", pos + 1)
            } else {
                format!("{name} {arrow}")
            };
        }
        if self.view.filters.get(&column.id).is_some() {
            name.push('*');
        }
        name
    }

    fn update_table_data(&mut self) {
        self.table.width = self.uilayout.table_width;
        self.table.heigh = self.uilayout.table_height;
        self.table.data = Vec::new();
        self.table.visible_columns = Vec::new();

        if self.columns.is_empty() {
            self.update_uidata_for_table();
            return;
        }

        let page: Vec<usize> = self.page_rows().to_vec();
        let rbegin = std::cmp::min(self.table.offset_row, page.len());
        let rend = std::cmp::min(rbegin + self.table.heigh, page.len());

        trace!(
            "Table: I:{}, P {}, Cr {}, Cc {}, Or {}, Oc {}, Rb {}, Re {}, tw: {}, th:{}",
            self.table.show_index,
            self.table.page_index,
            self.table.curser_row,
            self.table.curser_column,
            self.table.offset_row,
            self.table.offset_column,
            rbegin,
            rend,
            self.table.width,
            self.table.heigh,
        );

        // Create a list of columns that fit in the table
        let mut visible_width = 0;
        let mut widths = Vec::new();
        for &cidx in self.table.shown_columns.iter().skip(self.table.offset_column) {
            let width = self.calculate_column_width(cidx);
            if visible_width + width + 1 <= self.table.width {
                self.table.visible_columns.push(cidx);
                widths.push(width);
                visible_width += width + 1;
            } else {
                // Add the last partial visible column
                if visible_width < self.table.width {
                    let remaining_width = self.table.width - visible_width;
                    self.table.visible_columns.push(cidx);
                    widths.push(remaining_width);
                    visible_width += remaining_width;
                }
                break;
            }
        }
        // Full width, to know whether the right most column is only partially rendered
        self.table.visible_width = visible_width;

        // Growing columns can reduce the number of visible columns
        self.table.curser_column = std::cmp::min(
            self.table.curser_column,
            self.table.visible_columns.len().saturating_sub(1),
        );

        let data: Vec<ColumnView> = self
            .table
            .visible_columns
            .iter()
            .zip(widths.iter())
            .map(|(&cidx, &width)| {
                let column = &self.columns[cidx];
                ColumnView {
                    name: Self::get_visible_name(&self.header_name(column), width),
                    width,
                    data: page[rbegin..rend]
                        .iter()
                        .map(|&ridx| column.render(self.data.value(column.field, ridx)))
                        .collect(),
                }
            })
            .collect();
        self.table.data = data;

        let index_data: Vec<String> = page[rbegin..rend]
            .iter()
            .map(|idx| (idx + 1).to_string())
            .collect();
        let index_width = self.data.len().to_string().len();
        self.table.index = ColumnView {
            name: "#".to_string(),
            width: index_width,
            data: index_data,
        };

        self.update_uidata_for_table();
    }

    fn filter_chips(&self) -> Vec<String> {
        let mut chips: Vec<String> = self
            .view
            .filters
            .iter()
            .map(|f| {
                let column = self.columns.iter().find(|c| c.id == f.id);
                let header = column.map(|c| c.header.as_str()).unwrap_or(f.id.as_str());
                let label = column
                    .and_then(|c| c.filter)
                    .map(|t| t.label())
                    .unwrap_or("");
                format!("{header} {label} {}", f.value.as_text())
            })
            .collect();
        if !self.view.global_filter.is_empty() {
            chips.push(format!("search \"{}\"", self.view.global_filter));
        }
        chips
    }

    fn update_uidata_for_table(&mut self) {
        let empty_message = if self.columns.is_empty() {
            Some("No data available".to_string())
        } else if self.table.rows.is_empty() {
            Some("No records match the current filters".to_string())
        } else {
            None
        };
        self.uidata = UIData {
            name: self.table_name.clone(),
            table: self.table.data.clone(),
            index: if self.table.show_index {
                self.table.index.clone()
            } else {
                ColumnView::default()
            },
            nrows: self.table.rows.len(),
            total_rows: self.data.len(),
            page_index: self.table.page_index,
            page_count: self.page_count(),
            page_size: self.view.page_size,
            selected_row: self.table.curser_row,
            selected_column: self.table.curser_column,
            abs_selected_row: self.selected_position(),
            show_popup: self.modus == Modus::POPUP,
            popup_title: self.uidata.popup_title.clone(),
            popup_message: self.uidata.popup_message.clone(),
            filter_chips: self.filter_chips(),
            empty_message,
            layout: self.uilayout.clone(),
            last_update: Instant::now(),
            cmdinput: self.last_input.clone(),
            cmd_prompt: self.uidata.cmd_prompt.clone(),
            active_cmdinput: self.active_cmdinput,
            status_message: self.status_message.clone(),
            last_status_message_update: self.last_status_message_update,
        }
    }

    fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
        self.last_status_message_update = Instant::now();
        self.uidata.status_message = self.status_message.clone();
        self.uidata.last_status_message_update = self.last_status_message_update;
        self.uidata.last_update = Instant::now();
    }

    fn ui_resize(&mut self, width: usize, height: usize) {
        trace!(
            "UI was resized! w:{}->{}, h:{}->{}",
            self.uilayout.width, width, self.uilayout.height, height
        );
        let index_width = if self.table.show_index {
            self.table.index.width + 1
        } else {
            0
        };
        self.uilayout = UILayout::from_values(index_width, width, height);
        self.input.set_width(self.uilayout.statusline_width);
        match self.modus {
            Modus::RECORD => self.update_record_data(),
            Modus::COUNTS => self.update_counts_view(),
            _ => self.update_table_data(),
        }
    }

    pub fn update(&mut self, message: Option<Message>) -> Result<(), RTVError> {
        if let Some(msg) = message {
            match self.modus {
                Modus::TABLE => match msg {
                    Message::Quit => self.quit(),
                    Message::MoveDown => self.move_table_selection_down(1),
                    Message::MoveUp => self.move_table_selection_up(1),
                    Message::MoveLeft => self.move_table_selection_left(),
                    Message::MoveRight => self.move_table_selection_right(),
                    Message::MovePageDown => {
                        self.move_table_selection_down(self.uilayout.table_height.max(1))
                    }
                    Message::MovePageUp => {
                        self.move_table_selection_up(self.uilayout.table_height.max(1))
                    }
                    Message::MoveToFirstColumn => self.select_column(0),
                    Message::MoveToLastColumn => {
                        self.select_column(self.table.shown_columns.len().saturating_sub(1))
                    }
                    Message::NextPage => self.goto_page(self.table.page_index + 1),
                    Message::PreviousPage => {
                        self.goto_page(self.table.page_index.saturating_sub(1))
                    }
                    Message::FirstPage => self.goto_page(0),
                    Message::LastPage => self.goto_page(self.page_count().saturating_sub(1)),
                    Message::CyclePageSize => self.cycle_page_size(),
                    Message::Sort => self.sort_current_column(false),
                    Message::AddSort => self.sort_current_column(true),
                    Message::Filter => self.enter_filter_mode(),
                    Message::Search => self.enter_search_mode(),
                    Message::ClearFilter => self.clear_current_filter(),
                    Message::ResetFilters => self.reset_filters(),
                    Message::FilterPanel => self.show_filter_panel(),
                    Message::ValueCounts => self.build_counts_view(),
                    Message::HideColumn => self.hide_current_column(),
                    Message::ShowAllColumns => self.show_all_columns(),
                    Message::ToggleIndex => self.toggle_table_index(),
                    Message::CopyCell => self.copy_table_cell(),
                    Message::CopyRow => self.copy_table_row(),
                    Message::Enter => self.enter(),
                    Message::Help => self.show_help(),
                    Message::Resize(width, height) => self.ui_resize(width, height),
                    _ => (),
                },
                Modus::RECORD => match msg {
                    Message::Quit => self.quit(),
                    Message::MoveDown => self.move_record_selection_down(1),
                    Message::MoveUp => self.move_record_selection_up(1),
                    Message::MovePageDown => self.move_record_selection_down(10),
                    Message::MovePageUp => self.move_record_selection_up(10),
                    Message::MoveLeft => self.previous_record(),
                    Message::MoveRight => self.next_record(),
                    Message::CopyCell => self.copy_record_cell(),
                    Message::Help => self.show_help(),
                    Message::Exit => self.exit(),
                    Message::Resize(width, height) => self.ui_resize(width, height),
                    _ => (),
                },
                Modus::COUNTS => match msg {
                    Message::Quit => self.quit(),
                    Message::MoveDown => self.move_counts_selection_down(1),
                    Message::MoveUp => self.move_counts_selection_up(1),
                    Message::MovePageDown => self.move_counts_selection_down(10),
                    Message::MovePageUp => self.move_counts_selection_up(10),
                    Message::Enter => self.enter(),
                    Message::Help => self.show_help(),
                    Message::Exit => self.exit(),
                    Message::Resize(width, height) => self.ui_resize(width, height),
                    _ => (),
                },
                Modus::POPUP => match msg {
                    Message::Quit => self.quit(),
                    Message::Exit | Message::Enter => self.exit(),
                    Message::Resize(width, height) => self.ui_resize(width, height),
                    _ => (),
                },
                Modus::CMDINPUT => {
                    if let Message::RawKey(key) = msg {
                        self.raw_input(key)
                    }
                }
            }
        }

        self.persist_pending_state(Instant::now());
        Ok(())
    }

    // -------------------- Control handling functions ---------------------- //

    fn enter(&mut self) {
        match self.modus {
            Modus::TABLE => {
                if self.table.rows.is_empty() {
                    return;
                }
                self.build_record_view(self.selected_position());
                self.previous_modus = Modus::TABLE;
                self.modus = Modus::RECORD;
            }
            Modus::COUNTS => self.filter_by_selected_count(),
            Modus::POPUP => self.exit(),
            Modus::RECORD | Modus::CMDINPUT => {}
        }
    }

    fn exit(&mut self) {
        match self.modus {
            Modus::TABLE => {}
            Modus::RECORD | Modus::COUNTS => {
                self.previous_modus = self.modus;
                self.modus = Modus::TABLE;
                self.update_table_data();
            }
            Modus::POPUP => {
                trace!("Close popup ...");
                self.modus = self.previous_modus;
                self.previous_modus = Modus::POPUP;
                self.uidata.show_popup = false;
                self.uidata.last_update = Instant::now();
            }
            Modus::CMDINPUT => {}
        }
    }

    fn show_popup(&mut self, title: &str, message: String) {
        self.previous_modus = self.modus;
        self.modus = Modus::POPUP;
        self.uidata.popup_title = title.to_string();
        self.uidata.popup_message = message;
        self.uidata.show_popup = true;
        self.uidata.last_update = Instant::now();
    }

    fn show_help(&mut self) {
        self.show_popup("Help", HELP_TEXT.to_string());
    }

    /// Filters of the table grouped as the configuration lays them out.
    fn filter_panel_text(&self) -> String {
        let describe = |id: &str| -> Option<String> {
            let column = self.columns.iter().find(|c| c.id == id)?;
            let filter = column.filter?;
            let value = self
                .view
                .filters
                .get(id)
                .map(|v| v.as_text())
                .unwrap_or_else(|| "-".to_string());
            Some(format!("  {} [{}]: {value}", column.header, filter.label()))
        };

        let mut lines = Vec::new();
        let mut listed: Vec<&str> = Vec::new();
        for group in self.table_config.filter_groups.iter() {
            let entries: Vec<String> = group.columns.iter().filter_map(|c| describe(c)).collect();
            listed.extend(group.columns.iter().map(|c| c.as_str()));
            if entries.is_empty() {
                continue;
            }
            let marker = if group.default_open { "▾" } else { "▸" };
            lines.push(format!("{marker} {}", group.label));
            lines.extend(entries);
        }
        let others: Vec<String> = self
            .columns
            .iter()
            .filter(|c| !listed.contains(&c.id.as_str()))
            .filter_map(|c| describe(&c.id))
            .collect();
        if !others.is_empty() {
            lines.push("▾ Other".to_string());
            lines.extend(others);
        }
        if lines.is_empty() {
            lines.push("This table has no column filters.".to_string());
        }
        if !self.view.global_filter.is_empty() {
            lines.push(String::new());
            lines.push(format!("Search: \"{}\"", self.view.global_filter));
        }
        lines.join("\n")
    }

    fn show_filter_panel(&mut self) {
        let text = self.filter_panel_text();
        self.show_popup("Filters", text);
    }

    fn enter_cmd_mode(&mut self, mode: CMDMode, prompt: String, prefill: &str) {
        trace!("Entering command mode {:?} ...", mode);
        self.previous_modus = self.modus;
        self.modus = Modus::CMDINPUT;

        self.active_cmdinput = true;
        self.input.set(prefill);
        self.last_input = self.input.get();

        self.uidata.cmdinput = self.last_input.clone();
        self.uidata.cmd_prompt = prompt;
        self.uidata.active_cmdinput = self.active_cmdinput;
        self.uidata.last_update = Instant::now();
    }

    fn enter_filter_mode(&mut self) {
        if !self.table_config.can_filter {
            self.set_status_message("Filtering is disabled for this table");
            return;
        }
        let Some(column) = self.current_column() else {
            return;
        };
        let Some(filter) = column.filter else {
            let message = format!("\"{}\" has no filter", column.header);
            self.set_status_message(message);
            return;
        };
        let id = column.id.clone();
        let prompt = format!("{} [{}]: ", column.header, filter.label());
        let previous = self.view.filters.get(&id).cloned();
        let prefill = previous.as_ref().map(|v| v.as_text()).unwrap_or_default();
        self.pending_edit = Some(PendingEdit::Filter {
            id,
            filter,
            previous,
        });
        self.enter_cmd_mode(CMDMode::FilterColumn, prompt, &prefill);
    }

    fn enter_search_mode(&mut self) {
        if !self.table_config.can_filter {
            self.set_status_message("Filtering is disabled for this table");
            return;
        }
        let previous = self.view.global_filter.clone();
        self.pending_edit = Some(PendingEdit::Search {
            previous: previous.clone(),
        });
        self.enter_cmd_mode(CMDMode::SearchTable, "Search: ".to_string(), &previous);
    }

    /// Turn command line input into a filter value for the given filter type.
    /// `None` means the filter is to be removed.
    pub fn parse_filter_input(
        filter: FilterType,
        input: &str,
    ) -> Result<Option<FilterValue>, String> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(None);
        }
        match filter {
            _ if filter.is_threshold() => parse_number(input)
                .map(|n| Some(FilterValue::Number(n)))
                .ok_or_else(|| format!("\"{input}\" is not a number")),
            FilterType::CheckboxSelect => Ok(Some(FilterValue::List(
                input
                    .split(',')
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .collect(),
            ))),
            _ => Ok(Some(FilterValue::Text(input.to_string()))),
        }
    }

    fn set_filter(&mut self, id: &str, value: Option<FilterValue>) {
        let active = self.view.filters.set(id, value);
        debug!("Filter on {id} is {}", if active { "active" } else { "removed" });
        self.recompute_rows();
        self.view_changed();
    }

    fn set_global_filter(&mut self, term: &str) {
        self.view.global_filter = term.trim().to_string();
        self.table.page_index = 0;
        self.recompute_rows();
        self.view_changed();
    }

    fn raw_input(&mut self, key: KeyEvent) {
        if !self.active_cmdinput {
            return;
        }
        self.last_input = self.input.read(key);
        if self.last_input.canceled {
            self.cancel_cmd_input();
        } else if self.last_input.finished {
            self.handle_cmd_input();
        } else if self.last_input.changed {
            self.preview_cmd_input();
        }
        self.uidata.cmdinput = self.last_input.clone();
        self.uidata.active_cmdinput = self.active_cmdinput;
        self.uidata.last_update = Instant::now();
    }

    // Apply the input while typing, incomplete numbers are skipped.
    fn preview_cmd_input(&mut self) {
        let input = self.last_input.input.clone();
        match &self.pending_edit {
            Some(PendingEdit::Search { .. }) => self.set_global_filter(&input),
            Some(PendingEdit::Filter { id, filter, .. }) => {
                let (id, filter) = (id.clone(), *filter);
                if let Ok(value) = Self::parse_filter_input(filter, &input) {
                    self.set_filter(&id, value);
                }
            }
            None => {}
        }
    }

    fn leave_cmd_mode(&mut self) {
        self.active_cmdinput = false;
        self.modus = self.previous_modus;
        self.previous_modus = Modus::CMDINPUT;
        self.uidata.active_cmdinput = false;
    }

    fn cancel_cmd_input(&mut self) {
        trace!("Cancel cmd input");
        self.leave_cmd_mode();
        match self.pending_edit.take() {
            Some(PendingEdit::Search { previous }) => self.set_global_filter(&previous),
            Some(PendingEdit::Filter { id, previous, .. }) => self.set_filter(&id, previous),
            None => {}
        }
    }

    fn handle_cmd_input(&mut self) {
        trace!("Handle cmd input {}", self.last_input.input);
        self.leave_cmd_mode();

        let cmd_input = self.last_input.input.clone();
        match self.pending_edit.take() {
            Some(PendingEdit::Search { .. }) => {
                self.set_global_filter(&cmd_input);
            }
            Some(PendingEdit::Filter {
                id,
                filter,
                previous,
            }) => match Self::parse_filter_input(filter, &cmd_input) {
                Ok(value) => self.set_filter(&id, value),
                Err(message) => {
                    self.set_filter(&id, previous);
                    self.set_status_message(message);
                    return;
                }
            },
            None => info!("No pending edit for {cmd_input}"),
        }
        self.set_status_message(format!(
            "{} of {} records match",
            self.table.rows.len(),
            self.data.len()
        ));
    }

    fn clear_current_filter(&mut self) {
        let Some(id) = self.current_column().map(|c| c.id.clone()) else {
            return;
        };
        if self.view.filters.get(&id).is_some() {
            self.set_filter(&id, None);
            self.set_status_message(format!("Removed filter on {id}"));
        }
    }

    fn reset_filters(&mut self) {
        self.view.filters = self.table_config.initial_filters();
        self.view.filters.retain_valid(&self.columns);
        self.recompute_rows();
        self.view_changed();
        self.set_status_message("Filters reset to table defaults");
    }

    fn sort_current_column(&mut self, append: bool) {
        let Some(column) = self.current_column() else {
            return;
        };
        if !column.sortable {
            let message = format!("\"{}\" is not sortable", column.header);
            self.set_status_message(message);
            return;
        }
        let id = column.id.clone();

        // Cycle: ascending -> descending -> unsorted
        let current = self.view.sort_by.iter().position(|s| s.id == id);
        let next = match current.map(|i| self.view.sort_by[i].descending) {
            None => Some(ColumnSort::ascending(id.as_str())),
            Some(false) => Some(ColumnSort::descending(id.as_str())),
            Some(true) => None,
        };
        if append {
            match (current, next) {
                (Some(i), Some(sort)) => self.view.sort_by[i] = sort,
                (Some(i), None) => {
                    self.view.sort_by.remove(i);
                }
                (None, Some(sort)) => self.view.sort_by.push(sort),
                (None, None) => {}
            }
        } else {
            self.view.sort_by = next.into_iter().collect();
        }
        debug!("Sorting by {:?}", self.view.sort_by);

        self.recompute_rows();
        self.view_changed();
    }

    fn goto_page(&mut self, page_index: usize) {
        let page_index = std::cmp::min(page_index, self.page_count().saturating_sub(1));
        if page_index != self.table.page_index {
            self.table.page_index = page_index;
            self.table.curser_row = 0;
            self.table.offset_row = 0;
            self.update_table_data();
        }
    }

    fn cycle_page_size(&mut self) {
        let position = self.selected_position();
        let idx = PAGE_SIZE_CHOICES
            .iter()
            .position(|&s| s == self.view.page_size)
            .map(|i| (i + 1) % PAGE_SIZE_CHOICES.len())
            .unwrap_or(0);
        self.view.page_size = PAGE_SIZE_CHOICES[idx];
        // Keep the selected record on the new page
        self.table.page_index = position / self.view.page_size;
        self.table.offset_row = 0;
        self.table.curser_row = 0;
        self.select_row_in_page(position % self.view.page_size);
        self.view_changed();
        self.set_status_message(format!("{} records per page", self.view.page_size));
    }

    fn select_row_in_page(&mut self, row: usize) {
        let height = self.uilayout.table_height.max(1);
        if row >= self.table.offset_row && row < self.table.offset_row + height {
            self.table.curser_row = row - self.table.offset_row;
        } else {
            self.table.offset_row = row.saturating_sub(height - 1);
            self.table.curser_row = row - self.table.offset_row;
        }
        self.update_table_data();
    }

    fn select_column(&mut self, column: usize) {
        if self.table.visible_columns.is_empty() {
            return;
        }
        let shown_idx = self.table.shown_columns.get(column).copied();
        match shown_idx.and_then(|c| self.table.visible_columns.iter().position(|&v| v == c)) {
            Some(pos) => self.table.curser_column = pos,
            None => {
                self.table.offset_column = column;
                self.table.curser_column = 0;
            }
        }
        self.update_table_data();
    }

    fn hide_current_column(&mut self) {
        if !self.table_config.allows_column_toggle() {
            self.set_status_message("Columns of this table cannot be hidden");
            return;
        }
        let Some(column) = self.current_column() else {
            return;
        };
        if column.required {
            let message = format!("\"{}\" is required", column.header);
            self.set_status_message(message);
            return;
        }
        if self.table.shown_columns.len() <= 1 {
            self.set_status_message("The last column cannot be hidden");
            return;
        }
        let id = column.id.clone();
        self.view.hidden_columns.push(id.clone());
        self.update_shown_columns();
        self.update_table_data();
        self.view_changed();
        self.set_status_message(format!("Hid {id}, 'a' shows all columns"));
    }

    fn show_all_columns(&mut self) {
        if !self.table_config.allows_column_toggle() || self.view.hidden_columns.is_empty() {
            return;
        }
        self.view.hidden_columns.clear();
        self.update_shown_columns();
        self.update_table_data();
        self.view_changed();
    }

    fn toggle_table_index(&mut self) {
        self.table.show_index = !self.table.show_index;
        // Update ui layout and the underlying data
        self.ui_resize(self.uilayout.width, self.uilayout.height);
    }

    fn clipboard(&mut self) -> Option<&mut Clipboard> {
        if self.clipboard.is_none() {
            match Clipboard::new() {
                Ok(clipboard) => self.clipboard = Some(clipboard),
                Err(e) => error!("Clipboard not available: {:?}", e),
            }
        }
        self.clipboard.as_mut()
    }

    fn copy_to_clipboard(&mut self, content: String) {
        if !self.table_config.can_export {
            self.set_status_message("Export is disabled for this table");
            return;
        }
        trace!("Copy: {}", content);
        let result = match self.clipboard() {
            Some(clipboard) => clipboard.set_text(content).map_err(|e| format!("{e}")),
            None => Err("no clipboard".to_string()),
        };
        match result {
            Ok(_) => self.set_status_message("Copied to clipboard"),
            Err(e) => {
                error!("Error copying to clipboard: {e}");
                self.set_status_message(format!("Copy failed: {e}"));
            }
        }
    }

    fn copy_table_cell(&mut self) {
        let (Some(row), Some(column)) = (self.current_record(), self.current_column()) else {
            return;
        };
        let cell = column.render(self.data.value(column.field, row));
        self.copy_to_clipboard(cell);
    }

    fn wrap_cell_content(c: &str) -> String {
        let needs_escaping = c.contains('"');
        let needs_wrapping = c.chars().any(|c| c == ' ' || c == '\t' || c == ',' || c == '"');
        let mut out = c.to_string();

        if needs_escaping {
            out = out.replace('"', "\"\"");
        }
        if needs_wrapping {
            out = format!("\"{out}\"");
        }
        out
    }

    fn copy_table_row(&mut self) {
        let Some(row) = self.current_record() else {
            return;
        };
        let content = self
            .table
            .shown_columns
            .iter()
            .map(|&cidx| {
                let column = &self.columns[cidx];
                Self::wrap_cell_content(&column.render(self.data.value(column.field, row)))
            })
            .collect::<Vec<String>>()
            .join(",");
        self.copy_to_clipboard(content);
    }

    fn move_table_selection_up(&mut self, size: usize) {
        let table = &mut self.table;
        if table.curser_row > 0 {
            // Curser somewhere in the middle
            table.curser_row = table.curser_row.saturating_sub(size);
        } else if table.offset_row > 0 {
            // Curser at the top, shift the page up
            table.offset_row = table.offset_row.saturating_sub(size);
        } else if table.page_index > 0 {
            // Top of the page, continue at the end of the previous page
            table.page_index -= 1;
            let last = self.page_rows().len().saturating_sub(1);
            self.select_row_in_page(last);
            return;
        }
        self.update_table_data();
    }

    fn move_table_selection_down(&mut self, size: usize) {
        let page_len = self.page_rows().len();
        let height = self.uilayout.table_height.max(1);
        let row = self.table.offset_row + self.table.curser_row;
        if row + 1 < page_len {
            let table = &mut self.table;
            let target = std::cmp::min(row + size, page_len - 1);
            if target < table.offset_row + height {
                table.curser_row = target - table.offset_row;
            } else {
                // At the bottom of the screen, shift down
                table.offset_row = target + 1 - height;
                table.curser_row = height - 1;
            }
            self.update_table_data();
        } else if self.table.page_index + 1 < self.page_count() {
            // Continue at the top of the next page
            self.goto_page(self.table.page_index + 1);
        }
    }

    fn move_table_selection_left(&mut self) {
        let table = &mut self.table;
        if table.curser_column > 0 {
            table.curser_column -= 1;
        } else if table.offset_column > 0 {
            table.offset_column -= 1;
        }
        self.update_table_data();
    }

    fn move_table_selection_right(&mut self) {
        let ncolumns = self.table.shown_columns.len();
        let table = &mut self.table;

        if table.curser_column + table.offset_column + 1 < ncolumns {
            // Somewhere before the last column
            if table.curser_column + 1 < table.visible_columns.len() {
                // In the middle
                table.curser_column += 1;
            } else {
                // At the end of the screen
                table.offset_column += 1;
            }
            self.update_table_data();
        } else if table.visible_width > table.width && table.offset_column + 1 < ncolumns {
            // At the last visible column (which could be wider then the screen)
            table.offset_column += 1;
            self.update_table_data();
        }
    }

    // -------------------- Record view ---------------------- //

    fn build_record_view(&mut self, position: usize) {
        trace!("Building record view ...");
        let record = &mut self.record_view;
        record.header_data = self
            .columns
            .iter()
            .map(|c| {
                let hidden = if self.view.hidden_columns.contains(&c.id) { " (hidden)" } else { "" };
                format!("{}{hidden}", c.header)
                    .chars()
                    .take(self.config.max_column_width)
                    .collect::<String>()
            })
            .collect();

        record.curser_offset = 0;
        record.curser_row = 0;
        record.record_idx = position;
        record.height = self.uilayout.table_height;
        record.width = self.uilayout.table_width;
        record.header_width = record
            .header_data
            .iter()
            .map(|h| h.chars().count())
            .max()
            .unwrap_or(0);

        self.update_record_data();
    }

    fn update_record_data(&mut self) {
        let Some(&row) = self.table.rows.get(self.record_view.record_idx) else {
            return;
        };
        let record = &mut self.record_view;
        record.height = self.uilayout.table_height;
        record.width = self.uilayout.table_width;

        record.row_data = self
            .columns
            .iter()
            .map(|c| c.render(self.data.value(c.field, row)))
            .collect();

        let rbegin = std::cmp::min(record.curser_offset, record.row_data.len());
        let rend = std::cmp::min(rbegin + record.height, record.row_data.len());

        trace!(
            "Record: rIdx {}, rb {}, re {}, rows {}",
            record.record_idx,
            rbegin,
            rend,
            record.row_data.len()
        );
        record.header_view = ColumnView {
            name: "Attribute".to_string(),
            data: record.header_data[rbegin..rend].to_vec(),
            width: record.header_width,
        };
        record.row_view = ColumnView {
            name: "Value".to_string(),
            data: record.row_data[rbegin..rend].to_vec(),
            width: record.width.saturating_sub(record.header_width + 1),
        };

        self.update_uidata_for_record();
    }

    fn update_uidata_for_record(&mut self) {
        let record = &self.record_view;
        self.uidata.name = format!("R[{}]", self.table_name);
        self.uidata.table = vec![record.header_view.clone(), record.row_view.clone()];
        self.uidata.index = ColumnView::default();
        self.uidata.selected_row = record.curser_row;
        self.uidata.selected_column = 1;
        // Show which record we are looking at instead of the line in the record
        self.uidata.abs_selected_row = record.record_idx;
        self.uidata.empty_message = None;
        self.uidata.layout = self.uilayout.clone();
        self.uidata.last_update = Instant::now();
    }

    fn move_record_selection_up(&mut self, size: usize) {
        let record = &mut self.record_view;
        if record.curser_row > 0 {
            record.curser_row = record.curser_row.saturating_sub(size);
        } else if record.curser_offset > 0 {
            record.curser_offset = record.curser_offset.saturating_sub(size);
        }
        self.update_record_data();
    }

    fn move_record_selection_down(&mut self, size: usize) {
        let record = &mut self.record_view;
        let nrows = record.row_data.len();
        if record.curser_row + record.curser_offset + 1 < nrows {
            let target = std::cmp::min(record.curser_offset + record.curser_row + size, nrows - 1);
            let height = record.height.max(1);
            if target < record.curser_offset + height {
                record.curser_row = target - record.curser_offset;
            } else {
                record.curser_offset = target + 1 - height;
                record.curser_row = height - 1;
            }
            self.update_record_data();
        }
    }

    fn previous_record(&mut self) {
        let record = &mut self.record_view;
        record.record_idx = record.record_idx.saturating_sub(1);
        self.update_record_data();
    }

    fn next_record(&mut self) {
        let record = &mut self.record_view;
        if record.record_idx + 1 < self.table.rows.len() {
            record.record_idx += 1;
        }
        self.update_record_data();
    }

    fn copy_record_cell(&mut self) {
        let record = &self.record_view;
        if let Some(cell) = record.row_data.get(record.curser_offset + record.curser_row) {
            let cell = cell.clone();
            self.copy_to_clipboard(cell);
        }
    }

    // -------------------- Value counts ---------------------- //

    fn calculate_value_counts(&self, column: &ColumnDescriptor) -> Vec<(usize, String)> {
        let values = &self.data.fields[column.field].values;
        let mut counts: HashMap<String, usize> = HashMap::new();
        for &ridx in self.table.rows.iter() {
            let value = values.get(ridx).map(|v| v.display_text(true));
            *counts.entry(value.unwrap_or_else(|| NA.to_string())).or_insert(0) += 1;
        }
        let mut sorted: Vec<(usize, String)> = counts.into_iter().map(|(k, v)| (v, k)).collect();
        sorted.sort_unstable_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        sorted
    }

    fn build_counts_view(&mut self) {
        let Some(column_idx) = self.current_column_idx() else {
            return;
        };
        if self.table.rows.is_empty() {
            return;
        }
        trace!("Calculate value counts for column {}", column_idx);
        let counts = self.calculate_value_counts(&self.columns[column_idx]);

        let nrecords = self.table.rows.len();
        let view = &mut self.counts_view;
        view.column_idx = column_idx;
        view.curser_offset = 0;
        view.curser_row = 0;
        view.count_data = counts
            .iter()
            .map(|(c, _)| format!("{:.0}% {}", *c as f64 * 100.0 / nrecords as f64, c))
            .collect();
        view.value_data = counts.into_iter().map(|(_, v)| v).collect();

        self.previous_modus = self.modus;
        self.modus = Modus::COUNTS;
        self.update_counts_view();
    }

    fn update_counts_view(&mut self) {
        let view = &mut self.counts_view;
        view.height = self.uilayout.table_height;
        view.width = self.uilayout.table_width;
        let rbegin = std::cmp::min(view.curser_offset, view.value_data.len());
        let rend = std::cmp::min(rbegin + view.height, view.value_data.len());

        let count_width = view.count_data.iter().map(|c| c.len()).max().unwrap_or(0);
        view.count_view = ColumnView {
            name: "Count".to_string(),
            data: view.count_data[rbegin..rend].to_vec(),
            width: count_width,
        };
        view.value_view = ColumnView {
            name: "Value".to_string(),
            data: view.value_data[rbegin..rend].to_vec(),
            width: view.width.saturating_sub(count_width + 1),
        };

        let header = &self.columns[view.column_idx].header;
        self.uidata.name = format!("C[{header}]");
        self.uidata.table = vec![view.count_view.clone(), view.value_view.clone()];
        self.uidata.index = ColumnView::default();
        self.uidata.selected_column = 1;
        self.uidata.nrows = view.value_data.len();
        self.uidata.selected_row = view.curser_row;
        self.uidata.abs_selected_row = view.curser_row + view.curser_offset;
        self.uidata.empty_message = None;
        self.uidata.layout = self.uilayout.clone();
        self.uidata.last_update = Instant::now();
    }

    fn move_counts_selection_up(&mut self, size: usize) {
        let view = &mut self.counts_view;
        if view.curser_row > 0 {
            view.curser_row = view.curser_row.saturating_sub(size);
        } else if view.curser_offset > 0 {
            view.curser_offset = view.curser_offset.saturating_sub(size);
        }
        self.update_counts_view();
    }

    fn move_counts_selection_down(&mut self, size: usize) {
        let view = &mut self.counts_view;
        let nrows = view.value_data.len();
        if view.curser_row + view.curser_offset + 1 < nrows {
            let target = std::cmp::min(view.curser_offset + view.curser_row + size, nrows - 1);
            let height = view.height.max(1);
            if target < view.curser_offset + height {
                view.curser_row = target - view.curser_offset;
            } else {
                view.curser_offset = target + 1 - height;
                view.curser_row = height - 1;
            }
            self.update_counts_view();
        }
    }

    fn filter_by_selected_count(&mut self) {
        let view = &self.counts_view;
        let Some(value) = view
            .value_data
            .get(view.curser_offset + view.curser_row)
            .cloned()
        else {
            return;
        };
        let column = &self.columns[view.column_idx];
        let (id, header, filter) = (column.id.clone(), column.header.clone(), column.filter);
        let filter = match filter {
            Some(filter) if self.table_config.can_filter => filter,
            _ => {
                self.set_status_message(format!("\"{header}\" has no filter"));
                return;
            }
        };
        let value = match filter {
            FilterType::CheckboxSelect => Some(FilterValue::List(vec![value])),
            // Counted cells can hold several " // " members, select all of them
            FilterType::MultiSelect => Some(FilterValue::List(
                value
                    .split("//")
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty())
                    .collect(),
            )),
            _ => match Self::parse_filter_input(filter, &value) {
                Ok(value) => value,
                Err(message) => {
                    self.set_status_message(message);
                    return;
                }
            },
        };

        self.previous_modus = Modus::COUNTS;
        self.modus = Modus::TABLE;
        self.set_filter(&id, value);
        self.set_status_message(format!(
            "{} of {} records match",
            self.table.rows.len(),
            self.data.len()
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{self, DEFAULT_PVALUE_FILTER_VALUE};
    use crate::state::{FileStore, MemoryStore};
    use crate::values::{Field, RowValue};
    use pretty_assertions::assert_eq;
    use ratatui::crossterm::event::{KeyCode, KeyModifiers};

    fn text(s: &str) -> RowValue {
        RowValue::Text(s.to_string())
    }

    fn variants(n: usize) -> RecordData {
        let genes = ["APOE", "BIN1", "CLU", "PICALM"];
        RecordData::new(vec![
            Field {
                name: "variant_link".into(),
                values: (0..n)
                    .map(|i| RowValue::Link {
                        url: format!("/record/variant/rs{i}"),
                        text: format!("rs{i}"),
                    })
                    .collect(),
            },
            Field {
                name: "pvalue".into(),
                values: (0..n)
                    .map(|i| RowValue::Number(if i % 2 == 0 { 1e-9 * (i + 1) as f64 } else { 1e-3 }))
                    .collect(),
            },
            Field {
                name: "gene_impact".into(),
                values: (0..n).map(|i| text(genes[i % genes.len()])).collect(),
            },
            Field {
                name: "population".into(),
                values: (0..n).map(|_| text("EUR")).collect(),
            },
            Field {
                name: "track".into(),
                values: (0..n).map(|i| text(&format!("NG0000{i}"))).collect(),
            },
        ])
    }

    fn source(data: RecordData) -> TableSource {
        let attributes = data
            .fields
            .iter()
            .map(|f| AttributeDescriptor::new(f.name.clone()))
            .collect();
        TableSource {
            id: "gene/ad_variants_from_gwas".into(),
            name: "AD variants".into(),
            data,
            attributes,
            config: config::builtin_table("gene", "ad_variants_from_gwas").unwrap(),
        }
    }

    fn model_with(store: Box<dyn StateStore>, data: RecordData) -> Model {
        let mut model = Model::init(&RTVConfig::default(), store, 200, 40);
        model.open_table(source(data)).unwrap();
        model
    }

    fn model(n: usize) -> Model {
        model_with(Box::new(MemoryStore::default()), variants(n))
    }

    fn send(model: &mut Model, message: Message) {
        model.update(Some(message)).unwrap();
    }

    fn type_text(model: &mut Model, s: &str) {
        for c in s.chars() {
            send(model, Message::RawKey(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE)));
        }
    }

    fn key(model: &mut Model, code: KeyCode) {
        send(model, Message::RawKey(KeyEvent::new(code, KeyModifiers::NONE)));
    }

    fn clear_input(model: &mut Model) {
        send(model, Message::RawKey(KeyEvent::new(KeyCode::Char('u'), KeyModifiers::CONTROL)));
    }

    fn select_column(model: &mut Model, id: &str) {
        let pos = model
            .table
            .shown_columns
            .iter()
            .position(|&c| model.columns[c].id == id)
            .unwrap();
        model.select_column(pos);
        assert_eq!(model.current_column().unwrap().id, id);
    }

    #[test]
    fn opening_applies_configured_defaults() {
        let model = model(8);
        assert_eq!(model.status, Status::READY);
        // odd rows have p = 1e-3 and fail the significance filter
        assert_eq!(*model.table.rows, vec![0, 2, 4, 6]);
        assert_eq!(
            model.view.filters.get("pvalue"),
            Some(&FilterValue::Number(DEFAULT_PVALUE_FILTER_VALUE))
        );
        let headers: Vec<&str> = model.uidata.table.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(headers, vec!["variant_link", "pvalue ▲*", "gene_impact", "track"]);
        assert_eq!(model.get_uidata().nrows, 4);
        assert_eq!(model.get_uidata().total_rows, 8);
    }

    #[test]
    fn empty_data_reports_no_data() {
        let model = model(0);
        assert_eq!(model.status, Status::EMPTY);
        assert_eq!(
            model.get_uidata().empty_message.as_deref(),
            Some("No data available")
        );
    }

    #[test]
    fn sort_cycles_through_directions() {
        let mut model = model(8);
        select_column(&mut model, "gene_impact");
        send(&mut model, Message::Sort);
        assert_eq!(model.view.sort_by, vec![ColumnSort::ascending("gene_impact")]);
        // APOE (0, 4), CLU (2, 6): stable within equal keys
        assert_eq!(*model.table.rows, vec![0, 4, 2, 6]);

        send(&mut model, Message::Sort);
        assert_eq!(model.view.sort_by, vec![ColumnSort::descending("gene_impact")]);
        assert_eq!(*model.table.rows, vec![2, 6, 0, 4]);

        send(&mut model, Message::Sort);
        assert!(model.view.sort_by.is_empty());
        assert_eq!(*model.table.rows, vec![0, 2, 4, 6]);
    }

    #[test]
    fn add_sort_builds_multi_column_sort() {
        let mut model = model(8);
        select_column(&mut model, "gene_impact");
        send(&mut model, Message::AddSort);
        assert_eq!(
            model.view.sort_by,
            vec![ColumnSort::ascending("pvalue"), ColumnSort::ascending("gene_impact")]
        );
    }

    #[test]
    fn filter_input_applies_and_cancel_restores() {
        let mut model = model(8);
        select_column(&mut model, "pvalue");
        send(&mut model, Message::Filter);
        assert!(model.raw_keyevents());
        clear_input(&mut model);
        type_text(&mut model, "0.01");
        key(&mut model, KeyCode::Enter);
        assert!(!model.raw_keyevents());
        assert_eq!(model.view.filters.get("pvalue"), Some(&FilterValue::Number(0.01)));
        assert_eq!(model.table.rows.len(), 8);

        send(&mut model, Message::Filter);
        type_text(&mut model, "9");
        key(&mut model, KeyCode::Esc);
        assert_eq!(model.view.filters.get("pvalue"), Some(&FilterValue::Number(0.01)));
    }

    #[test]
    fn invalid_threshold_keeps_previous_filter() {
        let mut model = model(8);
        select_column(&mut model, "pvalue");
        send(&mut model, Message::Filter);
        type_text(&mut model, "abc");
        key(&mut model, KeyCode::Enter);
        assert_eq!(
            model.view.filters.get("pvalue"),
            Some(&FilterValue::Number(DEFAULT_PVALUE_FILTER_VALUE))
        );
        assert!(model.get_uidata().status_message.contains("not a number"));
    }

    #[test]
    fn clearing_the_input_removes_the_filter() {
        let mut model = model(8);
        select_column(&mut model, "pvalue");
        send(&mut model, Message::Filter);
        clear_input(&mut model);
        key(&mut model, KeyCode::Enter);
        assert!(model.view.filters.is_empty());
        assert_eq!(model.table.rows.len(), 8);

        send(&mut model, Message::ResetFilters);
        assert_eq!(model.table.rows.len(), 4);
    }

    #[test]
    fn global_search_narrows_rows() {
        let mut model = model(8);
        send(&mut model, Message::Search);
        type_text(&mut model, "apoe");
        // applied while typing
        assert_eq!(*model.table.rows, vec![0, 4]);
        key(&mut model, KeyCode::Enter);
        assert_eq!(model.view.global_filter, "apoe");
        assert!(model.uidata.filter_chips.iter().any(|c| c == "search \"apoe\""));
    }

    #[test]
    fn columns_without_filter_cannot_be_filtered() {
        let mut model = model(8);
        select_column(&mut model, "track");
        send(&mut model, Message::Filter);
        assert!(!model.raw_keyevents());
        assert!(model.get_uidata().status_message.contains("has no filter"));
    }

    #[test]
    fn paging() {
        let mut model = model(50);
        send(&mut model, Message::ClearFilter);
        select_column(&mut model, "pvalue");
        send(&mut model, Message::ClearFilter);
        assert_eq!(model.table.rows.len(), 50);
        assert_eq!(model.get_uidata().page_count, 5);

        send(&mut model, Message::NextPage);
        assert_eq!(model.get_uidata().page_index, 1);
        assert_eq!(model.uidata.table[0].data.len(), 10);

        send(&mut model, Message::LastPage);
        assert_eq!(model.get_uidata().page_index, 4);
        send(&mut model, Message::NextPage);
        assert_eq!(model.get_uidata().page_index, 4);

        send(&mut model, Message::CyclePageSize);
        assert_eq!(model.view.page_size, 25);
        // the first record of page 5 (position 40) is on page 2 of 25
        assert_eq!(model.get_uidata().page_index, 1);
        assert_eq!(model.selected_position(), 40);
    }

    #[test]
    fn moving_down_continues_on_next_page() {
        let mut model = model(30);
        select_column(&mut model, "pvalue");
        send(&mut model, Message::ClearFilter);
        for _ in 0..10 {
            send(&mut model, Message::MoveDown);
        }
        assert_eq!(model.get_uidata().page_index, 1);
        assert_eq!(model.selected_position(), 10);
        send(&mut model, Message::MoveUp);
        assert_eq!(model.get_uidata().page_index, 0);
        assert_eq!(model.selected_position(), 9);
    }

    #[test]
    fn required_columns_stay_visible() {
        let mut model = model(8);
        select_column(&mut model, "pvalue");
        send(&mut model, Message::HideColumn);
        assert!(!model.view.hidden_columns.contains(&"pvalue".to_string()));

        select_column(&mut model, "gene_impact");
        send(&mut model, Message::HideColumn);
        assert!(model.view.hidden_columns.contains(&"gene_impact".to_string()));
        assert_eq!(model.uidata.table.len(), 3);

        send(&mut model, Message::ShowAllColumns);
        assert_eq!(model.uidata.table.len(), 5);
    }

    #[test]
    fn value_counts_set_a_filter() {
        let mut model = model(8);
        select_column(&mut model, "gene_impact");
        send(&mut model, Message::ValueCounts);
        assert_eq!(model.counts_view.value_data, vec!["APOE", "CLU"]);
        assert_eq!(model.counts_view.count_data[0], "50% 2");
        send(&mut model, Message::MoveDown);
        send(&mut model, Message::Enter);
        assert_eq!(
            model.view.filters.get("gene_impact"),
            Some(&FilterValue::Text("CLU".into()))
        );
        assert_eq!(*model.table.rows, vec![2, 6]);
    }

    #[test]
    fn value_counts_of_multi_values_keep_the_chosen_rows() {
        let data = RecordData::new(vec![
            Field {
                name: "variant_link".into(),
                values: (0..3).map(|i| text(&format!("rs{i}"))).collect(),
            },
            Field {
                name: "pvalue".into(),
                values: vec![RowValue::Number(1e-9); 3],
            },
            Field {
                name: "covariates".into(),
                values: vec![text("age // sex"), text("age // sex"), text("bmi")],
            },
        ]);
        let mut model = model_with(Box::new(MemoryStore::default()), data);
        send(&mut model, Message::ShowAllColumns);
        select_column(&mut model, "covariates");
        send(&mut model, Message::ValueCounts);
        assert_eq!(model.counts_view.value_data, vec!["age // sex", "bmi"]);

        send(&mut model, Message::Enter);
        assert_eq!(
            model.view.filters.get("covariates"),
            Some(&FilterValue::List(vec!["age".into(), "sex".into()]))
        );
        assert_eq!(*model.table.rows, vec![0, 1]);
    }

    #[test]
    fn record_view_walks_filtered_rows() {
        let mut model = model(8);
        send(&mut model, Message::MoveDown);
        send(&mut model, Message::Enter);
        assert_eq!(model.record_view.record_idx, 1);
        assert_eq!(model.record_view.row_data[0], "rs2");
        send(&mut model, Message::MoveRight);
        assert_eq!(model.record_view.row_data[0], "rs4");
        send(&mut model, Message::Exit);
        assert_eq!(model.modus, Modus::TABLE);
    }

    #[test]
    fn view_state_survives_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut model = model_with(Box::new(FileStore::new(path.clone())), variants(8));
        select_column(&mut model, "gene_impact");
        send(&mut model, Message::Sort);
        send(&mut model, Message::CyclePageSize);
        send(&mut model, Message::Quit);
        assert_eq!(model.status, Status::QUITTING);

        let reopened = model_with(Box::new(FileStore::new(path)), variants(8));
        assert_eq!(reopened.view.sort_by, vec![ColumnSort::ascending("gene_impact")]);
        assert_eq!(reopened.view.page_size, 25);
        assert_eq!(*reopened.table.rows, vec![0, 4, 2, 6]);
    }

    #[test]
    fn parse_filter_input_by_type() {
        assert_eq!(
            Model::parse_filter_input(FilterType::PValueThreshold, " 1e-5 "),
            Ok(Some(FilterValue::Number(1e-5)))
        );
        assert!(Model::parse_filter_input(FilterType::GreaterThan, "x").is_err());
        assert_eq!(
            Model::parse_filter_input(FilterType::CheckboxSelect, "brain, liver,"),
            Ok(Some(FilterValue::List(vec!["brain".into(), "liver".into()])))
        );
        assert_eq!(Model::parse_filter_input(FilterType::Select, "  "), Ok(None));
    }

    #[test]
    fn wrap_cell_content_escapes_csv() {
        assert_eq!(Model::wrap_cell_content("APOE"), "APOE");
        assert_eq!(Model::wrap_cell_content("a,b"), "\"a,b\"");
        assert_eq!(Model::wrap_cell_content("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
