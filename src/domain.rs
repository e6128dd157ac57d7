use std::fmt;
use std::io::Error;
use std::path::PathBuf;
use std::time::Duration;

use derive_setters::Setters;
use polars::error::PolarsError;
use ratatui::crossterm::event::KeyEvent;
use tracing_error::SpanTrace;

#[derive(Debug)]
pub enum RTVError {
    IoError(Error),
    PolarsError(PolarsError),
    JsonError(serde_json::Error),
    LoadingFailed { message: String, trace: SpanTrace },
    InvalidConfig { message: String, trace: SpanTrace },
    UnknownTable(String),
    FileNotFound,
    PermissionDenied,
    UnknownFileType,
}

impl RTVError {
    pub fn loading_failed(message: impl Into<String>) -> Self {
        RTVError::LoadingFailed {
            message: message.into(),
            trace: SpanTrace::capture(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        RTVError::InvalidConfig {
            message: message.into(),
            trace: SpanTrace::capture(),
        }
    }
}

impl fmt::Display for RTVError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RTVError::IoError(e) => write!(f, "I/O error: {e}"),
            RTVError::PolarsError(e) => write!(f, "Could not read data: {e}"),
            RTVError::JsonError(e) => write!(f, "Invalid JSON: {e}"),
            RTVError::LoadingFailed { message, trace } => {
                write!(f, "Loading failed: {message}\n{trace}")
            }
            RTVError::InvalidConfig { message, trace } => {
                write!(f, "Invalid table configuration: {message}\n{trace}")
            }
            RTVError::UnknownTable(name) => write!(f, "Unknown record table \"{name}\""),
            RTVError::FileNotFound => write!(f, "File not found"),
            RTVError::PermissionDenied => write!(f, "Permission denied"),
            RTVError::UnknownFileType => {
                write!(f, "Unknown file type (expected csv, parquet or arrow)")
            }
        }
    }
}

impl std::error::Error for RTVError {}

impl From<Error> for RTVError {
    fn from(err: Error) -> Self {
        RTVError::IoError(err)
    }
}

impl From<PolarsError> for RTVError {
    fn from(err: PolarsError) -> Self {
        RTVError::PolarsError(err)
    }
}

impl From<serde_json::Error> for RTVError {
    fn from(err: serde_json::Error) -> Self {
        RTVError::JsonError(err)
    }
}

/// Runtime settings of the viewer, assembled from the command line.
#[derive(Debug, Clone, Setters)]
pub struct RTVConfig {
    pub event_poll_time: u64,
    pub max_column_width: usize,
    pub page_size: usize,
    pub state_debounce: Duration,
    pub state_file: Option<PathBuf>,
}

impl Default for RTVConfig {
    fn default() -> Self {
        RTVConfig {
            event_poll_time: 100,
            max_column_width: 40,
            page_size: DEFAULT_PAGE_SIZE,
            state_debounce: Duration::from_millis(500),
            state_file: None,
        }
    }
}

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const PAGE_SIZE_CHOICES: [usize; 4] = [10, 25, 50, 100];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CMDMode {
    FilterColumn,
    SearchTable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Quit,
    MoveUp,
    MoveDown,
    MoveLeft,
    MoveRight,
    MovePageUp,
    MovePageDown,
    MoveToFirstColumn,
    MoveToLastColumn,
    NextPage,
    PreviousPage,
    FirstPage,
    LastPage,
    CyclePageSize,
    Sort,
    AddSort,
    Filter,
    Search,
    ClearFilter,
    ResetFilters,
    FilterPanel,
    ValueCounts,
    HideColumn,
    ShowAllColumns,
    ToggleIndex,
    CopyCell,
    CopyRow,
    Enter,
    Exit,
    Help,
    Resize(usize, usize),
    RawKey(KeyEvent),
}

pub const HELP_TEXT: &str = "\
Navigation
  arrows / hjkl     move selection
  PgUp / PgDn       scroll within the page
  n / p             next / previous page
  g / G             first / last page
  0 / $             first / last column
  +                 cycle page size

Sorting
  s                 sort current column (asc, desc, off)
  S                 add current column to the sort

Filtering
  f                 filter current column
  /                 search all columns
  x                 clear filter of current column
  r                 reset filters to table defaults
  F                 show filter groups
  c                 value counts of current column, enter filters

Columns & records
  -                 hide current column
  a                 show all columns
  i                 toggle row index
  enter             show record
  y / Y             copy cell / row

  esc               back      q   quit";
