use std::fmt;
use std::io::Error;
use std::path::PathBuf;
use std::time::Duration;

use derive_setters::Setters;
use ratatui::crossterm::event::KeyEvent;

use crate::api::ApiEvent;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_LIMIT: usize = 100;
pub const MAX_LIMIT: usize = 10_000;
pub const PAGE_SIZES: [usize; 4] = [10, 25, 50, 100];

pub const HELP_TEXT: &str = "\
Generator
  Up/Down      Select control
  Enter        Open selector / edit limit
  g            Generate report
  f            Enter JSON filter
  c            Clear filters
  Tab          Show results

Results
  Up/Down      Move row        Left/Right  Move column
  PgDn/PgUp    Next/prev page  Home/End    First/last page
  z            Cycle page size /           Search
  s / S        Sort asc/desc   u           Clear sort
  e            Export CSV      y           Copy page
  Esc / Tab    Back to generator

  ?  Help      q  Quit";

#[derive(Debug)]
pub enum RVError {
    IoError(Error),
    RequestFailed(reqwest::Error),
    MalformedPayload(serde_json::Error),
    ExportFailed(csv::Error),
    Backend(String),
    InvalidUrl(String),
    InvalidFilter(String),
    InvalidLimit(String),
    FieldInUse(String),
    NoCollection,
    NoFieldSelected,
    UnknownOption(usize),
    ValuesLoading,
}

impl fmt::Display for RVError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RVError::IoError(e) => write!(f, "I/O error: {e}"),
            RVError::RequestFailed(e) => write!(f, "request failed: {e}"),
            RVError::MalformedPayload(e) => write!(f, "malformed payload: {e}"),
            RVError::ExportFailed(e) => write!(f, "export failed: {e}"),
            RVError::Backend(msg) => write!(f, "backend error: {msg}"),
            RVError::InvalidUrl(url) => write!(f, "invalid url: {url}"),
            RVError::InvalidFilter(msg) => write!(f, "invalid filter: {msg}"),
            RVError::InvalidLimit(msg) => write!(f, "invalid limit: {msg}"),
            RVError::FieldInUse(field) => write!(f, "field \"{field}\" is used by the other filter"),
            RVError::NoCollection => write!(f, "no collection selected"),
            RVError::NoFieldSelected => write!(f, "no field selected"),
            RVError::UnknownOption(idx) => write!(f, "unknown option {idx}"),
            RVError::ValuesLoading => write!(f, "values are still loading"),
        }
    }
}

impl std::error::Error for RVError {}

impl From<Error> for RVError {
    fn from(err: Error) -> Self {
        RVError::IoError(err)
    }
}

impl From<reqwest::Error> for RVError {
    fn from(err: reqwest::Error) -> Self {
        RVError::RequestFailed(err)
    }
}

impl From<serde_json::Error> for RVError {
    fn from(err: serde_json::Error) -> Self {
        RVError::MalformedPayload(err)
    }
}

impl From<csv::Error> for RVError {
    fn from(err: csv::Error) -> Self {
        RVError::ExportFailed(err)
    }
}

#[derive(Debug, Clone, Setters)]
#[setters(into)]
pub struct RVConfig {
    pub api_url: String,
    pub collection: Option<String>,
    pub limit: usize,
    pub page_size: usize,
    pub export_dir: PathBuf,
    pub request_timeout: Duration,
    pub event_poll_time: u64,
    pub max_column_width: usize,
}

impl Default for RVConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            collection: None,
            limit: DEFAULT_LIMIT,
            page_size: PAGE_SIZES[0],
            export_dir: PathBuf::from("."),
            request_timeout: Duration::from_secs(10),
            event_poll_time: 100,
            max_column_width: 40,
        }
    }
}

/// Parses a row limit as typed by the user.
pub fn parse_limit(input: &str) -> Result<usize, RVError> {
    let limit: usize = input
        .trim()
        .parse()
        .map_err(|_| RVError::InvalidLimit(format!("\"{}\" is not a number", input.trim())))?;
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(RVError::InvalidLimit(format!(
            "{limit} is outside 1..={MAX_LIMIT}"
        )));
    }
    Ok(limit)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CMDMode {
    Search,
    FilterJson,
    Limit,
}

#[derive(Debug)]
pub enum Message {
    Quit,
    MoveUp,
    MoveDown,
    MoveLeft,
    MoveRight,
    NextPage,
    PrevPage,
    FirstPage,
    LastPage,
    CyclePageSize,
    SortAscending,
    SortDescending,
    ClearSort,
    Search,
    EnterFilterJson,
    Enter,
    Exit,
    ToggleView,
    Generate,
    ClearFilters,
    ExportCsv,
    CopyPage,
    Help,
    Resize(usize, usize),
    RawKey(KeyEvent),
    Backend(ApiEvent),
}
