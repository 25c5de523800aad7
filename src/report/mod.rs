//! The tabular report engine.
//!
//! A loaded record set flows through `project` once. `search` -> `sort` run
//! again when the query or the sort key changes, paging only slices their result.

pub mod columns;
pub mod export;
pub mod paginate;
pub mod search;
pub mod sort;

pub use columns::{Column, project};
pub use export::{Delimiter, export_delimited};
pub use paginate::paginate;
pub use search::search;
pub use sort::{SortDirection, SortKey, sort};

use tracing::debug;

use crate::domain::PAGE_SIZES;
use crate::record::Record;

#[derive(Debug, Clone, PartialEq)]
pub struct QueryState {
    pub query: String,
    pub sort: Option<SortKey>,
    /// 1-based and possibly beyond the last page, see `paginate`.
    pub page: usize,
    pub page_size: usize,
}

impl Default for QueryState {
    fn default() -> Self {
        Self {
            query: String::new(),
            sort: None,
            page: 1,
            page_size: PAGE_SIZES[0],
        }
    }
}

/// A record set together with its derived columns and the user's query state.
#[derive(Debug, Default)]
pub struct ReportSession {
    records: Vec<Record>,
    columns: Vec<Column>,
    total_records: usize,
    query: QueryState,
    loaded: bool,
    /// Indices into `records` that survived the search, in sort order.
    rows: Vec<usize>,
}

/// The pipeline result for the current query state.
#[derive(Debug)]
pub struct ReportView<'a> {
    /// Every row that survived the search, in sort order.
    pub rows: Vec<&'a Record>,
    pub current_page: usize,
    pub total_pages: usize,
    page_begin: usize,
    page_end: usize,
}

impl<'a> ReportView<'a> {
    pub fn page_rows(&self) -> &[&'a Record] {
        &self.rows[self.page_begin..self.page_end]
    }
}

impl ReportSession {
    /// Replaces the record set and resets the query state to its defaults.
    pub fn load(&mut self, records: Vec<Record>, total_records: usize) {
        self.columns = project(&records);
        self.records = records;
        self.total_records = total_records;
        self.query = QueryState::default();
        self.loaded = true;
        self.refresh();
        debug!(
            "Loaded {} records, {} columns",
            self.records.len(),
            self.columns.len()
        );
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// True when a report was loaded but nothing can be shown.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() || self.columns.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn total_records(&self) -> usize {
        self.total_records
    }

    pub fn query(&self) -> &QueryState {
        &self.query
    }

    pub fn set_query(&mut self, query: &str) {
        self.query.query = query.to_string();
        self.query.page = 1;
        self.refresh();
    }

    pub fn set_sort(&mut self, sort: Option<SortKey>) {
        self.query.sort = sort;
        self.query.page = 1;
        self.refresh();
    }

    pub fn set_page(&mut self, page: usize) {
        self.query.page = page.max(1);
    }

    /// Changes the page size without touching the stored page.
    pub fn set_page_size(&mut self, page_size: usize) {
        self.query.page_size = page_size.max(1);
    }

    pub fn cycle_page_size(&mut self) -> usize {
        let next = PAGE_SIZES
            .iter()
            .position(|&s| s == self.query.page_size)
            .map(|idx| PAGE_SIZES[(idx + 1) % PAGE_SIZES.len()])
            .unwrap_or(PAGE_SIZES[0]);
        self.set_page_size(next);
        next
    }

    pub fn view(&self) -> ReportView<'_> {
        let page = paginate(&self.rows, self.query.page, self.query.page_size);
        let page_begin = (page.current_page - 1) * self.query.page_size;
        let page_end = page_begin + page.rows.len();
        let (current_page, total_pages) = (page.current_page, page.total_pages);

        ReportView {
            rows: self.rows.iter().map(|&idx| &self.records[idx]).collect(),
            current_page,
            total_pages,
            page_begin,
            page_end,
        }
    }

    fn refresh(&mut self) {
        let found = search(&self.records, &self.columns, &self.query.query);
        self.rows = sort(&self.records, found, self.query.sort.as_ref());
        debug!("{} of {} rows match", self.rows.len(), self.records.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(v: serde_json::Value) -> Vec<Record> {
        serde_json::from_value(v).unwrap()
    }

    fn numbered(n: usize) -> Vec<Record> {
        records(serde_json::Value::Array(
            (0..n).map(|i| json!({"Id": i, "Title": format!("game {i}")})).collect(),
        ))
    }

    #[test]
    fn empty_report_renders_no_data() {
        let mut session = ReportSession::default();
        session.load(Vec::new(), 0);
        assert!(session.is_loaded());
        assert!(session.is_empty());
        assert!(session.columns().is_empty());
        let view = session.view();
        assert!(view.rows.is_empty());
        assert!(view.page_rows().is_empty());
        assert_eq!((view.current_page, view.total_pages), (1, 1));
    }

    #[test]
    fn pipeline_pages_twenty_five_rows() {
        let mut session = ReportSession::default();
        session.load(numbered(25), 25);
        let view = session.view();
        assert_eq!(view.total_pages, 3);
        assert_eq!(view.page_rows().len(), 10);

        session.set_page(3);
        assert_eq!(session.view().page_rows().len(), 5);
    }

    #[test]
    fn pipeline_searches_then_sorts() {
        let mut session = ReportSession::default();
        session.load(
            records(json!([
                {"Title": "A", "Score": 7},
                {"Title": "B", "Score": null},
                {"Title": "C", "Score": 9},
                {"Title": "D", "Score": 1},
            ])),
            4,
        );
        session.set_sort(Some(SortKey::new("Score", SortDirection::Descending)));
        let titles: Vec<String> = session.view().rows.iter().map(|r| r.display("Title")).collect();
        assert_eq!(titles, vec!["C", "A", "D", "B"]);

        session.set_query("c");
        let titles: Vec<String> = session.view().rows.iter().map(|r| r.display("Title")).collect();
        assert_eq!(titles, vec!["C"]);
    }

    #[test]
    fn matching_rows_follow_query_and_sort() {
        let mut session = ReportSession::default();
        session.load(numbered(12), 12);
        session.set_query("game 1");
        let ids = |s: &ReportSession| -> Vec<String> {
            s.view().rows.iter().map(|r| r.display("Id")).collect()
        };
        assert_eq!(ids(&session), vec!["1", "10", "11"]);

        session.set_sort(Some(SortKey::new("Id", SortDirection::Descending)));
        assert_eq!(ids(&session), vec!["11", "10", "1"]);

        session.set_page(2);
        session.set_page_size(25);
        assert_eq!(ids(&session), vec!["11", "10", "1"]);

        session.set_query("");
        assert_eq!(ids(&session).len(), 12);
        assert_eq!(ids(&session)[0], "11");

        session.load(numbered(3), 3);
        assert_eq!(ids(&session), vec!["0", "1", "2"]);
    }

    #[test]
    fn load_resets_query_state() {
        let mut session = ReportSession::default();
        session.load(numbered(30), 30);
        session.set_query("game");
        session.set_sort(Some(SortKey::new("Id", SortDirection::Descending)));
        session.set_page(3);
        session.set_page_size(25);

        session.load(numbered(5), 5);
        assert_eq!(session.query().query, "");
        assert_eq!(session.query().sort, None);
        assert_eq!(session.query().page, 1);
        assert_eq!(session.query().page_size, 10);
    }

    #[test]
    fn page_size_change_keeps_stored_page() {
        let mut session = ReportSession::default();
        session.load(numbered(25), 25);
        session.set_page(3);
        session.set_page_size(50);
        assert_eq!(session.query().page, 3);
        assert_eq!(session.view().current_page, 1);
        session.set_page_size(10);
        assert_eq!(session.view().current_page, 3);
    }

    #[test]
    fn page_sizes_cycle() {
        let mut session = ReportSession::default();
        assert_eq!(session.cycle_page_size(), 25);
        assert_eq!(session.cycle_page_size(), 50);
        assert_eq!(session.cycle_page_size(), 100);
        assert_eq!(session.cycle_page_size(), 10);
    }
}
