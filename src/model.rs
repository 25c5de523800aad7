use std::time::{Instant, SystemTime, UNIX_EPOCH};

use arboard::Clipboard;
use ratatui::crossterm::event::KeyEvent;
use tracing::{debug, error, info, trace, warn};

use crate::api::{
    ApiEvent, ApiRequest, ApiResponse, CollectionStats, Dispatch, ReportData, ReportRequest,
    Ticket, TicketCounter,
};
use crate::domain::{CMDMode, HELP_TEXT, Message, RVConfig, RVError, parse_limit};
use crate::filters::{FilterBuilder, FilterObject, Slot, option_label};
use crate::inputter::{InputResult, Inputter};
use crate::record::{Record, Value};
use crate::report::{Delimiter, ReportSession, SortDirection, SortKey, export, export_delimited};
use crate::ui::{COLUMN_WIDTH_MARGIN, TABLE_BORDER_WIDTH};

#[derive(Debug, PartialEq)]
pub enum Status {
    READY,
    LOADING,
    QUITTING,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Modus {
    GENERATOR,
    RESULTS,
    PICKER,
    POPUP,
    CMDINPUT,
}

/// The selectable controls of the generator panel, top to bottom.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Control {
    Collection,
    Field(Slot),
    Value(Slot),
    Limit,
}

const CONTROLS: [Control; 6] = [
    Control::Collection,
    Control::Field(Slot::First),
    Control::Value(Slot::First),
    Control::Field(Slot::Second),
    Control::Value(Slot::Second),
    Control::Limit,
];

#[derive(Debug, Clone, PartialEq)]
enum Choice {
    Collection(String),
    Field(String),
    ClearField,
    Value(usize),
}

struct Picker {
    control: Control,
    title: String,
    options: Vec<(String, Choice)>,
    curser: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum View {
    #[default]
    Generator,
    Results,
}

#[derive(Debug, Clone, Default)]
pub struct ControlView {
    pub label: String,
    pub value: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GeneratorData {
    pub controls: Vec<ControlView>,
    pub selected: usize,
    pub stats: Vec<String>,
    pub active_filters: Vec<String>,
    pub json_filter: Option<String>,
    pub loading: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ColumnView {
    pub name: String,
    pub width: usize,
    pub data: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ResultsData {
    pub title: String,
    pub columns: Vec<ColumnView>,
    pub selected_row: usize,
    pub selected_column: usize,
    pub page_line: String,
    pub no_data: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PickerData {
    pub title: String,
    pub options: Vec<String>,
    pub selected: usize,
}

pub struct UIData {
    pub view: View,
    pub generator: GeneratorData,
    pub results: ResultsData,
    pub picker: Option<PickerData>,
    pub show_popup: bool,
    pub popup_message: String,
    pub cmdinput: InputResult,
    pub cmd_mode: Option<CMDMode>,
    pub active_cmdinput: bool,
    pub status_message: String,
    pub last_status_message_update: Instant,
}

impl UIData {
    pub fn empty() -> Self {
        UIData {
            view: View::Generator,
            generator: GeneratorData::default(),
            results: ResultsData::default(),
            picker: None,
            show_popup: false,
            popup_message: String::new(),
            cmdinput: InputResult::default(),
            cmd_mode: None,
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
}

impl UILayout {
    pub fn from_values(ui_width: usize, ui_height: usize) -> Self {
        let layout = UILayout {
            width: ui_width,
            height: ui_height,
            table_width: ui_width.saturating_sub(2 * TABLE_BORDER_WIDTH),
        };
        trace!("Build UILayout: {:?}", layout);
        layout
    }
}

pub struct Model {
    config: RVConfig,
    pub status: Status,
    modus: Modus,
    previous_modus: Modus,
    popup_return: Modus,
    view: View,
    backend: Box<dyn Dispatch>,
    tickets: TicketCounter,
    collections: Vec<String>,
    collections_ticket: Option<Ticket>,
    collection: Option<String>,
    schema_ticket: Option<Ticket>,
    stats: Option<CollectionStats>,
    stats_ticket: Option<Ticket>,
    filters: FilterBuilder,
    json_filter: Option<FilterObject>,
    limit: usize,
    report_ticket: Option<Ticket>,
    /// Collection the loaded report was generated from.
    report_collection: Option<String>,
    session: ReportSession,
    selected_control: usize,
    picker: Option<Picker>,
    curser_row: usize,
    curser_column: usize,
    offset_column: usize,
    uilayout: UILayout,
    uidata: UIData,
    clipboard: Option<Clipboard>,
    input: Inputter,
    cmd_mode: Option<CMDMode>,
    last_input: InputResult,
    active_cmdinput: bool,
    status_message: String,
    last_status_message_update: Instant,
}

impl Model {
    pub fn init(
        config: &RVConfig,
        backend: Box<dyn Dispatch>,
        clipboard: Option<Clipboard>,
        ui_width: usize,
        ui_height: usize,
    ) -> Self {
        let mut model = Self {
            config: config.clone(),
            status: Status::READY,
            modus: Modus::GENERATOR,
            previous_modus: Modus::GENERATOR,
            popup_return: Modus::GENERATOR,
            view: View::Generator,
            backend,
            tickets: TicketCounter::default(),
            collections: Vec::new(),
            collections_ticket: None,
            collection: None,
            schema_ticket: None,
            stats: None,
            stats_ticket: None,
            filters: FilterBuilder::default(),
            json_filter: None,
            limit: config.limit,
            report_ticket: None,
            report_collection: None,
            session: ReportSession::default(),
            selected_control: 0,
            picker: None,
            curser_row: 0,
            curser_column: 0,
            offset_column: 0,
            uilayout: UILayout::from_values(ui_width, ui_height),
            uidata: UIData::empty(),
            clipboard,
            input: Inputter::default(),
            cmd_mode: None,
            last_input: InputResult::default(),
            active_cmdinput: false,
            status_message: "Started rv!".to_string(),
            last_status_message_update: Instant::now(),
        };
        model.session.set_page_size(config.page_size);

        let ticket = model.tickets.next();
        model.collections_ticket = Some(ticket);
        model.backend.dispatch(ticket, ApiRequest::Collections);

        if let Some(collection) = config.collection.clone() {
            model.select_collection(&collection);
        }
        model.set_status_message("Loading collections ...");
        model.update_uidata();
        model
    }

    pub fn get_uidata(&self) -> &UIData {
        &self.uidata
    }

    pub fn raw_keyevents(&self) -> bool {
        self.modus == Modus::CMDINPUT
    }

    pub fn quit(&mut self) {
        self.status = Status::QUITTING;
    }

    fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
        self.last_status_message_update = Instant::now();
    }

    fn ui_resize(&mut self, width: usize, height: usize) {
        trace!(
            "UI was resized! w:{}->{}, h:{}->{}",
            self.uilayout.width, width, self.uilayout.height, height
        );
        self.uilayout = UILayout::from_values(width, height);
    }

    pub fn update(&mut self, message: Option<Message>) {
        if let Some(msg) = message {
            match msg {
                Message::Backend(event) => self.handle_backend(event),
                Message::Resize(width, height) => self.ui_resize(width, height),
                Message::Quit => self.quit(),
                msg => match self.modus {
                    Modus::GENERATOR => self.update_generator(msg),
                    Modus::RESULTS => self.update_results(msg),
                    Modus::PICKER => self.update_picker(msg),
                    Modus::POPUP => {
                        if matches!(msg, Message::Exit | Message::Enter) {
                            self.close_popup();
                        }
                    }
                    Modus::CMDINPUT => {
                        if let Message::RawKey(key) = msg {
                            self.raw_input(key)
                        }
                    }
                },
            }
        }
        self.update_uidata();
    }

    fn update_generator(&mut self, msg: Message) {
        match msg {
            Message::MoveUp => self.selected_control = self.selected_control.saturating_sub(1),
            Message::MoveDown => {
                self.selected_control = std::cmp::min(self.selected_control + 1, CONTROLS.len() - 1)
            }
            Message::Enter => self.activate_control(),
            Message::Generate => self.generate(),
            Message::ClearFilters => self.clear_filters(),
            Message::EnterFilterJson => {
                let current = self
                    .json_filter
                    .as_ref()
                    .unwrap_or(self.filters.filter_object())
                    .to_string();
                self.enter_cmd_mode(CMDMode::FilterJson, &current);
            }
            Message::ToggleView => self.show_results(),
            Message::Help => self.show_help(),
            _ => (),
        }
    }

    fn update_results(&mut self, msg: Message) {
        match msg {
            Message::MoveUp => self.curser_row = self.curser_row.saturating_sub(1),
            Message::MoveDown => self.curser_row += 1, // clamped in update_uidata
            Message::MoveLeft => self.curser_column = self.curser_column.saturating_sub(1),
            Message::MoveRight => self.curser_column += 1,
            Message::NextPage => self.move_page(|current, total| std::cmp::min(current + 1, total)),
            Message::PrevPage => self.move_page(|current, _| current.saturating_sub(1)),
            Message::FirstPage => self.move_page(|_, _| 1),
            Message::LastPage => self.move_page(|_, total| total),
            Message::CyclePageSize => {
                let size = self.session.cycle_page_size();
                self.set_status_message(format!("Showing {size} rows per page"));
            }
            Message::SortAscending => self.sort_current_column(Some(SortDirection::Ascending)),
            Message::SortDescending => self.sort_current_column(Some(SortDirection::Descending)),
            Message::ClearSort => self.sort_current_column(None),
            Message::Search => {
                let query = self.session.query().query.clone();
                self.enter_cmd_mode(CMDMode::Search, &query);
            }
            Message::ExportCsv => self.export_csv(),
            Message::CopyPage => self.copy_page(),
            Message::Exit | Message::ToggleView => {
                self.view = View::Generator;
                self.modus = Modus::GENERATOR;
            }
            Message::Help => self.show_help(),
            _ => (),
        }
    }

    fn update_picker(&mut self, msg: Message) {
        let Some(picker) = self.picker.as_mut() else {
            self.modus = self.previous_modus;
            return;
        };
        match msg {
            Message::MoveUp => picker.curser = picker.curser.saturating_sub(1),
            Message::MoveDown => {
                picker.curser = std::cmp::min(picker.curser + 1, picker.options.len().saturating_sub(1))
            }
            Message::Enter => self.apply_picker(),
            Message::Exit => {
                self.picker = None;
                self.modus = self.previous_modus;
            }
            _ => (),
        }
    }

    // -------------------- Backend responses ---------------------- //

    fn handle_backend(&mut self, event: ApiEvent) {
        let ApiEvent {
            ticket,
            request,
            result,
        } = event;
        trace!("Backend event {ticket:?} for {request:?}");
        match request {
            ApiRequest::Collections => {
                let result = result.and_then(|r| match r {
                    ApiResponse::Collections(c) => Ok(c),
                    other => Err(mismatch(other)),
                });
                self.apply_collections(ticket, result);
            }
            ApiRequest::Schema { collection } => {
                let result = result.and_then(|r| match r {
                    ApiResponse::Schema(fields) => Ok(fields),
                    other => Err(mismatch(other)),
                });
                self.apply_schema(ticket, &collection, result);
            }
            ApiRequest::Statistics { collection } => {
                let result = result.and_then(|r| match r {
                    ApiResponse::Statistics(stats) => Ok(stats),
                    other => Err(mismatch(other)),
                });
                self.apply_statistics(ticket, &collection, result);
            }
            ApiRequest::DistinctValues { .. } => match result {
                Ok(ApiResponse::DistinctValues(values)) => {
                    self.filters.apply_distinct_values(ticket, values);
                }
                Ok(other) => {
                    self.filters.fail_distinct_values(ticket, &mismatch(other));
                }
                Err(e) => {
                    self.filters.fail_distinct_values(ticket, &e);
                }
            },
            ApiRequest::Report(request) => {
                let result = result.and_then(|r| match r {
                    ApiResponse::Report(data) => Ok(data),
                    other => Err(mismatch(other)),
                });
                self.apply_report(ticket, &request.collection, result);
            }
        }
    }

    fn apply_collections(&mut self, ticket: Ticket, result: Result<Vec<String>, RVError>) {
        if self.collections_ticket != Some(ticket) {
            debug!("Discarding stale collection list {ticket:?}");
            return;
        }
        self.collections_ticket = None;
        match result {
            Ok(collections) => {
                info!("Backend offers {} collections", collections.len());
                self.set_status_message(format!("{} collections available", collections.len()));
                self.collections = collections;
            }
            Err(e) => {
                error!("Loading collections failed: {e}");
                self.collections.clear();
                self.set_status_message("Could not load collections");
            }
        }
    }

    fn is_current(&self, expected: Option<Ticket>, ticket: Ticket, collection: &str) -> bool {
        expected == Some(ticket) && self.collection.as_deref() == Some(collection)
    }

    fn apply_schema(&mut self, ticket: Ticket, collection: &str, result: Result<Vec<String>, RVError>) {
        if !self.is_current(self.schema_ticket, ticket, collection) {
            debug!("Discarding stale schema of {collection} {ticket:?}");
            return;
        }
        self.schema_ticket = None;
        match result {
            Ok(fields) => self.filters.set_fields(fields),
            Err(e) => {
                error!("Loading fields of {collection} failed: {e}");
                self.filters.set_fields(Vec::new());
            }
        }
    }

    fn apply_statistics(
        &mut self,
        ticket: Ticket,
        collection: &str,
        result: Result<CollectionStats, RVError>,
    ) {
        if !self.is_current(self.stats_ticket, ticket, collection) {
            debug!("Discarding stale statistics of {collection} {ticket:?}");
            return;
        }
        self.stats_ticket = None;
        match result {
            Ok(stats) => self.stats = Some(stats),
            Err(e) => {
                error!("Loading statistics of {collection} failed: {e}");
                self.stats = None;
            }
        }
    }

    fn apply_report(&mut self, ticket: Ticket, collection: &str, result: Result<ReportData, RVError>) {
        if !self.is_current(self.report_ticket, ticket, collection) {
            debug!("Discarding stale report of {collection} {ticket:?}");
            return;
        }
        self.report_ticket = None;
        self.status = Status::READY;
        match result {
            Ok(data) => self.load_report(collection, data),
            Err(e) => {
                error!("Generating report failed: {e}");
                self.set_status_message("Report failed");
                self.show_popup(format!("Error generating report: {e}"));
            }
        }
    }

    fn load_report(&mut self, collection: &str, data: ReportData) {
        let start_time = Instant::now();
        let nrecords = data.records.len();
        let data_message = data.message;
        self.session.load(data.records, data.total_records);
        self.report_collection = Some(collection.to_string());
        self.session.set_page_size(self.config.page_size);
        self.curser_row = 0;
        self.curser_column = 0;
        self.offset_column = 0;
        info!(
            "Loaded report with {nrecords} records in {}ms",
            start_time.elapsed().as_millis()
        );
        match (&data_message, self.session.is_empty()) {
            (Some(message), _) => self.set_status_message(message.clone()),
            (None, true) => self.set_status_message("No data to display"),
            (None, false) => self.set_status_message(format!("Loaded {nrecords} records")),
        }
        if matches!(self.modus, Modus::GENERATOR | Modus::RESULTS) {
            self.show_results();
        } else {
            self.set_status_message("Report ready, press <Tab> to view it");
        }
    }

    // -------------------- Generator ---------------------- //

    fn activate_control(&mut self) {
        let control = CONTROLS[self.selected_control];
        let (title, options, curser): (String, Vec<(String, Choice)>, usize) = match control {
            Control::Collection => {
                if self.collections.is_empty() {
                    self.set_status_message("No collections available");
                    return;
                }
                let options = self
                    .collections
                    .iter()
                    .map(|c| (c.clone(), Choice::Collection(c.clone())))
                    .collect::<Vec<_>>();
                let curser = self
                    .collection
                    .as_ref()
                    .and_then(|current| self.collections.iter().position(|c| c == current))
                    .unwrap_or(0);
                ("Collection".to_string(), options, curser)
            }
            Control::Field(slot) => {
                if self.collection.is_none() {
                    self.set_status_message("Select a collection first");
                    return;
                }
                let mut options = vec![("(none)".to_string(), Choice::ClearField)];
                options.extend(
                    self.filters
                        .available_fields(slot)
                        .into_iter()
                        .map(|f| (f.to_string(), Choice::Field(f.to_string()))),
                );
                let current = self.filters.slot(slot).field();
                let curser = options
                    .iter()
                    .position(|(label, choice)| {
                        *choice != Choice::ClearField && Some(label.as_str()) == current
                    })
                    .unwrap_or(0);
                (format!("Field {}", slot.label()), options, curser)
            }
            Control::Value(slot) => {
                let state = self.filters.slot(slot);
                if state.field().is_none() {
                    self.set_status_message("Select a field first");
                    return;
                }
                if !self.filters.value_selector_enabled(slot) {
                    self.set_status_message("Values are still loading ...");
                    return;
                }
                if state.options().is_empty() {
                    self.set_status_message("No values available");
                    return;
                }
                let options = state
                    .options()
                    .iter()
                    .enumerate()
                    .map(|(idx, v)| (option_label(v), Choice::Value(idx)))
                    .collect::<Vec<_>>();
                let curser = state
                    .value()
                    .and_then(|value| state.options().iter().position(|v| v.display_string() == value))
                    .unwrap_or(0);
                (format!("Value {}", slot.label()), options, curser)
            }
            Control::Limit => {
                let limit = self.limit.to_string();
                self.enter_cmd_mode(CMDMode::Limit, &limit);
                return;
            }
        };

        self.picker = Some(Picker {
            control,
            title,
            options,
            curser,
        });
        self.previous_modus = self.modus;
        self.modus = Modus::PICKER;
    }

    fn apply_picker(&mut self) {
        let Some(picker) = self.picker.take() else {
            return;
        };
        self.modus = self.previous_modus;
        let Some((_, choice)) = picker.options.get(picker.curser).cloned() else {
            return;
        };
        trace!("Picked {choice:?} for {:?}", picker.control);

        match (picker.control, choice) {
            (Control::Collection, Choice::Collection(name)) => self.select_collection(&name),
            (Control::Field(slot), Choice::Field(field)) => self.select_filter_field(slot, &field),
            (Control::Field(slot), Choice::ClearField) => self.filters.clear_field(slot),
            (Control::Value(slot), Choice::Value(idx)) => {
                if let Err(e) = self.filters.select_value(slot, idx) {
                    warn!("Selecting value failed: {e}");
                    self.set_status_message(e.to_string());
                }
            }
            (control, choice) => warn!("Choice {choice:?} does not apply to {control:?}"),
        }
    }

    fn select_collection(&mut self, name: &str) {
        info!("Selected collection {name}");
        self.collection = Some(name.to_string());
        self.filters.set_collection(Some(name));
        self.json_filter = None;
        self.stats = None;
        if let Some(ticket) = self.report_ticket.take() {
            debug!("Dropping pending report {ticket:?}");
            self.status = Status::READY;
        }

        let ticket = self.tickets.next();
        self.schema_ticket = Some(ticket);
        self.backend.dispatch(
            ticket,
            ApiRequest::Schema {
                collection: name.to_string(),
            },
        );

        let ticket = self.tickets.next();
        self.stats_ticket = Some(ticket);
        self.backend.dispatch(
            ticket,
            ApiRequest::Statistics {
                collection: name.to_string(),
            },
        );
        self.set_status_message(format!("Loading fields of {name} ..."));
    }

    fn select_filter_field(&mut self, slot: Slot, field: &str) {
        let ticket = self.tickets.next();
        match self.filters.select_field(slot, field, ticket) {
            Ok(request) => self.backend.dispatch(ticket, request),
            Err(e) => {
                warn!("Cannot use {field} for filter {}: {e}", slot.label());
                self.set_status_message(e.to_string());
            }
        }
    }

    fn clear_filters(&mut self) {
        let had_filter = self.filters.has_active_filter() || self.json_filter.is_some();
        self.filters.clear_all();
        self.json_filter = None;
        if had_filter {
            self.set_status_message("Filters cleared");
        } else {
            self.set_status_message("Filter fields reset");
        }
    }

    /// The filter sent with the next report: a JSON filter entered by hand wins over
    /// the builder.
    fn active_filter(&self) -> FilterObject {
        self.json_filter
            .clone()
            .unwrap_or_else(|| self.filters.filter_object().clone())
    }

    fn generate(&mut self) {
        let Some(collection) = self.collection.clone() else {
            self.show_popup("Select a collection before generating a report.");
            return;
        };
        if self.report_ticket.is_some() {
            self.set_status_message("A report is already being generated ...");
            return;
        }
        let request = ReportRequest {
            collection,
            filters: self.active_filter(),
            limit: self.limit,
        };
        info!(
            "Generating report for {} with {} (limit {})",
            request.collection, request.filters, request.limit
        );
        let ticket = self.tickets.next();
        self.report_ticket = Some(ticket);
        self.status = Status::LOADING;
        self.backend.dispatch(ticket, ApiRequest::Report(request));
        self.set_status_message("Generating report ...");
    }

    fn show_results(&mut self) {
        if self.session.is_loaded() {
            self.view = View::Results;
            self.modus = Modus::RESULTS;
        } else {
            self.set_status_message("No report generated yet");
        }
    }

    // -------------------- Results ---------------------- //

    fn move_page(&mut self, target: impl Fn(usize, usize) -> usize) {
        let (current, total) = {
            let view = self.session.view();
            (view.current_page, view.total_pages)
        };
        let page = target(current, total).clamp(1, total);
        if page != current {
            self.session.set_page(page);
            self.curser_row = 0;
        }
    }

    fn sort_current_column(&mut self, direction: Option<SortDirection>) {
        let Some(column) = self.session.columns().get(self.curser_column) else {
            return;
        };
        let key = direction.map(|d| SortKey::new(column.name(), d));
        match &key {
            Some(k) => self.set_status_message(format!("Sorted by {} {}", k.field, k.direction.symbol())),
            None => self.set_status_message("Sort cleared"),
        }
        self.session.set_sort(key);
        self.curser_row = 0;
    }

    fn export_csv(&mut self) {
        if self.session.is_empty() {
            self.set_status_message("Nothing to export");
            return;
        }
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let exported = {
            let view = self.session.view();
            export_delimited(&view.rows, self.session.columns(), Delimiter::Comma)
                .map(|contents| (contents, view.rows.len()))
        }
        .and_then(|(contents, nrows)| {
            export::write_export(&self.config.export_dir, millis, &contents).map(|path| (path, nrows))
        });
        match exported {
            Ok((path, nrows)) => {
                self.set_status_message(format!("Exported {nrows} rows to {}", path.display()))
            }
            Err(e) => {
                error!("Export failed: {e}");
                self.show_popup(format!("Export failed: {e}"));
            }
        }
    }

    fn copy_page(&mut self) {
        if self.session.is_empty() {
            self.set_status_message("Nothing to copy");
            return;
        }
        let (text, nrows) = {
            let view = self.session.view();
            let page = view.page_rows();
            (export_delimited(page, self.session.columns(), Delimiter::Tab), page.len())
        };
        let text = match text {
            Ok(text) => text,
            Err(e) => {
                error!("Copy failed: {e}");
                self.show_popup(format!("Copy failed: {e}"));
                return;
            }
        };
        let copied = match self.clipboard.as_mut() {
            Some(clipboard) => clipboard.set_text(text.clone()).map_err(|e| e.to_string()),
            None => Err("no clipboard available".to_string()),
        };
        match copied {
            Ok(_) => {
                trace!("Copied page to clipboard.");
                self.set_status_message(format!("Copied {nrows} rows to clipboard"));
            }
            Err(e) => {
                warn!("Error copying to clipboard: {e}");
                self.show_popup(format!(
                    "Clipboard unavailable ({e}). Select and copy the text below:\n\n{text}"
                ));
            }
        }
    }

    // -------------------- Popup and command line ---------------------- //

    // Popups can arrive from the backend in any modus, so they keep their own
    // return point instead of `previous_modus`.
    fn show_popup(&mut self, message: impl Into<String>) {
        if self.modus != Modus::POPUP {
            self.popup_return = self.modus;
        }
        self.modus = Modus::POPUP;
        self.uidata.popup_message = message.into();
        self.uidata.show_popup = true;
    }

    fn close_popup(&mut self) {
        trace!("Close popup ...");
        self.modus = self.popup_return;
        self.uidata.show_popup = false;
    }

    fn show_help(&mut self) {
        self.show_popup(HELP_TEXT);
    }

    fn raw_input(&mut self, key: KeyEvent) {
        if self.active_cmdinput {
            self.last_input = self.input.read(key);
            if self.last_input.finished {
                self.handle_cmd_input();
            }
        }
    }

    fn enter_cmd_mode(&mut self, mode: CMDMode, initial: &str) {
        trace!("Entering command mode {mode:?} ...");
        self.previous_modus = self.modus;
        self.modus = Modus::CMDINPUT;
        self.cmd_mode = Some(mode);

        self.active_cmdinput = true;
        self.input.clear();
        self.input.set(initial);
        self.last_input = self.input.get();
    }

    fn handle_cmd_input(&mut self) {
        trace!("Handle cmd input {}", self.last_input.input);

        self.active_cmdinput = false;
        self.modus = self.previous_modus;
        self.previous_modus = Modus::CMDINPUT;

        let mode = self.cmd_mode.take();
        if self.last_input.canceled {
            return;
        }
        let cmd_input = self.last_input.input.clone();
        match mode {
            Some(CMDMode::Search) => {
                self.session.set_query(&cmd_input);
                self.curser_row = 0;
                let matches = self.session.view().rows.len();
                self.set_status_message(format!("Found {matches} matching rows"));
            }
            Some(CMDMode::FilterJson) => match FilterObject::parse(&cmd_input) {
                Ok(filter) if filter.is_empty() => {
                    self.json_filter = None;
                    self.set_status_message("JSON filter cleared");
                }
                Ok(filter) => {
                    self.set_status_message(format!("Using JSON filter {filter}"));
                    self.json_filter = Some(filter);
                }
                Err(e) => self.show_popup(e.to_string()),
            },
            Some(CMDMode::Limit) => match parse_limit(&cmd_input) {
                Ok(limit) => {
                    self.limit = limit;
                    self.set_status_message(format!("Limit set to {limit}"));
                }
                Err(e) => self.show_popup(e.to_string()),
            },
            None => info!("Cmd mode is none!"),
        }
    }

    // -------------------- UI data ---------------------- //

    fn update_uidata(&mut self) {
        let generator = self.build_generator_data();
        let results = if self.session.is_loaded() {
            self.build_results_data()
        } else {
            ResultsData::default()
        };
        let picker = self.picker.as_ref().map(|p| PickerData {
            title: p.title.clone(),
            options: p.options.iter().map(|(label, _)| label.clone()).collect(),
            selected: p.curser,
        });

        let uidata = &mut self.uidata;
        uidata.view = self.view;
        uidata.generator = generator;
        uidata.results = results;
        uidata.picker = picker;
        uidata.cmdinput = self.last_input.clone();
        uidata.cmd_mode = self.cmd_mode;
        uidata.active_cmdinput = self.active_cmdinput;
        uidata.status_message = self.status_message.clone();
        uidata.last_status_message_update = self.last_status_message_update;
    }

    fn build_generator_data(&self) -> GeneratorData {
        let mut controls = Vec::with_capacity(CONTROLS.len());
        for control in CONTROLS {
            let view = match control {
                Control::Collection => ControlView {
                    label: "Collection".to_string(),
                    value: self
                        .collection
                        .clone()
                        .unwrap_or_else(|| "Select a collection ...".to_string()),
                    enabled: !self.collections.is_empty(),
                },
                Control::Field(slot) => ControlView {
                    label: format!("Field {}", slot.label()),
                    value: self
                        .filters
                        .slot(slot)
                        .field()
                        .map(str::to_string)
                        .unwrap_or_else(|| "Select a field ...".to_string()),
                    enabled: self.collection.is_some() && !self.filters.fields().is_empty(),
                },
                Control::Value(slot) => {
                    let state = self.filters.slot(slot);
                    let value = match (state.value(), state.is_loading()) {
                        (Some(v), _) => v.to_string(),
                        (None, true) => "Loading ...".to_string(),
                        (None, false) => "Select a value ...".to_string(),
                    };
                    ControlView {
                        label: format!("Value {}", slot.label()),
                        value,
                        enabled: self.filters.value_selector_enabled(slot),
                    }
                }
                Control::Limit => ControlView {
                    label: "Limit".to_string(),
                    value: self.limit.to_string(),
                    enabled: true,
                },
            };
            controls.push(view);
        }

        let stats = match &self.stats {
            Some(stats) => vec![
                format!("Documents: {}", stats.total_documents),
                format!("Fields: {}", stats.fields.join(", ")),
            ],
            None => Vec::new(),
        };
        let active_filters = self
            .filters
            .filter_object()
            .iter()
            .map(|(field, value)| match value {
                serde_json::Value::String(s) => format!("{field}: {s}"),
                other => format!("{field}: {other}"),
            })
            .collect();

        GeneratorData {
            controls,
            selected: self.selected_control,
            stats,
            active_filters,
            json_filter: self.json_filter.as_ref().map(FilterObject::to_string),
            loading: self.report_ticket.is_some(),
        }
    }

    fn build_results_data(&mut self) -> ResultsData {
        let ncolumns = self.session.columns().len();
        let view = self.session.view();
        let page = view.page_rows();

        self.curser_row = std::cmp::min(self.curser_row, page.len().saturating_sub(1));
        self.curser_column = std::cmp::min(self.curser_column, ncolumns.saturating_sub(1));

        let title = format!(
            "{} ({} records)",
            self.report_collection.as_deref().unwrap_or("Report"),
            self.session.total_records()
        );
        let query = &self.session.query().query;
        let mut page_line = format!(
            "Page {}/{} | {} of {} rows | {} per page",
            view.current_page,
            view.total_pages,
            view.rows.len(),
            self.session.records().len(),
            self.session.query().page_size
        );
        if !query.is_empty() {
            page_line.push_str(&format!(" | search \"{query}\""));
        }

        if self.session.is_empty() {
            return ResultsData {
                title,
                page_line,
                no_data: true,
                ..ResultsData::default()
            };
        }

        let sort = self.session.query().sort.as_ref();
        let columns: Vec<ColumnView> = self
            .session
            .columns()
            .iter()
            .map(|c| {
                let mut name = c.name().to_string();
                if let Some(key) = sort.filter(|k| k.field == c.name()) {
                    name = format!("{name} {}", key.direction.symbol());
                }
                Self::build_column_view(name, c.name(), page, self.config.max_column_width)
            })
            .collect();

        let widths: Vec<usize> = columns.iter().map(|c| c.width).collect();
        self.offset_column = Self::scroll_offset(
            &widths,
            self.offset_column,
            self.curser_column,
            self.uilayout.table_width,
        );
        let visible = fit_columns(&widths, self.offset_column, self.uilayout.table_width);

        let mut visible_columns = Vec::with_capacity(visible.len());
        for (idx, width) in visible.iter() {
            let mut column = columns[*idx].clone();
            column.name = get_visible_name(&column.name, *width);
            column.width = *width;
            visible_columns.push(column);
        }

        ResultsData {
            title,
            columns: visible_columns,
            selected_row: self.curser_row,
            selected_column: self.curser_column - self.offset_column,
            page_line,
            no_data: false,
        }
    }

    fn build_column_view(name: String, field: &str, page: &[&Record], max_column_width: usize) -> ColumnView {
        let data: Vec<String> = page
            .iter()
            .map(|r| match r.get(field) {
                None | Some(Value::Null) => String::from("∅"),
                Some(v) => v.display_string().replace("\r\n", " ↵ ").replace('\n', " ↵ "),
            })
            .collect();
        let max_width = data.iter().map(|s| s.chars().count()).max().unwrap_or(0);
        let width = std::cmp::max(name.chars().count(), max_width) + COLUMN_WIDTH_MARGIN;
        ColumnView {
            name,
            width: std::cmp::min(width, max_column_width),
            data,
        }
    }

    // Moves the horizontal offset until the curser column is on screen.
    fn scroll_offset(widths: &[usize], offset: usize, curser: usize, table_width: usize) -> usize {
        if curser < offset {
            return curser;
        }
        let mut offset = offset;
        while offset < curser
            && !fit_columns(widths, offset, table_width)
                .iter()
                .any(|(idx, _)| *idx == curser)
        {
            offset += 1;
        }
        offset
    }
}

fn mismatch(response: ApiResponse) -> RVError {
    RVError::Backend(format!("unexpected response {response:?}"))
}

/// Returns the columns (index, render width) that fit into `table_width` starting at
/// `offset`. The last column may be cut to the remaining width.
pub fn fit_columns(widths: &[usize], offset: usize, table_width: usize) -> Vec<(usize, usize)> {
    let mut visible = Vec::new();
    let mut visible_width = 0;
    for (idx, width) in widths.iter().enumerate().skip(offset) {
        if visible_width + width + 1 <= table_width {
            visible.push((idx, *width));
            visible_width += width + 1;
        } else {
            // Add the last partial visible column
            if visible_width < table_width {
                visible.push((idx, table_width - visible_width));
            }
            break;
        }
    }
    visible
}

fn get_visible_name(name: &str, width: usize) -> String {
    if width < 3 {
        return String::new();
    }
    if name.chars().count() > width {
        let mut reduced: String = name.chars().take(width - 3).collect();
        reduced.push_str("...");
        reduced
    } else {
        name.to_string()
    }
}
