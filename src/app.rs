use chrono::{DateTime, Utc};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::collections::VecDeque;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{Error, Result};
use crate::loader::{execute, LoaderConfig, PageFetcher, PaginatedLoader};
use crate::pagination::{Applied, FetchTicket, Filters, RenderStrategy, Row, SortState, Status};
use crate::types::{
    AoMessage, AppEvent, ArnsRecord, ArweaveBlock, DirMessage, Direction, MessageType, PageRows,
    TokenTransfer,
};
use crate::util_text::{format_amount, format_relative, truncate_id};

/// Rows from the loaded end at which the next page is requested.
pub const NEAR_END: usize = 5;
const STATUS_LOG_LEN: usize = 50;

/// Action values offered by the `a` filter key, `None` first.
pub const ACTION_FILTERS: [Option<&str>; 6] = [
    None,
    Some("Eval"),
    Some("Transfer"),
    Some("Credit-Notice"),
    Some("Debit-Notice"),
    Some("Info"),
];

/// A row type the terminal table knows how to show.
pub trait TableRow: Row + Send + Sync + 'static {
    fn headers() -> &'static [&'static str];
    fn widths() -> &'static [u16];
    fn cells(&self, now: DateTime<Utc>) -> Vec<String>;
    fn into_page(rows: Vec<Self>) -> PageRows;
    fn from_page(page: PageRows) -> Option<Vec<Self>>;

    /// Sort keys the backend understands; the first is the default.
    fn sort_fields() -> &'static [&'static str] {
        &["ingestedAt"]
    }
    /// Whether Type/Action tag filters apply.
    fn filterable() -> bool {
        false
    }
}

fn ts(t: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    t.map(|t| format_relative(t, now)).unwrap_or_else(|| "-".into())
}

impl TableRow for AoMessage {
    fn headers() -> &'static [&'static str] {
        &["ID", "Type", "Action", "From", "To", "Height", "Ingested"]
    }
    fn widths() -> &'static [u16] {
        &[19, 11, 16, 19, 19, 9, 10]
    }
    fn cells(&self, now: DateTime<Utc>) -> Vec<String> {
        vec![
            truncate_id(&self.id),
            self.r#type.to_string(),
            self.action.clone().unwrap_or_else(|| "-".into()),
            truncate_id(&self.from),
            truncate_id(&self.to),
            self.block_height.map(|h| h.to_string()).unwrap_or_else(|| "-".into()),
            ts(self.ingested_at, now),
        ]
    }
    fn into_page(rows: Vec<Self>) -> PageRows {
        PageRows::Messages(rows)
    }
    fn from_page(page: PageRows) -> Option<Vec<Self>> {
        match page {
            PageRows::Messages(r) => Some(r),
            _ => None,
        }
    }
    fn filterable() -> bool {
        true
    }
}

impl TableRow for DirMessage {
    fn headers() -> &'static [&'static str] {
        &["", "ID", "Action", "From", "To", "Ingested"]
    }
    fn widths() -> &'static [u16] {
        &[3, 19, 16, 19, 19, 10]
    }
    fn cells(&self, now: DateTime<Utc>) -> Vec<String> {
        let m = &self.message;
        vec![
            match self.dir {
                Direction::In => "in".into(),
                Direction::Out => "out".into(),
            },
            truncate_id(&m.id),
            m.action.clone().unwrap_or_else(|| "-".into()),
            truncate_id(&m.from),
            truncate_id(&m.to),
            ts(m.ingested_at, now),
        ]
    }
    fn into_page(rows: Vec<Self>) -> PageRows {
        PageRows::Combined(rows)
    }
    fn from_page(page: PageRows) -> Option<Vec<Self>> {
        match page {
            PageRows::Combined(r) => Some(r),
            _ => None,
        }
    }
    fn filterable() -> bool {
        true
    }
}

impl TableRow for TokenTransfer {
    fn headers() -> &'static [&'static str] {
        &["ID", "Action", "From", "To", "Amount", "Ingested"]
    }
    fn widths() -> &'static [u16] {
        &[19, 14, 19, 19, 16, 10]
    }
    fn cells(&self, now: DateTime<Utc>) -> Vec<String> {
        vec![
            truncate_id(&self.id),
            self.action.clone().unwrap_or_else(|| "-".into()),
            truncate_id(&self.sender),
            truncate_id(&self.recipient),
            format_amount(self.amount),
            ts(self.ingested_at, now),
        ]
    }
    fn into_page(rows: Vec<Self>) -> PageRows {
        PageRows::Transfers(rows)
    }
    fn from_page(page: PageRows) -> Option<Vec<Self>> {
        match page {
            PageRows::Transfers(r) => Some(r),
            _ => None,
        }
    }
}

impl TableRow for ArweaveBlock {
    fn headers() -> &'static [&'static str] {
        &["Height", "ID", "Previous", "Time"]
    }
    fn widths() -> &'static [u16] {
        &[10, 19, 19, 10]
    }
    fn cells(&self, now: DateTime<Utc>) -> Vec<String> {
        vec![
            self.height.to_string(),
            truncate_id(&self.id),
            self.previous.as_deref().map(truncate_id).unwrap_or_else(|| "-".into()),
            ts(self.timestamp, now),
        ]
    }
    fn into_page(rows: Vec<Self>) -> PageRows {
        PageRows::Blocks(rows)
    }
    fn from_page(page: PageRows) -> Option<Vec<Self>> {
        match page {
            PageRows::Blocks(r) => Some(r),
            _ => None,
        }
    }
    fn sort_fields() -> &'static [&'static str] {
        &["height"]
    }
}

impl TableRow for ArnsRecord {
    fn headers() -> &'static [&'static str] {
        &["Name", "Process", "Type", "Undernames", "Registered"]
    }
    fn widths() -> &'static [u16] {
        &[28, 19, 9, 10, 12]
    }
    fn cells(&self, now: DateTime<Utc>) -> Vec<String> {
        let started = DateTime::<Utc>::from_timestamp_millis(self.start_timestamp);
        vec![
            self.name.clone(),
            truncate_id(&self.process_id),
            format!("{:?}", self.r#type).to_lowercase(),
            self.undername_limit.to_string(),
            ts(started, now),
        ]
    }
    fn into_page(rows: Vec<Self>) -> PageRows {
        PageRows::Arns(rows)
    }
    fn from_page(page: PageRows) -> Option<Vec<Self>> {
        match page {
            PageRows::Arns(r) => Some(r),
            _ => None,
        }
    }
    fn sort_fields() -> &'static [&'static str] {
        &crate::arns::RECORD_SORT_FIELDS
    }
}

/// Everything the renderer needs for one frame of a table.
pub struct TableModel {
    pub title: String,
    pub headers: &'static [&'static str],
    pub widths: &'static [u16],
    /// Materialised rows, starting at `first_index`.
    pub rows: Vec<Vec<String>>,
    pub first_index: usize,
    pub selected: usize,
    pub loaded: usize,
    pub total: Option<u64>,
    pub status: Status,
    pub error: Option<String>,
    pub strategy: RenderStrategy,
    pub sort: SortState,
    pub filters: Filters,
}

/// Object-safe face of a [`TableView`], so tabs with different row types sit
/// in one list.
pub trait Tab {
    fn title(&self) -> &str;
    fn started(&self) -> bool;
    fn start(&mut self, tx: &UnboundedSender<AppEvent>, index: usize);
    fn apply(&mut self, generation: u64, outcome: Result<PageRows>) -> Option<String>;
    fn handle_key(&mut self, code: KeyCode, tx: &UnboundedSender<AppEvent>, index: usize);
    /// Called every frame; requests the next page when the viewport nears the end.
    fn tick(&mut self, viewport_rows: usize, tx: &UnboundedSender<AppEvent>, index: usize);
    fn model(&self, viewport_rows: usize, now: DateTime<Utc>) -> TableModel;
}

pub struct TableView<F: PageFetcher> {
    title: String,
    loader: PaginatedLoader<F>,
    total: Box<dyn Fn(&F) -> Option<u64> + Send>,
    selected: usize,
    scroll: usize,
    viewport: usize,
    virtualize: bool,
    virtualize_factor: usize,
    type_filter: usize,
    action_filter: usize,
}

impl<F> TableView<F>
where
    F: PageFetcher + 'static,
    F::Row: TableRow,
{
    pub fn new(title: impl Into<String>, fetcher: F, config: LoaderConfig, virtualize_factor: usize) -> Self {
        Self {
            title: title.into(),
            loader: PaginatedLoader::new(fetcher, config),
            total: Box::new(|_| None),
            selected: 0,
            scroll: 0,
            viewport: 20,
            virtualize: true,
            virtualize_factor,
            type_filter: 0,
            action_filter: 0,
        }
    }

    /// How to read the backend's total count off the fetcher, if it has one.
    pub fn with_total(mut self, total: impl Fn(&F) -> Option<u64> + Send + 'static) -> Self {
        self.total = Box::new(total);
        self
    }

    pub fn loader(&self) -> &PaginatedLoader<F> {
        &self.loader
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    fn spawn(&self, ticket: FetchTicket<F::Row>, tx: &UnboundedSender<AppEvent>, tab: usize) {
        let fetcher = self.loader.fetcher();
        let timeout = self.loader.timeout();
        let tx = tx.clone();
        tokio::spawn(async move {
            let outcome = execute(fetcher.as_ref(), &ticket, timeout)
                .await
                .map(F::Row::into_page);
            let _ = tx.send(AppEvent::PageLoaded {
                tab,
                generation: ticket.generation,
                outcome,
            });
        });
    }

    fn reset_cursor(&mut self) {
        self.selected = 0;
        self.scroll = 0;
    }

    fn load_more(&mut self, tx: &UnboundedSender<AppEvent>, tab: usize) {
        if let Some(ticket) = self.loader.begin_more() {
            self.spawn(ticket, tx, tab);
        }
    }

    fn near_end(&self) -> bool {
        let len = self.loader.rows().len();
        len < self.viewport || self.selected + NEAR_END >= len
    }

    fn move_selection(&mut self, delta: isize) {
        let len = self.loader.rows().len();
        if len == 0 {
            return;
        }
        let next = (self.selected as isize + delta).clamp(0, len as isize - 1);
        self.selected = next as usize;
    }

    fn filters(&self) -> Filters {
        let mut f = Filters::new();
        if let Some(t) = self.type_filter.checked_sub(1).map(|i| MessageType::FILTERABLE[i]) {
            f.insert("Type".into(), t.as_str().into());
        }
        if let Some(a) = ACTION_FILTERS[self.action_filter] {
            f.insert("Action".into(), a.into());
        }
        f
    }

    fn refilter(&mut self, tx: &UnboundedSender<AppEvent>, tab: usize) {
        let ticket = self.loader.begin_filters(self.filters());
        self.reset_cursor();
        self.spawn(ticket, tx, tab);
    }
}

impl<F> Tab for TableView<F>
where
    F: PageFetcher + 'static,
    F::Row: TableRow,
{
    fn title(&self) -> &str {
        &self.title
    }

    fn started(&self) -> bool {
        self.loader.status() != Status::Idle
    }

    fn start(&mut self, tx: &UnboundedSender<AppEvent>, index: usize) {
        let ticket = self.loader.begin_start();
        self.reset_cursor();
        self.spawn(ticket, tx, index);
    }

    fn apply(&mut self, generation: u64, outcome: Result<PageRows>) -> Option<String> {
        let rows = outcome.and_then(|page| {
            F::Row::from_page(page)
                .ok_or_else(|| Error::Other(anyhow::anyhow!("page delivered to the wrong table")))
        });
        match self.loader.complete(generation, rows) {
            Ok(Applied::Appended { added, end_reached }) => {
                log::debug!("[{}] +{added} rows, end={end_reached}", self.title);
                None
            }
            Ok(_) => None,
            Err(e) => Some(format!("{}: {e}", self.title)),
        }
    }

    fn handle_key(&mut self, code: KeyCode, tx: &UnboundedSender<AppEvent>, index: usize) {
        let page = self.viewport.max(1) as isize;
        match code {
            KeyCode::Down | KeyCode::Char('j') => {
                self.move_selection(1);
                // an explicit scroll also retries after a failure
                if self.near_end() {
                    self.load_more(tx, index);
                }
            }
            KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1),
            KeyCode::PageDown => {
                self.move_selection(page);
                if self.near_end() {
                    self.load_more(tx, index);
                }
            }
            KeyCode::PageUp => self.move_selection(-page),
            KeyCode::Home | KeyCode::Char('g') => self.selected = 0,
            KeyCode::End | KeyCode::Char('G') => {
                self.move_selection(isize::MAX / 2);
                self.load_more(tx, index);
            }
            KeyCode::Char('s') => {
                let field = self.loader.state().sort().field.clone();
                let ticket = self.loader.begin_sort(self.loader.state().sort().toggled(&field));
                self.reset_cursor();
                self.spawn(ticket, tx, index);
            }
            KeyCode::Char('o') => {
                let fields = F::Row::sort_fields();
                if fields.len() > 1 {
                    let current = &self.loader.state().sort().field;
                    let pos = fields.iter().position(|f| f == current).unwrap_or(0);
                    let next = fields[(pos + 1) % fields.len()];
                    let ticket = self.loader.begin_sort(self.loader.state().sort().toggled(next));
                    self.reset_cursor();
                    self.spawn(ticket, tx, index);
                }
            }
            KeyCode::Char('t') if F::Row::filterable() => {
                self.type_filter = (self.type_filter + 1) % (MessageType::FILTERABLE.len() + 1);
                self.refilter(tx, index);
            }
            KeyCode::Char('a') if F::Row::filterable() => {
                self.action_filter = (self.action_filter + 1) % ACTION_FILTERS.len();
                self.refilter(tx, index);
            }
            KeyCode::Char('r') => {
                if self.loader.rows().is_empty() {
                    self.start(tx, index);
                } else {
                    self.load_more(tx, index);
                }
            }
            _ => {}
        }
    }

    fn tick(&mut self, viewport_rows: usize, tx: &UnboundedSender<AppEvent>, index: usize) {
        self.viewport = viewport_rows.max(1);
        // keep the selection on screen
        if self.selected < self.scroll {
            self.scroll = self.selected;
        } else if self.selected >= self.scroll + self.viewport {
            self.scroll = self.selected + 1 - self.viewport;
        }
        // failures wait for an explicit scroll or retry
        if self.loader.status() == Status::Ready && self.near_end() {
            self.load_more(tx, index);
        }
    }

    fn model(&self, viewport_rows: usize, now: DateTime<Utc>) -> TableModel {
        let state = self.loader.state();
        let all = state.rows();
        let strategy = state.render_strategy(self.virtualize, self.virtualize_factor);
        let (first_index, slice) = match strategy {
            RenderStrategy::Direct => (0, all),
            RenderStrategy::Virtualized => {
                let start = self.scroll.min(all.len());
                let end = (start + viewport_rows).min(all.len());
                (start, &all[start..end])
            }
        };
        TableModel {
            title: self.title.clone(),
            headers: F::Row::headers(),
            widths: F::Row::widths(),
            rows: slice.iter().map(|r| r.cells(now)).collect(),
            first_index,
            selected: self.selected,
            loaded: all.len(),
            total: (self.total)(self.loader.fetcher().as_ref()),
            status: state.status(),
            error: state.last_error().map(str::to_string),
            strategy,
            sort: state.sort().clone(),
            filters: state.filters().clone(),
        }
    }
}

pub struct App {
    quit: bool,
    tabs: Vec<Box<dyn Tab>>,
    active: usize,
    fps: u32,
    tx: UnboundedSender<AppEvent>,
    annotation: Option<String>,
    // rolling status log shown in the footer
    status_log: VecDeque<String>,
}

impl App {
    pub fn new(tabs: Vec<Box<dyn Tab>>, fps: u32, tx: UnboundedSender<AppEvent>) -> Self {
        Self {
            quit: false,
            tabs,
            active: 0,
            fps,
            tx,
            annotation: None,
            status_log: VecDeque::new(),
        }
    }

    // ----- getters -----
    pub fn quit(&self) -> bool {
        self.quit
    }
    pub fn fps(&self) -> u32 {
        self.fps
    }
    pub fn active(&self) -> usize {
        self.active
    }
    pub fn tab_titles(&self) -> Vec<&str> {
        self.tabs.iter().map(|t| t.title()).collect()
    }
    pub fn annotation(&self) -> Option<&str> {
        self.annotation.as_deref()
    }
    pub fn last_status(&self) -> Option<&str> {
        self.status_log.back().map(String::as_str)
    }

    pub fn log_status(&mut self, msg: impl Into<String>) {
        if self.status_log.len() == STATUS_LOG_LEN {
            self.status_log.pop_front();
        }
        self.status_log.push_back(msg.into());
    }

    /// Kick off the first tab.
    pub fn start(&mut self) {
        let active = self.active;
        if let Some(tab) = self.tabs.get_mut(active) {
            tab.start(&self.tx, active);
        }
    }

    pub fn on_event(&mut self, ev: AppEvent) {
        match ev {
            AppEvent::PageLoaded { tab, generation, outcome } => {
                let failure = self
                    .tabs
                    .get_mut(tab)
                    .and_then(|t| t.apply(generation, outcome));
                if let Some(msg) = failure {
                    self.log_status(msg);
                }
            }
            AppEvent::Annotation(a) => self.annotation = Some(a),
            AppEvent::Status(s) => self.log_status(s),
            AppEvent::Quit => self.quit = true,
        }
    }

    pub fn handle_key(&mut self, k: KeyEvent) {
        match (k.code, k.modifiers) {
            (KeyCode::Char('q'), _) | (KeyCode::Char('c'), KeyModifiers::CONTROL) => self.quit = true,
            (KeyCode::Tab, _) => self.switch_tab(1),
            (KeyCode::BackTab, _) => self.switch_tab(self.tabs.len().saturating_sub(1)),
            (code, _) => {
                let active = self.active;
                if let Some(tab) = self.tabs.get_mut(active) {
                    tab.handle_key(code, &self.tx, active);
                }
            }
        }
    }

    fn switch_tab(&mut self, step: usize) {
        if self.tabs.is_empty() {
            return;
        }
        self.active = (self.active + step) % self.tabs.len();
        let active = self.active;
        let tab = &mut self.tabs[active];
        if !tab.started() {
            tab.start(&self.tx, active);
        }
    }

    pub fn tick(&mut self, viewport_rows: usize) {
        let active = self.active;
        if let Some(tab) = self.tabs.get_mut(active) {
            tab.tick(viewport_rows, &self.tx, active);
        }
    }

    pub fn model(&self, viewport_rows: usize, now: DateTime<Utc>) -> Option<TableModel> {
        self.tabs.get(self.active).map(|t| t.model(viewport_rows, now))
    }
}
