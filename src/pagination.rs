//! Cursor-paginated list state.
//!
//! `LoaderState` is a plain state machine with no I/O: callers ask it for a
//! `FetchTicket`, run the fetch however they like (inline await, spawned task,
//! background channel) and hand the outcome back together with the ticket's
//! generation. Every reset (start, sort change, filter change) bumps the
//! generation, so a response that arrives for an older generation is dropped
//! without touching the accumulated rows or the loading flag.

use std::collections::{BTreeMap, HashSet};

/// Extra field constraints applied on top of the base query (e.g. `Type`, `Action`).
pub type Filters = BTreeMap<String, String>;

/// A single item in a paginated result set.
///
/// The loader only ever looks at `id` (identity, de-duplication) and `cursor`
/// (handed back to the backend to ask for the page after this row).
pub trait Row: Clone {
    fn id(&self) -> &str;
    fn cursor(&self) -> Option<&str>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortState {
    pub field: String,
    pub ascending: bool,
}

impl SortState {
    pub fn new(field: impl Into<String>, ascending: bool) -> Self {
        Self {
            field: field.into(),
            ascending,
        }
    }

    /// Header-click semantics: a new field keeps the direction, the same field flips it.
    pub fn toggled(&self, field: &str) -> Self {
        if self.field == field {
            Self::new(field, !self.ascending)
        } else {
            Self::new(field, self.ascending)
        }
    }
}

/// Everything a fetch function needs to produce one page.
#[derive(Clone, Debug)]
pub struct PageRequest<R> {
    /// Number of rows already accumulated.
    pub offset: usize,
    pub ascending: bool,
    pub sort_field: String,
    /// Final row of the previously accepted page; `None` for the first page.
    pub last_record: Option<R>,
    pub extra_filters: Filters,
    pub page_size: usize,
}

impl<R: Row> PageRequest<R> {
    pub fn cursor(&self) -> Option<&str> {
        self.last_record.as_ref().and_then(|r| r.cursor())
    }

    pub fn is_first_page(&self) -> bool {
        self.last_record.is_none()
    }
}

/// A request tagged with the generation it was issued under.
#[derive(Clone, Debug)]
pub struct FetchTicket<R> {
    pub generation: u64,
    pub request: PageRequest<R>,
}

/// What happened when an outcome was handed back to the state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Applied {
    Appended { added: usize, end_reached: bool },
    Failed,
    /// Outcome belonged to an older generation and was dropped.
    Stale,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    /// Nothing issued yet.
    Idle,
    /// First page in flight, no rows to show yet.
    LoadingInitial,
    LoadingMore,
    Ready,
    /// Last fetch failed; another request will retry it.
    Failed,
    Exhausted,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RenderStrategy {
    Direct,
    Virtualized,
}

#[derive(Clone, Debug)]
pub struct LoaderState<R> {
    page_size: usize,
    sort: SortState,
    filters: Filters,
    dedupe: bool,

    rows: Vec<R>,
    seen: HashSet<String>,
    end_reached: bool,
    loading: bool,
    first_loaded: bool,
    last_error: Option<String>,
    generation: u64,
}

impl<R: Row> LoaderState<R> {
    pub fn new(page_size: usize, sort: SortState, filters: Filters) -> Self {
        Self {
            page_size: page_size.max(1),
            sort,
            filters,
            dedupe: false,
            rows: Vec::new(),
            seen: HashSet::new(),
            end_reached: false,
            loading: false,
            first_loaded: false,
            last_error: None,
            generation: 0,
        }
    }

    /// Drop rows whose id was already accumulated (multi-source merges).
    pub fn with_dedupe(mut self, on: bool) -> Self {
        self.dedupe = on;
        self
    }

    // ----- getters -----
    pub fn rows(&self) -> &[R] {
        &self.rows
    }
    pub fn end_reached(&self) -> bool {
        self.end_reached
    }
    pub fn loading(&self) -> bool {
        self.loading
    }
    pub fn generation(&self) -> u64 {
        self.generation
    }
    pub fn page_size(&self) -> usize {
        self.page_size
    }
    pub fn sort(&self) -> &SortState {
        &self.sort
    }
    pub fn filters(&self) -> &Filters {
        &self.filters
    }
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn status(&self) -> Status {
        if self.loading {
            return if self.first_loaded {
                Status::LoadingMore
            } else {
                Status::LoadingInitial
            };
        }
        if self.last_error.is_some() {
            return Status::Failed;
        }
        if self.end_reached {
            return Status::Exhausted;
        }
        if self.generation == 0 {
            Status::Idle
        } else {
            Status::Ready
        }
    }

    /// Rows are rendered through a fixed-height window once the list is larger
    /// than `page_size * factor`.
    pub fn render_strategy(&self, virtualize: bool, factor: usize) -> RenderStrategy {
        if virtualize && self.rows.len() > self.page_size.saturating_mul(factor) {
            RenderStrategy::Virtualized
        } else {
            RenderStrategy::Direct
        }
    }

    // ----- transitions -----

    /// Reset everything and issue the first page under a fresh generation.
    pub fn start(&mut self) -> FetchTicket<R> {
        self.generation += 1;
        self.rows.clear();
        self.seen.clear();
        self.end_reached = false;
        self.first_loaded = false;
        self.last_error = None;
        self.loading = true;
        self.ticket(0, None)
    }

    /// Next page, or `None` while a fetch is pending or once the end is reached.
    pub fn on_fetch_start(&mut self) -> Option<FetchTicket<R>> {
        if self.loading || self.end_reached {
            return None;
        }
        if self.generation == 0 {
            return Some(self.start());
        }
        self.loading = true;
        let last = self.rows.last().cloned();
        Some(self.ticket(self.rows.len(), last))
    }

    pub fn on_fetch_success(&mut self, generation: u64, page: Vec<R>) -> Applied {
        if generation != self.generation {
            return Applied::Stale;
        }
        self.loading = false;
        self.first_loaded = true;
        self.last_error = None;

        let raw_len = page.len();
        let fresh: Vec<R> = if self.dedupe {
            page.into_iter()
                .filter(|r| self.seen.insert(r.id().to_string()))
                .collect()
        } else {
            page
        };

        // A page that adds nothing new cannot move the cursor forward, so asking
        // again would return the same rows forever.
        let end = raw_len == 0 || fresh.is_empty() || raw_len < self.page_size;
        let added = fresh.len();
        self.rows.extend(fresh);
        if end {
            self.end_reached = true;
        }
        Applied::Appended {
            added,
            end_reached: self.end_reached,
        }
    }

    pub fn on_fetch_error(&mut self, generation: u64, message: impl Into<String>) -> Applied {
        if generation != self.generation {
            return Applied::Stale;
        }
        self.loading = false;
        self.last_error = Some(message.into());
        Applied::Failed
    }

    pub fn on_sort_change(&mut self, sort: SortState) -> FetchTicket<R> {
        self.sort = sort;
        self.start()
    }

    pub fn on_filter_change(&mut self, filters: Filters) -> FetchTicket<R> {
        self.filters = filters;
        self.start()
    }

    fn ticket(&self, offset: usize, last_record: Option<R>) -> FetchTicket<R> {
        FetchTicket {
            generation: self.generation,
            request: PageRequest {
                offset,
                ascending: self.sort.ascending,
                sort_field: self.sort.field.clone(),
                last_record,
                extra_filters: self.filters.clone(),
                page_size: self.page_size,
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub(crate) struct Item {
        pub id: String,
        pub cursor: String,
    }

    impl Row for Item {
        fn id(&self) -> &str {
            &self.id
        }
        fn cursor(&self) -> Option<&str> {
            Some(&self.cursor)
        }
    }

    pub(crate) fn item(n: usize) -> Item {
        Item {
            id: format!("id-{n}"),
            cursor: format!("c-{n}"),
        }
    }

    fn items(range: std::ops::Range<usize>) -> Vec<Item> {
        range.map(item).collect()
    }

    fn state(page_size: usize) -> LoaderState<Item> {
        LoaderState::new(page_size, SortState::new("ingestedAt", false), Filters::new())
    }

    #[test]
    fn start_reports_initial_loading() {
        let mut s = state(3);
        assert_eq!(s.status(), Status::Idle);
        let t = s.start();
        assert_eq!(t.request.offset, 0);
        assert!(t.request.last_record.is_none());
        assert_eq!(s.status(), Status::LoadingInitial);
        assert!(s.rows().is_empty());
    }

    #[test]
    fn full_pages_keep_going() {
        let mut s = state(3);
        let t = s.start();
        s.on_fetch_success(t.generation, items(0..3));
        assert!(!s.end_reached());

        let t = s.on_fetch_start().unwrap();
        assert_eq!(t.request.offset, 3);
        assert_eq!(t.request.cursor(), Some("c-2"));
        s.on_fetch_success(t.generation, items(3..6));
        assert_eq!(s.rows().len(), 6);
        assert_eq!(s.status(), Status::Ready);
    }

    #[test]
    fn short_page_ends_but_is_appended() {
        let mut s = state(3);
        let t = s.start();
        let applied = s.on_fetch_success(t.generation, items(0..2));
        assert_eq!(applied, Applied::Appended { added: 2, end_reached: true });
        assert_eq!(s.rows().len(), 2);
        assert!(s.on_fetch_start().is_none());
        assert_eq!(s.status(), Status::Exhausted);
    }

    #[test]
    fn empty_first_page_is_loaded_empty() {
        let mut s = state(3);
        let t = s.start();
        s.on_fetch_success(t.generation, vec![]);
        assert!(s.end_reached());
        assert_eq!(s.status(), Status::Exhausted);
    }

    #[test]
    fn request_more_is_noop_while_loading() {
        let mut s = state(3);
        let _t = s.start();
        assert!(s.on_fetch_start().is_none());
    }

    #[test]
    fn request_more_before_start_starts() {
        let mut s = state(3);
        let t = s.on_fetch_start().unwrap();
        assert_eq!(t.generation, 1);
        assert_eq!(t.request.offset, 0);
    }

    #[test]
    fn error_clears_loading_and_allows_retry() {
        let mut s = state(3);
        let t = s.start();
        s.on_fetch_success(t.generation, items(0..3));
        let t = s.on_fetch_start().unwrap();
        assert_eq!(s.on_fetch_error(t.generation, "boom"), Applied::Failed);
        assert!(!s.loading());
        assert!(!s.end_reached());
        assert_eq!(s.status(), Status::Failed);
        assert_eq!(s.rows().len(), 3);

        let retry = s.on_fetch_start().unwrap();
        assert_eq!(retry.request.offset, 3);
        assert_eq!(retry.request.cursor(), Some("c-2"));
    }

    #[test]
    fn sort_change_discards_stale_response() {
        let mut s = state(3);
        let t = s.start();
        s.on_fetch_success(t.generation, items(0..3));
        let old = s.on_fetch_start().unwrap();

        let fresh = s.on_sort_change(SortState::new("height", true));
        assert!(s.rows().is_empty());
        assert!(!s.end_reached());
        assert_eq!(fresh.request.offset, 0);
        assert!(fresh.request.ascending);

        assert_eq!(s.on_fetch_success(old.generation, items(3..6)), Applied::Stale);
        assert!(s.rows().is_empty());
        assert!(s.loading(), "stale response must not clear the new fetch's flag");

        s.on_fetch_success(fresh.generation, items(10..13));
        assert_eq!(s.rows()[0].id, "id-10");
    }

    #[test]
    fn stale_error_is_ignored() {
        let mut s = state(3);
        let old = s.start();
        let mut filters = Filters::new();
        filters.insert("Type".into(), "Process".into());
        let fresh = s.on_filter_change(filters);
        assert_eq!(fresh.request.extra_filters.get("Type").map(String::as_str), Some("Process"));
        assert_eq!(s.on_fetch_error(old.generation, "late"), Applied::Stale);
        assert!(s.last_error().is_none());
        assert!(s.loading());
    }

    #[test]
    fn dedupe_merges_overlapping_pages() {
        let mut s = state(2).with_dedupe(true);
        let t = s.start();
        s.on_fetch_success(t.generation, vec![item(0), item(1)]);
        let t = s.on_fetch_start().unwrap();
        let applied = s.on_fetch_success(t.generation, vec![item(1), item(2)]);
        assert_eq!(applied, Applied::Appended { added: 1, end_reached: false });
        let ids: Vec<_> = s.rows().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["id-0", "id-1", "id-2"]);
    }

    #[test]
    fn dedupe_all_repeats_ends() {
        let mut s = state(2).with_dedupe(true);
        let t = s.start();
        s.on_fetch_success(t.generation, vec![item(0), item(1)]);
        let t = s.on_fetch_start().unwrap();
        s.on_fetch_success(t.generation, vec![item(0), item(1)]);
        assert!(s.end_reached());
        assert_eq!(s.rows().len(), 2);
    }

    #[test]
    fn sort_toggle_semantics() {
        let s = SortState::new("ingestedAt", false);
        assert_eq!(s.toggled("ingestedAt"), SortState::new("ingestedAt", true));
        assert_eq!(s.toggled("height"), SortState::new("height", false));
    }

    #[test]
    fn render_strategy_threshold() {
        let mut s = state(2);
        let t = s.start();
        s.on_fetch_success(t.generation, items(0..2));
        let t = s.on_fetch_start().unwrap();
        s.on_fetch_success(t.generation, items(2..4));
        assert_eq!(s.render_strategy(true, 2), RenderStrategy::Direct);
        let t = s.on_fetch_start().unwrap();
        s.on_fetch_success(t.generation, items(4..6));
        assert_eq!(s.render_strategy(true, 2), RenderStrategy::Virtualized);
        assert_eq!(s.render_strategy(false, 2), RenderStrategy::Direct);
    }
}
