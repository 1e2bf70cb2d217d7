//! Async driver around [`LoaderState`].
//!
//! `PaginatedLoader` owns a fetcher and a state. The convenience methods
//! (`start`, `request_more`, `set_sort`, `set_filters`) await the fetch inline.
//! UIs that must keep handling input while a page is in flight use the split
//! form instead: `begin_*` hands out a ticket, [`execute`] runs it anywhere
//! (usually a spawned task) and `complete` applies the outcome, discarding it
//! if the state has moved on since.

use crate::error::{Error, Result};
use crate::pagination::{
    Applied, FetchTicket, Filters, LoaderState, PageRequest, Row, SortState, Status,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// A backend query bound to one list view.
///
/// Implementations return at most one page's worth of rows per call, ordered
/// consistently with the request's sort.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    type Row: Row + Send + Sync + 'static;

    async fn fetch(&self, request: &PageRequest<Self::Row>) -> Result<Vec<Self::Row>>;
}

#[async_trait]
impl<F: PageFetcher + ?Sized> PageFetcher for Arc<F> {
    type Row = F::Row;

    async fn fetch(&self, request: &PageRequest<Self::Row>) -> Result<Vec<Self::Row>> {
        (**self).fetch(request).await
    }
}

#[derive(Clone, Debug)]
pub struct LoaderConfig {
    pub page_size: usize,
    pub sort: SortState,
    pub filters: Filters,
    pub dedupe: bool,
    /// Race each fetch against this deadline; `None` waits forever.
    pub timeout: Option<Duration>,
}

impl LoaderConfig {
    pub fn new(page_size: usize, sort_field: &str, ascending: bool) -> Self {
        Self {
            page_size,
            sort: SortState::new(sort_field, ascending),
            filters: Filters::new(),
            dedupe: false,
            timeout: None,
        }
    }

    pub fn with_filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_dedupe(mut self, on: bool) -> Self {
        self.dedupe = on;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Run one ticket against a fetcher, honouring the optional timeout.
pub async fn execute<F: PageFetcher + ?Sized>(
    fetcher: &F,
    ticket: &FetchTicket<F::Row>,
    timeout: Option<Duration>,
) -> Result<Vec<F::Row>> {
    log::debug!(
        "fetch gen={} offset={} sort={}:{} filters={:?}",
        ticket.generation,
        ticket.request.offset,
        ticket.request.sort_field,
        if ticket.request.ascending { "asc" } else { "desc" },
        ticket.request.extra_filters
    );
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, fetcher.fetch(&ticket.request)).await {
            Ok(res) => res,
            Err(_) => Err(Error::Timeout(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX))),
        },
        None => fetcher.fetch(&ticket.request).await,
    }
}

pub struct PaginatedLoader<F: PageFetcher> {
    fetcher: Arc<F>,
    state: LoaderState<F::Row>,
    timeout: Option<Duration>,
}

impl<F: PageFetcher> PaginatedLoader<F> {
    pub fn new(fetcher: F, config: LoaderConfig) -> Self {
        Self::from_arc(Arc::new(fetcher), config)
    }

    pub fn from_arc(fetcher: Arc<F>, config: LoaderConfig) -> Self {
        let state = LoaderState::new(config.page_size, config.sort, config.filters)
            .with_dedupe(config.dedupe);
        Self {
            fetcher,
            state,
            timeout: config.timeout,
        }
    }

    // ----- getters -----
    pub fn state(&self) -> &LoaderState<F::Row> {
        &self.state
    }
    pub fn rows(&self) -> &[F::Row] {
        self.state.rows()
    }
    pub fn end_reached(&self) -> bool {
        self.state.end_reached()
    }
    pub fn loading(&self) -> bool {
        self.state.loading()
    }
    pub fn status(&self) -> Status {
        self.state.status()
    }
    pub fn fetcher(&self) -> Arc<F> {
        Arc::clone(&self.fetcher)
    }
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    // ----- split form -----
    pub fn begin_start(&mut self) -> FetchTicket<F::Row> {
        self.state.start()
    }

    pub fn begin_more(&mut self) -> Option<FetchTicket<F::Row>> {
        self.state.on_fetch_start()
    }

    pub fn begin_sort(&mut self, sort: SortState) -> FetchTicket<F::Row> {
        self.state.on_sort_change(sort)
    }

    pub fn begin_filters(&mut self, filters: Filters) -> FetchTicket<F::Row> {
        self.state.on_filter_change(filters)
    }

    /// Apply a finished fetch. Errors from the current generation are recorded
    /// and returned; errors from a stale generation are swallowed.
    pub fn complete(&mut self, generation: u64, outcome: Result<Vec<F::Row>>) -> Result<Applied> {
        match outcome {
            Ok(page) => {
                let applied = self.state.on_fetch_success(generation, page);
                if applied == Applied::Stale {
                    log::debug!("dropping stale page (gen {generation}, now {})", self.state.generation());
                }
                Ok(applied)
            }
            Err(e) => match self.state.on_fetch_error(generation, e.to_string()) {
                Applied::Stale => Ok(Applied::Stale),
                _ => {
                    log::error!("page fetch failed: {e}");
                    Err(e)
                }
            },
        }
    }

    // ----- inline form -----
    pub async fn start(&mut self) -> Result<Applied> {
        let ticket = self.begin_start();
        self.run(ticket).await
    }

    /// `Ok(None)` when a fetch is already pending or the end was reached.
    pub async fn request_more(&mut self) -> Result<Option<Applied>> {
        match self.begin_more() {
            Some(ticket) => self.run(ticket).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn set_sort(&mut self, sort: SortState) -> Result<Applied> {
        let ticket = self.begin_sort(sort);
        self.run(ticket).await
    }

    pub async fn set_filters(&mut self, filters: Filters) -> Result<Applied> {
        let ticket = self.begin_filters(filters);
        self.run(ticket).await
    }

    async fn run(&mut self, ticket: FetchTicket<F::Row>) -> Result<Applied> {
        let outcome = execute(self.fetcher.as_ref(), &ticket, self.timeout).await;
        self.complete(ticket.generation, outcome)
    }
}
