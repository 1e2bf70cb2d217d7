//! End-to-end scenarios for the loader and the request plumbing around it.

use aoscan::cache::TtlCache;
use aoscan::loader::{execute, LoaderConfig, PageFetcher, PaginatedLoader};
use aoscan::net::retry_with_backoff;
use aoscan::pagination::{Applied, Filters, PageRequest, Row, SortState, Status};
use aoscan::throttle::RequestThrottler;
use aoscan::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Debug, PartialEq)]
struct Msg {
    id: String,
    cursor: String,
}

impl Row for Msg {
    fn id(&self) -> &str {
        &self.id
    }
    fn cursor(&self) -> Option<&str> {
        Some(&self.cursor)
    }
}

fn msg(id: &str) -> Msg {
    Msg {
        id: id.into(),
        cursor: format!("after-{id}"),
    }
}

/// Replays canned pages in order and records every request it saw.
struct Scripted {
    pages: Mutex<Vec<Vec<Msg>>>,
    seen: Mutex<Vec<(usize, Option<String>, Filters)>>,
}

impl Scripted {
    fn new(pages: Vec<Vec<&str>>) -> Self {
        let pages = pages
            .into_iter()
            .rev()
            .map(|p| p.into_iter().map(msg).collect())
            .collect();
        Self {
            pages: Mutex::new(pages),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PageFetcher for Scripted {
    type Row = Msg;

    async fn fetch(&self, req: &PageRequest<Msg>) -> Result<Vec<Msg>> {
        self.seen.lock().unwrap().push((
            req.offset,
            req.cursor().map(str::to_string),
            req.extra_filters.clone(),
        ));
        Ok(self.pages.lock().unwrap().pop().unwrap_or_default())
    }
}

#[tokio::test]
async fn merged_sources_drop_repeated_rows() {
    let fetcher = Scripted::new(vec![vec!["A", "B"], vec!["B", "C"], vec![]]);
    let cfg = LoaderConfig::new(2, "ingestedAt", false).with_dedupe(true);
    let mut loader = PaginatedLoader::new(fetcher, cfg);

    loader.start().await.unwrap();
    assert_eq!(
        loader.request_more().await.unwrap(),
        Some(Applied::Appended { added: 1, end_reached: false })
    );
    let ids: Vec<_> = loader.rows().iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["A", "B", "C"]);

    loader.request_more().await.unwrap();
    assert_eq!(loader.status(), Status::Exhausted);

    let seen = loader.fetcher().seen.lock().unwrap().clone();
    assert_eq!(seen[1].0, 2);
    assert_eq!(seen[1].1.as_deref(), Some("after-B"));
    assert_eq!(seen[2].0, 3);
    assert_eq!(seen[2].1.as_deref(), Some("after-C"));
}

#[tokio::test]
async fn filter_change_resets_and_drops_earlier_response() {
    let fetcher = Scripted::new(vec![vec!["A", "B"], vec!["X"], vec!["Y"]]);
    let mut loader = PaginatedLoader::new(fetcher, LoaderConfig::new(2, "ingestedAt", false));
    loader.start().await.unwrap();

    let pending = loader.begin_more().unwrap();
    let mut filters = Filters::new();
    filters.insert("Action".into(), "Transfer".into());
    let current = loader.begin_filters(filters.clone());
    assert!(loader.rows().is_empty());
    assert!(current.request.cursor().is_none());

    let fetcher = loader.fetcher();
    let stale = execute(fetcher.as_ref(), &pending, None).await;
    let fresh = execute(fetcher.as_ref(), &current, None).await;

    assert_eq!(loader.complete(pending.generation, stale).unwrap(), Applied::Stale);
    assert!(loader.loading());
    loader.complete(current.generation, fresh).unwrap();

    assert_eq!(loader.rows(), &[msg("Y")]);
    assert!(loader.end_reached());
    assert_eq!(loader.state().filters(), &filters);
}

#[tokio::test]
async fn sort_change_starts_over_from_first_page() {
    let fetcher = Scripted::new(vec![vec!["A", "B"], vec!["Z", "Y"]]);
    let mut loader = PaginatedLoader::new(fetcher, LoaderConfig::new(2, "ingestedAt", false));
    loader.start().await.unwrap();

    let sort = loader.state().sort().toggled("ingestedAt");
    assert_eq!(sort, SortState::new("ingestedAt", true));
    loader.set_sort(sort).await.unwrap();

    assert_eq!(loader.rows()[0].id, "Z");
    let seen = loader.fetcher().seen.lock().unwrap().clone();
    assert_eq!(seen[1].0, 0);
    assert!(seen[1].1.is_none());
}

#[tokio::test(start_paused = true)]
async fn throttled_calls_are_spaced_and_ordered() {
    let throttler = Arc::new(RequestThrottler::new("scenario", Duration::from_millis(1000)));
    let starts = Arc::new(Mutex::new(Vec::new()));
    let t0 = Instant::now();

    let mut handles = Vec::new();
    for n in 0..3u32 {
        let throttler = throttler.clone();
        let starts = starts.clone();
        handles.push(tokio::spawn(async move {
            throttler
                .throttle(|| async move {
                    starts.lock().unwrap().push((n, t0.elapsed()));
                    Ok::<_, Error>(n)
                })
                .await
        }));
        tokio::task::yield_now().await;
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    let starts = starts.lock().unwrap().clone();
    assert_eq!(starts.iter().map(|(n, _)| *n).collect::<Vec<_>>(), [0, 1, 2]);
    assert_eq!(starts[0].1, Duration::ZERO);
    assert!(starts[1].1 >= Duration::from_millis(1000));
    assert!(starts[2].1 >= Duration::from_millis(2000));
}

#[tokio::test(start_paused = true)]
async fn rate_limits_back_off_then_give_up() {
    let calls = AtomicU32::new(0);
    let t0 = Instant::now();
    let res: Result<()> = retry_with_backoff(
        || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::rate_limited("cu")) }
        },
        3,
        Duration::from_millis(1000),
    )
    .await;

    assert!(res.unwrap_err().is_rate_limited());
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    // 1s + 2s + 4s
    assert!(t0.elapsed() >= Duration::from_secs(7));
}

#[tokio::test(start_paused = true)]
async fn cached_lookups_expire_after_ttl() {
    let cache: TtlCache<String, bool> = TtlCache::new("scenario", Duration::from_secs(300), 2);
    let counter = AtomicU32::new(0);
    let fetches = &counter;
    let lookup = move || async move {
        fetches.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    };

    assert!(cache.get_or_fetch("p1".into(), lookup, false).await);
    assert!(cache.get_or_fetch("p1".into(), lookup, false).await);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(301)).await;
    assert_eq!(cache.get(&"p1".to_string()), None);
    assert!(cache.get_or_fetch("p1".into(), lookup, false).await);
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
}
