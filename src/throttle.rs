//! Request serialization for rate-limited backends.
//!
//! One `RequestThrottler` per endpoint. Callers queue on a fair (FIFO) async
//! mutex, so operations run strictly in submission order with exactly one in
//! flight, and each start waits until `delay` has passed since the previous
//! operation finished. The first operation on an idle throttler starts at once.

use crate::error::Result;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

pub struct RequestThrottler {
    label: String,
    delay: Duration,
    // finish time of the previous operation
    gate: Mutex<Option<Instant>>,
    waiting: AtomicUsize,
}

impl RequestThrottler {
    pub fn new(label: impl Into<String>, delay: Duration) -> Self {
        Self {
            label: label.into(),
            delay,
            gate: Mutex::new(None),
            waiting: AtomicUsize::new(0),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Operations queued but not yet started.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Relaxed)
    }

    /// Queue `op` and resolve with its own outcome once it has actually run.
    ///
    /// A failing operation only fails its own caller; the next queued
    /// operation still starts after the usual spacing.
    pub async fn throttle<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let depth = self.waiting.fetch_add(1, Ordering::Relaxed) + 1;
        // released on start, or when the caller is dropped while still queued
        let queued = Queued(&self.waiting);
        if depth > 1 {
            log::debug!("[{}] queued behind {} request(s)", self.label, depth - 1);
        }

        let mut last_done = self.gate.lock().await;
        if let Some(done) = *last_done {
            sleep_until(done + self.delay).await;
        }
        drop(queued);

        let res = op().await;
        *last_done = Some(Instant::now());
        if let Err(e) = &res {
            log::warn!("[{}] throttled request failed: {e}", self.label);
        }
        res
    }
}

struct Queued<'a>(&'a AtomicUsize);

impl Drop for Queued<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Mutex as StdMutex;

    type Log = StdMutex<Vec<(u32, Instant, Instant)>>;

    async fn timed(log: &Log, n: u32, work: Duration, fail: bool) -> Result<u32> {
        let start = Instant::now();
        tokio::time::sleep(work).await;
        log.lock().unwrap().push((n, start, Instant::now()));
        if fail {
            Err(Error::GraphQl(format!("op{n} failed")))
        } else {
            Ok(n)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runs_in_order_one_at_a_time_with_spacing() {
        let t = RequestThrottler::new("test", Duration::from_millis(200));
        let log = Log::default();
        let work = Duration::from_millis(50);

        let (a, b, c) = tokio::join!(
            t.throttle(|| timed(&log, 1, work, false)),
            t.throttle(|| timed(&log, 2, work, false)),
            t.throttle(|| timed(&log, 3, work, false)),
        );
        assert_eq!((a.unwrap(), b.unwrap(), c.unwrap()), (1, 2, 3));

        let log = log.into_inner().unwrap();
        let order: Vec<u32> = log.iter().map(|e| e.0).collect();
        assert_eq!(order, [1, 2, 3]);
        for pair in log.windows(2) {
            let (_, _, prev_end) = pair[0];
            let (_, next_start, _) = pair[1];
            assert!(next_start >= prev_end + Duration::from_millis(200));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_request_starts_immediately() {
        let t = RequestThrottler::new("test", Duration::from_secs(5));
        let before = Instant::now();
        let started = t.throttle(|| async { Ok(Instant::now()) }).await.unwrap();
        assert_eq!(started, before);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_does_not_stall_the_queue() {
        let t = RequestThrottler::new("test", Duration::from_millis(100));
        let log = Log::default();
        let work = Duration::from_millis(10);

        let (a, b, c) = tokio::join!(
            t.throttle(|| timed(&log, 1, work, false)),
            t.throttle(|| timed(&log, 2, work, true)),
            t.throttle(|| timed(&log, 3, work, false)),
        );
        assert!(a.is_ok());
        assert!(matches!(b, Err(Error::GraphQl(_))));
        assert_eq!(c.unwrap(), 3);
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_waiter_leaves_the_queue() {
        let t = std::sync::Arc::new(RequestThrottler::new("test", Duration::from_millis(100)));
        let busy = t.clone();
        let slow = tokio::spawn(async move {
            busy.throttle(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, Error>(())
            })
            .await
        });
        tokio::task::yield_now().await;

        // gives up while the slow op still holds the gate
        let gave_up = tokio::time::timeout(Duration::from_millis(1), t.throttle(|| async { Ok::<_, Error>(()) })).await;
        assert!(gave_up.is_err());
        assert_eq!(t.waiting(), 0);

        slow.await.unwrap().unwrap();
        assert_eq!(t.waiting(), 0);
    }
}
