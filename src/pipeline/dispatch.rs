//! Dispatcher: bounded-concurrency page translation with per-page retry.
//!
//! ## Scheduling
//!
//! A single task drives a [`FuturesUnordered`] set over an index cursor.
//! Up to `concurrency` pages are seeded; every time one reaches a terminal
//! state the next unclaimed page is pushed, so the pool stays full until
//! the cursor is exhausted instead of running in fixed batches. The cursor
//! and the result lists are only touched between polls of that one task,
//! so no locking is involved.
//!
//! ```text
//! cursor ─▶ [p1][p2]          concurrency = 2
//!            p1 ✓ ─▶ [p3][p2]
//!            p3 ✓ ─▶ [p2]      p2 still retrying
//!            p2 ✓ ─▶ []        on_run_complete
//! ```
//!
//! ## Retry
//!
//! [`RetryPolicy`] is a bounded loop with a fixed delay between attempts.
//! The delay function is injectable so tests can run without real time.

use crate::config::{Language, TranslationConfig};
use crate::error::PageError;
use crate::output::{Page, PageFailure, PageResult, PipelineResult, TranslationEvent, TranslationUnit};
use crate::progress::TranslationProgressCallback;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Sleeps for the given duration.
pub type DelayFn = Arc<dyn Fn(Duration) -> BoxFuture<'static, ()> + Send + Sync>;

/// Fixed-backoff retry bound for one page.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before each retry.
    pub backoff: Duration,
    delay: DelayFn,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl RetryPolicy {
    /// Policy that waits with `tokio::time::sleep`.
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
            delay: Arc::new(|d: Duration| -> BoxFuture<'static, ()> {
                Box::pin(tokio::time::sleep(d))
            }),
        }
    }

    /// Replace the delay function.
    pub fn with_delay<D>(mut self, delay: D) -> Self
    where
        D: Fn(Duration) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.delay = Arc::new(delay);
        self
    }

    /// Run `attempt` until it succeeds or the bound is exhausted.
    ///
    /// `on_retry(n, err)` is called before retry `n` (1-indexed) with the
    /// error of the attempt that preceded it. On success, returns the value
    /// and the number of retries it took.
    pub async fn run<T, F, Fut, R>(
        &self,
        page_num: usize,
        mut attempt: F,
        mut on_retry: R,
    ) -> Result<(T, u32), PageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PageError>>,
        R: FnMut(u32, &PageError),
    {
        let mut last_err: Option<PageError> = None;

        for n in 0..=self.max_retries {
            if n > 0 {
                if let Some(err) = &last_err {
                    on_retry(n, err);
                }
                warn!(
                    "Page {}: retry {}/{} after {:?}",
                    page_num, n, self.max_retries, self.backoff
                );
                (self.delay)(self.backoff).await;
            }

            match attempt().await {
                Ok(value) => return Ok((value, n)),
                Err(e) => {
                    warn!("Page {}: attempt {} failed: {}", page_num, n + 1, e);
                    last_err = Some(e);
                }
            }
        }

        Err(PageError::RetriesExhausted {
            page: page_num,
            retries: self.max_retries,
            detail: last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }
}

/// Runs page translations under a concurrency cap.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    concurrency: usize,
    retry: RetryPolicy,
    source_language: Language,
    target_language: Language,
}

impl Dispatcher {
    pub fn new(
        concurrency: usize,
        retry: RetryPolicy,
        source_language: Language,
        target_language: Language,
    ) -> Self {
        Self {
            concurrency: concurrency.max(1),
            retry,
            source_language,
            target_language,
        }
    }

    pub fn from_config(config: &TranslationConfig) -> Self {
        Self::new(
            config.concurrency,
            RetryPolicy::new(config.max_retries, Duration::from_millis(config.retry_backoff_ms)),
            config.source_language,
            config.target_language,
        )
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Translate every page and return the complete result set.
    ///
    /// `translate_one` performs one attempt for one unit. Every page ends in
    /// exactly one of `result.pages` or `result.failures`;
    /// `on_run_complete` fires once, after the last page settles.
    pub async fn translate_all<F, Fut>(
        &self,
        pages: &[Page],
        translate_one: F,
        progress: &dyn TranslationProgressCallback,
    ) -> PipelineResult
    where
        F: Fn(TranslationUnit) -> Fut,
        Fut: Future<Output = Result<Vec<TranslationEvent>, PageError>>,
    {
        self.translate_all_with(pages, translate_one, progress, |_| {})
            .await
    }

    /// Like [`translate_all`](Self::translate_all), also handing each
    /// terminal page outcome to `on_settled` in completion order.
    pub async fn translate_all_with<F, Fut, S>(
        &self,
        pages: &[Page],
        translate_one: F,
        progress: &dyn TranslationProgressCallback,
        mut on_settled: S,
    ) -> PipelineResult
    where
        F: Fn(TranslationUnit) -> Fut,
        Fut: Future<Output = Result<Vec<TranslationEvent>, PageError>>,
        S: FnMut(&Result<PageResult, PageFailure>),
    {
        let total = pages.len();
        let mut result = PipelineResult {
            total_pages: total,
            ..Default::default()
        };

        info!(
            "Dispatching {} page(s), concurrency {}, {} retries",
            total, self.concurrency, self.retry.max_retries
        );

        let translate_one = &translate_one;
        let mut cursor = 0;
        let mut in_flight = FuturesUnordered::new();

        while cursor < total && in_flight.len() < self.concurrency {
            in_flight.push(self.run_page(&pages[cursor], total, translate_one, progress));
            cursor += 1;
        }

        while let Some(outcome) = in_flight.next().await {
            if cursor < total {
                in_flight.push(self.run_page(&pages[cursor], total, translate_one, progress));
                cursor += 1;
            }
            on_settled(&outcome);
            match outcome {
                Ok(page) => result.pages.push(page),
                Err(failure) => result.failures.push(failure),
            }
        }

        debug_assert!(result.is_complete());
        info!(
            "Dispatch finished: {}/{} page(s) translated",
            result.pages.len(),
            total
        );
        progress.on_run_complete(total, result.pages.len());
        result
    }

    async fn run_page<F, Fut>(
        &self,
        page: &Page,
        total: usize,
        translate_one: &F,
        progress: &dyn TranslationProgressCallback,
    ) -> Result<PageResult, PageFailure>
    where
        F: Fn(TranslationUnit) -> Fut,
        Fut: Future<Output = Result<Vec<TranslationEvent>, PageError>>,
    {
        let start = Instant::now();
        let page_num = page.page_num;
        progress.on_page_start(page_num, total);

        let unit = TranslationUnit::new(page, self.source_language, self.target_language);
        let outcome = self
            .retry
            .run(
                page_num,
                || {
                    let unit = unit.clone();
                    async move {
                        let events = translate_one(unit).await?;
                        if events.is_empty() {
                            Err(PageError::EmptyResponse { page: page_num })
                        } else {
                            Ok(events)
                        }
                    }
                },
                |attempt, err| progress.on_page_retry(page_num, attempt, &err.to_string()),
            )
            .await;

        match outcome {
            Ok((events, retries)) => {
                let result = PageResult {
                    page_num,
                    events,
                    retries,
                    duration_ms: start.elapsed().as_millis() as u64,
                };
                debug!(
                    "Page {}/{}: {} event(s) in {}ms",
                    page_num,
                    total,
                    result.events.len(),
                    result.duration_ms
                );
                progress.on_page_complete(page_num, total, &result.output());
                Ok(result)
            }
            Err(error) => {
                warn!("Page {}/{} failed: {}", page_num, total, error);
                progress.on_page_error(page_num, total, &error.to_string());
                Err(PageFailure { page_num, error })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::PageOutput;
    use crate::progress::NoopProgressCallback;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn pages(n: usize) -> Vec<Page> {
        (1..=n)
            .map(|i| Page {
                page_num: i,
                text: format!("page {i}"),
            })
            .collect()
    }

    fn dispatcher(concurrency: usize, max_retries: u32) -> Dispatcher {
        Dispatcher::new(
            concurrency,
            RetryPolicy::new(max_retries, Duration::from_millis(1000)),
            Language::Chinese,
            Language::English,
        )
    }

    #[derive(Default)]
    struct Recorder {
        log: Mutex<Vec<String>>,
        run_complete: AtomicUsize,
    }

    impl TranslationProgressCallback for Recorder {
        fn on_page_retry(&self, page_num: usize, attempt: u32, _error: &str) {
            self.log.lock().unwrap().push(format!("retry {page_num}#{attempt}"));
        }
        fn on_page_complete(&self, page_num: usize, _total: usize, output: &PageOutput) {
            let PageOutput::Text(t) = output else { panic!("expected text") };
            self.log.lock().unwrap().push(format!("done {page_num}:{t}"));
        }
        fn on_page_error(&self, page_num: usize, _total: usize, _error: &str) {
            self.log.lock().unwrap().push(format!("error {page_num}"));
        }
        fn on_run_complete(&self, _total: usize, _success: usize) {
            self.run_complete.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push("all".into());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retrying_page_completes_last() {
        let attempts: Mutex<HashMap<usize, u32>> = Mutex::default();
        let recorder = Recorder::default();

        let result = dispatcher(2, 2)
            .translate_all(
                &pages(3),
                |unit| {
                    let n = {
                        let mut map = attempts.lock().unwrap();
                        let n = map.entry(unit.page_num).or_insert(0);
                        *n += 1;
                        *n
                    };
                    async move {
                        if unit.page_num == 2 && n <= 2 {
                            Err(PageError::TransportFailed {
                                page: 2,
                                detail: "HTTP 502".into(),
                            })
                        } else {
                            Ok(vec![TranslationEvent::text(format!("T{}", unit.page_num))])
                        }
                    }
                },
                &recorder,
            )
            .await;

        let log = recorder.log.lock().unwrap().clone();
        let pos = |entry: &str| log.iter().position(|l| l == entry).unwrap();
        assert!(pos("done 1:T1") < pos("done 2:T2"));
        assert!(pos("done 3:T3") < pos("done 2:T2"));
        assert!(pos("retry 2#1") < pos("retry 2#2"));
        assert!(pos("retry 2#2") < pos("done 2:T2"));
        assert_eq!(log.last().map(String::as_str), Some("all"));
        assert_eq!(recorder.run_complete.load(Ordering::SeqCst), 1);
        assert!(result.is_complete());
        assert!(result.failures.is_empty());
        let p2 = result.pages.iter().find(|p| p.page_num == 2).unwrap();
        assert_eq!(p2.retries, 2);
        assert_eq!(attempts.lock().unwrap()[&2], 3);
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_concurrency_cap() {
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let result = dispatcher(3, 0)
            .translate_all(
                &pages(10),
                |unit| {
                    let active = &active;
                    let peak = &peak;
                    async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10 * (unit.page_num as u64 % 4 + 1)))
                            .await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(vec![TranslationEvent::text("x")])
                    }
                },
                &NoopProgressCallback,
            )
            .await;

        assert_eq!(result.pages.len(), 10);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    /// Counts pages between start and settlement, backoff included.
    #[derive(Default)]
    struct Slots {
        open: AtomicUsize,
        peak: AtomicUsize,
        settled: Mutex<Vec<usize>>,
    }

    impl Slots {
        fn close(&self, page_num: usize) {
            self.open.fetch_sub(1, Ordering::SeqCst);
            self.settled.lock().unwrap().push(page_num);
        }
    }

    impl TranslationProgressCallback for Slots {
        fn on_page_start(&self, _page_num: usize, _total: usize) {
            let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }
        fn on_page_complete(&self, page_num: usize, _total: usize, _output: &PageOutput) {
            self.close(page_num);
        }
        fn on_page_error(&self, page_num: usize, _total: usize, _error: &str) {
            self.close(page_num);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cap_holds_while_a_page_backs_off() {
        let slots = Slots::default();
        let attempts: Mutex<HashMap<usize, u32>> = Mutex::default();
        let active = AtomicUsize::new(0);
        let peak_active = AtomicUsize::new(0);

        let result = dispatcher(2, 2)
            .translate_all(
                &pages(6),
                |unit| {
                    let n = {
                        let mut map = attempts.lock().unwrap();
                        let n = map.entry(unit.page_num).or_insert(0);
                        *n += 1;
                        *n
                    };
                    let active = &active;
                    let peak_active = &peak_active;
                    async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak_active.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        if unit.page_num == 1 && n <= 2 {
                            Err(PageError::TransportFailed {
                                page: 1,
                                detail: "HTTP 502".into(),
                            })
                        } else {
                            Ok(vec![TranslationEvent::text("x")])
                        }
                    }
                },
                &slots,
            )
            .await;

        assert!(result.is_complete());
        assert!(result.failures.is_empty());
        assert_eq!(attempts.lock().unwrap()[&1], 3);
        assert_eq!(slots.peak.load(Ordering::SeqCst), 2);
        assert!(peak_active.load(Ordering::SeqCst) <= 2);
        assert_eq!(slots.open.load(Ordering::SeqCst), 0);
        // Page 1 holds one slot through both backoffs; the rest share the other.
        assert_eq!(*slots.settled.lock().unwrap(), vec![2, 3, 4, 5, 6, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_page_does_not_block_siblings() {
        let recorder = Recorder::default();
        let calls = AtomicU32::new(0);

        let result = dispatcher(2, 2)
            .translate_all(
                &pages(3),
                |unit| {
                    if unit.page_num == 1 {
                        calls.fetch_add(1, Ordering::SeqCst);
                    }
                    async move {
                        if unit.page_num == 1 {
                            Err(PageError::TransportFailed {
                                page: 1,
                                detail: "refused".into(),
                            })
                        } else {
                            Ok(vec![TranslationEvent::text("ok")])
                        }
                    }
                },
                &recorder,
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3, "first attempt plus two retries");
        assert_eq!(result.pages.len(), 2);
        assert_eq!(result.failures.len(), 1);
        assert!(matches!(
            result.failures[0].error,
            PageError::RetriesExhausted { page: 1, retries: 2, .. }
        ));
        let log = recorder.log.lock().unwrap();
        assert_eq!(log.last().map(String::as_str), Some("all"));
        assert!(log.contains(&"error 1".to_string()));
    }

    #[tokio::test]
    async fn empty_response_is_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_secs(60)).with_delay(|_| Box::pin(async {}));
        let d = Dispatcher::new(1, policy, Language::Chinese, Language::English);

        let result = d
            .translate_all(
                &pages(1),
                |_| {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Ok(vec![])
                        } else {
                            Ok(vec![TranslationEvent::text("second time")])
                        }
                    }
                },
                &NoopProgressCallback,
            )
            .await;

        assert_eq!(result.pages[0].retries, 1);
        assert_eq!(result.pages[0].text(), "second time");
    }

    #[tokio::test]
    async fn retry_policy_uses_injected_delay() {
        let delays: Arc<Mutex<Vec<Duration>>> = Arc::default();
        let seen = delays.clone();
        let policy = RetryPolicy::new(2, Duration::from_millis(750)).with_delay(move |d| {
            seen.lock().unwrap().push(d);
            Box::pin(async {})
        });

        let out: Result<((), u32), PageError> = policy
            .run(
                9,
                || async { Err(PageError::EmptyResponse { page: 9 }) },
                |_, _| {},
            )
            .await;

        assert!(matches!(out, Err(PageError::RetriesExhausted { page: 9, retries: 2, .. })));
        assert_eq!(*delays.lock().unwrap(), vec![Duration::from_millis(750); 2]);
    }

    #[tokio::test]
    async fn settled_hook_sees_every_page() {
        let seen = Mutex::new(Vec::new());
        let result = dispatcher(2, 0)
            .translate_all_with(
                &pages(4),
                |unit| async move { Ok(vec![TranslationEvent::text(unit.source_text)]) },
                &NoopProgressCallback,
                |outcome| {
                    let n = match outcome {
                        Ok(p) => p.page_num,
                        Err(f) => f.page_num,
                    };
                    seen.lock().unwrap().push(n);
                },
            )
            .await;

        let mut seen = seen.into_inner().unwrap();
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3, 4]);
        assert!(result.is_complete());
    }

    #[tokio::test]
    async fn no_pages_completes_immediately() {
        let recorder = Recorder::default();
        let result = dispatcher(2, 2)
            .translate_all(&[], |_| async { Ok(vec![]) }, &recorder)
            .await;
        assert_eq!(result.total_pages, 0);
        assert_eq!(recorder.run_complete.load(Ordering::SeqCst), 1);
    }
}
