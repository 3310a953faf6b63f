use super::{DownloadError, PageSource, Pacer, RecordSink, TerminationPolicy, TokenBucket};
use crate::harvest::policy::Admission;
use crate::pushshift::{NormalizedRecord, PageQuery, ResourceKind, normalize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Upstream page cap; a page shorter than this is the last one.
pub const DEFAULT_PAGE_SIZE: usize = 500;
pub const DEFAULT_PACING: Duration = Duration::from_millis(1200);

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub page_size: usize,
    /// Minimum spacing between page requests.
    pub pacing: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            pacing: DEFAULT_PACING,
        }
    }
}

/// When accumulated records reach the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// One write with the whole batch after the run terminates.
    #[default]
    OnTerminate,
    /// Write each page's accepted records as soon as the page is consumed.
    PerPage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub kind: ResourceKind,
    pub subreddit: String,
    pub policy: TerminationPolicy,
    pub flush: FlushMode,
    /// Resume below this timestamp instead of starting at the newest item.
    pub before: Option<i64>,
}

impl DownloadRequest {
    pub fn new(kind: ResourceKind, subreddit: impl Into<String>, policy: TerminationPolicy) -> Self {
        Self {
            kind,
            subreddit: subreddit.into(),
            policy,
            flush: FlushMode::default(),
            before: None,
        }
    }

    pub fn with_flush(mut self, flush: FlushMode) -> Self {
        self.flush = flush;
        self
    }

    pub fn starting_before(mut self, before: Option<i64>) -> Self {
        self.before = before;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The termination policy fired.
    PolicyMet,
    /// A short page signalled the end of the feed.
    Exhausted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::PolicyMet => f.write_str("Download complete."),
            StopReason::Exhausted => f.write_str("No more results."),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub subreddit: String,
    pub kind: ResourceKind,
    pub records: usize,
    pub pages: usize,
    /// Cursor the next page would have used.
    pub cursor: Option<i64>,
    pub reason: StopReason,
}

/// Operator-facing progress hooks. Defaults do nothing.
pub trait RunObserver: Send + Sync {
    fn page_fetched(&self, _request: &DownloadRequest, _items: usize) {}
    fn finished(&self, _summary: &RunSummary) {}
}

pub struct SilentObserver;

impl RunObserver for SilentObserver {}

/// Mutable state of one run; never shared between runs.
struct RunState {
    cursor: Option<i64>,
    pending: Vec<NormalizedRecord>,
    accepted: usize,
    pages: usize,
}

#[derive(Debug, Default)]
struct PageProgress {
    appended: usize,
    skipped: usize,
    stop: bool,
}

impl RunState {
    fn new(before: Option<i64>) -> Self {
        Self {
            cursor: before,
            pending: Vec::new(),
            accepted: 0,
            pages: 0,
        }
    }

    /// Consume one page in order, stopping at the first item the policy rejects.
    fn absorb(
        &mut self,
        page: &[Value],
        request: &DownloadRequest,
    ) -> Result<PageProgress, DownloadError> {
        let mut progress = PageProgress::default();
        let mut oldest: Option<i64> = None;

        for raw in page {
            let record = normalize(raw, request.kind)?;

            // Already scanned; only possible if the upstream treats `before` as inclusive.
            if self.cursor.is_some_and(|c| record.created_utc >= c) {
                progress.skipped += 1;
                continue;
            }

            let admission = request.policy.admit(record.created_utc, self.accepted);
            if admission == Admission::Reject {
                progress.stop = true;
                break;
            }

            oldest = Some(oldest.map_or(record.created_utc, |o| o.min(record.created_utc)));
            self.pending.push(record);
            self.accepted += 1;
            progress.appended += 1;

            if admission == Admission::AcceptLast {
                progress.stop = true;
                break;
            }
        }

        if oldest.is_some() {
            self.cursor = oldest;
        }
        Ok(progress)
    }
}

/// Drives one paginated download per call; holds no per-run state itself,
/// so a single instance can serve many runs, concurrently or not.
pub struct Downloader<S> {
    source: S,
    options: FetchOptions,
    cancel: CancellationToken,
    observer: Arc<dyn RunObserver>,
}

impl<S: PageSource> Downloader<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            options: FetchOptions::default(),
            cancel: CancellationToken::new(),
            observer: Arc::new(SilentObserver),
        }
    }

    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    /// Checked before every request and while waiting on the pacer.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Collect records in memory and return them in accumulation order.
    pub async fn download(
        &self,
        kind: ResourceKind,
        subreddit: &str,
        policy: TerminationPolicy,
    ) -> Result<Vec<NormalizedRecord>, DownloadError> {
        let mut records = Vec::new();
        self.run(&DownloadRequest::new(kind, subreddit, policy), &mut records)
            .await?;
        Ok(records)
    }

    /// Run with a fresh [`TokenBucket`] spaced by [`FetchOptions::pacing`].
    pub async fn run(
        &self,
        request: &DownloadRequest,
        sink: &mut dyn RecordSink,
    ) -> Result<RunSummary, DownloadError> {
        let mut pacer = TokenBucket::every(self.options.pacing);
        self.run_with_pacer(request, &mut pacer, sink).await
    }

    pub async fn run_with_pacer(
        &self,
        request: &DownloadRequest,
        pacer: &mut dyn Pacer,
        sink: &mut dyn RecordSink,
    ) -> Result<RunSummary, DownloadError> {
        let page_size = self.options.page_size.max(1);
        let mut state = RunState::new(request.before);

        let reason = if request.policy.is_satisfied(0) {
            StopReason::PolicyMet
        } else {
            loop {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(DownloadError::Cancelled),
                    _ = pacer.acquire() => {}
                }

                let query = PageQuery {
                    subreddit: request.subreddit.clone(),
                    before: state.cursor,
                    size: page_size,
                };
                let page = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(DownloadError::Cancelled),
                    page = self.source.fetch_page(request.kind, &query) => page?,
                };
                state.pages += 1;
                let fetched = page.len();
                self.observer.page_fetched(request, fetched);

                let progress = state.absorb(&page, request)?;
                tracing::info!(
                    subreddit = %request.subreddit,
                    kind = %request.kind,
                    page = state.pages,
                    fetched,
                    appended = progress.appended,
                    skipped = progress.skipped,
                    accepted = state.accepted,
                    before = ?query.before,
                    next_before = ?state.cursor,
                    "harvest.page"
                );

                if request.flush == FlushMode::PerPage && !state.pending.is_empty() {
                    sink.write_batch(&state.pending)?;
                    state.pending.clear();
                }

                if fetched < page_size {
                    break StopReason::Exhausted;
                }
                if progress.stop {
                    break StopReason::PolicyMet;
                }
                if progress.appended == 0 {
                    return Err(DownloadError::CursorStalled {
                        cursor: state.cursor,
                        items: fetched,
                    });
                }
            }
        };

        if !state.pending.is_empty() {
            sink.write_batch(&state.pending)?;
            state.pending.clear();
        }
        sink.finish()?;

        let summary = RunSummary {
            subreddit: request.subreddit.clone(),
            kind: request.kind,
            records: state.accepted,
            pages: state.pages,
            cursor: state.cursor,
            reason,
        };
        tracing::info!(
            subreddit = %summary.subreddit,
            kind = %summary.kind,
            records = summary.records,
            pages = summary.pages,
            reason = %summary.reason,
            "harvest.done"
        );
        self.observer.finished(&summary);
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rake_http::HttpError;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Serves scripted pages in order and records every query it saw.
    struct Scripted {
        pages: Mutex<VecDeque<Vec<Value>>>,
        seen: Mutex<Vec<PageQuery>>,
    }

    impl Scripted {
        fn new(pages: Vec<Vec<Value>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn queries(&self) -> Vec<PageQuery> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageSource for Scripted {
        async fn fetch_page(
            &self,
            _kind: ResourceKind,
            query: &PageQuery,
        ) -> Result<Vec<Value>, HttpError> {
            self.seen.lock().unwrap().push(query.clone());
            Ok(self.pages.lock().unwrap().pop_front().unwrap_or_default())
        }
    }

    fn comments(timestamps: impl IntoIterator<Item = i64>) -> Vec<Value> {
        timestamps
            .into_iter()
            .map(|ts| json!({"created_utc": ts, "author": "a", "body": format!("c{ts}")}))
            .collect()
    }

    fn downloader(source: Arc<Scripted>, page_size: usize) -> Downloader<Arc<Scripted>> {
        Downloader::new(source).with_options(FetchOptions {
            page_size,
            pacing: Duration::ZERO,
        })
    }

    #[tokio::test]
    async fn count_bound_stops_mid_page_and_keeps_the_limit_item() {
        let source = Arc::new(Scripted::new(vec![
            comments([100, 99, 98]),
            comments([97, 96, 95]),
        ]));
        let got = downloader(source.clone(), 3)
            .download(ResourceKind::Comment, "mexico", TerminationPolicy::CountBound(4))
            .await
            .unwrap();
        let stamps: Vec<i64> = got.iter().map(|r| r.created_utc).collect();
        assert_eq!(stamps, vec![100, 99, 98, 97]);

        let queries = source.queries();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].before, None);
        assert_eq!(queries[1].before, Some(98));
    }

    #[tokio::test]
    async fn short_page_ends_the_run() {
        let source = Arc::new(Scripted::new(vec![comments([10, 9, 8]), comments([7])]));
        let mut sink = Vec::new();
        let summary = downloader(source.clone(), 3)
            .run(
                &DownloadRequest::new(
                    ResourceKind::Comment,
                    "mexico",
                    TerminationPolicy::CountBound(100),
                ),
                &mut sink,
            )
            .await
            .unwrap();
        assert_eq!(summary.reason, StopReason::Exhausted);
        assert_eq!(summary.records, 4);
        assert_eq!(summary.pages, 2);
        assert_eq!(summary.cursor, Some(7));
        assert_eq!(source.queries().len(), 2);
    }

    #[tokio::test]
    async fn short_page_wins_over_policy() {
        let source = Arc::new(Scripted::new(vec![comments([10, 9])]));
        let summary = downloader(source, 3)
            .run(
                &DownloadRequest::new(
                    ResourceKind::Comment,
                    "mexico",
                    TerminationPolicy::CountBound(2),
                ),
                &mut Vec::<NormalizedRecord>::new(),
            )
            .await
            .unwrap();
        assert_eq!(summary.reason, StopReason::Exhausted);
        assert_eq!(summary.records, 2);
    }

    #[tokio::test]
    async fn date_bound_excludes_the_boundary_item() {
        let source = Arc::new(Scripted::new(vec![comments([50, 40, 30]), comments([20, 10, 0])]));
        let got = downloader(source.clone(), 3)
            .download(ResourceKind::Comment, "mexico", TerminationPolicy::DateBound(20))
            .await
            .unwrap();
        let stamps: Vec<i64> = got.iter().map(|r| r.created_utc).collect();
        assert_eq!(stamps, vec![50, 40, 30]);
        assert_eq!(source.queries().len(), 2);
        assert_eq!(source.queries()[1].before, Some(30));
    }

    #[tokio::test]
    async fn zero_count_issues_no_request() {
        let source = Arc::new(Scripted::new(vec![comments([1, 2, 3])]));
        let got = downloader(source.clone(), 3)
            .download(ResourceKind::Comment, "mexico", TerminationPolicy::CountBound(0))
            .await
            .unwrap();
        assert!(got.is_empty());
        assert!(source.queries().is_empty());
    }

    /// Notes how many requests had already gone out each time a permit is taken.
    struct CountingPacer {
        source: Arc<Scripted>,
        requests_before_permit: Vec<usize>,
    }

    #[async_trait]
    impl Pacer for CountingPacer {
        async fn acquire(&mut self) {
            self.requests_before_permit.push(self.source.queries().len());
        }
    }

    #[tokio::test]
    async fn every_request_waits_for_a_permit() {
        let source = Arc::new(Scripted::new(vec![
            comments([9, 8, 7]),
            comments([6, 5, 4]),
            comments([3]),
        ]));
        let mut pacer = CountingPacer {
            source: source.clone(),
            requests_before_permit: Vec::new(),
        };
        let request = DownloadRequest::new(
            ResourceKind::Comment,
            "mexico",
            TerminationPolicy::CountBound(100),
        );
        let summary = downloader(source.clone(), 3)
            .run_with_pacer(&request, &mut pacer, &mut Vec::<NormalizedRecord>::new())
            .await
            .unwrap();

        assert_eq!(summary.pages, 3);
        assert_eq!(pacer.requests_before_permit, vec![0, 1, 2]);
        assert_eq!(source.queries().len(), 3);
    }

    #[tokio::test]
    async fn zero_count_takes_no_permit() {
        let source = Arc::new(Scripted::new(vec![comments([1, 2, 3])]));
        let mut pacer = CountingPacer {
            source: source.clone(),
            requests_before_permit: Vec::new(),
        };
        let request = DownloadRequest::new(
            ResourceKind::Comment,
            "mexico",
            TerminationPolicy::CountBound(0),
        );
        downloader(source.clone(), 3)
            .run_with_pacer(&request, &mut pacer, &mut Vec::<NormalizedRecord>::new())
            .await
            .unwrap();
        assert!(pacer.requests_before_permit.is_empty());
    }

    #[tokio::test]
    async fn resumes_from_an_explicit_cursor() {
        let source = Arc::new(Scripted::new(vec![comments([8, 7])]));
        let request = DownloadRequest::new(
            ResourceKind::Comment,
            "mexico",
            TerminationPolicy::CountBound(10),
        )
        .starting_before(Some(9));
        downloader(source.clone(), 3)
            .run(&request, &mut Vec::<NormalizedRecord>::new())
            .await
            .unwrap();
        assert_eq!(source.queries()[0].before, Some(9));
    }

    #[tokio::test]
    async fn boundary_duplicates_are_skipped() {
        // Second page repeats the cursor item, as an inclusive upstream would.
        let source = Arc::new(Scripted::new(vec![comments([30, 20, 10]), comments([10, 5])]));
        let got = downloader(source, 3)
            .download(ResourceKind::Comment, "mexico", TerminationPolicy::CountBound(100))
            .await
            .unwrap();
        let stamps: Vec<i64> = got.iter().map(|r| r.created_utc).collect();
        assert_eq!(stamps, vec![30, 20, 10, 5]);
    }

    #[tokio::test]
    async fn a_page_that_never_advances_is_an_error() {
        let source = Arc::new(Scripted::new(vec![comments([30, 20, 10]), comments([10, 10, 10])]));
        let err = downloader(source, 3)
            .download(ResourceKind::Comment, "mexico", TerminationPolicy::CountBound(100))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DownloadError::CursorStalled {
                cursor: Some(10),
                items: 3
            }
        ));
    }

    #[tokio::test]
    async fn malformed_item_aborts_without_flushing() {
        let mut page = comments([30, 20]);
        page.push(json!({"created_utc": 10, "author": "a"}));
        let source = Arc::new(Scripted::new(vec![page]));
        let mut sink = Vec::new();
        let err = downloader(source, 3)
            .run(
                &DownloadRequest::new(
                    ResourceKind::Comment,
                    "mexico",
                    TerminationPolicy::CountBound(100),
                ),
                &mut sink,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Malformed(_)));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn per_page_flush_produces_the_same_records() {
        let pages = vec![comments([9, 8, 7]), comments([6, 5, 4]), comments([3])];
        let mut batched = Vec::new();
        let mut streamed = Vec::new();
        let request = DownloadRequest::new(
            ResourceKind::Comment,
            "mexico",
            TerminationPolicy::CountBound(5),
        );

        downloader(Arc::new(Scripted::new(pages.clone())), 3)
            .run(&request, &mut batched)
            .await
            .unwrap();
        downloader(Arc::new(Scripted::new(pages)), 3)
            .run(&request.clone().with_flush(FlushMode::PerPage), &mut streamed)
            .await
            .unwrap();
        assert_eq!(batched, streamed);
        assert_eq!(batched.len(), 5);
    }

    #[tokio::test]
    async fn cancellation_is_observed_before_requests() {
        let source = Arc::new(Scripted::new(vec![comments([3, 2, 1])]));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = downloader(source.clone(), 3)
            .with_cancellation(cancel)
            .download(ResourceKind::Comment, "mexico", TerminationPolicy::CountBound(10))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Cancelled));
        assert!(source.queries().is_empty());
    }

    #[tokio::test]
    async fn observer_sees_every_page_and_the_summary() {
        #[derive(Default)]
        struct Counting {
            pages: Mutex<Vec<usize>>,
            done: Mutex<Option<StopReason>>,
        }
        impl RunObserver for Counting {
            fn page_fetched(&self, _request: &DownloadRequest, items: usize) {
                self.pages.lock().unwrap().push(items);
            }
            fn finished(&self, summary: &RunSummary) {
                *self.done.lock().unwrap() = Some(summary.reason);
            }
        }

        let observer = Arc::new(Counting::default());
        let source = Arc::new(Scripted::new(vec![comments([9, 8, 7]), comments([6])]));
        downloader(source, 3)
            .with_observer(observer.clone())
            .download(ResourceKind::Comment, "mexico", TerminationPolicy::CountBound(50))
            .await
            .unwrap();
        assert_eq!(*observer.pages.lock().unwrap(), vec![3, 1]);
        assert_eq!(*observer.done.lock().unwrap(), Some(StopReason::Exhausted));
    }
}
