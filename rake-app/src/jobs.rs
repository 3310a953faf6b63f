//! Turns validated configuration into download runs and drives them.
use anyhow::{Context, Result, anyhow, bail};
use futures::{StreamExt, stream};
use rake_config::{ApiSettings, FlushSpec, JobSpec, KindSpec, RakeConfig, StopSpec};
use rake_http::HttpClient;
use rake_social::harvest::{
    CsvSink, DownloadRequest, Downloader, FetchOptions, FlushMode, PageSource, RunObserver,
    RunSummary, TerminationPolicy,
};
use rake_social::pushshift::{PushshiftApi, ResourceKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One planned run and the file it writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub request: DownloadRequest,
    pub output: PathBuf,
}

pub fn resource_kind(kind: KindSpec) -> ResourceKind {
    match kind {
        KindSpec::Comments => ResourceKind::Comment,
        KindSpec::Submissions => ResourceKind::Submission,
    }
}

pub fn termination_policy(stop: Option<StopSpec>) -> Result<TerminationPolicy> {
    Ok(match stop {
        None => TerminationPolicy::default(),
        Some(StopSpec::MaxRecords(n)) => TerminationPolicy::CountBound(n),
        Some(StopSpec::UntilUnix(ts)) => TerminationPolicy::DateBound(ts),
        Some(StopSpec::Until(date)) => TerminationPolicy::until(date)
            .ok_or_else(|| anyhow!("{date} has no local midnight"))?,
    })
}

fn flush_mode(flush: FlushSpec) -> FlushMode {
    match flush {
        FlushSpec::Batch => FlushMode::OnTerminate,
        FlushSpec::Page => FlushMode::PerPage,
    }
}

pub fn job_from_spec(spec: &JobSpec, output_dir: &Path) -> Result<Job> {
    let policy = termination_policy(spec.stop)
        .with_context(|| format!("job r/{} {}", spec.subreddit, spec.label()))?;
    let request = DownloadRequest::new(resource_kind(spec.kind), spec.subreddit.trim(), policy)
        .with_flush(flush_mode(spec.flush))
        .starting_before(spec.before);
    Ok(Job {
        request,
        output: output_dir.join(spec.output_file_name()),
    })
}

/// Enabled jobs in configuration order.
pub fn plan(cfg: &RakeConfig) -> Result<Vec<Job>> {
    cfg.enabled_jobs()
        .map(|spec| job_from_spec(spec, &cfg.output_dir))
        .collect()
}

pub fn build_downloader(api: &ApiSettings) -> Result<Downloader<PushshiftApi>> {
    let mut http = HttpClient::new(&api.endpoint)
        .with_context(|| format!("invalid api endpoint {}", api.endpoint))?
        .with_timeout(Duration::from_secs(api.timeout_secs))
        .with_retries(api.max_retries);
    if let Some(agent) = api.user_agent.as_deref() {
        http = http.with_user_agent(agent)?;
    }
    let client = PushshiftApi::new(http).with_access_token(api.access_token.clone());
    Ok(Downloader::new(client).with_options(FetchOptions {
        page_size: api.page_size,
        pacing: Duration::from_millis(api.pacing_ms),
    }))
}

/// Prints progress lines for the operator.
pub struct ConsoleObserver;

impl RunObserver for ConsoleObserver {
    fn page_fetched(&self, request: &DownloadRequest, items: usize) {
        println!(
            "r/{}: Downloading: {} {}",
            request.subreddit,
            items,
            request.kind.plural()
        );
    }

    fn finished(&self, summary: &RunSummary) {
        println!(
            "r/{}: {} ({} {} in {} pages)",
            summary.subreddit,
            summary.reason,
            summary.records,
            summary.kind.plural(),
            summary.pages
        );
    }
}

/// Run every enabled job of `cfg`, at most `cfg.concurrency` at a time.
pub async fn run_configured(
    cfg: &RakeConfig,
    cancel: CancellationToken,
    observer: Arc<dyn RunObserver>,
) -> Result<Vec<RunSummary>> {
    let jobs = plan(cfg)?;
    std::fs::create_dir_all(&cfg.output_dir)
        .with_context(|| format!("cannot create {}", cfg.output_dir.display()))?;
    let downloader = build_downloader(&cfg.api)?
        .with_cancellation(cancel)
        .with_observer(observer);
    run_jobs(&downloader, jobs, cfg.concurrency).await
}

/// A failing job does not stop the others; any failure makes the whole call fail.
pub async fn run_jobs<S: PageSource>(
    downloader: &Downloader<S>,
    jobs: Vec<Job>,
    concurrency: usize,
) -> Result<Vec<RunSummary>> {
    let total = jobs.len();
    let results: Vec<(Job, Result<RunSummary>)> = stream::iter(jobs)
        .map(|job| async move {
            let result = run_job(downloader, &job).await;
            (job, result)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut summaries = Vec::with_capacity(total);
    let mut failed = 0;
    for (job, result) in results {
        match result {
            Ok(summary) => {
                tracing::info!(
                    output = %job.output.display(),
                    records = summary.records,
                    "job.done"
                );
                summaries.push(summary);
            }
            Err(err) => {
                failed += 1;
                tracing::error!(output = %job.output.display(), error = ?err, "job.failed");
                eprintln!("{}: {err:#}", job.output.display());
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {total} jobs failed");
    }
    Ok(summaries)
}

async fn run_job<S: PageSource>(downloader: &Downloader<S>, job: &Job) -> Result<RunSummary> {
    let mut sink = CsvSink::create(&job.output, job.request.kind)?;
    let summary = downloader
        .run(&job.request, &mut sink)
        .await
        .with_context(|| format!("r/{} {}", job.request.subreddit, job.request.kind.plural()))?;
    Ok(summary)
}
