use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use rake_common::observability::{LogConfig, LogFormat, init_logging};
use rake_config::{
    FlushSpec, JobSpec, KindSpec, RakeConfig, RakeConfigLoader, StopSpec, default_config_path,
};
use rake_runtime::{RakeHandle, RakeRuntime};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod jobs;

/// Incremental subreddit downloader.
#[derive(Debug, Parser)]
#[command(name = "rake", version, about)]
struct Cli {
    /// Configuration file (defaults to ./rake.yaml, then the user config dir).
    #[arg(long, global = true, env = "RAKE_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true, default_value = "text")]
    log_format: LogFormat,

    /// Mirror logs to stderr at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run every enabled job from the configuration file.
    Run,
    /// Download one subreddit without touching the configured jobs.
    Fetch(FetchArgs),
}

#[derive(Debug, Args)]
struct FetchArgs {
    #[arg(long)]
    subreddit: String,

    /// comments or submissions
    #[arg(long, default_value = "comments")]
    kind: KindSpec,

    /// Stop after this many records.
    #[arg(long, conflicts_with = "until")]
    max_records: Option<usize>,

    /// Stop at local midnight of this date (YYYY-MM-DD); earlier items are excluded.
    #[arg(long)]
    until: Option<NaiveDate>,

    /// File label, e.g. `posts` for `<subreddit>-posts.csv`.
    #[arg(long)]
    label: Option<String>,

    /// Output directory; overrides `output_dir` from the configuration.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Resume below this unix timestamp.
    #[arg(long)]
    before: Option<i64>,

    /// Append each page to the file as soon as it arrives.
    #[arg(long)]
    per_page: bool,
}

impl FetchArgs {
    fn job_spec(&self) -> JobSpec {
        let stop = match (self.max_records, self.until) {
            (Some(n), _) => Some(StopSpec::MaxRecords(n)),
            (None, Some(date)) => Some(StopSpec::Until(date)),
            (None, None) => None,
        };
        JobSpec {
            subreddit: self.subreddit.clone(),
            kind: self.kind,
            label: self.label.clone(),
            enabled: Some(true),
            stop,
            flush: if self.per_page {
                FlushSpec::Page
            } else {
                FlushSpec::Batch
            },
            before: self.before,
        }
    }
}

fn load_config(cli: &Cli) -> Result<RakeConfig> {
    let loader = match (&cli.config, default_config_path()) {
        (Some(path), _) => RakeConfigLoader::new().with_file(path),
        (None, Some(path)) => RakeConfigLoader::new().with_optional_file(path),
        (None, None) => RakeConfigLoader::new(),
    };

    match &cli.command {
        Command::Run => loader.load().context("loading configuration"),
        Command::Fetch(args) => {
            let mut cfg = loader
                .load_without_validation()
                .context("loading configuration")?;
            cfg.jobs = vec![args.job_spec()];
            cfg.concurrency = 1;
            if let Some(out) = &args.out {
                cfg.output_dir = out.clone();
            }
            cfg.validate().context("invalid fetch arguments")?;
            Ok(cfg)
        }
    }
}

async fn execute(cfg: RakeConfig, handle: &RakeHandle) -> Result<()> {
    let summaries = jobs::run_configured(
        &cfg,
        handle.cancellation(),
        Arc::new(jobs::ConsoleObserver),
    )
    .await?;
    let records: usize = summaries.iter().map(|s| s.records).sum();
    tracing::info!(jobs = summaries.len(), records, "rake.done");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_path = init_logging(LogConfig {
        emit_stderr: cli.verbose,
        format: cli.log_format,
        default_filter: if cli.verbose { "debug" } else { "info" },
        ..LogConfig::default()
    })?;
    tracing::debug!(path = %log_path.display(), "logging initialised");

    let cfg = load_config(&cli)?;

    let runtime = RakeRuntime::build("rake-worker", None)?;
    let handle = runtime.handle();
    let watcher = handle.cancel_on_ctrl_c();
    let result = runtime.block_on(execute(cfg, &handle));
    watcher.abort();
    runtime.shutdown(Duration::from_secs(1));
    result
}
