//! Incremental paginated download.
//!
//! A run walks a subreddit backwards in time one page at a time. Each page's
//! oldest accepted item becomes the next `before` cursor, a
//! [`TerminationPolicy`] decides when enough has been collected, a [`Pacer`]
//! spaces requests, and the accumulated batch is handed to a [`RecordSink`]
//! once the run terminates.
mod download;
mod pacer;
mod policy;
mod sink;

pub use download::{
    DownloadRequest, Downloader, FetchOptions, FlushMode, RunObserver, RunSummary, SilentObserver,
    StopReason,
};
pub use pacer::{Pacer, TokenBucket};
pub use policy::{Admission, DEFAULT_MAX_RECORDS, TerminationPolicy};
pub use sink::{CsvSink, RecordSink, SinkError};

use crate::pushshift::{MalformedItem, PageQuery, ResourceKind};
use async_trait::async_trait;
use rake_http::HttpError;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Where pages come from. [`crate::pushshift::PushshiftApi`] is the real
/// upstream; tests substitute scripted sources.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, kind: ResourceKind, query: &PageQuery)
    -> Result<Vec<Value>, HttpError>;
}

#[async_trait]
impl<T: PageSource + ?Sized> PageSource for Arc<T> {
    async fn fetch_page(
        &self,
        kind: ResourceKind,
        query: &PageQuery,
    ) -> Result<Vec<Value>, HttpError> {
        (**self).fetch_page(kind, query).await
    }
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] HttpError),
    #[error(transparent)]
    Malformed(#[from] MalformedItem),
    #[error("sink failed: {0}")]
    Sink(#[from] SinkError),
    #[error("cursor stalled before={cursor:?}: a full page of {items} items added nothing older")]
    CursorStalled { cursor: Option<i64>, items: usize },
    #[error("download cancelled")]
    Cancelled,
}
