//! Thin wrapper around the Pushshift search endpoints.
//!
//! Shapes the fixed query parameters (`sort=desc`, `sort_type=created_utc`),
//! attaches the optional bearer token and delegates retries on 429/5xx to
//! the shared HTTP client.
use crate::harvest::PageSource;
use crate::pushshift::types::{ResourceKind, SearchResponse};
use async_trait::async_trait;
use rake_http::{Auth, HttpClient, HttpError, RequestOpts};
use serde_json::Value;
use std::borrow::Cow;

/// Parameters of one page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub subreddit: String,
    /// Only items created strictly before this timestamp; omitted on the first page.
    pub before: Option<i64>,
    pub size: usize,
}

#[derive(Clone)]
pub struct PushshiftApi {
    http: HttpClient,
    access_token: Option<String>,
}

impl PushshiftApi {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            access_token: None,
        }
    }

    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token.filter(|t| !t.trim().is_empty());
        self
    }

    pub async fn search(
        &self,
        kind: ResourceKind,
        query: &PageQuery,
    ) -> Result<SearchResponse, HttpError> {
        let mut params: Vec<(&str, Cow<'_, str>)> = vec![
            ("subreddit", Cow::Borrowed(query.subreddit.as_str())),
            ("sort", Cow::Borrowed("desc")),
            ("sort_type", Cow::Borrowed("created_utc")),
            ("size", query.size.to_string().into()),
        ];
        if let Some(before) = query.before {
            params.push(("before", before.to_string().into()));
        }

        let resp: SearchResponse = self
            .http
            .get_json(
                kind.search_path(),
                RequestOpts {
                    auth: self.access_token.as_deref().map(Auth::Bearer),
                    query: Some(params),
                    ..Default::default()
                },
            )
            .await?;

        tracing::debug!(
            subreddit = %query.subreddit,
            %kind,
            before = ?query.before,
            items = resp.data.len(),
            "pushshift.search"
        );
        Ok(resp)
    }
}

#[async_trait]
impl PageSource for PushshiftApi {
    async fn fetch_page(
        &self,
        kind: ResourceKind,
        query: &PageQuery,
    ) -> Result<Vec<Value>, HttpError> {
        self.search(kind, query).await.map(|resp| resp.data)
    }
}
