use chrono::NaiveDateTime;
use rake_common::clock::CSV_DATETIME_FORMAT;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Envelope returned by both search endpoints.
///
/// Items stay untyped here; [`crate::pushshift::normalize`] pulls out the few
/// fields a run needs so unrelated schema drift never fails a page.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    pub data: Vec<Value>,
}

/// Which search endpoint a run pages through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Comment,
    Submission,
}

impl ResourceKind {
    pub fn search_path(self) -> &'static str {
        match self {
            ResourceKind::Comment => "reddit/comment/search/",
            ResourceKind::Submission => "reddit/submission/search/",
        }
    }

    /// Plural noun used in progress lines and default file labels.
    pub fn plural(self) -> &'static str {
        match self {
            ResourceKind::Comment => "comments",
            ResourceKind::Submission => "submissions",
        }
    }

    /// CSV header row for this kind.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            ResourceKind::Comment => &["datetime", "author", "body"],
            ResourceKind::Submission => &["datetime", "author", "title", "url", "domain"],
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plural())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "comment" | "comments" => Ok(ResourceKind::Comment),
            "submission" | "submissions" | "post" | "posts" => Ok(ResourceKind::Submission),
            other => Err(format!(
                "unknown resource kind `{other}` (expected comments or submissions)"
            )),
        }
    }
}

/// One output row, in the shape written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRecord {
    /// Upstream creation time; drives the pagination cursor.
    pub created_utc: i64,
    /// `created_utc` rendered in the host's local zone, without an offset.
    pub timestamp: NaiveDateTime,
    pub author: String,
    pub payload: RecordPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordPayload {
    Comment {
        body: String,
    },
    Submission {
        title: String,
        url: String,
        domain: String,
    },
}

impl NormalizedRecord {
    pub fn kind(&self) -> ResourceKind {
        match self.payload {
            RecordPayload::Comment { .. } => ResourceKind::Comment,
            RecordPayload::Submission { .. } => ResourceKind::Submission,
        }
    }

    /// Fields in [`ResourceKind::columns`] order.
    pub fn row(&self) -> Vec<String> {
        let mut row = vec![
            self.timestamp.format(CSV_DATETIME_FORMAT).to_string(),
            self.author.clone(),
        ];
        match &self.payload {
            RecordPayload::Comment { body } => row.push(body.clone()),
            RecordPayload::Submission { title, url, domain } => {
                row.extend([title.clone(), url.clone(), domain.clone()]);
            }
        }
        row
    }
}
