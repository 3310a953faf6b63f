//! Raw search item → [`NormalizedRecord`].
//!
//! Pure and deterministic: the same item always yields the same record.
//! Only the fields written to disk are read; everything else in the item is
//! ignored.

use crate::pushshift::types::{NormalizedRecord, RecordPayload, ResourceKind};
use rake_common::clock::local_naive_from_unix;
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use url::{Host, Url};

/// Domain written for self-posts regardless of their URL.
pub const SELF_POST_DOMAIN: &str = "self-post";
/// Domain written when a submission URL has no usable host.
pub const UNKNOWN_DOMAIN: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Problem {
    Missing,
    WrongType(&'static str),
    OutOfRange,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Problem::Missing => f.write_str("is missing"),
            Problem::WrongType(want) => write!(f, "is not {want}"),
            Problem::OutOfRange => f.write_str("is out of range"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed {kind} item: `{field}` {problem}")]
pub struct MalformedItem {
    pub kind: ResourceKind,
    pub field: &'static str,
    pub problem: Problem,
}

/// Map one raw item into the output record for `kind`.
///
/// `author` is passed through untouched, including the `[deleted]` marker.
pub fn normalize(raw: &Value, kind: ResourceKind) -> Result<NormalizedRecord, MalformedItem> {
    let fields = Fields { raw, kind };

    let created_utc = fields.epoch_seconds("created_utc")?;
    let timestamp = local_naive_from_unix(created_utc).ok_or(MalformedItem {
        kind,
        field: "created_utc",
        problem: Problem::OutOfRange,
    })?;
    let author = fields.string("author")?;

    let payload = match kind {
        ResourceKind::Comment => RecordPayload::Comment {
            body: fields.string("body")?,
        },
        ResourceKind::Submission => {
            let title = fields.string("title")?;
            let url = fields.string("url")?;
            let is_self = fields.boolean("is_self")?;
            let domain = submission_domain(&url, is_self);
            RecordPayload::Submission { title, url, domain }
        }
    };

    Ok(NormalizedRecord {
        created_utc,
        timestamp,
        author,
        payload,
    })
}

/// Domain column for a submission: self-post check first, then the
/// registrable domain with shortener hosts folded into their platform.
pub fn submission_domain(url: &str, is_self: bool) -> String {
    if is_self {
        return SELF_POST_DOMAIN.to_string();
    }
    canonical_domain(registrable_domain(url))
}

/// Effective TLD plus one label, e.g. `https://sub.example.co.uk/x` → `example.co.uk`.
pub fn registrable_domain(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.is_empty() || trimmed.starts_with('/') {
        return UNKNOWN_DOMAIN.to_string();
    }
    let parsed = Url::parse(trimmed)
        .ok()
        .filter(|u| u.has_host())
        .or_else(|| Url::parse(&format!("http://{trimmed}")).ok());

    match parsed.as_ref().and_then(|u| u.host()) {
        Some(Host::Domain(host)) => {
            let host = host.trim_end_matches('.').to_ascii_lowercase();
            if host.is_empty() {
                return UNKNOWN_DOMAIN.to_string();
            }
            psl::domain_str(&host).map(str::to_owned).unwrap_or(host)
        }
        // Address literals have no public suffix; keep them whole.
        Some(Host::Ipv4(addr)) => addr.to_string(),
        Some(Host::Ipv6(addr)) => addr.to_string(),
        None => UNKNOWN_DOMAIN.to_string(),
    }
}

fn canonical_domain(domain: String) -> String {
    match domain.as_str() {
        "youtu.be" => "youtube.com".to_string(),
        "redd.it" => "reddit.com".to_string(),
        _ => domain,
    }
}

struct Fields<'a> {
    raw: &'a Value,
    kind: ResourceKind,
}

impl Fields<'_> {
    fn get(&self, field: &'static str) -> Result<&Value, MalformedItem> {
        match self.raw.get(field) {
            Some(Value::Null) | None => Err(self.fail(field, Problem::Missing)),
            Some(v) => Ok(v),
        }
    }

    fn fail(&self, field: &'static str, problem: Problem) -> MalformedItem {
        MalformedItem {
            kind: self.kind,
            field,
            problem,
        }
    }

    fn string(&self, field: &'static str) -> Result<String, MalformedItem> {
        self.get(field)?
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| self.fail(field, Problem::WrongType("a string")))
    }

    fn boolean(&self, field: &'static str) -> Result<bool, MalformedItem> {
        self.get(field)?
            .as_bool()
            .ok_or_else(|| self.fail(field, Problem::WrongType("a boolean")))
    }

    /// Integer seconds; floats are accepted only when they carry no fraction.
    fn epoch_seconds(&self, field: &'static str) -> Result<i64, MalformedItem> {
        let v = self.get(field)?;
        if let Some(secs) = v.as_i64() {
            return Ok(secs);
        }
        if v.is_u64() {
            return Err(self.fail(field, Problem::OutOfRange));
        }
        match v.as_f64() {
            Some(f) if f.is_finite() && f.fract() == 0.0 => {
                if f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                    Ok(f as i64)
                } else {
                    Err(self.fail(field, Problem::OutOfRange))
                }
            }
            _ => Err(self.fail(field, Problem::WrongType("an integer"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn submission(url: &str, is_self: bool) -> Value {
        json!({
            "created_utc": 1_546_300_800,
            "author": "someone",
            "title": "hello",
            "url": url,
            "is_self": is_self,
            "score": 12
        })
    }

    fn domain_of(url: &str, is_self: bool) -> String {
        match normalize(&submission(url, is_self), ResourceKind::Submission)
            .unwrap()
            .payload
        {
            RecordPayload::Submission { domain, .. } => domain,
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn registrable_domain_strips_subdomains() {
        assert_eq!(domain_of("https://sub.example.co.uk/x", false), "example.co.uk");
        assert_eq!(domain_of("https://example.com/page", false), "example.com");
        assert_eq!(domain_of("https://www.YouTube.com/watch?v=1", false), "youtube.com");
    }

    #[test]
    fn shorteners_fold_into_platform() {
        assert_eq!(domain_of("https://youtu.be/abc", false), "youtube.com");
        assert_eq!(domain_of("https://redd.it/xyz", false), "reddit.com");
        assert_eq!(domain_of("https://v.redd.it/xyz", false), "reddit.com");
    }

    #[test]
    fn self_posts_always_get_sentinel() {
        assert_eq!(
            domain_of("https://www.reddit.com/r/mexico/comments/abc/", true),
            SELF_POST_DOMAIN
        );
        assert_eq!(domain_of("https://youtu.be/abc", true), SELF_POST_DOMAIN);
        assert_eq!(domain_of("", true), SELF_POST_DOMAIN);
    }

    #[test]
    fn domain_is_never_empty() {
        assert_eq!(domain_of("", false), UNKNOWN_DOMAIN);
        assert_eq!(domain_of("/r/mexico/comments/abc/", false), UNKNOWN_DOMAIN);
        assert_eq!(domain_of("example.org/path", false), "example.org");
        assert!(!domain_of("http://localhost:8080/", false).is_empty());
        assert_eq!(domain_of("http://192.168.1.10/x", false), "192.168.1.10");
        assert_eq!(domain_of("http://8.8.8.8/", false), "8.8.8.8");
        assert_eq!(domain_of("http://[::1]:8080/", false), "::1");
    }

    #[test]
    fn comment_fields_pass_through() {
        let raw = json!({"created_utc": 1_000_000, "author": "[deleted]", "body": "hola"});
        let rec = normalize(&raw, ResourceKind::Comment).unwrap();
        assert_eq!(rec.created_utc, 1_000_000);
        assert_eq!(rec.author, "[deleted]");
        assert_eq!(rec.timestamp, local_naive_from_unix(1_000_000).unwrap());
        assert_eq!(rec.payload, RecordPayload::Comment { body: "hola".into() });
    }

    #[test]
    fn normalizing_twice_is_identical() {
        let raw = submission("https://youtu.be/abc", false);
        let a = normalize(&raw, ResourceKind::Submission).unwrap();
        let b = normalize(&raw, ResourceKind::Submission).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn integral_float_timestamps_are_accepted() {
        let raw = json!({"created_utc": 1_546_300_800.0, "author": "a", "body": "b"});
        assert_eq!(
            normalize(&raw, ResourceKind::Comment).unwrap().created_utc,
            1_546_300_800
        );
    }

    #[test]
    fn missing_and_mistyped_fields_are_reported() {
        let missing = json!({"created_utc": 1, "author": "a"});
        let err = normalize(&missing, ResourceKind::Comment).unwrap_err();
        assert_eq!(err.field, "body");
        assert_eq!(err.problem, Problem::Missing);

        let null_author = json!({"created_utc": 1, "author": null, "body": "x"});
        assert_eq!(
            normalize(&null_author, ResourceKind::Comment).unwrap_err().field,
            "author"
        );

        let wrong = json!({"created_utc": "yesterday", "author": "a", "body": "b"});
        let err = normalize(&wrong, ResourceKind::Comment).unwrap_err();
        assert_eq!(err.problem, Problem::WrongType("an integer"));
        assert_eq!(
            err.to_string(),
            "malformed comments item: `created_utc` is not an integer"
        );

        let bad_flag = json!({
            "created_utc": 1, "author": "a", "title": "t", "url": "https://a.com", "is_self": "no"
        });
        assert_eq!(
            normalize(&bad_flag, ResourceKind::Submission).unwrap_err().field,
            "is_self"
        );
    }
}
