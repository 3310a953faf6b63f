//! Pushshift search API integration.
//!
//! The search endpoints page backwards through time: every request carries
//! `sort=desc&sort_type=created_utc` and, after the first page, a `before`
//! cursor holding the oldest `created_utc` already seen.
pub mod client;
pub mod extract;
pub mod types;

pub use client::{PageQuery, PushshiftApi};
pub use extract::{MalformedItem, normalize};
pub use types::{NormalizedRecord, RecordPayload, ResourceKind, SearchResponse};
