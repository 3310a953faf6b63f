use chrono::NaiveDate;
use rake_common::clock::local_midnight_unix;

pub const DEFAULT_MAX_RECORDS: usize = 10_000;

/// When a run stops asking for older pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationPolicy {
    /// Stop once this many records are accepted; the record reaching the
    /// bound is kept.
    CountBound(usize),
    /// Stop at the first item with `created_utc <= cutoff`; that item is dropped.
    DateBound(i64),
}

/// Verdict for one candidate item, evaluated before it is appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accept,
    /// Keep this item, then stop.
    AcceptLast,
    /// Drop this item and everything after it.
    Reject,
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        TerminationPolicy::CountBound(DEFAULT_MAX_RECORDS)
    }
}

impl TerminationPolicy {
    /// Date cutoff at local midnight of `date`.
    pub fn until(date: NaiveDate) -> Option<Self> {
        local_midnight_unix(date).map(TerminationPolicy::DateBound)
    }

    pub fn admit(&self, created_utc: i64, accepted: usize) -> Admission {
        match *self {
            TerminationPolicy::CountBound(max) if accepted >= max => Admission::Reject,
            TerminationPolicy::CountBound(max) if accepted + 1 >= max => Admission::AcceptLast,
            TerminationPolicy::CountBound(_) => Admission::Accept,
            TerminationPolicy::DateBound(cutoff) if created_utc <= cutoff => Admission::Reject,
            TerminationPolicy::DateBound(_) => Admission::Accept,
        }
    }

    /// True when no further item could ever be admitted.
    pub fn is_satisfied(&self, accepted: usize) -> bool {
        matches!(*self, TerminationPolicy::CountBound(max) if accepted >= max)
    }
}
