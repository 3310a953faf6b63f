//! Pushshift collection pipeline used by rake.
//!
//! - [`pushshift`]: typed search client, response envelope and the record
//!   normalizer that turns raw items into output rows.
//! - [`harvest`]: the paginated fetch loop, its termination policies, request
//!   pacing and the sinks finished batches are written to.
pub mod harvest;
pub mod pushshift;
