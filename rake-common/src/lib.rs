//! Common utilities shared across rake crates.
//!
//! This crate is intentionally lightweight so that every other crate in the
//! workspace can depend on it without pulling heavy transitive costs.
//!
//! # Overview
//!
//! - [`observability`]: centralised tracing/logging initialisation
//! - [`clock`]: conversions between upstream epoch seconds and the host-local
//!   calendar used in output files and cutoff dates
//!
//! # Examples
//!
//! ```rust
//! use rake_common::clock::local_naive_from_unix;
//!
//! let ts = local_naive_from_unix(0).expect("epoch is representable");
//! assert!(ts.and_utc().timestamp().abs() <= 14 * 3600);
//! ```

pub mod clock;
pub mod observability;
