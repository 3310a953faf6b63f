//! Epoch-second helpers pinned to the host's local zone.
//!
//! Output timestamps and cutoff dates are both interpreted in local time
//! without carrying an offset, so the two conversions live side by side.

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, TimeZone};

/// Rendering used for the `datetime` column of every output file.
pub const CSV_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Convert upstream `created_utc` seconds into a timezone-naive local datetime.
///
/// Returns `None` when the value falls outside chrono's representable range.
pub fn local_naive_from_unix(secs: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp(secs, 0).map(|utc| utc.with_timezone(&Local).naive_local())
}

/// Epoch seconds of local midnight at the start of `date`.
///
/// When midnight is skipped by a DST transition the first valid local instant
/// of the following hour is used.
pub fn local_midnight_unix(date: NaiveDate) -> Option<i64> {
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .or_else(|| {
            Local
                .from_local_datetime(&(midnight + Duration::hours(1)))
                .earliest()
        })
        .map(|dt| dt.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midnight_maps_back_to_same_local_date() {
        let date = NaiveDate::from_ymd_opt(2019, 1, 1).unwrap();
        let secs = local_midnight_unix(date).unwrap();
        let back = local_naive_from_unix(secs).unwrap();
        assert_eq!(back.date(), date);
        assert_eq!(back.format(CSV_DATETIME_FORMAT).to_string(), "2019-01-01 00:00:00");
    }

    #[test]
    fn conversion_is_monotonic() {
        let a = local_naive_from_unix(1_000_000).unwrap();
        let b = local_naive_from_unix(1_000_060).unwrap();
        assert_eq!((b - a).num_seconds(), 60);
    }

    #[test]
    fn out_of_range_seconds_are_rejected() {
        assert!(local_naive_from_unix(i64::MAX).is_none());
    }
}
