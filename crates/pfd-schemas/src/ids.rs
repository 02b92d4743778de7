//! Stable opaque ids and a monotonic-safe UTC clock.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

static LAST_MICROS: AtomicI64 = AtomicI64::new(0);

/// Current UTC time, guaranteed never to move backwards within a process.
///
/// Wall-clock regressions (NTP step, VM resume) are clamped to the latest
/// value already observed, so timestamps persisted in sequence stay ordered.
pub fn now_utc() -> DateTime<Utc> {
    let wall = Utc::now().timestamp_micros();
    let prev = LAST_MICROS.fetch_max(wall, Ordering::AcqRel);
    let micros = wall.max(prev);
    DateTime::from_timestamp_micros(micros).unwrap_or_else(Utc::now)
}

/// 32-char lowercase hex id (uuid4 without hyphens). Used for transition
/// event ids, delivery ids, attempt ids, outbox ids, and silence ids.
pub fn hex_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// RFC 3339 UTC with a `Z` suffix, second precision preserved.
pub fn iso_utc(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Unix seconds for gauges and signature timestamps.
pub fn unix_timestamp(value: &DateTime<Utc>) -> i64 {
    value.timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn now_utc_is_monotonic_within_process() {
        let mut last = now_utc();
        for _ in 0..100 {
            let next = now_utc();
            assert!(next >= last);
            last = next;
        }
    }

    #[test]
    fn hex_ids_are_unique_and_hex_shaped() {
        let a = hex_id();
        let b = hex_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn iso_utc_uses_z_suffix() {
        let dt = Utc.with_ymd_and_hms(2026, 2, 22, 10, 0, 0).unwrap();
        assert!(iso_utc(&dt).ends_with('Z'));
        assert!(iso_utc(&dt).starts_with("2026-02-22T10:00:00"));
    }
}
