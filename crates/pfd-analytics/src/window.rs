//! Analytics window resolution: either `days` or explicit bounds, never
//! both; date-only values snap to start/end of day.

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use pfd_schemas::DiagnosticsError;

pub const DEFAULT_ANALYTICS_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy)]
pub struct AnalyticsWindow {
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub days: Option<i64>,
}

/// Parse an ISO date (`2026-02-22`) or datetime. Naive datetimes are taken
/// as UTC; a bare date snaps to start of day, or end of day for upper
/// bounds.
pub fn parse_iso_date_or_datetime(
    value: &str,
    field_name: &str,
    end_of_day_if_date: bool,
) -> Result<DateTime<Utc>> {
    let normalized = value.trim();
    if normalized.is_empty() {
        return Err(DiagnosticsError::payload(format!(
            "Invalid {field_name} ''. Expected ISO date or datetime."
        )));
    }

    if normalized.len() == 10 {
        if let Ok(date) = NaiveDate::parse_from_str(normalized, "%Y-%m-%d") {
            let time = if end_of_day_if_date {
                NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).unwrap_or(NaiveTime::MIN)
            } else {
                NaiveTime::MIN
            };
            return Ok(Utc.from_utc_datetime(&date.and_time(time)));
        }
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(&normalized.replace(' ', "T")) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(normalized, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    Err(DiagnosticsError::payload(format!(
        "Invalid {field_name} '{value}'. Expected ISO date or datetime."
    )))
}

/// Resolve `(date_from, date_to, days)`. Explicit bounds and `days` are
/// mutually exclusive; with neither, the default trailing window applies.
pub fn resolve_analytics_window(
    date_from: Option<&str>,
    date_to: Option<&str>,
    days: Option<i64>,
    now: DateTime<Utc>,
    default_days: i64,
) -> Result<AnalyticsWindow> {
    let parsed_from = date_from
        .filter(|s| !s.trim().is_empty())
        .map(|s| parse_iso_date_or_datetime(s, "date_from", false))
        .transpose()?;
    let parsed_to = date_to
        .filter(|s| !s.trim().is_empty())
        .map(|s| parse_iso_date_or_datetime(s, "date_to", true))
        .transpose()?;

    let mut window = AnalyticsWindow {
        date_from: parsed_from,
        date_to: parsed_to,
        days,
    };

    if window.date_from.is_some() || window.date_to.is_some() {
        if days.is_some() {
            return Err(DiagnosticsError::payload(
                "Use either days or explicit date_from/date_to filters, not both.",
            ));
        }
        window.days = None;
    } else {
        let resolved_days = days.unwrap_or(default_days);
        if !(1..=3650).contains(&resolved_days) {
            return Err(DiagnosticsError::payload("days must be between 1 and 3650."));
        }
        window.days = Some(resolved_days);
        window.date_to = Some(now);
        window.date_from = Some(now - Duration::days(resolved_days));
    }

    if let (Some(from), Some(to)) = (window.date_from, window.date_to) {
        if from > to {
            return Err(DiagnosticsError::payload(
                "date_from must be earlier than or equal to date_to.",
            ));
        }
    }

    Ok(window)
}

/// Trend bucketing granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendBucket {
    Day,
    Hour,
}

impl TrendBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendBucket::Day => "day",
            TrendBucket::Hour => "hour",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "day" => Ok(TrendBucket::Day),
            "hour" => Ok(TrendBucket::Hour),
            _ => Err(DiagnosticsError::payload("bucket must be one of: day, hour")),
        }
    }

    pub fn truncate(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let naive = at.naive_utc();
        let truncated = match self {
            TrendBucket::Hour => naive
                .date()
                .and_hms_opt(naive.time().hour(), 0, 0)
                .unwrap_or(naive),
            TrendBucket::Day => naive.date().and_hms_opt(0, 0, 0).unwrap_or(naive),
        };
        Utc.from_utc_datetime(&truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 22, 12, 30, 45).unwrap()
    }

    #[test]
    fn default_window_is_trailing_days() {
        let window = resolve_analytics_window(None, None, None, now(), 30).unwrap();
        assert_eq!(window.days, Some(30));
        assert_eq!(window.date_to, Some(now()));
        assert_eq!(window.date_from, Some(now() - Duration::days(30)));
    }

    #[test]
    fn explicit_bounds_exclude_days() {
        let err = resolve_analytics_window(Some("2026-01-01"), None, Some(7), now(), 30);
        assert!(err.is_err());
    }

    #[test]
    fn date_only_bounds_snap_to_day_edges() {
        let window =
            resolve_analytics_window(Some("2026-01-01"), Some("2026-01-31"), None, now(), 30)
                .unwrap();
        let from = window.date_from.unwrap();
        let to = window.date_to.unwrap();
        assert_eq!(from.to_rfc3339(), "2026-01-01T00:00:00+00:00");
        assert!(to > Utc.with_ymd_and_hms(2026, 1, 31, 23, 59, 58).unwrap());
    }

    #[test]
    fn inverted_range_is_rejected() {
        let err =
            resolve_analytics_window(Some("2026-02-10"), Some("2026-02-01"), None, now(), 30);
        assert!(err.is_err());
    }

    #[test]
    fn days_bounds_are_validated() {
        assert!(resolve_analytics_window(None, None, Some(0), now(), 30).is_err());
        assert!(resolve_analytics_window(None, None, Some(4000), now(), 30).is_err());
    }

    #[test]
    fn buckets_truncate() {
        let at = now();
        assert_eq!(
            TrendBucket::Hour.truncate(at).to_rfc3339(),
            "2026-02-22T12:00:00+00:00"
        );
        assert_eq!(
            TrendBucket::Day.truncate(at).to_rfc3339(),
            "2026-02-22T00:00:00+00:00"
        );
    }
}
