//! Timestamp utilities

use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Duration;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// RFC 3339 / ISO-8601 text form used in persisted records
pub fn to_iso8601(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a timestamp written by [`to_iso8601`] (or any RFC 3339 string)
pub fn parse_iso8601(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Duration as milliseconds rounded to 2 decimals
pub fn duration_ms(duration: Duration) -> f64 {
    round_to(duration.as_secs_f64() * 1000.0, 2)
}

/// Round half away from zero to `decimals` places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_returns_recent_timestamp() {
        let timestamp = now();
        assert!(timestamp.timestamp() > 946_684_800); // 2000-01-01
        assert!(timestamp.timestamp() < 4_102_444_800); // 2100-01-01
    }

    #[tokio::test]
    async fn test_now_successive_calls_advance() {
        let time1 = now();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let time2 = now();
        assert!(time2 > time1);
    }

    #[test]
    fn test_iso8601_roundtrip() {
        let ts = now();
        let text = to_iso8601(ts);
        assert!(text.ends_with('Z'));
        let parsed = parse_iso8601(&text).unwrap();
        assert_eq!(parsed.timestamp_micros(), ts.timestamp_micros());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_iso8601("yesterday").is_none());
    }

    #[test]
    fn test_duration_ms_rounding() {
        assert_eq!(duration_ms(Duration::from_micros(1_234_567)), 1234.57);
        assert_eq!(duration_ms(Duration::ZERO), 0.0);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(0.8049, 2), 0.8);
        assert_eq!(round_to(0.125, 2), 0.13);
        assert_eq!(round_to(2.0 / 3.0, 4), 0.6667);
    }
}
