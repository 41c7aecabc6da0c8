//! Due-time parsing for the command line.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};

/// Parse a due time given on the command line.
///
/// Accepts RFC 3339 (`2030-01-01T09:00:00+02:00`), `YYYY-MM-DD HH:MM` taken as
/// UTC, or an offset from `now` such as `+30m`, `+2h`, `+1d`.
pub fn parse_due(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, String> {
    let s = input.trim();

    if let Some(offset) = s.strip_prefix('+') {
        let secs = parse_interval(offset)?;
        let secs = i64::try_from(secs).map_err(|_| format!("Offset too large: {}", s))?;
        return Duration::try_seconds(secs)
            .and_then(|d| now.checked_add_signed(d))
            .ok_or_else(|| format!("Offset too large: {}", s));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc());
        }
    }

    Err(format!(
        "Invalid due time: {}. Use RFC 3339, 'YYYY-MM-DD HH:MM' (UTC) or '+30m', '+2h', '+1d'",
        s
    ))
}

/// Parse interval string like "1h", "30m", "6h", "1d"
pub fn parse_interval(s: &str) -> Result<u64, String> {
    let s = s.trim().to_lowercase();

    if let Some(hours) = s.strip_suffix('h') {
        hours
            .parse::<u64>()
            .ok()
            .and_then(|h| h.checked_mul(3600))
            .ok_or_else(|| format!("Invalid hours: {}", hours))
    } else if let Some(minutes) = s.strip_suffix('m') {
        minutes
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .ok_or_else(|| format!("Invalid minutes: {}", minutes))
    } else if let Some(days) = s.strip_suffix('d') {
        days.parse::<u64>()
            .ok()
            .and_then(|d| d.checked_mul(86400))
            .ok_or_else(|| format!("Invalid days: {}", days))
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>()
            .map_err(|_| format!("Invalid seconds: {}", secs))
    } else {
        // Try parsing as raw seconds
        s.parse::<u64>()
            .map_err(|_| format!("Invalid interval: {}. Use format like '30m', '2h', '1d'", s))
    }
}

/// Human-readable time until `due`, e.g. "in 1d 2h", "in 45m", "overdue".
pub fn format_until(due: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (due - now).num_seconds();
    if secs <= 0 {
        return "overdue".to_string();
    }

    let (days, hours, minutes) = (secs / 86400, secs % 86400 / 3600, secs % 3600 / 60);
    let parts: Vec<String> = [(days, "d"), (hours, "h"), (minutes, "m")]
        .into_iter()
        .filter(|(n, _)| *n > 0)
        .take(2)
        .map(|(n, unit)| format!("{}{}", n, unit))
        .collect();

    if parts.is_empty() {
        "in <1m".to_string()
    } else {
        format!("in {}", parts.join(" "))
    }
}
