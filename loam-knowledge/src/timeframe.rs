use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use regex::Regex;

use crate::errors::{KnowledgeError, KnowledgeResult};

/// Turn a relative (`7d`, `2 weeks ago`, `yesterday`) or absolute
/// (`2024-03-01`, RFC 3339) timeframe into the instant it starts at.
pub fn parse_timeframe(input: &str, now: DateTime<Utc>) -> KnowledgeResult<DateTime<Utc>> {
    let raw = input.trim().to_lowercase();
    let invalid = || KnowledgeError::InvalidTimeframe(input.to_string());
    if raw.is_empty() {
        return Err(invalid());
    }

    match raw.as_str() {
        "today" => return Ok(start_of_day(now)),
        "yesterday" => return Ok(start_of_day(now - Duration::days(1))),
        "last week" => return Ok(now - Duration::weeks(1)),
        "last month" => return Ok(now - Duration::days(30)),
        _ => {}
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(input.trim()) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
        return Ok(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)));
    }

    let relative = Regex::new(r"^(\d+)\s*([a-z]+)(?:\s+ago)?$")
        .map_err(|err| KnowledgeError::InvalidTimeframe(err.to_string()))?;
    let captures = relative.captures(&raw).ok_or_else(invalid)?;
    let amount: i64 = captures[1].parse().map_err(|_| invalid())?;
    let span = match &captures[2] {
        "h" | "hour" | "hours" => Duration::try_hours(amount),
        "d" | "day" | "days" => Duration::try_days(amount),
        "w" | "week" | "weeks" => Duration::try_weeks(amount),
        "m" | "month" | "months" => amount.checked_mul(30).and_then(Duration::try_days),
        _ => None,
    };
    span.and_then(|span| now.checked_sub_signed(span))
        .ok_or_else(invalid)
}

fn start_of_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&ts.date_naive().and_time(NaiveTime::MIN))
}
