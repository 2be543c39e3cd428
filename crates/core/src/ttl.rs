use chrono::Duration;

/// Parses a subscription lifetime: an integer count followed by one of `m`
/// (minutes), `h` (hours), or `d` (days). Anything else is reported as
/// unparseable; callers fall back to their configured default since the TTL
/// only governs expiry, not correctness-critical state.
pub fn parse_ttl(raw: &str) -> Option<Duration> {
    if raw.len() < 2 || !raw.is_ascii() {
        return None;
    }
    let (digits, unit) = raw.split_at(raw.len() - 1);
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let count: i64 = digits.parse().ok()?;
    match unit {
        "m" => Some(Duration::minutes(count)),
        "h" => Some(Duration::hours(count)),
        "d" => Some(Duration::days(count)),
        _ => None,
    }
}
