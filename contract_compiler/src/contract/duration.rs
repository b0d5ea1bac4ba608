use std::time::Duration;

/// Parse a duration such as `10s`, `500ms`, `1m30s` or `2h`
pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let mut total = Duration::ZERO;
    let mut rest = text;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let amount: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(amount),
            "s" => Duration::from_secs(amount),
            "m" => Duration::from_secs(amount.checked_mul(60)?),
            "h" => Duration::from_secs(amount.checked_mul(3600)?),
            _ => return None,
        };
        total = total.checked_add(part)?;
        rest = &rest[unit_len..];
    }

    Some(total)
}

/// Whole seconds, rounded up, never below one
pub fn duration_seconds(text: &str) -> Option<u64> {
    let duration = parse_duration(text)?;
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    Some(secs.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("10s"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("1m30s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("10"), None);
        assert_eq!(parse_duration("s10"), None);
        assert_eq!(parse_duration("10 sec"), None);
    }

    #[test]
    fn test_duration_seconds_rounds_up() {
        assert_eq!(duration_seconds("500ms"), Some(1));
        assert_eq!(duration_seconds("1500ms"), Some(2));
        assert_eq!(duration_seconds("0s"), Some(1));
    }
}
