//! Recency classification of free-text "time since posting" phrases.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

fn age_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)(\d+)\s*(second|minute|hour|day)").ok())
        .as_ref()
}

/// Parse the first `<integer> <unit>` occurrence into a duration.
///
/// Returns `None` for empty text, no match, or a value that overflows.
pub fn parse_age(phrase: &str) -> Option<Duration> {
    let caps = age_pattern()?.captures(phrase)?;
    let amount: u64 = caps.get(1)?.as_str().parse().ok()?;
    let unit_secs = match caps.get(2)?.as_str().to_ascii_lowercase().as_str() {
        "second" => 1,
        "minute" => 60,
        "hour" => 3_600,
        "day" => 86_400,
        _ => return None,
    };
    amount.checked_mul(unit_secs).map(Duration::from_secs)
}

/// Whether the phrase describes an age inside `window`.
///
/// Malformed or missing text is never recent; this never fails.
pub fn is_recent(phrase: Option<&str>, window: Duration) -> bool {
    phrase
        .and_then(parse_age)
        .is_some_and(|age| age <= window)
}
