use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;

const DEADLINE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d-%m-%Y %I:%M %p",
];
const DATE_ONLY_FORMATS: &[&str] = &["%Y-%m-%d", "%d-%m-%Y"];

pub const DEADLINE_DISPLAY_FORMAT: &str = "%d-%m-%Y %I:%M %p";

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^https?://(?:(?:[A-Z0-9](?:[A-Z0-9-]{0,61}[A-Z0-9])?\.)+[A-Z]{2,6}\.?|localhost|\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})(?::\d+)?(?:/?|[/?]\S+)$",
    )
    .expect("static url pattern")
});

/// Parse a deadline typed in any of the accepted formats. Date-only input means midnight.
pub fn parse_deadline(input: &str) -> Option<NaiveDateTime> {
    let value = input.trim();
    if value.is_empty() {
        return None;
    }
    for format in DEADLINE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed);
        }
    }
    for format in DATE_ONLY_FORMATS {
        if let Ok(date) = chrono::NaiveDate::parse_from_str(value, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

pub fn format_deadline(deadline: &NaiveDateTime) -> String {
    deadline.format(DEADLINE_DISPLAY_FORMAT).to_string()
}

/// Empty input counts as valid: the URL field is optional everywhere.
pub fn is_valid_url(url: &str) -> bool {
    let trimmed = url.trim();
    trimmed.is_empty() || URL_PATTERN.is_match(trimmed)
}
