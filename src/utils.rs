//! Utility functions for date normalization, text cleanup, and politeness delays.
//!
//! - [`normalize_date`]: reduce the many date spellings found on news pages to `YYYY-MM-DD`
//! - [`truncate_for_log`] / [`collapse_whitespace`]: string helpers
//! - [`DelayRange`] / [`polite_pause`]: randomized sleeps between requests

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use rand::{Rng, rng};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

static LEADING_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(last\s+updated|updated|published)\s*:\s*").unwrap());
static TIMEZONE_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(?\b(IST|GMT|UTC)\b\)?").unwrap());

const DATETIME_PATTERNS: &[&str] = &[
    "%a, %d %b %Y %I:%M %p",
    "%d %b %Y %I:%M %p",
    "%B %d, %Y %I:%M %p",
    "%b %d, %Y %I:%M %p",
    "%B %d %Y %I:%M %p",
    "%b %d %Y %I:%M %p",
    "%b %d, %Y %H:%M",
    "%d %B %Y %H:%M",
];

const DATE_PATTERNS: &[&str] = &["%B %d, %Y", "%b %d, %Y", "%d %B %Y", "%d %b %Y", "%d-%m-%Y"];

/// Normalize a scraped date string to `YYYY-MM-DD`.
///
/// Accepts ISO-8601-like strings (with `T` or a space separator, `Z` or an
/// offset, or a bare date) and the textual forms seen on archive sites, with
/// or without a timezone label such as `IST` or `(IST)`. Strings that match
/// nothing are returned unchanged so callers always get a value back.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(normalize_date("Sun, 30 Nov 2025 07:25 PM (IST)"), "2025-11-30");
/// assert_eq!(normalize_date("garbage"), "garbage");
/// ```
pub fn normalize_date(raw: &str) -> String {
    let text = LEADING_LABEL.replace(raw.trim(), "").trim().to_string();
    if text.is_empty() {
        return raw.to_string();
    }

    if let Some(date) = parse_iso_like(&text) {
        return date.format("%Y-%m-%d").to_string();
    }

    let cleaned = TIMEZONE_LABEL.replace_all(&text, "");
    let cleaned = collapse_whitespace(cleaned.trim().trim_end_matches(','));

    for pattern in DATETIME_PATTERNS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&cleaned, pattern) {
            return dt.format("%Y-%m-%d").to_string();
        }
    }
    for pattern in DATE_PATTERNS {
        if let Ok(date) = NaiveDate::parse_from_str(&cleaned, pattern) {
            return date.format("%Y-%m-%d").to_string();
        }
    }

    debug!(raw, "date left unnormalized");
    raw.to_string()
}

/// Parse an ISO-8601-like timestamp, returning the calendar date in the
/// timestamp's own offset.
fn parse_iso_like(text: &str) -> Option<NaiveDate> {
    let mut candidate = text.to_string();
    if !candidate.contains('T') && candidate.contains(' ') && candidate.get(..10)?.contains('-') {
        candidate = candidate.replacen(' ', "T", 1);
    }
    if let Some(stripped) = candidate.strip_suffix('Z') {
        candidate = format!("{stripped}+00:00");
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(&candidate) {
        return Some(dt.date_naive());
    }
    for pattern in ["%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M%:z"] {
        if let Ok(dt) = DateTime::parse_from_str(&candidate, pattern) {
            return Some(dt.date_naive());
        }
    }
    for pattern in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&candidate, pattern) {
            return Some(dt.date());
        }
    }
    NaiveDate::parse_from_str(&candidate, "%Y-%m-%d").ok()
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut at a character boundary after `max` characters and
/// `"…(+N bytes)"` is appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((idx, _)) => format!("{}…(+{} bytes)", &s[..idx], s.len() - idx),
    }
}

/// Collapse all runs of whitespace into single spaces and trim the ends.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A randomized delay window in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub const fn none() -> Self {
        Self::new(0, 0)
    }

    /// Pick a delay uniformly from the window.
    pub fn sample(&self) -> Duration {
        if self.max_ms <= self.min_ms {
            return Duration::from_millis(self.min_ms);
        }
        let ms: u64 = rng().random_range(self.min_ms..=self.max_ms);
        Duration::from_millis(ms)
    }
}

impl FromStr for DelayRange {
    type Err = String;

    /// `"500-1500"` or a fixed `"800"`, in milliseconds.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |v: &str| {
            v.trim()
                .parse::<u64>()
                .map_err(|e| format!("invalid delay {v:?}: {e}"))
        };
        let range = match s.split_once('-') {
            Some((min, max)) => DelayRange::new(parse(min)?, parse(max)?),
            None => {
                let ms = parse(s)?;
                DelayRange::new(ms, ms)
            }
        };
        if range.max_ms < range.min_ms {
            return Err(format!("delay range {s:?} has min above max"));
        }
        Ok(range)
    }
}

/// Sleep for a random duration drawn from `range`. Returns immediately for a zero window.
pub async fn polite_pause(range: DelayRange) {
    let delay = range.sample();
    if !delay.is_zero() {
        sleep(delay).await;
    }
}
