//! Archive units and listing URL construction.

use crate::config::{ArchiveScheme, DayCounter};
use crate::error::ConfigError;
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One page of a remote archive: a calendar date or a page number.
///
/// Units of one site are always the same variant, and the driver walks them
/// in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArchiveUnit {
    Date(NaiveDate),
    Page(u32),
}

impl ArchiveUnit {
    /// Key persisted in the checkpoint's completed set.
    pub fn key(&self) -> String {
        match self {
            ArchiveUnit::Date(date) => date.format("%Y-%m-%d").to_string(),
            ArchiveUnit::Page(n) => n.to_string(),
        }
    }

    /// The following unit, or `None` past the end of the calendar.
    pub fn next(&self) -> Option<ArchiveUnit> {
        match self {
            ArchiveUnit::Date(date) => date.succ_opt().map(ArchiveUnit::Date),
            ArchiveUnit::Page(n) => n.checked_add(1).map(ArchiveUnit::Page),
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            ArchiveUnit::Date(date) => Some(*date),
            ArchiveUnit::Page(_) => None,
        }
    }
}

impl fmt::Display for ArchiveUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// The local calendar date; date units are never requested beyond it.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

impl ArchiveScheme {
    /// Parse a unit given on the command line (`2024-05-01` or `7`).
    pub fn parse_unit(&self, value: &str) -> Result<ArchiveUnit, ConfigError> {
        let value = value.trim();
        match self {
            ArchiveScheme::Date { .. } => NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .map(ArchiveUnit::Date)
                .map_err(|e| ConfigError::Unit {
                    value: value.to_string(),
                    reason: format!("expected YYYY-MM-DD ({e})"),
                }),
            ArchiveScheme::Page { .. } => match value.parse::<u32>() {
                Ok(n) if n > 0 => Ok(ArchiveUnit::Page(n)),
                _ => Err(ConfigError::Unit {
                    value: value.to_string(),
                    reason: "expected a page number starting at 1".to_string(),
                }),
            },
        }
    }

    /// Where a run starts when no start unit is given: today, or page 1.
    pub fn default_start(&self) -> ArchiveUnit {
        match self {
            ArchiveScheme::Date { .. } => ArchiveUnit::Date(today()),
            ArchiveScheme::Page { .. } => ArchiveUnit::Page(1),
        }
    }

    pub fn is_paged(&self) -> bool {
        matches!(self, ArchiveScheme::Page { .. })
    }

    /// Listing URL for `unit`. A unit of the wrong kind renders the template
    /// with only `{base}` substituted.
    pub fn unit_url(&self, base: &str, unit: &ArchiveUnit) -> String {
        match (self, unit) {
            (ArchiveScheme::Date { url, counter }, ArchiveUnit::Date(date)) => {
                render_date(url, base, *date, counter.as_ref())
            }
            (ArchiveScheme::Page { url, first_page_url }, ArchiveUnit::Page(n)) => {
                let template = match first_page_url {
                    Some(first) if *n == 1 => first,
                    _ => url,
                };
                template.replace("{base}", base).replace("{n}", &n.to_string())
            }
            (ArchiveScheme::Date { url, .. } | ArchiveScheme::Page { url, .. }, _) => {
                url.replace("{base}", base)
            }
        }
    }
}

impl DayCounter {
    pub fn value(&self, date: NaiveDate) -> i64 {
        self.offset + (date - self.epoch).num_days()
    }
}

fn render_date(
    template: &str,
    base: &str,
    date: NaiveDate,
    counter: Option<&DayCounter>,
) -> String {
    let mut url = template
        .replace("{base}", base)
        .replace("{yyyy}", &date.format("%Y").to_string())
        .replace("{mm}", &date.format("%m").to_string())
        .replace("{m}", &date.format("%-m").to_string())
        .replace("{dd}", &date.format("%d").to_string())
        .replace("{d}", &date.format("%-d").to_string())
        .replace("{Mon}", &date.format("%b").to_string());
    if let Some(counter) = counter {
        url = url.replace("{counter}", &counter.value(date).to_string());
    }
    url
}
