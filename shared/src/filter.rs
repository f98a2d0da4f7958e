//! Period filters that define the "currently filtered view" of a collection.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::model::{Record, RecordFields};

/// Inclusive date range. A missing bound is unbounded on that side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    #[must_use]
    pub const fn all() -> Self {
        Self {
            start: None,
            end: None,
        }
    }

    #[must_use]
    pub const fn since(start: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }

    /// Undated records belong to every range.
    #[must_use]
    pub fn matches<T: RecordFields>(&self, record: &Record<T>) -> bool {
        record.fields.date().map_or(true, |d| self.contains(d))
    }

    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    #[default]
    All,
    Day,
    Week,
    Month,
    Year,
    Custom {
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    },
}

impl Period {
    #[must_use]
    pub fn range(&self, today: NaiveDate) -> DateRange {
        match *self {
            Period::All => DateRange::all(),
            Period::Day => DateRange::since(today),
            Period::Week => DateRange::since(today - Duration::days(7)),
            Period::Month => DateRange::since(today.with_day(1).unwrap_or(today)),
            Period::Year => DateRange::since(
                NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(today),
            ),
            // A start without an end runs up to today.
            Period::Custom { start, end } => DateRange {
                start,
                end: end.or(start.map(|_| today)),
            },
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Period::All => "all",
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
            Period::Year => "year",
            Period::Custom { .. } => "custom",
        }
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Period::All),
            "day" => Ok(Period::Day),
            "week" => Ok(Period::Week),
            "month" => Ok(Period::Month),
            "year" => Ok(Period::Year),
            "custom" => Ok(Period::Custom {
                start: None,
                end: None,
            }),
            other => Err(format!("unknown period '{other}'")),
        }
    }
}
