//! Shared primitive types used across the entire pipeline.

use crate::error::{PipelineError, PipelineResult};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A billing provider. One entity in the risk ranking.
pub type ProviderId = u64;

/// A procedure (HCPCS-style) code.
pub type ProcedureCode = String;

/// A region code (two-letter state in practice).
pub type RegionCode = String;

/// Identifier of one aggregate build. Fresh per pipeline run.
pub type BuildId = String;

/// Money in integer cents. Sums of cents are exact and order independent.
pub type Cents = i64;

pub fn cents_to_dollars(cents: Cents) -> f64 {
    cents as f64 / 100.0
}

pub fn dollars_to_cents(dollars: f64) -> Cents {
    (dollars * 100.0).round() as Cents
}

/// `numerator / denominator`, or `None` when the ratio is undefined.
pub fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 || !denominator.is_finite() || !numerator.is_finite() {
        return None;
    }
    Some(numerator / denominator)
}

/// Round half away from zero to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// A calendar month. Orders chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> PipelineResult<Self> {
        if !(1..=12).contains(&month) {
            return Err(PipelineError::InvalidPeriod(format!("{year}-{month}")));
        }
        Ok(Self { year, month })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self { year: date.year(), month: date.month() }
    }

    /// The following month.
    pub fn succ(&self) -> Self {
        if self.month == 12 {
            Self { year: self.year + 1, month: 1 }
        } else {
            Self { year: self.year, month: self.month + 1 }
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = PipelineError;

    /// Accepts `YYYY-MM` and `YYYY-MM-DD` (day ignored).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let candidate = if s.len() == 7 { format!("{s}-01") } else { s.to_string() };
        NaiveDate::parse_from_str(&candidate, "%Y-%m-%d")
            .map(Self::from_date)
            .map_err(|_| PipelineError::InvalidPeriod(s.to_string()))
    }
}

impl TryFrom<String> for Period {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Period> for String {
    fn from(p: Period) -> Self {
        p.to_string()
    }
}
