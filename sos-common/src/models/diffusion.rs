//! Diffusion (location generalization) rules for sensitive taxa

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use super::AreaType;

/// How the public coordinates of a processed observation were produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiffusionStatus {
    NotDiffused,
    DiffusedBySystem,
    DiffusedByProvider,
}

/// Year-agnostic calendar day
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MonthDay {
    pub month: u32,
    pub day: u32,
}

impl MonthDay {
    pub fn new(month: u32, day: u32) -> crate::Result<Self> {
        // 2000 is a leap year, so Feb 29 is accepted
        if NaiveDate::from_ymd_opt(2000, month, day).is_none() {
            return Err(crate::Error::InvalidInput(format!(
                "invalid month/day {}-{}",
                month, day
            )));
        }
        Ok(Self { month, day })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            month: date.month(),
            day: date.day(),
        }
    }
}

/// Recurring `[start, end]` window, inclusive on both ends
///
/// A window whose start is after its end wraps the year boundary,
/// e.g. Dec 1 - Feb 28.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringWindow {
    pub start: MonthDay,
    pub end: MonthDay,
}

impl RecurringWindow {
    pub fn contains(&self, day: MonthDay) -> bool {
        if self.start <= self.end {
            self.start <= day && day <= self.end
        } else {
            day >= self.start || day <= self.end
        }
    }
}

/// Area scope of a rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleArea {
    pub area_type: AreaType,
    pub feature_id: String,
}

/// Diffusion rule scoped to one taxon
///
/// Empty scope lists and a missing window mean "unconstrained".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffusionRule {
    pub id: i32,
    pub taxon_id: i32,
    #[serde(default)]
    pub areas: Vec<RuleArea>,
    #[serde(default)]
    pub activity_ids: Vec<i32>,
    #[serde(default)]
    pub stage_ids: Vec<i32>,
    #[serde(default)]
    pub window: Option<RecurringWindow>,
    /// Rule no longer applies after this date
    #[serde(default)]
    pub expire_date: Option<NaiveDate>,
    /// Grid size the coordinates are generalized to
    #[serde(default)]
    pub precision_meters: Option<u32>,
}
