//! Working-days query and response models.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use shared::BankHoliday;

/// Query parameters for a working-days lookup.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkingDaysQuery {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// A bank holiday inside the requested range.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct BankHolidayResponse {
    pub date: NaiveDate,
    pub name: String,
    pub substitute: bool,
}

impl From<BankHoliday> for BankHolidayResponse {
    fn from(holiday: BankHoliday) -> Self {
        Self {
            date: holiday.date,
            name: holiday.name.to_string(),
            substitute: holiday.substitute,
        }
    }
}

/// Working-day breakdown of an inclusive date range.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkingDaysResponse {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub working_days: u32,
    pub has_working_days: bool,
    pub bank_holidays: Vec<BankHolidayResponse>,
}
