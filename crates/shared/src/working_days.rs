//! UK working-day arithmetic.
//!
//! Counts Monday-Friday dates that are not England & Wales bank holidays.
//! Holidays are derived per calendar year with no external data:
//! - New Year's Day, Christmas Day, Boxing Day (fixed, substituted when they
//!   land on a weekend)
//! - Good Friday and Easter Monday (from the Gregorian Easter date)
//! - Early May, Spring and Summer bank holidays (first/last Monday rules)

use std::collections::{BTreeSet, HashMap};

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use thiserror::Error;

/// Errors returned by range-based working-day queries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkingDaysError {
    #[error("Start date {start} is after end date {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
}

/// An observed bank holiday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankHoliday {
    pub date: NaiveDate,
    pub name: &'static str,
    /// True when `date` is a weekday standing in for a weekend holiday.
    pub substitute: bool,
}

/// Fixed-date holidays subject to weekend substitution, in calendar order.
const FIXED_HOLIDAYS: [(u32, u32, &str); 3] = [
    (1, 1, "New Year's Day"),
    (12, 25, "Christmas Day"),
    (12, 26, "Boxing Day"),
];

/// Easter Sunday for the given year (Gregorian calendar).
///
/// Anonymous Gregorian algorithm (Meeus/Jones/Butcher).
pub fn easter_sunday(year: i32) -> NaiveDate {
    let a = year.rem_euclid(19);
    let b = year.div_euclid(100);
    let c = year.rem_euclid(100);
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;

    // month is always 3 or 4 and day 1..=31 for valid input
    ymd(year, month as u32, day as u32)
}

/// All observed bank holidays for `year`, sorted by date.
pub fn bank_holidays(year: i32) -> Vec<BankHoliday> {
    let easter = easter_sunday(year);

    let mut holidays = vec![
        BankHoliday {
            date: easter - Duration::days(2),
            name: "Good Friday",
            substitute: false,
        },
        BankHoliday {
            date: easter + Duration::days(1),
            name: "Easter Monday",
            substitute: false,
        },
        BankHoliday {
            date: first_weekday_of_month(year, 5, Weekday::Mon),
            name: "Early May bank holiday",
            substitute: false,
        },
        BankHoliday {
            date: last_weekday_of_month(year, 5, Weekday::Mon),
            name: "Spring bank holiday",
            substitute: false,
        },
        BankHoliday {
            date: last_weekday_of_month(year, 8, Weekday::Mon),
            name: "Summer bank holiday",
            substitute: false,
        },
    ];

    // Weekday occurrences of fixed holidays are taken before any substitute
    // is placed, so a substitute never lands on a real holiday.
    let mut taken: BTreeSet<NaiveDate> = holidays.iter().map(|h| h.date).collect();
    let mut on_weekend = Vec::new();

    for (month, day, name) in FIXED_HOLIDAYS {
        let date = ymd(year, month, day);
        if is_weekend(date) {
            on_weekend.push((date, name));
        } else {
            taken.insert(date);
            holidays.push(BankHoliday {
                date,
                name,
                substitute: false,
            });
        }
    }

    for (date, name) in on_weekend {
        let mut observed = date + Duration::days(1);
        while is_weekend(observed) || taken.contains(&observed) {
            observed += Duration::days(1);
        }
        taken.insert(observed);
        holidays.push(BankHoliday {
            date: observed,
            name,
            substitute: true,
        });
    }

    holidays.sort_by_key(|h| h.date);
    holidays
}

/// Whether `date` is an observed UK bank holiday.
///
/// Weekend dates are never holidays themselves; a holiday falling on a
/// weekend is observed on its substitute weekday instead.
pub fn is_bank_holiday(date: NaiveDate) -> bool {
    bank_holidays(date.year()).iter().any(|h| h.date == date)
}

/// Whether `date` is a working day (Monday-Friday and not a bank holiday).
pub fn is_working_day(date: NaiveDate) -> bool {
    !is_weekend(date) && !is_bank_holiday(date)
}

/// Number of working days between `start` and `end`, both inclusive.
///
/// Returns [`WorkingDaysError::InvalidRange`] when `start > end`.
pub fn count_working_days(start: NaiveDate, end: NaiveDate) -> Result<u32, WorkingDaysError> {
    let mut calendar = HolidayCalendar::default();
    let count = days_in_range(start, end)?
        .filter(|date| calendar.is_working_day(*date))
        .count();
    Ok(count as u32)
}

/// Whether the inclusive range contains at least one working day.
///
/// Stops at the first working day found.
pub fn has_working_days(start: NaiveDate, end: NaiveDate) -> Result<bool, WorkingDaysError> {
    let mut calendar = HolidayCalendar::default();
    let found = days_in_range(start, end)?.any(|date| calendar.is_working_day(date));
    Ok(found)
}

/// Bank holidays observed within the inclusive range.
pub fn bank_holidays_between(
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<BankHoliday>, WorkingDaysError> {
    if start > end {
        return Err(WorkingDaysError::InvalidRange { start, end });
    }
    Ok((start.year()..=end.year())
        .flat_map(bank_holidays)
        .filter(|h| h.date >= start && h.date <= end)
        .collect())
}

/// Per-year holiday cache used while walking a range.
#[derive(Default)]
struct HolidayCalendar {
    years: HashMap<i32, BTreeSet<NaiveDate>>,
}

impl HolidayCalendar {
    fn is_working_day(&mut self, date: NaiveDate) -> bool {
        if is_weekend(date) {
            return false;
        }
        let holidays = self
            .years
            .entry(date.year())
            .or_insert_with(|| bank_holidays(date.year()).into_iter().map(|h| h.date).collect());
        !holidays.contains(&date)
    }
}

fn days_in_range(
    start: NaiveDate,
    end: NaiveDate,
) -> Result<impl Iterator<Item = NaiveDate>, WorkingDaysError> {
    if start > end {
        return Err(WorkingDaysError::InvalidRange { start, end });
    }
    Ok(start.iter_days().take_while(move |date| *date <= end))
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

fn first_weekday_of_month(year: i32, month: u32, weekday: Weekday) -> NaiveDate {
    let first = ymd(year, month, 1);
    let offset = (7 + weekday.num_days_from_monday() - first.weekday().num_days_from_monday()) % 7;
    first + Duration::days(offset as i64)
}

fn last_weekday_of_month(year: i32, month: u32, weekday: Weekday) -> NaiveDate {
    let next_month = if month == 12 {
        ymd(year + 1, 1, 1)
    } else {
        ymd(year, month + 1, 1)
    };
    let last = next_month - Duration::days(1);
    let offset = (7 + last.weekday().num_days_from_monday() - weekday.num_days_from_monday()) % 7;
    last - Duration::days(offset as i64)
}

/// Callers pass only first-of-month, fixed holiday or computed Easter dates,
/// which exist in every year; only years beyond chrono's range fall back to
/// `NaiveDate::MIN`.
fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    let date = NaiveDate::from_ymd_opt(year, month, day);
    debug_assert!(
        date.is_some() || year.abs() > 200_000,
        "invalid calendar date {}-{}-{}",
        year,
        month,
        day
    );
    date.unwrap_or(NaiveDate::MIN)
}
