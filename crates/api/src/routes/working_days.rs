//! Working-days endpoint.

use axum::{extract::rejection::QueryRejection, extract::Query, Json};
use chrono::NaiveDate;
use domain::models::{WorkingDaysQuery, WorkingDaysResponse};
use shared::{bank_holidays_between, count_working_days};

use crate::error::ApiError;

/// Widest range accepted, in days.
pub const MAX_RANGE_DAYS: i64 = 3660;

fn check_span(start: NaiveDate, end: NaiveDate) -> Result<(), ApiError> {
    if (end - start).num_days() > MAX_RANGE_DAYS {
        return Err(ApiError::Validation(format!(
            "Date range must not exceed {} days",
            MAX_RANGE_DAYS
        )));
    }
    Ok(())
}

/// Count UK working days in an inclusive date range.
///
/// GET /api/v1/working-days?start_date=2025-06-02&end_date=2025-06-08
pub async fn get_working_days(
    query: Result<Query<WorkingDaysQuery>, QueryRejection>,
) -> Result<Json<WorkingDaysResponse>, ApiError> {
    let Query(WorkingDaysQuery {
        start_date,
        end_date,
    }) = query?;

    check_span(start_date, end_date)?;
    let working_days = count_working_days(start_date, end_date)?;
    let bank_holidays = bank_holidays_between(start_date, end_date)?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(WorkingDaysResponse {
        start_date,
        end_date,
        working_days,
        has_working_days: working_days > 0,
        bank_holidays,
    }))
}
