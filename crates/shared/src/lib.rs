//! Shared utilities and common types for the Practice Hub backend.
//!
//! This crate provides pure functionality used across the other crates:
//! - UK working-day and bank holiday calculation
//! - Email template rendering
//! - Common validation logic

pub mod template;
pub mod validation;
pub mod working_days;

pub use working_days::{
    bank_holidays, bank_holidays_between, count_working_days, has_working_days, is_bank_holiday,
    is_working_day, BankHoliday, WorkingDaysError,
};
