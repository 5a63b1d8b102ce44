//! HTTP route handlers.

pub mod health;
pub mod working_days;
