//! Domain layer for the Practice Hub backend.
//!
//! This crate contains:
//! - Domain models (email queue entries, templates, notification settings)
//! - The email queue processor and the store/transport traits it drives
//! - Domain error types

pub mod models;
pub mod services;
