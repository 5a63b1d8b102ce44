//! Repository implementations for database operations.

pub mod email_queue;
pub mod notification_preference;

pub use email_queue::EmailQueueRepository;
pub use notification_preference::NotificationPreferenceRepository;

use domain::services::StoreError;

pub(crate) fn store_error(err: sqlx::Error) -> StoreError {
    StoreError::Database(err.to_string())
}
