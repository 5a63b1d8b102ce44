//! Database entity definitions.

pub mod email_queue;
pub mod user_settings;

pub use email_queue::{EmailQueueEntity, EmailQueueStats, EmailStatusCountEntity, EmailStatusDb};
pub use user_settings::UserSettingsEntity;
