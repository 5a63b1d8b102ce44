//! Domain models for Practice Hub.

pub mod email_queue;
pub mod email_template;
pub mod notification_settings;
pub mod working_days;

pub use email_queue::{
    EmailQueueEntry, EmailStatus, NewEmailQueueEntry, QueueEmailRequest, QueueProcessorOptions,
    QueueSummary, RowOutcome,
};
pub use email_template::EmailTemplate;
pub use notification_settings::{NotificationChannel, NotificationSettings, NotificationType};
pub use working_days::{BankHolidayResponse, WorkingDaysQuery, WorkingDaysResponse};
