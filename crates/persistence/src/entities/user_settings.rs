//! User settings entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::NotificationSettings;
use sqlx::FromRow;
use uuid::Uuid;

/// Database row mapping for the user_settings table.
#[derive(Debug, Clone, FromRow)]
pub struct UserSettingsEntity {
    pub user_id: Uuid,
    pub email_notifications: bool,
    pub in_app_notifications: bool,
    pub task_assigned: bool,
    pub task_mention: bool,
    pub task_reassigned: bool,
    pub deadline_approaching: bool,
    pub approval_needed: bool,
    pub client_message: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<UserSettingsEntity> for NotificationSettings {
    fn from(entity: UserSettingsEntity) -> Self {
        Self {
            email_notifications: entity.email_notifications,
            in_app_notifications: entity.in_app_notifications,
            task_assigned: entity.task_assigned,
            task_mention: entity.task_mention,
            task_reassigned: entity.task_reassigned,
            deadline_approaching: entity.deadline_approaching,
            approval_needed: entity.approval_needed,
            client_message: entity.client_message,
        }
    }
}
