//! Notification preference repository.
//!
//! Resolves a queued email's recipient address to a user of the same tenant
//! and reads that user's notification settings.

use async_trait::async_trait;
use domain::models::NotificationSettings;
use domain::services::{RecipientPreferences, StoreError};
use sqlx::PgPool;
use uuid::Uuid;

use super::store_error;
use crate::entities::UserSettingsEntity;
use crate::metrics::QueryTimer;

/// Repository for reading user notification settings.
#[derive(Clone)]
pub struct NotificationPreferenceRepository {
    pool: PgPool,
}

impl NotificationPreferenceRepository {
    /// Creates a new NotificationPreferenceRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find the settings of the tenant user with this email (case-insensitive).
    ///
    /// `None` when no such user exists or the user has no settings row.
    pub async fn find_by_recipient(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<UserSettingsEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_settings_by_recipient");
        let result = sqlx::query_as::<_, UserSettingsEntity>(
            r#"
            SELECT us.user_id, us.email_notifications, us.in_app_notifications,
                   us.task_assigned, us.task_mention, us.task_reassigned,
                   us.deadline_approaching, us.approval_needed, us.client_message,
                   us.updated_at
            FROM users u
            JOIN user_settings us ON us.user_id = u.id
            WHERE u.tenant_id = $1 AND lower(u.email) = lower($2)
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }
}

#[async_trait]
impl RecipientPreferences for NotificationPreferenceRepository {
    async fn email_notifications_enabled(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<bool>, StoreError> {
        let settings = self
            .find_by_recipient(tenant_id, email)
            .await
            .map_err(store_error)?;
        Ok(settings.map(|entity| NotificationSettings::from(entity).allows_email()))
    }
}
