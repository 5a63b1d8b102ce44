//! Email queue entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::{EmailQueueEntry, EmailStatus};
use sqlx::FromRow;
use uuid::Uuid;

/// Database enum for email_status that maps to PostgreSQL enum type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "email_status", rename_all = "lowercase")]
pub enum EmailStatusDb {
    Pending,
    Sent,
    Failed,
    Bounced,
}

impl From<EmailStatusDb> for EmailStatus {
    fn from(db: EmailStatusDb) -> Self {
        match db {
            EmailStatusDb::Pending => EmailStatus::Pending,
            EmailStatusDb::Sent => EmailStatus::Sent,
            EmailStatusDb::Failed => EmailStatus::Failed,
            EmailStatusDb::Bounced => EmailStatus::Bounced,
        }
    }
}

impl From<EmailStatus> for EmailStatusDb {
    fn from(status: EmailStatus) -> Self {
        match status {
            EmailStatus::Pending => EmailStatusDb::Pending,
            EmailStatus::Sent => EmailStatusDb::Sent,
            EmailStatus::Failed => EmailStatusDb::Failed,
            EmailStatus::Bounced => EmailStatusDb::Bounced,
        }
    }
}

/// Database row mapping for the email_queue table.
#[derive(Debug, Clone, FromRow)]
pub struct EmailQueueEntity {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub email_template_id: Option<Uuid>,
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    pub subject: String,
    pub body_html: String,
    pub body_text: Option<String>,
    pub variables: Option<serde_json::Value>,
    pub status: EmailStatusDb,
    pub attempts: i32,
    pub max_attempts: i32,
    pub send_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<EmailQueueEntity> for EmailQueueEntry {
    fn from(entity: EmailQueueEntity) -> Self {
        Self {
            id: entity.id,
            tenant_id: entity.tenant_id,
            email_template_id: entity.email_template_id,
            recipient_email: entity.recipient_email,
            recipient_name: entity.recipient_name,
            subject: entity.subject,
            body_html: entity.body_html,
            body_text: entity.body_text,
            variables: entity.variables,
            status: entity.status.into(),
            attempts: entity.attempts,
            max_attempts: entity.max_attempts,
            send_at: entity.send_at,
            error_message: entity.error_message,
            sent_at: entity.sent_at,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }
    }
}

/// Row count per status, from `GROUP BY status`.
#[derive(Debug, Clone, FromRow)]
pub struct EmailStatusCountEntity {
    pub status: EmailStatusDb,
    pub count: i64,
}

/// Number of queue rows in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmailQueueStats {
    pub pending: i64,
    pub sent: i64,
    pub failed: i64,
    pub bounced: i64,
}

impl FromIterator<EmailStatusCountEntity> for EmailQueueStats {
    fn from_iter<I: IntoIterator<Item = EmailStatusCountEntity>>(rows: I) -> Self {
        let mut stats = Self::default();
        for row in rows {
            match row.status {
                EmailStatusDb::Pending => stats.pending = row.count,
                EmailStatusDb::Sent => stats.sent = row.count,
                EmailStatusDb::Failed => stats.failed = row.count,
                EmailStatusDb::Bounced => stats.bounced = row.count,
            }
        }
        stats
    }
}
