//! Email queue domain model.
//!
//! A queue entry is one outbound email tracked through
//! `pending -> sent | bounced | failed`, with transient failures re-armed as
//! `pending` until the attempt budget runs out. Rows are never deleted.

use std::fmt;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Default attempt budget for a queued email.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Delay before the first retry; later retries multiply by [`RETRY_BACKOFF_FACTOR`].
pub const RETRY_BASE_DELAY_SECS: i64 = 5 * 60;

/// Growth factor between consecutive retry delays.
pub const RETRY_BACKOFF_FACTOR: i64 = 3;

/// Error recorded when the recipient opted out of email notifications.
pub const NOTIFICATIONS_DISABLED_ERROR: &str = "User has disabled email notifications";

/// Delay before retrying an email that has failed `attempt` times (0-indexed).
///
/// 5 min x 3^attempt: 5 min, 15 min, 45 min, ...
pub fn retry_delay(attempt: i32) -> Duration {
    let exponent = attempt.max(0) as u32;
    let secs = RETRY_BACKOFF_FACTOR
        .checked_pow(exponent)
        .and_then(|factor| factor.checked_mul(RETRY_BASE_DELAY_SECS))
        .unwrap_or(i64::MAX / 1000);
    Duration::try_seconds(secs).unwrap_or(Duration::MAX)
}

/// Delivery status of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailStatus {
    Pending,
    Sent,
    Failed,
    Bounced,
}

impl EmailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailStatus::Pending => "pending",
            EmailStatus::Sent => "sent",
            EmailStatus::Failed => "failed",
            EmailStatus::Bounced => "bounced",
        }
    }

    /// Terminal entries are never selected for processing again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EmailStatus::Pending)
    }
}

impl fmt::Display for EmailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmailStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EmailStatus::Pending),
            "sent" => Ok(EmailStatus::Sent),
            "failed" => Ok(EmailStatus::Failed),
            "bounced" => Ok(EmailStatus::Bounced),
            other => Err(format!("Unknown email status: {}", other)),
        }
    }
}

/// One persisted outbound email.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EmailQueueEntry {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub email_template_id: Option<Uuid>,
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    pub subject: String,
    pub body_html: String,
    pub body_text: Option<String>,
    pub variables: Option<serde_json::Value>,
    pub status: EmailStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub send_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmailQueueEntry {
    /// Whether another transient failure may still be retried.
    pub fn can_retry(&self) -> bool {
        self.attempts + 1 < self.max_attempts
    }
}

/// Request to add an email to the queue.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct QueueEmailRequest {
    pub tenant_id: Uuid,

    pub email_template_id: Option<Uuid>,

    #[validate(custom(function = "shared::validation::validate_email_address"))]
    pub recipient_email: String,

    #[validate(length(max = 255, message = "Recipient name must be at most 255 characters"))]
    pub recipient_name: Option<String>,

    #[validate(length(min = 1, max = 998, message = "Subject must be 1-998 characters"))]
    pub subject: String,

    #[validate(length(min = 1, message = "HTML body must not be empty"))]
    pub body_html: String,

    pub body_text: Option<String>,

    pub variables: Option<serde_json::Value>,

    /// Earliest send time; defaults to now.
    pub send_at: Option<DateTime<Utc>>,

    #[validate(custom(function = "shared::validation::validate_max_attempts"))]
    pub max_attempts: Option<i32>,
}

impl QueueEmailRequest {
    /// Minimal request with defaults for everything optional.
    pub fn new(
        tenant_id: Uuid,
        recipient_email: impl Into<String>,
        subject: impl Into<String>,
        body_html: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id,
            email_template_id: None,
            recipient_email: recipient_email.into(),
            recipient_name: None,
            subject: subject.into(),
            body_html: body_html.into(),
            body_text: None,
            variables: None,
            send_at: None,
            max_attempts: None,
        }
    }
}

/// Row values for inserting a new pending entry.
#[derive(Debug, Clone)]
pub struct NewEmailQueueEntry {
    pub tenant_id: Uuid,
    pub email_template_id: Option<Uuid>,
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    pub subject: String,
    pub body_html: String,
    pub body_text: Option<String>,
    pub variables: Option<serde_json::Value>,
    pub send_at: DateTime<Utc>,
    pub max_attempts: i32,
}

impl NewEmailQueueEntry {
    pub fn from_request(request: &QueueEmailRequest, now: DateTime<Utc>) -> Self {
        Self {
            tenant_id: request.tenant_id,
            email_template_id: request.email_template_id,
            recipient_email: request.recipient_email.clone(),
            recipient_name: request.recipient_name.clone(),
            subject: request.subject.clone(),
            body_html: request.body_html.clone(),
            body_text: request.body_text.clone(),
            variables: request.variables.clone(),
            send_at: request.send_at.unwrap_or(now),
            max_attempts: request.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
        }
    }
}

/// Options for one processing pass.
#[derive(Debug, Clone)]
pub struct QueueProcessorOptions {
    /// Maximum rows claimed per pass.
    pub batch_size: i64,
    /// Skip recipients who disabled email notifications.
    pub respect_notification_preferences: bool,
    /// Pause between individual sends.
    pub send_delay: StdDuration,
    /// How far a claimed row's `send_at` is pushed so other workers skip it.
    pub claim_lease: Duration,
}

impl Default for QueueProcessorOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            respect_notification_preferences: true,
            send_delay: StdDuration::from_millis(100),
            claim_lease: Duration::minutes(5),
        }
    }
}

/// Outcome of processing a single entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    Sent,
    Bounced,
    Failed,
    Retrying,
    /// Finished or re-claimed by another pass; nothing was recorded.
    Skipped,
}

impl RowOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowOutcome::Sent => "sent",
            RowOutcome::Bounced => "bounced",
            RowOutcome::Failed => "failed",
            RowOutcome::Retrying => "retrying",
            RowOutcome::Skipped => "skipped",
        }
    }
}

/// Aggregate counts for one processing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct QueueSummary {
    pub processed: u32,
    pub sent: u32,
    /// Terminal failures other than bounces.
    pub failed: u32,
    pub bounced: u32,
    pub retrying: u32,
    /// Claimed rows left to another pass; not counted in `processed`.
    pub skipped: u32,
}

impl QueueSummary {
    pub fn record(&mut self, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Sent => self.sent += 1,
            RowOutcome::Bounced => self.bounced += 1,
            RowOutcome::Failed => self.failed += 1,
            RowOutcome::Retrying => self.retrying += 1,
            RowOutcome::Skipped => {
                self.skipped += 1;
                return;
            }
        }
        self.processed += 1;
    }
}
