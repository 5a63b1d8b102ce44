//! Email queue processor.
//!
//! Drains due `pending` rows from the queue store, honours recipient opt-outs,
//! hands each email to the transport and records the outcome on the row:
//! - success: `sent`
//! - transport validation error (bad address): `bounced`, never retried
//! - any other transport error: re-armed as `pending` with exponential
//!   backoff until the attempt budget is spent, then `failed`
//! - recipient disabled email notifications: `failed`, transport not called
//!
//! Rows are processed one at a time with a pause between sends so the
//! provider's rate limit is respected. Every transition is written
//! immediately; only a failure to claim the batch escapes to the caller.
//!
//! A claim leases the whole batch, but a long pass can outlive that lease.
//! Each row's lease is therefore renewed right before its send; a row
//! re-claimed by another pass in the meantime is skipped, not sent twice.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::models::email_queue::{
    retry_delay, EmailQueueEntry, NewEmailQueueEntry, QueueEmailRequest, QueueProcessorOptions,
    QueueSummary, RowOutcome, NOTIFICATIONS_DISABLED_ERROR,
};

/// Errors raised by a queue or preference store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Email queue entry not found: {0}")]
    NotFound(Uuid),
}

/// Errors raised by an email transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The provider rejected the message itself (malformed or undeliverable address).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Network failure, timeout, rate limit or provider-side error.
    #[error("{0}")]
    Transient(String),
}

/// Errors escaping the processor.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Email queue store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid email request: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Message handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub from: String,
    pub to: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
}

impl OutboundEmail {
    pub fn from_entry(entry: &EmailQueueEntry, from: &str) -> Self {
        Self {
            from: from.to_string(),
            to: entry.recipient_email.clone(),
            to_name: entry.recipient_name.clone(),
            subject: entry.subject.clone(),
            html: entry.body_html.clone(),
            text: entry.body_text.clone(),
        }
    }
}

/// Persistent queue of outbound emails.
#[async_trait::async_trait]
pub trait EmailQueueStore: Send + Sync {
    /// Claims up to `limit` pending rows with `send_at <= now`, oldest first.
    ///
    /// Claimed rows stay `pending` but their `send_at` moves to `now + lease`
    /// atomically with the selection, so an overlapping pass cannot claim
    /// them and a crashed pass releases them once the lease lapses.
    async fn claim_due(
        &self,
        limit: i64,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Vec<EmailQueueEntry>, StoreError>;

    /// Pushes a claimed row's lease to `lease_until`, provided the row is
    /// still `pending` and still leased until `held_until`.
    ///
    /// `false` means another pass re-claimed or finished the row.
    async fn renew_lease(
        &self,
        id: Uuid,
        held_until: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn mark_sent(&self, id: Uuid, attempts: i32, at: DateTime<Utc>)
        -> Result<(), StoreError>;

    async fn mark_bounced(
        &self,
        id: Uuid,
        attempts: i32,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn mark_failed(
        &self,
        id: Uuid,
        attempts: i32,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Keeps the row `pending` and makes it due again at `next_send_at`.
    async fn schedule_retry(
        &self,
        id: Uuid,
        attempts: i32,
        next_send_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError>;

    async fn enqueue(&self, entry: NewEmailQueueEntry) -> Result<EmailQueueEntry, StoreError>;
}

/// Lookup of a recipient's email-notification switch.
#[async_trait::async_trait]
pub trait RecipientPreferences: Send + Sync {
    /// `None` when the address is not a user of the tenant or has no settings.
    async fn email_notifications_enabled(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<bool>, StoreError>;
}

/// Outbound email provider.
#[async_trait::async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<(), TransportError>;
}

/// Processes the email queue using injected collaborators.
#[derive(Clone)]
pub struct EmailQueueProcessor {
    store: Arc<dyn EmailQueueStore>,
    preferences: Arc<dyn RecipientPreferences>,
    transport: Arc<dyn EmailTransport>,
    from_address: String,
}

impl EmailQueueProcessor {
    pub fn new(
        store: Arc<dyn EmailQueueStore>,
        preferences: Arc<dyn RecipientPreferences>,
        transport: Arc<dyn EmailTransport>,
        from_address: impl Into<String>,
    ) -> Self {
        Self {
            store,
            preferences,
            transport,
            from_address: from_address.into(),
        }
    }

    /// Validates and enqueues an email as `pending` with zero attempts.
    pub async fn queue_email(
        &self,
        request: &QueueEmailRequest,
    ) -> Result<EmailQueueEntry, QueueError> {
        request.validate()?;

        let entry = self
            .store
            .enqueue(NewEmailQueueEntry::from_request(request, Utc::now()))
            .await?;

        info!(
            email_id = %entry.id,
            tenant_id = %entry.tenant_id,
            send_at = %entry.send_at,
            "Email queued"
        );

        Ok(entry)
    }

    /// Runs one processing pass over due emails.
    pub async fn process(&self, options: &QueueProcessorOptions) -> Result<QueueSummary, QueueError> {
        let started = Instant::now();
        let now = Utc::now();
        let held_until = now + options.claim_lease;
        let batch = self
            .store
            .claim_due(options.batch_size, now, options.claim_lease)
            .await?;

        if batch.is_empty() {
            debug!("No pending emails due");
            return Ok(QueueSummary::default());
        }

        info!(count = batch.len(), "Processing pending emails");

        let mut summary = QueueSummary::default();
        let last = batch.len() - 1;

        for (index, entry) in batch.iter().enumerate() {
            let outcome = self.process_entry(entry, held_until, options).await;
            counter!("email_queue_emails_total", "outcome" => outcome.as_str()).increment(1);
            summary.record(outcome);

            if index < last && !options.send_delay.is_zero() {
                tokio::time::sleep(options.send_delay).await;
            }
        }

        histogram!("email_queue_batch_duration_seconds").record(started.elapsed().as_secs_f64());

        info!(
            processed = summary.processed,
            sent = summary.sent,
            failed = summary.failed,
            bounced = summary.bounced,
            retrying = summary.retrying,
            skipped = summary.skipped,
            "Email queue processing complete"
        );

        Ok(summary)
    }

    async fn process_entry(
        &self,
        entry: &EmailQueueEntry,
        held_until: DateTime<Utc>,
        options: &QueueProcessorOptions,
    ) -> RowOutcome {
        match self.deliver(entry, held_until, options).await {
            Ok(outcome) => outcome,
            Err(StoreError::NotFound(_)) => {
                // Guarded write matched nothing: another pass finished the row.
                warn!(
                    email_id = %entry.id,
                    tenant_id = %entry.tenant_id,
                    "Email already finished by another pass"
                );
                RowOutcome::Skipped
            }
            Err(e) => {
                // The row keeps its lease and becomes due again when it lapses.
                error!(
                    email_id = %entry.id,
                    tenant_id = %entry.tenant_id,
                    error = %e,
                    "Failed to record email queue transition"
                );
                RowOutcome::Failed
            }
        }
    }

    async fn deliver(
        &self,
        entry: &EmailQueueEntry,
        held_until: DateTime<Utc>,
        options: &QueueProcessorOptions,
    ) -> Result<RowOutcome, StoreError> {
        let renewed = self
            .store
            .renew_lease(entry.id, held_until, Utc::now() + options.claim_lease)
            .await?;
        if !renewed {
            debug!(
                email_id = %entry.id,
                tenant_id = %entry.tenant_id,
                "Lease taken over by another pass, email skipped"
            );
            return Ok(RowOutcome::Skipped);
        }

        if options.respect_notification_preferences && !self.recipient_accepts_email(entry).await
        {
            self.store
                .mark_failed(entry.id, entry.attempts, NOTIFICATIONS_DISABLED_ERROR, Utc::now())
                .await?;
            info!(
                email_id = %entry.id,
                tenant_id = %entry.tenant_id,
                "Recipient has disabled email notifications, email skipped"
            );
            return Ok(RowOutcome::Failed);
        }

        let email = OutboundEmail::from_entry(entry, &self.from_address);
        let attempts = entry.attempts + 1;

        match self.transport.send(&email).await {
            Ok(()) => {
                self.store.mark_sent(entry.id, attempts, Utc::now()).await?;
                debug!(email_id = %entry.id, attempts = attempts, "Email sent");
                Ok(RowOutcome::Sent)
            }
            Err(TransportError::Validation(message)) => {
                let reason = format!("Invalid email: {}", message);
                self.store
                    .mark_bounced(entry.id, attempts, &reason, Utc::now())
                    .await?;
                warn!(
                    email_id = %entry.id,
                    tenant_id = %entry.tenant_id,
                    error = %message,
                    "Email bounced"
                );
                Ok(RowOutcome::Bounced)
            }
            Err(TransportError::Transient(message)) if entry.can_retry() => {
                let next_send_at = Utc::now() + retry_delay(entry.attempts);
                self.store
                    .schedule_retry(entry.id, attempts, next_send_at, &message)
                    .await?;
                warn!(
                    email_id = %entry.id,
                    tenant_id = %entry.tenant_id,
                    attempts = attempts,
                    max_attempts = entry.max_attempts,
                    next_send_at = %next_send_at,
                    error = %message,
                    "Email delivery failed, retry scheduled"
                );
                Ok(RowOutcome::Retrying)
            }
            Err(TransportError::Transient(message)) => {
                let reason = format!("Max retries exceeded: {}", message);
                self.store
                    .mark_failed(entry.id, attempts, &reason, Utc::now())
                    .await?;
                error!(
                    email_id = %entry.id,
                    tenant_id = %entry.tenant_id,
                    attempts = attempts,
                    error = %message,
                    "Email delivery failed permanently"
                );
                Ok(RowOutcome::Failed)
            }
        }
    }

    /// Missing user, missing settings and lookup errors all allow the email.
    async fn recipient_accepts_email(&self, entry: &EmailQueueEntry) -> bool {
        match self
            .preferences
            .email_notifications_enabled(entry.tenant_id, &entry.recipient_email)
            .await
        {
            Ok(enabled) => enabled.unwrap_or(true),
            Err(e) => {
                warn!(
                    email_id = %entry.id,
                    tenant_id = %entry.tenant_id,
                    error = %e,
                    "Notification preference lookup failed, allowing email"
                );
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::email_queue::EmailStatus;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;

    #[derive(Default)]
    struct InMemoryStore {
        rows: Mutex<Vec<EmailQueueEntry>>,
    }

    impl InMemoryStore {
        fn get(&self, id: Uuid) -> EmailQueueEntry {
            self.rows
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.id == id)
                .cloned()
                .unwrap()
        }

        /// Makes a row due now, as if its backoff had elapsed.
        fn make_due(&self, id: Uuid) {
            let mut rows = self.rows.lock().unwrap();
            let row = rows.iter_mut().find(|r| r.id == id).unwrap();
            row.send_at = Utc::now() - Duration::seconds(1);
        }

        /// Applies `f` to a pending row; like the SQL store, other rows are not found.
        fn update(
            &self,
            id: Uuid,
            f: impl FnOnce(&mut EmailQueueEntry),
        ) -> Result<(), StoreError> {
            let mut rows = self.rows.lock().unwrap();
            let row = rows
                .iter_mut()
                .find(|r| r.id == id && r.status == EmailStatus::Pending)
                .ok_or(StoreError::NotFound(id))?;
            f(row);
            row.updated_at = Utc::now();
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl EmailQueueStore for InMemoryStore {
        async fn claim_due(
            &self,
            limit: i64,
            now: DateTime<Utc>,
            lease: Duration,
        ) -> Result<Vec<EmailQueueEntry>, StoreError> {
            let mut rows = self.rows.lock().unwrap();
            let mut due: Vec<&mut EmailQueueEntry> = rows
                .iter_mut()
                .filter(|r| r.status == EmailStatus::Pending && r.send_at <= now)
                .collect();
            due.sort_by_key(|r| r.send_at);
            due.truncate(limit.max(0) as usize);

            let claimed = due.iter().map(|r| (**r).clone()).collect();
            for row in due {
                row.send_at = now + lease;
            }
            Ok(claimed)
        }

        async fn renew_lease(
            &self,
            id: Uuid,
            held_until: DateTime<Utc>,
            lease_until: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            let mut rows = self.rows.lock().unwrap();
            match rows.iter_mut().find(|r| {
                r.id == id && r.status == EmailStatus::Pending && r.send_at == held_until
            }) {
                Some(row) => {
                    row.send_at = lease_until;
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn mark_sent(
            &self,
            id: Uuid,
            attempts: i32,
            at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.update(id, |row| {
                row.status = EmailStatus::Sent;
                row.attempts = attempts;
                row.sent_at = Some(at);
                row.error_message = None;
            })
        }

        async fn mark_bounced(
            &self,
            id: Uuid,
            attempts: i32,
            error: &str,
            at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.update(id, |row| {
                row.status = EmailStatus::Bounced;
                row.attempts = attempts;
                row.error_message = Some(error.to_string());
                row.sent_at = Some(at);
            })
        }

        async fn mark_failed(
            &self,
            id: Uuid,
            attempts: i32,
            error: &str,
            at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.update(id, |row| {
                row.status = EmailStatus::Failed;
                row.attempts = attempts;
                row.error_message = Some(error.to_string());
                row.sent_at = Some(at);
            })
        }

        async fn schedule_retry(
            &self,
            id: Uuid,
            attempts: i32,
            next_send_at: DateTime<Utc>,
            error: &str,
        ) -> Result<(), StoreError> {
            self.update(id, |row| {
                row.attempts = attempts;
                row.send_at = next_send_at;
                row.error_message = Some(error.to_string());
            })
        }

        async fn enqueue(&self, new: NewEmailQueueEntry) -> Result<EmailQueueEntry, StoreError> {
            let now = Utc::now();
            let entry = EmailQueueEntry {
                id: Uuid::new_v4(),
                tenant_id: new.tenant_id,
                email_template_id: new.email_template_id,
                recipient_email: new.recipient_email,
                recipient_name: new.recipient_name,
                subject: new.subject,
                body_html: new.body_html,
                body_text: new.body_text,
                variables: new.variables,
                status: EmailStatus::Pending,
                attempts: 0,
                max_attempts: new.max_attempts,
                send_at: new.send_at,
                error_message: None,
                sent_at: None,
                created_at: now,
                updated_at: now,
            };
            self.rows.lock().unwrap().push(entry.clone());
            Ok(entry)
        }
    }

    #[derive(Default)]
    struct StaticPreferences {
        settings: HashMap<String, bool>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl RecipientPreferences for StaticPreferences {
        async fn email_notifications_enabled(
            &self,
            _tenant_id: Uuid,
            email: &str,
        ) -> Result<Option<bool>, StoreError> {
            if self.fail {
                return Err(StoreError::Database("connection reset".to_string()));
            }
            Ok(self.settings.get(email).copied())
        }
    }

    /// Replays scripted results, then succeeds.
    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<(), TransportError>>>,
        sent: Mutex<Vec<OutboundEmail>>,
    }

    impl ScriptedTransport {
        fn with_results(results: Vec<Result<(), TransportError>>) -> Self {
            Self {
                script: Mutex::new(results.into()),
                sent: Mutex::default(),
            }
        }

        fn calls(&self) -> Vec<OutboundEmail> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl EmailTransport for ScriptedTransport {
        async fn send(&self, email: &OutboundEmail) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(email.clone());
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
    }

    struct Harness {
        store: Arc<InMemoryStore>,
        transport: Arc<ScriptedTransport>,
        processor: EmailQueueProcessor,
        tenant_id: Uuid,
    }

    fn harness(preferences: StaticPreferences, transport: ScriptedTransport) -> Harness {
        let store = Arc::new(InMemoryStore::default());
        let transport = Arc::new(transport);
        let processor = EmailQueueProcessor::new(
            store.clone(),
            Arc::new(preferences),
            transport.clone(),
            "Practice Hub <noreply@example.com>",
        );
        Harness {
            store,
            transport,
            processor,
            tenant_id: Uuid::new_v4(),
        }
    }

    fn options() -> QueueProcessorOptions {
        QueueProcessorOptions {
            send_delay: StdDuration::ZERO,
            ..QueueProcessorOptions::default()
        }
    }

    async fn queue(h: &Harness, recipient: &str) -> EmailQueueEntry {
        let request = QueueEmailRequest::new(h.tenant_id, recipient, "Subject", "<p>Body</p>");
        h.processor.queue_email(&request).await.unwrap()
    }

    #[tokio::test]
    async fn test_empty_queue_returns_zero_summary() {
        let h = harness(StaticPreferences::default(), ScriptedTransport::default());
        let summary = h.processor.process(&options()).await.unwrap();
        assert_eq!(summary, QueueSummary::default());
        assert!(h.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_successful_send() {
        let h = harness(StaticPreferences::default(), ScriptedTransport::default());
        let entry = queue(&h, "client@example.com").await;

        let summary = h.processor.process(&options()).await.unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.sent, 1);
        let row = h.store.get(entry.id);
        assert_eq!(row.status, EmailStatus::Sent);
        assert!(row.sent_at.is_some());
        assert!(row.error_message.is_none());

        let calls = h.transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].to, "client@example.com");
        assert_eq!(calls[0].from, "Practice Hub <noreply@example.com>");
        assert_eq!(calls[0].html, "<p>Body</p>");
    }

    #[tokio::test]
    async fn test_validation_error_bounces_without_retry() {
        let transport = ScriptedTransport::with_results(vec![Err(TransportError::Validation(
            "Invalid `to` field".to_string(),
        ))]);
        let h = harness(StaticPreferences::default(), transport);
        let entry = queue(&h, "nobody@example.invalid").await;

        let summary = h.processor.process(&options()).await.unwrap();

        assert_eq!(summary.bounced, 1);
        assert_eq!(summary.retrying, 0);
        let row = h.store.get(entry.id);
        assert_eq!(row.status, EmailStatus::Bounced);
        assert_eq!(
            row.error_message.as_deref(),
            Some("Invalid email: Invalid `to` field")
        );
        assert!(row.sent_at.is_some());
    }

    #[tokio::test]
    async fn test_transient_failures_retry_then_fail() {
        let transport = ScriptedTransport::with_results(vec![
            Err(TransportError::Transient("connection reset".to_string())),
            Err(TransportError::Transient("502 Bad Gateway".to_string())),
            Err(TransportError::Transient("timeout".to_string())),
        ]);
        let h = harness(StaticPreferences::default(), transport);
        let entry = queue(&h, "client@example.com").await;
        assert_eq!(entry.max_attempts, 3);

        let before = Utc::now();
        let first = h.processor.process(&options()).await.unwrap();
        assert_eq!(first.retrying, 1);
        let row = h.store.get(entry.id);
        assert_eq!(row.status, EmailStatus::Pending);
        assert_eq!(row.attempts, 1);
        assert_eq!(row.error_message.as_deref(), Some("connection reset"));
        assert!(row.send_at >= before + Duration::minutes(5));
        assert!(row.send_at <= Utc::now() + Duration::minutes(5));

        // Not due yet: a pass right away leaves it alone
        let idle = h.processor.process(&options()).await.unwrap();
        assert_eq!(idle.processed, 0);

        h.store.make_due(entry.id);
        let second = h.processor.process(&options()).await.unwrap();
        assert_eq!(second.retrying, 1);
        let row = h.store.get(entry.id);
        assert_eq!(row.status, EmailStatus::Pending);
        assert_eq!(row.attempts, 2);
        assert!(row.send_at >= Utc::now() + Duration::minutes(14));

        h.store.make_due(entry.id);
        let third = h.processor.process(&options()).await.unwrap();
        assert_eq!(third.failed, 1);
        assert_eq!(third.retrying, 0);
        let row = h.store.get(entry.id);
        assert_eq!(row.status, EmailStatus::Failed);
        assert_eq!(row.attempts, 3);
        assert_eq!(
            row.error_message.as_deref(),
            Some("Max retries exceeded: timeout")
        );
        assert_eq!(h.transport.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_single_attempt_budget_fails_immediately() {
        let transport =
            ScriptedTransport::with_results(vec![Err(TransportError::Transient("503".into()))]);
        let h = harness(StaticPreferences::default(), transport);
        let mut request = QueueEmailRequest::new(h.tenant_id, "a@example.com", "S", "<p>B</p>");
        request.max_attempts = Some(1);
        let entry = h.processor.queue_email(&request).await.unwrap();

        let summary = h.processor.process(&options()).await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(h.store.get(entry.id).status, EmailStatus::Failed);
    }

    #[tokio::test]
    async fn test_terminal_rows_are_not_reprocessed() {
        let h = harness(StaticPreferences::default(), ScriptedTransport::default());
        let entry = queue(&h, "client@example.com").await;

        h.processor.process(&options()).await.unwrap();
        h.store.make_due(entry.id);
        let again = h.processor.process(&options()).await.unwrap();

        assert_eq!(again.processed, 0);
        assert_eq!(h.transport.calls().len(), 1);
        assert_eq!(h.store.get(entry.id).status, EmailStatus::Sent);
    }

    #[tokio::test]
    async fn test_disabled_preference_fails_without_sending() {
        let preferences = StaticPreferences {
            settings: HashMap::from([("staff@practice.co.uk".to_string(), false)]),
            fail: false,
        };
        let h = harness(preferences, ScriptedTransport::default());
        let entry = queue(&h, "staff@practice.co.uk").await;

        let summary = h.processor.process(&options()).await.unwrap();

        assert_eq!(summary.failed, 1);
        assert!(h.transport.calls().is_empty());
        let row = h.store.get(entry.id);
        assert_eq!(row.status, EmailStatus::Failed);
        assert_eq!(row.attempts, 0);
        assert_eq!(
            row.error_message.as_deref(),
            Some(NOTIFICATIONS_DISABLED_ERROR)
        );
    }

    #[tokio::test]
    async fn test_preferences_ignored_when_disabled_in_options() {
        let preferences = StaticPreferences {
            settings: HashMap::from([("staff@practice.co.uk".to_string(), false)]),
            fail: false,
        };
        let h = harness(preferences, ScriptedTransport::default());
        queue(&h, "staff@practice.co.uk").await;

        let opts = QueueProcessorOptions {
            respect_notification_preferences: false,
            ..options()
        };
        let summary = h.processor.process(&opts).await.unwrap();

        assert_eq!(summary.sent, 1);
    }

    #[tokio::test]
    async fn test_preference_lookup_fails_open() {
        let preferences = StaticPreferences {
            settings: HashMap::new(),
            fail: true,
        };
        let h = harness(preferences, ScriptedTransport::default());
        queue(&h, "client@example.com").await;

        let summary = h.processor.process(&options()).await.unwrap();

        assert_eq!(summary.sent, 1);
    }

    #[tokio::test]
    async fn test_unknown_recipient_and_enabled_preference_send() {
        let preferences = StaticPreferences {
            settings: HashMap::from([("staff@practice.co.uk".to_string(), true)]),
            fail: false,
        };
        let h = harness(preferences, ScriptedTransport::default());
        queue(&h, "staff@practice.co.uk").await;
        queue(&h, "external@example.com").await;

        let summary = h.processor.process(&options()).await.unwrap();

        assert_eq!(summary.sent, 2);
    }

    #[tokio::test]
    async fn test_batch_size_limits_claim() {
        let h = harness(StaticPreferences::default(), ScriptedTransport::default());
        for i in 0..5 {
            queue(&h, &format!("client{}@example.com", i)).await;
        }
        let opts = QueueProcessorOptions {
            batch_size: 3,
            ..options()
        };

        let first = h.processor.process(&opts).await.unwrap();
        let second = h.processor.process(&opts).await.unwrap();
        let third = h.processor.process(&opts).await.unwrap();

        assert_eq!(first.processed, 3);
        assert_eq!(second.processed, 2);
        assert_eq!(third.processed, 0);
    }

    #[tokio::test]
    async fn test_processes_oldest_first_and_skips_future() {
        let h = harness(StaticPreferences::default(), ScriptedTransport::default());
        let now = Utc::now();
        for (recipient, offset) in [
            ("second@example.com", -5),
            ("first@example.com", -30),
            ("future@example.com", 60),
        ] {
            let mut request = QueueEmailRequest::new(h.tenant_id, recipient, "S", "<p>B</p>");
            request.send_at = Some(now + Duration::minutes(offset));
            h.processor.queue_email(&request).await.unwrap();
        }

        let summary = h.processor.process(&options()).await.unwrap();

        assert_eq!(summary.processed, 2);
        let order: Vec<_> = h.transport.calls().into_iter().map(|e| e.to).collect();
        assert_eq!(order, vec!["first@example.com", "second@example.com"]);
    }

    #[tokio::test]
    async fn test_mixed_outcomes_summary() {
        let transport = ScriptedTransport::with_results(vec![
            Ok(()),
            Err(TransportError::Validation("bad address".into())),
            Err(TransportError::Transient("timeout".into())),
        ]);
        let h = harness(StaticPreferences::default(), transport);
        let now = Utc::now();
        for (i, recipient) in ["a@example.com", "b@example.com", "c@example.com"]
            .iter()
            .enumerate()
        {
            let mut request = QueueEmailRequest::new(h.tenant_id, *recipient, "S", "<p>B</p>");
            request.send_at = Some(now - Duration::minutes(10 - i as i64));
            h.processor.queue_email(&request).await.unwrap();
        }

        let summary = h.processor.process(&options()).await.unwrap();

        assert_eq!(
            summary,
            QueueSummary {
                processed: 3,
                sent: 1,
                failed: 0,
                bounced: 1,
                retrying: 1,
                skipped: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_overlapping_passes_do_not_double_send() {
        let h = harness(StaticPreferences::default(), ScriptedTransport::default());
        for i in 0..10 {
            queue(&h, &format!("client{}@example.com", i)).await;
        }
        let other = h.processor.clone();
        let opts = options();

        let (a, b) = tokio::join!(h.processor.process(&opts), other.process(&opts));

        assert_eq!(a.unwrap().sent + b.unwrap().sent, 10);
        assert_eq!(h.transport.calls().len(), 10);
    }

    /// Transport that takes a while per send.
    struct SlowTransport {
        delay: StdDuration,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl EmailTransport for SlowTransport {
        async fn send(&self, email: &OutboundEmail) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(email.to.clone());
            tokio::time::sleep(self.delay).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_pass_outliving_its_lease_does_not_double_send() {
        let store = Arc::new(InMemoryStore::default());
        let transport = Arc::new(SlowTransport {
            delay: StdDuration::from_millis(200),
            sent: Mutex::default(),
        });
        let processor = EmailQueueProcessor::new(
            store.clone(),
            Arc::new(StaticPreferences::default()),
            transport.clone(),
            "noreply@example.com",
        );
        let tenant_id = Uuid::new_v4();
        let now = Utc::now();
        for (i, recipient) in ["a@example.com", "b@example.com", "c@example.com"]
            .iter()
            .enumerate()
        {
            let mut request = QueueEmailRequest::new(tenant_id, *recipient, "S", "<p>B</p>");
            request.send_at = Some(now - Duration::minutes(3 - i as i64));
            processor.queue_email(&request).await.unwrap();
        }
        let opts = QueueProcessorOptions {
            claim_lease: Duration::milliseconds(250),
            ..options()
        };

        let late = processor.clone();
        let late_opts = opts.clone();
        let (first, second) = tokio::join!(processor.process(&opts), async move {
            tokio::time::sleep(StdDuration::from_millis(300)).await;
            late.process(&late_opts).await
        });
        let (first, second) = (first.unwrap(), second.unwrap());

        let mut sent = transport.sent.lock().unwrap().clone();
        sent.sort();
        assert_eq!(sent, vec!["a@example.com", "b@example.com", "c@example.com"]);
        assert_eq!(first.sent + second.sent, 3);
        assert_eq!(first.failed + second.failed, 0);
        assert_eq!(first.skipped + second.skipped, 1);
        let rows = store.rows.lock().unwrap();
        assert!(rows.iter().all(|r| r.status == EmailStatus::Sent && r.attempts == 1));
    }

    /// Marks the row sent behind the processor's back, as a competing pass would.
    struct RacingTransport {
        store: Arc<InMemoryStore>,
    }

    #[async_trait::async_trait]
    impl EmailTransport for RacingTransport {
        async fn send(&self, email: &OutboundEmail) -> Result<(), TransportError> {
            let id = self
                .store
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.recipient_email == email.to)
                .map(|r| r.id)
                .unwrap();
            self.store.mark_sent(id, 1, Utc::now()).await.unwrap();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_row_finished_elsewhere_is_skipped_not_failed() {
        let store = Arc::new(InMemoryStore::default());
        let processor = EmailQueueProcessor::new(
            store.clone(),
            Arc::new(StaticPreferences::default()),
            Arc::new(RacingTransport {
                store: store.clone(),
            }),
            "noreply@example.com",
        );
        let request = QueueEmailRequest::new(Uuid::new_v4(), "a@example.com", "S", "<p>B</p>");
        let entry = processor.queue_email(&request).await.unwrap();

        let summary = processor.process(&options()).await.unwrap();

        assert_eq!(summary.processed, 0);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.skipped, 1);
        assert_eq!(store.get(entry.id).status, EmailStatus::Sent);
    }

    #[tokio::test]
    async fn test_send_delay_between_rows() {
        let h = harness(StaticPreferences::default(), ScriptedTransport::default());
        queue(&h, "a@example.com").await;
        queue(&h, "b@example.com").await;
        let opts = QueueProcessorOptions {
            send_delay: StdDuration::from_millis(20),
            ..options()
        };

        let started = Instant::now();
        h.processor.process(&opts).await.unwrap();

        // One pause between two rows, none after the last
        assert!(started.elapsed() >= StdDuration::from_millis(20));
    }

    #[tokio::test]
    async fn test_queue_email_rejects_invalid_request() {
        let h = harness(StaticPreferences::default(), ScriptedTransport::default());
        let request = QueueEmailRequest::new(h.tenant_id, "not-an-email", "S", "<p>B</p>");

        let result = h.processor.queue_email(&request).await;

        assert!(matches!(result, Err(QueueError::Validation(_))));
        assert!(h.store.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_queue_email_defaults() {
        let h = harness(StaticPreferences::default(), ScriptedTransport::default());
        let before = Utc::now();
        let entry = queue(&h, "client@example.com").await;

        assert_eq!(entry.status, EmailStatus::Pending);
        assert_eq!(entry.attempts, 0);
        assert_eq!(entry.max_attempts, 3);
        assert!(entry.send_at >= before && entry.send_at <= Utc::now());
    }

    struct BrokenStore;

    #[async_trait::async_trait]
    impl EmailQueueStore for BrokenStore {
        async fn claim_due(
            &self,
            _limit: i64,
            _now: DateTime<Utc>,
            _lease: Duration,
        ) -> Result<Vec<EmailQueueEntry>, StoreError> {
            Err(StoreError::Database("connection refused".to_string()))
        }

        async fn renew_lease(
            &self,
            _: Uuid,
            _: DateTime<Utc>,
            _: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            Ok(false)
        }

        async fn mark_sent(&self, id: Uuid, _: i32, _: DateTime<Utc>) -> Result<(), StoreError> {
            Err(StoreError::NotFound(id))
        }

        async fn mark_bounced(
            &self,
            id: Uuid,
            _: i32,
            _: &str,
            _: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            Err(StoreError::NotFound(id))
        }

        async fn mark_failed(
            &self,
            id: Uuid,
            _: i32,
            _: &str,
            _: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            Err(StoreError::NotFound(id))
        }

        async fn schedule_retry(
            &self,
            id: Uuid,
            _: i32,
            _: DateTime<Utc>,
            _: &str,
        ) -> Result<(), StoreError> {
            Err(StoreError::NotFound(id))
        }

        async fn enqueue(&self, _: NewEmailQueueEntry) -> Result<EmailQueueEntry, StoreError> {
            Err(StoreError::Database("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_claim_failure_propagates() {
        let processor = EmailQueueProcessor::new(
            Arc::new(BrokenStore),
            Arc::new(StaticPreferences::default()),
            Arc::new(ScriptedTransport::default()),
            "noreply@example.com",
        );

        let result = processor.process(&options()).await;

        assert!(matches!(result, Err(QueueError::Store(StoreError::Database(_)))));
    }
}
