//! Email queue repository.
//!
//! Backs the queue processor. Due rows are claimed with a lease: the claim
//! pushes `send_at` forward in the same statement that selects the rows.
//! Before each send the processor renews the lease with a compare-and-set on
//! `send_at`, so a row re-claimed after its lease lapsed is sent by one pass
//! only.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use domain::models::{EmailQueueEntry, NewEmailQueueEntry};
use domain::services::{EmailQueueStore, StoreError};
use sqlx::PgPool;
use uuid::Uuid;

use super::store_error;
use crate::entities::email_queue::{
    EmailQueueEntity, EmailQueueStats, EmailStatusCountEntity, EmailStatusDb,
};
use crate::metrics::QueryTimer;

/// Repository for email queue database operations.
#[derive(Clone)]
pub struct EmailQueueRepository {
    pool: PgPool,
}

impl EmailQueueRepository {
    /// Creates a new EmailQueueRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert a new pending email.
    pub async fn insert(&self, entry: &NewEmailQueueEntry) -> Result<EmailQueueEntity, sqlx::Error> {
        let timer = QueryTimer::new("insert_email_queue_entry");
        let result = sqlx::query_as::<_, EmailQueueEntity>(
            r#"
            INSERT INTO email_queue (
                tenant_id, email_template_id, recipient_email, recipient_name, subject,
                body_html, body_text, variables, status, attempts, max_attempts, send_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', 0, $9, $10)
            RETURNING id, tenant_id, email_template_id, recipient_email, recipient_name, subject,
                      body_html, body_text, variables, status, attempts, max_attempts, send_at,
                      error_message, sent_at, created_at, updated_at
            "#,
        )
        .bind(entry.tenant_id)
        .bind(entry.email_template_id)
        .bind(&entry.recipient_email)
        .bind(&entry.recipient_name)
        .bind(&entry.subject)
        .bind(&entry.body_html)
        .bind(&entry.body_text)
        .bind(&entry.variables)
        .bind(entry.max_attempts)
        .bind(entry.send_at)
        .fetch_one(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Claim up to `limit` due pending rows, oldest first.
    ///
    /// Claimed rows get `send_at = lease_until`; the returned entities carry
    /// the `send_at` they were due at.
    pub async fn claim_batch(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<EmailQueueEntity>, sqlx::Error> {
        let timer = QueryTimer::new("claim_due_emails");
        let result = sqlx::query_as::<_, EmailQueueEntity>(
            r#"
            WITH due AS (
                SELECT id, send_at AS due_at
                FROM email_queue
                WHERE status = 'pending' AND send_at <= $1
                ORDER BY send_at ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            UPDATE email_queue q
            SET send_at = $2, updated_at = NOW()
            FROM due
            WHERE q.id = due.id
            RETURNING q.id, q.tenant_id, q.email_template_id, q.recipient_email, q.recipient_name,
                      q.subject, q.body_html, q.body_text, q.variables, q.status, q.attempts,
                      q.max_attempts, due.due_at AS send_at, q.error_message, q.sent_at,
                      q.created_at, q.updated_at
            "#,
        )
        .bind(now)
        .bind(lease_until)
        .bind(limit)
        .fetch_all(&self.pool)
        .await;
        timer.record();

        // UPDATE ... RETURNING does not preserve the CTE ordering
        let mut rows = result?;
        rows.sort_by_key(|row| row.send_at);
        if !rows.is_empty() {
            tracing::debug!(claimed = rows.len(), lease_until = %lease_until, "Claimed due emails");
        }
        Ok(rows)
    }

    /// Move a row to a terminal status.
    ///
    /// Only pending rows move; returns the number of rows updated.
    pub async fn update_status(
        &self,
        id: Uuid,
        status: EmailStatusDb,
        attempts: i32,
        error_message: Option<&str>,
        sent_at: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("update_email_status");
        let result = sqlx::query(
            r#"
            UPDATE email_queue
            SET status = $2,
                attempts = $3,
                error_message = $4,
                sent_at = $5,
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(attempts)
        .bind(error_message)
        .bind(sent_at)
        .execute(&self.pool)
        .await;
        timer.record();
        Ok(result?.rows_affected())
    }

    /// Keep a row pending and make it due again at `send_at`.
    pub async fn reschedule(
        &self,
        id: Uuid,
        attempts: i32,
        send_at: DateTime<Utc>,
        error_message: &str,
    ) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("reschedule_email");
        let result = sqlx::query(
            r#"
            UPDATE email_queue
            SET attempts = $2,
                send_at = $3,
                error_message = $4,
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(attempts)
        .bind(send_at)
        .bind(error_message)
        .execute(&self.pool)
        .await;
        timer.record();
        Ok(result?.rows_affected())
    }

    /// Extend the lease on a claimed row if it is still held until `held_until`.
    ///
    /// Returns the number of rows updated: 0 when the row left `pending` or
    /// another claim moved its `send_at`.
    pub async fn extend_lease(
        &self,
        id: Uuid,
        held_until: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("extend_email_lease");
        let result = sqlx::query(
            r#"
            UPDATE email_queue
            SET send_at = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'pending' AND send_at = $2
            "#,
        )
        .bind(id)
        .bind(held_until)
        .bind(lease_until)
        .execute(&self.pool)
        .await;
        timer.record();
        Ok(result?.rows_affected())
    }

    /// Find an email by ID.
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<EmailQueueEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_email_by_id");
        let result = sqlx::query_as::<_, EmailQueueEntity>(
            r#"
            SELECT id, tenant_id, email_template_id, recipient_email, recipient_name, subject,
                   body_html, body_text, variables, status, attempts, max_attempts, send_at,
                   error_message, sent_at, created_at, updated_at
            FROM email_queue
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Count rows per status across all tenants.
    pub async fn queue_stats(&self) -> Result<EmailQueueStats, sqlx::Error> {
        let timer = QueryTimer::new("email_queue_stats");
        let result = sqlx::query_as::<_, EmailStatusCountEntity>(
            r#"
            SELECT status, COUNT(*) AS count
            FROM email_queue
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await;
        timer.record();
        Ok(result?.into_iter().collect())
    }
}

fn expect_updated(id: Uuid, rows_affected: u64) -> Result<(), StoreError> {
    if rows_affected == 0 {
        Err(StoreError::NotFound(id))
    } else {
        Ok(())
    }
}

#[async_trait]
impl EmailQueueStore for EmailQueueRepository {
    async fn claim_due(
        &self,
        limit: i64,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Vec<EmailQueueEntry>, StoreError> {
        let rows = self
            .claim_batch(now, now + lease, limit)
            .await
            .map_err(store_error)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn renew_lease(
        &self,
        id: Uuid,
        held_until: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let updated = self
            .extend_lease(id, held_until, lease_until)
            .await
            .map_err(store_error)?;
        Ok(updated > 0)
    }

    async fn mark_sent(
        &self,
        id: Uuid,
        attempts: i32,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let updated = self
            .update_status(id, EmailStatusDb::Sent, attempts, None, at)
            .await
            .map_err(store_error)?;
        expect_updated(id, updated)
    }

    async fn mark_bounced(
        &self,
        id: Uuid,
        attempts: i32,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let updated = self
            .update_status(id, EmailStatusDb::Bounced, attempts, Some(error), at)
            .await
            .map_err(store_error)?;
        expect_updated(id, updated)
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        attempts: i32,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let updated = self
            .update_status(id, EmailStatusDb::Failed, attempts, Some(error), at)
            .await
            .map_err(store_error)?;
        expect_updated(id, updated)
    }

    async fn schedule_retry(
        &self,
        id: Uuid,
        attempts: i32,
        next_send_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError> {
        let updated = self
            .reschedule(id, attempts, next_send_at, error)
            .await
            .map_err(store_error)?;
        expect_updated(id, updated)
    }

    async fn enqueue(&self, entry: NewEmailQueueEntry) -> Result<EmailQueueEntry, StoreError> {
        self.insert(&entry)
            .await
            .map(Into::into)
            .map_err(store_error)
    }
}
