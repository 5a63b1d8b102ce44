//! Email queue background job.
//!
//! Runs one processing pass of the email queue per tick and refreshes the
//! queue and pool gauges afterwards.

use domain::models::QueueProcessorOptions;
use domain::services::EmailQueueProcessor;
use metrics::gauge;
use persistence::repositories::EmailQueueRepository;
use tracing::{info, warn};

use super::scheduler::{Job, JobError, JobFrequency};
use crate::config::EmailQueueConfig;

/// Background job that drains due emails from the queue.
pub struct EmailQueueJob {
    processor: EmailQueueProcessor,
    options: QueueProcessorOptions,
    frequency: JobFrequency,
    stats: Option<EmailQueueRepository>,
}

impl EmailQueueJob {
    pub fn new(processor: EmailQueueProcessor, config: &EmailQueueConfig) -> Self {
        Self {
            processor,
            options: config.processor_options(),
            frequency: JobFrequency::Seconds(config.interval_secs),
            stats: None,
        }
    }

    /// Publish per-status queue gauges from this repository after each pass.
    pub fn with_stats(mut self, repository: EmailQueueRepository) -> Self {
        self.stats = Some(repository);
        self
    }

    async fn record_gauges(&self) {
        let Some(repository) = &self.stats else {
            return;
        };

        persistence::metrics::record_pool_metrics(repository.pool());

        match repository.queue_stats().await {
            Ok(stats) => {
                gauge!("email_queue_rows", "status" => "pending").set(stats.pending as f64);
                gauge!("email_queue_rows", "status" => "sent").set(stats.sent as f64);
                gauge!("email_queue_rows", "status" => "failed").set(stats.failed as f64);
                gauge!("email_queue_rows", "status" => "bounced").set(stats.bounced as f64);
            }
            Err(e) => warn!(error = %e, "Failed to read email queue stats"),
        }
    }
}

#[async_trait::async_trait]
impl Job for EmailQueueJob {
    fn name(&self) -> &'static str {
        "email_queue"
    }

    fn frequency(&self) -> JobFrequency {
        self.frequency
    }

    fn run_on_start(&self) -> bool {
        true
    }

    async fn execute(&self) -> Result<(), JobError> {
        let summary = self.processor.process(&self.options).await?;

        if summary.processed > 0 {
            info!(
                processed = summary.processed,
                sent = summary.sent,
                failed = summary.failed,
                bounced = summary.bounced,
                retrying = summary.retrying,
                skipped = summary.skipped,
                "Processed email queue"
            );
        }

        self.record_gauges().await;
        Ok(())
    }
}
