//! Background job scheduler and job implementations.

mod email_queue;
mod scheduler;

pub use email_queue::EmailQueueJob;
pub use scheduler::{Job, JobError, JobFrequency, JobScheduler};
