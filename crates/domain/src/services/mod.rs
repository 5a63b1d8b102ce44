//! Domain services for Practice Hub.
//!
//! Services contain business logic that operates on domain models.

pub mod email_queue;

pub use email_queue::{
    EmailQueueProcessor, EmailQueueStore, EmailTransport, OutboundEmail, QueueError,
    RecipientPreferences, StoreError, TransportError,
};
