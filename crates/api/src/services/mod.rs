//! Application services wiring external providers into the domain.

pub mod email;

pub use email::{build_transport, ConsoleTransport, EmailError, ResendTransport};
