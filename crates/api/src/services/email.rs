//! Email transports used by the queue worker.
//!
//! Supports two providers:
//! - `console`: logs emails instead of sending them (development)
//! - `resend`: sends via the Resend HTTP API

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::services::{EmailTransport, OutboundEmail, TransportError};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::EmailConfig;

/// Errors building an email transport.
#[derive(Debug, Error)]
pub enum EmailError {
    #[error("Unknown email provider: {0}")]
    UnknownProvider(String),

    #[error("Email provider not configured: {0}")]
    NotConfigured(String),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Builds the transport selected by `email.provider`.
pub fn build_transport(config: &EmailConfig) -> Result<Arc<dyn EmailTransport>, EmailError> {
    match config.provider.as_str() {
        "console" => Ok(Arc::new(ConsoleTransport)),
        "resend" => Ok(Arc::new(ResendTransport::new(config)?)),
        other => Err(EmailError::UnknownProvider(other.to_string())),
    }
}

/// Logs emails instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleTransport;

#[async_trait]
impl EmailTransport for ConsoleTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<(), TransportError> {
        info!(
            provider = "console",
            from = %email.from,
            to = %email.to,
            subject = %email.subject,
            "Email (console provider, not sent)"
        );
        debug!(
            html_length = email.html.len(),
            has_text = email.text.is_some(),
            "Email body"
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: [String; 1],
    subject: &'a str,
    html: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
struct ResendErrorBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Sends email through the Resend API (`POST {api_base_url}/emails`).
#[derive(Clone)]
pub struct ResendTransport {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl ResendTransport {
    pub fn new(config: &EmailConfig) -> Result<Self, EmailError> {
        if config.api_key.is_empty() {
            return Err(EmailError::NotConfigured(
                "resend provider requires an API key".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/emails", config.api_base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
        })
    }
}

/// Maps a failed Resend response to a transport error.
///
/// Validation failures mean the message itself is undeliverable and must not
/// be retried; everything else is treated as transient.
fn classify_failure(status: StatusCode, body: &str) -> TransportError {
    let parsed: ResendErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .unwrap_or_else(|| body.trim().to_string());

    let is_validation = parsed.name.as_deref() == Some("validation_error")
        || status == StatusCode::UNPROCESSABLE_ENTITY
        || status == StatusCode::BAD_REQUEST;

    if is_validation {
        TransportError::Validation(message)
    } else {
        TransportError::Transient(format!("Resend returned {}: {}", status.as_u16(), message))
    }
}

#[async_trait]
impl EmailTransport for ResendTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<(), TransportError> {
        let request = ResendRequest {
            from: &email.from,
            to: [email.to.clone()],
            subject: &email.subject,
            html: &email.html,
            text: email.text.as_deref(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| TransportError::Transient(format!("Resend request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            debug!(to = %email.to, "Email sent via Resend");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &body))
    }
}
