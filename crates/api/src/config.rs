use domain::models::QueueProcessorOptions;
use serde::Deserialize;
use std::net::{AddrParseError, SocketAddr};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    /// Outbound email provider configuration
    #[serde(default)]
    pub email: EmailConfig,
    /// Email queue worker configuration
    #[serde(default)]
    pub email_queue: EmailQueueConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl From<&DatabaseConfig> for persistence::db::DatabaseConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            url: config.url.clone(),
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            connect_timeout_secs: config.connect_timeout_secs,
            idle_timeout_secs: config.idle_timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Email provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    /// Email provider: resend, or console (for development)
    #[serde(default = "default_email_provider")]
    pub provider: String,

    /// Resend API key (for resend provider)
    #[serde(default)]
    pub api_key: String,

    /// Provider API base URL
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Sender email address (From header)
    #[serde(default = "default_sender_email")]
    pub sender_email: String,

    /// Sender name (From header)
    #[serde(default = "default_sender_name")]
    pub sender_name: String,

    /// Provider request timeout in seconds
    #[serde(default = "default_email_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            provider: default_email_provider(),
            api_key: String::new(),
            api_base_url: default_api_base_url(),
            sender_email: default_sender_email(),
            sender_name: default_sender_name(),
            timeout_secs: default_email_timeout(),
        }
    }
}

impl EmailConfig {
    /// `Name <address>` form used as the From header.
    pub fn from_address(&self) -> String {
        if self.sender_name.is_empty() {
            self.sender_email.clone()
        } else {
            format!("{} <{}>", self.sender_name, self.sender_email)
        }
    }
}

/// Email queue worker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailQueueConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between processing passes
    #[serde(default = "default_queue_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_queue_batch_size")]
    pub batch_size: i64,

    /// Pause between individual sends, in milliseconds
    #[serde(default = "default_send_delay_ms")]
    pub send_delay_ms: u64,

    #[serde(default = "default_true")]
    pub respect_notification_preferences: bool,

    /// How long a claimed email is hidden from other workers
    #[serde(default = "default_claim_lease")]
    pub claim_lease_secs: i64,
}

impl Default for EmailQueueConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_queue_interval(),
            batch_size: default_queue_batch_size(),
            send_delay_ms: default_send_delay_ms(),
            respect_notification_preferences: true,
            claim_lease_secs: default_claim_lease(),
        }
    }
}

/// Longest accepted claim lease.
pub const MAX_CLAIM_LEASE_SECS: i64 = 86_400;

impl EmailQueueConfig {
    pub fn processor_options(&self) -> QueueProcessorOptions {
        QueueProcessorOptions {
            batch_size: self.batch_size,
            respect_notification_preferences: self.respect_notification_preferences,
            send_delay: Duration::from_millis(self.send_delay_ms),
            claim_lease: chrono::Duration::seconds(self.claim_lease_secs),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_connections() -> u32 {
    10
}
fn default_min_connections() -> u32 {
    1
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_true() -> bool {
    true
}
fn default_email_provider() -> String {
    "console".to_string() // Default to console logging for development
}
fn default_api_base_url() -> String {
    "https://api.resend.com".to_string()
}
fn default_sender_email() -> String {
    "noreply@notify.innspiredaccountancy.com".to_string()
}
fn default_sender_name() -> String {
    "Practice Hub".to_string()
}
fn default_email_timeout() -> u64 {
    10
}
fn default_queue_interval() -> u64 {
    60
}
fn default_queue_batch_size() -> i64 {
    100
}
fn default_send_delay_ms() -> u64 {
    100
}
fn default_claim_lease() -> i64 {
    300
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration with defaults
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with PH__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("PH").separator("__"))
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Load configuration from embedded defaults plus overrides.
    ///
    /// Does not touch config files and skips validation, so partial configs load.
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let defaults = r#"
            [server]
            host = "0.0.0.0"
            port = 8080
            request_timeout_secs = 30

            [database]
            url = ""
            max_connections = 10
            min_connections = 1
            connect_timeout_secs = 10
            idle_timeout_secs = 600

            [logging]
            level = "info"
            format = "json"

            [email]
            provider = "console"
            sender_email = "test@example.com"
            sender_name = "Test"

            [email_queue]
            enabled = false
            interval_secs = 60
            batch_size = 100
            send_delay_ms = 0
        "#;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(defaults, config::FileFormat::Toml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "PH__DATABASE__URL environment variable must be set".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "Server port cannot be 0".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigValidationError::InvalidValue(
                "min_connections cannot exceed max_connections".to_string(),
            ));
        }

        match self.email.provider.as_str() {
            "console" => {}
            "resend" => {
                if self.email.api_key.is_empty() {
                    return Err(ConfigValidationError::MissingRequired(
                        "PH__EMAIL__API_KEY must be set for the resend provider".to_string(),
                    ));
                }
            }
            other => {
                return Err(ConfigValidationError::InvalidValue(format!(
                    "Unknown email provider: {}",
                    other
                )));
            }
        }

        if self.email_queue.interval_secs == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "email_queue.interval_secs must be positive".to_string(),
            ));
        }

        if self.email_queue.batch_size <= 0 {
            return Err(ConfigValidationError::InvalidValue(
                "email_queue.batch_size must be positive".to_string(),
            ));
        }

        let lease = self.email_queue.claim_lease_secs;
        if lease <= 0 || lease > MAX_CLAIM_LEASE_SECS {
            return Err(ConfigValidationError::InvalidValue(format!(
                "email_queue.claim_lease_secs must be between 1 and {}",
                MAX_CLAIM_LEASE_SECS
            )));
        }

        // A lease is renewed before each send and must outlast that send
        if lease <= self.email.timeout_secs as i64 {
            return Err(ConfigValidationError::InvalidValue(
                "email_queue.claim_lease_secs must exceed email.timeout_secs".to_string(),
            ));
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }
}
