//! Configuration types.
//!
//! Each component receives only the configuration it needs at construction
//! time. There is no process-global settings object: `main` builds these
//! structs once from the environment and passes them down.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// SMTP transport configuration.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    /// SMTP server hostname.
    pub host: String,
    /// SMTP server port.
    pub port: u16,
    /// Username for authentication, if the relay requires it.
    pub username: Option<String>,
    /// Password for authentication.
    pub password: Option<SecretString>,
    /// Sender address placed in the From header.
    pub from_address: String,
    /// Connection-level timeout handed to the transport.
    pub timeout: Duration,
}

impl SmtpConfig {
    /// Build config from `MAILSPOOL_SMTP_*` environment variables.
    ///
    /// `MAILSPOOL_SMTP_HOST` and `MAILSPOOL_SMTP_FROM` are required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("MAILSPOOL_SMTP_HOST")
            .map_err(|_| ConfigError::MissingEnvVar("MAILSPOOL_SMTP_HOST".into()))?;

        let port: u16 = std::env::var("MAILSPOOL_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("MAILSPOOL_SMTP_USERNAME").ok();
        let password = std::env::var("MAILSPOOL_SMTP_PASSWORD")
            .ok()
            .map(SecretString::from);

        let from_address = std::env::var("MAILSPOOL_SMTP_FROM")
            .map_err(|_| ConfigError::MissingEnvVar("MAILSPOOL_SMTP_FROM".into()))?;

        let timeout_secs: u64 = std::env::var("MAILSPOOL_SMTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        Ok(Self {
            host,
            port,
            username,
            password,
            from_address,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// Outbox store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path of the local database file.
    pub db_path: PathBuf,
}

impl StoreConfig {
    pub fn from_env() -> Self {
        let db_path = std::env::var("MAILSPOOL_DB_PATH")
            .unwrap_or_else(|_| "./data/mailspool.db".to_string());
        Self {
            db_path: PathBuf::from(db_path),
        }
    }
}

/// Template catalog configuration.
#[derive(Debug, Clone)]
pub struct TemplateConfig {
    /// Directory holding the mail template files.
    pub root: PathBuf,
}

impl TemplateConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let root = std::env::var("MAILSPOOL_TEMPLATES_DIR")
            .map_err(|_| ConfigError::MissingEnvVar("MAILSPOOL_TEMPLATES_DIR".into()))?;
        let root = PathBuf::from(root);
        if !root.is_dir() {
            return Err(ConfigError::InvalidValue {
                key: "MAILSPOOL_TEMPLATES_DIR".into(),
                message: format!("{} is not a directory", root.display()),
            });
        }
        Ok(Self { root })
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Number of worker tasks pulling from the queue.
    pub workers: usize,
    /// Maximum delivery attempts per entry before dead-lettering.
    pub max_attempts: u32,
    /// Base delay before the first retry; doubles per attempt.
    pub retry_backoff: Duration,
    /// Upper bound on the retry delay.
    pub retry_backoff_cap: Duration,
    /// Overall bound on a single transport send call.
    pub send_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_attempts: 3,
            retry_backoff: Duration::from_secs(1),
            retry_backoff_cap: Duration::from_secs(300),
            send_timeout: Duration::from_secs(60),
        }
    }
}

impl DispatchConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let workers: usize = std::env::var("MAILSPOOL_DISPATCH_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.workers);

        let max_attempts: u32 = std::env::var("MAILSPOOL_MAX_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.max_attempts);

        let retry_backoff = std::env::var("MAILSPOOL_RETRY_BACKOFF_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.retry_backoff);

        let send_timeout = std::env::var("MAILSPOOL_SEND_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.send_timeout);

        Self {
            workers,
            max_attempts,
            retry_backoff,
            retry_backoff_cap: defaults.retry_backoff_cap,
            send_timeout,
        }
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub port: u16,
}

impl HttpConfig {
    pub fn from_env() -> Self {
        let port: u16 = std::env::var("MAILSPOOL_HTTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8080);
        Self { port }
    }
}
