//! Error types for mailspool.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Mail transport error: {0}")]
    Mail(#[from] MailError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Request validation errors.
///
/// `ConflictingBodySource`, `EmptyRecipients`, and `InvalidRecipient` are
/// request-shape errors; the rest are resolution errors. All are surfaced
/// synchronously, before any entry is persisted, and none are retried.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Request supplies both an inline body and a template name")]
    ConflictingBodySource,

    #[error("Request has no recipients")]
    EmptyRecipients,

    #[error("Invalid recipient address: {0}")]
    InvalidRecipient(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Template {template} is missing required variables: {missing:?}")]
    MissingTemplateVariables {
        template: String,
        missing: Vec<String>,
    },

    #[error("Template rendering failed: {0}")]
    Render(String),
}

/// Template catalog errors.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Template not found: {0}")]
    NotFound(String),

    #[error("Failed to render template {name}: {message}")]
    Render { name: String, message: String },

    #[error("Template root not readable: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbox storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Outbox entry not found: {0}")]
    EntryNotFound(Uuid),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Stored row malformed: {0}")]
    Corrupt(String),
}

/// Mail transport errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("Send timed out after {0:?}")]
    Timeout(Duration),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
