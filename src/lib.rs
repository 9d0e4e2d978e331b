//! Mailspool — outbox-based email dispatch service.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod mailer;
pub mod message;
pub mod outbox;
pub mod queue;
pub mod routes;
pub mod templates;
pub mod validate;
