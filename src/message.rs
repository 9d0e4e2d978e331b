//! Request and message types for the outbox pipeline.

use serde::{Deserialize, Serialize};

/// Body subtype of an outgoing email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Plain,
    Html,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain => write!(f, "plain"),
            Self::Html => write!(f, "html"),
        }
    }
}

impl std::str::FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(Self::Plain),
            "html" => Ok(Self::Html),
            other => Err(format!("unknown message type: {other}")),
        }
    }
}

fn default_message_type() -> MessageType {
    MessageType::Html
}

/// An inbound email-send request, as supplied by the caller.
///
/// Exactly zero or one of `body` / `template_name` may be set. When
/// `template_name` is set, `body_params` must cover every variable the
/// template requires. Neither set means an empty body is sent as-is.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailRequest {
    pub recipients: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub template_name: Option<String>,
    #[serde(default)]
    pub body_params: serde_json::Map<String, serde_json::Value>,
    #[serde(default = "default_message_type")]
    pub message_type: MessageType,
}

/// A validated request with its body fully resolved.
///
/// Produced once by the validator and immutable afterwards; this is what the
/// outbox persists and the transport sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedMessage {
    pub recipients: Vec<String>,
    pub subject: String,
    pub rendered_body: String,
    pub message_type: MessageType,
}
