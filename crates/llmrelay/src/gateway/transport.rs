//! Outbound side of a chat gateway.

use async_trait::async_trait;
use thiserror::Error;

/// Reference to an existing chat message, used as a reply target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub channel_id: String,
    pub message_id: String,
    pub guild_id: Option<String>,
}

/// Errors reported by a gateway when an outbound operation fails.
#[derive(Debug, Error)]
pub enum TransportError {
    /// An identifier could not be understood by the platform.
    #[error("invalid {kind} id: {value}")]
    InvalidId { kind: &'static str, value: String },

    /// The platform rejected or failed the request.
    #[error("request failed: {0}")]
    Request(String),
}

impl TransportError {
    /// Create an invalid-id error.
    pub fn invalid_id(kind: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidId {
            kind,
            value: value.into(),
        }
    }
}

/// Operations the relay needs from a chat platform.
///
/// Every operation is attempted once; retry policy belongs to the caller.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Show a transient "typing" indicator in a channel.
    async fn send_typing(&self, channel_id: &str) -> Result<(), TransportError>;

    /// Send `content` as a reply to `target`. Returns the new message id.
    async fn send_reply(
        &self,
        target: &MessageRef,
        content: &str,
    ) -> Result<String, TransportError>;

    /// Send `content` to a channel. Returns the new message id.
    async fn send_message(
        &self,
        channel_id: &str,
        content: &str,
    ) -> Result<String, TransportError>;

    /// Replace the content of an existing message.
    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), TransportError>;
}
