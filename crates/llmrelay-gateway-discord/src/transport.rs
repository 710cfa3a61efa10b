//! [`ChatTransport`] over serenity's HTTP client.

use std::sync::Arc;

use llmrelay::gateway::{ChatTransport, MessageRef, TransportError};
use serenity::all::{ChannelId, CreateMessage, EditMessage, MessageId};
use serenity::async_trait;
use serenity::http::Http;

/// Sends and edits Discord messages on behalf of the relay.
pub struct SerenityTransport {
    http: Arc<Http>,
}

impl SerenityTransport {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ChatTransport for SerenityTransport {
    async fn send_typing(&self, channel_id: &str) -> Result<(), TransportError> {
        channel(channel_id)?
            .broadcast_typing(&self.http)
            .await
            .map_err(request_failed)
    }

    async fn send_reply(
        &self,
        target: &MessageRef,
        content: &str,
    ) -> Result<String, TransportError> {
        let channel = channel(&target.channel_id)?;
        let reply_to = message(&target.message_id)?;

        let builder = CreateMessage::new()
            .content(content)
            .reference_message((channel, reply_to));
        let sent = channel
            .send_message(&self.http, builder)
            .await
            .map_err(request_failed)?;

        Ok(sent.id.to_string())
    }

    async fn send_message(
        &self,
        channel_id: &str,
        content: &str,
    ) -> Result<String, TransportError> {
        let sent = channel(channel_id)?
            .send_message(&self.http, CreateMessage::new().content(content))
            .await
            .map_err(request_failed)?;

        Ok(sent.id.to_string())
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), TransportError> {
        channel(channel_id)?
            .edit_message(
                &self.http,
                message(message_id)?,
                EditMessage::new().content(content),
            )
            .await
            .map_err(request_failed)?;

        Ok(())
    }
}

fn channel(id: &str) -> Result<ChannelId, TransportError> {
    parse_snowflake("channel", id).map(ChannelId::new)
}

fn message(id: &str) -> Result<MessageId, TransportError> {
    parse_snowflake("message", id).map(MessageId::new)
}

/// Discord ids are non-zero; serenity panics on zero.
fn parse_snowflake(kind: &'static str, id: &str) -> Result<u64, TransportError> {
    id.parse::<u64>()
        .ok()
        .filter(|value| *value != 0)
        .ok_or_else(|| TransportError::invalid_id(kind, id))
}

fn request_failed(e: serenity::Error) -> TransportError {
    TransportError::Request(e.to_string())
}
