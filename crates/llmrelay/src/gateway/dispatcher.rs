//! Inbound message dispatcher.
//!
//! Decides whether a channel message is addressed to the relay, prepares the
//! author's conversation and a "thinking" placeholder, then hands the model
//! call to a background [`ReplyJob`] so the gateway's event loop is never
//! blocked on the LLM.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::reply::{
    DELIVERY_FAILED, EMPTY_APOLOGY, ERROR_APOLOGY, MESSAGE_LIMIT, PLACEHOLDER_FAILED,
    SESSION_APOLOGY, THINKING, shape_reply, system_instruction,
};
use super::transport::{ChatTransport, MessageRef};
use crate::llm::{ConversationHandle, LLMError};
use crate::session::SessionCache;
use crate::store::GuildConfigStore;

// ============================================================================
// Types
// ============================================================================

/// The relay's own account on the chat platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub user_id: String,
    pub name: String,
}

/// A channel message as seen by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub message_id: String,
    pub channel_id: String,
    /// `None` for direct messages.
    pub guild_id: Option<String>,
    pub author_id: String,
    pub content: String,
}

impl InboundMessage {
    pub fn reference(&self) -> MessageRef {
        MessageRef {
            channel_id: self.channel_id.clone(),
            message_id: self.message_id.clone(),
            guild_id: self.guild_id.clone(),
        }
    }
}

/// Why a message was not answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    OwnMessage,
    DirectMessage,
    /// The guild has no LLM channel configured.
    NoRoute,
    /// The message is outside the guild's LLM channel.
    OtherChannel,
    EmptyContent,
}

/// Outcome of [`MessageDispatcher::handle_message`].
#[derive(Debug)]
pub enum Dispatch {
    Ignored(IgnoreReason),
    /// Setup failed; the user has been told (best effort) and nothing was spawned.
    Aborted,
    /// A reply job is running in the background.
    Spawned(JoinHandle<Delivery>),
}

/// How a reply job finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The placeholder was edited in place.
    Edited,
    /// Editing failed; the reply went out as a new message.
    Replied,
    /// Both failed; a short notice was posted instead.
    Notified,
    /// Nothing could be delivered.
    Failed,
}

/// Tuning for a [`MessageDispatcher`].
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Longest reply posted, in characters.
    pub message_limit: usize,
    /// Upper bound on concurrent model calls. `0` means unbounded.
    pub max_concurrent_replies: usize,
    /// Deadline for one model call.
    pub request_timeout: Option<Duration>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            message_limit: MESSAGE_LIMIT,
            max_concurrent_replies: 0,
            request_timeout: None,
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Routes channel messages to per-user conversations.
pub struct MessageDispatcher {
    routes: Arc<GuildConfigStore>,
    sessions: SessionCache,
    transport: Arc<dyn ChatTransport>,
    message_limit: usize,
    request_timeout: Option<Duration>,
    permits: Option<Arc<Semaphore>>,
}

impl MessageDispatcher {
    pub fn new(
        routes: Arc<GuildConfigStore>,
        sessions: SessionCache,
        transport: Arc<dyn ChatTransport>,
        config: DispatchConfig,
    ) -> Self {
        let permits = (config.max_concurrent_replies > 0)
            .then(|| Arc::new(Semaphore::new(config.max_concurrent_replies)));

        Self {
            routes,
            sessions,
            transport,
            message_limit: config.message_limit,
            request_timeout: config.request_timeout,
            permits,
        }
    }

    /// Handle one inbound message.
    ///
    /// Returns once the placeholder is posted; the model call continues in
    /// the spawned job. Must be called from within a Tokio runtime.
    pub async fn handle_message(&self, bot: &BotIdentity, msg: InboundMessage) -> Dispatch {
        let text = match self.accept(bot, &msg).await {
            Ok(text) => text,
            Err(reason) => {
                debug!(message_id = %msg.message_id, reason = ?reason, "Ignoring message");
                return Dispatch::Ignored(reason);
            }
        };

        info!(
            guild_id = msg.guild_id.as_deref().unwrap_or_default(),
            channel_id = %msg.channel_id,
            user_id = %msg.author_id,
            "Received LLM message"
        );

        let reference = msg.reference();
        let prompt = system_instruction(&bot.name, self.message_limit);

        let session = match self.sessions.get_or_create(&msg.author_id, &prompt).await {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "Failed to get chat session");
                if let Err(e) = self.transport.send_reply(&reference, SESSION_APOLOGY).await {
                    warn!(error = %e, "Failed to send session apology");
                }
                return Dispatch::Aborted;
            }
        };

        if let Err(e) = self.transport.send_typing(&msg.channel_id).await {
            warn!(channel_id = %msg.channel_id, error = %e, "Failed to send typing indicator");
        }

        let placeholder_id = match self.transport.send_reply(&reference, THINKING).await {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "Failed to send thinking placeholder");
                if let Err(e) = self
                    .transport
                    .send_message(&msg.channel_id, PLACEHOLDER_FAILED)
                    .await
                {
                    warn!(error = %e, "Failed to send placeholder failure notice");
                }
                return Dispatch::Aborted;
            }
        };

        let job = ReplyJob {
            session,
            text,
            user_id: msg.author_id,
            reference,
            placeholder_id,
            transport: Arc::clone(&self.transport),
            message_limit: self.message_limit,
            request_timeout: self.request_timeout,
            permits: self.permits.clone(),
        };
        Dispatch::Spawned(tokio::spawn(job.run()))
    }

    /// Filter a message, returning its trimmed text if the relay should answer.
    async fn accept(
        &self,
        bot: &BotIdentity,
        msg: &InboundMessage,
    ) -> Result<String, IgnoreReason> {
        if msg.author_id == bot.user_id {
            return Err(IgnoreReason::OwnMessage);
        }
        let guild_id = msg.guild_id.as_deref().ok_or(IgnoreReason::DirectMessage)?;
        let channel_id = self
            .routes
            .get(guild_id)
            .await
            .ok_or(IgnoreReason::NoRoute)?;
        if channel_id != msg.channel_id {
            return Err(IgnoreReason::OtherChannel);
        }

        let text = msg.content.trim();
        if text.is_empty() {
            return Err(IgnoreReason::EmptyContent);
        }
        Ok(text.to_string())
    }
}

// ============================================================================
// Reply Job
// ============================================================================

/// Background work for one message: ask the model, then deliver the answer.
struct ReplyJob {
    session: ConversationHandle,
    text: String,
    user_id: String,
    reference: MessageRef,
    placeholder_id: String,
    transport: Arc<dyn ChatTransport>,
    message_limit: usize,
    request_timeout: Option<Duration>,
    permits: Option<Arc<Semaphore>>,
}

impl ReplyJob {
    async fn run(self) -> Delivery {
        // Held until delivery finishes. The semaphore is never closed.
        let _permit = match &self.permits {
            Some(permits) => Arc::clone(permits).acquire_owned().await.ok(),
            None => None,
        };

        let reply = self.ask().await;
        let shaped = shape_reply(&reply, self.message_limit);
        if let Cow::Owned(_) = shaped {
            warn!(
                user_id = %self.user_id,
                chars = reply.chars().count(),
                limit = self.message_limit,
                "LLM response truncated"
            );
        }

        self.deliver(&shaped).await
    }

    /// Model reply, or the apology that replaces it.
    async fn ask(&self) -> String {
        let result = match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, self.session.send_message(&self.text))
                .await
                .unwrap_or_else(|_| Err(LLMError::Timeout(limit))),
            None => self.session.send_message(&self.text).await,
        };

        match result {
            Ok(reply) if reply.trim().is_empty() => {
                warn!(user_id = %self.user_id, "LLM returned a blank response");
                EMPTY_APOLOGY.to_string()
            }
            Ok(reply) => reply,
            Err(e) if e.is_empty_response() => {
                warn!(user_id = %self.user_id, error = %e, "LLM returned no content");
                EMPTY_APOLOGY.to_string()
            }
            Err(e) => {
                error!(user_id = %self.user_id, error = %e, "LLM request failed");
                ERROR_APOLOGY.to_string()
            }
        }
    }

    /// Edit the placeholder, falling back to a new reply, then to a notice.
    async fn deliver(&self, content: &str) -> Delivery {
        let channel_id = &self.reference.channel_id;

        let edit_err = match self
            .transport
            .edit_message(channel_id, &self.placeholder_id, content)
            .await
        {
            Ok(()) => return Delivery::Edited,
            Err(e) => e,
        };
        warn!(
            channel_id = %channel_id,
            message_id = %self.placeholder_id,
            error = %edit_err,
            "Failed to edit placeholder, sending new reply"
        );

        let reply_err = match self.transport.send_reply(&self.reference, content).await {
            Ok(_) => return Delivery::Replied,
            Err(e) => e,
        };
        error!(
            channel_id = %channel_id,
            error = %reply_err,
            "Failed to send reply after edit failure"
        );

        match self.transport.send_reply(&self.reference, DELIVERY_FAILED).await {
            Ok(_) => Delivery::Notified,
            Err(e) => {
                error!(channel_id = %channel_id, error = %e, "Failed to send delivery notice");
                Delivery::Failed
            }
        }
    }
}
