//! Provider and conversation traits.

use std::sync::Arc;

use async_trait::async_trait;

use super::error::LLMError;

/// One ongoing conversation with the backend.
///
/// Any context the backend needs between turns (system instruction, prior
/// turns) belongs to the implementation.
#[async_trait]
pub trait ChatSession: Send + Sync {
    /// Send one user message and wait for the reply text.
    ///
    /// Implementations never retry; a failed call is reported as-is.
    async fn send_message(&self, text: &str) -> Result<String, LLMError>;
}

/// Shared handle to a conversation.
pub type ConversationHandle = Arc<dyn ChatSession>;

/// Factory for conversations with one backend model.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Start a new conversation, optionally seeded with a system instruction.
    async fn create_chat(
        &self,
        system_prompt: Option<&str>,
    ) -> Result<ConversationHandle, LLMError>;

    /// Model name used for new conversations.
    fn model_name(&self) -> &str;
}
