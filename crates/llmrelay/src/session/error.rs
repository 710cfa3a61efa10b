//! Session error types.

use thiserror::Error;

use crate::llm::LLMError;

/// Errors from acquiring a user's conversation.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The backend could not start a conversation for the user.
    #[error("failed to create chat session for user {user_id}: {source}")]
    Creation {
        user_id: String,
        #[source]
        source: LLMError,
    },
}
