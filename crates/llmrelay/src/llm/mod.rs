//! LLM backend abstraction and the Gemini implementation.

mod error;
mod gemini;
mod provider;

pub use error::LLMError;
pub use gemini::{GeminiChat, GeminiProvider};
pub use provider::{ChatProvider, ChatSession, ConversationHandle};
