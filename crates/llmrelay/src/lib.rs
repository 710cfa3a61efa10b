//! llmrelay - relays guild chat messages to a conversational LLM backend.
//!
//! The crate is gateway-agnostic: a chat gateway feeds [`gateway::InboundMessage`]s
//! into the [`gateway::MessageDispatcher`] and implements [`gateway::ChatTransport`]
//! so replies can be delivered back.

pub mod config;
pub mod gateway;
pub mod llm;
pub mod session;
pub mod store;
pub mod sync;
