//! Chat gateway integration.
//!
//! A gateway adapter (see `llmrelay-gateway-discord`) translates platform
//! events into [`InboundMessage`]s and slash-command invocations, and
//! implements [`ChatTransport`] so the relay can answer.
//!
//! # Message flow
//!
//! ```text
//! gateway event ──► MessageDispatcher::handle_message
//!                     │ filter (own message, route, channel, empty text)
//!                     │ SessionCache::get_or_create
//!                     │ typing + placeholder reply
//!                     └─► spawned ReplyJob
//!                           send_message → shape_reply → edit / reply / notice
//! ```

pub mod commands;
mod dispatcher;
pub mod reply;
mod transport;

pub use commands::{CommandInvocation, CommandReply, Permission, RelayCommand};
pub use dispatcher::{
    BotIdentity, Delivery, Dispatch, DispatchConfig, IgnoreReason, InboundMessage,
    MessageDispatcher,
};
pub use transport::{ChatTransport, MessageRef, TransportError};
