//! Per-user conversation sessions.
//!
//! Each user gets one long-lived conversation with the LLM backend, created
//! lazily on their first routed message.

mod cache;
mod error;

pub use cache::{EvictionPolicy, SessionCache};
pub use error::SessionError;
