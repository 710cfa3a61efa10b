//! LLM error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when talking to the LLM backend.
#[derive(Debug, Error)]
pub enum LLMError {
    /// HTTP request failed
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// API returned an error response
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The call did not finish before its deadline
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The response was well-formed but carried no text
    #[error("empty response: {0}")]
    EmptyResponse(String),
}

impl LLMError {
    /// True when the backend answered but produced nothing usable.
    pub fn is_empty_response(&self) -> bool {
        matches!(self, Self::EmptyResponse(_))
    }

    /// True when the backend could not be reached or rejected the call.
    pub fn is_unavailable(&self) -> bool {
        !self.is_empty_response()
    }
}
