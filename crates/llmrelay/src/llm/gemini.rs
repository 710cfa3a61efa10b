//! Gemini provider over the `generateContent` REST API.
//!
//! The REST API is stateless, so a [`GeminiChat`] keeps the turns of its
//! conversation and replays them with every request.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::error::LLMError;
use super::provider::{ChatProvider, ChatSession, ConversationHandle};

/// Gemini provider that creates one [`GeminiChat`] per conversation.
pub struct GeminiProvider {
    endpoint: Arc<Endpoint>,
}

/// Connection details shared by every chat of one provider.
struct Endpoint {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiProvider {
    pub const DEFAULT_BASE_URL: &'static str =
        "https://generativelanguage.googleapis.com/v1beta/models";
    pub const DEFAULT_MODEL: &'static str = "gemini-2.5-flash-preview-05-20";

    #[must_use]
    pub fn new(client: Client, api_key: String, model: String, base_url: String) -> Self {
        Self {
            endpoint: Arc::new(Endpoint {
                client,
                base_url: base_url.trim_end_matches('/').to_string(),
                api_key,
                model,
            }),
        }
    }
}

#[async_trait]
impl ChatProvider for GeminiProvider {
    async fn create_chat(
        &self,
        system_prompt: Option<&str>,
    ) -> Result<ConversationHandle, LLMError> {
        debug!(model = %self.endpoint.model, "Creating Gemini chat");
        Ok(Arc::new(GeminiChat {
            endpoint: Arc::clone(&self.endpoint),
            system_instruction: system_prompt
                .filter(|prompt| !prompt.is_empty())
                .map(|prompt| Content::text(None, prompt)),
            history: Mutex::new(Vec::new()),
        }))
    }

    fn model_name(&self) -> &str {
        &self.endpoint.model
    }
}

/// One Gemini conversation.
///
/// Turns are appended only after a successful exchange, so a failed call
/// leaves the history untouched. Each request replays a snapshot of the
/// history and the lock is never held across the network call. The user and
/// model turns of one exchange are appended together and stay paired.
pub struct GeminiChat {
    endpoint: Arc<Endpoint>,
    system_instruction: Option<Content>,
    history: Mutex<Vec<Content>>,
}

impl GeminiChat {
    /// Number of turns (user and model) recorded so far.
    pub async fn turns(&self) -> usize {
        self.history.lock().await.len()
    }
}

#[async_trait]
impl ChatSession for GeminiChat {
    async fn send_message(&self, text: &str) -> Result<String, LLMError> {
        let history = self.history.lock().await.clone();

        let user_turn = Content::text(Some("user"), text);

        let endpoint = &self.endpoint;
        let url = format!("{}/{}:generateContent", endpoint.base_url, endpoint.model);

        let response = {
            let request = build_request(self.system_instruction.as_ref(), &history, &user_turn);
            endpoint
                .client
                .post(&url)
                .header("Content-Type", "application/json")
                .header("x-goog-api-key", &endpoint.api_key)
                .json(&request)
                .send()
                .await?
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LLMError::Api {
                status,
                message: api_error_message(&body),
            });
        }

        let parsed: GenerateContentResponse = response.json().await?;
        let reply = extract_reply(parsed)?;

        let mut history = self.history.lock().await;
        history.push(user_turn);
        history.push(Content::text(Some("model"), &reply));
        Ok(reply)
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<&'a Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<&'a Content>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn text(role: Option<&str>, text: &str) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![Part {
                text: Some(text.to_string()),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

// ============================================================================
// Conversions
// ============================================================================

fn build_request<'a>(
    system_instruction: Option<&'a Content>,
    history: &'a [Content],
    user_turn: &'a Content,
) -> GenerateContentRequest<'a> {
    GenerateContentRequest {
        contents: history.iter().chain(std::iter::once(user_turn)).collect(),
        system_instruction,
    }
}

/// Join the text parts of the first candidate.
fn extract_reply(response: GenerateContentResponse) -> Result<String, LLMError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| LLMError::EmptyResponse("no candidates".to_string()))?;

    let content = candidate
        .content
        .ok_or_else(|| LLMError::EmptyResponse("candidate has no content".to_string()))?;

    let text: String = content
        .parts
        .into_iter()
        .filter_map(|part| part.text)
        .collect();

    if text.is_empty() {
        return Err(LLMError::EmptyResponse("no text parts".to_string()));
    }
    Ok(text)
}

fn api_error_message(body: &str) -> String {
    serde_json::from_str::<ErrorWrapper>(body)
        .ok()
        .and_then(|wrapper| wrapper.error.message)
        .unwrap_or_else(|| body.to_string())
}
