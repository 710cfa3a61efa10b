//! Common test utilities.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use llmrelay::gateway::reply::{DELIVERY_FAILED, THINKING};
use llmrelay::gateway::{
    BotIdentity, ChatTransport, DispatchConfig, InboundMessage, MessageDispatcher, MessageRef,
    TransportError,
};
use llmrelay::llm::{ChatProvider, ChatSession, ConversationHandle, LLMError};
use llmrelay::session::SessionCache;
use llmrelay::store::GuildConfigStore;

pub const GUILD: &str = "G1";
pub const CHANNEL: &str = "C1";

// ============================================================================
// Transport
// ============================================================================

/// Outbound call observed by [`MockTransport`]. Failed calls are recorded too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Typing {
        channel_id: String,
    },
    Reply {
        to: String,
        content: String,
    },
    Message {
        channel_id: String,
        content: String,
    },
    Edit {
        message_id: String,
        content: String,
    },
}

/// Which outbound calls should fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct Failures {
    pub typing: bool,
    /// Replies carrying the "thinking" placeholder.
    pub placeholder: bool,
    /// Replies carrying the last-resort delivery notice.
    pub notices: bool,
    /// Every other reply.
    pub replies: bool,
    pub edits: bool,
    pub messages: bool,
}

/// Transport that records every call and assigns sequential message ids.
#[derive(Default)]
pub struct MockTransport {
    failures: Failures,
    sent: Mutex<Vec<Sent>>,
    next_id: AtomicUsize,
}

impl MockTransport {
    pub fn new(failures: Failures) -> Self {
        Self {
            failures,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn edits(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Edit { content, .. } => Some(content),
                _ => None,
            })
            .collect()
    }

    fn record(&self, sent: Sent, fail: bool) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(sent);
        if fail {
            return Err(TransportError::Request("mock failure".to_string()));
        }
        Ok(())
    }

    /// Record a call that creates a message, returning the new id.
    fn create(&self, sent: Sent, fail: bool) -> Result<String, TransportError> {
        self.record(sent, fail)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("M{id}"))
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn send_typing(&self, channel_id: &str) -> Result<(), TransportError> {
        let sent = Sent::Typing {
            channel_id: channel_id.to_string(),
        };
        self.record(sent, self.failures.typing)
    }

    async fn send_reply(
        &self,
        target: &MessageRef,
        content: &str,
    ) -> Result<String, TransportError> {
        let fail = match content {
            THINKING => self.failures.placeholder,
            DELIVERY_FAILED => self.failures.notices,
            _ => self.failures.replies,
        };
        let sent = Sent::Reply {
            to: target.message_id.clone(),
            content: content.to_string(),
        };
        self.create(sent, fail)
    }

    async fn send_message(
        &self,
        channel_id: &str,
        content: &str,
    ) -> Result<String, TransportError> {
        let sent = Sent::Message {
            channel_id: channel_id.to_string(),
            content: content.to_string(),
        };
        self.create(sent, self.failures.messages)
    }

    async fn edit_message(
        &self,
        _channel_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), TransportError> {
        let sent = Sent::Edit {
            message_id: message_id.to_string(),
            content: content.to_string(),
        };
        self.record(sent, self.failures.edits)
    }
}

// ============================================================================
// Provider
// ============================================================================

/// What every scripted conversation answers.
#[derive(Debug, Clone)]
pub enum Script {
    Reply(String),
    /// Reply after sleeping for the given duration.
    Delayed(String, Duration),
    /// Echo the message text after the delay listed for it (none if unlisted).
    Echo(Vec<(String, Duration)>),
    Fail,
    Empty,
}

/// Provider whose conversations follow a [`Script`] and record what they see.
pub struct ScriptedProvider {
    script: Script,
    fail_creation: bool,
    pub created: AtomicUsize,
    pub prompts: Mutex<Vec<Option<String>>>,
    pub received: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            fail_creation: false,
            created: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            received: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing_creation() -> Self {
        Self {
            fail_creation: true,
            ..Self::new(Script::Fail)
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn create_chat(
        &self,
        system_prompt: Option<&str>,
    ) -> Result<ConversationHandle, LLMError> {
        if self.fail_creation {
            return Err(LLMError::Api {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap()
            .push(system_prompt.map(str::to_string));

        Ok(Arc::new(ScriptedChat {
            script: self.script.clone(),
            received: Arc::clone(&self.received),
            in_flight: Arc::clone(&self.in_flight),
            max_in_flight: Arc::clone(&self.max_in_flight),
        }))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

struct ScriptedChat {
    script: Script,
    received: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

#[async_trait]
impl ChatSession for ScriptedChat {
    async fn send_message(&self, text: &str) -> Result<String, LLMError> {
        self.received.lock().unwrap().push(text.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = match &self.script {
            Script::Reply(reply) => Ok(reply.clone()),
            Script::Delayed(reply, delay) => {
                tokio::time::sleep(*delay).await;
                Ok(reply.clone())
            }
            Script::Echo(delays) => {
                let delay = delays
                    .iter()
                    .find(|(key, _)| key == text)
                    .map_or(Duration::ZERO, |(_, delay)| *delay);
                tokio::time::sleep(delay).await;
                Ok(text.to_string())
            }
            Script::Fail => Err(LLMError::Api {
                status: 500,
                message: "internal".to_string(),
            }),
            Script::Empty => Err(LLMError::EmptyResponse("no candidates".to_string())),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// ============================================================================
// Harness
// ============================================================================

/// A dispatcher wired to a mock transport, a scripted provider and a
/// temporary guild store routing [`GUILD`] to [`CHANNEL`].
pub struct Harness {
    pub dispatcher: MessageDispatcher,
    pub transport: Arc<MockTransport>,
    pub provider: Arc<ScriptedProvider>,
    pub store: Arc<GuildConfigStore>,
    _dir: TempDir,
}

pub async fn harness(provider: ScriptedProvider, failures: Failures) -> Harness {
    harness_with(provider, failures, DispatchConfig::default()).await
}

pub async fn harness_with(
    provider: ScriptedProvider,
    failures: Failures,
    config: DispatchConfig,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(GuildConfigStore::open_in(dir.path()).await.store);
    store.set(GUILD, CHANNEL).await.unwrap();

    let provider = Arc::new(provider);
    let transport = Arc::new(MockTransport::new(failures));
    let dispatcher = MessageDispatcher::new(
        Arc::clone(&store),
        SessionCache::new(provider.clone()),
        transport.clone(),
        config,
    );

    Harness {
        dispatcher,
        transport,
        provider,
        store,
        _dir: dir,
    }
}

pub fn bot() -> BotIdentity {
    BotIdentity {
        user_id: "B0".to_string(),
        name: "Relay".to_string(),
    }
}

static NEXT_MESSAGE: AtomicUsize = AtomicUsize::new(1);

/// A message from `author` in the routed channel.
pub fn message(author: &str, content: &str) -> InboundMessage {
    message_in(Some(GUILD), CHANNEL, author, content)
}

pub fn message_in(
    guild_id: Option<&str>,
    channel_id: &str,
    author: &str,
    content: &str,
) -> InboundMessage {
    InboundMessage {
        message_id: format!("U{}", NEXT_MESSAGE.fetch_add(1, Ordering::SeqCst)),
        channel_id: channel_id.to_string(),
        guild_id: guild_id.map(str::to_string),
        author_id: author.to_string(),
        content: content.to_string(),
    }
}
