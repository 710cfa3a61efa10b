use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

use crate::gateway::DispatchConfig;
use crate::gateway::reply::MESSAGE_LIMIT;
use crate::llm::GeminiProvider;
use crate::session::EvictionPolicy;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub dispatch: DispatchSection,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),

    #[error("unclosed variable reference '${{' (missing '}}')")]
    UnclosedVarReference,

    #[error("{field} is not set (configure it or set {env})")]
    MissingCredential {
        field: &'static str,
        env: &'static str,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Load the YAML file at `path`. A missing file yields the defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        let expanded = expand_env_vars(&contents)?;
        Ok(serde_saphyr::from_str(&expanded)?)
    }

    /// Fill empty credentials and the model name from the process environment.
    pub fn apply_env_fallbacks(&mut self) {
        self.apply_fallbacks_from(|name| std::env::var(name).ok());
    }

    fn apply_fallbacks_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_blank = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if self.discord.bot_token.trim().is_empty()
            && let Some(token) = non_blank(ENV_DISCORD_BOT_TOKEN)
        {
            self.discord.bot_token = token;
        }
        if self.gemini.api_key.trim().is_empty()
            && let Some(key) = non_blank(ENV_GEMINI_API_KEY)
        {
            self.gemini.api_key = key;
        }
        if self.gemini.model.trim().is_empty() {
            self.gemini.model = non_blank(ENV_GEMINI_MODEL)
                .unwrap_or_else(|| GeminiProvider::DEFAULT_MODEL.to_string());
        }
    }

    /// Check that everything needed to connect is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discord.bot_token.trim().is_empty() {
            return Err(ConfigError::MissingCredential {
                field: "discord.bot_token",
                env: ENV_DISCORD_BOT_TOKEN,
            });
        }
        if self.gemini.api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential {
                field: "gemini.api_key",
                env: ENV_GEMINI_API_KEY,
            });
        }
        if self.sessions.max_sessions.is_some() && self.sessions.idle_ttl_seconds.is_some() {
            return Err(ConfigError::Invalid(
                "sessions.max_sessions and sessions.idle_ttl_seconds are mutually exclusive"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Eviction policy selected by the `sessions` section.
    pub fn eviction_policy(&self) -> EvictionPolicy {
        match (self.sessions.max_sessions, self.sessions.idle_ttl_seconds) {
            (Some(capacity), _) if capacity > 0 => EvictionPolicy::Lru { capacity },
            (_, Some(secs)) if secs > 0 => EvictionPolicy::Idle {
                ttl: Duration::from_secs(secs),
            },
            _ => EvictionPolicy::Never,
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            message_limit: MESSAGE_LIMIT,
            max_concurrent_replies: self.dispatch.max_concurrent_replies,
            request_timeout: (self.dispatch.request_timeout_seconds > 0)
                .then(|| Duration::from_secs(self.dispatch.request_timeout_seconds)),
        }
    }
}

// ============================================================================
// Environment Fallbacks
// ============================================================================

pub const ENV_DISCORD_BOT_TOKEN: &str = "DISCORD_BOT_TOKEN";
pub const ENV_GEMINI_API_KEY: &str = "GEMINI_API_STUDIO_KEY";
pub const ENV_GEMINI_MODEL: &str = "GEMINI_MODEL_NAME";

/// Default data directory (relative to the working directory).
pub const DEFAULT_DATA_DIR: &str = "config_data";

// ============================================================================
// Private Helpers (Serde Defaults)
// ============================================================================

fn default_base_url() -> String {
    GeminiProvider::DEFAULT_BASE_URL.to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

fn default_request_timeout() -> u64 {
    300
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports the following syntax (shell-compatible):
/// - `${VAR}` - Required variable, errors if not set
/// - `${VAR:-default}` - Optional variable with default value
/// - `${VAR:-}` - Optional variable, empty string if not set
/// - `$$` - Literal `$`
/// ```yaml
/// discord:
///   bot_token: ${DISCORD_BOT_TOKEN}
/// gemini:
///   model: ${GEMINI_MODEL_NAME:-gemini-2.5-flash-preview-05-20}
/// ```
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                result.push('$');
            }
            Some('{') => {
                chars.next();
                result.push_str(&parse_var_reference(&mut chars)?);
            }
            _ => result.push('$'),
        }
    }

    Ok(result)
}

/// Resolve a variable reference after `${`, consuming through the closing `}`.
fn parse_var_reference(
    chars: &mut std::iter::Peekable<std::str::Chars>,
) -> Result<String, ConfigError> {
    let mut body = String::new();
    loop {
        match chars.next() {
            Some('}') => break,
            Some(c) => body.push(c),
            None => return Err(ConfigError::UnclosedVarReference),
        }
    }

    let (name, default) = match body.split_once(":-") {
        Some((name, default)) => (name, Some(default)),
        None => (body.as_str(), None),
    };

    match (std::env::var(name), default) {
        (Ok(value), _) => Ok(value),
        (Err(_), Some(default)) => Ok(default.to_string()),
        (Err(_), None) => Err(ConfigError::MissingEnvVar(name.to_string())),
    }
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub bot_token: String,
}

#[derive(Debug, Deserialize)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: String::new(),
            base_url: default_base_url(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Conversation eviction. Both unset keeps every conversation.
#[derive(Debug, Default, Deserialize)]
pub struct SessionsConfig {
    #[serde(default)]
    pub max_sessions: Option<usize>,
    #[serde(default)]
    pub idle_ttl_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct DispatchSection {
    /// `0` means unbounded.
    #[serde(default)]
    pub max_concurrent_replies: usize,
    /// `0` disables the deadline.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            max_concurrent_replies: 0,
            request_timeout_seconds: default_request_timeout(),
        }
    }
}
