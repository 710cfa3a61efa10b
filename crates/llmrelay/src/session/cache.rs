//! Cache mapping user_id to a live conversation handle.
//!
//! Lookups take a shared read lock and never wait on the backend. A miss
//! takes a per-user creation lock and checks again before creating, so two
//! concurrent first messages from one user still produce a single backend
//! conversation while first contacts of different users proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

use super::error::SessionError;
use crate::llm::{ChatProvider, ConversationHandle};
use crate::sync::KeyedLocks;

/// When cached conversations are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Keep every conversation for the lifetime of the process.
    #[default]
    Never,
    /// Keep at most `capacity` conversations, dropping the least recently used.
    Lru { capacity: usize },
    /// Drop conversations unused for longer than `ttl`.
    Idle { ttl: Duration },
}

struct CacheEntry {
    handle: ConversationHandle,
    /// Milliseconds since the cache epoch.
    last_used: AtomicU64,
}

impl CacheEntry {
    fn new(handle: ConversationHandle, now: u64) -> Self {
        Self {
            handle,
            last_used: AtomicU64::new(now),
        }
    }

    fn last_used(&self) -> u64 {
        self.last_used.load(Ordering::Relaxed)
    }

    fn touch(&self, now: u64) {
        self.last_used.fetch_max(now, Ordering::Relaxed);
    }
}

/// Thread-safe per-user conversation cache.
#[derive(Clone)]
pub struct SessionCache {
    inner: Arc<Inner>,
}

struct Inner {
    provider: Arc<dyn ChatProvider>,
    entries: RwLock<HashMap<String, CacheEntry>>,
    creating: KeyedLocks,
    policy: EvictionPolicy,
    epoch: Instant,
}

impl SessionCache {
    /// Create a cache that never evicts.
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self::with_policy(provider, EvictionPolicy::Never)
    }

    /// Create a cache with an explicit eviction policy.
    pub fn with_policy(provider: Arc<dyn ChatProvider>, policy: EvictionPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                entries: RwLock::new(HashMap::new()),
                creating: KeyedLocks::new(),
                policy,
                epoch: Instant::now(),
            }),
        }
    }

    /// The configured eviction policy.
    pub fn policy(&self) -> EvictionPolicy {
        self.inner.policy
    }

    /// Return the user's conversation, creating it on first use.
    ///
    /// `system_prompt` seeds a newly created conversation and is ignored for
    /// an existing one; an empty prompt means no system instruction. A failed
    /// creation stores nothing, so the next call tries again.
    pub async fn get_or_create(
        &self,
        user_id: &str,
        system_prompt: &str,
    ) -> Result<ConversationHandle, SessionError> {
        if let Some(handle) = self.lookup(user_id).await {
            return Ok(handle);
        }

        let _creating = self.inner.creating.lock(user_id).await;

        // Another caller may have finished creating while we waited.
        if let Some(handle) = self.lookup(user_id).await {
            return Ok(handle);
        }

        info!(
            user_id = %user_id,
            model = %self.inner.provider.model_name(),
            "Creating chat session"
        );

        let prompt = (!system_prompt.is_empty()).then_some(system_prompt);
        let handle = self
            .inner
            .provider
            .create_chat(prompt)
            .await
            .map_err(|source| SessionError::Creation {
                user_id: user_id.to_string(),
                source,
            })?;

        self.insert(user_id, Arc::clone(&handle)).await;
        Ok(handle)
    }

    /// Return true if a live conversation is cached for the user.
    pub async fn contains(&self, user_id: &str) -> bool {
        let entries = self.inner.entries.read().await;
        entries
            .get(user_id)
            .is_some_and(|entry| !self.is_expired(entry, self.now()))
    }

    /// Number of cached conversations, including idle ones not yet purged.
    pub async fn len(&self) -> usize {
        self.inner.entries.read().await.len()
    }

    /// Return true if no conversation is cached.
    pub async fn is_empty(&self) -> bool {
        self.inner.entries.read().await.is_empty()
    }

    /// Drop conversations that have outlived the idle policy.
    ///
    /// Returns the number removed. Always zero for other policies.
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.inner.entries.write().await;
        let now = self.now();
        let before = entries.len();
        entries.retain(|_, entry| !self.is_expired(entry, now));
        before - entries.len()
    }

    async fn lookup(&self, user_id: &str) -> Option<ConversationHandle> {
        let entries = self.inner.entries.read().await;
        let entry = entries.get(user_id)?;
        let now = self.now();
        if self.is_expired(entry, now) {
            return None;
        }
        entry.touch(now);
        Some(Arc::clone(&entry.handle))
    }

    async fn insert(&self, user_id: &str, handle: ConversationHandle) {
        let mut entries = self.inner.entries.write().await;
        let now = self.now();
        entries.insert(user_id.to_string(), CacheEntry::new(handle, now));

        match self.inner.policy {
            EvictionPolicy::Never => {}
            EvictionPolicy::Lru { capacity } => {
                while entries.len() > capacity.max(1) {
                    let Some(oldest) = entries
                        .iter()
                        .filter(|(key, _)| key.as_str() != user_id)
                        .min_by_key(|(_, entry)| entry.last_used())
                        .map(|(key, _)| key.clone())
                    else {
                        break;
                    };
                    entries.remove(&oldest);
                    debug!(user_id = %oldest, "Evicted least recently used chat session");
                }
            }
            EvictionPolicy::Idle { .. } => {
                entries.retain(|_, entry| !self.is_expired(entry, now));
            }
        }
    }

    fn is_expired(&self, entry: &CacheEntry, now: u64) -> bool {
        match self.inner.policy {
            EvictionPolicy::Idle { ttl } => {
                now.saturating_sub(entry.last_used()) > millis(ttl)
            }
            _ => false,
        }
    }

    fn now(&self) -> u64 {
        millis(self.inner.epoch.elapsed())
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
