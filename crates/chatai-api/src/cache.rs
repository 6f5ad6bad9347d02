use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use chatai_types::models::ChatMessage;

/// How long a conversation stays cached after its last message.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// How often expired conversations are swept.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct CachedConversation {
    messages: Vec<ChatMessage>,
    evict_at: Instant,
}

/// Recent conversation history, kept in memory so follow-up messages can be
/// sent upstream with context without a database round trip.
#[derive(Clone)]
pub struct ConversationCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    ttl: Duration,
    entries: RwLock<HashMap<Uuid, CachedConversation>>,
}

impl Default for ConversationCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl ConversationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                ttl,
                entries: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Cached history of a conversation; empty when unknown or expired.
    pub async fn get(&self, conversation_id: Uuid) -> Vec<ChatMessage> {
        self.get_at(conversation_id, Instant::now()).await
    }

    /// Append a message and push the conversation's eviction deadline out.
    pub async fn add(&self, conversation_id: Uuid, message: ChatMessage) {
        self.add_at(conversation_id, message, Instant::now()).await
    }

    pub async fn remove(&self, conversation_id: Uuid) -> bool {
        self.inner.entries.write().await.remove(&conversation_id).is_some()
    }

    /// Drop every expired conversation. Returns how many were dropped.
    pub async fn sweep(&self) -> usize {
        self.sweep_at(Instant::now()).await
    }

    pub async fn len(&self) -> usize {
        self.inner.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn get_at(&self, conversation_id: Uuid, now: Instant) -> Vec<ChatMessage> {
        let entries = self.inner.entries.read().await;
        match entries.get(&conversation_id) {
            Some(entry) if entry.evict_at > now => entry.messages.clone(),
            _ => Vec::new(),
        }
    }

    async fn add_at(&self, conversation_id: Uuid, message: ChatMessage, now: Instant) {
        let evict_at = now + self.inner.ttl;
        let mut entries = self.inner.entries.write().await;
        let entry = entries
            .entry(conversation_id)
            .or_insert_with(|| CachedConversation {
                messages: Vec::new(),
                evict_at,
            });
        // An entry that expired but was not swept yet starts over.
        if entry.evict_at <= now {
            entry.messages.clear();
        }
        entry.messages.push(message);
        entry.evict_at = evict_at;
    }

    async fn sweep_at(&self, now: Instant) -> usize {
        let mut entries = self.inner.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.evict_at > now);
        before - entries.len()
    }
}

/// Background task that sweeps the cache on a fixed interval.
pub async fn run_sweep_loop(cache: ConversationCache, interval: Duration) {
    let mut interval = tokio::time::interval(interval);

    loop {
        interval.tick().await;

        let removed = cache.sweep().await;
        if removed > 0 {
            debug!("Cache sweep: evicted {} conversations", removed);
        }
    }
}
