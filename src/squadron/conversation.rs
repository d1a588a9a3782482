//! Rolling per-user/agent conversation store.
//!
//! History lives as a JSON-encoded list at `conversation:{user_id}:{agent_id}`
//! with a one-hour TTL refreshed on every append and a 50-message cap
//! (oldest evicted).  System messages are never stored; they are rebuilt per
//! turn from the agent definition.  Concurrent appends for the same key are
//! serialized through a short-lived `set_nx` lock so updates never
//! interleave.

use log::warn;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::squadron::client_wrapper::{Message, Role};
use crate::squadron::kv::{KvError, KvStore};

/// Maximum retained messages per conversation.
pub const DEFAULT_MAX_MESSAGES: usize = 50;

/// Conversation TTL, refreshed on each append.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Lock settings for append serialization.
const LOCK_TTL: Duration = Duration::from_secs(2);
const LOCK_RETRY: Duration = Duration::from_millis(10);
const LOCK_ATTEMPTS: usize = 200;

/// Serialized message shape; kept separate from the wire [`Message`] so the
/// stored format stays stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: String,
    pub content: String,
}

impl StoredMessage {
    fn from_message(message: &Message) -> Option<Self> {
        let role = match &message.role {
            Role::System => return None,
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool { .. } => "tool",
        };
        Some(Self {
            role: role.to_string(),
            content: message.content.as_ref().to_string(),
        })
    }

    fn to_message(&self) -> Message {
        match self.role.as_str() {
            "assistant" => Message::assistant(&self.content),
            "tool" => Message::tool("", &self.content),
            _ => Message::user(&self.content),
        }
    }
}

pub struct ConversationStore {
    kv: Arc<dyn KvStore>,
    max_messages: usize,
    ttl: Duration,
}

impl ConversationStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            max_messages: DEFAULT_MAX_MESSAGES,
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_cap(mut self, max_messages: usize) -> Self {
        self.max_messages = max_messages.max(1);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn key(user_id: &str, agent_id: &str) -> String {
        format!("conversation:{}:{}", user_id, agent_id)
    }

    fn lock_key(user_id: &str, agent_id: &str) -> String {
        format!("lock:conversation:{}:{}", user_id, agent_id)
    }

    async fn acquire_lock(&self, lock_key: &str) -> Result<(), KvError> {
        for _ in 0..LOCK_ATTEMPTS {
            if self.kv.set_nx(lock_key, "1", LOCK_TTL).await? {
                return Ok(());
            }
            tokio::time::sleep(LOCK_RETRY).await;
        }
        // The lock TTL guarantees eventual release; proceed rather than
        // fail the append.
        warn!("conversation lock '{}' contended past its window", lock_key);
        Ok(())
    }

    /// Append one message, evicting the oldest past the cap and refreshing
    /// the TTL.  System messages are ignored.
    pub async fn append(
        &self,
        user_id: &str,
        agent_id: &str,
        message: &Message,
    ) -> Result<(), KvError> {
        let stored = match StoredMessage::from_message(message) {
            Some(stored) => stored,
            None => return Ok(()),
        };

        let key = Self::key(user_id, agent_id);
        let lock_key = Self::lock_key(user_id, agent_id);

        self.acquire_lock(&lock_key).await?;
        let result = self.append_locked(&key, stored).await;
        if let Err(e) = self.kv.del(&lock_key).await {
            warn!("failed to release conversation lock '{}': {}", lock_key, e);
        }
        result
    }

    async fn append_locked(&self, key: &str, stored: StoredMessage) -> Result<(), KvError> {
        let mut history = self.read_list(key).await?;
        history.push(stored);
        if history.len() > self.max_messages {
            let excess = history.len() - self.max_messages;
            history.drain(..excess);
        }
        let encoded = serde_json::to_string(&history)
            .map_err(|e| KvError::Network(format!("conversation encode failed: {}", e)))?;
        self.kv.setex(key, &encoded, self.ttl).await
    }

    async fn read_list(&self, key: &str) -> Result<Vec<StoredMessage>, KvError> {
        match self.kv.get(key).await? {
            None => Ok(Vec::new()),
            Some(raw) => Ok(serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("discarding corrupt conversation at '{}': {}", key, e);
                Vec::new()
            })),
        }
    }

    /// Full stored history, oldest first.
    pub async fn history(&self, user_id: &str, agent_id: &str) -> Result<Vec<Message>, KvError> {
        let stored = self.read_list(&Self::key(user_id, agent_id)).await?;
        Ok(stored.iter().map(StoredMessage::to_message).collect())
    }

    pub async fn clear(&self, user_id: &str, agent_id: &str) -> Result<(), KvError> {
        self.kv.del(&Self::key(user_id, agent_id)).await
    }
}
