//! Key/value storage abstraction.
//!
//! This is the only storage primitive the core depends on.  It exposes the
//! small slice of Redis semantics the rate limiter and the conversation store
//! actually use: plain values with TTLs, hashes, and sorted sets, plus a
//! batched [`pipeline`](KvStore::pipeline) that applies as a unit.
//!
//! Two implementations live behind the trait:
//!
//! - [`MemoryKvStore`]: in-process, always available, used by tests and as a
//!   degraded-operation fallback.  Mirrors the networked store's sorted-set
//!   ordering and TTL eviction rules; not durable.
//! - `RedisKvStore` (cargo feature `redis-store`): production store over a
//!   tokio connection manager.  Transport failures map to
//!   [`KvError::Network`], which call sites surface as
//!   [`FailureKind::Network`](crate::squadron::error::FailureKind::Network).
//!
//! Whether to fall back to the in-process store when the networked store is
//! unreachable at startup is a bootstrap-layer decision; the abstraction
//! merely makes both ends of that choice interchangeable.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

mod memory;
pub use memory::MemoryKvStore;

#[cfg(feature = "redis-store")]
mod redis_store;
#[cfg(feature = "redis-store")]
pub use redis_store::RedisKvStore;

/// Storage-layer failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KvError {
    /// The networked store is unreachable or the transport failed mid-call.
    #[error("kv transport error: {0}")]
    Network(String),

    /// The key exists but holds a different data type than the operation
    /// expects (e.g. `zadd` against a plain string key).
    #[error("wrong type for key '{0}'")]
    WrongType(String),
}

/// One command inside a [`KvStore::pipeline`] batch.
#[derive(Debug, Clone)]
pub enum KvCommand {
    Get { key: String },
    Set { key: String, value: String },
    SetEx { key: String, value: String, ttl: Duration },
    Del { key: String },
    ZAdd { key: String, score: f64, member: String },
    ZRemRangeByScore { key: String, lo: f64, hi: f64 },
    ZCount { key: String, lo: f64, hi: f64 },
    ZRangeByScore { key: String, lo: f64, hi: f64 },
    Expire { key: String, ttl: Duration },
}

/// Result of one pipelined command.
#[derive(Debug, Clone, PartialEq)]
pub enum KvValue {
    /// Mutation acknowledged, or key absent on a read.
    Nil,
    /// Counting commands (`ZCount`, `ZRemRangeByScore`).
    Int(i64),
    /// Plain-value reads.
    Text(String),
    /// Range reads.
    List(Vec<String>),
}

impl KvValue {
    /// Convenience accessor for counting commands; `Nil` reads as zero.
    pub fn as_int(&self) -> i64 {
        match self {
            KvValue::Int(n) => *n,
            _ => 0,
        }
    }
}

/// Redis-shaped storage operations.
///
/// All mutating operations are atomic at the key level; pipelines apply as a
/// unit.  Sorted-set ranges are inclusive on both bounds and return members
/// ordered by score, ties broken lexicographically by member.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), KvError>;
    async fn setex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError>;

    /// Set the key only if it does not already exist, with a TTL.  Returns
    /// `true` when the key was created.  This is the compare-and-swap
    /// primitive backing short-lived per-key locks.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError>;

    async fn del(&self, key: &str) -> Result<(), KvError>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), KvError>;
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError>;

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), KvError>;
    async fn zrangebyscore(&self, key: &str, lo: f64, hi: f64) -> Result<Vec<String>, KvError>;
    async fn zremrangebyscore(&self, key: &str, lo: f64, hi: f64) -> Result<u64, KvError>;
    async fn zcount(&self, key: &str, lo: f64, hi: f64) -> Result<u64, KvError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvError>;

    /// Execute a batch of commands as one atomic unit, returning one
    /// [`KvValue`] per command in order.
    async fn pipeline(&self, commands: Vec<KvCommand>) -> Result<Vec<KvValue>, KvError>;
}
