//! Redis-backed implementation of [`KvStore`] (cargo feature `redis-store`).
//!
//! Wraps a tokio [`ConnectionManager`], which transparently reconnects after
//! transport drops.  Every transport failure maps to [`KvError::Network`] so
//! the rate gate and conversation store degrade through the same error path
//! regardless of backend.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;

use super::{KvCommand, KvError, KvStore, KvValue};

pub struct RedisKvStore {
    manager: ConnectionManager,
}

impl RedisKvStore {
    /// Connect to the store at `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(url).map_err(to_kv_error)?;
        let manager = ConnectionManager::new(client).await.map_err(to_kv_error)?;
        Ok(Self { manager })
    }
}

fn to_kv_error(err: redis::RedisError) -> KvError {
    if err.kind() == redis::ErrorKind::TypeError {
        KvError::WrongType(err.to_string())
    } else {
        KvError::Network(err.to_string())
    }
}

/// ZRANGEBYSCORE bounds accept `-inf`/`+inf`; numeric scores pass through.
fn fmt_score(score: f64) -> String {
    if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else if score == f64::INFINITY {
        "+inf".to_string()
    } else {
        score.to_string()
    }
}

fn add_command(pipe: &mut redis::Pipeline, command: &KvCommand) {
    match command {
        KvCommand::Get { key } => {
            pipe.cmd("GET").arg(key);
        }
        KvCommand::Set { key, value } => {
            pipe.cmd("SET").arg(key).arg(value);
        }
        KvCommand::SetEx { key, value, ttl } => {
            pipe.cmd("SETEX").arg(key).arg(ttl.as_secs().max(1)).arg(value);
        }
        KvCommand::Del { key } => {
            pipe.cmd("DEL").arg(key);
        }
        KvCommand::ZAdd { key, score, member } => {
            pipe.cmd("ZADD").arg(key).arg(*score).arg(member);
        }
        KvCommand::ZRemRangeByScore { key, lo, hi } => {
            pipe.cmd("ZREMRANGEBYSCORE")
                .arg(key)
                .arg(fmt_score(*lo))
                .arg(fmt_score(*hi));
        }
        KvCommand::ZCount { key, lo, hi } => {
            pipe.cmd("ZCOUNT")
                .arg(key)
                .arg(fmt_score(*lo))
                .arg(fmt_score(*hi));
        }
        KvCommand::ZRangeByScore { key, lo, hi } => {
            pipe.cmd("ZRANGEBYSCORE")
                .arg(key)
                .arg(fmt_score(*lo))
                .arg(fmt_score(*hi));
        }
        KvCommand::Expire { key, ttl } => {
            pipe.cmd("EXPIRE").arg(key).arg(ttl.as_secs().max(1));
        }
    }
}

fn convert(value: redis::Value) -> KvValue {
    match value {
        redis::Value::Nil => KvValue::Nil,
        redis::Value::Int(n) => KvValue::Int(n),
        redis::Value::BulkString(bytes) => {
            KvValue::Text(String::from_utf8_lossy(&bytes).into_owned())
        }
        redis::Value::Array(items) => KvValue::List(
            items
                .into_iter()
                .map(|item| match convert(item) {
                    KvValue::Text(s) => s,
                    other => format!("{:?}", other),
                })
                .collect(),
        ),
        redis::Value::SimpleString(s) => KvValue::Text(s),
        _ => KvValue::Nil,
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(to_kv_error)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await
            .map_err(to_kv_error)
    }

    async fn setex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        redis::cmd("SETEX")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .arg(value)
            .query_async::<()>(&mut conn)
            .await
            .map_err(to_kv_error)
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(to_kv_error)?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(to_kv_error)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await
            .map_err(to_kv_error)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.manager.clone();
        redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await
            .map_err(to_kv_error)
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async::<()>(&mut conn)
            .await
            .map_err(to_kv_error)
    }

    async fn zrangebyscore(&self, key: &str, lo: f64, hi: f64) -> Result<Vec<String>, KvError> {
        let mut conn = self.manager.clone();
        redis::cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg(fmt_score(lo))
            .arg(fmt_score(hi))
            .query_async(&mut conn)
            .await
            .map_err(to_kv_error)
    }

    async fn zremrangebyscore(&self, key: &str, lo: f64, hi: f64) -> Result<u64, KvError> {
        let mut conn = self.manager.clone();
        redis::cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg(fmt_score(lo))
            .arg(fmt_score(hi))
            .query_async(&mut conn)
            .await
            .map_err(to_kv_error)
    }

    async fn zcount(&self, key: &str, lo: f64, hi: f64) -> Result<u64, KvError> {
        let mut conn = self.manager.clone();
        redis::cmd("ZCOUNT")
            .arg(key)
            .arg(fmt_score(lo))
            .arg(fmt_score(hi))
            .query_async(&mut conn)
            .await
            .map_err(to_kv_error)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .query_async::<()>(&mut conn)
            .await
            .map_err(to_kv_error)
    }

    async fn pipeline(&self, commands: Vec<KvCommand>) -> Result<Vec<KvValue>, KvError> {
        let mut conn = self.manager.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for command in &commands {
            add_command(&mut pipe, command);
        }
        let values: Vec<redis::Value> =
            pipe.query_async(&mut conn).await.map_err(to_kv_error)?;
        Ok(values.into_iter().map(convert).collect())
    }
}
