//! In-process map-backed implementation of [`KvStore`].
//!
//! Keeps the same observable semantics as the networked store (inclusive
//! sorted-set ranges ordered by score then member, lazy TTL eviction) so the
//! rate limiter behaves identically against either backend.  Not durable.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::{KvCommand, KvError, KvStore, KvValue};

enum Slot {
    Value(String),
    Hash(HashMap<String, String>),
    Zset(HashMap<String, f64>),
}

struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        matches!(self.expires_at, Some(at) if at <= Instant::now())
    }
}

/// In-memory store; a single async mutex makes every operation (and every
/// pipeline) atomic with respect to concurrent callers.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Lock-held command evaluation shared by the trait methods and `pipeline`.
fn apply(entries: &mut HashMap<String, Entry>, command: &KvCommand) -> Result<KvValue, KvError> {
    match command {
        KvCommand::Get { key } => match live_entry(entries, key) {
            Some(Entry {
                slot: Slot::Value(v),
                ..
            }) => Ok(KvValue::Text(v.clone())),
            Some(_) => Err(KvError::WrongType(key.clone())),
            None => Ok(KvValue::Nil),
        },
        KvCommand::Set { key, value } => {
            entries.insert(
                key.clone(),
                Entry {
                    slot: Slot::Value(value.clone()),
                    expires_at: None,
                },
            );
            Ok(KvValue::Nil)
        }
        KvCommand::SetEx { key, value, ttl } => {
            entries.insert(
                key.clone(),
                Entry {
                    slot: Slot::Value(value.clone()),
                    expires_at: Some(Instant::now() + *ttl),
                },
            );
            Ok(KvValue::Nil)
        }
        KvCommand::Del { key } => {
            entries.remove(key);
            Ok(KvValue::Nil)
        }
        KvCommand::ZAdd { key, score, member } => {
            let entry = entries.entry(key.clone()).or_insert_with(|| Entry {
                slot: Slot::Zset(HashMap::new()),
                expires_at: None,
            });
            if entry.expired() {
                entry.slot = Slot::Zset(HashMap::new());
                entry.expires_at = None;
            }
            match &mut entry.slot {
                Slot::Zset(set) => {
                    set.insert(member.clone(), *score);
                    Ok(KvValue::Nil)
                }
                _ => Err(KvError::WrongType(key.clone())),
            }
        }
        KvCommand::ZRemRangeByScore { key, lo, hi } => match live_entry_mut(entries, key) {
            Some(Entry {
                slot: Slot::Zset(set),
                ..
            }) => {
                let before = set.len();
                set.retain(|_, score| !(*lo <= *score && *score <= *hi));
                Ok(KvValue::Int((before - set.len()) as i64))
            }
            Some(_) => Err(KvError::WrongType(key.clone())),
            None => Ok(KvValue::Int(0)),
        },
        KvCommand::ZCount { key, lo, hi } => match live_entry(entries, key) {
            Some(Entry {
                slot: Slot::Zset(set),
                ..
            }) => {
                let n = set
                    .values()
                    .filter(|score| *lo <= **score && **score <= *hi)
                    .count();
                Ok(KvValue::Int(n as i64))
            }
            Some(_) => Err(KvError::WrongType(key.clone())),
            None => Ok(KvValue::Int(0)),
        },
        KvCommand::ZRangeByScore { key, lo, hi } => match live_entry(entries, key) {
            Some(Entry {
                slot: Slot::Zset(set),
                ..
            }) => {
                let mut members: Vec<(&String, &f64)> = set
                    .iter()
                    .filter(|(_, score)| *lo <= **score && **score <= *hi)
                    .collect();
                // Score order, ties broken by member, matching ZRANGEBYSCORE.
                members.sort_by(|a, b| {
                    a.1.partial_cmp(b.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.0.cmp(b.0))
                });
                Ok(KvValue::List(
                    members.into_iter().map(|(m, _)| m.clone()).collect(),
                ))
            }
            Some(_) => Err(KvError::WrongType(key.clone())),
            None => Ok(KvValue::List(Vec::new())),
        },
        KvCommand::Expire { key, ttl } => {
            if let Some(entry) = live_entry_mut(entries, key) {
                entry.expires_at = Some(Instant::now() + *ttl);
            }
            Ok(KvValue::Nil)
        }
    }
}

fn live_entry<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a Entry> {
    evict_if_expired(entries, key);
    entries.get(key)
}

fn live_entry_mut<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    evict_if_expired(entries, key);
    entries.get_mut(key)
}

fn evict_if_expired(entries: &mut HashMap<String, Entry>, key: &str) {
    if entries.get(key).map(Entry::expired).unwrap_or(false) {
        entries.remove(key);
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut entries = self.entries.lock().await;
        match apply(&mut entries, &KvCommand::Get { key: key.to_string() })? {
            KvValue::Text(v) => Ok(Some(v)),
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut entries = self.entries.lock().await;
        apply(
            &mut entries,
            &KvCommand::Set {
                key: key.to_string(),
                value: value.to_string(),
            },
        )?;
        Ok(())
    }

    async fn setex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let mut entries = self.entries.lock().await;
        apply(
            &mut entries,
            &KvCommand::SetEx {
                key: key.to_string(),
                value: value.to_string(),
                ttl,
            },
        )?;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut entries = self.entries.lock().await;
        evict_if_expired(&mut entries, key);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Value(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        let mut entries = self.entries.lock().await;
        entries.remove(key);
        Ok(())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), KvError> {
        let mut entries = self.entries.lock().await;
        evict_if_expired(&mut entries, key);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            slot: Slot::Hash(HashMap::new()),
            expires_at: None,
        });
        match &mut entry.slot {
            Slot::Hash(map) => {
                map.insert(field.to_string(), value.to_string());
                Ok(())
            }
            _ => Err(KvError::WrongType(key.to_string())),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError> {
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key) {
            Some(Entry {
                slot: Slot::Hash(map),
                ..
            }) => Ok(map.get(field).cloned()),
            Some(_) => Err(KvError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), KvError> {
        let mut entries = self.entries.lock().await;
        apply(
            &mut entries,
            &KvCommand::ZAdd {
                key: key.to_string(),
                score,
                member: member.to_string(),
            },
        )?;
        Ok(())
    }

    async fn zrangebyscore(&self, key: &str, lo: f64, hi: f64) -> Result<Vec<String>, KvError> {
        let mut entries = self.entries.lock().await;
        match apply(
            &mut entries,
            &KvCommand::ZRangeByScore {
                key: key.to_string(),
                lo,
                hi,
            },
        )? {
            KvValue::List(members) => Ok(members),
            _ => Ok(Vec::new()),
        }
    }

    async fn zremrangebyscore(&self, key: &str, lo: f64, hi: f64) -> Result<u64, KvError> {
        let mut entries = self.entries.lock().await;
        let removed = apply(
            &mut entries,
            &KvCommand::ZRemRangeByScore {
                key: key.to_string(),
                lo,
                hi,
            },
        )?;
        Ok(removed.as_int() as u64)
    }

    async fn zcount(&self, key: &str, lo: f64, hi: f64) -> Result<u64, KvError> {
        let mut entries = self.entries.lock().await;
        let count = apply(
            &mut entries,
            &KvCommand::ZCount {
                key: key.to_string(),
                lo,
                hi,
            },
        )?;
        Ok(count.as_int() as u64)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvError> {
        let mut entries = self.entries.lock().await;
        apply(
            &mut entries,
            &KvCommand::Expire {
                key: key.to_string(),
                ttl,
            },
        )?;
        Ok(())
    }

    async fn pipeline(&self, commands: Vec<KvCommand>) -> Result<Vec<KvValue>, KvError> {
        // One lock acquisition for the whole batch keeps it atomic.
        let mut entries = self.entries.lock().await;
        let mut results = Vec::with_capacity(commands.len());
        for command in &commands {
            results.push(apply(&mut entries, command)?);
        }
        Ok(results)
    }
}
