//! In-process coordination store for tests.
//!
//! One mutex guards the whole keyspace, so every trait operation is trivially
//! atomic with respect to every other, mirroring the guarantees the Redis
//! backend gets from single-threaded command execution and Lua scripts.
//! Pub/sub is backed by plain channels.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::CoordinationStore;
use crate::error::StoreError;

/// In-memory [`CoordinationStore`] implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<String>>>>,
}

#[derive(Default)]
struct Inner {
    lists: HashMap<String, VecDeque<String>>,
    /// Members kept sorted by `(score, member)`, the sorted-set order.
    zsets: HashMap<String, Vec<(i64, String)>>,
    hashes: HashMap<String, HashMap<String, String>>,
    locks: HashMap<String, LockEntry>,
}

struct LockEntry {
    token: String,
    expires_at: Instant,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn list_len(&self, key: &str) -> Result<u64, StoreError> {
        let inner = self.inner.lock();
        Ok(inner.lists.get(key).map_or(0, |l| l.len() as u64))
    }

    async fn list_push_right(&self, key: &str, values: &[String]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let list = inner.lists.entry(key.to_string()).or_default();
        list.extend(values.iter().cloned());
        Ok(())
    }

    async fn list_push_left(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner
            .lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        Ok(())
    }

    async fn list_pop_left(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut inner = self.inner.lock();
        Ok(inner.lists.get_mut(key).and_then(|l| l.pop_front()))
    }

    async fn take_batch(&self, key: &str, n: usize) -> Result<Vec<String>, StoreError> {
        let mut inner = self.inner.lock();
        let Some(list) = inner.lists.get_mut(key) else {
            return Ok(Vec::new());
        };
        if list.len() < n {
            return Ok(Vec::new());
        }
        Ok(list.drain(..n).collect())
    }

    async fn zset_add(&self, key: &str, score: i64, member: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let set = inner.zsets.entry(key.to_string()).or_default();
        set.retain(|(_, m)| m != member);
        let entry = (score, member.to_string());
        let pos = set.partition_point(|e| *e < entry);
        set.insert(pos, entry);
        Ok(())
    }

    async fn zset_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock();
        let Some(set) = inner.zsets.get(key) else {
            return Ok(Vec::new());
        };
        let len = set.len() as isize;
        let resolve = |i: isize| -> isize {
            if i < 0 {
                len + i
            } else {
                i
            }
        };
        let start = resolve(start).max(0);
        let stop = resolve(stop).min(len - 1);
        if start > stop || len == 0 {
            return Ok(Vec::new());
        }
        Ok(set[start as usize..=stop as usize]
            .iter()
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn zset_remove(&self, key: &str, members: &[String]) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock();
        let Some(set) = inner.zsets.get_mut(key) else {
            return Ok(0);
        };
        let before = set.len();
        set.retain(|(_, m)| !members.contains(m));
        Ok(before - set.len())
    }

    async fn hash_exists(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .hashes
            .get(key)
            .is_some_and(|h| h.contains_key(field)))
    }

    async fn hash_set_if_absent(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let hash = inner.hashes.entry(key.to_string()).or_default();
        if hash.contains_key(field) {
            return Ok(false);
        }
        hash.insert(field.to_string(), value.to_string());
        Ok(true)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.lists.remove(key);
        inner.zsets.remove(key);
        inner.hashes.remove(key);
        inner.locks.remove(key);
        Ok(())
    }

    async fn try_set_if_absent(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        if let Some(existing) = inner.locks.get(key) {
            if existing.expires_at > now {
                return Ok(false);
            }
        }
        inner.locks.insert(
            key.to_string(),
            LockEntry {
                token: token.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn release_lock_if_token_matches(
        &self,
        key: &str,
        token: &str,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        match inner.locks.get(key) {
            Some(entry) if entry.token == token => {
                inner.locks.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError> {
        let senders = {
            let mut subscribers = self.subscribers.lock();
            let Some(list) = subscribers.get_mut(channel) else {
                return Ok(());
            };
            list.retain(|tx| !tx.is_closed());
            list.clone()
        };
        for tx in senders {
            let _ = tx.send(payload.to_string()).await;
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>, StoreError> {
        let (tx, rx) = mpsc::channel(256);
        self.subscribers
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}
