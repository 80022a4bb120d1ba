//! Redis-backed coordination store.
//!
//! Commands go through a shared [`ConnectionManager`] (multiplexed,
//! auto-reconnecting). The two multi-step sequences run as Lua scripts so
//! the server executes them indivisibly: batch issuance (length check +
//! multi-pop) and the compare-and-delete lock release. Subscriptions use a
//! dedicated pub/sub connection each, pumped into a channel.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tokio::sync::mpsc;
use tracing::debug;

use super::CoordinationStore;
use crate::error::StoreError;

/// Removes exactly ARGV[1] elements from the head of KEYS[1], or nothing.
const TAKE_BATCH_SCRIPT: &str = r#"
local len = redis.call('LLEN', KEYS[1])
local n = tonumber(ARGV[1])
if len < n then
    return {}
end
return redis.call('LPOP', KEYS[1], n)
"#;

/// Deletes KEYS[1] only while it still holds ARGV[1].
const UNLOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// [`CoordinationStore`] backed by a Redis-compatible service.
pub struct RedisStore {
    client: redis::Client,
    conn: ConnectionManager,
    take_batch: Script,
    unlock: Script,
}

impl RedisStore {
    /// Connects to the store at `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(unavailable)?;
        Ok(Self {
            client,
            conn,
            take_batch: Script::new(TAKE_BATCH_SCRIPT),
            unlock: Script::new(UNLOCK_SCRIPT),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn unavailable(err: redis::RedisError) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let reply: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!(
                "unexpected PING reply: {reply}"
            )))
        }
    }

    async fn list_len(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn();
        conn.llen(key).await.map_err(unavailable)
    }

    async fn list_push_right(&self, key: &str, values: &[String]) -> Result<(), StoreError> {
        if values.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        let _: () = conn.rpush(key, values).await.map_err(unavailable)?;
        Ok(())
    }

    async fn list_push_left(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: () = conn.lpush(key, value).await.map_err(unavailable)?;
        Ok(())
    }

    async fn list_pop_left(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn();
        conn.lpop(key, None).await.map_err(unavailable)
    }

    async fn take_batch(&self, key: &str, n: usize) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn();
        let batch: Vec<String> = self
            .take_batch
            .key(key)
            .arg(n)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(batch)
    }

    async fn zset_add(&self, key: &str, score: i64, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: () = conn.zadd(key, member, score).await.map_err(unavailable)?;
        Ok(())
    }

    async fn zset_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn();
        conn.zrange(key, start, stop).await.map_err(unavailable)
    }

    async fn zset_remove(&self, key: &str, members: &[String]) -> Result<usize, StoreError> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        conn.zrem(key, members.to_vec()).await.map_err(unavailable)
    }

    async fn hash_exists(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        conn.hexists(key, field).await.map_err(unavailable)
    }

    async fn hash_set_if_absent(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        conn.hset_nx(key, field, value).await.map_err(unavailable)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn();
        conn.hgetall(key).await.map_err(unavailable)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: () = conn.del(key).await.map_err(unavailable)?;
        Ok(())
    }

    async fn try_set_if_absent(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(reply.is_some())
    }

    async fn release_lock_if_token_matches(
        &self,
        key: &str,
        token: &str,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let deleted: i64 = self
            .unlock
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(deleted == 1)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: () = conn.publish(channel, payload).await.map_err(unavailable)?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>, StoreError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(unavailable)?;
        pubsub.subscribe(channel).await.map_err(unavailable)?;

        let (tx, rx) = mpsc::channel(256);
        let channel = channel.to_string();
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(err) => {
                        debug!(%channel, %err, "discarding non-text pub/sub payload");
                        continue;
                    }
                };
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}
