//! Fast-store layout:
//! - `sess:<sessionId>` → session profile JSON (no TTL; liveness is the zset)
//! - `sessions:lastAccess` → sorted set of session ids scored by last-access ms
//! - `score_buffer` → hash of postId → accumulated score delta
//!
//! Per-session read-modify-write is serialized by an in-process lock
//! registry; the fast store itself only sees whole-blob writes.

use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::SessionProfile;

pub const SESSION_KEY_PREFIX: &str = "sess:";
pub const SESSION_LAST_ACCESS_ZSET: &str = "sessions:lastAccess";
pub const SCORE_BUFFER_HASH: &str = "score_buffer";

#[derive(Clone)]
pub struct SessionStore {
    redis: ConnectionManager,
}

impl SessionStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| AppError::Internal(format!("Failed to create Redis client: {}", e)))?;
        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to connect to Redis: {}", e)))?;
        Ok(Self { redis })
    }

    pub fn from_manager(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    fn session_key(session_id: &str) -> String {
        format!("{}{}", SESSION_KEY_PREFIX, session_id)
    }

    /// Load and parse the session blob. A present-but-corrupt blob is a
    /// distinct error so callers can treat it as expired.
    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionProfile>> {
        let raw: Option<String> = self
            .redis
            .clone()
            .get(Self::session_key(session_id))
            .await?;
        match raw {
            Some(json) => serde_json::from_str::<SessionProfile>(&json)
                .map(Some)
                .map_err(|e| {
                    warn!("Corrupt session blob for {}: {}", session_id, e);
                    AppError::CorruptSession(session_id.to_string())
                }),
            None => Ok(None),
        }
    }

    pub async fn put_session(&self, session_id: &str, profile: &SessionProfile) -> Result<()> {
        let json = serde_json::to_string(profile)?;
        let _: () = self
            .redis
            .clone()
            .set(Self::session_key(session_id), json)
            .await?;
        Ok(())
    }

    /// Refresh the last-access score for a session.
    pub async fn touch(&self, session_id: &str, now_ms: i64) -> Result<()> {
        let _: () = self
            .redis
            .clone()
            .zadd(SESSION_LAST_ACCESS_ZSET, session_id, now_ms)
            .await?;
        Ok(())
    }

    /// Session ids whose last access is at or before `cutoff_ms`.
    pub async fn sessions_idle_since(&self, cutoff_ms: i64) -> Result<Vec<String>> {
        let ids: Vec<String> = self
            .redis
            .clone()
            .zrangebyscore(SESSION_LAST_ACCESS_ZSET, 0, cutoff_ms)
            .await?;
        Ok(ids)
    }

    /// Delete the blob and the sorted-set entry together.
    pub async fn remove_session(&self, session_id: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        redis::pipe()
            .atomic()
            .del(Self::session_key(session_id))
            .ignore()
            .zrem(SESSION_LAST_ACCESS_ZSET, session_id)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Drop only the index entry (used when the blob is already gone).
    pub async fn remove_index_entry(&self, session_id: &str) -> Result<()> {
        let _: () = self
            .redis
            .clone()
            .zrem(SESSION_LAST_ACCESS_ZSET, session_id)
            .await?;
        Ok(())
    }

    // ---- score buffer mirror ----

    pub async fn buffer_incr(&self, post_id: Uuid, delta: f64) -> Result<f64> {
        let mut conn = self.redis.clone();
        let total: f64 = redis::cmd("HINCRBYFLOAT")
            .arg(SCORE_BUFFER_HASH)
            .arg(post_id.to_string())
            .arg(delta)
            .query_async(&mut conn)
            .await?;
        Ok(total)
    }

    pub async fn buffer_snapshot(&self) -> Result<HashMap<Uuid, f64>> {
        let raw: HashMap<String, f64> = self.redis.clone().hgetall(SCORE_BUFFER_HASH).await?;
        let mut snapshot = HashMap::with_capacity(raw.len());
        for (key, value) in raw {
            match key.parse::<Uuid>() {
                Ok(post_id) => {
                    snapshot.insert(post_id, value);
                }
                Err(_) => warn!("Dropping malformed score_buffer field: {}", key),
            }
        }
        Ok(snapshot)
    }

    pub async fn buffer_remove(&self, post_id: Uuid) -> Result<()> {
        let _: () = self
            .redis
            .clone()
            .hdel(SCORE_BUFFER_HASH, post_id.to_string())
            .await?;
        Ok(())
    }
}

/// Single-writer guard per session id within this instance.
#[derive(Clone, Default)]
pub struct SessionLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the registry entry once a session is destroyed.
    pub fn forget(&self, session_id: &str) {
        self.locks.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_locks_serialize_same_id() {
        let locks = SessionLocks::new();
        let guard = locks.acquire("s1").await;

        let locks2 = locks.clone();
        let contended = tokio::spawn(async move {
            let _g = locks2.acquire("s1").await;
        });

        // The second acquire cannot complete while the guard is held.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!contended.is_finished());

        drop(guard);
        contended.await.unwrap();
    }

    #[tokio::test]
    async fn test_session_locks_independent_ids() {
        let locks = SessionLocks::new();
        let _a = locks.acquire("a").await;
        // A different session id must not block.
        let _b = locks.acquire("b").await;
    }
}
