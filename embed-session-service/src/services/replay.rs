//! Grace-window replay cache.
//!
//! When a rotation wins, its freshly minted pair is cached under the
//! consumed generation's id for exactly the grace period. A benign replay
//! (client double-submit, timed-out retry, or the loser of a concurrent
//! rotation) is answered from here with the identical pair. Entries are
//! intentionally lossy: a crash only downgrades a replay to a re-auth, never
//! weakens a revocation.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::{aio::ConnectionManager, Client};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::tokens::SessionTokenPair;
use crate::config::RedisConfig;

#[async_trait]
pub trait ReplayCache: Send + Sync {
    /// Cache the pair minted when `consumed_id` was rotated, for `ttl_seconds`.
    async fn put_pair(
        &self,
        consumed_id: Uuid,
        pair: &SessionTokenPair,
        ttl_seconds: i64,
    ) -> Result<(), anyhow::Error>;

    /// Fetch the cached successor pair for a consumed generation, if any.
    async fn fetch_pair(&self, consumed_id: Uuid) -> Result<Option<SessionTokenPair>, anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct RedisReplayCache {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisReplayCache {
    pub async fn connect(config: &RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!(url = %config.url, "Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        // ConnectionManager reconnects automatically.
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }

    fn cache_key(consumed_id: Uuid) -> String {
        format!("replay:{}", consumed_id)
    }
}

#[async_trait]
impl ReplayCache for RedisReplayCache {
    async fn put_pair(
        &self,
        consumed_id: Uuid,
        pair: &SessionTokenPair,
        ttl_seconds: i64,
    ) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let payload = serde_json::to_string(pair)?;

        redis::cmd("SET")
            .arg(Self::cache_key(consumed_id))
            .arg(payload)
            .arg("EX")
            .arg(ttl_seconds.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to cache replay pair: {}", e))
    }

    async fn fetch_pair(
        &self,
        consumed_id: Uuid,
    ) -> Result<Option<SessionTokenPair>, anyhow::Error> {
        let mut conn = self.manager.clone();
        let payload: Option<String> = redis::cmd("GET")
            .arg(Self::cache_key(consumed_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to fetch replay pair: {}", e))?;

        match payload {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

/// In-process replay cache for tests and local development.
pub struct MemoryReplayCache {
    entries: Mutex<HashMap<Uuid, (SessionTokenPair, DateTime<Utc>)>>,
}

impl Default for MemoryReplayCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryReplayCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ReplayCache for MemoryReplayCache {
    async fn put_pair(
        &self,
        consumed_id: Uuid,
        pair: &SessionTokenPair,
        ttl_seconds: i64,
    ) -> Result<(), anyhow::Error> {
        let deadline = Utc::now() + Duration::seconds(ttl_seconds.max(1));
        self.entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Replay cache mutex poisoned: {}", e))?
            .insert(consumed_id, (pair.clone(), deadline));
        Ok(())
    }

    async fn fetch_pair(
        &self,
        consumed_id: Uuid,
    ) -> Result<Option<SessionTokenPair>, anyhow::Error> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Replay cache mutex poisoned: {}", e))?;
        Ok(entries.get(&consumed_id).and_then(|(pair, deadline)| {
            if *deadline > Utc::now() {
                Some(pair.clone())
            } else {
                None
            }
        }))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}
