//! Redis-backed lock store
//!
//! Lock hashes live under `<prefix>:locks:<handle>`; fields are lock ids and
//! values are JSON lock entries. Entries carry no TTL.

use super::store::LockStore;
use crate::error::{LockError, LockResult};
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Configuration for the Redis lock store
#[derive(Debug, Clone)]
pub struct RedisLockConfig {
    /// Redis connection URL
    pub url: String,
    /// Key prefix for namespacing
    pub key_prefix: String,
}

impl Default for RedisLockConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "nfs-dynamo".to_string(),
        }
    }
}

impl RedisLockConfig {
    /// Create config with custom Redis URL
    pub fn with_url(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Default::default()
        }
    }

    /// Full Redis key for a lock hash
    pub fn key(&self, hash_key: &str) -> String {
        format!("{}:locks:{}", self.key_prefix, hash_key)
    }
}

/// Lock store shared by every worker through Redis
pub struct RedisLockStore {
    connection: Arc<RwLock<MultiplexedConnection>>,
    config: RedisLockConfig,
}

impl RedisLockStore {
    /// Connect to Redis
    pub async fn connect(config: RedisLockConfig) -> LockResult<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| LockError::ConnectionFailed {
            url: config.url.clone(),
            reason: e.to_string(),
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| LockError::ConnectionFailed {
                url: config.url.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            connection: Arc::new(RwLock::new(connection)),
            config,
        })
    }

    pub fn config(&self) -> &RedisLockConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl LockStore for RedisLockStore {
    async fn hash_fields_get(&self, key: &str) -> LockResult<HashMap<String, String>> {
        let mut conn = self.connection.write().await;
        let fields: HashMap<String, String> = conn.hgetall(self.config.key(key)).await?;
        Ok(fields)
    }

    async fn hash_field_set(&self, key: &str, field: &str, value: &str) -> LockResult<()> {
        let mut conn = self.connection.write().await;
        let _: () = conn.hset(self.config.key(key), field, value).await?;
        Ok(())
    }

    async fn hash_field_delete(&self, key: &str, field: &str) -> LockResult<bool> {
        let mut conn = self.connection.write().await;
        let removed: i64 = conn.hdel(self.config.key(key), field).await?;
        Ok(removed > 0)
    }
}
