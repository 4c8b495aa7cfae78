// Shared key-value store binding for rate-limit cells

use crate::config::Config;
use crate::core::errors::GatewayError;
use async_trait::async_trait;
use bb8_redis::redis::AsyncCommands;
use bb8_redis::{bb8::Pool, RedisConnectionManager};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::time::Duration as TokioDuration;

/// String key-value store with per-key TTL
///
/// Last-write-wins across concurrent writers; callers must tolerate
/// minor races (the rate limiter does).
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, GatewayError>;
    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<(), GatewayError>;
}

/// Redis-backed store using a bb8 connection pool
///
/// The pool handles reconnection when connections break; individual
/// operations are wrapped in the configured timeouts so a slow Redis
/// cannot stall request validation.
pub struct RedisKvStore {
    pool: Pool<RedisConnectionManager>,
    operation_timeout: TokioDuration,
}

impl RedisKvStore {
    pub async fn new(redis_url: &str, config: &Config) -> Result<Self, GatewayError> {
        let manager = RedisConnectionManager::new(redis_url).map_err(|e| {
            GatewayError::State(format!("Failed to create Redis connection manager: {}", e))
        })?;

        let pool = tokio::time::timeout(
            TokioDuration::from_secs(config.redis_connection_timeout_secs),
            Pool::builder()
                .max_size(config.redis_pool_max_size)
                .min_idle(0) // Lazy initialization - don't block on startup
                .build(manager),
        )
        .await
        .map_err(|_| {
            GatewayError::State(format!(
                "Redis pool build timed out after {} seconds",
                config.redis_connection_timeout_secs
            ))
        })?
        .map_err(|e| GatewayError::State(format!("Failed to build Redis pool: {}", e)))?;

        Ok(Self {
            pool,
            operation_timeout: TokioDuration::from_secs(config.redis_operation_timeout_secs),
        })
    }

    async fn connection(
        &self,
    ) -> Result<bb8_redis::bb8::PooledConnection<'_, RedisConnectionManager>, GatewayError> {
        self.pool
            .get()
            .await
            .map_err(|e| GatewayError::State(format!("Failed to get connection from pool: {}", e)))
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, GatewayError> {
        let mut conn = self.connection().await?;

        tokio::time::timeout(self.operation_timeout, conn.get::<_, Option<String>>(key))
            .await
            .map_err(|_| {
                GatewayError::State(format!(
                    "GET timed out after {:?} for key: {}",
                    self.operation_timeout, key
                ))
            })?
            .map_err(|e| GatewayError::State(format!("GET failed: {}", e)))
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<(), GatewayError> {
        let mut conn = self.connection().await?;

        tokio::time::timeout(
            self.operation_timeout,
            conn.set_ex::<_, _, ()>(key, value, ttl_seconds),
        )
        .await
        .map_err(|_| {
            GatewayError::State(format!(
                "SET timed out after {:?} for key: {}",
                self.operation_timeout, key
            ))
        })?
        .map_err(|e| GatewayError::State(format!("SET failed: {}", e)))
    }
}

/// In-memory store for tests and single-process deployments
///
/// Expiry is checked lazily on read; nothing evicts in the background.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, GatewayError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| GatewayError::State("KV store lock poisoned".to_string()))?;

        match entries.get(key) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<(), GatewayError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| GatewayError::State("KV store lock poisoned".to_string()))?;

        entries.insert(
            key.to_string(),
            (
                value.to_string(),
                Instant::now() + Duration::from_secs(ttl_seconds),
            ),
        );
        Ok(())
    }
}
