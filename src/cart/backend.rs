use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::errors::ServiceError;

/// Storage contract for carts: one hash per owner, field per product, with
/// an inactivity TTL refreshed on every write.
///
/// Both backends satisfy identical semantics; the in-memory one simply has
/// no cross-process sharing and no durability across restarts.
#[async_trait]
pub trait CartBackend: Send + Sync {
    async fn get_all(&self, key: &str) -> Result<HashMap<String, String>, ServiceError>;
    async fn set_field(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), ServiceError>;
    async fn delete_field(&self, key: &str, field: &str) -> Result<(), ServiceError>;
    async fn delete(&self, key: &str) -> Result<(), ServiceError>;
}

/// Cart storage on a shared Redis instance.
#[derive(Clone)]
pub struct RedisCartBackend {
    conn: redis::aio::ConnectionManager,
}

impl RedisCartBackend {
    pub async fn connect(client: &redis::Client) -> Result<Self, ServiceError> {
        let conn = client.get_tokio_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CartBackend for RedisCartBackend {
    async fn get_all(&self, key: &str) -> Result<HashMap<String, String>, ServiceError> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(map)
    }

    async fn set_field(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), ServiceError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(key, field, value).await?;
        let _: () = conn.expire(key, ttl.as_secs() as usize).await?;
        Ok(())
    }

    async fn delete_field(&self, key: &str, field: &str) -> Result<(), ServiceError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hdel(key, field).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ServiceError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }
}

struct MemoryCartEntry {
    fields: HashMap<String, String>,
    expires_at: Instant,
}

/// Process-local fallback used when Redis is unavailable. Same contract,
/// no cross-process sharing.
#[derive(Default)]
pub struct MemoryCartBackend {
    store: DashMap<String, MemoryCartEntry>,
}

impl MemoryCartBackend {
    pub fn new() -> Self {
        Self {
            store: DashMap::new(),
        }
    }
}

#[async_trait]
impl CartBackend for MemoryCartBackend {
    async fn get_all(&self, key: &str) -> Result<HashMap<String, String>, ServiceError> {
        if let Some(entry) = self.store.get(key) {
            if entry.expires_at <= Instant::now() {
                drop(entry);
                self.store.remove(key);
                return Ok(HashMap::new());
            }
            return Ok(entry.fields.clone());
        }
        Ok(HashMap::new())
    }

    async fn set_field(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), ServiceError> {
        let mut entry = self.store.entry(key.to_string()).or_insert_with(|| {
            MemoryCartEntry {
                fields: HashMap::new(),
                expires_at: Instant::now() + ttl,
            }
        });
        if entry.expires_at <= Instant::now() {
            entry.fields.clear();
        }
        entry.fields.insert(field.to_string(), value.to_string());
        entry.expires_at = Instant::now() + ttl;
        Ok(())
    }

    async fn delete_field(&self, key: &str, field: &str) -> Result<(), ServiceError> {
        if let Some(mut entry) = self.store.get_mut(key) {
            entry.fields.remove(field);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ServiceError> {
        self.store.remove(key);
        Ok(())
    }
}

/// Connects to Redis, falling back to process-local storage when the cache
/// is unreachable. Callers must not assume cart durability across process
/// restarts in the fallback mode.
pub async fn connect_backend(client: &redis::Client) -> std::sync::Arc<dyn CartBackend> {
    match RedisCartBackend::connect(client).await {
        Ok(backend) => std::sync::Arc::new(backend),
        Err(e) => {
            warn!(error = %e, "Redis unavailable, falling back to in-memory cart storage");
            std::sync::Arc::new(MemoryCartBackend::new())
        }
    }
}
