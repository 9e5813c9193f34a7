use crate::models::InventoryResponse;
use redis::AsyncCommands;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{sync::Mutex, time::Instant};
use tracing::warn;

/// Replays earlier responses for a repeated `Idempotency-Key`. Redis when
/// configured, otherwise an in-process map. Both expire entries after the TTL.
#[derive(Clone)]
pub enum IdempotencyStore {
    Redis {
        client: redis::Client,
        ttl_secs: u64,
    },
    Memory {
        entries: Arc<Mutex<HashMap<String, MemoryEntry>>>,
        ttl: Duration,
    },
}

#[derive(Clone)]
pub struct MemoryEntry {
    expires_at: Instant,
    response: InventoryResponse,
}

impl IdempotencyStore {
    pub fn from_env() -> Self {
        let ttl_secs = crate::http::env_secs("IDEMPOTENCY_TTL_SECS", 3600);
        match std::env::var("REDIS_URL").ok().map(redis::Client::open) {
            Some(Ok(client)) => Self::Redis { client, ttl_secs },
            Some(Err(err)) => {
                warn!(target = "furniflip.api", error = %err, "invalid REDIS_URL; using in-memory idempotency");
                Self::memory(Duration::from_secs(ttl_secs))
            }
            None => Self::memory(Duration::from_secs(ttl_secs)),
        }
    }

    pub fn memory(ttl: Duration) -> Self {
        Self::Memory {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    pub async fn get(&self, seller_id: &str, key: &str) -> Option<InventoryResponse> {
        let key = scoped_key(seller_id, key);
        match self {
            Self::Redis { client, .. } => redis_get(client, &key).await,
            Self::Memory { entries, .. } => {
                let mut entries = entries.lock().await;
                evict_expired(&mut entries);
                entries.get(&key).map(|entry| entry.response.clone())
            }
        }
    }

    pub async fn set(&self, seller_id: &str, key: &str, value: &InventoryResponse) {
        let key = scoped_key(seller_id, key);
        match self {
            Self::Redis { client, ttl_secs } => redis_set(client, &key, value, *ttl_secs).await,
            Self::Memory { entries, ttl } => {
                let mut entries = entries.lock().await;
                evict_expired(&mut entries);
                entries.insert(
                    key,
                    MemoryEntry {
                        expires_at: Instant::now() + *ttl,
                        response: value.clone(),
                    },
                );
            }
        }
    }
}

fn evict_expired(entries: &mut HashMap<String, MemoryEntry>) {
    let now = Instant::now();
    entries.retain(|_, entry| entry.expires_at > now);
}

fn scoped_key(seller_id: &str, key: &str) -> String {
    format!("furniflip:idem:{seller_id}:{key}")
}

async fn redis_get(client: &redis::Client, key: &str) -> Option<InventoryResponse> {
    let mut conn = match client.get_multiplexed_async_connection().await {
        Ok(c) => c,
        Err(err) => {
            warn!(target = "furniflip.api", error = %err, "redis unavailable");
            return None;
        }
    };
    let s: Option<String> = conn.get(key).await.ok();
    s.and_then(|v| serde_json::from_str(&v).ok())
}

async fn redis_set(client: &redis::Client, key: &str, value: &InventoryResponse, ttl_secs: u64) {
    if let Ok(mut conn) = client.get_multiplexed_async_connection().await
        && let Ok(json) = serde_json::to_string(value)
    {
        let _: Result<(), _> = conn.set_ex(key, json, ttl_secs).await;
    }
}
