//! Fast status cache in front of the request store
//!
//! Entries expire after a TTL. A miss never means the request is unknown;
//! callers fall back to the store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use text2iac_common::InfrastructureRequest;
use tokio::sync::RwLock;
use tracing::info;

#[async_trait]
pub trait StatusCache: Send + Sync {
    /// Cache the record unless the cached copy is at a later status.
    /// A cached terminal record is never replaced by another status.
    async fn put(&self, request: &InfrastructureRequest) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<InfrastructureRequest>>;
}

/// Set the entry unless it would move the cached status backwards.
/// KEYS: entry. ARGV: json, ttl seconds, status.
const PUT_SCRIPT: &str = r#"
local forward = {
  pending = { analyzing = 1, failed = 1, cancelled = 1 },
  analyzing = { generating = 1, failed = 1, cancelled = 1 },
  generating = { deploying = 1, completed = 1, failed = 1, cancelled = 1 },
  deploying = { completed = 1, failed = 1, cancelled = 1 },
}
local cached = redis.call('GET', KEYS[1])
if cached then
  local ok, record = pcall(cjson.decode, cached)
  if ok then
    local s = record['status']
    if s ~= ARGV[3] then
      local allowed = forward[s]
      if not allowed or not allowed[ARGV[3]] then
        return 0
      end
    end
  end
end
redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[2])
return 1
"#;

pub struct RedisCache {
    conn: ConnectionManager,
    ttl: Duration,
    put: redis::Script,
}

impl RedisCache {
    pub async fn new(redis_url: &str, ttl: Duration) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        info!("Status cache connected to Redis (ttl {}s)", ttl.as_secs());

        Ok(Self {
            conn,
            ttl,
            put: redis::Script::new(PUT_SCRIPT),
        })
    }

    fn key(id: &str) -> String {
        format!("request:cache:{}", id)
    }
}

#[async_trait]
impl StatusCache for RedisCache {
    async fn put(&self, request: &InfrastructureRequest) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(request).context("Failed to serialize request")?;

        let _: i64 = self
            .put
            .key(Self::key(&request.id))
            .arg(json)
            .arg(self.ttl.as_secs().max(1))
            .arg(request.status.as_str())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<InfrastructureRequest>> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(Self::key(id)).await?;

        json.map(|data| serde_json::from_str(&data).context("Failed to deserialize cached request"))
            .transpose()
    }
}

/// In-process cache with per-entry expiry
pub struct MemoryCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, (Instant, InfrastructureRequest)>>,
}

impl MemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl StatusCache for MemoryCache {
    async fn put(&self, request: &InfrastructureRequest) -> Result<()> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();

        if let Some((expires, cached)) = entries.get(&request.id) {
            if *expires > now && !cached.status.is_superseded_by(request.status) {
                return Ok(());
            }
        }

        entries.insert(request.id.clone(), (now + self.ttl, request.clone()));
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<InfrastructureRequest>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(id)
            .filter(|(expires, _)| *expires > Instant::now())
            .map(|(_, request)| request.clone()))
    }
}
