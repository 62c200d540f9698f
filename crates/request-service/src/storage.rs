//! Durable storage for infrastructure request records
//!
//! Every status write is a compare-and-set: it only lands when the stored
//! status still equals the status the writer last saw and is not terminal.
//! This keeps a late pipeline result from overwriting a cancelled record.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use text2iac_common::{InfrastructureRequest, RequestStatus};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Outcome of a compare-and-set write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The record was replaced
    Applied,
    /// The stored status differs from the expected one, or is terminal
    Conflict(RequestStatus),
    /// No record with that id
    Missing,
}

/// Counts by status
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RequestStats {
    pub total: usize,
    pub pending: usize,
    pub analyzing: usize,
    pub generating: usize,
    pub deploying: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl RequestStats {
    fn record(&mut self, status: RequestStatus) {
        self.total += 1;
        match status {
            RequestStatus::Pending => self.pending += 1,
            RequestStatus::Analyzing => self.analyzing += 1,
            RequestStatus::Generating => self.generating += 1,
            RequestStatus::Deploying => self.deploying += 1,
            RequestStatus::Completed => self.completed += 1,
            RequestStatus::Failed => self.failed += 1,
            RequestStatus::Cancelled => self.cancelled += 1,
        }
    }
}

/// Durable request table
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Store a new record. Fails if the id already exists.
    async fn insert(&self, request: &InfrastructureRequest) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<InfrastructureRequest>>;

    /// Replace the record if its stored status is `expected` and not terminal
    async fn compare_and_set(
        &self,
        expected: RequestStatus,
        request: &InfrastructureRequest,
    ) -> Result<CasOutcome>;

    /// Records submitted by `requestor`, newest first
    async fn list_by_requestor(&self, requestor: &str) -> Result<Vec<InfrastructureRequest>>;

    async fn stats(&self) -> Result<RequestStats>;

    async fn health_check(&self) -> Result<()>;
}

fn parse_status(value: &str) -> Result<RequestStatus> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .with_context(|| format!("Unknown stored status: {}", value))
}

/// Lua body of the compare-and-set. KEYS: record, status. ARGV: json, new
/// status, expected status. Returns "applied", the current status, or nil.
const CAS_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[2])
if not current then
  return false
end
if current == 'completed' or current == 'failed' or current == 'cancelled' or current ~= ARGV[3] then
  return current
end
redis.call('SET', KEYS[1], ARGV[1])
redis.call('SET', KEYS[2], ARGV[2])
return 'applied'
"#;

/// Redis-backed request store
pub struct RedisStore {
    conn: ConnectionManager,
    cas: redis::Script,
}

impl RedisStore {
    /// Create a new storage instance
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        info!("Request store connected to Redis at {}", redis_url);

        Ok(Self {
            conn,
            cas: redis::Script::new(CAS_SCRIPT),
        })
    }

    fn record_key(id: &str) -> String {
        format!("request:{}", id)
    }

    fn status_key(id: &str) -> String {
        format!("request:{}:status", id)
    }

    fn requestor_key(requestor: &str) -> String {
        format!("requests:requestor:{}", requestor.to_lowercase())
    }
}

#[async_trait]
impl RequestStore for RedisStore {
    async fn insert(&self, request: &InfrastructureRequest) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(request).context("Failed to serialize request")?;

        // The status key doubles as the existence marker
        let created: bool = conn
            .set_nx(Self::status_key(&request.id), request.status.as_str())
            .await?;
        if !created {
            anyhow::bail!("Request id already exists: {}", request.id);
        }

        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(Self::record_key(&request.id), &json)
            .ignore()
            .sadd("requests:all", &request.id)
            .ignore();
        if let Some(requestor) = &request.requestor {
            pipe.sadd(Self::requestor_key(requestor), &request.id).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;

        info!("Stored request: {}", request.id);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<InfrastructureRequest>> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(Self::record_key(id)).await?;

        match json {
            Some(data) => {
                let request: InfrastructureRequest =
                    serde_json::from_str(&data).context("Failed to deserialize request")?;
                Ok(Some(request))
            }
            None => Ok(None),
        }
    }

    async fn compare_and_set(
        &self,
        expected: RequestStatus,
        request: &InfrastructureRequest,
    ) -> Result<CasOutcome> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(request).context("Failed to serialize request")?;

        let reply: Option<String> = self
            .cas
            .key(Self::record_key(&request.id))
            .key(Self::status_key(&request.id))
            .arg(json)
            .arg(request.status.as_str())
            .arg(expected.as_str())
            .invoke_async(&mut conn)
            .await?;

        let outcome = match reply.as_deref() {
            None => CasOutcome::Missing,
            Some("applied") => CasOutcome::Applied,
            Some(current) => CasOutcome::Conflict(parse_status(current)?),
        };

        debug!(
            "CAS {} {} -> {}: {:?}",
            request.id, expected, request.status, outcome
        );
        Ok(outcome)
    }

    async fn list_by_requestor(&self, requestor: &str) -> Result<Vec<InfrastructureRequest>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(Self::requestor_key(requestor)).await?;

        let mut requests = Vec::new();
        for id in ids {
            if let Some(request) = self.get(&id).await? {
                requests.push(request);
            }
        }

        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(requests)
    }

    async fn stats(&self) -> Result<RequestStats> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers("requests:all").await?;

        let mut stats = RequestStats::default();
        if ids.is_empty() {
            return Ok(stats);
        }

        let keys: Vec<String> = ids.iter().map(|id| Self::status_key(id)).collect();
        let statuses: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;

        for status in statuses.into_iter().flatten() {
            stats.record(parse_status(&status)?);
        }
        Ok(stats)
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        anyhow::ensure!(pong == "PONG", "Unexpected PING reply: {}", pong);
        Ok(())
    }
}

/// In-process request store for local runs and tests
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, InfrastructureRequest>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestStore for MemoryStore {
    async fn insert(&self, request: &InfrastructureRequest) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&request.id) {
            anyhow::bail!("Request id already exists: {}", request.id);
        }
        records.insert(request.id.clone(), request.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<InfrastructureRequest>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn compare_and_set(
        &self,
        expected: RequestStatus,
        request: &InfrastructureRequest,
    ) -> Result<CasOutcome> {
        let mut records = self.records.write().await;
        let Some(current) = records.get_mut(&request.id) else {
            return Ok(CasOutcome::Missing);
        };

        if current.status.is_terminal() || current.status != expected {
            return Ok(CasOutcome::Conflict(current.status));
        }

        *current = request.clone();
        Ok(CasOutcome::Applied)
    }

    async fn list_by_requestor(&self, requestor: &str) -> Result<Vec<InfrastructureRequest>> {
        let records = self.records.read().await;
        let mut requests: Vec<_> = records
            .values()
            .filter(|r| {
                r.requestor
                    .as_deref()
                    .is_some_and(|r| r.eq_ignore_ascii_case(requestor))
            })
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(requests)
    }

    async fn stats(&self) -> Result<RequestStats> {
        let records = self.records.read().await;
        let mut stats = RequestStats::default();
        for record in records.values() {
            stats.record(record.status);
        }
        Ok(stats)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
