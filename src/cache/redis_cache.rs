//! Redis-backed [`JobCache`], the default cache driver (A5) for a running
//! engine. Every operation round-trips through a cloned
//! [`redis::aio::ConnectionManager`] — cloning is cheap (it's a handle to a
//! shared, auto-reconnecting connection), so each call below borrows its own
//! copy rather than holding a lock across an `.await`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use super::{job_active_key, job_state_key, ttl_for, JobCache};
use crate::config::JobTtlConfig;
use crate::domain::JobRecord;
use crate::error::EngineError;

/// Atomically acquires the active-job lock and writes the job-state record
/// in one round trip: `create_job`'s doc contract requires both keys appear
/// together or not at all, and two independent `SET` calls could leave the
/// lock held with no state record if the process or connection dies between
/// them. `KEYS[1]` is the active-job key, `KEYS[2]` the state key;
/// `ARGV[1..3]` are the job id, the serialised record, and the shared TTL.
static CREATE_JOB_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
        local acquired = redis.call('SET', KEYS[1], ARGV[1], 'NX', 'EX', ARGV[3])
        if not acquired then
            return 0
        end
        redis.call('SET', KEYS[2], ARGV[2], 'EX', ARGV[3])
        return 1
        ",
    )
});

pub struct RedisJobCache {
    conn: ConnectionManager,
    ttl: JobTtlConfig,
}

impl RedisJobCache {
    pub async fn connect(redis_url: &str, ttl: JobTtlConfig) -> Result<Self, EngineError> {
        let client = redis::Client::open(redis_url).map_err(to_cache_err)?;
        let conn = client.get_connection_manager().await.map_err(to_cache_err)?;
        Ok(Self { conn, ttl })
    }
}

fn to_cache_err(e: redis::RedisError) -> EngineError {
    EngineError::Cache(e.to_string())
}

#[async_trait]
impl JobCache for RedisJobCache {
    async fn create_job(&self, record: &JobRecord) -> Result<(), EngineError> {
        let mut conn = self.conn.clone();
        let active_key = job_active_key(&record.user_id);
        let state_key = job_state_key(&record.id);
        let ttl_secs = ttl_for(record, &self.ttl).as_secs();
        let payload = serde_json::to_string(record).map_err(|e| EngineError::Cache(e.to_string()))?;

        // Both keys are written by one Lua script so the active-job lock
        // and the job-state record appear together atomically — see the
        // script's doc comment for why two separate `SET`s aren't enough.
        let acquired: i64 = CREATE_JOB_SCRIPT
            .key(&active_key)
            .key(&state_key)
            .arg(&record.id)
            .arg(&payload)
            .arg(ttl_secs)
            .invoke_async(&mut conn)
            .await
            .map_err(to_cache_err)?;

        if acquired == 0 {
            let active_job_id: String = conn.get(&active_key).await.unwrap_or_default();
            return Err(EngineError::ActiveJobConflict { user_id: record.user_id.clone(), active_job_id });
        }

        Ok(())
    }

    async fn save_job(&self, record: &JobRecord) -> Result<(), EngineError> {
        let mut conn = self.conn.clone();
        let ttl_secs = ttl_for(record, &self.ttl).as_secs();
        let payload = serde_json::to_string(record).map_err(|e| EngineError::Cache(e.to_string()))?;
        let _: () = conn.set_ex(job_state_key(&record.id), payload, ttl_secs).await.map_err(to_cache_err)?;

        if record.is_terminal() {
            let active_key = job_active_key(&record.user_id);
            let current: Option<String> = conn.get(&active_key).await.map_err(to_cache_err)?;
            if current.as_deref() == Some(record.id.as_str()) {
                let _: () = conn.del(&active_key).await.map_err(to_cache_err)?;
            }
        }
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, EngineError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(job_state_key(job_id)).await.map_err(to_cache_err)?;
        raw.map(|s| serde_json::from_str(&s).map_err(|e| EngineError::Cache(e.to_string()))).transpose()
    }

    async fn get_active_job(&self, user_id: &str) -> Result<Option<String>, EngineError> {
        let mut conn = self.conn.clone();
        conn.get(job_active_key(user_id)).await.map_err(to_cache_err)
    }

    async fn scan_processing_jobs(&self, _now: DateTime<Utc>) -> Result<Vec<JobRecord>, EngineError> {
        let mut conn = self.conn.clone();
        // A cursor-based SCAN would be the safer choice against a very large
        // keyspace; the reaper runs every couple of minutes over a keyspace
        // that self-expires via TTL, so a single KEYS call is acceptable here.
        let keys: Vec<String> = conn.keys("job:state:*").await.map_err(to_cache_err)?;
        let mut jobs = Vec::with_capacity(keys.len());
        for key in keys {
            let raw: Option<String> = conn.get(&key).await.map_err(to_cache_err)?;
            if let Some(raw) = raw {
                if let Ok(record) = serde_json::from_str::<JobRecord>(&raw) {
                    if matches!(record.status, crate::domain::JobStatus::Processing) {
                        jobs.push(record);
                    }
                }
            }
        }
        Ok(jobs)
    }
}
