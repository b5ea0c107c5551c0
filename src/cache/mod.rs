//! Progress Tracker (C8): cache-resident job state (§4.8).
//!
//! Key layout is exactly §4.8: `job:state:{jobId}` holds the JSON job
//! record; `job:active:{userId}` enforces the one-active-job-per-user
//! invariant via set-if-absent semantics. The Coordinator is the single
//! writer of a given job's state record (§5); this trait only has to get
//! that one writer's updates to the cache reliably, not arbitrate between
//! writers.

#[cfg(feature = "redis-cache")]
mod redis_cache;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::JobTtlConfig;
use crate::domain::JobRecord;
use crate::error::EngineError;

#[cfg(feature = "redis-cache")]
pub use redis_cache::RedisJobCache;

pub fn job_state_key(job_id: &str) -> String {
    format!("job:state:{job_id}")
}

pub fn job_active_key(user_id: &str) -> String {
    format!("job:active:{user_id}")
}

/// TTL to apply to a job-state record, per §4.8/§6: success jobs expire
/// sooner than failed ones, so failures stay inspectable longer.
#[must_use]
pub fn ttl_for(record: &JobRecord, ttl: &JobTtlConfig) -> std::time::Duration {
    use crate::domain::JobStatus;
    match record.status {
        JobStatus::Completed | JobStatus::PartiallyCompleted => ttl.success,
        JobStatus::Failed | JobStatus::Cancelled => ttl.failure,
        JobStatus::Pending | JobStatus::Processing => ttl.failure.max(ttl.success),
    }
}

#[async_trait]
pub trait JobCache: Send + Sync {
    /// Atomically create `record`'s state key and its user's active-job key.
    /// Fails with `EngineError::ActiveJobConflict` if the user already has
    /// an active job — the set-if-absent semantics §4.8 requires.
    async fn create_job(&self, record: &JobRecord) -> Result<(), EngineError>;

    /// Overwrite the job-state record (the Coordinator's single-writer
    /// read-modify-write). Clears the user's active-job key once the
    /// record reaches a terminal status; chooses TTL by [`ttl_for`].
    async fn save_job(&self, record: &JobRecord) -> Result<(), EngineError>;

    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, EngineError>;

    async fn get_active_job(&self, user_id: &str) -> Result<Option<String>, EngineError>;

    /// Every job currently recorded as `processing`, for the reaper sweep
    /// (C11) to check against its stall threshold. `now` is supplied by the
    /// caller since the cache itself must not call `Utc::now()` inside a
    /// deterministic test double.
    async fn scan_processing_jobs(&self, now: DateTime<Utc>) -> Result<Vec<JobRecord>, EngineError>;
}

/// In-memory [`JobCache`] for tests and the direct/small-document path in
/// development — the C13 fixture for this component. TTLs are honoured by
/// recording an expiry instant and filtering lazily on read, since there's
/// no background eviction thread to mirror Redis's own TTL sweep.
pub mod in_memory {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::{ttl_for, JobCache};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use crate::config::JobTtlConfig;
    use crate::domain::JobRecord;
    use crate::error::EngineError;

    struct Entry {
        record: JobRecord,
        expires_at: DateTime<Utc>,
    }

    #[derive(Default)]
    struct State {
        jobs: HashMap<String, Entry>,
        active: HashMap<String, String>,
    }

    pub struct InMemoryJobCache {
        ttl: JobTtlConfig,
        state: Mutex<State>,
    }

    impl InMemoryJobCache {
        #[must_use]
        pub fn new(ttl: JobTtlConfig) -> Self {
            Self { ttl, state: Mutex::new(State::default()) }
        }

        fn is_live(entry: &Entry, now: DateTime<Utc>) -> bool {
            entry.expires_at > now
        }
    }

    #[async_trait]
    impl JobCache for InMemoryJobCache {
        async fn create_job(&self, record: &JobRecord) -> Result<(), EngineError> {
            let mut state = self.state.lock().unwrap();
            let now = record.started_at;
            let stale = state
                .active
                .get(&record.user_id)
                .and_then(|existing_job_id| state.jobs.get(existing_job_id))
                .map(|e| !Self::is_live(e, now))
                .unwrap_or(true);

            if !stale {
                let active_job_id = state.active.get(&record.user_id).cloned().unwrap_or_default();
                return Err(EngineError::ActiveJobConflict { user_id: record.user_id.clone(), active_job_id });
            }

            let expires_at = now + chrono::Duration::from_std(ttl_for(record, &self.ttl)).unwrap_or_default();
            state.jobs.insert(record.id.clone(), Entry { record: record.clone(), expires_at });
            state.active.insert(record.user_id.clone(), record.id.clone());
            Ok(())
        }

        async fn save_job(&self, record: &JobRecord) -> Result<(), EngineError> {
            let mut state = self.state.lock().unwrap();
            let expires_at = record.updated_at + chrono::Duration::from_std(ttl_for(record, &self.ttl)).unwrap_or_default();
            state.jobs.insert(record.id.clone(), Entry { record: record.clone(), expires_at });
            if record.is_terminal() {
                if state.active.get(&record.user_id) == Some(&record.id) {
                    state.active.remove(&record.user_id);
                }
            }
            Ok(())
        }

        async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, EngineError> {
            let state = self.state.lock().unwrap();
            Ok(state.jobs.get(job_id).map(|e| e.record.clone()))
        }

        async fn get_active_job(&self, user_id: &str) -> Result<Option<String>, EngineError> {
            let state = self.state.lock().unwrap();
            Ok(state.active.get(user_id).cloned())
        }

        async fn scan_processing_jobs(&self, _now: DateTime<Utc>) -> Result<Vec<JobRecord>, EngineError> {
            let state = self.state.lock().unwrap();
            Ok(state
                .jobs
                .values()
                .filter(|e| matches!(e.record.status, crate::domain::JobStatus::Processing))
                .map(|e| e.record.clone())
                .collect())
        }
    }

}

pub use in_memory::InMemoryJobCache;
