//! Job Reaper (C11): periodic sweep for jobs whose worker vanished (§4.11).
//!
//! Cache TTLs already expire terminal jobs; this sweeper only has to catch
//! the case a job is stuck `processing` because its Coordinator task died
//! without ever reaching `finish_success`/`finish_failure` (process crash,
//! panic that unwound past the spawn boundary). It runs on the same
//! "one background task per concern" shape the teacher's binary uses for
//! its own cleanup loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::cache::JobCache;
use crate::domain::{JobRecord, JobStatus};
use crate::error::{ClassifiedError, ErrorKind};

/// Run the sweep loop forever, at `interval`, until `shutdown` resolves.
/// `stall_threshold` is the `updated_at` age past which a `processing` job
/// is presumed abandoned — §4.11 sets this at `2 × perAttemptTimeout`.
pub async fn run(cache: Arc<dyn JobCache>, interval: Duration, stall_threshold: Duration, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sweep_once(&cache, stall_threshold).await;
            }
            _ = shutdown.recv() => {
                info!("job reaper shutting down");
                return;
            }
        }
    }
}

/// One sweep pass, exposed separately so tests can drive it deterministically
/// instead of waiting on a real timer.
pub async fn sweep_once(cache: &Arc<dyn JobCache>, stall_threshold: Duration) {
    let now = Utc::now();
    let processing = match cache.scan_processing_jobs(now).await {
        Ok(jobs) => jobs,
        Err(e) => {
            warn!(error = %e, "reaper sweep failed to scan processing jobs");
            return;
        }
    };

    for mut job in processing {
        let age = now.signed_duration_since(job.updated_at);
        let threshold = chrono::Duration::from_std(stall_threshold).unwrap_or(chrono::Duration::zero());
        if age <= threshold {
            continue;
        }

        warn!(job_id = %job.id, age_secs = age.num_seconds(), "reaping stalled job");
        mark_abandoned(&mut job, now);
        if let Err(e) = cache.save_job(&job).await {
            warn!(job_id = %job.id, error = %e, "failed to persist abandoned job state");
        }
    }
}

/// The closed §4.12 taxonomy has no `ABANDONED` kind; `ErrorKind::Unknown`
/// is the closest fit and is what this reaper uses, distinguished for
/// operators by the message text (see DESIGN.md's Open Question notes).
fn mark_abandoned(job: &mut JobRecord, now: chrono::DateTime<Utc>) {
    job.status = JobStatus::Failed;
    job.last_error = Some(ClassifiedError::new(ErrorKind::Unknown, "job abandoned: worker vanished"));
    job.updated_at = now;
    job.completed_at = Some(now);
}
