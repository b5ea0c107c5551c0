//! Chunk Worker Pool (C5): drive N chunks through C1+C2+C4 under a bounded
//! concurrency cap (§4.5).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::domain::{ChunkTask, DocumentType, EventKind, JobPhase, ProgressEvent, PyqPaper, SyllabusExtract};
use crate::error::ClassifiedError;
use crate::pipeline::extraction::{extract_chunk, ChunkResult};
use crate::pipeline::llm_client::LlmClient;
use crate::pipeline::pdf_text::PdfTextProvider;
use crate::pipeline::retry::retry_with_backoff;

/// `10 + floor(completed / total * 60)` — the §4.9/§9 progress formula
/// chosen for the extraction phase, shared by completion and warning
/// events so a warning reports the pool's current progress without
/// advancing it.
#[must_use]
pub fn chunk_progress_value(completed: u32, total: u32) -> u8 {
    10 + (completed * 60 / total.max(1)) as u8
}

/// One chunk's outcome: either a parsed structure or a classified error
/// that survived retry.
pub enum ChunkOutcome {
    Syllabus(SyllabusExtract),
    Pyq(PyqPaper),
    Failed(ClassifiedError),
}

/// Run every chunk task concurrently, bounded by `settings.max_concurrent_chunks`.
///
/// `emit` is invoked from whichever worker completes a chunk — it must be
/// safe for concurrent invocation, per §4.9's contract on the coordinator's
/// callback.
pub async fn run_chunks<Emit>(
    settings: &Settings,
    pdf_provider: Arc<dyn PdfTextProvider>,
    llm: Arc<dyn LlmClient>,
    document_type: DocumentType,
    pdf_bytes: Arc<Vec<u8>>,
    total_pages: usize,
    tasks: Vec<ChunkTask>,
    job_id: &str,
    cancel: CancellationToken,
    emit: Emit,
) -> Vec<ChunkOutcome>
where
    Emit: Fn(ProgressEvent) + Send + Sync + 'static,
{
    let total = tasks.len() as u32;
    let semaphore = Arc::new(Semaphore::new(settings.max_concurrent_chunks));
    let completed = Arc::new(AtomicU32::new(0));
    let emit = Arc::new(emit);
    let retry_config = Arc::new(settings.retry.clone());

    let mut handles = Vec::with_capacity(tasks.len());

    for task in tasks {
        let semaphore = semaphore.clone();
        let completed = completed.clone();
        let emit = emit.clone();
        let retry_config = retry_config.clone();
        let pdf_provider = pdf_provider.clone();
        let llm = llm.clone();
        let pdf_bytes = pdf_bytes.clone();
        let cancel = cancel.clone();
        let job_id = job_id.to_string();

        handles.push(tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return ChunkOutcome::Failed(ClassifiedError::new(
                    crate::error::ErrorKind::Cancelled,
                    "worker pool semaphore closed",
                )),
            };

            let outcome = run_one_chunk(
                &retry_config,
                &cancel,
                &pdf_provider,
                &llm,
                document_type,
                (*pdf_bytes).clone(),
                task.range.first,
                task.range.last,
                total_pages,
                &completed,
                total,
                &job_id,
                task.index as u32 + 1,
                emit.as_ref(),
            )
            .await;

            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            let progress = chunk_progress_value(done, total);
            let mut event = ProgressEvent::new(
                EventKind::Progress,
                job_id,
                progress,
                JobPhase::Extraction,
                format!("extracted chunk {done}/{total}"),
            );
            event.total_chunks = Some(total);
            event.completed_chunks = Some(done);
            event.current_chunk = Some(task.index as u32 + 1);
            emit(event);

            outcome
        }));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => outcomes.push(ChunkOutcome::Failed(ClassifiedError::new(
                crate::error::ErrorKind::Unknown,
                format!("chunk task panicked: {e}"),
            ))),
        }
    }
    outcomes
}

#[allow(clippy::too_many_arguments)]
async fn run_one_chunk<Emit>(
    retry_config: &crate::config::RetryConfig,
    cancel: &CancellationToken,
    pdf_provider: &Arc<dyn PdfTextProvider>,
    llm: &Arc<dyn LlmClient>,
    document_type: DocumentType,
    pdf_bytes: Vec<u8>,
    first_page: usize,
    last_page: usize,
    total_pages: usize,
    completed: &Arc<AtomicU32>,
    total: u32,
    job_id: &str,
    current_chunk: u32,
    emit: &Emit,
) -> ChunkOutcome
where
    Emit: Fn(ProgressEvent) + Send + Sync + 'static,
{
    let result = retry_with_backoff(
        retry_config,
        cancel,
        move || {
            let pdf_provider = pdf_provider.clone();
            let llm = llm.clone();
            let pdf_bytes = pdf_bytes.clone();
            async move {
                extract_chunk(&pdf_provider, &llm, document_type, pdf_bytes, first_page, last_page, total_pages).await
            }
        },
        |classified: &ClassifiedError| classified.clone(),
        |warning: crate::pipeline::retry::RetryWarning| {
            // Warnings report the pool's current progress without advancing
            // it (§4.9: "warnings do not change progress") — `completed`
            // hasn't been bumped for this chunk yet since it's still retrying.
            let done = completed.load(Ordering::SeqCst);
            let mut event = ProgressEvent::new(
                EventKind::Warning,
                job_id,
                chunk_progress_value(done, total),
                JobPhase::Extraction,
                format!("retrying chunk {current_chunk}/{total} after recoverable error"),
            );
            event.total_chunks = Some(total);
            event.completed_chunks = Some(done);
            event.current_chunk = Some(current_chunk);
            event.error_type = Some(warning.error.kind);
            event.error_message = Some(warning.error.message.clone());
            event.retry_count = Some(warning.attempt);
            event.max_retries = Some(warning.max_attempts);
            event.recoverable = Some(true);
            emit(event);
        },
    )
    .await;

    match result {
        Ok(ChunkResult::Syllabus(extract)) => ChunkOutcome::Syllabus(extract),
        Ok(ChunkResult::Pyq(paper)) => ChunkOutcome::Pyq(paper),
        Err(classified) => ChunkOutcome::Failed(classified),
    }
}

/// Failure-threshold classification from §4.5: all chunks failed, too many
/// failed (>50%), or an acceptable partial/full success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolFailureMode {
    AllFailed,
    TooManyFailed { failed: usize, total: usize },
    Ok { partial: bool },
}

#[must_use]
pub fn classify_pool_outcome(outcomes: &[ChunkOutcome]) -> PoolFailureMode {
    let total = outcomes.len();
    let failed = outcomes.iter().filter(|o| matches!(o, ChunkOutcome::Failed(_))).count();

    if failed == total {
        PoolFailureMode::AllFailed
    } else if failed * 2 > total {
        PoolFailureMode::TooManyFailed { failed, total }
    } else {
        PoolFailureMode::Ok { partial: failed > 0 }
    }
}
