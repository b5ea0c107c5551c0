//! Extraction Coordinator (C9): orchestrates C1–C8 for one document and
//! emits the event stream C10 forwards to the client (§4.9).
//!
//! `start()` is the only entry point a caller (the HTTP layer, a test) ever
//! touches. It creates the job record through the Progress Tracker, then
//! hands the actual extraction off to a detached task — per §9's
//! "background goroutines that outlive the request" note, closing the SSE
//! connection must not cancel this work.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cache::JobCache;
use crate::collaborators::{DocumentRepository, ObjectStore};
use crate::config::Settings;
use crate::domain::{
    DocumentType, EventKind, JobPhase, JobRecord, JobStatus, ProgressEvent, PyqPaper, SyllabusExtract,
};
use crate::error::{ClassifiedError, EngineError, ErrorKind};
use crate::persistence::{PyqStore, SyllabusStore};
use crate::pipeline::chunk_planner::plan_chunks;
use crate::pipeline::extraction::{extract_chunk, extract_from_text, ChunkResult};
use crate::pipeline::llm_client::LlmClient;
use crate::pipeline::merge::{merge_pyq_papers, merge_syllabus_extracts, resolve_cross_unit_topic_collisions};
use crate::pipeline::pdf_text::PdfTextProvider;
use crate::pipeline::retry::retry_with_backoff;
use crate::pipeline::worker_pool::{chunk_progress_value, classify_pool_outcome, run_chunks, ChunkOutcome, PoolFailureMode};

/// Everything the Coordinator needs, injected at construction — no ambient
/// registry, per §9's redesign flag.
pub struct Coordinator {
    settings: Arc<Settings>,
    documents: Arc<dyn DocumentRepository>,
    objects: Arc<dyn ObjectStore>,
    pdf: Arc<dyn PdfTextProvider>,
    llm: Arc<dyn LlmClient>,
    cache: Arc<dyn JobCache>,
    syllabus_store: Arc<dyn SyllabusStore>,
    pyq_store: Arc<dyn PyqStore>,
}

/// A live handle on a just-started job: the authoritative record at the
/// moment of creation, plus a receiver for every event emitted afterward.
pub struct StartedJob {
    pub record: JobRecord,
    pub events: tokio::sync::broadcast::Receiver<ProgressEvent>,
}

impl Coordinator {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Arc<Settings>,
        documents: Arc<dyn DocumentRepository>,
        objects: Arc<dyn ObjectStore>,
        pdf: Arc<dyn PdfTextProvider>,
        llm: Arc<dyn LlmClient>,
        cache: Arc<dyn JobCache>,
        syllabus_store: Arc<dyn SyllabusStore>,
        pyq_store: Arc<dyn PyqStore>,
    ) -> Self {
        Self { settings, documents, objects, pdf, llm, cache, syllabus_store, pyq_store }
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<dyn JobCache> {
        &self.cache
    }

    /// Create the job record and spawn the background extraction task.
    /// Fails with `EngineError::ActiveJobConflict` if the user already has a
    /// job in flight (§4.8/scenario 4) — this is the only fallible part of
    /// starting a job; everything after this point happens off-task.
    pub async fn start(self: &Arc<Self>, user_id: String, document_id: String) -> Result<StartedJob, EngineError> {
        let now = Utc::now();
        let tick = now.timestamp_millis().max(0) as u64;
        let job_id = JobRecord::make_id(&document_id, tick);
        let record = JobRecord::new(job_id, user_id, document_id, now);

        self.cache.create_job(&record).await?;

        let (tx, rx) = tokio::sync::broadcast::channel(256);
        let coordinator = Arc::clone(self);
        let spawned_record = record.clone();
        tokio::spawn(async move {
            coordinator.run(spawned_record, tx).await;
        });

        Ok(StartedJob { record, events: rx })
    }

    async fn run(self: Arc<Self>, mut record: JobRecord, tx: tokio::sync::broadcast::Sender<ProgressEvent>) {
        record.status = JobStatus::Processing;
        let cancel = CancellationToken::new();

        match self.run_inner(&mut record, &tx, &cancel).await {
            Ok(outcome) => self.finish_success(&mut record, &tx, outcome).await,
            Err(classified) => self.finish_failure(&mut record, &tx, classified).await,
        }
    }

    async fn run_inner(
        &self,
        record: &mut JobRecord,
        tx: &tokio::sync::broadcast::Sender<ProgressEvent>,
        cancel: &CancellationToken,
    ) -> Result<ExtractionOutcome, ClassifiedError> {
        self.emit(record, tx, EventKind::Started, JobPhase::Initializing, 0, "extraction started");

        let document = self
            .documents
            .get_document(&record.document_id)
            .await
            .map_err(fatal)?
            .ok_or_else(|| fatal(EngineError::DocumentNotFound { document_id: record.document_id.clone() }))?;

        let outcomes = if let Some(ocr_text) = document.ocr_text.clone() {
            self.emit(record, tx, EventKind::Progress, JobPhase::Download, 5, "using pre-extracted OCR text");
            self.emit_chunking(record, tx, 1);
            let outcome = self.run_single_text_chunk(&ocr_text, document.document_type, record, tx, cancel).await;
            vec![outcome]
        } else {
            let storage_key = document
                .storage_key
                .clone()
                .ok_or_else(|| fatal(EngineError::MissingStorageKey { document_id: record.document_id.clone() }))?;
            let pdf_bytes = self.objects.get_object(&storage_key).await.map_err(fatal)?;
            self.emit(record, tx, EventKind::Progress, JobPhase::Download, 5, "downloaded PDF bytes");

            let total_pages = self.pdf.page_count(pdf_bytes.clone()).await.map_err(fatal)?;
            let tasks = plan_chunks(total_pages);
            let total = tasks.len() as u32;
            self.emit_chunking(record, tx, total);

            if tasks.len() == 1 {
                let task = &tasks[0];
                let outcome = self
                    .run_single_pdf_chunk(
                        pdf_bytes, document.document_type, task.range.first, task.range.last, total_pages, record, tx, cancel,
                    )
                    .await;
                vec![outcome]
            } else {
                let pdf_bytes = Arc::new(pdf_bytes);
                let job_id = record.id.clone();
                let tx_clone = tx.clone();
                run_chunks(
                    &self.settings,
                    Arc::clone(&self.pdf),
                    Arc::clone(&self.llm),
                    document.document_type,
                    pdf_bytes,
                    total_pages,
                    tasks,
                    &job_id,
                    cancel.clone(),
                    move |event| {
                        let _ = tx_clone.send(event);
                    },
                )
                .await
            }
        };

        let failure_mode = classify_pool_outcome(&outcomes);
        match failure_mode {
            PoolFailureMode::AllFailed => {
                return Err(fatal(EngineError::AllChunksFailed { document_id: record.document_id.clone() }));
            }
            PoolFailureMode::TooManyFailed { failed, total } => {
                return Err(fatal(EngineError::TooManyChunksFailed {
                    document_id: record.document_id.clone(),
                    failed,
                    total,
                }));
            }
            PoolFailureMode::Ok { partial } => {
                record.failed_chunks = outcomes.iter().filter(|o| matches!(o, ChunkOutcome::Failed(_))).count() as u32;
                record.total_chunks = outcomes.len() as u32;
                record.completed_chunks = record.total_chunks - record.failed_chunks;

                let (subjects, papers) = split_outcomes(outcomes);

                self.emit(record, tx, EventKind::Progress, JobPhase::Merge, 75, "merging chunk results");
                let mut merged_subjects = merge_syllabus_extracts(subjects);
                resolve_cross_unit_topic_collisions(&mut merged_subjects);
                let merged_paper = merge_pyq_papers(papers);

                self.emit(record, tx, EventKind::Progress, JobPhase::Save, 95, "persisting canonical hierarchy");
                let result_ids = self.persist(&document, record, &merged_subjects, &merged_paper).await.map_err(fatal)?;

                Ok(ExtractionOutcome { result_ids, partial })
            }
        }
    }

    async fn persist(
        &self,
        document: &crate::domain::Document,
        record: &JobRecord,
        subjects: &[crate::domain::Subject],
        paper: &PyqPaper,
    ) -> Result<Vec<String>, EngineError> {
        match document.document_type {
            DocumentType::Syllabus => {
                // The catalogue keys subjects by (semesterId, name); the document's
                // own external reference is the only semester context the engine
                // has (§4.7 leaves semester resolution to the caller). See
                // DESIGN.md's Open Question notes for this choice.
                let semester_id = document.subject_ref.as_deref().unwrap_or(&record.document_id);
                self.syllabus_store.save_subjects(&record.document_id, semester_id, subjects).await
            }
            DocumentType::Pyq => Ok(vec![self.pyq_store.save_paper(&record.document_id, paper).await?]),
        }
    }

    async fn run_single_text_chunk(
        &self,
        text: &str,
        document_type: DocumentType,
        record: &JobRecord,
        tx: &tokio::sync::broadcast::Sender<ProgressEvent>,
        cancel: &CancellationToken,
    ) -> ChunkOutcome {
        let llm = Arc::clone(&self.llm);
        let text = text.to_string();
        let result = retry_with_backoff(
            &self.settings.retry,
            cancel,
            move || {
                let llm = llm.clone();
                let text = text.clone();
                async move { extract_from_text(&llm, document_type, &text).await }
            },
            |classified: &ClassifiedError| classified.clone(),
            |warning| self.emit_warning(record, tx, 1, 1, warning),
        )
        .await;
        self.emit_extraction_complete(record, tx, 1, 1);
        outcome_from_result(result)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_single_pdf_chunk(
        &self,
        pdf_bytes: Vec<u8>,
        document_type: DocumentType,
        first_page: usize,
        last_page: usize,
        total_pages: usize,
        record: &JobRecord,
        tx: &tokio::sync::broadcast::Sender<ProgressEvent>,
        cancel: &CancellationToken,
    ) -> ChunkOutcome {
        let pdf_provider = Arc::clone(&self.pdf);
        let llm = Arc::clone(&self.llm);
        let result = retry_with_backoff(
            &self.settings.retry,
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
            |warning| self.emit_warning(record, tx, 1, 1, warning),
        )
        .await;
        self.emit_extraction_complete(record, tx, 1, 1);
        outcome_from_result(result)
    }

    fn emit_warning(
        &self,
        record: &JobRecord,
        tx: &tokio::sync::broadcast::Sender<ProgressEvent>,
        current_chunk: u32,
        total: u32,
        warning: crate::pipeline::retry::RetryWarning,
    ) {
        let mut event = ProgressEvent::new(
            EventKind::Warning,
            record.id.clone(),
            10,
            JobPhase::Extraction,
            format!("retrying chunk {current_chunk}/{total} after recoverable error"),
        );
        event.total_chunks = Some(total);
        event.completed_chunks = Some(0);
        event.current_chunk = Some(current_chunk);
        event.error_type = Some(warning.error.kind);
        event.error_message = Some(warning.error.message.clone());
        event.retry_count = Some(warning.attempt);
        event.max_retries = Some(warning.max_attempts);
        event.recoverable = Some(true);
        let _ = tx.send(event);
    }

    fn emit_extraction_complete(&self, record: &JobRecord, tx: &tokio::sync::broadcast::Sender<ProgressEvent>, total: u32, done: u32) {
        let progress = chunk_progress_value(done, total);
        let mut event = ProgressEvent::new(
            EventKind::Progress,
            record.id.clone(),
            progress,
            JobPhase::Extraction,
            format!("extracted {done}/{total}"),
        );
        event.total_chunks = Some(total);
        event.completed_chunks = Some(done);
        event.current_chunk = Some(done);
        let _ = tx.send(event);
    }

    fn emit_chunking(&self, record: &JobRecord, tx: &tokio::sync::broadcast::Sender<ProgressEvent>, total_chunks: u32) {
        let mut event =
            ProgressEvent::new(EventKind::Progress, record.id.clone(), 10, JobPhase::Chunking, "chunk plan ready");
        event.total_chunks = Some(total_chunks);
        let _ = tx.send(event);
    }

    fn emit(
        &self,
        record: &JobRecord,
        tx: &tokio::sync::broadcast::Sender<ProgressEvent>,
        kind: EventKind,
        phase: JobPhase,
        progress: u8,
        message: impl Into<String>,
    ) {
        let event = ProgressEvent::new(kind, record.id.clone(), progress, phase, message);
        let _ = tx.send(event);
    }

    async fn finish_success(
        &self,
        record: &mut JobRecord,
        tx: &tokio::sync::broadcast::Sender<ProgressEvent>,
        outcome: ExtractionOutcome,
    ) {
        let now = Utc::now();
        record.result_ids = outcome.result_ids;
        record.updated_at = now;
        record.completed_at = Some(now);
        record.progress = 100;

        let message = if outcome.partial {
            record.status = JobStatus::PartiallyCompleted;
            format!(
                "completed with {} of {} chunks failing; surviving content persisted",
                record.failed_chunks, record.total_chunks
            )
        } else {
            record.status = JobStatus::Completed;
            "extraction complete".to_string()
        };

        info!(job_id = %record.id, status = ?record.status, "extraction job finished");

        if let Err(e) = self.cache.save_job(record).await {
            error!(job_id = %record.id, error = %e, "failed to persist terminal job state");
        }

        self.emit(record, tx, EventKind::Complete, JobPhase::Complete, 100, message);
    }

    async fn finish_failure(
        &self,
        record: &mut JobRecord,
        tx: &tokio::sync::broadcast::Sender<ProgressEvent>,
        classified: ClassifiedError,
    ) {
        let now = Utc::now();
        record.status = if classified.kind == ErrorKind::Cancelled { JobStatus::Cancelled } else { JobStatus::Failed };
        record.updated_at = now;
        record.completed_at = Some(now);
        record.last_error = Some(classified.clone());

        warn!(job_id = %record.id, kind = ?classified.kind, message = %classified.message, "extraction job failed");

        if let Err(e) = self.cache.save_job(record).await {
            error!(job_id = %record.id, error = %e, "failed to persist terminal job state");
        }

        let mut event = ProgressEvent::new(EventKind::Error, record.id.clone(), record.progress, record.phase, classified.message.clone());
        event.error_type = Some(classified.kind);
        event.error_message = Some(classified.message);
        event.recoverable = Some(false);
        let _ = tx.send(event);
    }
}

fn fatal(err: EngineError) -> ClassifiedError {
    err.into_classified()
}

fn outcome_from_result(result: Result<ChunkResult, ClassifiedError>) -> ChunkOutcome {
    match result {
        Ok(ChunkResult::Syllabus(extract)) => ChunkOutcome::Syllabus(extract),
        Ok(ChunkResult::Pyq(paper)) => ChunkOutcome::Pyq(paper),
        Err(classified) => ChunkOutcome::Failed(classified),
    }
}

fn split_outcomes(outcomes: Vec<ChunkOutcome>) -> (Vec<SyllabusExtract>, Vec<PyqPaper>) {
    let mut subjects = Vec::new();
    let mut papers = Vec::new();
    for outcome in outcomes {
        match outcome {
            ChunkOutcome::Syllabus(extract) => subjects.push(extract),
            ChunkOutcome::Pyq(paper) => papers.push(paper),
            ChunkOutcome::Failed(_) => {}
        }
    }
    (subjects, papers)
}

struct ExtractionOutcome {
    result_ids: Vec<String>,
    partial: bool,
}
