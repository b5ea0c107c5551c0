//! End-to-end scenarios from the extraction engine's test plan, driven
//! entirely through the public `Coordinator` API against the in-memory
//! fixtures (C13) — no live database, cache, or LLM endpoint required.
//!
//! Each test below corresponds to one of the concrete scenarios: small
//! direct-path syllabus, a transient per-chunk failure that recovers,
//! a fatal credential error, a duplicate-start conflict, a partial-success
//! run, and a reconnect to an already-terminal job.

use std::sync::Arc;
use std::time::Duration;

use extraction_engine::cache::InMemoryJobCache;
use extraction_engine::config::{JobTtlConfig, LlmConfig, RetryConfig, Settings};
use extraction_engine::coordinator::Coordinator;
use extraction_engine::domain::{Document, DocumentType, EventKind, JobStatus, ProgressEvent};
use extraction_engine::fixtures::{
    FakeDocumentRepository, FakeLlmClient, FakeObjectStore, FakePdfTextProvider, FakePyqStore, FakeSyllabusStore,
};

fn settings() -> Arc<Settings> {
    Arc::new(Settings {
        max_concurrent_chunks: 4,
        reaper_interval: Duration::from_secs(120),
        retry: RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            backoff_multiplier: 1.5,
            max_backoff: Duration::from_millis(5),
            per_attempt_timeout: Duration::from_secs(5),
        },
        job_ttl: JobTtlConfig { success: Duration::from_secs(3600), failure: Duration::from_secs(86_400) },
        llm: LlmConfig {
            base_url: "http://localhost".into(),
            api_key: "test".into(),
            model: "test-model".into(),
            request_timeout: Duration::from_secs(5),
        },
        database_url: None,
        redis_url: None,
        bind_addr: "127.0.0.1:0".into(),
    })
}

fn syllabus_document(pages_storage_key: &str) -> Document {
    Document {
        id: "doc-1".into(),
        subject_ref: Some("semester-1".into()),
        storage_key: Some(pages_storage_key.into()),
        document_type: DocumentType::Syllabus,
        ocr_text: None,
    }
}

async fn drain_to_terminal(events: &mut tokio::sync::broadcast::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut all = Vec::new();
    while let Ok(event) = events.recv().await {
        let terminal = matches!(event.kind, EventKind::Complete | EventKind::Error);
        all.push(event);
        if terminal {
            break;
        }
    }
    all
}

/// Scenario 1: a 4-page syllabus PDF takes the direct path (no worker pool,
/// no merge beyond single-result identity) and completes at 100%.
#[tokio::test]
async fn small_syllabus_direct_path_emits_full_phase_sequence() {
    let documents = Arc::new(FakeDocumentRepository::with_one(syllabus_document("doc-1.pdf")));
    let objects = Arc::new(FakeObjectStore::with_pdf("doc-1.pdf", 4));
    let pdf = Arc::new(FakePdfTextProvider::new(4));
    let llm = Arc::new(FakeLlmClient::always_succeeds_syllabus());
    let cache = Arc::new(InMemoryJobCache::new(settings().job_ttl.clone()));
    let syllabus_store = Arc::new(FakeSyllabusStore::new());
    let pyq_store = Arc::new(FakePyqStore::new());

    let coordinator =
        Arc::new(Coordinator::new(settings(), documents, objects, pdf, llm, cache.clone(), syllabus_store.clone(), pyq_store));

    let mut started = coordinator.start("user-1".into(), "doc-1".into()).await.unwrap();
    let events = drain_to_terminal(&mut started.events).await;

    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(kinds.first(), Some(&EventKind::Started));
    assert_eq!(kinds.last(), Some(&EventKind::Complete));

    let last = events.last().unwrap();
    assert_eq!(last.progress, 100);

    // progress is monotone non-decreasing across the whole sequence
    for window in events.windows(2) {
        assert!(window[1].progress >= window[0].progress, "progress regressed: {:?} -> {:?}", window[0], window[1]);
    }

    let stored = cache.get_job(&started.record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(syllabus_store.saved_count(), 1);

    let saved = syllabus_store.last_saved_subjects().unwrap();
    let names: Vec<&str> = saved.iter().map(|s| s.name.as_str()).collect();
    assert!(names.contains(&"Data Mining"));
    assert!(names.contains(&"Statistics"));
    let total_units: usize = saved.iter().map(|s| s.units.len()).sum();
    assert_eq!(total_units, 3);
    let total_topics: usize = saved.iter().flat_map(|s| &s.units).map(|u| u.topics.len()).sum();
    assert_eq!(total_topics, 5);
}

/// Scenario 2: a 12-page document plans six 2-page chunks; one chunk fails
/// once with a recoverable upstream error and then succeeds. The run must
/// still reach `completed`, and at least one `warning` event must carry the
/// classified error and retry bookkeeping.
#[tokio::test]
async fn large_syllabus_recovers_from_one_transient_chunk_failure() {
    let documents = Arc::new(FakeDocumentRepository::with_one(syllabus_document("doc-1.pdf")));
    let objects = Arc::new(FakeObjectStore::with_pdf("doc-1.pdf", 12));
    let pdf = Arc::new(FakePdfTextProvider::new(12));
    let llm = Arc::new(FakeLlmClient::fails_n_times_then_succeeds_syllabus(1));
    let cache = Arc::new(InMemoryJobCache::new(settings().job_ttl.clone()));
    let syllabus_store = Arc::new(FakeSyllabusStore::new());
    let pyq_store = Arc::new(FakePyqStore::new());

    let coordinator =
        Arc::new(Coordinator::new(settings(), documents, objects, pdf, llm, cache.clone(), syllabus_store.clone(), pyq_store));

    let mut started = coordinator.start("user-1".into(), "doc-1".into()).await.unwrap();
    let events = drain_to_terminal(&mut started.events).await;

    let warning = events.iter().find(|e| e.kind == EventKind::Warning).expect("expected at least one warning event");
    assert_eq!(warning.recoverable, Some(true));
    assert_eq!(warning.retry_count, Some(1));
    assert_eq!(warning.max_retries, Some(3));
    assert!(warning.error_type.is_some());

    let last = events.last().unwrap();
    assert_eq!(last.kind, EventKind::Complete);
    assert_eq!(last.progress, 100);

    let stored = cache.get_job(&started.record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.total_chunks, 6);
    assert_eq!(stored.failed_chunks, 0);
    assert_eq!(syllabus_store.saved_count(), 1);
}

/// Scenario 3: the very first LLM call returns 401. The job must fail fast
/// with a fatal, non-recoverable `LLM_CONTRACT` error, no persistence writes
/// at all, and the active-job key cleared.
#[tokio::test]
async fn fatal_credential_error_stops_job_with_no_writes() {
    let documents = Arc::new(FakeDocumentRepository::with_one(syllabus_document("doc-1.pdf")));
    let objects = Arc::new(FakeObjectStore::with_pdf("doc-1.pdf", 8));
    let pdf = Arc::new(FakePdfTextProvider::new(8));
    let llm = Arc::new(FakeLlmClient::always_fails_with_status(401, "invalid api key"));
    let cache = Arc::new(InMemoryJobCache::new(settings().job_ttl.clone()));
    let syllabus_store = Arc::new(FakeSyllabusStore::new());
    let pyq_store = Arc::new(FakePyqStore::new());

    let coordinator =
        Arc::new(Coordinator::new(settings(), documents, objects, pdf, llm, cache.clone(), syllabus_store.clone(), pyq_store));

    let mut started = coordinator.start("user-1".into(), "doc-1".into()).await.unwrap();
    let events = drain_to_terminal(&mut started.events).await;

    let last = events.last().unwrap();
    assert_eq!(last.kind, EventKind::Error);
    assert_eq!(last.recoverable, Some(false));
    assert_eq!(syllabus_store.saved_count(), 0);

    let stored = cache.get_job(&started.record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(cache.get_active_job("user-1").await.unwrap().is_none());
}

/// Scenario 4: two concurrent starts for the same user — exactly one
/// succeeds, the other is rejected with a conflict naming the active job.
#[tokio::test]
async fn duplicate_start_for_same_user_conflicts() {
    let documents = Arc::new(FakeDocumentRepository::with_one(syllabus_document("doc-1.pdf")));
    let objects = Arc::new(FakeObjectStore::with_pdf("doc-1.pdf", 4));
    let pdf = Arc::new(FakePdfTextProvider::new(4));
    let llm = Arc::new(FakeLlmClient::always_succeeds_syllabus());
    let cache = Arc::new(InMemoryJobCache::new(settings().job_ttl.clone()));
    let syllabus_store = Arc::new(FakeSyllabusStore::new());
    let pyq_store = Arc::new(FakePyqStore::new());

    let coordinator =
        Arc::new(Coordinator::new(settings(), documents, objects, pdf, llm, cache, syllabus_store, pyq_store));

    let first = coordinator.start("user-1".into(), "doc-1".into()).await.expect("first start should succeed");

    let second = coordinator.start("user-1".into(), "doc-1".into()).await;
    let Err(err) = second else {
        panic!("second concurrent start for the same user should be rejected");
    };
    match err {
        extraction_engine::error::EngineError::ActiveJobConflict { user_id, active_job_id } => {
            assert_eq!(user_id, "user-1");
            assert_eq!(active_job_id, first.record.id);
        }
        other => panic!("expected ActiveJobConflict, got {other:?}"),
    }
}

/// Scenario 5: a 10-page document plans five 2-page chunks; chunks covering
/// pages 3-4 and 9-10 fail permanently (exhausting all retries). Two of
/// five chunks failing is under the 50% threshold, so the job completes
/// with `partially_completed` and only the three surviving chunks' content
/// persisted.
#[tokio::test]
async fn partial_chunk_failures_under_threshold_yield_partially_completed() {
    let documents = Arc::new(FakeDocumentRepository::with_one(syllabus_document("doc-1.pdf")));
    let objects = Arc::new(FakeObjectStore::with_pdf("doc-1.pdf", 10));
    let pdf = Arc::new(FakePdfTextProvider::new(10));
    let llm = Arc::new(FakeLlmClient::fails_for_page_ranges(&[(3, 4), (9, 10)], 503, "upstream overloaded"));
    let cache = Arc::new(InMemoryJobCache::new(settings().job_ttl.clone()));
    let syllabus_store = Arc::new(FakeSyllabusStore::new());
    let pyq_store = Arc::new(FakePyqStore::new());

    let coordinator =
        Arc::new(Coordinator::new(settings(), documents, objects, pdf, llm, cache.clone(), syllabus_store.clone(), pyq_store));

    let mut started = coordinator.start("user-1".into(), "doc-1".into()).await.unwrap();
    let events = drain_to_terminal(&mut started.events).await;

    let last = events.last().unwrap();
    assert_eq!(last.kind, EventKind::Complete, "partial success is a complete event, never an error event");
    assert_eq!(last.progress, 100);

    let stored = cache.get_job(&started.record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::PartiallyCompleted);
    assert_eq!(stored.total_chunks, 5);
    assert_eq!(stored.failed_chunks, 2);
    assert_eq!(stored.completed_chunks, 3);

    let saved = syllabus_store.last_saved_subjects().unwrap();
    assert_eq!(saved.len(), 3, "only the three surviving chunks should contribute a subject");
    for subject in &saved {
        assert!(!subject.name.contains("3-4"));
        assert!(!subject.name.contains("9-10"));
    }
}

/// Scenario 6: reconnecting to an already-terminal job returns the same
/// snapshot the cache holds, without reprocessing anything — the
/// "snapshot-then-close" contract the gateway's reconnect endpoint relies
/// on (no live resumption, §4.10).
#[tokio::test]
async fn reconnect_to_terminal_job_returns_stable_snapshot() {
    let documents = Arc::new(FakeDocumentRepository::with_one(syllabus_document("doc-1.pdf")));
    let objects = Arc::new(FakeObjectStore::with_pdf("doc-1.pdf", 4));
    let pdf = Arc::new(FakePdfTextProvider::new(4));
    let llm = Arc::new(FakeLlmClient::always_succeeds_syllabus());
    let cache = Arc::new(InMemoryJobCache::new(settings().job_ttl.clone()));
    let syllabus_store = Arc::new(FakeSyllabusStore::new());
    let pyq_store = Arc::new(FakePyqStore::new());

    let coordinator =
        Arc::new(Coordinator::new(settings(), documents, objects, pdf, llm, cache.clone(), syllabus_store, pyq_store));

    let mut started = coordinator.start("user-1".into(), "doc-1".into()).await.unwrap();
    drain_to_terminal(&mut started.events).await;

    let first_read = cache.get_job(&started.record.id).await.unwrap().unwrap();
    assert_eq!(first_read.status, JobStatus::Completed);
    assert_eq!(first_read.progress, 100);

    // A later "reconnect" read must see the identical terminal record.
    let second_read = cache.get_job(&started.record.id).await.unwrap().unwrap();
    assert_eq!(second_read.status, first_read.status);
    assert_eq!(second_read.progress, first_read.progress);
    assert_eq!(second_read.completed_at, first_read.completed_at);
}
