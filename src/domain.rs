//! Core data model (§3): documents, jobs, chunk tasks, progress events, and
//! the two canonical output hierarchies (syllabus, PYQ paper).
//!
//! Every record that crosses a boundary (cache, database, SSE wire) derives
//! `Serialize`/`Deserialize` once here and is never hand-assembled as JSON
//! elsewhere, per §9's redesign flag against dynamic JSON construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ClassifiedError;

// ── Document (external, read-only) ──────────────────────────────────────

/// The declared type of an uploaded document. The engine only knows how to
/// extract the two shapes named in §3; anything else is a fatal
/// `WrongDocumentType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Syllabus,
    Pyq,
}

/// A read-only view of the document this engine was asked to extract.
/// Owned by an external CRUD subsystem; the engine never writes to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub subject_ref: Option<String>,
    pub storage_key: Option<String>,
    pub document_type: DocumentType,
    /// Text already produced by an upstream OCR microservice, if any.
    /// When present, C1/C9 skip the download+extract stages entirely.
    pub ocr_text: Option<String>,
}

// ── Job (§3, owned by the engine) ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    /// Some chunks failed but under the 50% threshold; surviving chunks
    /// were merged and persisted. Carries a `complete` event, not `error`
    /// (§7) — downstream consumers treat it as success with degraded
    /// coverage.
    PartiallyCompleted,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Initializing,
    Download,
    Chunking,
    Extraction,
    Merge,
    Save,
    Complete,
}

impl JobPhase {
    /// `(start, end)` percent bounds from the §4.9 progress budget table.
    #[must_use]
    pub const fn budget(self) -> (u8, u8) {
        match self {
            Self::Initializing => (0, 0),
            Self::Download => (0, 5),
            Self::Chunking => (5, 10),
            Self::Extraction => (10, 70),
            Self::Merge => (70, 75),
            Self::Save => (75, 95),
            Self::Complete => (95, 100),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub user_id: String,
    pub document_id: String,
    pub status: JobStatus,
    pub phase: JobPhase,
    pub progress: u8,
    pub message: String,
    pub total_chunks: u32,
    pub completed_chunks: u32,
    pub failed_chunks: u32,
    pub last_error: Option<ClassifiedError>,
    pub retry_count: u32,
    pub result_ids: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    #[must_use]
    pub fn new(id: String, user_id: String, document_id: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id,
            document_id,
            status: JobStatus::Pending,
            phase: JobPhase::Initializing,
            progress: 0,
            message: "queued".to_string(),
            total_chunks: 0,
            completed_chunks: 0,
            failed_chunks: 0,
            last_error: None,
            retry_count: 0,
            result_ids: Vec::new(),
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Build the `{documentId}_{monotonicStartTick}` job id from §3.
    #[must_use]
    pub fn make_id(document_id: &str, monotonic_start_tick: u64) -> String {
        format!("{document_id}_{monotonic_start_tick}")
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            JobStatus::Completed | JobStatus::PartiallyCompleted | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

// ── Chunk Task (§3) ──────────────────────────────────────────────────────

/// An inclusive 1-based page range assigned to one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub first: usize,
    pub last: usize,
}

impl PageRange {
    #[must_use]
    pub const fn len(&self) -> usize {
        self.last - self.first + 1
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
pub struct ChunkTask {
    pub index: usize,
    pub range: PageRange,
}

// ── Progress Event (§3) ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Started,
    Progress,
    Warning,
    Complete,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub job_id: String,
    pub progress: u8,
    pub phase: JobPhase,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_chunks: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_chunk: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<crate::error::ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recoverable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    #[must_use]
    pub fn new(kind: EventKind, job_id: impl Into<String>, progress: u8, phase: JobPhase, message: impl Into<String>) -> Self {
        Self {
            kind,
            job_id: job_id.into(),
            progress,
            phase,
            message: message.into(),
            total_chunks: None,
            completed_chunks: None,
            current_chunk: None,
            error_type: None,
            error_message: None,
            retry_count: None,
            max_retries: None,
            recoverable: None,
            elapsed_ms: None,
            timestamp: Utc::now(),
        }
    }
}

// ── Canonical Syllabus Hierarchy (§3) ────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub title: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub number: u32,
    pub title: String,
    pub topics: Vec<Topic>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookReference {
    pub title: String,
    pub authors: String,
    pub publisher: Option<String>,
    pub edition: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub name: String,
    pub code: Option<String>,
    pub units: Vec<Unit>,
    pub books: Vec<BookReference>,
}

/// The shape imposed on the LLM for one chunk's syllabus extraction, and the
/// unit merged/persisted by C6/C7. A document may contain several subjects
/// (e.g. a combined syllabus PDF).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyllabusExtract {
    pub subjects: Vec<Subject>,
}

// ── Canonical PYQ Paper (§3) ─────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub label: String,
    pub text: String,
    pub marks_override: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub question_number: String,
    pub section: Option<String>,
    pub text: String,
    pub marks: u32,
    pub is_compulsory: bool,
    pub has_choices: bool,
    pub choice_group: Option<String>,
    pub unit_number: Option<u32>,
    pub topic_keywords: Vec<String>,
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PyqPaper {
    pub year: Option<String>,
    pub month: Option<String>,
    pub exam_type: Option<String>,
    pub total_marks: Option<u32>,
    pub duration: Option<String>,
    pub instructions: Option<String>,
    pub questions: Vec<Question>,
}

/// Placeholder text the LLM may emit for an illegible scan — allowed by §3
/// as long as `marks > 0` and the field is non-empty.
pub const OCR_UNCLEAR_PLACEHOLDER: &str = "[OCR text unclear]";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_phase_budget_covers_0_to_100_with_no_gaps() {
        let phases = [
            JobPhase::Initializing,
            JobPhase::Download,
            JobPhase::Chunking,
            JobPhase::Extraction,
            JobPhase::Merge,
            JobPhase::Save,
            JobPhase::Complete,
        ];
        let mut prev_end = 0;
        for p in phases {
            let (start, end) = p.budget();
            assert!(start >= prev_end || p == JobPhase::Initializing, "{p:?} starts before previous ended");
            assert!(end >= start);
            prev_end = end;
        }
        assert_eq!(JobPhase::Complete.budget().1, 100);
    }

    #[test]
    fn job_phase_ordering_matches_enumeration_in_spec() {
        assert!(JobPhase::Initializing < JobPhase::Download);
        assert!(JobPhase::Download < JobPhase::Chunking);
        assert!(JobPhase::Chunking < JobPhase::Extraction);
        assert!(JobPhase::Extraction < JobPhase::Merge);
        assert!(JobPhase::Merge < JobPhase::Save);
        assert!(JobPhase::Save < JobPhase::Complete);
    }

    #[test]
    fn make_id_matches_composite_format() {
        assert_eq!(JobRecord::make_id("doc-1", 42), "doc-1_42");
    }

    #[test]
    fn page_range_len_is_inclusive() {
        assert_eq!(PageRange { first: 1, last: 1 }.len(), 1);
        assert_eq!(PageRange { first: 3, last: 7 }.len(), 5);
    }

    #[test]
    fn progress_event_serialises_with_snake_case_type_field() {
        let e = ProgressEvent::new(EventKind::Started, "job-1", 0, JobPhase::Initializing, "starting");
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "started");
        assert_eq!(json["job_id"], "job-1");
        assert!(json.get("total_chunks").is_none(), "optional fields should be omitted when None");
    }
}
