//! Test Fixtures (C13): in-memory fakes for every injected collaborator,
//! so the Coordinator's state machine can be exercised without a live
//! database, cache, or LLM endpoint — mirrors the teacher's own
//! `tests/fixtures` PDFs/mock providers, generalised to this engine's five
//! collaborator traits.
//!
//! Gated behind `#[cfg(any(test, feature = "fixtures"))]` so these never
//! ship in a release build; the `fixtures` Cargo feature exists only to let
//! `tests/*.rs` integration tests reach this module from outside the crate.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::collaborators::{DocumentRepository, ObjectStore};
use crate::domain::{Document, PyqPaper, Subject};
use crate::error::EngineError;
use crate::persistence::{PyqStore, SyllabusStore};
use crate::pipeline::llm_client::{LlmCallError, LlmClient};
use crate::pipeline::pdf_text::PdfTextProvider;

pub struct FakeDocumentRepository {
    documents: HashMap<String, Document>,
}

impl FakeDocumentRepository {
    #[must_use]
    pub fn with_one(document: Document) -> Self {
        let mut documents = HashMap::new();
        documents.insert(document.id.clone(), document);
        Self { documents }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self { documents: HashMap::new() }
    }
}

#[async_trait]
impl DocumentRepository for FakeDocumentRepository {
    async fn get_document(&self, document_id: &str) -> Result<Option<Document>, EngineError> {
        Ok(self.documents.get(document_id).cloned())
    }
}

pub struct FakeObjectStore {
    objects: HashMap<String, Vec<u8>>,
}

impl FakeObjectStore {
    /// `page_count` is unused by the bytes themselves — `FakePdfTextProvider`
    /// answers page-count/extraction queries independently — but the
    /// argument keeps call sites self-documenting about what scenario
    /// they're building.
    #[must_use]
    pub fn with_pdf(storage_key: &str, _page_count: usize) -> Self {
        let mut objects = HashMap::new();
        objects.insert(storage_key.to_string(), b"%PDF-1.7\n...".to_vec());
        Self { objects }
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn get_object(&self, storage_key: &str) -> Result<Vec<u8>, EngineError> {
        self.objects
            .get(storage_key)
            .cloned()
            .ok_or_else(|| EngineError::Internal(format!("fixture has no object for key {storage_key}")))
    }
}

/// Reports a fixed page count and returns placeholder text — the fake LLM
/// client ignores chunk text content entirely, so what this returns never
/// needs to resemble a real syllabus.
pub struct FakePdfTextProvider {
    pages: usize,
}

impl FakePdfTextProvider {
    #[must_use]
    pub fn new(pages: usize) -> Self {
        Self { pages }
    }
}

#[async_trait]
impl PdfTextProvider for FakePdfTextProvider {
    async fn page_count(&self, _pdf_bytes: Vec<u8>) -> Result<usize, EngineError> {
        Ok(self.pages)
    }

    async fn extract_text(&self, _pdf_bytes: Vec<u8>) -> Result<String, EngineError> {
        Ok(format!("fixture text for a {}-page document", self.pages))
    }

    async fn extract_range(&self, _pdf_bytes: Vec<u8>, first_page: usize, last_page: usize) -> Result<String, EngineError> {
        Ok(format!("fixture text for pages {first_page}-{last_page}"))
    }
}

enum LlmBehavior {
    AlwaysSucceedsSyllabus { payload: String },
    AlwaysSucceedsPyq { payload: String },
    AlwaysFails { status: Option<u16>, message: String },
    FailsNTimesThenSucceeds { remaining: Mutex<u32>, status: Option<u16>, message: String, payload: String },
    /// Fails every attempt whose user prompt contains one of `needles`
    /// (the chunk prompt embeds `"pages {first}-{last}"`, so a needle
    /// targets one chunk's page range); every other prompt succeeds with
    /// a distinct one-subject payload keyed by its own needle-free page
    /// range, so a merge downstream sees only the surviving chunks.
    FailsForPromptNeedles { needles: Vec<String>, status: Option<u16>, message: String },
}

pub struct FakeLlmClient {
    behavior: LlmBehavior,
}

impl FakeLlmClient {
    #[must_use]
    pub fn always_succeeds_syllabus() -> Self {
        let payload = serde_json::json!({
            "subjects": [
                {
                    "name": "Data Mining",
                    "code": null,
                    "units": [
                        {"number": 1, "title": "Introduction", "topics": [
                            {"title": "Overview", "keywords": []},
                            {"title": "Data Preprocessing", "keywords": []},
                        ]},
                        {"number": 2, "title": "Classification", "topics": [
                            {"title": "Decision Trees", "keywords": []},
                        ]},
                    ],
                    "books": [],
                },
                {
                    "name": "Statistics",
                    "code": null,
                    "units": [
                        {"number": 1, "title": "Probability", "topics": [
                            {"title": "Random Variables", "keywords": []},
                            {"title": "Distributions", "keywords": []},
                        ]},
                    ],
                    "books": [],
                },
            ]
        })
        .to_string();
        Self { behavior: LlmBehavior::AlwaysSucceedsSyllabus { payload } }
    }

    #[must_use]
    pub fn always_succeeds_pyq() -> Self {
        let payload = serde_json::json!({
            "year": "2024",
            "questions": [
                {"question_number": "1a", "text": "Define normalization.", "marks": 5},
            ],
        })
        .to_string();
        Self { behavior: LlmBehavior::AlwaysSucceedsPyq { payload } }
    }

    #[must_use]
    pub fn always_fails_with_status(status: u16, message: impl Into<String>) -> Self {
        Self { behavior: LlmBehavior::AlwaysFails { status: Some(status), message: message.into() } }
    }

    /// Fails `failures` times with a retryable upstream status, then
    /// succeeds with a minimal one-subject syllabus payload — models
    /// scenario 2's "chunk 3 fails once with 429 then succeeds".
    #[must_use]
    pub fn fails_n_times_then_succeeds_syllabus(failures: u32) -> Self {
        let payload = serde_json::json!({
            "subjects": [
                {"name": "Recovered Subject", "code": null, "units": [
                    {"number": 1, "title": "Unit", "topics": [{"title": "Topic", "keywords": []}]},
                ], "books": []},
            ]
        })
        .to_string();
        Self {
            behavior: LlmBehavior::FailsNTimesThenSucceeds {
                remaining: Mutex::new(failures),
                status: Some(429),
                message: "upstream rate limited".to_string(),
                payload,
            },
        }
    }

    /// Permanently fails the chunk whose prompt names any page range in
    /// `ranges` (a recoverable upstream status, so C4 retries it to
    /// exhaustion rather than stopping on the first attempt); every other
    /// chunk succeeds with a subject named after its own page range so a
    /// downstream merge can tell surviving chunks apart.
    #[must_use]
    pub fn fails_for_page_ranges(ranges: &[(usize, usize)], status: u16, message: impl Into<String>) -> Self {
        let needles = ranges.iter().map(|(first, last)| format!("pages {first}-{last}")).collect();
        Self { behavior: LlmBehavior::FailsForPromptNeedles { needles, status: Some(status), message: message.into() } }
    }

    async fn respond(&self, user_prompt: &str) -> Result<String, LlmCallError> {
        match &self.behavior {
            LlmBehavior::AlwaysSucceedsSyllabus { payload } | LlmBehavior::AlwaysSucceedsPyq { payload } => Ok(payload.clone()),
            LlmBehavior::AlwaysFails { status, message } => Err(LlmCallError { status: *status, message: message.clone() }),
            LlmBehavior::FailsNTimesThenSucceeds { remaining, status, message, payload } => {
                let mut remaining = remaining.lock().unwrap();
                if *remaining > 0 {
                    *remaining -= 1;
                    Err(LlmCallError { status: *status, message: message.clone() })
                } else {
                    Ok(payload.clone())
                }
            }
            LlmBehavior::FailsForPromptNeedles { needles, status, message } => {
                if needles.iter().any(|needle| user_prompt.contains(needle.as_str())) {
                    return Err(LlmCallError { status: *status, message: message.clone() });
                }
                let subject_name = format!("Subject for {}", extract_page_range_tag(user_prompt));
                let payload = serde_json::json!({
                    "subjects": [
                        {"name": subject_name, "code": null, "units": [
                            {"number": 1, "title": "Unit", "topics": [{"title": "Topic", "keywords": []}]},
                        ], "books": []},
                    ]
                })
                .to_string();
                Ok(payload)
            }
        }
    }
}

/// Pulls the `"pages N-M"` substring out of a chunk prompt, for building a
/// per-chunk-distinguishable fixture payload.
fn extract_page_range_tag(user_prompt: &str) -> String {
    user_prompt
        .split_whitespace()
        .skip_while(|w| *w != "pages")
        .nth(1)
        .unwrap_or("unknown")
        .to_string()
}

#[async_trait]
impl LlmClient for FakeLlmClient {
    async fn complete_with_schema(
        &self,
        _system_prompt: &str,
        user_prompt: &str,
        _schema: &serde_json::Value,
        _max_output_tokens: u32,
    ) -> Result<String, LlmCallError> {
        self.respond(user_prompt).await
    }

    async fn complete_free_form(&self, _system_prompt: &str, user_prompt: &str, _max_output_tokens: u32) -> Result<String, LlmCallError> {
        self.respond(user_prompt).await
    }
}

#[derive(Default)]
pub struct FakeSyllabusStore {
    saved: Mutex<Vec<(String, String, Vec<Subject>)>>,
}

impl FakeSyllabusStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn saved_count(&self) -> usize {
        self.saved.lock().unwrap().len()
    }

    #[must_use]
    pub fn last_saved_subjects(&self) -> Option<Vec<Subject>> {
        self.saved.lock().unwrap().last().map(|(_, _, subjects)| subjects.clone())
    }
}

#[async_trait]
impl SyllabusStore for FakeSyllabusStore {
    async fn save_subjects(&self, document_id: &str, semester_id: &str, subjects: &[Subject]) -> Result<Vec<String>, EngineError> {
        let ids: Vec<String> = (0..subjects.len()).map(|i| format!("subject-{i}")).collect();
        self.saved.lock().unwrap().push((document_id.to_string(), semester_id.to_string(), subjects.to_vec()));
        Ok(ids)
    }
}

#[derive(Default)]
pub struct FakePyqStore {
    saved: Mutex<Vec<(String, PyqPaper)>>,
}

impl FakePyqStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn saved_count(&self) -> usize {
        self.saved.lock().unwrap().len()
    }
}

#[async_trait]
impl PyqStore for FakePyqStore {
    async fn save_paper(&self, document_id: &str, paper: &PyqPaper) -> Result<String, EngineError> {
        self.saved.lock().unwrap().push((document_id.to_string(), paper.clone()));
        Ok("paper-0".to_string())
    }
}
