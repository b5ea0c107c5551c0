//! Per-chunk extraction: pull page text (C1), ask the LLM for structured
//! JSON (C2, schema mode first, free-form fallback second), and parse the
//! result. This is the unit of work the Chunk Worker Pool (C5) drives
//! through the Retry Executor (C4); it never retries internally — a
//! failure here becomes one classified error for C4 to judge.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::domain::{DocumentType, PyqPaper, SyllabusExtract};
use crate::error::{ClassifiedError, ErrorKind};
use crate::pipeline::llm_client::LlmClient;
use crate::pipeline::pdf_text::PdfTextProvider;

const SYLLABUS_SYSTEM_PROMPT: &str = "You are an expert academic syllabus parser. \
Extract subjects, units, topics, and book references from the supplied syllabus text. \
Respond with JSON only, matching the provided schema exactly.";

const PYQ_SYSTEM_PROMPT: &str = "You are an expert exam-paper parser. \
Extract the paper header and every question, with marks, choices, and topic hints, \
from the supplied previous-year question paper text. Respond with JSON only.";

const MAX_OUTPUT_TOKENS: u32 = 4096;

fn syllabus_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "subjects": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "code": {"type": ["string", "null"]},
                        "units": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "number": {"type": "integer"},
                                    "title": {"type": "string"},
                                    "topics": {
                                        "type": "array",
                                        "items": {
                                            "type": "object",
                                            "properties": {
                                                "title": {"type": "string"},
                                                "keywords": {"type": "array", "items": {"type": "string"}}
                                            },
                                            "required": ["title"]
                                        }
                                    }
                                },
                                "required": ["number", "title"]
                            }
                        },
                        "books": {"type": "array"}
                    },
                    "required": ["name", "units"]
                }
            }
        },
        "required": ["subjects"]
    })
}

fn pyq_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "year": {"type": ["string", "null"]},
            "month": {"type": ["string", "null"]},
            "exam_type": {"type": ["string", "null"]},
            "total_marks": {"type": ["integer", "null"]},
            "duration": {"type": ["string", "null"]},
            "instructions": {"type": ["string", "null"]},
            "questions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "question_number": {"type": "string"},
                        "text": {"type": "string"},
                        "marks": {"type": "integer"}
                    },
                    "required": ["question_number", "text", "marks"]
                }
            }
        },
        "required": ["questions"]
    })
}

fn chunk_prompt(chunk_text: &str, first_page: usize, last_page: usize, total_pages: usize) -> String {
    format!(
        "This text was extracted from pages {first_page}-{last_page} of a {total_pages}-page document.\n\n{chunk_text}"
    )
}

/// Parse `raw` as JSON `T`; a failure here is always classified `LlmParse`
/// and recoverable — the worker pool may retry via the free-form fallback
/// or via C4's backoff.
fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T, ClassifiedError> {
    serde_json::from_str(raw).map_err(|e| ClassifiedError::new(ErrorKind::LlmParse, format!("json parse failed: {e}")))
}

fn llm_error_to_classified(err: &crate::pipeline::llm_client::LlmCallError) -> ClassifiedError {
    let (kind, _recoverable) = crate::classifier::classify_llm_error(err.status, &err.message);
    ClassifiedError::new(kind, err.to_string())
}

/// Run the two-mode LLM attempt (schema, then free-form on parse failure)
/// and parse the result as `T`. Returns a single classified error on total
/// failure — callers (the worker pool, via C4) own retry timing.
async fn extract_structured<T: DeserializeOwned>(
    llm: &Arc<dyn LlmClient>,
    system_prompt: &str,
    user_prompt: &str,
    schema: &Value,
) -> Result<T, ClassifiedError> {
    let schema_attempt = llm
        .complete_with_schema(system_prompt, user_prompt, schema, MAX_OUTPUT_TOKENS)
        .await;

    let raw = match schema_attempt {
        Ok(raw) => raw,
        Err(e) => {
            let classified = llm_error_to_classified(&e);
            if !classified.recoverable() {
                return Err(classified);
            }
            llm.complete_free_form(system_prompt, user_prompt, MAX_OUTPUT_TOKENS)
                .await
                .map_err(|e| llm_error_to_classified(&e))?
        }
    };

    match parse_json::<T>(&raw) {
        Ok(value) => Ok(value),
        Err(_first_err) => {
            let fallback_raw = llm
                .complete_free_form(system_prompt, user_prompt, MAX_OUTPUT_TOKENS)
                .await
                .map_err(|e| llm_error_to_classified(&e))?;
            parse_json::<T>(&fallback_raw)
        }
    }
}

/// Extract one chunk's structured result for the given document type.
pub enum ChunkResult {
    Syllabus(SyllabusExtract),
    Pyq(PyqPaper),
}

#[allow(clippy::too_many_arguments)]
pub async fn extract_chunk(
    pdf_provider: &Arc<dyn PdfTextProvider>,
    llm: &Arc<dyn LlmClient>,
    document_type: DocumentType,
    pdf_bytes: Vec<u8>,
    first_page: usize,
    last_page: usize,
    total_pages: usize,
) -> Result<ChunkResult, ClassifiedError> {
    let chunk_text = pdf_provider
        .extract_range(pdf_bytes, first_page, last_page)
        .await
        .map_err(|e| ClassifiedError::new(ErrorKind::PdfUnreadable, e.to_string()))?;

    let user_prompt = chunk_prompt(&chunk_text, first_page, last_page, total_pages);

    match document_type {
        DocumentType::Syllabus => {
            let extract: SyllabusExtract =
                extract_structured(llm, SYLLABUS_SYSTEM_PROMPT, &user_prompt, &syllabus_schema()).await?;
            Ok(ChunkResult::Syllabus(extract))
        }
        DocumentType::Pyq => {
            let paper: PyqPaper = extract_structured(llm, PYQ_SYSTEM_PROMPT, &user_prompt, &pyq_schema()).await?;
            Ok(ChunkResult::Pyq(paper))
        }
    }
}

/// Extract structured data directly from already-extracted text, used on
/// the OCR-provided path where there is no PDF to slice by page range.
pub async fn extract_from_text(
    llm: &Arc<dyn LlmClient>,
    document_type: DocumentType,
    text: &str,
) -> Result<ChunkResult, ClassifiedError> {
    match document_type {
        DocumentType::Syllabus => {
            let extract: SyllabusExtract =
                extract_structured(llm, SYLLABUS_SYSTEM_PROMPT, text, &syllabus_schema()).await?;
            Ok(ChunkResult::Syllabus(extract))
        }
        DocumentType::Pyq => {
            let paper: PyqPaper = extract_structured(llm, PYQ_SYSTEM_PROMPT, text, &pyq_schema()).await?;
            Ok(ChunkResult::Pyq(paper))
        }
    }
}
