//! PDF Text Provider (C1): page count and text extraction via `pdfium-render`.
//!
//! The teacher's `render.rs` rasterises pages into `DynamicImage`s for a
//! vision LLM; this engine instead pulls plain text off the same loaded
//! `PdfDocument`, since the downstream LLM call here is text-only. The
//! `spawn_blocking` wrapper and password/corruption error mapping are kept
//! exactly as the teacher does them — pdfium's C++ internals are not
//! async-safe.

use std::path::Path;

use async_trait::async_trait;
use pdfium_render::prelude::*;

use crate::error::EngineError;

#[async_trait]
pub trait PdfTextProvider: Send + Sync {
    async fn page_count(&self, pdf_bytes: Vec<u8>) -> Result<usize, EngineError>;
    async fn extract_text(&self, pdf_bytes: Vec<u8>) -> Result<String, EngineError>;
    async fn extract_range(
        &self,
        pdf_bytes: Vec<u8>,
        first_page: usize,
        last_page: usize,
    ) -> Result<String, EngineError>;
}

/// Default provider backed by the bundled pdfium shared library
/// (`pdfium-auto` fetches/caches the binary the way the teacher's CLI does
/// on first run).
pub struct PdfiumTextProvider;

impl PdfiumTextProvider {
    /// Eagerly downloads/caches the pdfium shared library so the first real
    /// request doesn't pay that latency.
    pub fn new() -> Result<Self, EngineError> {
        pdfium_auto::ensure_pdfium_library(None)
            .map_err(|e| EngineError::PdfUnreadable { detail: format!("pdfium setup failed: {e}") })?;
        Ok(Self)
    }

    fn bind() -> Result<Pdfium, EngineError> {
        pdfium_auto::bind_pdfium_silent().map_err(|e| EngineError::PdfUnreadable { detail: format!("{e}") })
    }
}

fn map_load_error(err: PdfiumError) -> EngineError {
    let detail = format!("{err:?}");
    EngineError::PdfUnreadable { detail }
}

fn page_count_blocking(bytes: Vec<u8>) -> Result<usize, EngineError> {
    let pdfium = PdfiumTextProvider::bind()?;
    let document = pdfium
        .load_pdf_from_byte_slice(&bytes, None)
        .map_err(map_load_error)?;
    Ok(document.pages().len() as usize)
}

fn extract_text_blocking(bytes: Vec<u8>, range: Option<(usize, usize)>) -> Result<String, EngineError> {
    let pdfium = PdfiumTextProvider::bind()?;
    let document = pdfium
        .load_pdf_from_byte_slice(&bytes, None)
        .map_err(map_load_error)?;

    let pages = document.pages();
    let total = pages.len() as usize;

    let (first, last) = match range {
        Some((f, l)) => (f, l.min(total)),
        None => (1, total),
    };

    let mut text = String::new();
    for page_no in first..=last.max(first) {
        if page_no == 0 || page_no > total {
            continue;
        }
        let page = pages
            .get((page_no - 1) as u16)
            .map_err(|e| EngineError::PdfUnreadable { detail: format!("page {page_no}: {e:?}") })?;
        if let Ok(page_text) = page.text() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&page_text.all());
        }
    }

    Ok(text)
}

#[async_trait]
impl PdfTextProvider for PdfiumTextProvider {
    async fn page_count(&self, pdf_bytes: Vec<u8>) -> Result<usize, EngineError> {
        tokio::task::spawn_blocking(move || page_count_blocking(pdf_bytes))
            .await
            .map_err(|e| EngineError::Internal(format!("page count task panicked: {e}")))?
    }

    async fn extract_text(&self, pdf_bytes: Vec<u8>) -> Result<String, EngineError> {
        tokio::task::spawn_blocking(move || extract_text_blocking(pdf_bytes, None))
            .await
            .map_err(|e| EngineError::Internal(format!("extract task panicked: {e}")))?
    }

    async fn extract_range(
        &self,
        pdf_bytes: Vec<u8>,
        first_page: usize,
        last_page: usize,
    ) -> Result<String, EngineError> {
        tokio::task::spawn_blocking(move || extract_text_blocking(pdf_bytes, Some((first_page, last_page))))
            .await
            .map_err(|e| EngineError::Internal(format!("extract_range task panicked: {e}")))?
    }
}

/// Resolves to already-OCR'd text when the document carries it, otherwise
/// defers to pdfium extraction. Mirrors §4.1's "OCR is opaque" contract: the
/// provider returns verbatim text rather than re-extracting.
pub enum DocumentText {
    Provided(String),
    NeedsExtraction { pdf_bytes: Vec<u8> },
}

pub fn validate_pdf_magic(path: &Path, bytes: &[u8]) -> Result<(), EngineError> {
    if bytes.len() < 5 || &bytes[0..5] != b"%PDF-" {
        return Err(EngineError::PdfUnreadable {
            detail: format!("{} does not start with a PDF signature", path.display()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bytes_without_pdf_magic() {
        let err = validate_pdf_magic(Path::new("doc.pdf"), b"not a pdf");
        assert!(err.is_err());
    }

    #[test]
    fn accepts_bytes_with_pdf_magic() {
        assert!(validate_pdf_magic(Path::new("doc.pdf"), b"%PDF-1.7\n...").is_ok());
    }
}
