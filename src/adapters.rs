//! Minimal concrete adapters for the two external collaborators this engine
//! depends on (the document catalogue, the object store). Both subsystems are
//! explicitly out of scope for this engine; these exist only so the binary
//! in `bin/server.rs` has something real to hand the Coordinator, not
//! because the catalogue/storage services themselves live in this crate.

use async_trait::async_trait;

use crate::collaborators::{DocumentRepository, ObjectStore};
use crate::domain::{Document, DocumentType};
use crate::error::EngineError;

/// Reads the `document_type`/`storage_key`/`ocr_text` columns the shared
/// catalogue already has, using the same `PgPool` the C7 stores use — this
/// engine is a read-only tenant of that table, never its owner or migrator.
#[cfg(feature = "postgres-store")]
pub struct PgDocumentRepository {
    pool: sqlx::PgPool,
}

#[cfg(feature = "postgres-store")]
impl PgDocumentRepository {
    #[must_use]
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[cfg(feature = "postgres-store")]
#[async_trait]
impl DocumentRepository for PgDocumentRepository {
    async fn get_document(&self, document_id: &str) -> Result<Option<Document>, EngineError> {
        let row = sqlx::query(
            "SELECT subject_id, storage_key, document_type, ocr_text FROM documents WHERE id = $1",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| EngineError::Database(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        use sqlx::Row;
        let subject_ref: Option<uuid::Uuid> = row.try_get("subject_id").ok();
        let storage_key: Option<String> = row.try_get("storage_key").ok();
        let ocr_text: Option<String> = row.try_get("ocr_text").ok();
        let document_type_raw: String = row
            .try_get("document_type")
            .map_err(|e| EngineError::Database(e.to_string()))?;

        let document_type = match document_type_raw.as_str() {
            "syllabus" => DocumentType::Syllabus,
            "pyq" => DocumentType::Pyq,
            other => {
                return Err(EngineError::WrongDocumentType {
                    document_id: document_id.to_string(),
                    declared_type: other.to_string(),
                })
            }
        };

        Ok(Some(Document {
            id: document_id.to_string(),
            subject_ref: subject_ref.map(|id| id.to_string()),
            storage_key,
            document_type,
            ocr_text,
        }))
    }
}

/// Fetches PDF bytes from the storage key via plain HTTP GET. The study
/// platform's storage keys resolve to presigned object URLs; this engine
/// never touches bucket credentials or DigitalOcean Spaces APIs directly.
pub struct HttpObjectStore {
    client: reqwest::Client,
}

impl HttpObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

impl Default for HttpObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn get_object(&self, storage_key: &str) -> Result<Vec<u8>, EngineError> {
        let response = self
            .client
            .get(storage_key)
            .send()
            .await
            .map_err(|e| EngineError::Internal(format!("object fetch failed: {e}")))?;

        if !response.status().is_success() {
            return Err(EngineError::Internal(format!(
                "object fetch returned status {}",
                response.status()
            )));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| EngineError::Internal(format!("object fetch body read failed: {e}")))
    }
}
