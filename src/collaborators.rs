//! Narrow interfaces to the two external collaborators named in §1: object
//! storage for PDF bytes, and the relational catalogue that owns
//! [`Document`](crate::domain::Document) rows. Everything else the spec
//! calls "out of scope" (routing, auth, CRUD, OCR orchestration) never
//! enters this crate at all; these two traits exist only because the engine
//! must read from them to do its job.
//!
//! Following §9's redesign flag against ambient DI, both are passed to the
//! [`crate::coordinator::Coordinator`] explicitly at construction — the same
//! shape the teacher uses for its `Option<Arc<dyn LLMProvider>>` field on
//! `ConversionConfig`, never a global registry.

use async_trait::async_trait;

use crate::domain::Document;
use crate::error::EngineError;

/// Read-only view onto the external document catalogue. The engine never
/// writes through this trait — subject/course/university CRUD belongs to a
/// different subsystem entirely.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Fetch a document by id, or `Ok(None)` if it doesn't exist.
    async fn get_document(&self, document_id: &str) -> Result<Option<Document>, EngineError>;
}

/// Fetches raw PDF bytes for a document's storage key. The engine treats
/// the object store as opaque bytes-in, bytes-out; it never interprets the
/// key format (bucket/path conventions belong to the storage subsystem).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_object(&self, storage_key: &str) -> Result<Vec<u8>, EngineError>;
}
