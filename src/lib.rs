//! Chunked Document Extraction Engine: turns large syllabus/PYQ PDFs into
//! structured records via parallel, chunked LLM extraction, merge/dedup, and
//! transactional persistence, reporting progress over SSE.

pub mod adapters;
pub mod cache;
pub mod classifier;
pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod pipeline;
pub mod reaper;

#[cfg(feature = "server")]
pub mod server;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;
