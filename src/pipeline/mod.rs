//! Extraction pipeline stages, composed by the coordinator (C9).
//!
//! Data flow mirrors §2: [`pdf_text`] produces page-range text, [`llm_client`]
//! turns it into structured JSON, [`retry`] wraps each LLM call with
//! classified-error backoff, [`chunk_planner`] decides how many chunks a
//! document needs, [`worker_pool`] runs them concurrently, and [`merge`]
//! reconciles the results into one canonical hierarchy before persistence.

pub mod chunk_planner;
pub mod extraction;
pub mod llm_client;
pub mod merge;
pub mod pdf_text;
pub mod retry;
pub mod worker_pool;
