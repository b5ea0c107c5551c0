//! HTTP handlers for the engine's public surface. Authentication/ownership
//! here is a deliberately thin stand-in — real auth belongs to a different
//! subsystem entirely — using the same shape the Manatan OCR server's handlers use for request
//! identity: plain header extraction, no middleware framework bolted on for
//! a concern this crate doesn't own.

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{EventKind, JobRecord};
use crate::error::EngineError;
use crate::server::state::AppState;

/// Wraps an SSE stream in the headers §4.10 requires be set "before flushing
/// the first byte": no caching, and no intermediary buffering the chunked
/// body (axum's `Sse` only sets `Content-Type`/`Cache-Control` is left to the
/// caller, and proxies like nginx need the `X-Accel-Buffering` opt-out).
fn sse_response(stream: impl Stream<Item = Result<Event, Infallible>> + Send + 'static) -> Response {
    let mut response = Sse::new(stream).keep_alive(KeepAlive::default()).into_response();
    let headers = response.headers_mut();
    headers.insert(axum::http::header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

fn user_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers.get("x-user-id").and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn is_admin(headers: &HeaderMap) -> bool {
    headers.get("x-admin").and_then(|v| v.to_str().ok()) == Some("true")
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

fn engine_error_response(err: &EngineError) -> Response {
    let status = match err {
        EngineError::DocumentNotFound { .. } | EngineError::JobNotFound { .. } => StatusCode::NOT_FOUND,
        EngineError::MissingStorageKey { .. } | EngineError::WrongDocumentType { .. } | EngineError::Validation(_) => {
            StatusCode::BAD_REQUEST
        }
        EngineError::ActiveJobConflict { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, err.to_string())
}

pub async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Deserialize)]
pub struct StartQuery {
    #[serde(default)]
    pub stream: bool,
}

#[derive(Serialize)]
struct JobAck {
    job_id: String,
    status: crate::domain::JobStatus,
    progress: u8,
    message: String,
}

impl From<&JobRecord> for JobAck {
    fn from(record: &JobRecord) -> Self {
        Self { job_id: record.id.clone(), status: record.status, progress: record.progress, message: record.message.clone() }
    }
}

/// `POST /documents/{id}/extract-syllabus` — the start endpoint.
pub async fn start_extraction_handler(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    Query(query): Query<StartQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(user_id) = user_id_from_headers(&headers) else {
        return error_response(StatusCode::UNAUTHORIZED, "missing x-user-id header");
    };

    let started = match state.coordinator.start(user_id, document_id).await {
        Ok(started) => started,
        Err(err) => return engine_error_response(&err),
    };

    if !query.stream {
        return (StatusCode::CREATED, Json(JobAck::from(&started.record))).into_response();
    }

    info!(job_id = %started.record.id, "opened extraction event stream");
    let stream = event_stream_from_receiver(started.events);
    sse_response(stream)
}

fn event_stream_from_receiver(
    mut rx: tokio::sync::broadcast::Receiver<crate::domain::ProgressEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(rx.resubscribe(), move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((to_sse_event(&event), rx)),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .chain(stream::empty())
    // `rx` above is dropped with the outer receiver once this closure's first
    // resubscribe is taken; keep the original alive for the duration of the
    // stream by moving it into the unfold state instead of a bare closure
    // capture, which is what `resubscribe` above accomplishes.
    .map(Ok)
}

fn to_sse_event(event: &crate::domain::ProgressEvent) -> Event {
    let kind = match event.kind {
        EventKind::Started => "started",
        EventKind::Progress => "progress",
        EventKind::Warning => "warning",
        EventKind::Complete => "complete",
        EventKind::Error => "error",
    };
    Event::default().event(kind).json_data(event).unwrap_or_else(|_| Event::default().event(kind).data("{}"))
}

/// `GET /extraction-jobs/{jobId}` — non-streaming snapshot.
pub async fn job_snapshot_handler(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    match state.coordinator.cache().get_job(&job_id).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("job {job_id} not found or expired")),
        Err(err) => engine_error_response(&err),
    }
}

/// `GET /extraction-jobs/{jobId}/stream` — reconnect endpoint: snapshot-then-
/// close, no live resumption — a declared future enhancement that would need
/// pub/sub fan-out this engine doesn't implement.
pub async fn job_stream_handler(State(state): State<AppState>, Path(job_id): Path<String>, headers: HeaderMap) -> Response {
    let record = match state.coordinator.cache().get_job(&job_id).await {
        Ok(Some(record)) => record,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, format!("job {job_id} not found or expired")),
        Err(err) => return engine_error_response(&err),
    };

    let requester = user_id_from_headers(&headers);
    let owns = requester.as_deref() == Some(record.user_id.as_str());
    if !owns && !is_admin(&headers) {
        return error_response(StatusCode::FORBIDDEN, "not the job owner and not an admin");
    }

    let kind = if record.is_terminal() {
        if record.status == crate::domain::JobStatus::Failed || record.status == crate::domain::JobStatus::Cancelled {
            EventKind::Error
        } else {
            EventKind::Complete
        }
    } else {
        EventKind::Progress
    };

    let mut event = crate::domain::ProgressEvent::new(kind, record.id.clone(), record.progress, record.phase, record.message.clone());
    event.total_chunks = Some(record.total_chunks);
    event.completed_chunks = Some(record.completed_chunks);
    if let Some(err) = &record.last_error {
        event.error_type = Some(err.kind);
        event.error_message = Some(err.message.clone());
    }

    let sse_event = to_sse_event(&event);
    let stream = stream::once(async move { Ok::<_, Infallible>(sse_event) });
    sse_response(stream)
}
