use std::sync::Arc;

use crate::coordinator::Coordinator;

/// Everything an axum handler needs, wired once at startup and cloned per
/// request — mirrors the Manatan OCR server's `AppState` (`Arc` fields,
/// `Clone` derive) rather than a `tower::Extension` grab-bag.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
}

impl AppState {
    #[must_use]
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }
}
