//! Shared state for the HTTP server.

use std::sync::Arc;

use sitegen_core::{SessionCatalog, SessionOrchestrator};

/// Upload limit applied when none is configured.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Shared state available to all HTTP handlers.
#[derive(Clone)]
pub struct SharedState {
    pub orchestrator: Arc<SessionOrchestrator>,
    pub catalog: Arc<SessionCatalog>,
    /// Base URL used in `templateurl`. Derived from the `Host` header when unset.
    pub public_url: Option<String>,
    pub max_upload_bytes: usize,
}

impl SharedState {
    pub fn new(orchestrator: Arc<SessionOrchestrator>, catalog: Arc<SessionCatalog>) -> Self {
        Self {
            orchestrator,
            catalog,
            public_url: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn with_public_url(mut self, public_url: Option<String>) -> Self {
        self.public_url = public_url.map(|url| url.trim_end_matches('/').to_string());
        self
    }

    pub fn with_max_upload_bytes(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }
}
