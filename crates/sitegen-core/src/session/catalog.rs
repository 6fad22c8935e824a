use std::sync::Arc;

use crate::persistence::{ArtifactStore, SessionDetails, StoreError};

use super::SessionId;

/// Read-only view of every session under the artifact root.
pub struct SessionCatalog {
    store: Arc<dyn ArtifactStore>,
}

impl SessionCatalog {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    /// Details of every session, ordered by session id.
    ///
    /// Sessions without a usable `details.json` are listed with their id as
    /// the title.
    pub fn list_sessions(&self) -> Result<Vec<SessionDetails>, StoreError> {
        let ids = self.store.list_session_ids()?;
        Ok(ids
            .iter()
            .map(|id| self.get_session_details(id))
            .collect())
    }

    /// Details of one session, or the fallback when none are stored yet.
    pub fn get_session_details(&self, session_id: &SessionId) -> SessionDetails {
        match self.store.read_details(session_id) {
            Ok(Some(details)) => details,
            Ok(None) => SessionDetails::fallback(session_id),
            Err(e) => {
                log::warn!("Unreadable details for session {}: {}", session_id, e);
                SessionDetails::fallback(session_id)
            }
        }
    }
}
