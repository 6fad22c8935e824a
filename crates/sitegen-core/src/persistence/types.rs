//! Persisted data types.
//!
//! # Session Layout
//!
//! ```text
//! jobs/
//! └── {session_id}/
//!     ├── uploads/              # Raw prompt attachments, keyed by filename
//!     ├── images/               # Generated images (background.png)
//!     ├── template/
//!     │   ├── index.html        # Current generated page
//!     │   └── index.html.old    # Previous page, at most one
//!     ├── agents/
//!     │   └── {role}.json       # Serialized agent state, one per role
//!     └── details.json          # Session title, written once
//! ```

use serde::{Deserialize, Serialize};

use crate::session::SessionId;

pub const UPLOADS_DIR: &str = "uploads";
pub const IMAGES_DIR: &str = "images";
pub const TEMPLATE_DIR: &str = "template";
pub const AGENTS_DIR: &str = "agents";
pub const TEMPLATE_FILE: &str = "index.html";
pub const DEPRECATED_TEMPLATE_FILE: &str = "index.html.old";
pub const DETAILS_FILE: &str = "details.json";
pub const BACKGROUND_IMAGE: &str = "background.png";

/// Display metadata for a session (`details.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetails {
    pub title: String,
    pub session_id: SessionId,
}

impl SessionDetails {
    pub fn new(title: impl Into<String>, session_id: SessionId) -> Self {
        Self {
            title: title.into(),
            session_id,
        }
    }

    /// Details used when nothing has been generated yet: the id is the title.
    pub fn fallback(session_id: &SessionId) -> Self {
        Self {
            title: session_id.to_string(),
            session_id: session_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_use_camel_case_keys() {
        let details = SessionDetails::new("My Site", SessionId::parse("s1").unwrap());
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json, serde_json::json!({"title": "My Site", "sessionId": "s1"}));
    }

    #[test]
    fn fallback_uses_id_as_title() {
        let id = SessionId::parse("abc-123").unwrap();
        let details = SessionDetails::fallback(&id);
        assert_eq!(details.title, "abc-123");
        assert_eq!(details.session_id, id);
    }
}
