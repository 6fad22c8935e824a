//! Persistence layer for session artifacts.
//!
//! # Overview
//!
//! The per-session directory is the datastore. Everything a session
//! produces lives under `{jobs_root}/{session_id}/`:
//!
//! - **Uploads** - Prompt attachments, last write wins on name collision
//! - **Images** - Generated images downloaded from the image backend
//! - **Template** - The current generated page plus one deprecated backup
//! - **Agents** - Serialized agent state, one JSON file per role
//! - **Details** - The session title, written exactly once
//!
//! See [`types`] for the on-disk layout.
//!
//! # Design Principles
//!
//! ## Whole-File Replace
//!
//! Readers poll these files while background jobs rewrite them. Every write
//! goes through a uniquely named temp file in the same directory followed by
//! a rename, so a reader sees either the old file, the new file, or no file.
//!
//! ## Pluggable Storage
//!
//! Orchestration code only talks to the [`ArtifactStore`] trait.
//! [`FsArtifactStore`] is the filesystem implementation.

pub mod fs_store;
pub mod types;

use std::collections::BTreeSet;

use thiserror::Error;

use crate::agents::AgentRole;
use crate::session::SessionId;

pub use fs_store::FsArtifactStore;
pub use types::*;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid file name: {0}")]
    InvalidName(String),
}

/// Storage for everything a session produces.
///
/// Absence is never an error: readers get `None` and decide what
/// "not there yet" means.
pub trait ArtifactStore: Send + Sync {
    /// Directory backing a session, created if missing.
    fn session_dir(&self, session_id: &SessionId) -> Result<std::path::PathBuf, StoreError>;

    /// Store an attachment and return the bytes as read back from storage.
    fn save_upload(
        &self,
        session_id: &SessionId,
        filename: &str,
        bytes: &[u8],
    ) -> Result<Vec<u8>, StoreError>;

    /// Move the current template into the backup slot, dropping any older
    /// backup. No-op when there is no current template.
    fn deprecate_template(&self, session_id: &SessionId) -> Result<(), StoreError>;

    fn write_template(&self, session_id: &SessionId, html: &str) -> Result<(), StoreError>;

    fn read_template(&self, session_id: &SessionId) -> Result<Option<String>, StoreError>;

    fn write_agent_state(
        &self,
        session_id: &SessionId,
        role: AgentRole,
        state: &str,
    ) -> Result<(), StoreError>;

    fn load_agent_state(
        &self,
        session_id: &SessionId,
        role: AgentRole,
    ) -> Result<Option<String>, StoreError>;

    fn has_details(&self, session_id: &SessionId) -> bool;

    /// Write `details.json` unless it already exists. Returns whether this
    /// call wrote it.
    fn write_details_once(
        &self,
        session_id: &SessionId,
        details: &SessionDetails,
    ) -> Result<bool, StoreError>;

    fn read_details(&self, session_id: &SessionId) -> Result<Option<SessionDetails>, StoreError>;

    fn save_image(&self, session_id: &SessionId, bytes: &[u8], name: &str)
        -> Result<(), StoreError>;

    fn image_exists(&self, session_id: &SessionId, name: &str) -> bool;

    /// Raw bytes of a servable asset: the template directory first, then images.
    fn read_asset(&self, session_id: &SessionId, filename: &str)
        -> Result<Option<Vec<u8>>, StoreError>;

    fn list_session_ids(&self) -> Result<BTreeSet<SessionId>, StoreError>;
}
