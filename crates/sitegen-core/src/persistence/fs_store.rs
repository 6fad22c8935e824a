//! Filesystem-backed artifact store.
//!
//! # Design Notes
//!
//! - **Atomic writes**: Write to a uniquely named temp file, then rename.
//!   Concurrent writers of the same artifact never share a temp file, and
//!   the last rename wins.
//! - **Write-once details**: `details.json` is published with a hard link,
//!   which fails instead of replacing an existing file.
//! - **Lazy directories**: A session directory appears on the first write,
//!   reads never create anything.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::types::{
    SessionDetails, AGENTS_DIR, DEPRECATED_TEMPLATE_FILE, DETAILS_FILE, IMAGES_DIR, TEMPLATE_DIR,
    TEMPLATE_FILE, UPLOADS_DIR,
};
use super::{ArtifactStore, StoreError};
use crate::agents::AgentRole;
use crate::session::id::{validate_path_component, MAX_FILE_NAME_LEN};
use crate::session::SessionId;

/// Artifact store rooted at a jobs directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir_of(&self, session_id: &SessionId) -> PathBuf {
        self.root.join(session_id.as_str())
    }

    fn template_path(&self, session_id: &SessionId) -> PathBuf {
        self.dir_of(session_id).join(TEMPLATE_DIR).join(TEMPLATE_FILE)
    }

    fn agent_state_path(&self, session_id: &SessionId, role: AgentRole) -> PathBuf {
        self.dir_of(session_id)
            .join(AGENTS_DIR)
            .join(format!("{}.json", role.file_stem()))
    }

    fn details_path(&self, session_id: &SessionId) -> PathBuf {
        self.dir_of(session_id).join(DETAILS_FILE)
    }
}

/// Reduce a client-supplied file name to a single safe component.
fn safe_file_name(name: &str) -> Result<String, StoreError> {
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StoreError::InvalidName(name.to_string()))?;
    validate_path_component(base, MAX_FILE_NAME_LEN)
        .map_err(|_| StoreError::InvalidName(name.to_string()))?;
    Ok(base.to_string())
}

/// Sibling temp path. The name is fixed length so a target name at the
/// filesystem limit still leaves room for it.
fn temp_path_for(path: &Path) -> PathBuf {
    path.with_file_name(format!(".{}.tmp", Uuid::new_v4().simple()))
}

/// Replace `path` with `contents` in one rename.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    let temp_path = temp_path_for(path);
    fs::write(&temp_path, contents)?;

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }

    Ok(())
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl ArtifactStore for FsArtifactStore {
    fn session_dir(&self, session_id: &SessionId) -> Result<PathBuf, StoreError> {
        let dir = self.dir_of(session_id);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn save_upload(
        &self,
        session_id: &SessionId,
        filename: &str,
        bytes: &[u8],
    ) -> Result<Vec<u8>, StoreError> {
        let name = safe_file_name(filename)?;
        let path = self.dir_of(session_id).join(UPLOADS_DIR).join(name);
        write_atomic(&path, bytes)?;
        Ok(fs::read(&path)?)
    }

    fn deprecate_template(&self, session_id: &SessionId) -> Result<(), StoreError> {
        let dir = self.dir_of(session_id).join(TEMPLATE_DIR);
        let index_path = dir.join(TEMPLATE_FILE);
        let deprecated_path = dir.join(DEPRECATED_TEMPLATE_FILE);

        if !index_path.exists() {
            return Ok(());
        }

        match fs::remove_file(&deprecated_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        // A concurrent deprecation may have moved it already
        match fs::rename(&index_path, &deprecated_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_template(&self, session_id: &SessionId, html: &str) -> Result<(), StoreError> {
        write_atomic(&self.template_path(session_id), html.as_bytes())
    }

    fn read_template(&self, session_id: &SessionId) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.template_path(session_id)) {
            Ok(html) => Ok(Some(html)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_agent_state(
        &self,
        session_id: &SessionId,
        role: AgentRole,
        state: &str,
    ) -> Result<(), StoreError> {
        write_atomic(&self.agent_state_path(session_id, role), state.as_bytes())
    }

    fn load_agent_state(
        &self,
        session_id: &SessionId,
        role: AgentRole,
    ) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.agent_state_path(session_id, role)) {
            Ok(state) => Ok(Some(state)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn has_details(&self, session_id: &SessionId) -> bool {
        self.details_path(session_id).exists()
    }

    fn write_details_once(
        &self,
        session_id: &SessionId,
        details: &SessionDetails,
    ) -> Result<bool, StoreError> {
        let path = self.details_path(session_id);
        if path.exists() {
            return Ok(false);
        }

        fs::create_dir_all(self.dir_of(session_id))?;
        let temp_path = temp_path_for(&path);
        fs::write(&temp_path, serde_json::to_string_pretty(details)?)?;

        // hard_link refuses to replace, so a racing writer loses cleanly
        let linked = fs::hard_link(&temp_path, &path);
        let _ = fs::remove_file(&temp_path);

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn read_details(&self, session_id: &SessionId) -> Result<Option<SessionDetails>, StoreError> {
        match read_optional(&self.details_path(session_id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save_image(
        &self,
        session_id: &SessionId,
        bytes: &[u8],
        name: &str,
    ) -> Result<(), StoreError> {
        let name = safe_file_name(name)?;
        write_atomic(&self.dir_of(session_id).join(IMAGES_DIR).join(name), bytes)
    }

    fn image_exists(&self, session_id: &SessionId, name: &str) -> bool {
        match safe_file_name(name) {
            Ok(name) => self.dir_of(session_id).join(IMAGES_DIR).join(name).is_file(),
            Err(_) => false,
        }
    }

    fn read_asset(
        &self,
        session_id: &SessionId,
        filename: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        validate_path_component(filename, MAX_FILE_NAME_LEN)
            .map_err(|_| StoreError::InvalidName(filename.to_string()))?;

        let dir = self.dir_of(session_id);
        for sub in [TEMPLATE_DIR, IMAGES_DIR] {
            if let Some(bytes) = read_optional(&dir.join(sub).join(filename))? {
                return Ok(Some(bytes));
            }
        }
        Ok(None)
    }

    fn list_session_ids(&self) -> Result<BTreeSet<SessionId>, StoreError> {
        let mut ids = BTreeSet::new();

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(id) = SessionId::parse(name) {
                    ids.insert(id);
                }
            }
        }

        Ok(ids)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn make_store() -> (TempDir, FsArtifactStore) {
        let dir = tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path().join("jobs"));
        (dir, store)
    }

    fn sid(raw: &str) -> SessionId {
        SessionId::parse(raw).unwrap()
    }

    fn template_dir(store: &FsArtifactStore, id: &SessionId) -> PathBuf {
        store.root().join(id.as_str()).join(TEMPLATE_DIR)
    }

    fn leftover_temp_files(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".tmp"))
            .collect()
    }

    mod session_dir {
        use super::*;

        #[test]
        fn creates_on_demand() {
            let (_tmp, store) = make_store();
            let id = sid("s1");
            let dir = store.session_dir(&id).unwrap();
            assert!(dir.is_dir());
            assert_eq!(dir, store.root().join("s1"));
        }

        #[test]
        fn is_deterministic() {
            let (_tmp, store) = make_store();
            let id = sid("s1");
            assert_eq!(
                store.session_dir(&id).unwrap(),
                store.session_dir(&id).unwrap()
            );
        }
    }

    mod uploads {
        use super::*;

        #[test]
        fn save_returns_stored_bytes() {
            let (_tmp, store) = make_store();
            let id = sid("s1");
            let bytes = store.save_upload(&id, "notes.txt", b"hello").unwrap();
            assert_eq!(bytes, b"hello");
            assert!(store.root().join("s1/uploads/notes.txt").is_file());
        }

        #[test]
        fn collision_overwrites() {
            let (_tmp, store) = make_store();
            let id = sid("s1");
            store.save_upload(&id, "a.txt", b"first").unwrap();
            let bytes = store.save_upload(&id, "a.txt", b"second").unwrap();
            assert_eq!(bytes, b"second");
        }

        #[test]
        fn strips_client_directories() {
            let (_tmp, store) = make_store();
            let id = sid("s1");
            store.save_upload(&id, "../../evil.txt", b"x").unwrap();
            assert!(store.root().join("s1/uploads/evil.txt").is_file());
            assert!(!store.root().join("evil.txt").exists());
        }

        #[test]
        fn accepts_names_longer_than_a_session_id() {
            let (_tmp, store) = make_store();
            let name = format!("{}.pdf", "r".repeat(140));
            let bytes = store.save_upload(&sid("s1"), &name, b"%PDF").unwrap();
            assert_eq!(bytes, b"%PDF");
            assert!(store.root().join("s1/uploads").join(&name).is_file());
        }

        #[test]
        fn accepts_name_at_filesystem_limit() {
            let (_tmp, store) = make_store();
            let name = format!("{}.pdf", "r".repeat(MAX_FILE_NAME_LEN - 4));
            store.save_upload(&sid("s1"), &name, b"x").unwrap();
            assert!(store.root().join("s1/uploads").join(&name).is_file());
        }

        #[test]
        fn rejects_name_over_filesystem_limit() {
            let (_tmp, store) = make_store();
            let name = "r".repeat(MAX_FILE_NAME_LEN + 1);
            let result = store.save_upload(&sid("s1"), &name, b"x");
            assert!(matches!(result, Err(StoreError::InvalidName(_))));
        }

        #[test]
        fn rejects_nameless_upload() {
            let (_tmp, store) = make_store();
            let result = store.save_upload(&sid("s1"), "..", b"x");
            assert!(matches!(result, Err(StoreError::InvalidName(_))));
        }
    }

    mod template {
        use super::*;

        #[test]
        fn read_missing_is_none() {
            let (_tmp, store) = make_store();
            assert_eq!(store.read_template(&sid("s1")).unwrap(), None);
        }

        #[test]
        fn write_then_read() {
            let (_tmp, store) = make_store();
            let id = sid("s1");
            store.write_template(&id, "<p>hi</p>").unwrap();
            assert_eq!(
                store.read_template(&id).unwrap().as_deref(),
                Some("<p>hi</p>")
            );
        }

        #[test]
        fn write_replaces_and_leaves_no_temp_file() {
            let (_tmp, store) = make_store();
            let id = sid("s1");
            store.write_template(&id, "one").unwrap();
            store.write_template(&id, "two").unwrap();
            assert_eq!(store.read_template(&id).unwrap().as_deref(), Some("two"));
            assert!(leftover_temp_files(&template_dir(&store, &id)).is_empty());
        }

        #[test]
        fn readers_never_see_a_partial_write() {
            let (_tmp, store) = make_store();
            let id = sid("s1");
            let old = format!("<p>{}</p>", "old ".repeat(4096));
            let new = format!("<p>{}</p>", "new ".repeat(8192));
            store.write_template(&id, &old).unwrap();

            std::thread::scope(|scope| {
                let writer = scope.spawn(|| {
                    for i in 0..200 {
                        let html = if i % 2 == 0 { &new } else { &old };
                        store.write_template(&id, html).unwrap();
                    }
                });

                while !writer.is_finished() {
                    match store.read_template(&id).unwrap() {
                        None => {}
                        Some(html) => assert!(html == old || html == new, "torn read"),
                    }
                }
            });

            assert!(leftover_temp_files(&template_dir(&store, &id)).is_empty());
        }

        #[test]
        fn deprecate_without_template_is_noop() {
            let (_tmp, store) = make_store();
            let id = sid("s1");
            store.deprecate_template(&id).unwrap();
            assert!(!template_dir(&store, &id)
                .join(DEPRECATED_TEMPLATE_FILE)
                .exists());
        }

        #[test]
        fn deprecate_moves_current_to_backup() {
            let (_tmp, store) = make_store();
            let id = sid("s1");
            store.write_template(&id, "v1").unwrap();
            store.deprecate_template(&id).unwrap();

            let dir = template_dir(&store, &id);
            assert!(!dir.join(TEMPLATE_FILE).exists());
            assert_eq!(
                fs::read_to_string(dir.join(DEPRECATED_TEMPLATE_FILE)).unwrap(),
                "v1"
            );
            assert_eq!(store.read_template(&id).unwrap(), None);
        }

        #[test]
        fn deprecate_twice_keeps_last_real_template() {
            let (_tmp, store) = make_store();
            let id = sid("s1");
            store.write_template(&id, "v1").unwrap();
            store.deprecate_template(&id).unwrap();
            store.write_template(&id, "v2").unwrap();
            store.deprecate_template(&id).unwrap();
            store.deprecate_template(&id).unwrap();

            let dir = template_dir(&store, &id);
            let backups: Vec<_> = fs::read_dir(&dir)
                .unwrap()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_name().to_string_lossy().ends_with(".old"))
                .collect();
            assert_eq!(backups.len(), 1);
            assert_eq!(
                fs::read_to_string(dir.join(DEPRECATED_TEMPLATE_FILE)).unwrap(),
                "v2"
            );
        }
    }

    mod agent_state {
        use super::*;

        #[test]
        fn load_missing_is_none() {
            let (_tmp, store) = make_store();
            assert_eq!(
                store
                    .load_agent_state(&sid("s1"), AgentRole::Orchestrator)
                    .unwrap(),
                None
            );
        }

        #[test]
        fn roles_use_separate_files() {
            let (_tmp, store) = make_store();
            let id = sid("s1");
            store
                .write_agent_state(&id, AgentRole::Orchestrator, "{\"a\":1}")
                .unwrap();
            store
                .write_agent_state(&id, AgentRole::Template, "{\"b\":2}")
                .unwrap();

            assert_eq!(
                store
                    .load_agent_state(&id, AgentRole::Orchestrator)
                    .unwrap()
                    .as_deref(),
                Some("{\"a\":1}")
            );
            assert_eq!(
                store
                    .load_agent_state(&id, AgentRole::Template)
                    .unwrap()
                    .as_deref(),
                Some("{\"b\":2}")
            );
            assert!(store
                .root()
                .join("s1/agents/orchestrator_agent.json")
                .is_file());
        }
    }

    mod details {
        use super::*;

        #[test]
        fn write_once_then_refuse() {
            let (_tmp, store) = make_store();
            let id = sid("s1");
            let first = SessionDetails::new("First", id.clone());
            let second = SessionDetails::new("Second", id.clone());

            assert!(!store.has_details(&id));
            assert!(store.write_details_once(&id, &first).unwrap());
            assert!(store.has_details(&id));
            assert!(!store.write_details_once(&id, &second).unwrap());

            assert_eq!(store.read_details(&id).unwrap(), Some(first));
        }

        #[test]
        fn read_missing_is_none() {
            let (_tmp, store) = make_store();
            assert_eq!(store.read_details(&sid("s1")).unwrap(), None);
        }

        #[test]
        fn read_corrupt_is_json_error() {
            let (_tmp, store) = make_store();
            let id = sid("s1");
            let dir = store.session_dir(&id).unwrap();
            fs::write(dir.join(DETAILS_FILE), "{not json").unwrap();
            assert!(matches!(store.read_details(&id), Err(StoreError::Json(_))));
        }

        #[test]
        fn write_once_leaves_no_temp_file() {
            let (_tmp, store) = make_store();
            let id = sid("s1");
            store
                .write_details_once(&id, &SessionDetails::fallback(&id))
                .unwrap();
            assert!(leftover_temp_files(&store.root().join("s1")).is_empty());
        }
    }

    mod images_and_assets {
        use super::*;

        #[test]
        fn save_image_and_check_existence() {
            let (_tmp, store) = make_store();
            let id = sid("s1");
            assert!(!store.image_exists(&id, "background.png"));
            store.save_image(&id, b"png", "background.png").unwrap();
            assert!(store.image_exists(&id, "background.png"));
        }

        #[test]
        fn read_asset_prefers_template_dir() {
            let (_tmp, store) = make_store();
            let id = sid("s1");
            store.write_template(&id, "<html></html>").unwrap();
            store.save_image(&id, b"png", "background.png").unwrap();

            assert_eq!(
                store.read_asset(&id, "index.html").unwrap().as_deref(),
                Some(&b"<html></html>"[..])
            );
            assert_eq!(
                store.read_asset(&id, "background.png").unwrap().as_deref(),
                Some(&b"png"[..])
            );
        }

        #[test]
        fn read_missing_asset_is_none() {
            let (_tmp, store) = make_store();
            assert_eq!(store.read_asset(&sid("s1"), "missing.png").unwrap(), None);
        }

        #[test]
        fn read_asset_rejects_traversal() {
            let (_tmp, store) = make_store();
            assert!(matches!(
                store.read_asset(&sid("s1"), ".."),
                Err(StoreError::InvalidName(_))
            ));
        }
    }

    mod listing {
        use super::*;

        #[test]
        fn missing_root_is_empty() {
            let (_tmp, store) = make_store();
            assert!(store.list_session_ids().unwrap().is_empty());
        }

        #[test]
        fn lists_only_directories() {
            let (_tmp, store) = make_store();
            store.session_dir(&sid("b")).unwrap();
            store.session_dir(&sid("a")).unwrap();
            fs::write(store.root().join("stray.txt"), "x").unwrap();

            let ids: Vec<_> = store
                .list_session_ids()
                .unwrap()
                .into_iter()
                .map(|id| id.to_string())
                .collect();
            assert_eq!(ids, vec!["a", "b"]);
        }
    }
}
