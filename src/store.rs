//! Durable storage for sessions.
//!
//! The store keeps every session in creation order and persists them to a single JSON file made
//! of two co-indexed objects:
//!
//! ```json
//! {
//!     "chats": { "20240501140300": [ { "role": "system", "content": "..." } ] },
//!     "chat_names": { "20240501140300": "New Chat" }
//! }
//! ```
//!
//! Both objects are written from the same in-memory list, so an id present in one is present in
//! the other.  A file that breaks that rule, or that is not valid JSON, fails to load with a
//! persistence error rather than being treated as empty.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::log::MessageLog;
use crate::observability::{STORE_LOADS, STORE_SAVE_ERRORS, STORE_SAVES};
use crate::session::{Session, SessionId};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    chats: Map<String, Value>,
    #[serde(default)]
    chat_names: Map<String, Value>,
}

/// Ordered collection of sessions, optionally backed by a file.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    path: Option<PathBuf>,
    sessions: Vec<Session>,
}

impl SessionStore {
    /// Creates an empty store that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads the store at `path`.
    ///
    /// A missing or empty file yields an empty store bound to `path`.  Malformed content is an
    /// [`Error::Persistence`].
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        STORE_LOADS.click();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no session store yet");
                return Ok(Self {
                    path: Some(path),
                    sessions: Vec::new(),
                });
            }
            Err(err) => {
                return Err(Error::persistence(
                    "failed to read session store",
                    &path,
                    Some(Box::new(err)),
                ));
            }
        };
        if content.trim().is_empty() {
            return Ok(Self {
                path: Some(path),
                sessions: Vec::new(),
            });
        }
        let file: StoreFile = serde_json::from_str(&content).map_err(|err| {
            Error::persistence("malformed session store", &path, Some(Box::new(err)))
        })?;
        let sessions = Self::sessions_from_file(file, &path)?;
        tracing::debug!(path = %path.display(), sessions = sessions.len(), "loaded session store");
        Ok(Self {
            path: Some(path),
            sessions,
        })
    }

    fn sessions_from_file(mut file: StoreFile, path: &Path) -> Result<Vec<Session>> {
        let mut sessions = Vec::with_capacity(file.chats.len());
        for (id, messages) in file.chats {
            let name = match file.chat_names.remove(&id) {
                Some(Value::String(name)) => name,
                Some(_) => {
                    return Err(Error::persistence(
                        format!("display name for session {id} is not a string"),
                        path,
                        None,
                    ));
                }
                None => {
                    return Err(Error::persistence(
                        format!("session {id} has no display name"),
                        path,
                        None,
                    ));
                }
            };
            let log: MessageLog = serde_json::from_value(messages).map_err(|err| {
                Error::persistence(
                    format!("malformed messages for session {id}"),
                    path,
                    Some(Box::new(err)),
                )
            })?;
            sessions.push(Session {
                id: SessionId::new(id),
                name,
                log,
            });
        }
        if let Some(orphan) = file.chat_names.keys().next() {
            return Err(Error::persistence(
                format!("display name for unknown session {orphan}"),
                path,
                None,
            ));
        }
        Ok(sessions)
    }

    fn to_file(&self) -> Result<StoreFile> {
        let mut file = StoreFile::default();
        for session in &self.sessions {
            file.chats.insert(
                session.id.to_string(),
                serde_json::to_value(&session.log)?,
            );
            file.chat_names
                .insert(session.id.to_string(), Value::String(session.name.clone()));
        }
        Ok(file)
    }

    /// Writes the whole store to its file.
    ///
    /// The content goes to a sibling temporary file that is synced and then renamed over the
    /// target, so an interrupted save leaves the previous file intact.  Stores created with
    /// [`SessionStore::in_memory`] do nothing.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let result = self.save_to(path);
        match &result {
            Ok(()) => {
                STORE_SAVES.click();
                tracing::debug!(path = %path.display(), sessions = self.sessions.len(), "saved session store");
            }
            Err(err) => {
                STORE_SAVE_ERRORS.click();
                tracing::warn!(path = %path.display(), error = %err, "failed to save session store");
            }
        }
        result
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        let file = self.to_file().map_err(|err| {
            Error::persistence("failed to serialize session store", path, Some(Box::new(err)))
        })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| {
                Error::persistence("failed to create store directory", path, Some(Box::new(err)))
            })?;
        }
        let tmp = sibling_path(path, ".tmp");
        let write = || -> std::io::Result<()> {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut writer, &file)?;
            writer.write_all(b"\n")?;
            let file = writer.into_inner().map_err(|err| err.into_error())?;
            file.sync_all()?;
            fs::rename(&tmp, path)
        };
        write().map_err(|err| {
            let _ = fs::remove_file(&tmp);
            Error::persistence("failed to write session store", path, Some(Box::new(err)))
        })
    }

    /// Renames an unreadable store file out of the way and returns its new location.
    ///
    /// The file is moved to `<name>.corrupt-<YYYYMMDDHHMMSS>` next to the original so a fresh
    /// store can be started without losing the old data.
    pub fn quarantine(path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();
        let stamp = SessionId::from_time(crate::session::local_now());
        let target = sibling_path(path, &format!(".corrupt-{stamp}"));
        fs::rename(path, &target).map_err(|err| {
            Error::persistence("failed to move store file aside", path, Some(Box::new(err)))
        })?;
        tracing::warn!(from = %path.display(), to = %target.display(), "moved unreadable session store aside");
        Ok(target)
    }

    /// The file backing this store, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Adds a session at the end of the store.
    ///
    /// # Errors
    ///
    /// Returns a validation error if a session with the same id already exists.
    pub fn insert(&mut self, session: Session) -> Result<()> {
        if self.contains(&session.id) {
            return Err(Error::validation(
                format!("session {} already exists", session.id),
                Some("id".to_string()),
            ));
        }
        self.sessions.push(session);
        Ok(())
    }

    /// Looks up a session.
    pub fn get(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.iter().find(|session| &session.id == id)
    }

    /// Looks up a session for mutation.
    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|session| &session.id == id)
    }

    /// True if a session with this id exists.
    pub fn contains(&self, id: &SessionId) -> bool {
        self.get(id).is_some()
    }

    /// Lists `(id, display name)` pairs in creation order.
    ///
    /// The iterator is lazy; call again to start over.
    pub fn list_sessions(&self) -> impl Iterator<Item = (&SessionId, &str)> + '_ {
        self.sessions
            .iter()
            .map(|session| (&session.id, session.name.as_str()))
    }

    /// The id of the oldest session.
    pub fn first_id(&self) -> Option<&SessionId> {
        self.sessions.first().map(|session| &session.id)
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True when the store holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("chats.json"));
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn session(id: &str, name: &str, turns: &[(Role, &str)]) -> Session {
        let mut session = Session::new(SessionId::new(id), "You are ChatGPT, a helpful assistant.");
        session.name = name.to_string();
        for (role, content) in turns {
            session.log.append(*role, *content);
        }
        session
    }

    fn temp_store_path() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chats.json");
        (dir, path)
    }

    #[test]
    fn missing_file_loads_empty() {
        let (_dir, path) = temp_store_path();
        let store = SessionStore::load(&path).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.path(), Some(path.as_path()));
    }

    #[test]
    fn empty_file_loads_empty() {
        let (_dir, path) = temp_store_path();
        fs::write(&path, "  \n").unwrap();
        let store = SessionStore::load(&path).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn malformed_file_fails_loud() {
        let (_dir, path) = temp_store_path();
        fs::write(&path, "{\"chats\": [").unwrap();
        let err = SessionStore::load(&path).unwrap_err();
        assert!(err.is_persistence(), "{err:?}");
    }

    #[test]
    fn mismatched_mappings_fail_loud() {
        let (_dir, path) = temp_store_path();
        fs::write(
            &path,
            r#"{"chats": {"1": []}, "chat_names": {"1": "one", "2": "two"}}"#,
        )
        .unwrap();
        assert!(SessionStore::load(&path).unwrap_err().is_persistence());

        fs::write(&path, r#"{"chats": {"1": [], "2": []}, "chat_names": {"1": "one"}}"#).unwrap();
        assert!(SessionStore::load(&path).unwrap_err().is_persistence());
    }

    #[test]
    fn bad_role_fails_loud() {
        let (_dir, path) = temp_store_path();
        fs::write(
            &path,
            r#"{"chats": {"1": [{"role": "wizard", "content": "x"}]}, "chat_names": {"1": "one"}}"#,
        )
        .unwrap();
        assert!(SessionStore::load(&path).unwrap_err().is_persistence());
    }

    #[test]
    fn save_then_load_round_trips() {
        let (_dir, path) = temp_store_path();
        let mut store = SessionStore::load(&path).unwrap();
        store
            .insert(session(
                "20240101000000",
                "Bonjour, ça va ?... (2024-01-01 00:00)",
                &[(Role::User, "Bonjour, ça va ?"), (Role::Assistant, "Oui 😀")],
            ))
            .unwrap();
        store
            .insert(Session {
                id: SessionId::new("20230101000000"),
                name: "empty".to_string(),
                log: MessageLog::default(),
            })
            .unwrap();
        store.insert(session("20240101000000-2", "New Chat", &[])).unwrap();
        store.save().unwrap();

        let loaded = SessionStore::load(&path).unwrap();
        assert_eq!(loaded.sessions, store.sessions);
        let ids: Vec<_> = loaded.list_sessions().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["20240101000000", "20230101000000", "20240101000000-2"]);
    }

    #[test]
    fn saved_file_keeps_unicode_and_layout() {
        let (_dir, path) = temp_store_path();
        let mut store = SessionStore::load(&path).unwrap();
        store.insert(session("7", "naïve", &[(Role::User, "naïve")])).unwrap();
        store.save().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("naïve"));
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["chat_names"]["7"], "naïve");
        assert_eq!(value["chats"]["7"][1]["role"], "user");
        assert!(!sibling_path(&path, ".tmp").exists());
    }

    #[test]
    fn list_sessions_is_restartable() {
        let mut store = SessionStore::in_memory();
        store.insert(session("b", "second-created-first", &[])).unwrap();
        store.insert(session("a", "first-created-second", &[])).unwrap();
        let first: Vec<_> = store.list_sessions().collect();
        let second: Vec<_> = store.list_sessions().collect();
        assert_eq!(first, second);
        assert_eq!(first[0].1, "second-created-first");
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut store = SessionStore::in_memory();
        store.insert(session("a", "one", &[])).unwrap();
        let err = store.insert(session("a", "two", &[])).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn in_memory_save_is_noop() {
        let mut store = SessionStore::in_memory();
        store.insert(session("a", "one", &[])).unwrap();
        store.save().unwrap();
        assert!(store.path().is_none());
    }

    #[test]
    fn quarantine_moves_file_aside() {
        let (dir, path) = temp_store_path();
        fs::write(&path, "not json").unwrap();
        let moved = SessionStore::quarantine(&path).unwrap();
        assert!(!path.exists());
        assert!(moved.exists());
        assert_eq!(moved.parent(), Some(dir.path()));
        assert!(
            moved
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("chats.json.corrupt-")
        );
        assert!(SessionStore::load(&path).unwrap().is_empty());
    }
}
