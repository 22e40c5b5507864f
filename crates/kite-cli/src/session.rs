//! On-disk store of session snapshots

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use kite_agent::SessionSnapshot;

/// Summary of a saved session for listings
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: String,
    pub updated_at: DateTime<Utc>,
    pub turn_count: u32,
    pub message_count: usize,
    /// First user message, shortened
    pub preview: String,
}

impl SessionInfo {
    pub fn updated_at_display(&self) -> String {
        self.updated_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M")
            .to_string()
    }
}

/// Saves snapshots as `<dir>/<session id>.json`
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Get the default sessions directory
    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kite")
            .join("sessions")
    }

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    pub fn save(&self, snapshot: &SessionSnapshot) -> anyhow::Result<PathBuf> {
        let path = self.path_for(&snapshot.session_id);
        snapshot
            .save(&path)
            .with_context(|| format!("Failed to save session to {}", path.display()))?;
        tracing::debug!(session = %snapshot.session_id, "Saved session");
        Ok(path)
    }

    /// Load a session by full id or unique id prefix
    pub fn load(&self, id: &str) -> anyhow::Result<SessionSnapshot> {
        let exact = self.path_for(id);
        let path = if exact.exists() {
            exact
        } else {
            let matches: Vec<SessionInfo> = self
                .list()?
                .into_iter()
                .filter(|s| s.id.starts_with(id))
                .collect();
            match matches.as_slice() {
                [only] => self.path_for(&only.id),
                [] => anyhow::bail!("Session not found: {}", id),
                _ => anyhow::bail!("Session id '{}' is ambiguous", id),
            }
        };
        SessionSnapshot::load(&path)
            .with_context(|| format!("Failed to load session from {}", path.display()))
    }

    /// Saved sessions, most recently updated first
    pub fn list(&self) -> anyhow::Result<Vec<SessionInfo>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut sessions = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match SessionSnapshot::load(&path) {
                Ok(snapshot) => sessions.push(Self::info(&snapshot)),
                Err(e) => tracing::warn!("Skipping unreadable session {}: {}", path.display(), e),
            }
        }
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    fn info(snapshot: &SessionSnapshot) -> SessionInfo {
        let preview = snapshot
            .messages
            .iter()
            .find(|m| m.role == kite_ai::Role::User)
            .map(|m| crate::utils::truncate_chars(&m.text().replace('\n', " "), 60))
            .unwrap_or_default();
        SessionInfo {
            id: snapshot.session_id.clone(),
            updated_at: snapshot.updated_at,
            turn_count: snapshot.turn_count,
            message_count: snapshot.messages.len(),
            preview,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kite_ai::{Message, Usage};
    use tempfile::TempDir;

    fn snapshot(id: &str, minutes_ago: i64, first: &str) -> SessionSnapshot {
        let at = Utc::now() - chrono::Duration::minutes(minutes_ago);
        SessionSnapshot {
            session_id: id.to_string(),
            created_at: at,
            updated_at: at,
            turn_count: 1,
            messages: vec![Message::user(first), Message::assistant(Some("ok".into()), vec![])],
            total_usage: Usage::new(10, 2),
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().join("sessions"));
        let original = snapshot("abc-123", 0, "hello");
        store.save(&original).unwrap();

        assert_eq!(store.load("abc-123").unwrap(), original);
        assert_eq!(store.load("abc").unwrap().session_id, "abc-123");
        assert!(store.load("zzz").is_err());
    }

    #[test]
    fn test_list_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        store.save(&snapshot("old", 60, "first task")).unwrap();
        store.save(&snapshot("new", 1, "second task")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let sessions = store.list().unwrap();
        let ids: Vec<_> = sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(sessions[0].preview, "second task");
        assert_eq!(sessions[0].message_count, 2);
    }

    #[test]
    fn test_ambiguous_prefix() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        store.save(&snapshot("ab1", 0, "x")).unwrap();
        store.save(&snapshot("ab2", 0, "y")).unwrap();
        assert!(store.load("ab").is_err());
    }

    #[test]
    fn test_list_missing_dir() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().join("nope"));
        assert!(store.list().unwrap().is_empty());
    }
}
