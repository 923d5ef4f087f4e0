//! Session persistence for conversation history
//!
//! Sessions live under `$HOME/.agent/sessions/<id>.json`; `$HOME/.agent/latest_session`
//! names the last one saved.

use std::fs;
use std::path::{Path, PathBuf};

use agent_core::{ChatMessage, Role};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const SESSIONS_DIR: &str = "sessions";
const LATEST_FILE: &str = "latest_session";
const HISTORY_FILE: &str = "history.txt";

/// A saved conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// `provider:model` id
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

impl Session {
    pub fn new(model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: new_session_id(),
            created_at: now,
            updated_at: now,
            model: model.into(),
            messages: Vec::new(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// User and assistant messages
    pub fn message_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| matches!(m.role, Role::User | Role::Assistant))
            .count()
    }

    pub fn first_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// Sortable, filesystem-safe id: local time plus a short random suffix
pub fn new_session_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", Local::now().format("%Y%m%d-%H%M%S"), &suffix[..4])
}

/// Session store for saving and loading sessions
#[derive(Debug, Clone)]
pub struct SessionStore {
    /// State directory, `$HOME/.agent` by default
    base_dir: PathBuf,
}

impl SessionStore {
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir().context("Could not find home directory")?;
        Ok(Self::at(home.join(".agent")))
    }

    pub fn at(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn history_path(&self) -> PathBuf {
        self.base_dir.join(HISTORY_FILE)
    }

    /// Write the session, then point `latest_session` at it
    pub fn save(&self, session: &Session) -> Result<PathBuf> {
        let dir = self.sessions_dir();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create sessions directory {}", dir.display()))?;

        let json = serde_json::to_string_pretty(session).context("Failed to serialize session")?;
        let path = self.session_path(&session.session_id);
        write_atomic(&path, &format!("{}\n", json))?;
        write_atomic(&self.latest_path(), &format!("{}\n", session.session_id))?;

        debug!(session_id = %session.session_id, path = %path.display(), "Saved session");
        Ok(path)
    }

    /// Load a session by id, or the latest one
    pub fn load(&self, id: Option<&str>) -> Result<Session> {
        let id = match id {
            Some(id) => id.to_string(),
            None => self.latest_id()?,
        };

        let path = self.session_path(&id);
        if !path.exists() {
            bail!("Session not found: {}", id);
        }

        let json = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read session file {}", path.display()))?;
        let session: Session = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse session file {}", path.display()))?;

        info!(session_id = %session.session_id, messages = session.messages.len(), "Loaded session");
        Ok(session)
    }

    pub fn latest_id(&self) -> Result<String> {
        let path = self.latest_path();
        if !path.exists() {
            bail!("No latest session found");
        }
        let id = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?
            .trim()
            .to_string();
        if id.is_empty() {
            bail!("Latest session pointer was empty");
        }
        Ok(id)
    }

    /// All sessions, most recently updated first
    pub fn list(&self) -> Result<Vec<SessionSummary>> {
        let dir = self.sessions_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", dir.display())),
        };

        let mut sessions = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().map_or(false, |e| e == "json") {
                match load_summary(&path) {
                    Ok(summary) => sessions.push(summary),
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to load session summary"),
                }
            }
        }

        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| b.session_id.cmp(&a.session_id)));
        Ok(sessions)
    }

    /// Remove a session; the latest pointer is cleared when it named it
    pub fn delete(&self, id: &str) -> Result<()> {
        let path = self.session_path(id);
        if !path.exists() {
            bail!("Session not found: {}", id);
        }
        fs::remove_file(&path).context("Failed to delete session file")?;

        if self.latest_id().ok().as_deref() == Some(id) {
            let latest = self.latest_path();
            fs::remove_file(&latest).with_context(|| format!("Failed to remove {}", latest.display()))?;
        }

        info!(session_id = %id, "Deleted session");
        Ok(())
    }

    fn sessions_dir(&self) -> PathBuf {
        self.base_dir.join(SESSIONS_DIR)
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.sessions_dir().join(format!("{}.json", id))
    }

    fn latest_path(&self) -> PathBuf {
        self.base_dir.join(LATEST_FILE)
    }
}

/// Write to `<path>.tmp` and rename over `path`
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, contents).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to move {} into place", tmp.display()))?;
    Ok(())
}

fn load_summary(path: &Path) -> Result<SessionSummary> {
    let json = fs::read_to_string(path)?;
    let session: Session = serde_json::from_str(&json)?;

    Ok(SessionSummary {
        message_count: session.message_count(),
        preview: session.first_user_message().map(str::to_string),
        session_id: session.session_id,
        updated_at: session.updated_at,
        model: session.model,
    })
}

/// Lightweight summary of a session for listing
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: String,
    pub updated_at: DateTime<Utc>,
    pub model: String,
    pub message_count: usize,
    /// First user message
    pub preview: Option<String>,
}

impl SessionSummary {
    pub fn short_description(&self) -> String {
        let preview = self.preview.as_deref().unwrap_or("").lines().next().unwrap_or("");
        let preview = if preview.chars().count() > 50 {
            format!("{}...", preview.chars().take(47).collect::<String>())
        } else {
            preview.to_string()
        };

        format!(
            "{} ({} msgs, {}, {}) {}",
            self.session_id,
            self.message_count,
            self.model,
            format_age(&self.updated_at),
            preview
        )
        .trim_end()
        .to_string()
    }
}

/// Format a timestamp as relative age
fn format_age(dt: &DateTime<Utc>) -> String {
    let duration = Utc::now().signed_duration_since(*dt);

    if duration.num_minutes() < 1 {
        "just now".to_string()
    } else if duration.num_hours() < 1 {
        format!("{}m ago", duration.num_minutes())
    } else if duration.num_days() < 1 {
        format!("{}h ago", duration.num_hours())
    } else if duration.num_days() < 7 {
        format!("{}d ago", duration.num_days())
    } else {
        dt.format("%Y-%m-%d").to_string()
    }
}

/// Saves session snapshots in the background
///
/// Requests coalesce: only the newest snapshot not yet written is kept.
pub struct SessionAutosaver {
    tx: watch::Sender<Option<Session>>,
    handle: JoinHandle<()>,
}

impl SessionAutosaver {
    pub fn spawn(store: SessionStore) -> Self {
        let (tx, mut rx) = watch::channel::<Option<Session>>(None);

        let handle = tokio::spawn(async move {
            // Ends once the sender is dropped and the last value has been seen
            while rx.changed().await.is_ok() {
                let snapshot = rx.borrow_and_update().clone();
                let Some(session) = snapshot else { continue };

                let store = store.clone();
                let session_id = session.session_id.clone();
                match tokio::task::spawn_blocking(move || store.save(&session)).await {
                    Ok(Ok(_)) => debug!(session_id = %session_id, "Autosaved session"),
                    Ok(Err(e)) => warn!(session_id = %session_id, error = %e, "Autosave failed"),
                    Err(e) => warn!(session_id = %session_id, error = %e, "Autosave task failed"),
                }
            }
        });

        Self { tx, handle }
    }

    /// Queue a snapshot; never blocks
    pub fn request_save(&self, session: &Session) {
        self.tx.send_replace(Some(session.clone()));
    }

    /// Flush the pending snapshot and stop
    pub async fn close(self) {
        let Self { tx, handle } = self;
        drop(tx);
        if let Err(e) = handle.await {
            warn!(error = %e, "Autosaver did not shut down cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (SessionStore, TempDir) {
        let dir = TempDir::new().unwrap();
        (SessionStore::at(dir.path()), dir)
    }

    fn session_with(id: &str, text: &str) -> Session {
        let mut session = Session::new("openai:gpt-4.1");
        session.session_id = id.to_string();
        session.messages.push(ChatMessage::user(text));
        session.messages.push(ChatMessage::assistant("ok"));
        session
    }

    #[test]
    fn test_session_id_format() {
        let id = new_session_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[1].len(), 6);
        assert!(parts[0].chars().chain(parts[1].chars()).all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), 4);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_sessions_created_together_get_distinct_ids() {
        let ids: std::collections::HashSet<String> = (0..20).map(|_| Session::new("ollama:llama3").session_id).collect();
        assert_eq!(ids.len(), 20);
    }

    #[test]
    fn test_save_writes_session_and_latest_pointer() {
        let (store, dir) = create_test_store();
        let session = session_with("20260101-120000", "hello");

        let path = store.save(&session).unwrap();
        assert_eq!(path, dir.path().join("sessions/20260101-120000.json"));
        assert!(fs::read_to_string(&path).unwrap().ends_with("}\n"));
        assert!(!dir.path().join("sessions/20260101-120000.json.tmp").exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("latest_session")).unwrap(),
            "20260101-120000\n"
        );
    }

    #[test]
    fn test_load_latest_and_by_id() {
        let (store, _dir) = create_test_store();
        store.save(&session_with("20260101-120000", "first")).unwrap();
        store.save(&session_with("20260101-130000", "second")).unwrap();

        let latest = store.load(None).unwrap();
        assert_eq!(latest.session_id, "20260101-130000");
        assert_eq!(latest.messages[0].content, "second");

        let first = store.load(Some("20260101-120000")).unwrap();
        assert_eq!(first.first_user_message(), Some("first"));
    }

    #[test]
    fn test_load_errors() {
        let (store, dir) = create_test_store();
        assert!(store.load(None).unwrap_err().to_string().contains("No latest session"));

        fs::write(dir.path().join("latest_session"), "  \n").unwrap();
        assert!(store.load(None).unwrap_err().to_string().contains("empty"));

        fs::write(dir.path().join("latest_session"), "missing-id\n").unwrap();
        assert!(store.load(None).unwrap_err().to_string().contains("Session not found: missing-id"));
    }

    #[test]
    fn test_list_newest_first_and_delete() {
        let (store, _dir) = create_test_store();
        assert!(store.list().unwrap().is_empty());

        let mut older = session_with("20260101-120000", "older");
        older.updated_at = Utc::now() - chrono::Duration::hours(2);
        store.save(&older).unwrap();
        store.save(&session_with("20260101-130000", "newer")).unwrap();

        let list = store.list().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].session_id, "20260101-130000");
        assert_eq!(list[0].message_count, 2);
        assert!(list[1].short_description().contains("2h ago"));

        store.delete("20260101-120000").unwrap();
        assert_eq!(store.list().unwrap().len(), 1);
        assert!(store.delete("20260101-120000").is_err());
        assert_eq!(store.latest_id().unwrap(), "20260101-130000");
    }

    #[test]
    fn test_delete_latest_clears_pointer() {
        let (store, dir) = create_test_store();
        store.save(&session_with("20260101-120000", "only")).unwrap();

        store.delete("20260101-120000").unwrap();
        assert!(!dir.path().join("latest_session").exists());
        assert!(store.load(None).unwrap_err().to_string().contains("No latest session"));
    }

    #[test]
    fn test_short_description_truncates_preview() {
        let summary = SessionSummary {
            session_id: "20260101-120000".into(),
            updated_at: Utc::now(),
            model: "ollama:llama3".into(),
            message_count: 4,
            preview: Some("p".repeat(80)),
        };
        let desc = summary.short_description();
        assert!(desc.starts_with("20260101-120000 (4 msgs, ollama:llama3, just now) "));
        assert!(desc.ends_with(&format!("{}...", "p".repeat(47))));
    }

    #[tokio::test]
    async fn test_autosaver_flushes_latest_on_close() {
        let (store, _dir) = create_test_store();
        let autosaver = SessionAutosaver::spawn(store.clone());

        let mut session = session_with("20260101-120000", "start");
        for i in 0..5 {
            session.messages.push(ChatMessage::user(format!("message {}", i)));
            autosaver.request_save(&session);
        }
        autosaver.close().await;

        let saved = store.load(None).unwrap();
        assert_eq!(saved.messages.len(), session.messages.len());
        assert_eq!(saved.messages.last().unwrap().content, "message 4");
    }

    #[tokio::test]
    async fn test_autosaver_survives_save_errors() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "file").unwrap();

        let autosaver = SessionAutosaver::spawn(SessionStore::at(&blocker));
        autosaver.request_save(&session_with("20260101-120000", "lost"));
        autosaver.close().await;
    }
}
