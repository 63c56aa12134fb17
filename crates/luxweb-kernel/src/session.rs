//! Session collaborator interface.
//!
//! The file-backed store is an external collaborator; the core consumes it
//! through [`SessionStore`] and attaches a [`Session`] handle to each request
//! when sessions are enabled. Handlers read and write through the handle;
//! after a handler completes the dispatcher persists the session iff it was
//! written to.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Cookie carrying the session id, kept for wire compatibility.
pub const SESSION_COOKIE: &str = "GSESS";

/// Session errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("session IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session store error: {0}")]
    Store(String),
}

#[derive(Debug, Default)]
struct SessionData {
    values: HashMap<String, Value>,
    dirty: bool,
}

/// Per-request session handle. Cloning shares the underlying data, so the
/// dispatcher's save step sees writes made inside the handler.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    fresh: bool,
    inner: Arc<Mutex<SessionData>>,
}

impl Session {
    /// Construct a session from stored values. `fresh` marks a session that
    /// was newly created for this request (its cookie must still be set).
    pub fn new(id: impl Into<String>, values: HashMap<String, Value>, fresh: bool) -> Self {
        Self {
            id: id.into(),
            fresh,
            inner: Arc::new(Mutex::new(SessionData {
                values,
                dirty: false,
            })),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether this session was created during the current request.
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    /// Read a value; absent keys read as `Null`.
    pub fn get(&self, key: &str) -> Value {
        self.inner
            .lock()
            .values
            .get(key)
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Write a value and mark the session dirty.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        let mut data = self.inner.lock();
        data.values.insert(key.into(), value);
        data.dirty = true;
    }

    /// Whether anything was written since load.
    pub fn is_dirty(&self) -> bool {
        self.inner.lock().dirty
    }

    /// Snapshot of all values, for persistence.
    pub fn values(&self) -> HashMap<String, Value> {
        self.inner.lock().values.clone()
    }
}

/// The store contract the core consumes. `load(None)` creates a new session;
/// `load(Some(id))` returns the stored session, or a new one when the id is
/// unknown or expired.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, id: Option<&str>) -> Result<Session, SessionError>;
    async fn save(&self, session: &Session) -> Result<(), SessionError>;
}

/// In-memory store, for tests and session-less development setups.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, HashMap<String, Value>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: Option<&str>) -> Result<Session, SessionError> {
        let sessions = self.sessions.lock();
        if let Some(id) = id {
            if let Some(values) = sessions.get(id) {
                return Ok(Session::new(id, values.clone(), false));
            }
        }
        let new_id = crate::utils::uid(32, crate::utils::CHSET_FULL);
        Ok(Session::new(new_id, HashMap::new(), true))
    }

    async fn save(&self, session: &Session) -> Result<(), SessionError> {
        self.sessions
            .lock()
            .insert(session.id().to_string(), session.values());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn new_session_is_fresh_and_clean() {
        let store = MemorySessionStore::new();
        let session = store.load(None).await.unwrap();
        assert!(session.is_fresh());
        assert!(!session.is_dirty());
        assert_eq!(session.get("user"), Value::Null);
    }

    #[tokio::test]
    async fn write_then_reload_roundtrip() {
        let store = MemorySessionStore::new();
        let session = store.load(None).await.unwrap();
        session.set("user", json!("alice"));
        assert!(session.is_dirty());
        store.save(&session).await.unwrap();

        let again = store.load(Some(session.id())).await.unwrap();
        assert!(!again.is_fresh());
        assert_eq!(again.get("user"), json!("alice"));
    }

    #[tokio::test]
    async fn unknown_id_creates_fresh_session() {
        let store = MemorySessionStore::new();
        let session = store.load(Some("nope")).await.unwrap();
        assert!(session.is_fresh());
    }

    #[test]
    fn clones_share_writes() {
        let session = Session::new("s1", HashMap::new(), true);
        let clone = session.clone();
        clone.set("k", json!(1));
        assert_eq!(session.get("k"), json!(1));
        assert!(session.is_dirty());
    }
}
