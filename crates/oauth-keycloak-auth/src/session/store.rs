//! Session storage.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use time::OffsetDateTime;

use super::{Session, SessionId};

/// Errors raised by a session store backend.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The backend failed to read or write.
    #[error("Session storage error: {0}")]
    Storage(String),
}

/// Storage for browser sessions.
///
/// `load` returns `None` for unknown or idle-expired sessions and refreshes
/// the last-access time of live ones.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Loads a live session.
    async fn load(&self, id: &SessionId) -> Result<Option<Session>, SessionError>;

    /// Inserts or replaces a session.
    async fn save(&self, session: &Session) -> Result<(), SessionError>;

    /// Removes a session, returning it if it existed.
    async fn remove(&self, id: &SessionId) -> Result<Option<Session>, SessionError>;

    /// Drops idle-expired sessions, returning how many were removed.
    async fn purge_expired(&self) -> Result<usize, SessionError>;
}

/// Process-local session store.
pub struct InMemorySessionStore {
    sessions: DashMap<SessionId, Session>,
    idle_timeout: Duration,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            idle_timeout,
        }
    }

    /// Number of stored sessions, expired ones included until purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, id: &SessionId) -> Result<Option<Session>, SessionError> {
        let now = OffsetDateTime::now_utc();

        let expired = match self.sessions.get_mut(id) {
            None => return Ok(None),
            Some(mut entry) => {
                if entry.is_idle_expired(self.idle_timeout, now) {
                    true
                } else {
                    entry.touch(now);
                    return Ok(Some(entry.clone()));
                }
            }
        };

        // the shard guard is released above; removing while holding it deadlocks
        if expired {
            self.sessions.remove(id);
            tracing::debug!(session_id = %id, "session expired");
        }
        Ok(None)
    }

    async fn save(&self, session: &Session) -> Result<(), SessionError> {
        self.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn remove(&self, id: &SessionId) -> Result<Option<Session>, SessionError> {
        Ok(self.sessions.remove(id).map(|(_, session)| session))
    }

    async fn purge_expired(&self) -> Result<usize, SessionError> {
        let now = OffsetDateTime::now_utc();
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| !session.is_idle_expired(self.idle_timeout, now));
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            tracing::debug!(removed, "purged expired sessions");
        }
        Ok(removed)
    }
}
