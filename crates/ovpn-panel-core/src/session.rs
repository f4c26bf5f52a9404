//! Admin sessions with sliding idle expiration.
//!
//! [`SessionStore`] is the storage seam (get/put/expire); the in-memory
//! [`MemorySessionStore`] is the default. [`SessionGuard`] holds the policy:
//! a session whose last refresh is older than the timeout is dropped,
//! otherwise every authorized call pushes its refresh time forward.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use tracing::{debug, info};

/// Opaque, unguessable session token (carried in a cookie).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Draw a fresh 256-bit token.
    pub fn generate() -> Self {
        let bytes: [u8; 32] = rand::random();
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    /// Unix timestamp of the login.
    pub login_time: i64,
    /// Unix timestamp of the last authorized request.
    pub last_refresh: i64,
}

/// Session storage backend.
pub trait SessionStore: Send + Sync {
    fn get(&self, id: &SessionId) -> Option<Session>;
    fn put(&self, id: SessionId, session: Session);
    fn expire(&self, id: &SessionId);
    /// Drop every session last refreshed before `cutoff`. Returns how many went.
    fn expire_idle(&self, cutoff: i64) -> usize;
}

/// Process-local session storage. Sessions do not survive a restart.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map_or(0, |s| s.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, id: &SessionId) -> Option<Session> {
        self.sessions.read().ok()?.get(id).cloned()
    }

    fn put(&self, id: SessionId, session: Session) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.insert(id, session);
        }
    }

    fn expire(&self, id: &SessionId) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.remove(id);
        }
    }

    fn expire_idle(&self, cutoff: i64) -> usize {
        let Ok(mut sessions) = self.sessions.write() else {
            return 0;
        };
        let before = sessions.len();
        sessions.retain(|_, s| s.last_refresh >= cutoff);
        before - sessions.len()
    }
}

/// Why a request was not authorized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Authentication required")]
    NoSession,
    #[error("Session expired")]
    Expired,
}

/// Applies the idle-timeout policy on top of a [`SessionStore`].
#[derive(Clone)]
pub struct SessionGuard {
    store: Arc<dyn SessionStore>,
    timeout: Duration,
}

impl SessionGuard {
    pub fn new(store: Arc<dyn SessionStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    #[allow(clippy::cast_possible_wrap)]
    const fn limit_secs(&self) -> i64 {
        self.timeout.as_secs() as i64
    }

    /// Remove every session idle for longer than the timeout.
    fn sweep(&self, now: i64) {
        let removed = self.store.expire_idle(now.saturating_sub(self.limit_secs()));
        if removed > 0 {
            debug!(removed, "expired idle sessions");
        }
    }

    /// Start a session for an already-verified user.
    pub fn login(&self, username: &str, now: i64) -> SessionId {
        self.sweep(now);
        let id = SessionId::generate();
        self.store.put(
            id.clone(),
            Session {
                username: username.to_string(),
                login_time: now,
                last_refresh: now,
            },
        );
        info!(username, "session started");
        id
    }

    /// Check a session and refresh it.
    ///
    /// Sessions idle for longer than the timeout are expired and rejected.
    pub fn authorize(&self, id: &SessionId, now: i64) -> Result<Session, AuthError> {
        let mut session = self.store.get(id).ok_or(AuthError::NoSession)?;

        let idle = now.saturating_sub(session.last_refresh);
        if idle > self.limit_secs() {
            self.store.expire(id);
            debug!(username = %session.username, idle, "session expired");
            self.sweep(now);
            return Err(AuthError::Expired);
        }
        self.sweep(now);

        session.last_refresh = now;
        self.store.put(id.clone(), session.clone());
        Ok(session)
    }

    /// End a session. Unknown ids are ignored.
    pub fn logout(&self, id: &SessionId) {
        self.store.expire(id);
    }
}

impl std::fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Current unix time in seconds.
pub fn now_secs() -> i64 {
    #[allow(clippy::cast_possible_wrap)]
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    secs
}
