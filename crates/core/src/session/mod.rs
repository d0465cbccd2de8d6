//! RTSP session management (RFC 2326 §3, §12.37).
//!
//! A [`Session`] is the server-side object created by the first SETUP of a
//! client and destroyed by TEARDOWN or disconnect. It groups the
//! [`Subsession`]s of that client (one per media type) under one ID.
//!
//! ## Session lifecycle (RFC 2326 §A.1)
//!
//! ```text
//! SETUP          -> Ready
//! PLAY           -> Playing
//! PAUSE          -> Paused   (from Playing)
//! PLAY           -> Playing  (from Paused)
//! TEARDOWN       -> (removed)
//! TCP disconnect -> (removed, streams parked)
//! ```

pub mod subsession;
pub mod transport;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::RngExt;

pub use subsession::{Subsession, SubsessionState};
pub use transport::{AddressFamily, Destination, ServerPorts, TransportHeader};

/// Default session timeout in seconds (RFC 2326 §12.37).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Ready,
    Playing,
    Paused,
}

#[derive(Debug)]
pub struct Session {
    /// 16-char hex identifier returned in the `Session` header.
    pub id: String,
    pub uri: String,
    state: RwLock<SessionState>,
    pub timeout_secs: u64,
}

impl Session {
    fn new(uri: &str) -> Self {
        Session {
            id: format!("{:016X}", rand::rng().random::<u64>()),
            uri: uri.to_string(),
            state: RwLock::new(SessionState::Ready),
            timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
        }
    }

    pub fn set_state(&self, state: SessionState) {
        let mut current = self.state.write();
        tracing::debug!(session_id = %self.id, old_state = ?*current, new_state = ?state, "state transition");
        *current = state;
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// `Session` header value, e.g. `"00000000DEADBEEF;timeout=60"`.
    pub fn session_header_value(&self) -> String {
        format!("{};timeout={}", self.id, self.timeout_secs)
    }
}

/// Registry of active sessions shared by all connections of a server.
#[derive(Clone, Default)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_session(&self, uri: &str) -> Arc<Session> {
        let session = Arc::new(Session::new(uri));
        let mut sessions = self.sessions.write();
        sessions.insert(session.id.clone(), session.clone());
        tracing::debug!(session_id = %session.id, uri, total_sessions = sessions.len(), "session created");
        session
    }

    pub fn get_session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn remove_session(&self, id: &str) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write();
        let removed = sessions.remove(id);
        if removed.is_some() {
            tracing::debug!(session_id = %id, total_sessions = sessions.len(), "session removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn playing_count(&self) -> usize {
        self.sessions
            .read()
            .values()
            .filter(|s| s.state() == SessionState::Playing)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_lookup_remove() {
        let sm = SessionManager::new();
        let s = sm.create_session("rtsp://h/stream");
        assert_eq!(s.id.len(), 16);
        assert!(sm.get_session(&s.id).is_some());
        s.set_state(SessionState::Playing);
        assert_eq!(sm.playing_count(), 1);
        assert!(sm.remove_session(&s.id).is_some());
        assert!(sm.is_empty());
    }

    #[test]
    fn header_value_carries_timeout() {
        let sm = SessionManager::new();
        let s = sm.create_session("rtsp://h/stream");
        assert_eq!(s.session_header_value(), format!("{};timeout=60", s.id));
    }
}
