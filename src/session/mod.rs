//! Per-user conversation sessions.
//!
//! The store is the only mutable shared structure in the process. Sessions
//! are ephemeral runtime state: nothing persists across a restart. Expiry is
//! lazy, checked when the user's next message arrives, never by a
//! background sweeper.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::transport::UserId;

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// What a user's session is currently doing. The two kinds are mutually
/// exclusive: a user is either picking a lexicon category or chatting,
/// never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for a category index or name after a lexicon listing.
    AwaitingCategoryChoice,
    /// In an awakened conversation.
    Chatting,
}

/// A single user's session.
#[derive(Debug, Clone)]
pub struct UserSession {
    pub state: SessionState,
    /// Refreshed on every handled turn; drives lazy expiry.
    pub last_activity: Instant,
    /// Replies produced beyond the wake-triggering message.
    pub turns_used: u32,
}

impl UserSession {
    fn new(state: SessionState) -> Self {
        Self {
            state,
            last_activity: Instant::now(),
            turns_used: 0,
        }
    }

    fn expired(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() >= timeout
    }
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

/// Process-wide user → session map. Constructed once and handed to the
/// router by reference; at most one session per user at any time.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<UserId, UserSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a user's session, if any.
    pub fn get(&self, user: &UserId) -> Option<UserSession> {
        self.sessions.get(user).map(|entry| entry.clone())
    }

    /// Create (or replace) the user's session in the given state.
    pub fn create(&self, user: &UserId, state: SessionState) {
        self.sessions.insert(user.clone(), UserSession::new(state));
    }

    /// Remove the user's session. Returns whether one existed.
    pub fn delete(&self, user: &UserId) -> bool {
        self.sessions.remove(user).is_some()
    }

    /// Refresh the activity timestamp.
    pub fn touch(&self, user: &UserId) {
        if let Some(mut entry) = self.sessions.get_mut(user) {
            entry.last_activity = Instant::now();
        }
    }

    /// Bump the turn counter, returning the new value.
    pub fn increment_turn(&self, user: &UserId) -> Option<u32> {
        self.sessions.get_mut(user).map(|mut entry| {
            entry.turns_used += 1;
            entry.turns_used
        })
    }

    /// Lazily expire the user's session. Called at the start of handling
    /// every message from a user with an active session; removal is silent.
    /// Returns whether a session was removed.
    pub fn purge_expired(&self, user: &UserId, timeout: Duration) -> bool {
        let expired = self
            .sessions
            .get(user)
            .map(|entry| entry.expired(timeout))
            .unwrap_or(false);
        if expired {
            self.sessions.remove(user);
            tracing::debug!(user = %user, "session expired");
        }
        expired
    }

    /// Whether the user has a session in the given state.
    pub fn is_in_state(&self, user: &UserId, state: SessionState) -> bool {
        self.sessions
            .get(user)
            .map(|entry| entry.state == state)
            .unwrap_or(false)
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, user: &UserId, by: Duration) {
        if let Some(mut entry) = self.sessions.get_mut(user) {
            entry.last_activity = Instant::now() - by;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserId {
        UserId(id.to_string())
    }

    #[test]
    fn test_create_get_delete() {
        let store = SessionStore::new();
        let amy = user("amy");

        assert!(store.get(&amy).is_none());
        store.create(&amy, SessionState::Chatting);

        let session = store.get(&amy).unwrap();
        assert_eq!(session.state, SessionState::Chatting);
        assert_eq!(session.turns_used, 0);

        assert!(store.delete(&amy));
        assert!(!store.delete(&amy));
    }

    #[test]
    fn test_one_session_per_user() {
        let store = SessionStore::new();
        let amy = user("amy");

        store.create(&amy, SessionState::AwaitingCategoryChoice);
        store.create(&amy, SessionState::Chatting);

        let session = store.get(&amy).unwrap();
        assert_eq!(session.state, SessionState::Chatting);
    }

    #[test]
    fn test_increment_and_touch() {
        let store = SessionStore::new();
        let amy = user("amy");
        store.create(&amy, SessionState::Chatting);

        assert_eq!(store.increment_turn(&amy), Some(1));
        assert_eq!(store.increment_turn(&amy), Some(2));

        let before = store.get(&amy).unwrap().last_activity;
        store.touch(&amy);
        let after = store.get(&amy).unwrap().last_activity;
        assert!(after >= before);

        assert_eq!(store.increment_turn(&user("nobody")), None);
    }

    #[test]
    fn test_purge_expired_removes_silently() {
        let store = SessionStore::new();
        let amy = user("amy");
        let timeout = Duration::from_secs(180);

        store.create(&amy, SessionState::Chatting);
        assert!(!store.purge_expired(&amy, timeout));
        assert!(store.get(&amy).is_some());

        store.backdate(&amy, timeout + Duration::from_secs(1));
        assert!(store.purge_expired(&amy, timeout));
        assert!(store.get(&amy).is_none());

        // No session at all: nothing to purge.
        assert!(!store.purge_expired(&amy, timeout));
    }

    #[test]
    fn test_is_in_state() {
        let store = SessionStore::new();
        let amy = user("amy");

        assert!(!store.is_in_state(&amy, SessionState::Chatting));
        store.create(&amy, SessionState::AwaitingCategoryChoice);
        assert!(store.is_in_state(&amy, SessionState::AwaitingCategoryChoice));
        assert!(!store.is_in_state(&amy, SessionState::Chatting));
    }
}
