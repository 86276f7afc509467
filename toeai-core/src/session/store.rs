//! The session store: current user, per-user sessions and the active pointer

use super::model::{ChatSession, Message, MessageDraft, RootState, GUEST_USER};
use super::persistence::StatePersistence;
use crate::storage::KeyValueStore;
use std::sync::Arc;
use tracing::{debug, warn};

/// Owns the root state and persists it after every mutation.
///
/// Construct one per process and hand it to whatever drives the chat.
/// Operations that take a session id look it up in the current user's
/// list only; an unknown id leaves the state untouched and skips the
/// write, and the return value says whether anything was applied.
pub struct SessionStore {
    state: RootState,
    persistence: StatePersistence,
}

impl SessionStore {
    /// Load the persisted state, falling back to the default state
    pub fn open(persistence: StatePersistence) -> Self {
        let state = persistence.load();
        debug!(
            "Opened session store for {} ({} users)",
            state.current_user,
            state.sessions_by_user.len()
        );
        Self { state, persistence }
    }

    /// Open a store persisted to `storage`
    pub fn with_storage(storage: Arc<dyn KeyValueStore>) -> Self {
        Self::open(StatePersistence::new(storage))
    }

    /// The whole root state
    pub fn state(&self) -> &RootState {
        &self.state
    }

    pub fn current_user(&self) -> &str {
        &self.state.current_user
    }

    pub fn active_session_id(&self) -> Option<&str> {
        self.state.active_session_id.as_deref()
    }

    /// The current user's sessions, most recently updated first.
    ///
    /// Recomputed on every call; sessions with equal `updated_at` keep
    /// their list order.
    pub fn current_sessions(&self) -> Vec<&ChatSession> {
        let mut sessions: Vec<&ChatSession> = self.all_sessions().iter().collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions
    }

    /// Switch to `username`, or to the guest user when it is blank
    pub fn set_user(&mut self, username: &str) {
        let username = username.trim();
        self.state.current_user = if username.is_empty() {
            GUEST_USER.to_string()
        } else {
            username.to_string()
        };
        self.state.ensure_current_user();

        if self.state.active_session_id.is_none() {
            self.state.active_session_id = self.all_sessions().first().map(|s| s.id.clone());
        }
        debug!("Current user set to {}", self.state.current_user);
        self.persist();
    }

    /// Switch back to the guest user and its most recently created session
    pub fn logout_user(&mut self) {
        self.state.current_user = GUEST_USER.to_string();
        self.state.ensure_current_user();
        self.state.active_session_id = self.all_sessions().first().map(|s| s.id.clone());
        debug!("Logged out, back to {}", GUEST_USER);
        self.persist();
    }

    /// Create a session at the front of the current user's list and activate it
    pub fn new_session(&mut self) -> &ChatSession {
        self.insert_new_session();
        self.persist();
        &self.all_sessions()[0]
    }

    /// The current user's sessions in list order (most recently created first)
    pub fn all_sessions(&self) -> &[ChatSession] {
        self.state
            .sessions_by_user
            .get(&self.state.current_user)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Look up a session of the current user
    pub fn session(&self, id: &str) -> Option<&ChatSession> {
        self.all_sessions().iter().find(|s| s.id == id)
    }

    /// Like [`SessionStore::session`], but a missing id is an error
    pub fn require_session(&self, id: &str) -> crate::Result<&ChatSession> {
        self.session(id)
            .ok_or_else(|| crate::Error::NotFound(format!("session {}", id)))
    }

    /// Point the active session at `id` without checking that it exists.
    ///
    /// `None` or an empty id clears the pointer.
    pub fn set_active_session(&mut self, id: Option<&str>) {
        self.state.active_session_id = id.filter(|id| !id.is_empty()).map(str::to_string);
        if let Some(id) = &self.state.active_session_id {
            debug!("Active session set to {}", id);
        }
        self.persist();
    }

    /// The active session, if it exists in the current user's list
    pub fn get_active_session(&self) -> Option<&ChatSession> {
        let id = self.state.active_session_id.as_deref()?;
        self.session(id)
    }

    /// Rename a session. Returns `false` if no such session exists.
    pub fn rename_session(&mut self, id: &str, title: &str) -> bool {
        let Some(session) = self.session_mut(id) else {
            return false;
        };
        session.rename(title);
        debug!("Renamed session {} to {:?}", id, session.title);
        self.persist();
        true
    }

    /// Delete a session. Returns `false` if no such session exists.
    ///
    /// Deleting the active session activates the session that moved into
    /// its position (or the new last one); deleting the last remaining
    /// session replaces it with a fresh one.
    pub fn delete_session(&mut self, id: &str) -> bool {
        let list = self.current_list_mut();
        let Some(index) = list.iter().position(|s| s.id == id) else {
            return false;
        };
        list.remove(index);
        let remaining = list.len();
        debug!("Deleted session {} ({} left)", id, remaining);

        if self.state.active_session_id.as_deref() == Some(id) {
            if remaining > 0 {
                let next = self.all_sessions()[index.min(remaining - 1)].id.clone();
                debug!("Active session moved to {}", next);
                self.state.active_session_id = Some(next);
            } else {
                self.insert_new_session();
            }
        }
        self.persist();
        true
    }

    /// Append a message to a session. Returns `None` if no such session exists.
    pub fn push_message(&mut self, session_id: &str, draft: MessageDraft) -> Option<&Message> {
        let session = self.session_mut(session_id)?;
        let message_id = session.push(draft).id.clone();
        debug!(
            "Appended {} to session {} ({} messages)",
            message_id,
            session_id,
            session.messages.len()
        );
        self.persist();
        self.session(session_id)?.messages.last()
    }

    fn insert_new_session(&mut self) {
        let session = ChatSession::new();
        let id = session.id.clone();
        self.current_list_mut().insert(0, session);
        debug!("Created session {}", id);
        self.state.active_session_id = Some(id);
    }

    fn current_list_mut(&mut self) -> &mut Vec<ChatSession> {
        let user = self.state.current_user.clone();
        self.state.sessions_by_user.entry(user).or_default()
    }

    fn session_mut(&mut self, id: &str) -> Option<&mut ChatSession> {
        self.state
            .sessions_by_user
            .get_mut(&self.state.current_user)?
            .iter_mut()
            .find(|s| s.id == id)
    }

    fn persist(&self) {
        if let Err(e) = self.persistence.save(&self.state) {
            warn!("Failed to persist session state: {}", e);
        }
    }
}
