//! Session data structures

use crate::utils::{new_id, truncate_chars};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Username used when nobody is logged in
pub const GUEST_USER: &str = "Guest";
/// Title given to sessions before the first user message arrives
pub const DEFAULT_TITLE: &str = "New Chat";
/// Title used when a rename leaves nothing but whitespace
pub const UNTITLED: &str = "Untitled";
/// Maximum number of characters taken from a message for a derived title
pub const DERIVED_TITLE_MAX_CHARS: usize = 40;

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message stored in a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_urls: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied part of a message; the store assigns id and timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDraft {
    pub role: Role,
    pub content: String,
    pub image_urls: Option<Vec<String>>,
}

impl MessageDraft {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            image_urls: None,
        }
    }

    /// Create a user message draft
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message draft
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a system message draft
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Attach image URLs. An empty list attaches nothing.
    pub fn with_images(mut self, urls: Vec<String>) -> Self {
        self.image_urls = if urls.is_empty() { None } else { Some(urls) };
        self
    }
}

/// One conversation thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl ChatSession {
    /// Create an empty session titled [`DEFAULT_TITLE`]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: new_id("chat"),
            title: DEFAULT_TITLE.to_string(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        }
    }

    /// Refresh `updated_at`. Never moves it backwards, so it stays >= `created_at`.
    pub fn touch(&mut self) {
        self.updated_at = self.updated_at.max(Utc::now());
    }

    /// Set the title; blank input becomes [`UNTITLED`]
    pub fn rename(&mut self, title: &str) {
        let title = title.trim();
        self.title = if title.is_empty() {
            UNTITLED.to_string()
        } else {
            title.to_string()
        };
        self.touch();
    }

    /// Append a message built from `draft` and return it.
    ///
    /// The first non-blank user message names a session that still has
    /// the default title.
    pub fn push(&mut self, draft: MessageDraft) -> &Message {
        let trimmed = draft.content.trim();
        if self.title == DEFAULT_TITLE && draft.role == Role::User && !trimmed.is_empty() {
            self.title = truncate_chars(trimmed, DERIVED_TITLE_MAX_CHARS).to_string();
        }

        self.messages.push(Message {
            id: new_id("msg"),
            role: draft.role,
            content: draft.content,
            image_urls: draft.image_urls,
            created_at: Utc::now(),
        });
        self.touch();
        &self.messages[self.messages.len() - 1]
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

/// The entire persisted application state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootState {
    pub current_user: String,
    /// Sessions per user, most recently created first
    #[serde(default)]
    pub sessions_by_user: BTreeMap<String, Vec<ChatSession>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_session_id: Option<String>,
}

impl RootState {
    /// Make sure the current user has a (possibly empty) session list
    pub fn ensure_current_user(&mut self) {
        if !self.sessions_by_user.contains_key(&self.current_user) {
            self.sessions_by_user
                .insert(self.current_user.clone(), Vec::new());
        }
    }
}

impl Default for RootState {
    fn default() -> Self {
        let mut sessions_by_user = BTreeMap::new();
        sessions_by_user.insert(GUEST_USER.to_string(), Vec::new());
        Self {
            current_user: GUEST_USER.to_string(),
            sessions_by_user,
            active_session_id: None,
        }
    }
}
