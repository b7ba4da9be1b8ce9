//! Conversation threads and their messages, serialized in the layout the
//! browser client kept in local storage.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::blocks::{self, Block};

/// Title of a thread before its first user message.
pub const DEFAULT_TITLE: &str = "New conversation";
/// Maximum title length in characters, before the ellipsis.
pub const TITLE_LIMIT: usize = 30;
pub const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

/// Message content: structured blocks, or a single legacy string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Blocks(Vec<Block>),
    Text(String),
}

impl Content {
    /// Text used for the thread title: text blocks joined by a space.
    pub fn title_text(&self) -> String {
        match self {
            Content::Blocks(blocks) => blocks
                .iter()
                .filter_map(Block::as_text)
                .collect::<Vec<_>>()
                .join(" ")
                .trim()
                .to_string(),
            Content::Text(text) => text.trim().to_string(),
        }
    }

    pub fn to_markdown(&self) -> String {
        match self {
            Content::Blocks(blocks) => blocks::to_markdown(blocks),
            Content::Text(text) => text.clone(),
        }
    }
}

impl From<Vec<Block>> for Content {
    fn from(blocks: Vec<Block>) -> Self {
        Content::Blocks(blocks)
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::Text(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Content,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Message {
    pub fn user(blocks: Vec<Block>) -> Self {
        Self {
            role: Role::User,
            content: Content::Blocks(blocks),
            sources: Vec::new(),
            model: None,
        }
    }

    pub fn assistant(
        content: impl Into<Content>,
        sources: Vec<String>,
        model: Option<String>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            sources,
            model,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Content::Text(text.into()),
            sources: Vec::new(),
            model: None,
        }
    }
}

/// Opaque, time-derived thread identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ThreadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: ThreadId,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
}

impl Thread {
    pub fn new(id: ThreadId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            title: DEFAULT_TITLE.to_string(),
            messages: Vec::new(),
            created_at,
        }
    }

    /// Append a message. The first message, when it is a user message with
    /// text, sets the title.
    pub fn push(&mut self, message: Message) {
        if self.messages.is_empty() && message.role == Role::User {
            if let Some(title) = derive_title(&message.content) {
                self.title = title;
            }
        }
        self.messages.push(message);
    }
}

/// Title for a thread whose first user message is `content`; `None` when the
/// message has no text.
pub fn derive_title(content: &Content) -> Option<String> {
    let text = content.title_text();
    if text.is_empty() {
        return None;
    }
    if text.chars().count() > TITLE_LIMIT {
        let mut title: String = text.chars().take(TITLE_LIMIT).collect();
        title.push_str(ELLIPSIS);
        Some(title)
    } else {
        Some(text)
    }
}
