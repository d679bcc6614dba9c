use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// The resume id a chat history is scoped to.
pub type ConversationKey = Uuid;

/// Who authored a chat turn. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// User feedback on an assistant turn. Absence is `None` on the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Like,
    Dislike,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl Feedback {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feedback::Like => "like",
            Feedback::Dislike => "dislike",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown chat role '{other}'")),
        }
    }
}

impl FromStr for Feedback {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "like" => Ok(Feedback::Like),
            "dislike" => Ok(Feedback::Dislike),
            other => Err(format!("unknown feedback value '{other}'")),
        }
    }
}

/// A single chat turn.
///
/// `content` of an assistant message starts empty and grows while its reply is
/// revealed; it is only written to the store once finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub feedback: Option<Feedback>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            // Postgres keeps microseconds; stamp at that precision so ordering survives a reload.
            timestamp: Utc::now().trunc_subsecs(6),
            feedback: None,
        }
    }

    /// Moves the timestamp past `previous` when the clock has not advanced, so creation
    /// order and `created_at` order always agree.
    pub fn stamp_after(&mut self, previous: DateTime<Utc>) {
        if self.timestamp <= previous {
            self.timestamp = previous + Duration::microseconds(1);
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Row shape of the `chat_messages` table.
#[derive(Debug, Clone, FromRow)]
pub struct ChatMessageRow {
    pub id: Uuid,
    pub resume_id: Uuid,
    pub role: String,
    pub content: String,
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ChatMessageRow> for ChatMessage {
    type Error = String;

    fn try_from(row: ChatMessageRow) -> Result<Self, Self::Error> {
        Ok(ChatMessage {
            id: row.id,
            role: row.role.parse()?,
            content: row.content,
            timestamp: row.created_at,
            feedback: row.feedback.as_deref().map(str::parse).transpose()?,
        })
    }
}
