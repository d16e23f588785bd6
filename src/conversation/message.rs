//! Transcript entries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Every persona's transcript, keyed by persona id.
pub type TranscriptMap = BTreeMap<String, Vec<Message>>;

/// Who authored a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One entry of a conversation transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub text: String,
    /// Local wall-clock time of creation, `HH:MM`.
    pub timestamp: String,
}

impl Message {
    /// A user turn, text kept verbatim.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text.into())
    }

    /// An empty model message that streamed chunks are appended to.
    pub fn model_placeholder() -> Self {
        Self::new(Role::Model, String::new())
    }

    fn new(role: Role, text: String) -> Self {
        let prefix = match role {
            Role::User => "user",
            Role::Model => "model",
        };
        Self {
            id: format!("{prefix}-{}", uuid::Uuid::new_v4()),
            role,
            text,
            timestamp: chrono::Local::now().format("%H:%M").to_string(),
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}
