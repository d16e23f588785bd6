//! Event types published by the conversation manager.

use serde::{Deserialize, Serialize};

use crate::conversation::Message;

/// Message levels for styling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A state change observers may react to.
///
/// Events carry enough data to update a view incrementally; a full picture
/// is always available from `ConversationManager::snapshot`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppEvent {
    /// The persona collection was added to, edited or shrunk.
    PersonasChanged,
    ActivePersonaChanged {
        persona_id: Option<String>,
    },
    /// A user message or an empty model placeholder was appended.
    MessageAppended {
        persona_id: String,
        message: Message,
    },
    /// Streamed text was appended to an in-flight model message.
    ChunkAppended {
        persona_id: String,
        message_id: String,
        text: String,
    },
    /// The in-flight model message is complete; `text` is its final form.
    MessageFinalized {
        persona_id: String,
        message_id: String,
        text: String,
    },
    /// A failed reply's placeholder was rolled back.
    MessageRemoved {
        persona_id: String,
        message_id: String,
    },
    /// The transcript was replaced, emptied or discarded.
    TranscriptReset {
        persona_id: String,
    },
    LoadingChanged {
        persona_id: String,
        loading: bool,
    },
    /// The user-visible error changed. `None` dismisses it.
    ErrorChanged {
        message: Option<String>,
    },
    /// Free-form status line for the terminal.
    Notice {
        level: MessageLevel,
        text: String,
    },
}

impl AppEvent {
    pub fn info(text: impl Into<String>) -> Self {
        Self::Notice {
            level: MessageLevel::Info,
            text: text.into(),
        }
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self::Notice {
            level: MessageLevel::Success,
            text: text.into(),
        }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::Notice {
            level: MessageLevel::Warning,
            text: text.into(),
        }
    }

    /// Persona the event concerns, if it is persona scoped.
    pub fn persona_id(&self) -> Option<&str> {
        match self {
            Self::MessageAppended { persona_id, .. }
            | Self::ChunkAppended { persona_id, .. }
            | Self::MessageFinalized { persona_id, .. }
            | Self::MessageRemoved { persona_id, .. }
            | Self::TranscriptReset { persona_id }
            | Self::LoadingChanged { persona_id, .. } => Some(persona_id),
            Self::ActivePersonaChanged { persona_id } => persona_id.as_deref(),
            Self::PersonasChanged | Self::ErrorChanged { .. } | Self::Notice { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_tag() {
        let event = AppEvent::LoadingChanged {
            persona_id: "p".into(),
            loading: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "loading_changed");
        assert_eq!(json["persona_id"], "p");
        assert_eq!(json["loading"], true);
    }

    #[test]
    fn test_notice_helpers() {
        assert!(matches!(
            AppEvent::warning("careful"),
            AppEvent::Notice {
                level: MessageLevel::Warning,
                ..
            }
        ));
    }

    #[test]
    fn test_persona_id() {
        let event = AppEvent::ChunkAppended {
            persona_id: "meera-chef".into(),
            message_id: "m".into(),
            text: "x".into(),
        };
        assert_eq!(event.persona_id(), Some("meera-chef"));
        assert_eq!(AppEvent::PersonasChanged.persona_id(), None);
        assert_eq!(
            AppEvent::ActivePersonaChanged { persona_id: None }.persona_id(),
            None
        );
    }
}
