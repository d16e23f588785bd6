use thiserror::Error;

use crate::chat::ChatError;
use crate::personas::PersonaError;

pub const SESSION_INIT_MESSAGE: &str = "Failed to initialize chat. Check your API Key.";
pub const GREETING_FAILED_MESSAGE: &str =
    "Sorry, could not start conversation. Please check your API key.";
pub const SEND_FAILED_MESSAGE: &str = "Failed to get a response. Please try again.";

/// Conversation errors.
#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("Unknown persona: {0}")]
    PersonaNotFound(String),
    #[error(transparent)]
    Persona(#[from] PersonaError),
    #[error("Message is empty")]
    EmptyMessage,
    #[error("A reply is still streaming for persona {0}")]
    Busy(String),
    #[error("Could not open chat session: {0}")]
    SessionInit(#[source] ChatError),
    #[error("Greeting failed: {0}")]
    Greeting(#[source] ChatError),
    #[error("Streaming failed: {0}")]
    Stream(#[source] ChatError),
    /// The conversation was cleared, edited or deleted mid-stream.
    #[error("Conversation was reset while streaming")]
    Cancelled,
}

impl ConversationError {
    /// Single-line text shown to the user, if any.
    pub fn user_message(&self) -> Option<String> {
        match self {
            Self::SessionInit(_) => Some(SESSION_INIT_MESSAGE.to_string()),
            Self::Greeting(_) => Some(GREETING_FAILED_MESSAGE.to_string()),
            Self::Stream(_) => Some(SEND_FAILED_MESSAGE.to_string()),
            Self::Cancelled => None,
            other => Some(other.to_string()),
        }
    }
}
