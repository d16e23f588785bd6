//! Conversations with personas.
//!
//! Every persona has at most one remote session and one transcript. The
//! [`ConversationManager`] owns both, runs the greeting and send flows, and
//! persists the transcript map after every change.

mod error;
mod manager;
mod message;

pub use error::{
    ConversationError, GREETING_FAILED_MESSAGE, SEND_FAILED_MESSAGE, SESSION_INIT_MESSAGE,
};
pub use manager::{ChatSnapshot, ConversationManager, GREETING_PROMPT};
pub use message::{Message, Role, TranscriptMap};
