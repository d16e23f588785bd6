//! Remote chat backends.
//!
//! A [`ChatBackend`] opens [`ChatSession`]s configured with a persona's
//! system instruction. Each session keeps its own multi-turn context and
//! answers a message with a [`ChunkStream`] of text fragments.
//!
//! Two backends ship with the crate:
//! - [`GeminiBackend`] - streams from the Gemini `streamGenerateContent` API
//! - [`ScriptedBackend`] - canned replies for tests and offline use

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod gemini;
mod scripted;
mod sse;

pub use gemini::{GeminiBackend, GeminiConfig};
pub use scripted::{RecordedPrompt, ScriptedBackend, ScriptedReply};

/// One streamed fragment of a model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
}

impl Chunk {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Errors raised by chat backends.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    /// Missing API key or unusable backend settings.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// The session could not be opened.
    #[error("Session error: {0}")]
    SessionInit(String),
    /// The request failed or the stream broke mid-reply.
    #[error("Stream error: {0}")]
    Stream(String),
}

/// Receiving half of a streamed reply.
///
/// Yields chunks in order. `None` marks normal completion; an `Err` item
/// is terminal.
pub struct ChunkStream {
    rx: mpsc::Receiver<Result<Chunk, ChatError>>,
}

impl ChunkStream {
    pub fn new(rx: mpsc::Receiver<Result<Chunk, ChatError>>) -> Self {
        Self { rx }
    }

    /// Receive the next chunk.
    ///
    /// Returns `None` when the stream is complete.
    pub async fn next(&mut self) -> Option<Result<Chunk, ChatError>> {
        self.rx.recv().await
    }

    /// Drain the stream into a single string.
    #[cfg(test)]
    pub(crate) async fn collect_text(mut self) -> Result<String, ChatError> {
        let mut text = String::new();
        while let Some(chunk) = self.next().await {
            text.push_str(&chunk?.text);
        }
        Ok(text)
    }
}

/// A stateful multi-turn conversation with the remote model.
#[async_trait]
pub trait ChatSession: Send + Sync {
    /// Send a user turn and stream the model's reply.
    ///
    /// Fails before any chunk is produced if the request cannot be made.
    async fn send_message_stream(&self, text: &str) -> Result<ChunkStream, ChatError>;
}

/// Factory for chat sessions.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Open a new session whose every turn is governed by `system_instruction`.
    async fn create_session(
        &self,
        system_instruction: &str,
    ) -> Result<Arc<dyn ChatSession>, ChatError>;

    /// Short name for logs and the status line.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_text_concatenates() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(Chunk::new("Na"))).await.unwrap();
        tx.send(Ok(Chunk::new("maste"))).await.unwrap();
        drop(tx);

        assert_eq!(ChunkStream::new(rx).collect_text().await.unwrap(), "Namaste");
    }

    #[tokio::test]
    async fn test_collect_text_stops_on_error() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(Chunk::new("Hi"))).await.unwrap();
        tx.send(Err(ChatError::Stream("reset".into()))).await.unwrap();
        drop(tx);

        let err = ChunkStream::new(rx).collect_text().await.unwrap_err();
        assert_eq!(err, ChatError::Stream("reset".into()));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            ChatError::Configuration("no key".into()).to_string(),
            "Configuration error: no key"
        );
    }
}
