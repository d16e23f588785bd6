//! Scripted backend for tests and offline mode.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{ChatBackend, ChatError, ChatSession, Chunk, ChunkStream};

const MANUAL_CAPACITY: usize = 32;

/// A canned reply for the next message sent to any scripted session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    /// Stream these chunks and complete.
    Chunks(Vec<String>),
    /// Stream these chunks, then fail with `error`.
    FailAfter { chunks: Vec<String>, error: String },
    /// Fail before producing any chunk.
    FailToOpen(String),
}

impl ScriptedReply {
    pub fn chunks(chunks: &[&str]) -> Self {
        Self::Chunks(chunks.iter().map(|c| c.to_string()).collect())
    }
}

enum Queued {
    Reply(ScriptedReply),
    Manual(mpsc::Receiver<Result<Chunk, ChatError>>),
}

/// A message received by a scripted session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPrompt {
    pub system_instruction: String,
    pub text: String,
}

#[derive(Default)]
struct Inner {
    replies: Mutex<VecDeque<Queued>>,
    prompts: Mutex<Vec<RecordedPrompt>>,
    sessions_created: AtomicUsize,
    fail_sessions: AtomicBool,
}

/// Backend that replays queued replies instead of calling a model.
///
/// Replies are consumed in order across all sessions. When the queue is
/// empty a session echoes the message back, which is what `--offline` uses.
/// Clones share state.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    inner: Arc<Inner>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, reply: ScriptedReply) {
        self.queue().push_back(Queued::Reply(reply));
    }

    pub fn push_chunks(&self, chunks: &[&str]) {
        self.push_reply(ScriptedReply::chunks(chunks));
    }

    /// Queue a reply whose chunks the caller sends by hand.
    ///
    /// The stream completes when the returned sender is dropped.
    pub fn push_manual(&self) -> mpsc::Sender<Result<Chunk, ChatError>> {
        let (tx, rx) = mpsc::channel(MANUAL_CAPACITY);
        self.queue().push_back(Queued::Manual(rx));
        tx
    }

    /// Make every following `create_session` call fail.
    pub fn set_fail_sessions(&self, fail: bool) {
        self.inner.fail_sessions.store(fail, Ordering::SeqCst);
    }

    pub fn sessions_created(&self) -> usize {
        self.inner.sessions_created.load(Ordering::SeqCst)
    }

    /// Every message sent so far, oldest first.
    pub fn prompts(&self) -> Vec<RecordedPrompt> {
        self.inner
            .prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Queued>> {
        self.inner
            .replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn create_session(
        &self,
        system_instruction: &str,
    ) -> Result<Arc<dyn ChatSession>, ChatError> {
        self.inner.sessions_created.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_sessions.load(Ordering::SeqCst) {
            return Err(ChatError::SessionInit("scripted session failure".to_string()));
        }

        Ok(Arc::new(ScriptedSession {
            system_instruction: system_instruction.to_string(),
            backend: self.clone(),
        }))
    }

    fn name(&self) -> &str {
        "offline"
    }
}

struct ScriptedSession {
    system_instruction: String,
    backend: ScriptedBackend,
}

#[async_trait]
impl ChatSession for ScriptedSession {
    async fn send_message_stream(&self, text: &str) -> Result<ChunkStream, ChatError> {
        if let Ok(mut prompts) = self.backend.inner.prompts.lock() {
            prompts.push(RecordedPrompt {
                system_instruction: self.system_instruction.clone(),
                text: text.to_string(),
            });
        }

        let next = self.backend.queue().pop_front();
        let reply = match next {
            Some(Queued::Manual(rx)) => return Ok(ChunkStream::new(rx)),
            Some(Queued::Reply(reply)) => reply,
            None => ScriptedReply::Chunks(echo_chunks(text)),
        };

        match reply {
            ScriptedReply::FailToOpen(error) => Err(ChatError::Stream(error)),
            ScriptedReply::Chunks(chunks) => Ok(buffered(chunks, None)),
            ScriptedReply::FailAfter { chunks, error } => Ok(buffered(chunks, Some(error))),
        }
    }
}

/// Build a stream with every item already queued.
fn buffered(chunks: Vec<String>, error: Option<String>) -> ChunkStream {
    let (tx, rx) = mpsc::channel(chunks.len() + 1);
    for text in chunks {
        let _ = tx.try_send(Ok(Chunk::new(text)));
    }
    if let Some(error) = error {
        let _ = tx.try_send(Err(ChatError::Stream(error)));
    }
    ChunkStream::new(rx)
}

/// Word-sized chunks of an offline echo reply.
fn echo_chunks(text: &str) -> Vec<String> {
    format!("(offline) {}", text.trim())
        .split_inclusive(' ')
        .map(str::to_string)
        .collect()
}
