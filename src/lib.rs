//! Persona Chat Library
//!
//! Talk to several configurable AI personas, each with its own streaming
//! conversation, from the terminal.
//!
//! ## Main Components
//!
//! - [`personas`] - Persona definitions and the persisted collection
//! - [`conversation`] - Per-persona sessions, transcripts and streaming
//! - [`chat`] - Remote chat backends (Gemini, scripted)
//! - [`messaging`] - Event bus and terminal rendering
//! - [`storage`] - Key-value persistence seam
//! - [`db`] - SQLite database for persistence
//! - [`config`] - Configuration and settings management
//! - [`voice`] - Speech-to-text dictation
//! - [`cli`] - Command-line interface (REPL, commands, runner)
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use persona_chat::{ConversationManager, Database, ScriptedBackend};
//!
//! let db = Arc::new(Database::open()?);
//! db.migrate()?;
//! let manager = ConversationManager::new(Arc::new(ScriptedBackend::new()), db);
//! manager.select_persona("meera-chef").await?;
//! manager.send_message("meera-chef", "What should I cook tonight?").await?;
//! ```

pub mod chat;
pub mod cli;
pub mod config;
pub mod conversation;
pub mod db;
pub mod messaging;
pub mod personas;
pub mod storage;
pub mod voice;

// Re-export commonly used types
pub use chat::{
    ChatBackend, ChatError, ChatSession, Chunk, ChunkStream, GeminiBackend, GeminiConfig,
    ScriptedBackend,
};
pub use config::{Settings, XdgDirs};
pub use conversation::{ChatSnapshot, ConversationError, ConversationManager, Message, Role};
pub use db::Database;
pub use messaging::{AppEvent, EventBus, EventReceiver, TerminalRenderer};
pub use personas::{Persona, PersonaDraft, PersonaError, PersonaStore};
pub use storage::{KeyValueStore, MemoryStore, StorageError};
