//! Event messaging between the conversation manager and its views.
//!
//! The [`ConversationManager`](crate::conversation::ConversationManager)
//! publishes an [`AppEvent`] after every state change. Views subscribe to
//! the [`EventBus`] and render incrementally:
//!
//! ```text
//!     ┌──────────────────────┐
//!     │ ConversationManager  │
//!     └──────────┬───────────┘
//!                │ publish
//!         ┌──────┴──────┐
//!         │  EventBus   │
//!         └──────┬──────┘
//!                │ broadcast
//!       ┌────────┴─────────┐
//!       ▼                  ▼
//! ┌───────────┐     ┌─────────────┐
//! │ Terminal  │     │   Tests /   │
//! │ Renderer  │     │ other views │
//! └───────────┘     └─────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let mut events = manager.subscribe();
//! let mut renderer = TerminalRenderer::new();
//! while let Ok(event) = events.recv().await {
//!     renderer.handle(&event)?;
//! }
//! ```

mod bus;
mod renderer;
mod types;
mod typing;

pub use bus::{BusError, EventBus, EventReceiver, EventSender};
pub use renderer::{RenderStyle, TerminalRenderer};
pub use types::*;
pub use typing::TypingIndicator;
