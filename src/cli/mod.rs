//! CLI components.

pub mod completion;
pub mod editor;
pub mod prompt;
pub mod repl;
pub mod runner;

pub use completion::{create_reedline, pick_persona, PersonaCatalog, PersonaCompleter, COMMANDS};
pub use prompt::{PersonaHighlighter, PersonaPrompt};
pub use repl::Repl;
pub use runner::{build_backend, run_interactive, run_single_prompt, BackendOptions};
