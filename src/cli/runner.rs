//! CLI runner for interactive and single-prompt modes.

use std::sync::Arc;

use crate::chat::{ChatBackend, GeminiBackend, GeminiConfig, ScriptedBackend};
use crate::cli::repl::Repl;
use crate::config::Settings;
use crate::db::Database;

/// How to reach the model.
#[derive(Debug, Clone, Default)]
pub struct BackendOptions {
    /// Use the scripted echo backend instead of Gemini.
    pub offline: bool,
    /// Model override; the `model` setting applies otherwise.
    pub model: Option<String>,
}

/// Build the chat backend, returning it with the model label for the prompt.
pub fn build_backend(
    db: &Database,
    options: &BackendOptions,
) -> anyhow::Result<(Arc<dyn ChatBackend>, String)> {
    if options.offline {
        let backend = ScriptedBackend::new();
        let label = backend.name().to_string();
        return Ok((Arc::new(backend), label));
    }

    let settings = Settings::new(db);
    let model = options.model.clone().unwrap_or_else(|| settings.model());
    let config = GeminiConfig::new(settings.api_key())
        .with_model(model.clone())
        .with_api_base(settings.api_base());

    if config.api_key.is_none() {
        eprintln!(
            "\x1b[1;33m⚠ No Gemini API key configured. Set GEMINI_API_KEY or use /apikey <key>.\x1b[0m"
        );
    }

    Ok((Arc::new(GeminiBackend::new(config)?), model))
}

/// Run a single prompt and exit.
pub async fn run_single_prompt(
    db: Arc<Database>,
    options: BackendOptions,
    persona: Option<&str>,
    prompt: &str,
) -> anyhow::Result<()> {
    let mut repl = Repl::new(db, options)?;
    repl.prompt_once(persona, prompt).await
}

/// Run in interactive mode.
pub async fn run_interactive(
    db: Arc<Database>,
    options: BackendOptions,
    persona: Option<&str>,
) -> anyhow::Result<()> {
    print_banner();

    let mut repl = Repl::new(db, options)?;
    repl.open(persona).await;
    repl.run().await
}

/// Print the welcome banner.
pub fn print_banner() {
    println!();
    for line in banner_text_lines() {
        println!("  \x1b[1;35m{line}\x1b[0m");
    }
    println!();
    println!("  \x1b[2mChat with AI personas  v{}\x1b[0m", get_version());
    println!("  \x1b[2mType \x1b[0m\x1b[1;36m/help\x1b[0m\x1b[2m for commands, or start chatting!\x1b[0m");
    println!();
}

/// Get the application version string.
pub fn get_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Banner art without ANSI codes.
pub fn banner_text_lines() -> Vec<&'static str> {
    vec![
        "┌─┐┌─┐┬ ┬┌─┐┌┬┐",
        "├─┘│  ├─┤├─┤ │ ",
        "┴  └─┘┴ ┴┴ ┴ ┴ ",
    ]
}
