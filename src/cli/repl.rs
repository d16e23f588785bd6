//! Interactive REPL implementation.
//!
//! This module provides the main REPL for chatting with personas. It
//! handles:
//!
//! - User input via reedline (multi-line composer)
//! - Command dispatching (slash commands like /select, /clear)
//! - Driving conversation operations while rendering their events
//! - Voice dictation into the composer

use std::future::Future;
use std::sync::Arc;

use reedline::{EditCommand, Reedline, Signal};
use tracing::{debug, warn};

use super::completion::{
    create_reedline, pick_persona, PersonaCatalog, PersonaCompleter, COMMANDS,
};
use super::editor::{confirm, edit_persona};
use super::prompt::PersonaPrompt;
use super::runner::{build_backend, BackendOptions};
use crate::config::{api_key_from_env, Settings, API_KEY_NAME};
use crate::conversation::{ConversationError, ConversationManager};
use crate::db::Database;
use crate::messaging::{AppEvent, BusError, EventReceiver, MessageLevel, TerminalRenderer};
use crate::personas::Persona;
use crate::storage::KeyValueStore;
use crate::voice::{append_dictation, recognizer_for, SpeechRecognizer};

/// REPL state.
pub struct Repl {
    db: Arc<Database>,
    options: BackendOptions,
    manager: Arc<ConversationManager>,
    events: EventReceiver,
    renderer: TerminalRenderer,
    catalog: PersonaCatalog,
    recognizer: Box<dyn SpeechRecognizer>,
    /// Dictated text waiting to be placed in the composer.
    dictation: String,
    model_label: String,
}

impl Repl {
    /// Create a REPL writing to stdout.
    pub fn new(db: Arc<Database>, options: BackendOptions) -> anyhow::Result<Self> {
        Self::with_renderer(db, options, TerminalRenderer::new())
    }

    /// Create a REPL with a custom renderer.
    pub fn with_renderer(
        db: Arc<Database>,
        options: BackendOptions,
        renderer: TerminalRenderer,
    ) -> anyhow::Result<Self> {
        let (backend, model_label) = build_backend(&db, &options)?;
        let store: Arc<dyn KeyValueStore> = db.clone();
        let manager = Arc::new(ConversationManager::new(backend, store));
        let events = manager.subscribe();

        let catalog = PersonaCatalog::new();
        catalog.set(&manager.personas());
        let recognizer = recognizer_for(Settings::new(&db).voice_command());

        Ok(Self {
            db,
            options,
            manager,
            events,
            renderer,
            catalog,
            recognizer,
            dictation: String::new(),
            model_label,
        })
    }

    pub fn manager(&self) -> &ConversationManager {
        &self.manager
    }

    /// Persona named by `query`, else the one used last, else the first.
    pub fn resolve_persona(&self, query: Option<&str>) -> Option<Persona> {
        if let Some(query) = query {
            return self.manager.find_persona(query);
        }

        Settings::new(&self.db)
            .last_persona()
            .and_then(|id| self.manager.persona(&id))
            .or_else(|| self.manager.personas().into_iter().next())
    }

    /// Select the starting persona.
    pub async fn open(&mut self, query: Option<&str>) {
        match self.resolve_persona(query) {
            Some(persona) => self.select(&persona).await,
            None => {
                if let Some(query) = query {
                    self.notice(MessageLevel::Warning, &format!("Unknown persona: {query}"));
                }
                self.notice(MessageLevel::Info, "Pick a persona with /select.");
            }
        }
    }

    /// Send one message and wait for the full reply.
    ///
    /// No greeting is requested first.
    pub async fn prompt_once(&mut self, query: Option<&str>, prompt: &str) -> anyhow::Result<()> {
        let persona = match self.resolve_persona(query) {
            Some(persona) => persona,
            None => anyhow::bail!("Unknown persona: {}", query.unwrap_or_default()),
        };

        self.renderer.set_active(Some(&persona));
        let manager = Arc::clone(&self.manager);
        self.drive(manager.send_message(&persona.id, prompt))
            .await
            .map_err(|e| anyhow::anyhow!(e))
    }

    /// Run the REPL loop.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let completer =
            PersonaCompleter::new(self.catalog.clone(), self.recognizer.is_supported());
        let mut line_editor = create_reedline(completer);

        loop {
            self.collect_dictation();
            self.prefill(&mut line_editor);

            let active = self.manager.active_persona();
            let prompt = PersonaPrompt::new(
                active.as_ref().map(|p| p.name.as_str()),
                &self.model_label,
            )
            .with_listening(self.recognizer.is_listening());

            match line_editor.read_line(&prompt) {
                Ok(Signal::Success(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if self.handle_input(&line).await {
                        break;
                    }
                }
                Ok(Signal::CtrlC) => {
                    println!("^C");
                    continue;
                }
                Ok(Signal::CtrlD) => break,
                Err(err) => {
                    self.notice(MessageLevel::Error, &format!("Readline error: {err}"));
                    break;
                }
            }
        }

        self.recognizer.stop();
        println!("Goodbye!");
        Ok(())
    }

    fn prefill(&mut self, line_editor: &mut Reedline) {
        if self.dictation.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.dictation);
        line_editor.run_edit_commands(&[EditCommand::InsertString(text)]);
    }

    fn collect_dictation(&mut self) {
        while let Some(transcript) = self.recognizer.poll_transcript() {
            self.dictation = append_dictation(&self.dictation, &transcript);
        }
    }

    /// Handle user input. Returns `true` to exit.
    async fn handle_input(&mut self, input: &str) -> bool {
        let trimmed = input.trim();
        if trimmed.starts_with('/') {
            return self.handle_command(trimmed).await;
        }

        let Some(persona) = self.manager.active_persona() else {
            self.notice(MessageLevel::Warning, "Select a persona first with /select.");
            return false;
        };

        let manager = Arc::clone(&self.manager);
        if let Err(e) = self.drive(manager.send_message(&persona.id, input)).await {
            self.report(&e);
        }
        false
    }

    /// Handle a slash command. Returns `true` to exit.
    async fn handle_command(&mut self, input: &str) -> bool {
        let (cmd, args) = match input.split_once(char::is_whitespace) {
            Some((cmd, args)) => (cmd, args.trim()),
            None => (input, ""),
        };
        debug!(command = cmd, "Handling command");

        match cmd {
            "/quit" | "/exit" => return true,
            "/help" => self.cmd_help(),
            "/personas" => {
                let active = self.manager.active_persona().map(|p| p.id);
                let _ = self
                    .renderer
                    .render_personas(&self.manager.personas(), active.as_deref());
            }
            "/select" => self.cmd_select(args).await,
            "/new" => self.cmd_new().await,
            "/edit" => self.cmd_edit(args).await,
            "/delete" => self.cmd_delete(args),
            "/clear" => self.cmd_clear(args),
            "/history" => self.cmd_history(args),
            "/voice" => self.cmd_voice(),
            "/apikey" => self.cmd_apikey(args).await,
            "/model" => self.cmd_model(args).await,
            _ => self.notice(
                MessageLevel::Warning,
                &format!("Unknown command: {cmd}. Type /help for commands."),
            ),
        }
        false
    }

    // =========================================================================
    // Commands
    // =========================================================================

    fn cmd_help(&mut self) {
        let voice = self.recognizer.is_supported();
        let commands: Vec<(&str, &str)> = COMMANDS
            .iter()
            .filter(|(cmd, _)| voice || *cmd != "/voice")
            .copied()
            .collect();
        let _ = self
            .renderer
            .render_help(&commands, "Alt-Enter or Shift-Enter starts a new line.");
    }

    async fn cmd_select(&mut self, args: &str) {
        let persona = if args.is_empty() {
            let active = self.manager.active_persona().map(|p| p.id);
            pick_persona(&self.manager.personas(), active.as_deref())
                .and_then(|id| self.manager.persona(&id))
        } else {
            match self.manager.find_persona(args) {
                Some(p) => Some(p),
                None => {
                    self.notice(MessageLevel::Warning, &format!("Unknown persona: {args}"));
                    None
                }
            }
        };

        if let Some(persona) = persona {
            self.select(&persona).await;
        }
    }

    async fn cmd_new(&mut self) {
        let draft = match edit_persona(None) {
            Ok(Some(draft)) => draft,
            Ok(None) => return,
            Err(e) => return self.notice(MessageLevel::Error, &e.to_string()),
        };

        let manager = Arc::clone(&self.manager);
        match self.drive(manager.add_persona(draft)).await {
            Ok(persona) => {
                self.remember(Some(&persona.id));
                self.notice(MessageLevel::Success, &format!("Created {}", persona.name));
            }
            Err(e) => self.report(&e),
        }
    }

    async fn cmd_edit(&mut self, args: &str) {
        let Some(persona) = self.target(args) else {
            return;
        };
        let draft = match edit_persona(Some(&persona)) {
            Ok(Some(draft)) => draft,
            Ok(None) => return,
            Err(e) => return self.notice(MessageLevel::Error, &e.to_string()),
        };

        let manager = Arc::clone(&self.manager);
        match self.drive(manager.update_persona(&persona.id, draft)).await {
            Ok(updated) => {
                self.notice(MessageLevel::Success, &format!("Updated {}", updated.name))
            }
            Err(e) => self.report(&e),
        }
    }

    fn cmd_delete(&mut self, args: &str) {
        let Some(persona) = self.target(args) else {
            return;
        };
        if !confirm(&format!(
            "Delete {}? Their conversation is deleted too.",
            persona.name
        )) {
            return;
        }

        match self.manager.delete_persona(&persona.id) {
            Ok(removed) => {
                self.flush_events();
                if Settings::new(&self.db).last_persona().as_deref() == Some(removed.id.as_str()) {
                    self.remember(None);
                }
                self.notice(MessageLevel::Success, &format!("Deleted {}", removed.name));
                if self.manager.active_persona().is_none() {
                    self.notice(MessageLevel::Info, "Pick a persona with /select.");
                }
            }
            Err(e) => self.report(&e),
        }
    }

    fn cmd_clear(&mut self, args: &str) {
        let Some(persona) = self.target(args) else {
            return;
        };
        if !confirm(&format!("Clear your conversation with {}?", persona.name)) {
            return;
        }

        match self.manager.clear_history(&persona.id) {
            Ok(()) => {
                self.flush_events();
                self.notice(MessageLevel::Success, "Conversation cleared");
            }
            Err(e) => self.report(&e),
        }
    }

    fn cmd_history(&mut self, args: &str) {
        let Some(persona) = self.target(args) else {
            return;
        };
        let messages = self.manager.transcript(&persona.id).unwrap_or_default();
        let _ = self.renderer.render_transcript(&persona, &messages);
    }

    fn cmd_voice(&mut self) {
        if !self.recognizer.is_supported() {
            self.notice(
                MessageLevel::Warning,
                "Voice input is not available. Set the voice_command setting to enable it.",
            );
            return;
        }

        if self.recognizer.is_listening() {
            self.recognizer.stop();
            self.collect_dictation();
            self.notice(MessageLevel::Info, "Stopped listening");
            return;
        }

        match self.recognizer.start() {
            Ok(()) => self.notice(
                MessageLevel::Info,
                "Listening... type /voice again to stop and edit what was heard.",
            ),
            Err(e) => self.notice(MessageLevel::Error, &e.to_string()),
        }
    }

    async fn cmd_apikey(&mut self, args: &str) {
        if args.is_empty() {
            let status = if self.db.has_api_key(API_KEY_NAME) {
                "A Gemini API key is saved."
            } else if api_key_from_env().is_some() {
                "Using the Gemini API key from the environment."
            } else {
                "No Gemini API key configured. Use /apikey <key>."
            };
            return self.notice(MessageLevel::Info, status);
        }

        if args == "--clear" {
            if let Err(e) = self.db.delete_api_key(API_KEY_NAME) {
                return self.notice(MessageLevel::Error, &format!("Failed to remove API key: {e}"));
            }
            self.notice(MessageLevel::Success, "Saved API key removed");
            return self.reconnect().await;
        }

        if let Err(e) = self.db.save_api_key(API_KEY_NAME, args) {
            return self.notice(MessageLevel::Error, &format!("Failed to save API key: {e}"));
        }
        self.notice(MessageLevel::Success, "API key saved");
        if api_key_from_env().is_some() {
            self.notice(
                MessageLevel::Warning,
                "An API key environment variable is set and takes precedence.",
            );
        }
        self.reconnect().await;
    }

    async fn cmd_model(&mut self, args: &str) {
        if args.is_empty() {
            let label = self.model_label.clone();
            return self.notice(MessageLevel::Info, &format!("Model: {label}"));
        }

        if let Err(e) = Settings::new(&self.db).set("model", args) {
            return self.notice(MessageLevel::Error, &format!("Failed to save model: {e}"));
        }
        self.options.model = Some(args.to_string());
        self.notice(MessageLevel::Success, &format!("Model set to {args}"));
        self.reconnect().await;
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Make `persona` active, showing its transcript or streaming a greeting.
    async fn select(&mut self, persona: &Persona) {
        self.renderer.set_active(Some(persona));
        self.notice(
            MessageLevel::Info,
            &format!("Chatting with {} ({})", persona.name, persona.profession),
        );

        if let Some(messages) = self.manager.transcript(&persona.id) {
            if !messages.is_empty() {
                let _ = self.renderer.render_transcript(persona, &messages);
            }
        }

        let manager = Arc::clone(&self.manager);
        if let Err(e) = self.drive(manager.select_persona(&persona.id)).await {
            self.report(&e);
        }
        self.remember(Some(&persona.id));
    }

    /// Rebuild the backend after a key or model change.
    ///
    /// Transcripts are reloaded from storage; sessions start over.
    async fn reconnect(&mut self) {
        let (backend, model_label) = match build_backend(&self.db, &self.options) {
            Ok(built) => built,
            Err(e) => return self.notice(MessageLevel::Error, &e.to_string()),
        };
        let active = self.manager.active_persona();

        let store: Arc<dyn KeyValueStore> = self.db.clone();
        self.manager = Arc::new(ConversationManager::new(backend, store));
        self.events = self.manager.subscribe();
        self.model_label = model_label;

        if let Some(persona) = active {
            let manager = Arc::clone(&self.manager);
            if let Err(e) = self.drive(manager.select_persona(&persona.id)).await {
                self.report(&e);
            }
        }
    }

    /// Persona named by `args`, or the active one.
    fn target(&mut self, args: &str) -> Option<Persona> {
        if args.is_empty() {
            let active = self.manager.active_persona();
            if active.is_none() {
                self.notice(MessageLevel::Warning, "No persona selected.");
            }
            return active;
        }

        let found = self.manager.find_persona(args);
        if found.is_none() {
            self.notice(MessageLevel::Warning, &format!("Unknown persona: {args}"));
        }
        found
    }

    fn remember(&self, persona_id: Option<&str>) {
        if let Err(e) = Settings::new(&self.db).set_last_persona(persona_id) {
            warn!(error = %e, "Failed to remember persona");
        }
    }

    /// Await `op`, rendering its events as they arrive.
    async fn drive<T>(&mut self, op: impl Future<Output = T>) -> T {
        tokio::pin!(op);
        loop {
            tokio::select! {
                result = &mut op => {
                    self.flush_events();
                    return result;
                }
                event = self.events.recv() => match event {
                    Ok(event) => self.dispatch(&event),
                    Err(BusError::Lagged(n)) => warn!(skipped = n, "Renderer fell behind"),
                    Err(BusError::Closed) => return op.await,
                },
            }
        }
    }

    fn flush_events(&mut self) {
        for event in self.events.drain() {
            self.dispatch(&event);
        }
    }

    fn dispatch(&mut self, event: &AppEvent) {
        match event {
            AppEvent::PersonasChanged => self.catalog.set(&self.manager.personas()),
            AppEvent::ActivePersonaChanged { persona_id } => {
                let persona = persona_id.as_deref().and_then(|id| self.manager.persona(id));
                self.renderer.set_active(persona.as_ref());
            }
            _ => {}
        }
        let _ = self.renderer.handle(event);
    }

    /// Show errors the manager does not surface itself.
    fn report(&mut self, error: &ConversationError) {
        match error {
            ConversationError::SessionInit(_)
            | ConversationError::Greeting(_)
            | ConversationError::Stream(_) => debug!(error = %error, "Conversation flow failed"),
            other => {
                if let Some(message) = other.user_message() {
                    self.notice(MessageLevel::Warning, &message);
                }
            }
        }
    }

    fn notice(&mut self, level: MessageLevel, text: &str) {
        let _ = self.renderer.render_notice(level, text);
    }
}
