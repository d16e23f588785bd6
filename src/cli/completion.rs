//! Reedline completion with Tab-triggered menu.
//!
//! Type "/" then Tab to see commands. Commands that act on a persona
//! complete persona ids after the first space.

use std::sync::{Arc, Mutex};

use nu_ansi_term::{Color, Style};
use reedline::{
    ColumnarMenu, Completer, EditCommand, Emacs, FileBackedHistory, KeyCode, KeyModifiers,
    MenuBuilder, Reedline, ReedlineEvent, ReedlineMenu, Span, Suggestion,
};
use tracing::warn;

use super::prompt::PersonaHighlighter;
use crate::config::XdgDirs;
use crate::personas::Persona;

const HISTORY_CAPACITY: usize = 500;

/// All slash commands with descriptions
pub const COMMANDS: &[(&str, &str)] = &[
    ("/apikey", "Save (or --clear) the Gemini API key"),
    ("/clear", "Clear the conversation"),
    ("/delete", "Delete a persona"),
    ("/edit", "Edit a persona"),
    ("/exit", "Exit"),
    ("/help", "Show help"),
    ("/history", "Show the conversation"),
    ("/model", "Show or set the model"),
    ("/new", "Create a persona"),
    ("/personas", "List personas"),
    ("/quit", "Exit"),
    ("/select", "Switch persona"),
    ("/voice", "Toggle voice dictation"),
];

/// Commands whose argument is a persona id.
pub const PERSONA_COMMANDS: &[&str] = &["/select", "/edit", "/delete", "/clear", "/history"];

/// Persona ids and names offered for completion.
///
/// Cloned into the line editor; the REPL refreshes it whenever the persona
/// collection changes.
#[derive(Clone, Default)]
pub struct PersonaCatalog {
    entries: Arc<Mutex<Vec<(String, String)>>>,
}

impl PersonaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, personas: &[Persona]) {
        let entries = personas
            .iter()
            .map(|p| (p.id.clone(), p.name.clone()))
            .collect();
        if let Ok(mut guard) = self.entries.lock() {
            *guard = entries;
        }
    }

    fn entries(&self) -> Vec<(String, String)> {
        self.entries
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

/// Completer for slash commands and persona ids.
#[derive(Clone, Default)]
pub struct PersonaCompleter {
    pub catalog: PersonaCatalog,
    /// Whether `/voice` is offered.
    pub voice: bool,
}

impl PersonaCompleter {
    pub fn new(catalog: PersonaCatalog, voice: bool) -> Self {
        Self { catalog, voice }
    }

    fn command_visible(&self, cmd: &str) -> bool {
        self.voice || cmd != "/voice"
    }
}

impl Completer for PersonaCompleter {
    fn complete(&mut self, line: &str, pos: usize) -> Vec<Suggestion> {
        if pos > line.len() {
            return Vec::new();
        }

        let input = &line[..pos];

        if input.is_empty() || !input.starts_with('/') {
            return Vec::new();
        }

        // Command completion (no space yet)
        if !input.contains(' ') {
            let prefix = input.to_lowercase();
            return COMMANDS
                .iter()
                .filter(|(cmd, _)| cmd.starts_with(&prefix) && self.command_visible(cmd))
                .map(|(cmd, desc)| Suggestion {
                    value: cmd.to_string(),
                    description: Some(desc.to_string()),
                    style: None,
                    extra: None,
                    span: Span::new(0, pos),
                    append_whitespace: true,
                })
                .collect();
        }

        let Some(space) = input.find(' ') else {
            return Vec::new();
        };
        let cmd = &input[..space];
        if !PERSONA_COMMANDS.contains(&cmd) {
            return Vec::new();
        }

        let arg_start = space + 1;
        let prefix = input[arg_start..].trim_start().to_lowercase();
        let start = pos - input[arg_start..].trim_start().len();

        self.catalog
            .entries()
            .into_iter()
            .filter(|(id, name)| {
                id.to_lowercase().starts_with(&prefix) || name.to_lowercase().starts_with(&prefix)
            })
            .map(|(id, name)| Suggestion {
                value: id,
                description: Some(name),
                style: None,
                extra: None,
                span: Span::new(start, pos),
                append_whitespace: false,
            })
            .collect()
    }
}

/// Build the line editor.
///
/// Enter submits; Alt-Enter and Shift-Enter insert a newline so messages
/// can span several lines.
pub fn create_reedline(completer: PersonaCompleter) -> Reedline {
    let completion_menu = Box::new(
        ColumnarMenu::default()
            .with_name("completion_menu")
            .with_columns(1)
            .with_column_padding(2)
            .with_text_style(Style::new().fg(Color::Default))
            .with_selected_text_style(Style::new().fg(Color::Black).on(Color::Cyan))
            .with_description_text_style(Style::new().fg(Color::DarkGray)),
    );

    let mut keybindings = reedline::default_emacs_keybindings();

    keybindings.add_binding(
        KeyModifiers::NONE,
        KeyCode::Tab,
        ReedlineEvent::UntilFound(vec![
            ReedlineEvent::Menu("completion_menu".to_string()),
            ReedlineEvent::MenuNext,
        ]),
    );
    keybindings.add_binding(
        KeyModifiers::SHIFT,
        KeyCode::BackTab,
        ReedlineEvent::MenuPrevious,
    );

    for modifier in [KeyModifiers::ALT, KeyModifiers::SHIFT] {
        keybindings.add_binding(
            modifier,
            KeyCode::Enter,
            ReedlineEvent::Edit(vec![EditCommand::InsertNewline]),
        );
    }

    let mut editor = Reedline::create()
        .with_completer(Box::new(completer))
        .with_menu(ReedlineMenu::EngineCompleter(completion_menu))
        .with_quick_completions(true)
        .with_partial_completions(true)
        .with_highlighter(Box::new(PersonaHighlighter))
        .with_edit_mode(Box::new(Emacs::new(keybindings)));

    let dirs = XdgDirs::new();
    if let Err(e) = dirs.ensure_dirs() {
        warn!(error = %e, "Could not create data directories");
    }
    match FileBackedHistory::with_file(HISTORY_CAPACITY, dirs.history_file()) {
        Ok(history) => editor = editor.with_history(Box::new(history)),
        Err(e) => warn!(error = %e, "Line history unavailable"),
    }

    editor
}

// ============================================================================
// Dialoguer-based pickers
// ============================================================================

/// Show persona picker using dialoguer FuzzySelect
pub fn pick_persona(personas: &[Persona], active_id: Option<&str>) -> Option<String> {
    use dialoguer::{theme::ColorfulTheme, FuzzySelect};

    if personas.is_empty() {
        return None;
    }

    let items: Vec<String> = personas
        .iter()
        .map(|p| format!("{:<20} {}", p.name, p.profession))
        .collect();
    let default = active_id
        .and_then(|id| personas.iter().position(|p| p.id == id))
        .unwrap_or(0);

    FuzzySelect::with_theme(&ColorfulTheme::default())
        .with_prompt("Persona")
        .items(&items)
        .default(default)
        .max_length(8)
        .interact_opt()
        .ok()
        .flatten()
        .map(|idx| personas[idx].id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::personas::builtin_personas;

    fn completer() -> PersonaCompleter {
        let catalog = PersonaCatalog::new();
        catalog.set(&builtin_personas());
        PersonaCompleter::new(catalog, false)
    }

    fn values(suggestions: &[Suggestion]) -> Vec<&str> {
        suggestions.iter().map(|s| s.value.as_str()).collect()
    }

    // =========================================================================
    // Command completion
    // =========================================================================

    #[test]
    fn test_complete_command_prefix() {
        let mut c = completer();
        let suggestions = c.complete("/pe", 3);
        assert_eq!(values(&suggestions), vec!["/personas"]);
        assert_eq!(suggestions[0].span, Span::new(0, 3));
        assert!(suggestions[0].append_whitespace);
    }

    #[test]
    fn test_complete_all_commands_on_slash() {
        let mut c = completer();
        let suggestions = c.complete("/", 1);
        assert_eq!(suggestions.len(), COMMANDS.len() - 1);
    }

    #[test]
    fn test_voice_hidden_without_recognizer() {
        let mut c = completer();
        assert!(c.complete("/vo", 3).is_empty());

        c.voice = true;
        assert_eq!(values(&c.complete("/vo", 3)), vec!["/voice"]);
    }

    #[test]
    fn test_plain_text_not_completed() {
        let mut c = completer();
        assert!(c.complete("hello", 5).is_empty());
        assert!(c.complete("", 0).is_empty());
    }

    #[test]
    fn test_pos_past_end() {
        let mut c = completer();
        assert!(c.complete("/he", 10).is_empty());
    }

    // =========================================================================
    // Persona completion
    // =========================================================================

    #[test]
    fn test_complete_persona_id() {
        let mut c = completer();
        let line = "/select za";
        let suggestions = c.complete(line, line.len());
        assert_eq!(values(&suggestions), vec!["zara-ceo"]);
        assert_eq!(suggestions[0].span, Span::new(8, line.len()));
    }

    #[test]
    fn test_complete_persona_by_name() {
        let mut c = completer();
        let line = "/edit son";
        assert_eq!(values(&c.complete(line, line.len())), vec!["sonia-trainer"]);
    }

    #[test]
    fn test_complete_persona_empty_argument() {
        let mut c = completer();
        let line = "/delete ";
        assert_eq!(c.complete(line, line.len()).len(), 4);
    }

    #[test]
    fn test_no_argument_completion_for_other_commands() {
        let mut c = completer();
        let line = "/model ge";
        assert!(c.complete(line, line.len()).is_empty());
    }

    #[test]
    fn test_catalog_refresh_is_shared() {
        let catalog = PersonaCatalog::new();
        let mut c = PersonaCompleter::new(catalog.clone(), false);
        assert!(c.complete("/select ", 8).is_empty());

        catalog.set(&builtin_personas()[..1]);
        assert_eq!(c.complete("/select ", 8).len(), 1);
    }

    #[test]
    fn test_persona_commands_are_commands() {
        for cmd in PERSONA_COMMANDS {
            assert!(COMMANDS.iter().any(|(c, _)| c == cmd), "{cmd} missing");
        }
    }
}
