//! PersonaPrompt and PersonaHighlighter for Reedline.

use nu_ansi_term::{Color, Style};
use reedline::{
    Highlighter, Prompt, PromptEditMode, PromptHistorySearch, PromptHistorySearchStatus, StyledText,
};
use std::borrow::Cow;

use super::completion::COMMANDS;

/// Prompt naming the active persona and model.
pub struct PersonaPrompt {
    pub persona_name: Option<String>,
    pub model_name: String,
    /// Voice dictation is running.
    pub listening: bool,
}

impl PersonaPrompt {
    pub fn new(persona: Option<&str>, model: &str) -> Self {
        Self {
            persona_name: persona.map(str::to_string),
            model_name: model.to_string(),
            listening: false,
        }
    }

    pub fn with_listening(mut self, listening: bool) -> Self {
        self.listening = listening;
        self
    }
}

impl Prompt for PersonaPrompt {
    fn render_prompt_left(&self) -> Cow<'_, str> {
        let persona = self.persona_name.as_deref().unwrap_or("no persona");
        if self.listening {
            Cow::Owned(format!(
                "\x1b[1;33m{}\x1b[0m \x1b[2m[{}]\x1b[0m \x1b[31m● rec\x1b[0m",
                persona, self.model_name
            ))
        } else {
            Cow::Owned(format!(
                "\x1b[1;33m{}\x1b[0m \x1b[2m[{}]\x1b[0m",
                persona, self.model_name
            ))
        }
    }

    fn render_prompt_right(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _mode: PromptEditMode) -> Cow<'_, str> {
        Cow::Borrowed(" › ")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<'_, str> {
        Cow::Borrowed("... ")
    }

    fn render_prompt_history_search_indicator(&self, hs: PromptHistorySearch) -> Cow<'_, str> {
        let prefix = match hs.status {
            PromptHistorySearchStatus::Passing => "",
            PromptHistorySearchStatus::Failing => "failing ",
        };
        Cow::Owned(format!("({}search: {}) ", prefix, hs.term))
    }
}

/// Syntax highlighter for slash commands
#[derive(Clone)]
pub struct PersonaHighlighter;

impl Highlighter for PersonaHighlighter {
    fn highlight(&self, line: &str, _cursor: usize) -> StyledText {
        let mut styled = StyledText::new();

        if line.starts_with('/') {
            let cmd_end = line.find(char::is_whitespace).unwrap_or(line.len());
            let cmd = &line[..cmd_end];
            let is_valid = COMMANDS.iter().any(|(c, _)| *c == cmd);

            if is_valid {
                styled.push((Style::new().fg(Color::Cyan).bold(), cmd.to_string()));
            } else {
                styled.push((Style::new().fg(Color::Yellow), cmd.to_string()));
            }

            if cmd_end < line.len() {
                styled.push((Style::default(), line[cmd_end..].to_string()));
            }
        } else {
            styled.push((Style::default(), line.to_string()));
        }

        styled
    }
}
