//! Terminal renderer for conversation events.

use super::{AppEvent, MessageLevel, TypingIndicator};
use crate::conversation::{Message, Role};
use crate::personas::Persona;
use crossterm::{
    style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor},
    ExecutableCommand,
};
use std::io::{stdout, IsTerminal, Write};

/// Render style configuration.
#[derive(Debug, Clone)]
pub struct RenderStyle {
    pub info_color: Color,
    pub success_color: Color,
    pub warning_color: Color,
    pub error_color: Color,
    pub persona_color: Color,
    pub user_color: Color,
    pub timestamp_color: Color,
}

impl Default for RenderStyle {
    fn default() -> Self {
        Self {
            info_color: Color::White,
            success_color: Color::Green,
            warning_color: Color::Yellow,
            error_color: Color::Red,
            persona_color: Color::Magenta,
            user_color: Color::Cyan,
            timestamp_color: Color::DarkGrey,
        }
    }
}

struct ActiveView {
    persona_id: String,
    label: String,
}

/// Renders the active persona's conversation events to a terminal.
///
/// Events for other personas are ignored so a background stream never
/// writes over the conversation being viewed.
pub struct TerminalRenderer {
    style: RenderStyle,
    out: Box<dyn Write + Send>,
    animate: bool,
    active: Option<ActiveView>,
    typing: Option<TypingIndicator>,
    /// Model message whose header is already printed.
    streaming: Option<String>,
    /// Timestamp of the placeholder awaiting its first chunk.
    pending_timestamp: Option<String>,
}

impl TerminalRenderer {
    /// Create a renderer writing to stdout.
    pub fn new() -> Self {
        Self {
            style: RenderStyle::default(),
            out: Box::new(stdout()),
            animate: stdout().is_terminal(),
            active: None,
            typing: None,
            streaming: None,
            pending_timestamp: None,
        }
    }

    /// Create a renderer writing to `out`, without the typing animation.
    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            animate: false,
            out,
            ..Self::new()
        }
    }

    /// Follow `persona`'s conversation from now on.
    pub fn set_active(&mut self, persona: Option<&Persona>) {
        self.stop_typing();
        self.streaming = None;
        self.pending_timestamp = None;
        self.active = persona.map(|p| ActiveView {
            persona_id: p.id.clone(),
            label: p.name.clone(),
        });
    }

    /// Whether a reply is currently being printed or awaited.
    pub fn is_streaming(&self) -> bool {
        self.streaming.is_some() || self.pending_timestamp.is_some()
    }

    /// Render one event.
    pub fn handle(&mut self, event: &AppEvent) -> std::io::Result<()> {
        match event {
            AppEvent::Notice { level, text } => return self.render_notice(*level, text),
            AppEvent::ErrorChanged { message: Some(text) } => {
                self.stop_typing();
                return self.render_notice(MessageLevel::Error, text);
            }
            _ => {}
        }

        let is_active = match (&self.active, event.persona_id()) {
            (Some(view), Some(id)) => view.persona_id == id,
            _ => false,
        };
        if !is_active {
            return Ok(());
        }

        match event {
            AppEvent::MessageAppended { message, .. } => {
                if message.role == Role::Model && message.text.is_empty() {
                    self.pending_timestamp = Some(message.timestamp.clone());
                    self.start_typing();
                }
            }
            AppEvent::ChunkAppended {
                message_id, text, ..
            } => {
                self.begin_reply(message_id)?;
                self.out.execute(Print(text))?;
                self.out.flush()?;
            }
            AppEvent::MessageFinalized {
                message_id, text, ..
            } => {
                if self.streaming.as_deref() != Some(message_id.as_str()) {
                    // Completed without any chunk.
                    self.begin_reply(message_id)?;
                    self.out.execute(Print(text))?;
                }
                self.out.execute(Print("\n\n"))?;
                self.streaming = None;
            }
            AppEvent::MessageRemoved { message_id, .. } => {
                self.stop_typing();
                if self.streaming.as_deref() == Some(message_id.as_str()) {
                    self.out.execute(Print("\n"))?;
                }
                self.streaming = None;
                self.pending_timestamp = None;
            }
            AppEvent::TranscriptReset { .. } => {
                self.stop_typing();
                if self.streaming.take().is_some() {
                    self.out.execute(Print("\n"))?;
                }
                self.pending_timestamp = None;
            }
            AppEvent::LoadingChanged { loading: false, .. } => {
                self.stop_typing();
                self.pending_timestamp = None;
                if self.streaming.take().is_some() {
                    self.out.execute(Print("\n"))?;
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Print a whole transcript, oldest first.
    pub fn render_transcript(&mut self, persona: &Persona, messages: &[Message]) -> std::io::Result<()> {
        if messages.is_empty() {
            return self.render_notice(
                MessageLevel::Info,
                &format!("No messages with {} yet.", persona.name),
            );
        }

        for message in messages {
            let (label, color) = match message.role {
                Role::User => ("You", self.style.user_color),
                Role::Model => (persona.name.as_str(), self.style.persona_color),
            };
            self.render_header(label, color, &message.timestamp)?;
            self.out
                .execute(Print(message.text.trim_end()))?
                .execute(Print("\n\n"))?;
        }
        self.out.flush()
    }

    /// Print the persona list, marking the active one.
    pub fn render_personas(&mut self, personas: &[Persona], active_id: Option<&str>) -> std::io::Result<()> {
        if personas.is_empty() {
            return self.render_notice(MessageLevel::Info, "No personas. Create one with /new.");
        }

        for persona in personas {
            let marker = if Some(persona.id.as_str()) == active_id {
                "●"
            } else {
                " "
            };
            let badge = if persona.has_avatar() {
                "▣".to_string()
            } else {
                persona.initials()
            };

            self.out
                .execute(SetForegroundColor(self.style.persona_color))?
                .execute(Print(format!("{marker} [{badge:>2}] ")))?
                .execute(SetAttribute(Attribute::Bold))?
                .execute(Print(&persona.name))?
                .execute(SetAttribute(Attribute::Reset))?
                .execute(ResetColor)?
                .execute(Print(format!(" - {}", persona.profession)))?
                .execute(SetForegroundColor(self.style.timestamp_color))?
                .execute(Print(format!("  ({})\n", persona.id)))?
                .execute(ResetColor)?;
        }
        self.out.flush()
    }

    /// Print the command list with a trailing hint.
    pub fn render_help(&mut self, commands: &[(&str, &str)], hint: &str) -> std::io::Result<()> {
        self.out
            .execute(SetAttribute(Attribute::Bold))?
            .execute(Print("\nCommands\n"))?
            .execute(SetAttribute(Attribute::Reset))?;

        for (cmd, desc) in commands {
            self.out
                .execute(SetForegroundColor(self.style.user_color))?
                .execute(SetAttribute(Attribute::Bold))?
                .execute(Print(format!("  {cmd:<10} ")))?
                .execute(SetAttribute(Attribute::Reset))?
                .execute(SetForegroundColor(self.style.timestamp_color))?
                .execute(Print(format!("{desc}\n")))?
                .execute(ResetColor)?;
        }

        self.out
            .execute(SetForegroundColor(self.style.timestamp_color))?
            .execute(Print(format!("\n  {hint}\n\n")))?
            .execute(ResetColor)?;
        self.out.flush()
    }

    /// Print a status line.
    pub fn render_notice(&mut self, level: MessageLevel, text: &str) -> std::io::Result<()> {
        let color = match level {
            MessageLevel::Info => self.style.info_color,
            MessageLevel::Success => self.style.success_color,
            MessageLevel::Warning => self.style.warning_color,
            MessageLevel::Error => self.style.error_color,
        };

        let prefix = match level {
            MessageLevel::Success => "✓ ",
            MessageLevel::Warning => "⚠ ",
            MessageLevel::Error => "✗ ",
            MessageLevel::Info => "",
        };

        self.out
            .execute(SetForegroundColor(color))?
            .execute(Print(prefix))?
            .execute(Print(text))?
            .execute(Print("\n"))?
            .execute(ResetColor)?;
        self.out.flush()
    }

    fn begin_reply(&mut self, message_id: &str) -> std::io::Result<()> {
        if self.streaming.as_deref() == Some(message_id) {
            return Ok(());
        }

        self.stop_typing();
        let timestamp = self.pending_timestamp.take().unwrap_or_default();
        let label = self
            .active
            .as_ref()
            .map(|v| v.label.clone())
            .unwrap_or_default();
        self.render_header(&label, self.style.persona_color, &timestamp)?;
        self.streaming = Some(message_id.to_string());
        Ok(())
    }

    fn render_header(&mut self, label: &str, color: Color, timestamp: &str) -> std::io::Result<()> {
        self.out
            .execute(SetForegroundColor(color))?
            .execute(SetAttribute(Attribute::Bold))?
            .execute(Print(label))?
            .execute(SetAttribute(Attribute::Reset))?
            .execute(SetForegroundColor(self.style.timestamp_color))?
            .execute(Print(format!("  {timestamp}\n")))?
            .execute(ResetColor)?;
        Ok(())
    }

    fn start_typing(&mut self) {
        if !self.animate || self.typing.is_some() {
            return;
        }
        if let Some(view) = &self.active {
            self.typing = Some(TypingIndicator::start(&view.label));
        }
    }

    fn stop_typing(&mut self) {
        if let Some(typing) = self.typing.take() {
            typing.stop();
        }
    }
}

impl Default for TerminalRenderer {
    fn default() -> Self {
        Self::new()
    }
}
