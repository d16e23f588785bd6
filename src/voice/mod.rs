//! Voice dictation for the composer.
//!
//! A [`SpeechRecognizer`] turns speech into final transcript text while
//! listening. The REPL only offers `/voice` when the configured recognizer
//! reports support.

use thiserror::Error;

mod command;

pub use command::CommandRecognizer;

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("Voice input is not available")]
    Unsupported,
    #[error("Failed to start speech recognizer: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Speech-to-text capability.
pub trait SpeechRecognizer: Send {
    fn is_supported(&self) -> bool;

    fn is_listening(&self) -> bool;

    /// Begin listening. Discards any transcript not yet polled.
    ///
    /// Does nothing if already listening.
    fn start(&mut self) -> Result<(), VoiceError>;

    /// Stop listening. Text recognized so far stays available.
    fn stop(&mut self);

    /// Take the text recognized since the last poll.
    fn poll_transcript(&mut self) -> Option<String>;
}

/// Recognizer used when no speech-to-text backend is configured.
#[derive(Debug, Default)]
pub struct Unsupported;

impl SpeechRecognizer for Unsupported {
    fn is_supported(&self) -> bool {
        false
    }

    fn is_listening(&self) -> bool {
        false
    }

    fn start(&mut self) -> Result<(), VoiceError> {
        Err(VoiceError::Unsupported)
    }

    fn stop(&mut self) {}

    fn poll_transcript(&mut self) -> Option<String> {
        None
    }
}

/// Pick the recognizer for an optional `voice_command` setting.
pub fn recognizer_for(command: Option<String>) -> Box<dyn SpeechRecognizer> {
    match command {
        Some(command) => Box::new(CommandRecognizer::new(command)),
        None => Box::new(Unsupported),
    }
}

/// Add dictated text to the composer input, separated by one space.
pub fn append_dictation(input: &str, transcript: &str) -> String {
    if input.is_empty() {
        transcript.to_string()
    } else {
        format!("{input} {transcript}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_dictation() {
        assert_eq!(append_dictation("", "namaste"), "namaste");
        assert_eq!(append_dictation("hello", "ji"), "hello ji");
        assert_eq!(append_dictation("hello ", "ji"), "hello  ji");
    }

    #[test]
    fn test_unsupported() {
        let mut recognizer = Unsupported;
        assert!(!recognizer.is_supported());
        assert!(matches!(recognizer.start(), Err(VoiceError::Unsupported)));
        assert!(!recognizer.is_listening());
        assert_eq!(recognizer.poll_transcript(), None);
    }

    #[test]
    fn test_recognizer_for() {
        assert!(!recognizer_for(None).is_supported());
        assert!(recognizer_for(Some("whisper-stream".into())).is_supported());
    }
}
