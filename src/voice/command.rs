//! Speech recognition through an external command.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::{SpeechRecognizer, VoiceError};

/// Runs a shell command that prints one recognized phrase per line.
///
/// Each non-blank stdout line is a final transcript fragment. The command
/// runs until [`stop`](SpeechRecognizer::stop) or until it exits on its own.
pub struct CommandRecognizer {
    command: String,
    child: Option<Child>,
    transcript: Arc<Mutex<String>>,
    listening: Arc<AtomicBool>,
}

impl CommandRecognizer {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            child: None,
            transcript: Arc::new(Mutex::new(String::new())),
            listening: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl SpeechRecognizer for CommandRecognizer {
    fn is_supported(&self) -> bool {
        true
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    fn start(&mut self) -> Result<(), VoiceError> {
        if self.is_listening() {
            return Ok(());
        }
        if let Ok(mut transcript) = self.transcript.lock() {
            transcript.clear();
        }

        let (shell, shell_arg) = if cfg!(windows) { ("cmd", "/C") } else { ("sh", "-c") };
        let mut child = Command::new(shell)
            .arg(shell_arg)
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let Some(stdout) = child.stdout.take() else {
            return Err(VoiceError::Spawn(std::io::Error::other("no stdout")));
        };
        debug!(command = %self.command, "Speech recognizer started");
        self.listening.store(true, Ordering::SeqCst);

        let transcript = Arc::clone(&self.transcript);
        let listening = Arc::clone(&self.listening);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if let Ok(mut transcript) = transcript.lock() {
                            if !transcript.is_empty() {
                                transcript.push(' ');
                            }
                            transcript.push_str(line);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "Speech recognizer output unreadable");
                        break;
                    }
                }
            }
            listening.store(false, Ordering::SeqCst);
        });

        self.child = Some(child);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                debug!(error = %e, "Speech recognizer already exited");
            }
        }
        self.listening.store(false, Ordering::SeqCst);
    }

    fn poll_transcript(&mut self) -> Option<String> {
        let mut transcript = self.transcript.lock().ok()?;
        if transcript.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut *transcript))
        }
    }
}

impl Drop for CommandRecognizer {
    fn drop(&mut self) {
        self.stop();
    }
}
