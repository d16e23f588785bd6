//! Animated "is typing" line shown until the first chunk of a reply arrives.

use crossterm::{
    cursor::{Hide, MoveToColumn, Show},
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType},
    ExecutableCommand,
};
use std::io::{stdout, Write};
use std::time::Duration;
use tokio::sync::watch;

const FRAMES: &[&str] = &["   ", ".  ", ".. ", "..."];
const INTERVAL: Duration = Duration::from_millis(300);

/// Handle to a running typing indicator.
///
/// Stopping (or dropping) the handle erases the indicator line.
pub struct TypingIndicator {
    stop_tx: watch::Sender<bool>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TypingIndicator {
    /// Start animating `"{label} is typing"` on the current line.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(label: &str) -> Self {
        let message = format!("{label} is typing");
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut stdout = stdout();
            let _ = stdout.execute(Hide);

            for frame in FRAMES.iter().cycle() {
                if *stop_rx.borrow() {
                    break;
                }

                let _ = stdout.execute(MoveToColumn(0));
                let _ = stdout.execute(Clear(ClearType::CurrentLine));
                let _ = stdout.execute(SetForegroundColor(Color::DarkGrey));
                let _ = stdout.execute(Print(format!("{message}{frame}")));
                let _ = stdout.execute(ResetColor);
                let _ = stdout.flush();

                tokio::select! {
                    _ = tokio::time::sleep(INTERVAL) => {}
                    _ = stop_rx.changed() => break,
                }
            }
        });

        Self {
            stop_tx,
            task: Some(task),
        }
    }

    /// Stop the animation and erase its line.
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let mut stdout = stdout();
        let _ = stdout.execute(MoveToColumn(0));
        let _ = stdout.execute(Clear(ClearType::CurrentLine));
        let _ = stdout.execute(Show);
        let _ = stdout.flush();
    }
}

impl Drop for TypingIndicator {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.halt();
        }
    }
}
