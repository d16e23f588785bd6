//! XDG Base Directory support.

use std::path::PathBuf;

const APP_DIR: &str = "persona-chat";

/// XDG directory paths for Persona Chat.
pub struct XdgDirs {
    /// Config directory (~/.config/persona-chat or XDG_CONFIG_HOME/persona-chat)
    pub config: PathBuf,
    /// Data directory (~/.local/share/persona-chat or XDG_DATA_HOME/persona-chat)
    pub data: PathBuf,
    /// State directory (~/.local/state/persona-chat or XDG_STATE_HOME/persona-chat)
    pub state: PathBuf,
}

impl XdgDirs {
    /// Get XDG directories, respecting environment variables.
    pub fn new() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));

        Self {
            config: std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| home.join(".config"))
                .join(APP_DIR),
            data: std::env::var("XDG_DATA_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| home.join(".local/share"))
                .join(APP_DIR),
            state: std::env::var("XDG_STATE_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| home.join(".local/state"))
                .join(APP_DIR),
        }
    }

    /// Ensure all directories exist.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [&self.config, &self.data, &self.state] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// REPL line history file.
    pub fn history_file(&self) -> PathBuf {
        self.state.join("history.txt")
    }
}

impl Default for XdgDirs {
    fn default() -> Self {
        Self::new()
    }
}
