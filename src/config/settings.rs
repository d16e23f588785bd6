//! Settings management via SQLite.

use crate::chat::gemini::{DEFAULT_API_BASE, DEFAULT_MODEL};
use crate::db::Database;
use rusqlite::OptionalExtension;
use thiserror::Error;

/// Environment variables checked for the Gemini credential, in order.
pub const API_KEY_ENV_VARS: &[&str] = &["GEMINI_API_KEY", "API_KEY"];

/// Name under which `/apikey` stores the credential.
pub const API_KEY_NAME: &str = "GEMINI_API_KEY";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Settings manager backed by SQLite.
pub struct Settings<'a> {
    db: &'a Database,
}

impl<'a> Settings<'a> {
    /// Create a new settings manager.
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Get a setting value.
    pub fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        let value = self
            .db
            .conn()
            .query_row("SELECT value FROM settings WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Get a setting value or return a default.
    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key)
            .ok()
            .flatten()
            .unwrap_or_else(|| default.to_string())
    }

    /// Set a setting value.
    pub fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        self.db.conn().execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, unixepoch())
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            [key, value],
        )?;
        Ok(())
    }

    /// Delete a setting.
    pub fn delete(&self, key: &str) -> Result<(), SettingsError> {
        self.db
            .conn()
            .execute("DELETE FROM settings WHERE key = ?", [key])?;
        Ok(())
    }

    /// List all settings.
    pub fn list(&self) -> Result<Vec<(String, String)>, SettingsError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut settings = Vec::new();
        for row in rows {
            settings.push(row?);
        }
        Ok(settings)
    }

    // Convenience accessors for common settings

    /// Gemini model name.
    pub fn model(&self) -> String {
        self.get_or("model", DEFAULT_MODEL)
    }

    /// Base URL of the Gemini REST API.
    pub fn api_base(&self) -> String {
        self.get_or("api_base", DEFAULT_API_BASE)
    }

    /// External speech-to-text command, if configured.
    pub fn voice_command(&self) -> Option<String> {
        self.get("voice_command")
            .ok()
            .flatten()
            .filter(|cmd| !cmd.trim().is_empty())
    }

    /// Persona that was active when the REPL last exited.
    pub fn last_persona(&self) -> Option<String> {
        self.get("last_persona").ok().flatten()
    }

    pub fn set_last_persona(&self, persona_id: Option<&str>) -> Result<(), SettingsError> {
        match persona_id {
            Some(id) => self.set("last_persona", id),
            None => self.delete("last_persona"),
        }
    }

    /// Resolve the Gemini API key.
    ///
    /// Environment variables win over the key stored with `/apikey`.
    pub fn api_key(&self) -> Option<String> {
        api_key_from_env().or_else(|| {
            self.db
                .get_api_key(API_KEY_NAME)
                .ok()
                .flatten()
                .filter(|key| !key.trim().is_empty())
        })
    }
}

/// First non-empty credential found in [`API_KEY_ENV_VARS`].
pub fn api_key_from_env() -> Option<String> {
    API_KEY_ENV_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    #[test]
    fn test_get_missing_returns_none() {
        let db = setup();
        let settings = Settings::new(&db);
        assert_eq!(settings.get("nope").unwrap(), None);
        assert_eq!(settings.get_or("nope", "fallback"), "fallback");
    }

    #[test]
    fn test_set_overwrites() {
        let db = setup();
        let settings = Settings::new(&db);

        settings.set("model", "gemini-a").unwrap();
        settings.set("model", "gemini-b").unwrap();
        assert_eq!(settings.model(), "gemini-b");
    }

    #[test]
    fn test_defaults() {
        let db = setup();
        let settings = Settings::new(&db);

        assert_eq!(settings.model(), DEFAULT_MODEL);
        assert_eq!(settings.api_base(), DEFAULT_API_BASE);
        assert_eq!(settings.voice_command(), None);
        assert_eq!(settings.last_persona(), None);
    }

    #[test]
    fn test_blank_voice_command_is_unset() {
        let db = setup();
        let settings = Settings::new(&db);

        settings.set("voice_command", "   ").unwrap();
        assert_eq!(settings.voice_command(), None);

        settings.set("voice_command", "whisper-stream").unwrap();
        assert_eq!(settings.voice_command(), Some("whisper-stream".to_string()));
    }

    #[test]
    fn test_last_persona_set_and_clear() {
        let db = setup();
        let settings = Settings::new(&db);

        settings.set_last_persona(Some("persona-1")).unwrap();
        assert_eq!(settings.last_persona(), Some("persona-1".to_string()));

        settings.set_last_persona(None).unwrap();
        assert_eq!(settings.last_persona(), None);
    }

    #[test]
    fn test_list_sorted_by_key() {
        let db = setup();
        let settings = Settings::new(&db);

        settings.set("zeta", "1").unwrap();
        settings.set("alpha", "2").unwrap();

        let all = settings.list().unwrap();
        assert_eq!(
            all,
            vec![
                ("alpha".to_string(), "2".to_string()),
                ("zeta".to_string(), "1".to_string())
            ]
        );
    }

    #[test]
    fn test_delete_setting() {
        let db = setup();
        let settings = Settings::new(&db);

        settings.set("api_base", "http://localhost:1234").unwrap();
        settings.delete("api_base").unwrap();
        assert_eq!(settings.api_base(), DEFAULT_API_BASE);
    }
}
