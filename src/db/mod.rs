//! SQLite database for settings, API keys, and application state.

mod migrations;

use rusqlite::{Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use crate::config::XdgDirs;
use crate::storage::{KeyValueStore, StorageError};

/// Database connection wrapper.
///
/// The connection sits behind a mutex so the database can be shared as a
/// [`KeyValueStore`] between the persona store and the conversation manager.
pub struct Database {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl Database {
    /// Open the database at the default location.
    pub fn open() -> anyhow::Result<Self> {
        Self::open_at(Self::default_path())
    }

    /// Open the database at a specific path.
    pub fn open_at(path: PathBuf) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;

        // The database holds API keys.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
            {
                tracing::warn!("Failed to set database file permissions: {}", e);
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Open a throwaway in-memory database.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: PathBuf::from(":memory:"),
        })
    }

    /// Get the default database path.
    pub fn default_path() -> PathBuf {
        XdgDirs::new().data.join("pchat.db")
    }

    /// Run database migrations.
    pub fn migrate(&self) -> anyhow::Result<()> {
        migrations::run_migrations(&self.conn())?;
        Ok(())
    }

    /// Lock and return the connection.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get the database path.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    // =========================================================================
    // API Key Storage
    // =========================================================================

    /// Save an API key to the database.
    pub fn save_api_key(&self, name: &str, api_key: &str) -> Result<(), rusqlite::Error> {
        self.conn().execute(
            "INSERT INTO api_keys (name, api_key, updated_at) VALUES (?, ?, unixepoch())
             ON CONFLICT(name) DO UPDATE SET api_key = excluded.api_key, updated_at = excluded.updated_at",
            [name, api_key],
        )?;
        Ok(())
    }

    /// Get an API key from the database.
    pub fn get_api_key(&self, name: &str) -> Result<Option<String>, rusqlite::Error> {
        self.conn()
            .query_row("SELECT api_key FROM api_keys WHERE name = ?", [name], |row| {
                row.get(0)
            })
            .optional()
    }

    /// Check if an API key exists in the database.
    pub fn has_api_key(&self, name: &str) -> bool {
        self.get_api_key(name).ok().flatten().is_some()
    }

    /// Delete an API key.
    pub fn delete_api_key(&self, name: &str) -> Result<(), rusqlite::Error> {
        self.conn()
            .execute("DELETE FROM api_keys WHERE name = ?", [name])?;
        Ok(())
    }
}

impl KeyValueStore for Database {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value = self
            .conn()
            .query_row("SELECT value FROM kv_store WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?, ?, unixepoch())
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            [key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.conn().execute("DELETE FROM kv_store WHERE key = ?", [key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for Database struct.
    //!
    //! Coverage:
    //! - Database opening/creation
    //! - API key storage/retrieval/deletion
    //! - Key-value store backend

    use super::*;
    use tempfile::TempDir;

    fn setup_test_db() -> (TempDir, Database) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::open_at(db_path).unwrap();
        db.migrate().unwrap();
        (temp_dir, db)
    }

    // =========================================================================
    // Opening
    // =========================================================================

    #[test]
    fn test_open_at_creates_parent_directories() {
        let tmp = TempDir::new().unwrap();
        let nested_path = tmp.path().join("deep").join("nested").join("test.db");

        assert!(!nested_path.parent().unwrap().exists());
        let db = Database::open_at(nested_path.clone()).unwrap();
        assert!(nested_path.exists());
        assert_eq!(db.path(), &nested_path);
    }

    #[test]
    fn test_default_path_ends_with_db_file() {
        let path = Database::default_path();
        assert!(path.ends_with("persona-chat/pchat.db"));
    }

    #[test]
    fn test_open_in_memory_migrates() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db.set("k", "v").unwrap();
        assert_eq!(db.get("k").unwrap(), Some("v".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn test_database_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let (_tmp, db) = setup_test_db();
        let mode = std::fs::metadata(db.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    // =========================================================================
    // API keys
    // =========================================================================

    #[test]
    fn test_api_key_roundtrip() {
        let (_tmp, db) = setup_test_db();

        assert!(!db.has_api_key("GEMINI_API_KEY"));
        db.save_api_key("GEMINI_API_KEY", "secret").unwrap();
        assert_eq!(
            db.get_api_key("GEMINI_API_KEY").unwrap(),
            Some("secret".to_string())
        );

        db.save_api_key("GEMINI_API_KEY", "rotated").unwrap();
        assert_eq!(
            db.get_api_key("GEMINI_API_KEY").unwrap(),
            Some("rotated".to_string())
        );

        db.delete_api_key("GEMINI_API_KEY").unwrap();
        assert!(!db.has_api_key("GEMINI_API_KEY"));
    }

    #[test]
    fn test_delete_api_key_nonexistent_succeeds() {
        let (_tmp, db) = setup_test_db();
        db.delete_api_key("NEVER_EXISTED").unwrap();
    }

    // =========================================================================
    // Key-value store
    // =========================================================================

    #[test]
    fn test_kv_store_upsert_and_remove() {
        let (_tmp, db) = setup_test_db();

        assert_eq!(db.get("chat-personas").unwrap(), None);
        db.set("chat-personas", "[]").unwrap();
        db.set("chat-personas", "[1]").unwrap();
        assert_eq!(db.get("chat-personas").unwrap(), Some("[1]".to_string()));

        db.remove("chat-personas").unwrap();
        assert_eq!(db.get("chat-personas").unwrap(), None);
    }

    #[test]
    fn test_kv_store_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.db");

        {
            let db = Database::open_at(path.clone()).unwrap();
            db.migrate().unwrap();
            db.set("multi-chat-history", r#"{"p":[]}"#).unwrap();
        }

        let db = Database::open_at(path).unwrap();
        db.migrate().unwrap();
        assert_eq!(
            db.get("multi-chat-history").unwrap(),
            Some(r#"{"p":[]}"#.to_string())
        );
    }

    #[test]
    fn test_kv_store_without_migration_reports_error() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get("anything").is_err());
    }
}
