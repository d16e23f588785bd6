//! Configuration management.

mod settings;
mod xdg;

pub use settings::{api_key_from_env, Settings, SettingsError, API_KEY_ENV_VARS, API_KEY_NAME};
pub use xdg::XdgDirs;
