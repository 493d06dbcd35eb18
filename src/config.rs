//! Persisted user settings.
//!
//! Credentials and switches live in `{data_dir}/settings.toml`. The running
//! service holds them in a [`SharedSettings`] handle and re-reads it on every
//! routing decision, so edits take effect without a restart.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

pub const SETTINGS_VERSION: u32 = 1;

/// User-editable settings stored in `{data_dir}/settings.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub version: u32,

    /// Token identifying this user to the relay service.
    pub discord_user_token: String,
    /// Shared secret used to sign relay requests.
    pub user_secret_key: String,
    pub enable_discord_bot: bool,

    pub telegram_bot_token: String,
    pub telegram_chat_id: String,
    pub enable_telegram_bot: bool,

    pub enable_for_duty_pops: bool,
    /// Notify even when the player is not marked away.
    pub ignore_afk_status: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            discord_user_token: String::new(),
            user_secret_key: String::new(),
            enable_discord_bot: false,
            telegram_bot_token: String::new(),
            telegram_chat_id: String::new(),
            enable_telegram_bot: false,
            enable_for_duty_pops: true,
            ignore_afk_status: false,
        }
    }
}

impl Settings {
    /// Relay credentials are present and the relay is switched on.
    pub fn relay_ready(&self) -> bool {
        self.enable_discord_bot
            && !self.discord_user_token.trim().is_empty()
            && !self.user_secret_key.trim().is_empty()
    }

    pub fn telegram_ready(&self) -> bool {
        self.enable_telegram_bot
            && !self.telegram_bot_token.trim().is_empty()
            && !self.telegram_chat_id.trim().is_empty()
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Toml(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "io error: {e}"),
            ConfigError::Toml(e) => write!(f, "settings error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

pub fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join("settings.toml")
}

/// Load settings, returning defaults if the file doesn't exist.
pub fn load_settings(data_dir: &Path) -> Result<Settings, ConfigError> {
    let path = settings_path(data_dir);
    if !path.exists() {
        return Ok(Settings::default());
    }
    let contents = fs::read_to_string(&path)?;
    toml::from_str(&contents).map_err(|e| ConfigError::Toml(e.to_string()))
}

pub fn save_settings(data_dir: &Path, settings: &Settings) -> Result<(), ConfigError> {
    fs::create_dir_all(data_dir)?;
    let contents =
        toml::to_string_pretty(settings).map_err(|e| ConfigError::Toml(e.to_string()))?;
    fs::write(settings_path(data_dir), contents)?;
    Ok(())
}

/// Cloneable handle to the live settings.
#[derive(Debug, Clone, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<Settings>>,
}

impl SharedSettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Copy of the current settings.
    pub fn snapshot(&self) -> Settings {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut Settings),
    {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }
}
