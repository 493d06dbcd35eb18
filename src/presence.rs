//! Away-from-keyboard gate for outgoing notifications.

use std::sync::Arc;

use crate::config::SharedSettings;

/// Online status codes that count as away: 17 is AFK, 18 is idle camera
/// (which also covers group pose).
pub const AWAY_STATUS_CODES: &[u16] = &[17, 18];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceError {
    NotLoggedIn,
    Unavailable(String),
}

impl std::fmt::Display for PresenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PresenceError::NotLoggedIn => write!(f, "client is not logged in"),
            PresenceError::Unavailable(e) => write!(f, "presence unavailable: {e}"),
        }
    }
}

impl std::error::Error for PresenceError {}

/// Reports the local player's online status code.
pub trait PresenceSource: Send + Sync {
    fn presence_status_code(&self) -> Result<u16, PresenceError>;
}

impl<F> PresenceSource for F
where
    F: Fn() -> Result<u16, PresenceError> + Send + Sync,
{
    fn presence_status_code(&self) -> Result<u16, PresenceError> {
        self()
    }
}

/// Decides whether a notification may fire right now.
#[derive(Clone)]
pub struct AfkGate {
    settings: SharedSettings,
    presence: Arc<dyn PresenceSource>,
}

impl AfkGate {
    pub fn new(settings: SharedSettings, presence: Arc<dyn PresenceSource>) -> Self {
        Self { settings, presence }
    }

    /// True when `ignore_afk_status` is set or the player is marked away.
    /// Any failure reading presence closes the gate.
    pub fn allows(&self) -> bool {
        if self.settings.snapshot().ignore_afk_status {
            return true;
        }
        match self.presence.presence_status_code() {
            Ok(code) => AWAY_STATUS_CODES.contains(&code),
            Err(e) => {
                crate::plog!("afk: {e}; treating client as present");
                false
            }
        }
    }
}
