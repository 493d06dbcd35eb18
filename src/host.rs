//! A roster and presence source backed by a JSON state file.
//!
//! Whatever drives the game client (a plugin, a memory reader, a test
//! script) writes its view of the world to one file; [`FileHost`] re-reads
//! it at the start of every watcher tick.
//!
//! ```json
//! {
//!   "logged_in": true,
//!   "cross_realm": true,
//!   "presence": 17,
//!   "members": [{ "name": "Alice", "level": 90, "job_id": 19 }],
//!   "duty_pop": { "id": 4, "name": "Sastasha" }
//! }
//! ```
//!
//! `duty_pop.id` must change for every pop; a missing `name` means a roulette.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::logging::Cooldown;
use crate::presence::{PresenceError, PresenceSource};
use crate::roster::{RawMember, RosterSource, STATUS_LOG_COOLDOWN};

pub const HOST_FILE: &str = "host.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostState {
    pub logged_in: bool,
    pub cross_realm: bool,
    pub presence: Option<u16>,
    pub members: Vec<HostMember>,
    pub duty_pop: Option<DutyPop>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostMember {
    pub name: String,
    #[serde(default)]
    pub level: u32,
    #[serde(default)]
    pub job_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DutyPop {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug)]
pub enum HostError {
    Io(std::io::Error),
    Json(String),
}

impl std::fmt::Display for HostError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostError::Io(e) => write!(f, "io error: {e}"),
            HostError::Json(e) => write!(f, "invalid host file: {e}"),
        }
    }
}

impl std::error::Error for HostError {}

impl From<std::io::Error> for HostError {
    fn from(e: std::io::Error) -> Self {
        HostError::Io(e)
    }
}

pub fn read_host_state(path: &Path) -> Result<HostState, HostError> {
    let data = std::fs::read_to_string(path)?;
    serde_json::from_str(&data).map_err(|e| HostError::Json(e.to_string()))
}

struct HostInner {
    state: HostState,
    last_duty_id: Option<u64>,
    pending_duty: Option<DutyPop>,
    seen_first: bool,
    read_error_log: Cooldown,
}

pub struct FileHost {
    path: PathBuf,
    inner: Mutex<HostInner>,
}

impl FileHost {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            inner: Mutex::new(HostInner {
                state: HostState::default(),
                last_duty_id: None,
                pending_duty: None,
                seen_first: false,
                read_error_log: Cooldown::new(STATUS_LOG_COOLDOWN),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> HostState {
        self.lock().state.clone()
    }

    /// Re-read the file. On failure the host reports "not logged in" until
    /// the file is readable again.
    pub fn reload(&self) {
        let read = read_host_state(&self.path);
        let mut inner = self.lock();
        match read {
            Ok(state) => {
                inner.read_error_log.reset();
                let duty_id = state.duty_pop.as_ref().map(|pop| pop.id);
                if inner.seen_first && duty_id.is_some() && duty_id != inner.last_duty_id {
                    inner.pending_duty = state.duty_pop.clone();
                }
                inner.last_duty_id = duty_id;
                inner.seen_first = true;
                inner.state = state;
            }
            Err(e) => {
                if inner.read_error_log.ready() {
                    crate::plog!("host: cannot read {}: {}", self.path.display(), e);
                }
                inner.state = HostState::default();
            }
        }
    }

    /// The duty pop seen since the last call, if any. The pop present in the
    /// first successful read is treated as already handled.
    pub fn take_duty_pop(&self) -> Option<DutyPop> {
        self.lock().pending_duty.take()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HostInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RosterSource for FileHost {
    fn refresh(&self) {
        self.reload();
    }

    fn is_logged_in(&self) -> bool {
        self.lock().state.logged_in
    }

    fn is_in_trackable_party(&self) -> bool {
        self.lock().state.cross_realm
    }

    fn member_count(&self) -> usize {
        self.lock().state.members.len()
    }

    fn member_at(&self, index: usize) -> Option<RawMember> {
        self.lock().state.members.get(index).map(|m| RawMember {
            name: m.name.clone(),
            level: m.level,
            job_id: m.job_id,
        })
    }
}

impl PresenceSource for FileHost {
    fn presence_status_code(&self) -> Result<u16, PresenceError> {
        let inner = self.lock();
        if !inner.state.logged_in {
            return Err(PresenceError::NotLoggedIn);
        }
        inner
            .state
            .presence
            .ok_or_else(|| PresenceError::Unavailable("no presence in host file".into()))
    }
}
