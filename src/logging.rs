//! Timestamped log lines with source locations and ANSI colour support.
//!
//! Provides the [`plog!`] macro for consistent log output in the format:
//!
//! ```text
//! 20260211T21:33:12.000 - src/roster.rs:42 - roster: Alice joined (2 member(s))
//! ```
//!
//! When writing to a terminal, timestamps and source locations are dimmed and
//! member and channel names get a stable colour derived from their text.
//!
//! Log lines go to stderr until [`set_writer`] installs another
//! [`std::io::Write`] destination (a file, or an in-memory buffer in tests).
//! Installing a custom writer also disables ANSI colour codes.

use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{LazyLock, Mutex};
use std::time::{Duration, Instant};

static COLOUR_ENABLED: AtomicBool = AtomicBool::new(false);

static LOG_WRITER: LazyLock<Mutex<Box<dyn Write + Send>>> =
    LazyLock::new(|| Mutex::new(Box::new(io::stderr())));

/// Initialize the logging system. Call once at startup before any logging.
/// Detects whether stderr supports ANSI colours.
pub fn init() {
    let is_terminal = std::io::stderr().is_terminal();
    COLOUR_ENABLED.store(is_terminal, Ordering::Relaxed);
}

/// Replace the log writer.  All subsequent [`plog!`] output goes to `w`.
pub fn set_writer(w: Box<dyn Write + Send>) {
    COLOUR_ENABLED.store(false, Ordering::Relaxed);
    *LOG_WRITER.lock().unwrap_or_else(|e| e.into_inner()) = w;
}

pub fn colour_enabled() -> bool {
    COLOUR_ENABLED.load(Ordering::Relaxed)
}

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";
const BOLD: &str = "\x1b[1m";

const NAME_COLOURS: &[&str] = &[
    "\x1b[91m", // bright red
    "\x1b[92m", // bright green
    "\x1b[93m", // bright yellow
    "\x1b[94m", // bright blue
    "\x1b[95m", // bright magenta
    "\x1b[96m", // bright cyan
    "\x1b[32m", // green
    "\x1b[34m", // blue
];

fn hash_colour(text: &str) -> &'static str {
    let hash: u32 = text
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    NAME_COLOURS[(hash as usize) % NAME_COLOURS.len()]
}

/// Format a roster member name with a consistent colour.
pub fn member(name: &str) -> String {
    if colour_enabled() {
        format!("{}{name}{RESET}", hash_colour(name))
    } else {
        name.to_string()
    }
}

/// Format a delivery channel name, bold on a terminal.
pub fn channel(name: &str) -> String {
    if colour_enabled() {
        format!("{BOLD}{name}{RESET}")
    } else {
        format!("[{name}]")
    }
}

/// Format the current UTC time as `YYYYMMDDTHH:MM:SS.mmm`.
pub fn format_timestamp() -> String {
    chrono::Utc::now()
        .format("%Y%m%dT%H:%M:%S%.3f")
        .to_string()
}

/// Write a single log line to the current writer.
///
/// Called by the [`plog!`] macro; not intended for direct use.
pub fn emit(file: &str, line: u32, msg: &str) {
    let ts = format_timestamp();
    let formatted = if colour_enabled() {
        format!("{DIM}{ts}{RESET} {DIM}{file}:{line}{RESET} {msg}")
    } else {
        format!("{ts} - {file}:{line} - {msg}")
    };
    let mut writer = LOG_WRITER.lock().unwrap_or_else(|e| e.into_inner());
    let _ = writeln!(*writer, "{formatted}");
}

/// Rate limiter for diagnostics that would otherwise repeat every tick.
///
/// `ready()` returns true at most once per `period`; the first call is always
/// ready.
#[derive(Debug, Clone)]
pub struct Cooldown {
    period: Duration,
    next_allowed: Option<Instant>,
}

impl Cooldown {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next_allowed: None,
        }
    }

    pub fn ready(&mut self) -> bool {
        self.ready_at(Instant::now())
    }

    pub fn ready_at(&mut self, now: Instant) -> bool {
        match self.next_allowed {
            Some(next) if now < next => false,
            _ => {
                self.next_allowed = Some(now + self.period);
                true
            }
        }
    }

    /// Forget the last emission so the next `ready()` fires immediately.
    pub fn reset(&mut self) {
        self.next_allowed = None;
    }
}

/// Emit a log line with timestamp and source location.
///
/// # Usage
///
/// ```ignore
/// plog!("roster: {} joined", logging::member(&name));
/// ```
#[macro_export]
macro_rules! plog {
    ($($arg:tt)*) => {{
        $crate::logging::emit(file!(), line!(), &format!($($arg)*));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_fires_once_per_period() {
        let mut cooldown = Cooldown::new(Duration::from_secs(30));
        let start = Instant::now();

        assert!(cooldown.ready_at(start));
        assert!(!cooldown.ready_at(start + Duration::from_secs(1)));
        assert!(!cooldown.ready_at(start + Duration::from_secs(29)));
        assert!(cooldown.ready_at(start + Duration::from_secs(30)));
        assert!(!cooldown.ready_at(start + Duration::from_secs(31)));
    }

    #[test]
    fn cooldown_reset_rearms() {
        let mut cooldown = Cooldown::new(Duration::from_secs(30));
        let start = Instant::now();
        assert!(cooldown.ready_at(start));
        cooldown.reset();
        assert!(cooldown.ready_at(start + Duration::from_secs(1)));
    }

    #[test]
    fn timestamp_has_expected_shape() {
        let ts = format_timestamp();
        assert_eq!(ts.len(), "20260211T21:33:12.000".len());
        assert_eq!(&ts[8..9], "T");
    }
}
