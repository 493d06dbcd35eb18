//! Background loops owned by `partyrelay run`.
//!
//! [`SettingsWatch`] picks up edits to `settings.toml` made while the relay
//! is running (by `partyrelay configure` or by hand) and keeps the Telegram
//! bot listener in step with `enable_telegram_bot`. [`DutyWatch`] forwards
//! duty pops from the host file to the notifier.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::{load_settings, settings_path, SharedSettings};
use crate::host::FileHost;
use crate::listener::PartyNotifier;
use crate::telegram::{BotTask, TelegramBot};

pub const SETTINGS_POLL: Duration = Duration::from_secs(1);

/// Modification time and length of the settings file, `None` when absent.
type Stamp = Option<(SystemTime, u64)>;

fn stamp(path: &Path) -> Stamp {
    let meta = std::fs::metadata(path).ok()?;
    Some((meta.modified().ok()?, meta.len()))
}

/// Starts and stops the Telegram bot listener to match the live settings.
pub struct BotSupervisor {
    api_base: String,
    settings: SharedSettings,
    task: Option<BotTask>,
    warned_no_token: bool,
}

impl BotSupervisor {
    pub fn new(api_base: impl Into<String>, settings: SharedSettings) -> Self {
        Self {
            api_base: api_base.into(),
            settings,
            task: None,
            warned_no_token: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Start the listener if the settings want one and none is running, stop
    /// it if they no longer do.
    pub async fn reconcile(&mut self) {
        if self.task.as_ref().is_some_and(BotTask::is_finished) {
            self.task = None;
        }

        let current = self.settings.snapshot();
        let has_token = !current.telegram_bot_token.trim().is_empty();
        let wanted = current.enable_telegram_bot && has_token;

        if current.enable_telegram_bot && !has_token {
            if !self.warned_no_token {
                crate::plog!("telegram: bot enabled but no token set; listener not started");
                self.warned_no_token = true;
            }
        } else {
            self.warned_no_token = false;
        }

        match (wanted, self.task.is_some()) {
            (true, false) => {
                let bot = TelegramBot::new(&self.api_base, self.settings.clone());
                self.task = Some(bot.start());
            }
            (false, true) => self.stop().await,
            _ => {}
        }
    }

    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.stop().await;
        }
    }
}

/// Polls `settings.toml` for changes and pushes them into [`SharedSettings`].
pub struct SettingsWatch {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
    bot_running: Arc<AtomicBool>,
}

impl SettingsWatch {
    /// The first tick loads the file and reconciles the bot, so the listener
    /// starts here when the settings already enable it.
    pub fn spawn(
        data_dir: PathBuf,
        settings: SharedSettings,
        mut supervisor: BotSupervisor,
        period: Duration,
    ) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let bot_running = Arc::new(AtomicBool::new(false));
        let running = Arc::clone(&bot_running);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last: Option<Stamp> = None;
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = interval.tick() => {
                        reload_if_changed(&data_dir, &settings, &mut last).await;
                        supervisor.reconcile().await;
                        running.store(supervisor.is_running(), Ordering::SeqCst);
                    }
                }
            }
            supervisor.stop().await;
            running.store(false, Ordering::SeqCst);
        });

        Self {
            stop_tx,
            handle,
            bot_running,
        }
    }

    /// Whether the bot listener was running after the last check.
    pub fn bot_running(&self) -> bool {
        self.bot_running.load(Ordering::SeqCst)
    }

    /// Stop watching and stop the bot listener if it is running.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(());
        let _ = self.handle.await;
    }
}

async fn reload_if_changed(
    data_dir: &Path,
    settings: &SharedSettings,
    last: &mut Option<Stamp>,
) {
    let dir = data_dir.to_path_buf();
    let previous = *last;
    let checked = tokio::task::spawn_blocking(move || {
        let current = stamp(&settings_path(&dir));
        if previous == Some(current) {
            return (current, None);
        }
        (current, Some(load_settings(&dir)))
    })
    .await;

    let (current, loaded) = match checked {
        Ok(checked) => checked,
        Err(e) => {
            crate::plog!("settings: reload task failed: {}", e);
            return;
        }
    };
    *last = Some(current);
    match loaded {
        Some(Ok(loaded)) if loaded != settings.snapshot() => {
            settings.update(|s| *s = loaded);
            crate::plog!("settings: reloaded {}", settings_path(data_dir).display());
        }
        Some(Err(e)) => crate::plog!("settings: keeping previous values: {}", e),
        _ => {}
    }
}

/// Forwards duty pops seen by the host to the notifier.
pub struct DutyWatch {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl DutyWatch {
    pub fn spawn(host: Arc<FileHost>, notifier: PartyNotifier, period: Duration) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = interval.tick() => {
                        if let Some(pop) = host.take_duty_pop() {
                            notifier.on_duty_pop(pop.name.as_deref());
                        }
                    }
                }
            }
        });
        Self { stop_tx, handle }
    }

    pub async fn stop(self) {
        let _ = self.stop_tx.send(());
        let _ = self.handle.await;
    }
}
