//! The `partyrelay` binary: wiring and subcommands.

pub mod config;
pub mod watch;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;

use crate::batcher::{JoinBatcher, DEFAULT_BATCH_WINDOW};
use crate::client::RelayClient;
use crate::config::{load_settings, save_settings, ConfigError, Settings, SharedSettings};
use crate::delivery::{DeliveryChannel, DeliveryError, NotificationRouter, NotificationSink};
use crate::host::FileHost;
use crate::listener::PartyNotifier;
use crate::logging;
use crate::presence::AfkGate;
use crate::relay_transport::TransportError;
use crate::roster::{RosterWatcher, DEFAULT_POLL_TICK};
use crate::telegram::TelegramChannel;
use crate::trigger::{self, TriggerServer};
use crate::trusted_time::{NetworkTime, TimeSource};

use config::{Cli, Command, Config, ConfigureArgs};
use watch::{BotSupervisor, DutyWatch, SettingsWatch, SETTINGS_POLL};

pub const TEST_TITLE: &str = "Test notification";
pub const TEST_TEXT: &str = "This is a test notification from partyrelay.";

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Io(std::io::Error),
    Transport(TransportError),
    Delivery(DeliveryError),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Config(e) => write!(f, "settings: {e}"),
            AppError::Io(e) => write!(f, "io error: {e}"),
            AppError::Transport(e) => write!(f, "{e}"),
            AppError::Delivery(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        AppError::Config(e)
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e)
    }
}

impl From<TransportError> for AppError {
    fn from(e: TransportError) -> Self {
        AppError::Transport(e)
    }
}

impl From<DeliveryError> for AppError {
    fn from(e: DeliveryError) -> Self {
        AppError::Delivery(e)
    }
}

/// Entry point: parse CLI, then dispatch the subcommand.
pub async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let config = Config::from_cli_and_env(cli.options);

    logging::init();

    match cli.command {
        Command::Run { host_file } => {
            let host_file = host_file.unwrap_or_else(|| config.default_host_file());
            serve(&config, &host_file).await
        }
        Command::Send { title, text, to } => {
            let url = to.unwrap_or_else(|| config.trigger_url());
            let dispatched =
                tokio::task::spawn_blocking(move || trigger::post_custom(&url, &title, &text))
                    .await
                    .map_err(|e| AppError::Io(std::io::Error::other(e)))??;
            crate::plog!("send: dispatched to {} channel(s)", dispatched);
            Ok(())
        }
        Command::Test => send_test(&config).await,
        Command::Configure(args) => configure(&config.data_dir, args),
        Command::Status => status(&config),
    }
}

/// Relay and Telegram channels over the shared settings.
pub fn build_router(config: &Config, settings: SharedSettings) -> NotificationRouter {
    let clock: Arc<dyn TimeSource> =
        Arc::new(NetworkTime::new(&config.ntp_server, &config.time_api));
    let channels: Vec<Arc<dyn DeliveryChannel>> = vec![
        Arc::new(RelayClient::new(&config.relay_url, settings.clone(), clock)),
        Arc::new(TelegramChannel::new(&config.telegram_api, settings)),
    ];
    NotificationRouter::new(channels)
}

async fn serve(config: &Config, host_file: &Path) -> Result<(), AppError> {
    crate::plog!("partyrelay starting");
    crate::plog!("  data directory: {}", config.data_dir.display());
    crate::plog!("  host file: {}", host_file.display());
    crate::plog!("  relay: {}", config.relay_url);

    let settings = SharedSettings::new(load_settings(&config.data_dir)?);
    let router = build_router(config, settings.clone());
    let active = router.active_channels();
    if active.is_empty() {
        crate::plog!("  channels: none active (run `partyrelay configure`)");
    } else {
        crate::plog!("  channels: {}", active.join(", "));
    }

    let host = Arc::new(FileHost::new(host_file));
    let gate = AfkGate::new(settings.clone(), host.clone());
    let sink: Arc<dyn NotificationSink> = Arc::new(router.clone());

    let batcher = JoinBatcher::spawn(DEFAULT_BATCH_WINDOW, gate.clone(), Arc::clone(&sink));
    let notifier = PartyNotifier::new(batcher.queue(), gate, sink, settings.clone());

    let watcher = RosterWatcher::new(host.clone());
    let attachment = notifier.attach(&watcher.events());
    let watcher_task = watcher.start(DEFAULT_POLL_TICK);
    let duty_watch = DutyWatch::spawn(host, notifier, DEFAULT_POLL_TICK);

    let supervisor = BotSupervisor::new(&config.telegram_api, settings.clone());
    let settings_watch =
        SettingsWatch::spawn(config.data_dir.clone(), settings, supervisor, SETTINGS_POLL);
    let trigger = TriggerServer::bind(&config.bind_addr, router).await?;

    tokio::signal::ctrl_c().await?;
    crate::plog!("partyrelay shutting down");

    watcher_task.stop().await;
    attachment.detach();
    duty_watch.stop().await;
    batcher.stop().await;
    settings_watch.stop().await;
    trigger.shutdown().await;
    Ok(())
}

async fn send_test(config: &Config) -> Result<(), AppError> {
    let settings = SharedSettings::new(load_settings(&config.data_dir)?);
    let router = build_router(config, settings);
    let channels: Vec<Arc<dyn DeliveryChannel>> = router
        .channels()
        .iter()
        .filter(|c| c.is_active())
        .cloned()
        .collect();
    if channels.is_empty() {
        crate::plog!("test: no active channels");
        return Err(DeliveryError::Inactive.into());
    }

    // Wait for each channel here; the router would detach them and the
    // process would exit first.
    let mut failures = 0;
    for channel in channels {
        let name = channel.name();
        let result = tokio::task::spawn_blocking(move || channel.deliver(TEST_TITLE, TEST_TEXT))
            .await
            .map_err(|e| AppError::Io(std::io::Error::other(e)))?;
        match result {
            Ok(()) => crate::plog!("test: {} ok", logging::channel(name)),
            Err(e) => {
                failures += 1;
                crate::plog!("test: {} failed: {}", logging::channel(name), e);
            }
        }
    }
    if failures > 0 {
        return Err(DeliveryError::Other(format!("{failures} channel(s) failed")).into());
    }
    Ok(())
}

/// Apply every provided option to `settings`.
pub fn apply_configure(settings: &mut Settings, args: ConfigureArgs) {
    if let Some(v) = args.discord_user_token {
        settings.discord_user_token = v;
    }
    if let Some(v) = args.user_secret_key {
        settings.user_secret_key = v;
    }
    if let Some(v) = args.enable_discord_bot {
        settings.enable_discord_bot = v;
    }
    if let Some(v) = args.telegram_bot_token {
        settings.telegram_bot_token = v;
    }
    if let Some(v) = args.telegram_chat_id {
        settings.telegram_chat_id = v;
    }
    if let Some(v) = args.enable_telegram_bot {
        settings.enable_telegram_bot = v;
    }
    if let Some(v) = args.enable_for_duty_pops {
        settings.enable_for_duty_pops = v;
    }
    if let Some(v) = args.ignore_afk_status {
        settings.ignore_afk_status = v;
    }
}

fn configure(data_dir: &Path, args: ConfigureArgs) -> Result<(), AppError> {
    let mut settings = load_settings(data_dir)?;
    apply_configure(&mut settings, args);
    save_settings(data_dir, &settings)?;
    crate::plog!(
        "configure: saved {}",
        crate::config::settings_path(data_dir).display()
    );
    Ok(())
}

fn status(config: &Config) -> Result<(), AppError> {
    let settings = load_settings(&config.data_dir)?;
    let set = |v: &str| if v.trim().is_empty() { "not set" } else { "set" };
    println!("settings: {}", crate::config::settings_path(&config.data_dir).display());
    println!(
        "relay:    {} (enabled: {}, token: {}, secret: {})",
        if settings.relay_ready() { "active" } else { "inactive" },
        settings.enable_discord_bot,
        set(&settings.discord_user_token),
        set(&settings.user_secret_key),
    );
    println!(
        "telegram: {} (enabled: {}, token: {}, chat id: {})",
        if settings.telegram_ready() { "active" } else { "inactive" },
        settings.enable_telegram_bot,
        set(&settings.telegram_bot_token),
        set(&settings.telegram_chat_id),
    );
    println!("duty pops: {}", settings.enable_for_duty_pops);
    println!("ignore afk: {}", settings.ignore_afk_status);
    Ok(())
}
