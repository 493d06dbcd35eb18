//! Command line and environment configuration for the `partyrelay` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::client::DEFAULT_RELAY_URL;
use crate::host::HOST_FILE;
use crate::telegram::DEFAULT_TELEGRAM_API;
use crate::trigger::DEFAULT_TRIGGER_BIND;
use crate::trusted_time::{DEFAULT_NTP_SERVER, DEFAULT_TIME_API};

/// Party membership notifications for cross-world parties.
///
/// Watches the party list reported by the game host, batches joins, and
/// relays join/leave/duty notifications to Discord (through the signing
/// relay) and Telegram while the player is away.
///
/// Options can be set via CLI arguments or environment variables.
/// CLI arguments take precedence over environment variables.
#[derive(Parser, Debug)]
#[command(name = "partyrelay", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub options: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Default)]
pub struct GlobalOptions {
    /// Data directory for settings and the host file [env: PARTYRELAY_HOME] [default: ~/.partyrelay]
    #[arg(long, short = 'd', global = true)]
    pub data_dir: Option<PathBuf>,

    /// Relay base URL [env: PARTYRELAY_RELAY_URL]
    #[arg(long, short = 'r', global = true)]
    pub relay_url: Option<String>,

    /// Telegram Bot API base URL [env: PARTYRELAY_TELEGRAM_API]
    #[arg(long, global = true)]
    pub telegram_api: Option<String>,

    /// NTP server as host:port [env: PARTYRELAY_NTP_SERVER]
    #[arg(long, global = true)]
    pub ntp_server: Option<String>,

    /// HTTP time service used when NTP fails [env: PARTYRELAY_TIME_API]
    #[arg(long, global = true)]
    pub time_api: Option<String>,

    /// Trigger server bind address [env: PARTYRELAY_BIND] [default: 127.0.0.1:7878]
    #[arg(long, short = 'b', global = true)]
    pub bind: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Watch the party and send notifications until Ctrl-C
    Run {
        /// Host state file [default: <data-dir>/host.json]
        #[arg(long)]
        host_file: Option<PathBuf>,
    },
    /// Send a custom message through a running instance
    Send {
        title: String,
        text: String,
        /// Base URL of the running instance [default: http://<bind>]
        #[arg(long)]
        to: Option<String>,
    },
    /// Send a test notification to every active channel
    Test,
    /// Change and save settings
    Configure(ConfigureArgs),
    /// Show settings and which channels are active
    Status,
}

#[derive(Args, Debug, Default)]
pub struct ConfigureArgs {
    #[arg(long)]
    pub discord_user_token: Option<String>,
    #[arg(long)]
    pub user_secret_key: Option<String>,
    #[arg(long)]
    pub enable_discord_bot: Option<bool>,
    #[arg(long)]
    pub telegram_bot_token: Option<String>,
    #[arg(long)]
    pub telegram_chat_id: Option<String>,
    #[arg(long)]
    pub enable_telegram_bot: Option<bool>,
    #[arg(long)]
    pub enable_for_duty_pops: Option<bool>,
    #[arg(long)]
    pub ignore_afk_status: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub relay_url: String,
    pub telegram_api: String,
    pub ntp_server: String,
    pub time_api: String,
    pub bind_addr: String,
}

impl Config {
    pub fn from_cli_and_env(options: GlobalOptions) -> Self {
        let data_dir = options
            .data_dir
            .or_else(|| std::env::var("PARTYRELAY_HOME").ok().map(PathBuf::from))
            .unwrap_or_else(|| {
                std::env::var("HOME")
                    .map(|h| PathBuf::from(h).join(".partyrelay"))
                    .unwrap_or_else(|_| PathBuf::from(".partyrelay"))
            });

        Self {
            data_dir,
            relay_url: cli_or_env(options.relay_url, "PARTYRELAY_RELAY_URL", DEFAULT_RELAY_URL),
            telegram_api: cli_or_env(
                options.telegram_api,
                "PARTYRELAY_TELEGRAM_API",
                DEFAULT_TELEGRAM_API,
            ),
            ntp_server: cli_or_env(options.ntp_server, "PARTYRELAY_NTP_SERVER", DEFAULT_NTP_SERVER),
            time_api: cli_or_env(options.time_api, "PARTYRELAY_TIME_API", DEFAULT_TIME_API),
            bind_addr: cli_or_env(options.bind, "PARTYRELAY_BIND", DEFAULT_TRIGGER_BIND),
        }
    }

    pub fn default_host_file(&self) -> PathBuf {
        self.data_dir.join(HOST_FILE)
    }

    pub fn trigger_url(&self) -> String {
        format!("http://{}", self.bind_addr)
    }
}

fn cli_or_env(cli: Option<String>, var: &str, default: &str) -> String {
    cli.or_else(|| std::env::var(var).ok())
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_values_win() {
        let config = Config::from_cli_and_env(GlobalOptions {
            data_dir: Some(PathBuf::from("/tmp/pr")),
            relay_url: Some("http://relay.local".into()),
            bind: Some("127.0.0.1:9999".into()),
            ..GlobalOptions::default()
        });
        assert_eq!(config.data_dir, PathBuf::from("/tmp/pr"));
        assert_eq!(config.relay_url, "http://relay.local");
        assert_eq!(config.trigger_url(), "http://127.0.0.1:9999");
        assert_eq!(config.default_host_file(), PathBuf::from("/tmp/pr/host.json"));
    }

    #[test]
    fn parses_subcommands() {
        let cli = Cli::parse_from([
            "partyrelay",
            "--data-dir",
            "/tmp/pr",
            "configure",
            "--enable-discord-bot",
            "true",
            "--user-secret-key",
            "s3cret",
        ]);
        let Command::Configure(args) = cli.command else {
            panic!("expected configure");
        };
        assert_eq!(args.enable_discord_bot, Some(true));
        assert_eq!(args.user_secret_key.as_deref(), Some("s3cret"));
        assert_eq!(cli.options.data_dir, Some(PathBuf::from("/tmp/pr")));

        let cli = Cli::parse_from(["partyrelay", "send", "Hello", "there"]);
        assert!(matches!(cli.command, Command::Send { ref title, .. } if title == "Hello"));
    }
}
