//! Secondary delivery channel over the Telegram Bot API.
//!
//! [`TelegramChannel`] posts notifications to the configured chat.
//! [`TelegramBot`] long-polls `getUpdates` so users can message the bot with
//! `/start` or `/get_chat_id` while setting it up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::config::SharedSettings;
use crate::delivery::{DeliveryChannel, DeliveryError};
use crate::relay_transport::{self, TransportError};

pub const DEFAULT_TELEGRAM_API: &str = "https://api.telegram.org";
pub const TELEGRAM_CHANNEL: &str = "telegram";
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub const START_COMMAND: &str = "/start";
pub const CHAT_ID_COMMAND: &str = "/get_chat_id";
pub const WELCOME_REPLY: &str = "Welcome! This bot is active and ready to send notifications.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelegramError {
    NoToken,
    Transport(TransportError),
    Api(String),
}

impl std::fmt::Display for TelegramError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TelegramError::NoToken => write!(f, "telegram bot token is not set"),
            TelegramError::Transport(e) => write!(f, "telegram request failed: {e}"),
            TelegramError::Api(e) => write!(f, "telegram api error: {e}"),
        }
    }
}

impl std::error::Error for TelegramError {}

impl From<TransportError> for TelegramError {
    fn from(e: TransportError) -> Self {
        TelegramError::Transport(e)
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatesResponse {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub result: Vec<Update>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    #[serde(default)]
    pub text: Option<String>,
    pub chat: Chat,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

fn method_url(api_base: &str, token: &str, method: &str) -> String {
    relay_transport::endpoint(api_base, &format!("bot{token}/{method}"))
}

fn send_message(
    agent: &ureq::Agent,
    api_base: &str,
    token: &str,
    body: &SendMessage<'_>,
) -> Result<(), TransportError> {
    relay_transport::post_json(agent, &method_url(api_base, token, "sendMessage"), body)
}

/// Canned reply for an inbound command, if it is one we answer.
pub fn command_reply(text: &str, chat_id: i64) -> Option<String> {
    match text.trim() {
        START_COMMAND => Some(WELCOME_REPLY.to_string()),
        CHAT_ID_COMMAND => Some(format!("Your Chat ID is: {chat_id}")),
        _ => None,
    }
}

pub struct TelegramChannel {
    api_base: String,
    settings: SharedSettings,
    agent: ureq::Agent,
}

impl TelegramChannel {
    pub fn new(api_base: impl Into<String>, settings: SharedSettings) -> Self {
        Self {
            api_base: api_base.into(),
            settings,
            agent: relay_transport::agent(),
        }
    }
}

impl DeliveryChannel for TelegramChannel {
    fn name(&self) -> &'static str {
        TELEGRAM_CHANNEL
    }

    fn is_active(&self) -> bool {
        self.settings.snapshot().telegram_ready()
    }

    fn deliver(&self, title: &str, text: &str) -> Result<(), DeliveryError> {
        let settings = self.settings.snapshot();
        if !settings.telegram_ready() {
            return Err(DeliveryError::Inactive);
        }
        let combined = format!("{title}\n{text}");
        send_message(
            &self.agent,
            &self.api_base,
            &settings.telegram_bot_token,
            &SendMessage {
                chat_id: &settings.telegram_chat_id,
                text: &combined,
                parse_mode: Some("Markdown"),
            },
        )?;
        Ok(())
    }
}

/// Inbound command handler for the bot's own chat.
pub struct TelegramBot {
    api_base: String,
    settings: SharedSettings,
    agent: ureq::Agent,
    last_update_id: i64,
}

impl TelegramBot {
    pub fn new(api_base: impl Into<String>, settings: SharedSettings) -> Self {
        Self {
            api_base: api_base.into(),
            settings,
            agent: relay_transport::agent(),
            last_update_id: 0,
        }
    }

    pub fn last_update_id(&self) -> i64 {
        self.last_update_id
    }

    /// Fetch pending updates once and answer recognised commands. Returns
    /// how many replies were sent.
    pub fn poll_once(&mut self) -> Result<usize, TelegramError> {
        let token = self.settings.snapshot().telegram_bot_token;
        if token.trim().is_empty() {
            return Err(TelegramError::NoToken);
        }

        let offset = (self.last_update_id + 1).to_string();
        let response: UpdatesResponse = relay_transport::get_json(
            &self.agent,
            &method_url(&self.api_base, &token, "getUpdates"),
            &[("offset", offset.as_str())],
        )?;
        if !response.ok {
            return Err(TelegramError::Api(
                response
                    .description
                    .unwrap_or_else(|| "getUpdates returned ok=false".to_string()),
            ));
        }

        let mut replies = 0;
        for update in response.result {
            self.last_update_id = self.last_update_id.max(update.update_id);
            let Some(message) = update.message else {
                continue;
            };
            let Some(reply) = message
                .text
                .as_deref()
                .and_then(|text| command_reply(text, message.chat.id))
            else {
                continue;
            };

            let chat_id = message.chat.id.to_string();
            let body = SendMessage {
                chat_id: &chat_id,
                text: &reply,
                parse_mode: None,
            };
            match send_message(&self.agent, &self.api_base, &token, &body) {
                Ok(()) => replies += 1,
                Err(e) => crate::plog!("telegram: failed to reply to chat {}: {}", chat_id, e),
            }
        }
        Ok(replies)
    }

    /// Poll every [`POLL_INTERVAL`] on a blocking task until stopped or
    /// until `enable_telegram_bot` is switched off.
    pub fn start(mut self) -> BotTask {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        crate::plog!("telegram: bot polling started");

        let handle = tokio::task::spawn_blocking(move || {
            while !stop_flag.load(Ordering::Relaxed) && self.settings.snapshot().enable_telegram_bot
            {
                if let Err(e) = self.poll_once() {
                    crate::plog!("telegram: polling error: {}", e);
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            crate::plog!("telegram: bot polling stopped");
        });

        BotTask { stop, handle }
    }
}

pub struct BotTask {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl BotTask {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.handle.await;
    }
}
