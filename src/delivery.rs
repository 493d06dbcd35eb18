//! Fan-out of notifications to the configured delivery channels.
//!
//! [`NotificationRouter::route`] looks up which channels are active at the
//! moment of the call and hands the message to each of them on its own
//! detached blocking task. Delivery is fire-and-forget: outcomes are logged,
//! never returned, and one channel failing never affects another.

use std::sync::Arc;

use crate::logging;
use crate::relay_transport::TransportError;

/// Longest text accepted from an external trigger, in characters.
pub const MAX_EXTERNAL_TEXT_LEN: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryMessage {
    pub title: String,
    pub body: String,
}

impl DeliveryMessage {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Channel switched off or missing credentials; nothing was attempted.
    Inactive,
    /// No trusted timestamp; the signed request was not sent.
    TimeUnavailable(String),
    Transport(TransportError),
    /// Rejected locally before any delivery attempt.
    Validation(String),
    Other(String),
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryError::Inactive => write!(f, "channel is not configured"),
            DeliveryError::TimeUnavailable(e) => write!(f, "time unavailable: {e}"),
            DeliveryError::Transport(e) => write!(f, "{e}"),
            DeliveryError::Validation(e) => write!(f, "rejected: {e}"),
            DeliveryError::Other(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for DeliveryError {}

impl From<TransportError> for DeliveryError {
    fn from(e: TransportError) -> Self {
        DeliveryError::Transport(e)
    }
}

/// An outbound notification channel. `deliver` blocks until the channel's
/// request completes.
pub trait DeliveryChannel: Send + Sync {
    fn name(&self) -> &'static str;
    fn is_active(&self) -> bool;
    fn deliver(&self, title: &str, text: &str) -> Result<(), DeliveryError>;
}

/// Where event handlers hand finished notifications.
pub trait NotificationSink: Send + Sync {
    fn route(&self, message: DeliveryMessage);
}

/// Reject externally supplied text that exceeds [`MAX_EXTERNAL_TEXT_LEN`].
pub fn check_external_text(text: &str) -> Result<(), DeliveryError> {
    let len = text.chars().count();
    if len > MAX_EXTERNAL_TEXT_LEN {
        return Err(DeliveryError::Validation(format!(
            "message is {len} characters, limit is {MAX_EXTERNAL_TEXT_LEN}"
        )));
    }
    Ok(())
}

#[derive(Clone, Default)]
pub struct NotificationRouter {
    channels: Vec<Arc<dyn DeliveryChannel>>,
}

impl NotificationRouter {
    pub fn new(channels: Vec<Arc<dyn DeliveryChannel>>) -> Self {
        Self { channels }
    }

    pub fn channels(&self) -> &[Arc<dyn DeliveryChannel>] {
        &self.channels
    }

    /// Names of the channels that would receive a message right now.
    pub fn active_channels(&self) -> Vec<&'static str> {
        self.channels
            .iter()
            .filter(|c| c.is_active())
            .map(|c| c.name())
            .collect()
    }

    /// Dispatch to every active channel; returns how many were dispatched.
    pub fn dispatch(&self, title: &str, text: &str) -> usize {
        let mut dispatched = 0;
        for channel in &self.channels {
            if !channel.is_active() {
                crate::plog!(
                    "delivery: {} is inactive; skipping '{}'",
                    logging::channel(channel.name()),
                    title
                );
                continue;
            }
            crate::plog!(
                "delivery: sending '{}' via {}",
                title,
                logging::channel(channel.name())
            );
            spawn_delivery(Arc::clone(channel), title.to_string(), text.to_string());
            dispatched += 1;
        }
        if dispatched == 0 {
            crate::plog!("delivery: no active channels for '{}'", title);
        }
        dispatched
    }

    /// Entry point for messages from other processes: applies the length
    /// guard, then routes like any internal notification.
    pub fn send_custom_message(&self, title: &str, text: &str) -> Result<usize, DeliveryError> {
        if let Err(e) = check_external_text(text) {
            crate::plog!("delivery: custom message '{}' {}", title, e);
            return Err(e);
        }
        Ok(self.dispatch(title, text))
    }
}

impl NotificationSink for NotificationRouter {
    fn route(&self, message: DeliveryMessage) {
        self.dispatch(&message.title, &message.body);
    }
}

fn spawn_delivery(channel: Arc<dyn DeliveryChannel>, title: String, text: String) {
    let job = move || match channel.deliver(&title, &text) {
        Ok(()) => crate::plog!(
            "delivery: {} delivered '{}'",
            logging::channel(channel.name()),
            title
        ),
        Err(e) => crate::plog!(
            "delivery: {} failed to deliver '{}': {}",
            logging::channel(channel.name()),
            title,
            e
        ),
    };

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(job);
        }
        Err(_) => {
            std::thread::spawn(job);
        }
    }
}
