//! Primary delivery channel: signed messages to the relay service.
//!
//! Each delivery builds a fresh [`SignedRequest`]: a trusted timestamp, a
//! single-use nonce, and an HMAC over `user_token ‖ title ‖ text ‖ nonce ‖
//! timestamp`, then POSTs it as JSON to `<relay_url>/send`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::SharedSettings;
use crate::crypto::{generate_nonce, sign, CryptoError};
use crate::delivery::{DeliveryChannel, DeliveryError};
use crate::relay_transport::{self, TransportError};
use crate::trusted_time::{TimeError, TimeSource};

pub const DEFAULT_RELAY_URL: &str = "https://relay.wahapp.com";
pub const RELAY_CHANNEL: &str = "relay";

/// Wire body of `POST /send`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedRequest {
    pub user_token: String,
    pub title: String,
    pub text: String,
    pub nonce: String,
    pub timestamp: String,
    pub hash: String,
}

impl SignedRequest {
    /// The fields covered by `hash`, in signing order.
    pub fn signed_fields(&self) -> [&str; 5] {
        [
            &self.user_token,
            &self.title,
            &self.text,
            &self.nonce,
            &self.timestamp,
        ]
    }
}

#[derive(Debug)]
pub enum ClientError {
    Inactive,
    Time(TimeError),
    Crypto(CryptoError),
    Transport(TransportError),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Inactive => {
                write!(f, "relay is disabled or user token/secret key is missing")
            }
            ClientError::Time(e) => write!(f, "no trusted timestamp: {e}"),
            ClientError::Crypto(e) => write!(f, "signing failed: {e}"),
            ClientError::Transport(e) => write!(f, "relay request failed: {e}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<TimeError> for ClientError {
    fn from(e: TimeError) -> Self {
        ClientError::Time(e)
    }
}

impl From<CryptoError> for ClientError {
    fn from(e: CryptoError) -> Self {
        ClientError::Crypto(e)
    }
}

impl From<TransportError> for ClientError {
    fn from(e: TransportError) -> Self {
        ClientError::Transport(e)
    }
}

impl From<ClientError> for DeliveryError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Inactive => DeliveryError::Inactive,
            ClientError::Time(e) => DeliveryError::TimeUnavailable(e.to_string()),
            ClientError::Crypto(e) => DeliveryError::Other(e.to_string()),
            ClientError::Transport(e) => DeliveryError::Transport(e),
        }
    }
}

pub struct RelayClient {
    relay_url: String,
    settings: SharedSettings,
    clock: Arc<dyn TimeSource>,
    agent: ureq::Agent,
}

impl RelayClient {
    pub fn new(
        relay_url: impl Into<String>,
        settings: SharedSettings,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            relay_url: relay_url.into(),
            settings,
            clock,
            agent: relay_transport::agent(),
        }
    }

    pub fn relay_url(&self) -> &str {
        &self.relay_url
    }

    /// Sign `title`/`text` with the current credentials.
    ///
    /// Fails with [`ClientError::Inactive`] before touching the network when
    /// credentials are missing, and with [`ClientError::Time`] when no
    /// trusted timestamp can be obtained.
    pub fn build_request(&self, title: &str, text: &str) -> Result<SignedRequest, ClientError> {
        let settings = self.settings.snapshot();
        if !settings.relay_ready() {
            return Err(ClientError::Inactive);
        }

        let timestamp = self.clock.trusted_timestamp()?;
        let mut request = SignedRequest {
            user_token: settings.discord_user_token,
            title: title.to_string(),
            text: text.to_string(),
            nonce: generate_nonce(),
            timestamp,
            hash: String::new(),
        };
        request.hash = sign(&settings.user_secret_key, &request.signed_fields())?;
        Ok(request)
    }

    /// Build, sign and POST one message. Blocking.
    pub fn send(&self, title: &str, text: &str) -> Result<(), ClientError> {
        let request = self.build_request(title, text)?;
        let url = relay_transport::endpoint(&self.relay_url, "send");
        relay_transport::post_json(&self.agent, &url, &request)?;
        Ok(())
    }
}

impl DeliveryChannel for RelayClient {
    fn name(&self) -> &'static str {
        RELAY_CHANNEL
    }

    fn is_active(&self) -> bool {
        self.settings.snapshot().relay_ready()
    }

    fn deliver(&self, title: &str, text: &str) -> Result<(), DeliveryError> {
        self.send(title, text).map_err(DeliveryError::from)
    }
}
