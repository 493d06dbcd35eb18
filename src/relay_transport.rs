//! Blocking HTTP helpers shared by the outbound channels and the time
//! fallback.
//!
//! Every request goes through a [`ureq::Agent`] carrying [`HTTP_TIMEOUT`];
//! there is no other deadline on delivery. Callers run these from
//! `spawn_blocking` tasks.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The server answered with a non-success status.
    Status { code: u16, body: String },
    /// DNS, connect, TLS or timeout failure.
    Network(String),
    /// The response body was not what we expected.
    Decode(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Status { code, body } => {
                write!(f, "http status {code}, response body: {body:?}")
            }
            TransportError::Network(e) => write!(f, "network error: {e}"),
            TransportError::Decode(e) => write!(f, "decode error: {e}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<ureq::Error> for TransportError {
    fn from(error: ureq::Error) -> Self {
        match error {
            ureq::Error::Status(code, response) => TransportError::Status {
                code,
                body: response.into_string().unwrap_or_default(),
            },
            ureq::Error::Transport(transport) => TransportError::Network(transport.to_string()),
        }
    }
}

/// Agent with the ambient request timeout applied.
pub fn agent() -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(HTTP_TIMEOUT).build()
}

/// POST `body` as JSON to `url`; any 2xx/3xx status counts as success.
pub fn post_json<T: Serialize>(
    agent: &ureq::Agent,
    url: &str,
    body: &T,
) -> Result<(), TransportError> {
    agent.post(url).send_json(body)?;
    Ok(())
}

/// GET `url` with `query` parameters and decode the JSON response.
pub fn get_json<T: DeserializeOwned>(
    agent: &ureq::Agent,
    url: &str,
    query: &[(&str, &str)],
) -> Result<T, TransportError> {
    let mut request = agent.get(url);
    for (key, value) in query {
        request = request.query(key, value);
    }
    request
        .call()?
        .into_json()
        .map_err(|e| TransportError::Decode(e.to_string()))
}

/// Join a base URL and a path without doubling the slash.
pub fn endpoint(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
