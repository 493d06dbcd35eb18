//! Trusted timestamps for signed relay requests.
//!
//! The relay rejects requests whose timestamp drifts from its own clock, so
//! the local clock is never used. [`NetworkTime`] asks an NTP server first
//! and falls back to an HTTP time service when the UDP exchange fails.

use std::net::UdpSocket;
use std::time::Duration;

use chrono::DateTime;
use serde::Deserialize;

use crate::relay_transport::{self, TransportError};

pub const DEFAULT_NTP_SERVER: &str = "0.pool.ntp.org:123";
pub const DEFAULT_TIME_API: &str = "http://worldtimeapi.org/api/timezone/Etc/UTC";
pub const NTP_TIMEOUT: Duration = Duration::from_secs(5);

pub const NTP_PACKET_SIZE: usize = 48;
/// Byte offset of the transmit timestamp in an NTP reply.
const TRANSMIT_TIMESTAMP_OFFSET: usize = 40;
/// Leap indicator 0, version 3, mode 3 (client).
const NTP_CLIENT_HEADER: u8 = 0x1B;
/// Seconds between 1900-01-01 (NTP epoch) and 1970-01-01 (Unix epoch).
pub const NTP_UNIX_OFFSET_SECS: u64 = 2_208_988_800;
/// Length of one NTP era: the 32-bit seconds counter wraps after this.
const NTP_ERA_SECS: u64 = 1 << 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeError {
    /// Socket setup, send, receive or timeout failure.
    Io(String),
    /// The server answered with something that isn't a usable reply.
    ProtocolViolation(String),
    Http(TransportError),
    /// Both the NTP query and the HTTP fallback failed.
    Unavailable { ntp: Box<TimeError>, http: Box<TimeError> },
}

impl std::fmt::Display for TimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeError::Io(e) => write!(f, "io error: {e}"),
            TimeError::ProtocolViolation(e) => write!(f, "protocol violation: {e}"),
            TimeError::Http(e) => write!(f, "time service error: {e}"),
            TimeError::Unavailable { ntp, http } => {
                write!(f, "trusted time unavailable (ntp: {ntp}; http: {http})")
            }
        }
    }
}

impl std::error::Error for TimeError {}

impl From<std::io::Error> for TimeError {
    fn from(e: std::io::Error) -> Self {
        TimeError::Io(e.to_string())
    }
}

impl From<TransportError> for TimeError {
    fn from(e: TransportError) -> Self {
        TimeError::Http(e)
    }
}

/// Source of Unix-seconds timestamps the relay will trust.
pub trait TimeSource: Send + Sync {
    fn trusted_timestamp(&self) -> Result<String, TimeError>;
}

/// NTP over UDP with an HTTP time-service fallback.
#[derive(Debug, Clone)]
pub struct NetworkTime {
    ntp_server: String,
    time_api_url: String,
    ntp_timeout: Duration,
}

impl Default for NetworkTime {
    fn default() -> Self {
        Self::new(DEFAULT_NTP_SERVER, DEFAULT_TIME_API)
    }
}

impl NetworkTime {
    pub fn new(ntp_server: impl Into<String>, time_api_url: impl Into<String>) -> Self {
        Self {
            ntp_server: ntp_server.into(),
            time_api_url: time_api_url.into(),
            ntp_timeout: NTP_TIMEOUT,
        }
    }

    pub fn with_ntp_timeout(mut self, timeout: Duration) -> Self {
        self.ntp_timeout = timeout;
        self
    }

    /// One request/response exchange with the NTP server.
    pub fn query_ntp(&self) -> Result<u64, TimeError> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_read_timeout(Some(self.ntp_timeout))?;
        socket.connect(&self.ntp_server)?;
        socket.send(&ntp_request())?;

        let mut reply = [0u8; NTP_PACKET_SIZE];
        let received = socket.recv(&mut reply)?;
        parse_ntp_reply(&reply[..received])
    }

    pub fn query_http(&self) -> Result<u64, TimeError> {
        let reply: TimeApiReply =
            relay_transport::get_json(&relay_transport::agent(), &self.time_api_url, &[])?;
        parse_utc_datetime(&reply.utc_datetime)
    }
}

impl TimeSource for NetworkTime {
    fn trusted_timestamp(&self) -> Result<String, TimeError> {
        let ntp_error = match self.query_ntp() {
            Ok(secs) => return Ok(secs.to_string()),
            Err(e) => e,
        };
        crate::plog!("time: ntp query to {} failed: {}", self.ntp_server, ntp_error);

        match self.query_http() {
            Ok(secs) => Ok(secs.to_string()),
            Err(http_error) => {
                crate::plog!("time: fallback to {} failed: {}", self.time_api_url, http_error);
                Err(TimeError::Unavailable {
                    ntp: Box::new(ntp_error),
                    http: Box::new(http_error),
                })
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct TimeApiReply {
    utc_datetime: String,
}

pub fn ntp_request() -> [u8; NTP_PACKET_SIZE] {
    let mut packet = [0u8; NTP_PACKET_SIZE];
    packet[0] = NTP_CLIENT_HEADER;
    packet
}

/// Extract Unix seconds from the transmit timestamp of an NTP reply.
pub fn parse_ntp_reply(reply: &[u8]) -> Result<u64, TimeError> {
    if reply.len() < NTP_PACKET_SIZE {
        return Err(TimeError::ProtocolViolation(format!(
            "reply is {} bytes, expected {NTP_PACKET_SIZE}",
            reply.len()
        )));
    }
    let field = |offset: usize| {
        u32::from_be_bytes([
            reply[offset],
            reply[offset + 1],
            reply[offset + 2],
            reply[offset + 3],
        ]) as u64
    };
    let raw_seconds = field(TRANSMIT_TIMESTAMP_OFFSET);
    let fraction = field(TRANSMIT_TIMESTAMP_OFFSET + 4);
    if raw_seconds == 0 && fraction == 0 {
        return Err(TimeError::ProtocolViolation(
            "server left the transmit timestamp unset".into(),
        ));
    }

    // Era 0 ends in February 2036. A clear high bit means the counter has
    // wrapped into era 1 (RFC 4330 section 3).
    let seconds = if raw_seconds & 0x8000_0000 == 0 {
        raw_seconds + NTP_ERA_SECS
    } else {
        raw_seconds
    };

    let millis_since_1900 = seconds * 1000 + (fraction * 1000) / 0x1_0000_0000;
    let millis_since_1970 = millis_since_1900
        .checked_sub(NTP_UNIX_OFFSET_SECS * 1000)
        .ok_or_else(|| {
            TimeError::ProtocolViolation(format!("transmit timestamp {seconds} predates 1970"))
        })?;
    Ok(millis_since_1970 / 1000)
}

/// Parse an RFC 3339 timestamp into Unix seconds.
pub fn parse_utc_datetime(value: &str) -> Result<u64, TimeError> {
    let parsed = DateTime::parse_from_rfc3339(value)
        .map_err(|e| TimeError::ProtocolViolation(format!("bad utc_datetime {value:?}: {e}")))?;
    u64::try_from(parsed.timestamp())
        .map_err(|_| TimeError::ProtocolViolation(format!("utc_datetime {value:?} predates 1970")))
}
