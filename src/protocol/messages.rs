//! Wire Message Types
//!
//! Defines the frames pushed by the capture engine, the bare-token requests
//! the client sends back, and the bodies returned by the pull endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Aggregate capture counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsSnapshot {
    /// Total number of packets captured
    pub total_packets: u64,
    /// Total bytes captured
    pub total_bytes: u64,
    /// Packets per second
    pub packet_rate: f64,
    /// Bytes per second
    pub data_rate: f64,
    /// Errors encountered during capture
    pub errors: u64,
    /// Capture start time
    pub start_time: Option<DateTime<Utc>>,
    /// Capture end time (if stopped)
    pub end_time: Option<DateTime<Utc>>,
    /// Packets per protocol
    pub protocols: HashMap<String, u64>,
    /// Packets per source address
    pub sources: HashMap<String, u64>,
    /// Packets per destination address
    pub destinations: HashMap<String, u64>,
}

/// Run status of the capture engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusSnapshot {
    pub running: bool,
    pub packet_count: u64,
}

/// A decoded server frame
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Stats(StatsSnapshot),
    Status(StatusSnapshot),
    /// Liveness probe; must be answered with `"ping"`
    Heartbeat { timestamp: Option<u64> },
}

impl WireMessage {
    /// The `type` discriminator this message was decoded from
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Stats(_) => "stats",
            WireMessage::Status(_) => "status",
            WireMessage::Heartbeat { .. } => "ping",
        }
    }
}

/// Requests sent from client to server as bare text tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientRequest {
    /// Ask for an out-of-band stats push
    Stats,
    /// Ask for an out-of-band status push
    Status,
    /// Reply to a server heartbeat
    Ping,
}

impl ClientRequest {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientRequest::Stats => "stats",
            ClientRequest::Status => "status",
            ClientRequest::Ping => "ping",
        }
    }
}

impl fmt::Display for ClientRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Deserialize)]
struct StatsFrame {
    stats: StatsSnapshot,
}

#[derive(Deserialize)]
struct PingFrame {
    #[serde(default)]
    timestamp: Option<u64>,
}

/// Decode one text frame into a [`WireMessage`]
///
/// Never panics. Unknown or malformed frames come back as a [`DecodeError`]
/// which callers log and drop.
pub fn decode(text: &str) -> Result<WireMessage, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(DecodeError::Malformed)?;

    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or(DecodeError::MissingType)?
        .to_string();

    match kind.as_str() {
        "stats" => {
            let frame: StatsFrame = serde_json::from_value(value)
                .map_err(|source| DecodeError::InvalidPayload { kind, source })?;
            Ok(WireMessage::Stats(frame.stats))
        }
        "status" => {
            let status: StatusSnapshot = serde_json::from_value(value)
                .map_err(|source| DecodeError::InvalidPayload { kind, source })?;
            Ok(WireMessage::Status(status))
        }
        "ping" => {
            let ping: PingFrame = serde_json::from_value(value)
                .map_err(|source| DecodeError::InvalidPayload { kind, source })?;
            Ok(WireMessage::Heartbeat {
                timestamp: ping.timestamp,
            })
        }
        _ => Err(DecodeError::UnknownType(kind)),
    }
}

/// Body of `GET /api/capture/status`
///
/// The engine answers `{is_running, stats}`; `running`/`packet_count` are
/// accepted too. Absent fields fall back to zero values.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CaptureStatusResponse {
    #[serde(alias = "running")]
    pub is_running: bool,
    pub packet_count: Option<u64>,
    pub stats: Option<StatsSnapshot>,
}

impl From<CaptureStatusResponse> for StatusSnapshot {
    fn from(resp: CaptureStatusResponse) -> Self {
        let packet_count = resp
            .packet_count
            .or_else(|| resp.stats.as_ref().map(|s| s.total_packets))
            .unwrap_or(0);

        StatusSnapshot {
            running: resp.is_running,
            packet_count,
        }
    }
}

/// Errors produced while decoding a server frame
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Frame is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Frame has no string `type` field")]
    MissingType,

    #[error("Unknown frame type: {0}")]
    UnknownType(String),

    #[error("Invalid {kind} frame: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}
