// Client API protocol - messages the frontend daemon sends to the host
// Uses newline-delimited JSON frames over a loopback TCP connection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum size of a single request frame (64 KiB)
pub const MAX_REQUEST_FRAME_SIZE: usize = 64 * 1024;

// ============================================================================
// Daemon -> Host requests
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientApiRequest {
    /// The daemon is listening and reports where
    FrontendReady {
        /// Address the daemon's API listens on
        address: String,
        /// Port the daemon's API listens on
        port: u16,
    },
    /// Liveness check
    Ping,
}

// ============================================================================
// Host -> Daemon responses
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientApiResponse {
    /// The reported port was recorded
    FrontendReadyAck { received_at: DateTime<Utc> },
    Pong,
    Error {
        code: ClientApiErrorCode,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientApiErrorCode {
    /// Frame too large or not a known request
    InvalidRequest,
    /// `FrontendReady` carried port 0
    InvalidPort,
}

impl ClientApiResponse {
    pub fn error(code: ClientApiErrorCode, message: impl Into<String>) -> Self {
        ClientApiResponse::Error {
            code,
            message: message.into(),
        }
    }
}

// ============================================================================
// Helpers for message framing
// ============================================================================

/// Serialize a message to JSON bytes with newline delimiter
pub fn serialize_message<T: Serialize>(msg: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(msg)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Deserialize a message from JSON bytes (strips trailing newline)
pub fn deserialize_message<T: for<'de> Deserialize<'de>>(
    bytes: &[u8],
) -> Result<T, serde_json::Error> {
    let trimmed = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    let trimmed = trimmed.strip_suffix(b"\r").unwrap_or(trimmed);
    serde_json::from_slice(trimmed)
}
