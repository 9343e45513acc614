//! Frame Codec
//!
//! Parses and serializes the JSON control protocol exchanged with the media
//! gateway over the WebSocket connection. All messages are UTF-8 JSON
//! objects carrying a `type` discriminator and (with the exception of none
//! in this version) a `callId`.

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::types::{CallId, CallerMetadata, Direction, FRAME_BYTES_16K};

/// Hard limit on a single WebSocket text frame.
pub const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Hard limit on the base64 `data` field of an audio message.
pub const MAX_AUDIO_BASE64_BYTES: usize = 2048;

/// Messages the gateway sends to the bridge.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum ClientMessage {
    AuthRequest {
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(rename = "correlationId")]
        correlation_id: String,
        metadata: CallerMetadata,
    },
    SessionStart {
        #[serde(rename = "callId")]
        call_id: String,
        direction: Direction,
        metadata: CallerMetadata,
    },
    CallStatus {
        #[serde(rename = "callId")]
        call_id: String,
        status: CallStatusValue,
        error: Option<String>,
    },
    AudioIn {
        #[serde(rename = "callId")]
        call_id: String,
        seq: i64,
        data: String,
    },
    SessionEnd {
        #[serde(rename = "callId")]
        call_id: String,
        reason: SessionEndReason,
    },
    SessionResume {
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(rename = "lastReceivedSeq")]
        last_received_seq: i64,
    },
    Ping {
        #[serde(rename = "callId")]
        call_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatusValue {
    Ringing,
    Answered,
    Failed,
    Busy,
    NoAnswer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionEndReason {
    HangupUser,
    HangupBot,
    Error,
    Timeout,
}

/// Target of an outbound `initiate_call`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CallTarget {
    User {
        #[serde(rename = "userId")]
        user_id: String,
    },
    Phone {
        number: String,
    },
}

/// Messages the bridge sends to the gateway.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum ServerMessage {
    AuthResponse {
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(rename = "correlationId")]
        correlation_id: String,
        authorized: bool,
        reason: Option<String>,
        strategy: String,
        timestamp: i64,
    },
    InitiateCall {
        #[serde(rename = "callId")]
        call_id: String,
        target: CallTarget,
        message: Option<String>,
    },
    AudioOut {
        #[serde(rename = "callId")]
        call_id: String,
        seq: i64,
        data: String,
    },
    Hangup {
        #[serde(rename = "callId")]
        call_id: String,
    },
    Pong {
        #[serde(rename = "callId")]
        call_id: String,
    },
    Flush {
        #[serde(rename = "callId")]
        call_id: String,
    },
}

/// Parses one inbound text frame, enforcing message size and identifier
/// limits. A protocol violation is always a `BridgeError::Protocol`; the
/// caller decides whether to drop the message or close the connection.
pub fn decode_client_message(raw: &str) -> Result<ClientMessage, BridgeError> {
    if raw.len() > MAX_MESSAGE_BYTES {
        return Err(BridgeError::Protocol(format!(
            "message of {} bytes exceeds {} byte limit",
            raw.len(),
            MAX_MESSAGE_BYTES
        )));
    }

    let msg: ClientMessage = serde_json::from_str(raw)
        .map_err(|e| BridgeError::Protocol(format!("malformed message: {e}")))?;

    validate_call_id(call_id_of(&msg))?;

    if let ClientMessage::AudioIn { data, .. } = &msg {
        if data.len() > MAX_AUDIO_BASE64_BYTES {
            return Err(BridgeError::Protocol(format!(
                "audio payload of {} bytes exceeds {} byte limit",
                data.len(),
                MAX_AUDIO_BASE64_BYTES
            )));
        }
    }

    Ok(msg)
}

fn call_id_of(msg: &ClientMessage) -> &str {
    match msg {
        ClientMessage::AuthRequest { call_id, .. }
        | ClientMessage::SessionStart { call_id, .. }
        | ClientMessage::CallStatus { call_id, .. }
        | ClientMessage::AudioIn { call_id, .. }
        | ClientMessage::SessionEnd { call_id, .. }
        | ClientMessage::SessionResume { call_id, .. }
        | ClientMessage::Ping { call_id } => call_id,
    }
}

fn validate_call_id(raw: &str) -> Result<CallId, BridgeError> {
    CallId::parse(raw).ok_or_else(|| BridgeError::Protocol(format!("invalid callId: {raw}")))
}

/// Decodes the base64 `data` field of an `audio_in` message into raw PCM
/// bytes, validating the decoded length is exactly one 16 kHz frame.
pub fn decode_audio_payload(data: &str) -> Result<Vec<u8>, BridgeError> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| BridgeError::Protocol(format!("invalid base64 audio payload: {e}")))?;
    if bytes.len() != FRAME_BYTES_16K {
        return Err(BridgeError::Protocol(format!(
            "audio frame of {} bytes is not one {} byte 16 kHz frame",
            bytes.len(),
            FRAME_BYTES_16K
        )));
    }
    Ok(bytes)
}

pub fn encode_audio_payload(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
