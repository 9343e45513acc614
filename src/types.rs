//! Shared types used across modules
//!
//! This module contains types that are used by multiple modules
//! to avoid circular dependencies.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Exactly 20 ms of 16-bit little-endian mono PCM at 16 kHz.
pub const FRAME_BYTES_16K: usize = 640;

/// Exactly 20 ms of 16-bit little-endian mono PCM at 24 kHz.
pub const FRAME_BYTES_24K: usize = 960;

static CALL_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").unwrap());

/// A call-id as carried on the wire. Validated on construction so that every
/// `CallId` in the system is known-good; invalid strings never get this far.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn parse(raw: &str) -> Option<Self> {
        if CALL_ID_RE.is_match(raw) {
            Some(Self(raw.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction a call was established in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Caller identity/metadata carried by `auth_request` and `session_start`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallerMetadata {
    #[serde(rename = "tenantId")]
    pub tenant_id: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    #[serde(rename = "teamsCallId")]
    pub teams_call_id: Option<String>,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    #[serde(rename = "userPrincipalName")]
    pub user_principal_name: Option<String>,
    #[serde(rename = "phoneNumber")]
    pub phone_number: Option<String>,
}

/// Conversation session key, `msteams-call:{lowercased-user-id}`.
pub fn conversation_key(user_id: &str) -> String {
    format!("msteams-call:{}", user_id.to_lowercase())
}

/// One turn in the bounded conversation transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Bot,
}

/// Maximum number of turns kept in a conversation transcript.
pub const MAX_TRANSCRIPT_TURNS: usize = 50;

/// Idle expiry for a conversation session.
pub const CONVERSATION_IDLE_SECS: i64 = 30 * 60;

/// A monotonic per-direction, per-call sequence counter. `u64` so it survives
/// well past 2^53 without truncation, as required by the boundary behaviors.
#[derive(Debug, Default)]
pub struct SeqCounter(AtomicI64);

impl SeqCounter {
    pub fn new() -> Self {
        Self(AtomicI64::new(0))
    }

    /// Returns the next sequence number and advances the counter.
    pub fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Reason a call ended, mirrored from the wire `session_end.reason` values
/// plus internally generated reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndReason {
    HangupUser,
    HangupBot,
    Error,
    Timeout,
}

/// A 640-byte 16 kHz PCM frame, immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame(Arc<[u8]>);

impl AudioFrame {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Arc::from(bytes.into_boxed_slice()))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
