//! Session Recorder
//!
//! Best-effort writes of call lifecycle and transcript events to an
//! external session store. Never fails the call: every error is logged at
//! warn level and swallowed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::types::conversation_key;

/// `MsgContext`-like envelope the session store expects.
#[derive(Debug, Clone, Serialize)]
pub struct MsgContext {
    pub body: String,
    pub from: String,
    pub to: String,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub provider: &'static str,
    pub surface: &'static str,
    pub chat_type: &'static str,
}

/// The external session store's record API. The core does not interpret the
/// store beyond this contract; a real implementation lives outside the
/// bridge core.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn record(&self, session_key: &str, ctx: MsgContext, create_if_missing: bool) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub enum LifecycleEvent {
    CallStart,
    TranscriptFinal,
    CallEnd,
}

/// A `SessionStore` that discards every write, used when no external
/// conversation log is configured.
pub struct NullSessionStore;

#[async_trait]
impl SessionStore for NullSessionStore {
    async fn record(&self, _session_key: &str, _ctx: MsgContext, _create_if_missing: bool) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct SessionRecorder {
    store: Arc<dyn SessionStore>,
}

impl SessionRecorder {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    pub async fn record(
        &self,
        event: LifecycleEvent,
        user_id: &str,
        body: String,
        sender_name: Option<String>,
    ) {
        let key = conversation_key(user_id);
        let ctx = MsgContext {
            body,
            from: user_id.to_string(),
            to: "bridge".to_string(),
            sender_id: user_id.to_string(),
            sender_name,
            timestamp: Utc::now(),
            provider: "msteams-call",
            surface: "msteams-call",
            chat_type: "direct",
        };

        if let Err(e) = self.store.record(&key, ctx, true).await {
            warn!(?event, session_key = %key, "session recorder write failed: {e}");
        }
    }
}
