//! STT Adapter
//!
//! Streams 24 kHz PCM frames to the transcription service and emits partial
//! transcripts, final transcripts, and user-speaking (barge-in) events. The
//! network surface is a trait so the chunked voice controller can be tested
//! against a fake without a real transcription endpoint.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};

/// Events emitted by a streaming STT session, in channel order.
#[derive(Debug, Clone)]
pub enum SttEvent {
    Partial(String),
    Final(String),
    UserSpeaking,
}

/// A live streaming transcription session bound to one call.
#[async_trait]
pub trait SttSession: Send + Sync {
    /// Pushes one 24 kHz PCM frame (960 bytes) to the upstream socket.
    async fn send_frame(&self, pcm24: &[u8]) -> Result<()>;

    /// Closes the upstream session.
    async fn close(&self);
}

/// Opens streaming STT sessions. Implemented once for the real transcription
/// service; fakeable via `mockall` in tests.
#[async_trait]
pub trait SttProvider: Send + Sync {
    async fn open(
        &self,
        model: &str,
        vad_threshold: f32,
        silence_duration_ms: u32,
        events: mpsc::Sender<SttEvent>,
        cancel: CancellationToken,
    ) -> Result<Box<dyn SttSession>>;
}

/// Exponential backoff budget for STT reconnection: `1s * 2^(attempt-1)`,
/// capped at 5 attempts.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

pub fn backoff_delay(attempt: u32) -> Duration {
    debug_assert!(attempt >= 1);
    Duration::from_secs_f64(2f64.powi(attempt as i32 - 1))
}

/// Opens a session with reconnection, dropping in-flight audio while a
/// reconnect attempt is outstanding. Returns an error if reconnection is
/// exhausted, in which case the caller should fail the call.
pub async fn open_with_reconnect(
    provider: &dyn SttProvider,
    model: &str,
    vad_threshold: f32,
    silence_duration_ms: u32,
    events: mpsc::Sender<SttEvent>,
    cancel: CancellationToken,
) -> Result<Box<dyn SttSession>> {
    let mut attempt = 0;
    loop {
        match provider
            .open(
                model,
                vad_threshold,
                silence_duration_ms,
                events.clone(),
                cancel.clone(),
            )
            .await
        {
            Ok(session) => return Ok(session),
            Err(e) => {
                attempt += 1;
                if attempt > MAX_RECONNECT_ATTEMPTS {
                    return Err(BridgeError::UpstreamUnavailable(anyhow::anyhow!(
                        "STT reconnection exhausted after {attempt} attempts: {e}"
                    )));
                }
                warn!(attempt, "STT connect failed, backing off: {e}");
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
        }
    }
}
