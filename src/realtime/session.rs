//! Realtime Voice Agent
//!
//! Drives one bidirectional realtime session: downstream model audio is
//! downsampled and forwarded to the gateway, tool calls are gated by
//! [`ToolPolicy`] and dispatched to a [`ToolExecutor`], and the whole session
//! is torn down once `max-session-duration-ms` elapses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::audio::downsample_24_to_16;
use crate::codec::ServerMessage;
use crate::error::{BridgeError, Result};
use crate::pacer::FLUSH_RECOVERY_MS;
use crate::realtime::tools::{clamp_result, ToolPolicy};
use crate::recorder::{LifecycleEvent, SessionRecorder};
use crate::registry::Session;
use crate::types::{AudioFrame, FRAME_BYTES_16K};

/// Events surfaced by a realtime model connection, in arrival order.
#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    AudioDelta(Vec<u8>),
    ToolCall { call_id: String, name: String, arguments: String },
    TranscriptFinal(String),
    UserSpeaking,
    ResponseDone,
    ResponseCancelled,
    Error(String),
}

/// Sends data back toward the realtime model.
#[async_trait]
pub trait RealtimeConnection: Send + Sync {
    /// Sets the session's voice and system instructions before the first
    /// response is requested.
    async fn configure_session(&self, voice: &str, instructions: Option<&str>) -> Result<()>;
    /// Forwards one 24 kHz PCM frame of caller audio to the upstream session.
    async fn send_audio(&self, pcm24: &[u8]) -> Result<()>;
    /// Asks the upstream session to start generating a response.
    async fn create_response(&self) -> Result<()>;
    async fn send_tool_result(&self, call_id: &str, result: &str) -> Result<()>;
    async fn close(&self);
}

/// Executes a named tool call with JSON-encoded arguments.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, arguments: &str) -> Result<String>;
}

pub struct RealtimeAgent {
    session: Arc<Session>,
    connection: Arc<dyn RealtimeConnection>,
    tool_executor: Arc<dyn ToolExecutor>,
    policy: ToolPolicy,
    out: mpsc::Sender<AudioFrame>,
    control: mpsc::Sender<ServerMessage>,
    recorder: Arc<SessionRecorder>,
    max_session_duration: Duration,
    interrupted: AtomicBool,
    last_flush_time: std::sync::Mutex<Option<Instant>>,
}

impl RealtimeAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: Arc<Session>,
        connection: Arc<dyn RealtimeConnection>,
        tool_executor: Arc<dyn ToolExecutor>,
        policy: ToolPolicy,
        out: mpsc::Sender<AudioFrame>,
        control: mpsc::Sender<ServerMessage>,
        recorder: Arc<SessionRecorder>,
        max_session_duration: Duration,
    ) -> Self {
        Self {
            session,
            connection,
            tool_executor,
            policy,
            out,
            control,
            recorder,
            max_session_duration,
            interrupted: AtomicBool::new(false),
            last_flush_time: std::sync::Mutex::new(None),
        }
    }

    /// Consumes `events` until the model signals completion, the session is
    /// cancelled, or the max session duration elapses.
    pub async fn run(&self, mut events: mpsc::Receiver<RealtimeEvent>) {
        let deadline = Instant::now() + self.max_session_duration;

        loop {
            tokio::select! {
                biased;
                _ = self.session.session_token.cancelled() => {
                    info!(call_id = %self.session.call_id, "realtime session cancelled");
                    break;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(call_id = %self.session.call_id, "realtime session hit max duration, terminating");
                    self.connection.close().await;
                    break;
                }
                event = events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => break,
                    }
                }
            }
        }
    }

    async fn handle_event(&self, event: RealtimeEvent) {
        match event {
            RealtimeEvent::AudioDelta(pcm24) => {
                if self.interrupted.load(Ordering::SeqCst) || self.within_flush_recovery_window() {
                    debug_discard(&self.session, "discarding stale delta after barge-in");
                    return;
                }
                for frame in split_into_frames(downsample_24_to_16(&pcm24)) {
                    if self.out.send(frame).await.is_err() {
                        warn!(call_id = %self.session.call_id, "outbound channel closed mid-response");
                    }
                }
            }
            RealtimeEvent::ToolCall { call_id, name, arguments } => {
                self.handle_tool_call(&call_id, &name, &arguments).await;
            }
            RealtimeEvent::TranscriptFinal(text) => {
                info!(call_id = %self.session.call_id, "realtime transcript: {text}");
                let user_id = self
                    .session
                    .metadata
                    .user_id
                    .clone()
                    .unwrap_or_else(|| self.session.call_id.as_str().to_string());
                self.recorder
                    .record(LifecycleEvent::TranscriptFinal, &user_id, text, Some("bridge".to_string()))
                    .await;
            }
            RealtimeEvent::UserSpeaking => {
                self.barge_in().await;
            }
            RealtimeEvent::ResponseDone => {
                info!(call_id = %self.session.call_id, "realtime response complete");
            }
            RealtimeEvent::ResponseCancelled => {
                self.interrupted.store(false, Ordering::SeqCst);
                info!(call_id = %self.session.call_id, "realtime response cancelled upstream, ready for next turn");
            }
            RealtimeEvent::Error(e) => {
                warn!(call_id = %self.session.call_id, "realtime upstream error: {e}");
            }
        }
    }

    /// VAD-detected start of user speech. The upstream endpoint cancels its
    /// own in-flight response; this side only discards buffered playout and
    /// tells the gateway to flush, then waits for `ResponseCancelled`.
    async fn barge_in(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        *self.last_flush_time.lock().unwrap() = Some(Instant::now());

        let flush = ServerMessage::Flush {
            call_id: self.session.call_id.as_str().to_string(),
        };
        if let Err(e) = self.control.send(flush).await {
            warn!(call_id = %self.session.call_id, "failed to send flush on barge-in: {e}");
        }
    }

    fn within_flush_recovery_window(&self) -> bool {
        let Some(last_flush) = *self.last_flush_time.lock().unwrap() else {
            return false;
        };
        Instant::now().saturating_duration_since(last_flush) < Duration::from_millis(FLUSH_RECOVERY_MS)
    }

    async fn handle_tool_call(&self, call_id: &str, name: &str, arguments: &str) {
        if !self.policy.is_allowed(name) {
            warn!(call_id = %self.session.call_id, tool = name, "tool call denied by policy");
            let _ = self
                .connection
                .send_tool_result(call_id, "this tool is not permitted during a voice call")
                .await;
            return;
        }

        let result = match self.tool_executor.execute(name, arguments).await {
            Ok(r) => clamp_result(&r),
            Err(e) => format!("tool execution failed: {e}"),
        };
        if let Err(e) = self.connection.send_tool_result(call_id, &result).await {
            warn!(call_id = %self.session.call_id, "failed to send tool result: {e}");
            return;
        }
        if let Err(e) = self.connection.create_response().await {
            warn!(call_id = %self.session.call_id, "failed to request response after tool result: {e}");
        }
    }
}

fn debug_discard(session: &Session, msg: &str) {
    tracing::debug!(call_id = %session.call_id, "{msg}");
}

/// Reports every call as unsupported. Used until a deployment wires up a
/// real tool backend; `ToolPolicy` denials are handled before this is ever
/// reached for a disallowed name.
pub struct UnavailableToolExecutor;

#[async_trait]
impl ToolExecutor for UnavailableToolExecutor {
    async fn execute(&self, _name: &str, _arguments: &str) -> Result<String> {
        Err(BridgeError::Disabled("no tool executor configured for this deployment".to_string()))
    }
}

fn split_into_frames(pcm16: Vec<u8>) -> Vec<AudioFrame> {
    pcm16
        .chunks(FRAME_BYTES_16K)
        .map(|c| AudioFrame::new(crate::audio::pad_to(c.to_vec(), FRAME_BYTES_16K)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolPolicyConfig;
    use crate::registry::{ConnectionId, SessionRegistry};
    use crate::types::{CallId, CallerMetadata, Direction};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingConnection {
        results: std::sync::Mutex<Vec<(String, String)>>,
        closed: AtomicUsize,
    }

    #[async_trait]
    impl RealtimeConnection for RecordingConnection {
        async fn configure_session(&self, _voice: &str, _instructions: Option<&str>) -> Result<()> {
            Ok(())
        }
        async fn send_audio(&self, _pcm24: &[u8]) -> Result<()> {
            Ok(())
        }
        async fn create_response(&self) -> Result<()> {
            Ok(())
        }
        async fn send_tool_result(&self, call_id: &str, result: &str) -> Result<()> {
            self.results
                .lock()
                .unwrap()
                .push((call_id.to_string(), result.to_string()));
            Ok(())
        }
        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct EchoExecutor;

    #[async_trait]
    impl ToolExecutor for EchoExecutor {
        async fn execute(&self, name: &str, arguments: &str) -> Result<String> {
            Ok(format!("{name}:{arguments}"))
        }
    }

    fn make_session() -> Arc<Session> {
        let registry = SessionRegistry::new(5);
        registry
            .create(
                CallId::parse("c1").unwrap(),
                Direction::Inbound,
                CallerMetadata::default(),
                ConnectionId::new(),
            )
            .unwrap()
    }

    fn null_recorder() -> Arc<SessionRecorder> {
        Arc::new(SessionRecorder::new(Arc::new(crate::recorder::NullSessionStore)))
    }

    #[tokio::test]
    async fn allowed_tool_call_executes_and_replies() {
        let session = make_session();
        let connection = Arc::new(RecordingConnection {
            results: std::sync::Mutex::new(Vec::new()),
            closed: AtomicUsize::new(0),
        });
        let (out_tx, _out_rx) = mpsc::channel(16);
        let (control_tx, _control_rx) = mpsc::channel(4);
        let agent = RealtimeAgent::new(
            session,
            connection.clone(),
            Arc::new(EchoExecutor),
            ToolPolicy::from_config(&ToolPolicyConfig::default()),
            out_tx,
            control_tx,
            null_recorder(),
            Duration::from_secs(60),
        );

        let (tx, rx) = mpsc::channel(4);
        tx.send(RealtimeEvent::ToolCall {
            call_id: "t1".to_string(),
            name: "search".to_string(),
            arguments: "weather".to_string(),
        })
        .await
        .unwrap();
        drop(tx);
        agent.run(rx).await;

        let results = connection.results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1, "search:weather");
    }

    #[tokio::test]
    async fn denied_tool_call_never_reaches_executor() {
        let session = make_session();
        let connection = Arc::new(RecordingConnection {
            results: std::sync::Mutex::new(Vec::new()),
            closed: AtomicUsize::new(0),
        });
        let (out_tx, _out_rx) = mpsc::channel(16);
        let (control_tx, _control_rx) = mpsc::channel(4);
        let agent = RealtimeAgent::new(
            session,
            connection.clone(),
            Arc::new(EchoExecutor),
            ToolPolicy::from_config(&ToolPolicyConfig::default()),
            out_tx,
            control_tx,
            null_recorder(),
            Duration::from_secs(60),
        );

        let (tx, rx) = mpsc::channel(4);
        tx.send(RealtimeEvent::ToolCall {
            call_id: "t1".to_string(),
            name: "execute_shell".to_string(),
            arguments: "rm -rf /".to_string(),
        })
        .await
        .unwrap();
        drop(tx);
        agent.run(rx).await;

        let results = connection.results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].1.contains("not permitted"));
    }

    #[tokio::test(start_paused = true)]
    async fn session_terminates_after_max_duration() {
        let session = make_session();
        let connection = Arc::new(RecordingConnection {
            results: std::sync::Mutex::new(Vec::new()),
            closed: AtomicUsize::new(0),
        });
        let (out_tx, _out_rx) = mpsc::channel(16);
        let (control_tx, _control_rx) = mpsc::channel(4);
        let agent = RealtimeAgent::new(
            session,
            connection.clone(),
            Arc::new(EchoExecutor),
            ToolPolicy::from_config(&ToolPolicyConfig::default()),
            out_tx,
            control_tx,
            null_recorder(),
            Duration::from_millis(50),
        );

        let (_tx, rx) = mpsc::channel(4);
        agent.run(rx).await;
        assert_eq!(connection.closed.load(Ordering::SeqCst), 1);
    }
}
