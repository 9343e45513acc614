//! Chunked Voice Controller
//!
//! Orchestrates the agent-engine text stream through the sentence chunker,
//! TTS scheduler, ordered audio queue, and playout pacer. Owns barge-in,
//! echo suppression, and the `idle -> streaming -> draining -> idle` state
//! machine for one call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunker::Chunker;
use crate::codec::ServerMessage;
use crate::queue::OrderedAudioQueue;
use crate::pacer::PlayoutPacer;
use crate::recorder::{LifecycleEvent, SessionRecorder};
use crate::registry::Session;
use crate::scheduler::TtsScheduler;
use crate::tts::TtsAdapter;
use crate::types::{AudioFrame, Turn, TurnRole, MAX_TRANSCRIPT_TURNS};

/// Streams a text response from the agent engine for one user turn.
#[async_trait]
pub trait AgentEngine: Send + Sync {
    /// Returns a channel of text deltas. The channel closes when the
    /// response is complete or when `cancel` fires.
    async fn stream_response(
        &self,
        history: &[Turn],
        user_text: &str,
        model: Option<&str>,
        system_prompt: Option<&str>,
        cancel: CancellationToken,
    ) -> crate::error::Result<mpsc::Receiver<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Streaming,
    Draining,
}

pub struct ChunkedVoiceController {
    session: Arc<Session>,
    queue: Arc<OrderedAudioQueue>,
    pacer: Arc<PlayoutPacer>,
    scheduler: Arc<TtsScheduler>,
    tts: Arc<dyn TtsAdapter>,
    agent: Arc<dyn AgentEngine>,
    out: mpsc::Sender<AudioFrame>,
    control: mpsc::Sender<ServerMessage>,
    recorder: Arc<SessionRecorder>,

    state: AsyncMutex<ControllerState>,
    transcript: AsyncMutex<Vec<Turn>>,
    is_playing_audio: AtomicBool,
    playout_started_at: std::sync::Mutex<Option<Instant>>,
    last_flush_time: std::sync::Mutex<Option<Instant>>,
    response_token: std::sync::Mutex<Option<CancellationToken>>,

    min_chars: usize,
    max_chars: usize,
    jitter_buffer_frames: usize,
    response_timeout: Duration,
}

impl ChunkedVoiceController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: Arc<Session>,
        queue: Arc<OrderedAudioQueue>,
        pacer: Arc<PlayoutPacer>,
        scheduler: Arc<TtsScheduler>,
        tts: Arc<dyn TtsAdapter>,
        agent: Arc<dyn AgentEngine>,
        out: mpsc::Sender<AudioFrame>,
        control: mpsc::Sender<ServerMessage>,
        recorder: Arc<SessionRecorder>,
        min_chars: usize,
        max_chars: usize,
        jitter_buffer_frames: usize,
        response_timeout: Duration,
    ) -> Self {
        Self {
            session,
            queue,
            pacer,
            scheduler,
            tts,
            agent,
            out,
            control,
            recorder,
            state: AsyncMutex::new(ControllerState::Idle),
            transcript: AsyncMutex::new(Vec::new()),
            is_playing_audio: AtomicBool::new(false),
            playout_started_at: std::sync::Mutex::new(None),
            last_flush_time: std::sync::Mutex::new(None),
            response_token: std::sync::Mutex::new(None),
            min_chars,
            max_chars,
            jitter_buffer_frames,
            response_timeout,
        }
    }

    pub async fn state(&self) -> ControllerState {
        *self.state.lock().await
    }

    /// Handles a final STT transcript: starts a new response.
    pub async fn on_final_transcript(&self, text: String, model: Option<&str>, system_prompt: Option<&str>) {
        self.push_turn(TurnRole::User, text.clone()).await;

        let response_token = self.session.new_response_token();
        *self.response_token.lock().unwrap() = Some(response_token.clone());
        *self.state.lock().await = ControllerState::Streaming;
        self.queue.reset();

        let history = self.transcript.lock().await.clone();

        let stream_result = tokio::time::timeout(
            self.response_timeout,
            self.agent.stream_response(&history, &text, model, system_prompt, response_token.clone()),
        )
        .await;

        let mut receiver = match stream_result {
            Ok(Ok(rx)) => rx,
            Ok(Err(e)) => {
                warn!(call_id = %self.session.call_id, "agent engine failed to start: {e}");
                *self.state.lock().await = ControllerState::Idle;
                return;
            }
            Err(_) => {
                warn!(call_id = %self.session.call_id, "agent engine response timed out");
                *self.state.lock().await = ControllerState::Idle;
                return;
            }
        };

        let mut chunker = Chunker::new(self.min_chars, self.max_chars);
        let mut full_response = String::new();

        while let Some(delta) = receiver.recv().await {
            if response_token.is_cancelled() {
                break;
            }
            full_response.push_str(&delta);
            for chunk in chunker.push(&delta) {
                self.scheduler
                    .schedule(chunk, self.tts.clone(), self.queue.clone(), response_token.clone());
            }
        }

        if !response_token.is_cancelled() {
            if let Some(chunk) = chunker.finish() {
                self.scheduler
                    .schedule(chunk, self.tts.clone(), self.queue.clone(), response_token.clone());
            }
        }
        self.queue.mark_settled();

        if !full_response.is_empty() {
            self.push_turn(TurnRole::Bot, full_response).await;
        }

        self.drain_to_idle(response_token).await;
    }

    /// Emits `text` verbatim as a single utterance (used for the configured
    /// inbound greeting).
    pub async fn speak(&self, text: String) {
        *self.state.lock().await = ControllerState::Streaming;
        let response_token = self.session.new_response_token();
        *self.response_token.lock().unwrap() = Some(response_token.clone());
        self.queue.reset();

        let mut chunker = Chunker::new(self.min_chars, self.max_chars);
        for chunk in chunker.push(&text) {
            self.scheduler
                .schedule(chunk, self.tts.clone(), self.queue.clone(), response_token.clone());
        }
        if let Some(chunk) = chunker.finish() {
            self.scheduler
                .schedule(chunk, self.tts.clone(), self.queue.clone(), response_token.clone());
        }
        self.queue.mark_settled();
        self.drain_to_idle(response_token).await;
    }

    async fn drain_to_idle(&self, response_token: CancellationToken) {
        *self.state.lock().await = ControllerState::Draining;
        self.is_playing_audio.store(true, Ordering::SeqCst);
        *self.playout_started_at.lock().unwrap() = Some(Instant::now());

        let barged_in = self
            .pacer
            .drain(self.queue.clone(), self.out.clone(), response_token)
            .await;

        self.is_playing_audio.store(false, Ordering::SeqCst);
        if barged_in {
            debug!(call_id = %self.session.call_id, "drain cut short by barge-in");
        }
        *self.state.lock().await = ControllerState::Idle;
    }

    /// Called when the STT adapter reports the start of user speech. Fires
    /// barge-in unless we're within the echo-suppression window: the first
    /// frame of our own playout, for up to one jitter-buffer duration.
    pub async fn on_user_speaking(&self) {
        if !self.is_playing_audio.load(Ordering::SeqCst) {
            return;
        }

        if self.within_echo_suppression_window() {
            debug!(call_id = %self.session.call_id, "suppressing onUserSpeaking as echo");
            return;
        }

        self.barge_in().await;
    }

    fn within_echo_suppression_window(&self) -> bool {
        let Some(started) = *self.playout_started_at.lock().unwrap() else {
            return false;
        };
        let window = Duration::from_millis(20 * self.jitter_buffer_frames as u64);
        Instant::now().saturating_duration_since(started) < window
    }

    async fn barge_in(&self) {
        if let Some(token) = self.response_token.lock().unwrap().clone() {
            token.cancel();
        }
        self.queue.reset();
        *self.last_flush_time.lock().unwrap() = Some(Instant::now());
        info!(call_id = %self.session.call_id, "barge-in: cancelling current response");

        let flush = ServerMessage::Flush {
            call_id: self.session.call_id.as_str().to_string(),
        };
        if let Err(e) = self.control.send(flush).await {
            warn!(call_id = %self.session.call_id, "failed to send flush on barge-in: {e}");
        }
    }

    async fn push_turn(&self, role: TurnRole, text: String) {
        {
            let mut transcript = self.transcript.lock().await;
            transcript.push(Turn {
                role,
                text: text.clone(),
                timestamp: chrono::Utc::now(),
            });
            if transcript.len() > MAX_TRANSCRIPT_TURNS {
                let excess = transcript.len() - MAX_TRANSCRIPT_TURNS;
                transcript.drain(0..excess);
            }
        }

        let user_id = self
            .session
            .metadata
            .user_id
            .clone()
            .unwrap_or_else(|| self.session.call_id.as_str().to_string());
        let sender_name = Some(match role {
            TurnRole::User => "caller".to_string(),
            TurnRole::Bot => "bridge".to_string(),
        });
        self.recorder
            .record(LifecycleEvent::TranscriptFinal, &user_id, text, sender_name)
            .await;
    }

    pub async fn transcript(&self) -> Vec<Turn> {
        self.transcript.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ConnectionId, SessionRegistry};
    use crate::types::{CallId, CallerMetadata, Direction};

    struct EchoAdapter;
    #[async_trait]
    impl TtsAdapter for EchoAdapter {
        async fn synthesize(&self, text: &str, _cancellation: CancellationToken) -> crate::error::Result<Vec<u8>> {
            Ok(vec![0u8; text.len().max(1) * 100])
        }
    }

    struct CannedAgent {
        deltas: Vec<&'static str>,
    }

    #[async_trait]
    impl AgentEngine for CannedAgent {
        async fn stream_response(
            &self,
            _history: &[Turn],
            _user_text: &str,
            _model: Option<&str>,
            _system_prompt: Option<&str>,
            _cancel: CancellationToken,
        ) -> crate::error::Result<mpsc::Receiver<String>> {
            let (tx, rx) = mpsc::channel(16);
            for d in self.deltas.clone() {
                let _ = tx.send(d.to_string()).await;
            }
            Ok(rx)
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
    async fn full_response_cycles_back_to_idle() {
        let session = make_session();
        let queue = Arc::new(OrderedAudioQueue::new(1));
        let pacer = Arc::new(PlayoutPacer::new());
        let scheduler = Arc::new(TtsScheduler::new(3));
        let tts: Arc<dyn TtsAdapter> = Arc::new(EchoAdapter);
        let agent: Arc<dyn AgentEngine> = Arc::new(CannedAgent {
            deltas: vec!["Hello there. ", "How are you?"],
        });
        let (out_tx, mut out_rx) = mpsc::channel(64);
        let (control_tx, _control_rx) = mpsc::channel(4);

        let controller = ChunkedVoiceController::new(
            session,
            queue,
            pacer,
            scheduler,
            tts,
            agent,
            out_tx,
            control_tx,
            null_recorder(),
            5,
            40,
            1,
            Duration::from_secs(5),
        );

        controller.on_final_transcript("hi".to_string(), None, None).await;
        assert_eq!(controller.state().await, ControllerState::Idle);

        let mut received = 0;
        while out_rx.try_recv().is_ok() {
            received += 1;
        }
        assert!(received > 0);

        let transcript = controller.transcript().await;
        assert_eq!(transcript[0].role, TurnRole::User);
        assert_eq!(transcript[1].role, TurnRole::Bot);
    }

    #[tokio::test]
    async fn barge_in_cancels_token_clears_queue_and_sends_flush() {
        let session = make_session();
        let queue = Arc::new(OrderedAudioQueue::new(1));
        let pacer = Arc::new(PlayoutPacer::new());
        let scheduler = Arc::new(TtsScheduler::new(3));
        let tts: Arc<dyn TtsAdapter> = Arc::new(EchoAdapter);
        let agent: Arc<dyn AgentEngine> = Arc::new(CannedAgent { deltas: vec![] });
        let (out_tx, _out_rx) = mpsc::channel(64);
        let (control_tx, mut control_rx) = mpsc::channel(4);

        let controller = ChunkedVoiceController::new(
            session,
            queue,
            pacer,
            scheduler,
            tts,
            agent,
            out_tx,
            control_tx,
            null_recorder(),
            5,
            40,
            1,
            Duration::from_secs(5),
        );

        controller.is_playing_audio.store(true, Ordering::SeqCst);
        *controller.playout_started_at.lock().unwrap() = Some(Instant::now() - Duration::from_secs(10));
        let token = CancellationToken::new();
        *controller.response_token.lock().unwrap() = Some(token.clone());

        controller.on_user_speaking().await;
        assert!(token.is_cancelled());
        assert!(controller.queue.is_empty());
        let sent = control_rx.recv().await.unwrap();
        assert!(matches!(sent, ServerMessage::Flush { call_id } if call_id == "c1"));
    }

    #[tokio::test]
    async fn echo_suppression_ignores_speaking_during_first_frame() {
        let session = make_session();
        let queue = Arc::new(OrderedAudioQueue::new(25));
        let pacer = Arc::new(PlayoutPacer::new());
        let scheduler = Arc::new(TtsScheduler::new(3));
        let tts: Arc<dyn TtsAdapter> = Arc::new(EchoAdapter);
        let agent: Arc<dyn AgentEngine> = Arc::new(CannedAgent { deltas: vec![] });
        let (out_tx, _out_rx) = mpsc::channel(64);
        let (control_tx, _control_rx) = mpsc::channel(4);

        let controller = ChunkedVoiceController::new(
            session,
            queue,
            pacer,
            scheduler,
            tts,
            agent,
            out_tx,
            control_tx,
            null_recorder(),
            5,
            40,
            25,
            Duration::from_secs(5),
        );

        controller.is_playing_audio.store(true, Ordering::SeqCst);
        *controller.playout_started_at.lock().unwrap() = Some(Instant::now());
        let token = CancellationToken::new();
        *controller.response_token.lock().unwrap() = Some(token.clone());

        controller.on_user_speaking().await;
        assert!(!token.is_cancelled(), "echo during first frame should be suppressed");
    }
}
