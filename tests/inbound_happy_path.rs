//! End-to-end scenario: an inbound call is authorized, greeted, and carries
//! one full user turn through to a spoken response before the call ends.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use voicebridge::authorizer::{self};
use voicebridge::config::{AuthorizationConfig, AuthorizationMode};
use voicebridge::controller::{AgentEngine, ChunkedVoiceController};
use voicebridge::error::Result;
use voicebridge::pacer::PlayoutPacer;
use voicebridge::queue::OrderedAudioQueue;
use voicebridge::recorder::{NullSessionStore, SessionRecorder};
use voicebridge::registry::{ConnectionId, SessionRegistry};
use voicebridge::scheduler::TtsScheduler;
use voicebridge::tts::TtsAdapter;
use voicebridge::types::{CallId, CallerMetadata, Direction, Turn, TurnRole};

struct EchoTts;

#[async_trait]
impl TtsAdapter for EchoTts {
    async fn synthesize(&self, text: &str, _cancellation: CancellationToken) -> Result<Vec<u8>> {
        Ok(vec![0u8; text.len().max(1) * 200])
    }
}

struct CannedAgent {
    reply: &'static str,
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
    ) -> Result<mpsc::Receiver<String>> {
        let (tx, rx) = mpsc::channel(8);
        let _ = tx.send(self.reply.to_string()).await;
        Ok(rx)
    }
}

#[tokio::test]
async fn inbound_call_is_authorized_greeted_and_answers_a_turn() {
    let metadata = CallerMetadata {
        tenant_id: Some("tenant-a".to_string()),
        user_id: Some("user-1".to_string()),
        ..Default::default()
    };
    let auth_config = AuthorizationConfig {
        mode: AuthorizationMode::Open,
        allow_pstn: true,
        ..Default::default()
    };
    let decision = authorizer::authorize(&CallId::parse("call-1").unwrap(), &metadata, &auth_config);
    assert!(decision.authorized, "inbound call should be authorized under open mode");

    let registry = SessionRegistry::new(5);
    let session = registry
        .create(
            CallId::parse("call-1").unwrap(),
            Direction::Inbound,
            metadata,
            ConnectionId::new(),
        )
        .unwrap();

    let queue = Arc::new(OrderedAudioQueue::new(5));
    let pacer = Arc::new(PlayoutPacer::new());
    let scheduler = Arc::new(TtsScheduler::new(3));
    let tts: Arc<dyn TtsAdapter> = Arc::new(EchoTts);
    let agent: Arc<dyn AgentEngine> = Arc::new(CannedAgent {
        reply: "Thanks for calling, how can I help?",
    });
    let (out_tx, mut out_rx) = mpsc::channel(128);
    let (control_tx, _control_rx) = mpsc::channel(8);

    let recorder = Arc::new(SessionRecorder::new(Arc::new(NullSessionStore)));

    let controller = ChunkedVoiceController::new(
        session.clone(),
        queue.clone(),
        pacer,
        scheduler,
        tts,
        agent,
        out_tx,
        control_tx,
        recorder,
        20,
        200,
        5,
        Duration::from_secs(5),
    );

    controller.speak("Welcome, please hold.".to_string()).await;
    let mut greeting_frames = 0;
    while out_rx.try_recv().is_ok() {
        greeting_frames += 1;
    }
    assert!(greeting_frames > 0, "greeting should have produced audio frames");

    controller
        .on_final_transcript("What are your hours?".to_string(), None, None)
        .await;

    let mut response_frames = 0;
    while out_rx.try_recv().is_ok() {
        response_frames += 1;
    }
    assert!(response_frames > 0, "response turn should have produced audio frames");

    let transcript = controller.transcript().await;
    assert_eq!(transcript[0].role, TurnRole::User);
    assert_eq!(transcript[0].text, "What are your hours?");
    assert_eq!(transcript[1].role, TurnRole::Bot);

    registry.remove(&CallId::parse("call-1").unwrap());
    assert!(session.session_token.is_cancelled());
    assert_eq!(registry.count(), 0);
}
