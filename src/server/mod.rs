//! Listener & Auth
//!
//! Accepts the gateway's WebSocket connection, gates it behind the shared
//! secret and a per-address rate limit, and dispatches decoded control
//! messages to the session registry, authorizer, and outbound coordinator.

pub mod auth;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::audio::upsample_16_to_24;
use crate::authorizer;
use crate::codec::{decode_audio_payload, decode_client_message, encode_audio_payload, ClientMessage, ServerMessage};
use crate::config::{Config, TtsMode};
use crate::controller::{AgentEngine, ChunkedVoiceController};
use crate::error::{BridgeError, Result};
use crate::outbound::{ConnectionSelector, ConnectionSink, OutboundCoordinator};
use crate::pacer::PlayoutPacer;
use crate::queue::OrderedAudioQueue;
use crate::realtime::{RealtimeAgent, RealtimeConnection, ToolPolicy, UnavailableToolExecutor};
use crate::recorder::{LifecycleEvent, SessionRecorder};
use crate::registry::{ConnectionId, Session, SessionRegistry};
use crate::scheduler::TtsScheduler;
use crate::server::auth::RateLimiter;
use crate::stt::{self, SttEvent, SttProvider};
use crate::tts::TtsAdapter;
use crate::types::{AudioFrame, CallId, Direction, EndReason, CONVERSATION_IDLE_SECS};
use crate::upstream::{HttpAgentEngine, HttpTtsAdapter, WsRealtimeConnection, WsSttProvider};

const STALE_CONNECTION_MULTIPLIER: u32 = 2;
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const TIMEOUT_CHECK_INTERVAL: Duration = Duration::from_secs(10);

pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    pub outbound: Arc<OutboundCoordinator>,
    rate_limiter: RateLimiter,
    connections: Mutex<HashMap<ConnectionId, mpsc::Sender<ServerMessage>>>,
    audio_sinks: Mutex<HashMap<CallId, mpsc::Sender<AudioFrame>>>,
    agent: Arc<dyn AgentEngine>,
    tts: Arc<dyn TtsAdapter>,
    stt_provider: Arc<dyn SttProvider>,
    recorder: Arc<SessionRecorder>,
}

impl AppState {
    pub fn new(config: Arc<Config>, registry: Arc<SessionRegistry>, outbound: Arc<OutboundCoordinator>) -> Self {
        let agent: Arc<dyn AgentEngine> = Arc::new(HttpAgentEngine::new(&config.upstream));
        let tts: Arc<dyn TtsAdapter> = Arc::new(HttpTtsAdapter::new(&config.upstream, &config.tts));
        let stt_provider: Arc<dyn SttProvider> = Arc::new(WsSttProvider::new(&config.upstream));
        let recorder = Arc::new(SessionRecorder::new(Arc::new(crate::recorder::NullSessionStore)));
        Self {
            config,
            registry,
            outbound,
            rate_limiter: RateLimiter::new(),
            connections: Mutex::new(HashMap::new()),
            audio_sinks: Mutex::new(HashMap::new()),
            agent,
            tts,
            stt_provider,
            recorder,
        }
    }

    /// Registers where decoded inbound audio for `call_id` should be
    /// forwarded. Overwrites any previous registration for the same call.
    pub fn register_audio_sink(&self, call_id: CallId, sink: mpsc::Sender<AudioFrame>) {
        self.audio_sinks.lock().unwrap().insert(call_id, sink);
    }

    pub fn unregister_audio_sink(&self, call_id: &CallId) {
        self.audio_sinks.lock().unwrap().remove(call_id);
    }
}

#[async_trait::async_trait]
impl ConnectionSink for AppState {
    async fn send(&self, connection_id: ConnectionId, message: ServerMessage) -> Result<()> {
        let tx = self
            .connections
            .lock()
            .unwrap()
            .get(&connection_id)
            .cloned()
            .ok_or(BridgeError::GatewayNotConnected)?;
        tx.send(message)
            .await
            .map_err(|_| BridgeError::GatewayNotConnected)
    }
}

impl ConnectionSelector for AppState {
    /// Exactly one gateway connection is the common case; when more than one
    /// is live this simply picks whichever the map yields first rather than
    /// tracking a rotation cursor.
    fn pick_round_robin(&self) -> Option<ConnectionId> {
        self.connections.lock().unwrap().keys().next().copied()
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let path = state.config.serve.path.clone();
    Router::new().route(&path, get(ws_upgrade)).with_state(state)
}

async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if !state.rate_limiter.check(addr.ip()) {
        warn!(%addr, "rejected connection: rate limit exceeded");
        return (StatusCode::TOO_MANY_REQUESTS, "rate limited").into_response();
    }

    let provided = headers
        .get("x-bridge-secret")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !auth::verify_secret(provided, &state.config.bridge.secret) {
        warn!(%addr, "rejected connection: invalid shared secret");
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, addr: SocketAddr) {
    let connection_id = ConnectionId::new();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(64);
    state.connections.lock().unwrap().insert(connection_id, tx.clone());
    info!(%connection_id, %addr, "gateway connection established");

    let write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(e) => {
                    warn!("failed to serialize outbound message: {e}");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut last_activity = Instant::now();
    let mut health_check = tokio::time::interval(HEALTH_CHECK_INTERVAL);

    loop {
        tokio::select! {
            _ = health_check.tick() => {
                if last_activity.elapsed() > HEALTH_CHECK_INTERVAL * STALE_CONNECTION_MULTIPLIER {
                    warn!(%connection_id, "connection stale, closing");
                    break;
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = Instant::now();
                        if let Err(e) = dispatch(&text, connection_id, &state, &tx).await {
                            warn!(%connection_id, "message handling error: {e}");
                            if e.closes_connection() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(%connection_id, "websocket error: {e}");
                        break;
                    }
                }
            }
        }
    }

    state.connections.lock().unwrap().remove(&connection_id);
    let dropped = state.registry.remove_by_connection(connection_id);
    let failed_ids: Vec<CallId> = dropped.iter().map(|s| s.call_id.clone()).collect();
    for id in &failed_ids {
        state.unregister_audio_sink(id);
    }
    state.outbound.fail_for_connection(&failed_ids);
    write_task.abort();
    info!(%connection_id, "gateway connection closed");
}

async fn dispatch(
    raw: &str,
    connection_id: ConnectionId,
    state: &Arc<AppState>,
    tx: &mpsc::Sender<ServerMessage>,
) -> Result<()> {
    let msg = decode_client_message(raw)?;

    match msg {
        ClientMessage::AuthRequest { call_id, correlation_id, metadata } => {
            let parsed = CallId::parse(&call_id).ok_or_else(|| BridgeError::Protocol(format!("invalid callId: {call_id}")))?;
            let decision = authorizer::authorize(&parsed, &metadata, &state.config.authorization);
            let response = ServerMessage::AuthResponse {
                call_id,
                correlation_id,
                authorized: decision.authorized,
                reason: decision.reason,
                strategy: decision.strategy.as_str().to_string(),
                timestamp: chrono::Utc::now().timestamp_millis(),
            };
            tx.send(response).await.map_err(|_| BridgeError::GatewayNotConnected)?;
        }
        ClientMessage::SessionStart { call_id, direction, metadata } => {
            let parsed = CallId::parse(&call_id).ok_or_else(|| BridgeError::Protocol(format!("invalid callId: {call_id}")))?;
            match state.registry.create(parsed.clone(), direction, metadata, connection_id) {
                Ok(session) => {
                    state.outbound.resolve_session_start(&parsed, direction);
                    spawn_timeout_guard(state.clone(), session.clone());
                    tokio::spawn(spawn_call_pipeline(state.clone(), session));
                }
                Err(e) => warn!(call_id = %parsed, "failed to create session: {e}"),
            }
        }
        ClientMessage::CallStatus { call_id, status, error } => {
            let parsed = CallId::parse(&call_id).ok_or_else(|| BridgeError::Protocol(format!("invalid callId: {call_id}")))?;
            state.outbound.resolve_call_status(&parsed, status, error);
        }
        ClientMessage::AudioIn { call_id, seq, data } => {
            let parsed = CallId::parse(&call_id).ok_or_else(|| BridgeError::Protocol(format!("invalid callId: {call_id}")))?;
            let Some(session) = state.registry.get(&parsed) else {
                debug!(call_id = %parsed, "audio_in for unknown session, dropping");
                return Ok(());
            };
            if !session.is_bound_to(connection_id) {
                debug!(call_id = %parsed, "audio_in from a non-bound connection, dropping");
                return Ok(());
            }
            session.last_recv_seq.next();
            session.frames_received.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            session.touch();
            let pcm16 = decode_audio_payload(&data)?;
            let sink = state.audio_sinks.lock().unwrap().get(&parsed).cloned();
            if let Some(sink) = sink {
                let _ = sink.send(AudioFrame::new(pcm16)).await;
            } else {
                debug!(call_id = %parsed, seq, "no audio sink registered, dropping frame");
            }
        }
        ClientMessage::SessionEnd { call_id, reason } => {
            let parsed = CallId::parse(&call_id).ok_or_else(|| BridgeError::Protocol(format!("invalid callId: {call_id}")))?;
            state.unregister_audio_sink(&parsed);
            if let Some(session) = state.registry.remove(&parsed) {
                let user_id = session
                    .metadata
                    .user_id
                    .clone()
                    .unwrap_or_else(|| session.call_id.as_str().to_string());
                state
                    .recorder
                    .record(LifecycleEvent::CallEnd, &user_id, format!("call ended: {reason:?}"), None)
                    .await;
            }
        }
        ClientMessage::SessionResume { call_id, last_received_seq: _ } => {
            let parsed = CallId::parse(&call_id).ok_or_else(|| BridgeError::Protocol(format!("invalid callId: {call_id}")))?;
            if state.registry.rebind(&parsed, connection_id).is_none() {
                warn!(call_id = %parsed, "session_resume for unknown call-id");
            }
        }
        ClientMessage::Ping { call_id } => {
            tx.send(ServerMessage::Pong { call_id }).await.map_err(|_| BridgeError::GatewayNotConnected)?;
        }
    }

    Ok(())
}

/// Watches one session for the idle and max-duration limits and tears it
/// down with `SessionEndReason::Timeout` when either fires. Exits on its own
/// once the session is removed through any other path.
fn spawn_timeout_guard(state: Arc<AppState>, session: Arc<Session>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(TIMEOUT_CHECK_INTERVAL);
        loop {
            tokio::select! {
                _ = session.session_token.cancelled() => break,
                _ = ticker.tick() => {
                    let max_duration = chrono::Duration::seconds(state.config.max_duration_seconds as i64);
                    let call_duration_exceeded = chrono::Utc::now() - session.started_at > max_duration;
                    let idle_exceeded = session.idle_for().as_secs() as i64 > CONVERSATION_IDLE_SECS;
                    if call_duration_exceeded || idle_exceeded {
                        end_session_for_timeout(&state, &session).await;
                        break;
                    }
                }
            }
        }
    });
}

async fn end_session_for_timeout(state: &Arc<AppState>, session: &Arc<Session>) {
    warn!(call_id = %session.call_id, reason = ?EndReason::Timeout, "ending session: timed out");
    let _ = state
        .send(session.connection_id(), ServerMessage::Hangup { call_id: session.call_id.as_str().to_string() })
        .await;
    state.unregister_audio_sink(&session.call_id);
    state.registry.remove(&session.call_id);
}

/// Builds the voice pipeline for a freshly created session and registers its
/// audio sink, so that subsequent `audio_in` frames actually reach an STT or
/// realtime upstream instead of being dropped.
async fn spawn_call_pipeline(state: Arc<AppState>, session: Arc<Session>) {
    // `auto` resolves to the chunked pipeline; realtime is only used when
    // explicitly configured.
    if state.config.streaming.tts_mode == TtsMode::Realtime {
        spawn_realtime_pipeline(state, session).await;
    } else {
        spawn_chunked_pipeline(state, session).await;
    }
}

/// Forwards frames produced by a controller/agent back to the gateway as
/// `audio_out`, stamping each with the session's outbound sequence number.
fn spawn_outbound_forwarder(state: Arc<AppState>, session: Arc<Session>, mut out_rx: mpsc::Receiver<AudioFrame>) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = session.session_token.cancelled() => break,
                frame = out_rx.recv() => {
                    let Some(frame) = frame else { break };
                    let seq = session.last_sent_seq.next();
                    session.frames_sent.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    let message = ServerMessage::AudioOut {
                        call_id: session.call_id.as_str().to_string(),
                        seq,
                        data: encode_audio_payload(frame.bytes()),
                    };
                    if state.send(session.connection_id(), message).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
}

/// Forwards control-plane messages (currently only `flush` on barge-in) from
/// a controller/agent straight to the gateway connection.
fn spawn_control_forwarder(state: Arc<AppState>, session: Arc<Session>, mut control_rx: mpsc::Receiver<ServerMessage>) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = session.session_token.cancelled() => break,
                message = control_rx.recv() => {
                    let Some(message) = message else { break };
                    if state.send(session.connection_id(), message).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
}

async fn spawn_chunked_pipeline(state: Arc<AppState>, session: Arc<Session>) {
    let streaming = &state.config.streaming;
    let (out_tx, out_rx) = mpsc::channel(64);
    let (control_tx, control_rx) = mpsc::channel(16);
    spawn_outbound_forwarder(state.clone(), session.clone(), out_rx);
    spawn_control_forwarder(state.clone(), session.clone(), control_rx);

    let queue = Arc::new(OrderedAudioQueue::new(streaming.jitter_buffer_frames));
    let pacer = Arc::new(PlayoutPacer::new());
    let scheduler = Arc::new(TtsScheduler::new(streaming.max_parallel_tts));

    let controller = Arc::new(ChunkedVoiceController::new(
        session.clone(),
        queue,
        pacer,
        scheduler,
        state.tts.clone(),
        state.agent.clone(),
        out_tx,
        control_tx,
        state.recorder.clone(),
        streaming.sentence_min_chars,
        streaming.sentence_max_chars,
        streaming.jitter_buffer_frames,
        Duration::from_millis(state.config.response_timeout_ms),
    ));

    let (event_tx, mut event_rx) = mpsc::channel::<SttEvent>(64);
    let stt_session: Arc<dyn stt::SttSession> = match stt::open_with_reconnect(
        state.stt_provider.as_ref(),
        &streaming.stt_model,
        streaming.vad_threshold,
        streaming.silence_duration_ms,
        event_tx,
        session.session_token.clone(),
    )
    .await
    {
        Ok(s) => Arc::from(s),
        Err(e) => {
            warn!(call_id = %session.call_id, "failed to open STT session: {e}");
            return;
        }
    };

    let (audio_tx, mut audio_rx) = mpsc::channel::<AudioFrame>(64);
    state.register_audio_sink(session.call_id.clone(), audio_tx);

    let forward_session = session.clone();
    let forward_stt = stt_session.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = forward_session.session_token.cancelled() => break,
                frame = audio_rx.recv() => {
                    let Some(frame) = frame else { break };
                    let pcm24 = upsample_16_to_24(frame.bytes());
                    if forward_stt.send_frame(&pcm24).await.is_err() {
                        break;
                    }
                }
            }
        }
        forward_stt.close().await;
    });

    let event_session = session.clone();
    let event_controller = controller.clone();
    let response_model = state.config.response_model.clone();
    let response_system_prompt = state.config.response_system_prompt.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = event_session.session_token.cancelled() => break,
                event = event_rx.recv() => {
                    let Some(event) = event else { break };
                    event_session.touch();
                    match event {
                        SttEvent::Partial(_) => {}
                        SttEvent::Final(text) => {
                            event_controller
                                .on_final_transcript(text, response_model.as_deref(), response_system_prompt.as_deref())
                                .await;
                        }
                        SttEvent::UserSpeaking => event_controller.on_user_speaking().await,
                    }
                }
            }
        }
    });

    if session.direction == Direction::Inbound {
        if let Some(greeting) = state.config.inbound.greeting.clone() {
            controller.speak(greeting).await;
        }
    }
}

async fn spawn_realtime_pipeline(state: Arc<AppState>, session: Arc<Session>) {
    let (out_tx, out_rx) = mpsc::channel(64);
    let (control_tx, control_rx) = mpsc::channel(16);
    spawn_outbound_forwarder(state.clone(), session.clone(), out_rx);
    spawn_control_forwarder(state.clone(), session.clone(), control_rx);

    let (event_tx, event_rx) = mpsc::channel(64);
    let connection = match WsRealtimeConnection::connect(&state.config.upstream, &state.config.realtime, event_tx).await {
        Ok(c) => c,
        Err(e) => {
            warn!(call_id = %session.call_id, "failed to connect realtime session: {e}");
            return;
        }
    };

    if let Err(e) = connection
        .configure_session(&state.config.realtime.voice, state.config.response_system_prompt.as_deref())
        .await
    {
        warn!(call_id = %session.call_id, "failed to configure realtime session: {e}");
        return;
    }

    let agent = Arc::new(RealtimeAgent::new(
        session.clone(),
        connection.clone(),
        Arc::new(UnavailableToolExecutor),
        ToolPolicy::from_config(&state.config.realtime.tools),
        out_tx,
        control_tx,
        state.recorder.clone(),
        Duration::from_millis(state.config.realtime.max_session_duration_ms),
    ));

    let (audio_tx, mut audio_rx) = mpsc::channel::<AudioFrame>(64);
    state.register_audio_sink(session.call_id.clone(), audio_tx);

    let forward_session = session.clone();
    let forward_connection = connection.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = forward_session.session_token.cancelled() => break,
                frame = audio_rx.recv() => {
                    let Some(frame) = frame else { break };
                    let pcm24 = upsample_16_to_24(frame.bytes());
                    if forward_connection.send_audio(&pcm24).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    agent.run(event_rx).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthorizationConfig, AuthorizationMode};
    use crate::types::{CallerMetadata, Direction};

    fn test_state() -> Arc<AppState> {
        let mut config = Config {
            bridge: crate::config::BridgeConfig { secret: "a".repeat(32) },
            serve: Default::default(),
            inbound: Default::default(),
            outbound: Default::default(),
            tts: Default::default(),
            streaming: Default::default(),
            realtime: Default::default(),
            upstream: Default::default(),
            authorization: AuthorizationConfig {
                mode: AuthorizationMode::Open,
                ..Default::default()
            },
            max_concurrent_calls: 5,
            max_duration_seconds: 3600,
            response_model: None,
            response_system_prompt: None,
            response_timeout_ms: 15_000,
            logging: Default::default(),
        };
        config.authorization.allow_pstn = true;
        Arc::new(AppState::new(
            Arc::new(config),
            Arc::new(SessionRegistry::new(5)),
            Arc::new(OutboundCoordinator::new()),
        ))
    }

    #[tokio::test]
    async fn auth_request_produces_auth_response() {
        let state = test_state();
        let (tx, mut rx) = mpsc::channel(4);
        let raw = r#"{"type":"auth_request","callId":"c1","correlationId":"corr1","metadata":{"tenantId":"T1","userId":"U1"}}"#;
        dispatch(raw, ConnectionId::new(), &state, &tx).await.unwrap();
        let response = rx.recv().await.unwrap();
        assert!(matches!(response, ServerMessage::AuthResponse { authorized: true, .. }));
    }

    #[tokio::test]
    async fn session_start_creates_session_and_resolves_outbound() {
        let state = test_state();
        let connection_id = ConnectionId::new();
        let (tx, _rx) = mpsc::channel(4);
        let raw = r#"{"type":"session_start","callId":"c2","direction":"inbound","metadata":{}}"#;
        dispatch(raw, connection_id, &state, &tx).await.unwrap();
        assert!(state.registry.get(&CallId::parse("c2").unwrap()).is_some());
    }

    #[tokio::test]
    async fn ping_replies_with_pong() {
        let state = test_state();
        let (tx, mut rx) = mpsc::channel(4);
        let raw = r#"{"type":"ping","callId":"c3"}"#;
        dispatch(raw, ConnectionId::new(), &state, &tx).await.unwrap();
        let response = rx.recv().await.unwrap();
        assert!(matches!(response, ServerMessage::Pong { call_id } if call_id == "c3"));
    }

    #[tokio::test]
    async fn audio_in_drops_silently_for_unknown_session() {
        let state = test_state();
        let (tx, _rx) = mpsc::channel(4);
        let raw = r#"{"type":"audio_in","callId":"unknown","seq":0,"data":"AAAA"}"#;
        let result = dispatch(raw, ConnectionId::new(), &state, &tx).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn audio_in_forwards_to_registered_sink() {
        let state = test_state();
        let connection_id = ConnectionId::new();
        state
            .registry
            .create(CallId::parse("c4").unwrap(), Direction::Inbound, CallerMetadata::default(), connection_id)
            .unwrap();
        let (audio_tx, mut audio_rx) = mpsc::channel(4);
        state.register_audio_sink(CallId::parse("c4").unwrap(), audio_tx);

        let (tx, _rx) = mpsc::channel(4);
        let payload = crate::codec::encode_audio_payload(&[0u8; crate::types::FRAME_BYTES_16K]);
        let raw = format!(r#"{{"type":"audio_in","callId":"c4","seq":0,"data":"{payload}"}}"#);
        dispatch(&raw, connection_id, &state, &tx).await.unwrap();

        let frame = audio_rx.recv().await;
        assert!(frame.is_some());
    }

    #[tokio::test]
    async fn timeout_teardown_sends_hangup_and_removes_session() {
        let state = test_state();
        let connection_id = ConnectionId::new();
        let (tx, mut rx) = mpsc::channel(4);
        state.connections.lock().unwrap().insert(connection_id, tx.clone());

        let call_id = CallId::parse("c5").unwrap();
        let session = state
            .registry
            .create(call_id.clone(), Direction::Inbound, CallerMetadata::default(), connection_id)
            .unwrap();
        state.register_audio_sink(call_id.clone(), mpsc::channel(1).0);

        end_session_for_timeout(&state, &session).await;

        assert!(state.registry.get(&call_id).is_none());
        assert!(session.session_token.is_cancelled());
        let sent = rx.recv().await.unwrap();
        assert!(matches!(sent, ServerMessage::Hangup { call_id } if call_id == "c5"));
    }
}
