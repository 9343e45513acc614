//! Upstream adapters
//!
//! Concrete clients for the cloud speech/agent services configured under
//! `[upstream]`: a chat-completions agent engine and a speech-synthesis
//! endpoint over `reqwest`, and streaming transcription and realtime-voice
//! sockets over `tokio-tungstenite`. Everything else in this crate talks to
//! these only through the `AgentEngine`, `TtsAdapter`, `SttProvider`, and
//! `RealtimeConnection` traits, so a test double never needs a live network.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::{RealtimeConfig, TtsConfig, UpstreamConfig};
use crate::controller::AgentEngine;
use crate::error::{BridgeError, Result};
use crate::realtime::{RealtimeConnection, RealtimeEvent};
use crate::stt::{SttEvent, SttProvider, SttSession};
use crate::tts::TtsAdapter;
use crate::types::{Turn, TurnRole};

/// Chat-completions agent engine, streamed over Server-Sent Events from an
/// OpenAI-compatible `/chat/completions` endpoint.
pub struct HttpAgentEngine {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpAgentEngine {
    pub fn new(config: &UpstreamConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatCompletionMessage>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatCompletionMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl AgentEngine for HttpAgentEngine {
    async fn stream_response(
        &self,
        history: &[Turn],
        user_text: &str,
        model: Option<&str>,
        system_prompt: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<String>> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        if let Some(prompt) = system_prompt {
            messages.push(ChatCompletionMessage { role: "system", content: prompt.to_string() });
        }
        for turn in history {
            let role = match turn.role {
                TurnRole::User => "user",
                TurnRole::Bot => "assistant",
            };
            messages.push(ChatCompletionMessage { role, content: turn.text.clone() });
        }
        messages.push(ChatCompletionMessage { role: "user", content: user_text.to_string() });

        let request = ChatRequest {
            model: model.unwrap_or("gpt-4o-mini"),
            messages,
            stream: true,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| BridgeError::UpstreamUnavailable(e.into()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::UpstreamProtocolError(format!(
                "agent engine returned {status}: {body}"
            )));
        }

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    chunk = stream.next() => {
                        let Some(Ok(chunk)) = chunk else { break };
                        buffer.push_str(&String::from_utf8_lossy(&chunk));
                        while let Some(pos) = buffer.find("\n\n") {
                            let event = buffer[..pos].to_string();
                            buffer.drain(..pos + 2);
                            for line in event.lines() {
                                let Some(data) = line.strip_prefix("data: ") else { continue };
                                if data == "[DONE]" {
                                    return;
                                }
                                if let Ok(parsed) = serde_json::from_str::<StreamResponse>(data) {
                                    if let Some(choice) = parsed.choices.first() {
                                        if let Some(content) = &choice.delta.content {
                                            if tx.send(content.clone()).await.is_err() {
                                                return;
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// Non-streaming text-to-speech adapter over `/audio/speech`, returning raw
/// 24 kHz 16-bit PCM.
pub struct HttpTtsAdapter {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    voice: String,
}

impl HttpTtsAdapter {
    pub fn new(config: &UpstreamConfig, tts: &TtsConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model: tts.model.clone(),
            voice: tts.voice.clone(),
        }
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'static str,
}

#[async_trait]
impl TtsAdapter for HttpTtsAdapter {
    async fn synthesize(&self, text: &str, cancellation: CancellationToken) -> Result<Vec<u8>> {
        let request = SpeechRequest {
            model: &self.model,
            voice: &self.voice,
            input: text,
            response_format: "pcm",
        };

        let send = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(BridgeError::Cancelled),
            result = send => result.map_err(|e| BridgeError::UpstreamUnavailable(e.into()))?,
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::UpstreamProtocolError(format!(
                "tts endpoint returned {status}: {body}"
            )));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| BridgeError::UpstreamUnavailable(e.into()))
    }
}

fn auth_header(api_key: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(&format!("Bearer {api_key}"))
        .map_err(|e| BridgeError::UpstreamProtocolError(format!("invalid upstream api key: {e}")))
}

/// Streaming transcription over a WebSocket, mirroring the realtime
/// transcription event names (`input_audio_buffer.append`,
/// `conversation.item.input_audio_transcription.{delta,completed}`,
/// `input_audio_buffer.speech_started`).
pub struct WsSttProvider {
    url: String,
    api_key: String,
}

impl WsSttProvider {
    pub fn new(config: &UpstreamConfig) -> Self {
        Self {
            url: config.stt_ws_url.clone(),
            api_key: config.api_key.clone(),
        }
    }
}

pub struct WsSttSession {
    outbound: mpsc::Sender<Vec<u8>>,
}

#[async_trait]
impl SttSession for WsSttSession {
    async fn send_frame(&self, pcm24: &[u8]) -> Result<()> {
        self.outbound
            .send(pcm24.to_vec())
            .await
            .map_err(|_| BridgeError::UpstreamUnavailable(anyhow::anyhow!("stt socket closed")))
    }

    async fn close(&self) {}
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum SttWireEvent {
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    Delta { delta: String },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    Completed { transcript: String },
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,
    #[serde(other)]
    Other,
}

#[async_trait]
impl SttProvider for WsSttProvider {
    async fn open(
        &self,
        _model: &str,
        _vad_threshold: f32,
        _silence_duration_ms: u32,
        events: mpsc::Sender<SttEvent>,
        cancel: CancellationToken,
    ) -> Result<Box<dyn SttSession>> {
        let mut request = self
            .url
            .clone()
            .into_client_request()
            .map_err(|e| BridgeError::UpstreamProtocolError(format!("invalid stt url: {e}")))?;
        request.headers_mut().insert("Authorization", auth_header(&self.api_key)?);

        let (ws_stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| BridgeError::UpstreamUnavailable(anyhow::anyhow!("stt websocket connect failed: {e}")))?;
        let (mut write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Vec<u8>>(32);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    frame = outbound_rx.recv() => {
                        let Some(pcm24) = frame else { break };
                        let payload = json!({
                            "type": "input_audio_buffer.append",
                            "audio": crate::codec::encode_audio_payload(&pcm24),
                        });
                        if write.send(WsMessage::Text(payload.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    msg = read.next() => {
                        match msg {
                            Some(Ok(WsMessage::Text(text))) => {
                                if let Ok(event) = serde_json::from_str::<SttWireEvent>(&text) {
                                    let mapped = match event {
                                        SttWireEvent::Delta { delta } => Some(SttEvent::Partial(delta)),
                                        SttWireEvent::Completed { transcript } => Some(SttEvent::Final(transcript)),
                                        SttWireEvent::SpeechStarted => Some(SttEvent::UserSpeaking),
                                        SttWireEvent::Other => None,
                                    };
                                    if let Some(event) = mapped {
                                        if events.send(event).await.is_err() {
                                            break;
                                        }
                                    }
                                }
                            }
                            Some(Ok(WsMessage::Close(_))) | None => break,
                            Some(Err(e)) => {
                                warn!("stt websocket error: {e}");
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }
        });

        Ok(Box::new(WsSttSession { outbound: outbound_tx }))
    }
}

/// Bidirectional realtime-voice socket. `connect` spawns the read pump that
/// turns upstream wire events into [`RealtimeEvent`]s on `events`; the
/// returned handle is the write side used by [`RealtimeConnection`].
pub struct WsRealtimeConnection {
    outbound: mpsc::Sender<serde_json::Value>,
}

impl WsRealtimeConnection {
    pub async fn connect(
        config: &UpstreamConfig,
        realtime: &RealtimeConfig,
        events: mpsc::Sender<RealtimeEvent>,
    ) -> Result<Arc<Self>> {
        let url = format!("{}?model={}", config.realtime_ws_url, realtime.model);
        let mut request = url
            .into_client_request()
            .map_err(|e| BridgeError::UpstreamProtocolError(format!("invalid realtime url: {e}")))?;
        request.headers_mut().insert("Authorization", auth_header(&config.api_key)?);

        let (ws_stream, _) = tokio_tungstenite::connect_async(request).await.map_err(|e| {
            BridgeError::UpstreamUnavailable(anyhow::anyhow!("realtime websocket connect failed: {e}"))
        })?;
        let (mut write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<serde_json::Value>(32);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    cmd = outbound_rx.recv() => {
                        let Some(cmd) = cmd else { break };
                        if write.send(WsMessage::Text(cmd.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    msg = read.next() => {
                        match msg {
                            Some(Ok(WsMessage::Text(text))) => {
                                if let Some(event) = parse_realtime_event(&text) {
                                    if events.send(event).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Some(Ok(WsMessage::Close(_))) | None => break,
                            Some(Err(e)) => {
                                warn!("realtime websocket error: {e}");
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }
        });

        Ok(Arc::new(Self { outbound: outbound_tx }))
    }

    async fn send_json(&self, value: serde_json::Value) -> Result<()> {
        self.outbound
            .send(value)
            .await
            .map_err(|_| BridgeError::UpstreamUnavailable(anyhow::anyhow!("realtime socket closed")))
    }
}

#[async_trait]
impl RealtimeConnection for WsRealtimeConnection {
    async fn configure_session(&self, voice: &str, instructions: Option<&str>) -> Result<()> {
        self.send_json(json!({
            "type": "session.update",
            "session": {
                "voice": voice,
                "instructions": instructions.unwrap_or_default(),
            }
        }))
        .await
    }

    async fn send_audio(&self, pcm24: &[u8]) -> Result<()> {
        self.send_json(json!({
            "type": "input_audio_buffer.append",
            "audio": crate::codec::encode_audio_payload(pcm24),
        }))
        .await
    }

    async fn create_response(&self) -> Result<()> {
        self.send_json(json!({ "type": "response.create" })).await
    }

    async fn send_tool_result(&self, call_id: &str, result: &str) -> Result<()> {
        self.send_json(json!({
            "type": "conversation.item.create",
            "item": {
                "type": "function_call_output",
                "call_id": call_id,
                "output": result,
            }
        }))
        .await
    }

    async fn close(&self) {
        let _ = self.send_json(json!({ "type": "session.close" })).await;
    }
}

fn parse_realtime_event(text: &str) -> Option<RealtimeEvent> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    match value.get("type")?.as_str()? {
        "response.audio.delta" => {
            let b64 = value.get("delta")?.as_str()?;
            let pcm24 = base64::engine::general_purpose::STANDARD.decode(b64).ok()?;
            Some(RealtimeEvent::AudioDelta(pcm24))
        }
        "response.function_call_arguments.done" => Some(RealtimeEvent::ToolCall {
            call_id: value.get("call_id")?.as_str()?.to_string(),
            name: value.get("name")?.as_str()?.to_string(),
            arguments: value.get("arguments").and_then(|a| a.as_str()).unwrap_or("").to_string(),
        }),
        "conversation.item.input_audio_transcription.completed" => {
            Some(RealtimeEvent::TranscriptFinal(value.get("transcript")?.as_str()?.to_string()))
        }
        "input_audio_buffer.speech_started" => Some(RealtimeEvent::UserSpeaking),
        "response.done" => Some(RealtimeEvent::ResponseDone),
        "response.cancelled" => Some(RealtimeEvent::ResponseCancelled),
        "error" => Some(RealtimeEvent::Error(
            value
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("unknown upstream error")
                .to_string(),
        )),
        _ => None,
    }
}
