//! Realtime voice agent: bidirectional low-latency mode used as an
//! alternative to the chunked STT/LLM/TTS pipeline when `tts-mode` selects
//! `realtime` (or `auto` picks it for a short enough turn).

pub mod session;
pub mod tools;

pub use session::{RealtimeAgent, RealtimeConnection, RealtimeEvent, ToolExecutor, UnavailableToolExecutor};
pub use tools::ToolPolicy;
