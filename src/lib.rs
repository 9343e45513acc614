//! Voice Bridge -- a real-time voice-call bridge between a media gateway and
//! cloud speech-to-text, text-to-speech, and agent services.
//!
//! # Example
//!
//! ```ignore
//! use voicebridge::config::Config;
//! use voicebridge::gateway::Gateway;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let mut gateway = Gateway::new(config);
//!     gateway.run().await
//! }
//! ```

pub mod types;
pub mod error;
pub mod config;
pub mod codec;
pub mod audio;
pub mod chunker;
pub mod stt;
pub mod tts;
pub mod queue;
pub mod scheduler;
pub mod pacer;
pub mod registry;
pub mod authorizer;
pub mod recorder;
pub mod outbound;
pub mod controller;
pub mod realtime;
pub mod server;
pub mod gateway;
pub mod cli;
pub mod upstream;

pub use config::Config;
pub use error::{BridgeError, Result};
pub use gateway::Gateway;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

pub fn info() -> String {
    format!("{NAME} v{VERSION} -- real-time voice-call bridge")
}
