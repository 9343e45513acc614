//! Typed error kinds for the bridge core.
//!
//! Library-level code returns `BridgeError`; composition-root code (`main.rs`,
//! `cli.rs`) wraps fallible setup in `anyhow::Result` with `.context(...)`
//! instead of introducing its own error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

/// One variant per abstract error kind.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Malformed message, oversize payload, or invalid identifier.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Bad shared secret, or an authorization decision that denied the call.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Sliding-window rate limit exceeded for a source address.
    #[error("rate limited")]
    RateLimited,

    /// No live connection available to carry an outbound request.
    #[error("gateway not connected")]
    GatewayNotConnected,

    /// A deadline elapsed: outbound ring, response generation, pong, send.
    #[error("timeout: {0}")]
    Timeout(String),

    /// STT/TTS/agent-engine network failure.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(#[source] anyhow::Error),

    /// Unexpected/invalid event shape from an upstream service.
    #[error("upstream protocol error: {0}")]
    UpstreamProtocolError(String),

    /// Cooperative cancellation; never surfaced to the end user.
    #[error("cancelled")]
    Cancelled,

    /// Feature gated off by configuration (e.g. outbound disabled).
    #[error("disabled: {0}")]
    Disabled(String),

    /// Invariant violation; logged at error level, ends only the affected call.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Whether this error, raised on the receive loop, should close the
    /// connection outright rather than simply being logged and continuing.
    pub fn closes_connection(&self) -> bool {
        matches!(self, BridgeError::Unauthorized(_))
    }
}
