//! TTS Adapter
//!
//! Single-operation interface: synthesize text into a 24 kHz PCM buffer,
//! honoring cooperative cancellation at every suspension point.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, Result};

/// One second of silence at 24 kHz. Played in place of a failed synthesis
/// instead of retrying, so the turn still completes on schedule.
pub const COMFORT_TONE_SAMPLES: usize = 24_000;

#[async_trait]
pub trait TtsAdapter: Send + Sync {
    /// Synthesizes `text` into raw 24 kHz 16-bit PCM. Returns
    /// `BridgeError::Cancelled` if `cancellation` fires before completion.
    async fn synthesize(&self, text: &str, cancellation: CancellationToken) -> Result<Vec<u8>>;
}

/// Generates the comfort tone played in place of a failed synthesis.
pub fn comfort_tone() -> Vec<u8> {
    vec![0u8; COMFORT_TONE_SAMPLES * 2]
}

/// Runs `synthesize`, racing it against cancellation so an in-flight network
/// call is abandoned the moment the token fires.
pub async fn synthesize_cancellable(
    adapter: &dyn TtsAdapter,
    text: &str,
    cancellation: CancellationToken,
) -> Result<Vec<u8>> {
    tokio::select! {
        biased;
        _ = cancellation.cancelled() => Err(BridgeError::Cancelled),
        result = adapter.synthesize(text, cancellation.clone()) => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct SlowAdapter;

    #[async_trait]
    impl TtsAdapter for SlowAdapter {
        async fn synthesize(&self, _text: &str, _cancellation: CancellationToken) -> Result<Vec<u8>> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(vec![1, 2, 3])
        }
    }

    struct FastAdapter;

    #[async_trait]
    impl TtsAdapter for FastAdapter {
        async fn synthesize(&self, text: &str, _cancellation: CancellationToken) -> Result<Vec<u8>> {
            Ok(text.as_bytes().to_vec())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_short_circuits_a_slow_synth() {
        let cancel = CancellationToken::new();
        let adapter = SlowAdapter;
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move {
            synthesize_cancellable(&adapter, "hello", cancel2).await
        });
        cancel.cancel();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(BridgeError::Cancelled)));
    }

    #[tokio::test]
    async fn returns_synthesized_bytes() {
        let adapter = FastAdapter;
        let cancel = CancellationToken::new();
        let result = synthesize_cancellable(&adapter, "hi", cancel).await.unwrap();
        assert_eq!(result, b"hi");
    }

    #[test]
    fn comfort_tone_is_one_second_of_silence_at_24k() {
        let tone = comfort_tone();
        assert_eq!(tone.len(), COMFORT_TONE_SAMPLES * 2);
        assert!(tone.iter().all(|&b| b == 0));
    }
}
