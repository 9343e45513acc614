//! Playout Pacer
//!
//! Drives the outbound audio stream at exactly one frame per 20 ms with
//! drift-free scheduling, serialized so at most one drain loop runs per call
//! at any instant.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::queue::OrderedAudioQueue;
use crate::types::AudioFrame;

const FRAME_INTERVAL: Duration = Duration::from_millis(20);

/// Recovery window after a flush during which stray upstream deltas are
/// discarded rather than re-enqueued.
pub const FLUSH_RECOVERY_MS: u64 = 100;

pub struct PlayoutPacer {
    drain_guard: AsyncMutex<()>,
    frame_index: AtomicU64,
}

impl PlayoutPacer {
    pub fn new() -> Self {
        Self {
            drain_guard: AsyncMutex::new(()),
            frame_index: AtomicU64::new(0),
        }
    }

    /// Runs the drain loop for one response: dequeues frames from `queue`
    /// in strict order and sends each to `out` at its drift-free target
    /// time, stopping when the queue settles empty or `cancel` fires.
    /// Returns `true` if the drain was cut short by cancellation (barge-in).
    pub async fn drain(
        &self,
        queue: Arc<OrderedAudioQueue>,
        out: mpsc::Sender<AudioFrame>,
        cancel: CancellationToken,
    ) -> bool {
        let _guard = self.drain_guard.lock().await;
        self.frame_index.store(0, Ordering::SeqCst);
        let playback_start = Instant::now();
        let mut barged_in = false;

        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    barged_in = true;
                    break;
                }
                frame = queue.dequeue() => frame,
            };

            let Some(frame) = frame else {
                break;
            };

            let n = self.frame_index.fetch_add(1, Ordering::SeqCst);
            let target = playback_start + FRAME_INTERVAL * n as u32;
            let now = Instant::now();
            if target > now {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        barged_in = true;
                        break;
                    }
                    _ = tokio::time::sleep_until(target) => {}
                }
            }

            if out.send(frame).await.is_err() {
                debug!("outbound channel closed, stopping drain");
                break;
            }
        }

        barged_in
    }
}

impl Default for PlayoutPacer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(n: u8) -> AudioFrame {
        AudioFrame::new(vec![n; 640])
    }

    #[tokio::test(start_paused = true)]
    async fn drains_all_frames_in_order_and_settles() {
        let queue = Arc::new(OrderedAudioQueue::new(1));
        queue.enqueue(0, vec![frame(0), frame(1), frame(2)]);
        queue.mark_settled();

        let (tx, mut rx) = mpsc::channel(16);
        let pacer = PlayoutPacer::new();
        let cancel = CancellationToken::new();

        let barged_in = pacer.drain(queue, tx, cancel).await;
        assert!(!barged_in);

        let mut received = Vec::new();
        while let Ok(f) = rx.try_recv() {
            received.push(f.bytes()[0]);
        }
        assert_eq!(received, vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn barge_in_cancels_drain_promptly() {
        let queue = Arc::new(OrderedAudioQueue::new(1));
        // Enough frames that pacing would otherwise take multiple seconds.
        for i in 0..200u8 {
            queue.enqueue(i as u64, vec![frame(i)]);
        }

        let (tx, _rx) = mpsc::channel(256);
        let pacer = PlayoutPacer::new();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();

        let handle = tokio::spawn(async move { pacer.drain(queue, tx, cancel2).await });
        cancel.cancel();
        let barged_in = handle.await.unwrap();
        assert!(barged_in);
    }
}
