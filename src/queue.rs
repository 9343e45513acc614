//! Ordered Audio Queue
//!
//! Reassembles out-of-order TTS results into strict `chunk-seq` order for a
//! single pacer consumer, with a dual-trigger jitter gate on the first
//! dequeue of a response.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::types::AudioFrame;

struct Inner {
    next_expected_seq: u64,
    frames: BTreeMap<u64, VecDeque<AudioFrame>>,
    skipped: HashSet<u64>,
    total_queued: usize,
    first_dequeue_done: bool,
    settled: bool,
}

impl Inner {
    fn new() -> Self {
        Self {
            next_expected_seq: 0,
            frames: BTreeMap::new(),
            skipped: HashSet::new(),
            total_queued: 0,
            first_dequeue_done: false,
            settled: false,
        }
    }

    /// Advances `next_expected_seq` across any already-skipped, now-consecutive ids.
    fn advance_past_skipped(&mut self) {
        while self.skipped.remove(&self.next_expected_seq) {
            self.next_expected_seq += 1;
        }
    }
}

enum TakeResult {
    Frame(AudioFrame),
    Waiting,
    Done,
}

pub struct OrderedAudioQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    jitter_buffer_frames: usize,
}

impl OrderedAudioQueue {
    pub fn new(jitter_buffer_frames: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
            notify: Notify::new(),
            jitter_buffer_frames,
        }
    }

    /// Appends frames for `seq`. A chunk with zero frames (e.g. empty TTS
    /// output) is a legal no-op beyond bookkeeping.
    pub fn enqueue(&self, seq: u64, frames: Vec<AudioFrame>) {
        if frames.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.total_queued += frames.len();
        inner.frames.entry(seq).or_default().extend(frames);
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Marks `seq` as skipped (TTS failure or back-pressure drop).
    pub fn skip(&self, seq: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.skipped.insert(seq);
        if seq == inner.next_expected_seq {
            inner.advance_past_skipped();
        }
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Waits for and returns the next frame in strict sequence order. The
    /// first call of a response is gated by the jitter threshold; later
    /// calls return as soon as data for `next_expected_seq` arrives. Returns
    /// `None` once the response has been marked settled (see
    /// [`mark_settled`](Self::mark_settled)) and the queue has fully drained
    /// -- the signal a [`PlayoutPacer`](crate::pacer::PlayoutPacer) uses to
    /// stop its drain loop without polling.
    pub async fn dequeue(&self) -> Option<AudioFrame> {
        loop {
            match self.try_take_ready() {
                TakeResult::Frame(frame) => return Some(frame),
                TakeResult::Done => return None,
                TakeResult::Waiting => {}
            }
            self.notify.notified().await;
        }
    }

    fn try_take_ready(&self) -> TakeResult {
        let mut inner = self.inner.lock().unwrap();

        if !inner.first_dequeue_done {
            let has_head = inner
                .frames
                .get(&inner.next_expected_seq)
                .is_some_and(|f| !f.is_empty());
            let jitter_satisfied = inner.total_queued >= self.jitter_buffer_frames;
            if !has_head && !jitter_satisfied {
                return if inner.settled {
                    TakeResult::Done
                } else {
                    TakeResult::Waiting
                };
            }
            inner.first_dequeue_done = true;
        }

        loop {
            inner.advance_past_skipped();
            let seq = inner.next_expected_seq;
            match inner.frames.get_mut(&seq) {
                Some(list) if !list.is_empty() => {
                    let frame = list.pop_front().unwrap();
                    inner.total_queued = inner.total_queued.saturating_sub(1);
                    if list.is_empty() {
                        inner.frames.remove(&seq);
                    }
                    return TakeResult::Frame(frame);
                }
                Some(_) => {
                    // empty list left behind by a fully drained seq
                    inner.frames.remove(&seq);
                    inner.next_expected_seq += 1;
                    continue;
                }
                None if inner.settled => return TakeResult::Done,
                None => return TakeResult::Waiting,
            }
        }
    }

    /// Marks that no further chunks will be scheduled for the current
    /// response. Once the queue subsequently drains, `dequeue` resolves to
    /// `None` instead of waiting forever.
    pub fn mark_settled(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.settled = true;
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Resets all state for a new response (used on barge-in and at the
    /// start of each turn).
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = Inner::new();
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.total_queued == 0
    }
}
