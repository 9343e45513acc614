//! Sentence Chunker
//!
//! Splits streamed LLM text into chunks whose length lies within
//! `[min-chars, max-chars]`, preferring sentence-boundary characters.

const BOUNDARY_CHARS: [char; 5] = ['.', '!', '?', '\n', '\u{2014}'];

/// One chunk of text with its dense, response-local sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub seq: u64,
    pub text: String,
}

/// Accumulates streamed text deltas and emits chunks as soon as enough text
/// has arrived to satisfy a boundary. Call [`push`](Chunker::push) for each
/// delta and [`finish`](Chunker::finish) once the stream ends to flush the
/// remainder.
pub struct Chunker {
    min_chars: usize,
    max_chars: usize,
    buffer: String,
    next_seq: u64,
}

impl Chunker {
    pub fn new(min_chars: usize, max_chars: usize) -> Self {
        Self {
            min_chars,
            max_chars,
            buffer: String::new(),
            next_seq: 0,
        }
    }

    /// Appends a text delta and returns any chunks that can now be emitted.
    pub fn push(&mut self, delta: &str) -> Vec<Chunk> {
        self.buffer.push_str(delta);
        let mut chunks = Vec::new();
        while let Some(split_at) = self.find_split_point(false) {
            chunks.push(self.emit(split_at));
        }
        chunks
    }

    /// Flushes any remaining buffered text as a final chunk.
    pub fn finish(&mut self) -> Option<Chunk> {
        if self.buffer.is_empty() {
            return None;
        }
        let len = self.buffer.chars().count();
        Some(self.emit(len))
    }

    fn emit(&mut self, split_at_chars: usize) -> Chunk {
        let byte_idx = char_index_to_byte(&self.buffer, split_at_chars);
        let text: String = self.buffer.drain(..byte_idx).collect();
        let seq = self.next_seq;
        self.next_seq += 1;
        Chunk { seq, text }
    }

    /// Finds a split point (in chars), if the buffer is ready to emit one.
    /// `force` allows splitting even without a clean boundary, used by a
    /// future full-drain pass; unused here but kept for clarity at callers.
    fn find_split_point(&self, force: bool) -> Option<usize> {
        let total = self.buffer.chars().count();
        if total < self.min_chars && !force {
            return None;
        }

        // Prefer a sentence boundary at or after min_chars.
        if let Some(idx) = self.find_boundary_at_or_after(self.min_chars) {
            if idx <= self.max_chars {
                return Some(idx);
            }
        }

        if total <= self.max_chars {
            return None;
        }

        // No boundary within bounds: try the last whitespace before max_chars.
        if let Some(idx) = self.find_last_whitespace_before(self.max_chars) {
            return Some(idx);
        }

        // No whitespace either: hard cut at max_chars.
        Some(self.max_chars)
    }

    fn find_boundary_at_or_after(&self, min_chars: usize) -> Option<usize> {
        for (i, c) in self.buffer.chars().enumerate() {
            if i + 1 >= min_chars && BOUNDARY_CHARS.contains(&c) {
                return Some(i + 1);
            }
        }
        None
    }

    fn find_last_whitespace_before(&self, max_chars: usize) -> Option<usize> {
        let mut last = None;
        for (i, c) in self.buffer.chars().enumerate() {
            if i >= max_chars {
                break;
            }
            if c.is_whitespace() {
                last = Some(i + 1);
            }
        }
        last
    }
}

fn char_index_to_byte(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(b, _)| b)
        .unwrap_or(s.len())
}
