//! Streaming sentence segmentation over text deltas
//!
//! Accumulates deltas and emits only sentences that are closed: a
//! segment is complete iff it is not the last segment, or its last
//! non-whitespace character is one of `.` `!` `?`. Segmentation
//! uses UAX #29 sentence bounds, which is robust enough against
//! common abbreviations for TTS chunking.

use parking_lot::Mutex;
use unicode_segmentation::UnicodeSegmentation;

fn ends_with_terminator(segment: &str) -> bool {
    matches!(segment.trim_end().chars().last(), Some('.' | '!' | '?'))
}

#[derive(Default)]
struct BufferState {
    /// Text not yet handed out; emitted sentences are drained so a
    /// later delta can never un-complete them.
    pending: String,
    /// Count of sentences emitted since construction/reset
    emitted: usize,
}

/// Stateful segmenter turning a delta stream into complete
/// sentences.
#[derive(Default)]
pub struct SentenceBuffer {
    inner: Mutex<BufferState>,
}

impl SentenceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `delta` and return the sentences newly completed by
    /// it, trimmed. Empty when the accumulator still ends in an open
    /// sentence.
    pub fn add(&self, delta: &str) -> Vec<String> {
        let mut state = self.inner.lock();
        state.pending.push_str(delta);

        let (fresh, consumed) = {
            let segments: Vec<&str> = state.pending.split_sentence_bounds().collect();
            let total = segments.len();

            let mut consumed = 0usize;
            let mut fresh = Vec::new();
            for (i, segment) in segments.into_iter().enumerate() {
                let is_last = i + 1 == total;
                if is_last && !ends_with_terminator(segment) {
                    break;
                }
                consumed += segment.len();
                let trimmed = segment.trim();
                if !trimmed.is_empty() {
                    fresh.push(trimmed.to_string());
                }
            }
            (fresh, consumed)
        };

        state.pending.drain(..consumed);
        state.emitted += fresh.len();
        fresh
    }

    /// Remaining text after the last emitted sentence, trimmed;
    /// clears all state.
    pub fn flush(&self) -> Option<String> {
        let mut state = self.inner.lock();
        let tail = state.pending.trim().to_string();
        state.pending.clear();
        state.emitted = 0;
        (!tail.is_empty()).then_some(tail)
    }

    /// Discard all state.
    pub fn reset(&self) {
        let mut state = self.inner.lock();
        state.pending.clear();
        state.emitted = 0;
    }

    /// Sentences emitted since construction or the last
    /// flush/reset.
    pub fn emitted_count(&self) -> usize {
        self.inner.lock().emitted
    }
}
