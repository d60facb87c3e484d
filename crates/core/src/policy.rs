//! Barge-in policy for the duplex speech state machine

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Controls how user speech interacts with ongoing TTS output.
///
/// Zero values are replaced by the documented defaults when the
/// policy is normalized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BargeInPolicy {
    /// Whether user speech may interrupt active TTS
    #[serde(default)]
    pub allow_while_speaking: bool,
    /// Partial transcripts shorter than this are not relayed
    #[serde(default)]
    pub min_partial_chars: usize,
    /// Silence needed before a listening turn ends (ms)
    #[serde(default)]
    pub min_silence_for_end_ms: u64,
    /// Lower debounce bound for speech events (ms)
    #[serde(default)]
    pub debounce_min_ms: u64,
    /// Upper debounce bound for speech events (ms)
    #[serde(default)]
    pub debounce_max_ms: u64,
}

impl Default for BargeInPolicy {
    fn default() -> Self {
        Self {
            allow_while_speaking: false,
            min_partial_chars: 0,
            min_silence_for_end_ms: 400,
            debounce_min_ms: 100,
            debounce_max_ms: 500,
        }
    }
}

impl BargeInPolicy {
    /// Replace zero-valued duration fields with defaults.
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.min_silence_for_end_ms == 0 {
            self.min_silence_for_end_ms = defaults.min_silence_for_end_ms;
        }
        if self.debounce_min_ms == 0 {
            self.debounce_min_ms = defaults.debounce_min_ms;
        }
        if self.debounce_max_ms == 0 {
            self.debounce_max_ms = defaults.debounce_max_ms;
        }
        self
    }

    pub fn min_silence_for_end(&self) -> Duration {
        Duration::from_millis(self.min_silence_for_end_ms)
    }
}
