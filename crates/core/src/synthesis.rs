//! Synthesis request/stream types shared by the bridge and the
//! TTS sidecar client

use tokio::sync::{mpsc, watch};

use crate::audio::AudioChunk;

/// One synthesis job handed to a [`crate::traits::SpeechSynthesizer`].
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice_id: String,
    /// Speaking rate, 1.0 = normal
    pub speed: f32,
    /// Output container, e.g. "pcm16"
    pub format: String,
    pub sample_rate: u32,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>, voice_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice_id: voice_id.into(),
            speed: 1.0,
            format: "pcm16".to_string(),
            sample_rate: 24_000,
        }
    }
}

/// Events produced by one in-flight synthesis.
#[derive(Debug)]
pub enum SynthesisEvent {
    Chunk(AudioChunk),
    Done,
    Error(String),
}

/// Cancellation handle for one synthesis request.
///
/// Dropping the handle does not cancel; call [`SynthesisHandle::cancel`].
#[derive(Debug, Clone)]
pub struct SynthesisHandle {
    cancel_tx: watch::Sender<bool>,
}

impl SynthesisHandle {
    /// Create a handle and the receiver its owner watches.
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        (Self { cancel_tx }, cancel_rx)
    }

    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }
}

/// A running synthesis: its event stream plus the cancel handle.
pub struct SynthesisStream {
    pub events: mpsc::Receiver<SynthesisEvent>,
    pub handle: SynthesisHandle,
}
