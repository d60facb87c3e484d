//! Speech state machine, sentence segmentation, and the TTS output
//! chain
//!
//! The chain is: agent response deltas -> [`SentenceBuffer`] ->
//! [`TtsQueue`] -> [`SynthesisBridge`] -> user connection, with the
//! [`SpeechController`] modelling the duplex conversation on top.

pub mod bridge;
pub mod queue;
pub mod sentence;
pub mod speech;

pub use bridge::{DoneCallback, SynthesisBridge, SynthesisOptions};
pub use queue::TtsQueue;
pub use sentence::SentenceBuffer;
pub use speech::{ActionReason, SpeechAction, SpeechController, SpeechState, Transition};
