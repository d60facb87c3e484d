//! Per-session voice orchestration
//!
//! [`VoiceSession`] is the actor that wires a user connection to the
//! agent pool: audio in, streaming STT events, routed and
//! scope-partitioned utterance fanout, first-sentence-wins response
//! arbitration, and serialized TTS out with barge-in support.
//! [`SessionManager`] is the process-scoped registry that owns the
//! defaults and propagates agent/health updates.

pub mod manager;
pub mod voice_session;

#[cfg(test)]
pub mod test_support;

pub use manager::SessionManager;
pub use voice_session::VoiceSession;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("agent bus error: {0}")]
    Bus(String),

    #[error("stt client error: {0}")]
    Stt(String),

    #[error("tts client error: {0}")]
    Tts(String),

    #[error("audio channel unavailable")]
    AudioUnavailable,

    #[error("session capacity reached ({0})")]
    Capacity(usize),

    #[error("session not found: {0}")]
    NotFound(String),
}
