//! Shared error type for trait-boundary failures

use thiserror::Error;

/// Errors crossing the collaborator trait seams.
#[derive(Debug, Error)]
pub enum Error {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("agent bus error: {0}")]
    Bus(String),

    #[error("transcription error: {0}")]
    Transcription(String),

    #[error("synthesis error: {0}")]
    Synthesis(String),

    #[error("vision error: {0}")]
    Vision(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("stream not ready")]
    StreamNotReady,

    #[error("closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, Error>;
