//! Streaming STT/TTS sidecar clients
//!
//! Both sidecars speak JSON over a bidirectional WebSocket with a
//! small fixed vocabulary (see [`protocol`]). The transcriber holds
//! one long-lived stream with reconnect/backoff; the synthesizer
//! opens one stream per request so cancellation is just closing the
//! socket.

pub mod backoff;
pub mod protocol;
pub mod stt;
pub mod tts;

pub use backoff::BackoffPolicy;
pub use stt::SidecarTranscriber;
pub use tts::SidecarSynthesizer;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SidecarError {
    #[error("failed to connect to sidecar at {address}: {message}")]
    Connect { address: String, message: String },

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("failed to encode message: {0}")]
    Serialize(String),

    #[error("message of {size} bytes exceeds limit of {max}")]
    TooLarge { size: usize, max: usize },

    #[error("stream not ready")]
    StreamNotReady,

    #[error("reconnect attempts exhausted after {attempts}")]
    ReconnectExhausted { attempts: u32 },

    #[error("client closed")]
    Closed,
}
