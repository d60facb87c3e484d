//! Audio frame and chunk types

use bytes::Bytes;

/// Sample rate the user transport delivers Opus frames at.
pub const TRANSPORT_SAMPLE_RATE: u32 = 48_000;

/// Sample rate the STT sidecar expects.
pub const STT_SAMPLE_RATE: u32 = 16_000;

/// A single encoded Opus frame from the user connection.
///
/// Frames arrive at 48kHz mono from the transport and are forwarded
/// to the STT sidecar in arrival order.
#[derive(Debug, Clone)]
pub struct OpusFrame {
    /// Encoded Opus payload
    pub data: Bytes,
    /// Codec sample rate
    pub sample_rate: u32,
    /// Channel count
    pub channels: u8,
}

impl OpusFrame {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            sample_rate: TRANSPORT_SAMPLE_RATE,
            channels: 1,
        }
    }
}

/// A chunk of synthesized audio on its way to the user connection.
///
/// Chunks stay as raw bytes in process; the sidecar protocol layer
/// and the connection implementation own any wire encoding.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Raw audio bytes
    pub data: Bytes,
    /// Container/encoding, e.g. "pcm16" or "opus"
    pub format: String,
    /// Samples per second
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(data: impl Into<Bytes>, format: impl Into<String>, sample_rate: u32) -> Self {
        Self {
            data: data.into(),
            format: format.into(),
            sample_rate,
        }
    }

    /// Chunk length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
