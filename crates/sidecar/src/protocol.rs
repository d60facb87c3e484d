//! Sidecar wire vocabularies
//!
//! JSON messages tagged by `type`. Audio payloads cross the wire
//! base64-encoded.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use voicehub_config::SttSessionConfig;
use voicehub_core::{OpusFrame, TranscriptEvent, STT_SAMPLE_RATE};

/// Client -> STT sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SttClientMessage {
    /// Stream configuration; first message on a fresh stream.
    Config {
        language: String,
        model_id: String,
        partials: bool,
        partial_window_ms: u64,
        partial_stride_ms: u64,
        include_word_times: bool,
        hotwords: Vec<String>,
        initial_prompt: String,
        task: String,
        temperature: f32,
        sample_rate: u32,
    },
    /// Raw PCM16 frame, base64
    Audio { data: String },
    /// Opus frame with codec parameters, base64
    OpusFrame {
        data: String,
        sample_rate: u32,
        channels: u8,
    },
    /// Pre-encoded payload in an arbitrary container, base64
    EncodedAudio { format: String, data: String },
    /// No more audio for this utterance stream.
    EndOfStream,
}

impl SttClientMessage {
    pub fn config(session: &SttSessionConfig) -> Self {
        Self::Config {
            language: session.language.clone(),
            model_id: session.model_id.clone(),
            partials: session.partials,
            partial_window_ms: session.partial_window_ms,
            partial_stride_ms: session.partial_stride_ms,
            include_word_times: session.include_word_times,
            hotwords: session.hotwords.clone(),
            initial_prompt: session.initial_prompt.clone(),
            task: session.task.clone(),
            temperature: session.temperature,
            sample_rate: STT_SAMPLE_RATE,
        }
    }

    pub fn audio(pcm: &[u8]) -> Self {
        Self::Audio {
            data: BASE64.encode(pcm),
        }
    }

    pub fn opus(frame: &OpusFrame) -> Self {
        Self::OpusFrame {
            data: BASE64.encode(&frame.data),
            sample_rate: frame.sample_rate,
            channels: frame.channels,
        }
    }

    pub fn encoded(format: impl Into<String>, data: &[u8]) -> Self {
        Self::EncodedAudio {
            format: format.into(),
            data: BASE64.encode(data),
        }
    }
}

/// STT sidecar -> client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SttServerMessage {
    Ready,
    SpeechStarted,
    SpeechStopped,
    Transcript(TranscriptEvent),
    Error { message: String },
    /// Anything off-vocabulary; dropped with a warning.
    #[serde(other)]
    Unknown,
}

/// Client -> TTS sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TtsClientMessage {
    Config {
        voice_id: String,
        speed: f32,
        format: String,
        sample_rate: u32,
    },
    Text { text: String },
    End,
}

/// TTS sidecar -> client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TtsServerMessage {
    Ready,
    AudioChunk {
        data: String,
        format: String,
        sample_rate: u32,
    },
    Done,
    Error { message: String },
    #[serde(other)]
    Unknown,
}

impl TtsServerMessage {
    /// Decode an `audio_chunk` payload; `None` for other kinds or
    /// undecodable data.
    pub fn into_chunk(self) -> Option<voicehub_core::AudioChunk> {
        match self {
            TtsServerMessage::AudioChunk {
                data,
                format,
                sample_rate,
            } => BASE64
                .decode(data)
                .ok()
                .map(|bytes| voicehub_core::AudioChunk::new(bytes, format, sample_rate)),
            _ => None,
        }
    }
}
