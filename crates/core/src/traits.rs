//! Trait seams for pluggable collaborators
//!
//! The session core talks to its environment exclusively through
//! these contracts: the user connection, the agent bus, the STT/TTS
//! sidecar clients, and the vision subsystem. Implementations live
//! in their own crates (or in tests).

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::audio::{AudioChunk, OpusFrame};
use crate::error::Result;
use crate::event::ClientEvent;
use crate::message::AgentMessage;
use crate::synthesis::{SynthesisRequest, SynthesisStream};
use crate::transcript::TranscriptEvent;

/// Optional playback control offered by richer transports.
#[async_trait]
pub trait OutputController: Send + Sync {
    async fn pause_output(&self);
    async fn resume_output(&self);
    async fn stop_tts(&self);
    /// Block until queued audio has been played out.
    async fn wait_for_audio_drain(&self);
}

/// The user-side transport as the session sees it.
///
/// Implementations wrap WebRTC or WebSocket connections; the core
/// only ever sees Opus frames in and events/audio out.
#[async_trait]
pub trait UserConnection: Send + Sync {
    /// Take ownership of the inbound audio channel.
    ///
    /// Returns `None` once taken; the audio pump is the only
    /// consumer.
    fn take_audio_in(&self) -> Option<mpsc::Receiver<OpusFrame>>;

    /// Send a server event to the client.
    async fn send(&self, event: ClientEvent) -> Result<()>;

    /// Send a chunk of synthesized audio to the client.
    async fn send_audio(&self, chunk: AudioChunk) -> Result<()>;

    /// Drop any queued outbound audio (barge-in path).
    async fn flush_audio_queue(&self);

    /// Playback control, if the transport supports it.
    fn output_controller(&self) -> Option<Arc<dyn OutputController>> {
        None
    }

    /// Whether the connection carries a video track.
    fn has_video(&self) -> bool {
        false
    }

    /// Whether the transport is still open.
    fn is_connected(&self) -> bool;

    async fn close(&self);
}

/// Handler invoked for every bus message addressed to a session.
pub type ResponseHandler = Arc<dyn Fn(String, AgentMessage) + Send + Sync>;

/// Publish/subscribe contract toward the agent workers.
#[async_trait]
pub trait AgentBus: Send + Sync {
    /// Broadcast an utterance to all agents.
    async fn publish_utterance(&self, msg: AgentMessage) -> Result<()>;

    /// Publish an utterance to a specific subset of agents.
    async fn publish_to_agents(&self, ids: &[String], msg: AgentMessage) -> Result<()>;

    /// Tell one agent to abandon the current round.
    async fn publish_cancellation(
        &self,
        agent_id: &str,
        session_id: &str,
        reason: &str,
    ) -> Result<()>;

    /// Send a session-originated response (e.g. frame-response).
    async fn publish_response(&self, msg: AgentMessage) -> Result<()>;

    async fn subscribe_to_session(&self, session_id: &str) -> Result<()>;

    async fn unsubscribe_from_session(&self, session_id: &str) -> Result<()>;

    /// Install the per-session response handler. Installed once per
    /// session construction.
    fn set_response_handler(&self, handler: ResponseHandler);
}

/// Callback set fired by the STT client's read loop.
#[derive(Clone, Default)]
pub struct TranscriberCallbacks {
    pub on_ready: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_speech_start: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_speech_end: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_transcript: Option<Arc<dyn Fn(TranscriptEvent) + Send + Sync>>,
    pub on_error: Option<Arc<dyn Fn(String) + Send + Sync>>,
}

impl std::fmt::Debug for TranscriberCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriberCallbacks")
            .field("on_ready", &self.on_ready.is_some())
            .field("on_transcript", &self.on_transcript.is_some())
            .finish()
    }
}

/// Streaming speech-to-text client.
#[async_trait]
pub trait SpeechTranscriber: Send + Sync {
    /// Install the event callbacks. Must be called before audio is
    /// sent.
    fn set_callbacks(&self, callbacks: TranscriberCallbacks);

    /// Forward one Opus frame to the recognizer.
    async fn send_opus(&self, frame: OpusFrame) -> Result<()>;

    /// Kick off a background reconnect; no-op if one is running.
    fn reconnect(&self);

    async fn close(&self);
}

/// Streaming text-to-speech client.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Open a synthesis stream for one request.
    async fn start_synthesis(&self, request: SynthesisRequest) -> Result<SynthesisStream>;

    async fn close(&self);
}

/// One captured video frame.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub timestamp_ms: u64,
    pub data: Bytes,
}

/// Result of a frame analysis.
#[derive(Debug, Clone, Default)]
pub struct VisionResult {
    pub description: String,
    pub timestamp_ms: u64,
    /// False on timeout or when no analysis was started
    pub available: bool,
}

/// The vision subsystem as the session consumes it: a per-session
/// frame store plus an opaque "describe the latest frame" service.
#[async_trait]
pub trait VisionService: Send + Sync {
    async fn store_frame(&self, session_id: &str, frame: VideoFrame);

    async fn latest_frame(&self, session_id: &str) -> Option<VideoFrame>;

    async fn frames_in_window(
        &self,
        session_id: &str,
        start_ms: u64,
        end_ms: u64,
        limit: usize,
    ) -> Vec<VideoFrame>;

    /// Begin describing the latest frame. Idempotent while one
    /// analysis is running for the session.
    async fn start_analysis(&self, session_id: &str);

    /// Block up to `timeout` for the running analysis.
    async fn analysis_result(&self, timeout: Duration) -> VisionResult;

    async fn reset(&self);

    async fn cleanup(&self, session_id: &str);
}
