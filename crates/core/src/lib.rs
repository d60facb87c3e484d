//! Core types and traits for the voice orchestration backend
//!
//! This crate provides the foundational vocabulary used across all
//! other crates:
//! - Audio frame and chunk types
//! - Transcript events
//! - Agent descriptors, health metrics, and scopes
//! - The agent-bus message vocabulary
//! - Client-facing server events
//! - Trait seams for pluggable collaborators (connection, bus,
//!   transcriber, synthesizer, vision)

pub mod agent;
pub mod audio;
pub mod context;
pub mod error;
pub mod event;
pub mod message;
pub mod policy;
pub mod synthesis;
pub mod traits;
pub mod transcript;

pub use agent::{AgentDescriptor, HealthMetrics, Scope};
pub use audio::{AudioChunk, OpusFrame, STT_SAMPLE_RATE, TRANSPORT_SAMPLE_RATE};
pub use context::{UserContext, UserInfo, UtterancePayload};
pub use error::{Error, Result};
pub use event::{ClientEvent, EventSource};
pub use message::{AgentMessage, MessageKind};
pub use policy::BargeInPolicy;
pub use synthesis::{SynthesisEvent, SynthesisHandle, SynthesisRequest, SynthesisStream};
pub use traits::{
    AgentBus, OutputController, ResponseHandler, SpeechSynthesizer, SpeechTranscriber,
    TranscriberCallbacks, UserConnection, VideoFrame, VisionResult, VisionService,
};
pub use transcript::{TranscriptEvent, WordTimestamp};
