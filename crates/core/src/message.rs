//! Agent-bus message vocabulary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message discriminator on the agent bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    Utterance,
    Response,
    ResponseDelta,
    ResponseDone,
    Cancellation,
    FrameRequest,
    FrameResponse,
    SpeechStart,
    SpeechEnd,
    Interrupt,
    TtsStart,
    TtsEnd,
    Error,
}

/// Envelope for everything crossing the agent bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Correlates all messages of one utterance round
    pub request_id: String,
    pub session_id: String,
    /// Originating or target agent, depending on direction
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    /// Kind-specific body, opaque to the envelope
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl AgentMessage {
    pub fn new(kind: MessageKind, session_id: impl Into<String>) -> Self {
        Self {
            kind,
            request_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            agent_id: String::new(),
            user_id: String::new(),
            timestamp: Utc::now(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Delta text carried by a `response-delta`, if present.
    pub fn delta_text(&self) -> Option<&str> {
        self.payload
            .get("delta")
            .or_else(|| self.payload.get("text"))
            .and_then(|v| v.as_str())
    }

    /// Full text carried by a non-streaming `response`, if present.
    pub fn response_text(&self) -> Option<&str> {
        self.payload.get("text").and_then(|v| v.as_str())
    }
}
