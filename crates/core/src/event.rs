//! Server events sent to the user connection

use serde::{Deserialize, Serialize};

/// Where a user-visible error originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventSource {
    Stt,
    Tts,
    AgentBus,
    Router,
    Session,
}

/// JSON-serializable event on the user connection, shaped as
/// `{"type": ..., "payload": ...}` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientEvent {
    /// User speech detected
    SpeechStart,
    /// User speech ended
    SpeechEnd,
    /// Partial transcript relay
    Transcript { text: String, is_partial: bool },
    /// Synthesis about to start for the winning agent
    TtsStart,
    /// Playback finished and drained
    TtsEnd,
    /// An agent was cancelled
    Interrupt { agent_id: String, reason: String },
    /// Non-fatal error surfaced to the client
    Error { source: EventSource, message: String },
}

impl ClientEvent {
    pub fn error(source: EventSource, message: impl Into<String>) -> Self {
        Self::Error {
            source,
            message: message.into(),
        }
    }

    pub fn interrupt(agent_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Interrupt {
            agent_id: agent_id.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_envelope_shape() {
        let json = serde_json::to_value(ClientEvent::Transcript {
            text: "hel".into(),
            is_partial: true,
        })
        .unwrap();
        assert_eq!(json["type"], "transcript");
        assert_eq!(json["payload"]["text"], "hel");

        let json = serde_json::to_value(ClientEvent::SpeechStart).unwrap();
        assert_eq!(json["type"], "speech_start");
    }

    #[test]
    fn test_interrupt_payload() {
        let json =
            serde_json::to_value(ClientEvent::interrupt("agent-a", "lost_arbitration")).unwrap();
        assert_eq!(json["type"], "interrupt");
        assert_eq!(json["payload"]["agent_id"], "agent-a");
        assert_eq!(json["payload"]["reason"], "lost_arbitration");
    }

    #[test]
    fn test_error_source_names() {
        let json = serde_json::to_value(ClientEvent::error(EventSource::AgentBus, "down")).unwrap();
        assert_eq!(json["payload"]["source"], "agent-bus");
    }
}
