//! Transcript events from the STT sidecar

use serde::{Deserialize, Serialize};

/// A word with timing information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordTimestamp {
    pub word: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

/// A partial or final transcript for the current utterance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptEvent {
    /// Transcribed text
    pub text: String,
    /// True while the utterance is still open
    pub is_partial: bool,
    /// Utterance start offset in the audio stream
    #[serde(default)]
    pub start_ms: u64,
    /// Utterance end offset in the audio stream
    #[serde(default)]
    pub end_ms: u64,
    /// Duration of audio consumed for this result
    #[serde(default)]
    pub audio_duration_ms: u64,
    /// Sidecar-side processing time
    #[serde(default)]
    pub processing_duration_ms: u64,
    /// Opaque segment list as produced by the model
    #[serde(default)]
    pub segments: Vec<serde_json::Value>,
    /// Word-level timestamps when requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<WordTimestamp>>,
    /// Model tag reported by the sidecar
    #[serde(default)]
    pub model: String,
}

impl TranscriptEvent {
    /// True for a final transcript with actual content.
    pub fn is_routable(&self) -> bool {
        !self.is_partial && !self.text.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routable() {
        let mut event = TranscriptEvent {
            text: "hello".into(),
            is_partial: true,
            ..Default::default()
        };
        assert!(!event.is_routable());

        event.is_partial = false;
        assert!(event.is_routable());

        event.text = "   ".into();
        assert!(!event.is_routable());
    }

    #[test]
    fn test_deserialize_minimal() {
        let event: TranscriptEvent =
            serde_json::from_str(r#"{"text":"hi","is_partial":false}"#).unwrap();
        assert_eq!(event.text, "hi");
        assert!(event.words.is_none());
        assert!(event.segments.is_empty());
    }
}
