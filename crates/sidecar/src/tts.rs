//! Streaming text-to-speech client
//!
//! One WebSocket per synthesis request: the TTS vocabulary carries
//! no request id and the bridge serializes synthesis anyway, so the
//! socket's lifetime is the request's lifetime and cancellation is
//! simply closing it.

use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use async_trait::async_trait;
use voicehub_config::SidecarEndpoint;
use voicehub_core::{
    Error as CoreError, Result as CoreResult, SpeechSynthesizer, SynthesisEvent, SynthesisHandle,
    SynthesisRequest, SynthesisStream,
};

use crate::backoff::BackoffPolicy;
use crate::protocol::{TtsClientMessage, TtsServerMessage};
use crate::stt::{effective_url, handshake_request};
use crate::SidecarError;

/// Streaming TTS sidecar client.
pub struct SidecarSynthesizer {
    endpoint: SidecarEndpoint,
    backoff: BackoffPolicy,
    closed: AtomicBool,
}

impl SidecarSynthesizer {
    pub fn new(endpoint: SidecarEndpoint) -> Self {
        Self {
            backoff: endpoint.backoff.into(),
            endpoint,
            closed: AtomicBool::new(false),
        }
    }

    /// Dial with backoff; per-attempt failures are retried up to the
    /// policy budget.
    async fn dial(
        &self,
    ) -> Result<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        SidecarError,
    > {
        let address = effective_url(&self.endpoint);
        let mut attempt = 1u32;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(SidecarError::Closed);
            }

            let request = handshake_request(&self.endpoint)?;
            match connect_async(request).await {
                Ok((ws, _)) => {
                    tracing::info!(address = %address, "TTS sidecar stream established");
                    return Ok(ws);
                },
                Err(e) => {
                    tracing::warn!(attempt, address = %address, error = %e, "TTS dial failed");
                    attempt += 1;
                    if !self.backoff.should_retry(attempt) {
                        return Err(SidecarError::Connect {
                            address,
                            message: e.to_string(),
                        });
                    }
                    tokio::time::sleep(self.backoff.delay_for(attempt)).await;
                },
            }
        }
    }

    fn encode(&self, message: &TtsClientMessage) -> Result<String, SidecarError> {
        let text =
            serde_json::to_string(message).map_err(|e| SidecarError::Serialize(e.to_string()))?;
        if text.len() > self.endpoint.max_message_size {
            return Err(SidecarError::TooLarge {
                size: text.len(),
                max: self.endpoint.max_message_size,
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl SpeechSynthesizer for SidecarSynthesizer {
    async fn start_synthesis(&self, request: SynthesisRequest) -> CoreResult<SynthesisStream> {
        let to_core = |e: SidecarError| CoreError::Synthesis(e.to_string());

        let ws = self.dial().await.map_err(to_core)?;
        let (mut sink, mut stream) = ws.split();

        for message in [
            TtsClientMessage::Config {
                voice_id: request.voice_id.clone(),
                speed: request.speed,
                format: request.format.clone(),
                sample_rate: request.sample_rate,
            },
            TtsClientMessage::Text {
                text: request.text.clone(),
            },
            TtsClientMessage::End,
        ] {
            let text = self.encode(&message).map_err(to_core)?;
            sink.send(Message::Text(text.into()))
                .await
                .map_err(|e| CoreError::Synthesis(e.to_string()))?;
        }

        let (events_tx, events_rx) = mpsc::channel(32);
        let (handle, mut cancel_rx) = SynthesisHandle::new();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_rx.changed() => {
                        tracing::debug!("Synthesis cancelled, closing TTS stream");
                        break;
                    }
                    frame = stream.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            let message: TtsServerMessage = match serde_json::from_str(&text) {
                                Ok(message) => message,
                                Err(e) => {
                                    tracing::warn!(error = %e, "Dropping malformed TTS message");
                                    continue;
                                },
                            };
                            match message {
                                TtsServerMessage::Ready => {},
                                TtsServerMessage::Done => {
                                    let _ = events_tx.send(SynthesisEvent::Done).await;
                                    break;
                                },
                                TtsServerMessage::Error { message } => {
                                    let _ = events_tx.send(SynthesisEvent::Error(message)).await;
                                    break;
                                },
                                chunk @ TtsServerMessage::AudioChunk { .. } => {
                                    match chunk.into_chunk() {
                                        Some(chunk) => {
                                            if events_tx
                                                .send(SynthesisEvent::Chunk(chunk))
                                                .await
                                                .is_err()
                                            {
                                                break;
                                            }
                                        },
                                        None => {
                                            tracing::warn!("Dropping undecodable TTS chunk");
                                        },
                                    }
                                },
                                TtsServerMessage::Unknown => {
                                    tracing::warn!("Dropping off-vocabulary TTS message");
                                },
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            let _ = events_tx
                                .send(SynthesisEvent::Error("stream closed".to_string()))
                                .await;
                            break;
                        }
                        Some(Ok(_)) => {},
                        Some(Err(e)) => {
                            let _ = events_tx
                                .send(SynthesisEvent::Error(e.to_string()))
                                .await;
                            break;
                        }
                    }
                }
            }
            let _ = sink.close().await;
        });

        Ok(SynthesisStream {
            events: events_rx,
            handle,
        })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_enforces_size_limit() {
        let synthesizer = SidecarSynthesizer::new(SidecarEndpoint {
            address: "ws://tts.local/stream".into(),
            max_message_size: 32,
            ..Default::default()
        });

        let message = TtsClientMessage::Text {
            text: "x".repeat(100),
        };
        assert!(matches!(
            synthesizer.encode(&message),
            Err(SidecarError::TooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_start_synthesis_connect_failure() {
        let synthesizer = SidecarSynthesizer::new(SidecarEndpoint {
            address: "ws://127.0.0.1:9/stream".into(),
            backoff: voicehub_config::BackoffConfig {
                initial_ms: 1,
                max_attempts: 1,
                max_delay_ms: 2,
            },
            ..Default::default()
        });

        let result = synthesizer
            .start_synthesis(SynthesisRequest::new("Hello.", "default"))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_closed_synthesizer_refuses() {
        let synthesizer = SidecarSynthesizer::new(SidecarEndpoint {
            address: "ws://127.0.0.1:9/stream".into(),
            ..Default::default()
        });
        synthesizer.close().await;

        let result = synthesizer
            .start_synthesis(SynthesisRequest::new("Hello.", "default"))
            .await;
        assert!(result.is_err());
    }
}
