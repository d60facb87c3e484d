//! Streaming speech-to-text client
//!
//! Holds one long-lived WebSocket to the STT sidecar: a writer task
//! drains an outbound channel, a read loop dispatches the inbound
//! vocabulary to callbacks. Stream loss surfaces through `on_error`;
//! `reconnect` runs an exponential-backoff loop in the background.

use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async;

use async_trait::async_trait;
use voicehub_config::{SidecarEndpoint, SttSessionConfig};
use voicehub_core::{
    Error as CoreError, OpusFrame, Result as CoreResult, SpeechTranscriber, TranscriberCallbacks,
};

use crate::backoff::BackoffPolicy;
use crate::protocol::{SttClientMessage, SttServerMessage};
use crate::SidecarError;

/// Rewrite the scheme when TLS is forced in config.
pub(crate) fn effective_url(endpoint: &SidecarEndpoint) -> String {
    if endpoint.tls && endpoint.address.starts_with("ws://") {
        endpoint.address.replacen("ws://", "wss://", 1)
    } else {
        endpoint.address.clone()
    }
}

pub(crate) fn handshake_request(
    endpoint: &SidecarEndpoint,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, SidecarError> {
    let url = effective_url(endpoint);
    let mut request = url
        .clone()
        .into_client_request()
        .map_err(|e| SidecarError::Connect {
            address: url.clone(),
            message: e.to_string(),
        })?;

    if let Some(token) = &endpoint.token {
        let value = format!("Bearer {token}")
            .parse()
            .map_err(|_| SidecarError::Connect {
                address: url,
                message: "invalid bearer token".to_string(),
            })?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    Ok(request)
}

struct SttShared {
    endpoint: SidecarEndpoint,
    session: SttSessionConfig,
    backoff: BackoffPolicy,
    callbacks: RwLock<TranscriberCallbacks>,
    /// Serialized outbound messages; `None` while disconnected
    out_tx: Mutex<Option<mpsc::Sender<String>>>,
    ready: watch::Sender<bool>,
    reconnecting: AtomicBool,
    closed: AtomicBool,
}

impl SttShared {
    fn fire_error(&self, message: impl Into<String>) {
        let callback = self.callbacks.read().on_error.clone();
        if let Some(callback) = callback {
            callback(message.into());
        }
    }

    /// Dial once and install fresh writer/reader tasks.
    async fn establish(self: Arc<Self>) -> Result<(), SidecarError> {
        let request = handshake_request(&self.endpoint)?;
        let address = effective_url(&self.endpoint);

        let (ws, _) = connect_async(request)
            .await
            .map_err(|e| SidecarError::Connect {
                address: address.clone(),
                message: e.to_string(),
            })?;
        tracing::info!(address = %address, "STT sidecar stream established");

        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
        *self.out_tx.lock() = Some(out_tx);

        // Writer: drains the outbound channel until it closes.
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    tracing::warn!(error = %e, "STT send failed, writer exiting");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Reader: dispatches the inbound vocabulary.
        let shared = Arc::clone(&self);
        tokio::spawn(async move {
            loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => shared.dispatch(&text),
                    Some(Ok(Message::Close(_))) | None => {
                        shared.on_stream_down("stream closed by sidecar");
                        break;
                    },
                    Some(Ok(_)) => {},
                    Some(Err(e)) => {
                        shared.on_stream_down(format!("stream error: {e}"));
                        break;
                    },
                }
            }
        });

        // Fresh stream, fresh config.
        self.enqueue(&SttClientMessage::config(&self.session)).await?;
        Ok(())
    }

    fn dispatch(&self, text: &str) {
        let message: SttServerMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed STT message");
                return;
            },
        };

        let callbacks = self.callbacks.read().clone();
        match message {
            SttServerMessage::Ready => {
                let _ = self.ready.send(true);
                if let Some(on_ready) = callbacks.on_ready {
                    on_ready();
                }
            },
            SttServerMessage::SpeechStarted => {
                if let Some(on_speech_start) = callbacks.on_speech_start {
                    on_speech_start();
                }
            },
            SttServerMessage::SpeechStopped => {
                if let Some(on_speech_end) = callbacks.on_speech_end {
                    on_speech_end();
                }
            },
            SttServerMessage::Transcript(event) => {
                if let Some(on_transcript) = callbacks.on_transcript {
                    on_transcript(event);
                }
            },
            SttServerMessage::Error { message } => {
                tracing::warn!(message = %message, "STT sidecar reported error");
                self.fire_error(message);
            },
            SttServerMessage::Unknown => {
                tracing::warn!("Dropping off-vocabulary STT message");
            },
        }
    }

    fn on_stream_down(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let _ = self.ready.send(false);
        *self.out_tx.lock() = None;

        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        tracing::warn!(reason = %reason, "STT stream down");
        self.fire_error(reason);
    }

    async fn enqueue(&self, message: &SttClientMessage) -> Result<(), SidecarError> {
        let text =
            serde_json::to_string(message).map_err(|e| SidecarError::Serialize(e.to_string()))?;
        if text.len() > self.endpoint.max_message_size {
            return Err(SidecarError::TooLarge {
                size: text.len(),
                max: self.endpoint.max_message_size,
            });
        }

        let sender = self.out_tx.lock().clone();
        match sender {
            Some(sender) => sender
                .send(text)
                .await
                .map_err(|_| SidecarError::StreamNotReady),
            None => Err(SidecarError::StreamNotReady),
        }
    }

    async fn run_reconnect(self: Arc<Self>) -> Result<(), SidecarError> {
        let mut attempt = 1u32;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                self.reconnecting.store(false, Ordering::SeqCst);
                return Err(SidecarError::Closed);
            }

            tokio::time::sleep(self.backoff.delay_for(attempt)).await;

            match Arc::clone(&self).establish().await {
                Ok(()) => {
                    tracing::info!(attempt, "STT reconnect succeeded");
                    self.reconnecting.store(false, Ordering::SeqCst);
                    return Ok(());
                },
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "STT reconnect attempt failed");
                },
            }

            attempt += 1;
            if !self.backoff.should_retry(attempt) {
                self.reconnecting.store(false, Ordering::SeqCst);
                let attempts = self.backoff.max_attempts();
                self.fire_error(format!("reconnect attempts exhausted after {attempts}"));
                return Err(SidecarError::ReconnectExhausted { attempts });
            }
        }
    }
}

/// Bidirectional STT sidecar client.
pub struct SidecarTranscriber {
    shared: Arc<SttShared>,
}

impl SidecarTranscriber {
    /// Dial the sidecar and send the stream config. Fails if the
    /// first connection cannot be established.
    pub async fn connect(
        endpoint: SidecarEndpoint,
        session: SttSessionConfig,
    ) -> Result<Self, SidecarError> {
        let (ready, _) = watch::channel(false);
        let shared = Arc::new(SttShared {
            backoff: endpoint.backoff.into(),
            endpoint,
            session,
            callbacks: RwLock::new(TranscriberCallbacks::default()),
            out_tx: Mutex::new(None),
            ready,
            reconnecting: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        Arc::clone(&shared).establish().await?;
        Ok(Self { shared })
    }

    /// Send a raw PCM16 frame.
    pub async fn send_pcm(&self, pcm: &[u8]) -> Result<(), SidecarError> {
        self.shared.enqueue(&SttClientMessage::audio(pcm)).await
    }

    /// Send a pre-encoded payload.
    pub async fn send_encoded(&self, format: &str, data: &[u8]) -> Result<(), SidecarError> {
        self.shared
            .enqueue(&SttClientMessage::encoded(format, data))
            .await
    }

    /// Signal the end of the audio stream.
    pub async fn end_of_stream(&self) -> Result<(), SidecarError> {
        self.shared.enqueue(&SttClientMessage::EndOfStream).await
    }

    /// Block until the reconnect loop settles.
    pub async fn reconnect_sync(&self) -> Result<(), SidecarError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(SidecarError::Closed);
        }
        if self.shared.reconnecting.swap(true, Ordering::SeqCst) {
            // A background loop is already running; wait for it to
            // settle either way.
            while self.is_reconnecting() {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
            return if *self.shared.ready.subscribe().borrow() {
                Ok(())
            } else {
                Err(SidecarError::ReconnectExhausted {
                    attempts: self.shared.backoff.max_attempts(),
                })
            };
        }
        Arc::clone(&self.shared).run_reconnect().await
    }

    pub fn is_reconnecting(&self) -> bool {
        self.shared.reconnecting.load(Ordering::SeqCst)
    }

    /// Resolve once a fresh `ready` arrives from the sidecar.
    pub async fn wait_ready(&self) {
        let mut ready_rx = self.shared.ready.subscribe();
        while !*ready_rx.borrow() {
            if ready_rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[async_trait]
impl SpeechTranscriber for SidecarTranscriber {
    fn set_callbacks(&self, callbacks: TranscriberCallbacks) {
        *self.shared.callbacks.write() = callbacks;
    }

    async fn send_opus(&self, frame: OpusFrame) -> CoreResult<()> {
        self.shared
            .enqueue(&SttClientMessage::opus(&frame))
            .await
            .map_err(|e| match e {
                SidecarError::StreamNotReady => CoreError::StreamNotReady,
                other => CoreError::Transcription(other.to_string()),
            })
    }

    fn reconnect(&self) {
        if self.shared.closed.load(Ordering::SeqCst) {
            return;
        }
        if self.shared.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let _ = shared.run_reconnect().await;
        });
    }

    async fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        let _ = self.shared.enqueue(&SttClientMessage::EndOfStream).await;
        // Dropping the sender ends the writer, which closes the
        // socket.
        *self.shared.out_tx.lock() = None;
        let _ = self.shared.ready.send(false);
    }
}
