//! Single-in-flight synthesis bridge
//!
//! Wraps the TTS client for one session: opens a synthesis stream,
//! forwards audio chunks to the user connection, and fires a done
//! callback exactly once per stream, including under cancellation.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

use voicehub_core::{
    SpeechSynthesizer, SynthesisEvent, SynthesisRequest, UserConnection,
};

/// Fired once when a stream finishes, errors, or is cancelled.
pub type DoneCallback = Box<dyn FnOnce() + Send>;

/// Voice parameters applied to every stream of the session.
#[derive(Debug, Clone)]
pub struct SynthesisOptions {
    pub voice_id: String,
    pub speed: f32,
    pub format: String,
    pub sample_rate: u32,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            voice_id: "default".to_string(),
            speed: 1.0,
            format: "pcm16".to_string(),
            sample_rate: 24_000,
        }
    }
}

struct InFlight {
    generation: u64,
    cancel: watch::Sender<bool>,
}

#[derive(Default)]
struct BridgeState {
    current: Option<InFlight>,
    next_generation: u64,
}

/// Cancellable single-stream synthesis bridge; at most one stream
/// per session is in flight.
pub struct SynthesisBridge {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    connection: Arc<dyn UserConnection>,
    options: SynthesisOptions,
    inner: Arc<Mutex<BridgeState>>,
}

impl SynthesisBridge {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        connection: Arc<dyn UserConnection>,
        options: SynthesisOptions,
    ) -> Self {
        Self {
            synthesizer,
            connection,
            options,
            inner: Arc::new(Mutex::new(BridgeState::default())),
        }
    }

    /// Open a stream for `text`, cancelling any prior stream (whose
    /// own done callback still fires). `on_done` fires exactly once:
    /// after drain on success, on error, or on cancellation.
    pub fn start_stream(&self, text: &str, on_done: DoneCallback) {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);

        let generation = {
            let mut state = self.inner.lock();
            if let Some(previous) = state.current.take() {
                let _ = previous.cancel.send(true);
            }
            let generation = state.next_generation;
            state.next_generation += 1;
            state.current = Some(InFlight {
                generation,
                cancel: cancel_tx,
            });
            generation
        };

        let request = SynthesisRequest {
            text: text.to_string(),
            voice_id: self.options.voice_id.clone(),
            speed: self.options.speed,
            format: self.options.format.clone(),
            sample_rate: self.options.sample_rate,
        };

        let synthesizer = Arc::clone(&self.synthesizer);
        let connection = Arc::clone(&self.connection);
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            let opened = tokio::select! {
                result = synthesizer.start_synthesis(request) => Some(result),
                _ = cancel_rx.changed() => None,
            };

            match opened {
                None => {},
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Synthesis stream failed to open");
                },
                Some(Ok(mut stream)) => loop {
                    tokio::select! {
                        _ = cancel_rx.changed() => {
                            stream.handle.cancel();
                            break;
                        }
                        event = stream.events.recv() => match event {
                            Some(SynthesisEvent::Chunk(chunk)) => {
                                if let Err(e) = connection.send_audio(chunk).await {
                                    tracing::warn!(error = %e, "Audio forward failed, cancelling stream");
                                    stream.handle.cancel();
                                    break;
                                }
                            }
                            Some(SynthesisEvent::Done) => {
                                if let Some(controller) = connection.output_controller() {
                                    controller.wait_for_audio_drain().await;
                                }
                                break;
                            }
                            Some(SynthesisEvent::Error(message)) => {
                                tracing::error!(error = %message, "Synthesis stream error");
                                break;
                            }
                            None => break,
                        }
                    }
                },
            }

            // Only the owning stream may clear the in-flight slot; a
            // newer stream may already occupy it.
            {
                let mut state = inner.lock();
                if state
                    .current
                    .as_ref()
                    .map_or(false, |c| c.generation == generation)
                {
                    state.current = None;
                }
            }

            on_done();
        });
    }

    /// Cancel the in-flight stream, if any.
    pub fn stop(&self) {
        let current = self.inner.lock().current.take();
        if let Some(in_flight) = current {
            let _ = in_flight.cancel.send(true);
        }
    }

    /// True while a stream is being played.
    pub fn is_active(&self) -> bool {
        self.inner.lock().current.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use voicehub_core::{
        AudioChunk, ClientEvent, OpusFrame, Result as CoreResult, SynthesisHandle,
        SynthesisStream,
    };

    /// Synthesizer yielding `chunks` chunks then Done, slowly enough
    /// to cancel mid-stream.
    struct ScriptedSynth {
        chunks: usize,
        chunk_delay: Duration,
        started: AtomicUsize,
    }

    impl ScriptedSynth {
        fn new(chunks: usize, chunk_delay: Duration) -> Self {
            Self {
                chunks,
                chunk_delay,
                started: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for ScriptedSynth {
        async fn start_synthesis(&self, _request: SynthesisRequest) -> CoreResult<SynthesisStream> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(8);
            let (handle, cancel_rx) = SynthesisHandle::new();
            let chunks = self.chunks;
            let delay = self.chunk_delay;

            tokio::spawn(async move {
                for _ in 0..chunks {
                    tokio::time::sleep(delay).await;
                    if *cancel_rx.borrow() {
                        return;
                    }
                    if tx
                        .send(SynthesisEvent::Chunk(AudioChunk::new(
                            vec![0u8; 4],
                            "pcm16",
                            24_000,
                        )))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                let _ = tx.send(SynthesisEvent::Done).await;
            });

            Ok(SynthesisStream { events: rx, handle })
        }

        async fn close(&self) {}
    }

    #[derive(Default)]
    struct CountingConnection {
        chunks: AtomicUsize,
    }

    #[async_trait]
    impl UserConnection for CountingConnection {
        fn take_audio_in(&self) -> Option<mpsc::Receiver<OpusFrame>> {
            None
        }

        async fn send(&self, _event: ClientEvent) -> CoreResult<()> {
            Ok(())
        }

        async fn send_audio(&self, _chunk: AudioChunk) -> CoreResult<()> {
            self.chunks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn flush_audio_queue(&self) {}

        fn is_connected(&self) -> bool {
            true
        }

        async fn close(&self) {}
    }

    fn bridge_with(
        synth: Arc<ScriptedSynth>,
        conn: Arc<CountingConnection>,
    ) -> SynthesisBridge {
        SynthesisBridge::new(synth, conn, SynthesisOptions::default())
    }

    #[tokio::test]
    async fn test_stream_forwards_chunks_and_fires_done() {
        let synth = Arc::new(ScriptedSynth::new(3, Duration::from_millis(1)));
        let conn = Arc::new(CountingConnection::default());
        let bridge = bridge_with(Arc::clone(&synth), Arc::clone(&conn));

        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        bridge.start_stream("Hello there.", Box::new(move || {
            let _ = done_tx.send(());
        }));
        assert!(bridge.is_active());

        tokio::time::timeout(Duration::from_secs(1), done_rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conn.chunks.load(Ordering::SeqCst), 3);
        assert!(!bridge.is_active());
    }

    #[tokio::test]
    async fn test_stop_cancels_and_still_fires_done() {
        let synth = Arc::new(ScriptedSynth::new(100, Duration::from_millis(10)));
        let conn = Arc::new(CountingConnection::default());
        let bridge = bridge_with(synth, Arc::clone(&conn));

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        bridge.start_stream("Long text.", Box::new(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        }));

        tokio::time::sleep(Duration::from_millis(25)).await;
        bridge.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!bridge.is_active());
        assert!(conn.chunks.load(Ordering::SeqCst) < 100);
    }

    #[tokio::test]
    async fn test_new_stream_cancels_previous_with_both_dones() {
        let synth = Arc::new(ScriptedSynth::new(50, Duration::from_millis(5)));
        let conn = Arc::new(CountingConnection::default());
        let bridge = bridge_with(Arc::clone(&synth), conn);

        let count = Arc::new(AtomicUsize::new(0));
        let c1 = Arc::clone(&count);
        bridge.start_stream("First.", Box::new(move || {
            c1.fetch_add(1, Ordering::SeqCst);
        }));
        tokio::time::sleep(Duration::from_millis(12)).await;

        let c2 = Arc::clone(&count);
        bridge.start_stream("Second.", Box::new(move || {
            c2.fetch_add(1, Ordering::SeqCst);
        }));

        // First done fires on cancellation, second is still playing.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(bridge.is_active());
        assert_eq!(synth.started.load(Ordering::SeqCst), 2);

        bridge.stop();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stop_without_stream_is_noop() {
        let synth = Arc::new(ScriptedSynth::new(1, Duration::from_millis(1)));
        let conn = Arc::new(CountingConnection::default());
        let bridge = bridge_with(synth, conn);

        bridge.stop();
        assert!(!bridge.is_active());
    }
}
