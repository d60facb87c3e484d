//! Serialized TTS playback queue
//!
//! Sentences play strictly in enqueue order through the bridge; a
//! driver task is spawned on the empty -> non-empty transition and
//! exits on drain. The `on_start` / `on_end` edge callbacks pair
//! 1:1 across the queue's lifetime regardless of how `clear` races
//! the driver.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};

use crate::bridge::SynthesisBridge;

pub type EdgeCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    on_start: Option<EdgeCallback>,
    on_end: Option<EdgeCallback>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<String>,
    /// A driver task currently owns playback
    playing: bool,
    /// `on_start` fired without a matching `on_end` yet
    started: bool,
    /// Cancels the current driver
    cancel: Option<watch::Sender<bool>>,
    /// Bumped by `clear` so a stale driver cannot touch new state
    generation: u64,
}

/// FIFO of sentences driving the synthesis bridge.
pub struct TtsQueue {
    bridge: Arc<SynthesisBridge>,
    inner: Arc<Mutex<QueueState>>,
    callbacks: Arc<Mutex<Callbacks>>,
}

impl TtsQueue {
    pub fn new(bridge: Arc<SynthesisBridge>) -> Self {
        Self {
            bridge,
            inner: Arc::new(Mutex::new(QueueState::default())),
            callbacks: Arc::new(Mutex::new(Callbacks::default())),
        }
    }

    /// Install the playback edge callbacks. They fire at most once
    /// per empty->playing->empty episode, outside the queue's lock.
    pub fn set_callbacks(&self, on_start: EdgeCallback, on_end: EdgeCallback) {
        let mut callbacks = self.callbacks.lock();
        callbacks.on_start = Some(on_start);
        callbacks.on_end = Some(on_end);
    }

    /// Append a sentence; starts the driver if playback is idle.
    pub fn enqueue(&self, sentence: &str) {
        let driver = {
            let mut state = self.inner.lock();
            state.pending.push_back(sentence.to_string());
            if state.playing {
                None
            } else {
                state.playing = true;
                let (cancel_tx, cancel_rx) = watch::channel(false);
                state.cancel = Some(cancel_tx);
                Some((state.generation, cancel_rx))
            }
        };

        if let Some((generation, cancel_rx)) = driver {
            tokio::spawn(run_driver(
                Arc::clone(&self.bridge),
                Arc::clone(&self.inner),
                Arc::clone(&self.callbacks),
                generation,
                cancel_rx,
            ));
        }
    }

    /// Drop pending sentences, cancel the driver, stop the bridge.
    /// Synthesizes the missing `on_end` if playback had started.
    pub fn clear(&self) {
        let (cancel, fire_end) = {
            let mut state = self.inner.lock();
            state.pending.clear();
            state.generation += 1;
            state.playing = false;
            let cancel = state.cancel.take();
            let fire_end = state.started;
            state.started = false;
            (cancel, fire_end)
        };

        if let Some(cancel) = cancel {
            let _ = cancel.send(true);
        }
        self.bridge.stop();

        if fire_end {
            let on_end = self.callbacks.lock().on_end.clone();
            if let Some(on_end) = on_end {
                on_end();
            }
        }
    }

    /// True while a sentence is in flight or pending.
    pub fn is_playing(&self) -> bool {
        let state = self.inner.lock();
        state.playing || !state.pending.is_empty()
    }
}

async fn run_driver(
    bridge: Arc<SynthesisBridge>,
    inner: Arc<Mutex<QueueState>>,
    callbacks: Arc<Mutex<Callbacks>>,
    generation: u64,
    mut cancel_rx: watch::Receiver<bool>,
) {
    // Start edge, latched under the lock.
    let on_start = {
        let mut state = inner.lock();
        if state.generation != generation {
            return;
        }
        state.started = true;
        callbacks.lock().on_start.clone()
    };
    if let Some(on_start) = on_start {
        on_start();
    }

    loop {
        enum Step {
            Play(String),
            Drained(Option<EdgeCallback>),
            Stale,
        }

        let step = {
            let mut state = inner.lock();
            if state.generation != generation {
                Step::Stale
            } else if let Some(sentence) = state.pending.pop_front() {
                Step::Play(sentence)
            } else {
                // Drain check and the playing flag flip must share a
                // critical section with the end edge, or a racing
                // enqueue could strand a sentence.
                state.playing = false;
                state.cancel = None;
                let fire_end = state.started;
                state.started = false;
                Step::Drained(if fire_end {
                    callbacks.lock().on_end.clone()
                } else {
                    None
                })
            }
        };

        match step {
            Step::Stale => return,
            Step::Drained(on_end) => {
                if let Some(on_end) = on_end {
                    on_end();
                }
                return;
            },
            Step::Play(sentence) => {
                let (done_tx, done_rx) = oneshot::channel();
                bridge.start_stream(
                    &sentence,
                    Box::new(move || {
                        let _ = done_tx.send(());
                    }),
                );

                tokio::select! {
                    _ = done_rx => {},
                    // clear() owns the end edge on this path.
                    _ = cancel_rx.changed() => return,
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::SynthesisOptions;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use voicehub_core::{
        AudioChunk, ClientEvent, OpusFrame, Result as CoreResult, SpeechSynthesizer,
        SynthesisEvent, SynthesisHandle, SynthesisRequest, SynthesisStream, UserConnection,
    };

    /// Synthesizer that records the texts it was asked to speak.
    #[derive(Default)]
    struct RecordingSynth {
        spoken: Mutex<Vec<String>>,
        delay_ms: u64,
    }

    #[async_trait]
    impl SpeechSynthesizer for RecordingSynth {
        async fn start_synthesis(&self, request: SynthesisRequest) -> CoreResult<SynthesisStream> {
            self.spoken.lock().push(request.text.clone());
            let (tx, rx) = mpsc::channel(4);
            let (handle, cancel_rx) = SynthesisHandle::new();
            let delay = self.delay_ms;

            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                if *cancel_rx.borrow() {
                    return;
                }
                let _ = tx
                    .send(SynthesisEvent::Chunk(AudioChunk::new(
                        vec![0u8; 2],
                        "pcm16",
                        24_000,
                    )))
                    .await;
                let _ = tx.send(SynthesisEvent::Done).await;
            });

            Ok(SynthesisStream { events: rx, handle })
        }

        async fn close(&self) {}
    }

    #[derive(Default)]
    struct NullConnection;

    #[async_trait]
    impl UserConnection for NullConnection {
        fn take_audio_in(&self) -> Option<mpsc::Receiver<OpusFrame>> {
            None
        }

        async fn send(&self, _event: ClientEvent) -> CoreResult<()> {
            Ok(())
        }

        async fn send_audio(&self, _chunk: AudioChunk) -> CoreResult<()> {
            Ok(())
        }

        async fn flush_audio_queue(&self) {}

        fn is_connected(&self) -> bool {
            true
        }

        async fn close(&self) {}
    }

    fn queue_with(synth: Arc<RecordingSynth>) -> TtsQueue {
        let bridge = Arc::new(SynthesisBridge::new(
            synth,
            Arc::new(NullConnection),
            SynthesisOptions::default(),
        ));
        TtsQueue::new(bridge)
    }

    fn counters(queue: &TtsQueue) -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let starts = Arc::new(AtomicUsize::new(0));
        let ends = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&starts);
        let e = Arc::clone(&ends);
        queue.set_callbacks(
            Arc::new(move || {
                s.fetch_add(1, Ordering::SeqCst);
            }),
            Arc::new(move || {
                e.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (starts, ends)
    }

    async fn wait_idle(queue: &TtsQueue) {
        for _ in 0..200 {
            if !queue.is_playing() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("queue never drained");
    }

    #[tokio::test]
    async fn test_plays_in_order_and_pairs_edges() {
        let synth = Arc::new(RecordingSynth {
            delay_ms: 2,
            ..Default::default()
        });
        let queue = queue_with(Arc::clone(&synth));
        let (starts, ends) = counters(&queue);

        queue.enqueue("One.");
        queue.enqueue("Two.");
        queue.enqueue("Three.");

        wait_idle(&queue).await;

        assert_eq!(*synth.spoken.lock(), vec!["One.", "Two.", "Three."]);
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(ends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_two_episodes_fire_two_pairs() {
        let synth = Arc::new(RecordingSynth {
            delay_ms: 1,
            ..Default::default()
        });
        let queue = queue_with(synth);
        let (starts, ends) = counters(&queue);

        queue.enqueue("First.");
        wait_idle(&queue).await;
        queue.enqueue("Second.");
        wait_idle(&queue).await;

        assert_eq!(starts.load(Ordering::SeqCst), 2);
        assert_eq!(ends.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_clear_synthesizes_end_edge() {
        let synth = Arc::new(RecordingSynth {
            delay_ms: 500,
            ..Default::default()
        });
        let queue = queue_with(synth);
        let (starts, ends) = counters(&queue);

        queue.enqueue("Very long sentence.");
        queue.enqueue("Never played.");
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.clear();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(ends.load(Ordering::SeqCst), 1);
        assert!(!queue.is_playing());
    }

    #[tokio::test]
    async fn test_clear_before_start_fires_nothing() {
        let synth = Arc::new(RecordingSynth {
            delay_ms: 1,
            ..Default::default()
        });
        let queue = queue_with(synth);
        let (starts, ends) = counters(&queue);

        queue.clear();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(starts.load(Ordering::SeqCst), 0);
        assert_eq!(ends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let synth = Arc::new(RecordingSynth {
            delay_ms: 200,
            ..Default::default()
        });
        let queue = queue_with(synth);
        let (starts, ends) = counters(&queue);

        queue.enqueue("Sentence.");
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.clear();
        queue.clear();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(ends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_enqueue_after_clear_starts_new_episode() {
        let synth = Arc::new(RecordingSynth {
            delay_ms: 2,
            ..Default::default()
        });
        let queue = queue_with(Arc::clone(&synth));
        let (starts, ends) = counters(&queue);

        queue.enqueue("Aborted.");
        tokio::time::sleep(Duration::from_millis(5)).await;
        queue.clear();

        queue.enqueue("Fresh.");
        wait_idle(&queue).await;

        assert!(synth.spoken.lock().contains(&"Fresh.".to_string()));
        assert_eq!(starts.load(Ordering::SeqCst), ends.load(Ordering::SeqCst));
    }
}
