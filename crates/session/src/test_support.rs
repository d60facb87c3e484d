//! In-process mock collaborators for session tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use voicehub_core::{
    AgentMessage, AudioChunk, ClientEvent, OpusFrame, OutputController, ResponseHandler,
    Result as CoreResult, SpeechSynthesizer, SpeechTranscriber, SynthesisEvent, SynthesisHandle,
    SynthesisRequest, SynthesisStream, TranscriberCallbacks, TranscriptEvent, UserConnection,
    VideoFrame, VisionResult, VisionService,
};

/// Poll `cond` until it holds or the test times out.
pub async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {what}");
}

#[derive(Default)]
pub struct MockOutputController {
    pub pauses: AtomicUsize,
    pub resumes: AtomicUsize,
    pub stops: AtomicUsize,
    pub drains: AtomicUsize,
}

#[async_trait]
impl OutputController for MockOutputController {
    async fn pause_output(&self) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }

    async fn resume_output(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }

    async fn stop_tts(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    async fn wait_for_audio_drain(&self) {
        self.drains.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockConnection {
    pub events: Mutex<Vec<ClientEvent>>,
    pub audio: Mutex<Vec<AudioChunk>>,
    pub flushes: AtomicUsize,
    pub connected: AtomicBool,
    pub audio_tx: mpsc::Sender<OpusFrame>,
    audio_rx: Mutex<Option<mpsc::Receiver<OpusFrame>>>,
    output: Option<Arc<MockOutputController>>,
}

impl MockConnection {
    pub fn new(with_output_controller: bool) -> Arc<Self> {
        let (audio_tx, audio_rx) = mpsc::channel(64);
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            audio: Mutex::new(Vec::new()),
            flushes: AtomicUsize::new(0),
            connected: AtomicBool::new(true),
            audio_tx,
            audio_rx: Mutex::new(Some(audio_rx)),
            output: with_output_controller.then(|| Arc::new(MockOutputController::default())),
        })
    }

    pub fn output_mock(&self) -> Option<Arc<MockOutputController>> {
        self.output.clone()
    }

    pub fn count_events(&self, pred: impl Fn(&ClientEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    pub fn interrupts(&self) -> Vec<(String, String)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ClientEvent::Interrupt { agent_id, reason } => {
                    Some((agent_id.clone(), reason.clone()))
                },
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl UserConnection for MockConnection {
    fn take_audio_in(&self) -> Option<mpsc::Receiver<OpusFrame>> {
        self.audio_rx.lock().take()
    }

    async fn send(&self, event: ClientEvent) -> CoreResult<()> {
        self.events.lock().push(event);
        Ok(())
    }

    async fn send_audio(&self, chunk: AudioChunk) -> CoreResult<()> {
        self.audio.lock().push(chunk);
        Ok(())
    }

    async fn flush_audio_queue(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }

    fn output_controller(&self) -> Option<Arc<dyn OutputController>> {
        self.output
            .clone()
            .map(|c| c as Arc<dyn OutputController>)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub enum BusRecord {
    Utterance(AgentMessage),
    ToAgents(Vec<String>, AgentMessage),
    Cancellation {
        agent_id: String,
        session_id: String,
        reason: String,
    },
    Response(AgentMessage),
    Subscribe(String),
    Unsubscribe(String),
}

#[derive(Default)]
pub struct MockBus {
    pub records: Mutex<Vec<BusRecord>>,
    pub fail_subscribe: AtomicBool,
    handler: Mutex<Option<ResponseHandler>>,
}

impl MockBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Inject an agent message as the bus would deliver it.
    pub fn deliver(&self, session_id: &str, msg: AgentMessage) {
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler(session_id.to_string(), msg);
        }
    }

    pub fn cancellations(&self) -> Vec<(String, String)> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| match r {
                BusRecord::Cancellation {
                    agent_id, reason, ..
                } => Some((agent_id.clone(), reason.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn fanouts(&self) -> Vec<(Vec<String>, AgentMessage)> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| match r {
                BusRecord::ToAgents(ids, msg) => Some((ids.clone(), msg.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn responses(&self) -> Vec<AgentMessage> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| match r {
                BusRecord::Response(msg) => Some(msg.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl voicehub_core::AgentBus for MockBus {
    async fn publish_utterance(&self, msg: AgentMessage) -> CoreResult<()> {
        self.records.lock().push(BusRecord::Utterance(msg));
        Ok(())
    }

    async fn publish_to_agents(&self, ids: &[String], msg: AgentMessage) -> CoreResult<()> {
        self.records
            .lock()
            .push(BusRecord::ToAgents(ids.to_vec(), msg));
        Ok(())
    }

    async fn publish_cancellation(
        &self,
        agent_id: &str,
        session_id: &str,
        reason: &str,
    ) -> CoreResult<()> {
        self.records.lock().push(BusRecord::Cancellation {
            agent_id: agent_id.to_string(),
            session_id: session_id.to_string(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn publish_response(&self, msg: AgentMessage) -> CoreResult<()> {
        self.records.lock().push(BusRecord::Response(msg));
        Ok(())
    }

    async fn subscribe_to_session(&self, session_id: &str) -> CoreResult<()> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(voicehub_core::Error::Bus("subscribe refused".into()));
        }
        self.records
            .lock()
            .push(BusRecord::Subscribe(session_id.to_string()));
        Ok(())
    }

    async fn unsubscribe_from_session(&self, session_id: &str) -> CoreResult<()> {
        self.records
            .lock()
            .push(BusRecord::Unsubscribe(session_id.to_string()));
        Ok(())
    }

    fn set_response_handler(&self, handler: ResponseHandler) {
        *self.handler.lock() = Some(handler);
    }
}

#[derive(Default)]
pub struct MockTranscriber {
    pub frames: Mutex<Vec<OpusFrame>>,
    pub reconnects: AtomicUsize,
    pub closed: AtomicBool,
    callbacks: Mutex<TranscriberCallbacks>,
}

impl MockTranscriber {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fire_speech_start(&self) {
        if let Some(cb) = self.callbacks.lock().on_speech_start.clone() {
            cb();
        }
    }

    pub fn fire_speech_end(&self) {
        if let Some(cb) = self.callbacks.lock().on_speech_end.clone() {
            cb();
        }
    }

    pub fn fire_transcript(&self, event: TranscriptEvent) {
        if let Some(cb) = self.callbacks.lock().on_transcript.clone() {
            cb(event);
        }
    }

    pub fn fire_error(&self, message: &str) {
        if let Some(cb) = self.callbacks.lock().on_error.clone() {
            cb(message.to_string());
        }
    }
}

#[async_trait]
impl SpeechTranscriber for MockTranscriber {
    fn set_callbacks(&self, callbacks: TranscriberCallbacks) {
        *self.callbacks.lock() = callbacks;
    }

    async fn send_opus(&self, frame: OpusFrame) -> CoreResult<()> {
        self.frames.lock().push(frame);
        Ok(())
    }

    fn reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct MockSynth {
    pub spoken: Mutex<Vec<String>>,
    pub delay_ms: u64,
    pub closed: AtomicBool,
}

impl MockSynth {
    pub fn new(delay_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            spoken: Mutex::new(Vec::new()),
            delay_ms,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynth {
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
                    vec![0u8; 4],
                    "pcm16",
                    24_000,
                )))
                .await;
            let _ = tx.send(SynthesisEvent::Done).await;
        });

        Ok(SynthesisStream { events: rx, handle })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct MockVision {
    pub result: Mutex<VisionResult>,
    pub analyses: AtomicUsize,
    pub resets: AtomicUsize,
    pub cleanups: Mutex<Vec<String>>,
}

impl MockVision {
    pub fn with_description(description: &str) -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(VisionResult {
                description: description.to_string(),
                timestamp_ms: 1_000,
                available: true,
            }),
            analyses: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
            cleanups: Mutex::new(Vec::new()),
        })
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(VisionResult::default()),
            analyses: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
            cleanups: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl VisionService for MockVision {
    async fn store_frame(&self, _session_id: &str, _frame: VideoFrame) {}

    async fn latest_frame(&self, _session_id: &str) -> Option<VideoFrame> {
        None
    }

    async fn frames_in_window(
        &self,
        _session_id: &str,
        _start_ms: u64,
        _end_ms: u64,
        _limit: usize,
    ) -> Vec<VideoFrame> {
        Vec::new()
    }

    async fn start_analysis(&self, _session_id: &str) {
        self.analyses.fetch_add(1, Ordering::SeqCst);
    }

    async fn analysis_result(&self, _timeout: Duration) -> VisionResult {
        self.result.lock().clone()
    }

    async fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    async fn cleanup(&self, session_id: &str) {
        self.cleanups.lock().push(session_id.to_string());
    }
}
