//! Voice session actor
//!
//! Wires one user connection to the agent pool for the lifetime of
//! a call:
//!
//! ```text
//! ┌────────────┐    ┌─────────────┐    ┌───────────────┐    ┌─────────────┐
//! │ Connection │───▶│ STT sidecar │───▶│ Router/Fanout │───▶│   Agents    │
//! │  (opus in) │    │ (streaming) │    │ (scope-split) │    │ (bus, N-way)│
//! └────────────┘    └─────────────┘    └───────────────┘    └─────────────┘
//!       ▲                                                          │
//!       │         ┌─────────────┐    ┌───────────────┐             │
//!       └─────────│ TTS sidecar │◀───│ Arbiter+Queue │◀────────────┘
//!                 │ (streaming) │    │ (1st sentence │
//!                 └─────────────┘    │     wins)     │
//!                                    └───────────────┘
//! ```
//!
//! The session owns an audio pump task; every other activity runs
//! on short spawned handlers driven by STT callbacks and bus
//! deliveries. External threads touch the session only through its
//! method surface.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use voicehub_config::SessionConfig;
use voicehub_core::{
    AgentBus, AgentDescriptor, AgentMessage, ClientEvent, EventSource, HealthMetrics,
    MessageKind, Scope, SpeechSynthesizer, SpeechTranscriber, TranscriberCallbacks,
    TranscriptEvent, UserConnection, UtterancePayload, VisionService,
};
use voicehub_pipeline::{
    SentenceBuffer, SpeechAction, SpeechController, SpeechState, SynthesisBridge,
    SynthesisOptions, Transition, TtsQueue,
};
use voicehub_routing::{Arbiter, SmartRouter};
use voicehub_sidecar::{SidecarSynthesizer, SidecarTranscriber};

use crate::SessionError;

const LOST_ARBITRATION: &str = "lost_arbitration";

/// Default bounded wait for a frame description when no vision
/// config overrides it.
const VISION_ATTACH_WAIT: Duration = Duration::from_millis(500);

/// One live voice conversation.
pub struct VoiceSession {
    id: String,
    config: SessionConfig,
    connection: Arc<dyn UserConnection>,
    bus: Arc<dyn AgentBus>,
    stt: Arc<dyn SpeechTranscriber>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    vision: Option<Arc<dyn VisionService>>,

    controller: SpeechController,
    arbiter: Arbiter,
    router: Arc<SmartRouter>,
    sentences: SentenceBuffer,
    bridge: Arc<SynthesisBridge>,
    queue: Arc<TtsQueue>,

    /// Full descriptor list; replaced wholesale by the manager
    agents: RwLock<Vec<AgentDescriptor>>,
    /// Agent ids of the current round
    active_agents: Mutex<Vec<String>>,
    /// Request id correlating the current round
    round_id: Mutex<String>,

    shutdown: broadcast::Sender<()>,
    audio_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl VoiceSession {
    /// Production constructor: dials the STT/TTS sidecars named in
    /// `config` and wires everything up.
    pub async fn connect(
        connection: Arc<dyn UserConnection>,
        bus: Arc<dyn AgentBus>,
        config: SessionConfig,
    ) -> Result<Arc<Self>, SessionError> {
        let stt = SidecarTranscriber::connect(config.stt.clone(), config.stt_session.clone())
            .await
            .map_err(|e| SessionError::Stt(e.to_string()))?;
        let synthesizer = SidecarSynthesizer::new(config.tts.clone());

        Self::with_services(
            connection,
            bus,
            Arc::new(stt),
            Arc::new(synthesizer),
            None,
            config,
        )
        .await
    }

    /// Construct over already-built collaborators. On any wiring
    /// failure the clients handed in are closed before returning.
    pub async fn with_services(
        connection: Arc<dyn UserConnection>,
        bus: Arc<dyn AgentBus>,
        stt: Arc<dyn SpeechTranscriber>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        vision: Option<Arc<dyn VisionService>>,
        config: SessionConfig,
    ) -> Result<Arc<Self>, SessionError> {
        let id = uuid::Uuid::new_v4().to_string();

        let router = Arc::new(SmartRouter::new());
        router.index(&config.agents);

        let bridge = Arc::new(SynthesisBridge::new(
            Arc::clone(&synthesizer),
            Arc::clone(&connection),
            SynthesisOptions {
                voice_id: config.voice_id.clone(),
                speed: config.tts_speed,
                ..Default::default()
            },
        ));
        let queue = Arc::new(TtsQueue::new(Arc::clone(&bridge)));

        let session = Arc::new(Self {
            id: id.clone(),
            controller: SpeechController::new(config.barge_in),
            agents: RwLock::new(config.agents.clone()),
            config,
            connection,
            bus: Arc::clone(&bus),
            stt: Arc::clone(&stt),
            synthesizer: Arc::clone(&synthesizer),
            vision,
            arbiter: Arbiter::new(),
            router,
            sentences: SentenceBuffer::new(),
            bridge,
            queue,
            active_agents: Mutex::new(Vec::new()),
            round_id: Mutex::new(String::new()),
            shutdown: broadcast::channel(1).0,
            audio_task: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        Self::install_queue_callbacks(&session);
        Self::install_stt_callbacks(&session);
        Self::install_response_handler(&session);

        if let Err(e) = bus.subscribe_to_session(&id).await {
            // Release what we already hold; the session was never
            // visible.
            stt.close().await;
            synthesizer.close().await;
            return Err(SessionError::Bus(e.to_string()));
        }

        if session.connection.has_video() && session.vision.is_some() {
            tracing::info!(session_id = %id, "Vision frame capture enabled");
        }

        tracing::info!(
            session_id = %id,
            agents = session.agents.read().len(),
            "Voice session created"
        );
        Ok(session)
    }

    /// Spawn the audio pump: opus frames from the connection go to
    /// the STT client in arrival order until shutdown or channel
    /// close. A 100ms tick drives the silence debounce.
    pub fn start(self: Arc<Self>) -> Result<(), SessionError> {
        let mut audio_rx = self
            .connection
            .take_audio_in()
            .ok_or(SessionError::AudioUnavailable)?;
        let mut shutdown_rx = self.shutdown.subscribe();
        let session = Arc::clone(&self);

        let handle = tokio::spawn(async move {
            let mut silence_tick = tokio::time::interval(Duration::from_millis(100));
            silence_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::debug!(session_id = %session.id, "Audio pump shutting down");
                        break;
                    }
                    frame = audio_rx.recv() => match frame {
                        Some(frame) => {
                            if let Err(e) = session.stt.send_opus(frame).await {
                                tracing::warn!(session_id = %session.id, error = %e, "Dropping frame");
                            }
                        }
                        None => {
                            tracing::info!(session_id = %session.id, "Audio channel closed");
                            break;
                        }
                    },
                    _ = silence_tick.tick() => {
                        if session.controller.should_end_by_silence(Instant::now()) {
                            tracing::debug!(session_id = %session.id, "Utterance ended by silence");
                        }
                    }
                }
            }
        });

        *self.audio_task.lock() = Some(handle);
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn speech_state(&self) -> SpeechState {
        self.controller.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Replace the agent list; the router re-indexes lazily on the
    /// next route.
    pub fn set_agents(&self, agents: Vec<AgentDescriptor>) {
        self.router.index(&agents);
        *self.agents.write() = agents;
    }

    /// Replace the router's health table.
    pub fn set_health(&self, health: std::collections::HashMap<String, HealthMetrics>) {
        self.router.set_health(health);
    }

    /// Transport backpressure hook: while output is active this
    /// fires the same interruption set as barge-in.
    pub async fn on_backpressure(&self) {
        let transition = self.controller.on_backpressure();
        self.execute_actions(&transition).await;
    }

    /// Tear the session down. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.shutdown.send(());
        if let Err(e) = self.bus.unsubscribe_from_session(&self.id).await {
            tracing::warn!(session_id = %self.id, error = %e, "Bus unsubscribe failed");
        }

        let audio_task = self.audio_task.lock().take();
        if let Some(task) = audio_task {
            let _ = task.await;
        }

        self.queue.clear();
        self.stt.close().await;
        self.synthesizer.close().await;

        if let Some(vision) = &self.vision {
            vision.cleanup(&self.id).await;
        }
        self.connection.close().await;

        tracing::info!(session_id = %self.id, "Voice session closed");
    }

    // ------------------------------------------------------------------
    // Wiring
    // ------------------------------------------------------------------

    fn install_queue_callbacks(session: &Arc<Self>) {
        let on_start = {
            let weak = Arc::downgrade(session);
            Arc::new(move || {
                if let Some(session) = weak.upgrade() {
                    session.controller.on_tts_audio_start();
                }
            })
        };
        let on_end = {
            let weak = Arc::downgrade(session);
            Arc::new(move || {
                let Some(session) = weak.upgrade() else {
                    return;
                };
                session.controller.on_tts_audio_end();
                tokio::spawn(async move {
                    let _ = session.connection.send(ClientEvent::TtsEnd).await;
                });
            })
        };
        session.queue.set_callbacks(on_start, on_end);
    }

    fn install_stt_callbacks(session: &Arc<Self>) {
        let weak = Arc::downgrade(session);
        let callbacks = TranscriberCallbacks {
            on_ready: Some(Arc::new({
                let weak = weak.clone();
                move || {
                    if let Some(session) = weak.upgrade() {
                        tracing::debug!(session_id = %session.id, "STT ready");
                    }
                }
            })),
            on_speech_start: Some(Arc::new({
                let weak = weak.clone();
                move || {
                    if let Some(session) = weak.upgrade() {
                        tokio::spawn(async move { session.on_speech_start().await });
                    }
                }
            })),
            on_speech_end: Some(Arc::new({
                let weak = weak.clone();
                move || {
                    if let Some(session) = weak.upgrade() {
                        tokio::spawn(async move { session.on_speech_end().await });
                    }
                }
            })),
            on_transcript: Some(Arc::new({
                let weak = weak.clone();
                move |event| {
                    if let Some(session) = weak.upgrade() {
                        tokio::spawn(async move { session.on_transcript(event).await });
                    }
                }
            })),
            on_error: Some(Arc::new({
                let weak = weak.clone();
                move |message| {
                    if let Some(session) = weak.upgrade() {
                        tokio::spawn(async move { session.on_stt_error(message).await });
                    }
                }
            })),
        };
        session.stt.set_callbacks(callbacks);
    }

    fn install_response_handler(session: &Arc<Self>) {
        let weak = Arc::downgrade(session);
        session.bus.set_response_handler(Arc::new(move |session_id, msg| {
            let Some(session) = weak.upgrade() else {
                return;
            };
            // Not ours; the bus may multiplex sessions.
            if session_id != session.id || msg.session_id != session.id {
                return;
            }
            tokio::spawn(async move { session.on_agent_response(msg).await });
        }));
    }

    // ------------------------------------------------------------------
    // STT event handlers
    // ------------------------------------------------------------------

    async fn on_speech_start(&self) {
        let transition = self.controller.on_user_speech_start(Instant::now());
        let _ = self.connection.send(ClientEvent::SpeechStart).await;

        if let Some(vision) = &self.vision {
            vision.start_analysis(&self.id).await;
        }

        self.execute_actions(&transition).await;
    }

    async fn on_speech_end(&self) {
        let transition = self.controller.on_user_speech_end(Instant::now());
        let _ = self.connection.send(ClientEvent::SpeechEnd).await;
        self.execute_actions(&transition).await;
    }

    async fn on_transcript(&self, event: TranscriptEvent) {
        if event.is_partial {
            if event.text.len() < self.controller.policy().min_partial_chars {
                return;
            }
            let _ = self
                .connection
                .send(ClientEvent::Transcript {
                    text: event.text,
                    is_partial: true,
                })
                .await;
            return;
        }

        if !event.is_routable() {
            return;
        }
        self.handle_final_transcript(event.text.trim()).await;
    }

    async fn on_stt_error(&self, message: String) {
        let _ = self
            .connection
            .send(ClientEvent::error(EventSource::Stt, message.clone()))
            .await;

        // The exhaustion report is terminal; anything else kicks the
        // backoff loop.
        if message.starts_with("reconnect attempts exhausted") {
            tracing::error!(session_id = %self.id, "STT reconnect exhausted");
            return;
        }
        self.stt.reconnect();
    }

    // ------------------------------------------------------------------
    // Utterance fanout
    // ------------------------------------------------------------------

    async fn handle_final_transcript(&self, text: &str) {
        let mut payload = UtterancePayload::final_text(text);

        if let Some(vision) = &self.vision {
            let wait = self
                .config
                .vision
                .as_ref()
                .map(|v| Duration::from_millis(v.attach_wait_ms))
                .unwrap_or(VISION_ATTACH_WAIT);
            let result = vision.analysis_result(wait).await;
            if result.available {
                payload.vision = Some(result.description);
            }
            vision.reset().await;
        }

        let round_id = uuid::Uuid::new_v4().to_string();
        *self.round_id.lock() = round_id.clone();

        let agents = self.agents.read().clone();
        if agents.is_empty() {
            // Broadcast: no descriptors means no granted scopes, so
            // the payload carries no user block.
            let scoped = payload.scoped(&self.config.user, &BTreeSet::new());
            let msg = self.utterance_message(&round_id, scoped);
            if let Err(e) = self.bus.publish_utterance(msg).await {
                self.emit_error(EventSource::AgentBus, e.to_string()).await;
            }
            return;
        }

        let mut candidates = self.router.route(text, &agents);
        if candidates.is_empty() {
            candidates = agents.iter().map(|a| a.id.clone()).collect();
        }
        tracing::debug!(
            session_id = %self.id,
            round_id = %round_id,
            candidates = ?candidates,
            "Routing utterance"
        );

        *self.active_agents.lock() = candidates.clone();
        self.sentences.reset();
        self.arbiter.start(candidates.iter().cloned());

        // Fan out one payload per scope partition; agents with
        // different scope sets must never share one.
        let mut partitions: BTreeMap<Vec<Scope>, Vec<String>> = BTreeMap::new();
        for id in &candidates {
            let Some(agent) = agents.iter().find(|a| &a.id == id) else {
                continue;
            };
            let scopes: Vec<Scope> = agent.relevant_scopes().into_iter().collect();
            partitions.entry(scopes).or_default().push(id.clone());
        }

        for (scopes, subset) in partitions {
            let scope_set: BTreeSet<Scope> = scopes.into_iter().collect();
            let scoped = payload.scoped(&self.config.user, &scope_set);
            let msg = self.utterance_message(&round_id, scoped);
            if let Err(e) = self.bus.publish_to_agents(&subset, msg).await {
                self.emit_error(EventSource::AgentBus, e.to_string()).await;
            }
        }
    }

    fn utterance_message(&self, round_id: &str, payload: UtterancePayload) -> AgentMessage {
        AgentMessage::new(MessageKind::Utterance, &self.id)
            .with_request_id(round_id)
            .with_user_id(&self.config.user.user_id)
            .with_payload(serde_json::to_value(payload).unwrap_or(serde_json::Value::Null))
    }

    // ------------------------------------------------------------------
    // Agent response handlers
    // ------------------------------------------------------------------

    async fn on_agent_response(self: Arc<Self>, msg: AgentMessage) {
        match msg.kind {
            MessageKind::FrameRequest => self.handle_frame_request(msg).await,
            MessageKind::ResponseDelta => self.handle_response_delta(msg).await,
            MessageKind::ResponseDone => self.handle_response_done(msg).await,
            MessageKind::Response => self.handle_response(msg).await,
            other => {
                tracing::debug!(session_id = %self.id, kind = ?other, "Ignoring bus message");
            },
        }
    }

    async fn handle_response_delta(&self, msg: AgentMessage) {
        let Some(delta) = msg.delta_text() else {
            tracing::warn!(session_id = %self.id, "response-delta without text, dropping");
            return;
        };

        // Arbitration is gated on the first *complete* sentence, so
        // an agent that streams nothing useful cannot starve the
        // round.
        let completed = self.sentences.add(delta);
        if completed.is_empty() {
            return;
        }

        let (winner, is_new) = self.arbiter.decide(&msg.agent_id);
        if winner != msg.agent_id {
            // A loser's buffered text is discarded wholesale.
            self.sentences.reset();
            return;
        }

        if is_new {
            self.announce_winner(&msg.agent_id).await;
        }

        for sentence in completed {
            self.queue.enqueue(&sentence);
        }
    }

    async fn handle_response_done(&self, msg: AgentMessage) {
        let winner = self.arbiter.winner();
        if winner.is_empty() || winner != msg.agent_id {
            return;
        }

        if let Some(tail) = self.sentences.flush() {
            self.queue.enqueue(&tail);
        }
        self.arbiter.reset();
        tracing::debug!(session_id = %self.id, agent_id = %msg.agent_id, "Response round complete");
    }

    /// Non-streaming response: the whole text goes through the
    /// direct synthesis path, bypassing the sentence queue.
    async fn handle_response(self: Arc<Self>, msg: AgentMessage) {
        let Some(text) = msg.response_text() else {
            tracing::warn!(session_id = %self.id, "response without text, dropping");
            return;
        };
        let text = text.to_string();

        let (winner, is_new) = self.arbiter.decide(&msg.agent_id);
        if winner != msg.agent_id {
            return;
        }
        if is_new {
            self.announce_winner(&msg.agent_id).await;
        }

        self.controller.on_tts_audio_start();
        let weak = Arc::downgrade(&self);
        self.bridge.start_stream(
            &text,
            Box::new(move || {
                if let Some(session) = weak.upgrade() {
                    session.controller.on_tts_audio_end();
                    tokio::spawn(async move {
                        let _ = session.connection.send(ClientEvent::TtsEnd).await;
                    });
                }
            }),
        );

        // A one-shot response completes the round.
        self.arbiter.reset();
    }

    async fn handle_frame_request(&self, msg: AgentMessage) {
        let has_scope = self
            .agents
            .read()
            .iter()
            .find(|a| a.id == msg.agent_id)
            .map_or(false, |a| a.has_scope(Scope::Vision));

        let payload = if !has_scope {
            tracing::warn!(
                session_id = %self.id,
                agent_id = %msg.agent_id,
                "Frame request without vision scope"
            );
            serde_json::json!({ "error": "vision scope not granted", "available": false })
        } else if let Some(vision) = &self.vision {
            vision.start_analysis(&self.id).await;
            let result = vision.analysis_result(VISION_ATTACH_WAIT).await;
            if result.available {
                serde_json::json!({
                    "description": result.description,
                    "timestamp": result.timestamp_ms,
                    "available": true,
                })
            } else {
                serde_json::json!({ "error": "no frames available", "available": false })
            }
        } else {
            serde_json::json!({ "error": "vision not configured", "available": false })
        };

        let reply = AgentMessage::new(MessageKind::FrameResponse, &self.id)
            .with_request_id(&msg.request_id)
            .with_agent_id(&msg.agent_id)
            .with_user_id(&self.config.user.user_id)
            .with_payload(payload);

        if let Err(e) = self.bus.publish_response(reply).await {
            tracing::warn!(session_id = %self.id, error = %e, "Frame response publish failed");
        }
    }

    /// First complete sentence won: cancel the losers, tell the
    /// client, and keep only the winner active.
    async fn announce_winner(&self, winner: &str) {
        if let Some(losers) = self.arbiter.losers() {
            for loser in &losers {
                if let Err(e) = self
                    .bus
                    .publish_cancellation(loser, &self.id, LOST_ARBITRATION)
                    .await
                {
                    tracing::warn!(session_id = %self.id, agent_id = %loser, error = %e,
                        "Cancellation publish failed");
                }
                let _ = self
                    .connection
                    .send(ClientEvent::interrupt(loser, LOST_ARBITRATION))
                    .await;
            }
        }

        self.active_agents.lock().retain(|id| id == winner);
        let _ = self.connection.send(ClientEvent::TtsStart).await;
        tracing::info!(session_id = %self.id, winner = %winner, "Arbitration decided");
    }

    // ------------------------------------------------------------------
    // Controller action execution
    // ------------------------------------------------------------------

    async fn execute_actions(&self, transition: &Transition) {
        let Some(reason) = transition.reason else {
            return;
        };

        for action in &transition.actions {
            match action {
                SpeechAction::StopTts => self.stop_tts().await,
                SpeechAction::CancelAgent => self.cancel_active_agents(reason.as_str()).await,
                SpeechAction::PauseOutput => {
                    if let Some(output) = self.connection.output_controller() {
                        output.pause_output().await;
                    }
                },
                SpeechAction::ResumeOutput => {
                    if let Some(output) = self.connection.output_controller() {
                        output.resume_output().await;
                    }
                },
                SpeechAction::EndUtterance => {
                    tracing::debug!(session_id = %self.id, "Utterance end");
                },
            }
        }
    }

    /// Drain the queue, cancel the bridge, and flush any audio still
    /// queued on the connection.
    async fn stop_tts(&self) {
        self.queue.clear();
        self.connection.flush_audio_queue().await;
    }

    async fn cancel_active_agents(&self, reason: &str) {
        let ids = std::mem::take(&mut *self.active_agents.lock());
        for agent_id in &ids {
            if let Err(e) = self
                .bus
                .publish_cancellation(agent_id, &self.id, reason)
                .await
            {
                tracing::warn!(session_id = %self.id, agent_id = %agent_id, error = %e,
                    "Cancellation publish failed");
            }
            let _ = self
                .connection
                .send(ClientEvent::interrupt(agent_id, reason))
                .await;
        }
        self.arbiter.reset();
        self.sentences.reset();
    }

    async fn emit_error(&self, source: EventSource, message: String) {
        tracing::warn!(session_id = %self.id, source = ?source, message = %message, "Session error");
        let _ = self
            .connection
            .send(ClientEvent::error(source, message))
            .await;
    }
}
