//! Session registry
//!
//! Process-scoped map of live sessions keyed by session UUID. Owns
//! the manager defaults and pushes agent-list and health updates
//! down to every live session's router.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use voicehub_config::{SessionOverrides, Settings};
use voicehub_core::{AgentBus, AgentDescriptor, HealthMetrics, UserConnection};

use crate::voice_session::VoiceSession;
use crate::SessionError;

/// Registry of live voice sessions.
pub struct SessionManager {
    defaults: RwLock<Settings>,
    sessions: DashMap<String, Arc<VoiceSession>>,
}

impl SessionManager {
    pub fn new(defaults: Settings) -> Arc<Self> {
        Arc::new(Self {
            defaults: RwLock::new(defaults),
            sessions: DashMap::new(),
        })
    }

    /// Create, start, and register a session for one connection.
    pub async fn create(
        &self,
        connection: Arc<dyn UserConnection>,
        bus: Arc<dyn AgentBus>,
        overrides: SessionOverrides,
    ) -> Result<Arc<VoiceSession>, SessionError> {
        self.ensure_capacity().await?;

        let config = overrides.merge(&self.defaults.read());
        let session = VoiceSession::connect(connection, bus, config).await?;
        self.register(session).await
    }

    /// Same as [`SessionManager::create`] but over pre-built
    /// collaborators (tests, alternative sidecars).
    pub async fn create_with_services(
        &self,
        connection: Arc<dyn UserConnection>,
        bus: Arc<dyn AgentBus>,
        stt: Arc<dyn voicehub_core::SpeechTranscriber>,
        synthesizer: Arc<dyn voicehub_core::SpeechSynthesizer>,
        vision: Option<Arc<dyn voicehub_core::VisionService>>,
        overrides: SessionOverrides,
    ) -> Result<Arc<VoiceSession>, SessionError> {
        self.ensure_capacity().await?;

        let config = overrides.merge(&self.defaults.read());
        let session =
            VoiceSession::with_services(connection, bus, stt, synthesizer, vision, config).await?;
        self.register(session).await
    }

    async fn register(
        &self,
        session: Arc<VoiceSession>,
    ) -> Result<Arc<VoiceSession>, SessionError> {
        Arc::clone(&session).start()?;
        self.sessions
            .insert(session.id().to_string(), Arc::clone(&session));
        tracing::info!(
            session_id = %session.id(),
            live = self.sessions.len(),
            "Session registered"
        );
        Ok(session)
    }

    async fn ensure_capacity(&self) -> Result<(), SessionError> {
        let max_sessions = self.defaults.read().max_sessions;
        if self.sessions.len() >= max_sessions {
            // One sweep before refusing: dead connections free slots.
            self.cleanup_disconnected().await;
        }
        if self.sessions.len() >= max_sessions {
            return Err(SessionError::Capacity(max_sessions));
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<VoiceSession>> {
        self.sessions.get(id).map(|entry| Arc::clone(&entry))
    }

    /// Close and drop one session.
    pub async fn remove(&self, id: &str) -> Result<(), SessionError> {
        let (_, session) = self
            .sessions
            .remove(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        session.close().await;
        tracing::info!(session_id = %id, "Session removed");
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn list(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Replace the defaults' agent list and propagate it to every
    /// live session.
    pub fn set_agents(&self, agents: Vec<AgentDescriptor>) {
        self.defaults.write().agents = agents.clone();
        for session in self.sessions.iter() {
            session.set_agents(agents.clone());
        }
        tracing::info!(agents = agents.len(), "Agent list propagated");
    }

    /// Push a fresh health table to every live session's router.
    pub fn set_health(&self, health: HashMap<String, HealthMetrics>) {
        for session in self.sessions.iter() {
            session.set_health(health.clone());
        }
    }

    /// Close sessions whose connection has gone away; returns how
    /// many were reaped.
    pub async fn cleanup_disconnected(&self) -> usize {
        let dead: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| !entry.is_connected())
            .map(|entry| entry.key().clone())
            .collect();

        for id in &dead {
            if let Some((_, session)) = self.sessions.remove(id) {
                session.close().await;
                tracing::info!(session_id = %id, "Reaped disconnected session");
            }
        }
        dead.len()
    }

    /// Close everything (shutdown path).
    pub async fn close_all(&self) {
        let ids = self.list();
        for id in ids {
            if let Some((_, session)) = self.sessions.remove(&id) {
                session.close().await;
            }
        }
    }

    /// Periodic sweep for dead sessions. Returns the shutdown sender
    /// that stops the task.
    pub fn start_cleanup_task(self: Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = self;
        let interval = Duration::from_secs(manager.defaults.read().cleanup_interval_secs);

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let reaped = manager.cleanup_disconnected().await;
                        if reaped > 0 {
                            tracing::info!(reaped, live = manager.count(), "Session cleanup pass");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("Session cleanup task shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }
}
