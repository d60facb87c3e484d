//! Health-aware lexical router
//!
//! Builds an inverted index from descriptor tokens to agent ids and
//! scores requests against it. Health only breaks ties: any healthy
//! agent beats any unhealthy one, lower latency beats higher, and
//! unknown latency ranks worst among the healthy.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};

use voicehub_core::{AgentDescriptor, HealthMetrics};

/// Token weights by descriptor field.
const WEIGHT_KEYWORD: u32 = 3;
const WEIGHT_CAPABILITY: u32 = 2;
const WEIGHT_TEXT: u32 = 1;

/// Lowercase, split on non-alphanumeric, drop tokens shorter than
/// two characters.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_string)
        .collect()
}

fn token_set<'a>(parts: impl Iterator<Item = &'a str>) -> BTreeSet<String> {
    parts.flat_map(tokenize).collect()
}

#[derive(Default)]
struct RouterState {
    /// token -> agent id -> weight
    index: HashMap<String, HashMap<String, u32>>,
    /// Sorted id fingerprint of the last indexed agent list
    indexed_ids: Vec<String>,
    health: HashMap<String, HealthMetrics>,
}

impl RouterState {
    fn rebuild(&mut self, agents: &[AgentDescriptor]) {
        self.index.clear();
        self.indexed_ids = fingerprint(agents);

        for agent in agents {
            let keywords = token_set(agent.keywords.iter().map(String::as_str));
            let capabilities = token_set(agent.capabilities.iter().map(String::as_str));
            let text = token_set([agent.description.as_str(), agent.name.as_str()].into_iter());

            let all: BTreeSet<&String> = keywords.iter().chain(&capabilities).chain(&text).collect();
            for token in all {
                let mut weight = 0;
                if keywords.contains(token) {
                    weight += WEIGHT_KEYWORD;
                }
                if capabilities.contains(token) {
                    weight += WEIGHT_CAPABILITY;
                }
                if text.contains(token) {
                    weight += WEIGHT_TEXT;
                }
                self.index
                    .entry(token.clone())
                    .or_default()
                    .insert(agent.id.clone(), weight);
            }
        }
    }

    fn score(&self, tokens: &[String], agent_id: &str) -> u32 {
        tokens
            .iter()
            .filter_map(|t| self.index.get(t))
            .filter_map(|by_agent| by_agent.get(agent_id))
            .sum()
    }

    /// (class, latency): healthy-with-latency < healthy-unknown <
    /// unhealthy. Agents without a health entry count as healthy
    /// with unknown latency.
    fn health_key(&self, agent_id: &str) -> (u8, i64) {
        match self.health.get(agent_id) {
            Some(h) if h.healthy && !h.latency_unknown() => (0, h.latency_ms),
            Some(h) if h.healthy => (1, 0),
            Some(_) => (2, 0),
            None => (1, 0),
        }
    }

    fn is_healthy(&self, agent_id: &str) -> bool {
        self.health.get(agent_id).map_or(true, |h| h.healthy)
    }

    /// Healthiest agent for token-less requests: healthy and lowest
    /// known latency; unknown latency last; none healthy -> None.
    fn healthiest(&self, agents: &[AgentDescriptor]) -> Option<String> {
        agents
            .iter()
            .filter(|a| self.is_healthy(&a.id))
            .min_by_key(|a| self.health_key(&a.id))
            .map(|a| a.id.clone())
    }
}

fn fingerprint(agents: &[AgentDescriptor]) -> Vec<String> {
    let mut ids: Vec<String> = agents.iter().map(|a| a.id.clone()).collect();
    ids.sort_unstable();
    ids
}

/// Request-to-candidates matcher. Pure: impossible inputs produce an
/// empty result, never an error.
#[derive(Default)]
pub struct SmartRouter {
    inner: Mutex<RouterState>,
}

impl SmartRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the inverted index for `agents`, replacing any prior
    /// index. Idempotent.
    pub fn index(&self, agents: &[AgentDescriptor]) {
        let mut state = self.inner.lock();
        state.rebuild(agents);
        tracing::debug!(
            agents = agents.len(),
            tokens = state.index.len(),
            "Router index rebuilt"
        );
    }

    /// Replace the health table wholesale.
    pub fn set_health(&self, health: HashMap<String, HealthMetrics>) {
        self.inner.lock().health = health;
    }

    /// Order `agents` by relevance to `request`, most-preferred
    /// first. Empty result means "no match"; the caller decides the
    /// fallback.
    pub fn route(&self, request: &str, agents: &[AgentDescriptor]) -> Vec<String> {
        if agents.is_empty() {
            return Vec::new();
        }
        if agents.len() == 1 {
            return vec![agents[0].id.clone()];
        }

        let mut state = self.inner.lock();

        if fingerprint(agents) != state.indexed_ids {
            state.rebuild(agents);
        }

        let tokens = tokenize(request);
        if tokens.is_empty() {
            return state
                .healthiest(agents)
                .map(|id| vec![id])
                .unwrap_or_default();
        }

        let mut scored: Vec<(String, u32)> = agents
            .iter()
            .map(|a| (a.id.clone(), state.score(&tokens, &a.id)))
            .filter(|(_, score)| *score > 0)
            .collect();

        // Stable: ties keep the input order of `agents`.
        scored.sort_by(|(a_id, a_score), (b_id, b_score)| {
            b_score
                .cmp(a_score)
                .then_with(|| state.health_key(a_id).cmp(&state.health_key(b_id)))
        });

        scored.into_iter().map(|(id, _)| id).collect()
    }
}
