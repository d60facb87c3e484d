//! Agent descriptors, scopes, and health metrics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A label authorizing an agent to see the corresponding field of
/// the utterance payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// User display name
    Profile,
    /// User email address
    Email,
    /// User IP address
    Location,
    /// Frame descriptions and frame requests
    Vision,
}

impl Scope {
    /// All scopes relevant to payload redaction.
    pub const ALL: [Scope; 4] = [Scope::Profile, Scope::Email, Scope::Location, Scope::Vision];
}

/// Static description of a remote agent worker.
///
/// Immutable after indexing; the agent list is replaced by full
/// swap, never patched in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Stable identity
    pub id: String,
    /// Model tag, if the agent advertises one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Human-readable name
    #[serde(default)]
    pub name: String,
    /// Free-text description
    #[serde(default)]
    pub description: String,
    /// Routing keywords
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Declared capabilities
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Example queries the agent handles well
    #[serde(default)]
    pub example_queries: Vec<String>,
    /// Scopes granted to this agent
    #[serde(default)]
    pub granted_scopes: Vec<Scope>,
}

impl AgentDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Granted scopes intersected with the redaction-relevant set.
    pub fn relevant_scopes(&self) -> BTreeSet<Scope> {
        self.granted_scopes.iter().copied().collect()
    }

    pub fn has_scope(&self, scope: Scope) -> bool {
        self.granted_scopes.contains(&scope)
    }
}

/// Health snapshot for one agent, overwritten wholesale by
/// `set_health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMetrics {
    /// Round-trip latency; -1 means unknown
    pub latency_ms: i64,
    /// Load factor in 0..1
    pub load: f32,
    /// Whether the agent is considered healthy
    pub healthy: bool,
    /// When this snapshot was taken
    pub updated_at: DateTime<Utc>,
}

impl HealthMetrics {
    pub fn healthy_with_latency(latency_ms: i64) -> Self {
        Self {
            latency_ms,
            load: 0.0,
            healthy: true,
            updated_at: Utc::now(),
        }
    }

    pub fn latency_unknown(&self) -> bool {
        self.latency_ms < 0
    }
}

impl Default for HealthMetrics {
    fn default() -> Self {
        Self {
            latency_ms: -1,
            load: 0.0,
            healthy: true,
            updated_at: Utc::now(),
        }
    }
}
