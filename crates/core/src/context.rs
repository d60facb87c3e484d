//! User context and scope-redacted utterance payloads

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::agent::Scope;

/// Identity of the user behind a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// The user block of an utterance payload, already reduced to what
/// the receiving agent is allowed to see.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl UserInfo {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none() && self.ip.is_none()
    }
}

/// The utterance payload fanned out to agents.
///
/// Two agents with different scope sets must never receive a shared
/// payload; build one per scope partition with [`UtterancePayload::scoped`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UtterancePayload {
    pub text: String,
    pub is_final: bool,
    /// Latest frame description, vision scope only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserInfo>,
}

impl UtterancePayload {
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            vision: None,
            user: None,
        }
    }

    /// Copy of this payload with exactly the fields the given scope
    /// set authorizes: `profile` reveals the name, `email` the email,
    /// `location` the IP, `vision` the frame description.
    pub fn scoped(&self, ctx: &UserContext, scopes: &BTreeSet<Scope>) -> UtterancePayload {
        let user = UserInfo {
            name: scopes
                .contains(&Scope::Profile)
                .then(|| ctx.name.clone())
                .flatten(),
            email: scopes
                .contains(&Scope::Email)
                .then(|| ctx.email.clone())
                .flatten(),
            ip: scopes
                .contains(&Scope::Location)
                .then(|| ctx.ip.clone())
                .flatten(),
        };

        UtterancePayload {
            text: self.text.clone(),
            is_final: self.is_final,
            vision: if scopes.contains(&Scope::Vision) {
                self.vision.clone()
            } else {
                None
            },
            user: (!user.is_empty()).then_some(user),
        }
    }
}
