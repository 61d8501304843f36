//! Deferred side effects.
//!
//! Nodes never touch storage or the outside world directly. When a node is
//! appended, its `apply` pushes [`Effect`]s onto an [`EffectQueue`]; the
//! service decides when each one runs based on its [`EffectMode`]:
//!
//! - [`EffectMode::Immediate`] - delivered to the event sink once the request's
//!   storage work is done, whether it committed or not (e.g. "send this code")
//! - [`EffectMode::Transactional`] - persisted with the interaction and
//!   executed inside the finalization transaction (e.g. "create this user")
//!
//! # Guarantees
//!
//! - **At most once.** `apply` only runs when a node is first appended, never
//!   during replay, so an effect is queued exactly once per interaction.
//! - **All or nothing.** Transactional effects share one transaction with the
//!   deletion of the interaction token.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{AuthenticatorInfo, IdentityInfo, LifecycleEvent, OobChannel, SessionInfo};

/// When an effect runs relative to the storage transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectMode {
    /// Runs regardless of the transaction outcome.
    Immediate,
    /// Runs only if the finalization transaction commits.
    Transactional,
}

/// The action an effect performs, with everything needed to perform it once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EffectAction {
    CreateUser {
        user_id: Uuid,
        created_at: DateTime<Utc>,
    },
    CreateIdentity {
        identity: IdentityInfo,
    },
    CreateAuthenticator {
        authenticator: AuthenticatorInfo,
    },
    UpdateAuthenticator {
        authenticator: AuthenticatorInfo,
    },
    CreateSession {
        session: SessionInfo,
    },
    DispatchEvent {
        event: LifecycleEvent,
    },
    SendOobCode {
        channel: OobChannel,
        target: String,
        code: String,
    },
    SendResetPasswordCode {
        channel: OobChannel,
        target: String,
        code: String,
    },
}

impl EffectAction {
    pub fn name(&self) -> &'static str {
        match self {
            EffectAction::CreateUser { .. } => "create_user",
            EffectAction::CreateIdentity { .. } => "create_identity",
            EffectAction::CreateAuthenticator { .. } => "create_authenticator",
            EffectAction::UpdateAuthenticator { .. } => "update_authenticator",
            EffectAction::CreateSession { .. } => "create_session",
            EffectAction::DispatchEvent { .. } => "dispatch_event",
            EffectAction::SendOobCode { .. } => "send_oob_code",
            EffectAction::SendResetPasswordCode { .. } => "send_reset_password_code",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Effect {
    pub mode: EffectMode,
    pub action: EffectAction,
}

/// Effects queued while appending nodes during one request.
#[derive(Debug, Default)]
pub struct EffectQueue {
    effects: Vec<Effect>,
}

impl EffectQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an effect that runs regardless of the transaction outcome.
    pub fn immediate(&mut self, action: EffectAction) {
        self.effects.push(Effect {
            mode: EffectMode::Immediate,
            action,
        });
    }

    /// Queue an effect that runs only on commit.
    pub fn transactional(&mut self, action: EffectAction) {
        self.effects.push(Effect {
            mode: EffectMode::Transactional,
            action,
        });
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Split into `(immediate, transactional)`, keeping queue order.
    pub fn split(self) -> (Vec<EffectAction>, Vec<EffectAction>) {
        let mut immediate = Vec::new();
        let mut transactional = Vec::new();
        for effect in self.effects {
            match effect.mode {
                EffectMode::Immediate => immediate.push(effect.action),
                EffectMode::Transactional => transactional.push(effect.action),
            }
        }
        (immediate, transactional)
    }
}
