//! Nodes that commit what the flow gathered.
//!
//! Each of these queues transactional effects in `apply`. Nothing reaches
//! storage until the interaction finalizes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::Context;
use crate::effect::{EffectAction, EffectQueue};
use crate::envelope::Tagged;
use crate::error::InteractionResult;
use crate::graph::Graph;
use crate::model::{
    AuthenticatorInfo, IdentityInfo, LifecycleEvent, SessionCreateReason, SessionInfo,
};
use crate::node::Node;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoCreateUserNode {
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Tagged for DoCreateUserNode {
    const KIND: &'static str = "do_create_user";
}

impl DoCreateUserNode {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            created_at: now,
        }
    }

    pub(crate) fn apply(&self, effects: &mut EffectQueue) {
        effects.transactional(EffectAction::CreateUser {
            user_id: self.user_id,
            created_at: self.created_at,
        });
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoCreateIdentityNode {
    pub identities: Vec<IdentityInfo>,
    /// Whether this completes a signup and announces the new user.
    pub user_created: bool,
}

impl Tagged for DoCreateIdentityNode {
    const KIND: &'static str = "do_create_identity";
}

impl DoCreateIdentityNode {
    pub(crate) fn apply(&self, effects: &mut EffectQueue, graph: &Graph) -> InteractionResult<()> {
        for identity in &self.identities {
            effects.transactional(EffectAction::CreateIdentity {
                identity: identity.clone(),
            });
        }
        if self.user_created {
            effects.transactional(EffectAction::DispatchEvent {
                event: LifecycleEvent::UserCreated {
                    user_id: graph.user_id()?,
                    login_ids: self.identities.iter().map(|i| i.login_id.clone()).collect(),
                },
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoCreateAuthenticatorNode {
    pub authenticators: Vec<AuthenticatorInfo>,
    /// Emit `authenticator.added` for each one.
    pub announce: bool,
}

impl Tagged for DoCreateAuthenticatorNode {
    const KIND: &'static str = "do_create_authenticator";
}

impl DoCreateAuthenticatorNode {
    pub(crate) fn apply(&self, effects: &mut EffectQueue) {
        for authenticator in &self.authenticators {
            effects.transactional(EffectAction::CreateAuthenticator {
                authenticator: authenticator.clone(),
            });
            if self.announce {
                effects.transactional(EffectAction::DispatchEvent {
                    event: LifecycleEvent::AuthenticatorAdded {
                        user_id: authenticator.user_id,
                        authenticator_id: authenticator.id,
                        kind: authenticator.kind,
                    },
                });
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoCreateSessionNode {
    pub session: SessionInfo,
}

impl Tagged for DoCreateSessionNode {
    const KIND: &'static str = "do_create_session";
}

impl DoCreateSessionNode {
    pub(crate) fn apply(&self, effects: &mut EffectQueue) {
        effects.transactional(EffectAction::CreateSession {
            session: self.session.clone(),
        });
    }
}

// =============================================================================
// Edges
// =============================================================================

pub(crate) fn do_create_identity(graph: &Graph, user_created: bool) -> Node {
    DoCreateIdentityNode {
        identities: graph.state().new_identities.clone(),
        user_created,
    }
    .into()
}

pub(crate) fn do_create_authenticator(graph: &Graph, announce: bool) -> Node {
    DoCreateAuthenticatorNode {
        authenticators: graph.state().new_authenticators.clone(),
        announce,
    }
    .into()
}

pub(crate) fn do_create_session(
    ctx: &Context,
    graph: &Graph,
    reason: SessionCreateReason,
) -> InteractionResult<Node> {
    let state = graph.state();
    let amr = [&state.primary_authenticator, &state.secondary_authenticator]
        .into_iter()
        .flatten()
        .map(|a| a.kind)
        .collect();

    Ok(DoCreateSessionNode {
        session: SessionInfo {
            id: Uuid::new_v4(),
            user_id: graph.user_id()?,
            reason,
            client_id: graph.client_id().map(str::to_string),
            amr,
            created_at: ctx.now(),
        },
    }
    .into())
}
