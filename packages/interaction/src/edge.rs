//! Admissible transitions out of a node.
//!
//! Edges are never persisted; they are recomputed from the graph on every
//! request. `instantiate` checks the input the edge needs and returns the
//! next node, not yet prepared or applied.

use crate::context::Context;
use crate::error::InteractionResult;
use crate::graph::Graph;
use crate::input::Input;
use crate::model::{
    AuthenticationStage, AuthenticatorInfo, AuthenticatorKind, IdentityInfo, OobChallenge,
    OobTarget, SessionCreateReason,
};
use crate::node::Node;
use crate::steps::authenticate::{self, AuthenticationBeginNode};
use crate::steps::enroll::{self, CreateAuthenticatorBeginNode};
use crate::steps::finalize;
use crate::steps::forgot_password;
use crate::steps::identity::{self, CreateIdentityBeginNode};

#[derive(Debug, Clone, PartialEq)]
pub enum Edge {
    SelectIdentityLoginId,

    AuthenticationBegin {
        stage: AuthenticationStage,
    },
    AuthenticationPassword {
        stage: AuthenticationStage,
        authenticators: Vec<AuthenticatorInfo>,
    },
    AuthenticationTotp {
        stage: AuthenticationStage,
        authenticators: Vec<AuthenticatorInfo>,
    },
    AuthenticationOobTrigger {
        stage: AuthenticationStage,
        authenticators: Vec<AuthenticatorInfo>,
    },
    AuthenticationOob {
        stage: AuthenticationStage,
        authenticator: AuthenticatorInfo,
        challenge: OobChallenge,
    },
    /// Skip (or finish) the stage.
    AuthenticationEnd {
        stage: AuthenticationStage,
        optional: bool,
    },

    CreateIdentityBegin,
    CreateIdentityLoginId,

    CreateAuthenticatorBegin {
        stage: AuthenticationStage,
        kind: Option<AuthenticatorKind>,
    },
    CreateAuthenticatorPassword {
        stage: AuthenticationStage,
    },
    CreateAuthenticatorTotpSetup {
        stage: AuthenticationStage,
    },
    CreateAuthenticatorTotp {
        stage: AuthenticationStage,
        authenticator: AuthenticatorInfo,
    },
    CreateAuthenticatorOobSetup {
        stage: AuthenticationStage,
        target: OobTarget,
    },
    CreateAuthenticatorOob {
        stage: AuthenticationStage,
        authenticator: AuthenticatorInfo,
        challenge: OobChallenge,
    },
    CreateAuthenticatorEnd {
        stage: AuthenticationStage,
        optional: bool,
    },

    DoCreateIdentity {
        user_created: bool,
    },
    DoCreateAuthenticator {
        announce: bool,
    },
    DoCreateSession {
        reason: SessionCreateReason,
    },

    ForgotPassword,
    ResetPassword {
        identity: IdentityInfo,
        challenge: OobChallenge,
    },
}

impl Edge {
    pub fn kind(&self) -> &'static str {
        match self {
            Edge::SelectIdentityLoginId => "select_identity_login_id",
            Edge::AuthenticationBegin { .. } => "authentication_begin",
            Edge::AuthenticationPassword { .. } => "authentication_password",
            Edge::AuthenticationTotp { .. } => "authentication_totp",
            Edge::AuthenticationOobTrigger { .. } => "authentication_oob_trigger",
            Edge::AuthenticationOob { .. } => "authentication_oob",
            Edge::AuthenticationEnd { .. } => "authentication_end",
            Edge::CreateIdentityBegin => "create_identity_begin",
            Edge::CreateIdentityLoginId => "create_identity_login_id",
            Edge::CreateAuthenticatorBegin { .. } => "create_authenticator_begin",
            Edge::CreateAuthenticatorPassword { .. } => "create_authenticator_password",
            Edge::CreateAuthenticatorTotpSetup { .. } => "create_authenticator_totp_setup",
            Edge::CreateAuthenticatorTotp { .. } => "create_authenticator_totp",
            Edge::CreateAuthenticatorOobSetup { .. } => "create_authenticator_oob_setup",
            Edge::CreateAuthenticatorOob { .. } => "create_authenticator_oob",
            Edge::CreateAuthenticatorEnd { .. } => "create_authenticator_end",
            Edge::DoCreateIdentity { .. } => "do_create_identity",
            Edge::DoCreateAuthenticator { .. } => "do_create_authenticator",
            Edge::DoCreateSession { .. } => "do_create_session",
            Edge::ForgotPassword => "forgot_password",
            Edge::ResetPassword { .. } => "reset_password",
        }
    }

    /// Whether the edge consumes caller input.
    pub fn requires_input(&self) -> bool {
        match self {
            Edge::SelectIdentityLoginId
            | Edge::AuthenticationPassword { .. }
            | Edge::AuthenticationTotp { .. }
            | Edge::AuthenticationOob { .. }
            | Edge::CreateIdentityLoginId
            | Edge::CreateAuthenticatorPassword { .. }
            | Edge::CreateAuthenticatorTotp { .. }
            | Edge::CreateAuthenticatorOob { .. }
            | Edge::ForgotPassword
            | Edge::ResetPassword { .. } => true,
            Edge::AuthenticationBegin { .. }
            | Edge::AuthenticationOobTrigger { .. }
            | Edge::AuthenticationEnd { .. }
            | Edge::CreateIdentityBegin
            | Edge::CreateAuthenticatorBegin { .. }
            | Edge::CreateAuthenticatorTotpSetup { .. }
            | Edge::CreateAuthenticatorOobSetup { .. }
            | Edge::CreateAuthenticatorEnd { .. }
            | Edge::DoCreateIdentity { .. }
            | Edge::DoCreateAuthenticator { .. }
            | Edge::DoCreateSession { .. } => false,
        }
    }

    /// Build the next node from `input`.
    ///
    /// Fails with `InputRequired` when `input` lacks what the edge needs, and
    /// with `InvalidInput` when it is present but wrong.
    pub async fn instantiate(
        &self,
        ctx: &Context,
        graph: &Graph,
        input: Option<&dyn Input>,
    ) -> InteractionResult<Node> {
        match self {
            Edge::SelectIdentityLoginId => identity::select_by_login_id(ctx, input).await,

            Edge::AuthenticationBegin { stage } => Ok(AuthenticationBeginNode::new(*stage).into()),
            Edge::AuthenticationPassword {
                stage,
                authenticators,
            } => authenticate::with_password(ctx, *stage, authenticators, input).await,
            Edge::AuthenticationTotp {
                stage,
                authenticators,
            } => authenticate::with_totp(ctx, *stage, authenticators, input).await,
            Edge::AuthenticationOobTrigger {
                stage,
                authenticators,
            } => authenticate::trigger_oob(ctx, *stage, authenticators),
            Edge::AuthenticationOob {
                stage,
                authenticator,
                challenge,
            } => authenticate::with_oob_code(ctx, *stage, authenticator, challenge, input),
            Edge::AuthenticationEnd { stage, .. } => authenticate::skip(*stage),

            Edge::CreateIdentityBegin => Ok(CreateIdentityBeginNode {}.into()),
            Edge::CreateIdentityLoginId => identity::create_by_login_id(ctx, graph, input).await,

            Edge::CreateAuthenticatorBegin { stage, kind } => {
                Ok(CreateAuthenticatorBeginNode::new(*stage, *kind).into())
            }
            Edge::CreateAuthenticatorPassword { stage } => {
                enroll::with_password(ctx, graph, *stage, input).await
            }
            Edge::CreateAuthenticatorTotpSetup { stage } => {
                enroll::setup_totp(ctx, graph, *stage).await
            }
            Edge::CreateAuthenticatorTotp {
                stage,
                authenticator,
            } => enroll::with_totp(ctx, *stage, authenticator, input).await,
            Edge::CreateAuthenticatorOobSetup { stage, target } => {
                enroll::setup_oob(ctx, graph, *stage, target).await
            }
            Edge::CreateAuthenticatorOob {
                stage,
                authenticator,
                challenge,
            } => enroll::with_oob_code(ctx, *stage, authenticator, challenge, input),
            Edge::CreateAuthenticatorEnd { stage, .. } => Ok(enroll::end(*stage, None)),

            Edge::DoCreateIdentity { user_created } => {
                Ok(finalize::do_create_identity(graph, *user_created))
            }
            Edge::DoCreateAuthenticator { announce } => {
                Ok(finalize::do_create_authenticator(graph, *announce))
            }
            Edge::DoCreateSession { reason } => finalize::do_create_session(ctx, graph, *reason),

            Edge::ForgotPassword => forgot_password::send_code(ctx, input).await,
            Edge::ResetPassword {
                identity,
                challenge,
            } => forgot_password::reset(ctx, identity, challenge, input).await,
        }
    }
}
