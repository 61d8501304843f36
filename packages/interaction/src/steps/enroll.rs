//! Enrolling a new authenticator.
//!
//! The kind offered is the first feasible one: the requested kind when the
//! flow names one, otherwise the tenant's priority list for the stage. OOB is
//! only feasible when the user has an email or phone identity to send to.

use serde::{Deserialize, Serialize};

use super::{check_new_password, require};
use crate::context::Context;
use crate::edge::Edge;
use crate::effect::{EffectAction, EffectQueue};
use crate::envelope::Tagged;
use crate::error::{InputError, InteractionResult};
use crate::graph::Graph;
use crate::input::Input;
use crate::model::{
    AuthenticationStage, AuthenticatorInfo, AuthenticatorKind, AuthenticatorSpec, IdentityInfo,
    OobChallenge, OobTarget,
};
use crate::node::Node;

// =============================================================================
// Begin
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateAuthenticatorBeginNode {
    pub stage: AuthenticationStage,
    /// Restrict enrollment to one kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<AuthenticatorKind>,
    /// Where OOB codes could go, loaded by `prepare`.
    #[serde(skip)]
    pub oob_targets: Vec<OobTarget>,
}

impl Tagged for CreateAuthenticatorBeginNode {
    const KIND: &'static str = "create_authenticator_begin";
}

impl CreateAuthenticatorBeginNode {
    pub fn new(stage: AuthenticationStage, kind: Option<AuthenticatorKind>) -> Self {
        Self {
            stage,
            kind,
            oob_targets: Vec::new(),
        }
    }

    pub(crate) async fn prepare(&mut self, ctx: &Context, graph: &Graph) -> InteractionResult<()> {
        let mut identities = graph.state().new_identities.clone();
        identities.extend(ctx.identities.list_by_user(graph.user_id()?).await?);

        self.oob_targets.clear();
        for target in identities.iter().filter_map(IdentityInfo::oob_target) {
            if !self.oob_targets.contains(&target) {
                self.oob_targets.push(target);
            }
        }
        Ok(())
    }

    pub(crate) fn derive_edges(&self, graph: &Graph) -> Vec<Edge> {
        let stage = self.stage;
        let kinds = match self.kind {
            Some(kind) => vec![kind],
            None => graph.config().authentication.authenticators_for(stage).to_vec(),
        };

        let mut edges: Vec<Edge> = kinds
            .into_iter()
            .filter_map(|kind| match kind {
                AuthenticatorKind::Password => Some(Edge::CreateAuthenticatorPassword { stage }),
                AuthenticatorKind::Totp => Some(Edge::CreateAuthenticatorTotpSetup { stage }),
                AuthenticatorKind::OobOtp => self
                    .oob_targets
                    .first()
                    .cloned()
                    .map(|target| Edge::CreateAuthenticatorOobSetup { stage, target }),
            })
            .collect();

        if edges.is_empty() {
            edges.push(Edge::CreateAuthenticatorEnd {
                stage,
                optional: true,
            });
        }

        edges.truncate(1);
        edges
    }
}

// =============================================================================
// TOTP setup
// =============================================================================

/// A TOTP seed was issued and must be confirmed with a code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateAuthenticatorTotpSetupNode {
    pub stage: AuthenticationStage,
    pub authenticator: AuthenticatorInfo,
}

impl Tagged for CreateAuthenticatorTotpSetupNode {
    const KIND: &'static str = "create_authenticator_totp_setup";
}

impl CreateAuthenticatorTotpSetupNode {
    pub(crate) fn derive_edges(&self) -> Vec<Edge> {
        vec![Edge::CreateAuthenticatorTotp {
            stage: self.stage,
            authenticator: self.authenticator.clone(),
        }]
    }
}

// =============================================================================
// OOB setup
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateAuthenticatorOobSetupNode {
    pub stage: AuthenticationStage,
    pub authenticator: AuthenticatorInfo,
    pub challenge: OobChallenge,
}

impl Tagged for CreateAuthenticatorOobSetupNode {
    const KIND: &'static str = "create_authenticator_oob_setup";
}

impl CreateAuthenticatorOobSetupNode {
    pub(crate) fn apply(&self, effects: &mut EffectQueue) {
        effects.immediate(EffectAction::SendOobCode {
            channel: self.challenge.channel,
            target: self.challenge.target.clone(),
            code: self.challenge.code.clone(),
        });
    }

    pub(crate) fn derive_edges(&self) -> Vec<Edge> {
        vec![Edge::CreateAuthenticatorOob {
            stage: self.stage,
            authenticator: self.authenticator.clone(),
            challenge: self.challenge.clone(),
        }]
    }
}

// =============================================================================
// End
// =============================================================================

/// Enrollment is over; `authenticator` is `None` when it was skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateAuthenticatorEndNode {
    pub stage: AuthenticationStage,
    pub authenticator: Option<AuthenticatorInfo>,
}

impl Tagged for CreateAuthenticatorEndNode {
    const KIND: &'static str = "create_authenticator_end";
}

// =============================================================================
// Edges
// =============================================================================

pub(crate) async fn with_password(
    ctx: &Context,
    graph: &Graph,
    stage: AuthenticationStage,
    input: Option<&dyn Input>,
) -> InteractionResult<Node> {
    let (password, confirmation) = require(input.and_then(|i| i.new_password()))?;
    check_new_password(&ctx.config, password, confirmation)?;

    let authenticator = ctx
        .authenticators
        .new_authenticator(spec(graph, stage, AuthenticatorKind::Password, Some(password), None)?)
        .await?;
    Ok(end(stage, Some(authenticator)))
}

pub(crate) async fn setup_totp(
    ctx: &Context,
    graph: &Graph,
    stage: AuthenticationStage,
) -> InteractionResult<Node> {
    let seed = ctx.codes.generate_secret();
    let authenticator = ctx
        .authenticators
        .new_authenticator(spec(graph, stage, AuthenticatorKind::Totp, Some(&seed), None)?)
        .await?;
    Ok(CreateAuthenticatorTotpSetupNode {
        stage,
        authenticator,
    }
    .into())
}

pub(crate) async fn with_totp(
    ctx: &Context,
    stage: AuthenticationStage,
    authenticator: &AuthenticatorInfo,
    input: Option<&dyn Input>,
) -> InteractionResult<Node> {
    let code = require(input.and_then(|i| i.code()))?;
    if !ctx.authenticators.verify_secret(authenticator, code.trim()).await? {
        return Err(InputError::InvalidCode.into());
    }
    Ok(end(stage, Some(authenticator.clone())))
}

pub(crate) async fn setup_oob(
    ctx: &Context,
    graph: &Graph,
    stage: AuthenticationStage,
    target: &OobTarget,
) -> InteractionResult<Node> {
    let authenticator = ctx
        .authenticators
        .new_authenticator(spec(
            graph,
            stage,
            AuthenticatorKind::OobOtp,
            None,
            Some(target.clone()),
        )?)
        .await?;

    let oob = &ctx.config.oob;
    let challenge = OobChallenge {
        channel: target.channel,
        target: target.target.clone(),
        code: ctx.codes.generate_code(oob.code_length),
        expire_at: ctx.now() + oob.code_ttl(),
    };

    Ok(CreateAuthenticatorOobSetupNode {
        stage,
        authenticator,
        challenge,
    }
    .into())
}

pub(crate) fn with_oob_code(
    ctx: &Context,
    stage: AuthenticationStage,
    authenticator: &AuthenticatorInfo,
    challenge: &OobChallenge,
    input: Option<&dyn Input>,
) -> InteractionResult<Node> {
    let code = require(input.and_then(|i| i.code()))?;
    challenge.verify(code, ctx.now())?;
    Ok(end(stage, Some(authenticator.clone())))
}

pub(crate) fn end(stage: AuthenticationStage, authenticator: Option<AuthenticatorInfo>) -> Node {
    CreateAuthenticatorEndNode {
        stage,
        authenticator,
    }
    .into()
}

fn spec(
    graph: &Graph,
    stage: AuthenticationStage,
    kind: AuthenticatorKind,
    secret: Option<&str>,
    oob_target: Option<OobTarget>,
) -> InteractionResult<AuthenticatorSpec> {
    Ok(AuthenticatorSpec {
        user_id: graph.user_id()?,
        kind,
        tag: stage.tag(),
        secret: secret.map(str::to_string),
        oob_target,
    })
}
