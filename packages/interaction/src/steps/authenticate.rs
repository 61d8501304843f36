//! Authenticating with enrolled authenticators.
//!
//! # Edge Selection
//!
//! `AuthenticationBegin` decides which authenticator the user is asked for:
//!
//! 1. keep authenticators with the stage's tag (and, for the primary stage,
//!    those bound to the selected identity)
//! 2. stable-sort them by the tenant's kind priority for the stage
//! 3. group them into one class per kind, in sorted order
//! 4. turn each class into an edge, or a single optional `AuthenticationEnd`
//!    edge when nothing is left
//! 5. offer only the first edge

use serde::{Deserialize, Serialize};

use super::require;
use crate::context::Context;
use crate::edge::Edge;
use crate::effect::{EffectAction, EffectQueue};
use crate::envelope::Tagged;
use crate::error::{InputError, InteractionError, InteractionResult};
use crate::filter::{filter, keep_primary_of_identity, keep_tag, partition_by, stable_sort_by_priority};
use crate::graph::Graph;
use crate::input::Input;
use crate::model::{
    AuthenticationStage, AuthenticatorInfo, AuthenticatorKind, IdentityInfo, OobChallenge,
};
use crate::node::Node;

// =============================================================================
// Begin
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationBeginNode {
    pub stage: AuthenticationStage,
    /// The user's enrolled authenticators, loaded by `prepare`.
    #[serde(skip)]
    pub enrolled: Vec<AuthenticatorInfo>,
}

impl Tagged for AuthenticationBeginNode {
    const KIND: &'static str = "authentication_begin";
}

impl AuthenticationBeginNode {
    pub fn new(stage: AuthenticationStage) -> Self {
        Self {
            stage,
            enrolled: Vec::new(),
        }
    }

    pub(crate) async fn prepare(&mut self, ctx: &Context, graph: &Graph) -> InteractionResult<()> {
        self.enrolled = ctx.authenticators.list(graph.user_id()?).await?;
        Ok(())
    }

    pub(crate) fn derive_edges(&self, graph: &Graph) -> InteractionResult<Vec<Edge>> {
        authentication_edges(
            self.stage,
            &self.enrolled,
            graph.state().identity.as_ref(),
            graph.config().authentication.authenticators_for(self.stage),
        )
    }
}

/// Candidate authenticators for a stage, grouped by kind in priority order.
pub fn candidate_classes(
    stage: AuthenticationStage,
    enrolled: &[AuthenticatorInfo],
    identity: Option<&IdentityInfo>,
    priority: &[AuthenticatorKind],
) -> InteractionResult<Vec<(AuthenticatorKind, Vec<AuthenticatorInfo>)>> {
    let mut predicates = vec![keep_tag(stage.tag())];
    if stage == AuthenticationStage::Primary {
        let identity = identity.ok_or_else(|| {
            InteractionError::invalid_state("primary authentication without a selected identity")
        })?;
        predicates.push(keep_primary_of_identity(identity));
    }

    let mut candidates = filter(enrolled.iter().cloned(), &predicates);
    stable_sort_by_priority(priority, &mut candidates, |a| a.kind);
    Ok(partition_by(candidates, |a| a.kind))
}

/// The edges offered out of `AuthenticationBegin`.
pub fn authentication_edges(
    stage: AuthenticationStage,
    enrolled: &[AuthenticatorInfo],
    identity: Option<&IdentityInfo>,
    priority: &[AuthenticatorKind],
) -> InteractionResult<Vec<Edge>> {
    let mut edges: Vec<Edge> = candidate_classes(stage, enrolled, identity, priority)?
        .into_iter()
        .map(|(kind, authenticators)| match kind {
            AuthenticatorKind::Password => Edge::AuthenticationPassword {
                stage,
                authenticators,
            },
            AuthenticatorKind::Totp => Edge::AuthenticationTotp {
                stage,
                authenticators,
            },
            AuthenticatorKind::OobOtp => Edge::AuthenticationOobTrigger {
                stage,
                authenticators,
            },
        })
        .collect();

    if edges.is_empty() {
        edges.push(Edge::AuthenticationEnd {
            stage,
            optional: true,
        });
    }

    edges.truncate(1);
    Ok(edges)
}

// =============================================================================
// OOB trigger
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationOobTriggerNode {
    pub stage: AuthenticationStage,
    pub authenticator: AuthenticatorInfo,
    pub challenge: OobChallenge,
}

impl Tagged for AuthenticationOobTriggerNode {
    const KIND: &'static str = "authentication_oob_trigger";
}

impl AuthenticationOobTriggerNode {
    pub(crate) fn apply(&self, effects: &mut EffectQueue) {
        effects.immediate(EffectAction::SendOobCode {
            channel: self.challenge.channel,
            target: self.challenge.target.clone(),
            code: self.challenge.code.clone(),
        });
    }

    pub(crate) fn derive_edges(&self) -> Vec<Edge> {
        vec![Edge::AuthenticationOob {
            stage: self.stage,
            authenticator: self.authenticator.clone(),
            challenge: self.challenge.clone(),
        }]
    }
}

// =============================================================================
// End
// =============================================================================

/// The stage is over; `authenticator` is `None` when it was skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationEndNode {
    pub stage: AuthenticationStage,
    pub authenticator: Option<AuthenticatorInfo>,
}

impl Tagged for AuthenticationEndNode {
    const KIND: &'static str = "authentication_end";
}

// =============================================================================
// Edges
// =============================================================================

pub(crate) async fn with_password(
    ctx: &Context,
    stage: AuthenticationStage,
    authenticators: &[AuthenticatorInfo],
    input: Option<&dyn Input>,
) -> InteractionResult<Node> {
    let password = require(input.and_then(|i| i.password()))?;
    match verify_any(ctx, authenticators, password).await? {
        Some(authenticator) => Ok(end(stage, Some(authenticator))),
        None => Err(InputError::InvalidCredentials.into()),
    }
}

pub(crate) async fn with_totp(
    ctx: &Context,
    stage: AuthenticationStage,
    authenticators: &[AuthenticatorInfo],
    input: Option<&dyn Input>,
) -> InteractionResult<Node> {
    let code = require(input.and_then(|i| i.code()))?;
    match verify_any(ctx, authenticators, code.trim()).await? {
        Some(authenticator) => Ok(end(stage, Some(authenticator))),
        None => Err(InputError::InvalidCode.into()),
    }
}

/// Send a code to the first OOB authenticator of the class.
pub(crate) fn trigger_oob(
    ctx: &Context,
    stage: AuthenticationStage,
    authenticators: &[AuthenticatorInfo],
) -> InteractionResult<Node> {
    let authenticator = authenticators
        .first()
        .cloned()
        .ok_or_else(|| InteractionError::invalid_state("oob trigger without authenticators"))?;
    let target = authenticator.oob_target.clone().ok_or_else(|| {
        InteractionError::invalid_state(format!("oob authenticator {} has no target", authenticator.id))
    })?;

    let oob = &ctx.config.oob;
    let challenge = OobChallenge {
        channel: target.channel,
        target: target.target,
        code: ctx.codes.generate_code(oob.code_length),
        expire_at: ctx.now() + oob.code_ttl(),
    };

    Ok(AuthenticationOobTriggerNode {
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

/// Leave a stage without authenticating.
///
/// Only the secondary stage may be skipped. A selected identity with no bound
/// primary authenticator has no way in.
pub(crate) fn skip(stage: AuthenticationStage) -> InteractionResult<Node> {
    match stage {
        AuthenticationStage::Primary => Err(InputError::InvalidCredentials.into()),
        AuthenticationStage::Secondary => Ok(end(stage, None)),
    }
}

pub(crate) fn end(stage: AuthenticationStage, authenticator: Option<AuthenticatorInfo>) -> Node {
    AuthenticationEndNode {
        stage,
        authenticator,
    }
    .into()
}

async fn verify_any(
    ctx: &Context,
    authenticators: &[AuthenticatorInfo],
    secret: &str,
) -> InteractionResult<Option<AuthenticatorInfo>> {
    for authenticator in authenticators {
        if ctx.authenticators.verify_secret(authenticator, secret).await? {
            return Ok(Some(authenticator.clone()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AuthenticatorTag, LoginId, LoginIdKey, OobChannel, OobTarget};
    use chrono::Utc;
    use uuid::Uuid;

    struct Fixture {
        identity: IdentityInfo,
        password: AuthenticatorInfo,
        oob: AuthenticatorInfo,
        totp: AuthenticatorInfo,
    }

    fn fixture() -> Fixture {
        let user_id = Uuid::new_v4();
        let identity = IdentityInfo {
            id: Uuid::new_v4(),
            user_id,
            login_id: LoginId::parse(LoginIdKey::Email, "alice@example.com").unwrap(),
            created_at: Utc::now(),
        };
        let make = |kind, tag, oob_target| AuthenticatorInfo {
            id: Uuid::new_v4(),
            user_id,
            kind,
            tag,
            secret: String::new(),
            oob_target,
            created_at: Utc::now(),
        };
        Fixture {
            password: make(AuthenticatorKind::Password, AuthenticatorTag::Primary, None),
            oob: make(
                AuthenticatorKind::OobOtp,
                AuthenticatorTag::Primary,
                Some(OobTarget {
                    channel: OobChannel::Email,
                    target: "alice@example.com".into(),
                }),
            ),
            totp: make(AuthenticatorKind::Totp, AuthenticatorTag::Secondary, None),
            identity,
        }
    }

    #[test]
    fn test_unconfigured_kinds_follow_configured_ones() {
        let f = fixture();
        let enrolled = vec![f.oob.clone(), f.password.clone(), f.totp.clone()];

        let classes = candidate_classes(
            AuthenticationStage::Primary,
            &enrolled,
            Some(&f.identity),
            &[AuthenticatorKind::Totp, AuthenticatorKind::Password],
        )
        .unwrap();

        let kinds: Vec<_> = classes.iter().map(|(kind, _)| *kind).collect();
        assert_eq!(kinds, vec![AuthenticatorKind::Password, AuthenticatorKind::OobOtp]);
    }

    #[test]
    fn test_only_first_edge_is_offered() {
        let f = fixture();
        let enrolled = vec![f.oob.clone(), f.password.clone()];

        let edges = authentication_edges(
            AuthenticationStage::Primary,
            &enrolled,
            Some(&f.identity),
            &[AuthenticatorKind::OobOtp, AuthenticatorKind::Password],
        )
        .unwrap();

        assert_eq!(
            edges,
            vec![Edge::AuthenticationOobTrigger {
                stage: AuthenticationStage::Primary,
                authenticators: vec![f.oob],
            }]
        );
    }

    #[test]
    fn test_no_candidates_yields_optional_end() {
        let f = fixture();

        let edges = authentication_edges(
            AuthenticationStage::Secondary,
            &[f.password],
            Some(&f.identity),
            &[AuthenticatorKind::Totp],
        )
        .unwrap();

        assert_eq!(
            edges,
            vec![Edge::AuthenticationEnd {
                stage: AuthenticationStage::Secondary,
                optional: true,
            }]
        );
    }

    #[test]
    fn test_secondary_stage_ignores_identity_binding() {
        let f = fixture();

        let edges = authentication_edges(
            AuthenticationStage::Secondary,
            &[f.password, f.totp.clone()],
            None,
            &[AuthenticatorKind::Totp],
        )
        .unwrap();

        assert_eq!(
            edges,
            vec![Edge::AuthenticationTotp {
                stage: AuthenticationStage::Secondary,
                authenticators: vec![f.totp],
            }]
        );
    }

    #[test]
    fn test_only_secondary_stage_can_be_skipped() {
        let err = skip(AuthenticationStage::Primary).unwrap_err();
        assert!(matches!(
            err,
            InteractionError::InvalidInput(InputError::InvalidCredentials)
        ));

        let node = skip(AuthenticationStage::Secondary).unwrap();
        assert_eq!(node, end(AuthenticationStage::Secondary, None));
    }

    #[test]
    fn test_primary_stage_without_identity_is_invalid_state() {
        let f = fixture();
        let err = authentication_edges(
            AuthenticationStage::Primary,
            &[f.password],
            None,
            &[AuthenticatorKind::Password],
        )
        .unwrap_err();

        assert!(matches!(err, InteractionError::InvalidState(_)));
    }
}
