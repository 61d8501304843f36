//! Resetting a forgotten password with a one-time code.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{check_new_password, is_reachable, login_id_from, require};
use crate::context::Context;
use crate::edge::Edge;
use crate::effect::{EffectAction, EffectQueue};
use crate::envelope::Tagged;
use crate::error::{InputError, InteractionError, InteractionResult};
use crate::input::Input;
use crate::model::{
    AuthenticatorInfo, AuthenticatorKind, AuthenticatorSpec, AuthenticatorTag, IdentityInfo,
    LifecycleEvent, OobChallenge,
};
use crate::node::Node;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForgotPasswordBeginNode {}

impl Tagged for ForgotPasswordBeginNode {
    const KIND: &'static str = "forgot_password_begin";
}

impl ForgotPasswordBeginNode {
    pub(crate) fn derive_edges(&self) -> Vec<Edge> {
        vec![Edge::ForgotPassword]
    }
}

/// A reset code was sent to `identity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForgotPasswordEndNode {
    pub identity: IdentityInfo,
    pub challenge: OobChallenge,
}

impl Tagged for ForgotPasswordEndNode {
    const KIND: &'static str = "forgot_password_end";
}

impl ForgotPasswordEndNode {
    pub(crate) fn apply(&self, effects: &mut EffectQueue) {
        effects.immediate(EffectAction::SendResetPasswordCode {
            channel: self.challenge.channel,
            target: self.challenge.target.clone(),
            code: self.challenge.code.clone(),
        });
    }

    pub(crate) fn derive_edges(&self) -> Vec<Edge> {
        vec![Edge::ResetPassword {
            identity: self.identity.clone(),
            challenge: self.challenge.clone(),
        }]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetPasswordNode {
    pub user_id: Uuid,
    pub authenticator: AuthenticatorInfo,
    /// The user had no password yet and one was created.
    pub created: bool,
}

impl Tagged for ResetPasswordNode {
    const KIND: &'static str = "reset_password";
}

impl ResetPasswordNode {
    pub(crate) fn apply(&self, effects: &mut EffectQueue) {
        let authenticator = self.authenticator.clone();
        effects.transactional(if self.created {
            EffectAction::CreateAuthenticator { authenticator }
        } else {
            EffectAction::UpdateAuthenticator { authenticator }
        });
        effects.transactional(EffectAction::DispatchEvent {
            event: LifecycleEvent::PasswordReset {
                user_id: self.user_id,
            },
        });
    }
}

// =============================================================================
// Edges
// =============================================================================

pub(crate) async fn send_code(ctx: &Context, input: Option<&dyn Input>) -> InteractionResult<Node> {
    let login_id = login_id_from(&ctx.config, input)?;
    if !is_reachable(login_id.key) {
        return Err(InputError::LoginIdKeyNotAllowed { key: login_id.key }.into());
    }

    let identity = ctx
        .identities
        .get_by_login_id(&login_id)
        .await?
        .ok_or(InputError::UserNotFound)?;
    let target = identity.oob_target().ok_or_else(|| {
        InteractionError::invalid_state(format!("identity {} has no oob target", identity.id))
    })?;

    let oob = &ctx.config.oob;
    let challenge = OobChallenge {
        channel: target.channel,
        target: target.target,
        code: ctx.codes.generate_code(oob.code_length),
        expire_at: ctx.now() + oob.code_ttl(),
    };

    Ok(ForgotPasswordEndNode {
        identity,
        challenge,
    }
    .into())
}

pub(crate) async fn reset(
    ctx: &Context,
    identity: &IdentityInfo,
    challenge: &OobChallenge,
    input: Option<&dyn Input>,
) -> InteractionResult<Node> {
    let code = require(input.and_then(|i| i.code()))?;
    let (password, confirmation) = require(input.and_then(|i| i.new_password()))?;

    challenge.verify(code, ctx.now())?;
    check_new_password(&ctx.config, password, confirmation)?;

    let user_id = identity.user_id;
    let existing = ctx
        .authenticators
        .list(user_id)
        .await?
        .into_iter()
        .find(|a| a.kind == AuthenticatorKind::Password && a.tag == AuthenticatorTag::Primary);

    let (authenticator, created) = match existing {
        Some(current) => (
            ctx.authenticators.reset_secret(&current, password).await?,
            false,
        ),
        None => (
            ctx.authenticators
                .new_authenticator(AuthenticatorSpec {
                    user_id,
                    kind: AuthenticatorKind::Password,
                    tag: AuthenticatorTag::Primary,
                    secret: Some(password.to_string()),
                    oob_target: None,
                })
                .await?,
            true,
        ),
    };

    Ok(ResetPasswordNode {
        user_id,
        authenticator,
        created,
    }
    .into())
}
