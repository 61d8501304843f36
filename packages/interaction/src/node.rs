//! The closed set of steps an interaction can be in.
//!
//! # The Node Contract
//!
//! - `prepare` loads whatever the node needs to offer edges. It is re-run on
//!   every replay, so it must be idempotent and free of side effects.
//! - `apply` queues the node's effects. It runs exactly once, when the node is
//!   first appended, and never during replay.
//! - `derive_edges` computes the admissible transitions. Nodes that end a
//!   sub-flow hand this to the intent, which is how intents shape the flow.
//!
//! Data gathered by `prepare` lives in `#[serde(skip)]` fields and never
//! reaches the persisted payload.

use crate::context::Context;
use crate::edge::Edge;
use crate::effect::EffectQueue;
use crate::envelope::{Envelope, Registry, Tagged};
use crate::error::{EnvelopeError, InteractionResult};
use crate::graph::Graph;
use crate::steps::authenticate::{
    AuthenticationBeginNode, AuthenticationEndNode, AuthenticationOobTriggerNode,
};
use crate::steps::enroll::{
    CreateAuthenticatorBeginNode, CreateAuthenticatorEndNode, CreateAuthenticatorOobSetupNode,
    CreateAuthenticatorTotpSetupNode,
};
use crate::steps::finalize::{
    DoCreateAuthenticatorNode, DoCreateIdentityNode, DoCreateSessionNode, DoCreateUserNode,
};
use crate::steps::forgot_password::{ForgotPasswordBeginNode, ForgotPasswordEndNode, ResetPasswordNode};
use crate::steps::identity::{
    CreateIdentityBeginNode, CreateIdentityEndNode, SelectIdentityBeginNode, SelectIdentityEndNode,
    UseUserNode,
};

macro_rules! nodes {
    ($($variant:ident($payload:ty)),+ $(,)?) => {
        /// One step of an interaction.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Node {
            $($variant($payload)),+
        }

        $(
            impl From<$payload> for Node {
                fn from(node: $payload) -> Self {
                    Node::$variant(node)
                }
            }
        )+

        impl Node {
            /// The persisted discriminant.
            pub fn kind(&self) -> &'static str {
                match self {
                    $(Node::$variant(_) => <$payload as Tagged>::KIND),+
                }
            }

            pub fn to_envelope(&self) -> Result<Envelope, EnvelopeError> {
                match self {
                    $(Node::$variant(node) => Envelope::encode(node)),+
                }
            }
        }

        pub(crate) fn register_all(registry: &mut Registry) {
            $(registry.register_node::<$payload>();)+
        }
    };
}

nodes! {
    SelectIdentityBegin(SelectIdentityBeginNode),
    SelectIdentityEnd(SelectIdentityEndNode),
    UseUser(UseUserNode),
    AuthenticationBegin(AuthenticationBeginNode),
    AuthenticationOobTrigger(AuthenticationOobTriggerNode),
    AuthenticationEnd(AuthenticationEndNode),
    CreateIdentityBegin(CreateIdentityBeginNode),
    CreateIdentityEnd(CreateIdentityEndNode),
    CreateAuthenticatorBegin(CreateAuthenticatorBeginNode),
    CreateAuthenticatorTotpSetup(CreateAuthenticatorTotpSetupNode),
    CreateAuthenticatorOobSetup(CreateAuthenticatorOobSetupNode),
    CreateAuthenticatorEnd(CreateAuthenticatorEndNode),
    DoCreateUser(DoCreateUserNode),
    DoCreateIdentity(DoCreateIdentityNode),
    DoCreateAuthenticator(DoCreateAuthenticatorNode),
    DoCreateSession(DoCreateSessionNode),
    ForgotPasswordBegin(ForgotPasswordBeginNode),
    ForgotPasswordEnd(ForgotPasswordEndNode),
    ResetPassword(ResetPasswordNode),
}

impl Node {
    pub async fn prepare(&mut self, ctx: &Context, graph: &Graph) -> InteractionResult<()> {
        match self {
            Node::SelectIdentityEnd(node) => node.prepare(ctx).await,
            Node::UseUser(node) => node.prepare(ctx).await,
            Node::AuthenticationBegin(node) => node.prepare(ctx, graph).await,
            Node::CreateAuthenticatorBegin(node) => node.prepare(ctx, graph).await,
            Node::SelectIdentityBegin(_)
            | Node::AuthenticationOobTrigger(_)
            | Node::AuthenticationEnd(_)
            | Node::CreateIdentityBegin(_)
            | Node::CreateIdentityEnd(_)
            | Node::CreateAuthenticatorTotpSetup(_)
            | Node::CreateAuthenticatorOobSetup(_)
            | Node::CreateAuthenticatorEnd(_)
            | Node::DoCreateUser(_)
            | Node::DoCreateIdentity(_)
            | Node::DoCreateAuthenticator(_)
            | Node::DoCreateSession(_)
            | Node::ForgotPasswordBegin(_)
            | Node::ForgotPasswordEnd(_)
            | Node::ResetPassword(_) => Ok(()),
        }
    }

    pub fn apply(&self, effects: &mut EffectQueue, graph: &Graph) -> InteractionResult<()> {
        match self {
            Node::AuthenticationOobTrigger(node) => node.apply(effects),
            Node::CreateAuthenticatorOobSetup(node) => node.apply(effects),
            Node::DoCreateUser(node) => node.apply(effects),
            Node::DoCreateIdentity(node) => return node.apply(effects, graph),
            Node::DoCreateAuthenticator(node) => node.apply(effects),
            Node::DoCreateSession(node) => node.apply(effects),
            Node::ForgotPasswordEnd(node) => node.apply(effects),
            Node::ResetPassword(node) => node.apply(effects),
            Node::SelectIdentityBegin(_)
            | Node::SelectIdentityEnd(_)
            | Node::UseUser(_)
            | Node::AuthenticationBegin(_)
            | Node::AuthenticationEnd(_)
            | Node::CreateIdentityBegin(_)
            | Node::CreateIdentityEnd(_)
            | Node::CreateAuthenticatorBegin(_)
            | Node::CreateAuthenticatorTotpSetup(_)
            | Node::CreateAuthenticatorEnd(_)
            | Node::ForgotPasswordBegin(_) => {}
        }
        Ok(())
    }

    pub fn derive_edges(&self, graph: &Graph) -> InteractionResult<Vec<Edge>> {
        match self {
            Node::SelectIdentityBegin(node) => Ok(node.derive_edges()),
            Node::AuthenticationBegin(node) => node.derive_edges(graph),
            Node::AuthenticationOobTrigger(node) => Ok(node.derive_edges()),
            Node::CreateIdentityBegin(node) => Ok(node.derive_edges()),
            Node::CreateAuthenticatorBegin(node) => Ok(node.derive_edges(graph)),
            Node::CreateAuthenticatorTotpSetup(node) => Ok(node.derive_edges()),
            Node::CreateAuthenticatorOobSetup(node) => Ok(node.derive_edges()),
            Node::ForgotPasswordBegin(node) => Ok(node.derive_edges()),
            Node::ForgotPasswordEnd(node) => Ok(node.derive_edges()),
            Node::SelectIdentityEnd(_)
            | Node::UseUser(_)
            | Node::AuthenticationEnd(_)
            | Node::CreateIdentityEnd(_)
            | Node::CreateAuthenticatorEnd(_)
            | Node::DoCreateUser(_)
            | Node::DoCreateIdentity(_)
            | Node::DoCreateAuthenticator(_)
            | Node::DoCreateSession(_)
            | Node::ResetPassword(_) => graph.intent().derive_edges_for_node(graph, self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AuthenticationStage, AuthenticatorInfo, AuthenticatorKind, AuthenticatorTag};
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_kind_matches_envelope_discriminant() {
        let node = Node::from(AuthenticationBeginNode::new(AuthenticationStage::Secondary));
        let envelope = node.to_envelope().unwrap();
        assert_eq!(node.kind(), "authentication_begin");
        assert_eq!(envelope.kind, node.kind());
    }

    #[test]
    fn test_prepared_data_is_not_persisted() {
        let mut begin = AuthenticationBeginNode::new(AuthenticationStage::Primary);
        begin.enrolled = vec![AuthenticatorInfo {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            kind: AuthenticatorKind::Password,
            tag: AuthenticatorTag::Primary,
            secret: "digest".into(),
            oob_target: None,
            created_at: Utc::now(),
        }];
        let envelope = Node::from(begin).to_envelope().unwrap();
        assert_eq!(envelope.payload, serde_json::json!({ "stage": "primary" }));
    }

    #[test]
    fn test_every_variant_is_registered_once() {
        let registry = Registry::standard();
        for kind in [
            "select_identity_begin",
            "select_identity_end",
            "use_user",
            "authentication_begin",
            "authentication_oob_trigger",
            "authentication_end",
            "create_identity_begin",
            "create_identity_end",
            "create_authenticator_begin",
            "create_authenticator_totp_setup",
            "create_authenticator_oob_setup",
            "create_authenticator_end",
            "do_create_user",
            "do_create_identity",
            "do_create_authenticator",
            "do_create_session",
            "forgot_password_begin",
            "forgot_password_end",
            "reset_password",
        ] {
            assert!(registry.has_node(kind), "{} is not registered", kind);
        }
    }
}
