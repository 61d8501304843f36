//! Top-level goals of an interaction.
//!
//! An intent picks the root node, decides what follows every node that ends
//! a sub-flow, and says which node may finalize the interaction.
//!
//! | Intent              | Root                  | Terminal node             |
//! |---------------------|-----------------------|---------------------------|
//! | `login`             | select identity begin | do create session         |
//! | `signup`            | do create user        | do create session         |
//! | `reset_password`    | forgot password begin | reset password            |
//! | `add_authenticator` | use user              | do create authenticator   |

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::SecondaryAuthenticationMode;
use crate::context::Context;
use crate::edge::Edge;
use crate::envelope::{Envelope, Registry, Tagged};
use crate::error::{EnvelopeError, InteractionError, InteractionResult};
use crate::graph::Graph;
use crate::model::{AuthenticationStage, AuthenticatorKind, SessionCreateReason};
use crate::node::Node;
use crate::steps::finalize::DoCreateUserNode;
use crate::steps::forgot_password::ForgotPasswordBeginNode;
use crate::steps::identity::{SelectIdentityBeginNode, UseUserNode};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginIntent {}

impl Tagged for LoginIntent {
    const KIND: &'static str = "login";
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignupIntent {}

impl Tagged for SignupIntent {
    const KIND: &'static str = "signup";
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetPasswordIntent {}

impl Tagged for ResetPasswordIntent {
    const KIND: &'static str = "reset_password";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddAuthenticatorIntent {
    pub user_id: Uuid,
    pub stage: AuthenticationStage,
    pub kind: AuthenticatorKind,
}

impl Tagged for AddAuthenticatorIntent {
    const KIND: &'static str = "add_authenticator";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Login(LoginIntent),
    Signup(SignupIntent),
    ResetPassword(ResetPasswordIntent),
    AddAuthenticator(AddAuthenticatorIntent),
}

impl From<LoginIntent> for Intent {
    fn from(intent: LoginIntent) -> Self {
        Intent::Login(intent)
    }
}

impl From<SignupIntent> for Intent {
    fn from(intent: SignupIntent) -> Self {
        Intent::Signup(intent)
    }
}

impl From<ResetPasswordIntent> for Intent {
    fn from(intent: ResetPasswordIntent) -> Self {
        Intent::ResetPassword(intent)
    }
}

impl From<AddAuthenticatorIntent> for Intent {
    fn from(intent: AddAuthenticatorIntent) -> Self {
        Intent::AddAuthenticator(intent)
    }
}

pub(crate) fn register_all(registry: &mut Registry) {
    registry.register_intent::<LoginIntent>();
    registry.register_intent::<SignupIntent>();
    registry.register_intent::<ResetPasswordIntent>();
    registry.register_intent::<AddAuthenticatorIntent>();
}

impl Intent {
    pub fn login() -> Self {
        LoginIntent {}.into()
    }

    pub fn signup() -> Self {
        SignupIntent {}.into()
    }

    pub fn reset_password() -> Self {
        ResetPasswordIntent {}.into()
    }

    pub fn add_authenticator(
        user_id: Uuid,
        stage: AuthenticationStage,
        kind: AuthenticatorKind,
    ) -> Self {
        AddAuthenticatorIntent {
            user_id,
            stage,
            kind,
        }
        .into()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Intent::Login(_) => LoginIntent::KIND,
            Intent::Signup(_) => SignupIntent::KIND,
            Intent::ResetPassword(_) => ResetPasswordIntent::KIND,
            Intent::AddAuthenticator(_) => AddAuthenticatorIntent::KIND,
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope, EnvelopeError> {
        match self {
            Intent::Login(intent) => Envelope::encode(intent),
            Intent::Signup(intent) => Envelope::encode(intent),
            Intent::ResetPassword(intent) => Envelope::encode(intent),
            Intent::AddAuthenticator(intent) => Envelope::encode(intent),
        }
    }

    /// The first node of a new interaction.
    pub fn instantiate_root(&self, ctx: &Context) -> Node {
        match self {
            Intent::Login(_) => SelectIdentityBeginNode {}.into(),
            Intent::Signup(_) => DoCreateUserNode::new(ctx.now()).into(),
            Intent::ResetPassword(_) => ForgotPasswordBeginNode {}.into(),
            Intent::AddAuthenticator(intent) => UseUserNode {
                user_id: intent.user_id,
            }
            .into(),
        }
    }

    /// Edges out of a node that ends a sub-flow.
    pub fn derive_edges_for_node(&self, graph: &Graph, node: &Node) -> InteractionResult<Vec<Edge>> {
        let edges = match self {
            Intent::Login(_) => login_edges(graph, node)?,
            Intent::Signup(_) => signup_edges(graph, node),
            Intent::ResetPassword(_) => match node {
                Node::ResetPassword(_) => Some(vec![]),
                _ => None,
            },
            Intent::AddAuthenticator(intent) => add_authenticator_edges(graph, intent, node)?,
        };

        edges.ok_or_else(|| {
            InteractionError::invalid_state(format!(
                "{} intent: unexpected node {}",
                self.kind(),
                node.kind()
            ))
        })
    }

    /// Whether reaching `node` with no edges completes the interaction.
    pub fn can_finalize(&self, node: &Node) -> bool {
        match self {
            Intent::Login(_) | Intent::Signup(_) => matches!(node, Node::DoCreateSession(_)),
            Intent::ResetPassword(_) => matches!(node, Node::ResetPassword(_)),
            Intent::AddAuthenticator(_) => matches!(node, Node::DoCreateAuthenticator(_)),
        }
    }
}

fn secondary_mode(graph: &Graph) -> SecondaryAuthenticationMode {
    graph.config().authentication.secondary_authentication_mode
}

fn login_edges(graph: &Graph, node: &Node) -> InteractionResult<Option<Vec<Edge>>> {
    let create_session = Edge::DoCreateSession {
        reason: SessionCreateReason::Login,
    };

    let edges = match node {
        Node::SelectIdentityEnd(_) => vec![Edge::AuthenticationBegin {
            stage: AuthenticationStage::Primary,
        }],
        Node::AuthenticationEnd(end) => match end.stage {
            // `authenticate::skip` refuses this before the node is appended
            AuthenticationStage::Primary if end.authenticator.is_none() => {
                return Err(InteractionError::invalid_state(
                    "primary authentication ended without an authenticator",
                ));
            }
            AuthenticationStage::Primary => match secondary_mode(graph) {
                SecondaryAuthenticationMode::Disabled => vec![create_session],
                _ => vec![Edge::AuthenticationBegin {
                    stage: AuthenticationStage::Secondary,
                }],
            },
            AuthenticationStage::Secondary => {
                let enroll = end.authenticator.is_none()
                    && secondary_mode(graph) == SecondaryAuthenticationMode::Required;
                if enroll {
                    vec![Edge::CreateAuthenticatorBegin {
                        stage: AuthenticationStage::Secondary,
                        kind: None,
                    }]
                } else {
                    vec![create_session]
                }
            }
        },
        Node::CreateAuthenticatorEnd(end) if end.stage == AuthenticationStage::Secondary => {
            vec![Edge::DoCreateAuthenticator { announce: true }]
        }
        Node::DoCreateAuthenticator(_) => vec![create_session],
        Node::DoCreateSession(_) => vec![],
        _ => return Ok(None),
    };
    Ok(Some(edges))
}

fn signup_edges(graph: &Graph, node: &Node) -> Option<Vec<Edge>> {
    let persist_identities = Edge::DoCreateIdentity { user_created: true };

    let edges = match node {
        Node::DoCreateUser(_) => vec![Edge::CreateIdentityBegin],
        Node::CreateIdentityEnd(_) => vec![Edge::CreateAuthenticatorBegin {
            stage: AuthenticationStage::Primary,
            kind: None,
        }],
        Node::CreateAuthenticatorEnd(end) => match end.stage {
            AuthenticationStage::Primary
                if secondary_mode(graph) == SecondaryAuthenticationMode::Required =>
            {
                vec![Edge::CreateAuthenticatorBegin {
                    stage: AuthenticationStage::Secondary,
                    kind: None,
                }]
            }
            _ => vec![persist_identities],
        },
        Node::DoCreateIdentity(_) => vec![Edge::DoCreateAuthenticator { announce: false }],
        Node::DoCreateAuthenticator(_) => vec![Edge::DoCreateSession {
            reason: SessionCreateReason::Signup,
        }],
        Node::DoCreateSession(_) => vec![],
        _ => return None,
    };
    Some(edges)
}

fn add_authenticator_edges(
    graph: &Graph,
    intent: &AddAuthenticatorIntent,
    node: &Node,
) -> InteractionResult<Option<Vec<Edge>>> {
    let edges = match node {
        Node::UseUser(_) => {
            let enabled = graph
                .config()
                .authentication
                .authenticators_for(intent.stage)
                .contains(&intent.kind);
            if !enabled {
                return Err(InteractionError::invalid_state(format!(
                    "{} authenticators are not enabled for the {} stage",
                    intent.kind, intent.stage
                )));
            }
            vec![Edge::CreateAuthenticatorBegin {
                stage: intent.stage,
                kind: Some(intent.kind),
            }]
        }
        Node::CreateAuthenticatorEnd(_) => vec![Edge::DoCreateAuthenticator { announce: true }],
        Node::DoCreateAuthenticator(_) => vec![],
        _ => return Ok(None),
    };
    Ok(Some(edges))
}
