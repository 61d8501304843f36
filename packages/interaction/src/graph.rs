//! The ordered history of one interaction and what it has established so far.
//!
//! # Replay and Append
//!
//! A graph is rebuilt from storage on every request:
//!
//! ```text
//! restore:  for node in persisted order { prepare; observe; push }
//! append:   instantiate edge -> prepare -> apply (queue effects) -> observe -> push
//! ```
//!
//! Replay never calls `apply`, so effects are queued once per interaction, at
//! the moment their node is appended. Nodes are never removed or reordered.
//!
//! # Accepting Input
//!
//! [`Graph::accept`] advances as far as it can:
//!
//! 1. derive the current node's edges
//! 2. no edges: finish if the intent may finalize here, otherwise the graph is
//!    at a dead end (`InvalidState`)
//! 3. try the edges in order; the first that instantiates wins, and an edge
//!    that reports `InputRequired` passes to the next one
//! 4. nothing instantiated: wait for input
//!
//! The submitted input is handed to at most one input-consuming edge per
//! call. Edges that need no input are followed automatically.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::config::TenantConfig;
use crate::context::Context;
use crate::edge::Edge;
use crate::effect::EffectQueue;
use crate::envelope::Envelope;
use crate::error::{ApiError, EnvelopeError, InteractionError, InteractionResult};
use crate::input::Input;
use crate::intent::Intent;
use crate::model::{
    AuthenticationStage, AuthenticatorInfo, IdentityInfo, OobChallenge, SessionInfo,
};
use crate::node::Node;

// =============================================================================
// Graph State
// =============================================================================

/// Fields derived from the node history.
///
/// Rebuilt by observing each node in order, so it never needs persisting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphState {
    pub user_id: Option<Uuid>,
    pub identity: Option<IdentityInfo>,
    pub primary_authenticator: Option<AuthenticatorInfo>,
    pub secondary_authenticator: Option<AuthenticatorInfo>,
    pub primary_challenge: Option<OobChallenge>,
    pub secondary_challenge: Option<OobChallenge>,
    /// Identities created by this interaction, not yet committed.
    pub new_identities: Vec<IdentityInfo>,
    /// Authenticators created by this interaction, not yet committed.
    pub new_authenticators: Vec<AuthenticatorInfo>,
    pub session: Option<SessionInfo>,
}

impl GraphState {
    fn observe(&mut self, node: &Node) {
        match node {
            Node::SelectIdentityEnd(n) => {
                self.user_id = Some(n.identity.user_id);
                self.identity = Some(n.identity.clone());
            }
            Node::UseUser(n) => self.user_id = Some(n.user_id),
            Node::DoCreateUser(n) => self.user_id = Some(n.user_id),
            Node::AuthenticationOobTrigger(n) => {
                self.set_challenge(n.stage, n.challenge.clone());
            }
            Node::AuthenticationEnd(n) => {
                if let Some(authenticator) = &n.authenticator {
                    self.set_authenticator(n.stage, authenticator.clone());
                }
            }
            Node::CreateIdentityEnd(n) => {
                self.identity = Some(n.identity.clone());
                self.new_identities.push(n.identity.clone());
            }
            Node::CreateAuthenticatorOobSetup(n) => {
                self.set_challenge(n.stage, n.challenge.clone());
            }
            Node::CreateAuthenticatorEnd(n) => {
                if let Some(authenticator) = &n.authenticator {
                    self.set_authenticator(n.stage, authenticator.clone());
                    self.new_authenticators.push(authenticator.clone());
                }
            }
            Node::DoCreateSession(n) => self.session = Some(n.session.clone()),
            Node::ForgotPasswordEnd(n) => {
                self.user_id = Some(n.identity.user_id);
                self.identity = Some(n.identity.clone());
            }
            Node::ResetPassword(n) => self.user_id = Some(n.user_id),
            Node::SelectIdentityBegin(_)
            | Node::AuthenticationBegin(_)
            | Node::CreateIdentityBegin(_)
            | Node::CreateAuthenticatorBegin(_)
            | Node::CreateAuthenticatorTotpSetup(_)
            | Node::DoCreateIdentity(_)
            | Node::DoCreateAuthenticator(_)
            | Node::ForgotPasswordBegin(_) => {}
        }
    }

    fn set_authenticator(&mut self, stage: AuthenticationStage, authenticator: AuthenticatorInfo) {
        match stage {
            AuthenticationStage::Primary => self.primary_authenticator = Some(authenticator),
            AuthenticationStage::Secondary => self.secondary_authenticator = Some(authenticator),
        }
    }

    fn set_challenge(&mut self, stage: AuthenticationStage, challenge: OobChallenge) {
        match stage {
            AuthenticationStage::Primary => self.primary_challenge = Some(challenge),
            AuthenticationStage::Secondary => self.secondary_challenge = Some(challenge),
        }
    }
}

// =============================================================================
// Graph
// =============================================================================

/// Result of [`Graph::accept`].
#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    /// The graph stopped at edges that need input.
    AwaitingInput(Vec<Edge>),
    /// The intent's terminal node was reached.
    Finished,
}

#[derive(Debug, Clone)]
pub struct Graph {
    intent: Intent,
    nodes: Vec<Node>,
    state: GraphState,
    config: Arc<TenantConfig>,
    client_id: Option<String>,
    error: Option<ApiError>,
}

impl Graph {
    pub fn new(intent: Intent, config: Arc<TenantConfig>) -> Self {
        Self {
            intent,
            nodes: Vec::new(),
            state: GraphState::default(),
            config,
            client_id: None,
            error: None,
        }
    }

    pub fn with_client_id(mut self, client_id: Option<String>) -> Self {
        self.client_id = client_id;
        self
    }

    pub fn with_error(mut self, error: Option<ApiError>) -> Self {
        self.error = error;
        self
    }

    pub fn intent(&self) -> &Intent {
        &self.intent
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn state(&self) -> &GraphState {
        &self.state
    }

    pub fn config(&self) -> &TenantConfig {
        &self.config
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// The last recoverable error recorded for this interaction.
    pub fn error(&self) -> Option<&ApiError> {
        self.error.as_ref()
    }

    pub fn current(&self) -> Option<&Node> {
        self.nodes.last()
    }

    /// The user this interaction acts on.
    pub fn user_id(&self) -> InteractionResult<Uuid> {
        self.state
            .user_id
            .ok_or_else(|| InteractionError::invalid_state("no user selected"))
    }

    /// Rebuild derived state from persisted nodes without queuing effects.
    pub async fn replay(&mut self, ctx: &Context, nodes: Vec<Node>) -> InteractionResult<()> {
        for mut node in nodes {
            node.prepare(ctx, self).await?;
            self.state.observe(&node);
            self.nodes.push(node);
        }
        debug!(
            intent = self.intent.kind(),
            nodes = self.nodes.len(),
            "graph replayed"
        );
        Ok(())
    }

    /// Append a newly instantiated node, queuing its effects.
    pub async fn append(
        &mut self,
        ctx: &Context,
        mut node: Node,
        effects: &mut EffectQueue,
    ) -> InteractionResult<()> {
        node.prepare(ctx, self).await?;
        node.apply(effects, self)?;
        self.state.observe(&node);
        debug!(intent = self.intent.kind(), node = node.kind(), "node appended");
        self.nodes.push(node);
        Ok(())
    }

    pub fn derive_edges(&self) -> InteractionResult<Vec<Edge>> {
        let current = self
            .current()
            .ok_or_else(|| InteractionError::invalid_state("graph has no nodes"))?;
        current.derive_edges(self)
    }

    /// Advance with `input`, following input-free edges automatically.
    pub async fn accept(
        &mut self,
        ctx: &Context,
        input: Option<&dyn Input>,
        effects: &mut EffectQueue,
    ) -> InteractionResult<Advance> {
        let submitted = input.is_some();
        let mut input = input;
        let mut advanced = false;

        loop {
            let edges = self.derive_edges()?;
            if edges.is_empty() {
                return match self.current() {
                    Some(node) if self.intent.can_finalize(node) => Ok(Advance::Finished),
                    node => Err(InteractionError::invalid_state(format!(
                        "{} intent: dead end at {}",
                        self.intent.kind(),
                        node.map(Node::kind).unwrap_or("root")
                    ))),
                };
            }

            let mut next = None;
            for edge in &edges {
                let edge_input = if edge.requires_input() { input } else { None };
                match edge.instantiate(ctx, self, edge_input).await {
                    Ok(node) => {
                        next = Some((node, edge.requires_input()));
                        break;
                    }
                    Err(InteractionError::InputRequired) => continue,
                    Err(e) => return Err(e),
                }
            }

            match next {
                Some((node, consumed)) => {
                    if consumed {
                        input = None;
                    }
                    self.append(ctx, node, effects).await?;
                    advanced = true;
                }
                // Input was submitted but fit no edge.
                None if submitted && !advanced => return Err(InteractionError::InputRequired),
                None => return Ok(Advance::AwaitingInput(edges)),
            }
        }
    }

    pub fn encode_nodes(&self) -> Result<Vec<Envelope>, EnvelopeError> {
        self.nodes.iter().map(Node::to_envelope).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::identity::{SelectIdentityBeginNode, SelectIdentityEndNode};
    use crate::model::{LoginId, LoginIdKey};
    use chrono::Utc;

    fn identity() -> IdentityInfo {
        IdentityInfo {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            login_id: LoginId::parse(LoginIdKey::Email, "alice@example.com").unwrap(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_observe_selected_identity() {
        let identity = identity();
        let mut state = GraphState::default();

        state.observe(&SelectIdentityBeginNode {}.into());
        assert_eq!(state, GraphState::default());

        state.observe(
            &SelectIdentityEndNode {
                identity: identity.clone(),
            }
            .into(),
        );
        assert_eq!(state.user_id, Some(identity.user_id));
        assert_eq!(state.identity, Some(identity));
    }

    #[test]
    fn test_empty_graph_has_no_edges() {
        let graph = Graph::new(Intent::login(), Arc::new(TenantConfig::default()));
        assert!(matches!(
            graph.derive_edges(),
            Err(InteractionError::InvalidState(_))
        ));
        assert!(graph.user_id().is_err());
    }
}
