//! Selecting an existing identity, creating a new one, or acting on a known
//! user.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::login_id_from;
use crate::context::Context;
use crate::edge::Edge;
use crate::envelope::Tagged;
use crate::error::{InputError, InteractionError, InteractionResult};
use crate::graph::Graph;
use crate::input::Input;
use crate::model::IdentityInfo;
use crate::node::Node;

// =============================================================================
// Select identity (login)
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectIdentityBeginNode {}

impl Tagged for SelectIdentityBeginNode {
    const KIND: &'static str = "select_identity_begin";
}

impl SelectIdentityBeginNode {
    pub(crate) fn derive_edges(&self) -> Vec<Edge> {
        vec![Edge::SelectIdentityLoginId]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectIdentityEndNode {
    pub identity: IdentityInfo,
}

impl Tagged for SelectIdentityEndNode {
    const KIND: &'static str = "select_identity_end";
}

impl SelectIdentityEndNode {
    /// The selected identity must still exist on every replay.
    pub(crate) async fn prepare(&self, ctx: &Context) -> InteractionResult<()> {
        match ctx.identities.get(self.identity.id).await? {
            Some(_) => Ok(()),
            None => Err(InteractionError::invalid_state(format!(
                "selected identity {} no longer exists",
                self.identity.id
            ))),
        }
    }
}

pub(crate) async fn select_by_login_id(
    ctx: &Context,
    input: Option<&dyn Input>,
) -> InteractionResult<Node> {
    let login_id = login_id_from(&ctx.config, input)?;
    let identity = ctx
        .identities
        .get_by_login_id(&login_id)
        .await?
        .ok_or(InputError::UserNotFound)?;

    Ok(SelectIdentityEndNode { identity }.into())
}

// =============================================================================
// Use user (authenticated actions)
// =============================================================================

/// Root of flows that act on a user who is already known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UseUserNode {
    pub user_id: Uuid,
}

impl Tagged for UseUserNode {
    const KIND: &'static str = "use_user";
}

impl UseUserNode {
    pub(crate) async fn prepare(&self, ctx: &Context) -> InteractionResult<()> {
        if ctx.identities.list_by_user(self.user_id).await?.is_empty() {
            return Err(InputError::UserNotFound.into());
        }
        Ok(())
    }
}

// =============================================================================
// Create identity (signup)
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateIdentityBeginNode {}

impl Tagged for CreateIdentityBeginNode {
    const KIND: &'static str = "create_identity_begin";
}

impl CreateIdentityBeginNode {
    pub(crate) fn derive_edges(&self) -> Vec<Edge> {
        vec![Edge::CreateIdentityLoginId]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateIdentityEndNode {
    pub identity: IdentityInfo,
}

impl Tagged for CreateIdentityEndNode {
    const KIND: &'static str = "create_identity_end";
}

pub(crate) async fn create_by_login_id(
    ctx: &Context,
    graph: &Graph,
    input: Option<&dyn Input>,
) -> InteractionResult<Node> {
    let login_id = login_id_from(&ctx.config, input)?;
    let user_id = graph.user_id()?;

    let taken_here = graph
        .state()
        .new_identities
        .iter()
        .any(|i| i.login_id == login_id);
    if taken_here || ctx.identities.get_by_login_id(&login_id).await?.is_some() {
        return Err(InteractionError::Conflict(format!(
            "{} is already in use",
            login_id.key
        )));
    }

    let identity = IdentityInfo {
        id: Uuid::new_v4(),
        user_id,
        login_id,
        created_at: ctx.now(),
    };
    Ok(CreateIdentityEndNode { identity }.into())
}
