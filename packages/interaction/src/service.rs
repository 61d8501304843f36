//! Interaction service - one storage transaction per request.
//!
//! ```text
//! start(intent)  ─► root node ─► auto-advance ─► save ─────────────┐
//! feed(token)    ─► load ─► replay ─► accept ─► save | finalize ───┤
//!                                                                  ▼
//!                                                  deliver immediate effects
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let service = InteractionService::builder(ctx, store, events)
//!     .with_config(EngineConfig::from_env()?)
//!     .build();
//!
//! let outcome = service.start(Intent::login(), StartOptions::default()).await?;
//! let Outcome::AwaitingInput { token, .. } = outcome else { unreachable!() };
//!
//! let form = FormInput::default().with_login_id(LoginIdKey::Email, "alice@example.com");
//! service.feed(&token, &form).await?;
//! ```
//!
//! # Failure Handling
//!
//! - recoverable errors (`InputRequired`, `InvalidInput`, `Conflict`) leave the
//!   graph as it was and only record the error on the interaction
//! - fatal errors are logged and leave the record untouched
//! - a failed commit rolls back; transactional effects are discarded and the
//!   token stays usable
//! - a login id claimed by someone else before finalization commits aborts
//!   the interaction: the record is deleted and the caller starts over

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::context::{BaseEventSink, Context};
use crate::edge::Edge;
use crate::effect::{EffectAction, EffectQueue};
use crate::envelope::Registry;
use crate::error::{ApiError, InteractionError, InteractionResult};
use crate::graph::{Advance, Graph};
use crate::input::Input;
use crate::intent::Intent;
use crate::model::SessionInfo;
use crate::persistence::{
    InteractionRecord, InteractionStore, InteractionToken, Revision, StoreError, StoreTransaction,
};

/// Caller references stored with a new interaction.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub client_id: Option<String>,
    pub session_id: Option<String>,
}

/// Where an interaction stands after a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Present `token` again with input for one of `edges`.
    AwaitingInput {
        token: InteractionToken,
        edges: Vec<Edge>,
    },
    /// The interaction finalized and its token is gone.
    Finished {
        user_id: Uuid,
        session: Option<SessionInfo>,
    },
}

/// Read-only view of an in-flight interaction.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionView {
    pub token: InteractionToken,
    pub intent: &'static str,
    pub current: &'static str,
    pub edges: Vec<Edge>,
    pub error: Option<ApiError>,
    pub expire_at: DateTime<Utc>,
}

// =============================================================================
// Builder
// =============================================================================

pub struct InteractionServiceBuilder {
    ctx: Context,
    store: Arc<dyn InteractionStore>,
    events: Arc<dyn BaseEventSink>,
    registry: Option<Registry>,
    config: EngineConfig,
}

impl InteractionServiceBuilder {
    /// Use a custom registry instead of [`Registry::standard`].
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> InteractionService {
        InteractionService {
            ctx: self.ctx,
            store: self.store,
            events: self.events,
            registry: Arc::new(self.registry.unwrap_or_else(Registry::standard)),
            config: self.config,
        }
    }
}

// =============================================================================
// Service
// =============================================================================

pub struct InteractionService {
    ctx: Context,
    store: Arc<dyn InteractionStore>,
    events: Arc<dyn BaseEventSink>,
    registry: Arc<Registry>,
    config: EngineConfig,
}

impl InteractionService {
    pub fn builder(
        ctx: Context,
        store: Arc<dyn InteractionStore>,
        events: Arc<dyn BaseEventSink>,
    ) -> InteractionServiceBuilder {
        InteractionServiceBuilder {
            ctx,
            store,
            events,
            registry: None,
            config: EngineConfig::default(),
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Begin a new interaction and advance it as far as it goes without input.
    #[instrument(skip(self, options), fields(intent = intent.kind()))]
    pub async fn start(&self, intent: Intent, options: StartOptions) -> InteractionResult<Outcome> {
        let now = self.ctx.now();
        let intent_envelope = intent.to_envelope()?;

        let mut graph =
            Graph::new(intent, self.ctx.config.clone()).with_client_id(options.client_id.clone());
        let mut effects = EffectQueue::new();

        let root = graph.intent().instantiate_root(&self.ctx);
        let advanced = match graph.append(&self.ctx, root, &mut effects).await {
            Ok(()) => graph.accept(&self.ctx, None, &mut effects).await,
            Err(err) => Err(err),
        };
        let advance = advanced.map_err(|err| report(None, err))?;

        let record = InteractionRecord {
            token: InteractionToken::generate(),
            created_at: now,
            expire_at: now + self.config.interaction_ttl,
            session_id: options.session_id,
            client_id: options.client_id,
            intent: intent_envelope,
            nodes: Vec::new(),
            pending_effects: Vec::new(),
            error: None,
        };
        info!(token = %record.token, "interaction started");

        self.persist(record, Revision::NONE, &graph, effects, advance)
            .await
    }

    /// Submit input to an in-flight interaction.
    #[instrument(skip(self, input), fields(token = %token))]
    pub async fn feed(
        &self,
        token: &InteractionToken,
        input: &dyn Input,
    ) -> InteractionResult<Outcome> {
        let (record, revision) = self.load(token).await?;
        let mut graph = self
            .restore(&record)
            .await
            .map_err(|err| report(Some(token), err))?;

        let mut effects = EffectQueue::new();
        match graph.accept(&self.ctx, Some(input), &mut effects).await {
            Ok(advance) => self.persist(record, revision, &graph, effects, advance).await,
            Err(err) if err.is_recoverable() => {
                let err = report(Some(token), err);
                let mut rejected = record;
                rejected.error = Some(ApiError::from(&err));
                self.write(&rejected, revision, false).await?;
                Err(err)
            }
            Err(err) => Err(report(Some(token), err)),
        }
    }

    /// Current edges and last error, without changing anything.
    #[instrument(skip(self), fields(token = %token))]
    pub async fn inspect(&self, token: &InteractionToken) -> InteractionResult<InteractionView> {
        let (record, _) = self.load(token).await?;
        let graph = self
            .restore(&record)
            .await
            .map_err(|err| report(Some(token), err))?;
        let edges = graph
            .derive_edges()
            .map_err(|err| report(Some(token), err))?;

        Ok(InteractionView {
            token: record.token,
            intent: graph.intent().kind(),
            current: graph.current().map(|n| n.kind()).unwrap_or_default(),
            edges,
            error: record.error,
            expire_at: record.expire_at,
        })
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn load(&self, token: &InteractionToken) -> InteractionResult<(InteractionRecord, Revision)> {
        let (record, revision) = self
            .store
            .load(token)
            .await?
            .ok_or(InteractionError::NotFound)?;
        if record.is_expired(self.ctx.now()) {
            return Err(InteractionError::Expired);
        }
        Ok((record, revision))
    }

    async fn restore(&self, record: &InteractionRecord) -> InteractionResult<Graph> {
        let intent = self.registry.decode_intent(&record.intent)?;
        let nodes = record
            .nodes
            .iter()
            .map(|envelope| self.registry.decode_node(envelope))
            .collect::<Result<Vec<_>, _>>()?;

        let mut graph = Graph::new(intent, self.ctx.config.clone())
            .with_client_id(record.client_id.clone())
            .with_error(record.error.clone());
        graph.replay(&self.ctx, nodes).await?;
        Ok(graph)
    }

    /// Save the advanced graph, or finalize it, then deliver immediate effects.
    async fn persist(
        &self,
        record: InteractionRecord,
        revision: Revision,
        graph: &Graph,
        effects: EffectQueue,
        advance: Advance,
    ) -> InteractionResult<Outcome> {
        let (immediate, transactional) = effects.split();

        let mut next = record;
        next.nodes = graph
            .encode_nodes()
            .map_err(|err| report(Some(&next.token), err.into()))?;
        next.pending_effects.extend(transactional);
        next.error = None;

        let finished = advance == Advance::Finished;
        let stored = self.write(&next, revision, finished).await;
        let delivered = self.deliver(&next.token, &immediate).await;
        match stored {
            Ok(()) => {}
            // The stored graph still holds the claimed data, so every retry
            // would collide again.
            Err(StoreError::Duplicate(what)) if finished => {
                self.discard(&next.token, revision).await;
                return Err(report(Some(&next.token), InteractionError::Aborted(what)));
            }
            Err(err) => return Err(err.into()),
        }
        delivered?;

        match advance {
            Advance::AwaitingInput(edges) => Ok(Outcome::AwaitingInput {
                token: next.token,
                edges,
            }),
            Advance::Finished => {
                info!(
                    token = %next.token,
                    effects = next.pending_effects.len(),
                    "interaction finished"
                );
                Ok(Outcome::Finished {
                    user_id: graph.user_id()?,
                    session: graph.state().session.clone(),
                })
            }
        }
    }

    async fn write(
        &self,
        record: &InteractionRecord,
        revision: Revision,
        finished: bool,
    ) -> Result<(), StoreError> {
        let mut tx = self.store.begin().await?;

        match stage(tx.as_mut(), record, revision, finished).await {
            Ok(()) => tx.commit().await.map_err(|err| {
                error!(token = %record.token, error = %err, "commit failed");
                err
            }),
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    error!(token = %record.token, error = %rollback_err, "rollback failed");
                }
                warn!(token = %record.token, error = %err, "transaction rolled back");
                Err(err)
            }
        }
    }

    /// Delete a record that can never finish.
    async fn discard(&self, token: &InteractionToken, revision: Revision) {
        if revision.is_none() {
            return;
        }
        let deleted = async {
            let mut tx = self.store.begin().await?;
            if let Err(err) = tx.delete(token, revision).await {
                tx.rollback().await?;
                return Err(err);
            }
            tx.commit().await
        }
        .await;

        match deleted {
            Ok(()) => info!(token = %token, "interaction discarded"),
            Err(err) => error!(token = %token, error = %err, "failed to discard interaction"),
        }
    }

    async fn deliver(&self, token: &InteractionToken, effects: &[EffectAction]) -> InteractionResult<()> {
        let mut first_error = None;
        for effect in effects {
            if let Err(err) = self.events.deliver(effect).await {
                error!(token = %token, effect = effect.name(), error = %err, "failed to deliver effect");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(InteractionError::Internal(err)),
            None => Ok(()),
        }
    }
}

async fn stage(
    tx: &mut dyn StoreTransaction,
    record: &InteractionRecord,
    revision: Revision,
    finished: bool,
) -> Result<(), StoreError> {
    if !finished {
        tx.save(record, revision).await?;
        return Ok(());
    }

    for effect in &record.pending_effects {
        tx.execute(effect).await?;
    }
    if !revision.is_none() {
        tx.delete(&record.token, revision).await?;
    }
    Ok(())
}

/// Log a failed step at the level its category calls for.
fn report(token: Option<&InteractionToken>, err: InteractionError) -> InteractionError {
    let token = token.map(InteractionToken::as_str).unwrap_or("new");
    if err.is_recoverable() {
        warn!(token, error = %err, "step rejected");
    } else {
        error!(token, error = ?err, "interaction failed");
    }
    err
}
