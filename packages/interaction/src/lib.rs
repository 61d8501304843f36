//! # Interaction
//!
//! A resumable, multi-step authentication engine. Login, signup, password
//! reset and authenticator enrollment are modeled as a graph of steps that
//! survives across stateless requests.
//!
//! ## Core Concepts
//!
//! - [`Node`] = a step that happened (persisted, append-only)
//! - [`Edge`] = a step that may happen next (recomputed, never stored)
//! - [`Intent`] = the goal; it picks the root node and wires sub-flows together
//!
//! The key principle: **the node history is the only state**. Everything else
//! is rebuilt by replaying it on every request.
//!
//! ## Architecture
//!
//! ```text
//! Caller (HTTP handler, CLI)
//!     │
//!     ▼ start(intent) / feed(token, input)
//! InteractionService
//!     │
//!     ├─► InteractionStore.load(token) ─► (record, revision)
//!     │
//!     ├─► Registry.decode ─► Graph.replay   (prepare + observe, no effects)
//!     │
//!     ├─► Graph.accept(input)
//!     │       │
//!     │       ├─► node.derive_edges ─► edge.instantiate(input)
//!     │       │                              │
//!     │       └─► append (prepare, apply) ◄──┘   ... until input is needed
//!     │
//!     ├─► StoreTransaction: save record | run transactional effects + delete
//!     │
//!     └─► BaseEventSink.deliver(immediate effects)
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Append-only** - Nodes are never removed, reordered or mutated
//! 2. **Replay is pure** - `prepare` is idempotent; `apply` never runs on replay
//! 3. **At-most-once effects** - An effect is queued exactly when its node is appended
//! 4. **One transaction per request** - Record writes and finalization commit together
//! 5. **Closed kinds** - Unknown persisted discriminants fail loudly
//!
//! ## Example
//!
//! ```ignore
//! use interaction::{FormInput, Intent, InteractionService, LoginIdKey, Outcome, StartOptions};
//!
//! let service = InteractionService::builder(ctx, store, events).build();
//!
//! let Outcome::AwaitingInput { token, .. } =
//!     service.start(Intent::login(), StartOptions::default()).await?
//! else {
//!     unreachable!("login always waits for a login id");
//! };
//!
//! let login_id = FormInput::default().with_login_id(LoginIdKey::Email, "alice@example.com");
//! service.feed(&token, &login_id).await?;
//!
//! let password = FormInput::default().with_password("correct horse");
//! match service.feed(&token, &password).await? {
//!     Outcome::Finished { session, .. } => println!("signed in: {:?}", session),
//!     Outcome::AwaitingInput { edges, .. } => println!("next: {:?}", edges),
//! }
//! ```
//!
//! ## What This Is Not
//!
//! - A web server or OAuth provider
//! - A user database; identities and authenticators come from collaborators
//! - A message sender; outbound codes are handed to a [`BaseEventSink`]

pub mod config;
pub mod context;
pub mod edge;
pub mod effect;
pub mod envelope;
pub mod error;
pub mod filter;
pub mod graph;
pub mod input;
pub mod intent;
pub mod model;
pub mod node;
pub mod persistence;
pub mod service;
pub mod steps;

// In-memory collaborators (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export the service surface
pub use service::{InteractionService, InteractionServiceBuilder, InteractionView, Outcome, StartOptions};

// Re-export graph types
pub use edge::Edge;
pub use graph::{Advance, Graph, GraphState};
pub use intent::Intent;
pub use node::Node;

// Re-export persistence types
pub use envelope::{Envelope, Registry, Tagged};
pub use persistence::{
    InteractionRecord, InteractionStore, InteractionToken, Revision, StoreError, StoreTransaction,
};

// Re-export error types
pub use error::{
    ApiError, Categorizable, EnvelopeError, ErrorCategory, InputError, InteractionError,
    InteractionResult,
};

// Re-export configuration and collaborators
pub use config::{EngineConfig, SecondaryAuthenticationMode, TenantConfig};
pub use context::{
    BaseAuthenticatorStore, BaseClock, BaseCodeGenerator, BaseEventSink, BaseIdentityStore, Context,
};
pub use effect::{EffectAction, EffectQueue};
pub use input::{FormInput, Input};
pub use model::{
    AuthenticationStage, AuthenticatorInfo, AuthenticatorKind, AuthenticatorTag, IdentityInfo,
    LifecycleEvent, LoginId, LoginIdKey, OobChannel, OobTarget, SessionCreateReason, SessionInfo,
};
