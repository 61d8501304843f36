// Collaborator traits consumed by the interaction graph
//
// These are INFRASTRUCTURE traits only - no flow logic.
// Which step asks which collaborator lives in the node and edge code.
//
// Naming convention: Base* for trait names (e.g., BaseIdentityStore)

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::distributions::{Alphanumeric, Uniform};
use rand::Rng;
use uuid::Uuid;

use crate::config::TenantConfig;
use crate::effect::EffectAction;
use crate::model::{AuthenticatorInfo, AuthenticatorSpec, IdentityInfo, LoginId};

// =============================================================================
// Identity Store
// =============================================================================

#[async_trait]
pub trait BaseIdentityStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<IdentityInfo>>;

    async fn get_by_login_id(&self, login_id: &LoginId) -> Result<Option<IdentityInfo>>;

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<IdentityInfo>>;
}

// =============================================================================
// Authenticator Store
// =============================================================================

#[async_trait]
pub trait BaseAuthenticatorStore: Send + Sync {
    /// Every authenticator enrolled for a user, in enrollment order.
    async fn list(&self, user_id: Uuid) -> Result<Vec<AuthenticatorInfo>>;

    /// Build (but do not persist) a new authenticator.
    async fn new_authenticator(&self, spec: AuthenticatorSpec) -> Result<AuthenticatorInfo>;

    /// Check a password or TOTP code against an authenticator.
    async fn verify_secret(&self, authenticator: &AuthenticatorInfo, secret: &str) -> Result<bool>;

    /// Return a copy of `authenticator` carrying a new secret (not persisted).
    async fn reset_secret(
        &self,
        authenticator: &AuthenticatorInfo,
        secret: &str,
    ) -> Result<AuthenticatorInfo>;
}

// =============================================================================
// Code Generator
// =============================================================================

pub trait BaseCodeGenerator: Send + Sync {
    /// A numeric one-time code of `length` digits.
    fn generate_code(&self, length: usize) -> String;

    /// A fresh TOTP seed.
    fn generate_secret(&self) -> String;
}

pub struct RandomCodeGenerator;

impl BaseCodeGenerator for RandomCodeGenerator {
    fn generate_code(&self, length: usize) -> String {
        let digits = Uniform::new_inclusive(0u8, 9);
        rand::thread_rng()
            .sample_iter(digits)
            .take(length)
            .map(|d| char::from(b'0' + d))
            .collect()
    }

    fn generate_secret(&self) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect::<String>()
            .to_uppercase()
    }
}

// =============================================================================
// Clock
// =============================================================================

pub trait BaseClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl BaseClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// =============================================================================
// Event Sink
// =============================================================================

/// Delivers immediate effects (outbound codes) to the outside world.
#[async_trait]
pub trait BaseEventSink: Send + Sync {
    async fn deliver(&self, effect: &EffectAction) -> Result<()>;
}

// =============================================================================
// Context
// =============================================================================

/// Everything a node or edge may consult, passed explicitly into each step.
#[derive(Clone)]
pub struct Context {
    pub identities: Arc<dyn BaseIdentityStore>,
    pub authenticators: Arc<dyn BaseAuthenticatorStore>,
    pub codes: Arc<dyn BaseCodeGenerator>,
    pub clock: Arc<dyn BaseClock>,
    pub config: Arc<TenantConfig>,
}

impl Context {
    /// Context with the system clock and random codes.
    pub fn new(
        identities: Arc<dyn BaseIdentityStore>,
        authenticators: Arc<dyn BaseAuthenticatorStore>,
        config: TenantConfig,
    ) -> Self {
        Self {
            identities,
            authenticators,
            codes: Arc::new(RandomCodeGenerator),
            clock: Arc::new(SystemClock),
            config: Arc::new(config),
        }
    }

    pub fn with_codes(mut self, codes: Arc<dyn BaseCodeGenerator>) -> Self {
        self.codes = codes;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn BaseClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
