// In-memory collaborators for tests and the demo CLI
//
// InMemoryBackend plays every storage role at once: interaction records,
// identities, authenticators, and the tables transactional effects write to.
// Writes staged in a transaction only become visible on commit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::TenantConfig;
use crate::context::{
    BaseAuthenticatorStore, BaseClock, BaseCodeGenerator, BaseEventSink, BaseIdentityStore, Context,
};
use crate::effect::EffectAction;
use crate::model::{
    AuthenticatorInfo, AuthenticatorKind, AuthenticatorSpec, AuthenticatorTag, IdentityInfo,
    LifecycleEvent, LoginId, LoginIdKey, OobTarget, SessionInfo,
};
use crate::persistence::{
    InteractionRecord, InteractionStore, InteractionToken, Revision, StoreError, StoreTransaction,
};
use crate::service::InteractionService;

/// Code every [`FixedCodeGenerator`] hands out by default.
pub const TEST_OOB_CODE: &str = "123456";

/// TOTP seed every [`FixedCodeGenerator`] hands out by default.
pub const TEST_TOTP_SEED: &str = "JBSWY3DPEHPK3PXP";

fn digest(secret: &str) -> String {
    Sha256::digest(secret.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// The six-digit code the in-memory backend accepts for a TOTP seed.
///
/// Time-independent, so tests can compute it up front.
pub fn totp_code(seed: &str) -> String {
    let hash = Sha256::digest(seed.as_bytes());
    let value = u32::from_be_bytes([0, hash[0], hash[1], hash[2]]) % 1_000_000;
    format!("{:06}", value)
}

// =============================================================================
// In-Memory Backend
// =============================================================================

#[derive(Debug, Clone, Default)]
struct State {
    records: HashMap<InteractionToken, (InteractionRecord, Revision)>,
    users: HashMap<Uuid, DateTime<Utc>>,
    identities: Vec<IdentityInfo>,
    authenticators: Vec<AuthenticatorInfo>,
    sessions: Vec<SessionInfo>,
    events: Vec<LifecycleEvent>,
    applied: Vec<EffectAction>,
    commits: usize,
}

impl State {
    fn save(&mut self, record: &InteractionRecord, expected: Revision) -> Result<(), StoreError> {
        let current = self
            .records
            .get(&record.token)
            .map(|(_, revision)| *revision)
            .unwrap_or(Revision::NONE);
        if current != expected {
            return Err(StoreError::Conflict);
        }
        self.records
            .insert(record.token.clone(), (record.clone(), expected.next()));
        Ok(())
    }

    fn delete(&mut self, token: &InteractionToken, expected: Revision) -> Result<(), StoreError> {
        match self.records.get(token) {
            Some((_, revision)) if *revision == expected => {
                self.records.remove(token);
                Ok(())
            }
            _ => Err(StoreError::Conflict),
        }
    }

    fn execute(&mut self, effect: &EffectAction) -> Result<(), StoreError> {
        match effect {
            EffectAction::CreateUser {
                user_id,
                created_at,
            } => {
                if self.users.insert(*user_id, *created_at).is_some() {
                    return Err(StoreError::Duplicate(format!("user {} exists", user_id)));
                }
            }
            EffectAction::CreateIdentity { identity } => {
                if self
                    .identities
                    .iter()
                    .any(|i| i.login_id == identity.login_id)
                {
                    return Err(StoreError::Duplicate(format!(
                        "{} is already in use",
                        identity.login_id.key
                    )));
                }
                self.identities.push(identity.clone());
            }
            EffectAction::CreateAuthenticator { authenticator } => {
                self.authenticators.push(authenticator.clone());
            }
            EffectAction::UpdateAuthenticator { authenticator } => {
                let existing = self
                    .authenticators
                    .iter_mut()
                    .find(|a| a.id == authenticator.id)
                    .ok_or_else(|| anyhow!("authenticator {} not found", authenticator.id))?;
                *existing = authenticator.clone();
            }
            EffectAction::CreateSession { session } => self.sessions.push(session.clone()),
            EffectAction::DispatchEvent { event } => self.events.push(event.clone()),
            EffectAction::SendOobCode { .. } | EffectAction::SendResetPasswordCode { .. } => {}
        }
        self.applied.push(effect.clone());
        Ok(())
    }
}

/// Shared in-memory storage. Clones see the same data.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<State>>,
    fail_next_commit: Arc<Mutex<bool>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit fail with a backend error and discard its writes.
    pub fn fail_next_commit(&self) {
        *self.fail_next_commit.lock().unwrap() = true;
    }

    pub fn seed_identity(&self, user_id: Uuid, key: LoginIdKey, value: &str) -> IdentityInfo {
        let identity = IdentityInfo {
            id: Uuid::new_v4(),
            user_id,
            login_id: LoginId::parse(key, value).unwrap(),
            created_at: Utc::now(),
        };
        let mut state = self.state.lock().unwrap();
        state.users.entry(user_id).or_insert_with(Utc::now);
        state.identities.push(identity.clone());
        identity
    }

    /// Store an authenticator as-is. Password secrets are digested first.
    pub fn seed_authenticator(
        &self,
        user_id: Uuid,
        kind: AuthenticatorKind,
        tag: AuthenticatorTag,
        secret: &str,
        oob_target: Option<OobTarget>,
    ) -> AuthenticatorInfo {
        let secret = match kind {
            AuthenticatorKind::Password => digest(secret),
            AuthenticatorKind::Totp | AuthenticatorKind::OobOtp => secret.to_string(),
        };
        let authenticator = AuthenticatorInfo {
            id: Uuid::new_v4(),
            user_id,
            kind,
            tag,
            secret,
            oob_target,
            created_at: Utc::now(),
        };
        self.state
            .lock()
            .unwrap()
            .authenticators
            .push(authenticator.clone());
        authenticator
    }

    pub fn record(&self, token: &InteractionToken) -> Option<InteractionRecord> {
        self.state
            .lock()
            .unwrap()
            .records
            .get(token)
            .map(|(record, _)| record.clone())
    }

    /// Overwrite a stored record, bumping its revision.
    pub fn replace_record(&self, record: InteractionRecord) {
        let mut state = self.state.lock().unwrap();
        let revision = state
            .records
            .get(&record.token)
            .map(|(_, revision)| revision.next())
            .unwrap_or(Revision::NONE.next());
        state.records.insert(record.token.clone(), (record, revision));
    }

    pub fn record_count(&self) -> usize {
        self.state.lock().unwrap().records.len()
    }

    pub fn user_exists(&self, user_id: Uuid) -> bool {
        self.state.lock().unwrap().users.contains_key(&user_id)
    }

    pub fn identities(&self) -> Vec<IdentityInfo> {
        self.state.lock().unwrap().identities.clone()
    }

    /// Remove an identity outside of any interaction.
    pub fn remove_identity(&self, id: Uuid) {
        self.state.lock().unwrap().identities.retain(|i| i.id != id);
    }

    pub fn authenticators_of(&self, user_id: Uuid) -> Vec<AuthenticatorInfo> {
        self.state
            .lock()
            .unwrap()
            .authenticators
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.state.lock().unwrap().sessions.clone()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.state.lock().unwrap().events.clone()
    }

    /// Every transactional effect applied by a committed transaction.
    pub fn applied_effects(&self) -> Vec<EffectAction> {
        self.state.lock().unwrap().applied.clone()
    }

    pub fn commit_count(&self) -> usize {
        self.state.lock().unwrap().commits
    }
}

#[async_trait]
impl InteractionStore for InMemoryBackend {
    async fn load(
        &self,
        token: &InteractionToken,
    ) -> Result<Option<(InteractionRecord, Revision)>, StoreError> {
        Ok(self.state.lock().unwrap().records.get(token).cloned())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(InMemoryTransaction {
            backend: self.clone(),
            staged: Vec::new(),
        }))
    }
}

#[derive(Debug)]
enum Staged {
    Save(InteractionRecord, Revision),
    Delete(InteractionToken, Revision),
    Execute(EffectAction),
}

pub struct InMemoryTransaction {
    backend: InMemoryBackend,
    staged: Vec<Staged>,
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn save(
        &mut self,
        record: &InteractionRecord,
        expected: Revision,
    ) -> Result<Revision, StoreError> {
        self.staged.push(Staged::Save(record.clone(), expected));
        Ok(expected.next())
    }

    async fn delete(
        &mut self,
        token: &InteractionToken,
        expected: Revision,
    ) -> Result<(), StoreError> {
        self.staged.push(Staged::Delete(token.clone(), expected));
        Ok(())
    }

    async fn execute(&mut self, effect: &EffectAction) -> Result<(), StoreError> {
        self.staged.push(Staged::Execute(effect.clone()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        {
            let mut fail = self.backend.fail_next_commit.lock().unwrap();
            if *fail {
                *fail = false;
                return Err(anyhow!("injected commit failure").into());
            }
        }

        let mut state = self.backend.state.lock().unwrap();
        let mut next = state.clone();
        for op in &self.staged {
            match op {
                Staged::Save(record, expected) => next.save(record, *expected)?,
                Staged::Delete(token, expected) => next.delete(token, *expected)?,
                Staged::Execute(effect) => next.execute(effect)?,
            }
        }
        next.commits += 1;
        *state = next;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl BaseIdentityStore for InMemoryBackend {
    async fn get(&self, id: Uuid) -> Result<Option<IdentityInfo>> {
        let state = self.state.lock().unwrap();
        Ok(state.identities.iter().find(|i| i.id == id).cloned())
    }

    async fn get_by_login_id(&self, login_id: &LoginId) -> Result<Option<IdentityInfo>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .identities
            .iter()
            .find(|i| &i.login_id == login_id)
            .cloned())
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<IdentityInfo>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .identities
            .iter()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl BaseAuthenticatorStore for InMemoryBackend {
    async fn list(&self, user_id: Uuid) -> Result<Vec<AuthenticatorInfo>> {
        Ok(self.authenticators_of(user_id))
    }

    async fn new_authenticator(&self, spec: AuthenticatorSpec) -> Result<AuthenticatorInfo> {
        let secret = match (spec.kind, spec.secret) {
            (AuthenticatorKind::Password, Some(password)) => digest(&password),
            (AuthenticatorKind::Totp, Some(seed)) => seed,
            (AuthenticatorKind::OobOtp, _) => String::new(),
            (kind, None) => bail!("{} authenticator requires a secret", kind),
        };
        Ok(AuthenticatorInfo {
            id: Uuid::new_v4(),
            user_id: spec.user_id,
            kind: spec.kind,
            tag: spec.tag,
            secret,
            oob_target: spec.oob_target,
            created_at: Utc::now(),
        })
    }

    async fn verify_secret(&self, authenticator: &AuthenticatorInfo, secret: &str) -> Result<bool> {
        Ok(match authenticator.kind {
            AuthenticatorKind::Password => digest(secret) == authenticator.secret,
            AuthenticatorKind::Totp => totp_code(&authenticator.secret) == secret,
            AuthenticatorKind::OobOtp => false,
        })
    }

    async fn reset_secret(
        &self,
        authenticator: &AuthenticatorInfo,
        secret: &str,
    ) -> Result<AuthenticatorInfo> {
        if authenticator.kind != AuthenticatorKind::Password {
            bail!("only password authenticators can be reset");
        }
        Ok(AuthenticatorInfo {
            secret: digest(secret),
            ..authenticator.clone()
        })
    }
}

// =============================================================================
// Clock, Codes, Events
// =============================================================================

pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl BaseClock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

pub struct FixedCodeGenerator {
    pub code: String,
    pub secret: String,
}

impl Default for FixedCodeGenerator {
    fn default() -> Self {
        Self {
            code: TEST_OOB_CODE.to_string(),
            secret: TEST_TOTP_SEED.to_string(),
        }
    }
}

impl BaseCodeGenerator for FixedCodeGenerator {
    fn generate_code(&self, _length: usize) -> String {
        self.code.clone()
    }

    fn generate_secret(&self) -> String {
        self.secret.clone()
    }
}

/// Captures immediate effects instead of sending them.
#[derive(Clone, Default)]
pub struct RecordingEventSink {
    delivered: Arc<Mutex<Vec<EffectAction>>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<EffectAction> {
        self.delivered.lock().unwrap().clone()
    }

    /// Codes sent to `target`, oldest first.
    pub fn codes_sent_to(&self, target: &str) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter_map(|effect| match effect {
                EffectAction::SendOobCode { target: t, code, .. }
                | EffectAction::SendResetPasswordCode { target: t, code, .. }
                    if t == target =>
                {
                    Some(code.clone())
                }
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.delivered.lock().unwrap().clear();
    }
}

#[async_trait]
impl BaseEventSink for RecordingEventSink {
    async fn deliver(&self, effect: &EffectAction) -> Result<()> {
        self.delivered.lock().unwrap().push(effect.clone());
        Ok(())
    }
}

// =============================================================================
// Test Harness
// =============================================================================

/// Wires the in-memory collaborators into a service.
pub struct TestHarness {
    pub backend: InMemoryBackend,
    pub events: RecordingEventSink,
    pub clock: Arc<FixedClock>,
    pub config: TenantConfig,
}

impl TestHarness {
    pub fn new() -> Self {
        Self {
            backend: InMemoryBackend::new(),
            events: RecordingEventSink::new(),
            clock: Arc::new(FixedClock::new(Utc::now())),
            config: TenantConfig::default(),
        }
    }

    pub fn with_tenant_config(mut self, config: TenantConfig) -> Self {
        self.config = config;
        self
    }

    pub fn context(&self) -> Context {
        Context::new(
            Arc::new(self.backend.clone()),
            Arc::new(self.backend.clone()),
            self.config.clone(),
        )
        .with_codes(Arc::new(FixedCodeGenerator::default()))
        .with_clock(self.clock.clone())
    }

    pub fn service(&self) -> InteractionService {
        InteractionService::builder(
            self.context(),
            Arc::new(self.backend.clone()),
            Arc::new(self.events.clone()),
        )
        .build()
    }

    /// A user with an email identity and a primary password.
    pub fn seed_user(&self, email: &str, password: &str) -> Uuid {
        let user_id = Uuid::new_v4();
        self.backend
            .seed_identity(user_id, LoginIdKey::Email, email);
        self.backend.seed_authenticator(
            user_id,
            AuthenticatorKind::Password,
            AuthenticatorTag::Primary,
            password,
            None,
        );
        user_id
    }

    /// Enroll a secondary TOTP seeded with [`TEST_TOTP_SEED`].
    pub fn seed_totp(&self, user_id: Uuid) -> AuthenticatorInfo {
        self.backend.seed_authenticator(
            user_id,
            AuthenticatorKind::Totp,
            AuthenticatorTag::Secondary,
            TEST_TOTP_SEED,
            None,
        )
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
