//! Identity records the interaction graph reads and produces.
//!
//! These are plain data. Persisting them is the job of the stores behind
//! [`Context`](crate::Context); the graph only carries copies in node payloads.

use std::fmt;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::InputError;

lazy_static! {
    static ref EMAIL: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
    static ref PHONE: Regex = Regex::new(r"^\+[1-9][0-9]{6,14}$").unwrap();
    static ref USERNAME: Regex = Regex::new(r"^[a-z0-9][a-z0-9_.-]{2,63}$").unwrap();
}

// =============================================================================
// Login IDs
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginIdKey {
    Email,
    Phone,
    Username,
}

impl fmt::Display for LoginIdKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoginIdKey::Email => write!(f, "email"),
            LoginIdKey::Phone => write!(f, "phone"),
            LoginIdKey::Username => write!(f, "username"),
        }
    }
}

impl LoginIdKey {
    /// The OOB channel that can reach a login id of this key.
    pub fn oob_channel(&self) -> Option<OobChannel> {
        match self {
            LoginIdKey::Email => Some(OobChannel::Email),
            LoginIdKey::Phone => Some(OobChannel::Sms),
            LoginIdKey::Username => None,
        }
    }
}

/// A normalized login id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoginId {
    pub key: LoginIdKey,
    pub value: String,
}

impl LoginId {
    /// Normalize and validate raw user input.
    ///
    /// Emails and usernames are lowercased; phone numbers lose spaces and
    /// dashes.
    pub fn parse(key: LoginIdKey, raw: &str) -> Result<Self, InputError> {
        let trimmed = raw.trim();
        let value = match key {
            LoginIdKey::Email | LoginIdKey::Username => trimmed.to_lowercase(),
            LoginIdKey::Phone => trimmed
                .chars()
                .filter(|c| !c.is_whitespace() && *c != '-')
                .collect(),
        };

        let valid = match key {
            LoginIdKey::Email => EMAIL.is_match(&value),
            LoginIdKey::Phone => PHONE.is_match(&value),
            LoginIdKey::Username => USERNAME.is_match(&value),
        };
        if !valid {
            return Err(InputError::InvalidLoginId { key });
        }

        Ok(Self { key, value })
    }
}

impl fmt::Display for LoginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key, self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityInfo {
    pub id: Uuid,
    pub user_id: Uuid,
    pub login_id: LoginId,
    pub created_at: DateTime<Utc>,
}

impl IdentityInfo {
    /// Where an OOB code for this identity would be sent, if anywhere.
    pub fn oob_target(&self) -> Option<OobTarget> {
        self.login_id.key.oob_channel().map(|channel| OobTarget {
            channel,
            target: self.login_id.value.clone(),
        })
    }
}

// =============================================================================
// Authenticators
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticatorKind {
    Password,
    Totp,
    OobOtp,
}

impl fmt::Display for AuthenticatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthenticatorKind::Password => write!(f, "password"),
            AuthenticatorKind::Totp => write!(f, "totp"),
            AuthenticatorKind::OobOtp => write!(f, "oob_otp"),
        }
    }
}

/// The role an enrolled authenticator plays for its user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticatorTag {
    Primary,
    Secondary,
}

/// The authentication stage a flow is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationStage {
    Primary,
    Secondary,
}

impl AuthenticationStage {
    /// The tag an authenticator needs to take part in this stage.
    pub fn tag(&self) -> AuthenticatorTag {
        match self {
            AuthenticationStage::Primary => AuthenticatorTag::Primary,
            AuthenticationStage::Secondary => AuthenticatorTag::Secondary,
        }
    }
}

impl fmt::Display for AuthenticationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthenticationStage::Primary => write!(f, "primary"),
            AuthenticationStage::Secondary => write!(f, "secondary"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OobChannel {
    Email,
    Sms,
}

impl fmt::Display for OobChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OobChannel::Email => write!(f, "email"),
            OobChannel::Sms => write!(f, "sms"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OobTarget {
    pub channel: OobChannel,
    pub target: String,
}

/// An enrolled (or about to be enrolled) authenticator.
///
/// `secret` is opaque to the engine: a password digest, a TOTP seed, or
/// empty for OOB authenticators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatorInfo {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: AuthenticatorKind,
    pub tag: AuthenticatorTag,
    #[serde(default)]
    pub secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oob_target: Option<OobTarget>,
    pub created_at: DateTime<Utc>,
}

impl AuthenticatorInfo {
    /// Whether this primary authenticator can authenticate `identity`.
    ///
    /// Password and TOTP authenticators bind to every identity of their user.
    /// OOB authenticators bind only to the identity they deliver to.
    pub fn is_bound_to(&self, identity: &IdentityInfo) -> bool {
        if self.user_id != identity.user_id {
            return false;
        }
        match self.kind {
            AuthenticatorKind::Password | AuthenticatorKind::Totp => true,
            AuthenticatorKind::OobOtp => match (&self.oob_target, identity.oob_target()) {
                (Some(ours), Some(theirs)) => *ours == theirs,
                _ => false,
            },
        }
    }
}

/// What to build when enrolling a new authenticator.
///
/// `secret` is the plaintext password or TOTP seed; the authenticator store
/// decides how it is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorSpec {
    pub user_id: Uuid,
    pub kind: AuthenticatorKind,
    pub tag: AuthenticatorTag,
    pub secret: Option<String>,
    pub oob_target: Option<OobTarget>,
}

/// A one-time code that was sent and is waiting to be echoed back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OobChallenge {
    pub channel: OobChannel,
    pub target: String,
    pub code: String,
    pub expire_at: DateTime<Utc>,
}

impl OobChallenge {
    /// Check a submitted code against this challenge.
    pub fn verify(&self, code: &str, now: DateTime<Utc>) -> Result<(), InputError> {
        if now >= self.expire_at {
            return Err(InputError::ExpiredCode);
        }
        if code.trim() != self.code {
            return Err(InputError::InvalidCode);
        }
        Ok(())
    }
}

// =============================================================================
// Sessions & Events
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionCreateReason {
    Signup,
    Login,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub user_id: Uuid,
    pub reason: SessionCreateReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Authenticator kinds used to establish the session.
    pub amr: Vec<AuthenticatorKind>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LifecycleEvent {
    #[serde(rename = "user.created")]
    UserCreated {
        user_id: Uuid,
        login_ids: Vec<LoginId>,
    },
    #[serde(rename = "authenticator.added")]
    AuthenticatorAdded {
        user_id: Uuid,
        authenticator_id: Uuid,
        kind: AuthenticatorKind,
    },
    #[serde(rename = "password.reset")]
    PasswordReset { user_id: Uuid },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::UserCreated { .. } => "user.created",
            LifecycleEvent::AuthenticatorAdded { .. } => "authenticator.added",
            LifecycleEvent::PasswordReset { .. } => "password.reset",
        }
    }
}
