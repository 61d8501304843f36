//! Structured errors for the interaction engine.
//!
//! `InteractionError` is the single error type returned by every engine
//! operation. Each variant belongs to a [`ErrorCategory`] that decides how a
//! caller should react:
//!
//! - `InputRequired`, `Validation`, `Conflict`: re-prompt the user
//! - `NotFound`, `Expired`, `Aborted`: restart the interaction
//! - `Internal`: log and answer with an opaque failure
//!
//! # The Exposure Rule
//!
//! > **Internal details never leave the engine.**
//!
//! [`Categorizable::safe_message`] is the only text that may be shown to an
//! end user. Fatal variants (`InvalidState`, `Envelope`, `Internal`) always
//! render the same generic message; their details go to the log.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::PasswordViolation;
use crate::model::LoginIdKey;
use crate::persistence::StoreError;

// =============================================================================
// Error Category
// =============================================================================

/// Error category for sanitized, caller-facing failures.
///
/// `Display` and serde agree on the wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// A field the current step needs is missing.
    InputRequired,
    /// A supplied value failed validation - safe to expose the reason.
    #[serde(rename = "invalid_input")]
    Validation,
    /// The interaction token is unknown.
    NotFound,
    /// The interaction outlived its TTL.
    Expired,
    /// The request collides with existing data or a concurrent writer.
    Conflict,
    /// The interaction can no longer finish and was discarded.
    Aborted,
    /// Programmer, configuration or backend failure - NEVER expose details.
    #[serde(rename = "internal_error")]
    Internal,
}

impl ErrorCategory {
    /// Whether the caller can retry the same interaction with new input.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::InputRequired | ErrorCategory::Validation | ErrorCategory::Conflict
        )
    }

    /// Whether the caller must start a new interaction.
    pub fn requires_restart(&self) -> bool {
        matches!(
            self,
            ErrorCategory::NotFound | ErrorCategory::Expired | ErrorCategory::Aborted
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::InputRequired => write!(f, "input_required"),
            ErrorCategory::Validation => write!(f, "invalid_input"),
            ErrorCategory::NotFound => write!(f, "not_found"),
            ErrorCategory::Expired => write!(f, "expired"),
            ErrorCategory::Conflict => write!(f, "conflict"),
            ErrorCategory::Aborted => write!(f, "aborted"),
            ErrorCategory::Internal => write!(f, "internal_error"),
        }
    }
}

// =============================================================================
// Categorizable Trait
// =============================================================================

/// Errors that can be categorized for safe external exposure.
///
/// - `Validation`, `Conflict`, `Aborted`, `NotFound` and `Expired` MAY describe
///   the reason
/// - `Internal` MUST return a generic message
pub trait Categorizable: std::error::Error {
    /// Return the safe category for this error.
    fn category(&self) -> ErrorCategory;

    /// Return a sanitized, user-safe message.
    fn safe_message(&self) -> Cow<'static, str>;
}

// =============================================================================
// Input Error
// =============================================================================

/// Why a supplied value was rejected.
///
/// Serializable so it can be persisted as the interaction's last error and
/// rendered next to the offending field.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum InputError {
    /// Unknown login id, wrong password or wrong authenticator code.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("invalid {key} login id")]
    InvalidLoginId { key: LoginIdKey },

    #[error("{key} login ids are not enabled")]
    LoginIdKeyNotAllowed { key: LoginIdKey },

    #[error("user not found")]
    UserNotFound,

    #[error("invalid code")]
    InvalidCode,

    #[error("code expired")]
    ExpiredCode,

    #[error("password confirmation does not match")]
    PasswordMismatch,

    #[error("password does not satisfy the password policy")]
    PasswordPolicy { violations: Vec<PasswordViolation> },
}

// =============================================================================
// Envelope Error
// =============================================================================

/// Failures at the serialization boundary.
///
/// All of them are fatal: they mean the stored record was written by a
/// different (or broken) version of the engine.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The discriminant is not registered.
    #[error("unknown {category} discriminant: {kind}")]
    UnknownKind { category: &'static str, kind: String },

    /// The payload does not match the registered variant.
    #[error("invalid payload for {kind}: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    /// The variant could not be encoded.
    #[error("failed to encode {kind}: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

// =============================================================================
// Interaction Error
// =============================================================================

pub type InteractionResult<T> = Result<T, InteractionError>;

/// Pattern-matchable engine errors.
#[derive(Debug, Error)]
pub enum InteractionError {
    /// The current step needs input that was not supplied.
    #[error("input required")]
    InputRequired,

    /// Supplied input failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(#[from] InputError),

    /// A node/edge combination the configuration cannot produce.
    #[error("invalid interaction state: {0}")]
    InvalidState(String),

    /// The interaction token is unknown to the store.
    #[error("interaction not found")]
    NotFound,

    /// The interaction outlived its TTL.
    #[error("interaction expired")]
    Expired,

    /// Duplicate data or a concurrent modification.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Data the interaction was about to create was claimed before commit.
    /// The record is gone; the caller starts over.
    #[error("interaction aborted: {0}")]
    Aborted(String),

    /// A persisted envelope could not be decoded or encoded.
    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    /// A collaborator (store, sink, generator) failed.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl InteractionError {
    /// Shorthand for [`InteractionError::InvalidState`].
    pub fn invalid_state(message: impl Into<String>) -> Self {
        InteractionError::InvalidState(message.into())
    }

    /// Whether the same interaction can continue after this error.
    pub fn is_recoverable(&self) -> bool {
        self.category().is_recoverable()
    }

    /// The validation reason, if this is an `InvalidInput` error.
    pub fn input_error(&self) -> Option<&InputError> {
        match self {
            InteractionError::InvalidInput(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for InteractionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => {
                InteractionError::Conflict("interaction was modified concurrently".into())
            }
            StoreError::Duplicate(what) => InteractionError::Conflict(what),
            StoreError::Backend(e) => InteractionError::Internal(e),
        }
    }
}

impl Categorizable for InteractionError {
    fn category(&self) -> ErrorCategory {
        match self {
            InteractionError::InputRequired => ErrorCategory::InputRequired,
            InteractionError::InvalidInput(_) => ErrorCategory::Validation,
            InteractionError::NotFound => ErrorCategory::NotFound,
            InteractionError::Expired => ErrorCategory::Expired,
            InteractionError::Conflict(_) => ErrorCategory::Conflict,
            InteractionError::Aborted(_) => ErrorCategory::Aborted,
            InteractionError::InvalidState(_)
            | InteractionError::Envelope(_)
            | InteractionError::Internal(_) => ErrorCategory::Internal,
        }
    }

    fn safe_message(&self) -> Cow<'static, str> {
        match self {
            InteractionError::InputRequired => "Input required".into(),
            InteractionError::InvalidInput(e) => capitalize(&e.to_string()).into(),
            InteractionError::NotFound => "Interaction not found, please start over".into(),
            InteractionError::Expired => "Interaction expired, please start over".into(),
            InteractionError::Conflict(what) => capitalize(what).into(),
            InteractionError::Aborted(what) => {
                format!("{}, please start over", capitalize(what)).into()
            }
            // NEVER use the inner error here - it may name internal tags
            InteractionError::InvalidState(_)
            | InteractionError::Envelope(_)
            | InteractionError::Internal(_) => "An internal error occurred".into(),
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// =============================================================================
// Api Error
// =============================================================================

/// Sanitized error persisted as the interaction's last error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub category: ErrorCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<InputError>,
    pub message: String,
}

impl From<&InteractionError> for ApiError {
    fn from(err: &InteractionError) -> Self {
        Self {
            category: err.category(),
            reason: err.input_error().cloned(),
            message: err.safe_message().into_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_display_matches_wire_name() {
        for category in [
            ErrorCategory::InputRequired,
            ErrorCategory::Validation,
            ErrorCategory::NotFound,
            ErrorCategory::Expired,
            ErrorCategory::Conflict,
            ErrorCategory::Aborted,
            ErrorCategory::Internal,
        ] {
            let json = serde_json::to_value(category).unwrap();
            assert_eq!(json, category.to_string());
            assert_eq!(serde_json::from_value::<ErrorCategory>(json).unwrap(), category);
        }
        assert_eq!(ErrorCategory::Validation.to_string(), "invalid_input");
        assert_eq!(ErrorCategory::Internal.to_string(), "internal_error");
    }

    #[test]
    fn test_recoverable_categories() {
        assert!(InteractionError::InputRequired.is_recoverable());
        assert!(InteractionError::InvalidInput(InputError::InvalidCode).is_recoverable());
        assert!(InteractionError::Conflict("duplicate".into()).is_recoverable());
        assert!(!InteractionError::NotFound.is_recoverable());
        assert!(!InteractionError::invalid_state("unknown stage").is_recoverable());
        assert!(InteractionError::Expired.category().requires_restart());

        let aborted = InteractionError::Aborted("email is already in use".into());
        assert!(!aborted.is_recoverable());
        assert!(aborted.category().requires_restart());
        assert_eq!(
            aborted.safe_message(),
            "Email is already in use, please start over"
        );
    }

    #[test]
    fn test_invalid_state_never_leaks_details() {
        let err = InteractionError::invalid_state("unexpected node authentication_end");
        assert_eq!(err.category(), ErrorCategory::Internal);
        assert_eq!(err.safe_message(), "An internal error occurred");

        let err = InteractionError::Internal(anyhow::anyhow!("connection refused to 10.0.0.3"));
        assert!(!err.safe_message().contains("10.0.0.3"));
    }

    #[test]
    fn test_validation_message_describes_reason() {
        let err = InteractionError::from(InputError::PasswordMismatch);
        assert_eq!(err.safe_message(), "Password confirmation does not match");
    }

    #[test]
    fn test_store_conflict_maps_to_conflict() {
        let err = InteractionError::from(StoreError::Conflict);
        assert_eq!(err.category(), ErrorCategory::Conflict);

        let err = InteractionError::from(StoreError::Backend(anyhow::anyhow!("timeout")));
        assert_eq!(err.category(), ErrorCategory::Internal);
    }

    #[test]
    fn test_api_error_round_trips_reason() {
        let err = InteractionError::from(InputError::InvalidLoginId {
            key: LoginIdKey::Email,
        });
        let api = ApiError::from(&err);
        let json = serde_json::to_value(&api).unwrap();
        assert_eq!(json["category"], "invalid_input");
        assert_eq!(json["reason"]["reason"], "invalid_login_id");

        let back: ApiError = serde_json::from_value(json).unwrap();
        assert_eq!(back, api);
    }
}
