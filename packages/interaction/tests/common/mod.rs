// Common test utilities

#![allow(dead_code)]

use interaction::{
    AuthenticatorKind, Edge, FormInput, InteractionToken, LoginIdKey, Outcome,
    SecondaryAuthenticationMode, TenantConfig,
};
use uuid::Uuid;

pub use interaction::testing::{totp_code, TestHarness, TEST_OOB_CODE, TEST_TOTP_SEED};

pub const ALICE: &str = "alice@example.com";
pub const PASSWORD: &str = "correct horse";

pub fn login_id(email: &str) -> FormInput {
    FormInput::default().with_login_id(LoginIdKey::Email, email)
}

pub fn password(password: &str) -> FormInput {
    FormInput::default().with_password(password)
}

pub fn new_password(password: &str) -> FormInput {
    FormInput::default().with_new_password(password, password)
}

pub fn code(code: &str) -> FormInput {
    FormInput::default().with_code(code)
}

/// The TOTP code the in-memory backend accepts for harness seeds.
pub fn totp() -> FormInput {
    code(&totp_code(TEST_TOTP_SEED))
}

/// Unwrap an `AwaitingInput` outcome.
pub fn awaiting(outcome: Outcome) -> (InteractionToken, Vec<Edge>) {
    match outcome {
        Outcome::AwaitingInput { token, edges } => (token, edges),
        other => panic!("expected the interaction to wait for input, got {:?}", other),
    }
}

/// Unwrap a `Finished` outcome.
pub fn finished(outcome: Outcome) -> Uuid {
    match outcome {
        Outcome::Finished { user_id, .. } => user_id,
        other => panic!("expected the interaction to finish, got {:?}", other),
    }
}

pub fn edge_kinds(edges: &[Edge]) -> Vec<&'static str> {
    edges.iter().map(Edge::kind).collect()
}

pub fn with_secondary_mode(mode: SecondaryAuthenticationMode) -> TenantConfig {
    let mut config = TenantConfig::default();
    config.authentication.secondary_authentication_mode = mode;
    config
}

/// Tenant config with exactly these kind priorities per stage.
pub fn with_priorities(
    primary: &[AuthenticatorKind],
    secondary: &[AuthenticatorKind],
) -> TenantConfig {
    let mut config = TenantConfig::default();
    config.authentication.primary_authenticators = primary.to_vec();
    config.authentication.secondary_authenticators = secondary.to_vec();
    config
}

/// Harness with Alice (email + password) already registered.
pub fn harness_with_alice() -> (TestHarness, Uuid) {
    let harness = TestHarness::new();
    let user_id = harness.seed_user(ALICE, PASSWORD);
    (harness, user_id)
}
