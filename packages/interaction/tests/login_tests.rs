//! Integration tests for the login intent.
//!
//! Covers:
//! - password + TOTP login end to end
//! - skipping an optional second factor
//! - enrolling a second factor when it is required
//! - OOB codes (sent once, checked, expiring)
//! - recoverable errors recorded on the interaction

mod common;

use chrono::Duration;
use common::*;
use interaction::{
    AuthenticationStage, AuthenticatorKind, Categorizable, Edge, EffectAction, ErrorCategory,
    InputError, Intent, InteractionError, LifecycleEvent, OobChannel, Outcome,
    SecondaryAuthenticationMode, SessionCreateReason, StartOptions,
};
use interaction::model::{AuthenticatorTag, OobTarget};

// ============================================================================
// Password + TOTP
// ============================================================================

#[tokio::test]
async fn test_login_with_password_and_totp() {
    let harness = TestHarness::new().with_tenant_config(with_priorities(
        &[AuthenticatorKind::Password],
        &[AuthenticatorKind::Totp],
    ));
    let user_id = harness.seed_user(ALICE, PASSWORD);
    harness.seed_totp(user_id);
    let service = harness.service();

    let outcome = service
        .start(
            Intent::login(),
            StartOptions {
                client_id: Some("web".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let (token, edges) = awaiting(outcome);
    assert_eq!(edge_kinds(&edges), vec!["select_identity_login_id"]);

    let (_, edges) = awaiting(service.feed(&token, &login_id(ALICE)).await.unwrap());
    assert_eq!(edge_kinds(&edges), vec!["authentication_password"]);

    let (_, edges) = awaiting(service.feed(&token, &password(PASSWORD)).await.unwrap());
    assert_eq!(edge_kinds(&edges), vec!["authentication_totp"]);
    let Edge::AuthenticationTotp { stage, authenticators } = &edges[0] else {
        panic!("expected a TOTP edge");
    };
    assert_eq!(*stage, AuthenticationStage::Secondary);
    assert_eq!(authenticators.len(), 1);

    // Nothing is written before finalization
    assert!(harness.backend.sessions().is_empty());

    let outcome = service.feed(&token, &totp()).await.unwrap();
    let Outcome::Finished { user_id: finished_for, session } = outcome else {
        panic!("expected login to finish");
    };
    assert_eq!(finished_for, user_id);

    let session = session.expect("login creates a session");
    assert_eq!(session.reason, SessionCreateReason::Login);
    assert_eq!(session.client_id.as_deref(), Some("web"));
    assert_eq!(
        session.amr,
        vec![AuthenticatorKind::Password, AuthenticatorKind::Totp]
    );

    // Exactly one transactional effect, and no outbound messages
    assert_eq!(
        harness.backend.applied_effects(),
        vec![EffectAction::CreateSession { session }]
    );
    assert!(harness.events.delivered().is_empty());

    // The token is gone once the interaction finalizes
    let err = service.feed(&token, &totp()).await.unwrap_err();
    assert!(matches!(err, InteractionError::NotFound));
}

#[tokio::test]
async fn test_login_id_is_normalized() {
    let (harness, _) = harness_with_alice();
    let service = harness.service();

    let (token, _) = awaiting(service.start(Intent::login(), StartOptions::default()).await.unwrap());
    let (_, edges) = awaiting(
        service
            .feed(&token, &login_id("  Alice@Example.COM "))
            .await
            .unwrap(),
    );
    assert_eq!(edge_kinds(&edges), vec!["authentication_password"]);
}

// ============================================================================
// Optional and required second factor
// ============================================================================

#[tokio::test]
async fn test_secondary_stage_is_skipped_when_nothing_is_enrolled() {
    let (harness, user_id) = harness_with_alice();
    let service = harness.service();

    let (token, _) = awaiting(service.start(Intent::login(), StartOptions::default()).await.unwrap());
    service.feed(&token, &login_id(ALICE)).await.unwrap();

    let outcome = service.feed(&token, &password(PASSWORD)).await.unwrap();
    assert_eq!(finished(outcome), user_id);

    let sessions = harness.backend.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].amr, vec![AuthenticatorKind::Password]);
}

#[tokio::test]
async fn test_disabled_secondary_mode_ignores_enrolled_totp() {
    let harness = TestHarness::new()
        .with_tenant_config(with_secondary_mode(SecondaryAuthenticationMode::Disabled));
    let user_id = harness.seed_user(ALICE, PASSWORD);
    harness.seed_totp(user_id);
    let service = harness.service();

    let (token, _) = awaiting(service.start(Intent::login(), StartOptions::default()).await.unwrap());
    service.feed(&token, &login_id(ALICE)).await.unwrap();

    let outcome = service.feed(&token, &password(PASSWORD)).await.unwrap();
    assert_eq!(finished(outcome), user_id);
}

#[tokio::test]
async fn test_required_secondary_mode_enrolls_totp_during_login() {
    let harness = TestHarness::new()
        .with_tenant_config(with_secondary_mode(SecondaryAuthenticationMode::Required));
    let user_id = harness.seed_user(ALICE, PASSWORD);
    let service = harness.service();

    let (token, _) = awaiting(service.start(Intent::login(), StartOptions::default()).await.unwrap());
    service.feed(&token, &login_id(ALICE)).await.unwrap();

    let (_, edges) = awaiting(service.feed(&token, &password(PASSWORD)).await.unwrap());
    assert_eq!(edge_kinds(&edges), vec!["create_authenticator_totp"]);

    let outcome = service.feed(&token, &totp()).await.unwrap();
    assert_eq!(finished(outcome), user_id);

    let authenticators = harness.backend.authenticators_of(user_id);
    let totp = authenticators
        .iter()
        .find(|a| a.kind == AuthenticatorKind::Totp)
        .expect("totp was enrolled");
    assert_eq!(totp.tag, AuthenticatorTag::Secondary);

    assert_eq!(
        harness.backend.events(),
        vec![LifecycleEvent::AuthenticatorAdded {
            user_id,
            authenticator_id: totp.id,
            kind: AuthenticatorKind::Totp,
        }]
    );
    assert_eq!(harness.backend.sessions().len(), 1);
}

// ============================================================================
// OOB
// ============================================================================

fn harness_with_oob_only() -> (TestHarness, uuid::Uuid) {
    let harness = TestHarness::new();
    let user_id = uuid::Uuid::new_v4();
    harness
        .backend
        .seed_identity(user_id, interaction::LoginIdKey::Email, ALICE);
    harness.backend.seed_authenticator(
        user_id,
        AuthenticatorKind::OobOtp,
        AuthenticatorTag::Primary,
        "",
        Some(OobTarget {
            channel: OobChannel::Email,
            target: ALICE.into(),
        }),
    );
    (harness, user_id)
}

#[tokio::test]
async fn test_login_with_oob_code() {
    let (harness, user_id) = harness_with_oob_only();
    let service = harness.service();

    let (token, _) = awaiting(service.start(Intent::login(), StartOptions::default()).await.unwrap());
    let (_, edges) = awaiting(service.feed(&token, &login_id(ALICE)).await.unwrap());
    assert_eq!(edge_kinds(&edges), vec!["authentication_oob"]);
    assert_eq!(harness.events.codes_sent_to(ALICE), vec![TEST_OOB_CODE]);

    // A wrong code replays the graph but never re-sends
    let err = service.feed(&token, &code("000000")).await.unwrap_err();
    assert!(matches!(
        err,
        InteractionError::InvalidInput(InputError::InvalidCode)
    ));
    assert_eq!(harness.events.codes_sent_to(ALICE).len(), 1);

    let outcome = service.feed(&token, &code(TEST_OOB_CODE)).await.unwrap();
    assert_eq!(finished(outcome), user_id);
    assert_eq!(harness.events.delivered().len(), 1);
}

#[tokio::test]
async fn test_oob_code_is_sent_once_per_trigger() {
    let (harness, user_id) = harness_with_oob_only();
    let service = harness.service();

    let (token, _) = awaiting(service.start(Intent::login(), StartOptions::default()).await.unwrap());
    service.feed(&token, &login_id(ALICE)).await.unwrap();
    assert_eq!(harness.events.codes_sent_to(ALICE).len(), 1);

    // Each of these reconstructs the graph, trigger node included
    for _ in 0..3 {
        let view = service.inspect(&token).await.unwrap();
        assert_eq!(edge_kinds(&view.edges), vec!["authentication_oob"]);
    }
    for wrong in ["000000", "111111"] {
        let err = service.feed(&token, &code(wrong)).await.unwrap_err();
        assert!(matches!(
            err,
            InteractionError::InvalidInput(InputError::InvalidCode)
        ));
    }
    let err = service.feed(&token, &password(PASSWORD)).await.unwrap_err();
    assert!(matches!(err, InteractionError::InputRequired));

    assert_eq!(harness.events.codes_sent_to(ALICE), vec![TEST_OOB_CODE]);

    let outcome = service.feed(&token, &code(TEST_OOB_CODE)).await.unwrap();
    assert_eq!(finished(outcome), user_id);
    assert_eq!(harness.events.codes_sent_to(ALICE).len(), 1);

    // A new interaction appends a new trigger, which sends a new code
    let (second, _) = awaiting(service.start(Intent::login(), StartOptions::default()).await.unwrap());
    service.feed(&second, &login_id(ALICE)).await.unwrap();
    service.inspect(&second).await.unwrap();
    assert_eq!(harness.events.codes_sent_to(ALICE).len(), 2);
}

#[tokio::test]
async fn test_oob_code_expires() {
    let (harness, _) = harness_with_oob_only();
    let service = harness.service();

    let (token, _) = awaiting(service.start(Intent::login(), StartOptions::default()).await.unwrap());
    service.feed(&token, &login_id(ALICE)).await.unwrap();

    harness.clock.advance(Duration::seconds(301));

    let err = service.feed(&token, &code(TEST_OOB_CODE)).await.unwrap_err();
    assert!(matches!(
        err,
        InteractionError::InvalidInput(InputError::ExpiredCode)
    ));
}

// ============================================================================
// Recoverable errors
// ============================================================================

#[tokio::test]
async fn test_wrong_password_is_recorded_and_retryable() {
    let (harness, user_id) = harness_with_alice();
    let service = harness.service();

    let (token, _) = awaiting(service.start(Intent::login(), StartOptions::default()).await.unwrap());
    service.feed(&token, &login_id(ALICE)).await.unwrap();
    let before = harness.backend.record(&token).unwrap();

    let err = service.feed(&token, &password("wrong")).await.unwrap_err();
    assert!(matches!(
        err,
        InteractionError::InvalidInput(InputError::InvalidCredentials)
    ));
    assert_eq!(err.category(), ErrorCategory::Validation);

    let after = harness.backend.record(&token).unwrap();
    assert_eq!(after.nodes, before.nodes);
    let recorded = after.error.expect("error is recorded");
    assert_eq!(recorded.category, ErrorCategory::Validation);
    assert_eq!(recorded.reason, Some(InputError::InvalidCredentials));
    assert_eq!(recorded.message, "Invalid credentials");

    let view = service.inspect(&token).await.unwrap();
    assert_eq!(view.current, "authentication_begin");
    assert_eq!(view.error, Some(recorded));

    // The next good step clears it
    let outcome = service.feed(&token, &password(PASSWORD)).await.unwrap();
    assert_eq!(finished(outcome), user_id);
}

#[tokio::test]
async fn test_unknown_login_id() {
    let (harness, _) = harness_with_alice();
    let service = harness.service();

    let (token, _) = awaiting(service.start(Intent::login(), StartOptions::default()).await.unwrap());
    let err = service
        .feed(&token, &login_id("bob@example.com"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        InteractionError::InvalidInput(InputError::UserNotFound)
    ));
}

#[tokio::test]
async fn test_input_that_fits_no_edge_is_input_required() {
    let (harness, _) = harness_with_alice();
    let service = harness.service();

    let (token, _) = awaiting(service.start(Intent::login(), StartOptions::default()).await.unwrap());
    let err = service.feed(&token, &password(PASSWORD)).await.unwrap_err();
    assert!(matches!(err, InteractionError::InputRequired));

    let view = service.inspect(&token).await.unwrap();
    assert_eq!(edge_kinds(&view.edges), vec!["select_identity_login_id"]);
    assert_eq!(
        view.error.map(|e| e.category),
        Some(ErrorCategory::InputRequired)
    );
}

#[tokio::test]
async fn test_removed_identity_fails_replay() {
    let (harness, _) = harness_with_alice();
    let service = harness.service();

    let (token, _) = awaiting(service.start(Intent::login(), StartOptions::default()).await.unwrap());
    service.feed(&token, &login_id(ALICE)).await.unwrap();
    let record = harness.backend.record(&token).unwrap();

    let identity = harness.backend.identities().remove(0);
    harness.backend.remove_identity(identity.id);

    let err = service.feed(&token, &password(PASSWORD)).await.unwrap_err();
    assert!(matches!(err, InteractionError::InvalidState(_)));
    assert!(!err.is_recoverable());
    assert_eq!(harness.backend.record(&token).unwrap(), record);
    assert!(harness.backend.sessions().is_empty());
}

#[tokio::test]
async fn test_login_without_primary_authenticator_is_rejected() {
    let harness = TestHarness::new();
    let user_id = uuid::Uuid::new_v4();
    harness
        .backend
        .seed_identity(user_id, interaction::LoginIdKey::Email, ALICE);
    let service = harness.service();

    let (token, _) = awaiting(service.start(Intent::login(), StartOptions::default()).await.unwrap());
    let err = service.feed(&token, &login_id(ALICE)).await.unwrap_err();
    assert!(matches!(
        err,
        InteractionError::InvalidInput(InputError::InvalidCredentials)
    ));
    assert!(harness.backend.sessions().is_empty());

    // The skipped primary stage is never stored; the user can pick another login id
    let view = service.inspect(&token).await.unwrap();
    assert_eq!(view.current, "select_identity_begin");
    assert_eq!(
        view.error.and_then(|e| e.reason),
        Some(InputError::InvalidCredentials)
    );
}
