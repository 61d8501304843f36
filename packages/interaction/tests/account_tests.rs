//! Integration tests for password reset and adding authenticators.

mod common;

use common::*;
use interaction::model::{AuthenticatorTag, OobChannel};
use interaction::{
    AuthenticationStage, AuthenticatorKind, EffectAction, InputError, Intent, InteractionError,
    LifecycleEvent, LoginIdKey, Outcome, StartOptions,
};

// ============================================================================
// Reset password
// ============================================================================

#[tokio::test]
async fn test_reset_password() {
    let (harness, user_id) = harness_with_alice();
    let service = harness.service();

    let (token, edges) = awaiting(
        service
            .start(Intent::reset_password(), StartOptions::default())
            .await
            .unwrap(),
    );
    assert_eq!(edge_kinds(&edges), vec!["forgot_password"]);

    let (_, edges) = awaiting(service.feed(&token, &login_id(ALICE)).await.unwrap());
    assert_eq!(edge_kinds(&edges), vec!["reset_password"]);
    assert_eq!(
        harness.events.delivered(),
        vec![EffectAction::SendResetPasswordCode {
            channel: OobChannel::Email,
            target: ALICE.into(),
            code: TEST_OOB_CODE.into(),
        }]
    );

    let form = new_password("battery staple").with_code(TEST_OOB_CODE);
    let outcome = service.feed(&token, &form).await.unwrap();
    let Outcome::Finished { user_id: reset_for, session } = outcome else {
        panic!("expected reset to finish");
    };
    assert_eq!(reset_for, user_id);
    assert!(session.is_none());

    assert_eq!(
        harness.backend.events(),
        vec![LifecycleEvent::PasswordReset { user_id }]
    );

    // The old password no longer works; the new one does
    let (login, _) = awaiting(service.start(Intent::login(), StartOptions::default()).await.unwrap());
    service.feed(&login, &login_id(ALICE)).await.unwrap();
    let err = service.feed(&login, &password(PASSWORD)).await.unwrap_err();
    assert!(matches!(
        err,
        InteractionError::InvalidInput(InputError::InvalidCredentials)
    ));
    let outcome = service
        .feed(&login, &password("battery staple"))
        .await
        .unwrap();
    assert_eq!(finished(outcome), user_id);
}

#[tokio::test]
async fn test_reset_password_needs_code_and_password_together() {
    let (harness, _) = harness_with_alice();
    let service = harness.service();

    let (token, _) = awaiting(
        service
            .start(Intent::reset_password(), StartOptions::default())
            .await
            .unwrap(),
    );
    service.feed(&token, &login_id(ALICE)).await.unwrap();

    let err = service.feed(&token, &code(TEST_OOB_CODE)).await.unwrap_err();
    assert!(matches!(err, InteractionError::InputRequired));

    let wrong = new_password("battery staple").with_code("999999");
    let err = service.feed(&token, &wrong).await.unwrap_err();
    assert!(matches!(
        err,
        InteractionError::InvalidInput(InputError::InvalidCode)
    ));

    assert!(harness.backend.events().is_empty());
    assert_eq!(harness.events.delivered().len(), 1);
}

#[tokio::test]
async fn test_reset_password_rejects_username_login_ids() {
    let (harness, _) = harness_with_alice();
    let service = harness.service();

    let (token, _) = awaiting(
        service
            .start(Intent::reset_password(), StartOptions::default())
            .await
            .unwrap(),
    );
    let form = interaction::FormInput::default().with_login_id(LoginIdKey::Username, "alice");
    let err = service.feed(&token, &form).await.unwrap_err();
    assert!(matches!(
        err,
        InteractionError::InvalidInput(InputError::LoginIdKeyNotAllowed {
            key: LoginIdKey::Username
        })
    ));
}

#[tokio::test]
async fn test_reset_password_creates_missing_password() {
    let harness = TestHarness::new();
    let user_id = uuid::Uuid::new_v4();
    harness
        .backend
        .seed_identity(user_id, LoginIdKey::Email, ALICE);
    let service = harness.service();

    let (token, _) = awaiting(
        service
            .start(Intent::reset_password(), StartOptions::default())
            .await
            .unwrap(),
    );
    service.feed(&token, &login_id(ALICE)).await.unwrap();
    let form = new_password("battery staple").with_code(TEST_OOB_CODE);
    service.feed(&token, &form).await.unwrap();

    let authenticators = harness.backend.authenticators_of(user_id);
    assert_eq!(authenticators.len(), 1);
    assert_eq!(authenticators[0].kind, AuthenticatorKind::Password);
    assert_eq!(authenticators[0].tag, AuthenticatorTag::Primary);
}

// ============================================================================
// Add authenticator
// ============================================================================

#[tokio::test]
async fn test_add_totp_authenticator() {
    let (harness, user_id) = harness_with_alice();
    let service = harness.service();

    let intent = Intent::add_authenticator(
        user_id,
        AuthenticationStage::Secondary,
        AuthenticatorKind::Totp,
    );
    let (token, edges) = awaiting(service.start(intent, StartOptions::default()).await.unwrap());
    assert_eq!(edge_kinds(&edges), vec!["create_authenticator_totp"]);

    let err = service.feed(&token, &code("000000")).await.unwrap_err();
    assert!(matches!(
        err,
        InteractionError::InvalidInput(InputError::InvalidCode)
    ));

    let outcome = service.feed(&token, &totp()).await.unwrap();
    let Outcome::Finished { user_id: added_for, session } = outcome else {
        panic!("expected enrollment to finish");
    };
    assert_eq!(added_for, user_id);
    assert!(session.is_none());

    let totp = harness
        .backend
        .authenticators_of(user_id)
        .into_iter()
        .find(|a| a.kind == AuthenticatorKind::Totp)
        .expect("totp was enrolled");
    assert_eq!(totp.secret, TEST_TOTP_SEED);
    assert_eq!(
        harness.backend.events(),
        vec![LifecycleEvent::AuthenticatorAdded {
            user_id,
            authenticator_id: totp.id,
            kind: AuthenticatorKind::Totp,
        }]
    );
}

#[tokio::test]
async fn test_add_oob_authenticator_sends_code_to_identity() {
    let (harness, user_id) = harness_with_alice();
    let service = harness.service();

    let intent = Intent::add_authenticator(
        user_id,
        AuthenticationStage::Secondary,
        AuthenticatorKind::OobOtp,
    );
    let (token, edges) = awaiting(service.start(intent, StartOptions::default()).await.unwrap());
    assert_eq!(edge_kinds(&edges), vec!["create_authenticator_oob"]);
    assert_eq!(harness.events.codes_sent_to(ALICE), vec![TEST_OOB_CODE]);

    service.feed(&token, &code(TEST_OOB_CODE)).await.unwrap();

    let oob = harness
        .backend
        .authenticators_of(user_id)
        .into_iter()
        .find(|a| a.kind == AuthenticatorKind::OobOtp)
        .expect("oob was enrolled");
    assert_eq!(oob.tag, AuthenticatorTag::Secondary);
    assert_eq!(oob.oob_target.map(|t| t.target), Some(ALICE.to_string()));
}

#[tokio::test]
async fn test_add_authenticator_for_unknown_user() {
    let harness = TestHarness::new();
    let service = harness.service();

    let intent = Intent::add_authenticator(
        uuid::Uuid::new_v4(),
        AuthenticationStage::Secondary,
        AuthenticatorKind::Totp,
    );
    let err = service
        .start(intent, StartOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        InteractionError::InvalidInput(InputError::UserNotFound)
    ));
    assert_eq!(harness.backend.record_count(), 0);
}

#[tokio::test]
async fn test_add_disabled_authenticator_kind_is_invalid_state() {
    let (harness, user_id) = harness_with_alice();
    let service = harness.service();

    // Password is not a secondary kind by default
    let intent = Intent::add_authenticator(
        user_id,
        AuthenticationStage::Secondary,
        AuthenticatorKind::Password,
    );
    let err = service
        .start(intent, StartOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, InteractionError::InvalidState(_)));
}
