//! Node payloads and edge transitions, grouped by the part of a flow they
//! belong to.

pub mod authenticate;
pub mod enroll;
pub mod finalize;
pub mod forgot_password;
pub mod identity;

use crate::config::TenantConfig;
use crate::error::{InputError, InteractionError, InteractionResult};
use crate::input::Input;
use crate::model::{LoginId, LoginIdKey};

/// Unwrap an input accessor, or ask for the field.
pub(crate) fn require<T>(value: Option<T>) -> InteractionResult<T> {
    value.ok_or(InteractionError::InputRequired)
}

/// Read the login id from `input`, checked against the tenant's enabled keys.
pub(crate) fn login_id_from(
    config: &TenantConfig,
    input: Option<&dyn Input>,
) -> InteractionResult<LoginId> {
    let (key, raw) = require(input.and_then(|i| i.login_id()))?;
    if !config.authentication.allows_login_id(key) {
        return Err(InputError::LoginIdKeyNotAllowed { key }.into());
    }
    Ok(LoginId::parse(key, raw)?)
}

/// Validate a new password and its confirmation.
pub(crate) fn check_new_password(
    config: &TenantConfig,
    password: &str,
    confirmation: &str,
) -> Result<(), InputError> {
    if password != confirmation {
        return Err(InputError::PasswordMismatch);
    }
    let violations = config.password_policy.check(password);
    if !violations.is_empty() {
        return Err(InputError::PasswordPolicy { violations });
    }
    Ok(())
}

/// Keys that can receive a one-time code.
pub(crate) fn is_reachable(key: LoginIdKey) -> bool {
    key.oob_channel().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthenticationConfig, PasswordViolation};
    use crate::input::FormInput;

    #[test]
    fn test_login_id_from_rejects_disabled_key() {
        let config = TenantConfig {
            authentication: AuthenticationConfig {
                identities: vec![LoginIdKey::Email],
                ..Default::default()
            },
            ..Default::default()
        };
        let form = FormInput::default().with_login_id(LoginIdKey::Username, "alice");

        let err = login_id_from(&config, Some(&form)).unwrap_err();
        assert_eq!(
            err.input_error(),
            Some(&InputError::LoginIdKeyNotAllowed {
                key: LoginIdKey::Username
            })
        );
    }

    #[test]
    fn test_login_id_from_without_input_requires_it() {
        let err = login_id_from(&TenantConfig::default(), None).unwrap_err();
        assert!(matches!(err, InteractionError::InputRequired));
    }

    #[test]
    fn test_check_new_password_reports_mismatch_before_policy() {
        let config = TenantConfig::default();
        assert_eq!(
            check_new_password(&config, "short", "shorter"),
            Err(InputError::PasswordMismatch)
        );
        assert_eq!(
            check_new_password(&config, "short", "short"),
            Err(InputError::PasswordPolicy {
                violations: vec![PasswordViolation::TooShort { min_length: 8 }]
            })
        );
        assert_eq!(check_new_password(&config, "long enough", "long enough"), Ok(()));
    }
}
