use std::env;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Duration;
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};

use crate::model::{AuthenticationStage, AuthenticatorKind, LoginIdKey};

const DEFAULT_INTERACTION_TTL_SECONDS: u32 = 20 * 60;

// =============================================================================
// Engine Config
// =============================================================================

/// Engine settings loaded from environment variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long an interaction token stays usable after it is created.
    pub interaction_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interaction_ttl: Duration::seconds(i64::from(DEFAULT_INTERACTION_TTL_SECONDS)),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let seconds: u32 = match env::var("INTERACTION_TTL_SECONDS") {
            Ok(raw) => raw
                .parse()
                .context("INTERACTION_TTL_SECONDS must be a non-negative number of seconds")?,
            Err(_) => DEFAULT_INTERACTION_TTL_SECONDS,
        };
        if seconds == 0 {
            anyhow::bail!("INTERACTION_TTL_SECONDS must be positive");
        }

        Ok(Self {
            interaction_ttl: Duration::seconds(i64::from(seconds)),
        })
    }
}

// =============================================================================
// Tenant Config
// =============================================================================

/// Per-tenant authentication policy.
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```ignore
/// let config = TenantConfig::from_json(r#"{
///     "authentication": { "secondary_authentication_mode": "required" }
/// }"#)?;
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantConfig {
    pub authentication: AuthenticationConfig,
    pub password_policy: PasswordPolicy,
    pub oob: OobConfig,
}

impl TenantConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw).context("invalid tenant configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that parse but cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.oob.code_ttl_seconds == 0 {
            anyhow::bail!("invalid tenant configuration: oob.code_ttl_seconds must be positive");
        }
        if self.oob.code_length == 0 {
            anyhow::bail!("invalid tenant configuration: oob.code_length must be positive");
        }
        Ok(())
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json(&raw)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondaryAuthenticationMode {
    Disabled,
    #[default]
    IfExists,
    Required,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthenticationConfig {
    /// Login id keys users may sign up and log in with.
    pub identities: Vec<LoginIdKey>,
    /// Primary authenticator kinds, highest priority first.
    pub primary_authenticators: Vec<AuthenticatorKind>,
    /// Secondary authenticator kinds, highest priority first.
    pub secondary_authenticators: Vec<AuthenticatorKind>,
    pub secondary_authentication_mode: SecondaryAuthenticationMode,
}

impl Default for AuthenticationConfig {
    fn default() -> Self {
        Self {
            identities: vec![LoginIdKey::Email, LoginIdKey::Phone, LoginIdKey::Username],
            primary_authenticators: vec![AuthenticatorKind::Password, AuthenticatorKind::OobOtp],
            secondary_authenticators: vec![AuthenticatorKind::Totp, AuthenticatorKind::OobOtp],
            secondary_authentication_mode: SecondaryAuthenticationMode::IfExists,
        }
    }
}

impl AuthenticationConfig {
    /// Configured kind priority for a stage.
    pub fn authenticators_for(&self, stage: AuthenticationStage) -> &[AuthenticatorKind] {
        match stage {
            AuthenticationStage::Primary => &self.primary_authenticators,
            AuthenticationStage::Secondary => &self.secondary_authenticators,
        }
    }

    pub fn allows_login_id(&self, key: LoginIdKey) -> bool {
        self.identities.contains(&key)
    }
}

// =============================================================================
// Password Policy
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum PasswordViolation {
    TooShort { min_length: usize },
    MissingUppercase,
    MissingLowercase,
    MissingDigit,
    MissingSymbol,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub uppercase_required: bool,
    pub lowercase_required: bool,
    pub digit_required: bool,
    pub symbol_required: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            uppercase_required: false,
            lowercase_required: false,
            digit_required: false,
            symbol_required: false,
        }
    }
}

impl PasswordPolicy {
    /// Every rule `password` breaks, in rule order.
    pub fn check(&self, password: &str) -> Vec<PasswordViolation> {
        let mut violations = Vec::new();

        if password.chars().count() < self.min_length {
            violations.push(PasswordViolation::TooShort {
                min_length: self.min_length,
            });
        }
        if self.uppercase_required && !password.chars().any(char::is_uppercase) {
            violations.push(PasswordViolation::MissingUppercase);
        }
        if self.lowercase_required && !password.chars().any(char::is_lowercase) {
            violations.push(PasswordViolation::MissingLowercase);
        }
        if self.digit_required && !password.chars().any(|c| c.is_ascii_digit()) {
            violations.push(PasswordViolation::MissingDigit);
        }
        if self.symbol_required && password.chars().all(char::is_alphanumeric) {
            violations.push(PasswordViolation::MissingSymbol);
        }

        violations
    }
}

// =============================================================================
// OOB
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OobConfig {
    pub code_ttl_seconds: u32,
    pub code_length: usize,
}

impl Default for OobConfig {
    fn default() -> Self {
        Self {
            code_ttl_seconds: 300,
            code_length: 6,
        }
    }
}

impl OobConfig {
    pub fn code_ttl(&self) -> Duration {
        Duration::seconds(i64::from(self.code_ttl_seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_tenant_config_fills_defaults() {
        let config = TenantConfig::from_json(
            r#"{
                "authentication": {
                    "primary_authenticators": ["oob_otp"],
                    "secondary_authentication_mode": "required"
                },
                "password_policy": { "min_length": 12 }
            }"#,
        )
        .unwrap();

        assert_eq!(
            config.authentication.authenticators_for(AuthenticationStage::Primary),
            &[AuthenticatorKind::OobOtp]
        );
        assert_eq!(
            config.authentication.authenticators_for(AuthenticationStage::Secondary),
            &[AuthenticatorKind::Totp, AuthenticatorKind::OobOtp]
        );
        assert_eq!(
            config.authentication.secondary_authentication_mode,
            SecondaryAuthenticationMode::Required
        );
        assert_eq!(config.password_policy.min_length, 12);
        assert_eq!(config.oob.code_length, 6);
    }

    #[test]
    fn test_malformed_tenant_config_is_rejected() {
        let err = TenantConfig::from_json(r#"{"authentication": {"identities": ["fax"]}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("invalid tenant configuration"));
    }

    #[test]
    fn test_oob_code_ttl_must_be_positive() {
        for raw in [
            r#"{"oob": {"code_ttl_seconds": -300}}"#,
            r#"{"oob": {"code_ttl_seconds": 0}}"#,
            r#"{"oob": {"code_ttl_seconds": 99999999999999}}"#,
            r#"{"oob": {"code_length": 0}}"#,
        ] {
            let err = TenantConfig::from_json(raw).unwrap_err();
            assert!(err.to_string().contains("invalid tenant configuration"), "{raw}");
        }

        let config = TenantConfig::from_json(r#"{"oob": {"code_ttl_seconds": 120}}"#).unwrap();
        assert_eq!(config.oob.code_ttl(), Duration::seconds(120));
    }

    #[test]
    fn test_password_policy_reports_every_violation() {
        let policy = PasswordPolicy {
            min_length: 10,
            uppercase_required: true,
            lowercase_required: true,
            digit_required: true,
            symbol_required: true,
        };

        assert_eq!(
            policy.check("abc"),
            vec![
                PasswordViolation::TooShort { min_length: 10 },
                PasswordViolation::MissingUppercase,
                PasswordViolation::MissingDigit,
                PasswordViolation::MissingSymbol,
            ]
        );
        assert!(policy.check("Abcdefgh1!").is_empty());
    }

    #[test]
    fn test_default_policy_only_checks_length() {
        let policy = PasswordPolicy::default();
        assert!(policy.check("password").is_empty());
        assert_eq!(policy.check("short").len(), 1);
    }
}
