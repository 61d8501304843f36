//! What a caller can submit to move an interaction forward.
//!
//! Edges ask for capabilities, not concrete types: the password edge only
//! needs [`Input::password`], the OOB edge only needs [`Input::code`]. Any
//! richer payload the caller sends is ignored.

use serde::Deserialize;

use crate::model::LoginIdKey;

/// Loosely-typed input; every accessor is optional.
pub trait Input: Send + Sync {
    fn login_id(&self) -> Option<(LoginIdKey, &str)> {
        None
    }

    fn password(&self) -> Option<&str> {
        None
    }

    /// New password and its confirmation.
    fn new_password(&self) -> Option<(&str, &str)> {
        None
    }

    /// A one-time code (OOB or TOTP).
    fn code(&self) -> Option<&str> {
        None
    }
}

/// Form-shaped input as decoded from a request body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FormInput {
    pub login_id_key: Option<LoginIdKey>,
    pub login_id: Option<String>,
    pub password: Option<String>,
    pub new_password: Option<String>,
    pub confirm_password: Option<String>,
    pub code: Option<String>,
}

impl FormInput {
    pub fn with_login_id(mut self, key: LoginIdKey, value: impl Into<String>) -> Self {
        self.login_id_key = Some(key);
        self.login_id = Some(value.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_new_password(
        mut self,
        password: impl Into<String>,
        confirmation: impl Into<String>,
    ) -> Self {
        self.new_password = Some(password.into());
        self.confirm_password = Some(confirmation.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl Input for FormInput {
    fn login_id(&self) -> Option<(LoginIdKey, &str)> {
        Some((self.login_id_key?, self.login_id.as_deref()?))
    }

    fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    fn new_password(&self) -> Option<(&str, &str)> {
        Some((self.new_password.as_deref()?, self.confirm_password.as_deref()?))
    }

    fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_input_from_json_ignores_unknown_fields() {
        let form: FormInput = serde_json::from_str(
            r#"{"login_id_key": "email", "login_id": "alice@example.com", "remember_me": true}"#,
        )
        .unwrap();

        assert_eq!(form.login_id(), Some((LoginIdKey::Email, "alice@example.com")));
        assert_eq!(form.password(), None);
    }

    #[test]
    fn test_login_id_needs_key_and_value() {
        let form = FormInput {
            login_id: Some("alice".into()),
            ..Default::default()
        };
        assert_eq!(form.login_id(), None);
    }

    #[test]
    fn test_new_password_needs_confirmation() {
        let form = FormInput {
            new_password: Some("hunter22".into()),
            ..Default::default()
        };
        assert_eq!(form.new_password(), None);

        let form = form.with_new_password("hunter22", "hunter23");
        assert_eq!(form.new_password(), Some(("hunter22", "hunter23")));
    }
}
