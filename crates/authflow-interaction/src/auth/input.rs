use serde::{Deserialize, Serialize};

use authflow_core::authn::{AuthenticatorType, IdentitySpec};

use crate::engine::Input;

/// End-user input understood by the authentication edges.
///
/// Every accessor is optional; an edge that finds the values it needs
/// missing reports `IncompatibleInput` and the next edge is tried.
pub trait AuthInput: Input {
    // Identity selection
    fn identity_spec(&self) -> Option<&IdentitySpec> {
        None
    }
    fn oauth_provider_alias(&self) -> Option<&str> {
        None
    }
    fn oauth_code(&self) -> Option<&str> {
        None
    }
    fn oauth_state(&self) -> Option<&str> {
        None
    }

    // Authentication
    fn password(&self) -> Option<&str> {
        None
    }
    fn totp_code(&self) -> Option<&str> {
        None
    }
    fn oob_code(&self) -> Option<&str> {
        None
    }
    fn resend(&self) -> bool {
        false
    }
    fn oob_authenticator_type(&self) -> Option<AuthenticatorType> {
        None
    }
    fn oob_authenticator_index(&self) -> Option<usize> {
        None
    }
    fn recovery_code(&self) -> Option<&str> {
        None
    }
    fn device_token(&self) -> Option<&str> {
        None
    }
    fn create_device_token(&self) -> bool {
        false
    }

    // Authenticator setup
    fn new_password(&self) -> Option<&str> {
        None
    }
    fn old_password(&self) -> Option<&str> {
        None
    }
    fn setup_totp(&self) -> bool {
        false
    }
    fn totp_display_name(&self) -> Option<&str> {
        None
    }
    fn oob_target(&self) -> Option<&str> {
        None
    }
    fn skip_mfa_setup(&self) -> bool {
        false
    }
    fn requested_by_user(&self) -> bool {
        false
    }
    fn viewed_recovery_codes(&self) -> bool {
        false
    }

    // Verification and password reset
    fn verification_code(&self) -> Option<&str> {
        None
    }
    fn forgot_password_login_id(&self) -> Option<&str> {
        None
    }
    fn reset_code(&self) -> Option<&str> {
        None
    }

    // Removal
    fn remove_identity_id(&self) -> Option<&str> {
        None
    }
    fn remove_authenticator_id(&self) -> Option<&str> {
        None
    }
}

/// A submitted form, deserializable from JSON or TOML.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormInput {
    /// Absent means interactive.
    pub interactive: Option<bool>,

    pub identity_spec: Option<IdentitySpec>,
    pub oauth_provider_alias: Option<String>,
    pub oauth_code: Option<String>,
    pub oauth_state: Option<String>,

    pub password: Option<String>,
    pub totp_code: Option<String>,
    pub oob_code: Option<String>,
    pub resend: bool,
    pub oob_authenticator_type: Option<AuthenticatorType>,
    pub oob_authenticator_index: Option<usize>,
    pub recovery_code: Option<String>,
    pub device_token: Option<String>,
    pub create_device_token: bool,

    pub new_password: Option<String>,
    pub old_password: Option<String>,
    pub setup_totp: bool,
    pub totp_display_name: Option<String>,
    pub oob_target: Option<String>,
    pub skip_mfa_setup: bool,
    pub requested_by_user: bool,
    pub viewed_recovery_codes: bool,

    pub verification_code: Option<String>,
    pub forgot_password_login_id: Option<String>,
    pub reset_code: Option<String>,

    pub remove_identity_id: Option<String>,
    pub remove_authenticator_id: Option<String>,
}

impl Input for FormInput {
    fn is_interactive(&self) -> bool {
        self.interactive.unwrap_or(true)
    }
}

impl AuthInput for FormInput {
    fn identity_spec(&self) -> Option<&IdentitySpec> {
        self.identity_spec.as_ref()
    }
    fn oauth_provider_alias(&self) -> Option<&str> {
        self.oauth_provider_alias.as_deref()
    }
    fn oauth_code(&self) -> Option<&str> {
        self.oauth_code.as_deref()
    }
    fn oauth_state(&self) -> Option<&str> {
        self.oauth_state.as_deref()
    }
    fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
    fn totp_code(&self) -> Option<&str> {
        self.totp_code.as_deref()
    }
    fn oob_code(&self) -> Option<&str> {
        self.oob_code.as_deref()
    }
    fn resend(&self) -> bool {
        self.resend
    }
    fn oob_authenticator_type(&self) -> Option<AuthenticatorType> {
        self.oob_authenticator_type
    }
    fn oob_authenticator_index(&self) -> Option<usize> {
        self.oob_authenticator_index
    }
    fn recovery_code(&self) -> Option<&str> {
        self.recovery_code.as_deref()
    }
    fn device_token(&self) -> Option<&str> {
        self.device_token.as_deref()
    }
    fn create_device_token(&self) -> bool {
        self.create_device_token
    }
    fn new_password(&self) -> Option<&str> {
        self.new_password.as_deref()
    }
    fn old_password(&self) -> Option<&str> {
        self.old_password.as_deref()
    }
    fn setup_totp(&self) -> bool {
        self.setup_totp
    }
    fn totp_display_name(&self) -> Option<&str> {
        self.totp_display_name.as_deref()
    }
    fn oob_target(&self) -> Option<&str> {
        self.oob_target.as_deref()
    }
    fn skip_mfa_setup(&self) -> bool {
        self.skip_mfa_setup
    }
    fn requested_by_user(&self) -> bool {
        self.requested_by_user
    }
    fn viewed_recovery_codes(&self) -> bool {
        self.viewed_recovery_codes
    }
    fn verification_code(&self) -> Option<&str> {
        self.verification_code.as_deref()
    }
    fn forgot_password_login_id(&self) -> Option<&str> {
        self.forgot_password_login_id.as_deref()
    }
    fn reset_code(&self) -> Option<&str> {
        self.reset_code.as_deref()
    }
    fn remove_identity_id(&self) -> Option<&str> {
        self.remove_identity_id.as_deref()
    }
    fn remove_authenticator_id(&self) -> Option<&str> {
        self.remove_authenticator_id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authflow_core::authn::LoginIdKeyType;

    #[test]
    fn test_form_from_json() {
        let form: FormInput = serde_json::from_str(
            r#"{
                "identity_spec": {"type": "login_id", "key_type": "email", "login_id": "a@example.com"},
                "password": "secret",
                "oob_authenticator_type": "oob_otp_sms"
            }"#,
        )
        .unwrap();

        let input: &dyn AuthInput = &form;
        assert!(input.is_interactive());
        assert_eq!(input.password(), Some("secret"));
        assert_eq!(input.oob_authenticator_type(), Some(AuthenticatorType::OobSms));
        assert!(matches!(
            input.identity_spec(),
            Some(IdentitySpec::LoginId {
                key_type: LoginIdKeyType::Email,
                ..
            })
        ));
        assert!(input.totp_code().is_none());
        assert!(!input.resend());
    }

    #[test]
    fn test_non_interactive_flag() {
        let form = FormInput {
            interactive: Some(false),
            ..Default::default()
        };
        assert!(!form.is_interactive());
    }
}
