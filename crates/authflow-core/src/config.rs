use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::authn::AuthenticatorType;
use crate::error::{AuthflowError, Result};
use crate::types::CookieDef;

/// Top-level authflow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub interaction: InteractionConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub authentication: AuthenticationConfig,
    #[serde(default)]
    pub authenticator: AuthenticatorConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionConfig {
    /// Lifetime of a persisted graph and each of its instances.
    #[serde(default = "default_graph_lifetime_secs")]
    pub graph_lifetime_secs: u64,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            graph_lifetime_secs: default_graph_lifetime_secs(),
        }
    }
}

impl InteractionConfig {
    pub fn graph_lifetime(&self) -> Duration {
        Duration::from_secs(self.graph_lifetime_secs)
    }
}

fn default_graph_lifetime_secs() -> u64 { 1200 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite file backing the graph store. `~/` is expanded.
    #[serde(default = "default_store_path")]
    pub path: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_store_path() -> String { "~/.authflow/authflow.db".to_string() }
fn default_key_prefix() -> String { "authflow".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_true")]
    pub login_id_enabled: bool,
    /// Aliases of the configured OAuth providers.
    #[serde(default)]
    pub oauth_providers: Vec<String>,
    #[serde(default)]
    pub anonymous_enabled: bool,
    #[serde(default)]
    pub biometric_enabled: bool,
    #[serde(default)]
    pub on_conflict: IdentityConflictConfig,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            login_id_enabled: true,
            oauth_providers: vec![],
            anonymous_enabled: false,
            biometric_enabled: false,
            on_conflict: IdentityConflictConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConflictConfig {
    #[serde(default)]
    pub promotion: PromotionConflictBehavior,
}

/// What happens when an anonymous user promotes to an identity that already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionConflictBehavior {
    #[default]
    Error,
    Login,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationConfig {
    /// Primary authenticator types in order of preference.
    #[serde(default = "default_primary_authenticators")]
    pub primary_authenticators: Vec<AuthenticatorType>,
    /// Secondary authenticator types in order of preference.
    #[serde(default = "default_secondary_authenticators")]
    pub secondary_authenticators: Vec<AuthenticatorType>,
    #[serde(default)]
    pub secondary_authentication_mode: SecondaryAuthenticationMode,
    #[serde(default)]
    pub recovery_code: RecoveryCodeConfig,
    #[serde(default)]
    pub device_token: DeviceTokenConfig,
}

impl Default for AuthenticationConfig {
    fn default() -> Self {
        Self {
            primary_authenticators: default_primary_authenticators(),
            secondary_authenticators: default_secondary_authenticators(),
            secondary_authentication_mode: SecondaryAuthenticationMode::default(),
            recovery_code: RecoveryCodeConfig::default(),
            device_token: DeviceTokenConfig::default(),
        }
    }
}

fn default_primary_authenticators() -> Vec<AuthenticatorType> {
    vec![AuthenticatorType::Password]
}

fn default_secondary_authenticators() -> Vec<AuthenticatorType> {
    vec![AuthenticatorType::Totp, AuthenticatorType::OobSms]
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondaryAuthenticationMode {
    #[default]
    IfExists,
    Required,
    Disabled,
}

impl SecondaryAuthenticationMode {
    pub fn is_disabled(&self) -> bool {
        *self == Self::Disabled
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoveryCodeConfig {
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceTokenConfig {
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthenticatorConfig {
    #[serde(default)]
    pub totp: TotpConfig,
    #[serde(default)]
    pub oob_otp: OobOtpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TotpConfig {
    #[serde(default = "default_authenticator_maximum")]
    pub maximum: usize,
}

impl Default for TotpConfig {
    fn default() -> Self {
        Self {
            maximum: default_authenticator_maximum(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OobOtpConfig {
    #[serde(default)]
    pub email: OobChannelConfig,
    #[serde(default)]
    pub sms: OobChannelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OobChannelConfig {
    #[serde(default = "default_authenticator_maximum")]
    pub maximum: usize,
}

impl Default for OobChannelConfig {
    fn default() -> Self {
        Self {
            maximum: default_authenticator_maximum(),
        }
    }
}

fn default_authenticator_maximum() -> usize { 99 }

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationConfig {
    #[serde(default)]
    pub email: ClaimVerificationConfig,
    #[serde(default)]
    pub phone_number: ClaimVerificationConfig,
}

impl VerificationConfig {
    pub fn claim(&self, name: &str) -> Option<&ClaimVerificationConfig> {
        match name {
            "email" => Some(&self.email),
            "phone_number" => Some(&self.phone_number),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimVerificationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Require verification when the identity is created.
    #[serde(default = "default_true")]
    pub required: bool,
}

impl Default for ClaimVerificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            required: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_cookie_name")]
    pub cookie_name: String,
    /// Absent means a browser-session cookie.
    #[serde(default)]
    pub cookie_max_age_secs: Option<i64>,
    #[serde(default = "default_device_token_cookie_name")]
    pub device_token_cookie_name: String,
    #[serde(default = "default_device_token_max_age_secs")]
    pub device_token_max_age_secs: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_session_cookie_name(),
            cookie_max_age_secs: None,
            device_token_cookie_name: default_device_token_cookie_name(),
            device_token_max_age_secs: default_device_token_max_age_secs(),
        }
    }
}

impl SessionConfig {
    pub fn session_cookie(&self) -> CookieDef {
        CookieDef {
            name: self.cookie_name.clone(),
            max_age_secs: self.cookie_max_age_secs,
        }
    }

    pub fn device_token_cookie(&self) -> CookieDef {
        CookieDef {
            name: self.device_token_cookie_name.clone(),
            max_age_secs: Some(self.device_token_max_age_secs),
        }
    }
}

fn default_session_cookie_name() -> String { "session".to_string() }
fn default_device_token_cookie_name() -> String { "mfa_device_token".to_string() }
fn default_device_token_max_age_secs() -> i64 { 30 * 24 * 60 * 60 }

fn default_true() -> bool { true }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| AuthflowError::ConfigNotFound(path.display().to_string()))?;

        let expanded = expand_env_vars(&content);

        let config: AppConfig =
            toml::from_str(&expanded).map_err(|e| AuthflowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the flows cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.interaction.graph_lifetime_secs == 0 {
            return Err(AuthflowError::Config(
                "interaction.graph_lifetime_secs must be positive".to_string(),
            ));
        }
        if self
            .authentication
            .primary_authenticators
            .contains(&AuthenticatorType::Totp)
        {
            return Err(AuthflowError::Config(
                "totp cannot be a primary authenticator".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the store path (expand ~).
    pub fn store_path(&self) -> PathBuf {
        let path = &self.store.path;
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(path)
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Unset variables stay literal
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_AUTHFLOW_VAR", "/var/lib/authflow.db");
        let result = expand_env_vars("path = \"${TEST_AUTHFLOW_VAR}\"");
        assert_eq!(result, "path = \"/var/lib/authflow.db\"");
        std::env::remove_var("TEST_AUTHFLOW_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_AUTHFLOW_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_AUTHFLOW_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.interaction.graph_lifetime_secs, 1200);
        assert_eq!(
            config.authentication.primary_authenticators,
            vec![AuthenticatorType::Password]
        );
        assert_eq!(
            config.authentication.secondary_authentication_mode,
            SecondaryAuthenticationMode::IfExists
        );
        assert!(config.identity.login_id_enabled);
        assert!(!config.authentication.recovery_code.disabled);
        assert_eq!(config.authenticator.totp.maximum, 99);
        assert!(config.verification.email.required);
        assert_eq!(config.session.cookie_name, "session");
    }

    #[test]
    fn test_authenticator_types_parse() {
        let toml_str = r#"
[authentication]
primary_authenticators = ["oob_otp_email", "password"]
secondary_authenticators = ["oob_otp_sms", "totp"]
secondary_authentication_mode = "required"

[identity.on_conflict]
promotion = "login"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.authentication.primary_authenticators,
            vec![AuthenticatorType::OobEmail, AuthenticatorType::Password]
        );
        assert_eq!(
            config.authentication.secondary_authentication_mode,
            SecondaryAuthenticationMode::Required
        );
        assert_eq!(
            config.identity.on_conflict.promotion,
            PromotionConflictBehavior::Login
        );
    }

    #[test]
    fn test_validate_rejects_totp_primary() {
        let toml_str = r#"
[authentication]
primary_authenticators = ["totp"]
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err());
    }
}
