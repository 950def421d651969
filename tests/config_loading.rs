use authflow_core::authn::AuthenticatorType;
use authflow_core::config::{AppConfig, PromotionConflictBehavior, SecondaryAuthenticationMode};
use authflow_core::error::AuthflowError;
use authflow_test_utils::write_config;

#[test]
fn test_load_full_config_from_file() {
    let tmp = write_config(
        r#"
[interaction]
graph_lifetime_secs = 600

[store]
path = "/tmp/authflow-test.db"
key_prefix = "tenant-a"

[identity]
login_id_enabled = true
oauth_providers = ["google", "github"]
anonymous_enabled = true
biometric_enabled = true

[identity.on_conflict]
promotion = "login"

[authentication]
primary_authenticators = ["password", "oob_otp_email"]
secondary_authenticators = ["oob_otp_sms", "totp"]
secondary_authentication_mode = "required"

[authentication.device_token]
disabled = true

[authenticator.totp]
maximum = 2

[verification.phone_number]
required = false

[session]
cookie_name = "idp_session"
cookie_max_age_secs = 3600
"#,
    );

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.interaction.graph_lifetime_secs, 600);
    assert_eq!(config.store_path().to_str(), Some("/tmp/authflow-test.db"));
    assert_eq!(config.store.key_prefix, "tenant-a");
    assert_eq!(config.identity.oauth_providers, vec!["google", "github"]);
    assert!(config.identity.anonymous_enabled);
    assert!(config.identity.biometric_enabled);
    assert_eq!(config.identity.on_conflict.promotion, PromotionConflictBehavior::Login);
    assert_eq!(
        config.authentication.primary_authenticators,
        vec![AuthenticatorType::Password, AuthenticatorType::OobEmail]
    );
    assert_eq!(
        config.authentication.secondary_authenticators,
        vec![AuthenticatorType::OobSms, AuthenticatorType::Totp]
    );
    assert_eq!(
        config.authentication.secondary_authentication_mode,
        SecondaryAuthenticationMode::Required
    );
    assert!(config.authentication.device_token.disabled);
    assert!(!config.authentication.recovery_code.disabled);
    assert_eq!(config.authenticator.totp.maximum, 2);
    assert!(config.verification.email.required);
    assert!(!config.verification.phone_number.required);
    assert_eq!(config.session.session_cookie().name, "idp_session");
    assert_eq!(config.session.session_cookie().max_age_secs, Some(3600));
    assert_eq!(config.session.device_token_cookie().name, "mfa_device_token");
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("AUTHFLOW_TEST_STORE_PATH", "/var/lib/authflow/graphs.db");

    let tmp = write_config(
        r#"
[store]
path = "${AUTHFLOW_TEST_STORE_PATH}"
"#,
    );

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.store.path, "/var/lib/authflow/graphs.db");

    std::env::remove_var("AUTHFLOW_TEST_STORE_PATH");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let tmp = write_config("");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.interaction.graph_lifetime_secs, 1200);
    assert_eq!(config.store.key_prefix, "authflow");
    assert!(config.identity.login_id_enabled);
    assert!(config.identity.oauth_providers.is_empty());
    assert_eq!(config.identity.on_conflict.promotion, PromotionConflictBehavior::Error);
    assert_eq!(
        config.authentication.secondary_authenticators,
        vec![AuthenticatorType::Totp, AuthenticatorType::OobSms]
    );
    assert_eq!(config.session.cookie_name, "session");
    assert_eq!(config.session.cookie_max_age_secs, None);
}

#[test]
fn test_totp_as_primary_is_rejected() {
    let tmp = write_config(
        r#"
[authentication]
primary_authenticators = ["totp"]
"#,
    );

    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, AuthflowError::Config(_)));
}

#[test]
fn test_zero_graph_lifetime_is_rejected() {
    let tmp = write_config(
        r#"
[interaction]
graph_lifetime_secs = 0
"#,
    );

    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, AuthflowError::Config(_)));
}

#[test]
fn test_unknown_authenticator_type_is_a_config_error() {
    let tmp = write_config(
        r#"
[authentication]
secondary_authenticators = ["carrier_pigeon"]
"#,
    );

    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, AuthflowError::Config(_)));
}

#[test]
fn test_missing_file() {
    let err = AppConfig::load(std::path::Path::new("/nonexistent/authflow.toml")).unwrap_err();
    assert!(matches!(err, AuthflowError::ConfigNotFound(_)));
}
