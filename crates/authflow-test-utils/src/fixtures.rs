use std::io::Write;

use authflow_core::config::AppConfig;

/// Configuration used by flow tests: defaults, with claim verification off
/// so that signup does not stop for a code unless a test asks for it.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.verification.email.required = false;
    config.verification.phone_number.required = false;
    config
}

/// Parse a TOML snippet the way `AppConfig::load` would, minus env expansion.
pub fn config_from_toml(toml_str: &str) -> AppConfig {
    toml::from_str(toml_str).expect("test config must parse")
}

/// Write `contents` to a temporary `.toml` file that lives as long as the handle.
pub fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("create temp config");
    file.write_all(contents.as_bytes()).expect("write temp config");
    file
}
