use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{amr, AuthenticatorType, IdentityType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginIdKeyType {
    Email,
    Phone,
    Username,
}

/// A persisted identity belonging to a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityInfo {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: IdentityKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IdentityKind {
    LoginId {
        key_type: LoginIdKeyType,
        login_id: String,
    },
    #[serde(rename = "oauth")]
    OAuth {
        provider_alias: String,
        subject: String,
        #[serde(default)]
        email: Option<String>,
    },
    Anonymous {
        key_id: String,
    },
    Biometric {
        key_id: String,
    },
}

/// What the end user presented when selecting or creating an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IdentitySpec {
    LoginId {
        key_type: LoginIdKeyType,
        login_id: String,
    },
    #[serde(rename = "oauth")]
    OAuth {
        provider_alias: String,
        subject: String,
        #[serde(default)]
        email: Option<String>,
    },
    Anonymous {
        key_id: String,
    },
    Biometric {
        key_id: String,
    },
}

/// A claim that can be proven by sending a code to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiableClaim {
    pub name: String,
    pub value: String,
}

impl IdentitySpec {
    pub fn identity_type(&self) -> IdentityType {
        match self {
            Self::LoginId { .. } => IdentityType::LoginId,
            Self::OAuth { .. } => IdentityType::OAuth,
            Self::Anonymous { .. } => IdentityType::Anonymous,
            Self::Biometric { .. } => IdentityType::Biometric,
        }
    }

    /// The identity payload this spec would produce for a new identity.
    pub fn to_kind(&self) -> IdentityKind {
        match self.clone() {
            Self::LoginId { key_type, login_id } => IdentityKind::LoginId {
                key_type,
                login_id: normalize_login_id(key_type, &login_id),
            },
            Self::OAuth {
                provider_alias,
                subject,
                email,
            } => IdentityKind::OAuth {
                provider_alias,
                subject,
                email,
            },
            Self::Anonymous { key_id } => IdentityKind::Anonymous { key_id },
            Self::Biometric { key_id } => IdentityKind::Biometric { key_id },
        }
    }
}

impl IdentityInfo {
    pub fn identity_type(&self) -> IdentityType {
        match &self.kind {
            IdentityKind::LoginId { .. } => IdentityType::LoginId,
            IdentityKind::OAuth { .. } => IdentityType::OAuth,
            IdentityKind::Anonymous { .. } => IdentityType::Anonymous,
            IdentityKind::Biometric { .. } => IdentityType::Biometric,
        }
    }

    /// AMR values implied by using this identity alone.
    pub fn amr(&self) -> Vec<&'static str> {
        match &self.kind {
            IdentityKind::Biometric { .. } => vec![amr::X_BIOMETRIC],
            _ => vec![],
        }
    }

    /// Authenticator types that can act as the primary factor for this identity.
    pub fn primary_authenticator_types(&self) -> Vec<AuthenticatorType> {
        match &self.kind {
            IdentityKind::LoginId { key_type, .. } => match key_type {
                LoginIdKeyType::Email => {
                    vec![AuthenticatorType::Password, AuthenticatorType::OobEmail]
                }
                LoginIdKeyType::Phone => {
                    vec![AuthenticatorType::Password, AuthenticatorType::OobSms]
                }
                LoginIdKeyType::Username => vec![AuthenticatorType::Password],
            },
            IdentityKind::OAuth { .. }
            | IdentityKind::Anonymous { .. }
            | IdentityKind::Biometric { .. } => vec![],
        }
    }

    pub fn login_id(&self) -> Option<(LoginIdKeyType, &str)> {
        match &self.kind {
            IdentityKind::LoginId { key_type, login_id } => Some((*key_type, login_id.as_str())),
            _ => None,
        }
    }

    /// The claim a verification code would be sent to, if any.
    pub fn verifiable_claim(&self) -> Option<VerifiableClaim> {
        match &self.kind {
            IdentityKind::LoginId {
                key_type: LoginIdKeyType::Email,
                login_id,
            } => Some(VerifiableClaim {
                name: "email".to_string(),
                value: login_id.clone(),
            }),
            IdentityKind::LoginId {
                key_type: LoginIdKeyType::Phone,
                login_id,
            } => Some(VerifiableClaim {
                name: "phone_number".to_string(),
                value: login_id.clone(),
            }),
            _ => None,
        }
    }

    /// Whether this identity was produced from (or would be produced by) `spec`.
    pub fn matches_spec(&self, spec: &IdentitySpec) -> bool {
        match (&self.kind, spec.to_kind()) {
            (
                IdentityKind::OAuth {
                    provider_alias: a,
                    subject: s,
                    ..
                },
                IdentityKind::OAuth {
                    provider_alias: b,
                    subject: t,
                    ..
                },
            ) => *a == b && *s == t,
            (mine, theirs) => *mine == theirs,
        }
    }
}

/// Canonical form used for lookups; e-mail addresses and usernames are case-insensitive.
pub fn normalize_login_id(key_type: LoginIdKeyType, raw: &str) -> String {
    let trimmed = raw.trim();
    match key_type {
        LoginIdKeyType::Email | LoginIdKeyType::Username => trimmed.to_lowercase(),
        LoginIdKeyType::Phone => trimmed.chars().filter(|c| !c.is_whitespace()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn login_id(key_type: LoginIdKeyType, value: &str) -> IdentityInfo {
        IdentityInfo {
            id: "i1".into(),
            user_id: "u1".into(),
            created_at: Utc::now(),
            kind: IdentityKind::LoginId {
                key_type,
                login_id: value.into(),
            },
        }
    }

    #[test]
    fn test_primary_authenticator_types() {
        let email = login_id(LoginIdKeyType::Email, "a@example.com");
        assert_eq!(
            email.primary_authenticator_types(),
            vec![AuthenticatorType::Password, AuthenticatorType::OobEmail]
        );
        let username = login_id(LoginIdKeyType::Username, "alice");
        assert_eq!(
            username.primary_authenticator_types(),
            vec![AuthenticatorType::Password]
        );
    }

    #[test]
    fn test_verifiable_claim() {
        let phone = login_id(LoginIdKeyType::Phone, "+85291234567");
        let claim = phone.verifiable_claim().unwrap();
        assert_eq!(claim.name, "phone_number");
        assert!(login_id(LoginIdKeyType::Username, "bob")
            .verifiable_claim()
            .is_none());
    }

    #[test]
    fn test_matches_spec_normalizes() {
        let email = login_id(LoginIdKeyType::Email, "alice@example.com");
        let spec = IdentitySpec::LoginId {
            key_type: LoginIdKeyType::Email,
            login_id: "  Alice@Example.com ".into(),
        };
        assert!(email.matches_spec(&spec));
    }

    #[test]
    fn test_serde_shape() {
        let info = login_id(LoginIdKeyType::Email, "a@example.com");
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["type"], "login_id");
        assert_eq!(value["key_type"], "email");
        let back: IdentityInfo = serde_json::from_value(value).unwrap();
        assert_eq!(back, info);
    }
}
