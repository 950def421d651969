use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identity::{normalize_login_id, IdentityInfo, LoginIdKeyType};
use super::{amr, AuthenticatorKind, AuthenticatorType, OobChannel};

/// A persisted authenticator belonging to a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticatorInfo {
    pub id: String,
    pub user_id: String,
    pub kind: AuthenticatorKind,
    #[serde(default)]
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub secret: AuthenticatorSecret,
}

/// Type-specific material. Password hashes and TOTP secrets never leave the
/// authenticator service except inside this value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AuthenticatorSecret {
    #[serde(rename = "password")]
    Password { password_hash: String },
    #[serde(rename = "totp")]
    Totp { secret: String, display_name: String },
    #[serde(rename = "oob_otp_email")]
    OobEmail { email: String },
    #[serde(rename = "oob_otp_sms")]
    OobSms { phone: String },
}

/// Request to build a new authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatorSpec {
    pub user_id: String,
    pub kind: AuthenticatorKind,
    pub is_default: bool,
    pub payload: SpecPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpecPayload {
    Password { plain_password: String },
    Totp { display_name: String },
    OobEmail { email: String },
    OobSms { phone: String },
}

/// What the end user presented to prove possession of an authenticator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Password(String),
    Totp(String),
}

impl AuthenticatorInfo {
    pub fn authenticator_type(&self) -> AuthenticatorType {
        match &self.secret {
            AuthenticatorSecret::Password { .. } => AuthenticatorType::Password,
            AuthenticatorSecret::Totp { .. } => AuthenticatorType::Totp,
            AuthenticatorSecret::OobEmail { .. } => AuthenticatorType::OobEmail,
            AuthenticatorSecret::OobSms { .. } => AuthenticatorType::OobSms,
        }
    }

    pub fn amr(&self) -> Vec<&'static str> {
        match &self.secret {
            AuthenticatorSecret::Password { .. } => vec![amr::PWD],
            AuthenticatorSecret::Totp { .. } => vec![amr::OTP],
            AuthenticatorSecret::OobEmail { .. } => vec![amr::OTP],
            AuthenticatorSecret::OobSms { .. } => vec![amr::OTP, amr::SMS],
        }
    }

    /// Delivery channel and target for out-of-band authenticators.
    pub fn oob_target(&self) -> Option<(OobChannel, &str)> {
        match &self.secret {
            AuthenticatorSecret::OobEmail { email } => Some((OobChannel::Email, email)),
            AuthenticatorSecret::OobSms { phone } => Some((OobChannel::Sms, phone)),
            _ => None,
        }
    }

    /// Only primary authenticators can be followed by a second factor.
    pub fn can_have_mfa(&self) -> bool {
        self.kind == AuthenticatorKind::Primary
    }

    /// Duplicate detection between authenticators of the same type.
    ///
    /// Passwords compare by tag only, TOTP by tag and secret, OOB by tag,
    /// channel and target.
    pub fn equal(&self, other: &AuthenticatorInfo) -> bool {
        if self.kind != other.kind {
            return false;
        }
        match (&self.secret, &other.secret) {
            (AuthenticatorSecret::Password { .. }, AuthenticatorSecret::Password { .. }) => true,
            (
                AuthenticatorSecret::Totp { secret: a, .. },
                AuthenticatorSecret::Totp { secret: b, .. },
            ) => constant_time_eq(a.as_bytes(), b.as_bytes()),
            (AuthenticatorSecret::OobEmail { email: a }, AuthenticatorSecret::OobEmail { email: b }) => {
                normalize_login_id(LoginIdKeyType::Email, a)
                    == normalize_login_id(LoginIdKeyType::Email, b)
            }
            (AuthenticatorSecret::OobSms { phone: a }, AuthenticatorSecret::OobSms { phone: b }) => {
                normalize_login_id(LoginIdKeyType::Phone, a)
                    == normalize_login_id(LoginIdKeyType::Phone, b)
            }
            _ => false,
        }
    }

    /// Whether this authenticator can act as the primary factor of `identity`.
    ///
    /// OOB authenticators additionally have to target the identity's own
    /// login ID.
    pub fn is_primary_of_identity(&self, identity: &IdentityInfo) -> bool {
        if self.kind != AuthenticatorKind::Primary {
            return false;
        }
        let typ = self.authenticator_type();
        if !identity.primary_authenticator_types().contains(&typ) {
            return false;
        }
        match (self.oob_target(), identity.login_id()) {
            (Some((_, target)), Some((key_type, login_id))) => {
                normalize_login_id(key_type, target) == normalize_login_id(key_type, login_id)
            }
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

impl SpecPayload {
    pub fn authenticator_type(&self) -> AuthenticatorType {
        match self {
            Self::Password { .. } => AuthenticatorType::Password,
            Self::Totp { .. } => AuthenticatorType::Totp,
            Self::OobEmail { .. } => AuthenticatorType::OobEmail,
            Self::OobSms { .. } => AuthenticatorType::OobSms,
        }
    }
}

/// Compare two byte strings without short-circuiting on the first mismatch.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let diff = a
        .iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y));
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authn::IdentityKind;

    fn authenticator(kind: AuthenticatorKind, secret: AuthenticatorSecret) -> AuthenticatorInfo {
        AuthenticatorInfo {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: "u1".into(),
            kind,
            is_default: false,
            created_at: Utc::now(),
            secret,
        }
    }

    fn password(kind: AuthenticatorKind, hash: &str) -> AuthenticatorInfo {
        authenticator(
            kind,
            AuthenticatorSecret::Password {
                password_hash: hash.into(),
            },
        )
    }

    fn totp(secret: &str) -> AuthenticatorInfo {
        authenticator(
            AuthenticatorKind::Secondary,
            AuthenticatorSecret::Totp {
                secret: secret.into(),
                display_name: "phone".into(),
            },
        )
    }

    #[test]
    fn test_password_equal_by_tag_only() {
        let a = password(AuthenticatorKind::Primary, "h1");
        let b = password(AuthenticatorKind::Primary, "h2");
        let c = password(AuthenticatorKind::Secondary, "h1");
        assert!(a.equal(&b));
        assert!(!a.equal(&c));
    }

    #[test]
    fn test_totp_equal_by_secret() {
        assert!(totp("JBSWY3DPEHPK3PXP").equal(&totp("JBSWY3DPEHPK3PXP")));
        assert!(!totp("JBSWY3DPEHPK3PXP").equal(&totp("JBSWY3DPEHPK3PXQ")));
        assert!(!totp("SHORT").equal(&totp("SHORTER")));
    }

    #[test]
    fn test_oob_equal_by_channel_and_target() {
        let email = |e: &str| {
            authenticator(
                AuthenticatorKind::Secondary,
                AuthenticatorSecret::OobEmail { email: e.into() },
            )
        };
        let sms = authenticator(
            AuthenticatorKind::Secondary,
            AuthenticatorSecret::OobSms {
                phone: "a@example.com".into(),
            },
        );
        assert!(email("a@example.com").equal(&email("A@example.com")));
        assert!(!email("a@example.com").equal(&email("b@example.com")));
        assert!(!email("a@example.com").equal(&sms));
    }

    #[test]
    fn test_different_types_never_equal() {
        let a = password(AuthenticatorKind::Secondary, "h");
        assert!(!a.equal(&totp("s")));
    }

    #[test]
    fn test_amr() {
        let sms = authenticator(
            AuthenticatorKind::Primary,
            AuthenticatorSecret::OobSms {
                phone: "+85291234567".into(),
            },
        );
        assert_eq!(sms.amr(), vec!["otp", "sms"]);
        assert_eq!(password(AuthenticatorKind::Primary, "h").amr(), vec!["pwd"]);
    }

    #[test]
    fn test_is_primary_of_identity() {
        let identity = IdentityInfo {
            id: "i1".into(),
            user_id: "u1".into(),
            created_at: Utc::now(),
            kind: IdentityKind::LoginId {
                key_type: LoginIdKeyType::Email,
                login_id: "a@example.com".into(),
            },
        };
        let own = authenticator(
            AuthenticatorKind::Primary,
            AuthenticatorSecret::OobEmail {
                email: "a@example.com".into(),
            },
        );
        let other = authenticator(
            AuthenticatorKind::Primary,
            AuthenticatorSecret::OobEmail {
                email: "b@example.com".into(),
            },
        );
        assert!(own.is_primary_of_identity(&identity));
        assert!(!other.is_primary_of_identity(&identity));
        assert!(password(AuthenticatorKind::Primary, "h").is_primary_of_identity(&identity));
        assert!(!password(AuthenticatorKind::Secondary, "h").is_primary_of_identity(&identity));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
