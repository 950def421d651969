//! Identity and authenticator value objects consumed by the interaction graph.
//!
//! These are plain data: storage, hashing and secret generation live behind
//! the collaborator traits in [`crate::traits`].

pub mod authenticator;
pub mod identity;

use serde::{Deserialize, Serialize};

pub use authenticator::{
    constant_time_eq, AuthenticatorInfo, AuthenticatorSecret, AuthenticatorSpec, Credential,
    SpecPayload,
};
pub use identity::{IdentityInfo, IdentityKind, IdentitySpec, LoginIdKeyType, VerifiableClaim};

/// Authentication Method Reference values.
pub mod amr {
    pub const PWD: &str = "pwd";
    pub const OTP: &str = "otp";
    pub const SMS: &str = "sms";
    pub const MFA: &str = "mfa";
    pub const X_BIOMETRIC: &str = "x_biometric";
}

/// Authentication Context Reference emitted when a second factor was used.
pub const ACR_MFA: &str = "mfa";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationStage {
    Primary,
    Secondary,
}

impl std::fmt::Display for AuthenticationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

/// Primary/secondary tag carried by an authenticator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticatorKind {
    Primary,
    Secondary,
}

impl From<AuthenticationStage> for AuthenticatorKind {
    fn from(stage: AuthenticationStage) -> Self {
        match stage {
            AuthenticationStage::Primary => Self::Primary,
            AuthenticationStage::Secondary => Self::Secondary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthenticatorType {
    #[serde(rename = "password")]
    Password,
    #[serde(rename = "totp")]
    Totp,
    #[serde(rename = "oob_otp_email")]
    OobEmail,
    #[serde(rename = "oob_otp_sms")]
    OobSms,
}

impl AuthenticatorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::Totp => "totp",
            Self::OobEmail => "oob_otp_email",
            Self::OobSms => "oob_otp_sms",
        }
    }

    pub fn is_oob(&self) -> bool {
        matches!(self, Self::OobEmail | Self::OobSms)
    }
}

impl std::fmt::Display for AuthenticatorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityType {
    LoginId,
    #[serde(rename = "oauth")]
    OAuth,
    Anonymous,
    Biometric,
}

/// How the authentication stage was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationType {
    None,
    Password,
    Totp,
    OobOtp,
    RecoveryCode,
    DeviceToken,
}

impl AuthenticationType {
    /// Whether this method is only satisfied by a verified authenticator.
    pub fn requires_authenticator(&self) -> bool {
        matches!(self, Self::Password | Self::Totp | Self::OobOtp)
    }
}

/// Delivery channel of an out-of-band code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OobChannel {
    Email,
    Sms,
}

impl OobChannel {
    pub fn authenticator_type(&self) -> AuthenticatorType {
        match self {
            Self::Email => AuthenticatorType::OobEmail,
            Self::Sms => AuthenticatorType::OobSms,
        }
    }

    pub fn from_authenticator_type(typ: AuthenticatorType) -> Option<Self> {
        match typ {
            AuthenticatorType::OobEmail => Some(Self::Email),
            AuthenticatorType::OobSms => Some(Self::Sms),
            _ => None,
        }
    }
}
