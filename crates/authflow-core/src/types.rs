use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::authn::OobChannel;

/// Generate a fresh opaque identifier.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_login_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_disabled: bool,
}

/// Why a session is being created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateReason {
    Login,
    Signup,
    Promote,
    Reauthenticate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionAttrs {
    pub user_id: String,
    pub amr: Vec<String>,
    pub reason: CreateReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub amr: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub authenticated_at: Option<DateTime<Utc>>,
}

/// Name and lifetime of a cookie the caller should set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieDef {
    pub name: String,
    #[serde(default)]
    pub max_age_secs: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub max_age_secs: Option<i64>,
    pub http_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryCode {
    pub id: String,
    pub user_id: String,
    pub code: String,
    #[serde(default)]
    pub consumed: bool,
}

/// Purpose of a one-time code; codes of different kinds never verify each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpKind {
    Authentication,
    Setup,
    Verification,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOptions {
    pub channel: OobChannel,
    pub target: String,
    pub kind: OtpKind,
    pub code: String,
}

/// A rate-limit bucket; one token is reserved per guarded action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketSpec {
    pub name: String,
    pub key: String,
}

impl BucketSpec {
    pub fn otp_trigger(channel: OobChannel, target: &str) -> Self {
        let name = match channel {
            OobChannel::Email => "otp_trigger_email",
            OobChannel::Sms => "otp_trigger_sms",
        };
        Self {
            name: name.to_string(),
            key: target.to_string(),
        }
    }
}

/// Profile returned by an OAuth provider after the authorization code exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthProfile {
    pub subject: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Verification state of one claim carried by an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimStatus {
    pub name: String,
    pub value: String,
    pub verified: bool,
}
