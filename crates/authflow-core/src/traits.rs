use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::authn::{
    AuthenticatorInfo, AuthenticatorSpec, Credential, IdentityInfo, IdentitySpec, VerifiableClaim,
};
use crate::error::Result;
use crate::event::EventPayload;
use crate::types::*;

/// Identity storage and lookup.
pub trait IdentityService: Send + Sync + 'static {
    fn get(&self, id: &str) -> BoxFuture<'_, Result<IdentityInfo>>;

    fn list_by_user(&self, user_id: &str) -> BoxFuture<'_, Result<Vec<IdentityInfo>>>;

    /// Exact match for what the end user presented, if such an identity exists.
    fn get_by_spec(&self, spec: &IdentitySpec) -> BoxFuture<'_, Result<Option<IdentityInfo>>>;

    /// Build (but do not persist) a new identity for `user_id`.
    fn new_identity(&self, user_id: &str, spec: &IdentitySpec) -> BoxFuture<'_, Result<IdentityInfo>>;

    /// Another identity with the same login ID or provider subject, if any.
    fn check_duplicated(&self, info: &IdentityInfo) -> BoxFuture<'_, Result<Option<IdentityInfo>>>;

    fn create(&self, info: &IdentityInfo) -> BoxFuture<'_, Result<()>>;

    fn delete(&self, info: &IdentityInfo) -> BoxFuture<'_, Result<()>>;
}

/// Authenticator storage, construction and secret verification.
pub trait AuthenticatorService: Send + Sync + 'static {
    fn get(&self, id: &str) -> BoxFuture<'_, Result<AuthenticatorInfo>>;

    fn list(&self, user_id: &str) -> BoxFuture<'_, Result<Vec<AuthenticatorInfo>>>;

    /// Build (but do not persist) an authenticator with the given id.
    /// Passwords are hashed and TOTP secrets generated here.
    fn new_authenticator(
        &self,
        id: &str,
        spec: &AuthenticatorSpec,
    ) -> BoxFuture<'_, Result<AuthenticatorInfo>>;

    /// Copy of `info` carrying a hash of `new_password`.
    fn with_password(
        &self,
        info: &AuthenticatorInfo,
        new_password: &str,
    ) -> BoxFuture<'_, Result<AuthenticatorInfo>>;

    /// Check a password or TOTP code against a stored authenticator.
    fn verify(&self, info: &AuthenticatorInfo, credential: &Credential) -> BoxFuture<'_, Result<bool>>;

    fn create(&self, info: &AuthenticatorInfo) -> BoxFuture<'_, Result<()>>;

    fn update(&self, info: &AuthenticatorInfo) -> BoxFuture<'_, Result<()>>;

    fn delete(&self, info: &AuthenticatorInfo) -> BoxFuture<'_, Result<()>>;
}

/// One-time code generation and checking, keyed by target and purpose.
pub trait OtpCodeService: Send + Sync + 'static {
    fn generate(&self, target: &str, kind: OtpKind) -> BoxFuture<'_, Result<String>>;

    /// Fails with `InvalidCode` on mismatch. A verified code is consumed.
    fn verify(&self, target: &str, kind: OtpKind, code: &str) -> BoxFuture<'_, Result<()>>;
}

/// Delivery of one-time codes over e-mail or SMS.
pub trait OtpSender: Send + Sync + 'static {
    fn send(&self, opts: &SendOptions) -> BoxFuture<'_, Result<()>>;
}

/// MFA device tokens and recovery codes.
pub trait MfaService: Send + Sync + 'static {
    fn generate_device_token(&self) -> String;

    fn create_device_token(&self, user_id: &str, token: &str) -> BoxFuture<'_, Result<()>>;

    /// Fails with `InvalidCredentials` when the token is unknown or expired.
    fn verify_device_token(&self, user_id: &str, token: &str) -> BoxFuture<'_, Result<()>>;

    fn invalidate_all_device_tokens(&self, user_id: &str) -> BoxFuture<'_, Result<()>>;

    fn generate_recovery_codes(&self) -> Vec<String>;

    fn replace_recovery_codes(
        &self,
        user_id: &str,
        codes: &[String],
    ) -> BoxFuture<'_, Result<Vec<RecoveryCode>>>;

    /// Fails with `InvalidCredentials` when no unconsumed code matches.
    fn verify_recovery_code(&self, user_id: &str, code: &str) -> BoxFuture<'_, Result<RecoveryCode>>;

    fn consume_recovery_code(&self, code: &RecoveryCode) -> BoxFuture<'_, Result<()>>;
}

pub trait UserService: Send + Sync + 'static {
    fn get(&self, id: &str) -> BoxFuture<'_, Result<User>>;

    fn create(&self, user_id: &str) -> BoxFuture<'_, Result<User>>;

    fn update_login_time(&self, user_id: &str, at: DateTime<Utc>) -> BoxFuture<'_, Result<()>>;
}

pub trait VerificationService: Send + Sync + 'static {
    fn claim_status(&self, identity: &IdentityInfo) -> BoxFuture<'_, Result<Vec<ClaimStatus>>>;

    fn mark_claim_verified(
        &self,
        user_id: &str,
        claim: &VerifiableClaim,
    ) -> BoxFuture<'_, Result<()>>;
}

/// IdP session issuance.
pub trait SessionProvider: Send + Sync + 'static {
    /// Build a session and its opaque token without persisting it.
    fn make_session(&self, attrs: &SessionAttrs) -> (Session, String);

    fn create(&self, session: &Session) -> BoxFuture<'_, Result<()>>;

    fn reauthenticate(&self, session_id: &str, amr: &[String]) -> BoxFuture<'_, Result<()>>;
}

/// Outbound domain events.
pub trait EventService: Send + Sync + 'static {
    fn dispatch(&self, payload: EventPayload) -> BoxFuture<'_, Result<()>>;
}

pub trait RateLimiter: Send + Sync + 'static {
    /// Reserve one token from the bucket. Fails with `RateLimited` when exhausted.
    fn take(&self, bucket: &BucketSpec) -> BoxFuture<'_, Result<()>>;
}

pub trait CookieManager: Send + Sync + 'static {
    fn value_cookie(&self, def: &CookieDef, value: &str) -> Cookie;
}

pub trait ForgotPasswordService: Send + Sync + 'static {
    /// Send a reset code to the owner of `login_id`.
    fn send_code(&self, login_id: &str) -> BoxFuture<'_, Result<()>>;
}

pub trait ResetPasswordService: Send + Sync + 'static {
    /// Resolve the user a reset code was issued to. Fails with `InvalidCode`.
    fn verify_code(&self, code: &str) -> BoxFuture<'_, Result<String>>;

    fn reset_password(&self, code: &str, new_password: &str) -> BoxFuture<'_, Result<()>>;
}

/// OAuth relying-party operations. The HTTP exchange lives behind this trait.
pub trait OAuthProviderFactory: Send + Sync + 'static {
    fn authorization_url(&self, alias: &str, state: &str) -> BoxFuture<'_, Result<String>>;

    fn user_profile(&self, alias: &str, code: &str) -> BoxFuture<'_, Result<OAuthProfile>>;
}

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Transactional boundary used by the interaction service.
pub trait Database: Send + Sync + 'static {
    fn begin_savepoint(&self, name: &str) -> BoxFuture<'_, Result<()>>;

    fn release_savepoint(&self, name: &str) -> BoxFuture<'_, Result<()>>;

    fn rollback_to_savepoint(&self, name: &str) -> BoxFuture<'_, Result<()>>;
}

/// Ephemeral key-value storage with conditional writes and expiry.
pub trait KvStore: Send + Sync + 'static {
    /// Set only if the key is absent (or expired). Returns whether it was written.
    fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> BoxFuture<'_, Result<bool>>;

    /// Set only if the key is present and live. Returns whether it was written.
    fn set_xx(&self, key: &str, value: &str, ttl: Duration) -> BoxFuture<'_, Result<bool>>;

    /// Set every pair only if all keys are absent, atomically.
    fn set_nx_multi(&self, pairs: &[(String, String)], ttl: Duration) -> BoxFuture<'_, Result<bool>>;

    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<String>>>;

    /// Returns whether a live key was removed.
    fn del(&self, key: &str) -> BoxFuture<'_, Result<bool>>;
}

/// Every collaborator the interaction graph reaches.
#[derive(Clone)]
pub struct Services {
    pub identities: Arc<dyn IdentityService>,
    pub authenticators: Arc<dyn AuthenticatorService>,
    pub otp_codes: Arc<dyn OtpCodeService>,
    pub otp_sender: Arc<dyn OtpSender>,
    pub mfa: Arc<dyn MfaService>,
    pub users: Arc<dyn UserService>,
    pub verification: Arc<dyn VerificationService>,
    pub sessions: Arc<dyn SessionProvider>,
    pub events: Arc<dyn EventService>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub cookies: Arc<dyn CookieManager>,
    pub forgot_password: Arc<dyn ForgotPasswordService>,
    pub reset_password: Arc<dyn ResetPasswordService>,
    pub oauth: Arc<dyn OAuthProviderFactory>,
    pub clock: Arc<dyn Clock>,
}
