use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;
use rand::distributions::Alphanumeric;
use rand::Rng;

use authflow_core::authn::identity::normalize_login_id;
use authflow_core::authn::{
    constant_time_eq, AuthenticatorInfo, AuthenticatorKind, AuthenticatorSecret,
    AuthenticatorSpec, Credential, IdentityInfo, IdentityKind, IdentitySpec, LoginIdKeyType,
    SpecPayload, VerifiableClaim,
};
use authflow_core::error::{AuthflowError, Result};
use authflow_core::event::EventPayload;
use authflow_core::traits::*;
use authflow_core::types::*;

use crate::clock::FakeClock;

/// Everything a savepoint rollback should undo.
#[derive(Debug, Clone, Default)]
pub struct WorldState {
    pub users: HashMap<String, User>,
    pub identities: Vec<IdentityInfo>,
    pub authenticators: Vec<AuthenticatorInfo>,
    pub recovery_codes: Vec<RecoveryCode>,
    pub device_tokens: Vec<(String, String)>,
    pub verified_claims: Vec<(String, VerifiableClaim)>,
    pub sessions: Vec<Session>,
    pub reauthentications: Vec<(String, Vec<String>)>,
}

/// Side channels that live outside the database and survive rollbacks.
#[derive(Default)]
struct Outbox {
    sent: Vec<SendOptions>,
    events: Vec<EventPayload>,
    otp_codes: HashMap<(String, OtpKind), String>,
    reset_codes: HashMap<String, String>,
    rate_counts: HashMap<BucketSpec, usize>,
    rate_limit: Option<usize>,
    oauth_profiles: HashMap<(String, String), OAuthProfile>,
    last_totp_secret: Option<String>,
    code_counter: u32,
}

/// TOTP code the fake accepts for `secret`.
pub fn totp_code(secret: &str) -> String {
    let sum: u32 = secret.bytes().map(u32::from).sum();
    format!("{:06}", (sum * 7919) % 1_000_000)
}

fn password_hash(plain: &str) -> String {
    format!("hashed:{}", plain)
}

fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn same_identity(a: &IdentityKind, b: &IdentityKind) -> bool {
    match (a, b) {
        (
            IdentityKind::LoginId {
                key_type: ka,
                login_id: la,
            },
            IdentityKind::LoginId {
                key_type: kb,
                login_id: lb,
            },
        ) => ka == kb && normalize_login_id(*ka, la) == normalize_login_id(*kb, lb),
        (
            IdentityKind::OAuth {
                provider_alias: pa,
                subject: sa,
                ..
            },
            IdentityKind::OAuth {
                provider_alias: pb,
                subject: sb,
                ..
            },
        ) => pa == pb && sa == sb,
        (IdentityKind::Anonymous { key_id: a }, IdentityKind::Anonymous { key_id: b })
        | (IdentityKind::Biometric { key_id: a }, IdentityKind::Biometric { key_id: b }) => a == b,
        _ => false,
    }
}

/// One in-memory world implementing every collaborator trait.
pub struct FakeWorld {
    state: Mutex<WorldState>,
    outbox: Mutex<Outbox>,
    clock: Arc<FakeClock>,
}

impl Default for FakeWorld {
    fn default() -> Self {
        Self::new(Arc::new(FakeClock::default()))
    }
}

impl FakeWorld {
    pub fn new(clock: Arc<FakeClock>) -> Self {
        Self {
            state: Mutex::new(WorldState::default()),
            outbox: Mutex::new(Outbox::default()),
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<FakeClock> {
        &self.clock
    }

    /// Bundle this world as every collaborator.
    pub fn services(self: &Arc<Self>) -> Services {
        Services {
            identities: self.clone(),
            authenticators: self.clone(),
            otp_codes: self.clone(),
            otp_sender: self.clone(),
            mfa: self.clone(),
            users: self.clone(),
            verification: self.clone(),
            sessions: self.clone(),
            events: self.clone(),
            rate_limiter: self.clone(),
            cookies: self.clone(),
            forgot_password: self.clone(),
            reset_password: self.clone(),
            oauth: self.clone(),
            clock: self.clock.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WorldState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn outbox(&self) -> MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    pub fn state(&self) -> WorldState {
        self.lock().clone()
    }

    pub fn restore(&self, state: WorldState) {
        *self.lock() = state;
    }

    // --- fixtures ---

    pub fn add_user(&self, user_id: &str) -> User {
        let user = User {
            id: user_id.to_string(),
            created_at: self.now(),
            last_login_at: None,
            is_disabled: false,
        };
        self.lock().users.insert(user.id.clone(), user.clone());
        user
    }

    pub fn disable_user(&self, user_id: &str) {
        if let Some(user) = self.lock().users.get_mut(user_id) {
            user.is_disabled = true;
        }
    }

    pub fn add_identity(&self, user_id: &str, kind: IdentityKind) -> IdentityInfo {
        let info = IdentityInfo {
            id: new_id(),
            user_id: user_id.to_string(),
            created_at: self.now(),
            kind,
        };
        self.lock().identities.push(info.clone());
        info
    }

    pub fn add_login_id(&self, user_id: &str, key_type: LoginIdKeyType, login_id: &str) -> IdentityInfo {
        self.add_identity(
            user_id,
            IdentityKind::LoginId {
                key_type,
                login_id: normalize_login_id(key_type, login_id),
            },
        )
    }

    pub fn add_authenticator(
        &self,
        user_id: &str,
        kind: AuthenticatorKind,
        is_default: bool,
        secret: AuthenticatorSecret,
    ) -> AuthenticatorInfo {
        let info = AuthenticatorInfo {
            id: new_id(),
            user_id: user_id.to_string(),
            kind,
            is_default,
            created_at: self.now(),
            secret,
        };
        self.lock().authenticators.push(info.clone());
        info
    }

    pub fn add_password(&self, user_id: &str, plain: &str) -> AuthenticatorInfo {
        self.add_authenticator(
            user_id,
            AuthenticatorKind::Primary,
            true,
            AuthenticatorSecret::Password {
                password_hash: password_hash(plain),
            },
        )
    }

    pub fn add_totp(&self, user_id: &str, secret: &str, is_default: bool) -> AuthenticatorInfo {
        self.add_authenticator(
            user_id,
            AuthenticatorKind::Secondary,
            is_default,
            AuthenticatorSecret::Totp {
                secret: secret.to_string(),
                display_name: "Authenticator".to_string(),
            },
        )
    }

    pub fn add_oob_email(&self, user_id: &str, kind: AuthenticatorKind, email: &str) -> AuthenticatorInfo {
        self.add_authenticator(
            user_id,
            kind,
            false,
            AuthenticatorSecret::OobEmail {
                email: email.to_string(),
            },
        )
    }

    pub fn add_oob_sms(&self, user_id: &str, kind: AuthenticatorKind, phone: &str) -> AuthenticatorInfo {
        self.add_authenticator(
            user_id,
            kind,
            false,
            AuthenticatorSecret::OobSms {
                phone: phone.to_string(),
            },
        )
    }

    pub fn add_recovery_codes(&self, user_id: &str, codes: &[&str]) {
        let mut state = self.lock();
        for code in codes {
            state.recovery_codes.push(RecoveryCode {
                id: new_id(),
                user_id: user_id.to_string(),
                code: code.to_string(),
                consumed: false,
            });
        }
    }

    pub fn add_device_token(&self, user_id: &str, token: &str) {
        self.lock()
            .device_tokens
            .push((user_id.to_string(), token.to_string()));
    }

    pub fn mark_verified(&self, user_id: &str, name: &str, value: &str) {
        self.lock().verified_claims.push((
            user_id.to_string(),
            VerifiableClaim {
                name: name.to_string(),
                value: value.to_string(),
            },
        ));
    }

    pub fn add_oauth_profile(&self, alias: &str, code: &str, profile: OAuthProfile) {
        self.outbox()
            .oauth_profiles
            .insert((alias.to_string(), code.to_string()), profile);
    }

    /// Tokens allowed per bucket before `RateLimited`. Unlimited by default.
    pub fn set_rate_limit(&self, limit: usize) {
        self.outbox().rate_limit = Some(limit);
    }

    // --- observations ---

    pub fn sent(&self) -> Vec<SendOptions> {
        self.outbox().sent.clone()
    }

    /// Most recent code sent to `target`.
    pub fn last_code(&self, target: &str) -> Option<String> {
        self.outbox()
            .sent
            .iter()
            .rev()
            .find(|s| s.target == target)
            .map(|s| s.code.clone())
    }

    pub fn events(&self) -> Vec<EventPayload> {
        self.outbox().events.clone()
    }

    pub fn reset_codes(&self) -> Vec<String> {
        self.outbox().reset_codes.keys().cloned().collect()
    }

    pub fn last_totp_secret(&self) -> Option<String> {
        self.outbox().last_totp_secret.clone()
    }

    pub fn identities_of(&self, user_id: &str) -> Vec<IdentityInfo> {
        self.lock()
            .identities
            .iter()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn authenticators_of(&self, user_id: &str) -> Vec<AuthenticatorInfo> {
        self.lock()
            .authenticators
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect()
    }

    fn next_code(&self) -> String {
        let mut outbox = self.outbox();
        outbox.code_counter += 1;
        format!("{:06}", 100000 + outbox.code_counter)
    }
}

fn ready<'a, T: Send + 'a>(value: T) -> BoxFuture<'a, T> {
    Box::pin(async move { value })
}

impl IdentityService for FakeWorld {
    fn get(&self, id: &str) -> BoxFuture<'_, Result<IdentityInfo>> {
        let found = self.lock().identities.iter().find(|i| i.id == id).cloned();
        ready(found.ok_or_else(|| AuthflowError::IdentityNotFound(id.to_string())))
    }

    fn list_by_user(&self, user_id: &str) -> BoxFuture<'_, Result<Vec<IdentityInfo>>> {
        ready(Ok(self.identities_of(user_id)))
    }

    fn get_by_spec(&self, spec: &IdentitySpec) -> BoxFuture<'_, Result<Option<IdentityInfo>>> {
        let found = self
            .lock()
            .identities
            .iter()
            .find(|i| i.matches_spec(spec))
            .cloned();
        ready(Ok(found))
    }

    fn new_identity(&self, user_id: &str, spec: &IdentitySpec) -> BoxFuture<'_, Result<IdentityInfo>> {
        ready(Ok(IdentityInfo {
            id: new_id(),
            user_id: user_id.to_string(),
            created_at: self.now(),
            kind: spec.to_kind(),
        }))
    }

    fn check_duplicated(&self, info: &IdentityInfo) -> BoxFuture<'_, Result<Option<IdentityInfo>>> {
        let found = self
            .lock()
            .identities
            .iter()
            .find(|i| i.id != info.id && same_identity(&i.kind, &info.kind))
            .cloned();
        ready(Ok(found))
    }

    fn create(&self, info: &IdentityInfo) -> BoxFuture<'_, Result<()>> {
        let mut state = self.lock();
        if state.identities.iter().any(|i| i.id == info.id) {
            return ready(Ok(()));
        }
        state.identities.push(info.clone());
        ready(Ok(()))
    }

    fn delete(&self, info: &IdentityInfo) -> BoxFuture<'_, Result<()>> {
        self.lock().identities.retain(|i| i.id != info.id);
        ready(Ok(()))
    }
}

impl AuthenticatorService for FakeWorld {
    fn get(&self, id: &str) -> BoxFuture<'_, Result<AuthenticatorInfo>> {
        let found = self
            .lock()
            .authenticators
            .iter()
            .find(|a| a.id == id)
            .cloned();
        ready(found.ok_or_else(|| AuthflowError::AuthenticatorNotFound(id.to_string())))
    }

    fn list(&self, user_id: &str) -> BoxFuture<'_, Result<Vec<AuthenticatorInfo>>> {
        ready(Ok(self.authenticators_of(user_id)))
    }

    fn new_authenticator(
        &self,
        id: &str,
        spec: &AuthenticatorSpec,
    ) -> BoxFuture<'_, Result<AuthenticatorInfo>> {
        let secret = match &spec.payload {
            SpecPayload::Password { plain_password } => AuthenticatorSecret::Password {
                password_hash: password_hash(plain_password),
            },
            SpecPayload::Totp { display_name } => {
                let secret = random_string(16).to_uppercase();
                self.outbox().last_totp_secret = Some(secret.clone());
                AuthenticatorSecret::Totp {
                    secret,
                    display_name: display_name.clone(),
                }
            }
            SpecPayload::OobEmail { email } => AuthenticatorSecret::OobEmail {
                email: email.clone(),
            },
            SpecPayload::OobSms { phone } => AuthenticatorSecret::OobSms {
                phone: phone.clone(),
            },
        };
        ready(Ok(AuthenticatorInfo {
            id: id.to_string(),
            user_id: spec.user_id.clone(),
            kind: spec.kind,
            is_default: spec.is_default,
            created_at: self.now(),
            secret,
        }))
    }

    fn with_password(
        &self,
        info: &AuthenticatorInfo,
        new_password: &str,
    ) -> BoxFuture<'_, Result<AuthenticatorInfo>> {
        let mut updated = info.clone();
        updated.secret = AuthenticatorSecret::Password {
            password_hash: password_hash(new_password),
        };
        ready(Ok(updated))
    }

    fn verify(&self, info: &AuthenticatorInfo, credential: &Credential) -> BoxFuture<'_, Result<bool>> {
        let ok = match (&info.secret, credential) {
            (AuthenticatorSecret::Password { password_hash: h }, Credential::Password(plain)) => {
                constant_time_eq(h.as_bytes(), password_hash(plain).as_bytes())
            }
            (AuthenticatorSecret::Totp { secret, .. }, Credential::Totp(code)) => {
                constant_time_eq(totp_code(secret).as_bytes(), code.as_bytes())
            }
            _ => false,
        };
        ready(Ok(ok))
    }

    fn create(&self, info: &AuthenticatorInfo) -> BoxFuture<'_, Result<()>> {
        let mut state = self.lock();
        if !state.authenticators.iter().any(|a| a.id == info.id) {
            state.authenticators.push(info.clone());
        }
        ready(Ok(()))
    }

    fn update(&self, info: &AuthenticatorInfo) -> BoxFuture<'_, Result<()>> {
        let mut state = self.lock();
        match state.authenticators.iter_mut().find(|a| a.id == info.id) {
            Some(existing) => {
                *existing = info.clone();
                ready(Ok(()))
            }
            None => ready(Err(AuthflowError::AuthenticatorNotFound(info.id.clone()))),
        }
    }

    fn delete(&self, info: &AuthenticatorInfo) -> BoxFuture<'_, Result<()>> {
        self.lock().authenticators.retain(|a| a.id != info.id);
        ready(Ok(()))
    }
}

impl OtpCodeService for FakeWorld {
    fn generate(&self, target: &str, kind: OtpKind) -> BoxFuture<'_, Result<String>> {
        let code = self.next_code();
        self.outbox()
            .otp_codes
            .insert((target.to_string(), kind), code.clone());
        ready(Ok(code))
    }

    fn verify(&self, target: &str, kind: OtpKind, code: &str) -> BoxFuture<'_, Result<()>> {
        let mut outbox = self.outbox();
        let key = (target.to_string(), kind);
        let matches = outbox
            .otp_codes
            .get(&key)
            .is_some_and(|expected| constant_time_eq(expected.as_bytes(), code.as_bytes()));
        if matches {
            outbox.otp_codes.remove(&key);
            ready(Ok(()))
        } else {
            ready(Err(AuthflowError::InvalidCode))
        }
    }
}

impl OtpSender for FakeWorld {
    fn send(&self, opts: &SendOptions) -> BoxFuture<'_, Result<()>> {
        self.outbox().sent.push(opts.clone());
        ready(Ok(()))
    }
}

impl MfaService for FakeWorld {
    fn generate_device_token(&self) -> String {
        random_string(32)
    }

    fn create_device_token(&self, user_id: &str, token: &str) -> BoxFuture<'_, Result<()>> {
        self.add_device_token(user_id, token);
        ready(Ok(()))
    }

    fn verify_device_token(&self, user_id: &str, token: &str) -> BoxFuture<'_, Result<()>> {
        let found = self
            .lock()
            .device_tokens
            .iter()
            .any(|(u, t)| u == user_id && constant_time_eq(t.as_bytes(), token.as_bytes()));
        if found {
            ready(Ok(()))
        } else {
            ready(Err(AuthflowError::InvalidCredentials))
        }
    }

    fn invalidate_all_device_tokens(&self, user_id: &str) -> BoxFuture<'_, Result<()>> {
        self.lock().device_tokens.retain(|(u, _)| u != user_id);
        ready(Ok(()))
    }

    fn generate_recovery_codes(&self) -> Vec<String> {
        (0..8).map(|_| random_string(10).to_uppercase()).collect()
    }

    fn replace_recovery_codes(
        &self,
        user_id: &str,
        codes: &[String],
    ) -> BoxFuture<'_, Result<Vec<RecoveryCode>>> {
        let mut state = self.lock();
        state.recovery_codes.retain(|c| c.user_id != user_id);
        let created: Vec<RecoveryCode> = codes
            .iter()
            .map(|code| RecoveryCode {
                id: new_id(),
                user_id: user_id.to_string(),
                code: code.clone(),
                consumed: false,
            })
            .collect();
        state.recovery_codes.extend(created.iter().cloned());
        ready(Ok(created))
    }

    fn verify_recovery_code(&self, user_id: &str, code: &str) -> BoxFuture<'_, Result<RecoveryCode>> {
        let found = self
            .lock()
            .recovery_codes
            .iter()
            .find(|c| {
                c.user_id == user_id
                    && !c.consumed
                    && constant_time_eq(c.code.as_bytes(), code.as_bytes())
            })
            .cloned();
        ready(found.ok_or(AuthflowError::InvalidCredentials))
    }

    fn consume_recovery_code(&self, code: &RecoveryCode) -> BoxFuture<'_, Result<()>> {
        if let Some(existing) = self
            .lock()
            .recovery_codes
            .iter_mut()
            .find(|c| c.id == code.id)
        {
            existing.consumed = true;
        }
        ready(Ok(()))
    }
}

impl UserService for FakeWorld {
    fn get(&self, id: &str) -> BoxFuture<'_, Result<User>> {
        let found = self.lock().users.get(id).cloned();
        ready(found.ok_or(AuthflowError::UserNotFound))
    }

    fn create(&self, user_id: &str) -> BoxFuture<'_, Result<User>> {
        ready(Ok(self.add_user(user_id)))
    }

    fn update_login_time(&self, user_id: &str, at: chrono::DateTime<chrono::Utc>) -> BoxFuture<'_, Result<()>> {
        match self.lock().users.get_mut(user_id) {
            Some(user) => {
                user.last_login_at = Some(at);
                ready(Ok(()))
            }
            None => ready(Err(AuthflowError::UserNotFound)),
        }
    }
}

impl VerificationService for FakeWorld {
    fn claim_status(&self, identity: &IdentityInfo) -> BoxFuture<'_, Result<Vec<ClaimStatus>>> {
        let state = self.lock();
        let statuses = identity
            .verifiable_claim()
            .map(|claim| {
                let verified = state
                    .verified_claims
                    .iter()
                    .any(|(u, c)| *u == identity.user_id && *c == claim);
                vec![ClaimStatus {
                    name: claim.name,
                    value: claim.value,
                    verified,
                }]
            })
            .unwrap_or_default();
        ready(Ok(statuses))
    }

    fn mark_claim_verified(&self, user_id: &str, claim: &VerifiableClaim) -> BoxFuture<'_, Result<()>> {
        let mut state = self.lock();
        let exists = state
            .verified_claims
            .iter()
            .any(|(u, c)| u == user_id && c == claim);
        if !exists {
            state
                .verified_claims
                .push((user_id.to_string(), claim.clone()));
        }
        ready(Ok(()))
    }
}

impl SessionProvider for FakeWorld {
    fn make_session(&self, attrs: &SessionAttrs) -> (Session, String) {
        let now = self.now();
        let session = Session {
            id: new_id(),
            user_id: attrs.user_id.clone(),
            amr: attrs.amr.clone(),
            created_at: now,
            authenticated_at: Some(now),
        };
        let token = format!("token-{}", session.id);
        (session, token)
    }

    fn create(&self, session: &Session) -> BoxFuture<'_, Result<()>> {
        self.lock().sessions.push(session.clone());
        ready(Ok(()))
    }

    fn reauthenticate(&self, session_id: &str, amr: &[String]) -> BoxFuture<'_, Result<()>> {
        self.lock()
            .reauthentications
            .push((session_id.to_string(), amr.to_vec()));
        ready(Ok(()))
    }
}

impl EventService for FakeWorld {
    fn dispatch(&self, payload: EventPayload) -> BoxFuture<'_, Result<()>> {
        self.outbox().events.push(payload);
        ready(Ok(()))
    }
}

impl RateLimiter for FakeWorld {
    fn take(&self, bucket: &BucketSpec) -> BoxFuture<'_, Result<()>> {
        let mut outbox = self.outbox();
        let limit = outbox.rate_limit;
        let count = outbox.rate_counts.entry(bucket.clone()).or_insert(0);
        if limit.is_some_and(|l| *count >= l) {
            return ready(Err(AuthflowError::RateLimited {
                bucket: bucket.name.clone(),
            }));
        }
        *count += 1;
        ready(Ok(()))
    }
}

impl CookieManager for FakeWorld {
    fn value_cookie(&self, def: &CookieDef, value: &str) -> Cookie {
        Cookie {
            name: def.name.clone(),
            value: value.to_string(),
            max_age_secs: def.max_age_secs,
            http_only: true,
        }
    }
}

impl ForgotPasswordService for FakeWorld {
    fn send_code(&self, login_id: &str) -> BoxFuture<'_, Result<()>> {
        let owner = self.lock().identities.iter().find_map(|i| match i.login_id() {
            Some((key_type, value))
                if normalize_login_id(key_type, value) == normalize_login_id(key_type, login_id) =>
            {
                Some((i.user_id.clone(), key_type))
            }
            _ => None,
        });
        let Some((user_id, key_type)) = owner else {
            return ready(Err(AuthflowError::UserNotFound));
        };

        let code = format!("reset-{}", self.next_code());
        let channel = match key_type {
            LoginIdKeyType::Phone => authflow_core::authn::OobChannel::Sms,
            _ => authflow_core::authn::OobChannel::Email,
        };
        let mut outbox = self.outbox();
        outbox.reset_codes.insert(code.clone(), user_id);
        outbox.sent.push(SendOptions {
            channel,
            target: login_id.to_string(),
            kind: OtpKind::Verification,
            code,
        });
        ready(Ok(()))
    }
}

impl ResetPasswordService for FakeWorld {
    fn verify_code(&self, code: &str) -> BoxFuture<'_, Result<String>> {
        let user_id = self.outbox().reset_codes.get(code).cloned();
        ready(user_id.ok_or(AuthflowError::InvalidCode))
    }

    fn reset_password(&self, code: &str, new_password: &str) -> BoxFuture<'_, Result<()>> {
        let Some(user_id) = self.outbox().reset_codes.remove(code) else {
            return ready(Err(AuthflowError::InvalidCode));
        };
        let now = self.now();
        let mut state = self.lock();
        let existing = state.authenticators.iter_mut().find(|a| {
            a.user_id == user_id
                && a.kind == AuthenticatorKind::Primary
                && matches!(a.secret, AuthenticatorSecret::Password { .. })
        });
        match existing {
            Some(a) => {
                a.secret = AuthenticatorSecret::Password {
                    password_hash: password_hash(new_password),
                };
            }
            None => state.authenticators.push(AuthenticatorInfo {
                id: new_id(),
                user_id,
                kind: AuthenticatorKind::Primary,
                is_default: false,
                created_at: now,
                secret: AuthenticatorSecret::Password {
                    password_hash: password_hash(new_password),
                },
            }),
        }
        ready(Ok(()))
    }
}

impl OAuthProviderFactory for FakeWorld {
    fn authorization_url(&self, alias: &str, state: &str) -> BoxFuture<'_, Result<String>> {
        ready(Ok(format!(
            "https://{}.example.com/authorize?state={}",
            alias, state
        )))
    }

    fn user_profile(&self, alias: &str, code: &str) -> BoxFuture<'_, Result<OAuthProfile>> {
        let profile = self
            .outbox()
            .oauth_profiles
            .get(&(alias.to_string(), code.to_string()))
            .cloned();
        ready(profile.ok_or_else(|| AuthflowError::OAuth(format!("invalid code for {}", alias))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_otp_codes_are_single_use() {
        let world = FakeWorld::default();
        let code = OtpCodeService::generate(&world, "a@example.com", OtpKind::Authentication)
            .await
            .unwrap();
        assert!(
            OtpCodeService::verify(&world, "a@example.com", OtpKind::Setup, &code)
                .await
                .is_err()
        );
        OtpCodeService::verify(&world, "a@example.com", OtpKind::Authentication, &code)
            .await
            .unwrap();
        assert!(
            OtpCodeService::verify(&world, "a@example.com", OtpKind::Authentication, &code)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_password_verification() {
        let world = FakeWorld::default();
        world.add_user("u1");
        let pw = world.add_password("u1", "secret");
        assert!(AuthenticatorService::verify(&world, &pw, &Credential::Password("secret".into()))
            .await
            .unwrap());
        assert!(!AuthenticatorService::verify(&world, &pw, &Credential::Password("wrong".into()))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_rate_limit() {
        let world = FakeWorld::default();
        world.set_rate_limit(1);
        let bucket = BucketSpec::otp_trigger(authflow_core::authn::OobChannel::Sms, "+1");
        world.take(&bucket).await.unwrap();
        assert!(matches!(
            world.take(&bucket).await,
            Err(AuthflowError::RateLimited { .. })
        ));
    }
}
