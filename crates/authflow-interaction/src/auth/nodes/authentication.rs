use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::debug;

use authflow_core::authn::{
    AuthenticationStage, AuthenticationType, AuthenticatorInfo, AuthenticatorKind,
    AuthenticatorType, Credential, IdentityInfo, OobChannel,
};
use authflow_core::config::AuthenticationConfig;
use authflow_core::error::{AuthflowError, Result};
use authflow_core::types::{Cookie, OtpKind, RecoveryCode};

use super::{require, require_input, send_otp};
use crate::auth::{
    sortable_of, sorted_edges, AuthEdge, AuthEffect, AuthGraph, AuthNode, AuthStep,
    AuthTransition, DynAuthInput,
};
use crate::engine::{sort_authenticators, Context, Prepared, Sortable};

#[derive(Debug)]
pub struct EdgeAuthenticationBegin {
    pub stage: AuthenticationStage,
}

impl AuthTransition for EdgeAuthenticationBegin {
    fn instantiate<'a>(
        &'a self,
        _ctx: &'a Context,
        _graph: &'a AuthGraph,
        _input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            Ok(NodeAuthenticationBegin {
                stage: self.stage,
                state: Prepared::new(),
            }
            .into())
        })
    }
}

#[derive(Debug, Clone)]
struct AuthenticationBeginState {
    identity: Option<IdentityInfo>,
    primary: Option<AuthenticatorInfo>,
    authenticators: Vec<AuthenticatorInfo>,
    config: AuthenticationConfig,
}

impl AuthenticationBeginState {
    /// Authenticators usable at `stage` and the types the user must be able to present.
    fn candidates(&self, stage: AuthenticationStage) -> (Vec<AuthenticatorInfo>, Vec<AuthenticatorType>) {
        match stage {
            AuthenticationStage::Primary => self.primary_candidates(),
            AuthenticationStage::Secondary => self.secondary_candidates(),
        }
    }

    fn primary_candidates(&self) -> (Vec<AuthenticatorInfo>, Vec<AuthenticatorType>) {
        match &self.identity {
            // Reauthentication of a user without a selected identity
            None => (self.of_kind(AuthenticatorKind::Primary), vec![]),
            Some(identity) => (
                self.authenticators
                    .iter()
                    .filter(|a| a.is_primary_of_identity(identity))
                    .cloned()
                    .collect(),
                identity.primary_authenticator_types(),
            ),
        }
    }

    fn secondary_candidates(&self) -> (Vec<AuthenticatorInfo>, Vec<AuthenticatorType>) {
        if self.config.secondary_authentication_mode.is_disabled() {
            return (vec![], vec![]);
        }
        if let Some(primary) = &self.primary {
            if !primary.can_have_mfa() {
                return (vec![], vec![]);
            }
        }
        let available = self.of_kind(AuthenticatorKind::Secondary);
        let mut required: Vec<AuthenticatorType> = vec![];
        for typ in available.iter().map(AuthenticatorInfo::authenticator_type) {
            if !required.contains(&typ) {
                required.push(typ);
            }
        }
        (available, required)
    }

    fn of_kind(&self, kind: AuthenticatorKind) -> Vec<AuthenticatorInfo> {
        self.authenticators
            .iter()
            .filter(|a| a.kind == kind)
            .cloned()
            .collect()
    }

    fn preferred(&self, stage: AuthenticationStage) -> &[AuthenticatorType] {
        match stage {
            AuthenticationStage::Primary => &self.config.primary_authenticators,
            AuthenticationStage::Secondary => &self.config.secondary_authenticators,
        }
    }
}

/// Offers one edge per authenticator type the user can authenticate with.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeAuthenticationBegin {
    pub stage: AuthenticationStage,
    #[serde(skip)]
    state: Prepared<AuthenticationBeginState>,
}

impl NodeAuthenticationBegin {
    /// Authenticators of one type, defaults first.
    fn group(available: &[AuthenticatorInfo], typ: AuthenticatorType) -> Vec<AuthenticatorInfo> {
        let mut group: Vec<AuthenticatorInfo> = available
            .iter()
            .filter(|a| a.authenticator_type() == typ)
            .cloned()
            .collect();
        sort_authenticators(&[], &mut group, |a| Sortable {
            authenticator_type: a.authenticator_type(),
            is_default: a.is_default,
        });
        group
    }
}

impl AuthStep for NodeAuthenticationBegin {
    fn prepare<'a>(&'a self, ctx: &'a Context, graph: &'a AuthGraph) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let user_id = graph.user_id()?;
            let authenticators = ctx.services.authenticators.list(&user_id).await?;
            self.state.set(AuthenticationBeginState {
                identity: graph.user_last_identity(),
                primary: graph.user_authenticator(AuthenticationStage::Primary),
                authenticators,
                config: ctx.config.authentication.clone(),
            });
            Ok(())
        })
    }

    fn derive_edges(&self, _graph: &AuthGraph) -> Result<Option<Vec<AuthEdge>>> {
        let state = self.state.get("authentication_begin")?;
        let stage = self.stage;
        let (available, required) = state.candidates(stage);
        let preferred = state.preferred(stage);

        let mut candidates: Vec<(Sortable, AuthEdge)> = vec![];

        let passwords = Self::group(&available, AuthenticatorType::Password);
        // Without a stored password the edge is still offered so the response
        // does not reveal which authenticators the account has.
        let offer_password = !passwords.is_empty()
            || (preferred.contains(&AuthenticatorType::Password)
                && required.contains(&AuthenticatorType::Password));
        if offer_password {
            candidates.push((
                sortable_of(AuthenticatorType::Password, &passwords),
                EdgeAuthenticationPassword {
                    stage,
                    authenticators: passwords,
                }
                .into(),
            ));
        }

        let totps = Self::group(&available, AuthenticatorType::Totp);
        if !totps.is_empty() {
            candidates.push((
                sortable_of(AuthenticatorType::Totp, &totps),
                EdgeAuthenticationTotp {
                    stage,
                    authenticators: totps,
                }
                .into(),
            ));
        }

        for typ in [AuthenticatorType::OobEmail, AuthenticatorType::OobSms] {
            let group = Self::group(&available, typ);
            if group.is_empty() {
                continue;
            }
            candidates.push((
                sortable_of(typ, &group),
                EdgeAuthenticationOobTrigger {
                    stage,
                    oob_authenticator_type: typ,
                    authenticators: group,
                }
                .into(),
            ));
        }

        let mut edges = sorted_edges(preferred, candidates);

        if edges.is_empty() {
            if !required.is_empty() {
                return Err(AuthflowError::MissingAuthenticatorForIdentity);
            }
            debug!(stage = %stage, "No authenticator to use, skipping stage");
            edges.push(
                EdgeAuthenticationEnd {
                    stage,
                    authentication_type: AuthenticationType::None,
                    verified_authenticator: None,
                }
                .into(),
            );
            return Ok(Some(edges));
        }

        if stage == AuthenticationStage::Secondary {
            if !state.config.recovery_code.disabled {
                edges.push(EdgeConsumeRecoveryCode.into());
            }
            if !state.config.device_token.disabled {
                edges.push(EdgeUseDeviceToken.into());
            }
        }

        Ok(Some(edges))
    }
}

/// Checks a presented credential against each authenticator in turn.
async fn verify_any(
    ctx: &Context,
    authenticators: &[AuthenticatorInfo],
    credential: &Credential,
) -> Result<Option<AuthenticatorInfo>> {
    for authenticator in authenticators {
        if ctx.services.authenticators.verify(authenticator, credential).await? {
            return Ok(Some(authenticator.clone()));
        }
    }
    Ok(None)
}

#[derive(Debug)]
pub struct EdgeAuthenticationPassword {
    pub stage: AuthenticationStage,
    pub authenticators: Vec<AuthenticatorInfo>,
}

impl AuthTransition for EdgeAuthenticationPassword {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a AuthGraph,
        input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let password = require(require_input(input)?.password())?;
            let credential = Credential::Password(password.to_string());
            let verified = verify_any(ctx, &self.authenticators, &credential).await?;
            Ok(NodeAuthenticationEnd {
                stage: self.stage,
                authentication_type: AuthenticationType::Password,
                verified_authenticator: verified,
            }
            .into())
        })
    }
}

#[derive(Debug)]
pub struct EdgeAuthenticationTotp {
    pub stage: AuthenticationStage,
    pub authenticators: Vec<AuthenticatorInfo>,
}

impl AuthTransition for EdgeAuthenticationTotp {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a AuthGraph,
        input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let code = require(require_input(input)?.totp_code())?;
            let credential = Credential::Totp(code.to_string());
            let verified = verify_any(ctx, &self.authenticators, &credential).await?;
            Ok(NodeAuthenticationEnd {
                stage: self.stage,
                authentication_type: AuthenticationType::Totp,
                verified_authenticator: verified,
            }
            .into())
        })
    }
}

/// Sends a code to the out-of-band authenticator picked by the user.
#[derive(Debug)]
pub struct EdgeAuthenticationOobTrigger {
    pub stage: AuthenticationStage,
    pub oob_authenticator_type: AuthenticatorType,
    pub authenticators: Vec<AuthenticatorInfo>,
}

impl AuthTransition for EdgeAuthenticationOobTrigger {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a AuthGraph,
        input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let input = require_input(input)?;
            if input.oob_authenticator_type() != Some(self.oob_authenticator_type) {
                return Err(AuthflowError::IncompatibleInput);
            }
            let index = input.oob_authenticator_index().unwrap_or(0);
            let authenticator = require(self.authenticators.get(index))?;
            let (channel, target) = authenticator.oob_target().ok_or_else(|| {
                AuthflowError::InvariantViolated("oob authenticator without target".to_string())
            })?;

            send_otp(ctx, channel, target, OtpKind::Authentication).await?;

            Ok(NodeAuthenticationOobTrigger {
                stage: self.stage,
                authenticator: authenticator.clone(),
                channel,
                target: target.to_string(),
            }
            .into())
        })
    }
}

/// Waiting for the code sent to an out-of-band authenticator.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeAuthenticationOobTrigger {
    pub stage: AuthenticationStage,
    pub authenticator: AuthenticatorInfo,
    pub channel: OobChannel,
    pub target: String,
}

impl AuthStep for NodeAuthenticationOobTrigger {
    fn derive_edges(&self, _graph: &AuthGraph) -> Result<Option<Vec<AuthEdge>>> {
        Ok(Some(vec![
            EdgeAuthenticationOobResend {
                channel: self.channel,
                target: self.target.clone(),
            }
            .into(),
            EdgeAuthenticationOob {
                stage: self.stage,
                authenticator: self.authenticator.clone(),
                target: self.target.clone(),
            }
            .into(),
        ]))
    }
}

#[derive(Debug)]
pub struct EdgeAuthenticationOobResend {
    pub channel: OobChannel,
    pub target: String,
}

impl AuthTransition for EdgeAuthenticationOobResend {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a AuthGraph,
        input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            if !require_input(input)?.resend() {
                return Err(AuthflowError::IncompatibleInput);
            }
            send_otp(ctx, self.channel, &self.target, OtpKind::Authentication).await?;
            Err(AuthflowError::SameNode)
        })
    }
}

#[derive(Debug)]
pub struct EdgeAuthenticationOob {
    pub stage: AuthenticationStage,
    pub authenticator: AuthenticatorInfo,
    pub target: String,
}

impl AuthTransition for EdgeAuthenticationOob {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a AuthGraph,
        input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let code = require(require_input(input)?.oob_code())?;
            let verified = match ctx
                .services
                .otp_codes
                .verify(&self.target, OtpKind::Authentication, code)
                .await
            {
                Ok(()) => Some(self.authenticator.clone()),
                Err(AuthflowError::InvalidCode) => None,
                Err(e) => return Err(e),
            };
            Ok(NodeAuthenticationEnd {
                stage: self.stage,
                authentication_type: AuthenticationType::OobOtp,
                verified_authenticator: verified,
            }
            .into())
        })
    }
}

#[derive(Debug)]
pub struct EdgeConsumeRecoveryCode;

impl AuthTransition for EdgeConsumeRecoveryCode {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        graph: &'a AuthGraph,
        input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let code = require(require_input(input)?.recovery_code())?;
            let user_id = graph.user_id()?;
            let recovery_code = ctx.services.mfa.verify_recovery_code(&user_id, code).await?;
            Ok(NodeConsumeRecoveryCode { recovery_code }.into())
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeConsumeRecoveryCode {
    pub recovery_code: RecoveryCode,
}

impl AuthStep for NodeConsumeRecoveryCode {
    fn effects(&self) -> Vec<AuthEffect> {
        vec![AuthEffect::ConsumeRecoveryCode {
            code: self.recovery_code.clone(),
        }]
    }

    fn derive_edges(&self, _graph: &AuthGraph) -> Result<Option<Vec<AuthEdge>>> {
        Ok(Some(vec![EdgeAuthenticationEnd {
            stage: AuthenticationStage::Secondary,
            authentication_type: AuthenticationType::RecoveryCode,
            verified_authenticator: None,
        }
        .into()]))
    }
}

/// Skips the second factor with a token remembered from an earlier login.
#[derive(Debug)]
pub struct EdgeUseDeviceToken;

impl AuthTransition for EdgeUseDeviceToken {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        graph: &'a AuthGraph,
        input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let token = require(require_input(input)?.device_token())?;
            let user_id = graph.user_id()?;
            // A stale token lets the user fall back to another authenticator
            match ctx.services.mfa.verify_device_token(&user_id, token).await {
                Ok(()) => Ok(NodeUseDeviceToken {}.into()),
                Err(AuthflowError::InvalidCredentials) => Err(AuthflowError::IncompatibleInput),
                Err(e) => Err(e),
            }
        })
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct NodeUseDeviceToken {}

impl AuthStep for NodeUseDeviceToken {
    fn derive_edges(&self, _graph: &AuthGraph) -> Result<Option<Vec<AuthEdge>>> {
        Ok(Some(vec![EdgeAuthenticationEnd {
            stage: AuthenticationStage::Secondary,
            authentication_type: AuthenticationType::DeviceToken,
            verified_authenticator: None,
        }
        .into()]))
    }
}

#[derive(Debug)]
pub struct EdgeAuthenticationEnd {
    pub stage: AuthenticationStage,
    pub authentication_type: AuthenticationType,
    pub verified_authenticator: Option<AuthenticatorInfo>,
}

impl AuthTransition for EdgeAuthenticationEnd {
    fn instantiate<'a>(
        &'a self,
        _ctx: &'a Context,
        _graph: &'a AuthGraph,
        _input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            Ok(NodeAuthenticationEnd {
                stage: self.stage,
                authentication_type: self.authentication_type,
                verified_authenticator: self.verified_authenticator.clone(),
            }
            .into())
        })
    }
}

/// Outcome of one authentication stage.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeAuthenticationEnd {
    pub stage: AuthenticationStage,
    pub authentication_type: AuthenticationType,
    #[serde(default)]
    pub verified_authenticator: Option<AuthenticatorInfo>,
}

impl AuthStep for NodeAuthenticationEnd {
    fn derive_edges(&self, _graph: &AuthGraph) -> Result<Option<Vec<AuthEdge>>> {
        if self.authentication_type.requires_authenticator() && self.verified_authenticator.is_none() {
            return Err(AuthflowError::InvalidCredentials);
        }
        Ok(None)
    }
}

/// Records the authenticator of a finished stage, and remembers the device
/// after a second factor when asked to.
#[derive(Debug)]
pub struct EdgeDoUseAuthenticator {
    pub stage: AuthenticationStage,
    pub authenticator: Option<AuthenticatorInfo>,
}

impl AuthTransition for EdgeDoUseAuthenticator {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        graph: &'a AuthGraph,
        input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let user_id = graph.user_id()?;

            let mut device_token = None;
            let mut device_token_cookie = None;
            let wants_token = input.is_some_and(|input| input.create_device_token());
            if self.stage == AuthenticationStage::Secondary
                && !ctx.config.authentication.device_token.disabled
                && wants_token
            {
                let token = ctx.services.mfa.generate_device_token();
                let cookie = ctx
                    .services
                    .cookies
                    .value_cookie(&ctx.config.session.device_token_cookie(), &token);
                device_token = Some(token);
                device_token_cookie = Some(cookie);
            }

            Ok(NodeDoUseAuthenticator {
                stage: self.stage,
                authenticator: self.authenticator.clone(),
                user_id,
                device_token,
                device_token_cookie,
            }
            .into())
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeDoUseAuthenticator {
    pub stage: AuthenticationStage,
    #[serde(default)]
    pub authenticator: Option<AuthenticatorInfo>,
    pub user_id: String,
    #[serde(default)]
    pub device_token: Option<String>,
    #[serde(default)]
    pub device_token_cookie: Option<Cookie>,
}

impl AuthStep for NodeDoUseAuthenticator {
    fn effects(&self) -> Vec<AuthEffect> {
        match &self.device_token {
            Some(token) => vec![AuthEffect::CreateDeviceToken {
                user_id: self.user_id.clone(),
                token: token.clone(),
            }],
            None => vec![],
        }
    }

    fn user_authenticator(&self, stage: AuthenticationStage) -> Option<&AuthenticatorInfo> {
        if stage == self.stage {
            self.authenticator.as_ref()
        } else {
            None
        }
    }

    fn cookies(&self) -> Vec<Cookie> {
        self.device_token_cookie.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authflow_core::authn::{AuthenticatorSecret, IdentityKind, LoginIdKeyType};
    use authflow_core::config::SecondaryAuthenticationMode;
    use chrono::Utc;

    fn authenticator(id: &str, kind: AuthenticatorKind, secret: AuthenticatorSecret) -> AuthenticatorInfo {
        AuthenticatorInfo {
            id: id.into(),
            user_id: "u1".into(),
            kind,
            is_default: false,
            created_at: Utc::now(),
            secret,
        }
    }

    fn password(id: &str, kind: AuthenticatorKind) -> AuthenticatorInfo {
        authenticator(
            id,
            kind,
            AuthenticatorSecret::Password {
                password_hash: "h".into(),
            },
        )
    }

    fn sms(id: &str, kind: AuthenticatorKind, phone: &str) -> AuthenticatorInfo {
        authenticator(id, kind, AuthenticatorSecret::OobSms { phone: phone.into() })
    }

    fn email_identity() -> IdentityInfo {
        IdentityInfo {
            id: "i1".into(),
            user_id: "u1".into(),
            created_at: Utc::now(),
            kind: IdentityKind::LoginId {
                key_type: LoginIdKeyType::Email,
                login_id: "a@example.com".into(),
            },
        }
    }

    fn begin(stage: AuthenticationStage, state: AuthenticationBeginState) -> NodeAuthenticationBegin {
        let node = NodeAuthenticationBegin {
            stage,
            state: Prepared::new(),
        };
        node.state.set(state);
        node
    }

    fn kinds(edges: &[AuthEdge]) -> Vec<&'static str> {
        use crate::engine::Edge;
        edges.iter().map(|e| e.kind()).collect()
    }

    #[test]
    fn test_secondary_offers_recovery_and_device_token() {
        let node = begin(
            AuthenticationStage::Secondary,
            AuthenticationBeginState {
                identity: Some(email_identity()),
                primary: Some(password("p1", AuthenticatorKind::Primary)),
                authenticators: vec![
                    password("p1", AuthenticatorKind::Primary),
                    sms("s1", AuthenticatorKind::Secondary, "+85290000000"),
                ],
                config: AuthenticationConfig::default(),
            },
        );
        let graph = AuthGraph::new(crate::auth::IntentForgotPassword {}.into());
        let edges = node.derive_edges(&graph).unwrap().unwrap();
        assert_eq!(
            kinds(&edges),
            vec!["authentication_oob_trigger", "consume_recovery_code", "use_device_token"]
        );
    }

    #[test]
    fn test_secondary_skipped_when_disabled() {
        let mut config = AuthenticationConfig::default();
        config.secondary_authentication_mode = SecondaryAuthenticationMode::Disabled;
        let node = begin(
            AuthenticationStage::Secondary,
            AuthenticationBeginState {
                identity: Some(email_identity()),
                primary: None,
                authenticators: vec![sms("s1", AuthenticatorKind::Secondary, "+85290000000")],
                config,
            },
        );
        let graph = AuthGraph::new(crate::auth::IntentForgotPassword {}.into());
        let edges = node.derive_edges(&graph).unwrap().unwrap();
        assert_eq!(kinds(&edges), vec!["authentication_end"]);
    }

    #[test]
    fn test_primary_missing_authenticator() {
        let mut config = AuthenticationConfig::default();
        config.primary_authenticators = vec![AuthenticatorType::OobEmail];
        let node = begin(
            AuthenticationStage::Primary,
            AuthenticationBeginState {
                identity: Some(email_identity()),
                primary: None,
                authenticators: vec![],
                config,
            },
        );
        let graph = AuthGraph::new(crate::auth::IntentForgotPassword {}.into());
        let err = node.derive_edges(&graph).unwrap_err();
        assert!(matches!(err, AuthflowError::MissingAuthenticatorForIdentity));
    }

    #[test]
    fn test_primary_password_offered_without_stored_password() {
        let node = begin(
            AuthenticationStage::Primary,
            AuthenticationBeginState {
                identity: Some(email_identity()),
                primary: None,
                authenticators: vec![],
                config: AuthenticationConfig::default(),
            },
        );
        let graph = AuthGraph::new(crate::auth::IntentForgotPassword {}.into());
        let edges = node.derive_edges(&graph).unwrap().unwrap();
        assert_eq!(kinds(&edges), vec!["authentication_password"]);
    }

    #[test]
    fn test_primary_sorted_by_preference() {
        let mut config = AuthenticationConfig::default();
        config.primary_authenticators = vec![AuthenticatorType::OobEmail, AuthenticatorType::Password];
        let node = begin(
            AuthenticationStage::Primary,
            AuthenticationBeginState {
                identity: Some(email_identity()),
                primary: None,
                authenticators: vec![
                    password("p1", AuthenticatorKind::Primary),
                    authenticator(
                        "e1",
                        AuthenticatorKind::Primary,
                        AuthenticatorSecret::OobEmail {
                            email: "a@example.com".into(),
                        },
                    ),
                ],
                config,
            },
        );
        let graph = AuthGraph::new(crate::auth::IntentForgotPassword {}.into());
        let edges = node.derive_edges(&graph).unwrap().unwrap();
        assert_eq!(
            kinds(&edges),
            vec!["authentication_oob_trigger", "authentication_password"]
        );
    }

    #[test]
    fn test_authentication_end_requires_verified() {
        let graph = AuthGraph::new(crate::auth::IntentForgotPassword {}.into());
        let failed = NodeAuthenticationEnd {
            stage: AuthenticationStage::Primary,
            authentication_type: AuthenticationType::Password,
            verified_authenticator: None,
        };
        assert!(matches!(
            failed.derive_edges(&graph),
            Err(AuthflowError::InvalidCredentials)
        ));

        let skipped = NodeAuthenticationEnd {
            stage: AuthenticationStage::Secondary,
            authentication_type: AuthenticationType::None,
            verified_authenticator: None,
        };
        assert!(skipped.derive_edges(&graph).unwrap().is_none());
    }
}
